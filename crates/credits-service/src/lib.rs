//! Credits HTTP API Service.
//!
//! This crate exposes the credit ledger over HTTP:
//!
//! - Organization registration and lookup
//! - Balance, credit checks, deductions, grants and refunds
//! - Transaction history and usage reporting
//! - Credit pack checkout and purchase reconciliation
//! - Stripe webhooks
//!
//! # Authentication
//!
//! Two API keys are configured:
//!
//! 1. **Service API key** (`X-API-Key`) - For the host application calling on
//!    behalf of an organization
//! 2. **Admin API key** (`X-Admin-Key`) - For manual grants and refunds
//!
//! Stripe webhooks are authenticated by their `Stripe-Signature` header.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Handlers are async for the router

pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
pub mod handlers;
pub mod routes;
pub mod state;
pub mod stripe;

pub use config::ServiceConfig;
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
pub use stripe::{StripeClient, StripeError};
