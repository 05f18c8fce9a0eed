//! Stripe integration for credit pack purchases.
//!
//! Stripe handles:
//! - Credit purchases via Checkout
//! - Webhook delivery for payments, renewals and refunds

pub mod client;
pub mod types;
pub mod webhook;

pub use client::{CheckoutParams, StripeClient, StripeError};
pub use types::*;
pub use webhook::verify_signature;
