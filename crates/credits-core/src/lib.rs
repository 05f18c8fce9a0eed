//! Core types for the organization credit ledger.
//!
//! This crate provides the value types shared by the store, the ledger engine
//! and the HTTP service:
//!
//! - **Identifiers**: `OrganizationId`, `UserId`, `TransactionId`, `PurchaseId`, `InvoiceId`
//! - **Pools**: `Pool`, `PoolSplit`
//! - **Balances**: `Balance`, `BalanceRecord`, `BalanceView`, `BalanceStatus`
//! - **Transactions**: `CreditTransaction`, `TransactionType`, `TransactionQuery`
//! - **Purchases**: `Purchase`, `PurchaseStatus`, `CreditPack`
//! - **Organizations**: `Organization`, `Plan`, `OrganizationStatus`
//! - **Reporting**: `UsageRecord`, `Invoice`
//!
//! # Credit Unit
//!
//! Credits are whole units stored as `i64`. Grants are positive, spends are
//! negative in the transaction log; pool values are never negative.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod balance;
pub mod credits;
pub mod error;
pub mod ids;
pub mod invoice;
pub mod organization;
pub mod pool;
pub mod purchase;
pub mod usage;

pub use balance::{Balance, BalanceRecord, BalanceStatus, BalanceView};
pub use credits::{
    CreditTransaction, TransactionType, TransactionQuery, DEFAULT_TRANSACTION_LIMIT,
    MAX_TRANSACTION_LIMIT,
};
pub use error::{BalanceOverflow, ParseEnumError, TransitionError};
pub use ids::{IdError, InvoiceId, OrganizationId, PurchaseId, TransactionId, UserId};
pub use invoice::Invoice;
pub use organization::{
    Organization, OrganizationStatus, Plan, PROFESSIONAL_PLAN_CREDITS, STARTER_PLAN_CREDITS,
};
pub use pool::{Pool, PoolSplit};
pub use purchase::{default_credit_packs, CreditPack, Purchase, PurchaseStatus};
pub use usage::UsageRecord;
