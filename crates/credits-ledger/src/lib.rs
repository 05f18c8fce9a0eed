//! Credit ledger engine.
//!
//! [`CreditLedger`] implements every balance-changing operation on top of a
//! transactional [`Store`](credits_store::Store):
//!
//! - **Balance store**: `get_balance`, `has_credits`, `initialize_balance`
//! - **Ledger writer**: `deduct`, `add`, `refund`
//! - **Cycle refresher**: `refresh_subscription`, `refresh_subscription_once`
//! - **Purchase reconciler**: `complete_purchase`, `refund_purchase`, `fail_purchase`
//! - **Queries**: `get_transactions`, `get_usage_records`
//!
//! # Guarantees
//!
//! - Pools never go negative and concurrent deductions for one organization
//!   never overspend it.
//! - Every mutation appends a log entry in the same transaction, so summing
//!   an organization's log reproduces its total.
//! - A payment reference is granted at most once.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use credits_core::OrganizationId;
//! use credits_ledger::{CreditLedger, LedgerConfig, StaticPlans};
//! use credits_store::MemoryStore;
//!
//! let org = OrganizationId::generate();
//! let ledger = CreditLedger::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(StaticPlans::new().with(org, 500)),
//!     LedgerConfig::default(),
//! );
//!
//! ledger.deduct(&org, 5, "lease-summary", None).unwrap();
//! assert_eq!(ledger.get_balance(&org).total, 495);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod deduct;
pub mod error;
pub mod events;
pub mod grant;
pub mod ledger;
pub mod plans;
pub mod purchase;
pub mod refresh;

pub use config::LedgerConfig;
pub use deduct::{DeductRequest, DeductionReceipt};
pub use error::{LedgerError, Result};
pub use events::{EventSink, LedgerEvent, NoopSink, SinkClosed};
pub use grant::AddRequest;
pub use ledger::CreditLedger;
pub use plans::{PlanLookup, StaticPlans, StorePlanLookup};
pub use purchase::{PurchaseOutcome, PurchaseRequest};
pub use refresh::{RefreshOutcome, RefreshSummary};
