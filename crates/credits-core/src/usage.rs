//! Reporting usage records.
//!
//! A `UsageRecord` is written after a deduction commits, for usage reports.
//! It is derived data: the transaction log stays authoritative.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{OrganizationId, TransactionId, UserId};

/// One billable tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Ledger entry that paid for the invocation.
    pub transaction_id: TransactionId,

    /// Charged organization.
    pub organization_id: OrganizationId,

    /// Acting user, if any.
    pub user_id: Option<UserId>,

    /// Billable tool name.
    pub tool: String,

    /// Credits spent.
    pub credits_used: i64,

    /// Caller-supplied reference (request id, document id, ...).
    pub reference_id: Option<String>,

    /// When the deduction committed.
    pub created_at: DateTime<Utc>,
}
