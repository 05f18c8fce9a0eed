//! Credit transaction types.
//!
//! Every balance mutation appends one `CreditTransaction`. Entries are never
//! rewritten; summing `credits` over an organization's log reproduces its
//! current total.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ParseEnumError;
use crate::{OrganizationId, Pool, TransactionId, UserId};

/// Default page size for transaction listings.
pub const DEFAULT_TRANSACTION_LIMIT: usize = 50;

/// Largest page size a caller may request.
pub const MAX_TRANSACTION_LIMIT: usize = 500;

/// An append-only ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditTransaction {
    /// Unique transaction ID (ULID for time-ordering).
    pub id: TransactionId,

    /// The organization whose balance changed.
    pub organization_id: OrganizationId,

    /// Acting user, `None` for system-triggered entries.
    pub user_id: Option<UserId>,

    /// Why the balance changed.
    pub transaction_type: TransactionType,

    /// Signed amount: negative for spends and expiries, positive for grants.
    pub credits: i64,

    /// Pool primarily affected.
    pub credit_type: Pool,

    /// Organization total before the change.
    pub balance_before: i64,

    /// Organization total after the change.
    pub balance_after: i64,

    /// Kind of entity that caused the change (`tool`, `payment`, ...).
    pub reference_type: Option<String>,

    /// Identifier of the causing entity.
    pub reference_id: Option<String>,

    /// Human-readable description.
    pub description: String,

    /// Additional structured context.
    pub metadata: serde_json::Value,

    /// When the entry was written.
    pub created_at: DateTime<Utc>,
}

impl CreditTransaction {
    /// Create an entry moving the total from `balance_before` by `credits`.
    #[must_use]
    pub fn new(
        organization_id: OrganizationId,
        transaction_type: TransactionType,
        credit_type: Pool,
        credits: i64,
        balance_before: i64,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            organization_id,
            user_id: None,
            transaction_type,
            credits,
            credit_type,
            balance_before,
            balance_after: balance_before.saturating_add(credits),
            reference_type: None,
            reference_id: None,
            description: description.into(),
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    /// Create a usage entry. The amount is always recorded as negative.
    #[must_use]
    pub fn usage(
        organization_id: OrganizationId,
        amount: i64,
        balance_before: i64,
        tool: &str,
    ) -> Self {
        Self::new(
            organization_id,
            TransactionType::Usage,
            Pool::Subscription,
            -amount.abs(),
            balance_before,
            format!("Credits used: {tool}"),
        )
        .with_reference("tool", tool)
    }

    /// Set the acting user.
    #[must_use]
    pub fn with_user(mut self, user_id: Option<UserId>) -> Self {
        self.user_id = user_id;
        self
    }

    /// Set the causing entity.
    #[must_use]
    pub fn with_reference(
        mut self,
        reference_type: impl Into<String>,
        reference_id: impl Into<String>,
    ) -> Self {
        self.reference_type = Some(reference_type.into());
        self.reference_id = Some(reference_id.into());
        self
    }

    /// Attach metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Type of credit transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Plan allocation for a billing cycle.
    SubscriptionGrant,
    /// Credit pack purchase.
    Purchase,
    /// Promotional credits.
    Bonus,
    /// Manual correction by an operator.
    AdminAdjustment,
    /// Credits spent by a billable tool.
    Usage,
    /// Credits returned to the organization.
    Refund,
    /// Subscription credits that lapsed at a cycle boundary.
    Expiry,
    /// Subscription credits carried into a new cycle.
    Rollover,
}

impl TransactionType {
    /// All variants, for parsing and filtering.
    pub const ALL: [TransactionType; 8] = [
        Self::SubscriptionGrant,
        Self::Purchase,
        Self::Bonus,
        Self::AdminAdjustment,
        Self::Usage,
        Self::Refund,
        Self::Expiry,
        Self::Rollover,
    ];

    /// Stable snake_case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SubscriptionGrant => "subscription_grant",
            Self::Purchase => "purchase",
            Self::Bonus => "bonus",
            Self::AdminAdjustment => "admin_adjustment",
            Self::Usage => "usage",
            Self::Refund => "refund",
            Self::Expiry => "expiry",
            Self::Rollover => "rollover",
        }
    }

    /// The type a plain grant to `pool` is recorded as.
    #[must_use]
    pub const fn for_grant(pool: Pool) -> Self {
        match pool {
            Pool::Subscription => Self::SubscriptionGrant,
            Pool::Purchased => Self::Purchase,
            Pool::Bonus => Self::Bonus,
        }
    }

    /// Whether entries of this type remove credits.
    #[must_use]
    pub const fn is_debit(&self) -> bool {
        matches!(self, Self::Usage | Self::Expiry)
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("transaction type", s))
    }
}

/// Filter and pagination for transaction listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionQuery {
    /// Maximum number of entries to return.
    pub limit: usize,
    /// Number of matching entries to skip (newest first).
    pub offset: usize,
    /// Only entries of this type.
    pub transaction_type: Option<TransactionType>,
    /// Only entries created at or after this instant.
    pub date_from: Option<DateTime<Utc>>,
    /// Only entries created at or before this instant.
    pub date_to: Option<DateTime<Utc>>,
}

impl TransactionQuery {
    /// Clamp the limit into `1..=MAX_TRANSACTION_LIMIT`.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.limit = self.limit.clamp(1, MAX_TRANSACTION_LIMIT);
        self
    }

    /// Whether a transaction passes the type and date filters.
    #[must_use]
    pub fn matches(&self, transaction: &CreditTransaction) -> bool {
        self.transaction_type
            .map_or(true, |t| t == transaction.transaction_type)
            && self.date_from.map_or(true, |from| transaction.created_at >= from)
            && self.date_to.map_or(true, |to| transaction.created_at <= to)
    }
}

impl Default for TransactionQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_TRANSACTION_LIMIT,
            offset: 0,
            transaction_type: None,
            date_from: None,
            date_to: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_transaction_is_negative() {
        let org = OrganizationId::generate();
        let tx = CreditTransaction::usage(org, 3, 10, "floor-plan-ai");

        assert_eq!(tx.credits, -3);
        assert_eq!(tx.balance_before, 10);
        assert_eq!(tx.balance_after, 7);
        assert_eq!(tx.transaction_type, TransactionType::Usage);
        assert_eq!(tx.credit_type, Pool::Subscription);
        assert_eq!(tx.reference_type.as_deref(), Some("tool"));
        assert_eq!(tx.reference_id.as_deref(), Some("floor-plan-ai"));
    }

    #[test]
    fn grant_types_follow_pool() {
        assert_eq!(
            TransactionType::for_grant(Pool::Subscription),
            TransactionType::SubscriptionGrant
        );
        assert_eq!(TransactionType::for_grant(Pool::Purchased), TransactionType::Purchase);
        assert_eq!(TransactionType::for_grant(Pool::Bonus), TransactionType::Bonus);
    }

    #[test]
    fn transaction_type_parsing() {
        for t in TransactionType::ALL {
            assert_eq!(t.as_str().parse::<TransactionType>().unwrap(), t);
        }
        assert!("withdrawal".parse::<TransactionType>().is_err());
        assert!(TransactionType::Expiry.is_debit());
        assert!(!TransactionType::Refund.is_debit());
    }

    #[test]
    fn query_filters_by_type_and_date() {
        let org = OrganizationId::generate();
        let tx = CreditTransaction::usage(org, 1, 5, "lease-summary");

        let mut query = TransactionQuery::default();
        assert!(query.matches(&tx));

        query.transaction_type = Some(TransactionType::Purchase);
        assert!(!query.matches(&tx));

        query.transaction_type = Some(TransactionType::Usage);
        query.date_from = Some(tx.created_at + chrono::Duration::seconds(1));
        assert!(!query.matches(&tx));

        query.date_from = None;
        query.date_to = Some(tx.created_at);
        assert!(query.matches(&tx));
    }

    #[test]
    fn query_limit_is_clamped() {
        let query = TransactionQuery {
            limit: 10_000,
            ..TransactionQuery::default()
        };
        assert_eq!(query.normalized().limit, MAX_TRANSACTION_LIMIT);

        let query = TransactionQuery {
            limit: 0,
            ..TransactionQuery::default()
        };
        assert_eq!(query.normalized().limit, 1);
    }
}
