//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Balance rows, keyed by `organization_id`.
    pub const BALANCES: &str = "balances";

    /// Ledger entries, keyed by `organization_id || transaction_id`.
    ///
    /// ULIDs sort by time, so a prefix scan yields an organization's log in order.
    pub const TRANSACTIONS: &str = "transactions";

    /// Purchases, keyed by `payment_reference` (the idempotency key).
    pub const PURCHASES: &str = "purchases";

    /// Index: purchases by organization, keyed by `organization_id || purchase_id`.
    /// Value is the payment reference.
    pub const PURCHASES_BY_ORG: &str = "purchases_by_org";

    /// Organizations, keyed by `organization_id`.
    pub const ORGANIZATIONS: &str = "organizations";

    /// Reporting usage rows, keyed by `organization_id || transaction_id`.
    pub const USAGE_RECORDS: &str = "usage_records";

    /// Invoices, keyed by `organization_id || invoice_id`.
    pub const INVOICES: &str = "invoices";

    /// Claimed idempotency keys, keyed by the key itself. Value is the claim time.
    pub const PROCESSED_EVENTS: &str = "processed_events";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::BALANCES,
        cf::TRANSACTIONS,
        cf::PURCHASES,
        cf::PURCHASES_BY_ORG,
        cf::ORGANIZATIONS,
        cf::USAGE_RECORDS,
        cf::INVOICES,
        cf::PROCESSED_EVENTS,
    ]
}
