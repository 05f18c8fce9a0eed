//! Transactional storage layer for the credit ledger.
//!
//! The ledger needs three things from storage: point reads, an append-only
//! transaction log, and short read-modify-write transactions that hold an
//! exclusive lock on the rows they touch. [`Store`] covers the first two and
//! hands out [`StoreTxn`] handles for the third.
//!
//! # Transactions
//!
//! A `StoreTxn` buffers its writes until [`StoreTxn::commit`]. Dropping it
//! without committing rolls everything back and releases its locks, so an
//! early `?` return can never leave a half-applied mutation behind.
//!
//! # Backends
//!
//! - [`RocksStore`]: `RocksDB` `TransactionDB` with pessimistic locking
//!   (`rocksdb-backend` feature, enabled by default)
//! - [`MemoryStore`]: in-process tables with per-key locks, used by tests and
//!   local development
//!
//! # Example
//!
//! ```no_run
//! use credits_core::{BalanceRecord, OrganizationId};
//! use credits_store::{MemoryStore, Store};
//!
//! let store = MemoryStore::new();
//! let org = OrganizationId::generate();
//!
//! let mut txn = store.begin().unwrap();
//! if txn.lock_balance(&org).unwrap().is_none() {
//!     txn.insert_balance(&BalanceRecord::new(org, 500, None, None)).unwrap();
//! }
//! txn.commit().unwrap();
//!
//! assert_eq!(store.get_balance(&org).unwrap().unwrap().total(), 500);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod memory;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
pub mod schema;

pub use error::{Result, StoreError};
pub use memory::{FailPoint, MemoryStore};
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use std::time::Duration;

use credits_core::{
    BalanceRecord, CreditTransaction, Invoice, Organization, OrganizationId, PoolSplit, Purchase,
    TransactionQuery, UsageRecord,
};

/// Default bound on how long a transaction waits for a row lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Backend tuning shared by all store implementations.
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    /// Maximum wait for an exclusive row lock before `StoreError::LockTimeout`.
    pub lock_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (e.g., `RocksDB`, in-memory for testing).
pub trait Store: Send + Sync {
    /// Start a transaction.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the backend cannot serve writes.
    fn begin(&self) -> Result<Box<dyn StoreTxn + '_>>;

    // =========================================================================
    // Balance Reads
    // =========================================================================

    /// Read an organization's balance row without locking it.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_balance(&self, organization_id: &OrganizationId) -> Result<Option<BalanceRecord>>;

    // =========================================================================
    // Transaction Log
    // =========================================================================

    /// List ledger entries for an organization, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_transactions(
        &self,
        organization_id: &OrganizationId,
        query: &TransactionQuery,
    ) -> Result<Vec<CreditTransaction>>;

    // =========================================================================
    // Purchases
    // =========================================================================

    /// Get a purchase by its payment reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_purchase(&self, payment_reference: &str) -> Result<Option<Purchase>>;

    /// List an organization's purchases, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_purchases(&self, organization_id: &OrganizationId) -> Result<Vec<Purchase>>;

    // =========================================================================
    // Organizations
    // =========================================================================

    /// Insert or update an organization.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_organization(&self, organization: &Organization) -> Result<()>;

    /// Get an organization by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_organization(&self, organization_id: &OrganizationId) -> Result<Option<Organization>>;

    // =========================================================================
    // Reporting
    // =========================================================================

    /// Record a usage row for reporting.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_usage_record(&self, record: &UsageRecord) -> Result<()>;

    /// List usage rows for an organization, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_usage_records(
        &self,
        organization_id: &OrganizationId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<UsageRecord>>;

    /// Store an issued invoice.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_invoice(&self, invoice: &Invoice) -> Result<()>;

    /// List an organization's invoices, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_invoices(&self, organization_id: &OrganizationId) -> Result<Vec<Invoice>>;
}

/// A storage transaction with exclusive row locks.
///
/// Locks taken through `lock_*` and `claim_event` are held until the
/// transaction is committed or dropped. Reads inside the transaction observe
/// its own uncommitted writes.
pub trait StoreTxn {
    /// Read an organization's balance row and lock its key exclusively.
    ///
    /// The key is locked even when no row exists, so a caller may insert one
    /// without racing a concurrent initializer.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::LockTimeout` if the lock wait exceeds the timeout.
    fn lock_balance(&mut self, organization_id: &OrganizationId) -> Result<Option<BalanceRecord>>;

    /// Insert a balance row unless one already exists.
    ///
    /// Returns `false` without writing when a row is present.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn insert_balance(&mut self, record: &BalanceRecord) -> Result<bool>;

    /// Overwrite a balance row.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_balance(&mut self, record: &BalanceRecord) -> Result<()>;

    /// Conditionally subtract `split` from the pools.
    ///
    /// Re-reads the row and applies the decrement only if every pool still
    /// covers its share. Returns the updated row, or `None` if the row is
    /// missing or the guard failed (nothing is written in that case).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn debit_balance(
        &mut self,
        organization_id: &OrganizationId,
        split: &PoolSplit,
    ) -> Result<Option<BalanceRecord>>;

    /// Append an entry to the transaction log.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn append_transaction(&mut self, transaction: &CreditTransaction) -> Result<()>;

    /// Read a purchase by payment reference and lock the reference exclusively.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::LockTimeout` if the lock wait exceeds the timeout.
    fn lock_purchase(&mut self, payment_reference: &str) -> Result<Option<Purchase>>;

    /// Insert or update a purchase.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_purchase(&mut self, purchase: &Purchase) -> Result<()>;

    /// Claim an idempotency key.
    ///
    /// Returns `false` if the key was claimed by an earlier committed
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::LockTimeout` if the lock wait exceeds the timeout.
    fn claim_event(&mut self, key: &str) -> Result<bool>;

    /// Make all writes durable and release locks.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails; nothing is applied in that case.
    fn commit(self: Box<Self>) -> Result<()>;
}
