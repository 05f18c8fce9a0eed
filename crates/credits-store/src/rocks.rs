//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait
//! on top of a pessimistic `TransactionDB`: `lock_*` calls map to
//! `get_for_update_cf` with an exclusive lock, and the lock wait is bounded by
//! `StoreOptions::lock_timeout`.

use std::path::Path;
use std::sync::Arc;

use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, Direction, ErrorKind, IteratorMode, MultiThreaded,
    Options, Transaction, TransactionDB, TransactionDBOptions, TransactionOptions, WriteOptions,
};

use credits_core::{
    BalanceRecord, CreditTransaction, Invoice, Organization, OrganizationId, PoolSplit, Purchase,
    TransactionQuery, UsageRecord,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::{Store, StoreOptions, StoreTxn};

type Db = TransactionDB<MultiThreaded>;

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<Db>,
    options: StoreOptions,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path with default options.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, StoreOptions::default())
    }

    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open_with<P: AsRef<Path>>(path: P, options: StoreOptions) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let mut txn_db_opts = TransactionDBOptions::default();
        txn_db_opts.set_txn_lock_timeout(lock_timeout_millis(&options));

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = Db::open_cf_descriptors(&opts, &txn_db_opts, path, cf_descriptors)
            .map_err(db_error)?;

        Ok(Self {
            db: Arc::new(db),
            options,
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        cf_handle(&self.db, name)
    }

    fn get<T: serde::de::DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(db_error)?
            .map(|data| deserialize(&data))
            .transpose()
    }

    fn put<T: serde::Serialize>(&self, cf_name: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        self.db
            .put_cf(&cf, key, serialize(value)?)
            .map_err(db_error)
    }

    /// Visit an organization's scoped rows newest first until `visit` returns `false`.
    fn scan_newest_first<F>(
        &self,
        cf_name: &str,
        organization_id: &OrganizationId,
        mut visit: F,
    ) -> Result<()>
    where
        F: FnMut(&[u8]) -> Result<bool>,
    {
        let cf = self.cf(cf_name)?;
        let prefix = keys::organization_prefix(organization_id);
        let start = keys::scoped_key(organization_id, [0xFF; 16]);

        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&start, Direction::Reverse));

        for item in iter {
            let (key, value) = item.map_err(db_error)?;

            if !key.starts_with(&prefix) {
                break;
            }

            if !visit(&value)? {
                break;
            }
        }

        Ok(())
    }

    /// Decode scoped rows newest first, applying a filter and pagination.
    fn page<T, F>(
        &self,
        cf_name: &str,
        organization_id: &OrganizationId,
        limit: usize,
        offset: usize,
        filter: F,
    ) -> Result<Vec<T>>
    where
        T: serde::de::DeserializeOwned,
        F: Fn(&T) -> bool,
    {
        let mut items = Vec::new();
        let mut skipped = 0;

        self.scan_newest_first(cf_name, organization_id, |value| {
            let item: T = deserialize(value)?;
            if !filter(&item) {
                return Ok(true);
            }
            if skipped < offset {
                skipped += 1;
                return Ok(true);
            }
            items.push(item);
            Ok(items.len() < limit)
        })?;

        Ok(items)
    }
}

impl Store for RocksStore {
    fn begin(&self) -> Result<Box<dyn StoreTxn + '_>> {
        let mut txn_opts = TransactionOptions::default();
        txn_opts.set_lock_timeout(lock_timeout_millis(&self.options));
        txn_opts.set_deadlock_detect(true);

        let txn = self.db.transaction_opt(&WriteOptions::default(), &txn_opts);

        Ok(Box::new(RocksTxn { db: &self.db, txn }))
    }

    // =========================================================================
    // Balance Reads
    // =========================================================================

    fn get_balance(&self, organization_id: &OrganizationId) -> Result<Option<BalanceRecord>> {
        self.get(cf::BALANCES, &keys::organization_key(organization_id))
    }

    // =========================================================================
    // Transaction Log
    // =========================================================================

    fn list_transactions(
        &self,
        organization_id: &OrganizationId,
        query: &TransactionQuery,
    ) -> Result<Vec<CreditTransaction>> {
        self.page(
            cf::TRANSACTIONS,
            organization_id,
            query.limit,
            query.offset,
            |tx: &CreditTransaction| query.matches(tx),
        )
    }

    // =========================================================================
    // Purchases
    // =========================================================================

    fn get_purchase(&self, payment_reference: &str) -> Result<Option<Purchase>> {
        self.get(cf::PURCHASES, &keys::purchase_key(payment_reference))
    }

    fn list_purchases(&self, organization_id: &OrganizationId) -> Result<Vec<Purchase>> {
        let mut references: Vec<String> = Vec::new();
        self.scan_newest_first(cf::PURCHASES_BY_ORG, organization_id, |value| {
            references.push(String::from_utf8_lossy(value).into_owned());
            Ok(true)
        })?;

        let mut purchases = Vec::with_capacity(references.len());
        for reference in references {
            if let Some(purchase) = self.get_purchase(&reference)? {
                purchases.push(purchase);
            }
        }
        Ok(purchases)
    }

    // =========================================================================
    // Organizations
    // =========================================================================

    fn put_organization(&self, organization: &Organization) -> Result<()> {
        self.put(
            cf::ORGANIZATIONS,
            &keys::organization_key(&organization.id),
            organization,
        )
    }

    fn get_organization(&self, organization_id: &OrganizationId) -> Result<Option<Organization>> {
        self.get(cf::ORGANIZATIONS, &keys::organization_key(organization_id))
    }

    // =========================================================================
    // Reporting
    // =========================================================================

    fn put_usage_record(&self, record: &UsageRecord) -> Result<()> {
        let key = keys::scoped_key(&record.organization_id, record.transaction_id.to_bytes());
        self.put(cf::USAGE_RECORDS, &key, record)
    }

    fn list_usage_records(
        &self,
        organization_id: &OrganizationId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<UsageRecord>> {
        self.page(cf::USAGE_RECORDS, organization_id, limit, offset, |_| true)
    }

    fn put_invoice(&self, invoice: &Invoice) -> Result<()> {
        let key = keys::scoped_key(&invoice.organization_id, invoice.id.to_bytes());
        self.put(cf::INVOICES, &key, invoice)
    }

    fn list_invoices(&self, organization_id: &OrganizationId) -> Result<Vec<Invoice>> {
        self.page(cf::INVOICES, organization_id, usize::MAX, 0, |_| true)
    }
}

/// A pessimistic `RocksDB` transaction. Dropping it without commit rolls back.
struct RocksTxn<'a> {
    db: &'a Db,
    txn: Transaction<'a, Db>,
}

impl<'a> RocksTxn<'a> {
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'a>>> {
        cf_handle(self.db, name)
    }

    fn get_locked<T: serde::de::DeserializeOwned>(
        &self,
        cf_name: &str,
        key: &[u8],
    ) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.txn
            .get_for_update_cf(&cf, key, true)
            .map_err(db_error)?
            .map(|data| deserialize(&data))
            .transpose()
    }

    fn put<T: serde::Serialize>(&self, cf_name: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        self.txn
            .put_cf(&cf, key, serialize(value)?)
            .map_err(db_error)
    }
}

impl StoreTxn for RocksTxn<'_> {
    fn lock_balance(&mut self, organization_id: &OrganizationId) -> Result<Option<BalanceRecord>> {
        self.get_locked(cf::BALANCES, &keys::organization_key(organization_id))
    }

    fn insert_balance(&mut self, record: &BalanceRecord) -> Result<bool> {
        let key = keys::organization_key(&record.organization_id);
        if self.get_locked::<BalanceRecord>(cf::BALANCES, &key)?.is_some() {
            return Ok(false);
        }
        self.put(cf::BALANCES, &key, record)?;
        Ok(true)
    }

    fn put_balance(&mut self, record: &BalanceRecord) -> Result<()> {
        self.put(
            cf::BALANCES,
            &keys::organization_key(&record.organization_id),
            record,
        )
    }

    fn debit_balance(
        &mut self,
        organization_id: &OrganizationId,
        split: &PoolSplit,
    ) -> Result<Option<BalanceRecord>> {
        let key = keys::organization_key(organization_id);
        let Some(mut record) = self.get_locked::<BalanceRecord>(cf::BALANCES, &key)? else {
            return Ok(None);
        };

        if !record.covers(split) {
            return Ok(None);
        }

        record.debit(split);
        self.put(cf::BALANCES, &key, &record)?;
        Ok(Some(record))
    }

    fn append_transaction(&mut self, transaction: &CreditTransaction) -> Result<()> {
        let key = keys::scoped_key(&transaction.organization_id, transaction.id.to_bytes());
        self.put(cf::TRANSACTIONS, &key, transaction)
    }

    fn lock_purchase(&mut self, payment_reference: &str) -> Result<Option<Purchase>> {
        self.get_locked(cf::PURCHASES, &keys::purchase_key(payment_reference))
    }

    fn put_purchase(&mut self, purchase: &Purchase) -> Result<()> {
        self.put(
            cf::PURCHASES,
            &keys::purchase_key(&purchase.payment_reference),
            purchase,
        )?;

        let cf_by_org = self.cf(cf::PURCHASES_BY_ORG)?;
        let index_key = keys::scoped_key(&purchase.organization_id, purchase.id.to_bytes());
        self.txn
            .put_cf(&cf_by_org, index_key, purchase.payment_reference.as_bytes())
            .map_err(db_error)
    }

    fn claim_event(&mut self, key: &str) -> Result<bool> {
        let key = keys::event_key(key);
        if self
            .get_locked::<chrono::DateTime<chrono::Utc>>(cf::PROCESSED_EVENTS, &key)?
            .is_some()
        {
            return Ok(false);
        }
        self.put(cf::PROCESSED_EVENTS, &key, &chrono::Utc::now())?;
        Ok(true)
    }

    fn commit(self: Box<Self>) -> Result<()> {
        self.txn.commit().map_err(db_error)
    }
}

fn cf_handle<'a>(db: &'a Db, name: &str) -> Result<Arc<BoundColumnFamily<'a>>> {
    db.cf_handle(name).ok_or_else(|| {
        tracing::error!(column_family = %name, "Column family not found");
        StoreError::Unavailable
    })
}

/// Serialize a value using CBOR.
fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

/// Deserialize a value from CBOR.
fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
    ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn db_error(e: rocksdb::Error) -> StoreError {
    match e.kind() {
        ErrorKind::TimedOut => StoreError::LockTimeout,
        ErrorKind::Busy | ErrorKind::TryAgain => StoreError::Conflict(e.to_string()),
        _ => StoreError::Database(e.to_string()),
    }
}

fn lock_timeout_millis(options: &StoreOptions) -> i64 {
    i64::try_from(options.lock_timeout.as_millis()).unwrap_or(i64::MAX)
}
