//! In-memory storage implementation.
//!
//! `MemoryStore` keeps every table behind a single mutex and emulates row
//! locks with a set of held keys plus a condition variable. Writes made
//! inside a transaction are staged and only become visible on commit.
//!
//! Tests can inject failures with [`MemoryStore::fail_next`] and simulate an
//! outage with [`MemoryStore::set_unavailable`].

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use credits_core::{
    BalanceRecord, CreditTransaction, Invoice, Organization, OrganizationId, PoolSplit, Purchase,
    TransactionQuery, UsageRecord,
};

use crate::error::{Result, StoreError};
use crate::{Store, StoreOptions, StoreTxn};

/// Operations that can be made to fail once, for rollback tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    /// `StoreTxn::lock_balance`.
    LockBalance,
    /// `StoreTxn::put_balance`.
    PutBalance,
    /// `StoreTxn::debit_balance`.
    DebitBalance,
    /// `StoreTxn::append_transaction`.
    AppendTransaction,
    /// `StoreTxn::put_purchase`.
    PutPurchase,
    /// `StoreTxn::commit`.
    Commit,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LockKey {
    Balance(OrganizationId),
    Purchase(String),
    Event(String),
}

#[derive(Default)]
struct Tables {
    balances: HashMap<OrganizationId, BalanceRecord>,
    transactions: HashMap<OrganizationId, Vec<CreditTransaction>>,
    purchases: HashMap<String, Purchase>,
    organizations: HashMap<OrganizationId, Organization>,
    usage_records: HashMap<OrganizationId, Vec<UsageRecord>>,
    invoices: HashMap<OrganizationId, Vec<Invoice>>,
    events: HashSet<String>,
}

/// Exclusive per-key locks with a bounded wait.
#[derive(Default)]
struct KeyLocks {
    held: Mutex<HashSet<LockKey>>,
    released: Condvar,
}

impl KeyLocks {
    fn acquire(&self, key: &LockKey, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);

        while held.contains(key) {
            let now = Instant::now();
            if now >= deadline {
                tracing::debug!(?key, "Lock wait timed out");
                return Err(StoreError::LockTimeout);
            }

            let (guard, _) = self
                .released
                .wait_timeout(held, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            held = guard;
        }

        held.insert(key.clone());
        Ok(())
    }

    fn release(&self, keys: impl IntoIterator<Item = LockKey>) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        for key in keys {
            held.remove(&key);
        }
        drop(held);
        self.released.notify_all();
    }
}

/// In-memory storage backend.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    locks: KeyLocks,
    fail_points: Mutex<HashSet<FailPoint>>,
    unavailable: AtomicBool,
    options: StoreOptions,
}

impl MemoryStore {
    /// Create an empty store with default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store with the given options.
    #[must_use]
    pub fn with_options(options: StoreOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Make the next call at `point` fail with a database error.
    pub fn fail_next(&self, point: FailPoint) {
        self.fail_points
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(point);
    }

    /// Toggle a simulated outage. While set, every operation returns
    /// `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>> {
        self.ensure_available()?;
        Ok(self.tables.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn ensure_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        Ok(())
    }

    fn check(&self, point: FailPoint) -> Result<()> {
        self.ensure_available()?;
        let triggered = self
            .fail_points
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&point);

        if triggered {
            return Err(StoreError::Database(format!("injected failure at {point:?}")));
        }
        Ok(())
    }
}

impl Store for MemoryStore {
    fn begin(&self) -> Result<Box<dyn StoreTxn + '_>> {
        self.ensure_available()?;
        Ok(Box::new(MemoryTxn {
            store: self,
            held: HashSet::new(),
            staged: Staged::default(),
        }))
    }

    fn get_balance(&self, organization_id: &OrganizationId) -> Result<Option<BalanceRecord>> {
        Ok(self.tables()?.balances.get(organization_id).cloned())
    }

    fn list_transactions(
        &self,
        organization_id: &OrganizationId,
        query: &TransactionQuery,
    ) -> Result<Vec<CreditTransaction>> {
        let tables = self.tables()?;
        let Some(log) = tables.transactions.get(organization_id) else {
            return Ok(Vec::new());
        };

        Ok(log
            .iter()
            .rev()
            .filter(|tx| query.matches(tx))
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect())
    }

    fn get_purchase(&self, payment_reference: &str) -> Result<Option<Purchase>> {
        Ok(self.tables()?.purchases.get(payment_reference).cloned())
    }

    fn list_purchases(&self, organization_id: &OrganizationId) -> Result<Vec<Purchase>> {
        let tables = self.tables()?;
        let mut purchases: Vec<Purchase> = tables
            .purchases
            .values()
            .filter(|p| p.organization_id == *organization_id)
            .cloned()
            .collect();
        purchases.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(purchases)
    }

    fn put_organization(&self, organization: &Organization) -> Result<()> {
        self.tables()?
            .organizations
            .insert(organization.id, organization.clone());
        Ok(())
    }

    fn get_organization(&self, organization_id: &OrganizationId) -> Result<Option<Organization>> {
        Ok(self.tables()?.organizations.get(organization_id).cloned())
    }

    fn put_usage_record(&self, record: &UsageRecord) -> Result<()> {
        self.tables()?
            .usage_records
            .entry(record.organization_id)
            .or_default()
            .push(record.clone());
        Ok(())
    }

    fn list_usage_records(
        &self,
        organization_id: &OrganizationId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<UsageRecord>> {
        let tables = self.tables()?;
        Ok(tables
            .usage_records
            .get(organization_id)
            .map(|records| {
                records
                    .iter()
                    .rev()
                    .skip(offset)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn put_invoice(&self, invoice: &Invoice) -> Result<()> {
        self.tables()?
            .invoices
            .entry(invoice.organization_id)
            .or_default()
            .push(invoice.clone());
        Ok(())
    }

    fn list_invoices(&self, organization_id: &OrganizationId) -> Result<Vec<Invoice>> {
        let tables = self.tables()?;
        Ok(tables
            .invoices
            .get(organization_id)
            .map(|invoices| invoices.iter().rev().cloned().collect())
            .unwrap_or_default())
    }
}

#[derive(Default)]
struct Staged {
    balances: HashMap<OrganizationId, BalanceRecord>,
    transactions: Vec<CreditTransaction>,
    purchases: HashMap<String, Purchase>,
    events: HashSet<String>,
}

struct MemoryTxn<'a> {
    store: &'a MemoryStore,
    held: HashSet<LockKey>,
    staged: Staged,
}

impl MemoryTxn<'_> {
    fn lock(&mut self, key: LockKey) -> Result<()> {
        if self.held.contains(&key) {
            return Ok(());
        }
        self.store
            .locks
            .acquire(&key, self.store.options.lock_timeout)?;
        self.held.insert(key);
        Ok(())
    }

    fn read_balance(&self, organization_id: &OrganizationId) -> Result<Option<BalanceRecord>> {
        if let Some(record) = self.staged.balances.get(organization_id) {
            return Ok(Some(record.clone()));
        }
        self.store.get_balance(organization_id)
    }
}

impl StoreTxn for MemoryTxn<'_> {
    fn lock_balance(&mut self, organization_id: &OrganizationId) -> Result<Option<BalanceRecord>> {
        self.store.check(FailPoint::LockBalance)?;
        self.lock(LockKey::Balance(*organization_id))?;
        self.read_balance(organization_id)
    }

    fn insert_balance(&mut self, record: &BalanceRecord) -> Result<bool> {
        self.lock(LockKey::Balance(record.organization_id))?;
        if self.read_balance(&record.organization_id)?.is_some() {
            return Ok(false);
        }
        self.staged
            .balances
            .insert(record.organization_id, record.clone());
        Ok(true)
    }

    fn put_balance(&mut self, record: &BalanceRecord) -> Result<()> {
        self.store.check(FailPoint::PutBalance)?;
        self.lock(LockKey::Balance(record.organization_id))?;
        self.staged
            .balances
            .insert(record.organization_id, record.clone());
        Ok(())
    }

    fn debit_balance(
        &mut self,
        organization_id: &OrganizationId,
        split: &PoolSplit,
    ) -> Result<Option<BalanceRecord>> {
        self.store.check(FailPoint::DebitBalance)?;
        self.lock(LockKey::Balance(*organization_id))?;

        let Some(mut record) = self.read_balance(organization_id)? else {
            return Ok(None);
        };
        if !record.covers(split) {
            return Ok(None);
        }

        record.debit(split);
        self.staged
            .balances
            .insert(*organization_id, record.clone());
        Ok(Some(record))
    }

    fn append_transaction(&mut self, transaction: &CreditTransaction) -> Result<()> {
        self.store.check(FailPoint::AppendTransaction)?;
        self.staged.transactions.push(transaction.clone());
        Ok(())
    }

    fn lock_purchase(&mut self, payment_reference: &str) -> Result<Option<Purchase>> {
        self.lock(LockKey::Purchase(payment_reference.to_string()))?;
        if let Some(purchase) = self.staged.purchases.get(payment_reference) {
            return Ok(Some(purchase.clone()));
        }
        self.store.get_purchase(payment_reference)
    }

    fn put_purchase(&mut self, purchase: &Purchase) -> Result<()> {
        self.store.check(FailPoint::PutPurchase)?;
        self.lock(LockKey::Purchase(purchase.payment_reference.clone()))?;
        self.staged
            .purchases
            .insert(purchase.payment_reference.clone(), purchase.clone());
        Ok(())
    }

    fn claim_event(&mut self, key: &str) -> Result<bool> {
        self.lock(LockKey::Event(key.to_string()))?;
        if self.staged.events.contains(key) || self.store.tables()?.events.contains(key) {
            return Ok(false);
        }
        self.staged.events.insert(key.to_string());
        Ok(true)
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        self.store.check(FailPoint::Commit)?;

        let staged = std::mem::take(&mut self.staged);
        let mut tables = self.store.tables()?;

        tables.balances.extend(staged.balances);
        for transaction in staged.transactions {
            tables
                .transactions
                .entry(transaction.organization_id)
                .or_default()
                .push(transaction);
        }
        tables.purchases.extend(staged.purchases);
        tables.events.extend(staged.events);

        Ok(())
    }
}

impl Drop for MemoryTxn<'_> {
    fn drop(&mut self) {
        if !self.held.is_empty() {
            self.store.locks.release(self.held.drain());
        }
    }
}
