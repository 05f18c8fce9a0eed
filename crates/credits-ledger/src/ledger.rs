//! The `CreditLedger` service object and its balance store operations.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use credits_core::{
    Balance, BalanceRecord, BalanceView, CreditTransaction, OrganizationId, Pool, TransactionQuery,
    TransactionType, UsageRecord,
};
use credits_store::{Store, StoreError, StoreTxn};

use crate::config::LedgerConfig;
use crate::error::{LedgerError, Result};
use crate::events::{EventSink, LedgerEvent, NoopSink};
use crate::plans::PlanLookup;

/// Entry point for every balance read and mutation.
///
/// The ledger owns no state of its own: balances, the transaction log and
/// purchases live in the [`Store`]. All writers take the organization's
/// balance lock inside a store transaction, so calls for the same
/// organization are serialized while different organizations proceed in
/// parallel.
///
/// Methods are synchronous. Async callers should run them on a blocking pool.
pub struct CreditLedger {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) plans: Arc<dyn PlanLookup>,
    pub(crate) events: Arc<dyn EventSink>,
    pub(crate) config: LedgerConfig,
}

impl CreditLedger {
    /// Create a ledger that discards post-commit events.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, plans: Arc<dyn PlanLookup>, config: LedgerConfig) -> Self {
        Self {
            store,
            plans,
            events: Arc::new(NoopSink),
            config,
        }
    }

    /// Publish post-commit events to `sink`.
    #[must_use]
    pub fn with_events(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &LedgerConfig {
        &self.config
    }

    // =========================================================================
    // Balance Store
    // =========================================================================

    /// Point-in-time view of an organization's balance.
    ///
    /// A missing row is seeded from the organization's plan allocation.
    /// Unknown organizations, organizations with neither a row nor a plan, and
    /// storage failures all yield a zero-valued view.
    pub fn get_balance(&self, organization_id: &OrganizationId) -> BalanceView {
        match self.load_balance_view(organization_id) {
            Ok(view) => view,
            Err(e) => {
                tracing::warn!(
                    organization_id = %organization_id,
                    error = %e,
                    "Balance read failed, reporting empty balance"
                );
                BalanceView::empty(*organization_id)
            }
        }
    }

    /// Whether the organization can currently afford `amount`.
    ///
    /// Always `false` for a non-positive amount.
    pub fn has_credits(&self, organization_id: &OrganizationId, amount: i64) -> bool {
        amount > 0 && self.get_balance(organization_id).total >= amount
    }

    /// Create the balance row if it does not exist yet.
    ///
    /// Returns `true` if this call created the row. A non-zero allocation is
    /// logged as a `subscription_grant` entry. When the store reports
    /// `Unavailable` the call is a silent no-op returning `false`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOrganization` or `InvalidAmount` for bad arguments, and
    /// a storage error for any failure other than unavailability.
    pub fn initialize_balance(
        &self,
        organization_id: &OrganizationId,
        subscription_credits: i64,
        cycle_start: Option<DateTime<Utc>>,
        cycle_end: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        if organization_id.is_nil() {
            return Err(LedgerError::InvalidOrganization);
        }
        if subscription_credits < 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let result = self.store.begin().and_then(|mut txn| {
            if txn.lock_balance(organization_id)?.is_some() {
                return Ok(false);
            }
            let created = seed_balance(
                txn.as_mut(),
                organization_id,
                subscription_credits,
                cycle_start,
                cycle_end,
            )?
            .is_some();
            txn.commit()?;
            Ok(created)
        });

        match result {
            Ok(created) => {
                if created {
                    tracing::info!(
                        organization_id = %organization_id,
                        subscription_credits,
                        "Balance initialized"
                    );
                }
                Ok(created)
            }
            Err(StoreError::Unavailable) => {
                tracing::warn!(
                    organization_id = %organization_id,
                    "Credit storage unavailable, skipping balance initialization"
                );
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Ledger entries for an organization, newest first.
    ///
    /// The limit is clamped to `1..=500`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOrganization` for a nil id, or a storage error.
    pub fn get_transactions(
        &self,
        organization_id: &OrganizationId,
        query: TransactionQuery,
    ) -> Result<Vec<CreditTransaction>> {
        if organization_id.is_nil() {
            return Err(LedgerError::InvalidOrganization);
        }
        Ok(self
            .store
            .list_transactions(organization_id, &query.normalized())?)
    }

    /// Reporting usage rows, newest first.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOrganization` for a nil id, or a storage error.
    pub fn get_usage_records(
        &self,
        organization_id: &OrganizationId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<UsageRecord>> {
        if organization_id.is_nil() {
            return Err(LedgerError::InvalidOrganization);
        }
        let limit = limit.clamp(1, credits_core::MAX_TRANSACTION_LIMIT);
        Ok(self
            .store
            .list_usage_records(organization_id, limit, offset)?)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn load_balance_view(&self, organization_id: &OrganizationId) -> Result<BalanceView> {
        if organization_id.is_nil() {
            return Ok(BalanceView::empty(*organization_id));
        }

        let plan_credits = self.plans.plan_credits_per_cycle(organization_id)?;

        let record = match Balance::from(self.store.get_balance(organization_id)?) {
            Balance::Active(record) => record,
            Balance::Uninitialized => {
                let Some(credits) = plan_credits else {
                    return Ok(BalanceView::empty(*organization_id));
                };
                self.initialize_balance(organization_id, credits, None, None)?;
                match self.store.get_balance(organization_id)? {
                    Some(record) => record,
                    None => return Ok(BalanceView::empty(*organization_id)),
                }
            }
        };

        Ok(BalanceView::from_record(
            &record,
            plan_credits.unwrap_or(0),
            Utc::now(),
        ))
    }

    /// Plan allocation used to seed a missing row. Lookup failures seed zero.
    pub(crate) fn seed_credits(&self, organization_id: &OrganizationId) -> i64 {
        match self.plans.plan_credits_per_cycle(organization_id) {
            Ok(credits) => credits.unwrap_or(0),
            Err(e) => {
                tracing::warn!(
                    organization_id = %organization_id,
                    error = %e,
                    "Plan lookup failed, seeding empty balance"
                );
                0
            }
        }
    }

    pub(crate) fn publish(&self, event: LedgerEvent) {
        let kind = event.kind();
        if let Err(e) = self.events.publish(event) {
            tracing::warn!(event = kind, error = %e, "Failed to publish ledger event");
        }
    }
}

/// Insert a fresh balance row inside `txn`, logging the initial allocation.
///
/// Returns `None` if a row already existed.
pub(crate) fn seed_balance(
    txn: &mut (dyn StoreTxn + '_),
    organization_id: &OrganizationId,
    subscription_credits: i64,
    cycle_start: Option<DateTime<Utc>>,
    cycle_end: Option<DateTime<Utc>>,
) -> std::result::Result<Option<BalanceRecord>, StoreError> {
    let record = BalanceRecord::new(
        *organization_id,
        subscription_credits,
        cycle_start,
        cycle_end,
    );

    if !txn.insert_balance(&record)? {
        return Ok(None);
    }

    if subscription_credits > 0 {
        let grant = CreditTransaction::new(
            *organization_id,
            TransactionType::SubscriptionGrant,
            Pool::Subscription,
            subscription_credits,
            0,
            "Initial subscription allocation",
        );
        txn.append_transaction(&grant)?;
    }

    Ok(Some(record))
}
