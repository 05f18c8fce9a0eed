//! Shared fixtures for ledger integration tests.

#![allow(dead_code)] // Each test file uses a different subset

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use credits_core::{OrganizationId, TransactionQuery, MAX_TRANSACTION_LIMIT};
use credits_ledger::{CreditLedger, LedgerConfig, LedgerEvent, StaticPlans};
use credits_store::MemoryStore;

/// A ledger over a fresh in-memory store.
pub struct TestLedger {
    /// The ledger under test.
    pub ledger: Arc<CreditLedger>,
    /// Direct handle on the store, for fault injection.
    pub store: Arc<MemoryStore>,
    /// An organization on a plan.
    pub org: OrganizationId,
    /// Post-commit events.
    pub events: mpsc::UnboundedReceiver<LedgerEvent>,
}

impl TestLedger {
    /// Ledger whose organization has `plan_credits` per cycle.
    pub fn with_plan(plan_credits: i64) -> Self {
        Self::with_config(plan_credits, LedgerConfig::default())
    }

    /// Ledger with a custom configuration.
    pub fn with_config(plan_credits: i64, config: LedgerConfig) -> Self {
        let org = OrganizationId::generate();
        let store = Arc::new(MemoryStore::with_options(config.store_options()));
        let (tx, events) = mpsc::unbounded_channel();

        let ledger = CreditLedger::new(
            store.clone(),
            Arc::new(StaticPlans::new().with(org, plan_credits)),
            config,
        )
        .with_events(Arc::new(tx));

        Self {
            ledger: Arc::new(ledger),
            store,
            org,
            events,
        }
    }

    /// Ledger with a short lock timeout.
    pub fn with_lock_timeout(plan_credits: i64, timeout: Duration) -> Self {
        Self::with_config(
            plan_credits,
            LedgerConfig {
                lock_timeout: timeout,
                ..LedgerConfig::default()
            },
        )
    }

    /// Sum of `credits` over the organization's whole log.
    pub fn log_sum(&self, org: &OrganizationId) -> i64 {
        self.ledger
            .get_transactions(
                org,
                TransactionQuery {
                    limit: MAX_TRANSACTION_LIMIT,
                    ..TransactionQuery::default()
                },
            )
            .unwrap()
            .iter()
            .map(|tx| tx.credits)
            .sum()
    }

    /// Drain pending events.
    pub fn drain_events(&mut self) -> Vec<LedgerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}
