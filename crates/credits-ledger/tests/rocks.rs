//! Ledger behaviour on the `RocksDB` backend.

#![cfg(feature = "rocksdb-backend")]

use std::sync::{Arc, Barrier};
use std::thread;

use tempfile::TempDir;

use credits_core::{OrganizationId, TransactionQuery, MAX_TRANSACTION_LIMIT};
use credits_ledger::{CreditLedger, LedgerConfig, LedgerError, StaticPlans};
use credits_store::{RocksStore, Store};

fn rocks_ledger(org: OrganizationId, plan_credits: i64) -> (Arc<CreditLedger>, TempDir) {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let config = LedgerConfig::default();
    let store = RocksStore::open_with(dir.path(), config.store_options())
        .expect("Failed to open store");

    let ledger = CreditLedger::new(
        Arc::new(store),
        Arc::new(StaticPlans::new().with(org, plan_credits)),
        config,
    );
    (Arc::new(ledger), dir)
}

#[test]
fn concurrent_deductions_never_overspend() {
    let org = OrganizationId::generate();
    let (ledger, _dir) = rocks_ledger(org, 50);
    assert_eq!(ledger.get_balance(&org).total, 50);

    let workers = 12;
    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let ledger = Arc::clone(&ledger);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                ledger.deduct(&org, 5, "lease-summary", None)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 10);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, LedgerError::InsufficientCredits { .. })));

    let record = ledger.store().get_balance(&org).unwrap().unwrap();
    assert_eq!(record.total(), 0);

    let log_sum: i64 = ledger
        .get_transactions(
            &org,
            TransactionQuery {
                limit: MAX_TRANSACTION_LIMIT,
                ..TransactionQuery::default()
            },
        )
        .unwrap()
        .iter()
        .map(|tx| tx.credits)
        .sum();
    assert_eq!(log_sum, 0);
}

#[test]
fn purchase_is_idempotent_across_reopen() {
    let org = OrganizationId::generate();
    let dir = TempDir::new().expect("Failed to create temp directory");

    for _ in 0..2 {
        let store = RocksStore::open(dir.path()).expect("Failed to open store");
        let ledger = CreditLedger::new(
            Arc::new(store),
            Arc::new(StaticPlans::new()),
            LedgerConfig::default(),
        );
        ledger.complete_purchase(&org, 100, "cs_live_77").unwrap();
        assert_eq!(ledger.get_balance(&org).purchased, 100);
    }
}
