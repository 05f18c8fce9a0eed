//! Post-commit ledger event consumer.
//!
//! The ledger publishes events after each committed deduction or purchase.
//! This task turns them into reporting rows: usage records for deductions,
//! invoices for purchases. A failure here is logged and never touches the
//! ledger itself.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use credits_core::Invoice;
use credits_ledger::LedgerEvent;
use credits_store::{Store, StoreError};

/// Spawn the consumer on the current runtime.
pub fn spawn_consumer(
    store: Arc<dyn Store>,
    events: mpsc::UnboundedReceiver<LedgerEvent>,
) -> JoinHandle<()> {
    tokio::spawn(run_consumer(store, events))
}

/// Consume events until every sender is dropped.
pub async fn run_consumer(store: Arc<dyn Store>, mut events: mpsc::UnboundedReceiver<LedgerEvent>) {
    tracing::debug!("Ledger event consumer started");

    while let Some(event) = events.recv().await {
        let kind = event.kind();
        let store = store.clone();

        match tokio::task::spawn_blocking(move || apply(store.as_ref(), event)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(event = kind, error = %e, "Failed to record ledger event");
            }
            Err(e) => {
                tracing::error!(event = kind, error = %e, "Ledger event task panicked");
            }
        }
    }

    tracing::debug!("Ledger event consumer stopped");
}

fn apply(store: &dyn Store, event: LedgerEvent) -> Result<(), StoreError> {
    match event {
        LedgerEvent::UsageRecorded(record) => store.put_usage_record(&record),
        LedgerEvent::PurchaseCompleted(purchase) => {
            let invoice = Invoice::for_purchase(&purchase);
            store.put_invoice(&invoice)?;
            tracing::info!(
                organization_id = %purchase.organization_id,
                invoice_number = %invoice.number,
                payment_reference = %purchase.payment_reference,
                "Invoice issued"
            );
            Ok(())
        }
    }
}
