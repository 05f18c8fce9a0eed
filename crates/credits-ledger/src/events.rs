//! Post-commit ledger events.
//!
//! Side effects that are not part of the ledger's correctness contract
//! (reporting rows, invoices) are published after the store transaction
//! commits. A failed publish is logged and never undoes the committed change.

use credits_core::{Purchase, UsageRecord};
use tokio::sync::mpsc;

/// Something that happened in the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerEvent {
    /// A deduction committed.
    UsageRecorded(UsageRecord),
    /// A purchase was granted.
    PurchaseCompleted(Purchase),
}

impl LedgerEvent {
    /// Short name for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UsageRecorded(_) => "usage_recorded",
            Self::PurchaseCompleted(_) => "purchase_completed",
        }
    }
}

/// The receiving side has gone away.
#[derive(Debug, thiserror::Error)]
#[error("event sink closed")]
pub struct SinkClosed;

/// Destination for post-commit events.
pub trait EventSink: Send + Sync {
    /// Hand an event to the consumer without blocking.
    ///
    /// # Errors
    ///
    /// Returns `SinkClosed` if the consumer is gone.
    fn publish(&self, event: LedgerEvent) -> Result<(), SinkClosed>;
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn publish(&self, _event: LedgerEvent) -> Result<(), SinkClosed> {
        Ok(())
    }
}

impl EventSink for mpsc::UnboundedSender<LedgerEvent> {
    fn publish(&self, event: LedgerEvent) -> Result<(), SinkClosed> {
        self.send(event).map_err(|_| SinkClosed)
    }
}
