//! Credit deduction.
//!
//! A deduction runs in one store transaction holding the organization's
//! balance lock:
//!
//! 1. lock the balance row, seeding it from the plan if missing
//! 2. check the total against the requested amount
//! 3. split the amount across pools (subscription, then bonus, then purchased)
//! 4. apply a guarded decrement that re-checks every pool
//! 5. append a `usage` entry and commit
//!
//! Any failure before commit drops the transaction, which rolls it back.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use credits_core::{
    CreditTransaction, OrganizationId, PoolSplit, TransactionId, UsageRecord, UserId,
};

use crate::error::{LedgerError, Result};
use crate::events::LedgerEvent;
use crate::ledger::{seed_balance, CreditLedger};

/// A request to spend credits on a billable tool.
#[derive(Debug, Clone)]
pub struct DeductRequest {
    /// Charged organization.
    pub organization_id: OrganizationId,
    /// Credits to spend.
    pub amount: i64,
    /// Billable tool name.
    pub tool: String,
    /// Caller reference (request id, document id, ...).
    pub reference_id: Option<String>,
    /// Acting user.
    pub user_id: Option<UserId>,
    /// Tool-specific context stored with the ledger entry.
    pub metadata: serde_json::Value,
}

impl DeductRequest {
    /// Create a request without reference, user or metadata.
    #[must_use]
    pub fn new(organization_id: OrganizationId, amount: i64, tool: impl Into<String>) -> Self {
        Self {
            organization_id,
            amount,
            tool: tool.into(),
            reference_id: None,
            user_id: None,
            metadata: serde_json::Value::Null,
        }
    }

    /// Set the caller reference.
    #[must_use]
    pub fn with_reference(mut self, reference_id: Option<String>) -> Self {
        self.reference_id = reference_id;
        self
    }

    /// Set the acting user.
    #[must_use]
    pub fn with_user(mut self, user_id: Option<UserId>) -> Self {
        self.user_id = user_id;
        self
    }

    /// Attach tool-specific metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Outcome of a committed deduction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeductionReceipt {
    /// The `usage` ledger entry.
    pub transaction_id: TransactionId,
    /// Credits taken from each pool.
    pub split: PoolSplit,
    /// Total before the deduction.
    pub balance_before: i64,
    /// Total after the deduction.
    pub balance_after: i64,
}

impl CreditLedger {
    /// Spend `amount` credits for `tool`.
    ///
    /// # Errors
    ///
    /// See [`CreditLedger::deduct_with`].
    pub fn deduct(
        &self,
        organization_id: &OrganizationId,
        amount: i64,
        tool: &str,
        reference_id: Option<&str>,
    ) -> Result<DeductionReceipt> {
        self.deduct_with(
            DeductRequest::new(*organization_id, amount, tool)
                .with_reference(reference_id.map(str::to_string)),
        )
    }

    /// Spend credits atomically. Concurrent deductions for one organization
    /// are serialized by its balance lock and can never overspend it.
    ///
    /// # Errors
    ///
    /// - `InvalidOrganization` / `InvalidAmount` before any lock is taken
    /// - `BalanceInitializationFailed` if no row exists after seeding
    /// - `InsufficientCredits` with the required and available totals
    /// - `DeductionFailed` if the guarded decrement was refused
    /// - `LockTimeout` if the balance lock could not be acquired in time
    /// - `Deduction` for any other storage failure
    pub fn deduct_with(&self, request: DeductRequest) -> Result<DeductionReceipt> {
        if request.organization_id.is_nil() {
            return Err(LedgerError::InvalidOrganization);
        }
        if request.amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }

        match self.deduct_locked(&request) {
            Ok(receipt) => {
                tracing::info!(
                    organization_id = %request.organization_id,
                    tool = %request.tool,
                    credits = request.amount,
                    balance_after = receipt.balance_after,
                    transaction_id = %receipt.transaction_id,
                    "Credits deducted"
                );

                self.publish(LedgerEvent::UsageRecorded(UsageRecord {
                    transaction_id: receipt.transaction_id,
                    organization_id: request.organization_id,
                    user_id: request.user_id,
                    tool: request.tool,
                    credits_used: request.amount,
                    reference_id: request.reference_id,
                    created_at: Utc::now(),
                }));

                Ok(receipt)
            }
            Err(e @ LedgerError::InsufficientCredits { .. }) => {
                tracing::debug!(
                    organization_id = %request.organization_id,
                    tool = %request.tool,
                    error = %e,
                    "Deduction refused"
                );
                Err(e)
            }
            Err(e) => {
                tracing::error!(
                    organization_id = %request.organization_id,
                    tool = %request.tool,
                    credits = request.amount,
                    error = %e,
                    "Deduction rolled back"
                );
                Err(e)
            }
        }
    }

    fn deduct_locked(&self, request: &DeductRequest) -> Result<DeductionReceipt> {
        let organization_id = &request.organization_id;
        let amount = request.amount;

        let mut txn = self.store.begin().map_err(LedgerError::deduction)?;

        let record = match txn
            .lock_balance(organization_id)
            .map_err(LedgerError::deduction)?
        {
            Some(record) => record,
            None => {
                let credits = self.seed_credits(organization_id);
                seed_balance(txn.as_mut(), organization_id, credits, None, None)
                    .map_err(LedgerError::deduction)?;
                txn.lock_balance(organization_id)
                    .map_err(LedgerError::deduction)?
                    .ok_or(LedgerError::BalanceInitializationFailed)?
            }
        };

        let total = record.total();
        let split = PoolSplit::plan(
            amount,
            record.subscription_credits,
            record.bonus_credits,
            record.purchased_credits,
        )
        .ok_or(LedgerError::InsufficientCredits {
            required: amount,
            available: total,
        })?;

        let updated = txn
            .debit_balance(organization_id, &split)
            .map_err(LedgerError::deduction)?
            .ok_or(LedgerError::DeductionFailed)?;

        let entry = CreditTransaction::usage(*organization_id, amount, total, &request.tool)
            .with_user(request.user_id)
            .with_metadata(json!({
                "tool": request.tool,
                "reference_id": request.reference_id,
                "pools": split,
                "details": request.metadata,
            }));

        txn.append_transaction(&entry)
            .map_err(LedgerError::deduction)?;
        txn.commit().map_err(LedgerError::deduction)?;

        Ok(DeductionReceipt {
            transaction_id: entry.id,
            split,
            balance_before: total,
            balance_after: updated.total(),
        })
    }
}
