//! Billing cycle refresh.
//!
//! At a cycle boundary the subscription pool is replaced by the new plan
//! allocation plus an optional, capped rollover. The replaced credits are
//! logged as an `expiry` entry so the transaction log keeps summing to the
//! balance total.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use credits_core::balance::one_month_after;
use credits_core::{BalanceRecord, CreditTransaction, OrganizationId, Pool, TransactionType};
use credits_store::StoreTxn;

use crate::error::{LedgerError, Result};
use crate::ledger::CreditLedger;

/// What a refresh changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshSummary {
    /// Subscription credits removed from the old cycle.
    pub expired: i64,
    /// Subscription credits carried into the new cycle.
    pub rollover: i64,
    /// Plan credits granted for the new cycle.
    pub granted: i64,
    /// Subscription pool after the refresh.
    pub subscription_credits: i64,
    /// Organization total after the refresh.
    pub total: i64,
    /// End of the new cycle.
    pub cycle_end: DateTime<Utc>,
}

/// Result of an idempotent refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The refresh ran.
    Applied(RefreshSummary),
    /// The event key was claimed by an earlier refresh; nothing changed.
    AlreadyApplied,
}

impl CreditLedger {
    /// Start a new cycle with `plan_credits` subscription credits.
    ///
    /// Does not de-duplicate: calling it twice for one renewal grants twice.
    /// Use [`CreditLedger::refresh_subscription_once`] for event-driven
    /// callers.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOrganization`, `InvalidAmount` for negative plan
    /// credits, or a storage error.
    pub fn refresh_subscription(
        &self,
        organization_id: &OrganizationId,
        plan_credits: i64,
        cycle_end: Option<DateTime<Utc>>,
    ) -> Result<RefreshSummary> {
        validate(organization_id, plan_credits)?;

        let mut txn = self.store.begin()?;
        let summary = self.refresh_in(txn.as_mut(), organization_id, plan_credits, cycle_end)?;
        txn.commit()?;

        log_refresh(organization_id, &summary);
        Ok(summary)
    }

    /// Start a new cycle unless `event_key` was already used.
    ///
    /// The key is claimed in the same transaction as the refresh, so
    /// concurrent deliveries of one renewal event grant exactly once.
    ///
    /// # Errors
    ///
    /// Same as [`CreditLedger::refresh_subscription`], plus
    /// `InvalidParameters` for an empty key.
    pub fn refresh_subscription_once(
        &self,
        organization_id: &OrganizationId,
        plan_credits: i64,
        cycle_end: Option<DateTime<Utc>>,
        event_key: &str,
    ) -> Result<RefreshOutcome> {
        validate(organization_id, plan_credits)?;
        if event_key.trim().is_empty() {
            return Err(LedgerError::InvalidParameters(
                "event key is required".into(),
            ));
        }

        let mut txn = self.store.begin()?;
        if !txn.claim_event(&format!("refresh:{event_key}"))? {
            tracing::info!(
                organization_id = %organization_id,
                event_key,
                "Refresh already applied for event"
            );
            return Ok(RefreshOutcome::AlreadyApplied);
        }

        let summary = self.refresh_in(txn.as_mut(), organization_id, plan_credits, cycle_end)?;
        txn.commit()?;

        log_refresh(organization_id, &summary);
        Ok(RefreshOutcome::Applied(summary))
    }

    fn refresh_in(
        &self,
        txn: &mut (dyn StoreTxn + '_),
        organization_id: &OrganizationId,
        plan_credits: i64,
        cycle_end: Option<DateTime<Utc>>,
    ) -> Result<RefreshSummary> {
        let now = Utc::now();
        let cycle_end = cycle_end.unwrap_or_else(|| one_month_after(now));

        let Some(mut record) = txn.lock_balance(organization_id)? else {
            let mut record =
                BalanceRecord::new(*organization_id, plan_credits, Some(now), Some(cycle_end));
            record.last_refresh = Some(now);
            txn.insert_balance(&record)?;

            if plan_credits > 0 {
                txn.append_transaction(&CreditTransaction::new(
                    *organization_id,
                    TransactionType::SubscriptionGrant,
                    Pool::Subscription,
                    plan_credits,
                    0,
                    "Subscription credits for new cycle",
                ))?;
            }

            return Ok(RefreshSummary {
                expired: 0,
                rollover: 0,
                granted: plan_credits,
                subscription_credits: record.subscription_credits,
                total: record.total(),
                cycle_end,
            });
        };

        let unused = record.subscription_credits;
        let rollover = self.config.rollover_for(unused);
        let mut running = record.total();
        let subscription_credits = plan_credits
            .checked_add(rollover)
            .ok_or(LedgerError::BalanceOverflow)?;
        record.set_subscription(subscription_credits)?;

        if unused > 0 {
            let expiry = CreditTransaction::new(
                *organization_id,
                TransactionType::Expiry,
                Pool::Subscription,
                -unused,
                running,
                "Subscription credits expired at cycle end",
            );
            running = expiry.balance_after;
            txn.append_transaction(&expiry)?;
        }

        if rollover > 0 {
            let carried = CreditTransaction::new(
                *organization_id,
                TransactionType::Rollover,
                Pool::Subscription,
                rollover,
                running,
                "Unused subscription credits rolled over",
            );
            running = carried.balance_after;
            txn.append_transaction(&carried)?;
        }

        if plan_credits > 0 {
            txn.append_transaction(&CreditTransaction::new(
                *organization_id,
                TransactionType::SubscriptionGrant,
                Pool::Subscription,
                plan_credits,
                running,
                "Subscription credits for new cycle",
            ))?;
        }

        record.cycle_start = now;
        record.cycle_end = cycle_end;
        record.last_refresh = Some(now);
        record.rollover_credits = rollover;
        record.rollover_expires = (rollover > 0).then_some(cycle_end);
        record.updated_at = now;
        txn.put_balance(&record)?;

        Ok(RefreshSummary {
            expired: unused.max(0),
            rollover,
            granted: plan_credits,
            subscription_credits: record.subscription_credits,
            total: record.total(),
            cycle_end,
        })
    }
}

fn validate(organization_id: &OrganizationId, plan_credits: i64) -> Result<()> {
    if organization_id.is_nil() {
        return Err(LedgerError::InvalidOrganization);
    }
    if plan_credits < 0 {
        return Err(LedgerError::InvalidAmount);
    }
    Ok(())
}

fn log_refresh(organization_id: &OrganizationId, summary: &RefreshSummary) {
    tracing::info!(
        organization_id = %organization_id,
        expired = summary.expired,
        rollover = summary.rollover,
        granted = summary.granted,
        cycle_end = %summary.cycle_end,
        "Subscription refreshed"
    );
}
