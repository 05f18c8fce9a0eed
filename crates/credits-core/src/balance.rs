//! Balance types.
//!
//! A `BalanceRecord` is the single mutable row per organization. It is wrapped
//! in the `Balance` sum type so that "no row yet" is an explicit state rather
//! than a set of zero defaults.

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::{BalanceOverflow, OrganizationId, Pool, PoolSplit};

/// Remaining percentage at or below which a balance is reported as `low`.
pub const LOW_BALANCE_PERCENT: f64 = 20.0;

/// Remaining percentage at or below which a balance is reported as `warning`.
pub const WARNING_BALANCE_PERCENT: f64 = 50.0;

/// Persisted credit balance for one organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRecord {
    /// Owning organization.
    pub organization_id: OrganizationId,

    /// Plan credits for the current cycle (including rollover).
    pub subscription_credits: i64,

    /// Credits bought through credit packs.
    pub purchased_credits: i64,

    /// Promotional, refund and adjustment credits.
    pub bonus_credits: i64,

    /// Start of the current billing cycle.
    pub cycle_start: DateTime<Utc>,

    /// End of the current billing cycle.
    pub cycle_end: DateTime<Utc>,

    /// When the subscription pool was last reset.
    pub last_refresh: Option<DateTime<Utc>>,

    /// Subscription credits carried over from the previous cycle.
    pub rollover_credits: i64,

    /// When the carried-over credits lapse.
    pub rollover_expires: Option<DateTime<Utc>>,

    /// When the row was created.
    pub created_at: DateTime<Utc>,

    /// When the row was last written.
    pub updated_at: DateTime<Utc>,
}

impl BalanceRecord {
    /// Create a fresh row holding only a subscription allocation.
    ///
    /// `cycle_start` defaults to now and `cycle_end` to one month after it.
    #[must_use]
    pub fn new(
        organization_id: OrganizationId,
        subscription_credits: i64,
        cycle_start: Option<DateTime<Utc>>,
        cycle_end: Option<DateTime<Utc>>,
    ) -> Self {
        let now = Utc::now();
        let cycle_start = cycle_start.unwrap_or(now);
        let cycle_end = cycle_end.unwrap_or_else(|| one_month_after(cycle_start));

        Self {
            organization_id,
            subscription_credits: subscription_credits.max(0),
            purchased_credits: 0,
            bonus_credits: 0,
            cycle_start,
            cycle_end,
            last_refresh: None,
            rollover_credits: 0,
            rollover_expires: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sum of all three pools.
    ///
    /// Saturates at `i64::MAX`; grants go through [`BalanceRecord::credit`],
    /// which keeps the exact sum in range.
    #[must_use]
    pub const fn total(&self) -> i64 {
        self.subscription_credits
            .saturating_add(self.purchased_credits)
            .saturating_add(self.bonus_credits)
    }

    /// Sum of all three pools, or `None` if it does not fit in an `i64`.
    #[must_use]
    pub const fn checked_total(&self) -> Option<i64> {
        match self.subscription_credits.checked_add(self.purchased_credits) {
            Some(sum) => sum.checked_add(self.bonus_credits),
            None => None,
        }
    }

    /// Current amount of a single pool.
    #[must_use]
    pub const fn pool(&self, pool: Pool) -> i64 {
        match pool {
            Pool::Subscription => self.subscription_credits,
            Pool::Purchased => self.purchased_credits,
            Pool::Bonus => self.bonus_credits,
        }
    }

    /// Add `amount` to a pool.
    ///
    /// # Errors
    ///
    /// Returns `BalanceOverflow`, leaving the record unchanged, if the pool or
    /// the total would no longer fit in an `i64`.
    pub fn credit(&mut self, pool: Pool, amount: i64) -> Result<(), BalanceOverflow> {
        let mut updated = self.clone();
        let slot = match pool {
            Pool::Subscription => &mut updated.subscription_credits,
            Pool::Purchased => &mut updated.purchased_credits,
            Pool::Bonus => &mut updated.bonus_credits,
        };
        *slot = slot.checked_add(amount).ok_or(BalanceOverflow)?;
        updated.checked_total().ok_or(BalanceOverflow)?;

        updated.updated_at = Utc::now();
        *self = updated;
        Ok(())
    }

    /// Replace the subscription pool for a new cycle.
    ///
    /// # Errors
    ///
    /// Returns `BalanceOverflow`, leaving the record unchanged, if the total
    /// would no longer fit in an `i64`.
    pub fn set_subscription(&mut self, credits: i64) -> Result<(), BalanceOverflow> {
        credits
            .checked_add(self.purchased_credits)
            .and_then(|sum| sum.checked_add(self.bonus_credits))
            .ok_or(BalanceOverflow)?;
        self.subscription_credits = credits;
        Ok(())
    }

    /// Whether every pool still covers its share of `split`.
    #[must_use]
    pub const fn covers(&self, split: &PoolSplit) -> bool {
        self.subscription_credits >= split.subscription
            && self.bonus_credits >= split.bonus
            && self.purchased_credits >= split.purchased
    }

    /// Subtract a deduction plan from the pools.
    pub fn debit(&mut self, split: &PoolSplit) {
        self.subscription_credits -= split.subscription;
        self.bonus_credits -= split.bonus;
        self.purchased_credits -= split.purchased;
        self.updated_at = Utc::now();
    }

    /// Whether all pools satisfy the non-negative invariant.
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        self.subscription_credits >= 0 && self.purchased_credits >= 0 && self.bonus_credits >= 0
    }
}

/// Balance state for an organization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Balance {
    /// No row has been written for the organization yet.
    Uninitialized,
    /// A persisted row.
    Active(BalanceRecord),
}

impl Balance {
    /// Total spendable credits (zero when uninitialized).
    #[must_use]
    pub const fn total(&self) -> i64 {
        match self {
            Self::Uninitialized => 0,
            Self::Active(record) => record.total(),
        }
    }

    /// The persisted row, if any.
    #[must_use]
    pub const fn record(&self) -> Option<&BalanceRecord> {
        match self {
            Self::Uninitialized => None,
            Self::Active(record) => Some(record),
        }
    }
}

impl From<Option<BalanceRecord>> for Balance {
    fn from(record: Option<BalanceRecord>) -> Self {
        record.map_or(Self::Uninitialized, Self::Active)
    }
}

/// Coarse health of a balance, for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceStatus {
    /// Nothing left to spend.
    Empty,
    /// 20% or less of the plan allocation remains.
    Low,
    /// 50% or less of the plan allocation remains.
    Warning,
    /// More than half remains.
    Healthy,
}

impl BalanceStatus {
    /// Derive the status from the total and the remaining percentage.
    #[must_use]
    pub fn derive(total: i64, percentage_remaining: f64) -> Self {
        if total <= 0 {
            Self::Empty
        } else if percentage_remaining <= LOW_BALANCE_PERCENT {
            Self::Low
        } else if percentage_remaining <= WARNING_BALANCE_PERCENT {
            Self::Warning
        } else {
            Self::Healthy
        }
    }
}

/// Point-in-time read model of an organization's balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceView {
    /// Owning organization.
    pub organization_id: OrganizationId,
    /// Sum of all pools.
    pub total: i64,
    /// Subscription pool.
    pub subscription: i64,
    /// Purchased pool.
    pub purchased: i64,
    /// Bonus pool.
    pub bonus: i64,
    /// Plan allocation per cycle.
    pub plan_limit: i64,
    /// Subscription credits consumed in the current cycle.
    pub used_this_cycle: i64,
    /// Start of the current cycle.
    pub cycle_start: Option<DateTime<Utc>>,
    /// End of the current cycle.
    pub cycle_end: Option<DateTime<Utc>>,
    /// Whole days until the next refresh.
    pub days_until_refresh: i64,
    /// Share of this cycle's subscription allocation already spent.
    pub percentage_used: f64,
    /// Share of the plan allocation still available across all pools.
    pub percentage_remaining: f64,
    /// Derived health.
    pub status: BalanceStatus,
}

impl BalanceView {
    /// A zero-valued view for organizations without a balance or a plan.
    #[must_use]
    pub fn empty(organization_id: OrganizationId) -> Self {
        Self {
            organization_id,
            total: 0,
            subscription: 0,
            purchased: 0,
            bonus: 0,
            plan_limit: 0,
            used_this_cycle: 0,
            cycle_start: None,
            cycle_end: None,
            days_until_refresh: 0,
            percentage_used: 0.0,
            percentage_remaining: 0.0,
            status: BalanceStatus::Empty,
        }
    }

    /// Build the view for a persisted row.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_record(record: &BalanceRecord, plan_limit: i64, now: DateTime<Utc>) -> Self {
        let total = record.total();
        let allocation = plan_limit.max(0).saturating_add(record.rollover_credits.max(0));
        let used_this_cycle = allocation.saturating_sub(record.subscription_credits).max(0);

        let percentage_used = if allocation > 0 {
            round_percent(used_this_cycle as f64 / allocation as f64 * 100.0)
        } else {
            0.0
        };

        let percentage_remaining = if plan_limit > 0 {
            round_percent((total.max(0) as f64 / plan_limit as f64 * 100.0).min(100.0))
        } else if total > 0 {
            100.0
        } else {
            0.0
        };

        let seconds_left = (record.cycle_end - now).num_seconds().max(0);
        let days_until_refresh = (seconds_left + 86_399) / 86_400;

        Self {
            organization_id: record.organization_id,
            total,
            subscription: record.subscription_credits,
            purchased: record.purchased_credits,
            bonus: record.bonus_credits,
            plan_limit,
            used_this_cycle,
            cycle_start: Some(record.cycle_start),
            cycle_end: Some(record.cycle_end),
            days_until_refresh,
            percentage_used,
            percentage_remaining,
            status: BalanceStatus::derive(total, percentage_remaining),
        }
    }
}

/// `start` plus one calendar month, clamped to the end of shorter months.
#[must_use]
pub fn one_month_after(start: DateTime<Utc>) -> DateTime<Utc> {
    start
        .checked_add_months(Months::new(1))
        .unwrap_or(start + chrono::Duration::days(30))
}

fn round_percent(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
