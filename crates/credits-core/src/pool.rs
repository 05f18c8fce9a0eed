//! Credit pools.
//!
//! An organization's spendable credit is split across three pools that are
//! replenished independently. Spending drains them in a fixed order, shortest
//! lived first.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseEnumError;

/// One of the three independently tracked credit balances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pool {
    /// Plan allocation, reset every billing cycle.
    Subscription,
    /// Credits bought through a credit pack. Never expire.
    Purchased,
    /// Promotional grants, refunds and admin adjustments.
    #[default]
    Bonus,
}

impl Pool {
    /// Order in which a deduction drains the pools.
    pub const SPEND_ORDER: [Pool; 3] = [Pool::Subscription, Pool::Bonus, Pool::Purchased];

    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Subscription => "subscription",
            Self::Purchased => "purchased",
            Self::Bonus => "bonus",
        }
    }
}

impl fmt::Display for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Pool {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subscription" => Ok(Self::Subscription),
            "purchased" => Ok(Self::Purchased),
            "bonus" => Ok(Self::Bonus),
            other => Err(ParseEnumError::new("pool", other)),
        }
    }
}

/// Per-pool credit amounts, used for deduction plans.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSplit {
    /// Amount from the subscription pool.
    pub subscription: i64,
    /// Amount from the bonus pool.
    pub bonus: i64,
    /// Amount from the purchased pool.
    pub purchased: i64,
}

impl PoolSplit {
    /// Split `amount` across the available pool amounts in spend order.
    ///
    /// Returns `None` when the pools together hold less than `amount`.
    #[must_use]
    pub fn plan(amount: i64, subscription: i64, bonus: i64, purchased: i64) -> Option<Self> {
        let available = subscription
            .max(0)
            .saturating_add(bonus.max(0))
            .saturating_add(purchased.max(0));
        if available < amount {
            return None;
        }

        let from_subscription = amount.min(subscription.max(0));
        let remaining = amount - from_subscription;
        let from_bonus = remaining.min(bonus.max(0));
        let from_purchased = remaining - from_bonus;

        Some(Self {
            subscription: from_subscription,
            bonus: from_bonus,
            purchased: from_purchased,
        })
    }

    /// Amount assigned to a single pool.
    #[must_use]
    pub const fn get(&self, pool: Pool) -> i64 {
        match pool {
            Pool::Subscription => self.subscription,
            Pool::Bonus => self.bonus,
            Pool::Purchased => self.purchased,
        }
    }

    /// Sum across all pools.
    #[must_use]
    pub const fn total(&self) -> i64 {
        self.subscription
            .saturating_add(self.bonus)
            .saturating_add(self.purchased)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_drains_before_bonus_and_purchased() {
        let split = PoolSplit::plan(4, 2, 3, 10).unwrap();
        assert_eq!(
            split,
            PoolSplit {
                subscription: 2,
                bonus: 2,
                purchased: 0
            }
        );
    }

    #[test]
    fn purchased_is_touched_last() {
        let split = PoolSplit::plan(12, 2, 3, 10).unwrap();
        assert_eq!(split.subscription, 2);
        assert_eq!(split.bonus, 3);
        assert_eq!(split.purchased, 7);
        assert_eq!(split.total(), 12);
    }

    #[test]
    fn insufficient_pools_yield_no_plan() {
        assert!(PoolSplit::plan(16, 2, 3, 10).is_none());
        assert!(PoolSplit::plan(15, 2, 3, 10).is_some());
        let split = PoolSplit::plan(i64::MAX, i64::MAX, i64::MAX, i64::MAX).unwrap();
        assert_eq!(split.subscription, i64::MAX);
        assert_eq!(split.bonus, 0);
    }

    #[test]
    fn pool_parsing() {
        assert_eq!("purchased".parse::<Pool>().unwrap(), Pool::Purchased);
        assert!("credits".parse::<Pool>().is_err());
        assert_eq!(Pool::default(), Pool::Bonus);
        assert_eq!(
            serde_json::to_string(&Pool::Subscription).unwrap(),
            "\"subscription\""
        );
    }
}
