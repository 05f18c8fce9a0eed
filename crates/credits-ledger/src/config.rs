//! Ledger configuration.

use std::time::Duration;

use credits_store::{StoreOptions, DEFAULT_LOCK_TIMEOUT};

/// Default cap on subscription credits carried into a new cycle.
pub const DEFAULT_MAX_ROLLOVER_CREDITS: i64 = 500;

/// Behaviour switches for `CreditLedger`.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Carry unused subscription credits into the next cycle.
    pub rollover_enabled: bool,
    /// Upper bound on the carried amount.
    pub max_rollover_credits: i64,
    /// Bound on row lock waits.
    pub lock_timeout: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rollover_enabled: false,
            max_rollover_credits: DEFAULT_MAX_ROLLOVER_CREDITS,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

impl LedgerConfig {
    /// Store options matching this configuration.
    #[must_use]
    pub const fn store_options(&self) -> StoreOptions {
        StoreOptions {
            lock_timeout: self.lock_timeout,
        }
    }

    /// Credits carried over from a subscription pool holding `unused`.
    #[must_use]
    pub fn rollover_for(&self, unused: i64) -> i64 {
        if self.rollover_enabled {
            unused.min(self.max_rollover_credits).max(0)
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollover_is_capped_and_optional() {
        let disabled = LedgerConfig::default();
        assert_eq!(disabled.rollover_for(300), 0);

        let enabled = LedgerConfig {
            rollover_enabled: true,
            max_rollover_credits: 200,
            ..LedgerConfig::default()
        };
        assert_eq!(enabled.rollover_for(300), 200);
        assert_eq!(enabled.rollover_for(50), 50);
        assert_eq!(enabled.rollover_for(0), 0);
    }
}
