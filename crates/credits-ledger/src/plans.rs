//! Plan allocation lookup.
//!
//! The ledger asks a `PlanLookup` how many subscription credits an
//! organization receives per cycle when it has to seed a missing balance or
//! report a plan limit.

use std::collections::HashMap;
use std::sync::Arc;

use credits_core::OrganizationId;
use credits_store::{Store, StoreError};

/// Source of per-cycle plan allocations.
pub trait PlanLookup: Send + Sync {
    /// Subscription credits per cycle, or `None` if the organization is
    /// unknown, disabled, or on a plan without an allocation.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read.
    fn plan_credits_per_cycle(
        &self,
        organization_id: &OrganizationId,
    ) -> Result<Option<i64>, StoreError>;
}

/// Reads plans from the registered `Organization` rows.
pub struct StorePlanLookup {
    store: Arc<dyn Store>,
}

impl StorePlanLookup {
    /// Create a lookup over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

impl PlanLookup for StorePlanLookup {
    fn plan_credits_per_cycle(
        &self,
        organization_id: &OrganizationId,
    ) -> Result<Option<i64>, StoreError> {
        Ok(self
            .store
            .get_organization(organization_id)?
            .and_then(|org| org.plan_credits()))
    }
}

/// Fixed allocations, for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticPlans {
    credits: HashMap<OrganizationId, i64>,
}

impl StaticPlans {
    /// An empty table: every organization has no plan.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign `credits` per cycle to an organization.
    #[must_use]
    pub fn with(mut self, organization_id: OrganizationId, credits: i64) -> Self {
        self.credits.insert(organization_id, credits);
        self
    }
}

impl PlanLookup for StaticPlans {
    fn plan_credits_per_cycle(
        &self,
        organization_id: &OrganizationId,
    ) -> Result<Option<i64>, StoreError> {
        Ok(self
            .credits
            .get(organization_id)
            .copied()
            .filter(|credits| *credits > 0))
    }
}
