//! Organization and plan types.
//!
//! The ledger only needs to know how many subscription credits an
//! organization receives per cycle and whether it is still active.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ParseEnumError;
use crate::OrganizationId;

// ============================================================================
// Constants
// ============================================================================

/// Starter plan credits per cycle.
pub const STARTER_PLAN_CREDITS: i64 = 500;

/// Professional plan credits per cycle.
pub const PROFESSIONAL_PLAN_CREDITS: i64 = 2000;

/// A tenant of the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    /// Organization ID (from the host application).
    pub id: OrganizationId,

    /// Display name.
    pub name: String,

    /// Subscribed plan.
    pub plan: Plan,

    /// Per-cycle credits for custom (Enterprise) contracts.
    pub custom_credits: Option<i64>,

    /// Whether the organization may use credits.
    pub status: OrganizationStatus,

    /// When the organization was registered.
    pub created_at: DateTime<Utc>,
}

impl Organization {
    /// Create an active organization on the given plan.
    #[must_use]
    pub fn new(id: OrganizationId, name: impl Into<String>, plan: Plan) -> Self {
        Self {
            id,
            name: name.into(),
            plan,
            custom_credits: None,
            status: OrganizationStatus::Active,
            created_at: Utc::now(),
        }
    }

    /// Subscription credits per cycle, or `None` when the organization is
    /// disabled or its plan carries no allocation.
    #[must_use]
    pub fn plan_credits(&self) -> Option<i64> {
        if self.status != OrganizationStatus::Active {
            return None;
        }

        let credits = match self.plan {
            Plan::Enterprise => self.custom_credits.unwrap_or(0),
            plan => plan.cycle_credits(),
        };

        (credits > 0).then_some(credits)
    }
}

/// Available plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    /// No subscription credits.
    Free,
    /// 500 credits per cycle.
    Starter,
    /// 2000 credits per cycle.
    Professional,
    /// Contracted allocation, stored on the organization.
    Enterprise,
}

impl Plan {
    /// Credits granted each cycle.
    #[must_use]
    pub const fn cycle_credits(&self) -> i64 {
        match self {
            Self::Starter => STARTER_PLAN_CREDITS,
            Self::Professional => PROFESSIONAL_PLAN_CREDITS,
            Self::Free | Self::Enterprise => 0, // Enterprise=custom (set on the organization)
        }
    }

    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Starter => "starter",
            Self::Professional => "professional",
            Self::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Self::Free),
            "starter" => Ok(Self::Starter),
            "professional" => Ok(Self::Professional),
            "enterprise" => Ok(Self::Enterprise),
            other => Err(ParseEnumError::new("plan", other)),
        }
    }
}

/// Lifecycle status of an organization. Organizations are never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrganizationStatus {
    /// May spend and receive credits.
    Active,
    /// Soft-disabled.
    Disabled,
}
