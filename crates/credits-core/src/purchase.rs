//! Credit packs and purchases.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ParseEnumError, TransitionError};
use crate::{OrganizationId, PurchaseId};

/// A purchasable bundle of credits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditPack {
    /// Stable pack identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Credits granted.
    pub credits: i64,
    /// Price in the smallest currency unit.
    pub price_cents: i64,
    /// ISO currency code, lowercase.
    pub currency: String,
}

impl CreditPack {
    fn usd(id: &str, name: &str, credits: i64, price_cents: i64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            credits,
            price_cents,
            currency: "usd".to_string(),
        }
    }
}

/// The packs offered when no catalog is configured.
#[must_use]
pub fn default_credit_packs() -> Vec<CreditPack> {
    vec![
        CreditPack::usd("starter", "Starter Pack", 100, 1000),
        CreditPack::usd("growth", "Growth Pack", 500, 4500),
        CreditPack::usd("scale", "Scale Pack", 1500, 12000),
    ]
}

/// An external payment mapped to a credit grant.
///
/// `payment_reference` is unique across all purchases: a reference produces
/// at most one completed purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    /// Purchase ID.
    pub id: PurchaseId,
    /// Paying organization.
    pub organization_id: OrganizationId,
    /// Credits granted (or to be granted).
    pub credits: i64,
    /// Amount paid in the smallest currency unit.
    pub amount_cents: i64,
    /// ISO currency code, lowercase.
    pub currency: String,
    /// Lifecycle status.
    pub status: PurchaseStatus,
    /// External payment identifier (Checkout session, payment intent, ...).
    pub payment_reference: String,
    /// Pack bought, when known.
    pub pack_id: Option<String>,
    /// When the purchase was recorded.
    pub created_at: DateTime<Utc>,
    /// When the status last changed.
    pub updated_at: DateTime<Utc>,
}

impl Purchase {
    /// Create a purchase record with the given status.
    #[must_use]
    pub fn new(
        organization_id: OrganizationId,
        credits: i64,
        payment_reference: impl Into<String>,
        status: PurchaseStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: PurchaseId::generate(),
            organization_id,
            credits,
            amount_cents: 0,
            currency: "usd".to_string(),
            status,
            payment_reference: payment_reference.into(),
            pack_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, enforcing the one-directional lifecycle.
    ///
    /// # Errors
    ///
    /// Returns `TransitionError` if the lifecycle does not allow the change.
    pub fn transition(&mut self, next: PurchaseStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Status of a purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseStatus {
    /// Payment started but not confirmed.
    Pending,
    /// Payment confirmed and credits granted.
    Completed,
    /// Payment failed. Terminal.
    Failed,
    /// Payment returned to the customer. Terminal.
    Refunded,
}

impl PurchaseStatus {
    /// Whether the lifecycle allows moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Completed | Self::Failed) | (Self::Completed, Self::Refunded)
        )
    }

    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PurchaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PurchaseStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "refunded" => Ok(Self::Refunded),
            other => Err(ParseEnumError::new("purchase status", other)),
        }
    }
}
