//! Stripe API types.
//!
//! Only the fields the service reads are modelled; everything else in the
//! Stripe payloads is ignored.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Stripe metadata: string keys to string values.
pub type Metadata = HashMap<String, String>;

/// Stripe Checkout session object.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    /// Session ID.
    pub id: String,
    /// Checkout URL to redirect the user to.
    #[serde(default)]
    pub url: Option<String>,
    /// Payment status ("paid", "unpaid", "`no_payment_required`").
    #[serde(default)]
    pub payment_status: Option<String>,
    /// Customer ID.
    #[serde(default)]
    pub customer: Option<String>,
    /// Total amount in cents.
    #[serde(default)]
    pub amount_total: Option<i64>,
    /// Currency (e.g., "usd").
    #[serde(default)]
    pub currency: Option<String>,
    /// Client reference ID (our organization ID).
    #[serde(default)]
    pub client_reference_id: Option<String>,
    /// Session status.
    #[serde(default)]
    pub status: Option<String>,
    /// Payment intent ID.
    #[serde(default)]
    pub payment_intent: Option<String>,
    /// Metadata set when the session was created.
    #[serde(default)]
    pub metadata: Metadata,
}

impl CheckoutSession {
    /// Whether the customer has paid.
    #[must_use]
    pub fn is_paid(&self) -> bool {
        self.payment_status.as_deref() == Some("paid")
    }

    /// The organization the session was created for.
    #[must_use]
    pub fn organization_ref(&self) -> Option<&str> {
        self.metadata
            .get("organization_id")
            .map(String::as_str)
            .or(self.client_reference_id.as_deref())
    }

    /// Credits recorded in the session metadata.
    #[must_use]
    pub fn credits(&self) -> Option<i64> {
        self.metadata.get("credits").and_then(|s| s.parse().ok())
    }

    /// Pack recorded in the session metadata.
    #[must_use]
    pub fn pack_id(&self) -> Option<String> {
        self.metadata.get("pack_id").cloned()
    }
}

/// Stripe charge object (as delivered by `charge.refunded`).
#[derive(Debug, Clone, Deserialize)]
pub struct Charge {
    /// Charge ID.
    pub id: String,
    /// Payment intent ID.
    #[serde(default)]
    pub payment_intent: Option<String>,
    /// Whether the charge was fully refunded.
    #[serde(default)]
    pub refunded: bool,
    /// Amount refunded so far, in cents.
    #[serde(default)]
    pub amount_refunded: i64,
    /// Metadata.
    #[serde(default)]
    pub metadata: Metadata,
}

/// Stripe invoice object (as delivered by `invoice.paid`).
#[derive(Debug, Clone, Deserialize)]
pub struct Invoice {
    /// Invoice ID.
    pub id: String,
    /// Why the invoice was created ("`subscription_cycle`", "`subscription_create`", ...).
    #[serde(default)]
    pub billing_reason: Option<String>,
    /// Subscription ID.
    #[serde(default)]
    pub subscription: Option<String>,
    /// End of the invoiced period (Unix).
    #[serde(default)]
    pub period_end: Option<i64>,
    /// Invoice metadata.
    #[serde(default)]
    pub metadata: Metadata,
    /// Snapshot of the subscription's metadata.
    #[serde(default)]
    pub subscription_details: Option<SubscriptionDetails>,
    /// Invoice line items.
    #[serde(default)]
    pub lines: Option<StripeList<InvoiceLine>>,
}

impl Invoice {
    /// Whether the invoice pays for a subscription cycle.
    #[must_use]
    pub fn is_subscription_cycle(&self) -> bool {
        matches!(
            self.billing_reason.as_deref(),
            Some("subscription_cycle" | "subscription_create")
        )
    }

    /// Look up a metadata value on the invoice or its subscription.
    #[must_use]
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .or_else(|| {
                self.subscription_details
                    .as_ref()
                    .and_then(|details| details.metadata.get(key))
            })
            .map(String::as_str)
    }

    /// End of the subscription period this invoice pays for.
    #[must_use]
    pub fn cycle_end(&self) -> Option<DateTime<Utc>> {
        self.lines
            .as_ref()
            .and_then(|lines| lines.data.iter().find_map(|line| line.period.as_ref()))
            .map(|period| period.end)
            .or(self.period_end)
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
    }
}

/// Subscription snapshot on an invoice.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionDetails {
    /// Subscription metadata.
    #[serde(default)]
    pub metadata: Metadata,
}

/// Invoice line item.
#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceLine {
    /// Service period covered by the line.
    #[serde(default)]
    pub period: Option<Period>,
}

/// A billing period.
#[derive(Debug, Clone, Deserialize)]
pub struct Period {
    /// Period start (Unix).
    pub start: i64,
    /// Period end (Unix).
    pub end: i64,
}

/// Stripe list response wrapper.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeList<T> {
    /// Data items.
    pub data: Vec<T>,
    /// Whether there are more items.
    #[serde(default)]
    pub has_more: bool,
}

/// Stripe webhook event.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    /// Event ID.
    pub id: String,
    /// Event type (e.g., "checkout.session.completed").
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event data.
    pub data: WebhookEventData,
    /// Created timestamp (Unix).
    #[serde(default)]
    pub created: i64,
}

/// Webhook event data container.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    /// The event object.
    pub object: serde_json::Value,
}

/// Stripe API error response.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeErrorResponse {
    /// Error details.
    pub error: StripeErrorDetail,
}

/// Stripe error detail.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeErrorDetail {
    /// Error type.
    #[serde(rename = "type")]
    pub error_type: String,
    /// Error message.
    pub message: String,
    /// Error code.
    #[serde(default)]
    pub code: Option<String>,
}
