//! Credit pack purchase handlers.
//!
//! Purchases are keyed by their payment reference. For Stripe Checkout the
//! reference is the session id, so the redirect sync and the webhook
//! reconcile the same purchase and only the first one grants credits.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use credits_core::{CreditPack, OrganizationId, Purchase};
use credits_ledger::{PurchaseOutcome, PurchaseRequest};

use super::{blocking, parse_org};
use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::state::AppState;
use crate::stripe::{CheckoutParams, CheckoutSession, StripeClient};

/// Purchase reconciliation response.
#[derive(Debug, Serialize)]
pub struct PurchaseResponse {
    /// `completed`, `already_processed` or `pending`.
    pub status: &'static str,
    /// The purchase, once known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purchase: Option<Purchase>,
}

impl From<PurchaseOutcome> for PurchaseResponse {
    fn from(outcome: PurchaseOutcome) -> Self {
        let status = if outcome.is_new() {
            "completed"
        } else {
            "already_processed"
        };
        Self {
            status,
            purchase: Some(outcome.purchase().clone()),
        }
    }
}

/// List the credit packs on sale.
pub async fn list_packs(State(state): State<Arc<AppState>>) -> Json<Vec<CreditPack>> {
    Json(state.config.credit_packs.clone())
}

// ============================================================================
// Checkout
// ============================================================================

/// Create checkout request.
#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    /// Pack to buy.
    pub pack_id: String,
    /// Redirect after payment (default: the frontend billing page).
    #[serde(default)]
    pub success_url: Option<String>,
    /// Redirect after cancel (default: the frontend billing page).
    #[serde(default)]
    pub cancel_url: Option<String>,
}

/// Create checkout response.
#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    /// Stripe Checkout session ID.
    pub session_id: String,
    /// URL to redirect the user to.
    pub url: Option<String>,
}

/// Start a Stripe Checkout for a credit pack.
///
/// A pending purchase is recorded under the session id.
pub async fn create_checkout(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(org): Path<String>,
    Json(req): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let org = parse_org(&org)?;
    let stripe = stripe_client(&state)?;
    let pack = state
        .config
        .credit_pack(&req.pack_id)
        .cloned()
        .ok_or_else(|| ApiError::NotFound(format!("Credit pack not found: {}", req.pack_id)))?;

    let frontend = state.config.frontend_url.trim_end_matches('/');
    let success_url = req.success_url.unwrap_or_else(|| {
        format!("{frontend}/billing?checkout=success&session_id={{CHECKOUT_SESSION_ID}}")
    });
    let cancel_url = req
        .cancel_url
        .unwrap_or_else(|| format!("{frontend}/billing?checkout=cancelled"));

    let session = stripe
        .create_checkout_session(CheckoutParams {
            organization_id: &org,
            pack: &pack,
            success_url: &success_url,
            cancel_url: &cancel_url,
        })
        .await?;

    let request = PurchaseRequest::new(org, pack.credits, session.id.clone())
        .with_payment(pack.price_cents, pack.currency.clone())
        .with_pack(Some(pack.id.clone()));
    let ledger = state.ledger.clone();
    blocking(move || ledger.record_pending_purchase(request)).await?;

    tracing::info!(
        organization_id = %org,
        pack_id = %pack.id,
        session_id = %session.id,
        "Checkout session created"
    );

    Ok(Json(CheckoutResponse {
        session_id: session.id,
        url: session.url,
    }))
}

/// Sync checkout request.
#[derive(Debug, Deserialize)]
pub struct SyncCheckoutRequest {
    /// Stripe Checkout session ID from the success redirect.
    pub session_id: String,
}

/// Reconcile a Checkout session after the success redirect.
///
/// Covers the window before the webhook arrives: if Stripe reports the
/// session paid, the purchase is completed now.
pub async fn sync_checkout(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(org): Path<String>,
    Json(req): Json<SyncCheckoutRequest>,
) -> Result<Json<PurchaseResponse>, ApiError> {
    let org = parse_org(&org)?;
    let stripe = stripe_client(&state)?;

    let session = stripe.get_checkout_session(&req.session_id).await?;

    // Never reveal or reconcile another organization's session
    if session.organization_ref() != Some(org.to_string().as_str()) {
        return Err(ApiError::NotFound(format!(
            "Checkout session not found: {}",
            req.session_id
        )));
    }

    if !session.is_paid() {
        tracing::debug!(
            organization_id = %org,
            session_id = %session.id,
            payment_status = ?session.payment_status,
            "Checkout session not paid yet"
        );
        return Ok(Json(PurchaseResponse {
            status: "pending",
            purchase: None,
        }));
    }

    let outcome = complete_session(&state, &session).await?;
    Ok(Json(outcome.into()))
}

/// Complete the purchase for a paid Checkout session.
pub(crate) async fn complete_session(
    state: &AppState,
    session: &CheckoutSession,
) -> Result<PurchaseOutcome, ApiError> {
    let org_ref = session
        .organization_ref()
        .ok_or_else(|| ApiError::BadRequest("Checkout session has no organization".into()))?;
    let org = parse_org(org_ref)?;

    let pack_id = session.pack_id();
    let credits = session
        .credits()
        .or_else(|| {
            pack_id
                .as_deref()
                .and_then(|id| state.config.credit_pack(id))
                .map(|pack| pack.credits)
        })
        .ok_or_else(|| ApiError::BadRequest("Checkout session has no credit amount".into()))?;

    let request = PurchaseRequest::new(org, credits, session.id.clone())
        .with_payment(
            session.amount_total.unwrap_or(0),
            session.currency.clone().unwrap_or_else(|| "usd".into()),
        )
        .with_pack(pack_id);

    complete(state, request).await
}

fn stripe_client(state: &AppState) -> Result<&StripeClient, ApiError> {
    state
        .stripe
        .as_deref()
        .ok_or_else(|| ApiError::Unavailable("Payments are not configured".into()))
}

// ============================================================================
// Direct completion
// ============================================================================

/// Complete purchase request.
#[derive(Debug, Deserialize)]
pub struct CompletePurchaseRequest {
    /// Paying organization.
    pub organization_id: String,
    /// Credits to grant.
    pub credits: i64,
    /// External payment identifier.
    pub payment_reference: String,
    /// Amount paid in cents.
    #[serde(default)]
    pub amount_cents: i64,
    /// Currency (default: usd).
    #[serde(default)]
    pub currency: Option<String>,
    /// Pack bought.
    #[serde(default)]
    pub pack_id: Option<String>,
}

/// Grant purchased credits for a payment confirmed elsewhere.
pub async fn complete_purchase(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Json(req): Json<CompletePurchaseRequest>,
) -> Result<Json<PurchaseResponse>, ApiError> {
    let org: OrganizationId = parse_org(&req.organization_id)?;

    let request = PurchaseRequest::new(org, req.credits, req.payment_reference)
        .with_payment(
            req.amount_cents,
            req.currency.unwrap_or_else(|| "usd".into()),
        )
        .with_pack(req.pack_id);

    tracing::debug!(
        organization_id = %org,
        service = %auth.service_name,
        payment_reference = %request.payment_reference,
        "Completing purchase"
    );

    let outcome = complete(&state, request).await?;
    Ok(Json(outcome.into()))
}

async fn complete(state: &AppState, request: PurchaseRequest) -> Result<PurchaseOutcome, ApiError> {
    let ledger = state.ledger.clone();
    blocking(move || ledger.complete_purchase_with(request)).await
}
