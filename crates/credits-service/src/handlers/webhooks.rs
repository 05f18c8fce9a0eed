//! Stripe webhook handler.
//!
//! Every handled event is idempotent, so Stripe's at-least-once delivery is
//! safe: purchases are keyed by checkout session, renewals claim the invoice
//! id, and refunding an already refunded purchase is acknowledged.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use credits_ledger::{LedgerError, RefreshOutcome};

use super::purchases::complete_session;
use super::{blocking, parse_org};
use crate::error::ApiError;
use crate::state::AppState;
use crate::stripe::{verify_signature, Charge, CheckoutSession, Invoice, WebhookEvent};

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was processed.
    pub received: bool,
}

/// Handle Stripe webhooks.
pub async fn stripe_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    let secret = state
        .config
        .stripe_webhook_secret
        .as_deref()
        .ok_or_else(|| ApiError::Unavailable("Stripe webhooks are not configured".into()))?;

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Missing Stripe signature".into()))?;

    verify_signature(
        &body,
        signature,
        secret,
        state.config.webhook_tolerance(),
        Utc::now(),
    )
    .map_err(|e| {
        tracing::warn!(error = %e, "Rejected Stripe webhook");
        ApiError::from(e)
    })?;

    let event: WebhookEvent =
        serde_json::from_str(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    tracing::info!(
        event_type = %event.event_type,
        event_id = %event.id,
        "Received Stripe webhook"
    );

    match event.event_type.as_str() {
        "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
            handle_checkout_completed(&state, parse_object(&event)?).await?;
        }
        "checkout.session.async_payment_failed" | "checkout.session.expired" => {
            handle_checkout_failed(&state, parse_object(&event)?).await?;
        }
        "invoice.paid" => {
            handle_invoice_paid(&state, parse_object(&event)?).await?;
        }
        "charge.refunded" => {
            handle_charge_refunded(&state, parse_object(&event)?).await?;
        }
        _ => {
            tracing::debug!(event_type = %event.event_type, "Unhandled Stripe event");
        }
    }

    Ok(Json(WebhookResponse { received: true }))
}

fn parse_object<T: serde::de::DeserializeOwned>(event: &WebhookEvent) -> Result<T, ApiError> {
    serde_json::from_value(event.data.object.clone()).map_err(|e| {
        ApiError::BadRequest(format!("Malformed {} payload: {e}", event.event_type))
    })
}

async fn handle_checkout_completed(
    state: &AppState,
    session: CheckoutSession,
) -> Result<(), ApiError> {
    // Only process if payment is complete
    if !session.is_paid() {
        tracing::info!(
            session_id = %session.id,
            payment_status = ?session.payment_status,
            "Checkout session not paid yet, skipping"
        );
        return Ok(());
    }

    let outcome = complete_session(state, &session).await?;

    tracing::info!(
        session_id = %session.id,
        organization_id = %outcome.purchase().organization_id,
        granted = outcome.is_new(),
        "Checkout completion processed"
    );

    Ok(())
}

async fn handle_checkout_failed(state: &AppState, session: CheckoutSession) -> Result<(), ApiError> {
    let Some(org_ref) = session.organization_ref() else {
        tracing::warn!(session_id = %session.id, "Failed checkout has no organization");
        return Ok(());
    };
    let org = parse_org(org_ref)?;
    let credits = session.credits().unwrap_or(0);

    let ledger = state.ledger.clone();
    let session_id = session.id.clone();
    match blocking(move || ledger.fail_purchase(&org, credits, &session_id)).await {
        Ok(_) => {
            tracing::info!(
                session_id = %session.id,
                organization_id = %org,
                "Checkout payment failed"
            );
            Ok(())
        }
        // Already completed or failed
        Err(ApiError::Conflict(msg)) => {
            tracing::info!(session_id = %session.id, reason = %msg, "Checkout failure ignored");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn handle_invoice_paid(state: &AppState, invoice: Invoice) -> Result<(), ApiError> {
    if !invoice.is_subscription_cycle() {
        tracing::debug!(
            invoice_id = %invoice.id,
            billing_reason = ?invoice.billing_reason,
            "Invoice is not a subscription cycle, skipping"
        );
        return Ok(());
    }

    let org_ref = invoice
        .metadata_value("organization_id")
        .ok_or_else(|| ApiError::BadRequest("Invoice has no organization".into()))?;
    let org = parse_org(org_ref)?;

    let plan_credits = invoice
        .metadata_value("plan_credits")
        .map(|raw| {
            raw.parse::<i64>()
                .map_err(|_| ApiError::BadRequest(format!("Invalid plan_credits: {raw}")))
        })
        .transpose()?;
    let cycle_end = invoice.cycle_end();
    let event_key = invoice.id.clone();

    let ledger = state.ledger.clone();
    let outcome = blocking(move || {
        let plan_credits = match plan_credits {
            Some(credits) => credits,
            None => ledger
                .store()
                .get_organization(&org)?
                .ok_or_else(|| LedgerError::OrganizationNotFound(org.to_string()))?
                .plan_credits()
                .unwrap_or(0),
        };
        ledger.refresh_subscription_once(&org, plan_credits, cycle_end, &event_key)
    })
    .await?;

    match outcome {
        RefreshOutcome::Applied(summary) => tracing::info!(
            organization_id = %org,
            invoice_id = %invoice.id,
            subscription_credits = summary.subscription_credits,
            "Subscription renewed"
        ),
        RefreshOutcome::AlreadyApplied => tracing::info!(
            organization_id = %org,
            invoice_id = %invoice.id,
            "Subscription renewal already applied"
        ),
    }

    Ok(())
}

async fn handle_charge_refunded(state: &AppState, charge: Charge) -> Result<(), ApiError> {
    if !charge.refunded {
        tracing::info!(
            charge_id = %charge.id,
            amount_refunded = charge.amount_refunded,
            "Partial refund, purchase left completed"
        );
        return Ok(());
    }

    // Direct completions are keyed by payment intent or charge; Checkout
    // purchases by session, which Stripe can look up from the intent.
    let mut references: Vec<String> = charge
        .metadata
        .get("payment_reference")
        .cloned()
        .into_iter()
        .chain(charge.payment_intent.clone())
        .chain(std::iter::once(charge.id.clone()))
        .collect();

    if let (Some(stripe), Some(intent)) = (state.stripe.as_ref(), charge.payment_intent.as_deref())
    {
        match stripe.find_checkout_session(intent).await {
            Ok(Some(session)) => references.push(session.id),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, payment_intent = %intent, "Checkout session lookup failed");
            }
        }
    }

    for reference in references {
        let ledger = state.ledger.clone();
        let lookup = reference.clone();
        match blocking(move || ledger.refund_purchase(&lookup)).await {
            Ok(purchase) => {
                tracing::info!(
                    charge_id = %charge.id,
                    organization_id = %purchase.organization_id,
                    payment_reference = %reference,
                    "Purchase marked refunded"
                );
                return Ok(());
            }
            Err(ApiError::NotFound(_)) => {}
            Err(ApiError::Conflict(msg)) => {
                tracing::info!(
                    charge_id = %charge.id,
                    payment_reference = %reference,
                    reason = %msg,
                    "Refund already handled"
                );
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    }

    tracing::warn!(charge_id = %charge.id, "Refunded charge matches no purchase");
    Ok(())
}
