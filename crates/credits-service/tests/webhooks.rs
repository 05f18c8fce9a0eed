//! Stripe webhook integration tests.

mod common;

use axum::http::StatusCode;
use chrono::Utc;
use common::{service_key, sign, test_config, TestHarness};
use credits_core::{OrganizationId, PurchaseStatus};
use credits_service::ServiceConfig;
use credits_store::Store;
use serde_json::{json, Value};

fn checkout_completed(org: &OrganizationId, session_id: &str, payment_status: &str) -> Value {
    json!({
        "id": format!("evt_{session_id}"),
        "type": "checkout.session.completed",
        "created": Utc::now().timestamp(),
        "data": {"object": {
            "id": session_id,
            "object": "checkout.session",
            "payment_status": payment_status,
            "amount_total": 4500,
            "currency": "usd",
            "client_reference_id": org.to_string(),
            "payment_intent": format!("pi_{session_id}"),
            "metadata": {
                "organization_id": org.to_string(),
                "pack_id": "growth",
                "credits": "500"
            }
        }}
    })
}

fn invoice_paid(org: &OrganizationId, invoice_id: &str, billing_reason: &str) -> Value {
    json!({
        "id": format!("evt_{invoice_id}"),
        "type": "invoice.paid",
        "data": {"object": {
            "id": invoice_id,
            "object": "invoice",
            "billing_reason": billing_reason,
            "subscription": "sub_123",
            "subscription_details": {"metadata": {"organization_id": org.to_string()}},
            "lines": {"object": "list", "data": [
                {"period": {"start": 1_717_200_000, "end": 1_719_792_000}}
            ]}
        }}
    })
}

// ============================================================================
// Signature verification
// ============================================================================

#[tokio::test]
async fn tampered_payload_is_rejected() {
    let harness = TestHarness::new();
    let org = harness.register("starter").await;

    let signed = checkout_completed(&org, "cs_test_1", "paid").to_string();
    let header = sign(&signed, Utc::now().timestamp());
    let tampered = signed.replace("\"500\"", "\"50000\"");

    let response = harness.post_webhook(tampered, &header).await;

    response.assert_status_bad_request();
    assert_eq!(harness.balance(&org).await["purchased"], 0);
}

#[tokio::test]
async fn stale_signature_is_rejected() {
    let harness = TestHarness::new();
    let org = harness.register("starter").await;

    let payload = checkout_completed(&org, "cs_test_1", "paid").to_string();
    let header = sign(&payload, Utc::now().timestamp() - 600);

    let response = harness.post_webhook(payload, &header).await;

    response.assert_status_bad_request();
    assert_eq!(harness.balance(&org).await["purchased"], 0);
}

#[tokio::test]
async fn missing_signature_is_rejected() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/webhooks/stripe")
        .json(&json!({"id": "evt_1", "type": "ping", "data": {"object": {}}}))
        .await;

    response.assert_status_bad_request();
}

#[tokio::test]
async fn webhooks_without_secret_are_unavailable() {
    let harness = TestHarness::with_config(ServiceConfig {
        stripe_webhook_secret: None,
        ..test_config()
    });

    let response = harness
        .send_webhook(&json!({"id": "evt_1", "type": "ping", "data": {"object": {}}}))
        .await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn unhandled_event_is_acknowledged() {
    let harness = TestHarness::new();

    let response = harness
        .send_webhook(&json!({"id": "evt_1", "type": "customer.created", "data": {"object": {}}}))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["received"], true);
}

// ============================================================================
// checkout.session.completed
// ============================================================================

#[tokio::test]
async fn checkout_completion_grants_purchased_credits_once() {
    let harness = TestHarness::new();
    let org = harness.register("starter").await;
    let event = checkout_completed(&org, "cs_test_once", "paid");

    harness.send_webhook(&event).await.assert_status_ok();
    harness.send_webhook(&event).await.assert_status_ok();

    let balance = harness.balance(&org).await;
    assert_eq!(balance["purchased"], 500);
    assert_eq!(balance["total"], 1000);

    let purchase = harness.store.get_purchase("cs_test_once").unwrap().unwrap();
    assert_eq!(purchase.status, PurchaseStatus::Completed);
    assert_eq!(purchase.amount_cents, 4500);
    assert_eq!(purchase.pack_id.as_deref(), Some("growth"));

    harness.wait_for_invoices(&org, 1).await;
    let invoices = harness.store.list_invoices(&org).unwrap();
    assert_eq!(invoices.len(), 1);
    assert_eq!(invoices[0].credits, 500);
}

#[tokio::test]
async fn unpaid_checkout_is_skipped() {
    let harness = TestHarness::new();
    let org = harness.register("starter").await;

    harness
        .send_webhook(&checkout_completed(&org, "cs_test_unpaid", "unpaid"))
        .await
        .assert_status_ok();

    assert_eq!(harness.balance(&org).await["purchased"], 0);
    assert!(harness.store.get_purchase("cs_test_unpaid").unwrap().is_none());
}

#[tokio::test]
async fn checkout_without_organization_is_bad_request() {
    let harness = TestHarness::new();
    let mut event = checkout_completed(&OrganizationId::generate(), "cs_test_2", "paid");
    event["data"]["object"]["metadata"] = json!({"credits": "500"});
    event["data"]["object"]["client_reference_id"] = Value::Null;

    harness.send_webhook(&event).await.assert_status_bad_request();
}

#[tokio::test]
async fn expired_checkout_is_recorded_failed() {
    let harness = TestHarness::new();
    let org = harness.register("starter").await;
    let mut event = checkout_completed(&org, "cs_test_expired", "unpaid");
    event["type"] = json!("checkout.session.expired");

    harness.send_webhook(&event).await.assert_status_ok();

    let purchase = harness.store.get_purchase("cs_test_expired").unwrap().unwrap();
    assert_eq!(purchase.status, PurchaseStatus::Failed);
    assert_eq!(harness.balance(&org).await["purchased"], 0);
}

#[tokio::test]
async fn failure_after_completion_keeps_purchase() {
    let harness = TestHarness::new();
    let org = harness.register("starter").await;
    let mut event = checkout_completed(&org, "cs_test_late", "paid");
    harness.send_webhook(&event).await.assert_status_ok();

    event["type"] = json!("checkout.session.async_payment_failed");
    harness.send_webhook(&event).await.assert_status_ok();

    let purchase = harness.store.get_purchase("cs_test_late").unwrap().unwrap();
    assert_eq!(purchase.status, PurchaseStatus::Completed);
    assert_eq!(harness.balance(&org).await["purchased"], 500);
}

// ============================================================================
// invoice.paid
// ============================================================================

#[tokio::test]
async fn subscription_renewal_refreshes_once_per_invoice() {
    let harness = TestHarness::new();
    let org = harness.register("starter").await;
    harness.deduct(&org, 100).await.assert_status_ok();

    let event = invoice_paid(&org, "in_renewal_1", "subscription_cycle");
    harness.send_webhook(&event).await.assert_status_ok();
    harness.deduct(&org, 10).await.assert_status_ok();
    harness.send_webhook(&event).await.assert_status_ok();

    let balance = harness.balance(&org).await;
    assert_eq!(balance["subscription"], 490);
    assert_eq!(balance["cycle_end"], "2024-07-01T00:00:00Z");
}

#[tokio::test]
async fn invoice_plan_credits_metadata_overrides_plan() {
    let harness = TestHarness::new();
    let org = harness.register("starter").await;

    let mut event = invoice_paid(&org, "in_upgrade", "subscription_cycle");
    event["data"]["object"]["metadata"] = json!({"plan_credits": "2000"});
    harness.send_webhook(&event).await.assert_status_ok();

    assert_eq!(harness.balance(&org).await["subscription"], 2000);
}

#[tokio::test]
async fn non_cycle_invoice_is_ignored() {
    let harness = TestHarness::new();
    let org = harness.register("starter").await;
    harness.deduct(&org, 100).await.assert_status_ok();

    harness
        .send_webhook(&invoice_paid(&org, "in_manual", "manual"))
        .await
        .assert_status_ok();

    assert_eq!(harness.balance(&org).await["subscription"], 400);
}

// ============================================================================
// charge.refunded
// ============================================================================

#[tokio::test]
async fn full_refund_marks_purchase_refunded() {
    let harness = TestHarness::new();
    let org = harness.register("starter").await;

    harness
        .server
        .post("/v1/purchases/complete")
        .add_header(service_key().0, service_key().1)
        .json(&json!({
            "organization_id": org.to_string(),
            "credits": 100,
            "payment_reference": "pi_direct_1",
            "amount_cents": 1000
        }))
        .await
        .assert_status_ok();

    let event = json!({
        "id": "evt_refund_1",
        "type": "charge.refunded",
        "data": {"object": {
            "id": "ch_1",
            "payment_intent": "pi_direct_1",
            "refunded": true,
            "amount_refunded": 1000
        }}
    });
    harness.send_webhook(&event).await.assert_status_ok();
    harness.send_webhook(&event).await.assert_status_ok();

    let purchase = harness.store.get_purchase("pi_direct_1").unwrap().unwrap();
    assert_eq!(purchase.status, PurchaseStatus::Refunded);
    // Credits already granted stay with the organization
    assert_eq!(harness.balance(&org).await["purchased"], 100);
}

#[tokio::test]
async fn partial_refund_leaves_purchase_completed() {
    let harness = TestHarness::new();
    let org = harness.register("starter").await;

    harness
        .server
        .post("/v1/purchases/complete")
        .add_header(service_key().0, service_key().1)
        .json(&json!({
            "organization_id": org.to_string(),
            "credits": 100,
            "payment_reference": "pi_partial",
            "amount_cents": 1000
        }))
        .await
        .assert_status_ok();

    harness
        .send_webhook(&json!({
            "id": "evt_refund_2",
            "type": "charge.refunded",
            "data": {"object": {
                "id": "ch_2",
                "payment_intent": "pi_partial",
                "refunded": false,
                "amount_refunded": 300
            }}
        }))
        .await
        .assert_status_ok();

    let purchase = harness.store.get_purchase("pi_partial").unwrap().unwrap();
    assert_eq!(purchase.status, PurchaseStatus::Completed);
}
