//! Credit pack purchase integration tests against a mocked Stripe API.

mod common;

use axum::http::StatusCode;
use common::{service_key, TestHarness};
use credits_core::{OrganizationId, PurchaseStatus};
use credits_store::Store;
use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn paid_session(org: &OrganizationId, session_id: &str) -> Value {
    json!({
        "id": session_id,
        "object": "checkout.session",
        "payment_status": "paid",
        "status": "complete",
        "amount_total": 4500,
        "currency": "usd",
        "client_reference_id": org.to_string(),
        "payment_intent": "pi_checkout_1",
        "metadata": {
            "organization_id": org.to_string(),
            "pack_id": "growth",
            "credits": "500"
        }
    })
}

async fn mount_session(mock_server: &MockServer, session: &Value) {
    let id = session["id"].as_str().unwrap();
    Mock::given(method("GET"))
        .and(path(format!("/checkout/sessions/{id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(session.clone()))
        .mount(mock_server)
        .await;
}

async fn sync(harness: &TestHarness, org: &OrganizationId, session_id: &str) -> axum_test::TestResponse {
    harness
        .server
        .post(&format!("/v1/organizations/{org}/checkout/sync"))
        .add_header(service_key().0, service_key().1)
        .json(&json!({"session_id": session_id}))
        .await
}

// ============================================================================
// Catalog
// ============================================================================

#[tokio::test]
async fn credit_packs_are_listed() {
    let harness = TestHarness::new();

    let response = harness.server.get("/v1/credit-packs").await;

    response.assert_status_ok();
    let packs: Value = response.json();
    let ids: Vec<&str> = packs
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["id"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&"growth"));
}

// ============================================================================
// Checkout
// ============================================================================

#[tokio::test]
async fn create_checkout_records_pending_purchase() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/checkout/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cs_test_new",
            "object": "checkout.session",
            "url": "https://checkout.stripe.com/c/pay/cs_test_new",
            "payment_status": "unpaid"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let harness = TestHarness::with_stripe(&mock_server.uri());
    let org = harness.register("starter").await;

    let response = harness
        .server
        .post(&format!("/v1/organizations/{org}/checkout"))
        .add_header(service_key().0, service_key().1)
        .json(&json!({"pack_id": "growth"}))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["session_id"], "cs_test_new");
    assert_eq!(body["url"], "https://checkout.stripe.com/c/pay/cs_test_new");

    let purchase = harness.store.get_purchase("cs_test_new").unwrap().unwrap();
    assert_eq!(purchase.status, PurchaseStatus::Pending);
    assert_eq!(purchase.credits, 500);
    assert_eq!(purchase.amount_cents, 4500);
    // Nothing is granted until payment
    assert_eq!(harness.balance(&org).await["purchased"], 0);
}

#[tokio::test]
async fn create_checkout_for_unknown_pack_is_not_found() {
    let mock_server = MockServer::start().await;
    let harness = TestHarness::with_stripe(&mock_server.uri());
    let org = harness.register("starter").await;

    let response = harness
        .server
        .post(&format!("/v1/organizations/{org}/checkout"))
        .add_header(service_key().0, service_key().1)
        .json(&json!({"pack_id": "mega"}))
        .await;

    response.assert_status_not_found();
}

#[tokio::test]
async fn checkout_without_stripe_is_unavailable() {
    let harness = TestHarness::new();
    let org = harness.register("starter").await;

    let response = harness
        .server
        .post(&format!("/v1/organizations/{org}/checkout"))
        .add_header(service_key().0, service_key().1)
        .json(&json!({"pack_id": "growth"}))
        .await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn stripe_api_error_is_bad_gateway() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/checkout/sessions"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"type": "invalid_request_error", "message": "No such price"}
        })))
        .mount(&mock_server)
        .await;

    let harness = TestHarness::with_stripe(&mock_server.uri());
    let org = harness.register("starter").await;

    let response = harness
        .server
        .post(&format!("/v1/organizations/{org}/checkout"))
        .add_header(service_key().0, service_key().1)
        .json(&json!({"pack_id": "growth"}))
        .await;

    response.assert_status(StatusCode::BAD_GATEWAY);
}

// ============================================================================
// Sync after redirect
// ============================================================================

#[tokio::test]
async fn sync_paid_session_grants_credits_once() {
    let mock_server = MockServer::start().await;
    let harness = TestHarness::with_stripe(&mock_server.uri());
    let org = harness.register("starter").await;
    mount_session(&mock_server, &paid_session(&org, "cs_test_paid")).await;

    let first = sync(&harness, &org, "cs_test_paid").await;
    first.assert_status_ok();
    let body: Value = first.json();
    assert_eq!(body["status"], "completed");
    assert_eq!(body["purchase"]["credits"], 500);

    let second = sync(&harness, &org, "cs_test_paid").await;
    second.assert_status_ok();
    let body: Value = second.json();
    assert_eq!(body["status"], "already_processed");

    let balance = harness.balance(&org).await;
    assert_eq!(balance["purchased"], 500);
    assert_eq!(balance["total"], 1000);
}

#[tokio::test]
async fn sync_then_webhook_grants_once() {
    let mock_server = MockServer::start().await;
    let harness = TestHarness::with_stripe(&mock_server.uri());
    let org = harness.register("starter").await;
    let session = paid_session(&org, "cs_test_race");
    mount_session(&mock_server, &session).await;

    sync(&harness, &org, "cs_test_race").await.assert_status_ok();
    harness
        .send_webhook(&json!({
            "id": "evt_race",
            "type": "checkout.session.completed",
            "data": {"object": session}
        }))
        .await
        .assert_status_ok();

    assert_eq!(harness.balance(&org).await["purchased"], 500);
}

#[tokio::test]
async fn sync_unpaid_session_is_pending() {
    let mock_server = MockServer::start().await;
    let harness = TestHarness::with_stripe(&mock_server.uri());
    let org = harness.register("starter").await;
    let mut session = paid_session(&org, "cs_test_open");
    session["payment_status"] = json!("unpaid");
    mount_session(&mock_server, &session).await;

    let response = sync(&harness, &org, "cs_test_open").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "pending");
    assert_eq!(harness.balance(&org).await["purchased"], 0);
}

#[tokio::test]
async fn sync_other_organizations_session_is_not_found() {
    let mock_server = MockServer::start().await;
    let harness = TestHarness::with_stripe(&mock_server.uri());
    let owner = harness.register("starter").await;
    let intruder = harness.register("starter").await;
    mount_session(&mock_server, &paid_session(&owner, "cs_test_owned")).await;

    let response = sync(&harness, &intruder, "cs_test_owned").await;

    response.assert_status_not_found();
    assert_eq!(harness.balance(&owner).await["purchased"], 0);
    assert_eq!(harness.balance(&intruder).await["purchased"], 0);
}

#[tokio::test]
async fn refund_finds_checkout_purchase_through_payment_intent() {
    let mock_server = MockServer::start().await;
    let harness = TestHarness::with_stripe(&mock_server.uri());
    let org = harness.register("starter").await;
    let session = paid_session(&org, "cs_test_refund");
    mount_session(&mock_server, &session).await;
    Mock::given(method("GET"))
        .and(path("/checkout/sessions"))
        .and(query_param("payment_intent", "pi_checkout_1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"object": "list", "data": [session], "has_more": false})),
        )
        .mount(&mock_server)
        .await;

    sync(&harness, &org, "cs_test_refund").await.assert_status_ok();

    harness
        .send_webhook(&json!({
            "id": "evt_refund",
            "type": "charge.refunded",
            "data": {"object": {
                "id": "ch_checkout_1",
                "payment_intent": "pi_checkout_1",
                "refunded": true,
                "amount_refunded": 4500
            }}
        }))
        .await
        .assert_status_ok();

    let purchase = harness.store.get_purchase("cs_test_refund").unwrap().unwrap();
    assert_eq!(purchase.status, PurchaseStatus::Refunded);
}

// ============================================================================
// Direct completion
// ============================================================================

#[tokio::test]
async fn complete_purchase_is_idempotent_per_reference() {
    let harness = TestHarness::new();
    let org = harness.register("free").await;
    let request = json!({
        "organization_id": org.to_string(),
        "credits": 100,
        "payment_reference": "pi_direct_42",
        "amount_cents": 1000,
        "pack_id": "starter"
    });

    for expected in ["completed", "already_processed"] {
        let response = harness
            .server
            .post("/v1/purchases/complete")
            .add_header(service_key().0, service_key().1)
            .json(&request)
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["status"], expected);
    }

    assert_eq!(harness.balance(&org).await["purchased"], 100);
}

#[tokio::test]
async fn complete_purchase_rejects_non_positive_credits() {
    let harness = TestHarness::new();
    let org = harness.register("starter").await;

    let response = harness
        .server
        .post("/v1/purchases/complete")
        .add_header(service_key().0, service_key().1)
        .json(&json!({
            "organization_id": org.to_string(),
            "credits": 0,
            "payment_reference": "pi_zero"
        }))
        .await;

    response.assert_status_bad_request();
}
