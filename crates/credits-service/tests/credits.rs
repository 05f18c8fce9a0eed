//! Credit balance, deduction and history integration tests.

mod common;

use axum::http::StatusCode;
use common::{admin_key, service_key, TestHarness};
use credits_core::OrganizationId;
use credits_store::FailPoint;
use serde_json::{json, Value};

// ============================================================================
// Health and auth
// ============================================================================

#[tokio::test]
async fn health_reports_ok() {
    let harness = TestHarness::new();

    let response = harness.server.get("/health").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "credits");
}

#[tokio::test]
async fn balance_without_api_key_fails() {
    let harness = TestHarness::new();
    let org = OrganizationId::generate();

    let response = harness
        .server
        .get(&format!("/v1/organizations/{org}/balance"))
        .await;

    response.assert_status_unauthorized();
}

#[tokio::test]
async fn admin_routes_reject_service_key() {
    let harness = TestHarness::new();
    let org = harness.register("starter").await;

    let response = harness
        .server
        .post(&format!("/v1/organizations/{org}/credits/add"))
        .add_header(service_key().0, service_key().1)
        .json(&json!({"amount": 100}))
        .await;

    response.assert_status_unauthorized();
}

#[tokio::test]
async fn malformed_organization_id_is_bad_request() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .get("/v1/organizations/not-a-uuid/balance")
        .add_header(service_key().0, service_key().1)
        .await;

    response.assert_status_bad_request();
}

// ============================================================================
// Balance
// ============================================================================

#[tokio::test]
async fn registered_organization_has_plan_balance() {
    let harness = TestHarness::new();
    let org = harness.register("starter").await;

    let body = harness.balance(&org).await;

    assert_eq!(body["total"], 500);
    assert_eq!(body["subscription"], 500);
    assert_eq!(body["plan_limit"], 500);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn unknown_organization_has_empty_balance() {
    let harness = TestHarness::new();

    let body = harness.balance(&OrganizationId::generate()).await;

    assert_eq!(body["total"], 0);
    assert_eq!(body["status"], "empty");
}

#[tokio::test]
async fn check_credits_reports_availability() {
    let harness = TestHarness::new();
    let org = harness.register("starter").await;

    let response = harness
        .server
        .post(&format!("/v1/organizations/{org}/credits/check"))
        .add_header(service_key().0, service_key().1)
        .json(&json!({"amount": 600}))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["has_credits"], false);
    assert_eq!(body["required"], 600);
    assert_eq!(body["available"], 500);
}

// ============================================================================
// Deduct
// ============================================================================

#[tokio::test]
async fn deduct_spends_subscription_first() {
    let harness = TestHarness::new();
    let org = harness.register("starter").await;

    let response = harness.deduct(&org, 30).await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["credits_used"], 30);
    assert_eq!(body["pools"]["subscription"], 30);
    assert_eq!(body["balance_before"], 500);
    assert_eq!(body["balance_after"], 470);

    assert_eq!(harness.balance(&org).await["total"], 470);
}

#[tokio::test]
async fn deduct_beyond_balance_is_payment_required() {
    let harness = TestHarness::new();
    let org = harness.register("starter").await;

    let response = harness.deduct(&org, 501).await;

    response.assert_status(StatusCode::PAYMENT_REQUIRED);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "insufficient_credits");
    assert_eq!(body["error"]["details"]["required"], 501);
    assert_eq!(body["error"]["details"]["available"], 500);

    assert_eq!(harness.balance(&org).await["total"], 500);
}

#[tokio::test]
async fn deduct_rejects_non_positive_amount() {
    let harness = TestHarness::new();
    let org = harness.register("starter").await;

    harness.deduct(&org, 0).await.assert_status_bad_request();
}

#[tokio::test]
async fn deduct_during_outage_is_internal_error_and_changes_nothing() {
    let harness = TestHarness::new();
    let org = harness.register("starter").await;

    harness.store.fail_next(FailPoint::AppendTransaction);
    let response = harness.deduct(&org, 10).await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json();
    assert_eq!(body["error"]["message"], "An internal error occurred");
    assert_eq!(harness.balance(&org).await["total"], 500);
}

#[tokio::test]
async fn deduct_records_usage_for_reporting() {
    let harness = TestHarness::new();
    let org = harness.register("starter").await;

    harness.deduct(&org, 12).await.assert_status_ok();
    harness.wait_for_usage(&org, 1).await;

    let response = harness
        .server
        .get(&format!("/v1/organizations/{org}/usage"))
        .add_header(service_key().0, service_key().1)
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["records"][0]["tool"], "contract-review");
    assert_eq!(body["records"][0]["credits_used"], 12);
}

// ============================================================================
// Admin grants and refunds
// ============================================================================

#[tokio::test]
async fn admin_add_defaults_to_bonus_pool() {
    let harness = TestHarness::new();
    let org = harness.register("starter").await;

    let response = harness
        .server
        .post(&format!("/v1/organizations/{org}/credits/add"))
        .add_header(admin_key().0, admin_key().1)
        .json(&json!({"amount": 100, "description": "Onboarding bonus"}))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["transaction_type"], "bonus");
    assert_eq!(body["credit_type"], "bonus");
    assert_eq!(body["balance_after"], 600);

    assert_eq!(harness.balance(&org).await["bonus"], 100);
}

#[tokio::test]
async fn admin_add_rejects_unknown_pool() {
    let harness = TestHarness::new();
    let org = harness.register("starter").await;

    let response = harness
        .server
        .post(&format!("/v1/organizations/{org}/credits/add"))
        .add_header(admin_key().0, admin_key().1)
        .json(&json!({"amount": 100, "pool": "gold"}))
        .await;

    response.assert_status_bad_request();
}

#[tokio::test]
async fn admin_add_rejects_debit_type() {
    let harness = TestHarness::new();
    let org = harness.register("starter").await;

    let response = harness
        .server
        .post(&format!("/v1/organizations/{org}/credits/add"))
        .add_header(admin_key().0, admin_key().1)
        .json(&json!({"amount": 100, "transaction_type": "usage"}))
        .await;

    response.assert_status_bad_request();
}

#[tokio::test]
async fn admin_refund_goes_to_bonus_pool() {
    let harness = TestHarness::new();
    let org = harness.register("starter").await;
    harness.deduct(&org, 40).await.assert_status_ok();

    let response = harness
        .server
        .post(&format!("/v1/organizations/{org}/credits/refund"))
        .add_header(admin_key().0, admin_key().1)
        .json(&json!({"amount": 40, "reason": "tool failed"}))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["transaction_type"], "refund");
    assert_eq!(body["description"], "Refund: tool failed");

    let balance = harness.balance(&org).await;
    assert_eq!(balance["subscription"], 460);
    assert_eq!(balance["bonus"], 40);
}

// ============================================================================
// Refresh
// ============================================================================

#[tokio::test]
async fn refresh_uses_plan_when_credits_omitted() {
    let harness = TestHarness::new();
    let org = harness.register("starter").await;
    harness.deduct(&org, 200).await.assert_status_ok();

    let response = harness
        .server
        .post(&format!("/v1/organizations/{org}/credits/refresh"))
        .add_header(service_key().0, service_key().1)
        .json(&json!({}))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["applied"], true);
    assert_eq!(body["summary"]["expired"], 300);
    assert_eq!(body["summary"]["granted"], 500);
    assert_eq!(body["summary"]["total"], 500);
}

#[tokio::test]
async fn refresh_with_event_key_applies_once() {
    let harness = TestHarness::new();
    let org = harness.register("starter").await;

    for expected in [true, false] {
        let response = harness
            .server
            .post(&format!("/v1/organizations/{org}/credits/refresh"))
            .add_header(service_key().0, service_key().1)
            .json(&json!({"plan_credits": 800, "event_key": "renewal-2024-06"}))
            .await;

        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["applied"], expected);
    }

    assert_eq!(harness.balance(&org).await["subscription"], 800);
}

#[tokio::test]
async fn refresh_unknown_organization_without_credits_is_not_found() {
    let harness = TestHarness::new();
    let org = OrganizationId::generate();

    let response = harness
        .server
        .post(&format!("/v1/organizations/{org}/credits/refresh"))
        .add_header(service_key().0, service_key().1)
        .json(&json!({}))
        .await;

    response.assert_status_not_found();
}

// ============================================================================
// Transactions
// ============================================================================

#[tokio::test]
async fn transactions_are_newest_first_and_paginated() {
    let harness = TestHarness::new();
    let org = harness.register("starter").await;
    for amount in [1, 2, 3] {
        harness.deduct(&org, amount).await.assert_status_ok();
    }

    let response = harness
        .server
        .get(&format!("/v1/organizations/{org}/transactions?limit=2"))
        .add_header(service_key().0, service_key().1)
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    let transactions = body["transactions"].as_array().unwrap();
    assert_eq!(transactions.len(), 2);
    assert_eq!(transactions[0]["credits"], -3);
    assert_eq!(transactions[1]["credits"], -2);
    assert_eq!(body["has_more"], true);
}

#[tokio::test]
async fn transactions_filter_by_type() {
    let harness = TestHarness::new();
    let org = harness.register("starter").await;
    harness.deduct(&org, 5).await.assert_status_ok();

    let response = harness
        .server
        .get(&format!(
            "/v1/organizations/{org}/transactions?type=subscription_grant"
        ))
        .add_header(service_key().0, service_key().1)
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    let transactions = body["transactions"].as_array().unwrap();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0]["credits"], 500);
    assert_eq!(body["has_more"], false);
}

#[tokio::test]
async fn transactions_reject_unknown_type() {
    let harness = TestHarness::new();
    let org = harness.register("starter").await;

    let response = harness
        .server
        .get(&format!("/v1/organizations/{org}/transactions?type=gift"))
        .add_header(service_key().0, service_key().1)
        .await;

    response.assert_status_bad_request();
}
