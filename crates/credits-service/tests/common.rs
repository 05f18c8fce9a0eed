//! Common test utilities for credits service integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderName, HeaderValue};
use axum::Router;
use axum_test::{TestResponse, TestServer};
use chrono::Utc;
use serde_json::{json, Value};

use credits_core::OrganizationId;
use credits_service::crypto::hmac_sha256_hex;
use credits_service::{create_router, AppState, ServiceConfig};
use credits_store::{MemoryStore, Store};

pub const SERVICE_KEY: &str = "test-service-key";
pub const ADMIN_KEY: &str = "test-admin-key";
pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// Direct handle on the store, for fault injection and assertions.
    pub store: Arc<MemoryStore>,
}

impl TestHarness {
    /// Create a new test harness over a fresh in-memory store.
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    /// Create a harness whose Stripe client talks to `base_url`.
    pub fn with_stripe(base_url: &str) -> Self {
        Self::with_config(ServiceConfig {
            stripe_api_key: Some("sk_test_123".into()),
            stripe_api_base: base_url.to_string(),
            ..test_config()
        })
    }

    /// Create a harness with a custom configuration.
    pub fn with_config(config: ServiceConfig) -> Self {
        let store = Arc::new(MemoryStore::with_options(config.ledger.store_options()));
        let state = AppState::new(store.clone(), config);
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");

        Self { server, store }
    }

    /// Register an organization on `plan` and return its id.
    pub async fn register(&self, plan: &str) -> OrganizationId {
        let org = OrganizationId::generate();
        let response = self
            .server
            .post("/v1/organizations")
            .add_header(admin_key().0, admin_key().1)
            .json(&json!({"id": org.to_string(), "name": "Acme Legal", "plan": plan}))
            .await;
        response.assert_status(axum::http::StatusCode::CREATED);
        org
    }

    /// GET the organization's balance.
    pub async fn balance(&self, org: &OrganizationId) -> Value {
        let response = self
            .server
            .get(&format!("/v1/organizations/{org}/balance"))
            .add_header(service_key().0, service_key().1)
            .await;
        response.assert_status_ok();
        response.json()
    }

    /// Deduct credits as the host application.
    pub async fn deduct(&self, org: &OrganizationId, amount: i64) -> TestResponse {
        self.server
            .post(&format!("/v1/organizations/{org}/credits/deduct"))
            .add_header(service_key().0, service_key().1)
            .json(&json!({"amount": amount, "tool": "contract-review"}))
            .await
    }

    /// POST a webhook body with a valid signature.
    pub async fn send_webhook(&self, body: &Value) -> TestResponse {
        let payload = body.to_string();
        let header = sign(&payload, Utc::now().timestamp());
        self.post_webhook(payload, &header).await
    }

    /// POST a raw webhook body with the given signature header.
    pub async fn post_webhook(&self, payload: String, signature: &str) -> TestResponse {
        self.server
            .post("/webhooks/stripe")
            .add_header(
                HeaderName::from_static("stripe-signature"),
                HeaderValue::from_str(signature).unwrap(),
            )
            .content_type("application/json")
            .bytes(payload.into())
            .await
    }

    /// Wait until the event consumer has recorded `count` usage rows.
    pub async fn wait_for_usage(&self, org: &OrganizationId, count: usize) {
        for _ in 0..50 {
            if self.store.list_usage_records(org, 100, 0).unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("usage records were not recorded in time");
    }

    /// Wait until the event consumer has issued `count` invoices.
    pub async fn wait_for_invoices(&self, org: &OrganizationId, count: usize) {
        for _ in 0..50 {
            if self.store.list_invoices(org).unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("invoices were not issued in time");
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration with test keys and no Stripe client.
pub fn test_config() -> ServiceConfig {
    ServiceConfig {
        listen_addr: "127.0.0.1:0".into(),
        service_api_key: Some(SERVICE_KEY.into()),
        admin_api_key: Some(ADMIN_KEY.into()),
        stripe_webhook_secret: Some(WEBHOOK_SECRET.into()),
        ..ServiceConfig::default()
    }
}

/// Service API key header.
pub fn service_key() -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static("x-api-key"),
        HeaderValue::from_static(SERVICE_KEY),
    )
}

/// Admin API key header.
pub fn admin_key() -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static("x-admin-key"),
        HeaderValue::from_static(ADMIN_KEY),
    )
}

/// A `Stripe-Signature` header for `payload` signed at `timestamp`.
pub fn sign(payload: &str, timestamp: i64) -> String {
    let sig = hmac_sha256_hex(WEBHOOK_SECRET, &format!("{timestamp}.{payload}")).unwrap();
    format!("t={timestamp},v1={sig}")
}
