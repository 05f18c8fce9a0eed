//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{credits, health, organizations, purchases, webhooks};
use crate::state::AppState;

// ============================================================================
// Concurrency Limiting Constants
// ============================================================================

/// Maximum concurrent requests for credit endpoints.
/// Deductions arrive on every billable tool call, so this group gets the
/// larger share.
const CREDITS_MAX_CONCURRENT_REQUESTS: usize = 100;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
/// - `GET /v1/credit-packs` - Credit pack catalog
///
/// ## Organizations
/// - `POST /v1/organizations` - Register organization (admin)
/// - `GET /v1/organizations/:org` - Organization with balance
///
/// ## Credits (Service API key, admin for grants and refunds)
/// - `GET /v1/organizations/:org/balance`
/// - `POST /v1/organizations/:org/credits/check`
/// - `POST /v1/organizations/:org/credits/deduct`
/// - `POST /v1/organizations/:org/credits/add` (admin)
/// - `POST /v1/organizations/:org/credits/refund` (admin)
/// - `POST /v1/organizations/:org/credits/refresh`
/// - `GET /v1/organizations/:org/transactions`
/// - `GET /v1/organizations/:org/usage`
///
/// ## Purchases (Service API key)
/// - `POST /v1/organizations/:org/checkout` - Start Stripe Checkout
/// - `POST /v1/organizations/:org/checkout/sync` - Reconcile after redirect
/// - `POST /v1/purchases/complete` - Complete an externally confirmed payment
///
/// ## Webhooks (Signature verification)
/// - `POST /webhooks/stripe` - Stripe webhooks
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    // Build CORS layer
    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let credit_routes = Router::new()
        .route("/:org/balance", get(credits::get_balance))
        .route("/:org/credits/check", post(credits::check_credits))
        .route("/:org/credits/deduct", post(credits::deduct_credits))
        .route("/:org/credits/add", post(credits::add_credits))
        .route("/:org/credits/refund", post(credits::refund_credits))
        .route("/:org/credits/refresh", post(credits::refresh_subscription))
        .route("/:org/transactions", get(credits::list_transactions))
        .route("/:org/usage", get(credits::list_usage))
        .layer(ConcurrencyLimitLayer::new(CREDITS_MAX_CONCURRENT_REQUESTS));

    let api_routes = Router::new()
        // Organizations
        .route("/organizations", post(organizations::create_organization))
        .route(
            "/organizations/:org",
            get(organizations::get_organization),
        )
        // Purchases
        .route("/credit-packs", get(purchases::list_packs))
        .route(
            "/organizations/:org/checkout",
            post(purchases::create_checkout),
        )
        .route(
            "/organizations/:org/checkout/sync",
            post(purchases::sync_checkout),
        )
        .route("/purchases/complete", post(purchases::complete_purchase))
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS))
        // Credits (with their own concurrency limit)
        .nest("/organizations", credit_routes);

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        // API v1 routes (rate limited)
        .nest("/v1", api_routes)
        // Webhooks (no rate limit - controlled by Stripe)
        .route("/webhooks/stripe", post(webhooks::stripe_webhook))
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
