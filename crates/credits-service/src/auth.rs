//! Authentication extractors.
//!
//! This module provides extractors for:
//! - `ServiceAuth` - Host application requests via the service API key
//! - `AdminAuth` - Admin authentication for privileged endpoints

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::crypto::constant_time_eq;
use crate::error::ApiError;
use crate::state::AppState;

/// Service authentication via API key.
///
/// Used for requests from the host application acting for an organization.
#[derive(Debug, Clone)]
pub struct ServiceAuth {
    /// The service name or identifier.
    pub service_name: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for ServiceAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        check_key(
            parts,
            "x-api-key",
            state.config.service_api_key.as_deref(),
        )?;

        let service_name = header_or(parts, "x-service-name", "unknown");

        Ok(ServiceAuth { service_name })
    }
}

/// Admin authentication via API key with admin scope.
///
/// Used for admin-only endpoints like adding credits manually.
/// Requires the `X-Admin-Key` header to match the configured admin key.
#[derive(Debug, Clone)]
pub struct AdminAuth {
    /// Admin identifier (for audit logging).
    pub admin_id: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        check_key(
            parts,
            "x-admin-key",
            state.config.admin_api_key.as_deref(),
        )?;

        let admin_id = header_or(parts, "x-admin-id", "admin");

        tracing::info!(admin_id = %admin_id, "Admin authenticated");

        Ok(AdminAuth { admin_id })
    }
}

/// Compare a key header against the configured key. An unconfigured key
/// rejects every request.
fn check_key(parts: &Parts, header: &str, expected: Option<&str>) -> Result<(), ApiError> {
    let provided = parts
        .headers
        .get(header)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    let expected = expected.ok_or(ApiError::Unauthorized)?;

    if constant_time_eq(provided, expected) {
        Ok(())
    } else {
        tracing::debug!(header, "Rejected API key");
        Err(ApiError::Unauthorized)
    }
}

fn header_or(parts: &Parts, header: &str, default: &str) -> String {
    parts
        .headers
        .get(header)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(default)
        .to_string()
}
