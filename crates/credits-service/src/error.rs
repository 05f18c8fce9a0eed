//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use credits_ledger::LedgerError;
use credits_store::StoreError;

use crate::stripe::StripeError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict - invalid state transition or a lost race.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Insufficient credits.
    #[error("insufficient credits: required={required}, available={available}")]
    InsufficientCredits {
        /// Requested amount.
        required: i64,
        /// Total across all pools.
        available: i64,
    },

    /// Temporarily unable to serve the request; safe to retry.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// External service error.
    #[error("external service error: {0}")]
    ExternalService(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                self.to_string(),
                None,
            ),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone(), None),
            Self::InsufficientCredits {
                required,
                available,
            } => (
                StatusCode::PAYMENT_REQUIRED,
                "insufficient_credits",
                self.to_string(),
                Some(serde_json::json!({
                    "required": required,
                    "available": available
                })),
            ),
            Self::Unavailable(msg) => {
                tracing::warn!(error = %msg, "Request failed with a transient error");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "unavailable",
                    msg.clone(),
                    None,
                )
            }
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
            Self::ExternalService(msg) => (
                StatusCode::BAD_GATEWAY,
                "external_service_error",
                msg.clone(),
                None,
            ),
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InvalidOrganization
            | LedgerError::InvalidAmount
            | LedgerError::InvalidParameters(_)
            | LedgerError::BalanceOverflow => Self::BadRequest(err.to_string()),
            LedgerError::InsufficientCredits {
                required,
                available,
            } => Self::InsufficientCredits {
                required,
                available,
            },
            LedgerError::OrganizationNotFound(_) | LedgerError::PurchaseNotFound(_) => {
                Self::NotFound(err.to_string())
            }
            LedgerError::InvalidPurchaseTransition { .. } | LedgerError::DeductionFailed => {
                Self::Conflict(err.to_string())
            }
            LedgerError::LockTimeout | LedgerError::StorageUnavailable => {
                Self::Unavailable(err.to_string())
            }
            LedgerError::BalanceInitializationFailed
            | LedgerError::Deduction(_)
            | LedgerError::Storage(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        LedgerError::from(err).into()
    }
}

impl From<StripeError> for ApiError {
    fn from(err: StripeError) -> Self {
        match err {
            StripeError::InvalidSignature | StripeError::StaleSignature => {
                Self::BadRequest("Invalid webhook signature".into())
            }
            StripeError::Configuration(msg) => Self::Internal(msg),
            other => Self::ExternalService(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("ledger task failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: LedgerError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn ledger_errors_map_to_statuses() {
        assert_eq!(
            status_of(LedgerError::InvalidAmount),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(LedgerError::InsufficientCredits {
                required: 10,
                available: 3
            }),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            status_of(LedgerError::PurchaseNotFound("pi_1".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(LedgerError::DeductionFailed),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(LedgerError::LockTimeout),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(LedgerError::BalanceInitializationFailed),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn store_outage_is_unavailable() {
        let err = ApiError::from(StoreError::Unavailable);
        assert!(matches!(err, ApiError::Unavailable(_)));
    }
}
