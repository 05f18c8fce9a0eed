//! API handlers.
//!
//! Ledger operations are synchronous and hold row locks, so handlers run
//! them on the blocking pool through [`blocking`].

pub mod credits;
pub mod health;
pub mod organizations;
pub mod purchases;
pub mod webhooks;

use credits_core::OrganizationId;
use credits_ledger::LedgerError;

use crate::error::ApiError;

/// Parse an organization id from a path segment.
pub(crate) fn parse_org(raw: &str) -> Result<OrganizationId, ApiError> {
    raw.parse::<OrganizationId>()
        .ok()
        .filter(|id| !id.is_nil())
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid organization ID: {raw}")))
}

/// Run a ledger call on the blocking pool.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, LedgerError> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await??)
}
