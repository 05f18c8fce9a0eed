//! Organization registration handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use credits_core::{BalanceView, Organization, OrganizationId, Plan};
use credits_ledger::LedgerError;

use super::{blocking, parse_org};
use crate::auth::{AdminAuth, ServiceAuth};
use crate::error::ApiError;
use crate::state::AppState;

/// Register organization request.
#[derive(Debug, Deserialize)]
pub struct CreateOrganizationRequest {
    /// Organization ID from the host application (generated if omitted).
    #[serde(default)]
    pub id: Option<String>,
    /// Display name.
    pub name: String,
    /// Plan name (`free`, `starter`, `professional`, `enterprise`).
    pub plan: String,
    /// Per-cycle credits for enterprise contracts.
    #[serde(default)]
    pub custom_credits: Option<i64>,
}

/// Organization with its current balance.
#[derive(Debug, Serialize)]
pub struct OrganizationResponse {
    /// The organization.
    pub organization: Organization,
    /// Its balance.
    pub balance: BalanceView,
}

/// Register an organization and seed its balance from the plan.
pub async fn create_organization(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Json(req): Json<CreateOrganizationRequest>,
) -> Result<(StatusCode, Json<OrganizationResponse>), ApiError> {
    let id = match req.id.as_deref() {
        Some(raw) => parse_org(raw)?,
        None => OrganizationId::generate(),
    };
    let plan: Plan = req
        .plan
        .parse()
        .map_err(|e: credits_core::ParseEnumError| ApiError::BadRequest(e.to_string()))?;
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Organization name is required".into()));
    }
    if matches!(req.custom_credits, Some(credits) if credits < 0) {
        return Err(ApiError::BadRequest(
            "custom_credits cannot be negative".into(),
        ));
    }

    let mut organization = Organization::new(id, req.name.trim(), plan);
    organization.custom_credits = req.custom_credits;

    let ledger = state.ledger.clone();
    let registered = blocking(move || {
        let store = ledger.store();
        if store.get_organization(&organization.id)?.is_some() {
            return Ok(None);
        }
        store.put_organization(&organization)?;

        ledger.initialize_balance(
            &organization.id,
            organization.plan_credits().unwrap_or(0),
            None,
            None,
        )?;
        let balance = ledger.get_balance(&organization.id);
        Ok(Some(OrganizationResponse {
            organization,
            balance,
        }))
    })
    .await?;

    let response =
        registered.ok_or_else(|| ApiError::Conflict(format!("Organization {id} already exists")))?;

    tracing::info!(
        organization_id = %id,
        plan = %response.organization.plan,
        admin_id = %admin.admin_id,
        "Organization registered"
    );

    Ok((StatusCode::CREATED, Json(response)))
}

/// Fetch an organization with its balance.
pub async fn get_organization(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(org): Path<String>,
) -> Result<Json<OrganizationResponse>, ApiError> {
    let org = parse_org(&org)?;

    let ledger = state.ledger.clone();
    let response = blocking(move || {
        let organization = ledger
            .store()
            .get_organization(&org)?
            .ok_or_else(|| LedgerError::OrganizationNotFound(org.to_string()))?;
        let balance = ledger.get_balance(&org);
        Ok(OrganizationResponse {
            organization,
            balance,
        })
    })
    .await?;

    Ok(Json(response))
}
