//! Credit balance, deduction and transaction handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use credits_core::{
    BalanceView, CreditTransaction, Pool, PoolSplit, TransactionId, TransactionQuery,
    TransactionType, UsageRecord, UserId, DEFAULT_TRANSACTION_LIMIT, MAX_TRANSACTION_LIMIT,
};
use credits_ledger::{AddRequest, DeductRequest, LedgerError, RefreshOutcome, RefreshSummary};

use super::{blocking, parse_org};
use crate::auth::{AdminAuth, ServiceAuth};
use crate::error::ApiError;
use crate::state::AppState;

// ============================================================================
// Balance
// ============================================================================

/// Get an organization's balance.
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(org): Path<String>,
) -> Result<Json<BalanceView>, ApiError> {
    let org = parse_org(&org)?;
    let ledger = state.ledger.clone();
    let balance = blocking(move || Ok(ledger.get_balance(&org))).await?;
    Ok(Json(balance))
}

/// Credit check request.
#[derive(Debug, Deserialize)]
pub struct CheckCreditsRequest {
    /// Credits the caller is about to spend.
    pub amount: i64,
}

/// Credit check response.
#[derive(Debug, Serialize)]
pub struct CheckCreditsResponse {
    /// Whether the organization can spend `required`.
    pub has_credits: bool,
    /// Requested amount.
    pub required: i64,
    /// Total across all pools.
    pub available: i64,
}

/// Check whether an organization can afford an operation.
pub async fn check_credits(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(org): Path<String>,
    Json(req): Json<CheckCreditsRequest>,
) -> Result<Json<CheckCreditsResponse>, ApiError> {
    let org = parse_org(&org)?;
    let ledger = state.ledger.clone();

    let available = blocking(move || Ok(ledger.get_balance(&org).total)).await?;

    Ok(Json(CheckCreditsResponse {
        has_credits: req.amount > 0 && available >= req.amount,
        required: req.amount,
        available,
    }))
}

// ============================================================================
// Deduct
// ============================================================================

/// Deduct credits request.
#[derive(Debug, Deserialize)]
pub struct DeductCreditsRequest {
    /// Credits to spend.
    pub amount: i64,
    /// Billable tool name.
    pub tool: String,
    /// Caller reference (request id, document id, ...).
    #[serde(default)]
    pub reference_id: Option<String>,
    /// Acting user.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Tool-specific context.
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Deduct credits response.
#[derive(Debug, Serialize)]
pub struct DeductCreditsResponse {
    /// The usage ledger entry.
    pub transaction_id: TransactionId,
    /// Credits spent.
    pub credits_used: i64,
    /// Credits taken from each pool.
    pub pools: PoolSplit,
    /// Total before the deduction.
    pub balance_before: i64,
    /// Total after the deduction.
    pub balance_after: i64,
}

/// Spend credits for a tool call.
///
/// A deduction that lost a race on the guarded decrement is retried once
/// before surfacing as `409 Conflict`.
pub async fn deduct_credits(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Path(org): Path<String>,
    Json(req): Json<DeductCreditsRequest>,
) -> Result<Json<DeductCreditsResponse>, ApiError> {
    let org = parse_org(&org)?;
    if req.tool.trim().is_empty() {
        return Err(ApiError::BadRequest("tool is required".into()));
    }
    let user_id = parse_user(req.user_id.as_deref())?;

    let request = DeductRequest::new(org, req.amount, req.tool)
        .with_reference(req.reference_id)
        .with_user(user_id)
        .with_metadata(req.metadata.unwrap_or_default());

    tracing::debug!(
        organization_id = %org,
        service = %auth.service_name,
        credits = request.amount,
        "Deducting credits"
    );

    let ledger = state.ledger.clone();
    let receipt = blocking(move || match ledger.deduct_with(request.clone()) {
        Err(LedgerError::DeductionFailed) => {
            tracing::warn!(organization_id = %org, "Deduction raced, retrying once");
            ledger.deduct_with(request)
        }
        other => other,
    })
    .await?;

    Ok(Json(DeductCreditsResponse {
        transaction_id: receipt.transaction_id,
        credits_used: receipt.split.total(),
        pools: receipt.split,
        balance_before: receipt.balance_before,
        balance_after: receipt.balance_after,
    }))
}

// ============================================================================
// Admin grants
// ============================================================================

/// Admin add credits request.
#[derive(Debug, Deserialize)]
pub struct AddCreditsRequest {
    /// Credits to add.
    pub amount: i64,
    /// Target pool (default: bonus).
    #[serde(default)]
    pub pool: Option<String>,
    /// Log classification (default: derived from the pool).
    #[serde(default)]
    pub transaction_type: Option<String>,
    /// Description for the log entry.
    #[serde(default)]
    pub description: Option<String>,
    /// Additional context.
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Add credits to a pool (admin only).
pub async fn add_credits(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Path(org): Path<String>,
    Json(req): Json<AddCreditsRequest>,
) -> Result<Json<CreditTransaction>, ApiError> {
    let org = parse_org(&org)?;

    let pool = match req.pool.as_deref() {
        Some(raw) => raw
            .parse::<Pool>()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?,
        None => Pool::Bonus,
    };
    let description = req
        .description
        .unwrap_or_else(|| format!("Admin credit by {}", admin.admin_id));

    let mut request = AddRequest::new(org, req.amount, pool, description)
        .with_metadata(req.metadata.unwrap_or_default())
        .with_reference("admin", admin.admin_id.clone());
    if let Some(raw) = req.transaction_type.as_deref() {
        let transaction_type = raw
            .parse::<TransactionType>()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        request = request.with_type(transaction_type);
    }

    let ledger = state.ledger.clone();
    let entry = blocking(move || ledger.add_with(request)).await?;

    tracing::info!(
        organization_id = %org,
        admin_id = %admin.admin_id,
        credits = entry.credits,
        pool = %entry.credit_type,
        "Admin added credits"
    );

    Ok(Json(entry))
}

/// Refund request.
#[derive(Debug, Deserialize)]
pub struct RefundCreditsRequest {
    /// Credits to return.
    pub amount: i64,
    /// Why the credits are returned.
    pub reason: String,
}

/// Return credits to the bonus pool (admin only).
pub async fn refund_credits(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Path(org): Path<String>,
    Json(req): Json<RefundCreditsRequest>,
) -> Result<Json<CreditTransaction>, ApiError> {
    let org = parse_org(&org)?;

    let ledger = state.ledger.clone();
    let entry = blocking(move || ledger.refund(&org, req.amount, &req.reason)).await?;

    tracing::info!(
        organization_id = %org,
        admin_id = %admin.admin_id,
        credits = entry.credits,
        "Admin refunded credits"
    );

    Ok(Json(entry))
}

// ============================================================================
// Cycle refresh
// ============================================================================

/// Refresh request.
#[derive(Debug, Default, Deserialize)]
pub struct RefreshRequest {
    /// Credits for the new cycle (default: the organization's plan).
    #[serde(default)]
    pub plan_credits: Option<i64>,
    /// End of the new cycle (default: one month from now).
    #[serde(default)]
    pub cycle_end: Option<DateTime<Utc>>,
    /// Renewal event id; a repeated key is a no-op.
    #[serde(default)]
    pub event_key: Option<String>,
}

/// Refresh response.
#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    /// Whether this call changed the balance.
    pub applied: bool,
    /// What changed, when applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<RefreshSummary>,
}

/// Start a new billing cycle.
pub async fn refresh_subscription(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(org): Path<String>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<RefreshResponse>, ApiError> {
    let org = parse_org(&org)?;

    let ledger = state.ledger.clone();
    let outcome = blocking(move || {
        let plan_credits = match req.plan_credits {
            Some(credits) => credits,
            None => ledger
                .store()
                .get_organization(&org)?
                .ok_or_else(|| LedgerError::OrganizationNotFound(org.to_string()))?
                .plan_credits()
                .unwrap_or(0),
        };

        match req.event_key.as_deref() {
            Some(key) => ledger.refresh_subscription_once(&org, plan_credits, req.cycle_end, key),
            None => ledger
                .refresh_subscription(&org, plan_credits, req.cycle_end)
                .map(RefreshOutcome::Applied),
        }
    })
    .await?;

    Ok(Json(match outcome {
        RefreshOutcome::Applied(summary) => RefreshResponse {
            applied: true,
            summary: Some(summary),
        },
        RefreshOutcome::AlreadyApplied => RefreshResponse {
            applied: false,
            summary: None,
        },
    }))
}

// ============================================================================
// History
// ============================================================================

/// Transaction list query parameters.
#[derive(Debug, Deserialize)]
pub struct ListTransactionsQuery {
    /// Maximum number of transactions to return (default: 50, max: 500).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
    /// Only this transaction type.
    #[serde(default, rename = "type")]
    pub transaction_type: Option<String>,
    /// Inclusive lower bound on `created_at`.
    #[serde(default)]
    pub date_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`.
    #[serde(default)]
    pub date_to: Option<DateTime<Utc>>,
}

fn default_limit() -> usize {
    DEFAULT_TRANSACTION_LIMIT
}

/// List transactions response.
#[derive(Debug, Serialize)]
pub struct ListTransactionsResponse {
    /// Transactions (newest first).
    pub transactions: Vec<CreditTransaction>,
    /// Whether there are more transactions.
    pub has_more: bool,
}

/// List an organization's transaction history.
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(org): Path<String>,
    Query(query): Query<ListTransactionsQuery>,
) -> Result<Json<ListTransactionsResponse>, ApiError> {
    let org = parse_org(&org)?;
    let transaction_type = query
        .transaction_type
        .as_deref()
        .map(str::parse::<TransactionType>)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    // Fetch one more than requested to determine has_more
    let limit = query.limit.clamp(1, MAX_TRANSACTION_LIMIT);
    let ledger_query = TransactionQuery {
        limit: limit + 1,
        offset: query.offset,
        transaction_type,
        date_from: query.date_from,
        date_to: query.date_to,
    };

    let ledger = state.ledger.clone();
    let mut transactions = blocking(move || ledger.get_transactions(&org, ledger_query)).await?;

    let has_more = transactions.len() > limit;
    transactions.truncate(limit);

    Ok(Json(ListTransactionsResponse {
        transactions,
        has_more,
    }))
}

/// Usage list query parameters.
#[derive(Debug, Deserialize)]
pub struct ListUsageQuery {
    /// Maximum number of records to return (default: 50, max: 500).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
}

/// List usage response.
#[derive(Debug, Serialize)]
pub struct ListUsageResponse {
    /// Usage records (newest first).
    pub records: Vec<UsageRecord>,
}

/// List an organization's usage records.
pub async fn list_usage(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(org): Path<String>,
    Query(query): Query<ListUsageQuery>,
) -> Result<Json<ListUsageResponse>, ApiError> {
    let org = parse_org(&org)?;

    let ledger = state.ledger.clone();
    let records =
        blocking(move || ledger.get_usage_records(&org, query.limit, query.offset)).await?;

    Ok(Json(ListUsageResponse { records }))
}

fn parse_user(raw: Option<&str>) -> Result<Option<UserId>, ApiError> {
    raw.map(|s| {
        s.parse::<UserId>()
            .map_err(|_| ApiError::BadRequest(format!("Invalid user ID: {s}")))
    })
    .transpose()
}
