//! # Sync API Handlers
//!
//! Entry points that trigger plan, roster and schedule syncs for a tenant,
//! the cross-tenant sweep, and the progress listing.
//!
//! Every run returns 200 with `{"results": .., "errors": [..]}` whether it
//! completed or stopped at a checkpoint; only setup failures become
//! problem+json errors.

use std::sync::Arc;

use axum::{extract::State, extract::rejection::JsonRejection, response::Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{OperatorAuth, TenantExtension, TenantHeader};
use crate::error::ApiError;
use crate::models::sync_progress;
use crate::server::AppState;
use crate::sync::{
    ExecutionDeadline, PlanSyncRequest, PlanSyncResults, RosterSyncResults, ScheduleSyncRequest,
    ScheduleSyncResults, SweepResults, SyncOutcome,
};

/// Request body for the cross-tenant sweep
#[derive(Debug, Clone, Default, Deserialize, Serialize, ToSchema)]
#[serde(default)]
pub struct SweepRequest {
    /// Override for the incremental lookback window, in days
    pub lookback_days: Option<i64>,
}

/// Persisted checkpoint of a plan sync run
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SyncProgressInfo {
    #[schema(value_type = String)]
    pub id: Uuid,
    pub sync_type: String,
    /// `incremental` or `<start_year>-<end_year>`
    pub range_key: String,
    pub start_year: Option<i32>,
    pub end_year: Option<i32>,
    /// One of: in_progress, completed
    pub status: String,
    pub current_collection_index: i32,
    pub current_item_index: i32,
    pub plans_processed: i32,
    pub songs_processed: i32,
    pub links_written: i32,
    pub error_count: i32,
    pub error_message: Option<String>,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub updated_at: String,
}

fn rfc3339(value: sea_orm::prelude::DateTimeWithTimeZone) -> String {
    DateTime::<Utc>::from(value).to_rfc3339()
}

impl From<sync_progress::Model> for SyncProgressInfo {
    fn from(model: sync_progress::Model) -> Self {
        Self {
            id: model.id,
            sync_type: model.sync_type,
            range_key: model.range_key,
            start_year: model.start_year,
            end_year: model.end_year,
            status: model.status,
            current_collection_index: model.current_collection_index,
            current_item_index: model.current_item_index,
            plans_processed: model.plans_processed,
            songs_processed: model.songs_processed,
            links_written: model.links_written,
            error_count: model.error_count,
            error_message: model.error_message,
            started_at: rfc3339(model.started_at),
            completed_at: model.completed_at.map(rfc3339),
            updated_at: rfc3339(model.updated_at),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SyncProgressResponse {
    pub progress: Vec<SyncProgressInfo>,
}

/// Run a plan sync for the tenant
///
/// The run stops at a checkpoint when its execution budget is exhausted;
/// call again with `resume: true` to continue.
#[utoipa::path(
    post,
    path = "/sync/plans",
    security(("bearer_auth" = [])),
    params(TenantHeader),
    request_body = PlanSyncRequest,
    responses(
        (status = 200, description = "Run completed or checkpointed", body = SyncOutcome<PlanSyncResults>),
        (status = 400, description = "Malformed body or invalid year range", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Tenant has no connection", body = ApiError),
        (status = 409, description = "Connection needs re-authorization", body = ApiError),
        (status = 502, description = "Upstream listing failed", body = ApiError)
    ),
    tag = "sync"
)]
pub async fn sync_plans(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    payload: Result<Json<PlanSyncRequest>, JsonRejection>,
) -> Result<Json<SyncOutcome<PlanSyncResults>>, ApiError> {
    let Json(request) = payload?;
    let deadline = ExecutionDeadline::start(state.config.sync.run_budget());

    let outcome = state
        .coordinator
        .run(tenant.0, &request, &deadline)
        .await?;

    Ok(Json(outcome))
}

/// Sync team members and positions for the tenant
#[utoipa::path(
    post,
    path = "/sync/team-members",
    security(("bearer_auth" = [])),
    params(TenantHeader),
    responses(
        (status = 200, description = "Roster sync finished", body = SyncOutcome<RosterSyncResults>),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Tenant has no connection", body = ApiError),
        (status = 409, description = "Connection needs re-authorization", body = ApiError)
    ),
    tag = "sync"
)]
pub async fn sync_team_members(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
) -> Result<Json<SyncOutcome<RosterSyncResults>>, ApiError> {
    let outcome = state.roster.run(tenant.0).await?;
    Ok(Json(outcome))
}

/// Sync the people scheduled on one service date
#[utoipa::path(
    post,
    path = "/sync/schedule",
    security(("bearer_auth" = [])),
    params(TenantHeader),
    request_body = ScheduleSyncRequest,
    responses(
        (status = 200, description = "Schedule sync finished", body = SyncOutcome<ScheduleSyncResults>),
        (status = 400, description = "Missing or malformed date", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Tenant has no connection", body = ApiError),
        (status = 409, description = "Connection needs re-authorization", body = ApiError)
    ),
    tag = "sync"
)]
pub async fn sync_schedule(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    payload: Result<Json<ScheduleSyncRequest>, JsonRejection>,
) -> Result<Json<SyncOutcome<ScheduleSyncResults>>, ApiError> {
    let Json(request) = payload?;
    let outcome = state.schedule.run(tenant.0, &request).await?;
    Ok(Json(outcome))
}

/// Run a resumable plan sync for every active connection
#[utoipa::path(
    post,
    path = "/sync/sweep",
    security(("bearer_auth" = [])),
    request_body = SweepRequest,
    responses(
        (status = 200, description = "Per-tenant sweep results", body = SweepResults),
        (status = 400, description = "Invalid lookback", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "sync"
)]
pub async fn sync_sweep(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    payload: Result<Json<SweepRequest>, JsonRejection>,
) -> Result<Json<SweepResults>, ApiError> {
    let Json(request) = payload?;
    let deadline = Arc::new(ExecutionDeadline::start(state.config.sync.run_budget()));

    let results = state.sweeper.run(request.lookback_days, deadline).await?;
    Ok(Json(results))
}

/// List sync progress records for the tenant
#[utoipa::path(
    get,
    path = "/sync/progress",
    security(("bearer_auth" = [])),
    params(TenantHeader),
    responses(
        (status = 200, description = "Progress records, most recent first", body = SyncProgressResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "sync"
)]
pub async fn list_progress(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
) -> Result<Json<SyncProgressResponse>, ApiError> {
    let records = state.progress.list_by_tenant(&tenant.0).await?;

    Ok(Json(SyncProgressResponse {
        progress: records.into_iter().map(SyncProgressInfo::from).collect(),
    }))
}
