//! # Connection API Handlers

use axum::{extract::State, http::StatusCode};

use crate::auth::{OperatorAuth, TenantExtension, TenantHeader};
use crate::error::ApiError;
use crate::server::AppState;
use crate::sync::SyncError;

/// Disconnect the tenant from the upstream system
///
/// Deletes the stored connection and its encrypted tokens. Synced data is
/// left in place.
#[utoipa::path(
    delete,
    path = "/connection",
    security(("bearer_auth" = [])),
    params(TenantHeader),
    responses(
        (status = 204, description = "Connection deleted"),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Tenant has no connection", body = ApiError)
    ),
    tag = "connection"
)]
pub async fn delete_connection(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
) -> Result<StatusCode, ApiError> {
    let deleted = state
        .coordinator
        .services()
        .connections()
        .delete_by_tenant(&tenant.0)
        .await?;

    if !deleted {
        return Err(SyncError::ConnectionNotFound.into());
    }

    tracing::info!(tenant_id = %tenant.0, "Upstream connection deleted");
    Ok(StatusCode::NO_CONTENT)
}
