//! # Authentication
//!
//! Operator bearer authentication for the sync API and the `X-Tenant-Id`
//! header that scopes tenant-level routes. Tokens are compared in constant
//! time against the configured operator tokens.

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts, Request, State},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{ApiError, unauthorized, validation_error};
use crate::server::AppState;

pub const TENANT_HEADER: &str = "X-Tenant-Id";

/// Tenant ID wrapper for type safety
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TenantId(pub Uuid);

/// Marker type for authenticated operator requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorAuth;

/// Tenant resolved from the request header
#[derive(Debug, Clone, Copy)]
pub struct TenantExtension(pub TenantId);

impl FromRef<AppState> for Arc<AppConfig> {
    fn from_ref(app_state: &AppState) -> Self {
        Arc::clone(&app_state.config)
    }
}

/// Validates the bearer token; a present tenant header is parsed too.
///
/// Routes that need a tenant extract [`TenantExtension`], which rejects
/// requests without the header.
pub async fn auth_middleware(
    State(config): State<Arc<AppConfig>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer_token(request.headers())?;
    validate_token(&config, token)?;

    if let Some(tenant) = extract_tenant_id(request.headers())? {
        tracing::debug!(tenant_id = %tenant.0, "Authenticated operator request");
        request.extensions_mut().insert(TenantExtension(tenant));
    }
    request.extensions_mut().insert(OperatorAuth);

    Ok(next.run(request).await)
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| unauthorized(Some("Missing Authorization header")))?
        .to_str()
        .map_err(|_| unauthorized(Some("Invalid Authorization header")))?;

    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| unauthorized(Some("Authorization header must use Bearer scheme")))
}

fn validate_token(config: &AppConfig, token: &str) -> Result<(), ApiError> {
    let is_valid = config
        .operator_tokens
        .iter()
        .any(|configured| ConstantTimeEq::ct_eq(token.as_bytes(), configured.as_bytes()).into());

    if is_valid {
        Ok(())
    } else {
        Err(unauthorized(Some("Invalid bearer token")))
    }
}

fn extract_tenant_id(headers: &HeaderMap) -> Result<Option<TenantId>, ApiError> {
    let Some(value) = headers.get(TENANT_HEADER) else {
        return Ok(None);
    };

    let value = value.to_str().map_err(|_| {
        validation_error(
            "Invalid tenant header",
            serde_json::json!({ TENANT_HEADER: "Header must be valid UTF-8" }),
        )
    })?;

    value.trim().parse::<Uuid>().map(|id| Some(TenantId(id))).map_err(|_| {
        validation_error(
            "Invalid tenant ID",
            serde_json::json!({ TENANT_HEADER: "Must be a valid UUID" }),
        )
    })
}

/// OpenAPI header parameter for X-Tenant-Id
#[derive(Debug, Serialize, Deserialize, IntoParams, utoipa::ToSchema)]
#[into_params(parameter_in = Header)]
pub struct TenantHeader {
    /// Tenant identifier (UUID) that scopes the request to a specific tenant
    #[serde(rename = "X-Tenant-Id")]
    #[param(rename = "X-Tenant-Id", value_type = String)]
    pub tenant_id: String,
}

impl<S> FromRequestParts<S> for TenantExtension
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<TenantExtension>()
            .copied()
            .ok_or_else(|| {
                validation_error(
                    "Missing required header",
                    serde_json::json!({ TENANT_HEADER: "Required header is missing" }),
                )
            })
    }
}

impl<S> FromRequestParts<S> for OperatorAuth
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<OperatorAuth>()
            .copied()
            .ok_or_else(|| unauthorized(Some("Operator authentication required")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Router,
        body::Body,
        http::{Request, StatusCode},
        routing::get,
    };
    use tower::ServiceExt;

    fn create_test_config() -> Arc<AppConfig> {
        Arc::new(AppConfig {
            operator_tokens: vec!["test-token-123".to_string()],
            ..Default::default()
        })
    }

    async fn tenant_handler(_auth: OperatorAuth, TenantExtension(tenant): TenantExtension) -> String {
        tenant.0.to_string()
    }

    async fn run_middleware(request: Request<Body>) -> Response {
        let config = create_test_config();
        Router::new()
            .route("/tenant", get(tenant_handler))
            .route("/operator", get(|_auth: OperatorAuth| async { "OK" }))
            .layer(axum::middleware::from_fn_with_state(
                Arc::clone(&config),
                auth_middleware,
            ))
            .oneshot(request)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn missing_auth_header_returns_401() {
        let request = Request::builder()
            .uri("/operator")
            .body(Body::empty())
            .unwrap();

        assert_eq!(run_middleware(request).await.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn wrong_scheme_or_token_returns_401() {
        for value in ["Basic dGVzdDoxMjM=", "Bearer wrong-token", "Bearer "] {
            let request = Request::builder()
                .uri("/operator")
                .header("Authorization", value)
                .body(Body::empty())
                .unwrap();
            assert_eq!(
                run_middleware(request).await.status(),
                StatusCode::UNAUTHORIZED,
                "{value}"
            );
        }
    }

    #[tokio::test]
    async fn operator_route_does_not_need_tenant() {
        let request = Request::builder()
            .uri("/operator")
            .header("Authorization", "Bearer test-token-123")
            .body(Body::empty())
            .unwrap();

        assert_eq!(run_middleware(request).await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn tenant_route_requires_valid_header() {
        let missing = Request::builder()
            .uri("/tenant")
            .header("Authorization", "Bearer test-token-123")
            .body(Body::empty())
            .unwrap();
        assert_eq!(run_middleware(missing).await.status(), StatusCode::BAD_REQUEST);

        let invalid = Request::builder()
            .uri("/tenant")
            .header("Authorization", "Bearer test-token-123")
            .header(TENANT_HEADER, "not-a-uuid")
            .body(Body::empty())
            .unwrap();
        assert_eq!(run_middleware(invalid).await.status(), StatusCode::BAD_REQUEST);

        let tenant = Uuid::new_v4();
        let valid = Request::builder()
            .uri("/tenant")
            .header("Authorization", "Bearer test-token-123")
            .header(TENANT_HEADER, tenant.to_string())
            .body(Body::empty())
            .unwrap();
        assert_eq!(run_middleware(valid).await.status(), StatusCode::OK);
    }
}
