//! # Server Configuration
//!
//! Router assembly, shared state and the OpenAPI document of the sync API.

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{delete, get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::auth_middleware;
use crate::config::AppConfig;
use crate::handlers;
use crate::repositories::SyncProgressRepository;
use crate::sync::{PlanSyncCoordinator, RosterSync, ScheduleSync, SyncServices, TenantSweeper};
use crate::telemetry::trace_context_middleware;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<DatabaseConnection>,
    pub coordinator: PlanSyncCoordinator,
    pub roster: RosterSync,
    pub schedule: ScheduleSync,
    pub sweeper: TenantSweeper,
    pub progress: SyncProgressRepository,
}

impl AppState {
    pub fn new(config: AppConfig, db: DatabaseConnection) -> anyhow::Result<Self> {
        let db = Arc::new(db);
        let services = SyncServices::from_config(&config, db.clone())?;
        Ok(Self::from_services(Arc::new(config), services))
    }

    /// Builds state around already-wired services.
    pub fn from_services(config: Arc<AppConfig>, services: SyncServices) -> Self {
        let coordinator = PlanSyncCoordinator::new(services.clone());
        Self {
            config,
            db: services.db.clone(),
            roster: RosterSync::new(services.clone()),
            schedule: ScheduleSync::new(services.clone()),
            sweeper: TenantSweeper::new(coordinator.clone()),
            progress: SyncProgressRepository::new(services.db.clone()),
            coordinator,
        }
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let protected = Router::new()
        .route("/sync/plans", post(handlers::sync::sync_plans))
        .route("/sync/team-members", post(handlers::sync::sync_team_members))
        .route("/sync/schedule", post(handlers::sync::sync_schedule))
        .route("/sync/sweep", post(handlers::sync::sync_sweep))
        .route("/sync/progress", get(handlers::sync::list_progress))
        .route("/connection", delete(handlers::connection::delete_connection))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.config),
            auth_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .merge(protected)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(trace_context_middleware))
        .layer(TraceLayer::new_for_http())
}

/// Serves the API until `shutdown` is cancelled or Ctrl+C arrives
pub async fn run_server(
    config: AppConfig,
    db: DatabaseConnection,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr = config
        .bind_addr()
        .map_err(|e| anyhow::anyhow!("invalid server address: {}", e))?;
    let profile = config.profile.clone();
    let app = create_app(AppState::new(config, db)?);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, %profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    tracing::info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                shutdown.cancelled().await;
            }
        }
        _ = shutdown.cancelled() => {}
    }
    tracing::info!("Received shutdown signal");
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::sync::sync_plans,
        crate::handlers::sync::sync_team_members,
        crate::handlers::sync::sync_schedule,
        crate::handlers::sync::sync_sweep,
        crate::handlers::sync::list_progress,
        crate::handlers::connection::delete_connection,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::error::ApiError,
            crate::handlers::HealthResponse,
            crate::handlers::sync::SweepRequest,
            crate::handlers::sync::SyncProgressInfo,
            crate::handlers::sync::SyncProgressResponse,
            crate::sync::PlanSyncRequest,
            crate::sync::ScheduleSyncRequest,
            crate::sync::SweepResults,
            crate::sync::TenantSweepResult,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "sync", description = "Trigger and inspect upstream syncs"),
        (name = "connection", description = "Upstream connection lifecycle"),
    ),
    info(
        title = "Plansync API",
        description = "Synchronizes service plans, songs and rosters from the upstream planning system",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
