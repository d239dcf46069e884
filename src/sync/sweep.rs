//! Multi-tenant sweep
//!
//! Runs a resumable plan sync for every active connection, a bounded number
//! of tenants at a time. One tenant's failure never affects the others.

use std::sync::Arc;

use metrics::counter;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::sync::coordinator::{PlanSyncCoordinator, PlanSyncRequest};
use crate::sync::deadline::RunDeadline;
use crate::sync::SyncError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct TenantSweepResult {
    pub tenant_id: Uuid,
    pub completed: bool,
    pub timed_out: bool,
    pub plans_processed: usize,
    /// Run-aborting error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct SweepResults {
    pub connections: usize,
    pub completed: usize,
    pub timed_out: usize,
    pub failed: usize,
    pub tenants: Vec<TenantSweepResult>,
}

#[derive(Debug, Clone)]
pub struct TenantSweeper {
    coordinator: PlanSyncCoordinator,
}

impl TenantSweeper {
    pub fn new(coordinator: PlanSyncCoordinator) -> Self {
        Self { coordinator }
    }

    #[instrument(skip_all, fields(lookback_days = ?lookback_days))]
    pub async fn run(
        &self,
        lookback_days: Option<i64>,
        deadline: Arc<dyn RunDeadline>,
    ) -> Result<SweepResults, SyncError> {
        if let Some(days) = lookback_days
            && days <= 0
        {
            return Err(SyncError::InvalidRequest(
                "lookback_days must be positive".to_string(),
            ));
        }

        let services = self.coordinator.services();
        let connections = services.connections().list_active().await?;
        let concurrency = services.settings.sweep_concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));

        info!(connections = connections.len(), concurrency, "Starting sweep");

        let mut set = JoinSet::new();
        for connection in &connections {
            let coordinator = self.coordinator.clone();
            let deadline = deadline.clone();
            let semaphore = semaphore.clone();
            let tenant_id = connection.tenant_id;
            let request = PlanSyncRequest {
                resume: true,
                lookback_days,
                ..Default::default()
            };

            set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return TenantSweepResult {
                        tenant_id,
                        failure: Some("sweep semaphore closed".to_string()),
                        ..Default::default()
                    };
                };

                match coordinator.run(tenant_id, &request, deadline.as_ref()).await {
                    Ok(outcome) => TenantSweepResult {
                        tenant_id,
                        completed: outcome.results.completed,
                        timed_out: outcome.results.timed_out,
                        plans_processed: outcome.results.plans_processed,
                        failure: None,
                        errors: outcome.errors,
                    },
                    Err(e) => {
                        warn!(tenant_id = %tenant_id, error = %e, "Tenant sync failed during sweep");
                        TenantSweepResult {
                            tenant_id,
                            failure: Some(e.to_string()),
                            ..Default::default()
                        }
                    }
                }
            });
        }

        let mut results = SweepResults {
            connections: connections.len(),
            ..Default::default()
        };
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(tenant) => results.tenants.push(tenant),
                Err(e) => {
                    error!(error = %e, "Sweep task panicked");
                    results.failed += 1;
                }
            }
        }

        results.tenants.sort_by_key(|t| t.tenant_id);
        for tenant in &results.tenants {
            if tenant.failure.is_some() {
                results.failed += 1;
            } else if tenant.timed_out {
                results.timed_out += 1;
            } else if tenant.completed {
                results.completed += 1;
            }
        }

        counter!("plansync_sweeps_total").increment(1);
        info!(
            completed = results.completed,
            timed_out = results.timed_out,
            failed = results.failed,
            "Sweep finished"
        );

        Ok(results)
    }
}
