//! # Sync engine
//!
//! Pulls plans, songs, rosters and schedules from the upstream API into local
//! storage. Plan sync ([`coordinator`]) is sequential per connection and
//! resumable through a persisted checkpoint; roster ([`roster`]) and schedule
//! ([`schedule`]) syncs run to completion; [`sweep`] fans plan sync out over
//! every active connection.
//!
//! Errors split in two: a [`SyncError`] aborts a run before or during setup,
//! while item-level fetch and write failures are collected as strings on the
//! outcome and the run carries on.

pub mod accumulator;
pub mod coordinator;
pub mod deadline;
pub mod people;
pub mod reconcile;
pub mod roster;
pub mod schedule;
pub mod sweep;
pub mod window;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder};
use thiserror::Error;
use uuid::Uuid;

use crate::classification::{CampusRef, is_collection_allowed};
use crate::config::{AppConfig, SyncConfig};
use crate::credentials::{CredentialError, CredentialVault};
use crate::crypto::TokenCipher;
use crate::models::{campus, connection};
use crate::repositories::ConnectionRepository;
use crate::upstream::{FetchError, FetchPolicy, RateLimitedFetcher, Resource, resources::paths};

pub use coordinator::{PlanSyncCoordinator, PlanSyncRequest, PlanSyncResults};
pub use deadline::{ExecutionDeadline, RunDeadline, WorkPosition};
pub use roster::{RosterSync, RosterSyncResults};
pub use schedule::{ScheduleSync, ScheduleSyncRequest, ScheduleSyncResults};
pub use sweep::{SweepResults, TenantSweepResult, TenantSweeper};

/// Errors that abort a sync run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no upstream connection for tenant")]
    ConnectionNotFound,
    #[error("invalid sync request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error("upstream listing failed: {0}")]
    Upstream(#[from] FetchError),
    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

/// Outcome envelope shared by every sync entry point.
#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub struct SyncOutcome<T> {
    pub results: T,
    /// Item-level failures that did not abort the run.
    pub errors: Vec<String>,
}

/// Handles shared by every sync entry point.
#[derive(Debug, Clone)]
pub struct SyncServices {
    pub db: Arc<DatabaseConnection>,
    pub vault: CredentialVault,
    pub fetcher: RateLimitedFetcher,
    pub settings: SyncConfig,
}

/// A service type that passed the allow-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    pub upstream_id: String,
    pub name: String,
}

impl SyncServices {
    /// Wires the vault, fetcher and repositories from configuration.
    pub fn from_config(config: &AppConfig, db: Arc<DatabaseConnection>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.upstream.request_timeout_seconds))
            .user_agent(concat!("plansync/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build upstream HTTP client")?;

        let cipher = TokenCipher::from_secret(config.token_encryption_key.as_deref());
        if !cipher.is_configured() {
            tracing::warn!("No token encryption key configured; stored credentials are unreadable");
        }
        let repo = ConnectionRepository::new(db.clone(), cipher);
        let vault = CredentialVault::new(
            repo,
            http.clone(),
            &config.upstream,
            config.sync.token_refresh_lead_seconds,
        );
        let fetcher = RateLimitedFetcher::new(
            http,
            &config.upstream.api_base,
            FetchPolicy::from(&config.fetch),
        )
        .context("invalid upstream API base URL")?;

        Ok(Self {
            db,
            vault,
            fetcher,
            settings: config.sync.clone(),
        })
    }

    pub fn connections(&self) -> &ConnectionRepository {
        self.vault.repository()
    }

    /// Loads the tenant's connection; absence is a setup error.
    pub async fn load_connection(&self, tenant_id: Uuid) -> Result<connection::Model, SyncError> {
        self.connections()
            .find_by_tenant(&tenant_id)
            .await?
            .ok_or(SyncError::ConnectionNotFound)
    }

    pub async fn load_campuses(&self, tenant_id: Uuid) -> Result<Vec<CampusRef>, SyncError> {
        let rows = campus::Entity::find()
            .filter(campus::Column::TenantId.eq(tenant_id))
            .order_by_asc(campus::Column::Name)
            .all(&*self.db)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| CampusRef {
                id: row.id,
                name: row.name,
            })
            .collect())
    }

    /// Lists the tenant's service types, keeps the allowed ones and orders
    /// them by upstream id so checkpoint indices stay stable between runs.
    ///
    /// Unlike per-item listings, a failure here aborts the run.
    pub async fn list_collections(
        &self,
        token: &str,
        campuses: &[CampusRef],
    ) -> Result<Vec<Collection>, SyncError> {
        let listing = self
            .fetcher
            .fetch_all_pages(token, &paths::service_types(), self.fetcher.policy().max_pages)
            .await;

        if let Some(error) = listing.error
            && listing.pages == 0
        {
            return Err(SyncError::Upstream(error));
        }

        let mut collections: Vec<Collection> = listing
            .data
            .iter()
            .filter_map(collection_from_resource)
            .filter(|c| is_collection_allowed(&c.name, campuses))
            .collect();
        collections.sort_by(|a, b| compare_upstream_ids(&a.upstream_id, &b.upstream_id));
        collections.dedup_by(|a, b| a.upstream_id == b.upstream_id);

        Ok(collections)
    }
}

fn collection_from_resource(resource: &Resource) -> Option<Collection> {
    Some(Collection {
        upstream_id: resource.id.clone(),
        name: resource.attr_string("name")?,
    })
}

/// Numeric ids compare numerically, anything else lexically after them.
pub fn compare_upstream_ids(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        (Ok(_), Err(_)) => std::cmp::Ordering::Less,
        (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}
