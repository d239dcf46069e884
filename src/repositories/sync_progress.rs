//! Sync progress repository
//!
//! Reads and writes the checkpoint row of a resumable run. Callers are
//! expected to be the only writer for a given `(tenant, sync_type, range_key)`
//! key; the scheduling layer must not start two runs for the same key.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::sync_progress::{self, Entity as SyncProgress};

/// Position and cumulative counters persisted at every checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Checkpoint {
    pub collection_index: i32,
    pub item_index: i32,
    pub plans_processed: i32,
    pub songs_processed: i32,
    pub links_written: i32,
    pub error_count: i32,
    pub error_message: Option<String>,
}

impl Checkpoint {
    /// Restores the checkpoint stored on a progress row.
    pub fn from_model(model: &sync_progress::Model) -> Self {
        Self {
            collection_index: model.current_collection_index,
            item_index: model.current_item_index,
            plans_processed: model.plans_processed,
            songs_processed: model.songs_processed,
            links_written: model.links_written,
            error_count: model.error_count,
            error_message: model.error_message.clone(),
        }
    }
}

/// Identifies one progress record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressKey {
    pub tenant_id: Uuid,
    pub sync_type: String,
    pub range_key: String,
    pub start_year: Option<i32>,
    pub end_year: Option<i32>,
    /// Window start to pin for the pass; `None` for historical ranges
    pub window_start: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct SyncProgressRepository {
    db: Arc<DatabaseConnection>,
}

impl SyncProgressRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Finds the record for a key, if any
    pub async fn find(&self, key: &ProgressKey) -> Result<Option<sync_progress::Model>> {
        Ok(SyncProgress::find()
            .filter(sync_progress::Column::TenantId.eq(key.tenant_id))
            .filter(sync_progress::Column::SyncType.eq(key.sync_type.as_str()))
            .filter(sync_progress::Column::RangeKey.eq(key.range_key.as_str()))
            .one(&*self.db)
            .await?)
    }

    /// Creates a fresh `in_progress` record at 0/0
    pub async fn create(&self, key: &ProgressKey) -> Result<sync_progress::Model> {
        let now = Utc::now().into();
        let id = Uuid::new_v4();
        let model = sync_progress::ActiveModel {
            id: Set(id),
            tenant_id: Set(key.tenant_id),
            sync_type: Set(key.sync_type.clone()),
            range_key: Set(key.range_key.clone()),
            start_year: Set(key.start_year),
            end_year: Set(key.end_year),
            window_start: Set(key.window_start.map(Into::into)),
            status: Set(sync_progress::STATUS_IN_PROGRESS.to_string()),
            current_collection_index: Set(0),
            current_item_index: Set(0),
            plans_processed: Set(0),
            songs_processed: Set(0),
            links_written: Set(0),
            error_count: Set(0),
            error_message: Set(None),
            started_at: Set(now),
            completed_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        SyncProgress::insert(model)
            .exec_without_returning(&*self.db)
            .await?;

        SyncProgress::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| anyhow!("sync progress not persisted"))
    }

    /// Restarts an existing record as a new `in_progress` pass at 0/0
    pub async fn restart(
        &self,
        existing: sync_progress::Model,
        window_start: Option<DateTime<Utc>>,
    ) -> Result<sync_progress::Model> {
        let now = Utc::now().into();
        let mut model: sync_progress::ActiveModel = existing.into();
        model.window_start = Set(window_start.map(Into::into));
        model.status = Set(sync_progress::STATUS_IN_PROGRESS.to_string());
        model.current_collection_index = Set(0);
        model.current_item_index = Set(0);
        model.plans_processed = Set(0);
        model.songs_processed = Set(0);
        model.links_written = Set(0);
        model.error_count = Set(0);
        model.error_message = Set(None);
        model.started_at = Set(now);
        model.completed_at = Set(None);
        model.updated_at = Set(now);
        Ok(model.update(&*self.db).await?)
    }

    /// Persists a checkpoint, leaving the record `in_progress`
    pub async fn save_checkpoint(
        &self,
        id: Uuid,
        checkpoint: &Checkpoint,
    ) -> Result<sync_progress::Model> {
        self.write(id, checkpoint, None).await
    }

    /// Persists the final counters and marks the record `completed`
    pub async fn mark_completed(
        &self,
        id: Uuid,
        checkpoint: &Checkpoint,
    ) -> Result<sync_progress::Model> {
        self.write(id, checkpoint, Some(sync_progress::STATUS_COMPLETED))
            .await
    }

    async fn write(
        &self,
        id: Uuid,
        checkpoint: &Checkpoint,
        status: Option<&str>,
    ) -> Result<sync_progress::Model> {
        let existing = SyncProgress::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| anyhow!("sync progress '{}' not found", id))?;

        let now = Utc::now();
        let mut model: sync_progress::ActiveModel = existing.into();
        model.current_collection_index = Set(checkpoint.collection_index);
        model.current_item_index = Set(checkpoint.item_index);
        model.plans_processed = Set(checkpoint.plans_processed);
        model.songs_processed = Set(checkpoint.songs_processed);
        model.links_written = Set(checkpoint.links_written);
        model.error_count = Set(checkpoint.error_count);
        model.error_message = Set(checkpoint.error_message.clone());
        if let Some(status) = status {
            model.status = Set(status.to_string());
            if status == sync_progress::STATUS_COMPLETED {
                model.completed_at = Set(Some(now.into()));
            }
        }
        model.updated_at = Set(now.into());

        Ok(model.update(&*self.db).await?)
    }

    /// Lists all records for a tenant, most recently updated first
    pub async fn list_by_tenant(&self, tenant_id: &Uuid) -> Result<Vec<sync_progress::Model>> {
        Ok(SyncProgress::find()
            .filter(sync_progress::Column::TenantId.eq(*tenant_id))
            .order_by_desc(sync_progress::Column::UpdatedAt)
            .order_by_asc(sync_progress::Column::RangeKey)
            .all(&*self.db)
            .await?)
    }
}
