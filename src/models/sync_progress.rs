//! SyncProgress entity model
//!
//! Persisted checkpoint of a resumable sync run, keyed by
//! `(tenant_id, sync_type, range_key)`.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

pub const STATUS_IN_PROGRESS: &str = "in_progress";
pub const STATUS_COMPLETED: &str = "completed";

pub const SYNC_TYPE_PLANS: &str = "plans";

/// Range key used by every non-historical run.
pub const RANGE_INCREMENTAL: &str = "incremental";

/// SyncProgress entity
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "sync_progress")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub tenant_id: Uuid,

    /// Kind of run this checkpoint belongs to (currently `plans`)
    pub sync_type: String,

    /// `"<start>-<end>"` for historical backfills, `incremental` otherwise
    pub range_key: String,

    pub start_year: Option<i32>,
    pub end_year: Option<i32>,

    /// Lower bound of the fetch window of an incremental or full pass. A
    /// resumed pass keeps querying from here instead of recomputing it.
    pub window_start: Option<DateTimeWithTimeZone>,

    /// Run status (in_progress|completed)
    pub status: String,

    /// Index into the filtered, ordered collection list of the next unit
    pub current_collection_index: i32,

    /// Index into the current collection's ordered plan list of the next unit
    pub current_item_index: i32,

    pub plans_processed: i32,
    pub songs_processed: i32,
    pub links_written: i32,
    pub error_count: i32,
    pub error_message: Option<String>,

    pub started_at: DateTimeWithTimeZone,
    pub completed_at: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Range key for a historical backfill between two calendar years.
pub fn historical_range_key(start_year: i32, end_year: i32) -> String {
    format!("{start_year}-{end_year}")
}
