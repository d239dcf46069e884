//! Plan entity model
//!
//! Local projection of an upstream service plan. `(tenant_id, upstream_id)` is
//! the idempotent upsert key.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "plans")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub tenant_id: Uuid,

    /// Upstream plan identifier
    pub upstream_id: String,

    /// Upstream service type (collection) the plan belongs to
    pub service_type_upstream_id: String,
    pub service_type_name: String,

    /// Campus resolved by classification; `None` for network-wide services
    pub campus_id: Option<Uuid>,

    pub title: Option<String>,
    pub series_title: Option<String>,
    pub sort_date: Option<DateTimeWithTimeZone>,
    pub items_count: i32,
    pub upstream_updated_at: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::plan_song::Entity")]
    PlanSongs,
}

impl Related<super::plan_song::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PlanSongs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
