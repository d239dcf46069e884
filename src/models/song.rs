//! Song entity model
//!
//! Local projection of an upstream song, upserted on `(tenant_id, upstream_id)`.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "songs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub upstream_id: String,
    pub title: String,
    pub author: Option<String>,
    pub ccli_number: Option<String>,
    /// Comma-separated theme tags as reported upstream
    pub themes: Option<String>,
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
