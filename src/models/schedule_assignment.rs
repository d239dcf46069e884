//! ScheduleAssignment entity model
//!
//! Who serves in which position on a given service date, as pulled by the
//! single-date schedule sync.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "schedule_assignments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Upstream plan team-member identifier
    pub upstream_id: String,
    pub plan_upstream_id: String,
    pub service_date: Date,
    pub team_upstream_id: Option<String>,
    pub team_name: Option<String>,
    /// worship|production|other
    pub team_type: String,
    pub position: String,
    pub person_name: Option<String>,
    pub email: Option<String>,
    /// Upstream confirmation status (C, U, D)
    pub status: Option<String>,
    pub campus_id: Option<Uuid>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
