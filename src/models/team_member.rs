//! TeamMember entity model
//!
//! Maps a person (by email) to a position on an upstream team. Unique on
//! `(tenant_id, team_name, position, email)`.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "team_members")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub team_name: String,
    /// Local position code, see [`crate::classification::Position`]
    pub position: String,
    pub email: String,
    pub name: Option<String>,
    pub phone_number: Option<String>,
    pub birthday: Option<Date>,
    pub campus_id: Option<Uuid>,
    pub upstream_person_id: Option<String>,
    /// Application user matched by email. Only ever set while still null.
    pub user_id: Option<Uuid>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
