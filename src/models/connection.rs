//! Connection entity model
//!
//! This module contains the SeaORM entity model for the connections table,
//! which stores each tenant's authorization to the upstream scheduling API
//! together with its per-feature sync toggles.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

/// Connection is usable for upstream calls.
pub const STATUS_ACTIVE: &str = "active";
/// The upstream rejected the refresh token; the user must reconnect.
pub const STATUS_REAUTH_REQUIRED: &str = "reauth_required";

/// Connection entity representing a tenant's link to the upstream account
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "connections")]
pub struct Model {
    /// Unique identifier for the connection (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Tenant identifier; at most one connection per tenant
    pub tenant_id: Uuid,

    /// Organization name reported by the upstream account
    pub organization_name: Option<String>,

    /// AEAD ciphertext of the current access token
    pub access_token_ciphertext: Option<Vec<u8>>,

    /// AEAD ciphertext of the current refresh token
    pub refresh_token_ciphertext: Option<Vec<u8>>,

    /// Access token expiry; `None` is treated as already expired
    pub expires_at: Option<DateTimeWithTimeZone>,

    /// Campus assigned to collections that match no campus name
    pub default_campus_id: Option<Uuid>,

    pub sync_team_members: bool,
    pub sync_positions: bool,
    pub sync_birthdays: bool,
    pub sync_phone_numbers: bool,
    pub active_only: bool,

    /// Connection status (active|reauth_required)
    pub status: String,

    /// Watermark of the last completed non-historical plan sync
    pub last_synced_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Whether the upstream API may be called with this connection.
    pub fn is_usable(&self) -> bool {
        self.status == STATUS_ACTIVE
            && self.access_token_ciphertext.is_some()
            && self.refresh_token_ciphertext.is_some()
    }
}
