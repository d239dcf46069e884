//! # Data Models
//!
//! SeaORM entities for every table the sync engine reads or writes.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod campus;
pub mod connection;
pub mod plan;
pub mod plan_song;
pub mod profile;
pub mod schedule_assignment;
pub mod song;
pub mod sync_progress;
pub mod team_member;

pub use campus::Entity as Campus;
pub use connection::Entity as Connection;
pub use plan::Entity as Plan;
pub use plan_song::Entity as PlanSong;
pub use profile::Entity as Profile;
pub use schedule_assignment::Entity as ScheduleAssignment;
pub use song::Entity as Song;
pub use sync_progress::Entity as SyncProgress;
pub use team_member::Entity as TeamMember;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "plansync".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
