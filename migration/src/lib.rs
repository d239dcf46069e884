//! Database migrations for the plansync engine.
//!
//! Creates the tables the synchronization engine reads and writes. Tables owned
//! by the wider application (campuses, profiles) are created here only so the
//! engine can run and be tested standalone.

pub use sea_orm_migration::prelude::*;

mod m2025_12_01_000100_create_connections;
mod m2025_12_01_000200_create_campuses;
mod m2025_12_01_000300_create_profiles;
mod m2025_12_01_000400_create_sync_progress;
mod m2025_12_01_000500_create_plans_and_songs;
mod m2025_12_01_000600_create_plan_songs;
mod m2025_12_01_000700_create_team_members;
mod m2025_12_01_000800_create_schedule_assignments;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_12_01_000100_create_connections::Migration),
            Box::new(m2025_12_01_000200_create_campuses::Migration),
            Box::new(m2025_12_01_000300_create_profiles::Migration),
            Box::new(m2025_12_01_000400_create_sync_progress::Migration),
            Box::new(m2025_12_01_000500_create_plans_and_songs::Migration),
            Box::new(m2025_12_01_000600_create_plan_songs::Migration),
            Box::new(m2025_12_01_000700_create_team_members::Migration),
            Box::new(m2025_12_01_000800_create_schedule_assignments::Migration),
        ]
    }
}
