//! Migration to create the schedule_assignments table.
//!
//! Holds who is scheduled in which position for a given service date, as
//! pulled by the single-date roster sync.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ScheduleAssignments::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ScheduleAssignments::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ScheduleAssignments::TenantId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ScheduleAssignments::UpstreamId)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ScheduleAssignments::PlanUpstreamId)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ScheduleAssignments::ServiceDate)
                            .date()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ScheduleAssignments::TeamUpstreamId)
                            .text()
                            .null(),
                    )
                    .col(ColumnDef::new(ScheduleAssignments::TeamName).text().null())
                    .col(
                        ColumnDef::new(ScheduleAssignments::TeamType)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ScheduleAssignments::Position)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ScheduleAssignments::PersonName)
                            .text()
                            .null(),
                    )
                    .col(ColumnDef::new(ScheduleAssignments::Email).text().null())
                    .col(ColumnDef::new(ScheduleAssignments::Status).text().null())
                    .col(ColumnDef::new(ScheduleAssignments::CampusId).uuid().null())
                    .col(
                        ColumnDef::new(ScheduleAssignments::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ScheduleAssignments::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_schedule_assignments_tenant_upstream")
                    .table(ScheduleAssignments::Table)
                    .col(ScheduleAssignments::TenantId)
                    .col(ScheduleAssignments::UpstreamId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_schedule_assignments_tenant_date")
                    .table(ScheduleAssignments::Table)
                    .col(ScheduleAssignments::TenantId)
                    .col(ScheduleAssignments::ServiceDate)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ScheduleAssignments::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ScheduleAssignments {
    Table,
    Id,
    TenantId,
    UpstreamId,
    PlanUpstreamId,
    ServiceDate,
    TeamUpstreamId,
    TeamName,
    TeamType,
    Position,
    PersonName,
    Email,
    Status,
    CampusId,
    CreatedAt,
    UpdatedAt,
}
