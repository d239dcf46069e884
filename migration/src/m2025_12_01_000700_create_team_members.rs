//! Migration to create the team_members table.
//!
//! A row maps one person (by email) to one position on one upstream team. The
//! composite unique index enforces the "no duplicated (team, position, email)"
//! rule per tenant.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(TeamMembers::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TeamMembers::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(TeamMembers::TenantId).uuid().not_null())
                    .col(ColumnDef::new(TeamMembers::TeamName).text().not_null())
                    .col(ColumnDef::new(TeamMembers::Position).text().not_null())
                    .col(ColumnDef::new(TeamMembers::Email).text().not_null())
                    .col(ColumnDef::new(TeamMembers::Name).text().null())
                    .col(ColumnDef::new(TeamMembers::PhoneNumber).text().null())
                    .col(ColumnDef::new(TeamMembers::Birthday).date().null())
                    .col(ColumnDef::new(TeamMembers::CampusId).uuid().null())
                    .col(ColumnDef::new(TeamMembers::UpstreamPersonId).text().null())
                    .col(ColumnDef::new(TeamMembers::UserId).uuid().null())
                    .col(
                        ColumnDef::new(TeamMembers::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(TeamMembers::UpdatedAt)
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
                    .name("idx_team_members_tenant_team_position_email")
                    .table(TeamMembers::Table)
                    .col(TeamMembers::TenantId)
                    .col(TeamMembers::TeamName)
                    .col(TeamMembers::Position)
                    .col(TeamMembers::Email)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_team_members_tenant_team_position_email")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(TeamMembers::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum TeamMembers {
    Table,
    Id,
    TenantId,
    TeamName,
    Position,
    Email,
    Name,
    PhoneNumber,
    Birthday,
    CampusId,
    UpstreamPersonId,
    UserId,
    CreatedAt,
    UpdatedAt,
}
