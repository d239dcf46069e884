//! Migration to create the plans and songs tables.
//!
//! Both are local projections of upstream entities, keyed for idempotent upsert
//! on `(tenant_id, upstream_id)`.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Plans::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Plans::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Plans::TenantId).uuid().not_null())
                    .col(ColumnDef::new(Plans::UpstreamId).text().not_null())
                    .col(
                        ColumnDef::new(Plans::ServiceTypeUpstreamId)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Plans::ServiceTypeName).text().not_null())
                    .col(ColumnDef::new(Plans::CampusId).uuid().null())
                    .col(ColumnDef::new(Plans::Title).text().null())
                    .col(ColumnDef::new(Plans::SeriesTitle).text().null())
                    .col(
                        ColumnDef::new(Plans::SortDate)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Plans::ItemsCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Plans::UpstreamUpdatedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Plans::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Plans::UpdatedAt)
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
                    .name("idx_plans_tenant_upstream")
                    .table(Plans::Table)
                    .col(Plans::TenantId)
                    .col(Plans::UpstreamId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Songs::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Songs::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Songs::TenantId).uuid().not_null())
                    .col(ColumnDef::new(Songs::UpstreamId).text().not_null())
                    .col(ColumnDef::new(Songs::Title).text().not_null())
                    .col(ColumnDef::new(Songs::Author).text().null())
                    .col(ColumnDef::new(Songs::CcliNumber).text().null())
                    .col(ColumnDef::new(Songs::Themes).text().null())
                    .col(
                        ColumnDef::new(Songs::UpstreamUpdatedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Songs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Songs::UpdatedAt)
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
                    .name("idx_songs_tenant_upstream")
                    .table(Songs::Table)
                    .col(Songs::TenantId)
                    .col(Songs::UpstreamId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Songs::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Plans::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Plans {
    Table,
    Id,
    TenantId,
    UpstreamId,
    ServiceTypeUpstreamId,
    ServiceTypeName,
    CampusId,
    Title,
    SeriesTitle,
    SortDate,
    ItemsCount,
    UpstreamUpdatedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Songs {
    Table,
    Id,
    TenantId,
    UpstreamId,
    Title,
    Author,
    CcliNumber,
    Themes,
    UpstreamUpdatedAt,
    CreatedAt,
    UpdatedAt,
}
