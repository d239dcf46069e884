//! Migration to create the sync_progress table.
//!
//! Each row is the resumable checkpoint of one (tenant, sync type, range) key.
//! The unique index guarantees a single record, and therefore at most one
//! `in_progress` run, per key.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncProgress::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SyncProgress::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SyncProgress::TenantId).uuid().not_null())
                    .col(ColumnDef::new(SyncProgress::SyncType).text().not_null())
                    .col(ColumnDef::new(SyncProgress::RangeKey).text().not_null())
                    .col(ColumnDef::new(SyncProgress::StartYear).integer().null())
                    .col(ColumnDef::new(SyncProgress::EndYear).integer().null())
                    .col(
                        ColumnDef::new(SyncProgress::WindowStart)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncProgress::Status)
                            .text()
                            .not_null()
                            .default("in_progress"),
                    )
                    .col(
                        ColumnDef::new(SyncProgress::CurrentCollectionIndex)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncProgress::CurrentItemIndex)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncProgress::PlansProcessed)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncProgress::SongsProcessed)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncProgress::LinksWritten)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncProgress::ErrorCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(SyncProgress::ErrorMessage).text().null())
                    .col(
                        ColumnDef::new(SyncProgress::StartedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncProgress::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncProgress::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SyncProgress::UpdatedAt)
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
                    .name("idx_sync_progress_tenant_type_range")
                    .table(SyncProgress::Table)
                    .col(SyncProgress::TenantId)
                    .col(SyncProgress::SyncType)
                    .col(SyncProgress::RangeKey)
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
                    .name("idx_sync_progress_tenant_type_range")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(SyncProgress::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SyncProgress {
    Table,
    Id,
    TenantId,
    SyncType,
    RangeKey,
    StartYear,
    EndYear,
    WindowStart,
    Status,
    CurrentCollectionIndex,
    CurrentItemIndex,
    PlansProcessed,
    SongsProcessed,
    LinksWritten,
    ErrorCount,
    ErrorMessage,
    StartedAt,
    CompletedAt,
    CreatedAt,
    UpdatedAt,
}
