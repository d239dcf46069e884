//! Migration to create the campuses table.
//!
//! Campuses are owned by the wider application; the sync engine only reads them
//! to classify upstream service types.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Campuses::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Campuses::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Campuses::TenantId).uuid().not_null())
                    .col(ColumnDef::new(Campuses::Name).text().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_campuses_tenant_id")
                    .table(Campuses::Table)
                    .col(Campuses::TenantId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Campuses::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Campuses {
    Table,
    Id,
    TenantId,
    Name,
}
