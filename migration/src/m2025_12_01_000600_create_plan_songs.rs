//! Migration to create the plan_songs linking table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PlanSongs::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(PlanSongs::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(PlanSongs::PlanId).uuid().not_null())
                    .col(ColumnDef::new(PlanSongs::SongId).uuid().not_null())
                    .col(ColumnDef::new(PlanSongs::Position).integer().not_null())
                    .col(ColumnDef::new(PlanSongs::KeyName).text().null())
                    .col(
                        ColumnDef::new(PlanSongs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_plan_songs_plan_id")
                            .from(PlanSongs::Table, PlanSongs::PlanId)
                            .to(Plans::Table, Plans::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_plan_songs_song_id")
                            .from(PlanSongs::Table, PlanSongs::SongId)
                            .to(Songs::Table, Songs::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_plan_songs_plan_id")
                    .table(PlanSongs::Table)
                    .col(PlanSongs::PlanId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_plan_songs_plan_id").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(PlanSongs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum PlanSongs {
    Table,
    Id,
    PlanId,
    SongId,
    Position,
    KeyName,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Plans {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Songs {
    Table,
    Id,
}
