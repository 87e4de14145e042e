use sea_orm_migration::prelude::*;

use crate::m20240101_000001_create_players_table::Players;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Mutes::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Mutes::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Mutes::PlayerId).uuid().not_null())
                    .col(ColumnDef::new(Mutes::MutedId).uuid().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_mutes_player_id")
                            .from(Mutes::Table, Mutes::PlayerId)
                            .to(Players::Table, Players::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_mutes_player_muted")
                    .table(Mutes::Table)
                    .col(Mutes::PlayerId)
                    .col(Mutes::MutedId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Mutes::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Mutes {
    Table,
    Id,
    PlayerId,
    MutedId,
}
