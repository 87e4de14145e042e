use sea_orm_migration::prelude::*;

use crate::m20240101_000001_create_players_table::Players;
use crate::m20240101_000002_create_rooms_table::Rooms;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Chats::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Chats::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Chats::RoomId).big_integer().not_null())
                    .col(ColumnDef::new(Chats::PlayerId).uuid().not_null())
                    .col(ColumnDef::new(Chats::Message).text().not_null())
                    .col(
                        ColumnDef::new(Chats::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_chats_room_id")
                            .from(Chats::Table, Chats::RoomId)
                            .to(Rooms::Table, Rooms::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_chats_player_id")
                            .from(Chats::Table, Chats::PlayerId)
                            .to(Players::Table, Players::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Room history is always read newest first
        manager
            .create_index(
                Index::create()
                    .name("idx_chats_room_created")
                    .table(Chats::Table)
                    .col(Chats::RoomId)
                    .col(Chats::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Chats::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Chats {
    Table,
    Id,
    RoomId,
    PlayerId,
    Message,
    CreatedAt,
}
