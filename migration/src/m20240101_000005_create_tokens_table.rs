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
                    .table(Tokens::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Tokens::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Tokens::Kind).string().not_null())
                    .col(ColumnDef::new(Tokens::OwnerId).uuid().not_null())
                    .col(ColumnDef::new(Tokens::Value).string().not_null())
                    .col(
                        ColumnDef::new(Tokens::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_tokens_owner_id")
                            .from(Tokens::Table, Tokens::OwnerId)
                            .to(Players::Table, Players::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Lookups by value on every validate
        manager
            .create_index(
                Index::create()
                    .name("idx_tokens_kind_value")
                    .table(Tokens::Table)
                    .col(Tokens::Kind)
                    .col(Tokens::Value)
                    .to_owned(),
            )
            .await?;

        // Expired sweep
        manager
            .create_index(
                Index::create()
                    .name("idx_tokens_kind_expires_at")
                    .table(Tokens::Table)
                    .col(Tokens::Kind)
                    .col(Tokens::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Tokens::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Tokens {
    Table,
    Id,
    Kind,
    OwnerId,
    Value,
    ExpiresAt,
}
