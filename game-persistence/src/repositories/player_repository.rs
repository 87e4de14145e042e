use anyhow::Result;
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter, TransactionTrait,
};
use tracing::info;
use uuid::Uuid;

use crate::entities::{chats, mutes, players, prelude::*, tokens};
use game_types::{Player, PlayerRecord};

#[derive(Clone)]
pub struct PlayerRepository {
    db: DatabaseConnection,
}

impl PlayerRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    fn model_to_record(model: players::Model) -> PlayerRecord {
        PlayerRecord {
            player: Player {
                id: model.id,
                username: model.username,
                email: model.email,
                is_admin: model.is_admin,
                created_at: model.created_at.to_rfc3339(),
            },
            password_hash: model.password_hash,
        }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<PlayerRecord>> {
        let player_model = Players::find_by_id(id).one(&self.db).await?;
        Ok(player_model.map(Self::model_to_record))
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<PlayerRecord>> {
        let player_model = Players::find()
            .filter(players::Column::Email.eq(email))
            .one(&self.db)
            .await?;

        Ok(player_model.map(Self::model_to_record))
    }

    pub async fn create_player(&self, record: PlayerRecord) -> Result<PlayerRecord> {
        let created_at = chrono::DateTime::parse_from_rfc3339(&record.player.created_at)?
            .with_timezone(&chrono::Utc);

        let player_model = players::ActiveModel {
            id: sea_orm::ActiveValue::Set(record.player.id),
            username: sea_orm::ActiveValue::Set(record.player.username),
            email: sea_orm::ActiveValue::Set(record.player.email),
            password_hash: sea_orm::ActiveValue::Set(record.password_hash),
            is_admin: sea_orm::ActiveValue::Set(record.player.is_admin),
            created_at: sea_orm::ActiveValue::Set(created_at),
            updated_at: sea_orm::ActiveValue::Set(created_at),
        };

        let saved_model = Players::insert(player_model).exec(&self.db).await?;

        let created_player = Players::find_by_id(saved_model.last_insert_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created player"))?;

        Ok(Self::model_to_record(created_player))
    }

    /// Saves the mutable account fields of `record`.
    pub async fn update_player(&self, record: PlayerRecord) -> Result<PlayerRecord> {
        let existing = Players::find_by_id(record.player.id)
            .one(&self.db)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Player not found"))?;

        let updated_player = players::ActiveModel {
            id: sea_orm::ActiveValue::Unchanged(existing.id),
            username: sea_orm::ActiveValue::Set(record.player.username),
            email: sea_orm::ActiveValue::Set(record.player.email),
            password_hash: sea_orm::ActiveValue::Set(record.password_hash),
            is_admin: sea_orm::ActiveValue::Set(record.player.is_admin),
            created_at: sea_orm::ActiveValue::Unchanged(existing.created_at),
            updated_at: sea_orm::ActiveValue::Set(chrono::Utc::now()),
        };

        let saved = Players::update(updated_player).exec(&self.db).await?;
        Ok(Self::model_to_record(saved))
    }

    /// Deletes the player together with everything stored under them.
    /// Returns false when no such player exists.
    pub async fn delete_player(&self, id: Uuid) -> Result<bool> {
        let txn = self.db.begin().await?;

        Tokens::delete_many()
            .filter(tokens::Column::OwnerId.eq(id))
            .exec(&txn)
            .await?;
        Mutes::delete_many()
            .filter(
                Condition::any()
                    .add(mutes::Column::PlayerId.eq(id))
                    .add(mutes::Column::MutedId.eq(id)),
            )
            .exec(&txn)
            .await?;
        Chats::delete_many()
            .filter(chats::Column::PlayerId.eq(id))
            .exec(&txn)
            .await?;
        let result = Players::delete_by_id(id).exec(&txn).await?;

        txn.commit().await?;

        if result.rows_affected > 0 {
            info!("Deleted player {}", id);
        }
        Ok(result.rows_affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::connect_to_memory_database;
    use crate::repositories::{MuteRepository, RoomRepository, TokenRepository};
    use game_core::token::{Token, TokenKind, TokenStore};
    use game_types::Chat;
    use migration::{Migrator, MigratorTrait};

    async fn setup_test_db() -> DatabaseConnection {
        let db = connect_to_memory_database().await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        db
    }

    fn record(email: &str) -> PlayerRecord {
        PlayerRecord {
            player: Player {
                id: Uuid::new_v4(),
                username: "Test Player".to_string(),
                email: email.to_string(),
                is_admin: false,
                created_at: "2024-03-01T12:00:00+00:00".to_string(),
            },
            password_hash: "$argon2id$stub".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_rejects_bad_timestamp() {
        let repo = PlayerRepository::new(setup_test_db().await);
        let mut bad = record("clock@example.com");
        bad.player.created_at = "yesterday".to_string();

        assert!(repo.create_player(bad).await.is_err());
        assert!(repo.find_by_email("clock@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_and_find_player() {
        let repo = PlayerRepository::new(setup_test_db().await);

        let player = record("test@example.com");
        let player_id = player.player.id;

        let created = repo.create_player(player.clone()).await.unwrap();
        assert_eq!(created.player.email, "test@example.com");
        assert_eq!(created.password_hash, player.password_hash);
        assert!(created.player.created_at.starts_with("2024-03-01T12:00:00"));

        let found = repo.find_by_id(player_id).await.unwrap().unwrap();
        assert_eq!(found.player.username, "Test Player");

        let by_email = repo
            .find_by_email("test@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_email.player.id, player_id);

        assert!(repo.find_by_email("nobody@example.com").await.unwrap().is_none());
        assert!(repo.find_by_id(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_email_is_unique() {
        let repo = PlayerRepository::new(setup_test_db().await);

        repo.create_player(record("dup@example.com")).await.unwrap();
        assert!(repo.create_player(record("dup@example.com")).await.is_err());
    }

    #[tokio::test]
    async fn test_update_player() {
        let repo = PlayerRepository::new(setup_test_db().await);

        let mut player = repo.create_player(record("old@example.com")).await.unwrap();
        player.player.email = "new@example.com".to_string();
        player.password_hash = "$argon2id$other".to_string();

        let updated = repo.update_player(player.clone()).await.unwrap();
        assert_eq!(updated.player.email, "new@example.com");
        assert_eq!(updated.password_hash, "$argon2id$other");
        assert_eq!(updated.player.created_at, player.player.created_at);

        assert!(repo.find_by_email("old@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_missing_player_fails() {
        let repo = PlayerRepository::new(setup_test_db().await);
        assert!(repo.update_player(record("ghost@example.com")).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_player_removes_owned_rows() {
        let db = setup_test_db().await;
        let players = PlayerRepository::new(db.clone());
        let rooms = RoomRepository::new(db.clone());
        let mutes = MuteRepository::new(db.clone());
        let tokens = TokenRepository::new(db.clone());

        let doomed = players.create_player(record("doomed@example.com")).await.unwrap();
        let other = players.create_player(record("other@example.com")).await.unwrap();
        let doomed_id = doomed.player.id;
        let other_id = other.player.id;

        rooms.ensure_room(0, "Game Lobby").await.unwrap();
        rooms
            .add_chat(Chat {
                id: Uuid::new_v4(),
                room_id: 0,
                player_id: doomed_id,
                message: "bye".to_string(),
                created_at: chrono::Utc::now().to_rfc3339(),
            })
            .await
            .unwrap();
        mutes.mute(doomed_id, other_id).await.unwrap();
        mutes.mute(other_id, doomed_id).await.unwrap();
        tokens
            .insert(&Token {
                kind: TokenKind::Delete,
                owner: doomed_id,
                value: "a".repeat(64),
                expires_at: chrono::Utc::now() + chrono::Duration::hours(1),
            })
            .await
            .unwrap();

        assert!(players.delete_player(doomed_id).await.unwrap());

        assert!(players.find_by_id(doomed_id).await.unwrap().is_none());
        assert!(players.find_by_id(other_id).await.unwrap().is_some());
        assert!(rooms.chats(0).await.unwrap().is_empty());
        assert!(mutes.muted_by(other_id).await.unwrap().is_empty());
        assert!(
            tokens
                .find_by_owner(TokenKind::Delete, doomed_id)
                .await
                .unwrap()
                .is_empty()
        );

        // Second delete is a no-op
        assert!(!players.delete_player(doomed_id).await.unwrap());
    }
}
