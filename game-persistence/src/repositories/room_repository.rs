use anyhow::Result;
use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use tracing::info;
use uuid::Uuid;

use crate::entities::{chats, prelude::*, rooms};
use game_types::{Chat, Room};

/// Rooms and the chat lines posted in them.
#[derive(Clone)]
pub struct RoomRepository {
    db: DatabaseConnection,
}

impl RoomRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    fn model_to_room(model: rooms::Model) -> Room {
        Room {
            id: model.id,
            name: model.name,
        }
    }

    fn model_to_chat(model: chats::Model) -> Chat {
        Chat {
            id: model.id,
            room_id: model.room_id,
            player_id: model.player_id,
            message: model.message,
            created_at: model.created_at.to_rfc3339(),
        }
    }

    pub async fn find_room(&self, id: i64) -> Result<Option<Room>> {
        let room = Rooms::find_by_id(id).one(&self.db).await?;
        Ok(room.map(Self::model_to_room))
    }

    pub async fn create_room(&self, room: Room) -> Result<Room> {
        let room_model = rooms::ActiveModel {
            id: sea_orm::ActiveValue::Set(room.id),
            name: sea_orm::ActiveValue::Set(room.name),
        };
        Rooms::insert(room_model).exec(&self.db).await?;

        self.find_room(room.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created room"))
    }

    /// Returns room `id`, creating it with `name` if it does not exist yet.
    pub async fn ensure_room(&self, id: i64, name: &str) -> Result<Room> {
        if let Some(room) = self.find_room(id).await? {
            return Ok(room);
        }

        info!("Creating room {} ({})", id, name);
        self.create_room(Room {
            id,
            name: name.to_string(),
        })
        .await
    }

    pub async fn add_chat(&self, chat: Chat) -> Result<Chat> {
        let created_at = DateTime::parse_from_rfc3339(&chat.created_at)?.with_timezone(&Utc);

        let chat_model = chats::ActiveModel {
            id: sea_orm::ActiveValue::Set(chat.id),
            room_id: sea_orm::ActiveValue::Set(chat.room_id),
            player_id: sea_orm::ActiveValue::Set(chat.player_id),
            message: sea_orm::ActiveValue::Set(chat.message),
            created_at: sea_orm::ActiveValue::Set(created_at),
        };
        let saved = Chats::insert(chat_model).exec(&self.db).await?;

        let created_chat = Chats::find_by_id(saved.last_insert_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created chat"))?;

        Ok(Self::model_to_chat(created_chat))
    }

    pub async fn find_chat(&self, id: Uuid) -> Result<Option<Chat>> {
        let chat = Chats::find_by_id(id).one(&self.db).await?;
        Ok(chat.map(Self::model_to_chat))
    }

    /// Every chat in the room, newest first.
    pub async fn chats(&self, room_id: i64) -> Result<Vec<Chat>> {
        let chats = Chats::find()
            .filter(chats::Column::RoomId.eq(room_id))
            .order_by_desc(chats::Column::CreatedAt)
            .all(&self.db)
            .await?;

        Ok(chats.into_iter().map(Self::model_to_chat).collect())
    }

    /// Chats posted at or after `after`, newest first.
    pub async fn chats_after(&self, room_id: i64, after: DateTime<Utc>) -> Result<Vec<Chat>> {
        let chats = Chats::find()
            .filter(chats::Column::RoomId.eq(room_id))
            .filter(chats::Column::CreatedAt.gte(after))
            .order_by_desc(chats::Column::CreatedAt)
            .all(&self.db)
            .await?;

        Ok(chats.into_iter().map(Self::model_to_chat).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::connect_to_memory_database;
    use crate::repositories::PlayerRepository;
    use chrono::TimeZone;
    use game_types::{Player, PlayerRecord};
    use migration::{Migrator, MigratorTrait};

    async fn setup_test_db() -> (RoomRepository, Uuid) {
        let db = connect_to_memory_database().await.unwrap();
        Migrator::up(&db, None).await.unwrap();

        let player_id = Uuid::new_v4();
        PlayerRepository::new(db.clone())
            .create_player(PlayerRecord {
                player: Player {
                    id: player_id,
                    username: "chatter".to_string(),
                    email: "chatter@example.com".to_string(),
                    is_admin: false,
                    created_at: Utc::now().to_rfc3339(),
                },
                password_hash: "hash".to_string(),
            })
            .await
            .unwrap();

        (RoomRepository::new(db), player_id)
    }

    fn chat_at(player_id: Uuid, room_id: i64, message: &str, at: DateTime<Utc>) -> Chat {
        Chat {
            id: Uuid::new_v4(),
            room_id,
            player_id,
            message: message.to_string(),
            created_at: at.to_rfc3339(),
        }
    }

    #[tokio::test]
    async fn test_ensure_room_creates_once() {
        let (repo, _) = setup_test_db().await;

        assert!(repo.find_room(0).await.unwrap().is_none());

        let lobby = repo.ensure_room(0, "Game Lobby").await.unwrap();
        assert_eq!(lobby, Room { id: 0, name: "Game Lobby".to_string() });

        // Existing name wins
        let again = repo.ensure_room(0, "Other Name").await.unwrap();
        assert_eq!(again.name, "Game Lobby");
    }

    #[tokio::test]
    async fn test_chats_newest_first() {
        let (repo, player_id) = setup_test_db().await;
        repo.ensure_room(0, "Lobby").await.unwrap();
        repo.ensure_room(7, "Side").await.unwrap();

        let base = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        for (i, message) in ["first", "second", "third"].iter().enumerate() {
            repo.add_chat(chat_at(
                player_id,
                0,
                message,
                base + chrono::Duration::minutes(i as i64),
            ))
            .await
            .unwrap();
        }
        repo.add_chat(chat_at(player_id, 7, "elsewhere", base))
            .await
            .unwrap();

        let chats = repo.chats(0).await.unwrap();
        let messages: Vec<_> = chats.iter().map(|c| c.message.as_str()).collect();
        assert_eq!(messages, vec!["third", "second", "first"]);
        assert_eq!(repo.chats(7).await.unwrap().len(), 1);
        assert!(repo.chats(99).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chats_after_is_inclusive() {
        let (repo, player_id) = setup_test_db().await;
        repo.ensure_room(0, "Lobby").await.unwrap();

        let base = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        for minutes in 0..4 {
            repo.add_chat(chat_at(
                player_id,
                0,
                &format!("m{}", minutes),
                base + chrono::Duration::minutes(minutes),
            ))
            .await
            .unwrap();
        }

        let after = repo
            .chats_after(0, base + chrono::Duration::minutes(2))
            .await
            .unwrap();
        let messages: Vec<_> = after.iter().map(|c| c.message.as_str()).collect();
        assert_eq!(messages, vec!["m3", "m2"]);

        let none = repo
            .chats_after(0, base + chrono::Duration::hours(1))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_chat_requires_room() {
        let (repo, player_id) = setup_test_db().await;
        let orphan = chat_at(player_id, 42, "nowhere", Utc::now());
        assert!(repo.add_chat(orphan).await.is_err());
    }

    #[tokio::test]
    async fn test_find_chat() {
        let (repo, player_id) = setup_test_db().await;
        repo.ensure_room(0, "Lobby").await.unwrap();

        let chat = repo
            .add_chat(chat_at(player_id, 0, "hello", Utc::now()))
            .await
            .unwrap();
        let found = repo.find_chat(chat.id).await.unwrap().unwrap();
        assert_eq!(found.message, "hello");
        assert!(repo.find_chat(Uuid::new_v4()).await.unwrap().is_none());
    }
}
