use anyhow::Result;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use uuid::Uuid;

use crate::entities::{mutes, prelude::*};
use game_types::Mute;

#[derive(Clone)]
pub struct MuteRepository {
    db: DatabaseConnection,
}

impl MuteRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    fn model_to_mute(model: mutes::Model) -> Mute {
        Mute {
            id: model.id,
            player_id: model.player_id,
            muted_id: model.muted_id,
        }
    }

    /// Everyone `player_id` has muted.
    pub async fn muted_by(&self, player_id: Uuid) -> Result<Vec<Mute>> {
        let mutes = Mutes::find()
            .filter(mutes::Column::PlayerId.eq(player_id))
            .all(&self.db)
            .await?;

        Ok(mutes.into_iter().map(Self::model_to_mute).collect())
    }

    pub async fn find(&self, player_id: Uuid, muted_id: Uuid) -> Result<Option<Mute>> {
        let mute = Mutes::find()
            .filter(mutes::Column::PlayerId.eq(player_id))
            .filter(mutes::Column::MutedId.eq(muted_id))
            .one(&self.db)
            .await?;

        Ok(mute.map(Self::model_to_mute))
    }

    /// Records the mute, or returns the existing one for the same pair.
    pub async fn mute(&self, player_id: Uuid, muted_id: Uuid) -> Result<Mute> {
        if let Some(existing) = self.find(player_id, muted_id).await? {
            return Ok(existing);
        }

        let mute_model = mutes::ActiveModel {
            id: sea_orm::ActiveValue::Set(Uuid::new_v4()),
            player_id: sea_orm::ActiveValue::Set(player_id),
            muted_id: sea_orm::ActiveValue::Set(muted_id),
        };
        let saved = Mutes::insert(mute_model).exec(&self.db).await?;

        let created = Mutes::find_by_id(saved.last_insert_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created mute"))?;

        Ok(Self::model_to_mute(created))
    }

    /// Returns whether a mute was removed.
    pub async fn unmute(&self, player_id: Uuid, muted_id: Uuid) -> Result<bool> {
        let result = Mutes::delete_many()
            .filter(mutes::Column::PlayerId.eq(player_id))
            .filter(mutes::Column::MutedId.eq(muted_id))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected > 0)
    }
}
