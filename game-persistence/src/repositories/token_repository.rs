use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use uuid::Uuid;

use crate::entities::{prelude::*, tokens};
use game_core::token::{Token, TokenKind, TokenStore};

/// Database-backed [`TokenStore`]. Tokens of every kind share one table.
#[derive(Clone)]
pub struct TokenRepository {
    db: DatabaseConnection,
}

impl TokenRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    fn model_to_token(model: tokens::Model) -> Result<Token> {
        let kind = model
            .kind
            .parse::<TokenKind>()
            .map_err(|e| anyhow::anyhow!(e))?;

        Ok(Token {
            kind,
            owner: model.owner_id,
            value: model.value,
            expires_at: model.expires_at,
        })
    }

    fn models_to_tokens(models: Vec<tokens::Model>) -> Result<Vec<Token>> {
        models.into_iter().map(Self::model_to_token).collect()
    }
}

#[async_trait]
impl TokenStore for TokenRepository {
    async fn insert(&self, token: &Token) -> Result<()> {
        let token_model = tokens::ActiveModel {
            id: sea_orm::ActiveValue::Set(Uuid::new_v4()),
            kind: sea_orm::ActiveValue::Set(token.kind.as_str().to_string()),
            owner_id: sea_orm::ActiveValue::Set(token.owner),
            value: sea_orm::ActiveValue::Set(token.value.clone()),
            expires_at: sea_orm::ActiveValue::Set(token.expires_at),
        };
        Tokens::insert(token_model).exec(&self.db).await?;
        Ok(())
    }

    async fn find_by_value(&self, kind: TokenKind, value: &str) -> Result<Vec<Token>> {
        let models = Tokens::find()
            .filter(tokens::Column::Kind.eq(kind.as_str()))
            .filter(tokens::Column::Value.eq(value))
            .all(&self.db)
            .await?;
        Self::models_to_tokens(models)
    }

    async fn find_by_owner(&self, kind: TokenKind, owner: Uuid) -> Result<Vec<Token>> {
        let models = Tokens::find()
            .filter(tokens::Column::Kind.eq(kind.as_str()))
            .filter(tokens::Column::OwnerId.eq(owner))
            .all(&self.db)
            .await?;
        Self::models_to_tokens(models)
    }

    async fn delete_by_owner(&self, kind: TokenKind, owner: Uuid) -> Result<u64> {
        let result = Tokens::delete_many()
            .filter(tokens::Column::Kind.eq(kind.as_str()))
            .filter(tokens::Column::OwnerId.eq(owner))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }

    async fn delete_expired(&self, kind: TokenKind, now: DateTime<Utc>) -> Result<u64> {
        let result = Tokens::delete_many()
            .filter(tokens::Column::Kind.eq(kind.as_str()))
            .filter(tokens::Column::ExpiresAt.lt(now))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }
}
