//! Expiring, single-use tokens scoped to an owning player.
//!
//! The same lifecycle backs both the forgot-password and the delete-account
//! flows; the [`TokenKind`] keeps the two sets apart in storage.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;

pub const TOKEN_LENGTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Forgot,
    Delete,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Forgot => "forgot",
            TokenKind::Delete => "delete",
        }
    }

    pub fn entity_type(&self) -> &'static str {
        match self {
            TokenKind::Forgot => "ForgotToken",
            TokenKind::Delete => "DeleteToken",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.entity_type())
    }
}

impl FromStr for TokenKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "forgot" => Ok(TokenKind::Forgot),
            "delete" => Ok(TokenKind::Delete),
            other => Err(format!("unknown token kind '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub owner: Uuid,
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl Token {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("no {kind} found with {key} of '{value}'")]
    NotFound {
        kind: TokenKind,
        key: &'static str,
        value: String,
    },
    #[error("multiple {kind}s found with {key} of '{value}'")]
    Ambiguous {
        kind: TokenKind,
        key: &'static str,
        value: String,
    },
    #[error("that token has expired")]
    Expired,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Random alphanumeric token value of [`TOKEN_LENGTH`] characters.
pub fn generate_value() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// Whether `value` has the shape of an issued token.
pub fn is_well_formed(value: &str) -> bool {
    value.len() == TOKEN_LENGTH && value.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Persistence seam for tokens. Implementations group tokens under their
/// owner and must not deduplicate by value.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn insert(&self, token: &Token) -> anyhow::Result<()>;

    async fn find_by_value(&self, kind: TokenKind, value: &str) -> anyhow::Result<Vec<Token>>;

    async fn find_by_owner(&self, kind: TokenKind, owner: Uuid) -> anyhow::Result<Vec<Token>>;

    async fn delete_by_owner(&self, kind: TokenKind, owner: Uuid) -> anyhow::Result<u64>;

    /// Deletes tokens whose expiry is strictly before `now`.
    async fn delete_expired(&self, kind: TokenKind, now: DateTime<Utc>) -> anyhow::Result<u64>;
}

/// In-process [`TokenStore`], used by tests and by tooling that runs
/// without a database.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: RwLock<Vec<Token>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tokens.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tokens.read().await.is_empty()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn insert(&self, token: &Token) -> anyhow::Result<()> {
        self.tokens.write().await.push(token.clone());
        Ok(())
    }

    async fn find_by_value(&self, kind: TokenKind, value: &str) -> anyhow::Result<Vec<Token>> {
        let tokens = self.tokens.read().await;
        Ok(tokens
            .iter()
            .filter(|t| t.kind == kind && t.value == value)
            .cloned()
            .collect())
    }

    async fn find_by_owner(&self, kind: TokenKind, owner: Uuid) -> anyhow::Result<Vec<Token>> {
        let tokens = self.tokens.read().await;
        Ok(tokens
            .iter()
            .filter(|t| t.kind == kind && t.owner == owner)
            .cloned()
            .collect())
    }

    async fn delete_by_owner(&self, kind: TokenKind, owner: Uuid) -> anyhow::Result<u64> {
        let mut tokens = self.tokens.write().await;
        let before = tokens.len();
        tokens.retain(|t| !(t.kind == kind && t.owner == owner));
        Ok((before - tokens.len()) as u64)
    }

    async fn delete_expired(&self, kind: TokenKind, now: DateTime<Utc>) -> anyhow::Result<u64> {
        let mut tokens = self.tokens.write().await;
        let before = tokens.len();
        tokens.retain(|t| !(t.kind == kind && t.expires_at < now));
        Ok((before - tokens.len()) as u64)
    }
}

/// Issues and checks tokens of one kind.
#[derive(Clone)]
pub struct TokenService {
    kind: TokenKind,
    store: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl TokenService {
    pub fn new(kind: TokenKind, store: Arc<dyn TokenStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            kind,
            store,
            clock,
            ttl: Duration::hours(24),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Replaces any tokens the owner already holds with a fresh one.
    pub async fn issue(&self, owner: Uuid) -> Result<Token, TokenError> {
        self.clear_for_owner(owner).await?;

        let token = Token {
            kind: self.kind,
            owner,
            value: generate_value(),
            expires_at: self.clock.now() + self.ttl,
        };
        self.store.insert(&token).await?;

        info!("Issued {} for owner {}", self.kind, owner);
        Ok(token)
    }

    pub async fn validate(&self, value: &str) -> Result<Token, TokenError> {
        self.clear_expired().await?;

        let matches = self.store.find_by_value(self.kind, value).await?;
        self.single(matches, "token", value)
    }

    /// The owner's current token, if exactly one unexpired token exists.
    pub async fn for_owner(&self, owner: Uuid) -> Result<Token, TokenError> {
        self.clear_expired().await?;

        let matches = self.store.find_by_owner(self.kind, owner).await?;
        self.single(matches, "owner", &owner.to_string())
    }

    /// Validates the token and then clears every token of its owner.
    pub async fn consume(&self, value: &str) -> Result<Token, TokenError> {
        let token = self.validate(value).await?;
        self.clear_for_owner(token.owner).await?;
        Ok(token)
    }

    pub async fn clear_for_owner(&self, owner: Uuid) -> Result<u64, TokenError> {
        let removed = self.store.delete_by_owner(self.kind, owner).await?;
        if removed > 0 {
            debug!("Cleared {} {}(s) for owner {}", removed, self.kind, owner);
        }
        Ok(removed)
    }

    pub async fn clear_expired(&self) -> Result<u64, TokenError> {
        let removed = self
            .store
            .delete_expired(self.kind, self.clock.now())
            .await?;
        if removed > 0 {
            debug!("Swept {} expired {}(s)", removed, self.kind);
        }
        Ok(removed)
    }

    fn single(
        &self,
        mut matches: Vec<Token>,
        key: &'static str,
        value: &str,
    ) -> Result<Token, TokenError> {
        if matches.len() > 1 {
            warn!("{} {}s share {} '{}'", matches.len(), self.kind, key, value);
            return Err(TokenError::Ambiguous {
                kind: self.kind,
                key,
                value: value.to_string(),
            });
        }

        let token = matches.pop().ok_or_else(|| TokenError::NotFound {
            kind: self.kind,
            key,
            value: value.to_string(),
        })?;

        // The sweep and the lookup are separate store calls.
        if token.is_expired_at(self.clock.now()) {
            return Err(TokenError::Expired);
        }

        Ok(token)
    }
}

impl fmt::Debug for TokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenService")
            .field("kind", &self.kind)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
