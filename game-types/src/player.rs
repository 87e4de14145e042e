use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Public view of an account. The password hash never leaves the
/// persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Player {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub is_admin: bool,
    pub created_at: String, // ISO 8601 string for simplicity
}

/// A player row together with its stored credential, as handed to the
/// account controller.
#[derive(Debug, Clone)]
pub struct PlayerRecord {
    pub player: Player,
    pub password_hash: String,
}
