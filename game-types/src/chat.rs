use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Room 0 is the lobby and is created on first use.
pub const LOBBY_ROOM_ID: i64 = 0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Room {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Chat {
    pub id: Uuid,
    pub room_id: i64,
    pub player_id: Uuid,
    pub message: String,
    pub created_at: String, // ISO 8601 string
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Mute {
    pub id: Uuid,
    pub player_id: Uuid,
    pub muted_id: Uuid,
}
