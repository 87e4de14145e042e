use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::{Chat, Mute, Player, Room};

/// Generic reply for errors and empty successes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Response {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PlayerReply {
    #[serde(flatten)]
    pub response: Response,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie_data: Option<String>,
}

impl PlayerReply {
    pub fn success() -> Self {
        Self {
            response: Response::ok(),
            ..Default::default()
        }
    }

    pub fn for_player(player: &Player) -> Self {
        Self {
            response: Response::ok(),
            id: Some(player.id),
            username: player.username.clone(),
            email: player.email.clone(),
            cookie_name: None,
            cookie_data: None,
        }
    }

    pub fn with_cookie(mut self, name: &str, data: String) -> Self {
        self.cookie_name = Some(name.to_string());
        self.cookie_data = Some(data);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TokenReply {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PingReply {
    #[serde(flatten)]
    pub response: Response,
    pub player_id: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ChatReply {
    #[serde(flatten)]
    pub response: Response,
    pub chat_id: Uuid,
    pub room_id: i64,
    pub player_id: Uuid,
    pub message: String,
    pub created: String,
}

impl From<&Chat> for ChatReply {
    fn from(chat: &Chat) -> Self {
        Self {
            response: Response::default(),
            chat_id: chat.id,
            room_id: chat.room_id,
            player_id: chat.player_id,
            message: chat.message.clone(),
            created: chat.created_at.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RoomReply {
    #[serde(flatten)]
    pub response: Response,
    pub room_id: i64,
    pub name: String,
    pub chats: Vec<ChatReply>,
}

impl RoomReply {
    pub fn new(room: &Room, chats: &[Chat]) -> Self {
        Self {
            response: Response::ok(),
            room_id: room.id,
            name: room.name.clone(),
            chats: chats.iter().map(ChatReply::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct MuteReply {
    #[serde(flatten)]
    pub response: Response,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub muted_id: Option<Uuid>,
}

impl From<&Mute> for MuteReply {
    fn from(mute: &Mute) -> Self {
        Self {
            response: Response::default(),
            muted_id: Some(mute.muted_id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct MutedReply {
    pub muted: Vec<MuteReply>,
}
