use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use game_core::clock::Clock;
use game_persistence::{MuteRepository, RoomRepository};
use game_types::{
    Chat, ChatReply, LOBBY_ROOM_ID, Mute, MuteReply, MutedReply, Response, Room, RoomReply,
};
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;
use warp::Filter;

use crate::error::{ApiError, required};
use crate::session::{Authenticated, with_player};
use crate::{AppState, FORM_LIMIT, with_state};

/// URL timestamp format for `/room/{id}/after/{time}`.
pub const AFTER_FORMAT: &str = "%Y%m%d%H%M%S";

pub struct ChatController {
    rooms: RoomRepository,
    mutes: MuteRepository,
    clock: Arc<dyn Clock>,
    lobby_name: String,
}

impl ChatController {
    pub fn new(
        rooms: RoomRepository,
        mutes: MuteRepository,
        clock: Arc<dyn Clock>,
        lobby_name: impl Into<String>,
    ) -> Self {
        Self {
            rooms,
            mutes,
            clock,
            lobby_name: lobby_name.into(),
        }
    }

    /// Looks the room up; the lobby is created on first use.
    pub async fn room(&self, room_id: i64) -> Result<Room, ApiError> {
        if room_id == LOBBY_ROOM_ID {
            return Ok(self.rooms.ensure_room(room_id, &self.lobby_name).await?);
        }

        self.rooms
            .find_room(room_id)
            .await?
            .ok_or_else(|| ApiError::NotFound {
                entity: "Room",
                key: "id",
                value: room_id.to_string(),
            })
    }

    pub async fn add_chat(
        &self,
        room_id: i64,
        player_id: Uuid,
        message: &str,
    ) -> Result<Chat, ApiError> {
        if message.trim().is_empty() {
            return Err(ApiError::MissingField("message"));
        }

        let room = self.room(room_id).await?;
        let chat = self
            .rooms
            .add_chat(Chat {
                id: Uuid::new_v4(),
                room_id: room.id,
                player_id,
                message: message.to_string(),
                created_at: self.clock.now().to_rfc3339(),
            })
            .await?;

        debug!("Player {} chatted in room {}", player_id, room.id);
        Ok(chat)
    }

    /// The room and its chats, newest first.
    pub async fn get_chats(&self, room_id: i64) -> Result<(Room, Vec<Chat>), ApiError> {
        let room = self.room(room_id).await?;
        let chats = self.rooms.chats(room.id).await?;
        Ok((room, chats))
    }

    /// Chats posted at or after `after`, newest first.
    pub async fn get_chats_after(
        &self,
        room_id: i64,
        after: DateTime<Utc>,
    ) -> Result<(Room, Vec<Chat>), ApiError> {
        let room = self.room(room_id).await?;
        let chats = self.rooms.chats_after(room.id, after).await?;
        Ok((room, chats))
    }

    pub async fn get_muted(&self, player_id: Uuid) -> Result<Vec<Mute>, ApiError> {
        Ok(self.mutes.muted_by(player_id).await?)
    }

    pub async fn mute(&self, player_id: Uuid, muted_id: Uuid) -> Result<Mute, ApiError> {
        let mute = self.mutes.mute(player_id, muted_id).await?;
        info!("Player {} muted {}", player_id, muted_id);
        Ok(mute)
    }

    pub async fn unmute(&self, player_id: Uuid, muted_id: Uuid) -> Result<(), ApiError> {
        if self.mutes.unmute(player_id, muted_id).await? {
            info!("Player {} unmuted {}", player_id, muted_id);
        }
        Ok(())
    }
}

pub fn parse_room_id(raw: &str) -> Result<i64, ApiError> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ApiError::InvalidInput(format!("room id '{}' is not numeric", raw)));
    }
    raw.parse()
        .map_err(|_| ApiError::InvalidInput(format!("room id '{}' is out of range", raw)))
}

pub fn parse_after(raw: &str) -> Result<DateTime<Utc>, ApiError> {
    NaiveDateTime::parse_from_str(raw, AFTER_FORMAT)
        .map(|t| t.and_utc())
        .map_err(|_| ApiError::InvalidInput(format!("time '{}' is not YYYYMMDDhhmmss", raw)))
}

fn parse_player_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::InvalidInput(format!("'{}' is not a player id", raw)))
}

#[derive(Debug, Deserialize)]
struct ChatForm {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MuteForm {
    muted_id: Option<String>,
}

pub fn routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let add = warp::path!("room" / String)
        .and(warp::post())
        .and(with_player(state.clone()))
        .and(warp::body::content_length_limit(FORM_LIMIT))
        .and(warp::body::form())
        .and(with_state(state.clone()))
        .and_then(handle_add);

    let read = warp::path!("room" / String)
        .and(warp::get())
        .and(with_player(state.clone()))
        .and(with_state(state.clone()))
        .and_then(handle_read);

    let latest = warp::path!("room" / String / "after" / String)
        .and(warp::get())
        .and(with_player(state.clone()))
        .and(with_state(state.clone()))
        .and_then(handle_latest);

    let muted = warp::path("muted")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_player(state.clone()))
        .and(with_state(state.clone()))
        .and_then(handle_muted);

    let mute = warp::path("mute")
        .and(warp::path::end())
        .and(warp::post())
        .and(with_player(state.clone()))
        .and(warp::body::content_length_limit(FORM_LIMIT))
        .and(warp::body::form())
        .and(with_state(state.clone()))
        .and_then(handle_mute);

    let unmute = warp::path("unmute")
        .and(warp::path::end())
        .and(warp::post())
        .and(with_player(state.clone()))
        .and(warp::body::content_length_limit(FORM_LIMIT))
        .and(warp::body::form())
        .and(with_state(state))
        .and_then(handle_unmute);

    add.or(read)
        .unify()
        .or(latest)
        .unify()
        .or(muted)
        .unify()
        .or(mute)
        .unify()
        .or(unmute)
        .unify()
}

type Reply = warp::reply::Json;

async fn handle_add(
    room_id: String,
    auth: Authenticated,
    form: ChatForm,
    state: Arc<AppState>,
) -> Result<Reply, warp::Rejection> {
    let room_id = parse_room_id(&room_id)?;
    let message = required(form.message, "message")?;

    let chat = state
        .chat
        .add_chat(room_id, auth.player.player.id, &message)
        .await?;

    let mut reply = ChatReply::from(&chat);
    reply.response = Response::ok();
    Ok(warp::reply::json(&reply))
}

async fn handle_read(
    room_id: String,
    _auth: Authenticated,
    state: Arc<AppState>,
) -> Result<Reply, warp::Rejection> {
    let room_id = parse_room_id(&room_id)?;

    let (room, chats) = state.chat.get_chats(room_id).await?;
    Ok(warp::reply::json(&RoomReply::new(&room, &chats)))
}

async fn handle_latest(
    room_id: String,
    after: String,
    _auth: Authenticated,
    state: Arc<AppState>,
) -> Result<Reply, warp::Rejection> {
    let room_id = parse_room_id(&room_id)?;
    let after = parse_after(&after)?;

    let (room, chats) = state.chat.get_chats_after(room_id, after).await?;
    Ok(warp::reply::json(&RoomReply::new(&room, &chats)))
}

async fn handle_muted(auth: Authenticated, state: Arc<AppState>) -> Result<Reply, warp::Rejection> {
    let mutes = state.chat.get_muted(auth.player.player.id).await?;
    Ok(warp::reply::json(&MutedReply {
        muted: mutes.iter().map(MuteReply::from).collect(),
    }))
}

async fn handle_mute(
    auth: Authenticated,
    form: MuteForm,
    state: Arc<AppState>,
) -> Result<Reply, warp::Rejection> {
    let muted_id = parse_player_id(&required(form.muted_id, "muted_id")?)?;

    let mute = state.chat.mute(auth.player.player.id, muted_id).await?;
    let mut reply = MuteReply::from(&mute);
    reply.response = Response::ok();
    Ok(warp::reply::json(&reply))
}

async fn handle_unmute(
    auth: Authenticated,
    form: MuteForm,
    state: Arc<AppState>,
) -> Result<Reply, warp::Rejection> {
    let muted_id = parse_player_id(&required(form.muted_id, "muted_id")?)?;

    state.chat.unmute(auth.player.player.id, muted_id).await?;
    Ok(warp::reply::json(&MuteReply {
        response: Response::ok(),
        muted_id: None,
    }))
}
