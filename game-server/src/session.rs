use std::sync::Arc;

use game_core::session::SessionState;
use game_types::PlayerRecord;
use tracing::warn;
use uuid::Uuid;
use warp::Filter;

use crate::AppState;
use crate::error::ApiError;
use crate::with_state;

pub const PLAYER_COOKIE_NAME: &str = "bue";
pub const COOKIE_MAX_AGE_SECONDS: u32 = 86400;

/// A request made with a valid player session.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub session: SessionState,
    pub player: PlayerRecord,
}

pub fn session_cookie(data: &str) -> String {
    format!(
        "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
        PLAYER_COOKIE_NAME, data, COOKIE_MAX_AGE_SECONDS
    )
}

pub fn kill_cookie() -> String {
    format!(
        "{}=; Path=/; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly; SameSite=Lax",
        PLAYER_COOKIE_NAME
    )
}

/// Resolves the session cookie to a live player or rejects with
/// [`ApiError::InvalidSession`].
pub fn with_player(
    state: Arc<AppState>,
) -> impl Filter<Extract = (Authenticated,), Error = warp::Rejection> + Clone {
    warp::cookie::optional::<String>(PLAYER_COOKIE_NAME)
        .and(with_state(state))
        .and_then(|cookie: Option<String>, state: Arc<AppState>| async move {
            authenticate(cookie.as_deref(), &state)
                .await
                .map_err(warp::reject::custom)
        })
}

pub async fn authenticate(cookie: Option<&str>, state: &AppState) -> Result<Authenticated, ApiError> {
    let raw = cookie
        .filter(|c| !c.is_empty())
        .ok_or(ApiError::InvalidSession)?;

    let session = state.codec.deserialize(raw)?;
    if !session.is_player {
        return Err(ApiError::InvalidSession);
    }

    let player_id = Uuid::parse_str(&session.player_id).map_err(|_| {
        warn!("session carries unparseable player id '{}'", session.player_id);
        ApiError::InvalidSession
    })?;

    // The account may have been deleted since the cookie was issued.
    let player = state.players.find(player_id).await?.ok_or_else(|| {
        warn!("session for missing player {}", player_id);
        ApiError::InvalidSession
    })?;

    Ok(Authenticated { session, player })
}
