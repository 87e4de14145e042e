use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use game_core::clock::Clock;
use game_core::hooks::{Deleted, LoggedIn, LoggedOut, PlayerHooks, PreRegister, Registered, Updated};
use game_core::password::{PasswordPolicy, hash_password, verify_password};
use game_core::session::SessionState;
use game_core::token::{TokenService, is_well_formed};
use game_persistence::PlayerRepository;
use game_types::{PingReply, Player, PlayerRecord, PlayerReply, Response, TokenReply};
use regex::Regex;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;
use warp::Filter;
use warp::http::header::SET_COOKIE;

use crate::error::{ApiError, required};
use crate::session::{Authenticated, PLAYER_COOKIE_NAME, kill_cookie, session_cookie, with_player};
use crate::{AppState, FORM_LIMIT, with_state};

static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern compiles"));

fn check_email(email: &str) -> Result<(), ApiError> {
    if EMAIL.is_match(email) {
        Ok(())
    } else {
        Err(ApiError::InvalidInput(format!("'{}' is not an email address", email)))
    }
}

/// Account lifecycle: registration, login, updates and deletion.
pub struct PlayerController {
    players: PlayerRepository,
    delete_tokens: TokenService,
    hooks: PlayerHooks,
    policy: PasswordPolicy,
    clock: Arc<dyn Clock>,
}

impl PlayerController {
    pub fn new(
        players: PlayerRepository,
        delete_tokens: TokenService,
        hooks: PlayerHooks,
        policy: PasswordPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            players,
            delete_tokens,
            hooks,
            policy,
            clock,
        }
    }

    pub async fn find(&self, id: Uuid) -> Result<Option<PlayerRecord>, ApiError> {
        Ok(self.players.find_by_id(id).await?)
    }

    /// Registers a new account. Registering again with the same email and
    /// password returns the existing account.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<Player, ApiError> {
        let mut event = PreRegister {
            username: username.to_string(),
            email: email.to_string(),
        };
        self.hooks.pre_register.dispatch(&mut event)?;
        let PreRegister { username, email } = event;
        check_email(&email)?;

        if let Some(existing) = self.players.find_by_email(&email).await? {
            if check_password(&existing.password_hash, password).await? {
                return Ok(existing.player);
            }
            return Err(ApiError::AccountExists(email));
        }

        self.policy.validate(password)?;
        let record = PlayerRecord {
            player: Player {
                id: Uuid::new_v4(),
                username,
                email,
                is_admin: false,
                created_at: self.clock.now().to_rfc3339(),
            },
            password_hash: hash(password).await?,
        };

        let created = self.players.create_player(record).await?;
        info!("Registered player {} ({})", created.player.id, created.player.email);

        let mut event = Registered {
            player: created.player.clone(),
        };
        if let Err(e) = self.hooks.registered.dispatch(&mut event) {
            warn!("Register hook failed: {}", e);
        }

        Ok(created.player)
    }

    pub async fn login(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(Player, SessionState), ApiError> {
        let record = self
            .players
            .find_by_email(email)
            .await?
            .ok_or(ApiError::InvalidCredentials)?;

        if !check_password(&record.password_hash, password).await? {
            return Err(ApiError::InvalidCredentials);
        }

        let mut event = LoggedIn {
            session: SessionState {
                is_player: true,
                is_super_user: record.player.is_admin,
                player_id: record.player.id.to_string(),
            },
            player: record.player,
        };
        if let Err(e) = self.hooks.logged_in.dispatch(&mut event) {
            warn!("Login hook failed: {}", e);
        }

        info!("Player {} logged in", event.player.id);
        Ok((event.player, event.session))
    }

    pub fn logout(&self, session: SessionState) {
        let mut event = LoggedOut { session };
        if let Err(e) = self.hooks.logged_out.dispatch(&mut event) {
            warn!("Logout hook failed: {}", e);
        }
    }

    /// Changes the email and/or password after re-checking the current
    /// password. An empty email keeps the current one.
    pub async fn update(
        &self,
        current: &PlayerRecord,
        password: &str,
        new_email: Option<&str>,
        new_password: Option<&str>,
    ) -> Result<Player, ApiError> {
        if !check_password(&current.password_hash, password).await? {
            return Err(ApiError::InvalidCredentials);
        }

        let mut updated = current.clone();

        if let Some(email) = new_email.map(str::trim).filter(|e| !e.is_empty()) {
            check_email(email)?;
            if email != current.player.email {
                if let Some(other) = self.players.find_by_email(email).await? {
                    if other.player.id != current.player.id {
                        return Err(ApiError::AccountExists(email.to_string()));
                    }
                }
            }
            updated.player.email = email.to_string();
        }

        if let Some(new_password) = new_password.filter(|p| !p.is_empty()) {
            self.policy.validate(new_password)?;
            updated.password_hash = hash(new_password).await?;
        }

        let saved = self.players.update_player(updated).await?;

        let mut event = Updated {
            old: current.player.clone(),
            new: saved.player.clone(),
        };
        if let Err(e) = self.hooks.updated.dispatch(&mut event) {
            warn!("Update hook failed: {}", e);
        }

        Ok(saved.player)
    }

    /// Issues the token that has to accompany the delete request.
    pub async fn request_delete(
        &self,
        current: &PlayerRecord,
        password: &str,
    ) -> Result<String, ApiError> {
        if !check_password(&current.password_hash, password).await? {
            return Err(ApiError::InvalidCredentials);
        }

        let token = self.delete_tokens.issue(current.player.id).await?;
        Ok(token.value)
    }

    pub async fn delete(&self, current: &PlayerRecord, value: &str) -> Result<(), ApiError> {
        if !is_well_formed(value) {
            return Err(ApiError::InvalidToken);
        }

        let token = self.delete_tokens.validate(value).await?;
        if token.owner != current.player.id {
            warn!(
                "Player {} presented a delete token owned by {}",
                current.player.id, token.owner
            );
            return Err(ApiError::InvalidCredentials);
        }

        self.delete_tokens.clear_for_owner(token.owner).await?;

        if !self.players.delete_player(current.player.id).await? {
            return Err(ApiError::NotFound {
                entity: "Player",
                key: "id",
                value: current.player.id.to_string(),
            });
        }

        let mut event = Deleted {
            player: current.player.clone(),
        };
        if let Err(e) = self.hooks.deleted.dispatch(&mut event) {
            warn!("Delete hook failed: {}", e);
        }

        Ok(())
    }

    pub fn ping(&self, session: &SessionState) -> (String, DateTime<Utc>) {
        (session.player_id.clone(), self.clock.now())
    }
}

/// Runs on the blocking pool.
pub(crate) async fn hash(password: &str) -> Result<String, ApiError> {
    let password = password.to_string();
    let hashed = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| ApiError::Internal(e.into()))??;
    Ok(hashed)
}

pub(crate) async fn check_password(hash: &str, password: &str) -> Result<bool, ApiError> {
    let (hash, password) = (hash.to_string(), password.to_string());
    tokio::task::spawn_blocking(move || verify_password(&hash, &password))
        .await
        .map_err(|e| ApiError::Internal(e.into()))
}

#[derive(Debug, Deserialize)]
struct RegisterForm {
    username: Option<String>,
    email: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginForm {
    email: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateForm {
    password: Option<String>,
    email: Option<String>,
    new_password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PasswordForm {
    password: Option<String>,
}

pub fn routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let register = warp::path("register")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(FORM_LIMIT))
        .and(warp::body::form())
        .and(with_state(state.clone()))
        .and_then(handle_register);

    let login = warp::path("login")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(FORM_LIMIT))
        .and(warp::body::form())
        .and(with_state(state.clone()))
        .and_then(handle_login);

    let logout = warp::path("logout")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_player(state.clone()))
        .and(with_state(state.clone()))
        .and_then(handle_logout);

    let update = warp::path("update")
        .and(warp::path::end())
        .and(warp::put())
        .and(with_player(state.clone()))
        .and(warp::body::content_length_limit(FORM_LIMIT))
        .and(warp::body::form())
        .and(with_state(state.clone()))
        .and_then(handle_update);

    let request_delete = warp::path("delete")
        .and(warp::path::end())
        .and(warp::post())
        .and(with_player(state.clone()))
        .and(warp::body::content_length_limit(FORM_LIMIT))
        .and(warp::body::form())
        .and(with_state(state.clone()))
        .and_then(handle_request_delete);

    let delete = warp::path!("delete" / String)
        .and(warp::delete())
        .and(with_player(state.clone()))
        .and(with_state(state.clone()))
        .and_then(handle_delete);

    let ping = warp::path("ping")
        .and(warp::path::end())
        .and(warp::get().or(warp::post()).unify())
        .and(with_player(state.clone()))
        .and(with_state(state))
        .and_then(handle_ping);

    register
        .or(login)
        .unify()
        .or(logout)
        .unify()
        .or(update)
        .unify()
        .or(request_delete)
        .unify()
        .or(delete)
        .unify()
        .or(ping)
        .unify()
}

type Reply = Box<dyn warp::Reply>;

async fn handle_register(form: RegisterForm, state: Arc<AppState>) -> Result<Reply, warp::Rejection> {
    let username = required(form.username, "username")?;
    let email = required(form.email, "email")?;
    let password = required(form.password, "password")?;

    let player = state.players.register(&username, &email, &password).await?;
    Ok(Box::new(warp::reply::json(&PlayerReply::for_player(&player))))
}

async fn handle_login(form: LoginForm, state: Arc<AppState>) -> Result<Reply, warp::Rejection> {
    let email = required(form.email, "email")?;
    let password = required(form.password, "password")?;

    let (player, session) = state.players.login(&email, &password).await?;
    let cookie = state.codec.serialize(&session).map_err(ApiError::from)?;

    let reply = PlayerReply::for_player(&player).with_cookie(PLAYER_COOKIE_NAME, cookie.clone());
    Ok(Box::new(warp::reply::with_header(
        warp::reply::json(&reply),
        SET_COOKIE,
        session_cookie(&cookie),
    )))
}

async fn handle_logout(auth: Authenticated, state: Arc<AppState>) -> Result<Reply, warp::Rejection> {
    state.players.logout(auth.session);
    Ok(Box::new(warp::reply::with_header(
        warp::reply::json(&PlayerReply::success()),
        SET_COOKIE,
        kill_cookie(),
    )))
}

async fn handle_update(
    auth: Authenticated,
    form: UpdateForm,
    state: Arc<AppState>,
) -> Result<Reply, warp::Rejection> {
    let password = required(form.password, "password")?;

    let player = state
        .players
        .update(
            &auth.player,
            &password,
            form.email.as_deref(),
            form.new_password.as_deref(),
        )
        .await?;
    Ok(Box::new(warp::reply::json(&PlayerReply::for_player(&player))))
}

async fn handle_request_delete(
    auth: Authenticated,
    form: PasswordForm,
    state: Arc<AppState>,
) -> Result<Reply, warp::Rejection> {
    let password = required(form.password, "password")?;

    let token = state.players.request_delete(&auth.player, &password).await?;
    Ok(Box::new(warp::reply::json(&TokenReply { token })))
}

async fn handle_delete(
    token: String,
    auth: Authenticated,
    state: Arc<AppState>,
) -> Result<Reply, warp::Rejection> {
    state.players.delete(&auth.player, &token).await?;
    Ok(Box::new(warp::reply::with_header(
        warp::reply::json(&PlayerReply::success()),
        SET_COOKIE,
        kill_cookie(),
    )))
}

async fn handle_ping(auth: Authenticated, state: Arc<AppState>) -> Result<Reply, warp::Rejection> {
    let (player_id, now) = state.players.ping(&auth.session);
    Ok(Box::new(warp::reply::json(&PingReply {
        response: Response::ok(),
        player_id,
        timestamp: now.to_rfc3339(),
    })))
}
