use std::collections::HashMap;
use std::sync::Arc;

use game_core::password::PasswordPolicy;
use game_core::token::{Token, TokenService, is_well_formed};
use game_persistence::PlayerRepository;
use game_types::{PlayerRecord, Response};
use serde::Deserialize;
use tracing::{info, warn};
use warp::Filter;

use crate::error::{ApiError, required};
use crate::mail::Mailer;
use crate::player::hash;
use crate::{AppState, FORM_LIMIT, with_state};

pub const FORGOT_TEMPLATE: &str = "forgot";

/// Password reset by emailed token.
pub struct ForgotController {
    players: PlayerRepository,
    tokens: TokenService,
    mailer: Mailer,
    policy: PasswordPolicy,
}

impl ForgotController {
    pub fn new(
        players: PlayerRepository,
        tokens: TokenService,
        mailer: Mailer,
        policy: PasswordPolicy,
    ) -> Self {
        Self {
            players,
            tokens,
            mailer,
            policy,
        }
    }

    async fn player_by_email(&self, email: &str) -> Result<PlayerRecord, ApiError> {
        self.players
            .find_by_email(email)
            .await?
            .ok_or_else(|| ApiError::NotFound {
                entity: "Player",
                key: "email",
                value: email.to_string(),
            })
    }

    /// Replaces any outstanding reset token for the account with a new one.
    pub async fn create_token(&self, email: &str) -> Result<Token, ApiError> {
        let player = self.player_by_email(email).await?;
        Ok(self.tokens.issue(player.player.id).await?)
    }

    /// Resolves a reset token to the account it belongs to.
    pub async fn test_token(&self, value: &str) -> Result<PlayerRecord, ApiError> {
        if !is_well_formed(value) {
            return Err(ApiError::InvalidToken);
        }

        let token = self.tokens.validate(value).await?;
        self.players
            .find_by_id(token.owner)
            .await?
            .ok_or_else(|| ApiError::NotFound {
                entity: "Player",
                key: "token",
                value: value.to_string(),
            })
    }

    pub async fn change_password(&self, value: &str, password: &str) -> Result<(), ApiError> {
        let mut record = self.test_token(value).await?;

        self.policy.validate(password)?;
        record.password_hash = hash(password).await?;
        let saved = self.players.update_player(record).await?;

        self.tokens.clear_for_owner(saved.player.id).await?;
        info!("Player {} reset their password", saved.player.id);
        Ok(())
    }

    pub async fn clear_tokens(&self, email: &str) -> Result<u64, ApiError> {
        let player = self.player_by_email(email).await?;
        Ok(self.tokens.clear_for_owner(player.player.id).await?)
    }

    /// Mails a reset link. Unknown addresses succeed silently so the
    /// endpoint cannot be used to probe for accounts.
    pub async fn request_reset(&self, email: &str) -> Result<(), ApiError> {
        let token = match self.create_token(email).await {
            Ok(token) => token,
            Err(ApiError::NotFound { .. }) => {
                warn!("Password reset requested for unknown email '{}'", email);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let params = HashMap::from([("token".to_string(), token.value)]);
        let id = self
            .mailer
            .send_template(FORGOT_TEMPLATE, &[email.to_string()], &params)
            .await?;

        info!("Sent password reset mail {} for player {}", id, token.owner);
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ForgotForm {
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChangePasswordForm {
    password: Option<String>,
}

pub fn routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let forgot = warp::path("forgot")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(FORM_LIMIT))
        .and(warp::body::form())
        .and(with_state(state.clone()))
        .and_then(handle_forgot);

    let change_password = warp::path!("change_password" / String)
        .and(warp::post())
        .and(warp::body::content_length_limit(FORM_LIMIT))
        .and(warp::body::form())
        .and(with_state(state))
        .and_then(handle_change_password);

    forgot.or(change_password).unify()
}

async fn handle_forgot(
    form: ForgotForm,
    state: Arc<AppState>,
) -> Result<warp::reply::Json, warp::Rejection> {
    let email = required(form.email, "email")?;

    state.forgot.request_reset(email.trim()).await?;
    Ok(warp::reply::json(&Response::ok()))
}

async fn handle_change_password(
    token: String,
    form: ChangePasswordForm,
    state: Arc<AppState>,
) -> Result<warp::reply::Json, warp::Rejection> {
    let password = required(form.password, "password")?;

    state.forgot.change_password(&token, &password).await?;
    Ok(warp::reply::json(&Response::ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::TemplateCache;
    use crate::mail::tests::RecordingMailer;
    use crate::player::check_password;
    use chrono::{Duration, Utc};
    use game_core::clock::{Clock, FixedClock};
    use game_core::token::{MemoryTokenStore, TokenKind};
    use game_persistence::connection::connect_to_memory_database;
    use game_types::Player;
    use migration::{Migrator, MigratorTrait};
    use std::path::PathBuf;
    use uuid::Uuid;

    struct Fixture {
        controller: ForgotController,
        recorder: Arc<RecordingMailer>,
        clock: Arc<FixedClock>,
        players: PlayerRepository,
        dir: PathBuf,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    async fn setup() -> Fixture {
        let db = connect_to_memory_database().await.unwrap();
        Migrator::up(&db, None).await.unwrap();

        let dir = std::env::temp_dir().join(format!("forgot-templates-{}", Uuid::new_v4()));
        std::fs::create_dir_all(dir.join(FORGOT_TEMPLATE)).unwrap();
        std::fs::write(
            dir.join(FORGOT_TEMPLATE).join("subject.tera"),
            "{{ SiteName }} password reset",
        )
        .unwrap();
        std::fs::write(
            dir.join(FORGOT_TEMPLATE).join("text.tera"),
            "{{ ROOT }}/reset/{{ token }}",
        )
        .unwrap();

        let clock = Arc::new(FixedClock::default());
        let recorder = Arc::new(RecordingMailer::default());
        let players = PlayerRepository::new(db);
        let tokens = TokenService::new(
            TokenKind::Forgot,
            Arc::new(MemoryTokenStore::new()),
            clock.clone(),
        )
        .with_ttl(Duration::days(1));
        let mailer = Mailer::new(
            recorder.clone(),
            Arc::new(TemplateCache::new(&dir)),
            "noreply@example.com",
            "https://game.example.com",
            "Game",
        );

        Fixture {
            controller: ForgotController::new(
                players.clone(),
                tokens,
                mailer,
                PasswordPolicy::default(),
            ),
            recorder,
            clock,
            players,
            dir,
        }
    }

    async fn create_player(players: &PlayerRepository, email: &str) -> PlayerRecord {
        players
            .create_player(PlayerRecord {
                player: Player {
                    id: Uuid::new_v4(),
                    username: "forgetful".to_string(),
                    email: email.to_string(),
                    is_admin: false,
                    created_at: Utc::now().to_rfc3339(),
                },
                password_hash: hash("original").await.unwrap(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_token_replaces_previous() {
        let fixture = setup().await;
        let player = create_player(&fixture.players, "a@example.com").await;

        let first = fixture.controller.create_token("a@example.com").await.unwrap();
        let second = fixture.controller.create_token("a@example.com").await.unwrap();
        assert_ne!(first.value, second.value);
        assert_eq!(second.owner, player.player.id);

        assert!(matches!(
            fixture.controller.test_token(&first.value).await,
            Err(ApiError::InvalidToken)
        ));
        let found = fixture.controller.test_token(&second.value).await.unwrap();
        assert_eq!(found.player.id, player.player.id);
    }

    #[tokio::test]
    async fn test_unknown_email() {
        let fixture = setup().await;
        assert!(matches!(
            fixture.controller.create_token("ghost@example.com").await,
            Err(ApiError::NotFound { entity: "Player", .. })
        ));

        fixture.controller.request_reset("ghost@example.com").await.unwrap();
        assert!(fixture.recorder.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_request_reset_sends_mail() {
        let fixture = setup().await;
        create_player(&fixture.players, "b@example.com").await;

        fixture.controller.request_reset("b@example.com").await.unwrap();

        let sent = fixture.recorder.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, vec!["b@example.com".to_string()]);
        assert_eq!(sent[0].subject, "Game password reset");
        let token = sent[0]
            .text
            .strip_prefix("https://game.example.com/reset/")
            .unwrap();
        assert!(is_well_formed(token));
    }

    #[tokio::test]
    async fn test_change_password() {
        let fixture = setup().await;
        let player = create_player(&fixture.players, "c@example.com").await;
        let token = fixture.controller.create_token("c@example.com").await.unwrap();

        assert!(matches!(
            fixture.controller.change_password(&token.value, "abc").await,
            Err(ApiError::WeakPassword(6))
        ));

        fixture
            .controller
            .change_password(&token.value, "brand-new")
            .await
            .unwrap();

        let saved = fixture.players.find_by_id(player.player.id).await.unwrap().unwrap();
        assert!(check_password(&saved.password_hash, "brand-new").await.unwrap());
        assert!(!check_password(&saved.password_hash, "original").await.unwrap());

        // Single use
        assert!(matches!(
            fixture.controller.change_password(&token.value, "another-one").await,
            Err(ApiError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_expired_and_malformed_tokens() {
        let fixture = setup().await;
        create_player(&fixture.players, "d@example.com").await;
        let token = fixture.controller.create_token("d@example.com").await.unwrap();

        assert!(matches!(
            fixture.controller.test_token("not-a-token").await,
            Err(ApiError::InvalidToken)
        ));

        fixture.clock.advance(Duration::days(1) + Duration::seconds(1));
        assert!(fixture.clock.now() > token.expires_at);
        assert!(matches!(
            fixture.controller.test_token(&token.value).await,
            Err(ApiError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_clear_tokens() {
        let fixture = setup().await;
        create_player(&fixture.players, "e@example.com").await;
        let token = fixture.controller.create_token("e@example.com").await.unwrap();

        assert_eq!(fixture.controller.clear_tokens("e@example.com").await.unwrap(), 1);
        assert!(fixture.controller.test_token(&token.value).await.is_err());
        assert!(fixture.controller.clear_tokens("nobody@example.com").await.is_err());
    }
}
