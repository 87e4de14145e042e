use std::convert::Infallible;
use std::sync::Arc;

use game_core::clock::Clock;
use game_core::hooks::PlayerHooks;
use game_core::password::PasswordPolicy;
use game_core::session::SessionCodec;
use game_core::token::{TokenKind, TokenService};
use game_persistence::DatabaseManager;
use warp::Filter;

use crate::chat::ChatController;
use crate::config::Config;
use crate::error::handle_rejection;
use crate::forgot::ForgotController;
use crate::mail::{MailSender, Mailer, TemplateCache};
use crate::player::PlayerController;

pub mod chat;
pub mod config;
pub mod error;
pub mod forgot;
pub mod mail;
pub mod player;
pub mod session;

/// Largest form body any endpoint accepts.
pub const FORM_LIMIT: u64 = 16 * 1024;

/// Everything a request handler can reach.
pub struct AppState {
    pub config: Config,
    pub codec: SessionCodec,
    pub clock: Arc<dyn Clock>,
    pub players: PlayerController,
    pub chat: ChatController,
    pub forgot: ForgotController,
}

impl AppState {
    pub fn new(
        config: Config,
        db: DatabaseManager,
        sender: Arc<dyn MailSender>,
        clock: Arc<dyn Clock>,
        hooks: PlayerHooks,
    ) -> Self {
        let policy = PasswordPolicy::new(config.min_password_length);
        let tokens = Arc::new(db.tokens());

        let delete_tokens = TokenService::new(TokenKind::Delete, tokens.clone(), clock.clone())
            .with_ttl(config.delete_token_ttl());
        let forgot_tokens = TokenService::new(TokenKind::Forgot, tokens, clock.clone())
            .with_ttl(config.forgot_token_ttl());

        let mailer = Mailer::new(
            sender,
            Arc::new(TemplateCache::new(&config.email_template_dir)),
            config.from_email.clone(),
            config.root_url.clone(),
            config.site_name.clone(),
        );

        Self {
            codec: SessionCodec::new(config.cookie_keys.clone()),
            players: PlayerController::new(
                db.players(),
                delete_tokens,
                hooks,
                policy,
                clock.clone(),
            ),
            chat: ChatController::new(db.rooms(), db.mutes(), clock.clone(), config.lobby_name()),
            forgot: ForgotController::new(db.players(), forgot_tokens, mailer, policy),
            clock,
            config,
        }
    }
}

pub fn with_state(
    state: Arc<AppState>,
) -> impl Filter<Extract = (Arc<AppState>,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

pub fn create_routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let dev_mode = state.config.dev_mode;

    // Health check endpoint
    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| warp::reply::with_status("OK", warp::http::StatusCode::OK));

    let cors = warp::cors()
        .allow_any_origin()
        .allow_headers(vec!["content-type", "cookie"])
        .allow_methods(vec!["GET", "POST", "PUT", "DELETE"])
        .allow_credentials(true);

    health
        .map(|reply| Box::new(reply) as Box<dyn warp::Reply>)
        .or(player::routes(state.clone()).map(|reply| Box::new(reply) as Box<dyn warp::Reply>))
        .unify()
        .or(chat::routes(state.clone()).map(|reply| Box::new(reply) as Box<dyn warp::Reply>))
        .unify()
        .or(forgot::routes(state).map(|reply| Box::new(reply) as Box<dyn warp::Reply>))
        .unify()
        .recover(move |err| handle_rejection(err, dev_mode))
        .with(cors)
        .with(warp::log("game_server"))
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use crate::mail::tests::RecordingMailer;
    use game_core::clock::FixedClock;
    use game_persistence::connection::connect_to_memory_database;
    use game_types::PlayerReply;
    use migration::{Migrator, MigratorTrait};

    async fn create_test_app()
    -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
        let db = connect_to_memory_database().await.unwrap();
        Migrator::up(&db, None).await.unwrap();

        let config = Config::from_lookup(|var| match var {
            "DEV_MODE" => Some("true".to_string()),
            _ => None,
        })
        .unwrap();

        let state = Arc::new(AppState::new(
            config,
            DatabaseManager::from_connection(db),
            Arc::new(RecordingMailer::default()),
            Arc::new(FixedClock::default()),
            PlayerHooks::new(),
        ));
        create_routes(state)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = create_test_app().await;

        let response = warp::test::request()
            .method("GET")
            .path("/health")
            .reply(&app)
            .await;

        assert_eq!(response.status(), 200);
        assert_eq!(response.body(), "OK");
    }

    #[tokio::test]
    async fn test_unknown_path_is_json_404() {
        let app = create_test_app().await;

        let response = warp::test::request()
            .method("GET")
            .path("/nowhere")
            .reply(&app)
            .await;

        assert_eq!(response.status(), 404);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["error"], "Not Found");
        assert!(body.get("success").is_none());
    }

    #[tokio::test]
    async fn test_register_then_login_sets_cookie() {
        let app = create_test_app().await;

        let response = warp::test::request()
            .method("POST")
            .path("/register")
            .header("content-type", "application/x-www-form-urlencoded")
            .body("username=ivy&email=ivy%40example.com&password=secret1")
            .reply(&app)
            .await;
        assert_eq!(response.status(), 200);
        let reply: PlayerReply = serde_json::from_slice(response.body()).unwrap();
        assert!(reply.response.success);
        assert_eq!(reply.email, "ivy@example.com");

        let response = warp::test::request()
            .method("POST")
            .path("/login")
            .header("content-type", "application/x-www-form-urlencoded")
            .body("email=ivy%40example.com&password=secret1")
            .reply(&app)
            .await;
        assert_eq!(response.status(), 200);

        let set_cookie = response
            .headers()
            .get("set-cookie")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(set_cookie.starts_with("bue="));

        let reply: PlayerReply = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(reply.cookie_name.as_deref(), Some("bue"));
        assert!(reply.cookie_data.is_some());
    }

    #[tokio::test]
    async fn test_missing_field_is_412() {
        let app = create_test_app().await;

        let response = warp::test::request()
            .method("POST")
            .path("/register")
            .header("content-type", "application/x-www-form-urlencoded")
            .body("username=ivy&password=secret1")
            .reply(&app)
            .await;

        assert_eq!(response.status(), 412);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["error"], "Missing required field: email");
    }

    #[tokio::test]
    async fn test_ping_requires_session() {
        let app = create_test_app().await;

        let response = warp::test::request()
            .method("GET")
            .path("/ping")
            .reply(&app)
            .await;
        assert_eq!(response.status(), 401);

        let response = warp::test::request()
            .method("GET")
            .path("/ping")
            .header("cookie", "bue=garbage")
            .reply(&app)
            .await;
        assert_eq!(response.status(), 401);
    }
}
