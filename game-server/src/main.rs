use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use game_core::clock::SystemClock;
use game_core::hooks::PlayerHooks;
use game_persistence::DatabaseManager;
use game_server::{
    AppState,
    config::Config,
    create_routes,
    mail::{LogMailer, MailSender, MailgunSender},
};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting game server...");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    if config.dev_mode {
        warn!("Running in development mode - internal errors are exposed to clients");
    }

    // Initialize database connection and run migrations
    let db = match DatabaseManager::connect(&config.database_url).await {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to connect to database and run migrations: {}", e);
            std::process::exit(1);
        }
    };

    let sender: Arc<dyn MailSender> = match &config.mailgun {
        Some(mailgun) => {
            info!("Sending mail through Mailgun domain {}", mailgun.domain);
            Arc::new(MailgunSender::new(mailgun))
        }
        None => {
            warn!("MAILGUN_DOMAIN/MAILGUN_API_KEY not set, outgoing mail will only be logged");
            Arc::new(LogMailer)
        }
    };

    let addr = match config.host.parse::<std::net::IpAddr>() {
        Ok(ip) => (ip, config.port),
        Err(e) => {
            error!("Invalid HOST '{}': {}", config.host, e);
            std::process::exit(1);
        }
    };

    let state = Arc::new(AppState::new(
        config,
        db,
        sender,
        Arc::new(SystemClock),
        PlayerHooks::new(),
    ));
    let routes = create_routes(state);

    let (addr, server) = warp::serve(routes).bind_with_graceful_shutdown(addr, async {
        // Wait for SIGINT (Ctrl+C) or SIGTERM
        #[cfg(unix)]
        {
            let (mut sigint, mut sigterm) = match (
                signal::unix::signal(signal::unix::SignalKind::interrupt()),
                signal::unix::signal(signal::unix::SignalKind::terminate()),
            ) {
                (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
                (Err(e), _) | (_, Err(e)) => {
                    error!("Failed to install signal handlers: {}", e);
                    return;
                }
            };

            tokio::select! {
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully...");
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully...");
                }
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to listen for ctrl+c: {}", e);
                return;
            }
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    });

    info!(
        "Server started successfully on {}. Press Ctrl+C to stop.",
        addr
    );
    server.await;
    info!("Server shutdown complete.");
}
