use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use game_core::session::{KEY_LEN, SessionKeys};
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {var} '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("{0} must be set unless DEV_MODE is enabled")]
    Missing(&'static str),
}

#[derive(Debug, Clone)]
pub struct MailgunConfig {
    pub domain: String,
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub site_name: String,
    pub root_url: String,
    pub cookie_keys: SessionKeys,
    pub forgot_token_expiry_days: i64,
    pub delete_token_expiry_hours: i64,
    pub min_password_length: usize,
    pub from_email: String,
    pub mailgun: Option<MailgunConfig>,
    pub email_template_dir: PathBuf,
    pub dev_mode: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Builds the config from any variable source; `from_env` passes the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str, default: &str| lookup(var).unwrap_or_else(|| default.to_string());

        let dev_mode: bool = parse("DEV_MODE", get("DEV_MODE", "false"))?;

        let cookie_keys = match (
            lookup("COOKIE_SIGNATURE_KEY"),
            lookup("COOKIE_CRYPT_KEY"),
        ) {
            (Some(signature), Some(crypt)) => SessionKeys::new(
                parse_key("COOKIE_SIGNATURE_KEY", signature)?,
                parse_key("COOKIE_CRYPT_KEY", crypt)?,
            ),
            (None, _) if !dev_mode => return Err(ConfigError::Missing("COOKIE_SIGNATURE_KEY")),
            (_, None) if !dev_mode => return Err(ConfigError::Missing("COOKIE_CRYPT_KEY")),
            _ => {
                warn!("Cookie keys not configured, generating random keys for this process");
                SessionKeys::generate()
            }
        };

        let mailgun = match (lookup("MAILGUN_DOMAIN"), lookup("MAILGUN_API_KEY")) {
            (Some(domain), Some(api_key)) if !domain.is_empty() && !api_key.is_empty() => {
                Some(MailgunConfig { domain, api_key })
            }
            _ => None,
        };

        Ok(Self {
            host: get("HOST", "127.0.0.1"),
            port: parse("PORT", get("PORT", "8080"))?,
            database_url: get("DATABASE_URL", "sqlite://game.db?mode=rwc"),
            site_name: get("SITE_NAME", "Game"),
            root_url: get("ROOT_URL", "http://localhost:8080"),
            cookie_keys,
            forgot_token_expiry_days: parse(
                "FORGOT_TOKEN_EXPIRY_DAYS",
                get("FORGOT_TOKEN_EXPIRY_DAYS", "1"),
            )?,
            delete_token_expiry_hours: parse(
                "DELETE_TOKEN_EXPIRY_HOURS",
                get("DELETE_TOKEN_EXPIRY_HOURS", "24"),
            )?,
            min_password_length: parse("MIN_PASSWORD_LENGTH", get("MIN_PASSWORD_LENGTH", "6"))?,
            from_email: get("FROM_EMAIL", "noreply@localhost"),
            mailgun,
            email_template_dir: PathBuf::from(get("EMAIL_TEMPLATE_DIR", "./emails")),
            dev_mode,
        })
    }

    pub fn forgot_token_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.forgot_token_expiry_days)
    }

    pub fn delete_token_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.delete_token_expiry_hours)
    }

    pub fn lobby_name(&self) -> String {
        format!("{} Lobby", self.site_name)
    }
}

fn parse<T>(var: &'static str, value: String) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        reason: e.to_string(),
        value,
    })
}

fn parse_key(var: &'static str, value: String) -> Result<[u8; KEY_LEN], ConfigError> {
    let bytes = hex::decode(value.trim()).map_err(|e| ConfigError::Invalid {
        var,
        value: value.clone(),
        reason: e.to_string(),
    })?;

    bytes.try_into().map_err(|bytes: Vec<u8>| ConfigError::Invalid {
        var,
        value: value.clone(),
        reason: format!("expected {} bytes, got {}", KEY_LEN, bytes.len()),
    })
}
