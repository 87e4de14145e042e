use std::convert::Infallible;

use game_core::hooks::HookError;
use game_core::password::PasswordError;
use game_core::session::SessionError;
use game_core::token::TokenError;
use game_types::Response;
use rand::Rng;
use tracing::{error, warn};
use warp::http::StatusCode;

use crate::mail::MailError;

/// Every way a request can fail, each mapped to one HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Password must be at least {0} characters")]
    WeakPassword(usize),
    #[error("Not authorized to access this area")]
    InvalidSession,
    #[error("Invalid email and/or password")]
    InvalidCredentials,
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("An account with the email '{0}' already exists")]
    AccountExists(String),
    #[error("No {entity} found with {key} of '{value}'")]
    NotFound {
        entity: &'static str,
        key: &'static str,
        value: String,
    },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl warp::reject::Reject for ApiError {}

/// A form field that must be present and non-empty.
pub fn required(value: Option<String>, field: &'static str) -> Result<String, ApiError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or(ApiError::MissingField(field))
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingField(_) => StatusCode::PRECONDITION_FAILED,
            ApiError::InvalidInput(_)
            | ApiError::WeakPassword(_)
            | ApiError::InvalidCredentials
            | ApiError::InvalidToken
            | ApiError::AccountExists(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidSession => StatusCode::UNAUTHORIZED,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Status and client-facing message. Internal failures only carry a
    /// correlation id unless `dev_mode` is set.
    pub fn to_reply_parts(&self, dev_mode: bool) -> (StatusCode, String) {
        let id = correlation_id();
        match self {
            ApiError::Internal(err) => {
                error!("error ({}): {:#}", id, err);
                if dev_mode {
                    let status = StatusCode::from_u16(555).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                    (status, format!("{:#}", err))
                } else {
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        format!("Internal Server Error ({})", id),
                    )
                }
            }
            ApiError::NotFound { entity, .. } => {
                warn!("error ({}): {}", id, self);
                (self.status(), format!("{} not found", entity))
            }
            _ => {
                warn!("error ({}): {}", id, self);
                (self.status(), self.to_string())
            }
        }
    }
}

fn correlation_id() -> u32 {
    rand::rng().random_range(0..i32::MAX as u32)
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Storage(inner) => ApiError::Internal(inner),
            other => {
                warn!("token rejected: {}", other);
                ApiError::InvalidToken
            }
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Encryption(reason) => {
                ApiError::Internal(anyhow::anyhow!("failed to seal session: {}", reason))
            }
            other => {
                warn!("session rejected: {}", other);
                ApiError::InvalidSession
            }
        }
    }
}

impl From<PasswordError> for ApiError {
    fn from(err: PasswordError) -> Self {
        match err {
            PasswordError::TooShort { min } => ApiError::WeakPassword(min),
            PasswordError::Hash(reason) => {
                ApiError::Internal(anyhow::anyhow!("failed to hash password: {}", reason))
            }
        }
    }
}

impl From<HookError> for ApiError {
    fn from(err: HookError) -> Self {
        match err {
            HookError::Vetoed { reason, .. } => ApiError::InvalidInput(reason),
        }
    }
}

impl From<MailError> for ApiError {
    fn from(err: MailError) -> Self {
        ApiError::Internal(anyhow::Error::new(err))
    }
}

pub fn error_reply(status: StatusCode, message: String) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(warp::reply::json(&Response::error(message)), status)
}

/// Turns rejections into JSON error replies.
pub async fn handle_rejection(
    err: warp::Rejection,
    dev_mode: bool,
) -> Result<impl warp::Reply, Infallible> {
    let (status, message) = if let Some(api_error) = err.find::<ApiError>() {
        api_error.to_reply_parts(dev_mode)
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not Found".to_string())
    } else if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, format!("Invalid input: {}", e))
    } else if let Some(e) = err.find::<warp::reject::UnsupportedMediaType>() {
        (StatusCode::UNSUPPORTED_MEDIA_TYPE, e.to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed".to_string())
    } else {
        error!("unhandled rejection: {:?}", err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal Server Error".to_string(),
        )
    };

    Ok(error_reply(status, message))
}
