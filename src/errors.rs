use hyper::{Body, Response, StatusCode};
use serde::Serialize;
use thiserror::Error;

use crate::codec::FlvError;

/// Unified relay error type.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Channel not found: {key}")]
    ChannelNotFound { key: String },

    #[error("Channel already exists: {key}")]
    DuplicateChannel { key: String },

    #[error("Client not registered: {id}")]
    ClientNotFound { id: String },

    #[error("Upstream error: {message}")]
    Upstream { message: String },

    #[error("Upstream returned status {status}")]
    UpstreamStatus { status: u16 },

    #[error("Playlist error: {message}")]
    Playlist { message: String },

    #[error("Codec error: {source}")]
    Codec {
        #[from]
        source: FlvError,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<config::ConfigError> for RelayError {
    fn from(err: config::ConfigError) -> Self {
        RelayError::Config {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        RelayError::Upstream {
            message: err.to_string(),
        }
    }
}

impl From<url::ParseError> for RelayError {
    fn from(err: url::ParseError) -> Self {
        RelayError::Playlist {
            message: err.to_string(),
        }
    }
}

impl RelayError {
    pub fn error_code(&self) -> &'static str {
        match self {
            RelayError::ChannelNotFound { .. } => "CHANNEL_NOT_FOUND",
            RelayError::DuplicateChannel { .. } => "CHANNEL_EXISTS",
            RelayError::ClientNotFound { .. } => "CLIENT_NOT_FOUND",
            RelayError::Upstream { .. } => "UPSTREAM_ERROR",
            RelayError::UpstreamStatus { .. } => "UPSTREAM_BAD_STATUS",
            RelayError::Playlist { .. } => "PLAYLIST_ERROR",
            RelayError::Codec { .. } => "CODEC_ERROR",
            RelayError::Config { .. } => "CONFIG_ERROR",
            RelayError::Io { .. } => "IO_ERROR",
            RelayError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            RelayError::ChannelNotFound { .. } => StatusCode::NOT_FOUND,
            RelayError::DuplicateChannel { .. } => StatusCode::CONFLICT,
            RelayError::ClientNotFound { .. } => StatusCode::NOT_FOUND,
            RelayError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            RelayError::UpstreamStatus { .. } => StatusCode::BAD_GATEWAY,
            RelayError::Playlist { .. } => StatusCode::BAD_GATEWAY,
            RelayError::Codec { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            RelayError::Config { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayError::Upstream { .. } | RelayError::UpstreamStatus { .. }
        )
    }

    pub fn should_log_error(&self) -> bool {
        !matches!(
            self,
            RelayError::ChannelNotFound { .. }
                | RelayError::ClientNotFound { .. }
                | RelayError::DuplicateChannel { .. }
        )
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub code: &'static str,
    pub message: String,
}

impl ErrorResponse {
    pub fn from_error(error: &RelayError) -> Self {
        Self {
            error: "RelayError",
            code: error.error_code(),
            message: error.to_string(),
        }
    }
}

pub struct ErrorHandler;

impl ErrorHandler {
    pub fn handle_error(error: &RelayError) -> Response<Body> {
        if error.should_log_error() {
            log::error!("relay error: {}", error);
        } else {
            log::warn!("client error: {}", error);
        }

        let body = match serde_json::to_string(&ErrorResponse::from_error(error)) {
            Ok(json) => Body::from(json),
            Err(_) => Body::from(r#"{"error":"RelayError","code":"INTERNAL_ERROR"}"#),
        };

        Response::builder()
            .status(error.http_status())
            .header("Content-Type", "application/json")
            .body(body)
            .unwrap_or_else(|_| {
                Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .body(Body::from("failed to build error response"))
                    .unwrap()
            })
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
