//! Error types for the gateway.

use crate::translate::anthropic_types::ErrorResponse;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Authentication error: {message}")]
    Authentication { message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest {
        message: String,
        status: u16,
        detail: Option<serde_json::Value>,
    },

    #[error("Provider error: {message}")]
    Provider { message: String },

    #[error("Translation error: {message}")]
    Translation { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

impl GatewayError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication {
            message: msg.into(),
        }
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: msg.into(),
            status: 400,
            detail: None,
        }
    }

    /// Invalid-request error carrying a structured detail payload for the client.
    pub fn invalid_request_with(
        status: u16,
        msg: impl Into<String>,
        detail: serde_json::Value,
    ) -> Self {
        Self::InvalidRequest {
            message: msg.into(),
            status,
            detail: Some(detail),
        }
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider {
            message: msg.into(),
        }
    }

    pub fn translation(msg: impl Into<String>) -> Self {
        Self::Translation {
            message: msg.into(),
        }
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// HTTP status the client sees for this error.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::Authentication { .. } => 401,
            Self::InvalidRequest { status, .. } => *status,
            Self::Provider { .. } | Self::Http(_) => 502,
            Self::Config { .. }
            | Self::Translation { .. }
            | Self::Io(_)
            | Self::Json(_)
            | Self::Toml(_)
            | Self::Other(_) => 500,
        }
    }

    /// Anthropic-shaped error envelope for this error.
    #[must_use]
    pub fn to_error_response(&self) -> ErrorResponse {
        match self {
            Self::Authentication { message } => ErrorResponse::authentication(message.clone()),
            Self::InvalidRequest {
                message, detail, ..
            } => {
                let mut err = ErrorResponse::invalid_request(message.clone());
                err.error.detail = detail.clone();
                err
            }
            other => ErrorResponse::api_error(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
