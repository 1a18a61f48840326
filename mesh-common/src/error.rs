use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Challenge sent with every 401 produced by the auth layer.
pub const BEARER_CHALLENGE: &str = r#"Bearer realm="Authentication Required""#;

pub type Result<T, E = MeshError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cannot determine {0}")]
    Identity(String),

    #[error("Container runtime error: {0}")]
    ContainerRuntime(String),

    #[error("Coordination store error: {0}")]
    Store(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream returned {status} for {url}")]
    UpstreamStatus {
        status: reqwest::StatusCode,
        url: String,
    },

    // Deliberately carries no reason.
    #[error("Authentication required")]
    Unauthenticated,

    #[error("Token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl MeshError {
    pub fn config(msg: impl Into<String>) -> Self {
        MeshError::Config(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        MeshError::Store(msg.into())
    }
}

impl From<config::ConfigError> for MeshError {
    fn from(err: config::ConfigError) -> Self {
        MeshError::Config(err.to_string())
    }
}

impl IntoResponse for MeshError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            details: Option<String>,
        }

        let (status, error_message, details) = match &self {
            MeshError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                "authentication required".to_string(),
                None,
            ),
            MeshError::UpstreamStatus { status, .. } if status.is_server_error() => (
                StatusCode::BAD_GATEWAY,
                "Bad gateway".to_string(),
                Some(self.to_string()),
            ),
            MeshError::UpstreamStatus { status, .. } => (
                StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY),
                "Upstream error".to_string(),
                Some(self.to_string()),
            ),
            MeshError::Http(err) => (
                StatusCode::BAD_GATEWAY,
                "Bad gateway".to_string(),
                Some(err.to_string()),
            ),
            MeshError::Store(_) | MeshError::ContainerRuntime(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Service unavailable".to_string(),
                Some(self.to_string()),
            ),
            MeshError::Config(_) | MeshError::Identity(_) | MeshError::Token(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                Some(self.to_string()),
            ),
            MeshError::Internal(err) => {
                tracing::error!(error = %err, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    None,
                )
            }
        };

        let mut res = (
            status,
            Json(ErrorResponse {
                error: error_message,
                details,
            }),
        )
            .into_response();

        if matches!(self, MeshError::Unauthenticated) {
            res.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(BEARER_CHALLENGE),
            );
        }

        res
    }
}
