//! Error types for the gateway crate.

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use appmgr_registry::RegistryError;

use crate::{config::ConfigError, router::RouteError, token::TokenError};

/// Generic reply body for failures that carry no user-facing message.
pub const UNKNOWN_EXCEPTION: &str = "unknown exception";

/// Errors raised while handling a request.
///
/// Every variant is reported as `400 Bad Request` with a plain-text body.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ApiError {
    /// Malformed or missing request input.
    #[error("{0}")]
    InvalidArgument(String),

    /// Login headers present but unusable.
    #[error("invalid username or password")]
    InvalidCredentials,

    /// Token missing, invalid, or naming an unknown principal.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Failure reported by the application registry.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Unexpected failure; the detail is logged, never sent to the client.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match &self {
            ApiError::Internal(_) => UNKNOWN_EXCEPTION.to_owned(),
            other => other.to_string(),
        };
        (StatusCode::BAD_REQUEST, body).into_response()
    }
}

/// Errors that stop the server from starting or running.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ServeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("route table rejected: {0}")]
    Route(#[from] RouteError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Certificate or key file unreadable or unusable.
    #[error("TLS setup failed for {path}: {reason}")]
    Tls { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_text(resp: Response) -> String {
        let bytes = match axum::body::to_bytes(resp.into_body(), 1024).await {
            Ok(b) => b,
            Err(e) => panic!("failed to read body: {e}"),
        };
        String::from_utf8_lossy(&bytes).into_owned()
    }

    #[tokio::test]
    async fn domain_errors_carry_their_message() {
        let resp = ApiError::invalid("process_uuid is required").into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(resp).await, "process_uuid is required");

        let resp = ApiError::from(RegistryError::AppNotFound("web".to_owned())).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(resp).await, "application <web> not found");
    }

    #[tokio::test]
    async fn token_errors_map_to_bad_request() {
        let resp = ApiError::from(TokenError::UnsupportedClaims).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(resp).await, "Unsupported jwt claims format");
    }

    #[tokio::test]
    async fn internal_errors_hide_detail() {
        let resp = ApiError::Internal("handler panicked at src/x.rs".to_owned()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(resp).await, UNKNOWN_EXCEPTION);
    }
}
