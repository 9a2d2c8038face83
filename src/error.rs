use std::net::SocketAddr;
use std::path::PathBuf;

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Errors surfaced to HTTP clients before any body bytes are written.
#[derive(Error, Debug)]
pub enum ServeError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Path is outside root directory")]
    PathTraversal,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to open source: {0}")]
    Source(#[from] SourceError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid listen address: {0}")]
    InvalidAddress(String),
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServeError::NotFound(_) => (StatusCode::NOT_FOUND, "Page Was Not Found".to_string()),
            ServeError::PathTraversal => (StatusCode::FORBIDDEN, self.to_string()),
            ServeError::Io(_)
            | ServeError::Source(_)
            | ServeError::Bind { .. }
            | ServeError::InvalidAddress(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            }
        };

        (status, [(header::CONTENT_TYPE, "text/plain")], message).into_response()
    }
}

/// Terminal failures of a byte source while it is streaming.
///
/// Once one of these is produced the response headers have already been
/// committed, so the only remaining action is to abort the body.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stream cancelled")]
    Cancelled,

    #[error("No data for {idle_ms} ms while growth marker {marker} is present")]
    Stalled { marker: PathBuf, idle_ms: u128 },
}

impl SourceError {
    /// True when the file disappeared before the source could open it.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SourceError::Io(err) if err.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Startup configuration failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML in {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid header name {0:?}")]
    HeaderName(String),

    #[error("Invalid value for header {name:?}: {value:?}")]
    HeaderValue { name: String, value: String },
}
