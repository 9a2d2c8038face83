//! HTTP file server that can stream files while they are still being written.
//!
//! A file `dir/name` is "growing" while a marker file `dir/.growing_name`
//! exists. Requests for a growing file are answered with a chunked body that
//! follows the file as it is appended to, and ends once the marker is removed
//! and every byte has been sent. All other files are served once, as-is.

pub mod config;
pub mod error;
pub mod handlers;
pub mod headers;
pub mod marker;
pub mod routes;
pub mod server;
pub mod session;
pub mod source;

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use config::Config;
pub use error::{ConfigError, ServeError, SourceError};
pub use headers::HeaderTable;
pub use server::Server;
pub use source::{DeliveryMode, FileSource, FollowOptions, StaticSource, TailFollowSource};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Root directory to serve files from
    pub root_dir: PathBuf,
    /// Consulted when `root_dir` has no match
    pub fallback_dir: Option<PathBuf>,
    /// Configuration
    pub config: Arc<Config>,
    /// Response headers by extension
    pub headers: Arc<HeaderTable>,
    /// Parent of every source's cancellation token
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Create state from a config and a loaded header table.
    ///
    /// A configured fallback directory that does not exist is ignored.
    pub fn new(config: Config, headers: HeaderTable) -> Self {
        let fallback_dir = match &config.fallback_dir {
            Some(dir) if dir.is_dir() => {
                info!("Set fallback dir to: {}", dir.display());
                Some(dir.clone())
            }
            Some(dir) => {
                warn!("Ignoring missing fallback dir: {}", dir.display());
                None
            }
            None => None,
        };

        Self {
            root_dir: config.root.clone(),
            fallback_dir,
            headers: Arc::new(headers.with_content_type_guess(config.guess_content_type)),
            config: Arc::new(config),
            shutdown: CancellationToken::new(),
        }
    }

    /// Replace the token that cancels all in-flight sources.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }
}
