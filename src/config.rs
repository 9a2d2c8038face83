use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ServeError};
use crate::marker::DEFAULT_MARKER_PREFIX;
use crate::source::FollowOptions;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Primary directory to serve files from
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Port to listen on (0 picks an ephemeral port)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Address to bind to; all interfaces when unset
    #[serde(default)]
    pub bind: Option<String>,

    /// Secondary root consulted when the primary one has no match
    #[serde(default)]
    pub fallback_dir: Option<PathBuf>,

    /// JSON file mapping extensions to response headers
    #[serde(default)]
    pub headers_file: Option<PathBuf>,

    /// JSON file with CORS headers merged over the extension headers
    #[serde(default)]
    pub cors_file: Option<PathBuf>,

    /// Prefix that turns `name` into its growth marker `<prefix>name`
    #[serde(default = "default_marker_prefix")]
    pub marker_prefix: String,

    /// Bytes requested per read
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    /// Delay between end-of-file polls of a growing file
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Chunks buffered between a source and its response before reads pause
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Give up on a growing file after this long without new bytes
    #[serde(default)]
    pub stall_timeout_secs: Option<u64>,

    /// Fill in Content-Type from the extension when no header entry sets it
    #[serde(default = "default_guess_content_type")]
    pub guess_content_type: bool,

    /// How long `stop` waits for open connections before dropping them
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_port() -> u16 {
    8088
}

fn default_marker_prefix() -> String {
    DEFAULT_MARKER_PREFIX.to_string()
}

// With the default poll interval this caps a polled file at ~1 MiB/s.
fn default_block_size() -> usize {
    10 * 1024
}

fn default_poll_interval_ms() -> u64 {
    10
}

fn default_channel_capacity() -> usize {
    16
}

fn default_guess_content_type() -> bool {
    true
}

fn default_shutdown_grace_ms() -> u64 {
    5000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: default_root(),
            port: default_port(),
            bind: None,
            fallback_dir: None,
            headers_file: None,
            cors_file: None,
            marker_prefix: default_marker_prefix(),
            block_size: default_block_size(),
            poll_interval_ms: default_poll_interval_ms(),
            channel_capacity: default_channel_capacity(),
            stall_timeout_secs: None,
            guess_content_type: default_guess_content_type(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl Config {
    /// Config serving `root` with every other setting at its default.
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Load config from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Socket address the server listens on.
    pub fn listen_addr(&self) -> Result<SocketAddr, ServeError> {
        let ip = match self.bind.as_deref() {
            None => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Some(bind) => bind
                .parse()
                .map_err(|_| ServeError::InvalidAddress(bind.to_string()))?,
        };
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Read tuning handed to every source.
    pub fn follow_options(&self) -> FollowOptions {
        FollowOptions {
            block_size: self.block_size.max(1),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            stall_timeout: self.stall_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
