use std::path::PathBuf;

use clap::Parser;
use growing_fileserver::{Config, HeaderTable, Server};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "growing-fileserver")]
#[command(about = "Static file server that can stream files while they are still being written")]
#[command(version)]
struct Cli {
    /// Root directory to serve files from
    #[arg(short, long, env = "GROWING_FILESERVER_ROOT")]
    root: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "GROWING_FILESERVER_PORT")]
    port: Option<u16>,

    /// Address to bind to (all interfaces by default)
    #[arg(short, long, env = "GROWING_FILESERVER_BIND")]
    bind: Option<String>,

    /// Directory consulted when a file is missing from the root
    #[arg(long, env = "GROWING_FILESERVER_FALLBACK")]
    fallback: Option<PathBuf>,

    /// JSON file mapping extensions to response headers
    #[arg(long, env = "GROWING_FILESERVER_HEADERS")]
    headers: Option<PathBuf>,

    /// JSON file with CORS headers added to every response
    #[arg(long, env = "GROWING_FILESERVER_CORS")]
    cors: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, env = "GROWING_FILESERVER_VERBOSE")]
    verbose: bool,

    /// Config file path (optional)
    #[arg(short, long, env = "GROWING_FILESERVER_CONFIG")]
    config: Option<PathBuf>,
}

impl Cli {
    /// Command-line values take precedence over the config file.
    fn apply(self, mut config: Config) -> Config {
        if let Some(root) = self.root {
            config.root = root;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.bind.is_some() {
            config.bind = self.bind;
        }
        if self.fallback.is_some() {
            config.fallback_dir = self.fallback;
        }
        if self.headers.is_some() {
            config.headers_file = self.headers;
        }
        if self.cors.is_some() {
            config.cors_file = self.cors;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        "growing_fileserver=debug,tower_http=debug"
    } else {
        "growing_fileserver=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load config from file if provided, otherwise use defaults
    let config = match &cli.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => Config::default(),
    };
    let mut config = cli.apply(config);

    // Resolve root directory to absolute path
    config.root = config.root.canonicalize().unwrap_or_else(|_| config.root.clone());

    if !config.root.exists() {
        return Err(format!("Root directory does not exist: {}", config.root.display()).into());
    }

    if !config.root.is_dir() {
        return Err(format!("Root path is not a directory: {}", config.root.display()).into());
    }

    info!("Serving files from: {}", config.root.display());

    let headers = HeaderTable::from_files(config.headers_file.as_deref(), config.cors_file.as_deref())?;

    let mut server = Server::new(config, headers);
    server.start().await?;

    shutdown_signal().await;

    server.stop().await?;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
