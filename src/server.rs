//! Start/stop control around the HTTP listener.

use std::io;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::ServeError;
use crate::headers::HeaderTable;
use crate::routes;
use crate::AppState;

struct Running {
    addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<io::Result<()>>,
}

/// A file server that can be started and stopped.
pub struct Server {
    state: AppState,
    running: Option<Running>,
}

impl Server {
    pub fn new(config: Config, headers: HeaderTable) -> Self {
        Self {
            state: AppState::new(config, headers),
            running: None,
        }
    }

    /// Address the server is listening on, while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.addr)
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Bind the listener and begin accepting connections.
    ///
    /// Calling this on a running server returns its current address.
    pub async fn start(&mut self) -> Result<SocketAddr, ServeError> {
        if let Some(running) = &self.running {
            return Ok(running.addr);
        }

        let addr = self.state.config.listen_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServeError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        let shutdown = CancellationToken::new();
        let app = routes::app(self.state.clone().with_shutdown(shutdown.clone()));
        let signal = shutdown.clone();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await
        });

        info!("Server listening on {}", local_addr);
        self.running = Some(Running {
            addr: local_addr,
            shutdown,
            task,
        });

        Ok(local_addr)
    }

    /// Stop accepting connections, abort in-flight streams and wait until
    /// the listener is fully closed.
    ///
    /// Connections still draining after `shutdown_grace_ms` (a client that
    /// stopped reading, say) are left behind and the listener is dropped.
    /// Returns immediately when the server is not running.
    pub async fn stop(&mut self) -> Result<(), ServeError> {
        let Some(mut running) = self.running.take() else {
            return Ok(());
        };

        info!("Stopping server on {}", running.addr);
        running.shutdown.cancel();

        let grace = self.state.config.shutdown_grace();
        match timeout(grace, &mut running.task).await {
            Ok(Ok(result)) => result?,
            Ok(Err(err)) => {
                error!("Server task on {} failed: {}", running.addr, err);
                return Err(ServeError::Io(io::Error::other(err)));
            }
            Err(_) => {
                warn!(
                    "Connections on {} still open after {:?}, closing listener",
                    running.addr, grace
                );
                running.task.abort();
                // Resolves once the aborted task has dropped the listener.
                let _ = running.task.await;
            }
        }

        info!("Server on {} closed", running.addr);
        Ok(())
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.shutdown.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn local_config(root: &std::path::Path) -> Config {
        Config {
            port: 0,
            bind: Some("127.0.0.1".to_string()),
            ..Config::for_root(root)
        }
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut server = Server::new(local_config(dir.path()), HeaderTable::default());

        let first = server.start().await.unwrap();
        let second = server.start().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(server.local_addr(), Some(first));

        server.stop().await.unwrap();
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let dir = TempDir::new().unwrap();
        let mut server = Server::new(local_config(dir.path()), HeaderTable::default());

        server.stop().await.unwrap();
        server.stop().await.unwrap();
        assert!(server.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_start_reports_bind_failure() {
        let dir = TempDir::new().unwrap();
        let mut first = Server::new(local_config(dir.path()), HeaderTable::default());
        let addr = first.start().await.unwrap();

        let config = Config {
            port: addr.port(),
            ..local_config(dir.path())
        };
        let mut second = Server::new(config, HeaderTable::default());
        assert!(matches!(
            second.start().await,
            Err(ServeError::Bind { .. })
        ));

        first.stop().await.unwrap();
    }
}
