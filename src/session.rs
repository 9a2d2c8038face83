//! Per-response state and the loop that drives a source into a body.

use std::path::PathBuf;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::SourceError;
use crate::source::{DeliveryMode, FileSource};

/// Sending half of a response body.
pub type BodySender = mpsc::Sender<Result<Bytes, SourceError>>;

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The source completed and the body was ended normally.
    Completed,
    /// The source failed; the body was aborted.
    Failed,
    /// The client went away first; the source was cancelled.
    Disconnected,
}

/// One response being streamed.
#[derive(Debug)]
pub struct ResponseSession {
    id: Uuid,
    request_path: String,
    local_path: PathBuf,
    mode: DeliveryMode,
    bytes_written: u64,
}

impl ResponseSession {
    pub fn new(
        id: Uuid,
        request_path: impl Into<String>,
        local_path: impl Into<PathBuf>,
        mode: DeliveryMode,
    ) -> Self {
        Self {
            id,
            request_path: request_path.into(),
            local_path: local_path.into(),
            mode,
            bytes_written: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Forward every chunk of `source` into `tx` until it completes, fails,
    /// or the receiver is dropped.
    ///
    /// `tx` is bounded, so a slow client suspends reading. A blocked send
    /// still yields to `cancel`. Errors are passed through to the body, which
    /// makes the transport abort the response instead of terminating it
    /// cleanly. The source is dropped before the error is delivered, so its
    /// file handle is released even while the client is not reading.
    pub async fn pump(
        mut self,
        mut source: FileSource,
        tx: BodySender,
        cancel: CancellationToken,
    ) -> (SessionOutcome, u64) {
        info!(
            "{}-({}) {} read of {}",
            self.id,
            self.request_path,
            self.mode,
            self.local_path.display()
        );

        let (outcome, failure) = loop {
            let next = tokio::select! {
                biased;
                _ = tx.closed() => break (SessionOutcome::Disconnected, None),
                next = source.next_chunk() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    let len = chunk.len() as u64;
                    let sent = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        sent = tx.send(Ok(chunk)) => Some(sent.is_ok()),
                    };
                    match sent {
                        Some(true) => {}
                        Some(false) => break (SessionOutcome::Disconnected, None),
                        None => break (SessionOutcome::Failed, Some(SourceError::Cancelled)),
                    }
                    self.bytes_written += len;
                    debug!(
                        "{}-({}) Write length: {}",
                        self.id, self.request_path, self.bytes_written
                    );
                }
                Some(Err(err)) => break (SessionOutcome::Failed, Some(err)),
                None => {
                    info!(
                        "{}-({}) Write closed! Written length: {}",
                        self.id, self.request_path, self.bytes_written
                    );
                    break (SessionOutcome::Completed, None);
                }
            }
        };

        drop(source);

        if outcome == SessionOutcome::Disconnected {
            info!(
                "{}-({}) Client disconnected after {} bytes",
                self.id, self.request_path, self.bytes_written
            );
            cancel.cancel();
        }

        if let Some(err) = failure {
            error!(
                "{}-({}) Error reading {} after {} bytes: {}",
                self.id,
                self.request_path,
                self.local_path.display(),
                self.bytes_written,
                err
            );
            if tx.send(Err(err)).await.is_err() {
                debug!("{}-({}) Client already gone", self.id, self.request_path);
            }
        }

        (outcome, self.bytes_written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    use crate::marker::{marker_path, DEFAULT_MARKER_PREFIX};
    use crate::source::FollowOptions;

    fn options() -> FollowOptions {
        FollowOptions {
            block_size: 4,
            poll_interval: Duration::from_millis(5),
            stall_timeout: None,
        }
    }

    async fn open(path: &Path, cancel: &CancellationToken) -> FileSource {
        FileSource::open(path, DEFAULT_MARKER_PREFIX, options(), cancel.clone())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_pump_forwards_in_order_and_completes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"0123456789").unwrap();

        let cancel = CancellationToken::new();
        let source = open(&path, &cancel).await;
        let session = ResponseSession::new(Uuid::new_v4(), "a.txt", &path, source.mode());
        let (tx, mut rx) = mpsc::channel(1);

        let pump = tokio::spawn(session.pump(source, tx, cancel.clone()));

        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk.unwrap());
        }

        assert_eq!(chunks, vec![&b"0123"[..], &b"4567"[..], &b"89"[..]]);
        assert_eq!(pump.await.unwrap(), (SessionOutcome::Completed, 10));
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_pump_cancels_source_when_client_leaves() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("live.ts");
        std::fs::write(&path, b"abc").unwrap();
        std::fs::write(marker_path(&path, DEFAULT_MARKER_PREFIX).unwrap(), b"").unwrap();

        let cancel = CancellationToken::new();
        let source = open(&path, &cancel).await;
        assert_eq!(source.mode(), DeliveryMode::Growing);
        let session = ResponseSession::new(Uuid::new_v4(), "live.ts", &path, source.mode());
        let (tx, mut rx) = mpsc::channel(4);

        let pump = tokio::spawn(session.pump(source, tx, cancel.clone()));

        assert_eq!(rx.recv().await.unwrap().unwrap(), &b"abc"[..]);
        drop(rx);

        let result = tokio::time::timeout(Duration::from_secs(5), pump)
            .await
            .expect("pump should notice the disconnect")
            .unwrap();
        assert_eq!(result, (SessionOutcome::Disconnected, 3));
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_pump_forwards_source_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("live.ts");
        std::fs::write(&path, b"abc").unwrap();
        std::fs::write(marker_path(&path, DEFAULT_MARKER_PREFIX).unwrap(), b"").unwrap();

        let cancel = CancellationToken::new();
        let source = open(&path, &cancel).await;
        let session = ResponseSession::new(Uuid::new_v4(), "live.ts", &path, source.mode());
        let (tx, mut rx) = mpsc::channel(4);

        let pump = tokio::spawn(session.pump(source, tx, cancel.clone()));
        assert_eq!(rx.recv().await.unwrap().unwrap(), &b"abc"[..]);

        cancel.cancel();
        assert!(matches!(
            rx.recv().await,
            Some(Err(SourceError::Cancelled))
        ));
        assert!(rx.recv().await.is_none());
        assert_eq!(pump.await.unwrap(), (SessionOutcome::Failed, 3));
    }

    #[tokio::test]
    async fn test_pump_cancel_releases_blocked_send() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.bin");
        std::fs::write(&path, vec![7u8; 4096]).unwrap();

        let cancel = CancellationToken::new();
        let source = open(&path, &cancel).await;
        let session = ResponseSession::new(Uuid::new_v4(), "big.bin", &path, source.mode());
        let (tx, mut rx) = mpsc::channel(1);

        let pump = tokio::spawn(session.pump(source, tx, cancel.clone()));

        // Nobody reads, so the pump parks on the second send.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pump.is_finished());
        cancel.cancel();

        assert_eq!(rx.recv().await.unwrap().unwrap(), &[7u8; 4][..]);
        assert!(matches!(
            rx.recv().await,
            Some(Err(SourceError::Cancelled))
        ));
        assert!(rx.recv().await.is_none());

        let result = tokio::time::timeout(Duration::from_secs(5), pump)
            .await
            .expect("pump stayed blocked after cancel")
            .unwrap();
        assert_eq!(result, (SessionOutcome::Failed, 4));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pump_aborts_on_read_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("segments");
        std::fs::create_dir(&path).unwrap();

        // Opening a directory succeeds, reading it fails with EISDIR.
        let cancel = CancellationToken::new();
        let source = open(&path, &cancel).await;
        let session = ResponseSession::new(Uuid::new_v4(), "segments", &path, source.mode());
        let (tx, mut rx) = mpsc::channel(4);

        let pump = tokio::spawn(session.pump(source, tx, cancel.clone()));

        assert!(matches!(rx.recv().await, Some(Err(SourceError::Io(_)))));
        assert!(rx.recv().await.is_none());
        assert_eq!(pump.await.unwrap(), (SessionOutcome::Failed, 0));
        assert!(!cancel.is_cancelled());
    }
}
