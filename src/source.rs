//! Byte sources that feed a response body.
//!
//! A [`FileSource`] is either a one-shot [`StaticSource`] for a complete file
//! or a [`TailFollowSource`] for a file that is still being appended to. Both
//! are pulled one chunk at a time with `next_chunk`, which returns:
//!
//! - `Some(Ok(bytes))` for the next range of the file, in offset order
//! - `Some(Err(err))` once, when the source fails; it is finished afterwards
//! - `None` when the file is complete
//!
//! A growing file is polled, not watched. While its growth marker exists,
//! end-of-file means "try again after `poll_interval`". Sustained reads
//! happen back to back, but after an idle period the source observes at most
//! `block_size` bytes per `poll_interval` (10 KiB per 10 ms by default).

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::fs::{self, File};
use tokio::io::AsyncReadExt;
use tokio::time::{sleep, Instant};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::SourceError;
use crate::marker;

/// How a file is delivered, decided once per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Static,
    Growing,
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryMode::Static => f.write_str("static"),
            DeliveryMode::Growing => f.write_str("growing"),
        }
    }
}

/// Read tuning shared by all sources.
#[derive(Debug, Clone, Copy)]
pub struct FollowOptions {
    /// Maximum bytes per chunk
    pub block_size: usize,
    /// Wait between end-of-file checks while the marker exists
    pub poll_interval: Duration,
    /// Fail a growing source after this long without new bytes
    pub stall_timeout: Option<Duration>,
}

impl Default for FollowOptions {
    fn default() -> Self {
        Self {
            block_size: 10 * 1024,
            poll_interval: Duration::from_millis(10),
            stall_timeout: None,
        }
    }
}

/// Follows a file from offset 0 while an external writer appends to it.
///
/// The source terminates only after the growth marker is gone and a read
/// issued after noticing that returns zero bytes, so data appended right
/// before the marker is removed is never lost.
#[derive(Debug)]
pub struct TailFollowSource {
    path: PathBuf,
    marker: PathBuf,
    file: Option<File>,
    offset: u64,
    buf: Vec<u8>,
    options: FollowOptions,
    cancel: CancellationToken,
    last_data: Instant,
    draining: bool,
    done: bool,
}

impl TailFollowSource {
    /// Create a source for `path`, failing if the file does not exist.
    ///
    /// The marker is not inspected here. The file handle is opened on the
    /// first read.
    pub async fn open(
        path: impl Into<PathBuf>,
        marker: impl Into<PathBuf>,
        options: FollowOptions,
        cancel: CancellationToken,
    ) -> Result<Self, SourceError> {
        let path = path.into();
        if !fs::try_exists(&path).await? {
            return Err(SourceError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("File {} does not exist", path.display()),
            )));
        }

        Ok(Self {
            path,
            marker: marker.into(),
            file: None,
            offset: 0,
            buf: vec![0; options.block_size.max(1)],
            options,
            cancel,
            last_data: Instant::now(),
            draining: false,
            done: false,
        })
    }

    /// Bytes emitted so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Next chunk of the file, waiting for the writer if necessary.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes, SourceError>> {
        if self.done {
            return None;
        }

        loop {
            if self.cancel.is_cancelled() {
                return Some(Err(self.fail(SourceError::Cancelled)));
            }

            let read = match self.read_block().await {
                Ok(read) => read,
                Err(err) => return Some(Err(self.fail(err.into()))),
            };

            if read > 0 {
                self.offset += read as u64;
                self.last_data = Instant::now();
                // The buffer is reused on the next read.
                return Some(Ok(Bytes::copy_from_slice(&self.buf[..read])));
            }

            if self.draining {
                debug!(
                    "Growth finished for {} at {} bytes",
                    self.path.display(),
                    self.offset
                );
                self.close();
                return None;
            }

            match marker::is_present(&self.marker).await {
                Ok(true) => {}
                Ok(false) => {
                    // One more read picks up anything appended before removal.
                    self.draining = true;
                    continue;
                }
                Err(err) => return Some(Err(self.fail(err.into()))),
            }

            if let Some(limit) = self.options.stall_timeout {
                let idle = self.last_data.elapsed();
                if idle >= limit {
                    let err = SourceError::Stalled {
                        marker: self.marker.clone(),
                        idle_ms: idle.as_millis(),
                    };
                    return Some(Err(self.fail(err)));
                }
            }

            let poll_interval = self.options.poll_interval;
            tokio::select! {
                _ = self.cancel.cancelled() => {}
                _ = sleep(poll_interval) => {}
            }
        }
    }

    async fn read_block(&mut self) -> io::Result<usize> {
        let file = match self.file.take() {
            Some(file) => file,
            None => File::open(&self.path).await?,
        };
        let file = self.file.insert(file);
        file.read(&mut self.buf).await
    }

    fn fail(&mut self, err: SourceError) -> SourceError {
        self.close();
        err
    }

    fn close(&mut self) {
        self.file = None;
        self.done = true;
    }
}

/// Reads a complete file once, with no polling at end-of-file.
#[derive(Debug)]
pub struct StaticSource {
    stream: ReaderStream<File>,
    cancel: CancellationToken,
    done: bool,
}

impl StaticSource {
    pub async fn open(
        path: &Path,
        block_size: usize,
        cancel: CancellationToken,
    ) -> Result<Self, SourceError> {
        let file = File::open(path).await?;
        Ok(Self {
            stream: ReaderStream::with_capacity(file, block_size.max(1)),
            cancel,
            done: false,
        })
    }

    pub async fn next_chunk(&mut self) -> Option<Result<Bytes, SourceError>> {
        if self.done {
            return None;
        }
        if self.cancel.is_cancelled() {
            self.done = true;
            return Some(Err(SourceError::Cancelled));
        }

        match self.stream.next().await {
            Some(Ok(chunk)) => Some(Ok(chunk)),
            Some(Err(err)) => {
                self.done = true;
                Some(Err(err.into()))
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}

/// The source chosen for one request.
#[derive(Debug)]
pub enum FileSource {
    Static(StaticSource),
    Growing(TailFollowSource),
}

impl FileSource {
    /// Open `path`, following it if its growth marker exists right now.
    ///
    /// The decision is final: a file that gains a marker later is still
    /// served statically by this source.
    pub async fn open(
        path: &Path,
        marker_prefix: &str,
        options: FollowOptions,
        cancel: CancellationToken,
    ) -> Result<Self, SourceError> {
        let marker = marker::marker_path(path, marker_prefix).ok_or_else(|| {
            SourceError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} has no file name", path.display()),
            ))
        })?;

        if marker::is_present(&marker).await? {
            let source = TailFollowSource::open(path, marker, options, cancel).await?;
            Ok(FileSource::Growing(source))
        } else {
            let source = StaticSource::open(path, options.block_size, cancel).await?;
            Ok(FileSource::Static(source))
        }
    }

    pub fn mode(&self) -> DeliveryMode {
        match self {
            FileSource::Static(_) => DeliveryMode::Static,
            FileSource::Growing(_) => DeliveryMode::Growing,
        }
    }

    pub async fn next_chunk(&mut self) -> Option<Result<Bytes, SourceError>> {
        match self {
            FileSource::Static(source) => source.next_chunk().await,
            FileSource::Growing(source) => source.next_chunk().await,
        }
    }

    /// Adapt the source into a stream ending after completion or the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, SourceError>> + Send {
        futures::stream::unfold(self, |mut source| async move {
            source.next_chunk().await.map(|item| (item, source))
        })
    }
}
