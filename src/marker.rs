//! Growth marker naming.
//!
//! A file `dir/name` is considered still growing while `dir/<prefix>name`
//! exists. The marker's content is never read.

use std::path::{Path, PathBuf};

use tokio::fs;

/// Prefix used when none is configured.
pub const DEFAULT_MARKER_PREFIX: &str = ".growing_";

/// Path of the growth marker belonging to `path`.
///
/// Returns `None` for paths without a file name (`/`, `..`).
pub fn marker_path(path: &Path, prefix: &str) -> Option<PathBuf> {
    let name = path.file_name()?;
    let mut marker = std::ffi::OsString::from(prefix);
    marker.push(name);
    Some(path.with_file_name(marker))
}

/// Whether the marker at `marker` currently exists.
pub async fn is_present(marker: &Path) -> std::io::Result<bool> {
    fs::try_exists(marker).await
}
