use std::path::{Component, Path, PathBuf};

use axum::{
    body::Body,
    extract::{Path as UrlPath, State},
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
};
use tokio::fs;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::ServeError;
use crate::session::ResponseSession;
use crate::source::FileSource;
use crate::AppState;

// ============================================================================
// Path resolution
// ============================================================================

/// Strip every leading separator so the URL path is relative to a root.
pub fn clean_request_path(path: &str) -> &str {
    path.trim_start_matches(std::path::is_separator)
}

/// Resolve and validate a path, ensuring it's within the root directory.
///
/// The path is built component by component: `..`, absolute components and
/// NUL bytes are rejected outright rather than normalised.
pub fn resolve_path(root: &Path, relative: &str) -> Result<PathBuf, ServeError> {
    let relative = clean_request_path(relative);

    if relative.is_empty() || relative == "." {
        return Ok(root.to_path_buf());
    }

    let mut result = root.to_path_buf();

    for component in Path::new(relative).components() {
        match component {
            Component::Normal(name) => {
                if name.to_string_lossy().contains('\0') {
                    warn!("Path component contains null byte: {:?}", name);
                    return Err(ServeError::PathTraversal);
                }
                result.push(name);
            }
            Component::ParentDir => {
                warn!("Path traversal attempt detected: parent directory (..) in path");
                return Err(ServeError::PathTraversal);
            }
            Component::CurDir => continue,
            Component::RootDir | Component::Prefix(_) => {
                warn!("Absolute path component in relative path");
                return Err(ServeError::PathTraversal);
            }
        }
    }

    if !result.starts_with(root) {
        error!("Path resolution resulted in path outside root: {:?}", result);
        return Err(ServeError::PathTraversal);
    }

    Ok(result)
}

/// Regular file for `relative` under `root`, if there is one.
///
/// Symlinks are followed for the containment check only; the returned path
/// keeps the requested name so the growth marker is looked up beside it.
pub async fn resolve_file(root: &Path, relative: &str) -> Result<Option<PathBuf>, ServeError> {
    let built_path = resolve_path(root, relative)?;

    let metadata = match fs::metadata(&built_path).await {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(ServeError::Io(err)),
    };
    if !metadata.is_file() {
        return Ok(None);
    }

    let canonical_root = fs::canonicalize(root).await?;
    let canonical_path = fs::canonicalize(&built_path).await?;
    if !canonical_path.starts_with(&canonical_root) {
        warn!(
            "Symlink escape attempt: {:?} resolved to {:?} which is outside {:?}",
            built_path, canonical_path, canonical_root
        );
        return Err(ServeError::PathTraversal);
    }

    Ok(Some(built_path))
}

/// Look in the base directory first, then in the fallback directory.
pub async fn locate_file(state: &AppState, relative: &str) -> Result<Option<PathBuf>, ServeError> {
    if let Some(path) = resolve_file(&state.root_dir, relative).await? {
        return Ok(Some(path));
    }

    match &state.fallback_dir {
        Some(fallback) => resolve_file(fallback, relative).await,
        None => Ok(None),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /*path - Stream a file, following it while its growth marker exists
pub async fn serve_file(
    State(state): State<AppState>,
    UrlPath(request_path): UrlPath<String>,
) -> Result<Response, ServeError> {
    let id = Uuid::new_v4();
    let relative = clean_request_path(&request_path);

    let Some(local_path) = locate_file(&state, relative).await? else {
        info!("{}-404: {}. Not found", id, relative);
        return Err(ServeError::NotFound(relative.to_string()));
    };

    debug!("{}-({}) Local: {}", id, relative, local_path.display());

    let cancel = state.shutdown.child_token();
    let source = open_source(&state, id, relative, &local_path, cancel.clone()).await?;

    let headers = state.headers.for_path(relative);
    let (tx, rx) = mpsc::channel(state.config.channel_capacity.max(1));

    let session = ResponseSession::new(id, relative, local_path, source.mode());
    let span = info_span!("session", id = %session.id(), path = %relative);
    tokio::spawn(session.pump(source, tx, cancel).instrument(span));

    Ok((
        StatusCode::OK,
        headers,
        Body::from_stream(ReceiverStream::new(rx)),
    )
        .into_response())
}

/// Open the source for a located file.
///
/// A file that disappeared since it was located is a 404; any other failure
/// is a 500.
pub async fn open_source(
    state: &AppState,
    id: Uuid,
    relative: &str,
    local_path: &Path,
    cancel: CancellationToken,
) -> Result<FileSource, ServeError> {
    match FileSource::open(
        local_path,
        &state.config.marker_prefix,
        state.config.follow_options(),
        cancel,
    )
    .await
    {
        Ok(source) => Ok(source),
        Err(err) if err.is_not_found() => {
            warn!(
                "{}-({}) {} vanished before it could be opened",
                id,
                relative,
                local_path.display()
            );
            Err(ServeError::NotFound(relative.to_string()))
        }
        Err(err) => {
            error!(
                "{}-({}) Failed to open {}: {}",
                id,
                relative,
                local_path.display(),
                err
            );
            Err(err.into())
        }
    }
}

/// Anything that does not name a file
pub async fn not_found(uri: Uri) -> ServeError {
    info!("404: {}", uri.path());
    ServeError::NotFound(uri.path().to_string())
}
