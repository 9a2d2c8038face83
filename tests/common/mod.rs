//! Test utilities and common setup.

#![allow(dead_code)]

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Method, Request, Response},
    Router,
};
use futures::StreamExt;
use growing_fileserver::{routes, AppState, Config, HeaderTable};
use tower::ServiceExt;

/// Create a test application serving `root` with default settings.
pub fn test_app(root: &Path) -> Router {
    test_app_with(Config::for_root(root), HeaderTable::default())
}

/// Create a test application from an explicit config and header table.
pub fn test_app_with(config: Config, headers: HeaderTable) -> Router {
    routes::app(AppState::new(config, headers))
}

/// Issue a GET for `uri` against the router.
pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    app.clone()
        .oneshot(
            Request::builder()
                .uri(uri)
                .method(Method::GET)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

/// Collect a whole body, failing the test if it does not end within `limit`.
pub async fn read_body(response: Response<Body>, limit: Duration) -> Result<Vec<u8>, axum::Error> {
    tokio::time::timeout(limit, async move {
        let mut stream = response.into_body().into_data_stream();
        let mut body = Vec::new();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk?);
        }
        Ok::<_, axum::Error>(body)
    })
    .await
    .expect("response body did not finish in time")
}

/// Append `data` to an existing file.
pub fn append(path: &Path, data: &[u8]) {
    let mut file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(data).unwrap();
}
