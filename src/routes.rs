use axum::{routing::get, Router};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::AppState;

/// Create file serving routes
pub fn file_routes() -> Router<AppState> {
    Router::new()
        .route("/*path", get(handlers::serve_file))
        .fallback(handlers::not_found)
}

/// Full application router with request tracing.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(file_routes())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
