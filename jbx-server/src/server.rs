//! HTTP server assembly

use crate::api;
use crate::config::Config;
use crate::session::SessionManager;
use axum::http::StatusCode;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
    pub config: Arc<Config>,
}

/// Build the full router: listener surface, SSE stream, and the
/// token-gated admin surface.
pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/admin/status", get(api::admin::status))
        .route("/admin/pause", post(api::admin::pause))
        .route("/admin/resume", post(api::admin::resume))
        .route("/admin/skip", post(api::admin::skip))
        .route("/admin/kick", post(api::admin::kick))
        .route("/admin/listeners", get(api::admin::list_listeners))
        .route("/admin/stop", post(api::admin::stop))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            api::auth_middleware::require_admin_token,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/join", post(api::listener::join))
        .route("/request", post(api::listener::request_track))
        .route("/notifications", get(api::listener::subscribe_notifications))
        .merge(admin)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> StatusCode {
    StatusCode::OK
}
