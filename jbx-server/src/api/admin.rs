//! Admin endpoints (token-gated)

use super::{ActionResponse, KickRequest};
use crate::server::AppState;
use axum::extract::State;
use axum::Json;
use serde_json::json;

fn action_result<E: std::fmt::Display>(result: Result<(), E>, ok: &str) -> Json<ActionResponse> {
    match result {
        Ok(()) => Json(ActionResponse {
            success: true,
            message: ok.to_string(),
        }),
        Err(e) => Json(ActionResponse {
            success: false,
            message: e.to_string(),
        }),
    }
}

/// GET /admin/status
pub async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let status = state.manager.status();
    Json(json!({
        "queue_size": status.queue_size,
        "listener_count": status.listener_count,
        "playback_state": status.playback_state.to_string(),
        "remaining_seconds": status.remaining.as_secs(),
        "session_info": status.session_info,
        "current_track": status.track_info,
    }))
}

/// POST /admin/pause
pub async fn pause(State(state): State<AppState>) -> Json<ActionResponse> {
    action_result(state.manager.pause(), "Session paused")
}

/// POST /admin/resume
pub async fn resume(State(state): State<AppState>) -> Json<ActionResponse> {
    action_result(state.manager.resume(), "Session resumed")
}

/// POST /admin/skip
pub async fn skip(State(state): State<AppState>) -> Json<ActionResponse> {
    action_result(state.manager.skip(), "Track skipped")
}

/// POST /admin/kick
pub async fn kick(
    State(state): State<AppState>,
    Json(req): Json<KickRequest>,
) -> Json<ActionResponse> {
    action_result(
        state.manager.kick_listener(&req.listener_id),
        "Listener kicked",
    )
}

/// GET /admin/listeners
pub async fn list_listeners(State(state): State<AppState>) -> Json<serde_json::Value> {
    let listeners = state.manager.list_listeners();
    Json(json!({
        "count": listeners.len(),
        "listeners": listeners,
    }))
}

/// POST /admin/stop — graceful stop into the ending playlist
pub async fn stop(State(state): State<AppState>) -> Json<ActionResponse> {
    action_result(state.manager.stop().await, "Session stopping")
}
