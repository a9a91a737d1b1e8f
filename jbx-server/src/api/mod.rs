//! HTTP API surface
//!
//! Listener endpoints are open; admin endpoints sit behind the token
//! middleware. The notification stream is served as SSE.

pub mod admin;
pub mod auth_middleware;
pub mod listener;

use serde::{Deserialize, Serialize};

/// POST /join request body
#[derive(Debug, Deserialize)]
pub struct JoinRequest {
    pub display_name: String,
    #[serde(default)]
    pub external_user_id: String,
}

/// POST /join response body
#[derive(Debug, Serialize)]
pub struct JoinResponse {
    pub listener_id: String,
}

/// POST /request request body
#[derive(Debug, Deserialize)]
pub struct RequestTrackRequest {
    pub listener_id: String,
    /// Bare id, URI, or URL
    pub track: String,
}

/// POST /request response body
#[derive(Debug, Serialize)]
pub struct RequestTrackResponse {
    pub accepted: bool,
    pub code: String,
    pub message: String,
}

/// POST /admin/kick request body
#[derive(Debug, Deserialize)]
pub struct KickRequest {
    pub listener_id: String,
}

/// Generic admin action response
#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
}
