//! Error types for the jbx server
//!
//! Module-specific error variants using thiserror. Request-level filter
//! rejections are not errors; they travel as rejection codes in the
//! request path (see `filter::RejectCode`).

use thiserror::Error;

/// Main error type for the server crate
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Catalog API errors (after retry exhaustion for transient failures)
    #[error("catalog error: {0}")]
    Catalog(String),

    /// Recommendation service errors
    #[error("recommendation error: {0}")]
    Recommendation(String),

    /// HTTP transport errors from outbound clients
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// No track is currently playing
    #[error("no track playing")]
    NoTrack,

    /// The playback queue is empty
    #[error("queue is empty")]
    QueueEmpty,

    /// Operation requires playing state
    #[error("not playing")]
    NotPlaying,

    /// Operation requires paused state
    #[error("not paused")]
    NotPaused,

    /// Session is not in a state that allows the operation
    #[error("session is not running")]
    SessionNotRunning,

    /// Resume was requested while the session is not paused
    #[error("session is not paused")]
    SessionNotPaused,

    /// A listener id did not resolve to a known session
    #[error("invalid listener")]
    InvalidListener,

    /// The listener has been kicked
    #[error("listener is kicked")]
    ListenerKicked,

    /// No BGM provider could produce a candidate
    #[error("no BGM candidates available")]
    NoBgmCandidates,

    /// Catch-all for internal invariant breaks
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using the server Error
pub type Result<T> = std::result::Result<T, Error>;
