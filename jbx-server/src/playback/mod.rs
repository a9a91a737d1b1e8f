//! Playback control with integrated queue management
//!
//! The [`Controller`] owns the queue, the played history, the current
//! track, and a virtual wall-clock that simulates what the remote player
//! is doing without any feedback from it. Consumers read playback
//! progress from [`Controller::remaining_duration`] and react to the
//! event stream obtained from [`Controller::take_events`].

mod controller;
mod event;

pub use controller::{Controller, PlaybackConfig};
pub use event::PlaybackEvent;

use serde::{Deserialize, Serialize};

/// Playback state of the virtual player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    /// No track playing (queue empty or stopped)
    Idle,
    /// Track is playing
    Playing,
    /// Track is paused
    Paused,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Idle => write!(f, "idle"),
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Paused => write!(f, "paused"),
        }
    }
}
