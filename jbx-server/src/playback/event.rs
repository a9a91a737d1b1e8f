//! Playback events emitted by the controller

use super::PlaybackState;
use jbx_common::track::QueuedTrack;

/// Events pushed onto the controller's bounded event channel.
///
/// A single consumer task drains the channel, so downstream handling
/// reflects emission order.
#[derive(Debug, Clone)]
pub enum PlaybackEvent {
    /// A track conceptually started on the remote player. Emission is
    /// delayed by the configured notification delay.
    TrackStarted { track: QueuedTrack },

    /// The current track played to completion.
    TrackEnded { track: QueuedTrack },

    /// The current track was skipped by an operator.
    TrackSkipped { track: QueuedTrack },

    /// Playback paused or resumed.
    StateChanged {
        track: Option<QueuedTrack>,
        state: PlaybackState,
    },

    /// Total remaining playtime dropped below the depletion threshold.
    QueueDepleting,

    /// The queue ran out with nothing left to play.
    QueueEmpty,
}

impl PlaybackEvent {
    /// Event type as a stable string for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            PlaybackEvent::TrackStarted { .. } => "track_started",
            PlaybackEvent::TrackEnded { .. } => "track_ended",
            PlaybackEvent::TrackSkipped { .. } => "track_skipped",
            PlaybackEvent::StateChanged { .. } => "state_changed",
            PlaybackEvent::QueueDepleting => "queue_depleting",
            PlaybackEvent::QueueEmpty => "queue_empty",
        }
    }
}
