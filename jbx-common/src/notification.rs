//! Notification wire types
//!
//! These are the JSON payloads pushed to every subscribed listener over
//! the notification stream. Sequence numbers are assigned by the server's
//! notification hub in a single totally ordered stream, so all
//! subscribers observe the same order.

use serde::{Deserialize, Serialize};

/// Kind of notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    /// Snapshot sent once to each new subscriber, before any other event
    InitialState,
    /// Session lifecycle or playback state changed
    ChangeState,
    /// Current track changed (started or skipped)
    ChangeTrack,
}

/// Session state as presented to listeners.
///
/// Collapses the internal phase and playback state into one value:
/// waiting maps to `Waiting`; active maps to `Running`, `Paused`, or
/// `WaitingForTracks` depending on playback; ending and terminated map
/// directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Waiting,
    Running,
    Paused,
    WaitingForTracks,
    Ending,
    Terminated,
}

/// Track state carried in CHANGE_TRACK / INITIAL_STATE notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackState {
    Started,
    Skipped,
    Playing,
    Paused,
}

/// Session snapshot carried in every notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub playlist_name: String,
    pub playlist_url: String,
    pub keywords: Vec<String>,
    /// RFC3339, empty when no start time is scheduled
    #[serde(default)]
    pub scheduled_start_time: String,
    /// RFC3339, empty when no end time is scheduled
    #[serde(default)]
    pub scheduled_end_time: String,
    pub state: SessionState,
    pub accepting_requests: bool,
}

/// Track snapshot carried in CHANGE_TRACK and INITIAL_STATE notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub track_id: String,
    pub name: String,
    pub artists: Vec<String>,
    /// Track URL, with session playlist context when available
    pub url: String,
    pub album_art_url: String,
    pub requester_name: String,
    #[serde(default)]
    pub requester_external_user_id: String,
    pub requester_type: String,
    pub playlist_url: String,
    pub remaining_seconds: i32,
    pub state: TrackState,
}

/// A single notification as sent on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Strictly increasing across the whole stream
    pub sequence_no: u64,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub session_info: SessionInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_info: Option<TrackInfo>,
}

impl Notification {
    /// Notification type as a stable string, for logging and SSE event names
    pub fn type_name(&self) -> &'static str {
        match self.notification_type {
            NotificationType::InitialState => "INITIAL_STATE",
            NotificationType::ChangeState => "CHANGE_STATE",
            NotificationType::ChangeTrack => "CHANGE_TRACK",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_info() -> SessionInfo {
        SessionInfo {
            session_id: "s1".to_string(),
            playlist_name: "Friday Session".to_string(),
            playlist_url: "https://example.com/p/1".to_string(),
            keywords: vec!["friday".to_string()],
            scheduled_start_time: String::new(),
            scheduled_end_time: String::new(),
            state: SessionState::Running,
            accepting_requests: true,
        }
    }

    #[test]
    fn test_notification_json_shape() {
        let n = Notification {
            sequence_no: 7,
            notification_type: NotificationType::ChangeState,
            session_info: session_info(),
            track_info: None,
        };
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["sequence_no"], 7);
        assert_eq!(json["type"], "CHANGE_STATE");
        assert_eq!(json["session_info"]["state"], "RUNNING");
        // track_info is omitted entirely when absent
        assert!(json.get("track_info").is_none());
    }

    #[test]
    fn test_type_name() {
        let mut n = Notification {
            sequence_no: 1,
            notification_type: NotificationType::InitialState,
            session_info: session_info(),
            track_info: None,
        };
        assert_eq!(n.type_name(), "INITIAL_STATE");
        n.notification_type = NotificationType::ChangeTrack;
        assert_eq!(n.type_name(), "CHANGE_TRACK");
    }
}
