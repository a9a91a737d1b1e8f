//! Listener session entity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A connected listener's session state.
///
/// `pending_count` tracks requests that have not started playing yet; it
/// saturates at zero on decrement. `kicked` only ever moves to true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenerSession {
    /// Session UUID
    pub id: String,
    /// Display name
    pub display_name: String,
    /// External user id for bot integrations, empty if none
    #[serde(default)]
    pub external_user_id: String,
    /// Join time
    pub joined_at: DateTime<Utc>,
    /// Number of requested tracks waiting to start playing
    pub pending_count: u32,
    /// Total requests across the session
    pub total_requests: u32,
    /// Last request time
    pub last_request_at: Option<DateTime<Utc>>,
    /// VIP listeners bypass pending-count gating
    pub vip: bool,
    /// Kicked status, monotonic true
    pub kicked: bool,
}

impl ListenerSession {
    pub fn new(id: String, display_name: String, external_user_id: String, vip: bool) -> Self {
        Self {
            id,
            display_name,
            external_user_id,
            joined_at: Utc::now(),
            pending_count: 0,
            total_requests: 0,
            last_request_at: None,
            vip,
            kicked: false,
        }
    }

    /// Record a newly accepted request.
    pub fn increment_pending(&mut self) {
        self.pending_count += 1;
        self.total_requests += 1;
        self.last_request_at = Some(Utc::now());
    }

    /// Record that a requested track started playing. Saturates at zero.
    pub fn decrement_pending(&mut self) {
        self.pending_count = self.pending_count.saturating_sub(1);
    }

    /// Mark the listener as kicked.
    pub fn kick(&mut self) {
        self.kicked = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> ListenerSession {
        ListenerSession::new(
            "id-1".to_string(),
            "Alice".to_string(),
            String::new(),
            false,
        )
    }

    #[test]
    fn test_pending_round_trip() {
        let mut s = session();
        s.increment_pending();
        assert_eq!(s.pending_count, 1);
        assert_eq!(s.total_requests, 1);
        assert!(s.last_request_at.is_some());

        s.decrement_pending();
        assert_eq!(s.pending_count, 0);
    }

    #[test]
    fn test_decrement_at_zero_is_noop() {
        let mut s = session();
        s.decrement_pending();
        assert_eq!(s.pending_count, 0);
    }

    #[test]
    fn test_kick_is_monotonic() {
        let mut s = session();
        s.kick();
        assert!(s.kicked);
        s.kick();
        assert!(s.kicked);
    }
}
