//! Session state store
//!
//! Holds the lifecycle phase, the acceptance gate, schedule, and the
//! session playlist identity. The phase only ever moves forward through
//! waiting → active → ending → terminated; attempts to move backward are
//! ignored.

use chrono::{DateTime, Utc};
use jbx_common::notification::{SessionInfo, SessionState};
use std::sync::RwLock;
use std::time::Duration;
use tracing::warn;

/// Session lifecycle phase, ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionPhase {
    Waiting,
    Active,
    Ending,
    Terminated,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionPhase::Waiting => write!(f, "WAITING"),
            SessionPhase::Active => write!(f, "ACTIVE"),
            SessionPhase::Ending => write!(f, "ENDING"),
            SessionPhase::Terminated => write!(f, "TERMINATED"),
        }
    }
}

struct StateInner {
    phase: SessionPhase,
    accepting: bool,

    playlist_id: String,
    playlist_url: String,
    playlist_name: String,

    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    ending_duration: Duration,

    keywords: Vec<String>,
}

/// Thread-safe session state
pub struct StateStore {
    session_id: String,
    inner: RwLock<StateInner>,
}

impl StateStore {
    pub fn new(session_id: String) -> Self {
        Self {
            session_id,
            inner: RwLock::new(StateInner {
                phase: SessionPhase::Waiting,
                accepting: false,
                playlist_id: String::new(),
                playlist_url: String::new(),
                playlist_name: String::new(),
                start_time: None,
                end_time: None,
                ending_duration: Duration::ZERO,
                keywords: Vec::new(),
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.read().unwrap().phase
    }

    /// Advance the phase. Backward or repeated transitions are ignored;
    /// the phase is monotonic and `Terminated` is final.
    pub fn set_phase(&self, phase: SessionPhase) {
        let mut inner = self.inner.write().unwrap();
        if phase <= inner.phase {
            if phase < inner.phase {
                warn!(current = %inner.phase, requested = %phase, "ignoring phase regression");
            }
            return;
        }
        inner.phase = phase;
    }

    /// Atomically move active → ending, closing the acceptance gate.
    /// Returns false when the session was not active, so only one caller
    /// performs the ending transition.
    pub fn begin_ending(&self) -> bool {
        let mut inner = self.inner.write().unwrap();
        if inner.phase != SessionPhase::Active {
            return false;
        }
        inner.phase = SessionPhase::Ending;
        inner.accepting = false;
        true
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.read().unwrap().accepting
    }

    pub fn start_accepting(&self) {
        let mut inner = self.inner.write().unwrap();
        // Accepting implies active
        if inner.phase == SessionPhase::Active {
            inner.accepting = true;
        }
    }

    pub fn stop_accepting(&self) {
        self.inner.write().unwrap().accepting = false;
    }

    /// Whether USER requests may enter the queue: active phase with the
    /// acceptance gate open.
    pub fn can_accept_requests(&self) -> bool {
        let inner = self.inner.read().unwrap();
        inner.phase == SessionPhase::Active && inner.accepting
    }

    pub fn set_playlist_info(&self, id: String, url: String, name: String) {
        let mut inner = self.inner.write().unwrap();
        inner.playlist_id = id;
        inner.playlist_url = url;
        inner.playlist_name = name;
    }

    pub fn playlist_id(&self) -> String {
        self.inner.read().unwrap().playlist_id.clone()
    }

    pub fn playlist_url(&self) -> String {
        self.inner.read().unwrap().playlist_url.clone()
    }

    pub fn set_keywords(&self, keywords: Vec<String>) {
        self.inner.write().unwrap().keywords = keywords;
    }

    pub fn set_times(&self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) {
        let mut inner = self.inner.write().unwrap();
        inner.start_time = start;
        inner.end_time = end;
    }

    pub fn times(&self) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        let inner = self.inner.read().unwrap();
        (inner.start_time, inner.end_time)
    }

    pub fn set_ending_duration(&self, duration: Duration) {
        self.inner.write().unwrap().ending_duration = duration;
    }

    /// Total playtime of the configured ending playlist, zero when none.
    pub fn ending_duration(&self) -> Duration {
        self.inner.read().unwrap().ending_duration
    }

    /// Build the wire snapshot with the given presented state.
    pub fn build_session_info(&self, state: SessionState) -> SessionInfo {
        let inner = self.inner.read().unwrap();
        SessionInfo {
            session_id: self.session_id.clone(),
            playlist_name: inner.playlist_name.clone(),
            playlist_url: inner.playlist_url.clone(),
            keywords: inner.keywords.clone(),
            scheduled_start_time: inner
                .start_time
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
            scheduled_end_time: inner.end_time.map(|t| t.to_rfc3339()).unwrap_or_default(),
            state,
            accepting_requests: inner.accepting,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> StateStore {
        StateStore::new("session-1".to_string())
    }

    #[test]
    fn test_initial_state() {
        let s = store();
        assert_eq!(s.phase(), SessionPhase::Waiting);
        assert!(!s.is_accepting());
        assert!(!s.can_accept_requests());
    }

    #[test]
    fn test_phase_is_monotonic() {
        let s = store();
        s.set_phase(SessionPhase::Active);
        assert_eq!(s.phase(), SessionPhase::Active);

        // Backward transition ignored
        s.set_phase(SessionPhase::Waiting);
        assert_eq!(s.phase(), SessionPhase::Active);

        s.set_phase(SessionPhase::Terminated);
        assert_eq!(s.phase(), SessionPhase::Terminated);

        // Terminated is final
        s.set_phase(SessionPhase::Ending);
        assert_eq!(s.phase(), SessionPhase::Terminated);
    }

    #[test]
    fn test_accepting_implies_active() {
        let s = store();
        // Cannot open the gate while waiting
        s.start_accepting();
        assert!(!s.is_accepting());

        s.set_phase(SessionPhase::Active);
        s.start_accepting();
        assert!(s.is_accepting());
        assert!(s.can_accept_requests());

        s.stop_accepting();
        assert!(!s.can_accept_requests());
    }

    #[test]
    fn test_begin_ending_is_one_shot() {
        let s = store();
        s.set_phase(SessionPhase::Active);
        s.start_accepting();

        assert!(s.begin_ending());
        assert_eq!(s.phase(), SessionPhase::Ending);
        assert!(!s.is_accepting());

        // Second caller loses the race
        assert!(!s.begin_ending());
    }

    #[test]
    fn test_session_info_snapshot() {
        let s = store();
        s.set_playlist_info(
            "pl1".to_string(),
            "https://example.com/pl1".to_string(),
            "Friday".to_string(),
        );
        s.set_keywords(vec!["friday".to_string()]);

        let info = s.build_session_info(SessionState::Waiting);
        assert_eq!(info.session_id, "session-1");
        assert_eq!(info.playlist_name, "Friday");
        assert_eq!(info.state, SessionState::Waiting);
        assert!(info.scheduled_start_time.is_empty());
        assert!(!info.accepting_requests);
    }
}
