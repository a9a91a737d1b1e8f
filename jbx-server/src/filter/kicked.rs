//! Kicked-listener filter

use super::{Filter, FilterResult, RejectCode, TrackRequest};
use jbx_common::listener::ListenerSession;
use jbx_common::track::{RequesterClass, Track};

/// Rejects requests from listeners who have been kicked.
#[derive(Default)]
pub struct KickedFilter;

impl Filter for KickedFilter {
    fn name(&self) -> &'static str {
        "kicked_listener_filter"
    }

    fn description(&self) -> &'static str {
        "Checks whether the listener has been kicked from the session"
    }

    fn return_codes(&self) -> &'static [RejectCode] {
        &[RejectCode::Kicked]
    }

    fn applies_to(&self, class: RequesterClass) -> bool {
        // Only user listeners can be kicked
        class == RequesterClass::User
    }

    fn check(
        &self,
        _req: &TrackRequest,
        _track: &Track,
        listener: &ListenerSession,
    ) -> FilterResult {
        if listener.kicked {
            return FilterResult::Reject(RejectCode::Kicked);
        }
        FilterResult::Accept
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{listener, track};
    use super::*;

    #[test]
    fn test_kicked_listener_rejected() {
        let f = KickedFilter;
        let req = TrackRequest {
            listener_id: "l1".to_string(),
            track_id: "t1".to_string(),
        };
        let mut l = listener("l1");
        assert!(f.check(&req, &track("t1", "Song", &["A"]), &l).accepted());

        l.kick();
        assert_eq!(
            f.check(&req, &track("t1", "Song", &["A"]), &l).code(),
            Some(RejectCode::Kicked)
        );
    }
}
