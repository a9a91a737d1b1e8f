//! Pending-request filter

use super::{Filter, FilterResult, RejectCode, TrackRequest};
use jbx_common::listener::ListenerSession;
use jbx_common::track::{RequesterClass, Track};

/// Rejects a request while the listener still has a track waiting to
/// start playing. VIP listeners bypass the check.
#[derive(Default)]
pub struct UserPendingFilter;

impl Filter for UserPendingFilter {
    fn name(&self) -> &'static str {
        "user_pending_filter"
    }

    fn description(&self) -> &'static str {
        "Checks whether the listener already has a track waiting to play"
    }

    fn return_codes(&self) -> &'static [RejectCode] {
        &[RejectCode::UserPending]
    }

    fn applies_to(&self, class: RequesterClass) -> bool {
        class == RequesterClass::User
    }

    fn check(
        &self,
        _req: &TrackRequest,
        _track: &Track,
        listener: &ListenerSession,
    ) -> FilterResult {
        if listener.vip {
            return FilterResult::Accept;
        }
        if listener.pending_count > 0 {
            return FilterResult::Reject(RejectCode::UserPending);
        }
        FilterResult::Accept
    }
}
