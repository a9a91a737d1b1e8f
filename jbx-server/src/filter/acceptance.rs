//! Acceptance gate: session accepting state and the request deadline

use super::{Filter, FilterResult, RejectCode, TrackRequest};
use chrono::{DateTime, Duration as WallDelta, Utc};
use jbx_common::listener::ListenerSession;
use jbx_common::track::{RequesterClass, Track};
use std::time::Duration;

type BoolFn = Box<dyn Fn() -> bool + Send + Sync>;
type TimeFn = Box<dyn Fn() -> Option<DateTime<Utc>> + Send + Sync>;
type DurationFn = Box<dyn Fn() -> Duration + Send + Sync>;
type NowFn = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Rejects user requests once the session stops accepting, and requests
/// that could not start playing before the acceptance deadline
/// (`scheduled_end - ending_duration`).
///
/// The projected start of a new request is
/// `now + current_remaining + queued_duration`. A request whose start
/// lands at or past the deadline is rejected; a request that merely
/// *ends* past the deadline is allowed, so playback runs gap-free into
/// the ending playlist.
pub struct AcceptanceGateFilter {
    is_accepting: BoolFn,
    end_time: TimeFn,
    ending_duration: DurationFn,
    queued_duration: DurationFn,
    current_remaining: DurationFn,
    now: NowFn,
}

impl AcceptanceGateFilter {
    pub fn new(
        is_accepting: BoolFn,
        end_time: TimeFn,
        ending_duration: DurationFn,
        queued_duration: DurationFn,
        current_remaining: DurationFn,
        now: NowFn,
    ) -> Self {
        Self {
            is_accepting,
            end_time,
            ending_duration,
            queued_duration,
            current_remaining,
            now,
        }
    }
}

impl Filter for AcceptanceGateFilter {
    fn name(&self) -> &'static str {
        "acceptance_done_filter"
    }

    fn description(&self) -> &'static str {
        "Checks whether the session is still accepting requests"
    }

    fn return_codes(&self) -> &'static [RejectCode] {
        &[RejectCode::AcceptanceDone, RejectCode::TimeLimitExceeded]
    }

    fn applies_to(&self, class: RequesterClass) -> bool {
        // BGM selection has its own gating in the refill path
        class == RequesterClass::User
    }

    fn check(
        &self,
        _req: &TrackRequest,
        _track: &Track,
        _listener: &ListenerSession,
    ) -> FilterResult {
        if !(self.is_accepting)() {
            return FilterResult::Reject(RejectCode::AcceptanceDone);
        }

        let Some(end_time) = (self.end_time)() else {
            return FilterResult::Accept;
        };

        let ending = WallDelta::from_std((self.ending_duration)())
            .unwrap_or_else(|_| WallDelta::zero());
        let deadline = end_time - ending;
        let now = (self.now)();

        // Past the deadline outright, even with an empty queue
        if now > deadline {
            return FilterResult::Reject(RejectCode::TimeLimitExceeded);
        }

        // Projected start of the new request; starting at the deadline
        // exactly is already too late
        let backlog = (self.current_remaining)() + (self.queued_duration)();
        let projected_start =
            now + WallDelta::from_std(backlog).unwrap_or_else(|_| WallDelta::zero());
        if projected_start >= deadline {
            return FilterResult::Reject(RejectCode::TimeLimitExceeded);
        }

        FilterResult::Accept
    }
}
