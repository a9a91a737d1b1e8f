//! Request filter chain
//!
//! Every enqueue attempt runs through an ordered chain of filters; the
//! first rejection short-circuits. Filters declare which requester
//! classes they apply to, so BGM and playlist-sourced tracks skip the
//! user-only checks.

mod acceptance;
mod duplicate;
mod duration_limit;
mod kicked;
mod market;
mod user_pending;

pub use acceptance::AcceptanceGateFilter;
pub use duplicate::{DuplicateTrackFilter, QueueSnapshot};
pub use duration_limit::DurationLimitFilter;
pub use kicked::KickedFilter;
pub use market::MarketFilter;
pub use user_pending::UserPendingFilter;

use crate::error::Result;
use jbx_common::listener::ListenerSession;
use jbx_common::track::{RequesterClass, Track};

/// Stable rejection codes surfaced to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectCode {
    AcceptanceDone,
    TimeLimitExceeded,
    Kicked,
    MarketRestriction,
    UserPending,
    DuplicateTrack,
    DurationLimitExceeded,
    TrackNotFound,
    InvalidListener,
}

impl RejectCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectCode::AcceptanceDone => "acceptance_done",
            RejectCode::TimeLimitExceeded => "time_limit_exceeded",
            RejectCode::Kicked => "kicked",
            RejectCode::MarketRestriction => "market_restriction",
            RejectCode::UserPending => "user_pending",
            RejectCode::DuplicateTrack => "duplicate_track",
            RejectCode::DurationLimitExceeded => "duration_limit_exceeded",
            RejectCode::TrackNotFound => "track_not_found",
            RejectCode::InvalidListener => "invalid_listener",
        }
    }
}

impl std::fmt::Display for RejectCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A track request under evaluation
#[derive(Debug, Clone)]
pub struct TrackRequest {
    pub listener_id: String,
    pub track_id: String,
}

/// Outcome of a filter check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterResult {
    Accept,
    Reject(RejectCode),
}

impl FilterResult {
    pub fn accepted(&self) -> bool {
        matches!(self, FilterResult::Accept)
    }

    pub fn code(&self) -> Option<RejectCode> {
        match self {
            FilterResult::Accept => None,
            FilterResult::Reject(code) => Some(*code),
        }
    }
}

/// A single predicate in the chain
pub trait Filter: Send + Sync {
    /// Filter name as used in configuration
    fn name(&self) -> &'static str;

    /// Human-readable description
    fn description(&self) -> &'static str;

    /// Codes this filter can reject with
    fn return_codes(&self) -> &'static [RejectCode];

    /// Whether this filter applies to the given requester class
    fn applies_to(&self, class: RequesterClass) -> bool;

    /// Validate and absorb configuration settings
    fn validate_config(&mut self, _settings: &serde_yaml::Value) -> Result<()> {
        Ok(())
    }

    /// Run the check
    fn check(&self, req: &TrackRequest, track: &Track, listener: &ListenerSession) -> FilterResult;
}

/// Executes filters in registration order
#[derive(Default)]
pub struct Chain {
    filters: Vec<Box<dyn Filter>>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, filter: Box<dyn Filter>) {
        self.filters.push(filter);
    }

    /// Run all applicable filters in order; the first rejection wins.
    pub fn execute(
        &self,
        req: &TrackRequest,
        track: &Track,
        listener: &ListenerSession,
        class: RequesterClass,
    ) -> FilterResult {
        for filter in &self.filters {
            if !filter.applies_to(class) {
                continue;
            }
            let result = filter.check(req, track, listener);
            if !result.accepted() {
                return result;
            }
        }
        FilterResult::Accept
    }

    pub fn filters(&self) -> &[Box<dyn Filter>] {
        &self.filters
    }
}
