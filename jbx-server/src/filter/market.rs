//! Market availability filter

use super::{Filter, FilterResult, RejectCode, TrackRequest};
use jbx_common::listener::ListenerSession;
use jbx_common::track::{RequesterClass, Track};

/// Rejects tracks that cannot be played in the configured market.
/// Applies to every requester class; an unplayable track is unplayable
/// no matter who queued it.
pub struct MarketFilter {
    market: String,
}

impl MarketFilter {
    pub fn new(market: impl Into<String>) -> Self {
        Self {
            market: market.into(),
        }
    }
}

impl Filter for MarketFilter {
    fn name(&self) -> &'static str {
        "market_filter"
    }

    fn description(&self) -> &'static str {
        "Checks whether the track is available in the configured market"
    }

    fn return_codes(&self) -> &'static [RejectCode] {
        &[RejectCode::MarketRestriction]
    }

    fn applies_to(&self, _class: RequesterClass) -> bool {
        true
    }

    fn check(
        &self,
        _req: &TrackRequest,
        track: &Track,
        _listener: &ListenerSession,
    ) -> FilterResult {
        if self.market.is_empty() {
            return FilterResult::Accept;
        }
        if !track.is_available_in_market(&self.market) {
            return FilterResult::Reject(RejectCode::MarketRestriction);
        }
        FilterResult::Accept
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{listener, track};
    use super::*;

    fn request() -> TrackRequest {
        TrackRequest {
            listener_id: "l1".to_string(),
            track_id: "t1".to_string(),
        }
    }

    #[test]
    fn test_unavailable_market_rejected() {
        let f = MarketFilter::new("DE");
        let t = track("t1", "Song", &["Artist"]); // markets: ["JP"]
        let result = f.check(&request(), &t, &listener("l1"));
        assert_eq!(result.code(), Some(RejectCode::MarketRestriction));
    }

    #[test]
    fn test_available_market_accepted() {
        let f = MarketFilter::new("JP");
        let t = track("t1", "Song", &["Artist"]);
        assert!(f.check(&request(), &t, &listener("l1")).accepted());
    }

    #[test]
    fn test_empty_market_accepts_everything() {
        let f = MarketFilter::new("");
        let t = track("t1", "Song", &["Artist"]);
        assert!(f.check(&request(), &t, &listener("l1")).accepted());
    }

    #[test]
    fn test_applies_to_all_classes() {
        let f = MarketFilter::new("JP");
        for class in [
            RequesterClass::User,
            RequesterClass::Bgm,
            RequesterClass::Opening,
            RequesterClass::Ending,
            RequesterClass::System,
        ] {
            assert!(f.applies_to(class));
        }
    }
}
