//! Track duration limit filter

use super::{Filter, FilterResult, RejectCode, TrackRequest};
use crate::error::{Error, Result};
use jbx_common::listener::ListenerSession;
use jbx_common::track::{RequesterClass, Track};
use serde::Deserialize;

/// Settings for [`DurationLimitFilter`]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DurationLimitConfig {
    /// Minimum track length in minutes; at least 1
    pub min_minutes: f64,
    /// Maximum track length in minutes; 0 means no cap
    pub max_minutes: f64,
}

impl Default for DurationLimitConfig {
    fn default() -> Self {
        Self {
            min_minutes: 1.0,
            max_minutes: 0.0,
        }
    }
}

/// Rejects tracks shorter than the configured minimum or longer than the
/// configured maximum. Without validated settings every track passes.
#[derive(Default)]
pub struct DurationLimitFilter {
    config: Option<DurationLimitConfig>,
}

impl DurationLimitFilter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Filter for DurationLimitFilter {
    fn name(&self) -> &'static str {
        "duration_limit_filter"
    }

    fn description(&self) -> &'static str {
        "Checks whether the track duration is within the allowed limits"
    }

    fn return_codes(&self) -> &'static [RejectCode] {
        &[RejectCode::DurationLimitExceeded]
    }

    fn validate_config(&mut self, settings: &serde_yaml::Value) -> Result<()> {
        let config: DurationLimitConfig = serde_yaml::from_value(settings.clone())
            .map_err(|e| Error::Config(format!("duration_limit_filter: {e}")))?;

        if config.min_minutes < 1.0 {
            return Err(Error::Config(
                "duration_limit_filter: min_minutes must be at least 1".to_string(),
            ));
        }
        if config.max_minutes < 0.0 {
            return Err(Error::Config(
                "duration_limit_filter: max_minutes must be non-negative".to_string(),
            ));
        }
        if config.max_minutes > 0.0 && config.min_minutes > config.max_minutes {
            return Err(Error::Config(
                "duration_limit_filter: min_minutes cannot exceed max_minutes".to_string(),
            ));
        }

        self.config = Some(config);
        Ok(())
    }

    fn applies_to(&self, class: RequesterClass) -> bool {
        class == RequesterClass::User
    }

    fn check(
        &self,
        _req: &TrackRequest,
        track: &Track,
        _listener: &ListenerSession,
    ) -> FilterResult {
        let Some(config) = &self.config else {
            return FilterResult::Accept;
        };

        let minutes = track.duration.as_secs_f64() / 60.0;

        if minutes < config.min_minutes {
            return FilterResult::Reject(RejectCode::DurationLimitExceeded);
        }
        if config.max_minutes > 0.0 && minutes > config.max_minutes {
            return FilterResult::Reject(RejectCode::DurationLimitExceeded);
        }
        FilterResult::Accept
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{listener, track};
    use super::*;
    use std::time::Duration;

    fn configured(min: f64, max: f64) -> DurationLimitFilter {
        let mut f = DurationLimitFilter::new();
        let settings = serde_yaml::from_str(&format!(
            "min_minutes: {min}\nmax_minutes: {max}"
        ))
        .unwrap();
        f.validate_config(&settings).unwrap();
        f
    }

    fn check_duration(f: &DurationLimitFilter, duration: Duration) -> FilterResult {
        let mut t = track("t1", "Song", &["Artist"]);
        t.duration = duration;
        let req = TrackRequest {
            listener_id: "l1".to_string(),
            track_id: "t1".to_string(),
        };
        f.check(&req, &t, &listener("l1"))
    }

    #[test]
    fn test_accepts_exactly_at_bounds() {
        let f = configured(2.0, 8.0);
        assert!(check_duration(&f, Duration::from_secs(120)).accepted());
        assert!(check_duration(&f, Duration::from_secs(480)).accepted());
    }

    #[test]
    fn test_rejects_strictly_outside_bounds() {
        let f = configured(2.0, 8.0);
        assert_eq!(
            check_duration(&f, Duration::from_secs(119)).code(),
            Some(RejectCode::DurationLimitExceeded)
        );
        assert_eq!(
            check_duration(&f, Duration::from_secs(481)).code(),
            Some(RejectCode::DurationLimitExceeded)
        );
    }

    #[test]
    fn test_zero_max_means_unbounded() {
        let f = configured(1.0, 0.0);
        assert!(check_duration(&f, Duration::from_secs(3 * 3600)).accepted());
    }

    #[test]
    fn test_unconfigured_accepts_everything() {
        let f = DurationLimitFilter::new();
        assert!(check_duration(&f, Duration::from_secs(5)).accepted());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut f = DurationLimitFilter::new();
        let below_min = serde_yaml::from_str("min_minutes: 0.5").unwrap();
        assert!(f.validate_config(&below_min).is_err());

        let inverted = serde_yaml::from_str("min_minutes: 5\nmax_minutes: 2").unwrap();
        assert!(f.validate_config(&inverted).is_err());
    }

    #[test]
    fn test_defaults_apply() {
        let mut f = DurationLimitFilter::new();
        let empty = serde_yaml::from_str("{}").unwrap();
        f.validate_config(&empty).unwrap();
        // Default minimum of 1 minute
        assert_eq!(
            check_duration(&f, Duration::from_secs(30)).code(),
            Some(RejectCode::DurationLimitExceeded)
        );
        assert!(check_duration(&f, Duration::from_secs(60)).accepted());
    }
}
