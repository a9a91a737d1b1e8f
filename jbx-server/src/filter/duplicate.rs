//! Duplicate-track filter with remaster detection
//!
//! Rejects a request when the queue (played, current, or waiting)
//! already contains the same track id, or a track that is the same song
//! in a different pressing: matching normalized name and matching
//! primary artist. Covers keep their own identity (same name, different
//! primary artist) and remixes normalize to a distinct name, so both are
//! accepted.

use super::{Filter, FilterResult, RejectCode, TrackRequest};
use jbx_common::listener::ListenerSession;
use jbx_common::track::{QueuedTrack, RequesterClass, Track};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

/// Read access to the full queue view (played + current + queued)
pub trait QueueSnapshot: Send + Sync {
    fn all_tracks(&self) -> Vec<QueuedTrack>;
}

impl QueueSnapshot for crate::playback::Controller {
    fn all_tracks(&self) -> Vec<QueuedTrack> {
        crate::playback::Controller::all_tracks(self)
    }
}

/// Suffixes that label a different pressing of the same recording
static REMASTER_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\s*-?\s*\d{4}\s+remaster(ed)?",      // "- 2011 Remaster"
        r"\s*\(remaster(ed)?\s*\d{0,4}\)",     // "(Remastered 2023)"
        r"\s*\[remaster(ed)?\s*\d{0,4}\]",     // "[Remastered]"
        r"\s*-?\s*remaster(ed)?(\s+version)?", // "- Remastered"
        r"\s*\(.*?remaster.*?\)",
        r"\s*\[.*?remaster.*?\]",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Version qualifiers that do not make a different song
static VERSION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\s*\(.*?version\)",        // "(Single Version)"
        r"\s*\(.*?edit\)",           // "(Radio Edit)"
        r"\s*-?\s*live",             // "- Live"
        r"\s*\(live\)",
        r"\s*-?\s*radio\s+edit",
        r"\s*-?\s*single\s+version",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

pub struct DuplicateTrackFilter {
    queue: Arc<dyn QueueSnapshot>,
}

impl DuplicateTrackFilter {
    pub fn new(queue: Arc<dyn QueueSnapshot>) -> Self {
        Self { queue }
    }

    /// Same song in a different pressing: normalized names match and the
    /// primary artist matches.
    fn is_remaster(a: &Track, b: &Track) -> bool {
        if normalize_track_name(&a.name) != normalize_track_name(&b.name) {
            return false;
        }
        is_same_primary_artist(a, b)
    }
}

impl Filter for DuplicateTrackFilter {
    fn name(&self) -> &'static str {
        "duplicate_track_filter"
    }

    fn description(&self) -> &'static str {
        "Rejects tracks already in the queue, including other pressings of the same recording"
    }

    fn return_codes(&self) -> &'static [RejectCode] {
        &[RejectCode::DuplicateTrack]
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
        for queued in self.queue.all_tracks() {
            if queued.track.id == track.id {
                return FilterResult::Reject(RejectCode::DuplicateTrack);
            }
            if Self::is_remaster(&queued.track, track) {
                return FilterResult::Reject(RejectCode::DuplicateTrack);
            }
        }
        FilterResult::Accept
    }
}

/// Strip pressing and version qualifiers and collapse whitespace.
pub fn normalize_track_name(name: &str) -> String {
    let mut normalized = name.to_lowercase();

    for pattern in REMASTER_PATTERNS.iter().chain(VERSION_PATTERNS.iter()) {
        normalized = pattern.replace_all(&normalized, "").into_owned();
    }

    let normalized = WHITESPACE.replace_all(normalized.trim(), " ");
    normalized.trim_end_matches([' ', '-']).to_string()
}

fn is_same_primary_artist(a: &Track, b: &Track) -> bool {
    match (a.primary_artist(), b.primary_artist()) {
        (Some(x), Some(y)) => x.eq_ignore_ascii_case(y),
        _ => false,
    }
}
