//! Track and requester domain entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A track as known to the upstream catalog.
///
/// Only catalog-sourced data lives here; queue bookkeeping is layered on
/// top via [`QueuedTrack`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Catalog track id
    pub id: String,
    /// Track name
    pub name: String,
    /// Artist names, primary artist first
    pub artists: Vec<String>,
    /// Album name
    pub album: String,
    /// Album art URL
    pub album_art_url: String,
    /// Track duration
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    /// Canonical catalog URL
    pub url: String,
    /// Popularity score (0-100)
    pub popularity: u32,
    /// Explicit content flag
    pub explicit: bool,
    /// Markets the track is available in
    pub markets: Vec<String>,
    /// Playability override for the requested market (catalog track
    /// relinking); takes precedence over the markets list when present
    pub playable_override: Option<bool>,
}

impl Track {
    /// Whether the track can be played in the given market.
    ///
    /// The playability override wins when the catalog supplied one;
    /// otherwise the markets list is consulted.
    pub fn is_available_in_market(&self, market: &str) -> bool {
        if let Some(playable) = self.playable_override {
            return playable;
        }
        self.markets.iter().any(|m| m == market)
    }

    /// Primary artist, if any.
    pub fn primary_artist(&self) -> Option<&str> {
        self.artists.first().map(String::as_str)
    }
}

/// Who put a track into the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequesterClass {
    User,
    System,
    Opening,
    Ending,
    Bgm,
}

impl std::fmt::Display for RequesterClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequesterClass::User => write!(f, "USER"),
            RequesterClass::System => write!(f, "SYSTEM"),
            RequesterClass::Opening => write!(f, "OPENING"),
            RequesterClass::Ending => write!(f, "ENDING"),
            RequesterClass::Bgm => write!(f, "BGM"),
        }
    }
}

/// The requester attached to a queued track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requester {
    /// Listener session UUID (or the system user's id)
    pub id: String,
    /// Display name shown in notifications
    pub display_name: String,
    /// External user id for bot integrations, empty if none
    #[serde(default)]
    pub external_user_id: String,
    /// Requester class, governs which filters apply
    pub class: RequesterClass,
}

/// A track in the playback queue, with requester attribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedTrack {
    pub track: Track,
    pub requester: Requester,
    pub added_at: DateTime<Utc>,
}

/// Serialize `std::time::Duration` as whole milliseconds, the unit the
/// catalog API speaks.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}
