//! Upstream catalog client
//!
//! The session core talks to the music catalog through the [`Catalog`]
//! trait; [`SpotifyClient`] is the production implementation over the
//! Spotify Web API. Tests substitute their own implementations.

mod spotify;

pub use spotify::{SpotifyClient, SpotifyConfig};

use crate::error::Result;
use async_trait::async_trait;
use jbx_common::track::Track;

/// Search entity type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchType {
    Track,
    Album,
    Artist,
}

impl SearchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchType::Track => "track",
            SearchType::Album => "album",
            SearchType::Artist => "artist",
        }
    }
}

/// Operations the session core needs from the upstream catalog.
///
/// Implementations retry transient failures internally (rate limiting,
/// 5xx); only exhaustion or non-transient errors surface to callers.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Fetch a track by bare id, URI, or URL. An optional market scopes
    /// playability information.
    async fn get_track(&self, track_id: &str, market: Option<&str>) -> Result<Track>;

    /// Search the catalog. `limit` is clamped to 1..=50.
    async fn search(&self, query: &str, search_type: SearchType, limit: usize)
        -> Result<Vec<Track>>;

    /// All tracks of a playlist, following pagination.
    async fn get_playlist_tracks(&self, playlist_url: &str) -> Result<Vec<Track>>;

    /// A random window sample of up to `count` tracks from a playlist.
    async fn get_playlist_tracks_random(
        &self,
        playlist_url: &str,
        count: usize,
    ) -> Result<Vec<Track>>;

    /// Lightweight existence check without fetching the full track list.
    async fn check_playlist_exists(&self, playlist_url: &str) -> Result<()>;

    /// Create a playlist owned by the configured account; returns its id.
    async fn create_playlist(&self, name: &str, description: &str) -> Result<String>;

    /// Add tracks to a playlist, batching at 100 per inner call.
    async fn add_tracks_to_playlist(&self, playlist_id: &str, track_ids: &[String]) -> Result<()>;

    /// Remove tracks from a playlist, batching at 100 per inner call.
    async fn remove_tracks_from_playlist(
        &self,
        playlist_id: &str,
        track_ids: &[String],
    ) -> Result<()>;

    /// Public URL of a playlist.
    fn playlist_url(&self, playlist_id: &str) -> String;

    /// Public URL of a track.
    fn track_url(&self, track_id: &str) -> String;

    /// Public URL of a track opened in the context of a playlist, so the
    /// follower's player continues inside that playlist.
    fn track_url_with_context(&self, track_id: &str, playlist_id: &str) -> String;
}

/// Extract a bare track id from any of the accepted forms: bare id,
/// `spotify:track:ID` URI, track URL, or locale-prefixed track URL.
/// Idempotent: feeding the output back in returns it unchanged.
pub fn extract_track_id(input: &str) -> String {
    extract_id(input, "spotify:track:", "/track/")
}

/// Extract a bare playlist id from a URL, URI, or bare id.
pub fn extract_playlist_id(input: &str) -> String {
    extract_id(input, "spotify:playlist:", "/playlist/")
}

fn extract_id(input: &str, uri_prefix: &str, url_segment: &str) -> String {
    let input = input.trim();

    if let Some(rest) = input.strip_prefix(uri_prefix) {
        return rest.to_string();
    }

    if input.contains("open.spotify.com") {
        if let Some(idx) = input.rfind(url_segment) {
            let tail = &input[idx + url_segment.len()..];
            let id = tail.split('?').next().unwrap_or("");
            return id.trim_end_matches('/').to_string();
        }
    }

    input.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_track_id_forms() {
        let id = "4iV5W9uYEdYUVa79Axb7Rh";
        let forms = [
            id.to_string(),
            format!("spotify:track:{id}"),
            format!("https://open.spotify.com/track/{id}"),
            format!("https://open.spotify.com/track/{id}?si=abc123"),
            format!("https://open.spotify.com/intl-ja/track/{id}"),
        ];
        for form in &forms {
            assert_eq!(extract_track_id(form), id, "form: {form}");
        }
    }

    #[test]
    fn test_extract_track_id_idempotent() {
        let inputs = [
            "4iV5W9uYEdYUVa79Axb7Rh",
            "spotify:track:4iV5W9uYEdYUVa79Axb7Rh",
            "https://open.spotify.com/track/4iV5W9uYEdYUVa79Axb7Rh?si=x",
            "https://open.spotify.com/intl-ja/track/4iV5W9uYEdYUVa79Axb7Rh",
        ];
        for input in &inputs {
            let once = extract_track_id(input);
            assert_eq!(extract_track_id(&once), once);
        }
    }

    #[test]
    fn test_extract_playlist_id_forms() {
        let id = "37i9dQZF1DXcBWIGoYBM5M";
        assert_eq!(extract_playlist_id(id), id);
        assert_eq!(extract_playlist_id(&format!("spotify:playlist:{id}")), id);
        assert_eq!(
            extract_playlist_id(&format!("https://open.spotify.com/playlist/{id}/")),
            id
        );
        assert_eq!(
            extract_playlist_id(&format!(
                "https://open.spotify.com/intl-de/playlist/{id}?si=zzz"
            )),
            id
        );
    }

    #[test]
    fn test_whitespace_trimmed() {
        assert_eq!(extract_track_id("  abc123  "), "abc123");
    }
}
