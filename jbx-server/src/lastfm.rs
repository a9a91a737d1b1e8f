//! Last.fm recommendation service client
//!
//! Thin JSON client over the audioscrobbler 2.0 API. Tag and tag-track
//! lookups are cached for the life of the process; the same seeds come
//! up repeatedly during BGM refill and the answers barely change within
//! a session.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://ws.audioscrobbler.com/2.0/";

/// A similar track suggestion
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarTrack {
    pub name: String,
    pub artist: String,
}

/// A tag with its frequency count
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub name: String,
    pub count: u32,
}

/// A top track for a tag or chart
#[derive(Debug, Clone, PartialEq)]
pub struct TopTrack {
    pub name: String,
    pub artist: String,
}

/// Last.fm API client configuration
#[derive(Debug, Clone)]
pub struct LastFmConfig {
    pub api_key: String,
}

/// Last.fm API client
pub struct LastFmClient {
    api_key: String,
    base_url: String,
    http: reqwest::Client,
    track_tag_cache: RwLock<HashMap<String, Vec<Tag>>>,
    tag_tracks_cache: RwLock<HashMap<String, Vec<TopTrack>>>,
}

impl LastFmClient {
    pub fn new(config: LastFmConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(Error::Config(
                "recommendation API key is required".to_string(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            api_key: config.api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            http,
            track_tag_cache: RwLock::new(HashMap::new()),
            tag_tracks_cache: RwLock::new(HashMap::new()),
        })
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, &str)],
    ) -> Result<T> {
        let mut query: Vec<(&str, &str)> = vec![
            ("method", method),
            ("api_key", &self.api_key),
            ("format", "json"),
        ];
        query.extend_from_slice(params);

        let resp = self.http.get(&self.base_url).query(&query).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Recommendation(format!(
                "recommendation API returned {status}"
            )));
        }
        let body = resp.bytes().await?;

        // The API reports errors inside a 200 body
        if let Ok(api_error) = serde_json::from_slice::<ApiError>(&body) {
            if api_error.error != 0 {
                return Err(Error::Recommendation(format!(
                    "recommendation API error {}: {}",
                    api_error.error, api_error.message
                )));
            }
        }

        serde_json::from_slice(&body)
            .map_err(|e| Error::Recommendation(format!("failed to decode {method}: {e}")))
    }

    /// Tracks similar to the given track.
    pub async fn get_similar_tracks(
        &self,
        track_name: &str,
        artist_name: &str,
        limit: usize,
    ) -> Result<Vec<SimilarTrack>> {
        let limit = limit.to_string();
        let resp: GetSimilarResponse = self
            .call(
                "track.getSimilar",
                &[
                    ("track", track_name),
                    ("artist", artist_name),
                    ("limit", &limit),
                    ("autocorrect", "1"),
                ],
            )
            .await?;

        Ok(resp
            .similartracks
            .track
            .into_iter()
            .map(|t| SimilarTrack {
                name: t.name,
                artist: t.artist.name,
            })
            .collect())
    }

    /// Top tags for a track, cached by (track, artist).
    pub async fn get_top_tags(
        &self,
        track_name: &str,
        artist_name: &str,
        limit: usize,
    ) -> Result<Vec<Tag>> {
        let key = format!("{track_name}\u{1f}{artist_name}");
        {
            let cache = self.track_tag_cache.read().await;
            if let Some(tags) = cache.get(&key) {
                debug!(track = track_name, "track tag cache hit");
                return Ok(tags.iter().take(limit).cloned().collect());
            }
        }

        let resp: GetTopTagsResponse = self
            .call(
                "track.getTopTags",
                &[
                    ("track", track_name),
                    ("artist", artist_name),
                    ("autocorrect", "1"),
                ],
            )
            .await?;

        let tags: Vec<Tag> = resp
            .toptags
            .tag
            .into_iter()
            .map(|t| Tag {
                name: t.name,
                count: t.count,
            })
            .collect();

        let mut cache = self.track_tag_cache.write().await;
        cache.insert(key, tags.clone());
        Ok(tags.into_iter().take(limit).collect())
    }

    /// Top tracks for a tag, cached by tag name.
    pub async fn get_top_tracks(&self, tag_name: &str, limit: usize) -> Result<Vec<TopTrack>> {
        {
            let cache = self.tag_tracks_cache.read().await;
            if let Some(tracks) = cache.get(tag_name) {
                debug!(tag = tag_name, "tag track cache hit");
                return Ok(tracks.iter().take(limit).cloned().collect());
            }
        }

        let limit_str = limit.to_string();
        let resp: GetTopTracksResponse = self
            .call(
                "tag.getTopTracks",
                &[("tag", tag_name), ("limit", &limit_str)],
            )
            .await?;

        let tracks: Vec<TopTrack> = resp
            .tracks
            .track
            .into_iter()
            .map(|t| TopTrack {
                name: t.name,
                artist: t.artist.name,
            })
            .collect();

        let mut cache = self.tag_tracks_cache.write().await;
        cache.insert(tag_name.to_string(), tracks.clone());
        Ok(tracks.into_iter().take(limit).collect())
    }

    /// Global chart top tracks; the fallback seed when a session starts
    /// cold with no playback history.
    pub async fn get_chart_top_tracks(&self, limit: usize) -> Result<Vec<TopTrack>> {
        let limit_str = limit.to_string();
        let resp: GetChartTopTracksResponse = self
            .call("chart.getTopTracks", &[("limit", &limit_str)])
            .await?;

        Ok(resp
            .tracks
            .track
            .into_iter()
            .map(|t| TopTrack {
                name: t.name,
                artist: t.artist.name,
            })
            .collect())
    }
}

// Response DTOs, narrowed to the consumed fields.

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    error: i32,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct NamedArtist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GetSimilarResponse {
    similartracks: SimilarTracksBody,
}

#[derive(Debug, Deserialize)]
struct SimilarTracksBody {
    #[serde(default)]
    track: Vec<SimilarTrackEntry>,
}

#[derive(Debug, Deserialize)]
struct SimilarTrackEntry {
    name: String,
    artist: NamedArtist,
}

#[derive(Debug, Deserialize)]
struct GetTopTagsResponse {
    toptags: TopTagsBody,
}

#[derive(Debug, Deserialize)]
struct TopTagsBody {
    #[serde(default)]
    tag: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
    #[serde(default)]
    count: u32,
}

#[derive(Debug, Deserialize)]
struct GetTopTracksResponse {
    tracks: TopTracksBody,
}

#[derive(Debug, Deserialize)]
struct GetChartTopTracksResponse {
    tracks: TopTracksBody,
}

#[derive(Debug, Deserialize)]
struct TopTracksBody {
    #[serde(default)]
    track: Vec<TopTrackEntry>,
}

#[derive(Debug, Deserialize)]
struct TopTrackEntry {
    name: String,
    artist: NamedArtist,
}
