//! Spotify Web API client
//!
//! Authenticates with a long-lived refresh token and keeps the short-lived
//! access token cached until shortly before expiry. All calls go through a
//! retry wrapper that re-attempts transient failures (rate limiting, 5xx)
//! up to three times with linearly growing back-off.

use super::{extract_playlist_id, extract_track_id, Catalog, SearchType};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jbx_common::track::Track;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

const ACCOUNTS_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const API_BASE: &str = "https://api.spotify.com/v1";
const PAGE_LIMIT: usize = 100;
const BATCH_LIMIT: usize = 100;

/// Spotify client configuration
#[derive(Debug, Clone)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    pub market: String,
}

struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Spotify Web API client
pub struct SpotifyClient {
    http: reqwest::Client,
    config: SpotifyConfig,
    token: RwLock<Option<CachedToken>>,
    max_retries: u32,
    retry_delay: Duration,
}

impl SpotifyClient {
    /// Create a new client. Credentials are validated for presence only;
    /// the first API call exercises them.
    pub fn new(config: SpotifyConfig) -> Result<Self> {
        if config.client_id.is_empty()
            || config.client_secret.is_empty()
            || config.refresh_token.is_empty()
        {
            return Err(Error::Config(
                "catalog credentials are required".to_string(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            http,
            config,
            token: RwLock::new(None),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        })
    }

    /// Get a valid access token, refreshing when missing or near expiry.
    async fn access_token(&self) -> Result<String> {
        {
            let token = self.token.read().await;
            if let Some(t) = token.as_ref() {
                if t.expires_at > Utc::now() + ChronoDuration::seconds(30) {
                    return Ok(t.access_token.clone());
                }
            }
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            expires_in: i64,
        }

        let resp = self
            .http
            .post(ACCOUNTS_TOKEN_URL)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", &self.config.refresh_token),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Catalog(format!(
                "token refresh failed: {status}"
            )));
        }
        let body: TokenResponse = resp.json().await?;

        let mut token = self.token.write().await;
        *token = Some(CachedToken {
            access_token: body.access_token.clone(),
            expires_at: Utc::now() + ChronoDuration::seconds(body.expires_in),
        });
        debug!("catalog access token refreshed");
        Ok(body.access_token)
    }

    /// Run an operation with retries on transient failures.
    async fn retry<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_err = None;
        for attempt in 0..self.max_retries {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    if !is_retryable(&e) {
                        return Err(e);
                    }
                    warn!(attempt = attempt + 1, error = %e, "catalog call failed, retrying");
                    last_err = Some(e);
                    if attempt + 1 < self.max_retries {
                        tokio::time::sleep(self.retry_delay * (attempt + 1)).await;
                    }
                }
            }
        }
        Err(Error::Catalog(format!(
            "max retries exceeded: {}",
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// GET an API path with query parameters, decoding JSON.
    async fn api_get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let token = self.access_token().await?;
        let resp = self
            .http
            .get(format!("{API_BASE}{path}"))
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;
        Self::decode(resp).await
    }

    async fn api_send<T: serde::de::DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<T> {
        let token = self.access_token().await?;
        let resp = req.bearer_auth(token).send().await?;
        Self::decode(resp).await
    }

    async fn decode<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Catalog(format!(
                "catalog API returned {status}: {body}"
            )));
        }
        Ok(resp.json().await?)
    }

    fn convert_track(&self, t: TrackObject) -> Track {
        let artists = t.artists.into_iter().map(|a| a.name).collect();
        let album_art_url = t
            .album
            .images
            .first()
            .map(|i| i.url.clone())
            .unwrap_or_default();

        let mut markets = t.available_markets;
        // The API omits market lists on market-scoped requests; the
        // configured market is implied in that case.
        if markets.is_empty() && !self.config.market.is_empty() {
            markets.push(self.config.market.clone());
        }

        Track {
            url: self.track_url(&t.id),
            id: t.id,
            name: t.name,
            artists,
            album: t.album.name,
            album_art_url,
            duration: Duration::from_millis(t.duration_ms),
            popularity: t.popularity,
            explicit: t.explicit,
            markets,
            playable_override: t.is_playable,
        }
    }

    /// Fetch one page of playlist items.
    async fn playlist_page(
        &self,
        playlist_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<PlaylistItemPage> {
        self.retry(|| async {
            self.api_get(
                &format!("/playlists/{playlist_id}/tracks"),
                &[
                    ("limit", limit.to_string()),
                    ("offset", offset.to_string()),
                    ("market", self.config.market.clone()),
                ],
            )
            .await
        })
        .await
    }
}

#[async_trait]
impl Catalog for SpotifyClient {
    async fn get_track(&self, track_id: &str, market: Option<&str>) -> Result<Track> {
        let id = extract_track_id(track_id);
        let mut query = Vec::new();
        if let Some(m) = market {
            if !m.is_empty() {
                query.push(("market", m.to_string()));
            }
        }
        let obj: TrackObject = self
            .retry(|| async { self.api_get(&format!("/tracks/{id}"), &query).await })
            .await?;
        Ok(self.convert_track(obj))
    }

    async fn search(
        &self,
        query: &str,
        search_type: SearchType,
        limit: usize,
    ) -> Result<Vec<Track>> {
        if query.is_empty() {
            return Err(Error::Catalog("search query is required".to_string()));
        }
        let limit = limit.clamp(1, 50);

        let result: SearchResult = self
            .retry(|| async {
                self.api_get(
                    "/search",
                    &[
                        ("q", query.to_string()),
                        ("type", search_type.as_str().to_string()),
                        ("limit", limit.to_string()),
                    ],
                )
                .await
            })
            .await?;

        let tracks = result
            .tracks
            .map(|p| p.items)
            .unwrap_or_default()
            .into_iter()
            .map(|t| self.convert_track(t))
            .collect();
        Ok(tracks)
    }

    async fn get_playlist_tracks(&self, playlist_url: &str) -> Result<Vec<Track>> {
        let playlist_id = extract_playlist_id(playlist_url);
        if playlist_id.is_empty() {
            return Err(Error::Catalog("invalid playlist URL".to_string()));
        }

        let mut tracks = Vec::new();
        let mut offset = 0;
        loop {
            let page = self.playlist_page(&playlist_id, PAGE_LIMIT, offset).await?;
            let page_len = page.items.len();
            for item in page.items {
                // Episodes and removed tracks come back without a track object
                if let Some(t) = item.track {
                    if !t.id.is_empty() {
                        tracks.push(self.convert_track(t));
                    }
                }
            }
            if page_len < PAGE_LIMIT {
                break;
            }
            offset += PAGE_LIMIT;
        }
        Ok(tracks)
    }

    async fn get_playlist_tracks_random(
        &self,
        playlist_url: &str,
        count: usize,
    ) -> Result<Vec<Track>> {
        let playlist_id = extract_playlist_id(playlist_url);
        if playlist_id.is_empty() {
            return Err(Error::Catalog("invalid playlist URL".to_string()));
        }

        // One probe request for the total, then one random page.
        let probe = self.playlist_page(&playlist_id, 1, 0).await?;
        let total = probe.total;
        if total == 0 {
            return Ok(Vec::new());
        }

        let max_offset = total.saturating_sub(PAGE_LIMIT);
        let offset = if max_offset > 0 {
            rand::thread_rng().gen_range(0..=max_offset)
        } else {
            0
        };

        let page = self.playlist_page(&playlist_id, PAGE_LIMIT, offset).await?;
        let mut tracks: Vec<Track> = page
            .items
            .into_iter()
            .filter_map(|item| item.track)
            .filter(|t| !t.id.is_empty())
            .map(|t| self.convert_track(t))
            .collect();

        if tracks.len() > count {
            tracks.shuffle(&mut rand::thread_rng());
            tracks.truncate(count);
        }
        Ok(tracks)
    }

    async fn check_playlist_exists(&self, playlist_url: &str) -> Result<()> {
        let playlist_id = extract_playlist_id(playlist_url);
        if playlist_id.is_empty() {
            return Err(Error::Catalog("invalid playlist URL".to_string()));
        }
        self.playlist_page(&playlist_id, 1, 0).await.map(|_| ())
    }

    async fn create_playlist(&self, name: &str, description: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct UserObject {
            id: String,
        }
        #[derive(Deserialize)]
        struct PlaylistObject {
            id: String,
        }

        let user: UserObject = self.retry(|| async { self.api_get("/me", &[]).await }).await?;

        let body = serde_json::json!({
            "name": name,
            "description": description,
            "public": true,
        });
        let playlist: PlaylistObject = self
            .retry(|| async {
                self.api_send(
                    self.http
                        .post(format!("{API_BASE}/users/{}/playlists", user.id))
                        .json(&body),
                )
                .await
            })
            .await?;
        Ok(playlist.id)
    }

    async fn add_tracks_to_playlist(&self, playlist_id: &str, track_ids: &[String]) -> Result<()> {
        let uris: Vec<String> = track_ids
            .iter()
            .map(|id| format!("spotify:track:{}", extract_track_id(id)))
            .collect();

        for batch in uris.chunks(BATCH_LIMIT) {
            let body = serde_json::json!({ "uris": batch });
            let _: serde_json::Value = self
                .retry(|| async {
                    self.api_send(
                        self.http
                            .post(format!("{API_BASE}/playlists/{playlist_id}/tracks"))
                            .json(&body),
                    )
                    .await
                })
                .await?;
        }
        Ok(())
    }

    async fn remove_tracks_from_playlist(
        &self,
        playlist_id: &str,
        track_ids: &[String],
    ) -> Result<()> {
        for batch in track_ids.chunks(BATCH_LIMIT) {
            let tracks: Vec<serde_json::Value> = batch
                .iter()
                .map(|id| {
                    serde_json::json!({
                        "uri": format!("spotify:track:{}", extract_track_id(id))
                    })
                })
                .collect();
            let body = serde_json::json!({ "tracks": tracks });
            let _: serde_json::Value = self
                .retry(|| async {
                    self.api_send(
                        self.http
                            .delete(format!("{API_BASE}/playlists/{playlist_id}/tracks"))
                            .json(&body),
                    )
                    .await
                })
                .await?;
        }
        Ok(())
    }

    fn playlist_url(&self, playlist_id: &str) -> String {
        format!("https://open.spotify.com/playlist/{playlist_id}")
    }

    fn track_url(&self, track_id: &str) -> String {
        format!("https://open.spotify.com/track/{track_id}")
    }

    fn track_url_with_context(&self, track_id: &str, playlist_id: &str) -> String {
        if playlist_id.is_empty() {
            return self.track_url(track_id);
        }
        format!(
            "https://open.spotify.com/track/{track_id}?context=spotify%3Aplaylist%3A{playlist_id}"
        )
    }
}

/// Transient failures worth retrying: rate limiting and server errors.
fn is_retryable(err: &Error) -> bool {
    let text = err.to_string();
    text.contains("rate limit")
        || text.contains("429")
        || text.contains("500")
        || text.contains("502")
        || text.contains("503")
        || text.contains("504")
}

// Wire DTOs, narrowed to the fields the core consumes.

#[derive(Debug, Deserialize)]
struct TrackObject {
    id: String,
    name: String,
    artists: Vec<ArtistObject>,
    album: AlbumObject,
    duration_ms: u64,
    #[serde(default)]
    popularity: u32,
    #[serde(default)]
    explicit: bool,
    #[serde(default)]
    available_markets: Vec<String>,
    #[serde(default)]
    is_playable: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ArtistObject {
    name: String,
}

#[derive(Debug, Deserialize, Default)]
struct AlbumObject {
    #[serde(default)]
    name: String,
    #[serde(default)]
    images: Vec<ImageObject>,
}

#[derive(Debug, Deserialize)]
struct ImageObject {
    url: String,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    tracks: Option<TrackPage>,
}

#[derive(Debug, Deserialize)]
struct TrackPage {
    items: Vec<TrackObject>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItemPage {
    items: Vec<PlaylistItem>,
    total: usize,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    track: Option<TrackObject>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(is_retryable(&Error::Catalog(
            "catalog API returned 429 Too Many Requests: rate limit".to_string()
        )));
        assert!(is_retryable(&Error::Catalog(
            "catalog API returned 503 Service Unavailable: ".to_string()
        )));
        assert!(!is_retryable(&Error::Catalog(
            "catalog API returned 404 Not Found: ".to_string()
        )));
        assert!(!is_retryable(&Error::Catalog(
            "catalog API returned 401 Unauthorized: ".to_string()
        )));
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let result = SpotifyClient::new(SpotifyConfig {
            client_id: String::new(),
            client_secret: "s".to_string(),
            refresh_token: "r".to_string(),
            market: "JP".to_string(),
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_track_url_with_context() {
        let client = SpotifyClient::new(SpotifyConfig {
            client_id: "c".to_string(),
            client_secret: "s".to_string(),
            refresh_token: "r".to_string(),
            market: "JP".to_string(),
        })
        .unwrap();

        assert_eq!(
            client.track_url_with_context("abc", ""),
            "https://open.spotify.com/track/abc"
        );
        assert_eq!(
            client.track_url_with_context("abc", "pl1"),
            "https://open.spotify.com/track/abc?context=spotify%3Aplaylist%3Apl1"
        );
    }

    #[test]
    fn test_track_object_decode() {
        let json = r#"{
            "id": "t1",
            "name": "Song",
            "artists": [{"name": "A"}, {"name": "B"}],
            "album": {"name": "Album", "images": [{"url": "https://img/1"}]},
            "duration_ms": 215000,
            "popularity": 64,
            "explicit": false,
            "is_playable": true
        }"#;
        let obj: TrackObject = serde_json::from_str(json).unwrap();
        assert_eq!(obj.id, "t1");
        assert_eq!(obj.artists.len(), 2);
        assert_eq!(obj.duration_ms, 215_000);
        assert_eq!(obj.is_playable, Some(true));
        assert!(obj.available_markets.is_empty());
    }
}
