//! Shared test fixtures: an in-memory catalog and config builders
#![allow(dead_code)]

use async_trait::async_trait;
use jbx_common::track::Track;
use jbx_server::catalog::{extract_track_id, Catalog, SearchType};
use jbx_server::config::Config;
use jbx_server::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Build a track fixture available in the JP market.
pub fn track(id: &str, name: &str, artists: &[&str], duration: Duration) -> Track {
    Track {
        id: id.to_string(),
        name: name.to_string(),
        artists: artists.iter().map(|s| s.to_string()).collect(),
        album: "Album".to_string(),
        album_art_url: String::new(),
        duration,
        url: format!("https://example.com/track/{id}"),
        popularity: 50,
        explicit: false,
        markets: vec!["JP".to_string()],
        playable_override: None,
    }
}

/// In-memory catalog: playlists and tracks are fixed tables, mutations
/// are recorded for assertions.
pub struct MockCatalog {
    pub tracks: Mutex<HashMap<String, Track>>,
    pub playlists: Mutex<HashMap<String, Vec<Track>>>,
    /// (playlist_id, track_ids) per add call
    pub added: Mutex<Vec<(String, Vec<String>)>>,
    /// (playlist_id, track_ids) per remove call
    pub removed: Mutex<Vec<(String, Vec<String>)>>,
}

impl MockCatalog {
    pub fn new() -> Self {
        Self {
            tracks: Mutex::new(HashMap::new()),
            playlists: Mutex::new(HashMap::new()),
            added: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
        }
    }

    pub fn with_track(self, t: Track) -> Self {
        self.tracks.lock().unwrap().insert(t.id.clone(), t);
        self
    }

    pub fn with_playlist(self, url: &str, tracks: Vec<Track>) -> Self {
        self.playlists.lock().unwrap().insert(url.to_string(), tracks);
        self
    }

    /// Flattened list of every id added to the given playlist.
    pub fn added_ids(&self, playlist_id: &str) -> Vec<String> {
        self.added
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == playlist_id)
            .flat_map(|(_, ids)| ids.clone())
            .collect()
    }

    pub fn removed_ids(&self, playlist_id: &str) -> Vec<String> {
        self.removed
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == playlist_id)
            .flat_map(|(_, ids)| ids.clone())
            .collect()
    }
}

#[async_trait]
impl Catalog for MockCatalog {
    async fn get_track(&self, track_id: &str, _market: Option<&str>) -> Result<Track> {
        let id = extract_track_id(track_id);
        self.tracks
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::Catalog(format!("track not found: {id}")))
    }

    async fn search(
        &self,
        query: &str,
        _search_type: SearchType,
        limit: usize,
    ) -> Result<Vec<Track>> {
        let tracks = self.tracks.lock().unwrap();
        Ok(tracks
            .values()
            .filter(|t| query.contains(&t.name))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_playlist_tracks(&self, playlist_url: &str) -> Result<Vec<Track>> {
        self.playlists
            .lock()
            .unwrap()
            .get(playlist_url)
            .cloned()
            .ok_or_else(|| Error::Catalog(format!("playlist not found: {playlist_url}")))
    }

    async fn get_playlist_tracks_random(
        &self,
        playlist_url: &str,
        count: usize,
    ) -> Result<Vec<Track>> {
        let tracks = self.get_playlist_tracks(playlist_url).await?;
        Ok(tracks.into_iter().take(count).collect())
    }

    async fn check_playlist_exists(&self, playlist_url: &str) -> Result<()> {
        self.get_playlist_tracks(playlist_url).await.map(|_| ())
    }

    async fn create_playlist(&self, _name: &str, _description: &str) -> Result<String> {
        Ok("session-playlist".to_string())
    }

    async fn add_tracks_to_playlist(&self, playlist_id: &str, track_ids: &[String]) -> Result<()> {
        self.added
            .lock()
            .unwrap()
            .push((playlist_id.to_string(), track_ids.to_vec()));
        Ok(())
    }

    async fn remove_tracks_from_playlist(
        &self,
        playlist_id: &str,
        track_ids: &[String],
    ) -> Result<()> {
        self.removed
            .lock()
            .unwrap()
            .push((playlist_id.to_string(), track_ids.to_vec()));
        Ok(())
    }

    fn playlist_url(&self, playlist_id: &str) -> String {
        format!("https://example.com/playlist/{playlist_id}")
    }

    fn track_url(&self, track_id: &str) -> String {
        format!("https://example.com/track/{track_id}")
    }

    fn track_url_with_context(&self, track_id: &str, playlist_id: &str) -> String {
        format!("https://example.com/track/{track_id}?context={playlist_id}")
    }
}

/// Baseline test configuration: instant notifications, no gap, BGM from
/// the given playlist URL, all user filters on.
pub fn test_config(bgm_playlist_url: &str) -> Config {
    let yaml = format!(
        r#"
admin:
  token: "test-token"
  display_names: ["DJ Admin"]
playback:
  notification_delay_ms: 0
  gap_correction_ms: 0
bgm:
  depletion_threshold_sec: 0
  recent_artist_count: 3
  candidate_count: 5
  providers:
    - type: playlist
      display_name: "House BGM"
      settings:
        playlist_url: "{bgm_playlist_url}"
filters:
  kicked_listener_filter:
    enabled: true
  user_pending_filter:
    enabled: true
  duplicate_track_filter:
    enabled: true
  duration_limit_filter:
    enabled: true
    settings:
      min_minutes: 1
      max_minutes: 0
catalog:
  market: "JP"
messages:
  success: "Request accepted"
  default_error: "Request failed"
  user_pending: "You already have a track waiting"
"#
    );
    serde_yaml::from_str(&yaml).expect("test config parses")
}
