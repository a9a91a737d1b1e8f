//! Playlist-backed BGM provider

use super::BgmProvider;
use crate::catalog::Catalog;
use crate::error::{Error, Result};
use async_trait::async_trait;
use jbx_common::track::Track;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Settings for [`PlaylistProvider`]
#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistProviderConfig {
    pub playlist_url: String,
}

/// Draws BGM candidates from a random page of a configured playlist,
/// keeping an in-memory cache so repeated refills do not hammer the
/// catalog API.
pub struct PlaylistProvider {
    catalog: Arc<dyn Catalog>,
    cache: Mutex<Vec<Track>>,
    /// Target cache size when refilling
    candidate_count: usize,
    config: PlaylistProviderConfig,
}

impl PlaylistProvider {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        candidate_count: usize,
        settings: &serde_yaml::Value,
    ) -> Result<Self> {
        let config: PlaylistProviderConfig = serde_yaml::from_value(settings.clone())
            .map_err(|e| Error::Config(format!("playlist provider settings: {e}")))?;
        if config.playlist_url.is_empty() {
            return Err(Error::Config(
                "playlist provider requires playlist_url".to_string(),
            ));
        }
        debug!(playlist_url = %config.playlist_url, "playlist provider configured");
        Ok(Self {
            catalog,
            cache: Mutex::new(Vec::new()),
            candidate_count,
            config,
        })
    }
}

#[async_trait]
impl BgmProvider for PlaylistProvider {
    fn name(&self) -> &'static str {
        "playlist"
    }

    async fn get_candidates(
        &self,
        count: usize,
        _seed_tracks: &[Track],
        exclude_ids: &HashSet<String>,
    ) -> Result<Vec<Track>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut cache = self.cache.lock().await;

        // Usable cache entries after dropping already-queued tracks
        let mut available: Vec<Track> = cache
            .iter()
            .filter(|t| !exclude_ids.contains(&t.id))
            .cloned()
            .collect();

        if available.len() < count {
            let needed = self.candidate_count.saturating_sub(available.len()).max(1);
            let fresh = self
                .catalog
                .get_playlist_tracks_random(&self.config.playlist_url, needed)
                .await?;

            for track in fresh {
                if !exclude_ids.contains(&track.id)
                    && !available.iter().any(|t| t.id == track.id)
                {
                    available.push(track);
                }
            }
        }

        if available.is_empty() {
            *cache = Vec::new();
            return Ok(Vec::new());
        }

        let take = count.min(available.len());
        let rest = available.split_off(take);
        *cache = rest;
        Ok(available)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SearchType;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn track(id: &str) -> Track {
        Track {
            id: id.to_string(),
            name: format!("Track {id}"),
            artists: vec!["Artist".to_string()],
            album: "Album".to_string(),
            album_art_url: String::new(),
            duration: Duration::from_secs(180),
            url: String::new(),
            popularity: 0,
            explicit: false,
            markets: vec!["JP".to_string()],
            playable_override: None,
        }
    }

    /// Catalog stub serving a fixed playlist page
    struct StubCatalog {
        page: Vec<Track>,
        fetches: AtomicUsize,
    }

    impl StubCatalog {
        fn with(page: Vec<Track>) -> Arc<Self> {
            Arc::new(Self {
                page,
                fetches: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Catalog for StubCatalog {
        async fn get_track(&self, _id: &str, _market: Option<&str>) -> Result<Track> {
            Err(Error::Catalog("not implemented".to_string()))
        }
        async fn search(
            &self,
            _query: &str,
            _search_type: SearchType,
            _limit: usize,
        ) -> Result<Vec<Track>> {
            Ok(Vec::new())
        }
        async fn get_playlist_tracks(&self, _url: &str) -> Result<Vec<Track>> {
            Ok(self.page.clone())
        }
        async fn get_playlist_tracks_random(
            &self,
            _url: &str,
            count: usize,
        ) -> Result<Vec<Track>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.page.iter().take(count).cloned().collect())
        }
        async fn check_playlist_exists(&self, _url: &str) -> Result<()> {
            Ok(())
        }
        async fn create_playlist(&self, _name: &str, _description: &str) -> Result<String> {
            Ok("pl1".to_string())
        }
        async fn add_tracks_to_playlist(&self, _id: &str, _ids: &[String]) -> Result<()> {
            Ok(())
        }
        async fn remove_tracks_from_playlist(&self, _id: &str, _ids: &[String]) -> Result<()> {
            Ok(())
        }
        fn playlist_url(&self, id: &str) -> String {
            format!("https://example.com/playlist/{id}")
        }
        fn track_url(&self, id: &str) -> String {
            format!("https://example.com/track/{id}")
        }
        fn track_url_with_context(&self, id: &str, _playlist_id: &str) -> String {
            self.track_url(id)
        }
    }

    fn settings(url: &str) -> serde_yaml::Value {
        serde_yaml::from_str(&format!("playlist_url: \"{url}\"")).unwrap()
    }

    #[tokio::test]
    async fn test_returns_requested_count_and_caches_rest() {
        let catalog = StubCatalog::with(vec![track("a"), track("b"), track("c"), track("d")]);
        let provider =
            PlaylistProvider::new(catalog.clone(), 5, &settings("https://pl/x")).unwrap();

        let first = provider
            .get_candidates(2, &[], &HashSet::new())
            .await
            .unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(catalog.fetches.load(Ordering::SeqCst), 1);

        // The remainder is served from cache without another fetch
        let second = provider
            .get_candidates(2, &[], &HashSet::new())
            .await
            .unwrap();
        assert_eq!(second.len(), 2);
        assert_eq!(catalog.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_excluded_tracks_filtered() {
        let catalog = StubCatalog::with(vec![track("a"), track("b")]);
        let provider = PlaylistProvider::new(catalog, 5, &settings("https://pl/x")).unwrap();

        let mut exclude = HashSet::new();
        exclude.insert("a".to_string());
        let result = provider.get_candidates(5, &[], &exclude).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, "b");
    }

    #[tokio::test]
    async fn test_zero_count_is_empty() {
        let catalog = StubCatalog::with(vec![track("a")]);
        let provider = PlaylistProvider::new(catalog, 5, &settings("https://pl/x")).unwrap();
        let result = provider
            .get_candidates(0, &[], &HashSet::new())
            .await
            .unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_missing_url_rejected() {
        let catalog = StubCatalog::with(vec![]);
        let empty = serde_yaml::from_str("{}").unwrap();
        assert!(PlaylistProvider::new(catalog, 5, &empty).is_err());
    }
}
