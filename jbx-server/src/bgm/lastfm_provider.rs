//! Recommendation-backed BGM provider with hybrid scoring
//!
//! Combines two strategies over the recommendation service: tracks that
//! share the seed tracks' top tags, and tracks the service reports as
//! similar to the seeds. A candidate surfacing in both lists scores the
//! sum of both weights. The top `2·count` by score are shuffled and the
//! first `count` returned, trading a little rank fidelity for variety.

use super::BgmProvider;
use crate::catalog::{Catalog, SearchType};
use crate::error::{Error, Result};
use crate::lastfm::{LastFmClient, SimilarTrack, Tag, TopTrack};
use async_trait::async_trait;
use jbx_common::track::Track;
use rand::seq::SliceRandom;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Recommendation-service operations the provider needs
#[async_trait]
pub trait Recommendation: Send + Sync {
    async fn get_similar_tracks(
        &self,
        track_name: &str,
        artist_name: &str,
        limit: usize,
    ) -> Result<Vec<SimilarTrack>>;

    async fn get_top_tags(
        &self,
        track_name: &str,
        artist_name: &str,
        limit: usize,
    ) -> Result<Vec<Tag>>;

    async fn get_top_tracks(&self, tag_name: &str, limit: usize) -> Result<Vec<TopTrack>>;

    async fn get_chart_top_tracks(&self, limit: usize) -> Result<Vec<TopTrack>>;
}

#[async_trait]
impl Recommendation for LastFmClient {
    async fn get_similar_tracks(
        &self,
        track_name: &str,
        artist_name: &str,
        limit: usize,
    ) -> Result<Vec<SimilarTrack>> {
        LastFmClient::get_similar_tracks(self, track_name, artist_name, limit).await
    }

    async fn get_top_tags(
        &self,
        track_name: &str,
        artist_name: &str,
        limit: usize,
    ) -> Result<Vec<Tag>> {
        LastFmClient::get_top_tags(self, track_name, artist_name, limit).await
    }

    async fn get_top_tracks(&self, tag_name: &str, limit: usize) -> Result<Vec<TopTrack>> {
        LastFmClient::get_top_tracks(self, tag_name, limit).await
    }

    async fn get_chart_top_tracks(&self, limit: usize) -> Result<Vec<TopTrack>> {
        LastFmClient::get_chart_top_tracks(self, limit).await
    }
}

/// Settings for [`LastFmProvider`]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LastFmProviderConfig {
    pub api_key: String,
    /// Seed tracks consulted per refill
    pub seed_track_count: usize,
    /// Top tags taken from the accumulated tag weights
    pub tag_count: usize,
    /// Score contribution of the tag strategy
    pub tag_weight: f64,
    /// Score contribution of the similar strategy
    pub similar_weight: f64,
}

impl Default for LastFmProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            seed_track_count: 3,
            tag_count: 5,
            tag_weight: 0.4,
            similar_weight: 0.6,
        }
    }
}

impl LastFmProviderConfig {
    pub fn from_settings(settings: &serde_yaml::Value) -> Result<Self> {
        let config: Self = serde_yaml::from_value(settings.clone())
            .map_err(|e| Error::Config(format!("lastfm provider settings: {e}")))?;
        if config.api_key.is_empty() {
            return Err(Error::Config("lastfm provider requires api_key".to_string()));
        }
        if config.seed_track_count == 0 || config.tag_count == 0 {
            return Err(Error::Config(
                "lastfm provider counts must be at least 1".to_string(),
            ));
        }
        if (config.tag_weight + config.similar_weight - 1.0).abs() > 1e-9 {
            return Err(Error::Config(
                "lastfm tag_weight and similar_weight must sum to 1.0".to_string(),
            ));
        }
        Ok(config)
    }
}

struct Scored {
    track: Track,
    score: f64,
}

/// BGM provider over the recommendation service
pub struct LastFmProvider {
    recommendation: Arc<dyn Recommendation>,
    catalog: Arc<dyn Catalog>,

    /// (name, artist) -> resolved catalog track; None caches misses so a
    /// failing lookup is not repeated
    search_cache: Mutex<HashMap<String, Option<Track>>>,

    candidate_count: usize,
    config: LastFmProviderConfig,
}

impl LastFmProvider {
    pub fn new(
        recommendation: Arc<dyn Recommendation>,
        catalog: Arc<dyn Catalog>,
        candidate_count: usize,
        config: LastFmProviderConfig,
    ) -> Self {
        Self {
            recommendation,
            catalog,
            search_cache: Mutex::new(HashMap::new()),
            candidate_count,
            config,
        }
    }

    /// Resolve a (name, artist) pair to a full catalog track. Search
    /// returns tracks without market data, so the id is fetched again
    /// through the track endpoint for the complete record.
    async fn resolve_on_catalog(&self, track_name: &str, artist_name: &str) -> Option<Track> {
        let key = format!("{track_name}\u{1f}{artist_name}");
        {
            let cache = self.search_cache.lock().await;
            if let Some(cached) = cache.get(&key) {
                return cached.clone();
            }
        }

        let resolved = self.lookup(track_name, artist_name).await;
        let mut cache = self.search_cache.lock().await;
        cache.insert(key, resolved.clone());
        resolved
    }

    async fn lookup(&self, track_name: &str, artist_name: &str) -> Option<Track> {
        let query = format!("track:{track_name} artist:{artist_name}");
        let results = self
            .catalog
            .search(&query, SearchType::Track, 1)
            .await
            .ok()?;
        let id = results.first()?.id.clone();
        self.catalog.get_track(&id, None).await.ok()
    }

    /// Tag strategy: accumulate tag weights across seeds, take the top
    /// tags, and resolve each tag's top tracks.
    async fn tag_based_candidates(
        &self,
        seed_tracks: &[Track],
        exclude_ids: &HashSet<String>,
    ) -> Vec<Track> {
        let mut tag_counts: HashMap<String, u32> = HashMap::new();
        for seed in seed_tracks {
            let Some(artist) = seed.primary_artist() else {
                continue;
            };
            let Ok(tags) = self
                .recommendation
                .get_top_tags(&seed.name, artist, 10)
                .await
            else {
                continue;
            };
            for tag in tags {
                *tag_counts.entry(tag.name).or_default() += tag.count;
            }
        }

        if tag_counts.is_empty() {
            return Vec::new();
        }

        let top_tags = top_n_tags(tag_counts, self.config.tag_count);

        let fetches = top_tags.iter().map(|tag| async move {
            let tracks = self
                .recommendation
                .get_top_tracks(tag, 20)
                .await
                .unwrap_or_default();
            let mut resolved = Vec::new();
            for t in tracks {
                if let Some(track) = self.resolve_on_catalog(&t.name, &t.artist).await {
                    if !exclude_ids.contains(&track.id) {
                        resolved.push(track);
                    }
                }
            }
            resolved
        });
        let candidates: Vec<Track> = futures::future::join_all(fetches)
            .await
            .into_iter()
            .flatten()
            .collect();

        dedupe_by_id(candidates)
    }

    /// Similar strategy: each seed's similar tracks, resolved on the
    /// catalog.
    async fn similar_based_candidates(
        &self,
        seed_tracks: &[Track],
        exclude_ids: &HashSet<String>,
    ) -> Vec<Track> {
        let fetches = seed_tracks.iter().filter_map(|seed| {
            let artist = seed.primary_artist()?;
            Some(async move {
                let similar = self
                    .recommendation
                    .get_similar_tracks(&seed.name, artist, 10)
                    .await
                    .unwrap_or_default();
                let mut resolved = Vec::new();
                for s in similar {
                    if let Some(track) = self.resolve_on_catalog(&s.name, &s.artist).await {
                        if !exclude_ids.contains(&track.id) {
                            resolved.push(track);
                        }
                    }
                }
                resolved
            })
        });
        let candidates: Vec<Track> = futures::future::join_all(fetches)
            .await
            .into_iter()
            .flatten()
            .collect();

        dedupe_by_id(candidates)
    }

    fn score_and_merge(&self, tag_candidates: Vec<Track>, similar_candidates: Vec<Track>) -> Vec<Scored> {
        let mut scores: HashMap<String, Scored> = HashMap::new();

        for track in tag_candidates {
            scores.insert(
                track.id.clone(),
                Scored {
                    track,
                    score: self.config.tag_weight,
                },
            );
        }

        for track in similar_candidates {
            match scores.get_mut(&track.id) {
                Some(existing) => existing.score += self.config.similar_weight,
                None => {
                    scores.insert(
                        track.id.clone(),
                        Scored {
                            track,
                            score: self.config.similar_weight,
                        },
                    );
                }
            }
        }

        scores.into_values().collect()
    }

    /// Chart fallback when no seed tracks exist yet.
    async fn chart_based_candidates(
        &self,
        count: usize,
        exclude_ids: &HashSet<String>,
    ) -> Result<Vec<Track>> {
        let mut chart = self.recommendation.get_chart_top_tracks(50).await?;
        chart.shuffle(&mut rand::thread_rng());

        let mut candidates = Vec::new();
        for entry in chart {
            if let Some(track) = self.resolve_on_catalog(&entry.name, &entry.artist).await {
                if !exclude_ids.contains(&track.id) {
                    candidates.push(track);
                }
            }
            if candidates.len() >= count * 2 {
                break;
            }
        }
        Ok(dedupe_by_id(candidates))
    }
}

#[async_trait]
impl BgmProvider for LastFmProvider {
    fn name(&self) -> &'static str {
        "lastfm"
    }

    async fn get_candidates(
        &self,
        count: usize,
        seed_tracks: &[Track],
        exclude_ids: &HashSet<String>,
    ) -> Result<Vec<Track>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let seeds = &seed_tracks[..seed_tracks.len().min(self.config.seed_track_count)];

        if seeds.is_empty() {
            return self.chart_based_candidates(count, exclude_ids).await;
        }

        let tag_candidates = self.tag_based_candidates(seeds, exclude_ids).await;
        let similar_candidates = self.similar_based_candidates(seeds, exclude_ids).await;

        let mut scored = self.score_and_merge(tag_candidates, similar_candidates);
        if scored.is_empty() {
            return Ok(Vec::new());
        }

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        // Shuffle inside the top pool instead of always taking the
        // absolute best, so consecutive refills vary
        let pool = (count * 2).min(scored.len());
        debug!(
            pool,
            total = scored.len(),
            candidate_count = self.candidate_count,
            "selecting from scored candidate pool"
        );
        let mut top: Vec<Scored> = scored.drain(..pool).collect();
        top.shuffle(&mut rand::thread_rng());

        Ok(top.into_iter().take(count).map(|s| s.track).collect())
    }
}

fn top_n_tags(tag_counts: HashMap<String, u32>, n: usize) -> Vec<String> {
    let mut tags: Vec<(String, u32)> = tag_counts.into_iter().collect();
    tags.sort_by(|a, b| b.1.cmp(&a.1));
    tags.into_iter().take(n).map(|(name, _)| name).collect()
}

fn dedupe_by_id(tracks: Vec<Track>) -> Vec<Track> {
    let mut seen = HashSet::new();
    tracks
        .into_iter()
        .filter(|t| seen.insert(t.id.clone()))
        .collect()
}
