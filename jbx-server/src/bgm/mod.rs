//! Background-music provision
//!
//! When user requests do not keep the queue full, the session pulls
//! candidates from a chain of [`BgmProvider`]s. Every configured
//! provider is consulted so the filter stage downstream has a pool to
//! choose from; providers that fail or come up empty are logged and
//! skipped.

mod lastfm_provider;
mod playlist_provider;

pub use lastfm_provider::{LastFmProvider, LastFmProviderConfig, Recommendation};
pub use playlist_provider::{PlaylistProvider, PlaylistProviderConfig};

use crate::catalog::Catalog;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::lastfm::{LastFmClient, LastFmConfig};
use async_trait::async_trait;
use jbx_common::track::Track;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A BGM track source strategy
#[async_trait]
pub trait BgmProvider: Send + Sync {
    /// Provider type name as used in configuration
    fn name(&self) -> &'static str;

    /// Retrieve up to `count` candidate tracks. `seed_tracks` hints
    /// recommendations toward what is currently playing; `exclude_ids`
    /// are tracks already queued or played.
    async fn get_candidates(
        &self,
        count: usize,
        seed_tracks: &[Track],
        exclude_ids: &HashSet<String>,
    ) -> Result<Vec<Track>>;
}

/// A candidate along with the display name of the provider it came from
#[derive(Debug, Clone)]
pub struct Candidate {
    pub track: Track,
    pub display_name: String,
}

struct ProviderEntry {
    provider: Box<dyn BgmProvider>,
    display_name: String,
}

/// Consults every provider in configured order, accumulating candidates
/// and growing the exclusion set so later providers do not duplicate
/// earlier ones.
pub struct ProviderChain {
    providers: Vec<ProviderEntry>,
}

impl ProviderChain {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    pub fn add(&mut self, provider: Box<dyn BgmProvider>, display_name: impl Into<String>) {
        self.providers.push(ProviderEntry {
            provider,
            display_name: display_name.into(),
        });
    }

    /// Build the chain from configuration.
    pub fn from_config(cfg: &Config, catalog: Arc<dyn Catalog>) -> Result<Self> {
        if cfg.bgm.providers.is_empty() {
            return Err(Error::Config("no BGM providers configured".to_string()));
        }

        let mut chain = Self::new();
        for (index, pcfg) in cfg.bgm.providers.iter().enumerate() {
            let provider: Box<dyn BgmProvider> = match pcfg.r#type.as_str() {
                "playlist" => Box::new(PlaylistProvider::new(
                    Arc::clone(&catalog),
                    cfg.bgm.candidate_count,
                    &pcfg.settings,
                )?),
                "lastfm" => {
                    let config = LastFmProviderConfig::from_settings(&pcfg.settings)?;
                    let client = LastFmClient::new(LastFmConfig {
                        api_key: config.api_key.clone(),
                    })?;
                    Box::new(LastFmProvider::new(
                        Arc::new(client),
                        Arc::clone(&catalog),
                        cfg.bgm.candidate_count,
                        config,
                    ))
                }
                other => {
                    return Err(Error::Config(format!(
                        "unsupported BGM provider type: {other} (provider index {index})"
                    )))
                }
            };

            info!(
                index = index + 1,
                provider_type = %pcfg.r#type,
                display_name = %pcfg.display_name,
                "registered BGM provider"
            );
            chain.add(provider, pcfg.display_name.clone());
        }
        Ok(chain)
    }

    /// Gather candidates from all providers. Fails only when every
    /// provider comes up empty.
    pub async fn get_candidates(
        &self,
        count: usize,
        seed_tracks: &[Track],
        exclude_ids: &HashSet<String>,
    ) -> Result<Vec<Candidate>> {
        let mut all = Vec::new();
        let mut exclude = exclude_ids.clone();

        for (index, entry) in self.providers.iter().enumerate() {
            debug!(
                index = index + 1,
                total = self.providers.len(),
                provider = %entry.display_name,
                provider_type = entry.provider.name(),
                "trying BGM provider"
            );

            let candidates = match entry.provider.get_candidates(count, seed_tracks, &exclude).await
            {
                Ok(candidates) => candidates,
                Err(e) => {
                    warn!(provider = %entry.display_name, error = %e, "provider failed, trying next");
                    continue;
                }
            };

            if candidates.is_empty() {
                debug!(provider = %entry.display_name, "provider returned no candidates");
                continue;
            }

            for track in candidates {
                exclude.insert(track.id.clone());
                all.push(Candidate {
                    track,
                    display_name: entry.display_name.clone(),
                });
            }

            info!(
                provider = %entry.display_name,
                total_so_far = all.len(),
                "provider returned candidates"
            );
        }

        if all.is_empty() {
            return Err(Error::NoBgmCandidates);
        }
        Ok(all)
    }
}

impl Default for ProviderChain {
    fn default() -> Self {
        Self::new()
    }
}
