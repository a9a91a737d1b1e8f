//! Configuration loading and validation
//!
//! The server is configured from a single YAML file. Credentials may be
//! overridden from the environment so they never have to live on disk:
//! `CATALOG_CLIENT_ID`, `CATALOG_CLIENT_SECRET`, `CATALOG_REFRESH_TOKEN`,
//! `LASTFM_API_KEY`, `ADMIN_TOKEN`.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub admin: AdminConfig,
    pub playlists: PlaylistsConfig,
    pub playback: PlaybackConfig,
    pub bgm: BgmConfig,
    pub filters: HashMap<String, FilterConfig>,
    pub messages: MessagesConfig,
    pub catalog: CatalogConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
    pub hooks: HooksConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
            hooks: HooksConfig::default(),
        }
    }
}

/// Lifecycle hook commands
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct HooksConfig {
    pub on_started: Vec<String>,
    pub on_stopped: Vec<String>,
}

/// Session scheduling and presentation
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionConfig {
    pub title: String,
    /// RFC3339; empty means start immediately
    pub start_time: String,
    /// RFC3339; empty means open-ended
    pub end_time: String,
    pub keywords: Vec<String>,
}

/// Admin authentication and VIP identification
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AdminConfig {
    pub token: String,
    /// Display names granted VIP status at join time
    pub display_names: Vec<String>,
}

/// Opening and ending playlist configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PlaylistsConfig {
    pub opening: PlaylistEntryConfig,
    pub ending: PlaylistEntryConfig,
}

/// A single configured playlist
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaylistEntryConfig {
    /// Empty means not configured
    pub playlist_url: String,
    pub display_name: String,
}

impl Default for PlaylistEntryConfig {
    fn default() -> Self {
        Self {
            playlist_url: String::new(),
            display_name: "DJ selection".to_string(),
        }
    }
}

/// Playback timing knobs
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Delay between the conceptual track start and the TRACK_STARTED
    /// notification, so listeners following the link land on a player
    /// that has already switched tracks
    pub notification_delay_ms: u64,
    /// Small start offset compensating for catalog-client drift
    pub gap_correction_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            notification_delay_ms: 5000,
            gap_correction_ms: 100,
        }
    }
}

/// BGM refill configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BgmConfig {
    /// Remaining-queue seconds below which refill kicks in
    pub depletion_threshold_sec: u64,
    /// Size of the recent-artists diversity window
    pub recent_artist_count: usize,
    /// Candidates requested from the provider chain per refill
    pub candidate_count: usize,
    pub providers: Vec<ProviderConfig>,
}

impl Default for BgmConfig {
    fn default() -> Self {
        Self {
            depletion_threshold_sec: 30,
            recent_artist_count: 3,
            candidate_count: 5,
            providers: Vec::new(),
        }
    }
}

/// A single BGM provider entry
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Provider type: "playlist" or "lastfm"
    pub r#type: String,
    /// Name shown as the requester of tracks this provider supplies
    pub display_name: String,
    #[serde(default)]
    pub settings: serde_yaml::Value,
}

/// Per-filter enable flag and settings
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct FilterConfig {
    pub enabled: bool,
    pub settings: serde_yaml::Value,
}

/// User-facing messages keyed by rejection code
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct MessagesConfig {
    pub success: String,
    pub default_error: String,
    pub acceptance_done: String,
    pub time_limit_exceeded: String,
    pub kicked: String,
    pub market_restriction: String,
    pub user_pending: String,
    pub duplicate_track: String,
    pub track_not_found: String,
    pub invalid_listener: String,
    pub duration_limit_exceeded: String,
}

/// Upstream catalog credentials and market
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    /// 2-letter ISO market code
    pub market: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            refresh_token: String::new(),
            market: "JP".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file, apply environment overrides,
    /// and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("failed to read config file: {e}")))?;
        let mut cfg: Config = serde_yaml::from_str(&data)
            .map_err(|e| Error::Config(format!("failed to parse config file: {e}")))?;
        cfg.override_from_env();
        cfg.validate()?;
        Ok(cfg)
    }

    fn override_from_env(&mut self) {
        if let Ok(v) = std::env::var("CATALOG_CLIENT_ID") {
            self.catalog.client_id = v;
        }
        if let Ok(v) = std::env::var("CATALOG_CLIENT_SECRET") {
            self.catalog.client_secret = v;
        }
        if let Ok(v) = std::env::var("CATALOG_REFRESH_TOKEN") {
            self.catalog.refresh_token = v;
        }
        if let Ok(v) = std::env::var("ADMIN_TOKEN") {
            self.admin.token = v;
        }
        if let Ok(v) = std::env::var("LASTFM_API_KEY") {
            for provider in &mut self.bgm.providers {
                if provider.r#type == "lastfm" {
                    if let serde_yaml::Value::Mapping(ref mut m) = provider.settings {
                        m.insert(
                            serde_yaml::Value::String("api_key".to_string()),
                            serde_yaml::Value::String(v.clone()),
                        );
                    }
                    break;
                }
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.admin.token.is_empty() {
            return Err(Error::Config("admin.token is required".to_string()));
        }
        if self.playback.notification_delay_ms > 30_000 {
            return Err(Error::Config(
                "playback.notification_delay_ms must be at most 30000".to_string(),
            ));
        }
        if self.playback.gap_correction_ms > 5_000 {
            return Err(Error::Config(
                "playback.gap_correction_ms must be at most 5000".to_string(),
            ));
        }
        if !self.catalog.market.is_empty() && self.catalog.market.len() != 2 {
            return Err(Error::Config(
                "catalog.market must be a 2-letter ISO code".to_string(),
            ));
        }
        self.validate_time_consistency()?;
        Ok(())
    }

    /// Scheduled times must be in the future and end must come after start.
    fn validate_time_consistency(&self) -> Result<()> {
        let now = Utc::now();
        let start = self.parse_start_time()?;
        let end = self.parse_end_time()?;

        if let Some(start) = start {
            if start < now {
                return Err(Error::Config(format!(
                    "session.start_time ({}) must be in the future",
                    self.session.start_time
                )));
            }
        }
        if let Some(end) = end {
            if end < now {
                return Err(Error::Config(format!(
                    "session.end_time ({}) must be in the future",
                    self.session.end_time
                )));
            }
        }
        if let (Some(start), Some(end)) = (start, end) {
            if start >= end {
                return Err(Error::Config(format!(
                    "session.start_time ({}) must be before session.end_time ({})",
                    self.session.start_time, self.session.end_time
                )));
            }
        }
        Ok(())
    }

    /// Parse the scheduled start time. Returns None when unset.
    pub fn parse_start_time(&self) -> Result<Option<DateTime<Utc>>> {
        parse_rfc3339("session.start_time", &self.session.start_time)
    }

    /// Parse the scheduled end time. Returns None when unset.
    pub fn parse_end_time(&self) -> Result<Option<DateTime<Utc>>> {
        parse_rfc3339("session.end_time", &self.session.end_time)
    }

    /// Whether a filter is enabled in configuration.
    pub fn is_filter_enabled(&self, name: &str) -> bool {
        self.filters.get(name).map(|f| f.enabled).unwrap_or(false)
    }

    /// Settings for a filter, or a null value when absent.
    pub fn filter_settings(&self, name: &str) -> serde_yaml::Value {
        self.filters
            .get(name)
            .map(|f| f.settings.clone())
            .unwrap_or(serde_yaml::Value::Null)
    }

    /// Whether the given display name is granted VIP at join time.
    pub fn is_admin_display_name(&self, display_name: &str) -> bool {
        self.admin.display_names.iter().any(|n| n == display_name)
    }

    /// User-facing message for a rejection code, falling back to the
    /// default error message.
    pub fn message_for(&self, code: &str) -> &str {
        let m = &self.messages;
        let msg = match code {
            "success" => &m.success,
            "acceptance_done" => &m.acceptance_done,
            "time_limit_exceeded" => &m.time_limit_exceeded,
            "kicked" => &m.kicked,
            "market_restriction" => &m.market_restriction,
            "user_pending" => &m.user_pending,
            "duplicate_track" => &m.duplicate_track,
            "track_not_found" => &m.track_not_found,
            "invalid_listener" => &m.invalid_listener,
            "duration_limit_exceeded" => &m.duration_limit_exceeded,
            _ => &m.default_error,
        };
        if msg.is_empty() {
            &m.default_error
        } else {
            msg
        }
    }
}

fn parse_rfc3339(field: &str, value: &str) -> Result<Option<DateTime<Utc>>> {
    if value.is_empty() {
        return Ok(None);
    }
    DateTime::parse_from_rfc3339(value)
        .map(|t| Some(t.with_timezone(&Utc)))
        .map_err(|e| Error::Config(format!("failed to parse {field}: {e}")))
}
