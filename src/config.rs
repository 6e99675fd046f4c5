use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use chatcore::types::MediaClass;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
}

/// Per-class capacities of the resolved-path caches.
///
/// Stickers are small and reused across many messages, so their cache is
/// the largest; full-resolution media gets the smallest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheCapacities {
    pub image: usize,
    pub quoted_image: usize,
    pub video: usize,
    pub voice: usize,
    pub emoji: usize,
}

impl Default for CacheCapacities {
    fn default() -> Self {
        Self {
            image: 100,
            quoted_image: 200,
            video: 50,
            voice: 100,
            emoji: 500,
        }
    }
}

impl CacheCapacities {
    pub fn for_class(&self, class: MediaClass) -> usize {
        match class {
            MediaClass::Image => self.image,
            MediaClass::QuotedImage => self.quoted_image,
            MediaClass::Video => self.video,
            MediaClass::Voice => self.voice,
            MediaClass::Emoji => self.emoji,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// Messages fetched per page
    pub page_size: usize,
    pub resolve_timeout_ms: u64,
    pub max_concurrent_decrypts: usize,
    pub cache: CacheCapacities,
    /// Wall-clock bound on cached "video missing" answers
    pub negative_max_age_secs: Option<u64>,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            resolve_timeout_ms: 5_000,
            max_concurrent_decrypts: 3,
            cache: CacheCapacities::default(),
            negative_max_age_secs: None,
        }
    }
}

impl MirrorConfig {
    /// Load a JSON config file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Apply `CHATMIRROR_*` environment overrides on top of `self`.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    fn with_overrides_from(
        mut self,
        lookup: impl Fn(&'static str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(v) = parse_env(&lookup, "CHATMIRROR_PAGE_SIZE")? {
            self.page_size = v as usize;
        }
        if let Some(v) = parse_env(&lookup, "CHATMIRROR_RESOLVE_TIMEOUT_MS")? {
            self.resolve_timeout_ms = v;
        }
        if let Some(v) = parse_env(&lookup, "CHATMIRROR_MAX_CONCURRENT_DECRYPTS")? {
            self.max_concurrent_decrypts = v as usize;
        }
        Ok(self)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }

    pub fn negative_max_age(&self) -> Option<chrono::Duration> {
        self.negative_max_age_secs
            .and_then(|secs| chrono::Duration::try_seconds(secs as i64))
    }
}

fn parse_env(
    lookup: &impl Fn(&'static str) -> Option<String>,
    name: &'static str,
) -> Result<Option<u64>, ConfigError> {
    match lookup(name) {
        None => Ok(None),
        Some(value) => match value.trim().parse::<u64>() {
            Ok(v) if v > 0 => Ok(Some(v)),
            _ => Err(ConfigError::InvalidEnv { name, value }),
        },
    }
}
