//! Per-platform indexer settings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Settings for one platform indexer.
///
/// Every field has a default so a TOML table or env override only needs to
/// name what it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub enabled: bool,

    /// Upper bound on items processed per run. `None` means unbounded.
    pub max_items: Option<usize>,

    /// Half-width of the coordinate square swept around `(0, 0)`.
    pub search_radius: u32,

    /// Coordinates scanned per UTC day across all runs.
    pub daily_coordinate_limit: usize,

    pub batch_size: usize,

    /// Per-request timeout override. Falls back to the global timeout.
    pub timeout_secs: Option<u64>,

    /// TTL for cached API responses. 0 disables caching for the platform.
    pub cache_duration_secs: u64,

    /// Base URL of the platform API or site.
    pub api_endpoint: Option<String>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_items: None,
            search_radius: 2,
            daily_coordinate_limit: 500,
            batch_size: 50,
            timeout_secs: None,
            cache_duration_secs: 3600,
            api_endpoint: None,
        }
    }
}

impl IndexerConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn cache_duration(&self) -> Duration {
        Duration::from_secs(self.cache_duration_secs)
    }

    /// Built-in settings for a known platform name.
    pub fn platform_default(platform: &str) -> Self {
        match platform {
            "decentraland" => Self {
                enabled: true,
                max_items: Some(100),
                api_endpoint: Some("https://peer.decentraland.org/content".into()),
                ..Self::default()
            },
            "sandbox" => Self {
                max_items: Some(500),
                cache_duration_secs: 0,
                api_endpoint: Some("https://www.sandbox.game".into()),
                ..Self::default()
            },
            "spatial" => Self {
                enabled: true,
                max_items: Some(100),
                cache_duration_secs: 0,
                api_endpoint: Some("https://www.spatial.io".into()),
                ..Self::default()
            },
            "neos" => Self {
                max_items: Some(100),
                cache_duration_secs: 0,
                api_endpoint: Some("https://api.neos.com".into()),
                ..Self::default()
            },
            _ => Self::default(),
        }
    }
}

/// Platforms configured out of the box.
pub const KNOWN_PLATFORMS: &[&str] = &["decentraland", "sandbox", "spatial", "neos"];

pub(crate) fn default_indexers() -> BTreeMap<String, IndexerConfig> {
    KNOWN_PLATFORMS
        .iter()
        .map(|p| (p.to_string(), IndexerConfig::platform_default(p)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_defaults() {
        assert!(IndexerConfig::platform_default("decentraland").enabled);
        assert!(IndexerConfig::platform_default("spatial").enabled);
        assert!(!IndexerConfig::platform_default("sandbox").enabled);
        assert!(!IndexerConfig::platform_default("neos").enabled);
        assert_eq!(IndexerConfig::platform_default("unknown"), IndexerConfig::default());
    }

    #[test]
    fn test_partial_table_uses_defaults() {
        let config: IndexerConfig = serde_json::from_str(r#"{"max_items": 7}"#).unwrap();
        assert_eq!(config.max_items, Some(7));
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.search_radius, 2);
        assert!(config.timeout().is_none());
    }
}
