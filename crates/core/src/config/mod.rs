//! Application configuration with layered loading.
//!
//! Sources, highest precedence first:
//!
//! 1. Environment variables (`METACRAWL_*`, nested keys joined with `__`)
//! 2. TOML config file (if `METACRAWL_CONFIG_FILE` is set)
//! 3. Built-in defaults

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod indexer;
mod validation;

pub use indexer::{IndexerConfig, KNOWN_PLATFORMS};
pub use validation::ConfigError;

/// Application configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Long-term application secret the integrity pepper is derived from.
    ///
    /// Set via METACRAWL_SECRET_KEY_BASE. Required only once the cache is used.
    #[serde(default)]
    pub secret_key_base: Option<String>,

    /// Path to the SQLite database.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// User-Agent for HTTP requests and robots.txt evaluation.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// HTTP request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_true")]
    pub respect_robots: bool,

    #[serde(default = "default_robots_cache_ttl_secs")]
    pub robots_cache_ttl_secs: u64,

    /// Global switch for the indexer response cache.
    #[serde(default = "default_true")]
    pub enable_caching: bool,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First retry delay; later retries back off exponentially.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,

    /// Minimum spacing between outgoing requests of one client.
    #[serde(default = "default_min_request_interval_ms")]
    pub min_request_interval_ms: u64,

    /// Pause between indexer batches.
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,

    #[serde(default = "indexer::default_indexers")]
    pub indexers: BTreeMap<String, IndexerConfig>,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./metacrawl.sqlite")
}

fn default_user_agent() -> String {
    "MetacrawlIndexer/0.1".into()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

fn default_robots_cache_ttl_secs() -> u64 {
    3600
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    5_000
}

fn default_max_retry_delay_ms() -> u64 {
    60_000
}

fn default_min_request_interval_ms() -> u64 {
    1_000
}

fn default_batch_delay_ms() -> u64 {
    1_000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            secret_key_base: None,
            db_path: default_db_path(),
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
            respect_robots: true,
            robots_cache_ttl_secs: default_robots_cache_ttl_secs(),
            enable_caching: true,
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            min_request_interval_ms: default_min_request_interval_ms(),
            batch_delay_ms: default_batch_delay_ms(),
            indexers: indexer::default_indexers(),
        }
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("secret_key_base", &self.secret_key_base.as_ref().map(|_| "[REDACTED]"))
            .field("db_path", &self.db_path)
            .field("user_agent", &self.user_agent)
            .field("timeout_ms", &self.timeout_ms)
            .field("respect_robots", &self.respect_robots)
            .field("robots_cache_ttl_secs", &self.robots_cache_ttl_secs)
            .field("enable_caching", &self.enable_caching)
            .field("max_retries", &self.max_retries)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("max_retry_delay_ms", &self.max_retry_delay_ms)
            .field("min_request_interval_ms", &self.min_request_interval_ms)
            .field("batch_delay_ms", &self.batch_delay_ms)
            .field("indexers", &self.indexers)
            .finish()
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn robots_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.robots_cache_ttl_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    /// Settings for `platform`: the configured table if present, otherwise
    /// the built-in defaults for that platform.
    pub fn indexer(&self, platform: &str) -> IndexerConfig {
        self.indexers
            .get(platform)
            .cloned()
            .unwrap_or_else(|| IndexerConfig::platform_default(platform))
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file or environment cannot be parsed, or
    /// if validation fails after loading.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var_os("METACRAWL_CONFIG_FILE").map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    /// Like [`AppConfig::load`], reading the TOML layer from `path` instead of
    /// `METACRAWL_CONFIG_FILE`.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(
            Env::prefixed("METACRAWL_")
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Deferred check for the integrity secret.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if no secret is configured.
    pub fn require_secret_key_base(&self) -> Result<&str, ConfigError> {
        self.secret_key_base
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::Missing {
                field: "secret_key_base".into(),
                hint: "Set METACRAWL_SECRET_KEY_BASE environment variable".into(),
            })
    }
}
