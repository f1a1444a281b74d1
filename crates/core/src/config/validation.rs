//! Configuration validation rules.
//!
//! Applied to `AppConfig` after it has been loaded from environment, files,
//! or defaults.

use crate::config::{AppConfig, IndexerConfig};
use thiserror::Error;

/// Shortest accepted `secret_key_base`, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Largest accepted coordinate sweep radius.
pub const MAX_SEARCH_RADIUS: u32 = 150;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `user_agent` is empty
    /// - `robots_cache_ttl_secs` is 0
    /// - `secret_key_base` is set but shorter than 32 bytes
    /// - `max_retry_delay_ms` is below `retry_delay_ms`
    /// - any indexer has `batch_size` 0 or `search_radius` above 150
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms < 100 {
            return Err(invalid("timeout_ms", "must be at least 100ms"));
        }
        if self.timeout_ms > 300_000 {
            return Err(invalid("timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }

        if self.user_agent.trim().is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }

        if self.robots_cache_ttl_secs == 0 {
            return Err(invalid("robots_cache_ttl_secs", "must be greater than 0"));
        }

        if self.secret_key_base.as_ref().is_some_and(|s| s.len() < MIN_SECRET_LEN) {
            return Err(invalid("secret_key_base", format!("must be at least {MIN_SECRET_LEN} bytes")));
        }

        if self.max_retry_delay_ms < self.retry_delay_ms {
            return Err(invalid("max_retry_delay_ms", "must not be below retry_delay_ms"));
        }

        for (platform, indexer) in &self.indexers {
            indexer.validate(platform)?;
        }

        Ok(())
    }
}

impl IndexerConfig {
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming `indexers.<platform>.<field>`.
    pub fn validate(&self, platform: &str) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(invalid(format!("indexers.{platform}.batch_size"), "must be greater than 0"));
        }
        if self.search_radius > MAX_SEARCH_RADIUS {
            return Err(invalid(
                format!("indexers.{platform}.search_radius"),
                format!("must not exceed {MAX_SEARCH_RADIUS}"),
            ));
        }
        if self.timeout_secs == Some(0) {
            return Err(invalid(format!("indexers.{platform}.timeout_secs"), "must be greater than 0"));
        }
        Ok(())
    }
}
