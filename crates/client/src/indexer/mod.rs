//! Platform indexers.
//!
//! An [`Indexer`] knows how to list the items a platform exposes and how to
//! turn one item into an [`IndexedContent`] record. Everything else (run
//! bookkeeping, batching, deduplication, persistence, failure isolation)
//! lives in [`runner`].

pub mod decentraland;
pub mod neos;
pub mod registry;
pub mod runner;
pub mod sandbox;
pub mod spatial;

pub use registry::{IndexerRegistry, Platform};
pub use runner::{IndexRunner, RunReport};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

use metacrawl_core::cache::indexer_cache_key;
use metacrawl_core::{AppConfig, Db, IndexedContent, IndexerConfig, IntegrityHasher, VerifiedCache};

use crate::fetch::{
    FetchClient, FetchConfig, FetchError, RequestOptions, Retryable, RobotsPolicyCache, canonicalize, robots_domain,
};
use crate::sitemap::SitemapError;

/// Errors raised while indexing a platform.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Storage(#[from] metacrawl_core::Error),

    #[error("SITEMAP_ERROR: {0}")]
    Sitemap(#[from] SitemapError),

    /// An item could not be turned into a content record.
    #[error("NORMALIZE_ERROR: {0}")]
    Normalize(String),

    #[error("CONFIG_ERROR: {0}")]
    Config(String),
}

impl IndexError {
    /// Structured description recorded on failed runs.
    pub fn details(&self) -> serde_json::Value {
        let (error_class, status) = match self {
            IndexError::Fetch(e) => (e.kind(), e.status()),
            IndexError::Storage(_) => ("storage", None),
            IndexError::Sitemap(_) => ("sitemap", None),
            IndexError::Normalize(_) => ("normalize", None),
            IndexError::Config(_) => ("config", None),
        };
        serde_json::json!({
            "error_class": error_class,
            "error_message": self.to_string(),
            "status": status,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })
    }
}

impl Retryable for IndexError {
    fn is_retryable(&self) -> bool {
        matches!(self, IndexError::Fetch(e) if e.is_retryable())
    }
}

/// Shared handles every indexer run needs.
#[derive(Clone)]
pub struct Services {
    pub config: Arc<AppConfig>,
    pub db: Db,
    pub fetch: FetchClient,
    /// Verified cache over the database, for robots policies and responses.
    pub cache: VerifiedCache,
}

impl Services {
    /// Open the database and wire the cache, robots policy cache and fetch
    /// client from `config`.
    ///
    /// # Errors
    ///
    /// Fails if `secret_key_base` is missing, the database cannot be opened,
    /// or the HTTP client cannot be built.
    pub async fn build(config: AppConfig) -> Result<Self, IndexError> {
        let secret = config
            .require_secret_key_base()
            .map_err(|e| IndexError::Config(e.to_string()))?;
        let hasher = Arc::new(IntegrityHasher::from_secret(secret).map_err(metacrawl_core::Error::from)?);

        let db = Db::open(&config.db_path).await?;
        Self::with_db(config, db, hasher)
    }

    /// Wire services around an already opened database.
    pub fn with_db(config: AppConfig, db: Db, hasher: Arc<IntegrityHasher>) -> Result<Self, IndexError> {
        let cache = VerifiedCache::new(Arc::new(db.clone()), hasher);
        let robots =
            RobotsPolicyCache::new(cache.clone(), config.user_agent.clone(), config.robots_cache_ttl(), config.timeout())?;
        let fetch = FetchClient::new(FetchConfig::from_app_config(&config), Some(robots))?;

        Ok(Self { config: Arc::new(config), db, fetch, cache })
    }
}

/// Everything one indexer run sees: shared services plus the platform's
/// resolved settings.
#[derive(Clone)]
pub struct IndexContext {
    pub services: Services,
    pub platform: Platform,
    pub config: IndexerConfig,
}

impl IndexContext {
    pub fn new(services: Services, platform: Platform, config: IndexerConfig) -> Self {
        Self { services, platform, config }
    }

    pub fn db(&self) -> &Db {
        &self.services.db
    }

    pub fn fetch(&self) -> &FetchClient {
        &self.services.fetch
    }

    pub fn app(&self) -> &AppConfig {
        &self.services.config
    }

    /// Configured API endpoint without a trailing slash, or `default`.
    pub fn endpoint(&self, default: &str) -> String {
        self.config
            .api_endpoint
            .as_deref()
            .unwrap_or(default)
            .trim_end_matches('/')
            .to_string()
    }

    /// Domain cached responses for `endpoint` are bound to.
    pub fn endpoint_domain(&self, endpoint: &str) -> Result<String, IndexError> {
        let url = canonicalize(endpoint).map_err(FetchError::from)?;
        Ok(robots_domain(&url).map_err(FetchError::from)?)
    }

    /// Request options carrying the platform timeout, with the robots gate
    /// dropped when the indexer does not need it.
    pub fn request_options(&self, base: RequestOptions, check_robots: bool) -> RequestOptions {
        let options = base.with_timeout(self.config.timeout());
        if check_robots { options } else { options.without_robots() }
    }

    fn response_cache_enabled(&self) -> bool {
        self.app().enable_caching && self.config.cache_duration_secs > 0
    }

    /// Serve `fetch` through the verified response cache under
    /// `indexer:<platform>:<parts>`.
    ///
    /// Falls through to `fetch` when caching is disabled for the platform,
    /// and on any cache failure.
    pub async fn cached_json<T, F, Fut>(&self, parts: &[&str], domain: &str, fetch: F) -> Result<T, IndexError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, IndexError>>,
    {
        if !self.response_cache_enabled() {
            return fetch().await;
        }

        let key = indexer_cache_key(self.platform.as_str(), parts);
        match self.services.cache.fetch_json::<T>(&key, domain).await {
            Ok(Some(value)) => {
                tracing::debug!(key = %key, "response cache hit");
                return Ok(value);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(key = %key, error = %e, "response cache read failed, fetching directly"),
        }

        let value = fetch().await?;
        if let Err(e) = self
            .services
            .cache
            .store_json(&key, domain, &value, self.config.cache_duration())
            .await
        {
            tracing::warn!(key = %key, error = %e, "failed to cache response");
        }
        Ok(value)
    }
}

/// A platform-specific source of content.
#[async_trait]
pub trait Indexer: Send + Sync {
    /// Raw item as listed by the platform.
    type Item: Debug + Send + Sync;

    fn platform(&self) -> Platform;

    /// Whether requests must pass the robots.txt gate.
    fn requires_robots_check(&self) -> bool {
        true
    }

    /// List the items available for indexing.
    async fn fetch_items(&self, ctx: &IndexContext) -> Result<Vec<Self::Item>, IndexError>;

    /// Hook run on the full item list before any item is processed.
    async fn before_processing(&self, _ctx: &IndexContext, _items: &[Self::Item]) -> Result<(), IndexError> {
        Ok(())
    }

    /// Turn one item into a content record.
    fn normalize(&self, item: &Self::Item) -> Result<IndexedContent, IndexError>;
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_error_details() {
        let err = IndexError::Fetch(FetchError::Http { status: 503, url: "https://api.neos.com/".into() });
        let details = err.details();
        assert_eq!(details["error_class"], "http");
        assert_eq!(details["status"], 503);
        assert!(details["error_message"].as_str().unwrap().contains("503"));
        assert!(err.is_retryable());
        assert!(!IndexError::Normalize("x".into()).is_retryable());
    }

    #[tokio::test]
    async fn test_services_build_requires_secret() {
        let result = Services::build(AppConfig::default()).await;
        assert!(matches!(result, Err(IndexError::Config(_))));
    }

    #[tokio::test]
    async fn test_endpoint_trims_trailing_slash() {
        let ctx = testing::context(Platform::Neos, "https://api.example.test/", |_| {}).await;
        assert_eq!(ctx.endpoint("https://unused"), "https://api.example.test");
    }

    #[tokio::test]
    async fn test_cached_json_serves_second_call_from_cache() {
        let ctx = testing::context(Platform::Decentraland, "https://peer.example", |c| c.cache_duration_secs = 60).await;
        let calls = AtomicU32::new(0);

        for _ in 0..2 {
            let value: Vec<u32> = ctx
                .cached_json(&["catalyst", "scenes", "0,0"], "peer.example", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, IndexError>(vec![1, 2, 3])
                })
                .await
                .unwrap();
            assert_eq!(value, vec![1, 2, 3]);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let key = indexer_cache_key("decentraland", &["catalyst", "scenes", "0,0"]);
        assert!(ctx.services.cache.fetch(&key, "peer.example").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cached_json_disabled_by_zero_duration() {
        let ctx = testing::context(Platform::Spatial, "https://www.spatial.example", |c| c.cache_duration_secs = 0).await;
        let calls = AtomicU32::new(0);

        for _ in 0..2 {
            let _: Vec<u32> = ctx
                .cached_json(&["sitemap"], "www.spatial.example", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, IndexError>(vec![])
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cached_json_does_not_cache_errors() {
        let ctx = testing::context(Platform::Decentraland, "https://peer.example", |c| c.cache_duration_secs = 60).await;

        let first: Result<Vec<u32>, _> = ctx
            .cached_json(&["boom"], "peer.example", || async {
                Err::<Vec<u32>, _>(IndexError::Fetch(FetchError::Timeout("slow".into())))
            })
            .await;
        assert!(first.is_err());

        let second: Vec<u32> = ctx.cached_json(&["boom"], "peer.example", || async { Ok::<_, IndexError>(vec![7]) }).await.unwrap();
        assert_eq!(second, vec![7]);
    }
}
