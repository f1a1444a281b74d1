//! HTTP fetch pipeline with robots.txt compliance, rate limiting and retry.
//!
//! ### URL Canonicalization
//! - Trim whitespace, ensure scheme (default: `https`)
//! - Lowercase host, remove fragments
//! - Preserve query string
//!
//! ### Request Gates
//! - robots.txt checked per request unless the caller opts out
//! - Minimum interval between requests of one client
//! - Max redirects: 5
//! - Max body bytes: 10MB (configurable)
//!
//! ### Retry
//! - Timeouts, connection errors, 5xx and 429 are retried with exponential
//!   backoff; everything else fails on the first attempt.

pub mod error;
pub mod ratelimit;
pub mod retry;
pub mod robots;
pub mod url;

use bytes::Bytes;
use reqwest::{Client, StatusCode, Url, header};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use error::FetchError;
pub use ratelimit::RateLimiter;
pub use retry::{RetryPolicy, Retryable, retry_with_backoff};
pub use robots::{PolicySource, RobotsPolicy, RobotsPolicyCache};
pub use self::url::{UrlError, canonicalize, robots_domain, robots_url};

use metacrawl_core::AppConfig;

/// Configuration for the fetch client.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,

    /// Maximum response body size in bytes (default: 10MB).
    pub max_bytes: usize,

    /// Default per-request timeout.
    pub timeout: Duration,

    pub max_redirects: usize,

    /// Whether to consult robots.txt before requests.
    pub respect_robots: bool,

    pub retry: RetryPolicy,

    /// Minimum spacing between requests.
    pub min_request_interval: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "MetacrawlIndexer/0.1".to_string(),
            max_bytes: 10 * 1024 * 1024,
            timeout: Duration::from_secs(30),
            max_redirects: 5,
            respect_robots: true,
            retry: RetryPolicy::default(),
            min_request_interval: Duration::from_secs(1),
        }
    }
}

impl FetchConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            timeout: config.timeout(),
            respect_robots: config.respect_robots,
            retry: RetryPolicy::from_config(config),
            min_request_interval: config.min_request_interval(),
            ..Self::default()
        }
    }
}

/// Per-request overrides.
#[derive(Debug, Clone, Copy)]
pub struct RequestOptions {
    /// Consult robots.txt for this request.
    pub check_robots: bool,
    pub timeout: Option<Duration>,
    pub accept: &'static str,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self { check_robots: true, timeout: None, accept: "application/json" }
    }
}

impl RequestOptions {
    pub fn json() -> Self {
        Self::default()
    }

    pub fn xml() -> Self {
        Self { accept: "application/xml,text/xml;q=0.9,text/html;q=0.8,*/*;q=0.5", ..Self::default() }
    }

    pub fn without_robots(mut self) -> Self {
        self.check_robots = false;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Response from a fetch operation.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// The canonical URL requested
    pub url: Url,
    /// The final URL after redirects
    pub final_url: Url,
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub bytes: Bytes,
    pub fetch_ms: u64,
}

impl FetchResponse {
    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        serde_json::from_slice(&self.bytes).map_err(|e| FetchError::Parse(format!("{}: {e}", self.url)))
    }
}

/// HTTP fetch client shared by the indexers.
#[derive(Clone)]
pub struct FetchClient {
    http: Client,
    config: FetchConfig,
    robots: Option<RobotsPolicyCache>,
    limiter: Arc<RateLimiter>,
}

impl FetchClient {
    /// Create a fetch client. `robots` is required for robots.txt checks;
    /// without it requests are never gated.
    pub fn new(config: FetchConfig, robots: Option<RobotsPolicyCache>) -> Result<Self, FetchError> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| FetchError::Client(format!("failed to build HTTP client: {e}")))?;

        let limiter = Arc::new(RateLimiter::new(config.min_request_interval));

        Ok(Self { http, config, robots, limiter })
    }

    /// GET a URL, returning the body and metadata.
    ///
    /// Applies the robots.txt gate once, then rate limiting and the size
    /// limit on every attempt.
    pub async fn get(&self, url_str: &str, options: RequestOptions) -> Result<FetchResponse, FetchError> {
        let url = canonicalize(url_str)?;

        if self.config.respect_robots && options.check_robots {
            if let Some(robots) = &self.robots {
                if !robots.is_allowed(&url).await? {
                    tracing::info!(url = %url, "skipping URL disallowed by robots.txt");
                    return Err(FetchError::RobotsDisallowed { url: url.to_string() });
                }
            }
        }

        let operation = format!("GET {url}");
        retry_with_backoff(&self.config.retry, &operation, || self.get_once(&url, options)).await
    }

    /// GET and decode a JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str, options: RequestOptions) -> Result<T, FetchError> {
        self.get(url, options).await?.json()
    }

    /// GET a text body.
    pub async fn get_text(&self, url: &str, options: RequestOptions) -> Result<String, FetchError> {
        Ok(self.get(url, options).await?.text())
    }

    async fn get_once(&self, url: &Url, options: RequestOptions) -> Result<FetchResponse, FetchError> {
        self.limiter.acquire().await;
        let start = Instant::now();

        let mut request = self.http.get(url.as_str()).header(header::ACCEPT, options.accept);
        if let Some(timeout) = options.timeout {
            request = request.timeout(timeout);
        }

        tracing::debug!(url = %url, "request");
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http { status: status.as_u16(), url: url.to_string() });
        }

        if let Some(len) = response.content_length() {
            if len as usize > self.config.max_bytes {
                return Err(FetchError::TooLarge { size: len, limit: self.config.max_bytes });
            }
        }

        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let bytes = response.bytes().await?;
        if bytes.len() > self.config.max_bytes {
            return Err(FetchError::TooLarge { size: bytes.len() as u64, limit: self.config.max_bytes });
        }

        let fetch_ms = start.elapsed().as_millis() as u64;
        tracing::debug!(url = %url, final_url = %final_url, fetch_ms, bytes = bytes.len(), "fetched");

        Ok(FetchResponse { url: url.clone(), final_url, status, content_type, bytes, fetch_ms })
    }

    pub fn robots(&self) -> Option<&RobotsPolicyCache> {
        self.robots.as_ref()
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }
}
