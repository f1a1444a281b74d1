//! robots.txt compliance backed by the integrity-checked cache.
//!
//! Per domain the policy moves `MISS -> FETCHING -> CACHED -> (EXPIRED -> MISS)`.
//! Cached bodies live under `robots_parser_<domain>` and are only trusted
//! after their integrity hash verifies; anything else is refetched.
//!
//! Fetch outcomes:
//! - 2xx: the body is the policy and is cached
//! - 4xx other than 429: no robots.txt, everything allowed, cached as an empty policy
//! - 429, 5xx, network failure, oversized body: allow for this call only, not cached

use robotstxt_rs::RobotsTxt;
use std::time::Duration;
use url::Url;

use metacrawl_core::VerifiedCache;
use metacrawl_core::cache::robots_cache_key;

use super::FetchError;
use super::url::{robots_domain, robots_url};

/// Maximum size of robots.txt to accept (512 KiB).
pub const MAX_ROBOTS_SIZE: usize = 512 * 1024;

/// Where a policy answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicySource {
    /// Verified cache entry.
    Cached,
    /// Fetched now and cached.
    Fetched,
    /// robots.txt could not be obtained; nothing is restricted for this call.
    Fallback,
}

/// A parsed robots.txt policy for one domain.
pub struct RobotsPolicy {
    domain: String,
    body: String,
    source: PolicySource,
    robots: RobotsTxt,
}

impl RobotsPolicy {
    fn new(domain: String, body: String, source: PolicySource) -> Self {
        let robots = RobotsTxt::parse(&body);
        Self { domain, body, source, robots }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Raw robots.txt body. Empty when the domain publishes none.
    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn source(&self) -> PolicySource {
        self.source
    }

    pub fn allows(&self, user_agent: &str, url: &Url) -> bool {
        self.robots.can_fetch(user_agent, url.as_str())
    }
}

impl std::fmt::Debug for RobotsPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RobotsPolicy")
            .field("domain", &self.domain)
            .field("source", &self.source)
            .field("body_len", &self.body.len())
            .finish()
    }
}

enum RobotsFetch {
    Policy(String),
    Missing,
    Unavailable(String),
}

/// Fetches, caches and evaluates robots.txt per domain.
#[derive(Clone)]
pub struct RobotsPolicyCache {
    http: reqwest::Client,
    cache: VerifiedCache,
    user_agent: String,
    ttl: Duration,
}

impl RobotsPolicyCache {
    /// # Errors
    ///
    /// Returns `FetchError::Client` if the HTTP client cannot be built.
    pub fn new(cache: VerifiedCache, user_agent: impl Into<String>, ttl: Duration, timeout: Duration) -> Result<Self, FetchError> {
        let user_agent = user_agent.into();
        let http = reqwest::Client::builder()
            .user_agent(&user_agent)
            .timeout(timeout)
            .use_rustls_tls()
            .build()
            .map_err(|e| FetchError::Client(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, cache, user_agent, ttl })
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Whether the configured user agent may fetch `url`.
    pub async fn is_allowed(&self, url: &Url) -> Result<bool, FetchError> {
        let policy = self.policy_for(url).await?;
        let allowed = policy.allows(&self.user_agent, url);
        tracing::debug!(url = %url, domain = policy.domain(), allowed, source = ?policy.source(), "robots.txt check");
        Ok(allowed)
    }

    /// Policy governing `url`, from the cache when a verified entry exists.
    pub async fn policy_for(&self, url: &Url) -> Result<RobotsPolicy, FetchError> {
        let domain = robots_domain(url)?;
        let key = robots_cache_key(&domain);

        match self.cache.fetch(&key, &domain).await {
            Ok(Some(data)) => {
                let body = String::from_utf8_lossy(&data).into_owned();
                return Ok(RobotsPolicy::new(domain, body, PolicySource::Cached));
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(domain = %domain, error = %e, "robots cache read failed, refetching"),
        }

        let robots_url = robots_url(url)?;
        let body = match self.fetch_robots(&robots_url).await {
            RobotsFetch::Policy(body) => body,
            RobotsFetch::Missing => {
                tracing::debug!(domain = %domain, "no robots.txt, allowing all");
                String::new()
            }
            RobotsFetch::Unavailable(reason) => {
                tracing::warn!(domain = %domain, robots_url = %robots_url, reason = %reason, "robots.txt unavailable, allowing this request");
                return Ok(RobotsPolicy::new(domain, String::new(), PolicySource::Fallback));
            }
        };

        if let Err(e) = self.cache.store(&key, &domain, body.clone().into_bytes(), self.ttl).await {
            tracing::warn!(domain = %domain, error = %e, "failed to cache robots.txt");
        }

        Ok(RobotsPolicy::new(domain, body, PolicySource::Fetched))
    }

    /// Drop the cached policy for `domain`. Returns whether one existed.
    pub async fn invalidate(&self, domain: &str) -> Result<bool, FetchError> {
        let domain = domain.to_ascii_lowercase();
        self.cache
            .invalidate(&robots_cache_key(&domain))
            .await
            .map_err(|e| FetchError::Client(e.to_string()))
    }

    async fn fetch_robots(&self, url: &Url) -> RobotsFetch {
        let response = match self.http.get(url.as_str()).send().await {
            Ok(r) => r,
            Err(e) => return RobotsFetch::Unavailable(e.to_string()),
        };

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return RobotsFetch::Unavailable("rate limited (status 429)".to_string());
        }
        if status.is_client_error() {
            return RobotsFetch::Missing;
        }
        if !status.is_success() {
            return RobotsFetch::Unavailable(format!("status {}", status.as_u16()));
        }

        if let Some(len) = response.content_length() {
            if len as usize > MAX_ROBOTS_SIZE {
                return RobotsFetch::Unavailable(format!("{len} bytes exceeds {MAX_ROBOTS_SIZE}"));
            }
        }

        match response.bytes().await {
            Ok(bytes) if bytes.len() > MAX_ROBOTS_SIZE => {
                RobotsFetch::Unavailable(format!("{} bytes exceeds {MAX_ROBOTS_SIZE}", bytes.len()))
            }
            Ok(bytes) => RobotsFetch::Policy(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) => RobotsFetch::Unavailable(e.to_string()),
        }
    }
}
