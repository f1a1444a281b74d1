//! Integrity-checked access to a [`CacheStore`].

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

use super::{CacheEntry, CacheStore};
use crate::Error;
use crate::integrity::IntegrityHasher;

/// Cache front end that only trusts entries whose integrity hash verifies.
///
/// A failed verification (tampered bytes, entry copied from another domain,
/// garbled hash) deletes the entry and reports a miss.
#[derive(Clone)]
pub struct VerifiedCache {
    store: Arc<dyn CacheStore>,
    hasher: Arc<IntegrityHasher>,
}

impl VerifiedCache {
    pub fn new(store: Arc<dyn CacheStore>, hasher: Arc<IntegrityHasher>) -> Self {
        Self { store, hasher }
    }

    pub fn hasher(&self) -> &IntegrityHasher {
        &self.hasher
    }

    /// Read the payload stored under `key` for `domain`.
    ///
    /// Returns `Ok(None)` on a miss, an expired entry, or an entry that
    /// fails verification.
    pub async fn fetch(&self, key: &str, domain: &str) -> Result<Option<Vec<u8>>, Error> {
        let Some(entry) = self.store.read(key).await? else {
            return Ok(None);
        };

        if entry.domain != domain {
            tracing::warn!(key, expected = domain, found = %entry.domain, "cache entry domain mismatch, discarding");
            self.store.delete(key).await?;
            return Ok(None);
        }

        if !self.hasher.verify(&entry.data, domain, &entry.integrity_hash) {
            tracing::warn!(key, domain, "cache entry failed integrity verification, discarding");
            self.store.delete(key).await?;
            return Ok(None);
        }

        tracing::debug!(key, domain, bytes = entry.data.len(), "verified cache hit");
        Ok(Some(entry.data))
    }

    /// Hash and store `data` for `domain` under `key`.
    pub async fn store(&self, key: &str, domain: &str, data: Vec<u8>, ttl: Duration) -> Result<CacheEntry, Error> {
        let integrity_hash = self.hasher.generate_hash(&data, domain)?;
        let entry = CacheEntry { data, integrity_hash, created_at: Utc::now(), domain: domain.to_string() };
        self.store.write(key, &entry, ttl).await?;
        tracing::debug!(key, domain, ttl_secs = ttl.as_secs(), "stored verified cache entry");
        Ok(entry)
    }

    pub async fn invalidate(&self, key: &str) -> Result<bool, Error> {
        self.store.delete(key).await
    }

    /// Like [`fetch`](Self::fetch), decoding the payload as JSON.
    ///
    /// A payload that verifies but does not decode is discarded as a miss.
    pub async fn fetch_json<T: DeserializeOwned>(&self, key: &str, domain: &str) -> Result<Option<T>, Error> {
        let Some(bytes) = self.fetch(key, domain).await? else {
            return Ok(None);
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(key, error = %e, "cached payload is not valid JSON, discarding");
                self.store.delete(key).await?;
                Ok(None)
            }
        }
    }

    pub async fn store_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        domain: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<CacheEntry, Error> {
        let bytes = serde_json::to_vec(value)?;
        self.store(key, domain, bytes, ttl).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryStore, robots_cache_key};

    const SECRET: &str = "verified-cache-test-secret-with-enough-length";
    const TTL: Duration = Duration::from_secs(3600);

    fn setup() -> (MemoryStore, VerifiedCache) {
        let store = MemoryStore::new();
        let hasher = Arc::new(IntegrityHasher::from_secret(SECRET).unwrap());
        let cache = VerifiedCache::new(Arc::new(store.clone()), hasher);
        (store, cache)
    }

    #[tokio::test]
    async fn test_store_then_fetch() {
        let (_, cache) = setup();
        let key = robots_cache_key("example.com");

        cache.store(&key, "example.com", b"User-agent: *".to_vec(), TTL).await.unwrap();
        let data = cache.fetch(&key, "example.com").await.unwrap();

        assert_eq!(data.as_deref(), Some(&b"User-agent: *"[..]));
    }

    #[tokio::test]
    async fn test_roundtrip_preserves_tuple() {
        let (store, cache) = setup();
        let key = robots_cache_key("cache-integration-test.example.com");

        let written = cache
            .store(&key, "cache-integration-test.example.com", b"robots".to_vec(), TTL)
            .await
            .unwrap();
        let raw = store.read(&key).await.unwrap().unwrap();

        assert_eq!(raw, written);
        assert!(cache.hasher().verify(&raw.data, &raw.domain, &raw.integrity_hash));
    }

    #[tokio::test]
    async fn test_tampered_data_is_discarded() {
        let (store, cache) = setup();
        let key = robots_cache_key("example.com");
        let mut entry = cache.store(&key, "example.com", b"Disallow: /private".to_vec(), TTL).await.unwrap();

        entry.data = b"Allow: /".to_vec();
        store.write(&key, &entry, TTL).await.unwrap();

        assert!(cache.fetch(&key, "example.com").await.unwrap().is_none());
        assert!(store.read(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cross_domain_entry_is_discarded() {
        let (store, cache) = setup();
        let evil = cache.store("scratch", "evil.com", b"Allow: /".to_vec(), TTL).await.unwrap();

        let victim_key = robots_cache_key("victim.com");
        let forged = CacheEntry { domain: "victim.com".to_string(), ..evil };
        store.write(&victim_key, &forged, TTL).await.unwrap();

        assert!(cache.fetch(&victim_key, "victim.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_domain_mismatch_is_discarded() {
        let (_, cache) = setup();
        cache.store("k", "a.com", b"data".to_vec(), TTL).await.unwrap();
        assert!(cache.fetch("k", "b.com").await.unwrap().is_none());
        assert!(cache.fetch("k", "a.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupted_hash_is_discarded() {
        let (store, cache) = setup();
        let mut entry = cache.store("k", "example.com", b"data".to_vec(), TTL).await.unwrap();
        entry.integrity_hash = "wrong_hash".to_string();
        store.write("k", &entry, TTL).await.unwrap();

        assert!(cache.fetch("k", "example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_json_roundtrip() {
        let (_, cache) = setup();
        let scenes = serde_json::json!([{ "id": "bafk1", "pointers": ["0,0"] }]);

        cache.store_json("indexer:decentraland:scenes", "peer.decentraland.org", &scenes, TTL).await.unwrap();
        let back: Option<serde_json::Value> =
            cache.fetch_json("indexer:decentraland:scenes", "peer.decentraland.org").await.unwrap();

        assert_eq!(back, Some(scenes));
    }

    #[tokio::test]
    async fn test_invalid_json_is_discarded() {
        let (_, cache) = setup();
        cache.store("k", "example.com", b"not json".to_vec(), TTL).await.unwrap();

        let back: Option<serde_json::Value> = cache.fetch_json("k", "example.com").await.unwrap();
        assert!(back.is_none());
        assert!(cache.fetch("k", "example.com").await.unwrap().is_none());
    }
}
