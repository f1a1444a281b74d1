//! Cache store abstraction with integrity-checked entries.
//!
//! A [`CacheStore`] is a plain key/value store with per-entry TTL. The
//! [`VerifiedCache`] wrapper is the only intended writer: it stores each
//! payload as a [`CacheEntry`] together with an integrity hash bound to the
//! payload's domain and refuses to hand back anything that does not verify.
//!
//! Two stores ship with the crate:
//!
//! - [`MemoryStore`]: process-local `HashMap` behind a tokio `RwLock`
//! - [`crate::db::Db`]: the SQLite `cache_entries` table

pub mod keys;
mod verified;

pub use keys::{digest_hex, indexer_cache_key, robots_cache_key};
pub use verified::VerifiedCache;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::Error;

/// A cached payload and the hash that vouches for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub data: Vec<u8>,
    pub integrity_hash: String,
    pub created_at: DateTime<Utc>,
    pub domain: String,
}

/// Key/value store with TTL semantics.
///
/// `read` must not return entries whose TTL has elapsed.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<CacheEntry>, Error>;

    async fn write(&self, key: &str, entry: &CacheEntry, ttl: Duration) -> Result<(), Error>;

    /// Remove `key`. Returns whether an entry existed.
    async fn delete(&self, key: &str) -> Result<bool, Error>;
}

struct StoredEntry {
    entry: CacheEntry,
    expires_at: Instant,
}

impl StoredEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// In-process cache store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, StoredEntry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop entries whose TTL has elapsed. Returns how many were removed.
    ///
    /// Every `write` also sweeps, so keys that are never read again do not
    /// accumulate.
    pub async fn cleanup_expired(&self) -> usize {
        sweep_expired(&mut *self.entries.write().await)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

fn sweep_expired(entries: &mut HashMap<String, StoredEntry>) -> usize {
    let before = entries.len();
    entries.retain(|_, stored| !stored.is_expired());
    before - entries.len()
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn read(&self, key: &str) -> Result<Option<CacheEntry>, Error> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(stored) if !stored.is_expired() => return Ok(Some(stored.entry.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }

        self.entries.write().await.remove(key);
        Ok(None)
    }

    async fn write(&self, key: &str, entry: &CacheEntry, ttl: Duration) -> Result<(), Error> {
        let stored = StoredEntry { entry: entry.clone(), expires_at: Instant::now() + ttl };
        let mut entries = self.entries.write().await;
        sweep_expired(&mut entries);
        entries.insert(key.to_string(), stored);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, Error> {
        Ok(self.entries.write().await.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(data: &str) -> CacheEntry {
        CacheEntry {
            data: data.as_bytes().to_vec(),
            integrity_hash: "$argon2id$placeholder".to_string(),
            created_at: Utc::now(),
            domain: "example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        let e = entry("User-agent: *\nDisallow: /admin");

        store.write("robots_parser_example.com", &e, Duration::from_secs(3600)).await.unwrap();
        let read = store.read("robots_parser_example.com").await.unwrap().unwrap();

        assert_eq!(read, e);
    }

    #[tokio::test]
    async fn test_memory_store_miss() {
        let store = MemoryStore::new();
        assert!(store.read("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_expiry() {
        let store = MemoryStore::new();
        store.write("k", &entry("x"), Duration::ZERO).await.unwrap();

        assert!(store.read("k").await.unwrap().is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_memory_store_delete() {
        let store = MemoryStore::new();
        store.write("k", &entry("x"), Duration::from_secs(60)).await.unwrap();

        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
        assert!(store.read("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_cleanup() {
        let store = MemoryStore::new();
        store.write("fresh", &entry("y"), Duration::from_secs(60)).await.unwrap();
        store.write("stale", &entry("x"), Duration::ZERO).await.unwrap();

        assert_eq!(store.cleanup_expired().await, 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_memory_store_write_sweeps_unread_expired_keys() {
        let store = MemoryStore::new();
        for i in 0..50 {
            store.write(&format!("indexer:neos:page:{i}"), &entry("x"), Duration::ZERO).await.unwrap();
        }
        store.write("fresh", &entry("y"), Duration::from_secs(60)).await.unwrap();

        assert_eq!(store.len().await, 1);
        assert!(store.read("fresh").await.unwrap().is_some());
    }

    #[test]
    fn test_cache_entry_serializes_created_at_as_iso8601() {
        let e = entry("x");
        let json = serde_json::to_value(&e).unwrap();
        let created = json["created_at"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(created).is_ok());
        assert_eq!(json["domain"], "example.com");
    }
}
