//! SQLite-backed [`CacheStore`].
//!
//! Entries live in `cache_entries`. Expired rows are invisible to `read` and
//! removed by the purge helpers.

use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tokio_rusqlite::{params, rusqlite};

use super::{Db, parse_timestamp, timestamp};
use crate::Error;
use crate::cache::{CacheEntry, CacheStore};

/// TTLs are capped so expiry timestamps keep a four-digit year.
const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

fn expiry_from(ttl: Duration) -> String {
    let ttl = chrono::Duration::from_std(ttl.min(MAX_TTL)).unwrap_or(chrono::Duration::zero());
    timestamp(Utc::now() + ttl)
}

#[async_trait]
impl CacheStore for Db {
    async fn read(&self, key: &str) -> Result<Option<CacheEntry>, Error> {
        let key = key.to_string();
        let now = timestamp(Utc::now());
        self.conn
            .call(move |conn| -> Result<Option<CacheEntry>, Error> {
                let result = conn.query_row(
                    "SELECT data, integrity_hash, created_at, domain
                     FROM cache_entries
                     WHERE cache_key = ?1 AND expires_at > ?2",
                    params![key, now],
                    |row| {
                        Ok((
                            row.get::<_, Vec<u8>>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    },
                );

                let (data, integrity_hash, created_at, domain) = match result {
                    Ok(row) => row,
                    Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
                    Err(e) => return Err(e.into()),
                };

                let created_at = parse_timestamp(&created_at, "cache_entries.created_at")?;

                Ok(Some(CacheEntry { data, integrity_hash, created_at, domain }))
            })
            .await
            .map_err(Error::from)
    }

    async fn write(&self, key: &str, entry: &CacheEntry, ttl: Duration) -> Result<(), Error> {
        let key = key.to_string();
        let entry = entry.clone();
        let expires_at = expiry_from(ttl);
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO cache_entries (cache_key, domain, data, integrity_hash, created_at, expires_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(cache_key) DO UPDATE SET
                        domain = excluded.domain,
                        data = excluded.data,
                        integrity_hash = excluded.integrity_hash,
                        created_at = excluded.created_at,
                        expires_at = excluded.expires_at",
                    params![
                        key,
                        entry.domain,
                        entry.data,
                        entry.integrity_hash,
                        timestamp(entry.created_at),
                        expires_at,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn delete(&self, key: &str) -> Result<bool, Error> {
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute("DELETE FROM cache_entries WHERE cache_key = ?1", params![key])?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }
}

impl Db {
    /// Delete expired cache entries. Returns the number removed.
    pub async fn purge_expired_entries(&self) -> Result<u64, Error> {
        let now = timestamp(Utc::now());
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM cache_entries WHERE expires_at <= ?1", params![now])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete every cache entry recorded for `domain`. Returns the number removed.
    pub async fn purge_entries_by_domain(&self, domain: &str) -> Result<u64, Error> {
        let domain = domain.to_ascii_lowercase();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM cache_entries WHERE lower(domain) = ?1", params![domain])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete all cache entries. Returns the number removed.
    pub async fn purge_all_entries(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM cache_entries", [])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}
