//! Indexed content records.
//!
//! Rows are unique on `(source_platform, external_id)`. Saving compares a
//! fingerprint of the normalized record so unchanged items are not rewritten
//! until they go stale.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio_rusqlite::{params, rusqlite};

use super::{Db, parse_timestamp, timestamp};
use crate::Error;
use crate::cache::digest_hex;

/// Age after which an unchanged record is refreshed anyway.
pub const REFRESH_AFTER_HOURS: i64 = 24;

/// Parcel coordinates for spatial platforms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coordinates {
    pub x: i32,
    pub y: i32,
    pub platform: String,
}

/// One crawled world, scene, space or session in platform-neutral form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedContent {
    pub source_platform: String,
    pub external_id: String,
    pub content_type: String,
    pub title: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub metadata: serde_json::Value,
    pub coordinates: Option<Coordinates>,
}

impl IndexedContent {
    /// Fingerprint over every field that is persisted.
    pub fn fingerprint(&self) -> Result<String, Error> {
        Ok(digest_hex(&serde_json::to_vec(self)?))
    }
}

/// A persisted [`IndexedContent`] row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredContent {
    pub id: i64,
    #[serde(flatten)]
    pub content: IndexedContent,
    pub last_indexed_at: DateTime<Utc>,
}

/// What [`Db::save_indexed_content`] did with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveOutcome {
    Created,
    Updated,
    Unchanged,
}

const SELECT_COLUMNS: &str = "id, source_platform, external_id, content_type, title, description, author,
     metadata_json, coord_x, coord_y, last_indexed_at";

type ContentRow =
    (i64, String, String, String, String, Option<String>, Option<String>, String, Option<i32>, Option<i32>, String);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContentRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
    ))
}

fn decode_row(row: ContentRow) -> Result<StoredContent, Error> {
    let (id, source_platform, external_id, content_type, title, description, author, metadata_json, x, y, indexed) =
        row;

    let metadata = serde_json::from_str(&metadata_json)?;
    let last_indexed_at = parse_timestamp(&indexed, "indexed_content.last_indexed_at")?;
    let coordinates = match (x, y) {
        (Some(x), Some(y)) => Some(Coordinates { x, y, platform: source_platform.clone() }),
        _ => None,
    };

    Ok(StoredContent {
        id,
        content: IndexedContent {
            source_platform,
            external_id,
            content_type,
            title,
            description,
            author,
            metadata,
            coordinates,
        },
        last_indexed_at,
    })
}

impl Db {
    /// Create, refresh or skip a content record.
    ///
    /// An existing row is rewritten when its fingerprint differs or when it
    /// was last indexed more than [`REFRESH_AFTER_HOURS`] ago.
    pub async fn save_indexed_content(&self, content: &IndexedContent) -> Result<SaveOutcome, Error> {
        let content = content.clone();
        let fingerprint = content.fingerprint()?;
        let metadata_json = serde_json::to_string(&content.metadata)?;
        let now = Utc::now();
        let stale_before = now - Duration::hours(REFRESH_AFTER_HOURS);

        self.conn
            .call(move |conn| -> Result<SaveOutcome, Error> {
                let existing = conn.query_row(
                    "SELECT content_hash, last_indexed_at FROM indexed_content
                     WHERE source_platform = ?1 AND external_id = ?2",
                    params![content.source_platform, content.external_id],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                );

                let outcome = match existing {
                    Ok((hash, last)) => {
                        let last = parse_timestamp(&last, "indexed_content.last_indexed_at")?;
                        if hash == fingerprint && last >= stale_before {
                            return Ok(SaveOutcome::Unchanged);
                        }
                        SaveOutcome::Updated
                    }
                    Err(rusqlite::Error::QueryReturnedNoRows) => SaveOutcome::Created,
                    Err(e) => return Err(e.into()),
                };

                let (x, y) = match &content.coordinates {
                    Some(c) => (Some(c.x), Some(c.y)),
                    None => (None, None),
                };

                conn.execute(
                    "INSERT INTO indexed_content (
                        source_platform, external_id, content_type, title, description, author,
                        metadata_json, content_hash, coord_x, coord_y, last_indexed_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                    ON CONFLICT(source_platform, external_id) DO UPDATE SET
                        content_type = excluded.content_type,
                        title = excluded.title,
                        description = excluded.description,
                        author = excluded.author,
                        metadata_json = excluded.metadata_json,
                        content_hash = excluded.content_hash,
                        coord_x = excluded.coord_x,
                        coord_y = excluded.coord_y,
                        last_indexed_at = excluded.last_indexed_at",
                    params![
                        content.source_platform,
                        content.external_id,
                        content.content_type,
                        content.title,
                        content.description,
                        content.author,
                        metadata_json,
                        fingerprint,
                        x,
                        y,
                        timestamp(now),
                    ],
                )?;

                Ok(outcome)
            })
            .await
            .map_err(Error::from)
    }

    /// Look up a record by platform and external id.
    pub async fn find_content(&self, platform: &str, external_id: &str) -> Result<Option<StoredContent>, Error> {
        let platform = platform.to_string();
        let external_id = external_id.to_string();
        self.conn
            .call(move |conn| -> Result<Option<StoredContent>, Error> {
                let sql =
                    format!("SELECT {SELECT_COLUMNS} FROM indexed_content WHERE source_platform = ?1 AND external_id = ?2");
                match conn.query_row(&sql, params![platform, external_id], read_row) {
                    Ok(row) => Ok(Some(decode_row(row)?)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Most recently indexed records, optionally for one platform.
    pub async fn list_content(&self, platform: Option<&str>, limit: usize) -> Result<Vec<StoredContent>, Error> {
        let platform = platform.map(str::to_string);
        let limit = limit as i64;
        self.conn
            .call(move |conn| -> Result<Vec<StoredContent>, Error> {
                let sql = format!(
                    "SELECT {SELECT_COLUMNS} FROM indexed_content
                     WHERE (?1 IS NULL OR source_platform = ?1)
                     ORDER BY last_indexed_at DESC, id DESC
                     LIMIT ?2"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![platform, limit], read_row)?;

                let mut out = Vec::new();
                for row in rows {
                    out.push(decode_row(row?)?);
                }
                Ok(out)
            })
            .await
            .map_err(Error::from)
    }

    /// All external ids stored for `platform`.
    pub async fn content_ids(&self, platform: &str) -> Result<HashSet<String>, Error> {
        let platform = platform.to_string();
        self.conn
            .call(move |conn| -> Result<HashSet<String>, Error> {
                let mut stmt = conn.prepare("SELECT external_id FROM indexed_content WHERE source_platform = ?1")?;
                let ids = stmt
                    .query_map(params![platform], |row| row.get::<_, String>(0))?
                    .collect::<Result<HashSet<_>, _>>()?;
                Ok(ids)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete the given records of `platform`. Returns the number removed.
    pub async fn remove_content(&self, platform: &str, external_ids: &[String]) -> Result<u64, Error> {
        if external_ids.is_empty() {
            return Ok(0);
        }
        let platform = platform.to_string();
        let ids = external_ids.to_vec();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let tx = conn.transaction()?;
                let mut removed = 0u64;
                {
                    let mut stmt =
                        tx.prepare("DELETE FROM indexed_content WHERE source_platform = ?1 AND external_id = ?2")?;
                    for id in &ids {
                        removed += stmt.execute(params![platform, id])? as u64;
                    }
                }
                tx.commit()?;
                Ok(removed)
            })
            .await
            .map_err(Error::from)
    }

    /// Number of records, optionally for one platform.
    pub async fn count_content(&self, platform: Option<&str>) -> Result<u64, Error> {
        let platform = platform.map(str::to_string);
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM indexed_content WHERE (?1 IS NULL OR source_platform = ?1)",
                    params![platform],
                    |row| row.get(0),
                )?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene(id: &str, title: &str) -> IndexedContent {
        IndexedContent {
            source_platform: "decentraland".to_string(),
            external_id: id.to_string(),
            content_type: "scene".to_string(),
            title: title.to_string(),
            description: Some("Decentraland scene at coordinates (0, 0)".to_string()),
            author: None,
            metadata: serde_json::json!({ "scene_id": id, "pointers": ["0,0"] }),
            coordinates: Some(Coordinates { x: 0, y: 0, platform: "decentraland".to_string() }),
        }
    }

    async fn age_record(db: &Db, external_id: &str, hours: i64) {
        let when = timestamp(Utc::now() - Duration::hours(hours));
        let external_id = external_id.to_string();
        db.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE indexed_content SET last_indexed_at = ?1 WHERE external_id = ?2",
                    params![when, external_id],
                )
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_create_then_unchanged() {
        let db = Db::open_in_memory().await.unwrap();
        let c = scene("bafk1", "Genesis Plaza");

        assert_eq!(db.save_indexed_content(&c).await.unwrap(), SaveOutcome::Created);
        assert_eq!(db.save_indexed_content(&c).await.unwrap(), SaveOutcome::Unchanged);
        assert_eq!(db.count_content(Some("decentraland")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_changed_record_is_updated() {
        let db = Db::open_in_memory().await.unwrap();
        db.save_indexed_content(&scene("bafk1", "Genesis Plaza")).await.unwrap();

        let outcome = db.save_indexed_content(&scene("bafk1", "Genesis Plaza v2")).await.unwrap();
        assert_eq!(outcome, SaveOutcome::Updated);

        let stored = db.find_content("decentraland", "bafk1").await.unwrap().unwrap();
        assert_eq!(stored.content.title, "Genesis Plaza v2");
    }

    #[tokio::test]
    async fn test_stale_record_is_refreshed() {
        let db = Db::open_in_memory().await.unwrap();
        let c = scene("bafk1", "Genesis Plaza");
        db.save_indexed_content(&c).await.unwrap();
        age_record(&db, "bafk1", REFRESH_AFTER_HOURS + 1).await;

        assert_eq!(db.save_indexed_content(&c).await.unwrap(), SaveOutcome::Updated);
    }

    #[tokio::test]
    async fn test_same_id_on_other_platform_is_distinct() {
        let db = Db::open_in_memory().await.unwrap();
        let a = scene("shared-id", "A");
        let b = IndexedContent { source_platform: "spatial".to_string(), coordinates: None, ..scene("shared-id", "B") };

        assert_eq!(db.save_indexed_content(&a).await.unwrap(), SaveOutcome::Created);
        assert_eq!(db.save_indexed_content(&b).await.unwrap(), SaveOutcome::Created);
        assert_eq!(db.count_content(None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_find_roundtrip_preserves_fields() {
        let db = Db::open_in_memory().await.unwrap();
        let c = scene("bafk1", "Genesis Plaza");
        db.save_indexed_content(&c).await.unwrap();

        let stored = db.find_content("decentraland", "bafk1").await.unwrap().unwrap();
        assert_eq!(stored.content, c);
        assert!(db.find_content("decentraland", "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ids_remove_and_list() {
        let db = Db::open_in_memory().await.unwrap();
        for id in ["a", "b", "c"] {
            db.save_indexed_content(&scene(id, id)).await.unwrap();
        }

        let ids = db.content_ids("decentraland").await.unwrap();
        assert_eq!(ids.len(), 3);

        let removed = db
            .remove_content("decentraland", &["a".to_string(), "zzz".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let listed = db.list_content(Some("decentraland"), 10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(db.list_content(None, 1).await.unwrap().len(), 1);
        assert!(db.list_content(Some("neos"), 10).await.unwrap().is_empty());
    }

    #[test]
    fn test_stored_content_serializes_flat() {
        let stored = StoredContent { id: 1, content: scene("bafk1", "Genesis Plaza"), last_indexed_at: Utc::now() };
        let json = serde_json::to_value(&stored).unwrap();
        assert_eq!(json["external_id"], "bafk1");
        assert_eq!(json["coordinates"]["x"], 0);
        assert!(json.get("content").is_none());
    }
}
