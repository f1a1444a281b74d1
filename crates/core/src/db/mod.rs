//! SQLite persistence for metacrawl.
//!
//! One database file holds:
//!
//! - `cache_entries`: integrity-hashed cache payloads (see [`crate::cache`])
//! - `indexed_content`: normalized items emitted by indexers
//! - `indexing_runs`: one row per indexer run with progress counters
//! - `coordinate_scans`: parcels swept per UTC day
//!
//! Access goes through tokio-rusqlite so statements run off the async
//! executor. Timestamps are stored as fixed-width RFC 3339 UTC strings
//! (microsecond precision, `Z` suffix) so string comparison in SQL matches
//! chronological order.

mod connection;
mod content;
mod coordinates;
mod entries;
mod migrations;
mod runs;

pub use connection::Db;
pub use content::{Coordinates, IndexedContent, REFRESH_AFTER_HOURS, SaveOutcome, StoredContent};
pub use runs::{IndexingRun, RunStatus};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::Error;

pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(value: &str, column: &str) -> Result<DateTime<Utc>, Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::CorruptRow(format!("{column}: {e}")))
}
