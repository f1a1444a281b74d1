//! Indexing run bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio_rusqlite::{params, rusqlite};

use super::{Db, parse_timestamp, timestamp};
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(Error::CorruptRow(format!("indexing_runs.status: unknown status {other:?}"))),
        }
    }
}

/// One execution of an indexer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexingRun {
    pub id: i64,
    pub indexer: String,
    pub status: RunStatus,
    pub configuration: serde_json::Value,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub items_processed: u64,
    pub items_failed: u64,
    pub error_message: Option<String>,
    pub error_details: Option<serde_json::Value>,
}

impl IndexingRun {
    /// Share of attempted items that succeeded, as a percentage with two
    /// decimals. 100 when nothing was attempted.
    pub fn success_rate(&self) -> f64 {
        let attempted = self.items_processed + self.items_failed;
        if attempted == 0 {
            return 100.0;
        }
        let rate = self.items_processed as f64 / attempted as f64 * 100.0;
        (rate * 100.0).round() / 100.0
    }

    /// Wall time of the run, up to now if it is still running.
    pub fn duration(&self) -> chrono::Duration {
        self.completed_at.unwrap_or_else(Utc::now) - self.started_at
    }

    /// Duration as `1h 2m 3s`, `2m 3s` or `3.4s`.
    pub fn duration_formatted(&self) -> String {
        let millis = self.duration().num_milliseconds().max(0);
        let secs = millis / 1000;
        match (secs / 3600, (secs % 3600) / 60, secs % 60) {
            (0, 0, _) => format!("{:.1}s", millis as f64 / 1000.0),
            (0, m, s) => format!("{m}m {s}s"),
            (h, m, s) => format!("{h}h {m}m {s}s"),
        }
    }
}

const SELECT_COLUMNS: &str = "id, indexer, status, configuration_json, started_at, completed_at,
     items_processed, items_failed, error_message, error_details_json";

fn read_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRow> {
    Ok(RunRow {
        id: row.get(0)?,
        indexer: row.get(1)?,
        status: row.get(2)?,
        configuration_json: row.get(3)?,
        started_at: row.get(4)?,
        completed_at: row.get(5)?,
        items_processed: row.get(6)?,
        items_failed: row.get(7)?,
        error_message: row.get(8)?,
        error_details_json: row.get(9)?,
    })
}

struct RunRow {
    id: i64,
    indexer: String,
    status: String,
    configuration_json: String,
    started_at: String,
    completed_at: Option<String>,
    items_processed: i64,
    items_failed: i64,
    error_message: Option<String>,
    error_details_json: Option<String>,
}

impl TryFrom<RunRow> for IndexingRun {
    type Error = Error;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        Ok(IndexingRun {
            id: row.id,
            indexer: row.indexer,
            status: row.status.parse()?,
            configuration: serde_json::from_str(&row.configuration_json)?,
            started_at: parse_timestamp(&row.started_at, "indexing_runs.started_at")?,
            completed_at: row
                .completed_at
                .as_deref()
                .map(|v| parse_timestamp(v, "indexing_runs.completed_at"))
                .transpose()?,
            items_processed: row.items_processed.max(0) as u64,
            items_failed: row.items_failed.max(0) as u64,
            error_message: row.error_message,
            error_details: row.error_details_json.as_deref().map(serde_json::from_str).transpose()?,
        })
    }
}

impl Db {
    /// Record the start of a run and return it.
    pub async fn start_run(&self, indexer: &str, configuration: &serde_json::Value) -> Result<IndexingRun, Error> {
        let indexer = indexer.to_string();
        let configuration_json = serde_json::to_string(configuration)?;
        let started_at = timestamp(Utc::now());
        let id = self
            .conn
            .call(move |conn| -> Result<i64, Error> {
                conn.execute(
                    "INSERT INTO indexing_runs (indexer, status, configuration_json, started_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![indexer, RunStatus::Running.as_str(), configuration_json, started_at],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(Error::from)?;

        self.get_run(id).await?.ok_or_else(|| Error::NotFound(format!("indexing run {id}")))
    }

    /// Add to the processed/failed counters of a run.
    pub async fn record_run_progress(&self, run_id: i64, processed: u64, failed: u64) -> Result<(), Error> {
        self.conn
            .call(move |conn| -> Result<(), Error> {
                let updated = conn.execute(
                    "UPDATE indexing_runs
                     SET items_processed = items_processed + ?2, items_failed = items_failed + ?3
                     WHERE id = ?1",
                    params![run_id, processed as i64, failed as i64],
                )?;
                if updated == 0 {
                    return Err(Error::NotFound(format!("indexing run {run_id}")));
                }
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Mark a run completed.
    pub async fn complete_run(&self, run_id: i64) -> Result<IndexingRun, Error> {
        self.finish_run(run_id, RunStatus::Completed, None, None).await
    }

    /// Mark a run failed with an error message and structured details.
    pub async fn fail_run(
        &self,
        run_id: i64,
        error_message: &str,
        error_details: &serde_json::Value,
    ) -> Result<IndexingRun, Error> {
        let details = serde_json::to_string(error_details)?;
        self.finish_run(run_id, RunStatus::Failed, Some(error_message.to_string()), Some(details))
            .await
    }

    async fn finish_run(
        &self,
        run_id: i64,
        status: RunStatus,
        error_message: Option<String>,
        error_details_json: Option<String>,
    ) -> Result<IndexingRun, Error> {
        let completed_at = timestamp(Utc::now());
        self.conn
            .call(move |conn| -> Result<(), Error> {
                let updated = conn.execute(
                    "UPDATE indexing_runs
                     SET status = ?2, completed_at = ?3, error_message = ?4, error_details_json = ?5
                     WHERE id = ?1",
                    params![run_id, status.as_str(), completed_at, error_message, error_details_json],
                )?;
                if updated == 0 {
                    return Err(Error::NotFound(format!("indexing run {run_id}")));
                }
                Ok(())
            })
            .await
            .map_err(Error::from)?;

        self.get_run(run_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("indexing run {run_id}")))
    }

    pub async fn get_run(&self, run_id: i64) -> Result<Option<IndexingRun>, Error> {
        self.conn
            .call(move |conn| -> Result<Option<IndexingRun>, Error> {
                let sql = format!("SELECT {SELECT_COLUMNS} FROM indexing_runs WHERE id = ?1");
                match conn.query_row(&sql, params![run_id], read_run) {
                    Ok(row) => Ok(Some(IndexingRun::try_from(row)?)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Latest runs first.
    pub async fn recent_runs(&self, limit: usize) -> Result<Vec<IndexingRun>, Error> {
        let limit = limit as i64;
        self.conn
            .call(move |conn| -> Result<Vec<IndexingRun>, Error> {
                let sql = format!("SELECT {SELECT_COLUMNS} FROM indexing_runs ORDER BY id DESC LIMIT ?1");
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![limit], read_run)?;

                let mut runs = Vec::new();
                for row in rows {
                    runs.push(IndexingRun::try_from(row?)?);
                }
                Ok(runs)
            })
            .await
            .map_err(Error::from)
    }
}
