//! Versioned schema migrations.
//!
//! Applied versions are recorded in `_migrations`; each pending migration runs
//! inside its own transaction together with its bookkeeping row.

use crate::Error;
use tokio_rusqlite::{Connection, params};

/// (version, name, SQL). Versions must be strictly increasing.
const MIGRATIONS: &[(i64, &str, &str)] = &[
    (1, "cache_entries", include_str!("../../migrations/001_cache_entries.sql")),
    (2, "indexed_content", include_str!("../../migrations/002_indexed_content.sql")),
    (3, "indexing_runs", include_str!("../../migrations/003_indexing_runs.sql")),
    (4, "coordinate_scans", include_str!("../../migrations/004_coordinate_scans.sql")),
];

/// Apply every migration newer than the recorded schema version.
///
/// # Errors
///
/// Returns `Error::MigrationFailed` naming the migration whose SQL failed.
pub async fn run(conn: &Connection) -> Result<(), Error> {
    let applied = conn
        .call(|conn| -> Result<Vec<&'static str>, Error> {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS _migrations (
                    version INTEGER PRIMARY KEY,
                    name TEXT NOT NULL,
                    applied_at TEXT NOT NULL
                )",
                [],
            )?;

            let current: i64 =
                conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| row.get(0))?;

            let mut applied = Vec::new();
            for (version, name, sql) in MIGRATIONS.iter().filter(|(v, _, _)| *v > current) {
                let tx = conn.transaction()?;
                tx.execute_batch(sql)
                    .map_err(|e| Error::MigrationFailed(format!("{version:03}_{name}: {e}")))?;
                tx.execute(
                    "INSERT INTO _migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
                    params![version, name, chrono::Utc::now().to_rfc3339()],
                )?;
                tx.commit()?;
                applied.push(*name);
            }

            Ok(applied)
        })
        .await
        .map_err(Error::from)?;

    for name in applied {
        tracing::info!(migration = name, "applied schema migration");
    }

    Ok(())
}
