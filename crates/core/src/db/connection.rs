//! Database connection management with pragma configuration.
//!
//! Opens the SQLite database, applies WAL pragmas so that several indexer
//! processes can share one file, and runs migrations.

use super::migrations;
use crate::Error;
use std::path::Path;
use tokio_rusqlite::Connection;

const PRAGMAS: &str = "PRAGMA journal_mode=WAL;
     PRAGMA synchronous=NORMAL;
     PRAGMA temp_store=MEMORY;
     PRAGMA busy_timeout=5000;
     PRAGMA foreign_keys=ON;";

/// Handle to the metacrawl database.
///
/// Wraps a tokio-rusqlite Connection that runs statements on a background
/// thread. Cloning is cheap and shares the connection.
#[derive(Clone, Debug)]
pub struct Db {
    pub(crate) conn: Connection,
}

impl Db {
    /// Open (creating if needed) the database at `path` and migrate it.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        tracing::debug!(path = %path.display(), "opening database");
        let conn = Connection::open(path).await?;
        Self::init(conn).await
    }

    /// Open an in-memory database with the same schema.
    pub async fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, Error> {
        conn.call(|conn| conn.execute_batch(PRAGMAS)).await.map_err(Error::from)?;

        migrations::run(&conn).await?;

        Ok(Self { conn })
    }
}
