//! Per-day ledger of swept parcel coordinates.

use chrono::NaiveDate;
use std::collections::HashSet;
use tokio_rusqlite::params;

use super::Db;
use crate::Error;

impl Db {
    /// Coordinates of `platform` already scanned on `day`.
    pub async fn coordinates_scanned_on(&self, platform: &str, day: NaiveDate) -> Result<HashSet<(i32, i32)>, Error> {
        let platform = platform.to_string();
        let day = day.to_string();
        self.conn
            .call(move |conn| -> Result<HashSet<(i32, i32)>, Error> {
                let mut stmt = conn.prepare("SELECT x, y FROM coordinate_scans WHERE platform = ?1 AND scanned_on = ?2")?;
                let rows = stmt.query_map(params![platform, day], |row| Ok((row.get(0)?, row.get(1)?)))?;

                let mut scanned = HashSet::new();
                for row in rows {
                    scanned.insert(row?);
                }
                Ok(scanned)
            })
            .await
            .map_err(Error::from)
    }

    /// Record `coords` as scanned on `day`. Already recorded pairs are ignored.
    pub async fn record_coordinate_scans(&self, platform: &str, day: NaiveDate, coords: &[(i32, i32)]) -> Result<(), Error> {
        if coords.is_empty() {
            return Ok(());
        }
        let platform = platform.to_string();
        let day = day.to_string();
        let coords = coords.to_vec();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT OR IGNORE INTO coordinate_scans (platform, x, y, scanned_on) VALUES (?1, ?2, ?3, ?4)",
                    )?;
                    for (x, y) in &coords {
                        stmt.execute(params![platform, x, y, day])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Drop ledger rows older than `before`. Returns the number removed.
    pub async fn prune_coordinate_scans(&self, before: NaiveDate) -> Result<u64, Error> {
        let before = before.to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM coordinate_scans WHERE scanned_on < ?1", params![before])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}
