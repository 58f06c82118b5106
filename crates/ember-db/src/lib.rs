pub mod migrations;
pub mod models;
pub mod queries;
pub mod snapshot;

use std::io::Cursor;
use std::sync::Mutex;

use anyhow::{Result, bail};
use rusqlite::{Connection, DatabaseName, Params};
use tracing::{debug, info};

pub use models::FromRow;
pub use snapshot::{FileStorage, LoadOutcome, MemoryStorage, Persister, SNAPSHOT_KEY, SnapshotStorage};

/// The embedded store. One in-memory SQLite connection behind a mutex; every
/// read and write goes through it, so there is exactly one writer at a time.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Fresh, empty store with the current schema.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrations::run(&conn)?;

        info!("Created empty store");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Rebuild a store from an exported image, then bring its schema forward.
    pub fn from_image(image: &[u8]) -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        conn.deserialize_read_exact(DatabaseName::Main, Cursor::new(image), image.len(), false)?;

        // sqlite only reads the header lazily; force it now so corruption surfaces here.
        let check: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
        if check != "ok" {
            bail!("snapshot failed integrity check: {}", check);
        }

        migrations::run(&conn)?;

        info!("Restored store from {} byte snapshot", image.len());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Export the complete binary image of the store. The connection lock is
    /// held for the duration, so the image never contains a half-applied write.
    pub fn export_image(&self) -> Result<Vec<u8>> {
        self.with_conn(|conn| {
            let data = conn.serialize(DatabaseName::Main)?;
            debug!("Exported {} byte snapshot", data.len());
            Ok(data.to_vec())
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&conn)
    }

    // -- Primitives --

    /// Run a write statement. Returns the number of rows changed.
    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize> {
        self.with_conn(|conn| Ok(conn.execute(sql, params)?))
    }

    /// Run a read statement and map every row into `T`.
    pub fn query<T: FromRow, P: Params>(&self, sql: &str, params: P) -> Result<Vec<T>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt
                .query_map(params, T::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn query_one<T: FromRow, P: Params>(&self, sql: &str, params: P) -> Result<Option<T>> {
        Ok(self.query(sql, params)?.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_roundtrip_keeps_rows() {
        let db = Database::open_in_memory().unwrap();
        db.execute(
            "INSERT INTO directory (id, name, status, updated_at) VALUES (?1, ?2, 'online', 1)",
            ("peer-1", "Ada"),
        )
        .unwrap();

        let image = db.export_image().unwrap();
        let restored = Database::from_image(&image).unwrap();
        let name: String = restored
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT name FROM directory WHERE id = 'peer-1'", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(name, "Ada");
    }

    #[test]
    fn garbage_image_is_rejected() {
        assert!(Database::from_image(b"definitely not a sqlite database, just bytes").is_err());
    }

    #[test]
    fn restored_store_accepts_writes() {
        let db = Database::open_in_memory().unwrap();
        let restored = Database::from_image(&db.export_image().unwrap()).unwrap();
        restored
            .execute(
                "INSERT INTO directory (id, name, status, updated_at) VALUES ('p', 'P', 'offline', 2)",
                [],
            )
            .unwrap();
        assert!(restored.export_image().unwrap().len() >= db.export_image().unwrap().len());
    }
}
