use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

pub struct Db {
    pub conn: Connection,
}

impl Db {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        apply_pragmas(&conn)?;
        Ok(Db { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_pragmas(&conn)?;
        Ok(Db { conn })
    }

    /// Close the connection, surfacing any error SQLite reports while doing so.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| e)?;
        Ok(())
    }
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    // Rollback journal instead of WAL: the file gets renamed and deleted
    // between refreshes and must not leave sidecar files behind.
    conn.pragma_update(None, "journal_mode", &"TRUNCATE")?;
    conn.pragma_update(None, "synchronous", &"NORMAL")?;
    conn.pragma_update(None, "mmap_size", &268435456i64)?; // 256 MiB
    conn.pragma_update(None, "cache_size", &-262144i64)?; // 256 MiB target
    conn.busy_timeout(Duration::from_secs(30))?;
    Ok(())
}
