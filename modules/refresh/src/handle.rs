//! The database handle shared between the refresher and lookups.
//!
//! Lookups take a clone of the current `Arc` and never block refreshes.
//! Before a file is deleted or renamed the refresher unpublishes the handle
//! and waits until the last reader drops its clone, then closes the
//! connection.

use arc_swap::ArcSwapOption;
use snapshot_sqlite::Db;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

const RELEASE_POLL: Duration = Duration::from_millis(10);

/// An open, fully reformatted database.
pub struct SnapshotDb {
    db: Mutex<Db>,
    path: PathBuf,
}

impl SnapshotDb {
    pub fn new(db: Db, path: impl Into<PathBuf>) -> Self {
        SnapshotDb { db: Mutex::new(db), path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `f` with exclusive use of the connection.
    pub fn with<R>(&self, f: impl FnOnce(&Db) -> R) -> R {
        let guard = self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&guard)
    }

    fn into_db(self) -> Db {
        self.db.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Default)]
pub struct SharedHandle {
    cell: ArcSwapOption<SnapshotDb>,
}

impl SharedHandle {
    pub fn new() -> Self {
        SharedHandle::default()
    }

    pub fn current(&self) -> Option<Arc<SnapshotDb>> {
        self.cell.load_full()
    }

    pub fn is_published(&self) -> bool {
        self.cell.load().is_some()
    }

    /// Publishes `snapshot`, releasing whatever was published before.
    pub async fn publish(&self, snapshot: SnapshotDb) {
        self.release().await;
        debug!(path = %snapshot.path().display(), "publishing database handle");
        self.cell.store(Some(Arc::new(snapshot)));
    }

    /// Unpublishes the handle and closes its connection once no reader holds
    /// it anymore. No-op when nothing is published.
    pub async fn release(&self) {
        let Some(mut snapshot) = self.cell.swap(None) else {
            return;
        };
        let owned = loop {
            match Arc::try_unwrap(snapshot) {
                Ok(owned) => break owned,
                Err(shared) => {
                    snapshot = shared;
                    tokio::time::sleep(RELEASE_POLL).await;
                }
            }
        };
        let path = owned.path.clone();
        if let Err(e) = owned.into_db().close() {
            warn!(path = %path.display(), error = %e, "closing released database failed");
        }
        debug!(path = %path.display(), "database handle released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> SnapshotDb {
        SnapshotDb::new(Db::open_in_memory().unwrap(), ":memory:")
    }

    #[tokio::test]
    async fn publish_and_release() {
        let handle = SharedHandle::new();
        assert!(handle.current().is_none());
        handle.publish(snapshot()).await;
        assert!(handle.is_published());
        let n: i64 = handle.current().unwrap().with(|db| db.conn.query_row("SELECT 41 + 1", [], |r| r.get(0)).unwrap());
        assert_eq!(n, 42);
        handle.release().await;
        assert!(!handle.is_published());
        handle.release().await;
    }

    #[tokio::test]
    async fn release_waits_for_readers() {
        let handle = Arc::new(SharedHandle::new());
        handle.publish(snapshot()).await;
        let reader = handle.current().unwrap();

        let releasing = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.release().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!releasing.is_finished());
        assert!(handle.current().is_none());

        drop(reader);
        releasing.await.unwrap();
    }
}
