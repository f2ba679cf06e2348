//! Fakes for the upstream and the decompressor.

use async_trait::async_trait;
use decompress::{DecompressError, ExpandReport, Expander};
use internetdb_core::SpaceProbe;
use snapshot_fetch::{FetchError, SnapshotSource};
use snapshot_sqlite::Db;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Bytes of a SQLite file holding the upstream flat table.
pub fn flat_snapshot(rows: &[(&str, Option<&str>)]) -> Vec<u8> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flat.sqlite");
    let db = Db::open(&path).unwrap();
    let mut sql = String::from("CREATE TABLE data (ip TEXT, ports TEXT, tags TEXT, cpes TEXT, vulns TEXT, hostnames TEXT);");
    for (ip, hostnames) in rows {
        let hostnames = match hostnames {
            Some(h) => format!("'{}'", h.replace('\'', "''")),
            None => "NULL".to_string(),
        };
        sql.push_str(&format!(
            "INSERT INTO data VALUES ('{ip}', '22,443', 'cloud', 'cpe:/a:openbsd:openssh', 'CVE-2023-38408', {hostnames});"
        ));
    }
    db.conn.execute_batch(&sql).unwrap();
    db.close().unwrap();
    std::fs::read(&path).unwrap()
}

pub struct FakeSource {
    link: Mutex<String>,
    snapshot: Mutex<Vec<u8>>,
    resolves: AtomicUsize,
    downloads: AtomicUsize,
    delay: Duration,
}

impl FakeSource {
    pub fn new(link: &str, snapshot: Vec<u8>) -> Self {
        FakeSource {
            link: Mutex::new(link.to_string()),
            snapshot: Mutex::new(snapshot),
            resolves: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn publish(&self, link: &str, snapshot: Vec<u8>) {
        *self.link.lock().unwrap() = link.to_string();
        *self.snapshot.lock().unwrap() = snapshot;
    }

    pub fn resolves(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotSource for FakeSource {
    async fn resolve_download_link(&self) -> Result<String, FetchError> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.link.lock().unwrap().clone())
    }

    async fn download_to(&self, _url: &str, dest: &Path) -> Result<u64, FetchError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let bytes = self.snapshot.lock().unwrap().clone();
        std::fs::write(dest, &bytes).map_err(|source| FetchError::Io { path: dest.to_path_buf(), source })?;
        Ok(bytes.len() as u64)
    }
}

/// Treats the "archive" as the expanded file itself.
#[derive(Default)]
pub struct CopyExpander {
    pub fail_next: AtomicBool,
    pub runs: AtomicUsize,
}

#[async_trait]
impl Expander for CopyExpander {
    async fn expand(&self, archive: &Path, target: &Path) -> Result<ExpandReport, DecompressError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(DecompressError::ToolFailed {
                tool: "bzip2".into(),
                status: "exit status: 2".into(),
                stderr: "bzip2: Data integrity error when decompressing.".into(),
            });
        }
        let bytes = std::fs::copy(archive, target).map_err(|source| DecompressError::Io { path: target.to_path_buf(), source })?;
        Ok(ExpandReport { bytes })
    }
}

pub struct FixedSpace(pub u64);

impl SpaceProbe for FixedSpace {
    fn available_bytes(&self, _dir: &Path) -> std::io::Result<u64> {
        Ok(self.0)
    }
}
