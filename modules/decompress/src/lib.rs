//! Expansion of bzip2 snapshot archives through the external `bzip2` tool.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

const BZIP2: &str = "bzip2";
const INSTALL_HINT: &str = "install the bzip2 package on this host (e.g. `apt-get install bzip2`) and restart the service";

#[derive(Debug, Error)]
pub enum DecompressError {
    #[error("{tool} not found on PATH: {remediation}")]
    ToolMissing { tool: String, remediation: String },
    #[error("{tool} failed ({status}): {stderr}")]
    ToolFailed { tool: String, status: String, stderr: String },
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Default)]
pub struct ExpandReport {
    pub bytes: u64,
}

#[async_trait]
pub trait Expander: Send + Sync {
    /// Expands `archive` into `target`, replacing it. The archive is left in
    /// place.
    async fn expand(&self, archive: &Path, target: &Path) -> Result<ExpandReport, DecompressError>;
}

#[derive(Debug, Clone)]
pub struct Bzip2Cli {
    program: String,
}

impl Default for Bzip2Cli {
    fn default() -> Self {
        Bzip2Cli { program: BZIP2.to_string() }
    }
}

impl Bzip2Cli {
    pub fn with_program(program: impl Into<String>) -> Self {
        Bzip2Cli { program: program.into() }
    }

    fn locate(&self) -> Result<PathBuf, DecompressError> {
        which::which(&self.program).map_err(|_| DecompressError::ToolMissing {
            tool: self.program.clone(),
            remediation: INSTALL_HINT.to_string(),
        })
    }
}

#[async_trait]
impl Expander for Bzip2Cli {
    async fn expand(&self, archive: &Path, target: &Path) -> Result<ExpandReport, DecompressError> {
        let tool = self.locate()?;
        let io_at = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| DecompressError::Io { path, source }
        };

        info!(archive = %archive.display(), target = %target.display(), "expanding snapshot");
        let out = std::fs::File::create(target).map_err(io_at(target))?;
        let child = Command::new(&tool)
            .arg("-dc")
            .arg(archive)
            .stdin(Stdio::null())
            .stdout(Stdio::from(out))
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(io_at(tool.as_path()))?;
        let output = child.wait_with_output().await.map_err(io_at(tool.as_path()))?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        // Diagnostics fail the run even on a zero exit status.
        if !output.status.success() || !stderr.is_empty() {
            let _ = std::fs::remove_file(target);
            return Err(DecompressError::ToolFailed {
                tool: self.program.clone(),
                status: output.status.to_string(),
                stderr,
            });
        }

        let bytes = std::fs::metadata(target).map_err(io_at(target))?.len();
        debug!(bytes, "expansion finished");
        Ok(ExpandReport { bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn have_bzip2() -> bool {
        which::which(BZIP2).is_ok()
    }

    fn compress(path: &Path, data: &[u8]) {
        let file = std::fs::File::create(path).unwrap();
        let mut enc = bzip2::write::BzEncoder::new(file, bzip2::Compression::best());
        enc.write_all(data).unwrap();
        enc.finish().unwrap();
    }

    #[tokio::test]
    async fn missing_tool_carries_remediation() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Bzip2Cli::with_program("bzip2-that-is-not-installed");
        let err = cli.expand(&dir.path().join("a.bz2"), &dir.path().join("a")).await.unwrap_err();
        match err {
            DecompressError::ToolMissing { tool, remediation } => {
                assert_eq!(tool, "bzip2-that-is-not-installed");
                assert!(remediation.contains("install"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn expands_archive_and_keeps_it() {
        if !have_bzip2() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("new-internetdb.sqlite.bz2");
        let target = dir.path().join("internetdb.sqlite");
        let payload = b"SQLite format 3\0".repeat(1000);
        compress(&archive, &payload);
        std::fs::write(&target, b"old").unwrap();

        let report = Bzip2Cli::default().expand(&archive, &target).await.unwrap();
        assert_eq!(report.bytes, payload.len() as u64);
        assert_eq!(std::fs::read(&target).unwrap(), payload);
        assert!(archive.exists());
    }

    #[tokio::test]
    async fn corrupt_archive_fails_and_removes_output() {
        if !have_bzip2() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bad.bz2");
        let target = dir.path().join("bad");
        std::fs::write(&archive, b"definitely not bzip2").unwrap();

        let err = Bzip2Cli::default().expand(&archive, &target).await.unwrap_err();
        assert!(matches!(err, DecompressError::ToolFailed { .. }), "{err:?}");
        assert!(!target.exists());
    }
}
