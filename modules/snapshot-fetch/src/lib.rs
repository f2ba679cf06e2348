//! Upstream snapshot discovery and download.

mod network;
mod shodan;

pub use network::{build_client, NetworkSettings};
pub use shodan::{select_sqlite_export, ExportEntry, ShodanClient, DEFAULT_UPSTREAM_URL};

use async_trait::async_trait;
use internetdb_core::units::file_size;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("upstream API key is not configured (set api_key or SHODAN_ENTERPRISE_API_KEY)")]
    MissingApiKey,
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered {status}")]
    Status { url: String, status: reqwest::StatusCode },
    #[error("{url} lists no sqlite export")]
    NoSqliteExport { url: String },
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid upstream url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("invalid TLS settings: {0}")]
    Tls(String),
}

/// Where snapshots come from.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// URL of the current relational export.
    async fn resolve_download_link(&self) -> Result<String, FetchError>;

    /// Streams `url` into `dest`, replacing any existing file. Returns the
    /// number of bytes written.
    async fn download_to(&self, url: &str, dest: &Path) -> Result<u64, FetchError>;
}

/// A refetch is needed when upstream moved to a new link or the local
/// artifact is missing or empty.
pub fn should_refetch(link: &str, marker: Option<&str>, artifact: &Path) -> bool {
    marker != Some(link) || file_size(artifact) == 0
}
