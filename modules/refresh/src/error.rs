use decompress::DecompressError;
use internetdb_core::{DiskSpaceError, StateError};
use snapshot_fetch::FetchError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("network error: {0}")]
    Network(#[source] FetchError),
    #[error(transparent)]
    InsufficientDiskSpace(#[from] DiskSpaceError),
    #[error("decompression failed: {0}")]
    Decompression(#[from] DecompressError),
    #[error("schema migration failed: {0:#}")]
    SchemaMigration(anyhow::Error),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("background task failed: {0}")]
    Task(String),
}

impl From<FetchError> for RefreshError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::MissingApiKey | FetchError::InvalidUrl { .. } | FetchError::Tls(_) => {
                RefreshError::Configuration(err.to_string())
            }
            other => RefreshError::Network(other),
        }
    }
}

impl From<tokio::task::JoinError> for RefreshError {
    fn from(err: tokio::task::JoinError) -> Self {
        RefreshError::Task(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum LookupError {
    /// No database is attached; a refresh is replacing or building it.
    #[error("the database is being refreshed, searching is unavailable until it finishes")]
    RefreshInProgress,
    #[error("full-text search is disabled (enable_domain_and_cve_searching)")]
    SearchDisabled,
    #[error("lookup failed: {0:#}")]
    Query(anyhow::Error),
    #[error("lookup task failed: {0}")]
    Task(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_is_a_configuration_error() {
        let err: RefreshError = FetchError::MissingApiKey.into();
        assert!(matches!(err, RefreshError::Configuration(_)));
    }

    #[test]
    fn upstream_failures_are_network_errors() {
        let err: RefreshError = FetchError::NoSqliteExport { url: "https://up".into() }.into();
        assert!(matches!(err, RefreshError::Network(_)));
        assert!(err.to_string().starts_with("network error"));
    }
}
