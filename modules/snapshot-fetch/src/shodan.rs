use crate::network::{build_client, NetworkSettings};
use crate::{FetchError, SnapshotSource};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

pub const DEFAULT_UPSTREAM_URL: &str = "https://api.shodan.io/shodan/data/internetdb";

/// One downloadable artifact as listed by the metadata endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ExportEntry {
    #[serde(default)]
    pub name: String,
    pub url: String,
}

/// First entry whose name marks it as the SQLite export.
pub fn select_sqlite_export(entries: &[ExportEntry]) -> Option<&str> {
    entries.iter().find(|e| e.name.contains("sqlite")).map(|e| e.url.as_str())
}

pub struct ShodanClient {
    client: Client,
    metadata_url: Url,
    api_key: Option<String>,
}

impl ShodanClient {
    pub fn new(metadata_url: &str, api_key: Option<String>, net: &NetworkSettings) -> Result<Self, FetchError> {
        let metadata_url = Url::parse(metadata_url).map_err(|source| FetchError::InvalidUrl { url: metadata_url.to_string(), source })?;
        Ok(ShodanClient {
            client: build_client(net)?,
            metadata_url,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }
}

#[async_trait]
impl SnapshotSource for ShodanClient {
    async fn resolve_download_link(&self) -> Result<String, FetchError> {
        let key = self.api_key.as_deref().ok_or(FetchError::MissingApiKey)?;
        let url = self.metadata_url.to_string();
        // without_url: the query string carries the key.
        let http = |source: reqwest::Error| FetchError::Http { url: url.clone(), source: source.without_url() };
        debug!(%url, "resolving download link");

        let resp = self.client.get(self.metadata_url.clone()).query(&[("key", key)]).send().await.map_err(http)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status { url: url.clone(), status });
        }
        let entries: Vec<ExportEntry> = resp.json().await.map_err(http)?;
        let link = select_sqlite_export(&entries).ok_or_else(|| FetchError::NoSqliteExport { url: url.clone() })?;
        debug!(link, "download link resolved");
        Ok(link.to_string())
    }

    async fn download_to(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        download(&self.client, url, dest).await
    }
}

async fn download(client: &Client, url: &str, dest: &Path) -> Result<u64, FetchError> {
    let http = |source: reqwest::Error| FetchError::Http { url: url.to_string(), source: source.without_url() };
    let write_err = |source: std::io::Error| FetchError::Io { path: dest.to_path_buf(), source };

    info!(dest = %dest.display(), "downloading snapshot");
    let mut resp = client.get(url).send().await.map_err(http)?;
    let status = resp.status();
    if !status.is_success() {
        return Err(FetchError::Status { url: url.to_string(), status });
    }

    match tokio::fs::remove_file(dest).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(write_err(e)),
    }
    let mut file = tokio::fs::File::create(dest).await.map_err(write_err)?;
    let mut written = 0u64;
    while let Some(chunk) = resp.chunk().await.map_err(http)? {
        file.write_all(&chunk).await.map_err(write_err)?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(write_err)?;
    file.sync_all().await.map_err(write_err)?;
    Ok(written)
}
