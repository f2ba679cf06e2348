use crate::error::RefreshError;
use crate::handle::SnapshotDb;
use crate::refresher::Refresher;
use internetdb_core::units::{bytes_to_gb, file_size, file_size_gb};
use internetdb_core::{ensure_enough_space, PhaseEvent, StorageMode};
use snapshot_fetch::should_refetch;
use snapshot_sqlite::{apply_search_mode, reformat, Db, RecordCounts, ReformatOptions, ReformatOutcome, ReformatStats};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

fn remove_if_present(path: &Path) -> Result<(), RefreshError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(RefreshError::Io { path: path.to_path_buf(), source }),
    }
}

impl Refresher {
    pub(crate) fn check_disk_space(&self) -> Result<(), RefreshError> {
        let state = self.store.load();
        ensure_enough_space(&self.files, &state, &self.settings, self.space.as_ref())?;
        Ok(())
    }

    /// Returns whether bytes were actually transferred.
    pub(crate) async fn download(&self, link: &str) -> Result<bool, RefreshError> {
        self.store.transition(PhaseEvent::DownloadStarted)?;
        let marker = self.store.load().download_link;
        if !should_refetch(link, marker.as_deref(), &self.files.compressed) {
            info!("compressed snapshot exists and is current, skipping download");
            return Ok(false);
        }
        let bytes = self.source.download_to(link, &self.files.compressed).await?;
        self.store.update(|s| s.download_link = Some(link.to_string()))?;
        info!(size_gb = bytes_to_gb(bytes), "compressed snapshot downloaded");
        Ok(true)
    }

    /// Expands the downloaded archive. Low-storage mode drops the attached
    /// database and expands over the final file; high-storage mode expands
    /// into the side file and keeps serving until the handoff.
    pub(crate) async fn decompress(&self) -> Result<(), RefreshError> {
        let target: &Path = match self.settings.storage_mode {
            StorageMode::LowStorage => {
                info!("deleting the current database before decompression, searching is disabled meanwhile");
                self.handle.release().await;
                remove_if_present(&self.files.temp_db)?;
                remove_if_present(&self.files.final_db)?;
                &self.files.final_db
            }
            StorageMode::HighStorage => {
                remove_if_present(&self.files.temp_db)?;
                &self.files.temp_db
            }
        };
        let report = self.expander.expand(&self.files.compressed, target).await?;
        remove_if_present(&self.files.compressed)?;
        self.store.transition(PhaseEvent::Decompressed)?;
        info!(size_gb = bytes_to_gb(report.bytes), "snapshot decompressed, database size before indexing");
        Ok(())
    }

    /// Installs an operator-supplied archive that is already normalized.
    /// The archive is consumed so the next run does not expand it again.
    pub(crate) async fn install_preformatted(&self) -> Result<(), RefreshError> {
        let archive = &self.files.preformatted;
        if file_size(archive) == 0 {
            debug!(path = %archive.display(), "no preformatted archive to install");
            return Ok(());
        }
        info!(path = %archive.display(), "installing preformatted database");
        self.handle.release().await;
        remove_if_present(&self.files.temp_db)?;
        remove_if_present(&self.files.final_db)?;
        self.expander.expand(archive, &self.files.final_db).await?;
        remove_if_present(archive)?;
        self.store.transition(PhaseEvent::PreformattedInstalled)?;
        Ok(())
    }

    /// Publishes the final database if it is fully reformatted and every
    /// normalized table has content. Returns whether a handle is published.
    pub(crate) async fn attach_if_ready(&self) -> Result<bool, RefreshError> {
        let state = self.store.load();
        if file_size(&self.files.final_db) == 0 || !state.is_reformatted() {
            return Ok(false);
        }
        if self.handle.is_published() {
            return Ok(true);
        }
        let path = self.files.final_db.clone();
        let store = self.store.clone();
        let mode = self.settings.search_mode;
        let opened = tokio::task::spawn_blocking(move || -> anyhow::Result<Option<Db>> {
            let mut db = Db::open(&path)?;
            for table in ["ips", "domains", "ips_domains"] {
                if !db.table_has_content(table)? {
                    warn!(table, "reformatted database is missing content");
                    db.close()?;
                    return Ok(None);
                }
            }
            apply_search_mode(&mut db, &store, mode)?;
            Ok(Some(db))
        })
        .await?
        .map_err(RefreshError::SchemaMigration)?;

        match opened {
            Some(db) => {
                self.handle.publish(SnapshotDb::new(db, self.files.final_db.clone())).await;
                info!(size_gb = file_size_gb(&self.files.final_db), "attached existing database");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Reformats the working file (the side file while it exists) and
    /// reconciles its search structure.
    pub(crate) async fn reformat(&self) -> Result<Option<ReformatStats>, RefreshError> {
        let path: PathBuf = self.files.working_db().to_path_buf();
        let store = self.store.clone();
        let mode = self.settings.search_mode;
        let opts = ReformatOptions {
            limits: self.limits,
            reclaim: self.settings.minimize_database_size.then_some(self.settings.reclaim),
        };
        info!(path = %path.display(), "reformatting database");
        let outcome = tokio::task::spawn_blocking(move || -> anyhow::Result<ReformatOutcome> {
            let mut db = Db::open(&path)?;
            let outcome = reformat(&mut db, &store, &opts)?;
            apply_search_mode(&mut db, &store, mode)?;
            db.close()?;
            Ok(outcome)
        })
        .await?
        .map_err(RefreshError::SchemaMigration)?;

        Ok(match outcome {
            ReformatOutcome::Completed(stats) => Some(stats),
            ReformatOutcome::AlreadyDone => None,
        })
    }

    /// Moves the side file over the final one when present, then opens and
    /// publishes the final database.
    pub(crate) async fn handoff(&self) -> Result<RecordCounts, RefreshError> {
        self.handle.release().await;
        if self.files.temp_db.exists() {
            info!("swapping in the new database, searching is disabled for a moment");
            remove_if_present(&self.files.final_db)?;
            std::fs::rename(&self.files.temp_db, &self.files.final_db)
                .map_err(|source| RefreshError::Io { path: self.files.temp_db.clone(), source })?;
        }
        let path = self.files.final_db.clone();
        let (db, counts) = tokio::task::spawn_blocking(move || -> anyhow::Result<(Db, RecordCounts)> {
            let db = Db::open(&path)?;
            let counts = db.record_counts()?;
            Ok((db, counts))
        })
        .await?
        .map_err(RefreshError::SchemaMigration)?;

        self.handle.publish(SnapshotDb::new(db, self.files.final_db.clone())).await;
        info!(
            ips = counts.ips,
            domains = counts.domains,
            ips_domains = counts.edges,
            size_gb = file_size_gb(&self.files.final_db),
            "database loaded"
        );
        Ok(counts)
    }
}
