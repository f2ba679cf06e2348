use crate::error::RefreshError;
use crate::handle::SharedHandle;
use decompress::Expander;
use internetdb_core::units::format_elapsed;
use internetdb_core::{DataFiles, RefreshSettings, SpaceProbe, StateStore, VolumeSpace};
use snapshot_fetch::{should_refetch, SnapshotSource};
use snapshot_sqlite::{BatchLimits, RecordCounts, ReformatStats};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Another refresh held the lock; nothing was done.
    AlreadyRunning,
    /// An existing reformatted database was attached and no upstream check
    /// was wanted.
    Attached,
    /// Upstream has not moved and the attached database is current.
    UpToDate,
    Refreshed {
        downloaded: bool,
        reformat: Option<ReformatStats>,
        counts: RecordCounts,
    },
}

pub struct Refresher {
    pub(crate) files: DataFiles,
    pub(crate) store: StateStore,
    pub(crate) settings: RefreshSettings,
    pub(crate) source: Arc<dyn SnapshotSource>,
    pub(crate) expander: Arc<dyn Expander>,
    pub(crate) space: Arc<dyn SpaceProbe>,
    pub(crate) limits: BatchLimits,
    pub(crate) handle: Arc<SharedHandle>,
    running: Mutex<()>,
}

impl Refresher {
    pub fn new(
        files: DataFiles,
        settings: RefreshSettings,
        source: Arc<dyn SnapshotSource>,
        expander: Arc<dyn Expander>,
    ) -> Self {
        Refresher {
            store: StateStore::new(files.state.clone()),
            files,
            settings,
            source,
            expander,
            space: Arc::new(VolumeSpace),
            limits: BatchLimits::default(),
            handle: Arc::new(SharedHandle::new()),
            running: Mutex::new(()),
        }
    }

    pub fn with_space_probe(mut self, probe: Arc<dyn SpaceProbe>) -> Self {
        self.space = probe;
        self
    }

    pub fn with_batch_limits(mut self, limits: BatchLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn handle(&self) -> Arc<SharedHandle> {
        self.handle.clone()
    }

    pub fn settings(&self) -> &RefreshSettings {
        &self.settings
    }

    pub fn files(&self) -> &DataFiles {
        &self.files
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Runs one refresh. At most one runs at a time; a call made while
    /// another is in flight returns [`RefreshOutcome::AlreadyRunning`].
    pub async fn refresh(&self) -> Result<RefreshOutcome, RefreshError> {
        let Ok(_running) = self.running.try_lock() else {
            info!("database refresh already running, skipping");
            return Ok(RefreshOutcome::AlreadyRunning);
        };
        info!("starting database refresh");
        let started = Instant::now();
        match self.run().await {
            Ok(outcome) => {
                info!(elapsed = %format_elapsed(started.elapsed()), ?outcome, "database refresh complete");
                Ok(outcome)
            }
            Err(e) => {
                error!(error = %e, elapsed = %format_elapsed(started.elapsed()), "database refresh failed");
                Err(e)
            }
        }
    }

    fn require_api_key(&self) -> Result<(), RefreshError> {
        match self.settings.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(()),
            _ => Err(RefreshError::Configuration(
                "upstream API key is not configured (set api_key or SHODAN_ENTERPRISE_API_KEY)".into(),
            )),
        }
    }

    async fn run(&self) -> Result<RefreshOutcome, RefreshError> {
        let never_fetches = self.settings.never_fetches();
        if !never_fetches {
            self.require_api_key()?;
        }
        self.files
            .ensure_dir()
            .map_err(|source| RefreshError::Io { path: self.files.dir.clone(), source })?;

        if self.settings.use_preformatted_database {
            self.install_preformatted().await?;
        }

        let attached = self.attach_if_ready().await?;
        if attached && never_fetches {
            return Ok(RefreshOutcome::Attached);
        }
        if never_fetches {
            info!("no usable database on disk, fetching the initial snapshot");
            self.require_api_key()?;
        }

        let link = self.source.resolve_download_link().await?;
        let state = self.store.load();
        let fetch = should_refetch(&link, state.download_link.as_deref(), &self.files.final_db)
            || state.phase == internetdb_core::Phase::Downloading;

        if !fetch {
            if state.is_reformatted() && self.handle.is_published() {
                info!("database is up to date");
                return Ok(RefreshOutcome::UpToDate);
            }
            if !state.is_reformatted() {
                info!("snapshot already on disk, resuming reformat");
                self.check_disk_space()?;
            }
            let reformat = self.reformat().await?;
            let counts = self.handoff().await?;
            return Ok(RefreshOutcome::Refreshed { downloaded: false, reformat, counts });
        }

        info!("downloading and decompressing the entire database, this can take a while");
        self.check_disk_space()?;
        let downloaded = self.download(&link).await?;
        self.check_disk_space()?;
        self.decompress().await?;
        self.check_disk_space()?;
        let reformat = self.reformat().await?;
        let counts = self.handoff().await?;
        Ok(RefreshOutcome::Refreshed { downloaded, reformat, counts })
    }
}
