//! Durable bookkeeping for the refresh pipeline.
//!
//! The whole state lives in one JSON document that is read and rewritten on
//! every change. A missing, unreadable or corrupt document is treated as an
//! empty state, which makes the pipeline redo work instead of failing.

use crate::settings::SearchMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::warn;

/// Where the current database file is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Empty,
    Downloading,
    Decompressed,
    Reformatting,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    /// A new compressed snapshot is about to be fetched.
    DownloadStarted,
    /// The snapshot was expanded into a database file holding the flat table.
    Decompressed,
    ReformatStarted,
    ReformatFinished,
    /// An operator-supplied archive in the normalized schema was installed.
    PreformattedInstalled,
}

impl Phase {
    pub fn apply(self, event: PhaseEvent) -> Result<Phase, StateError> {
        use Phase::*;
        use PhaseEvent as E;
        match (self, event) {
            (_, E::DownloadStarted) => Ok(Downloading),
            (Downloading | Decompressed, E::Decompressed) => Ok(Decompressed),
            (Ready, E::ReformatStarted) => Err(StateError::InvalidTransition { from: self, event }),
            (_, E::ReformatStarted) => Ok(Reformatting),
            (Reformatting, E::ReformatFinished) => Ok(Ready),
            (_, E::PreformattedInstalled) => Ok(Ready),
            (from, event) => Err(StateError::InvalidTransition { from, event }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshState {
    /// Link of the last snapshot downloaded to completion.
    pub download_link: Option<String>,
    pub phase: Phase,
    /// The flat table has been copied into `ips` for the current file.
    pub ips_loaded: bool,
    /// Alternate index structure last built into the current file.
    pub search_mode: Option<SearchMode>,
    pub refreshed_at: Option<String>,
}

impl RefreshState {
    pub fn is_reformatted(&self) -> bool {
        self.phase == Phase::Ready
    }

    /// The single place phase changes happen, together with the flags each
    /// change invalidates.
    pub fn apply(&mut self, event: PhaseEvent) -> Result<(), StateError> {
        self.phase = self.phase.apply(event)?;
        match event {
            PhaseEvent::DownloadStarted => {
                self.ips_loaded = false;
                self.search_mode = None;
            }
            PhaseEvent::PreformattedInstalled => {
                self.ips_loaded = true;
                self.search_mode = None;
                self.refreshed_at = now_rfc3339();
            }
            PhaseEvent::ReformatFinished => self.refreshed_at = now_rfc3339(),
            PhaseEvent::Decompressed | PhaseEvent::ReformatStarted => {}
        }
        Ok(())
    }
}

fn now_rfc3339() -> Option<String> {
    OffsetDateTime::now_utc().format(&Rfc3339).ok()
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to write refresh state {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode refresh state: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("invalid refresh phase transition from {from:?} on {event:?}")]
    InvalidTransition { from: Phase, event: PhaseEvent },
}

/// File-backed state store. Single writer: the refresh supervisor never runs
/// two refreshes at once.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        StateStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> RefreshState {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return RefreshState::default(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "unreadable refresh state, starting fresh");
                return RefreshState::default();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(state) => state,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "corrupt refresh state, starting fresh");
                RefreshState::default()
            }
        }
    }

    /// Read-modify-write. Returns the state as it was before `f` ran.
    pub fn update<F>(&self, f: F) -> Result<RefreshState, StateError>
    where
        F: FnOnce(&mut RefreshState),
    {
        let previous = self.load();
        let mut next = previous.clone();
        f(&mut next);
        self.write(&next)?;
        Ok(previous)
    }

    pub fn transition(&self, event: PhaseEvent) -> Result<Phase, StateError> {
        let mut state = self.load();
        state.apply(event)?;
        self.write(&state)?;
        Ok(state.phase)
    }

    fn write(&self, state: &RefreshState) -> Result<(), StateError> {
        let body = serde_json::to_vec_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        let io = |source: std::io::Error| StateError::Write { path: self.path.clone(), source };
        fs::write(&tmp, body).map_err(io)?;
        fs::rename(&tmp, &self.path).map_err(io)?;
        Ok(())
    }
}
