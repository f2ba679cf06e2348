//! Pre-flight free space check run before every expensive stage.

use crate::paths::DataFiles;
use crate::settings::RefreshSettings;
use crate::state::{Phase, RefreshState};
use crate::units::{bytes_to_gb, file_size};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Headroom once `ips` is populated.
const LOADED_MULTIPLIER: f64 = 1.3;
/// Headroom while the flat table and `ips` briefly coexist.
const MIGRATION_MULTIPLIER: f64 = 2.05;
/// Extra headroom for the size-minimizing vacuum.
const VACUUM_MULTIPLIER: f64 = 1.6;

pub trait SpaceProbe: Send + Sync {
    fn available_bytes(&self, dir: &Path) -> std::io::Result<u64>;
}

/// Free space of the real volume hosting a directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct VolumeSpace;

impl SpaceProbe for VolumeSpace {
    fn available_bytes(&self, dir: &Path) -> std::io::Result<u64> {
        fs4::available_space(dir)
    }
}

#[derive(Debug, Error)]
pub enum DiskSpaceError {
    #[error("not enough disk space for database refresh -> need ~{}GB more free", bytes_to_gb(*shortfall_bytes))]
    Insufficient {
        shortfall_bytes: u64,
        required_bytes: u64,
        free_bytes: u64,
    },
    #[error("failed to query free space of {dir}: {source}")]
    Probe {
        dir: String,
        #[source]
        source: std::io::Error,
    },
}

/// Bytes that must still be free, on top of the working database already on
/// disk, for the remaining stages to complete.
///
/// Until a new snapshot is expanded the file on disk is the previous one,
/// so its migration flags say nothing about the upcoming work: the estimate
/// assumes a full migration and never drops below `minimum_free_bytes`.
pub fn required_free_bytes(files: &DataFiles, state: &RefreshState, settings: &RefreshSettings) -> u64 {
    let existing = match file_size(&files.temp_db) {
        0 => file_size(&files.final_db),
        n => n,
    };
    if existing == 0 {
        return settings.minimum_free_bytes;
    }
    let before_expansion = matches!(state.phase, Phase::Empty | Phase::Downloading | Phase::Ready);
    let ips_loaded = state.ips_loaded && !before_expansion;
    let mut multiplier = if ips_loaded { LOADED_MULTIPLIER } else { MIGRATION_MULTIPLIER };
    if settings.minimize_database_size && !ips_loaded {
        multiplier *= VACUUM_MULTIPLIER;
    }
    let total = (existing as f64 * multiplier).round() as u64;
    let required = total.saturating_sub(existing);
    if before_expansion {
        required.max(settings.minimum_free_bytes)
    } else {
        required
    }
}

pub fn ensure_enough_space(
    files: &DataFiles,
    state: &RefreshState,
    settings: &RefreshSettings,
    probe: &dyn SpaceProbe,
) -> Result<(), DiskSpaceError> {
    let free = probe.available_bytes(&files.dir).map_err(|source| DiskSpaceError::Probe {
        dir: files.dir.display().to_string(),
        source,
    })?;
    let required = required_free_bytes(files, state, settings);
    debug!(free, required, "disk space check");
    if free < required {
        return Err(DiskSpaceError::Insufficient {
            shortfall_bytes: required - free,
            required_bytes: required,
            free_bytes: free,
        });
    }
    Ok(())
}
