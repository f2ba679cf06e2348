//! Core types shared by the snapshot refresh pipeline: on-disk layout,
//! tunables, persisted refresh state and the disk space guard.

pub mod disk;
pub mod paths;
pub mod settings;
pub mod state;
pub mod units;

pub use disk::{ensure_enough_space, DiskSpaceError, SpaceProbe, VolumeSpace};
pub use paths::DataFiles;
pub use settings::{ReclaimMode, RefreshSettings, Schedule, SearchMode, StorageMode};
pub use state::{Phase, PhaseEvent, RefreshState, StateError, StateStore};

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!version().is_empty());
    }
}
