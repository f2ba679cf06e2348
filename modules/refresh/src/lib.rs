//! Refresh orchestration: stage sequencing over the data directory, the
//! shared database handle the query layer reads through, periodic scheduling
//! and the lookup facade.

mod error;
mod handle;
mod lookup;
mod refresher;
mod schedule;
mod stages;

#[cfg(test)]
mod testing;

pub use error::{LookupError, RefreshError};
pub use handle::{SharedHandle, SnapshotDb};
pub use lookup::{is_ignored_ip, Lookup, Query};
pub use refresher::{RefreshOutcome, Refresher};
pub use schedule::spawn_schedule;
