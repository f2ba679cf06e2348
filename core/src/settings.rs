use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Storage vs. downtime tradeoff used during decompression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageMode {
    /// Expand over the live file; searching is unavailable meanwhile.
    #[default]
    LowStorage,
    /// Expand into a side file and swap it in at the end.
    HighStorage,
}

/// Which alternate index structure the database carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Unique index on `ips.ip`.
    #[default]
    UniqueIp,
    /// Full-text projection over every `ips` column.
    FullText,
}

impl SearchMode {
    pub fn from_full_text_flag(enabled: bool) -> Self {
        if enabled {
            SearchMode::FullText
        } else {
            SearchMode::UniqueIp
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReclaimMode {
    #[default]
    Full,
    Incremental,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    Never,
    Every(Duration),
}

impl Schedule {
    pub fn is_never(&self) -> bool {
        matches!(self, Schedule::Never)
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Schedule::Every(Duration::from_secs(30 * 24 * 60 * 60))
    }
}

impl FromStr for Schedule {
    type Err = String;

    /// Accepts `never-update` or an interval such as `90s`, `15m`, `12h`, `30d`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("never-update") {
            return Ok(Schedule::Never);
        }
        let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        let (num, unit) = s.split_at(split);
        let n: u64 = num.parse().map_err(|_| format!("invalid refresh schedule: {s}"))?;
        let scale: u64 = match unit.trim() {
            "s" => 1,
            "m" => 60,
            "h" => 60 * 60,
            "d" => 24 * 60 * 60,
            _ => return Err(format!("invalid refresh schedule unit: {s}")),
        };
        let secs = n.checked_mul(scale).ok_or_else(|| format!("invalid refresh schedule: {s}"))?;
        if secs == 0 {
            return Err(format!("refresh schedule must be positive: {s}"));
        }
        Ok(Schedule::Every(Duration::from_secs(secs)))
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Never => f.write_str("never-update"),
            Schedule::Every(d) => write!(f, "every {}s", d.as_secs()),
        }
    }
}

/// Tunables the pipeline consumes by name.
#[derive(Debug, Clone)]
pub struct RefreshSettings {
    pub api_key: Option<String>,
    pub schedule: Schedule,
    pub storage_mode: StorageMode,
    pub minimize_database_size: bool,
    pub reclaim: ReclaimMode,
    pub search_mode: SearchMode,
    pub use_preformatted_database: bool,
    /// Only read by the lookup layer.
    pub max_results: usize,
    /// Requirement used by the disk guard when no database file exists yet.
    pub minimum_free_bytes: u64,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        RefreshSettings {
            api_key: None,
            schedule: Schedule::default(),
            storage_mode: StorageMode::LowStorage,
            minimize_database_size: true,
            reclaim: ReclaimMode::Full,
            search_mode: SearchMode::UniqueIp,
            use_preformatted_database: false,
            max_results: 30,
            minimum_free_bytes: 46_000_000_000,
        }
    }
}

impl RefreshSettings {
    /// Refreshing stops after attaching an existing database.
    pub fn never_fetches(&self) -> bool {
        self.schedule.is_never() || self.use_preformatted_database
    }
}
