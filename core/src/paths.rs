use std::path::{Path, PathBuf};

const COMPRESSED_DB: &str = "new-internetdb.sqlite.bz2";
const TEMP_DB: &str = "new-internetdb.sqlite";
const FINAL_DB: &str = "internetdb.sqlite";
const PREFORMATTED_DB: &str = "internetdb.sqlite.bz2";
const STATE_FILE: &str = "local-storage.json";

/// Every file the refresh pipeline reads or writes, rooted at one data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFiles {
    pub dir: PathBuf,
    /// Download target; removed once expanded.
    pub compressed: PathBuf,
    /// Side file used by high-storage mode until the final swap.
    pub temp_db: PathBuf,
    /// The file the query layer reads.
    pub final_db: PathBuf,
    /// Operator-supplied archive that is already in the normalized schema.
    pub preformatted: PathBuf,
    pub state: PathBuf,
}

impl DataFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        DataFiles {
            compressed: dir.join(COMPRESSED_DB),
            temp_db: dir.join(TEMP_DB),
            final_db: dir.join(FINAL_DB),
            preformatted: dir.join(PREFORMATTED_DB),
            state: dir.join(STATE_FILE),
            dir,
        }
    }

    pub fn ensure_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)
    }

    /// The database file currently being worked on: the temp file while it
    /// exists, otherwise the final one.
    pub fn working_db(&self) -> &Path {
        if self.temp_db.exists() {
            &self.temp_db
        } else {
            &self.final_db
        }
    }
}
