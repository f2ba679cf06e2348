use crate::schema::{CREATE_FULL_TEXT, CREATE_UNIQUE_IP_INDEX, DROP_SEARCH_STRUCTURES, FULL_TEXT_TABLE, UNIQUE_IP_INDEX};
use crate::Db;
use anyhow::Result;
use internetdb_core::{SearchMode, StateStore};
use tracing::info;

impl Db {
    /// Whether the structure backing `mode` is present in the file.
    pub fn has_search_structure(&self, mode: SearchMode) -> Result<bool> {
        match mode {
            SearchMode::UniqueIp => self.index_exists(UNIQUE_IP_INDEX),
            SearchMode::FullText => self.table_exists(FULL_TEXT_TABLE),
        }
    }
}

/// Makes the database carry exactly the structure for `mode`, rebuilding when
/// the recorded mode differs or the structure went missing. Returns whether a
/// rebuild happened.
pub fn apply_search_mode(db: &mut Db, store: &StateStore, mode: SearchMode) -> Result<bool> {
    let recorded = store.load().search_mode;
    if recorded == Some(mode) && db.has_search_structure(mode)? {
        return Ok(false);
    }
    info!(?recorded, ?mode, "building search structure");
    let tx = db.conn.transaction()?;
    tx.execute_batch(DROP_SEARCH_STRUCTURES)?;
    match mode {
        SearchMode::UniqueIp => tx.execute_batch(CREATE_UNIQUE_IP_INDEX)?,
        SearchMode::FullText => tx.execute_batch(CREATE_FULL_TEXT)?,
    }
    tx.commit()?;
    store.update(|s| s.search_mode = Some(mode))?;
    Ok(true)
}
