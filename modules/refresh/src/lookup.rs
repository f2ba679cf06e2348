use crate::error::LookupError;
use crate::handle::SharedHandle;
use internetdb_core::SearchMode;
use snapshot_sqlite::IpRecord;
use std::net::IpAddr;
use std::sync::Arc;

/// Addresses that never carry useful data.
const IGNORED_IPS: [&str; 3] = ["127.0.0.1", "255.255.255.255", "0.0.0.0"];

pub fn is_ignored_ip(ip: &str) -> bool {
    IGNORED_IPS.contains(&ip.trim())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Ip(String),
    Domain(String),
    Text(String),
}

impl Query {
    /// IP addresses become exact lookups, anything else a domain lookup.
    pub fn classify(input: &str) -> Query {
        let input = input.trim();
        match input.parse::<IpAddr>() {
            Ok(_) => Query::Ip(input.to_string()),
            Err(_) => Query::Domain(input.to_string()),
        }
    }
}

/// Read-only queries against whatever database is currently published.
#[derive(Clone)]
pub struct Lookup {
    handle: Arc<SharedHandle>,
    max_results: usize,
    search_mode: SearchMode,
}

impl Lookup {
    pub fn new(handle: Arc<SharedHandle>, max_results: usize, search_mode: SearchMode) -> Self {
        Lookup { handle, max_results: max_results.max(1), search_mode }
    }

    pub async fn lookup(&self, query: Query) -> Result<Vec<IpRecord>, LookupError> {
        if let Query::Ip(ip) = &query {
            if is_ignored_ip(ip) {
                return Ok(Vec::new());
            }
        }
        if matches!(query, Query::Text(_)) && self.search_mode != SearchMode::FullText {
            return Err(LookupError::SearchDisabled);
        }
        let snapshot = self.handle.current().ok_or(LookupError::RefreshInProgress)?;
        let limit = self.max_results;
        tokio::task::spawn_blocking(move || {
            snapshot.with(|db| match &query {
                Query::Ip(ip) => db.lookup_ip(ip, limit),
                Query::Domain(domain) => db.lookup_domain(domain, limit),
                Query::Text(text) => db.search_text(text, limit),
            })
        })
        .await
        .map_err(|e| LookupError::Task(e.to_string()))?
        .map_err(LookupError::Query)
    }
}
