use crate::batch::BatchLimits;
use internetdb_core::ReclaimMode;
use serde::Serialize;

pub type IpId = i64;
pub type DomainId = i64;

/// One row of `ips`. List-valued columns are stored and returned as
/// comma separated text, exactly as shipped upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IpRecord {
    pub ip: String,
    pub ports: Option<String>,
    pub tags: Option<String>,
    pub cpes: Option<String>,
    pub vulns: Option<String>,
    pub hostnames: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ReformatOptions {
    pub limits: BatchLimits,
    /// Space reclamation after the final indexes; `None` skips it.
    pub reclaim: Option<ReclaimMode>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReformatStats {
    pub ips: u64,
    pub copied_from_flat: bool,
    pub chunks: u64,
    pub rejected_chunks: u64,
    pub domains: u64,
    pub edges: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReformatOutcome {
    AlreadyDone,
    Completed(ReformatStats),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecordCounts {
    pub ips: u64,
    pub domains: u64,
    pub edges: u64,
}
