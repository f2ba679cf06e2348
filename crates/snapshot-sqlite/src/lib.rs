mod batch;
mod domain;
mod insert;
mod models;
mod open;
mod query;
mod reformat;
mod schema;
mod search;

pub use batch::{search_batch, Accepted, BatchLimits, ChunkPlanner, Probe};
pub use domain::{primary_domain, split_hostnames};
pub use models::*;
pub use open::Db;
pub use reformat::reformat;
pub use search::apply_search_mode;
