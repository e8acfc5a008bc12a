//! Generation-versioned response caching.
//!
//! Three partitions per generation (static, dynamic, api), rotated
//! wholesale on deploy, with four serving strategies over them. Only
//! 2xx responses are ever written.

mod lifecycle;
mod store;
mod strategy;

pub use lifecycle::{ActivationReport, Lifecycle, PartitionKind};
pub use store::{PartitionStore, SqliteStore};
pub use strategy::{
  offline_json_response, offline_page_response, offline_response, ResponseCache, Strategy,
};
