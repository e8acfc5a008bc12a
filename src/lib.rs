//! Offline resilience engine for the freight-exchange web client.
//!
//! The engine sits between the client and the network. Reads are
//! served through four caching strategies over generation-versioned
//! partitions; writes that fail while offline land in a durable outbox
//! and are replayed in order once connectivity returns. The host
//! routes its HTTP through [`worker::Worker`]; everything else hangs
//! off that type.

pub mod backend;
pub mod cache;
pub mod config;
pub mod events;
pub mod outbox;
pub mod router;
pub mod sync;
pub mod types;
pub mod worker;

pub use backend::{Backend, HttpBackend};
pub use cache::{
  ActivationReport, Lifecycle, PartitionKind, PartitionStore, ResponseCache, SqliteStore, Strategy,
};
pub use config::Config;
pub use events::{ClientMessage, EventBus, WorkerEvent};
pub use outbox::{Outbox, QueuedMutation};
pub use router::{Route, Router};
pub use sync::{SyncEngine, SyncOutcome, SyncReport, MAX_RETRIES};
pub use types::{Destination, Request, Response, ResponseSource};
pub use worker::Worker;
