//! Sync lifecycle events and the client message API.
//!
//! Event delivery is one-way and fire-and-forget: the worker broadcasts
//! to every subscribed application instance and nobody acknowledges
//! anything. On the wire both directions use the tagged `{"type": ...}`
//! object the host client already speaks.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Broadcast by the worker to all subscribed clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerEvent {
  /// A replay pass has begun.
  SyncStart,
  /// The pass finished, whatever the outcome.
  SyncComplete,
}

/// Sent by a client to the worker.
///
/// Adding a variant here forces the worker's message handler to decide
/// what to do with it; unknown message types cannot exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
  /// Activate the installed generation immediately instead of waiting
  /// for the next restart.
  SkipWaiting,
  /// Run a replay pass now.
  ManualSync,
}

/// Broadcast ring capacity. Slow subscribers lag and drop old events;
/// the worker never waits on them.
const EVENT_CAPACITY: usize = 64;

/// Fan-out channel for worker events.
#[derive(Clone)]
pub struct EventBus {
  tx: broadcast::Sender<WorkerEvent>,
}

impl EventBus {
  pub fn new() -> Self {
    let (tx, _) = broadcast::channel(EVENT_CAPACITY);
    Self { tx }
  }

  /// Subscribe a new client. Events emitted before this call are not
  /// replayed.
  pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
    self.tx.subscribe()
  }

  /// Best-effort send; an empty subscriber list is not an error.
  pub fn emit(&self, event: WorkerEvent) {
    let _ = self.tx.send(event);
  }
}

impl Default for EventBus {
  fn default() -> Self {
    Self::new()
  }
}
