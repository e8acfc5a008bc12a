//! The replay engine: drains the outbox once a trigger fires.
//!
//! Passes are strictly serialized by a structural guard. A trigger that
//! arrives while a pass is running is coalesced into it and reports
//! [`SyncOutcome::Skipped`]; overlapping passes cannot exist, so
//! replay order cannot be violated by concurrent triggers.

use color_eyre::Result;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::events::{EventBus, WorkerEvent};
use crate::outbox::Outbox;

/// Replay attempts after which a record is dropped undelivered.
pub const MAX_RETRIES: u32 = 5;

/// How a replay pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
  /// The queue snapshot was processed to the end.
  Completed,
  /// A transport failure ended the pass early; the rest of the queue
  /// is untouched and keeps its order.
  Aborted,
  /// Another pass was already running; nothing happened.
  Skipped,
}

/// Counters for one replay pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
  pub outcome: SyncOutcome,
  /// Replayed with a 2xx and removed
  pub delivered: usize,
  /// Refused with a 4xx and removed; the server's verdict is final
  pub rejected: usize,
  /// Dropped at the retry cap without delivery
  pub expired: usize,
  /// Hit a retryable status; retry count bumped, still queued
  pub rescheduled: usize,
  /// Records left in the queue when the pass ended
  pub remaining: usize,
}

impl SyncReport {
  fn empty(outcome: SyncOutcome) -> Self {
    Self {
      outcome,
      delivered: 0,
      rejected: 0,
      expired: 0,
      rescheduled: 0,
      remaining: 0,
    }
  }
}

/// Drains the outbox, one pass at a time.
pub struct SyncEngine<B: Backend> {
  outbox: Arc<Outbox>,
  backend: Arc<B>,
  events: EventBus,
  /// Single-flight guard; holding it is what "a pass is running" means
  gate: Mutex<()>,
}

impl<B: Backend> SyncEngine<B> {
  pub fn new(outbox: Arc<Outbox>, backend: Arc<B>, events: EventBus) -> Self {
    Self {
      outbox,
      backend,
      events,
      gate: Mutex::new(()),
    }
  }

  /// One replay pass over the queue in id order.
  ///
  /// Records leave the queue only on delivery (2xx), rejection (4xx) or
  /// the retry cap; any other status bumps the retry count in place; a
  /// transport failure aborts the remainder of the pass. `SYNC_START`
  /// and `SYNC_COMPLETE` bracket the pass even when a storage error
  /// ends it early.
  pub async fn run_pass(&self) -> Result<SyncReport> {
    let _guard = match self.gate.try_lock() {
      Ok(guard) => guard,
      Err(_) => {
        debug!("Replay pass already running, trigger coalesced");
        return Ok(SyncReport::empty(SyncOutcome::Skipped));
      }
    };

    self.events.emit(WorkerEvent::SyncStart);
    let result = self.drain().await;
    self.events.emit(WorkerEvent::SyncComplete);

    match &result {
      Ok(report) => info!(
        outcome = ?report.outcome,
        delivered = report.delivered,
        rejected = report.rejected,
        expired = report.expired,
        rescheduled = report.rescheduled,
        remaining = report.remaining,
        "Replay pass finished"
      ),
      Err(e) => warn!(error = %e, "Replay pass ended on a storage failure"),
    }
    result
  }

  async fn drain(&self) -> Result<SyncReport> {
    let mut report = SyncReport::empty(SyncOutcome::Completed);

    for mutation in self.outbox.pending()? {
      if mutation.retry_count >= MAX_RETRIES {
        warn!(
          id = mutation.id,
          url = %mutation.url,
          retries = mutation.retry_count,
          "Dropping mutation at the retry cap"
        );
        self.outbox.remove(mutation.id)?;
        report.expired += 1;
        continue;
      }

      match self.backend.fetch(&mutation.to_request()).await {
        Ok(response) if response.is_success() => {
          debug!(id = mutation.id, url = %mutation.url, status = response.status, "Mutation delivered");
          self.outbox.remove(mutation.id)?;
          report.delivered += 1;
        }
        Ok(response) if response.is_client_error() => {
          warn!(id = mutation.id, url = %mutation.url, status = response.status, "Mutation rejected, dropping");
          self.outbox.remove(mutation.id)?;
          report.rejected += 1;
        }
        Ok(response) => {
          debug!(id = mutation.id, url = %mutation.url, status = response.status, "Retryable status, mutation kept");
          self.outbox.bump_retry(mutation.id)?;
          report.rescheduled += 1;
        }
        Err(e) => {
          warn!(id = mutation.id, url = %mutation.url, error = %e, "Network unreachable, aborting pass");
          report.outcome = SyncOutcome::Aborted;
          break;
        }
      }
    }

    report.remaining = self.outbox.len()?;
    Ok(report)
  }
}
