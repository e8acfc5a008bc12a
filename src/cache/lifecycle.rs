//! Cache generations: partition naming, precache on install, garbage
//! collection on activate.
//!
//! Every deploy carries a new generation identifier. A generation owns
//! exactly three partitions (static, dynamic, api) and activation
//! deletes every partition outside that namespace set, so storage used
//! by older deploys is reclaimed deterministically.

use color_eyre::{eyre::eyre, Result};
use futures::future;
use std::sync::Arc;
use tracing::{info, warn};

use super::store::PartitionStore;
use crate::backend::Backend;
use crate::types::Request;

/// Partition namespace prefix; every partition this engine owns starts
/// with it.
const PARTITION_PREFIX: &str = "cargohold";

/// The three partition roles a generation owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionKind {
  /// Immutable build assets and the precached shell
  Static,
  /// Pages, images, everything else
  Dynamic,
  /// API responses
  Api,
}

impl PartitionKind {
  pub fn as_str(self) -> &'static str {
    match self {
      PartitionKind::Static => "static",
      PartitionKind::Dynamic => "dynamic",
      PartitionKind::Api => "api",
    }
  }
}

/// What an activation removed.
#[derive(Debug, Clone, Default)]
pub struct ActivationReport {
  /// Partitions deleted because they were outside the activated
  /// generation's namespace set
  pub removed: Vec<String>,
}

/// Owns one generation's partitions and the install/activate protocol.
pub struct Lifecycle<S: PartitionStore> {
  store: Arc<S>,
  generation: String,
}

impl<S: PartitionStore> Lifecycle<S> {
  pub fn new(store: Arc<S>, generation: impl Into<String>) -> Self {
    Self {
      store,
      generation: generation.into(),
    }
  }

  pub fn generation(&self) -> &str {
    &self.generation
  }

  /// Full partition name for a role in this generation.
  pub fn partition(&self, kind: PartitionKind) -> String {
    format!("{}-{}-{}", PARTITION_PREFIX, kind.as_str(), self.generation)
  }

  /// The namespace set: every partition this generation owns.
  fn namespace(&self) -> [String; 3] {
    [
      self.partition(PartitionKind::Static),
      self.partition(PartitionKind::Dynamic),
      self.partition(PartitionKind::Api),
    ]
  }

  /// Precache the shell manifest into this generation's static
  /// partition.
  ///
  /// Fetches run concurrently and the whole install is fail-fast: one
  /// failed or non-2xx fetch aborts it and nothing is written, so a
  /// generation is never activated with a partial shell.
  pub async fn install<B: Backend>(&self, backend: &B, manifest: &[String]) -> Result<()> {
    let fetches = manifest.iter().map(|url| async move {
      let req = Request::get(url.clone());
      let response = backend
        .fetch(&req)
        .await
        .map_err(|e| eyre!("Precache fetch for {} failed: {}", url, e))?;
      if !response.is_success() {
        return Err(eyre!(
          "Precache fetch for {} returned {}",
          url,
          response.status
        ));
      }
      Ok((req, response))
    });

    let entries = future::try_join_all(fetches).await?;
    self
      .store
      .put_all(&self.partition(PartitionKind::Static), &entries)?;

    info!(
      generation = %self.generation,
      routes = entries.len(),
      "Precache installed"
    );
    Ok(())
  }

  /// Make this generation current and delete every partition outside
  /// its namespace set.
  pub fn activate(&self) -> Result<ActivationReport> {
    let namespace = self.namespace();
    let mut report = ActivationReport::default();

    for partition in self.store.partitions()? {
      if namespace.iter().any(|p| p == &partition) {
        continue;
      }
      let removed = self.store.drop_partition(&partition)?;
      warn!(
        partition = %partition,
        entries = removed,
        "Dropped stale cache partition"
      );
      report.removed.push(partition);
    }

    self.store.set_current_generation(&self.generation)?;
    info!(
      generation = %self.generation,
      removed = report.removed.len(),
      "Generation activated"
    );
    Ok(report)
  }

  /// Whether this generation is the one marked current.
  pub fn is_current(&self) -> Result<bool> {
    Ok(self.store.current_generation()?.as_deref() == Some(self.generation.as_str()))
  }
}
