//! The worker: composition root for interception, lifecycle, replay
//! and client messaging.

use color_eyre::Result;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

use crate::backend::Backend;
use crate::cache::{
  ActivationReport, Lifecycle, PartitionKind, PartitionStore, ResponseCache, Strategy,
};
use crate::config::Config;
use crate::events::{ClientMessage, EventBus, WorkerEvent};
use crate::outbox::Outbox;
use crate::router::{Route, Router};
use crate::sync::{SyncEngine, SyncReport};
use crate::types::{Request, Response};

/// The offline gateway.
///
/// Every request the host client makes goes through [`Worker::handle`];
/// writes that failed on the network come back in through
/// [`Worker::enqueue`] and are replayed by [`Worker::sync_now`].
pub struct Worker<S: PartitionStore + 'static, B: Backend + 'static> {
  router: Router,
  cache: ResponseCache<S>,
  lifecycle: Lifecycle<S>,
  outbox: Arc<Outbox>,
  sync: SyncEngine<B>,
  backend: Arc<B>,
  events: EventBus,
  /// Precache manifest, absolutized against the service base URL
  precache: Vec<String>,
  /// Absolute URL of the precached offline fallback page
  offline_page: String,
}

impl<S: PartitionStore + 'static, B: Backend + 'static> Worker<S, B> {
  pub fn new(config: &Config, store: Arc<S>, outbox: Arc<Outbox>, backend: Arc<B>) -> Self {
    let events = EventBus::new();
    Self {
      router: Router::new(
        config.cache.api_prefix.clone(),
        config.cache.asset_prefix.clone(),
      ),
      cache: ResponseCache::new(Arc::clone(&store)),
      lifecycle: Lifecycle::new(store, config.cache.generation.clone()),
      sync: SyncEngine::new(Arc::clone(&outbox), Arc::clone(&backend), events.clone()),
      outbox,
      backend,
      events,
      precache: config
        .cache
        .precache
        .iter()
        .map(|route| config.absolute_url(route))
        .collect(),
      offline_page: config.absolute_url(&config.cache.offline_route),
    }
  }

  /// Install this generation's precache and make it current. The usual
  /// startup call; installs that fail leave the previous generation
  /// active and untouched.
  pub async fn start(&self) -> Result<ActivationReport> {
    self.install().await?;
    self.activate()
  }

  /// Precache the shell into this generation's static partition.
  pub async fn install(&self) -> Result<()> {
    self
      .lifecycle
      .install(self.backend.as_ref(), &self.precache)
      .await
  }

  /// Make this generation current, dropping every stale partition.
  pub fn activate(&self) -> Result<ActivationReport> {
    self.lifecycle.activate()
  }

  /// Whether this worker's generation is the active one.
  pub fn is_current(&self) -> Result<bool> {
    self.lifecycle.is_current()
  }

  pub fn generation(&self) -> &str {
    self.lifecycle.generation()
  }

  /// Serve one request through the strategy router.
  ///
  /// Bypassed requests are forwarded verbatim; their transport failures
  /// propagate so the host can decide to [`Worker::enqueue`] them.
  pub async fn handle(&self, req: Request) -> Result<Response> {
    let route = self.router.classify(&req);
    let Route::Cached {
      strategy,
      partition,
    } = route
    else {
      return self.backend.fetch(&req).await;
    };

    let partition = self.lifecycle.partition(partition);
    let backend = Arc::clone(&self.backend);
    let outbound = req.clone();
    let fetch = move || async move { backend.fetch(&outbound).await };

    match strategy {
      Strategy::CacheFirst => self.cache.cache_first(&partition, &req, fetch).await,
      Strategy::NetworkFirst => self.cache.network_first(&partition, &req, fetch).await,
      Strategy::NetworkFirstOrOffline => {
        let static_partition = self.lifecycle.partition(PartitionKind::Static);
        let offline_page = Request::get(self.offline_page.clone());
        self
          .cache
          .network_first_or_offline(&partition, &req, &static_partition, &offline_page, fetch)
          .await
      }
      Strategy::StaleWhileRevalidate => {
        self
          .cache
          .stale_while_revalidate(&partition, &req, fetch)
          .await
      }
    }
  }

  /// Handle a client message. The match is exhaustive on purpose:
  /// adding a message type forces a decision here.
  pub async fn handle_message(&self, msg: ClientMessage) -> Result<Option<SyncReport>> {
    match msg {
      ClientMessage::SkipWaiting => {
        info!(generation = %self.generation(), "Skip-waiting requested, activating now");
        self.activate()?;
        Ok(None)
      }
      ClientMessage::ManualSync => {
        info!("Manual sync requested");
        let report = self.sync.run_pass().await?;
        Ok(Some(report))
      }
    }
  }

  /// Record a write whose network attempt failed, for later replay.
  pub fn enqueue(&self, req: &Request) -> Result<i64> {
    self.outbox.enqueue(req)
  }

  /// Queue depth, for the host's pending-requests indicator.
  pub fn pending_count(&self) -> Result<usize> {
    self.outbox.len()
  }

  /// Run a replay pass now (reconnect or scheduled trigger).
  pub async fn sync_now(&self) -> Result<SyncReport> {
    self.sync.run_pass().await
  }

  /// Subscribe to sync lifecycle events.
  pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
    self.events.subscribe()
  }
}
