use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cargohold::backend::{Backend, HttpBackend};
use cargohold::cache::SqliteStore;
use cargohold::config::{self, Config};
use cargohold::outbox::Outbox;
use cargohold::types::Request;
use cargohold::worker::Worker;

#[derive(Parser, Debug)]
#[command(name = "cargohold")]
#[command(about = "Offline resilience worker for the freight exchange client")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/cargohold/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Data directory for the durable stores (default: platform data dir)
  #[arg(long)]
  data_dir: Option<PathBuf>,

  /// Run one replay pass over the outbox and exit
  #[arg(long)]
  sync_once: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;

  let data_dir = match args.data_dir {
    Some(dir) => dir,
    None => config::default_data_dir()?,
  };
  let _log_guard = init_tracing(&data_dir)?;

  let store = Arc::new(SqliteStore::open_at(&data_dir.join("cache.db"))?);
  let outbox = Arc::new(Outbox::open_at(&data_dir.join("outbox.db"))?);
  let backend = Arc::new(HttpBackend::new()?);
  let worker = Worker::new(&config, store, outbox, Arc::clone(&backend));

  if args.sync_once {
    let report = worker.sync_now().await?;
    println!(
      "{:?}: {} delivered, {} rejected, {} expired, {} rescheduled, {} remaining",
      report.outcome,
      report.delivered,
      report.rejected,
      report.expired,
      report.rescheduled,
      report.remaining
    );
    return Ok(());
  }

  let report = worker.start().await?;
  info!(
    generation = %worker.generation(),
    removed = report.removed.len(),
    "Worker installed and active"
  );

  run(worker, backend, &config).await
}

/// Watch connectivity and drain the outbox when it returns or while
/// writes are still pending.
async fn run(
  worker: Worker<SqliteStore, HttpBackend>,
  backend: Arc<HttpBackend>,
  config: &Config,
) -> Result<()> {
  let probe = Request::get(config.health_url());
  let mut online = false;
  let mut ticker = tokio::time::interval(Duration::from_secs(config.sync.poll_interval_secs));

  loop {
    tokio::select! {
      _ = ticker.tick() => {
        let now_online = matches!(backend.fetch(&probe).await, Ok(ref r) if r.is_success());

        if now_online {
          let came_online = !online;
          let pending = match worker.pending_count() {
            Ok(pending) => pending,
            Err(e) => {
              warn!(error = %e, "Failed to read outbox depth");
              0
            }
          };
          if came_online || pending > 0 {
            if came_online {
              info!(pending, "Back online, draining outbox");
            }
            if let Err(e) = worker.sync_now().await {
              warn!(error = %e, "Replay pass failed");
            }
          }
        } else if online {
          warn!("Connection lost, queueing writes until it returns");
        }

        online = now_online;
      }
      _ = tokio::signal::ctrl_c() => {
        info!("Shutting down");
        break;
      }
    }
  }

  Ok(())
}

/// File logging under the data directory; the guard must stay alive
/// for the life of the process.
fn init_tracing(data_dir: &Path) -> Result<tracing_appender::non_blocking::WorkerGuard> {
  let log_dir = data_dir.join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory: {}", e))?;

  let file_appender = tracing_appender::rolling::daily(log_dir, "cargohold.log");
  let (writer, guard) = tracing_appender::non_blocking(file_appender);

  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_env("CARGOHOLD_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
    )
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}
