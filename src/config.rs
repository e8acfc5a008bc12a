use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::router;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub service: ServiceConfig,
  pub cache: CacheConfig,
  #[serde(default)]
  pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
  /// Origin the exchange client talks to, e.g. "https://exchange.example.com"
  pub base_url: String,
  /// Path probed by the daemon's connectivity watcher
  #[serde(default = "default_health_path")]
  pub health_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Deploy identifier. Must change on every deploy; partitions of
  /// other generations are collected when this one activates.
  pub generation: String,
  /// Path prefix classified as API traffic
  #[serde(default = "default_api_prefix")]
  pub api_prefix: String,
  /// Path prefix classified as immutable build assets
  #[serde(default = "default_asset_prefix")]
  pub asset_prefix: String,
  /// Route of the precached offline fallback page
  #[serde(default = "default_offline_route")]
  pub offline_route: String,
  /// Shell routes and assets fetched into the static partition at
  /// install
  #[serde(default)]
  pub precache: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// Connectivity probe interval for the daemon, in seconds
  #[serde(default = "default_poll_interval")]
  pub poll_interval_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      poll_interval_secs: default_poll_interval(),
    }
  }
}

fn default_health_path() -> String {
  "/api/health".to_string()
}

fn default_api_prefix() -> String {
  router::DEFAULT_API_PREFIX.to_string()
}

fn default_asset_prefix() -> String {
  router::DEFAULT_ASSET_PREFIX.to_string()
}

fn default_offline_route() -> String {
  "/offline.html".to_string()
}

fn default_poll_interval() -> u64 {
  30
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./cargohold.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/cargohold/config.yaml
  /// 4. ~/.config/cargohold/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/cargohold/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("cargohold.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("cargohold").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Absolute URL for a configured route. Routes that are already
  /// absolute pass through unchanged.
  pub fn absolute_url(&self, route: &str) -> String {
    if route.starts_with("http://") || route.starts_with("https://") {
      return route.to_string();
    }
    format!(
      "{}/{}",
      self.service.base_url.trim_end_matches('/'),
      route.trim_start_matches('/')
    )
  }

  /// Probe URL for the connectivity watcher.
  pub fn health_url(&self) -> String {
    self.absolute_url(&self.service.health_path)
  }
}

/// Default data directory for the durable stores and logs.
pub fn default_data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|h| h.join(".local").join("share")))
    .ok_or_else(|| eyre!("Could not determine a data directory for this platform"))?;
  Ok(data_dir.join("cargohold"))
}
