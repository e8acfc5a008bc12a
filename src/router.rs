//! Request classification: which strategy serves which request.

use url::Url;

use crate::cache::{PartitionKind, Strategy};
use crate::types::{Destination, Request};

pub const DEFAULT_API_PREFIX: &str = "/api/";
pub const DEFAULT_ASSET_PREFIX: &str = "/_next/static/";

/// Routing decision for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Not ours: forwarded verbatim, never cached.
  Bypass,
  /// Served under a strategy out of a partition.
  Cached {
    strategy: Strategy,
    partition: PartitionKind,
  },
}

/// Classifies requests by path prefix, destination and Accept header.
///
/// Only GET requests over http(s) are ever cached; everything else
/// bypasses the cache layer entirely.
#[derive(Debug, Clone)]
pub struct Router {
  api_prefix: String,
  asset_prefix: String,
}

impl Router {
  pub fn new(api_prefix: impl Into<String>, asset_prefix: impl Into<String>) -> Self {
    Self {
      api_prefix: api_prefix.into(),
      asset_prefix: asset_prefix.into(),
    }
  }

  /// Classification in priority order: API, build assets, images,
  /// navigations, everything else.
  pub fn classify(&self, req: &Request) -> Route {
    if !req.is_get() {
      return Route::Bypass;
    }
    let url = match Url::parse(&req.url) {
      Ok(url) => url,
      Err(_) => return Route::Bypass,
    };
    if url.scheme() != "http" && url.scheme() != "https" {
      return Route::Bypass;
    }

    let path = url.path();

    if path.starts_with(&self.api_prefix) {
      return Route::Cached {
        strategy: Strategy::NetworkFirst,
        partition: PartitionKind::Api,
      };
    }
    if path.starts_with(&self.asset_prefix) {
      return Route::Cached {
        strategy: Strategy::CacheFirst,
        partition: PartitionKind::Static,
      };
    }
    if req.destination == Destination::Image {
      return Route::Cached {
        strategy: Strategy::CacheFirst,
        partition: PartitionKind::Dynamic,
      };
    }
    if req.destination == Destination::Document || req.accepts_html() {
      return Route::Cached {
        strategy: Strategy::NetworkFirstOrOffline,
        partition: PartitionKind::Dynamic,
      };
    }

    Route::Cached {
      strategy: Strategy::StaleWhileRevalidate,
      partition: PartitionKind::Dynamic,
    }
  }
}

impl Default for Router {
  fn default() -> Self {
    Self::new(DEFAULT_API_PREFIX, DEFAULT_ASSET_PREFIX)
  }
}
