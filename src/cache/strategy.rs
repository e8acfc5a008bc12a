//! The four response-serving strategies.
//!
//! Every strategy takes the partition to serve from, the request, and a
//! closure performing the actual network fetch. Two rules hold across
//! all of them: only 2xx responses are ever written back to a
//! partition, and a transport failure is recovered locally with a
//! fallback instead of surfacing as an error. Non-2xx statuses are a
//! server answer, not a failure, and pass through uncached.

use color_eyre::Result;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use super::store::PartitionStore;
use crate::types::{Request, Response, ResponseSource};

/// Strategy selection, decided by the router per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Cached entry wins; network only fills misses.
  CacheFirst,
  /// Network wins; cache covers transport failure.
  NetworkFirst,
  /// NetworkFirst whose last resort is the precached offline page.
  NetworkFirstOrOffline,
  /// Serve stale immediately, refresh in the background.
  StaleWhileRevalidate,
}

/// Serves responses out of cache partitions under the four strategies.
pub struct ResponseCache<S: PartitionStore> {
  store: Arc<S>,
}

impl<S: PartitionStore + 'static> ResponseCache<S> {
  pub fn new(store: Arc<S>) -> Self {
    Self { store }
  }

  /// Cache-first: return the cached entry if present, otherwise fetch,
  /// store on 2xx and return the network response. Transport failure
  /// with nothing cached yields the synthetic offline response.
  pub async fn cache_first<F, Fut>(
    &self,
    partition: &str,
    req: &Request,
    fetch: F,
  ) -> Result<Response>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response>>,
  {
    if let Some(cached) = self.store.get(partition, req)? {
      debug!(url = %req.url, partition = %partition, "Cache hit");
      return Ok(cached);
    }

    match fetch().await {
      Ok(response) => {
        if response.is_success() {
          self.store.put(partition, req, &response)?;
        }
        Ok(response)
      }
      Err(e) => {
        debug!(url = %req.url, error = %e, "Offline with no cached entry");
        Ok(offline_response())
      }
    }
  }

  /// Network-first: fetch, store on 2xx and return whatever the server
  /// said; on transport failure fall back to the cached entry, else a
  /// synthetic 503 with a JSON body.
  pub async fn network_first<F, Fut>(
    &self,
    partition: &str,
    req: &Request,
    fetch: F,
  ) -> Result<Response>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response>>,
  {
    match fetch().await {
      Ok(response) => {
        if response.is_success() {
          self.store.put(partition, req, &response)?;
        }
        Ok(response)
      }
      Err(e) => {
        debug!(url = %req.url, error = %e, "Network failed, trying cache");
        match self.store.get(partition, req)? {
          Some(cached) => Ok(cached),
          None => Ok(offline_json_response()),
        }
      }
    }
  }

  /// Network-first for navigations: after the cached copy, the final
  /// fallback is the precached offline page out of the static
  /// partition, so the user always gets a page instead of an error.
  pub async fn network_first_or_offline<F, Fut>(
    &self,
    partition: &str,
    req: &Request,
    static_partition: &str,
    offline_page: &Request,
    fetch: F,
  ) -> Result<Response>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response>>,
  {
    match fetch().await {
      Ok(response) => {
        if response.is_success() {
          self.store.put(partition, req, &response)?;
        }
        Ok(response)
      }
      Err(e) => {
        debug!(url = %req.url, error = %e, "Navigation failed, falling back");
        if let Some(cached) = self.store.get(partition, req)? {
          return Ok(cached);
        }
        match self.store.get(static_partition, offline_page)? {
          Some(mut page) => {
            page.source = ResponseSource::Fallback;
            Ok(page)
          }
          None => Ok(offline_page_response()),
        }
      }
    }
  }

  /// Stale-while-revalidate: return the cached entry immediately and
  /// refresh the partition in the background for next time; with no
  /// cached entry the caller waits on the network like cache-first.
  pub async fn stale_while_revalidate<F, Fut>(
    &self,
    partition: &str,
    req: &Request,
    fetch: F,
  ) -> Result<Response>
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Response>> + Send,
  {
    if let Some(cached) = self.store.get(partition, req)? {
      debug!(url = %req.url, partition = %partition, "Serving stale, revalidating");
      self.spawn_revalidate(partition.to_string(), req.clone(), fetch);
      return Ok(cached);
    }

    match fetch().await {
      Ok(response) => {
        if response.is_success() {
          self.store.put(partition, req, &response)?;
        }
        Ok(response)
      }
      Err(e) => {
        debug!(url = %req.url, error = %e, "Offline with no cached entry");
        Ok(offline_response())
      }
    }
  }

  /// Background refresh for stale-while-revalidate. Outcomes only ever
  /// touch the partition; the already-served response is not affected.
  fn spawn_revalidate<F, Fut>(&self, partition: String, req: Request, fetch: F)
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Response>> + Send,
  {
    let store = Arc::clone(&self.store);
    tokio::spawn(async move {
      match fetch().await {
        Ok(response) if response.is_success() => {
          if let Err(e) = store.put(&partition, &req, &response) {
            debug!(url = %req.url, error = %e, "Failed to store revalidated response");
          }
        }
        Ok(response) => {
          debug!(url = %req.url, status = response.status, "Revalidation got non-success, keeping stale entry");
        }
        Err(e) => {
          debug!(url = %req.url, error = %e, "Revalidation failed, keeping stale entry");
        }
      }
    });
  }
}

/// Synthetic 503 returned when nothing can serve the request.
pub fn offline_response() -> Response {
  let mut response = Response::new(503)
    .with_header("content-type", "text/plain")
    .with_body(&b"Offline"[..]);
  response.source = ResponseSource::Fallback;
  response
}

/// Synthetic 503 with a JSON body, for API-shaped requests.
pub fn offline_json_response() -> Response {
  let mut response = Response::new(503)
    .with_header("content-type", "application/json")
    .with_body(&br#"{"error":"offline","message":"No network connection and no cached copy"}"#[..]);
  response.source = ResponseSource::Fallback;
  response
}

/// Minimal offline page used when even the precached one is missing.
pub fn offline_page_response() -> Response {
  let mut response = Response::new(503)
    .with_header("content-type", "text/html; charset=utf-8")
    .with_body(&b"<!doctype html><title>Offline</title><h1>You are offline</h1>"[..]);
  response.source = ResponseSource::Fallback;
  response
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::testing::ok_response;
  use crate::cache::store::SqliteStore;
  use color_eyre::eyre::eyre;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;

  fn cache() -> ResponseCache<SqliteStore> {
    ResponseCache::new(Arc::new(SqliteStore::in_memory().unwrap()))
  }

  fn req() -> Request {
    Request::get("https://exchange.test/api/orders")
  }

  #[tokio::test]
  async fn test_cache_first_fills_miss_then_serves_hit() {
    let cache = cache();
    let calls = Arc::new(AtomicUsize::new(0));

    let counted = Arc::clone(&calls);
    let first = cache
      .cache_first("p", &req(), move || async move {
        counted.fetch_add(1, Ordering::SeqCst);
        Ok(ok_response("fresh"))
      })
      .await
      .unwrap();
    assert_eq!(first.source, ResponseSource::Network);
    assert_eq!(first.body, b"fresh");

    let counted = Arc::clone(&calls);
    let second = cache
      .cache_first("p", &req(), move || async move {
        counted.fetch_add(1, Ordering::SeqCst);
        Ok(ok_response("newer"))
      })
      .await
      .unwrap();
    assert_eq!(second.source, ResponseSource::Cache);
    assert_eq!(second.body, b"fresh");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_cache_first_does_not_store_non_success() {
    let cache = cache();

    let result = cache
      .cache_first("p", &req(), || async { Ok(Response::new(404)) })
      .await
      .unwrap();
    assert_eq!(result.status, 404);

    // the 404 was not cached, so the next call hits the network again
    let retried = cache
      .cache_first("p", &req(), || async { Ok(ok_response("recovered")) })
      .await
      .unwrap();
    assert_eq!(retried.source, ResponseSource::Network);
    assert_eq!(retried.body, b"recovered");
  }

  #[tokio::test]
  async fn test_cache_first_offline_miss_yields_synthetic_503() {
    let cache = cache();
    let result = cache
      .cache_first("p", &req(), || async { Err(eyre!("connection refused")) })
      .await
      .unwrap();

    assert_eq!(result.status, 503);
    assert_eq!(result.source, ResponseSource::Fallback);
    assert_eq!(result.body, b"Offline");
  }

  #[tokio::test]
  async fn test_network_first_prefers_fresh_response() {
    let cache = cache();
    cache
      .network_first("p", &req(), || async { Ok(ok_response("v1")) })
      .await
      .unwrap();

    let fresh = cache
      .network_first("p", &req(), || async { Ok(ok_response("v2")) })
      .await
      .unwrap();
    assert_eq!(fresh.source, ResponseSource::Network);
    assert_eq!(fresh.body, b"v2");
  }

  #[tokio::test]
  async fn test_network_first_falls_back_to_cache_on_transport_failure() {
    let cache = cache();
    cache
      .network_first("p", &req(), || async { Ok(ok_response("v1")) })
      .await
      .unwrap();

    let fallback = cache
      .network_first("p", &req(), || async { Err(eyre!("timed out")) })
      .await
      .unwrap();
    assert_eq!(fallback.source, ResponseSource::Cache);
    assert_eq!(fallback.body, b"v1");
  }

  #[tokio::test]
  async fn test_network_first_passes_server_errors_through() {
    let cache = cache();
    cache
      .network_first("p", &req(), || async { Ok(ok_response("v1")) })
      .await
      .unwrap();

    // a 500 is a server answer, not a transport failure: no fallback
    let result = cache
      .network_first("p", &req(), || async { Ok(Response::new(500)) })
      .await
      .unwrap();
    assert_eq!(result.status, 500);
    assert_eq!(result.source, ResponseSource::Network);

    // and the cached copy was not overwritten by it
    let cached = cache
      .network_first("p", &req(), || async { Err(eyre!("down")) })
      .await
      .unwrap();
    assert_eq!(cached.body, b"v1");
  }

  #[tokio::test]
  async fn test_network_first_offline_miss_yields_json_503() {
    let cache = cache();
    let result = cache
      .network_first("p", &req(), || async { Err(eyre!("down")) })
      .await
      .unwrap();

    assert_eq!(result.status, 503);
    assert_eq!(result.source, ResponseSource::Fallback);
    assert_eq!(result.header("content-type"), Some("application/json"));
  }

  #[tokio::test]
  async fn test_navigation_fallback_chain() {
    let cache = cache();
    let nav = Request::get("https://exchange.test/tenders/42");
    let offline_page = Request::get("https://exchange.test/offline.html");

    // nothing cached at all: synthetic page
    let synthetic = cache
      .network_first_or_offline("dyn", &nav, "static", &offline_page, || async {
        Err(eyre!("down"))
      })
      .await
      .unwrap();
    assert_eq!(synthetic.status, 503);
    assert!(String::from_utf8_lossy(&synthetic.body).contains("offline"));

    // precached offline page: served with fallback provenance
    cache
      .store
      .put("static", &offline_page, &ok_response("offline shell"))
      .unwrap();
    let page = cache
      .network_first_or_offline("dyn", &nav, "static", &offline_page, || async {
        Err(eyre!("down"))
      })
      .await
      .unwrap();
    assert_eq!(page.body, b"offline shell");
    assert_eq!(page.source, ResponseSource::Fallback);

    // cached copy of the page itself beats the offline page
    cache
      .store
      .put("dyn", &nav, &ok_response("tender 42"))
      .unwrap();
    let cached = cache
      .network_first_or_offline("dyn", &nav, "static", &offline_page, || async {
        Err(eyre!("down"))
      })
      .await
      .unwrap();
    assert_eq!(cached.body, b"tender 42");
    assert_eq!(cached.source, ResponseSource::Cache);
  }

  #[tokio::test]
  async fn test_navigation_strategy_never_stores_non_success() {
    let cache = cache();
    let nav = Request::get("https://exchange.test/tenders/7");
    let offline_page = Request::get("https://exchange.test/offline.html");

    let result = cache
      .network_first_or_offline("dyn", &nav, "static", &offline_page, || async {
        Ok(Response::new(500))
      })
      .await
      .unwrap();
    assert_eq!(result.status, 500);
    assert!(cache.store.get("dyn", &nav).unwrap().is_none());

    // offline afterwards: nothing was cached, so the synthetic page answers
    let fallback = cache
      .network_first_or_offline("dyn", &nav, "static", &offline_page, || async {
        Err(eyre!("down"))
      })
      .await
      .unwrap();
    assert_eq!(fallback.status, 503);
    assert_eq!(fallback.source, ResponseSource::Fallback);
  }

  #[tokio::test]
  async fn test_swr_miss_does_not_store_non_success() {
    let cache = cache();
    let result = cache
      .stale_while_revalidate("p", &req(), || async { Ok(Response::new(404)) })
      .await
      .unwrap();

    assert_eq!(result.status, 404);
    assert!(cache.store.get("p", &req()).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_swr_serves_stale_and_refreshes_in_background() {
    let cache = cache();
    cache
      .stale_while_revalidate("p", &req(), || async { Ok(ok_response("v1")) })
      .await
      .unwrap();

    let stale = cache
      .stale_while_revalidate("p", &req(), || async { Ok(ok_response("v2")) })
      .await
      .unwrap();
    assert_eq!(stale.source, ResponseSource::Cache);
    assert_eq!(stale.body, b"v1");

    // let the spawned refresh run
    tokio::time::sleep(Duration::from_millis(20)).await;

    let refreshed = cache.store.get("p", &req()).unwrap().unwrap();
    assert_eq!(refreshed.body, b"v2");
  }

  #[tokio::test]
  async fn test_swr_refresh_failure_keeps_stale_entry() {
    let cache = cache();
    cache
      .stale_while_revalidate("p", &req(), || async { Ok(ok_response("v1")) })
      .await
      .unwrap();

    cache
      .stale_while_revalidate("p", &req(), || async { Ok(Response::new(502)) })
      .await
      .unwrap();
    cache
      .stale_while_revalidate("p", &req(), || async { Err(eyre!("down")) })
      .await
      .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let kept = cache.store.get("p", &req()).unwrap().unwrap();
    assert_eq!(kept.body, b"v1");
  }

  #[tokio::test]
  async fn test_swr_miss_waits_on_network() {
    let cache = cache();
    let result = cache
      .stale_while_revalidate("p", &req(), || async { Ok(ok_response("first")) })
      .await
      .unwrap();
    assert_eq!(result.source, ResponseSource::Network);

    let offline = cache
      .stale_while_revalidate("q", &req(), || async { Err(eyre!("down")) })
      .await
      .unwrap();
    assert_eq!(offline.status, 503);
    assert_eq!(offline.source, ResponseSource::Fallback);
  }
}
