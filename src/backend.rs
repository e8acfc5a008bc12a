//! The network seam.
//!
//! `Ok` carries any HTTP response, whatever the status; `Err` means the
//! request never produced one (connect failure, timeout, interrupted
//! body). The strategies and the replay engine both key off that split,
//! so implementations must never turn a non-2xx status into an error.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::time::Duration;

use crate::types::{Request, Response, ResponseSource};

/// Abstraction over the HTTP transport so strategies and replay can be
/// exercised against scripted outcomes in tests.
#[async_trait]
pub trait Backend: Send + Sync {
  async fn fetch(&self, req: &Request) -> Result<Response>;
}

/// Default timeout for outbound requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// reqwest-backed transport.
pub struct HttpBackend {
  client: reqwest::Client,
}

impl HttpBackend {
  pub fn new() -> Result<Self> {
    Self::with_timeout(REQUEST_TIMEOUT)
  }

  pub fn with_timeout(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!("cargohold/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;
    Ok(Self { client })
  }
}

#[async_trait]
impl Backend for HttpBackend {
  async fn fetch(&self, req: &Request) -> Result<Response> {
    let method = reqwest::Method::from_bytes(req.method.as_bytes())
      .map_err(|e| eyre!("Invalid HTTP method {}: {}", req.method, e))?;

    let mut builder = self.client.request(method, &req.url);
    for (name, value) in &req.headers {
      builder = builder.header(name, value);
    }
    if let Some(body) = &req.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", req.url, e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response body from {}: {}", req.url, e))?
      .to_vec();

    Ok(Response {
      status,
      headers,
      body,
      source: ResponseSource::Network,
    })
  }
}


#[cfg(test)]
mod tests {
  use super::testing::*;
  use super::*;

  #[tokio::test]
  async fn test_invalid_method_is_an_error() {
    let backend = HttpBackend::new().unwrap();
    // '@' is not a valid token character, so this fails before any I/O
    let req = Request::new("b@d", "http://localhost/x");
    assert!(backend.fetch(&req).await.is_err());
  }

  #[tokio::test]
  async fn test_fn_backend_scripts_outcomes() {
    let backend = FnBackend(|req: &Request| {
      if req.url.ends_with("/missing") {
        Ok(Response::new(404))
      } else {
        Ok(ok_response("hello"))
      }
    });

    let found = backend
      .fetch(&Request::get("https://exchange.test/here"))
      .await
      .unwrap();
    assert_eq!(found.status, 200);
    assert_eq!(found.body, b"hello");

    let missing = backend
      .fetch(&Request::get("https://exchange.test/missing"))
      .await
      .unwrap();
    assert_eq!(missing.status, 404);
  }
}
