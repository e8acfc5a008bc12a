//! Request and response model shared by the router, the strategies and
//! the replay engine.

/// What the requesting code intends to do with the response.
///
/// The host client attaches this when it routes a request through the
/// gateway; the router uses it to pick image and navigation handling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Destination {
  /// Top-level HTML navigation
  Document,
  /// Image element or CSS image
  Image,
  /// Script load
  Script,
  /// Stylesheet load
  Style,
  /// Anything else (fetch/XHR, fonts, workers, ...)
  #[default]
  Other,
}

/// A request routed through the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  /// HTTP method, uppercase
  pub method: String,
  /// Absolute URL
  pub url: String,
  /// Header name/value pairs in arrival order
  pub headers: Vec<(String, String)>,
  /// Body for write methods
  pub body: Option<Vec<u8>>,
  /// Destination hint used by the router
  pub destination: Destination,
}

impl Request {
  pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
    Self {
      method: method.into().to_uppercase(),
      url: url.into(),
      headers: Vec::new(),
      body: None,
      destination: Destination::Other,
    }
  }

  /// Shorthand for a GET request.
  pub fn get(url: impl Into<String>) -> Self {
    Self::new("GET", url)
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = Some(body.into());
    self
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn is_get(&self) -> bool {
    self.method.eq_ignore_ascii_case("GET")
  }

  /// First header value with the given name, case-insensitive.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// Whether the request negotiates for an HTML document.
  pub fn accepts_html(&self) -> bool {
    self
      .header("accept")
      .map(|v| v.contains("text/html"))
      .unwrap_or(false)
  }
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh from the network
  Network,
  /// Served out of a cache partition
  Cache,
  /// Synthetic fallback built by a strategy while offline
  Fallback,
}

/// A response as the gateway hands it back to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  /// Where the response came from
  pub source: ResponseSource,
}

impl Response {
  pub fn new(status: u16) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: Vec::new(),
      source: ResponseSource::Network,
    }
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = body.into();
    self
  }

  /// 2xx check; only successful responses are ever cached.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// 4xx check; a rejected replay is never retried.
  pub fn is_client_error(&self) -> bool {
    (400..500).contains(&self.status)
  }

  /// First header value with the given name, case-insensitive.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_method_is_uppercased() {
    let req = Request::new("post", "https://exchange.test/api/orders");
    assert_eq!(req.method, "POST");
    assert!(!req.is_get());
  }

  #[test]
  fn test_header_lookup_is_case_insensitive() {
    let req = Request::get("https://exchange.test/").with_header("Accept", "text/html");
    assert_eq!(req.header("accept"), Some("text/html"));
    assert_eq!(req.header("ACCEPT"), Some("text/html"));
    assert_eq!(req.header("content-type"), None);
  }

  #[test]
  fn test_accepts_html() {
    let nav = Request::get("https://exchange.test/orders")
      .with_header("accept", "text/html,application/xhtml+xml");
    assert!(nav.accepts_html());

    let api = Request::get("https://exchange.test/api/orders")
      .with_header("accept", "application/json");
    assert!(!api.accepts_html());

    let bare = Request::get("https://exchange.test/orders");
    assert!(!bare.accepts_html());
  }

  #[test]
  fn test_status_classification() {
    assert!(Response::new(200).is_success());
    assert!(Response::new(299).is_success());
    assert!(!Response::new(300).is_success());
    assert!(!Response::new(199).is_success());

    assert!(Response::new(404).is_client_error());
    assert!(Response::new(422).is_client_error());
    assert!(!Response::new(500).is_client_error());
    assert!(!Response::new(399).is_client_error());
  }
}
