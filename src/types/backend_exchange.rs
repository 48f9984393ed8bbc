//! Outbound request and inbound response of one backend call.

use axum::http::{HeaderMap, Method, StatusCode};
use bytes::Bytes;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct BackendRequest {
  pub method: Method,
  /// Absolute URL, or a path (plus query) relative to the backend origin.
  pub url: String,
  pub headers: HeaderMap,
  pub body: Bytes,
}

impl BackendRequest {
  pub fn new(method: Method, url: impl Into<String>) -> Self {
    Self {
      method,
      url: url.into(),
      headers: HeaderMap::new(),
      body: Bytes::new(),
    }
  }

  /// Path component of [Self::url].
  pub fn path(&self) -> &str {
    split_url(&self.url).0
  }

  /// Raw query component of [Self::url], without the `?`.
  pub fn query(&self) -> Option<&str> {
    split_url(&self.url).1
  }
}

/// Splits a URL or path into its path and query components. The origin of an absolute URL is
/// skipped; an empty path reads as `/`.
pub(crate) fn split_url(url: &str) -> (&str, Option<&str>) {
  let rest = match url.find("://") {
    Some(i) => {
      let after = &url[i + 3..];
      match after.find(['/', '?']) {
        Some(j) => &after[j..],
        None => "",
      }
    }
    None => url,
  };
  let rest = rest.split('#').next().unwrap_or(rest);
  let (path, query) = match rest.split_once('?') {
    Some((p, q)) => (p, Some(q)),
    None => (rest, None),
  };
  (if path.is_empty() { "/" } else { path }, query)
}

#[derive(Debug, Clone)]
pub struct BackendResponse {
  pub status: StatusCode,
  pub headers: HeaderMap,
  pub body: Bytes,
}

impl BackendResponse {
  pub fn new(status: StatusCode) -> Self {
    Self {
      status,
      headers: HeaderMap::new(),
      body: Bytes::new(),
    }
  }

  pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
    self.body = body.into();
    self
  }

  /// Body parsed as JSON, when it is JSON.
  pub fn json_body(&self) -> Option<Value> {
    if self.body.is_empty() {
      return None;
    }
    serde_json::from_slice(&self.body).ok()
  }
}
