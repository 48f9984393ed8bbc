//! Inbound client request and the response served for it.

use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use bytes::Bytes;
use serde_json::Value;

use super::BackendResponse;

#[derive(Debug, Clone)]
pub struct ClientRequest {
  id: String,
  method: Method,
  uri: Uri,
  headers: HeaderMap,
  body: Bytes,
}

impl ClientRequest {
  /// New request with a fresh v4 request id.
  pub fn new(method: Method, uri: Uri) -> Self {
    Self::from_parts(method, uri, HeaderMap::new(), Bytes::new())
  }

  pub fn from_parts(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Self {
    Self {
      id: uuid::Uuid::new_v4().to_string(),
      method,
      uri,
      headers,
      body,
    }
  }

  /// Adds a header; invalid names or values are skipped.
  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    match (
      HeaderName::from_bytes(name.as_bytes()),
      HeaderValue::from_str(value),
    ) {
      (Ok(name), Ok(value)) => {
        self.headers.append(name, value);
      }
      _ => tracing::warn!(header = %name, "skipping invalid client request header"),
    }
    self
  }

  pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
    self.body = body.into();
    self
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn method(&self) -> &Method {
    &self.method
  }

  pub fn uri(&self) -> &Uri {
    &self.uri
  }

  pub fn path(&self) -> &str {
    self.uri.path()
  }

  pub fn query(&self) -> Option<&str> {
    self.uri.query()
  }

  /// Path plus `?query` when present.
  pub fn path_and_query(&self) -> &str {
    self
      .uri
      .path_and_query()
      .map(|pq| pq.as_str())
      .unwrap_or("/")
  }

  pub fn headers(&self) -> &HeaderMap {
    &self.headers
  }

  pub fn headers_mut(&mut self) -> &mut HeaderMap {
    &mut self.headers
  }

  pub fn body(&self) -> &Bytes {
    &self.body
  }

  pub(crate) fn set_uri(&mut self, uri: Uri) {
    self.uri = uri;
  }

  pub(crate) fn set_body(&mut self, body: Bytes) {
    self.body = body;
  }

  pub fn json_body(&self) -> Option<Value> {
    if self.body.is_empty() {
      return None;
    }
    serde_json::from_slice(&self.body).ok()
  }
}

/// Response served to the client.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientResponse {
  pub status: StatusCode,
  pub headers: HeaderMap,
  pub body: Bytes,
}

impl ClientResponse {
  pub fn new(status: StatusCode) -> Self {
    Self {
      status,
      headers: HeaderMap::new(),
      body: Bytes::new(),
    }
  }

  pub fn content_type(&self) -> Option<&str> {
    self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
  }

  pub fn json_body(&self) -> Option<Value> {
    serde_json::from_slice(&self.body).ok()
  }
}

impl From<&BackendResponse> for ClientResponse {
  fn from(response: &BackendResponse) -> Self {
    Self {
      status: response.status,
      headers: response.headers.clone(),
      body: response.body.clone(),
    }
  }
}
