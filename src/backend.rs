//! Backend transport.
//!
//! [Backend] is the seam between producers and the network: producers hand it a fully built
//! [BackendRequest] and get a [BackendResponse] or a transport [ProduceError] back.
//! [HttpBackend] is the reqwest implementation used by the server.

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::error::{ConfigError, ProduceError};
use crate::types::{BackendRequest, BackendResponse};

/// Executes outbound requests for producers.
#[async_trait]
pub trait Backend: Send + Sync {
  /// Name used in logs and transport errors.
  fn name(&self) -> &str;

  async fn execute(&self, request: BackendRequest) -> Result<BackendResponse, ProduceError>;
}

const fn default_timeout_ms() -> u64 {
  60_000
}

/// Connection settings of an HTTP backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
  /// Scheme and authority, e.g. `http://127.0.0.1:9000`.
  pub origin: String,
  /// Prefix for relative request paths.
  #[serde(default)]
  pub base_path: String,
  #[serde(default = "default_timeout_ms")]
  pub timeout_ms: u64,
  /// Headers sent with every request unless the request sets them itself.
  #[serde(default)]
  pub headers: BTreeMap<String, String>,
}

impl BackendConfig {
  pub fn new(origin: impl Into<String>) -> Self {
    Self {
      origin: origin.into(),
      base_path: String::new(),
      timeout_ms: default_timeout_ms(),
      headers: BTreeMap::new(),
    }
  }
}

/// reqwest-backed [Backend].
#[derive(Debug, Clone)]
pub struct HttpBackend {
  name: String,
  origin: String,
  base_path: String,
  timeout: Duration,
  headers: HeaderMap,
  client: reqwest::Client,
}

impl HttpBackend {
  pub fn new(name: impl Into<String>, config: &BackendConfig) -> Result<Self, ConfigError> {
    let name = name.into();
    let invalid = |message: String| ConfigError::InvalidBackend {
      name: name.clone(),
      message,
    };

    let origin = reqwest::Url::parse(&config.origin)
      .map_err(|e| invalid(format!("origin {:?}: {e}", config.origin)))?;
    if !matches!(origin.scheme(), "http" | "https") {
      return Err(invalid(format!("unsupported scheme {:?}", origin.scheme())));
    }

    let mut headers = HeaderMap::new();
    for (k, v) in &config.headers {
      let header_name =
        HeaderName::from_bytes(k.as_bytes()).map_err(|e| invalid(format!("header {k:?}: {e}")))?;
      let value = HeaderValue::from_str(v).map_err(|e| invalid(format!("header {k:?}: {e}")))?;
      headers.insert(header_name, value);
    }

    let timeout = Duration::from_millis(config.timeout_ms);
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .redirect(reqwest::redirect::Policy::none())
      .build()
      .map_err(|e| invalid(e.to_string()))?;

    let base_path = config.base_path.trim_matches('/');
    Ok(Self {
      origin: config.origin.trim_end_matches('/').to_string(),
      base_path: if base_path.is_empty() {
        String::new()
      } else {
        format!("/{base_path}")
      },
      name,
      timeout,
      headers,
      client,
    })
  }

  /// Absolute URLs are kept; paths are joined onto origin and base path.
  pub fn resolve_url(&self, url: &str) -> String {
    if url.contains("://") {
      return url.to_string();
    }
    let path = if url.is_empty() || url.starts_with('/') || url.starts_with('?') {
      url.to_string()
    } else {
      format!("/{url}")
    };
    format!("{}{}{}", self.origin, self.base_path, path)
  }

  fn transport(&self, message: impl Into<String>) -> ProduceError {
    ProduceError::Transport {
      backend: self.name.clone(),
      message: message.into(),
    }
  }
}

#[async_trait]
impl Backend for HttpBackend {
  fn name(&self) -> &str {
    &self.name
  }

  #[instrument(level = "debug", skip_all, fields(backend = %self.name, method = %request.method))]
  async fn execute(&self, request: BackendRequest) -> Result<BackendResponse, ProduceError> {
    let url = self.resolve_url(&request.url);
    let mut headers = request.headers;
    for (name, value) in &self.headers {
      if !headers.contains_key(name) {
        headers.insert(name.clone(), value.clone());
      }
    }

    let response = self
      .client
      .request(request.method, url.as_str())
      .headers(headers)
      .body(request.body)
      .send()
      .await
      .map_err(|e| {
        if e.is_timeout() {
          self.transport(format!("backend timeout after {}ms", self.timeout.as_millis()))
        } else {
          self.transport(e.to_string())
        }
      })?;

    let status = response.status();
    let headers = response.headers().clone();
    let body = response
      .bytes()
      .await
      .map_err(|e| self.transport(format!("reading body: {e}")))?;
    debug!(%url, status = status.as_u16(), bytes = body.len(), "backend response");

    Ok(BackendResponse {
      status,
      headers,
      body,
    })
  }
}
