//! JSON gateway configuration.
//!
//! ```json
//! {
//!   "backends": { "api": { "origin": "http://127.0.0.1:9000" } },
//!   "endpoints": [{
//!     "pattern": "/users/:id",
//!     "requests": [
//!       { "name": "user", "backend": "api", "url": "/users/${request.path}" },
//!       { "backend": "api", "url": "/profiles", "json_body": "${backend_responses.user.json_body}" }
//!     ]
//!   }]
//! }
//! ```
//!
//! Attribute values are JSON; strings may contain `${...}` interpolations. Proxies are declared
//! before requests when an endpoint is compiled. Endpoint-level `path` and request header,
//! query and form operations rewrite the inbound request before any producer sees it.

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::{info, instrument};

use crate::backend::{Backend, BackendConfig, HttpBackend};
use crate::compiler::GraphBuilder;
use crate::endpoint::{
  DEFAULT_BODY_LIMIT, EndpointDriver, EndpointOptions, RedirectSpec, RequestModifiers,
  ResponseModifiers, ResponseSpec,
};
use crate::error::ConfigError;
use crate::types::{Attributes, Expression, ProducerKind, ProducerSpec};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
  #[serde(default)]
  pub backends: BTreeMap<String, BackendConfig>,
  #[serde(default)]
  pub endpoints: Vec<EndpointConfig>,
}

/// A named backend or an inline backend definition.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BackendRef {
  Named(String),
  Inline(BackendConfig),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointConfig {
  pub pattern: String,
  /// Human size such as `"64MiB"`, `"1KB"` or plain bytes.
  #[serde(default)]
  pub request_body_limit: Option<String>,
  #[serde(default)]
  pub proxies: Vec<ProducerConfig>,
  #[serde(default)]
  pub requests: Vec<ProducerConfig>,
  #[serde(default)]
  pub response: Option<ResponseConfig>,
  #[serde(default)]
  pub redirect: Option<RedirectConfig>,
  /// Rewrites the inbound request path before any producer runs.
  #[serde(default)]
  pub path: Option<Value>,
  #[serde(default)]
  pub set_request_headers: Option<Value>,
  #[serde(default)]
  pub add_request_headers: Option<Value>,
  #[serde(default)]
  pub remove_request_headers: Option<Value>,
  #[serde(default)]
  pub set_query_params: Option<Value>,
  #[serde(default)]
  pub add_query_params: Option<Value>,
  #[serde(default)]
  pub remove_query_params: Option<Value>,
  #[serde(default)]
  pub set_form_params: Option<Value>,
  #[serde(default)]
  pub add_form_params: Option<Value>,
  #[serde(default)]
  pub remove_form_params: Option<Value>,
  #[serde(default)]
  pub set_response_headers: Option<Value>,
  #[serde(default)]
  pub add_response_headers: Option<Value>,
  #[serde(default)]
  pub remove_response_headers: Option<Value>,
  #[serde(default)]
  pub set_response_status: Option<Value>,
}

/// One `requests` or `proxies` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProducerConfig {
  #[serde(default)]
  pub name: Option<String>,
  pub backend: BackendRef,
  #[serde(default)]
  pub method: Option<Value>,
  #[serde(default)]
  pub url: Option<Value>,
  #[serde(default)]
  pub path: Option<Value>,
  #[serde(default)]
  pub body: Option<Value>,
  #[serde(default)]
  pub json_body: Option<Value>,
  #[serde(default)]
  pub form_body: Option<Value>,
  #[serde(default)]
  pub headers: Option<Value>,
  #[serde(default)]
  pub set_request_headers: Option<Value>,
  #[serde(default)]
  pub add_request_headers: Option<Value>,
  #[serde(default)]
  pub remove_request_headers: Option<Value>,
  #[serde(default)]
  pub set_query_params: Option<Value>,
  #[serde(default)]
  pub add_query_params: Option<Value>,
  #[serde(default)]
  pub remove_query_params: Option<Value>,
  #[serde(default)]
  pub set_form_params: Option<Value>,
  #[serde(default)]
  pub add_form_params: Option<Value>,
  #[serde(default)]
  pub remove_form_params: Option<Value>,
  #[serde(default)]
  pub expected_status: Option<Value>,
  #[serde(default)]
  pub set_response_headers: Option<Value>,
  #[serde(default)]
  pub add_response_headers: Option<Value>,
  #[serde(default)]
  pub remove_response_headers: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseConfig {
  #[serde(default)]
  pub status: Option<Value>,
  #[serde(default)]
  pub headers: Option<Value>,
  #[serde(default)]
  pub body: Option<Value>,
  #[serde(default)]
  pub json_body: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedirectConfig {
  pub url: Value,
  #[serde(default)]
  pub status: Option<u16>,
}

fn expression(value: Option<&Value>) -> Result<Option<Expression>, ConfigError> {
  value.map(Expression::from_json).transpose()
}

impl ProducerConfig {
  pub fn attributes(&self) -> Result<Attributes, ConfigError> {
    Ok(Attributes {
      method: expression(self.method.as_ref())?,
      url: expression(self.url.as_ref())?,
      path: expression(self.path.as_ref())?,
      body: expression(self.body.as_ref())?,
      json_body: expression(self.json_body.as_ref())?,
      form_body: expression(self.form_body.as_ref())?,
      headers: expression(self.headers.as_ref())?,
      set_request_headers: expression(self.set_request_headers.as_ref())?,
      add_request_headers: expression(self.add_request_headers.as_ref())?,
      remove_request_headers: expression(self.remove_request_headers.as_ref())?,
      set_query_params: expression(self.set_query_params.as_ref())?,
      add_query_params: expression(self.add_query_params.as_ref())?,
      remove_query_params: expression(self.remove_query_params.as_ref())?,
      set_form_params: expression(self.set_form_params.as_ref())?,
      add_form_params: expression(self.add_form_params.as_ref())?,
      remove_form_params: expression(self.remove_form_params.as_ref())?,
      expected_status: expression(self.expected_status.as_ref())?,
      set_response_headers: expression(self.set_response_headers.as_ref())?,
      add_response_headers: expression(self.add_response_headers.as_ref())?,
      remove_response_headers: expression(self.remove_response_headers.as_ref())?,
    })
  }
}

impl ResponseConfig {
  fn spec(&self) -> Result<ResponseSpec, ConfigError> {
    Ok(ResponseSpec {
      status: expression(self.status.as_ref())?,
      headers: expression(self.headers.as_ref())?,
      body: expression(self.body.as_ref())?,
      json_body: expression(self.json_body.as_ref())?,
    })
  }
}

fn body_limit_pattern() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| {
    Regex::new(r"^(\d+(?:\.\d+)?)\s*([kKmMgGtT]?)([iI]?)[bB]?$").expect("body limit pattern is valid")
  })
}

/// Parses a human size. `KiB`/`MiB`/... are binary, `KB`/`MB`/`k`/... decimal; `None` means the
/// default limit.
pub fn parse_body_limit(limit: Option<&str>) -> Result<u64, ConfigError> {
  let Some(raw) = limit else {
    return Ok(DEFAULT_BODY_LIMIT);
  };
  let invalid = || ConfigError::InvalidBodyLimit(raw.to_string());
  let caps = body_limit_pattern()
    .captures(raw.trim())
    .ok_or_else(invalid)?;
  let number: f64 = caps[1].parse().map_err(|_| invalid())?;
  let base: f64 = if caps[3].is_empty() { 1000.0 } else { 1024.0 };
  let exponent = match caps[2].to_ascii_lowercase().as_str() {
    "" => 0,
    "k" => 1,
    "m" => 2,
    "g" => 3,
    _ => 4,
  };
  if caps[2].is_empty() && !caps[3].is_empty() {
    return Err(invalid());
  }
  let bytes = number * base.powi(exponent);
  if !bytes.is_finite() || bytes >= u64::MAX as f64 {
    return Err(invalid());
  }
  Ok(bytes as u64)
}

impl GatewayConfig {
  #[instrument(level = "trace", skip(path), fields(path = %path.as_ref().display()))]
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    Self::from_json_str(&contents)
  }

  pub fn from_json_str(contents: &str) -> Result<Self, ConfigError> {
    Ok(serde_json::from_str(contents)?)
  }

  /// Compiles every endpoint. Named backends are shared by all producers that use them.
  #[instrument(level = "trace", skip(self), fields(endpoints = self.endpoints.len()))]
  pub fn build(&self) -> Result<Vec<EndpointDriver>, ConfigError> {
    let mut backends: HashMap<&str, Arc<dyn Backend>> = HashMap::new();
    for (name, config) in &self.backends {
      backends.insert(name, Arc::new(HttpBackend::new(name.as_str(), config)?));
    }

    let endpoints = self
      .endpoints
      .iter()
      .map(|endpoint| endpoint.build(&backends))
      .collect::<Result<Vec<_>, _>>()?;
    info!(
      endpoints = endpoints.len(),
      backends = backends.len(),
      "gateway configuration compiled"
    );
    Ok(endpoints)
  }
}

impl EndpointConfig {
  fn build(&self, backends: &HashMap<&str, Arc<dyn Backend>>) -> Result<EndpointDriver, ConfigError> {
    let producers = self
      .proxies
      .iter()
      .map(|p| (ProducerKind::Proxy, p))
      .chain(self.requests.iter().map(|r| (ProducerKind::Request, r)));

    let mut builder = GraphBuilder::new();
    for (kind, producer) in producers {
      let name = producer.name.clone().unwrap_or_default();
      let backend: Arc<dyn Backend> = match &producer.backend {
        BackendRef::Named(backend) => backends
          .get(backend.as_str())
          .cloned()
          .ok_or_else(|| ConfigError::UnknownBackend(backend.clone()))?,
        BackendRef::Inline(config) => {
          let label = format!("{} {}", self.pattern, if name.is_empty() { "default" } else { name.as_str() });
          Arc::new(HttpBackend::new(label, config)?)
        }
      };
      if kind == ProducerKind::Request && producer.path.is_some() {
        return Err(ConfigError::ProxyOnlyAttribute {
          producer: if name.is_empty() { "default".into() } else { name },
          attribute: "path",
        });
      }
      builder = builder.add(ProducerSpec::new(name, kind, backend, producer.attributes()?));
    }
    let graph = builder.build()?;

    let mut options = EndpointOptions::new(self.pattern.clone())
      .with_body_limit(parse_body_limit(self.request_body_limit.as_deref())?)
      .with_request_modifiers(RequestModifiers {
        path: expression(self.path.as_ref())?,
        set_request_headers: expression(self.set_request_headers.as_ref())?,
        add_request_headers: expression(self.add_request_headers.as_ref())?,
        remove_request_headers: expression(self.remove_request_headers.as_ref())?,
        set_query_params: expression(self.set_query_params.as_ref())?,
        add_query_params: expression(self.add_query_params.as_ref())?,
        remove_query_params: expression(self.remove_query_params.as_ref())?,
        set_form_params: expression(self.set_form_params.as_ref())?,
        add_form_params: expression(self.add_form_params.as_ref())?,
        remove_form_params: expression(self.remove_form_params.as_ref())?,
      })
      .with_modifiers(ResponseModifiers {
        set_response_headers: expression(self.set_response_headers.as_ref())?,
        add_response_headers: expression(self.add_response_headers.as_ref())?,
        remove_response_headers: expression(self.remove_response_headers.as_ref())?,
        set_response_status: expression(self.set_response_status.as_ref())?,
      });
    if let Some(response) = &self.response {
      options = options.with_response(response.spec()?);
    }
    if let Some(redirect) = &self.redirect {
      options = options.with_redirect(RedirectSpec::new(
        Expression::from_json(&redirect.url)?,
        redirect.status,
      )?);
    }
    EndpointDriver::new(graph, options)
  }
}
