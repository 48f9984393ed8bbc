//! In-memory backend for unit tests.

use async_trait::async_trait;
use axum::http::{HeaderValue, StatusCode};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::{Method, Uri};
use tokio_util::sync::CancellationToken;

use crate::backend::Backend;
use crate::config::ProducerConfig;
use crate::error::ProduceError;
use crate::eval::DefaultEvaluator;
use crate::nodes::{Producer, ProxyNode, RequestNode, RequestScope};
use crate::types::{
  Attributes, BackendRequest, BackendResponse, ClientRequest, ProducerKind, ProducerSpec, SpecId,
};

/// Attributes from their JSON configuration form.
pub(crate) fn attrs(mut config: Value) -> Attributes {
  config["backend"] = json!("mock");
  serde_json::from_value::<ProducerConfig>(config)
    .unwrap()
    .attributes()
    .unwrap()
}

pub(crate) fn spec(
  id: usize,
  name: &str,
  kind: ProducerKind,
  backend: Arc<MockBackend>,
  attributes: Attributes,
) -> Arc<ProducerSpec> {
  let mut spec = ProducerSpec::new(name, kind, backend, attributes);
  spec.id = SpecId(id);
  Arc::new(spec)
}

pub(crate) fn request_leaf(
  id: usize,
  name: &str,
  backend: &Arc<MockBackend>,
  attributes: Attributes,
) -> Arc<dyn Producer> {
  let spec = spec(id, name, ProducerKind::Request, Arc::clone(backend), attributes);
  Arc::new(RequestNode::new(spec))
}

pub(crate) fn proxy_leaf(
  id: usize,
  name: &str,
  backend: &Arc<MockBackend>,
  attributes: Attributes,
) -> Arc<dyn Producer> {
  let spec = spec(id, name, ProducerKind::Proxy, Arc::clone(backend), attributes);
  Arc::new(ProxyNode::new(spec))
}

pub(crate) fn get(uri: &'static str) -> ClientRequest {
  ClientRequest::new(Method::GET, Uri::from_static(uri))
}

pub(crate) fn scope(root: &Arc<dyn Producer>, request: ClientRequest) -> Arc<RequestScope> {
  RequestScope::new(
    request,
    root,
    Arc::new(DefaultEvaluator),
    CancellationToken::new(),
  )
}

pub(crate) fn scope_with_cancel(
  root: &Arc<dyn Producer>,
  request: ClientRequest,
  cancel: CancellationToken,
) -> Arc<RequestScope> {
  RequestScope::new(request, root, Arc::new(DefaultEvaluator), cancel)
}

#[derive(Debug, Clone)]
enum Reply {
  /// JSON description of the received request.
  Echo,
  Json(Value),
  Fail(String),
  Panic,
}

/// Records every request and answers with a fixed status and reply after an optional delay.
pub(crate) struct MockBackend {
  name: String,
  status: StatusCode,
  reply: Reply,
  delay: Duration,
  calls: AtomicUsize,
  seen: Mutex<Vec<BackendRequest>>,
}

impl MockBackend {
  fn with_reply(name: &str, reply: Reply) -> Self {
    Self {
      name: name.to_string(),
      status: StatusCode::OK,
      reply,
      delay: Duration::ZERO,
      calls: AtomicUsize::new(0),
      seen: Mutex::new(Vec::new()),
    }
  }

  /// Answers with a JSON echo of the request: method, url, headers and body.
  pub(crate) fn echo(name: &str) -> Self {
    Self::with_reply(name, Reply::Echo)
  }

  pub(crate) fn json(name: &str, body: Value) -> Self {
    Self::with_reply(name, Reply::Json(body))
  }

  pub(crate) fn failing(name: &str, message: &str) -> Self {
    Self::with_reply(name, Reply::Fail(message.to_string()))
  }

  pub(crate) fn panicking(name: &str) -> Self {
    Self::with_reply(name, Reply::Panic)
  }

  pub(crate) fn with_status(mut self, status: u16) -> Self {
    self.status = StatusCode::from_u16(status).unwrap();
    self
  }

  pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  pub(crate) fn shared(self) -> Arc<Self> {
    Arc::new(self)
  }

  pub(crate) fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub(crate) fn seen(&self) -> Vec<BackendRequest> {
    self.seen.lock().unwrap().clone()
  }
}

#[async_trait]
impl Backend for MockBackend {
  fn name(&self) -> &str {
    &self.name
  }

  async fn execute(&self, request: BackendRequest) -> Result<BackendResponse, ProduceError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self.seen.lock().unwrap().push(request.clone());
    if !self.delay.is_zero() {
      tokio::time::sleep(self.delay).await;
    }
    let body = match &self.reply {
      Reply::Echo => {
        let headers: serde_json::Map<String, Value> = request
          .headers
          .iter()
          .map(|(k, v)| (k.to_string(), json!(v.to_str().unwrap_or_default())))
          .collect();
        json!({
          "method": request.method.as_str(),
          "url": request.url,
          "headers": headers,
          "body": String::from_utf8_lossy(&request.body),
          "json_body": serde_json::from_slice::<Value>(&request.body).ok(),
        })
      }
      Reply::Json(v) => v.clone(),
      Reply::Fail(message) => {
        return Err(ProduceError::Transport {
          backend: self.name.clone(),
          message: message.clone(),
        });
      }
      Reply::Panic => panic!("mock backend {} panicked", self.name),
    };
    let mut response = BackendResponse::new(self.status).with_body(body.to_string());
    response
      .headers
      .insert("content-type", HeaderValue::from_static("application/json"));
    response
      .headers
      .insert("x-backend", HeaderValue::from_str(&self.name).unwrap());
    Ok(response)
  }
}
