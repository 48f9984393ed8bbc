//! Request-time driver of one endpoint.
//!
//! - [EndpointDriver::new]: validates that the compiled tree resolves to one client response.
//! - [EndpointDriver::serve]: rewrites the inbound request, runs the tree for it and assembles
//!   the response.
//! - [EndpointDriver::handle]: like `serve`, but maps errors to a generic error response.

use axum::http::header::{CONTENT_TYPE, LOCATION};
use axum::http::uri::PathAndQuery;
use axum::http::{HeaderValue, StatusCode, Uri};
use bytes::Bytes;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::field::Empty;
use tracing::{Instrument, Span, debug, error, info_span, warn};

use crate::compiler::CompiledGraph;
use crate::error::{ConfigError, EndpointError, ProduceError};
use crate::eval::{
  DefaultEvaluator, EvalContext, Evaluator, HeaderOps, QueryOps, form_params_mismatch,
  replace_path, request_path, value_to_status, value_to_string,
};
use crate::nodes::{RequestScope, strip_hop_by_hop};
use crate::types::{ClientRequest, ClientResponse, Expression, ProduceResult, ResultMap};

pub const DEFAULT_REDIRECT_STATUS: u16 = 301;
pub const DEFAULT_BODY_LIMIT: u64 = 64 * 1024 * 1024;

/// Explicit client response built from expressions over the complete result map.
#[derive(Debug, Clone, Default)]
pub struct ResponseSpec {
  /// Defaults to 200.
  pub status: Option<Expression>,
  pub headers: Option<Expression>,
  pub body: Option<Expression>,
  /// Takes precedence over `body`.
  pub json_body: Option<Expression>,
}

#[derive(Debug, Clone)]
pub struct RedirectSpec {
  url: Expression,
  status: StatusCode,
}

impl RedirectSpec {
  /// `status` defaults to [DEFAULT_REDIRECT_STATUS] and must be a 3xx code.
  pub fn new(url: Expression, status: Option<u16>) -> Result<Self, ConfigError> {
    let code = status.unwrap_or(DEFAULT_REDIRECT_STATUS);
    let status = StatusCode::from_u16(code)
      .ok()
      .filter(StatusCode::is_redirection)
      .ok_or(ConfigError::InvalidRedirectStatus(code))?;
    Ok(Self { url, status })
  }

  pub fn status(&self) -> StatusCode {
    self.status
  }
}

/// Endpoint-level rewrites applied to every client response before it is written.
#[derive(Debug, Clone, Default)]
pub struct ResponseModifiers {
  pub set_response_headers: Option<Expression>,
  pub add_response_headers: Option<Expression>,
  pub remove_response_headers: Option<Expression>,
  pub set_response_status: Option<Expression>,
}

impl ResponseModifiers {
  pub fn is_empty(&self) -> bool {
    self.set_response_headers.is_none()
      && self.add_response_headers.is_none()
      && self.remove_response_headers.is_none()
      && self.set_response_status.is_none()
  }
}

/// Endpoint-level rewrites of the inbound request, applied before any producer runs. Every
/// expression sees the unmodified request.
#[derive(Debug, Clone, Default)]
pub struct RequestModifiers {
  /// Replaces the request path, keeping the query.
  pub path: Option<Expression>,
  pub set_request_headers: Option<Expression>,
  pub add_request_headers: Option<Expression>,
  pub remove_request_headers: Option<Expression>,
  pub set_query_params: Option<Expression>,
  pub add_query_params: Option<Expression>,
  pub remove_query_params: Option<Expression>,
  pub set_form_params: Option<Expression>,
  pub add_form_params: Option<Expression>,
  pub remove_form_params: Option<Expression>,
}

impl RequestModifiers {
  pub fn is_empty(&self) -> bool {
    [
      &self.path,
      &self.set_request_headers,
      &self.add_request_headers,
      &self.remove_request_headers,
      &self.set_query_params,
      &self.add_query_params,
      &self.remove_query_params,
      &self.set_form_params,
      &self.add_form_params,
      &self.remove_form_params,
    ]
    .iter()
    .all(|e| e.is_none())
  }
}

#[derive(Debug, Clone)]
pub struct EndpointOptions {
  pub pattern: String,
  pub response: Option<ResponseSpec>,
  pub redirect: Option<RedirectSpec>,
  pub request_modifiers: RequestModifiers,
  pub modifiers: ResponseModifiers,
  /// Maximum inbound body size in bytes.
  pub body_limit: u64,
}

impl EndpointOptions {
  pub fn new(pattern: impl Into<String>) -> Self {
    Self {
      pattern: pattern.into(),
      response: None,
      redirect: None,
      request_modifiers: RequestModifiers::default(),
      modifiers: ResponseModifiers::default(),
      body_limit: DEFAULT_BODY_LIMIT,
    }
  }

  pub fn with_response(mut self, response: ResponseSpec) -> Self {
    self.response = Some(response);
    self
  }

  pub fn with_redirect(mut self, redirect: RedirectSpec) -> Self {
    self.redirect = Some(redirect);
    self
  }

  pub fn with_request_modifiers(mut self, modifiers: RequestModifiers) -> Self {
    self.request_modifiers = modifiers;
    self
  }

  pub fn with_modifiers(mut self, modifiers: ResponseModifiers) -> Self {
    self.modifiers = modifiers;
    self
  }

  pub fn with_body_limit(mut self, limit: u64) -> Self {
    self.body_limit = limit;
    self
  }

  fn has_explicit_response(&self) -> bool {
    self.response.is_some() || self.redirect.is_some()
  }
}

/// Runs one endpoint's compiled tree per request.
pub struct EndpointDriver {
  options: EndpointOptions,
  graph: CompiledGraph,
  evaluator: Arc<dyn Evaluator>,
}

impl EndpointDriver {
  pub fn new(graph: CompiledGraph, options: EndpointOptions) -> Result<Self, ConfigError> {
    Self::with_evaluator(graph, options, Arc::new(DefaultEvaluator))
  }

  /// Rejects endpoints that cannot resolve a single client response.
  pub fn with_evaluator(
    graph: CompiledGraph,
    options: EndpointOptions,
    evaluator: Arc<dyn Evaluator>,
  ) -> Result<Self, ConfigError> {
    if !options.has_explicit_response() {
      if graph.is_empty() {
        return Err(ConfigError::EmptyEndpoint(options.pattern.clone()));
      }
      if graph.len() > 1 {
        return Err(ConfigError::AmbiguousResponse {
          pattern: options.pattern.clone(),
          terminals: graph.len(),
        });
      }
    }
    Ok(Self {
      options,
      graph,
      evaluator,
    })
  }

  pub fn pattern(&self) -> &str {
    &self.options.pattern
  }

  pub fn options(&self) -> &EndpointOptions {
    &self.options
  }

  pub fn graph(&self) -> &CompiledGraph {
    &self.graph
  }

  pub async fn serve(&self, request: ClientRequest) -> Result<ClientResponse, EndpointError> {
    self.serve_with_cancel(request, CancellationToken::new()).await
  }

  /// Serves with a request scope derived from `parent`. The scope is cancelled when `parent`
  /// is, or when this future is dropped.
  pub async fn serve_with_cancel(
    &self,
    request: ClientRequest,
    parent: CancellationToken,
  ) -> Result<ClientResponse, EndpointError> {
    let span = info_span!(
      "endpoint",
      request_id = %request.id(),
      pattern = %self.options.pattern,
      method = %request.method(),
      status = Empty,
    );
    async move {
      let size = u64::try_from(request.body().len()).unwrap_or(u64::MAX);
      if size > self.options.body_limit {
        return Err(EndpointError::BodyLimitExceeded {
          limit: self.options.body_limit,
        });
      }
      let request = self.modify_request(request)?;
      let scope = self.scope(request, parent.child_token());
      let _guard = scope.cancellation().clone().drop_guard();
      let results = self.run(&scope).await;
      if scope.is_cancelled() {
        return Err(EndpointError::Producer(ProduceError::Cancelled));
      }
      let response = self.respond(&scope, &results)?;
      Span::current().record("status", response.status.as_u16());
      Ok(response)
    }
    .instrument(span)
    .await
  }

  /// Serves the request, answering failures with a generic error response.
  pub async fn handle(&self, request: ClientRequest) -> ClientResponse {
    match self.serve(request).await {
      Ok(response) => response,
      Err(e) => {
        match e.status() {
          _ if matches!(e, EndpointError::Producer(ProduceError::Cancelled)) => {
            debug!(pattern = %self.options.pattern, "endpoint cancelled")
          }
          s if s.is_server_error() => error!(pattern = %self.options.pattern, kind = e.kind(), error = %e, "endpoint failed"),
          _ => warn!(pattern = %self.options.pattern, kind = e.kind(), error = %e, "endpoint rejected request"),
        }
        error_response(&e)
      }
    }
  }

  /// Runs the tree and returns the terminal results, exactly [CompiledGraph::len] of them.
  pub async fn produce(
    &self,
    request: ClientRequest,
  ) -> Result<Vec<Arc<ProduceResult>>, EndpointError> {
    let request = self.modify_request(request)?;
    let scope = self.scope(request, CancellationToken::new());
    let _guard = scope.cancellation().clone().drop_guard();
    Ok(self.run(&scope).await)
  }

  /// Applies the request modifiers in path, headers, query, form order.
  fn modify_request(&self, mut request: ClientRequest) -> Result<ClientRequest, EndpointError> {
    let modifiers = &self.options.request_modifiers;
    if modifiers.is_empty() {
      return Ok(request);
    }
    let context = EvalContext::build(&request, &ResultMap::default(), None);
    let evaluate =
      |what: &str, expression: &Option<Expression>| self.evaluate(what, expression.as_ref(), &context);

    let mut url = request.path_and_query().to_string();
    if let Some(value) = evaluate("path", &modifiers.path)? {
      let path = request_path(&value).map_err(|e| EndpointError::Configuration(format!("path: {e}")))?;
      if let Some(path) = path {
        url = replace_path(&url, &path);
      }
    }

    let remove = evaluate("remove_request_headers", &modifiers.remove_request_headers)?;
    let set = evaluate("set_request_headers", &modifiers.set_request_headers)?;
    let add = evaluate("add_request_headers", &modifiers.add_request_headers)?;
    HeaderOps {
      remove: remove.as_ref(),
      set: set.as_ref(),
      add: add.as_ref(),
    }
    .apply(request.headers_mut())
    .map_err(|e| EndpointError::Evaluation(format!("request headers: {e}")))?;

    let remove = evaluate("remove_query_params", &modifiers.remove_query_params)?;
    let set = evaluate("set_query_params", &modifiers.set_query_params)?;
    let add = evaluate("add_query_params", &modifiers.add_query_params)?;
    url = QueryOps {
      remove: remove.as_ref(),
      set: set.as_ref(),
      add: add.as_ref(),
    }
    .apply(&url)
    .map_err(|e| EndpointError::Evaluation(format!("query params: {e}")))?;
    if url != request.path_and_query() {
      let mut parts = request.uri().clone().into_parts();
      parts.path_and_query = Some(
        url
          .parse::<PathAndQuery>()
          .map_err(|e| EndpointError::Evaluation(format!("request url {url:?}: {e}")))?,
      );
      let uri = Uri::from_parts(parts)
        .map_err(|e| EndpointError::Evaluation(format!("request url {url:?}: {e}")))?;
      request.set_uri(uri);
    }

    let remove = evaluate("remove_form_params", &modifiers.remove_form_params)?;
    let set = evaluate("set_form_params", &modifiers.set_form_params)?;
    let add = evaluate("add_form_params", &modifiers.add_form_params)?;
    let form = QueryOps {
      remove: remove.as_ref(),
      set: set.as_ref(),
      add: add.as_ref(),
    };
    if !form.is_empty() {
      match form_params_mismatch(request.method(), request.headers()) {
        Some(mismatch) => warn!(%mismatch, "skipping endpoint form params"),
        None => {
          let body = form
            .apply_form(request.body())
            .map_err(|e| EndpointError::Evaluation(format!("form params: {e}")))?;
          request.set_body(Bytes::from(body));
        }
      }
    }
    debug!(url = %request.uri(), "applied endpoint request modifiers");
    Ok(request)
  }

  fn scope(&self, request: ClientRequest, cancel: CancellationToken) -> Arc<RequestScope> {
    RequestScope::new(
      request,
      self.graph.root(),
      Arc::clone(&self.evaluator),
      cancel,
    )
  }

  async fn run(&self, scope: &Arc<RequestScope>) -> Vec<Arc<ProduceResult>> {
    let results = self.graph.root().produce(Arc::clone(scope)).await;
    debug_assert_eq!(results.len(), self.graph.len());
    scope.publish_all(&results);
    for result in &results {
      log_result(result);
    }
    results
  }

  fn respond(
    &self,
    scope: &RequestScope,
    results: &[Arc<ProduceResult>],
  ) -> Result<ClientResponse, EndpointError> {
    let (mut response, current) = if let Some(spec) = &self.options.response {
      (self.synthesize(spec, &scope.eval_context(None))?, None)
    } else if let Some(redirect) = &self.options.redirect {
      (self.redirect(redirect, &scope.eval_context(None))?, None)
    } else {
      let result = self.single_result(results)?;
      (pass_through(result)?, Some(result))
    };
    if !self.options.modifiers.is_empty() {
      let context = scope.eval_context(current.map(|r| r.as_ref()));
      self.apply_modifiers(&mut response, &context);
    }
    Ok(response)
  }

  fn single_result<'a>(
    &self,
    results: &'a [Arc<ProduceResult>],
  ) -> Result<&'a Arc<ProduceResult>, EndpointError> {
    match results {
      [single] => Ok(single),
      other => Err(EndpointError::Configuration(format!(
        "endpoint {:?} resolved {} results without response or redirect",
        self.options.pattern,
        other.len()
      ))),
    }
  }

  fn evaluate(
    &self,
    what: &str,
    expression: Option<&Expression>,
    context: &EvalContext,
  ) -> Result<Option<Value>, EndpointError> {
    expression
      .map(|e| self.evaluator.evaluate(e, context))
      .transpose()
      .map_err(|e| EndpointError::Evaluation(format!("{what}: {e}")))
  }

  fn synthesize(
    &self,
    spec: &ResponseSpec,
    context: &EvalContext,
  ) -> Result<ClientResponse, EndpointError> {
    let status = match self.evaluate("response status", spec.status.as_ref(), context)? {
      Some(value) => value_to_status(&value)
        .and_then(|s| StatusCode::from_u16(s).ok())
        .ok_or_else(|| EndpointError::Evaluation(format!("response status: invalid status {value}")))?,
      None => StatusCode::OK,
    };
    let mut response = ClientResponse::new(status);

    if let Some(value) = self.evaluate("response json_body", spec.json_body.as_ref(), context)? {
      let bytes = serde_json::to_vec(&value)
        .map_err(|e| EndpointError::Evaluation(format!("response json_body: {e}")))?;
      response.body = Bytes::from(bytes);
      response
        .headers
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    } else if let Some(value) = self.evaluate("response body", spec.body.as_ref(), context)? {
      response.body = Bytes::from(value_to_string(&value));
      response
        .headers
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    }

    let headers = self.evaluate("response headers", spec.headers.as_ref(), context)?;
    HeaderOps {
      set: headers.as_ref(),
      ..Default::default()
    }
    .apply(&mut response.headers)
    .map_err(|e| EndpointError::Evaluation(format!("response headers: {e}")))?;
    Ok(response)
  }

  fn redirect(
    &self,
    spec: &RedirectSpec,
    context: &EvalContext,
  ) -> Result<ClientResponse, EndpointError> {
    let url = self
      .evaluate("redirect url", Some(&spec.url), context)?
      .map(|v| value_to_string(&v))
      .unwrap_or_default();
    if url.is_empty() {
      return Err(EndpointError::Evaluation("redirect url: empty".into()));
    }
    let location = HeaderValue::from_str(&url)
      .map_err(|_| EndpointError::Evaluation(format!("redirect url: invalid location {url:?}")))?;
    let mut response = ClientResponse::new(spec.status);
    response.headers.insert(LOCATION, location);
    Ok(response)
  }

  /// Failing modifiers are logged and skipped; the response is still written.
  fn apply_modifiers(&self, response: &mut ClientResponse, context: &EvalContext) {
    let modifiers = &self.options.modifiers;
    let headers = self
      .evaluate("remove_response_headers", modifiers.remove_response_headers.as_ref(), context)
      .and_then(|remove| {
        let set = self.evaluate("set_response_headers", modifiers.set_response_headers.as_ref(), context)?;
        let add = self.evaluate("add_response_headers", modifiers.add_response_headers.as_ref(), context)?;
        HeaderOps {
          remove: remove.as_ref(),
          set: set.as_ref(),
          add: add.as_ref(),
        }
        .apply(&mut response.headers)
        .map_err(|e| EndpointError::Evaluation(format!("response headers: {e}")))
      });
    if let Err(e) = headers {
      warn!(error = %e, "skipping endpoint response header modifiers");
    }

    match self.evaluate("set_response_status", modifiers.set_response_status.as_ref(), context) {
      Ok(None) => {}
      Ok(Some(value)) => match value_to_status(&value)
        .filter(|s| (100..=599).contains(s))
        .and_then(|s| StatusCode::from_u16(s).ok())
      {
        Some(status) => {
          response.status = status;
          if status == StatusCode::NO_CONTENT {
            response.body = Bytes::new();
            response.headers.remove(CONTENT_TYPE);
          }
        }
        None => warn!(%value, "ignoring invalid set_response_status"),
      },
      Err(e) => warn!(error = %e, "skipping set_response_status"),
    }
  }
}

impl fmt::Debug for EndpointDriver {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("EndpointDriver")
      .field("pattern", &self.options.pattern)
      .field("tree", &self.graph.describe())
      .finish_non_exhaustive()
  }
}

fn pass_through(result: &ProduceResult) -> Result<ClientResponse, EndpointError> {
  if let Some(error) = &result.error {
    return Err(EndpointError::Producer(error.clone()));
  }
  let response = result
    .response
    .as_deref()
    .ok_or(EndpointError::Producer(ProduceError::NoResult))?;
  let mut client = ClientResponse::from(response);
  strip_hop_by_hop(&mut client.headers);
  Ok(client)
}

fn log_result(result: &ProduceResult) {
  match &result.error {
    None => debug!(producer = %result.name, status = ?result.status(), "producer completed"),
    Some(ProduceError::Cancelled) => debug!(producer = %result.name, "producer cancelled"),
    Some(e @ ProduceError::UnexpectedStatus { .. }) => {
      warn!(producer = %result.name, kind = e.kind(), error = %e, "producer failed")
    }
    Some(e) => error!(producer = %result.name, kind = e.kind(), error = %e, "producer failed"),
  }
}

/// Generic error response; the error kind travels in `x-gateway-error`.
pub fn error_response(error: &EndpointError) -> ClientResponse {
  let status = error.status();
  let mut response = ClientResponse::new(status);
  response
    .headers
    .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
  response
    .headers
    .insert("x-gateway-error", HeaderValue::from_static(error.kind()));
  response.body = Bytes::from(status.canonical_reason().unwrap_or("Error").to_string());
  response
}
