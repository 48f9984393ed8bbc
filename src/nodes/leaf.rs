//! Execution path shared by the request and proxy leaves.
//!
//! A leaf evaluates its attributes against the published results, performs one backend call,
//! applies its response modifiers and checks the expected status. Within one request the call
//! happens at most once: every consumer of the same spec awaits the same invocation cell.

use axum::http::header::{CONNECTION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, Method};
use bytes::Bytes;
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::field::Empty;
use tracing::{Instrument, Span, debug, error, info_span, warn};

use super::{RequestScope, panic_message};
use crate::error::{EvalError, ProduceError};
use crate::eval::{
  EvalContext, FORM_CONTENT_TYPE, HeaderOps, QueryOps, form_encode, form_params_mismatch,
  request_path, value_to_status_list, value_to_string,
};
use crate::types::{Attributes, BackendRequest, BackendResponse, Expression, ProduceResult, ProducerSpec};

const HOP_BY_HOP: [&str; 9] = [
  "connection",
  "keep-alive",
  "proxy-connection",
  "te",
  "trailer",
  "transfer-encoding",
  "upgrade",
  "host",
  "content-length",
];

/// Removes connection-scoped headers, including those named by `Connection`.
pub(crate) fn strip_hop_by_hop(headers: &mut HeaderMap) {
  let listed: Vec<String> = headers
    .get_all(CONNECTION)
    .iter()
    .filter_map(|v| v.to_str().ok())
    .flat_map(|v| v.split(','))
    .map(|s| s.trim().to_ascii_lowercase())
    .filter(|s| !s.is_empty())
    .collect();
  for name in HOP_BY_HOP.iter().copied().chain(listed.iter().map(String::as_str)) {
    headers.remove(name);
  }
}

/// Runs the leaf's backend call once per request and returns the shared result. A panic
/// during the call is stored as a failed result so later consumers do not call again.
pub(crate) async fn produce_leaf<F>(
  spec: &ProducerSpec,
  scope: &RequestScope,
  build: F,
) -> Arc<ProduceResult>
where
  F: FnOnce(&EvalContext) -> Result<BackendRequest, ProduceError> + Send,
{
  match scope.invocation(spec.id()) {
    Some(cell) => Arc::clone(cell.get_or_init(|| invoke(spec, scope, build)).await),
    None => invoke(spec, scope, build).await,
  }
}

async fn invoke<F>(spec: &ProducerSpec, scope: &RequestScope, build: F) -> Arc<ProduceResult>
where
  F: FnOnce(&EvalContext) -> Result<BackendRequest, ProduceError> + Send,
{
  let span = info_span!(
    "producer",
    name = %spec.name(),
    kind = %spec.kind(),
    backend = %spec.backend().name(),
    method = Empty,
    url = Empty,
    status = Empty,
  );
  let result = match AssertUnwindSafe(call(spec, scope, build, span.clone()))
    .catch_unwind()
    .instrument(span)
    .await
  {
    Ok(result) => result,
    Err(payload) => {
      let message = panic_message(payload.as_ref());
      error!(producer = %spec.name(), %message, "producer panicked");
      ProduceResult::failed(spec.name(), ProduceError::Request(format!("panic: {message}")))
    }
  };
  Arc::new(result)
}

async fn call<F>(spec: &ProducerSpec, scope: &RequestScope, build: F, span: Span) -> ProduceResult
where
  F: FnOnce(&EvalContext) -> Result<BackendRequest, ProduceError> + Send,
{
  let name = spec.name();
  if scope.is_cancelled() {
    return ProduceResult::failed(name, ProduceError::Cancelled);
  }

  let context = scope.eval_context(None);
  let expected = match expected_statuses(scope, spec.attributes(), &context) {
    Ok(expected) => expected,
    Err(e) => return ProduceResult::failed(name, e),
  };
  let request = match build(&context) {
    Ok(request) => Arc::new(request),
    Err(e) => {
      warn!(error = %e, "building backend request failed");
      return ProduceResult::failed(name, e);
    }
  };
  span.record("method", request.method.as_str());
  span.record("url", request.url.as_str());

  let outcome = tokio::select! {
    biased;
    _ = scope.cancelled() => Err(ProduceError::Cancelled),
    response = spec.backend().execute((*request).clone()) => response,
  };
  let response = match outcome {
    Ok(response) => response,
    Err(ProduceError::Cancelled) => {
      debug!("backend call cancelled");
      return ProduceResult::failed(name, ProduceError::Cancelled).with_request(request);
    }
    Err(e) => {
      warn!(error = %e, "backend call failed");
      return ProduceResult::failed(name, e).with_request(request);
    }
  };
  span.record("status", response.status.as_u16());

  let response = match modify_response(spec, scope, &request, response) {
    Ok(response) => response,
    Err(e) => return ProduceResult::failed(name, e).with_request(request),
  };
  let status = response.status.as_u16();
  let result = ProduceResult::success(name, request, Arc::new(response));
  if !expected.is_empty() && !expected.contains(&status) {
    debug!(status, ?expected, "unexpected backend status");
    return result.with_error(ProduceError::UnexpectedStatus {
      producer: name.to_string(),
      status,
    });
  }
  result
}

fn expected_statuses(
  scope: &RequestScope,
  attributes: &Attributes,
  context: &EvalContext,
) -> Result<Vec<u16>, ProduceError> {
  match evaluate(scope, "expected_status", attributes.expected_status.as_ref(), context)? {
    Some(value) => value_to_status_list(&value).map_err(|e| eval_error("expected_status", e)),
    None => Ok(Vec::new()),
  }
}

/// Applies the leaf's response header modifiers; `backend_response` names this response.
fn modify_response(
  spec: &ProducerSpec,
  scope: &RequestScope,
  request: &Arc<BackendRequest>,
  mut response: BackendResponse,
) -> Result<BackendResponse, ProduceError> {
  let attributes = spec.attributes();
  if attributes.response_side().is_empty() {
    return Ok(response);
  }
  let current = ProduceResult::success(spec.name(), Arc::clone(request), Arc::new(response.clone()));
  let context = scope.eval_context(Some(&current));
  let remove = evaluate(scope, "remove_response_headers", attributes.remove_response_headers.as_ref(), &context)?;
  let set = evaluate(scope, "set_response_headers", attributes.set_response_headers.as_ref(), &context)?;
  let add = evaluate(scope, "add_response_headers", attributes.add_response_headers.as_ref(), &context)?;
  HeaderOps {
    remove: remove.as_ref(),
    set: set.as_ref(),
    add: add.as_ref(),
  }
  .apply(&mut response.headers)
  .map_err(|e| eval_error("response headers", e))?;
  Ok(response)
}

pub(crate) fn eval_error(attribute: &str, error: EvalError) -> ProduceError {
  ProduceError::Evaluation {
    attribute: attribute.to_string(),
    message: error.to_string(),
  }
}

pub(crate) fn evaluate(
  scope: &RequestScope,
  attribute: &str,
  expression: Option<&Expression>,
  context: &EvalContext,
) -> Result<Option<Value>, ProduceError> {
  expression
    .map(|e| scope.evaluator().evaluate(e, context))
    .transpose()
    .map_err(|e| eval_error(attribute, e))
}

/// Evaluated `method`, upper-cased; empty means unset.
pub(crate) fn method(
  scope: &RequestScope,
  attributes: &Attributes,
  context: &EvalContext,
) -> Result<Option<Method>, ProduceError> {
  let Some(value) = evaluate(scope, "method", attributes.method.as_ref(), context)? else {
    return Ok(None);
  };
  let method = value_to_string(&value).trim().to_ascii_uppercase();
  if method.is_empty() {
    return Ok(None);
  }
  Method::from_bytes(method.as_bytes())
    .map(Some)
    .map_err(|_| ProduceError::Request(format!("invalid method {method:?}")))
}

/// Evaluated `url`; empty means unset.
pub(crate) fn url(
  scope: &RequestScope,
  attributes: &Attributes,
  context: &EvalContext,
) -> Result<Option<String>, ProduceError> {
  let url = evaluate(scope, "url", attributes.url.as_ref(), context)?
    .map(|v| value_to_string(&v))
    .filter(|u| !u.is_empty());
  Ok(url)
}

/// Evaluated `path`, made absolute; empty means unset. A query or fragment is an error.
pub(crate) fn path(
  scope: &RequestScope,
  attributes: &Attributes,
  context: &EvalContext,
) -> Result<Option<String>, ProduceError> {
  match evaluate(scope, "path", attributes.path.as_ref(), context)? {
    Some(value) => request_path(&value).map_err(|e| eval_error("path", e)),
    None => Ok(None),
  }
}

/// Evaluated body with its content type, by precedence `json_body`, `form_body`, `body`.
pub(crate) fn body(
  scope: &RequestScope,
  attributes: &Attributes,
  context: &EvalContext,
) -> Result<Option<(Bytes, &'static str)>, ProduceError> {
  if let Some(value) = evaluate(scope, "json_body", attributes.json_body.as_ref(), context)? {
    let bytes = serde_json::to_vec(&value).map_err(|e| ProduceError::Request(e.to_string()))?;
    return Ok(Some((Bytes::from(bytes), "application/json")));
  }
  if let Some(value) = evaluate(scope, "form_body", attributes.form_body.as_ref(), context)? {
    let encoded = form_encode(&value).map_err(|e| eval_error("form_body", e))?;
    return Ok(Some((Bytes::from(encoded), FORM_CONTENT_TYPE)));
  }
  if let Some(value) = evaluate(scope, "body", attributes.body.as_ref(), context)? {
    return Ok(Some((Bytes::from(value_to_string(&value)), "text/plain")));
  }
  Ok(None)
}

/// Sets `body` on the request along with its content type.
pub(crate) fn set_body(request: &mut BackendRequest, body: Bytes, content_type: &'static str) {
  request.body = body;
  request
    .headers
    .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
}

/// Applies `headers`, then the request header, query parameter and form parameter operations.
pub(crate) fn modify_request(
  scope: &RequestScope,
  attributes: &Attributes,
  context: &EvalContext,
  request: &mut BackendRequest,
) -> Result<(), ProduceError> {
  let headers = evaluate(scope, "headers", attributes.headers.as_ref(), context)?;
  HeaderOps {
    set: headers.as_ref(),
    ..Default::default()
  }
  .apply(&mut request.headers)
  .map_err(|e| eval_error("headers", e))?;

  let remove = evaluate(scope, "remove_request_headers", attributes.remove_request_headers.as_ref(), context)?;
  let set = evaluate(scope, "set_request_headers", attributes.set_request_headers.as_ref(), context)?;
  let add = evaluate(scope, "add_request_headers", attributes.add_request_headers.as_ref(), context)?;
  HeaderOps {
    remove: remove.as_ref(),
    set: set.as_ref(),
    add: add.as_ref(),
  }
  .apply(&mut request.headers)
  .map_err(|e| eval_error("request headers", e))?;

  let remove = evaluate(scope, "remove_query_params", attributes.remove_query_params.as_ref(), context)?;
  let set = evaluate(scope, "set_query_params", attributes.set_query_params.as_ref(), context)?;
  let add = evaluate(scope, "add_query_params", attributes.add_query_params.as_ref(), context)?;
  request.url = QueryOps {
    remove: remove.as_ref(),
    set: set.as_ref(),
    add: add.as_ref(),
  }
  .apply(&request.url)
  .map_err(|e| eval_error("query params", e))?;

  let remove = evaluate(scope, "remove_form_params", attributes.remove_form_params.as_ref(), context)?;
  let set = evaluate(scope, "set_form_params", attributes.set_form_params.as_ref(), context)?;
  let add = evaluate(scope, "add_form_params", attributes.add_form_params.as_ref(), context)?;
  let form = QueryOps {
    remove: remove.as_ref(),
    set: set.as_ref(),
    add: add.as_ref(),
  };
  if form.is_empty() {
    return Ok(());
  }
  match form_params_mismatch(&request.method, &request.headers) {
    Some(mismatch) => warn!(%mismatch, "skipping form params"),
    None => {
      let encoded = form
        .apply_form(&request.body)
        .map_err(|e| eval_error("form params", e))?;
      request.body = Bytes::from(encoded);
    }
  }
  Ok(())
}
