//! Expression evaluation against the per-request variable context.
//!
//! Variables:
//!
//! - `request`: the inbound client request (`id`, `method`, `path`, `url`, `query`, `headers`,
//!   `body`, `json_body`).
//! - `backend_responses.<name>`: published response of producer `<name>` (`status`, `headers`,
//!   `body`, `json_body`).
//! - `backend_requests.<name>`: published outbound request of `<name>` (`method`, `url`, `path`,
//!   `query`, `headers`, `body`).
//! - `backend_response` / `backend_request`: the current producer's result inside response
//!   modifiers, otherwise the `default` producer's.
//!
//! Unknown root variables are errors. Missing nested keys evaluate to `null`.

use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde_json::{Map, Value};
use tracing::instrument;

use crate::error::EvalError;
use crate::types::{
  BACKEND_REQUEST, BACKEND_REQUESTS, BACKEND_RESPONSE, BACKEND_RESPONSES, BackendRequest,
  BackendResponse, ClientRequest, DEFAULT_PRODUCER_NAME, Expression, ProduceResult, REQUEST,
  ResultMap, TemplatePart, Traversal,
};

pub(crate) const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Evaluates attribute expressions. Implementations must be shareable across request tasks.
pub trait Evaluator: Send + Sync {
  fn evaluate(&self, expression: &Expression, context: &EvalContext) -> Result<Value, EvalError>;
}

/// Evaluator resolving references by variable lookup and templates by string concatenation.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultEvaluator;

impl Evaluator for DefaultEvaluator {
  fn evaluate(&self, expression: &Expression, context: &EvalContext) -> Result<Value, EvalError> {
    match expression {
      Expression::Literal(v) => Ok(v.clone()),
      Expression::Reference(t) => context.lookup(t),
      Expression::Template(parts) => {
        let mut out = String::new();
        for part in parts {
          match part {
            TemplatePart::Text(s) => out.push_str(s),
            TemplatePart::Reference(t) => out.push_str(&value_to_string(&context.lookup(t)?)),
          }
        }
        Ok(Value::String(out))
      }
      Expression::List(items) => items
        .iter()
        .map(|e| self.evaluate(e, context))
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Array),
      Expression::Object(fields) => {
        let mut map = Map::new();
        for (k, e) in fields {
          map.insert(k.clone(), self.evaluate(e, context)?);
        }
        Ok(Value::Object(map))
      }
    }
  }
}

/// Root variables visible to expressions.
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
  variables: Map<String, Value>,
}

impl EvalContext {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
    self.set(name, value);
    self
  }

  pub fn set(&mut self, name: impl Into<String>, value: Value) {
    self.variables.insert(name.into(), value);
  }

  pub fn variable(&self, name: &str) -> Option<&Value> {
    self.variables.get(name)
  }

  /// Resolves a traversal. Unknown roots fail; missing nested keys yield `null`.
  pub fn lookup(&self, traversal: &Traversal) -> Result<Value, EvalError> {
    let mut segments = traversal.segments().iter();
    let root = traversal.root();
    let mut current = self
      .variables
      .get(root)
      .ok_or_else(|| EvalError::UnknownVariable(root.to_string()))?;
    segments.next();
    for segment in segments {
      let next = match current {
        Value::Object(map) => map.get(segment.as_str()),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
      };
      match next {
        Some(v) => current = v,
        None => return Ok(Value::Null),
      }
    }
    Ok(current.clone())
  }

  /// Builds the context for one evaluation from the request, the published results and the
  /// producer currently applying its response modifiers (if any).
  #[instrument(level = "trace", skip_all, fields(request_id = %request.id()))]
  pub fn build(
    request: &ClientRequest,
    results: &ResultMap,
    current: Option<&ProduceResult>,
  ) -> Self {
    let mut responses = Map::new();
    let mut requests = Map::new();
    for result in results.completed() {
      if let Some(res) = &result.response {
        responses.insert(result.name.clone(), response_value(res));
      }
      if let Some(req) = &result.request {
        requests.insert(result.name.clone(), request_value(req));
      }
    }
    let (alias_response, alias_request) = match current {
      Some(c) => (
        c.response.as_deref().map(response_value),
        c.request.as_deref().map(request_value),
      ),
      None => (
        responses.get(DEFAULT_PRODUCER_NAME).cloned(),
        requests.get(DEFAULT_PRODUCER_NAME).cloned(),
      ),
    };
    Self::new()
      .with_variable(REQUEST, client_request_value(request))
      .with_variable(BACKEND_RESPONSES, Value::Object(responses))
      .with_variable(BACKEND_REQUESTS, Value::Object(requests))
      .with_variable(BACKEND_RESPONSE, alias_response.unwrap_or(Value::Null))
      .with_variable(BACKEND_REQUEST, alias_request.unwrap_or(Value::Null))
  }
}

fn client_request_value(request: &ClientRequest) -> Value {
  let mut map = Map::new();
  map.insert("id".into(), Value::String(request.id().to_string()));
  map.insert("method".into(), Value::String(request.method().to_string()));
  map.insert("path".into(), Value::String(request.path().to_string()));
  map.insert("url".into(), Value::String(request.uri().to_string()));
  map.insert("query".into(), query_value(request.query()));
  map.insert("headers".into(), headers_value(request.headers()));
  map.insert(
    "body".into(),
    Value::String(String::from_utf8_lossy(request.body()).into_owned()),
  );
  map.insert(
    "json_body".into(),
    request.json_body().unwrap_or(Value::Null),
  );
  Value::Object(map)
}

fn response_value(response: &BackendResponse) -> Value {
  let mut map = Map::new();
  map.insert("status".into(), Value::from(response.status.as_u16()));
  map.insert("headers".into(), headers_value(&response.headers));
  map.insert(
    "body".into(),
    Value::String(String::from_utf8_lossy(&response.body).into_owned()),
  );
  map.insert(
    "json_body".into(),
    response.json_body().unwrap_or(Value::Null),
  );
  Value::Object(map)
}

fn request_value(request: &BackendRequest) -> Value {
  let mut map = Map::new();
  map.insert("method".into(), Value::String(request.method.to_string()));
  map.insert("url".into(), Value::String(request.url.clone()));
  map.insert("path".into(), Value::String(request.path().to_string()));
  map.insert("query".into(), query_value(request.query()));
  map.insert("headers".into(), headers_value(&request.headers));
  map.insert(
    "body".into(),
    Value::String(String::from_utf8_lossy(&request.body).into_owned()),
  );
  Value::Object(map)
}

/// Header names map to their value; repeated headers are joined with `, `.
pub(crate) fn headers_value(headers: &HeaderMap) -> Value {
  let mut map = Map::new();
  for name in headers.keys() {
    let joined = headers
      .get_all(name)
      .iter()
      .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
      .collect::<Vec<_>>()
      .join(", ");
    map.insert(name.as_str().to_string(), Value::String(joined));
  }
  Value::Object(map)
}

/// Query parameter names map to the list of their values.
pub(crate) fn query_value(query: Option<&str>) -> Value {
  let pairs: Vec<(String, String)> = query
    .and_then(|q| serde_urlencoded::from_str(q).ok())
    .unwrap_or_default();
  let mut map = Map::new();
  for (k, v) in pairs {
    let entry = map.entry(k).or_insert_with(|| Value::Array(Vec::new()));
    if let Value::Array(values) = entry {
      values.push(Value::String(v));
    }
  }
  Value::Object(map)
}

/// String rendering used by templates, header values and plain bodies.
pub fn value_to_string(value: &Value) -> String {
  match value {
    Value::Null => String::new(),
    Value::String(s) => s.clone(),
    Value::Bool(b) => b.to_string(),
    Value::Number(n) => n.to_string(),
    other => other.to_string(),
  }
}

/// Reads an HTTP status from a number or numeric string.
pub fn value_to_status(value: &Value) -> Option<u16> {
  match value {
    Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
    Value::String(s) => s.trim().parse().ok(),
    _ => None,
  }
}

/// Accepted status list: a single status or an array of them; `null` means no constraint.
pub fn value_to_status_list(value: &Value) -> Result<Vec<u16>, EvalError> {
  let type_error = |v: &Value| EvalError::Type {
    expected: "status code or list of status codes",
    found: v.to_string(),
  };
  match value {
    Value::Null => Ok(Vec::new()),
    Value::Array(items) => items
      .iter()
      .map(|v| value_to_status(v).ok_or_else(|| type_error(v)))
      .collect(),
    single => value_to_status(single)
      .map(|s| vec![s])
      .ok_or_else(|| type_error(single)),
  }
}

/// Name/value list from an object whose values are strings or lists of strings.
fn value_to_pairs(value: &Value) -> Result<Vec<(String, Vec<String>)>, EvalError> {
  match value {
    Value::Null => Ok(Vec::new()),
    Value::Object(map) => Ok(
      map
        .iter()
        .map(|(k, v)| {
          let values = match v {
            Value::Array(items) => items.iter().map(value_to_string).collect(),
            single => vec![value_to_string(single)],
          };
          (k.clone(), values)
        })
        .collect(),
    ),
    other => Err(EvalError::Type {
      expected: "object",
      found: other.to_string(),
    }),
  }
}

/// Name list from a string or an array of strings.
fn value_to_names(value: &Value) -> Result<Vec<String>, EvalError> {
  match value {
    Value::Null => Ok(Vec::new()),
    Value::String(s) => Ok(vec![s.clone()]),
    Value::Array(items) => Ok(items.iter().map(value_to_string).collect()),
    other => Err(EvalError::Type {
      expected: "list of names",
      found: other.to_string(),
    }),
  }
}

fn header_name(name: &str) -> Result<HeaderName, EvalError> {
  HeaderName::from_bytes(name.trim().as_bytes())
    .map_err(|_| EvalError::InvalidHeader(name.to_string()))
}

fn header_value(value: &str) -> Result<HeaderValue, EvalError> {
  HeaderValue::from_str(value).map_err(|_| EvalError::InvalidHeader(value.to_string()))
}

/// Evaluated header operations, applied in remove, set, add order.
#[derive(Debug, Default)]
pub struct HeaderOps<'a> {
  pub remove: Option<&'a Value>,
  pub set: Option<&'a Value>,
  pub add: Option<&'a Value>,
}

impl HeaderOps<'_> {
  pub fn apply(&self, headers: &mut HeaderMap) -> Result<(), EvalError> {
    if let Some(remove) = self.remove {
      for name in value_to_names(remove)? {
        headers.remove(header_name(&name)?);
      }
    }
    if let Some(set) = self.set {
      for (name, values) in value_to_pairs(set)? {
        let name = header_name(&name)?;
        headers.remove(&name);
        for value in values {
          headers.append(name.clone(), header_value(&value)?);
        }
      }
    }
    if let Some(add) = self.add {
      for (name, values) in value_to_pairs(add)? {
        let name = header_name(&name)?;
        for value in values {
          headers.append(name.clone(), header_value(&value)?);
        }
      }
    }
    Ok(())
  }
}

/// Evaluated query or form parameter operations, applied in remove, set, add order.
#[derive(Debug, Default)]
pub struct QueryOps<'a> {
  pub remove: Option<&'a Value>,
  pub set: Option<&'a Value>,
  pub add: Option<&'a Value>,
}

impl QueryOps<'_> {
  pub fn is_empty(&self) -> bool {
    self.remove.is_none() && self.set.is_none() && self.add.is_none()
  }

  /// Returns `url` with its query rewritten. Parameter order is kept; set parameters replace
  /// existing ones in place of their first occurrence.
  pub fn apply(&self, url: &str) -> Result<String, EvalError> {
    if self.is_empty() {
      return Ok(url.to_string());
    }
    let (base, fragment) = match url.split_once('#') {
      Some((b, f)) => (b, Some(f)),
      None => (url, None),
    };
    let (base, query) = match base.split_once('?') {
      Some((b, q)) => (b, q),
      None => (base, ""),
    };
    let encoded = self.rewrite(query)?;
    let mut out = base.to_string();
    if !encoded.is_empty() {
      out.push('?');
      out.push_str(&encoded);
    }
    if let Some(fragment) = fragment {
      out.push('#');
      out.push_str(fragment);
    }
    Ok(out)
  }

  /// Returns the url-encoded form `body` with the same operations applied.
  pub fn apply_form(&self, body: &[u8]) -> Result<String, EvalError> {
    self.rewrite(&String::from_utf8_lossy(body))
  }

  fn rewrite(&self, encoded: &str) -> Result<String, EvalError> {
    let mut pairs: Vec<(String, String)> = serde_urlencoded::from_str(encoded).unwrap_or_default();

    if let Some(remove) = self.remove {
      let names = value_to_names(remove)?;
      pairs.retain(|(k, _)| !names.contains(k));
    }
    if let Some(set) = self.set {
      for (name, values) in value_to_pairs(set)? {
        let position = pairs.iter().position(|(k, _)| *k == name);
        pairs.retain(|(k, _)| *k != name);
        let at = position.unwrap_or(pairs.len()).min(pairs.len());
        for (offset, value) in values.into_iter().enumerate() {
          pairs.insert(at + offset, (name.clone(), value));
        }
      }
    }
    if let Some(add) = self.add {
      for (name, values) in value_to_pairs(add)? {
        pairs.extend(values.into_iter().map(|v| (name.clone(), v)));
      }
    }

    serde_urlencoded::to_string(&pairs).map_err(|e| EvalError::Type {
      expected: "url-encoded parameters",
      found: e.to_string(),
    })
  }
}

/// Why form parameter operations cannot apply to a request, if they cannot. They need a POST
/// with an `application/x-www-form-urlencoded` body.
pub(crate) fn form_params_mismatch(method: &Method, headers: &HeaderMap) -> Option<String> {
  if method != Method::POST {
    return Some(format!("method mismatch: {method}"));
  }
  let content_type = headers
    .get(CONTENT_TYPE)
    .and_then(|v| v.to_str().ok())
    .unwrap_or_default();
  if !content_type
    .to_ascii_lowercase()
    .starts_with(FORM_CONTENT_TYPE)
  {
    return Some(format!("content-type mismatch: {content_type:?}"));
  }
  None
}

/// Checks an evaluated `path` and makes it absolute. Empty means unset.
pub fn request_path(value: &Value) -> Result<Option<String>, EvalError> {
  let path = value_to_string(value);
  if path.is_empty() {
    return Ok(None);
  }
  if path.contains('#') || path.contains('?') {
    return Err(EvalError::InvalidPath(path));
  }
  match path.starts_with('/') {
    true => Ok(Some(path)),
    false => Ok(Some(format!("/{path}"))),
  }
}

/// Replaces the path of `url`, keeping its query.
pub(crate) fn replace_path(url: &str, path: &str) -> String {
  match url.split_once('?') {
    Some((_, query)) => format!("{path}?{query}"),
    None => path.to_string(),
  }
}

/// URL-encodes a form body from an object of strings or string lists.
pub fn form_encode(value: &Value) -> Result<String, EvalError> {
  let pairs: Vec<(String, String)> = value_to_pairs(value)?
    .into_iter()
    .flat_map(|(k, values)| values.into_iter().map(move |v| (k.clone(), v)))
    .collect();
  serde_urlencoded::to_string(&pairs).map_err(|e| EvalError::Type {
    expected: "form body",
    found: e.to_string(),
  })
}
