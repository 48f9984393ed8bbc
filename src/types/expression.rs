//! Dynamic attribute expressions.
//!
//! Built from JSON configuration values:
//!
//! - a string that is exactly one `${path}` becomes a [Expression::Reference] and keeps the
//!   referenced value's type;
//! - a string mixing text and `${path}` interpolations becomes a [Expression::Template];
//! - arrays and objects nest;
//! - everything else is a [Expression::Literal].

use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::sync::OnceLock;

use crate::error::ConfigError;

/// Root variable holding the inbound client request.
pub const REQUEST: &str = "request";
/// Root variable holding the published responses of other producers, keyed by name.
pub const BACKEND_RESPONSES: &str = "backend_responses";
/// Root variable holding the outbound requests of other producers, keyed by name.
pub const BACKEND_REQUESTS: &str = "backend_requests";
/// Alias of the `default` producer's response (or the current one inside response modifiers).
pub const BACKEND_RESPONSE: &str = "backend_response";
/// Alias of the `default` producer's request (or the current one inside response modifiers).
pub const BACKEND_REQUEST: &str = "backend_request";

fn interpolation() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"\$\{\s*([^{}\s]*)\s*\}").expect("interpolation pattern is valid"))
}

/// Dotted variable path such as `backend_responses.r1.json_body.id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Traversal {
  segments: Vec<String>,
}

impl Traversal {
  pub fn parse(path: &str) -> Result<Self, ConfigError> {
    let segments: Vec<String> = path.split('.').map(str::to_string).collect();
    if segments.iter().any(String::is_empty) {
      return Err(ConfigError::Expression {
        expression: path.to_string(),
        message: "empty path segment".into(),
      });
    }
    Ok(Self { segments })
  }

  pub fn root(&self) -> &str {
    &self.segments[0]
  }

  pub fn segments(&self) -> &[String] {
    &self.segments
  }

  /// Name of the producer whose result this traversal reads, if any.
  ///
  /// The singular aliases name no producer: they read whatever result is current when the
  /// expression is evaluated and never order producers.
  pub fn referenced_producer(&self) -> Option<&str> {
    match self.root() {
      BACKEND_RESPONSES | BACKEND_REQUESTS => self.segments.get(1).map(String::as_str),
      _ => None,
    }
  }

  /// True for the singular `backend_response` / `backend_request` aliases.
  pub fn is_alias(&self) -> bool {
    matches!(self.root(), BACKEND_RESPONSE | BACKEND_REQUEST)
  }
}

impl fmt::Display for Traversal {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.segments.join("."))
  }
}

/// Piece of a string template.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
  Text(String),
  Reference(Traversal),
}

/// Attribute value evaluated per request.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
  Literal(Value),
  Reference(Traversal),
  Template(Vec<TemplatePart>),
  List(Vec<Expression>),
  Object(Vec<(String, Expression)>),
}

impl Expression {
  pub fn literal(value: impl Into<Value>) -> Self {
    Expression::Literal(value.into())
  }

  /// Parses a string attribute; shorthand for [Expression::from_json] on a JSON string.
  pub fn parse(source: &str) -> Result<Self, ConfigError> {
    parse_string(source)
  }

  pub fn from_json(value: &Value) -> Result<Self, ConfigError> {
    match value {
      Value::String(s) => parse_string(s),
      Value::Array(items) => items
        .iter()
        .map(Expression::from_json)
        .collect::<Result<Vec<_>, _>>()
        .map(Expression::List),
      Value::Object(map) => map
        .iter()
        .map(|(k, v)| Expression::from_json(v).map(|e| (k.clone(), e)))
        .collect::<Result<Vec<_>, _>>()
        .map(Expression::Object),
      other => Ok(Expression::Literal(other.clone())),
    }
  }

  /// Every variable traversal in this expression, in source order.
  pub fn traversals(&self) -> Vec<&Traversal> {
    let mut out = Vec::new();
    self.collect_traversals(&mut out);
    out
  }

  fn collect_traversals<'a>(&'a self, out: &mut Vec<&'a Traversal>) {
    match self {
      Expression::Literal(_) => {}
      Expression::Reference(t) => out.push(t),
      Expression::Template(parts) => {
        for part in parts {
          if let TemplatePart::Reference(t) = part {
            out.push(t);
          }
        }
      }
      Expression::List(items) => {
        for item in items {
          item.collect_traversals(out);
        }
      }
      Expression::Object(fields) => {
        for (_, value) in fields {
          value.collect_traversals(out);
        }
      }
    }
  }
}

fn parse_string(source: &str) -> Result<Expression, ConfigError> {
  let re = interpolation();
  let mut parts = Vec::new();
  let mut last = 0;
  for caps in re.captures_iter(source) {
    let (Some(whole), Some(path)) = (caps.get(0), caps.get(1)) else {
      continue;
    };
    if path.as_str().is_empty() {
      return Err(ConfigError::Expression {
        expression: source.to_string(),
        message: "empty interpolation".into(),
      });
    }
    let traversal = Traversal::parse(path.as_str()).map_err(|_| ConfigError::Expression {
      expression: source.to_string(),
      message: format!("invalid variable path {:?}", path.as_str()),
    })?;
    if whole.start() == 0 && whole.end() == source.len() {
      return Ok(Expression::Reference(traversal));
    }
    if whole.start() > last {
      parts.push(TemplatePart::Text(source[last..whole.start()].to_string()));
    }
    parts.push(TemplatePart::Reference(traversal));
    last = whole.end();
  }
  if parts.is_empty() {
    return Ok(Expression::Literal(Value::String(source.to_string())));
  }
  if last < source.len() {
    parts.push(TemplatePart::Text(source[last..].to_string()));
  }
  Ok(Expression::Template(parts))
}
