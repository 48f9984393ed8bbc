//! Declarative description of one backend call.

use std::fmt;
use std::sync::Arc;

use super::{DEFAULT_PRODUCER_NAME, Expression, Traversal};
use crate::backend::Backend;

/// Declaration-order identity of a producer spec within its endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpecId(pub(crate) usize);

impl SpecId {
  pub fn index(self) -> usize {
    self.0
  }
}

impl fmt::Display for SpecId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerKind {
  /// Builds its outbound request from attributes only.
  Request,
  /// Forwards the inbound client request, modified by attributes.
  Proxy,
}

impl fmt::Display for ProducerKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      ProducerKind::Request => "request",
      ProducerKind::Proxy => "proxy",
    })
  }
}

/// Attribute expressions of a request or proxy.
#[derive(Debug, Clone, Default)]
pub struct Attributes {
  pub method: Option<Expression>,
  pub url: Option<Expression>,
  /// Proxy only: replaces the forwarded path, keeping the query.
  pub path: Option<Expression>,
  pub body: Option<Expression>,
  pub json_body: Option<Expression>,
  pub form_body: Option<Expression>,
  pub headers: Option<Expression>,
  pub set_request_headers: Option<Expression>,
  pub add_request_headers: Option<Expression>,
  pub remove_request_headers: Option<Expression>,
  pub set_query_params: Option<Expression>,
  pub add_query_params: Option<Expression>,
  pub remove_query_params: Option<Expression>,
  /// Form parameter operations rewrite url-encoded POST bodies and are skipped otherwise.
  pub set_form_params: Option<Expression>,
  pub add_form_params: Option<Expression>,
  pub remove_form_params: Option<Expression>,
  pub expected_status: Option<Expression>,
  pub set_response_headers: Option<Expression>,
  pub add_response_headers: Option<Expression>,
  pub remove_response_headers: Option<Expression>,
}

impl Attributes {
  /// Attributes evaluated before the backend call, with their names.
  pub fn request_side(&self) -> Vec<(&'static str, &Expression)> {
    [
      ("method", &self.method),
      ("url", &self.url),
      ("path", &self.path),
      ("body", &self.body),
      ("json_body", &self.json_body),
      ("form_body", &self.form_body),
      ("headers", &self.headers),
      ("set_request_headers", &self.set_request_headers),
      ("add_request_headers", &self.add_request_headers),
      ("remove_request_headers", &self.remove_request_headers),
      ("set_query_params", &self.set_query_params),
      ("add_query_params", &self.add_query_params),
      ("remove_query_params", &self.remove_query_params),
      ("set_form_params", &self.set_form_params),
      ("add_form_params", &self.add_form_params),
      ("remove_form_params", &self.remove_form_params),
      ("expected_status", &self.expected_status),
    ]
    .into_iter()
    .filter_map(|(name, e)| e.as_ref().map(|e| (name, e)))
    .collect()
  }

  /// Attributes evaluated against the producer's own response.
  pub fn response_side(&self) -> Vec<(&'static str, &Expression)> {
    [
      ("set_response_headers", &self.set_response_headers),
      ("add_response_headers", &self.add_response_headers),
      ("remove_response_headers", &self.remove_response_headers),
    ]
    .into_iter()
    .filter_map(|(name, e)| e.as_ref().map(|e| (name, e)))
    .collect()
  }
}

/// One declared request or proxy of an endpoint.
#[derive(Clone)]
pub struct ProducerSpec {
  pub(crate) id: SpecId,
  name: String,
  kind: ProducerKind,
  backend: Arc<dyn Backend>,
  attributes: Attributes,
}

impl ProducerSpec {
  /// Creates a spec; an empty name becomes [DEFAULT_PRODUCER_NAME].
  pub fn new(
    name: impl Into<String>,
    kind: ProducerKind,
    backend: Arc<dyn Backend>,
    attributes: Attributes,
  ) -> Self {
    let name = name.into();
    let name = match name.trim() {
      "" => DEFAULT_PRODUCER_NAME.to_string(),
      trimmed => trimmed.to_string(),
    };
    Self {
      id: SpecId(0),
      name,
      kind,
      backend,
      attributes,
    }
  }

  pub fn request(
    name: impl Into<String>,
    backend: Arc<dyn Backend>,
    attributes: Attributes,
  ) -> Self {
    Self::new(name, ProducerKind::Request, backend, attributes)
  }

  pub fn proxy(name: impl Into<String>, backend: Arc<dyn Backend>, attributes: Attributes) -> Self {
    Self::new(name, ProducerKind::Proxy, backend, attributes)
  }

  pub fn id(&self) -> SpecId {
    self.id
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn kind(&self) -> ProducerKind {
    self.kind
  }

  pub fn backend(&self) -> &Arc<dyn Backend> {
    &self.backend
  }

  pub fn attributes(&self) -> &Attributes {
    &self.attributes
  }

  /// Producer names read by the request-side attributes, in first-seen order.
  ///
  /// Names that match no producer are the compiler's concern.
  pub fn request_references(&self) -> Vec<&str> {
    let traversals = self
      .attributes
      .request_side()
      .into_iter()
      .flat_map(|(_, e)| e.traversals());
    unique(traversals.filter_map(Traversal::referenced_producer))
  }

  /// Producer names read by the response modifiers.
  ///
  /// References to this producer's own name are dropped.
  pub fn response_references(&self) -> Vec<&str> {
    let traversals = self
      .attributes
      .response_side()
      .into_iter()
      .flat_map(|(_, e)| e.traversals());
    unique(
      traversals
        .filter_map(Traversal::referenced_producer)
        .filter(|n| *n != self.name),
    )
  }
}

fn unique<'a>(names: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
  let mut out: Vec<&str> = Vec::new();
  for name in names {
    if !out.contains(&name) {
      out.push(name);
    }
  }
  out
}

impl fmt::Debug for ProducerSpec {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ProducerSpec")
      .field("id", &self.id)
      .field("name", &self.name)
      .field("kind", &self.kind)
      .field("backend", &self.backend.name())
      .field("attributes", &self.attributes)
      .finish()
  }
}
