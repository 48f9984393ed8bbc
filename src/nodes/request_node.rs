//! Leaf that builds its outbound request from attributes alone.

use async_trait::async_trait;
use axum::http::Method;
use std::sync::Arc;

use super::{NodeKind, Producer, RequestScope, leaf};
use crate::error::ProduceError;
use crate::eval::EvalContext;
use crate::types::{BackendRequest, ProduceResult, ProducerSpec};

/// Request leaf. The method defaults to `GET`, or `POST` when a body is set.
pub struct RequestNode {
  spec: Arc<ProducerSpec>,
}

impl RequestNode {
  pub fn new(spec: Arc<ProducerSpec>) -> Self {
    Self { spec }
  }

  fn outbound(
    &self,
    scope: &RequestScope,
    context: &EvalContext,
  ) -> Result<BackendRequest, ProduceError> {
    let attributes = self.spec.attributes();
    let body = leaf::body(scope, attributes, context)?;
    let method = match leaf::method(scope, attributes, context)? {
      Some(method) => method,
      None if body.is_some() => Method::POST,
      None => Method::GET,
    };
    let url = leaf::url(scope, attributes, context)?.unwrap_or_default();

    let mut request = BackendRequest::new(method, url);
    if let Some((bytes, content_type)) = body {
      leaf::set_body(&mut request, bytes, content_type);
    }
    leaf::modify_request(scope, attributes, context, &mut request)?;
    Ok(request)
  }
}

#[async_trait]
impl Producer for RequestNode {
  fn name(&self) -> &str {
    self.spec.name()
  }

  fn kind(&self) -> NodeKind {
    NodeKind::Request
  }

  fn len(&self) -> usize {
    1
  }

  fn names(&self) -> Vec<String> {
    vec![self.spec.name().to_string()]
  }

  fn spec(&self) -> Option<&Arc<ProducerSpec>> {
    Some(&self.spec)
  }

  async fn produce(&self, scope: Arc<RequestScope>) -> Vec<Arc<ProduceResult>> {
    let result = leaf::produce_leaf(&self.spec, &scope, |context| self.outbound(&scope, context)).await;
    vec![result]
  }
}
