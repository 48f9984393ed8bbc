//! Leaf that forwards the inbound client request.

use async_trait::async_trait;
use std::sync::Arc;

use super::{NodeKind, Producer, RequestScope, leaf};
use crate::error::ProduceError;
use crate::eval::{EvalContext, replace_path};
use crate::types::{BackendRequest, ProduceResult, ProducerSpec};

/// Proxy leaf. Forwards the client's method, path, query, end-to-end headers and body; the
/// `method`, `url`, `path` and body attributes override them and the header, query and form
/// operations apply on top.
pub struct ProxyNode {
  spec: Arc<ProducerSpec>,
}

impl ProxyNode {
  pub fn new(spec: Arc<ProducerSpec>) -> Self {
    Self { spec }
  }

  fn outbound(
    &self,
    scope: &RequestScope,
    context: &EvalContext,
  ) -> Result<BackendRequest, ProduceError> {
    let client = scope.request();
    let attributes = self.spec.attributes();
    let method = leaf::method(scope, attributes, context)?.unwrap_or_else(|| client.method().clone());
    let mut url = leaf::url(scope, attributes, context)?
      .unwrap_or_else(|| client.path_and_query().to_string());
    if let Some(path) = leaf::path(scope, attributes, context)? {
      url = replace_path(&url, &path);
    }

    let mut request = BackendRequest::new(method, url);
    request.headers = client.headers().clone();
    leaf::strip_hop_by_hop(&mut request.headers);
    request.body = client.body().clone();
    if let Some((bytes, content_type)) = leaf::body(scope, attributes, context)? {
      leaf::set_body(&mut request, bytes, content_type);
    }
    leaf::modify_request(scope, attributes, context, &mut request)?;
    Ok(request)
  }
}

#[async_trait]
impl Producer for ProxyNode {
  fn name(&self) -> &str {
    self.spec.name()
  }

  fn kind(&self) -> NodeKind {
    NodeKind::Proxy
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
