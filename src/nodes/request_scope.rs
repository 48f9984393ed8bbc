//! Per-request execution state shared by every node of the tree.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use super::Producer;
use crate::eval::{EvalContext, Evaluator};
use crate::types::{ClientRequest, ProduceResult, ResultMap, SpecId};

/// Holds the client request, the [ResultMap], one invocation cell per leaf and the request's
/// cancellation token. Created fresh for every inbound request.
pub struct RequestScope {
  request: ClientRequest,
  results: ResultMap,
  invocations: HashMap<SpecId, OnceCell<Arc<ProduceResult>>>,
  evaluator: Arc<dyn Evaluator>,
  cancel: CancellationToken,
}

impl RequestScope {
  /// Walks `root` to fix the result names and leaf invocation cells.
  pub fn new(
    request: ClientRequest,
    root: &Arc<dyn Producer>,
    evaluator: Arc<dyn Evaluator>,
    cancel: CancellationToken,
  ) -> Arc<Self> {
    let mut names = Vec::new();
    let mut invocations = HashMap::new();
    collect_leaves(root.as_ref(), &mut names, &mut invocations);
    Arc::new(Self {
      request,
      results: ResultMap::new(names),
      invocations,
      evaluator,
      cancel,
    })
  }

  pub fn request(&self) -> &ClientRequest {
    &self.request
  }

  pub fn results(&self) -> &ResultMap {
    &self.results
  }

  pub fn evaluator(&self) -> &dyn Evaluator {
    self.evaluator.as_ref()
  }

  pub fn cancellation(&self) -> &CancellationToken {
    &self.cancel
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancel.is_cancelled()
  }

  /// Completes when the request is cancelled.
  pub async fn cancelled(&self) {
    self.cancel.cancelled().await
  }

  /// Publishes every result of a completed child.
  pub fn publish_all(&self, results: &[Arc<ProduceResult>]) {
    for result in results {
      self.results.publish(Arc::clone(result));
    }
  }

  pub fn eval_context(&self, current: Option<&ProduceResult>) -> EvalContext {
    EvalContext::build(&self.request, &self.results, current)
  }

  pub(crate) fn invocation(&self, id: SpecId) -> Option<&OnceCell<Arc<ProduceResult>>> {
    self.invocations.get(&id)
  }
}

fn collect_leaves(
  node: &dyn Producer,
  names: &mut Vec<String>,
  invocations: &mut HashMap<SpecId, OnceCell<Arc<ProduceResult>>>,
) {
  if let Some(spec) = node.spec() {
    if !invocations.contains_key(&spec.id()) {
      names.push(spec.name().to_string());
      invocations.insert(spec.id(), OnceCell::new());
    }
    return;
  }
  for child in node.children() {
    collect_leaves(child.as_ref(), names, invocations);
  }
}

impl fmt::Debug for RequestScope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RequestScope")
      .field("request_id", &self.request.id())
      .field("results", &self.results)
      .field("cancelled", &self.is_cancelled())
      .finish()
  }
}
