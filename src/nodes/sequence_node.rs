//! Composite that runs its children one after another.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{Instrument, debug, info_span};

use super::{NodeKind, Producer, RequestScope};
use crate::error::ProduceError;
use crate::types::ProduceResult;

/// Runs children in order, publishing each child's results before the next one starts, and
/// returns the results of the last child.
///
/// Earlier children are dependencies: when one of them fails, the remaining children are
/// skipped and every name of the last child reports the failure, wrapped as a sequence error
/// unless it is a domain error.
pub struct SequenceNode {
  children: Vec<Arc<dyn Producer>>,
}

impl SequenceNode {
  pub fn new(children: Vec<Arc<dyn Producer>>) -> Self {
    Self { children }
  }

  fn failed(&self, error: &ProduceError) -> Vec<Arc<ProduceResult>> {
    self
      .names()
      .into_iter()
      .map(|name| {
        let error = error.clone().into_sequence(name.clone());
        Arc::new(ProduceResult::failed(name, error))
      })
      .collect()
  }

  fn interrupted(&self, completed_any: bool) -> Vec<Arc<ProduceResult>> {
    if completed_any {
      self.failed(&ProduceError::Cancelled)
    } else {
      self.failed(&ProduceError::NoResult)
    }
  }
}

#[async_trait]
impl Producer for SequenceNode {
  fn name(&self) -> &str {
    "sequence"
  }

  fn kind(&self) -> NodeKind {
    NodeKind::Sequence
  }

  fn len(&self) -> usize {
    self.children.last().map_or(0, |c| c.len())
  }

  fn names(&self) -> Vec<String> {
    self.children.last().map(|c| c.names()).unwrap_or_default()
  }

  fn children(&self) -> &[Arc<dyn Producer>] {
    &self.children
  }

  async fn produce(&self, scope: Arc<RequestScope>) -> Vec<Arc<ProduceResult>> {
    let span = info_span!("sequence", steps = self.children.len(), names = ?self.names());
    async move {
      let Some((last, dependencies)) = self.children.split_last() else {
        return Vec::new();
      };
      let mut completed_any = false;
      for child in dependencies {
        let results = tokio::select! {
          biased;
          _ = scope.cancelled() => return self.interrupted(completed_any),
          results = child.produce(Arc::clone(&scope)) => results,
        };
        completed_any = true;
        scope.publish_all(&results);
        if let Some(error) = results.iter().find_map(|r| r.error.as_ref()) {
          debug!(%error, "dependency failed, skipping remaining steps");
          return self.failed(error);
        }
      }
      tokio::select! {
        biased;
        _ = scope.cancelled() => self.interrupted(completed_any),
        results = last.produce(Arc::clone(&scope)) => results,
      }
    }
    .instrument(span)
    .await
  }
}
