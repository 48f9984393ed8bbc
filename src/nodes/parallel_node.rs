//! Composite that runs its children concurrently.

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Instrument, debug, error, info_span};

use super::{NodeKind, Producer, RequestScope, panic_message};
use crate::error::ProduceError;
use crate::types::ProduceResult;

/// Spawns every child and collects exactly [Producer::len] results.
///
/// Results arrive in completion order. On cancellation the node stops waiting and reports each
/// missing name as cancelled. A panicking child is reported as failed results for its names.
pub struct ParallelNode {
  children: Vec<Arc<dyn Producer>>,
}

impl ParallelNode {
  pub fn new(children: Vec<Arc<dyn Producer>>) -> Self {
    Self { children }
  }
}

/// Runs one child, turning a panic into failed results for the child's names.
async fn run_child(child: Arc<dyn Producer>, scope: Arc<RequestScope>) -> Vec<Arc<ProduceResult>> {
  match AssertUnwindSafe(child.produce(scope)).catch_unwind().await {
    Ok(results) => results,
    Err(payload) => {
      let message = panic_message(payload.as_ref());
      error!(producer = %child.name(), %message, "producer panicked");
      child
        .names()
        .into_iter()
        .map(|name| {
          Arc::new(ProduceResult::failed(
            name,
            ProduceError::Request(format!("panic: {message}")),
          ))
        })
        .collect()
    }
  }
}

/// Names in `expected` not covered by `collected`, counting duplicates.
fn missing_names(mut expected: Vec<String>, collected: &[Arc<ProduceResult>]) -> Vec<String> {
  for result in collected {
    if let Some(i) = expected.iter().position(|n| *n == result.name) {
      expected.swap_remove(i);
    }
  }
  expected
}

#[async_trait]
impl Producer for ParallelNode {
  fn name(&self) -> &str {
    "parallel"
  }

  fn kind(&self) -> NodeKind {
    NodeKind::Parallel
  }

  fn len(&self) -> usize {
    self.children.iter().map(|c| c.len()).sum()
  }

  fn names(&self) -> Vec<String> {
    self.children.iter().flat_map(|c| c.names()).collect()
  }

  fn children(&self) -> &[Arc<dyn Producer>] {
    &self.children
  }

  async fn produce(&self, scope: Arc<RequestScope>) -> Vec<Arc<ProduceResult>> {
    let expected = self.len();
    let span = info_span!("parallel", branches = self.children.len(), expected);
    async move {
      if expected == 0 {
        return Vec::new();
      }
      let (tx, rx) = mpsc::channel::<Arc<ProduceResult>>(expected);
      let mut tasks = JoinSet::new();
      for child in &self.children {
        let child = Arc::clone(child);
        let scope = Arc::clone(&scope);
        let tx = tx.clone();
        tasks.spawn(
          async move {
            for result in run_child(child, scope).await {
              if tx.send(result).await.is_err() {
                break;
              }
            }
          }
          .in_current_span(),
        );
      }
      drop(tx);

      let mut stream = ReceiverStream::new(rx);
      let mut collected = Vec::with_capacity(expected);
      let mut cancelled = false;
      while collected.len() < expected {
        tokio::select! {
          biased;
          _ = scope.cancelled() => {
            cancelled = true;
            break;
          }
          next = stream.next() => match next {
            Some(result) => collected.push(result),
            None => break,
          },
        }
      }
      if cancelled {
        let mut rx = stream.into_inner();
        while collected.len() < expected {
          match rx.try_recv() {
            Ok(result) => collected.push(result),
            Err(_) => break,
          }
        }
      }
      tasks.abort_all();

      let missing = missing_names(self.names(), &collected);
      if !missing.is_empty() {
        debug!(missing = ?missing, cancelled, "reporting missing results as cancelled");
      }
      collected.extend(
        missing
          .into_iter()
          .map(|name| Arc::new(ProduceResult::failed(name, ProduceError::Cancelled))),
      );
      collected
    }
    .instrument(span)
    .await
  }
}
