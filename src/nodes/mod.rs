//! Producer tree nodes.
//!
//! Leaves ([RequestNode], [ProxyNode]) perform one backend call each. Composites order them:
//! [SequenceNode] runs children one after another, [ParallelNode] runs them concurrently.
//! Every node reports its result names up front through [Producer::names] and [Producer::len],
//! which lets the runtime know how many results to wait for.

use async_trait::async_trait;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::types::{ProduceResult, ProducerSpec};

mod leaf;
mod parallel_node;
mod proxy_node;
mod request_node;
mod request_scope;
mod sequence_node;

pub(crate) use leaf::strip_hop_by_hop;
pub use parallel_node::ParallelNode;
pub use proxy_node::ProxyNode;
pub use request_node::RequestNode;
pub use request_scope::RequestScope;
pub use sequence_node::SequenceNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
  Request,
  Proxy,
  Sequence,
  Parallel,
}

impl fmt::Display for NodeKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      NodeKind::Request => "request",
      NodeKind::Proxy => "proxy",
      NodeKind::Sequence => "sequence",
      NodeKind::Parallel => "parallel",
    })
  }
}

/// Unit of execution in the compiled tree.
#[async_trait]
pub trait Producer: Send + Sync {
  /// Producer name for leaves, node kind for composites.
  fn name(&self) -> &str;

  fn kind(&self) -> NodeKind;

  /// Number of results [Producer::produce] returns.
  fn len(&self) -> usize;

  fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Names of the results [Producer::produce] returns, as a multiset.
  fn names(&self) -> Vec<String>;

  fn children(&self) -> &[Arc<dyn Producer>] {
    &[]
  }

  /// The declared spec behind a leaf.
  fn spec(&self) -> Option<&Arc<ProducerSpec>> {
    None
  }

  /// Runs this node for one request. Always returns exactly [Producer::len] results, with
  /// failures carried inside them.
  async fn produce(&self, scope: Arc<RequestScope>) -> Vec<Arc<ProduceResult>>;
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
  payload
    .downcast_ref::<&str>()
    .map(|s| s.to_string())
    .or_else(|| payload.downcast_ref::<String>().cloned())
    .unwrap_or_else(|| "unknown panic".to_string())
}

/// Compact rendering of a tree, e.g. `parallel[sequence[r1, default]]`.
pub fn describe(node: &dyn Producer) -> String {
  match node.kind() {
    NodeKind::Request | NodeKind::Proxy => node.name().to_string(),
    kind => {
      let children: Vec<String> = node.children().iter().map(|c| describe(c.as_ref())).collect();
      format!("{kind}[{}]", children.join(", "))
    }
  }
}
