//! Per-request table of published producer results.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use super::ProduceResult;

/// Write-once slots keyed by producer name.
///
/// The key set is fixed at construction, so concurrent publishers never touch the map itself;
/// each slot is set at most once and reads never block.
#[derive(Debug, Default)]
pub struct ResultMap {
  slots: HashMap<String, OnceLock<Arc<ProduceResult>>>,
}

impl ResultMap {
  pub fn new<I, S>(names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      slots: names
        .into_iter()
        .map(|n| (n.into(), OnceLock::new()))
        .collect(),
    }
  }

  /// Publishes a result under its name. Returns false when the name is unknown or the slot is
  /// already set; republishing the same result is a silent no-op.
  pub fn publish(&self, result: Arc<ProduceResult>) -> bool {
    let Some(slot) = self.slots.get(&result.name) else {
      tracing::debug!(name = %result.name, "dropping result for unknown producer");
      return false;
    };
    match slot.set(Arc::clone(&result)) {
      Ok(()) => true,
      Err(_) => {
        if slot.get().is_some_and(|prev| !Arc::ptr_eq(prev, &result)) {
          tracing::debug!(name = %result.name, "result already published");
        }
        false
      }
    }
  }

  pub fn get(&self, name: &str) -> Option<Arc<ProduceResult>> {
    self.slots.get(name).and_then(|s| s.get()).cloned()
  }

  pub fn contains(&self, name: &str) -> bool {
    self.slots.contains_key(name)
  }

  /// Published results sorted by name.
  pub fn completed(&self) -> Vec<Arc<ProduceResult>> {
    let mut out: Vec<_> = self.slots.values().filter_map(|s| s.get().cloned()).collect();
    out.sort_by(|a, b| a.name.cmp(&b.name));
    out
  }

  /// Number of declared names.
  pub fn len(&self) -> usize {
    self.slots.len()
  }

  pub fn is_empty(&self) -> bool {
    self.slots.is_empty()
  }
}
