//! Compile the producer specs of one endpoint into an executable producer tree.
//!
//! 1. Scan each spec's request-side attributes for `backend_responses.<name>` (and
//!    `backend_requests.<name>`) references; the singular aliases count as `default`.
//!    References to unknown names are ignored.
//! 2. Reject self-references, duplicate names and dependency cycles.
//! 3. Drop direct dependencies that are already reachable through another direct dependency.
//! 4. Compile every spec bottom-up: a spec without dependencies is a leaf; a spec with
//!    dependencies is `Sequence[deps, leaf]`, where `deps` is the single dependency node or a
//!    `Parallel` of them in declaration order. Compiled nodes are memoized per spec, so a shared
//!    dependency is one node instance referenced by every consumer.
//! 5. The root is a `Parallel` of the terminal specs (referenced by nobody).

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::error::ConfigError;
use crate::nodes::{ParallelNode, Producer, ProxyNode, RequestNode, SequenceNode, describe};
use crate::types::{ProducerKind, ProducerSpec, SpecId};

/// Collects producer specs in declaration order and compiles them.
#[derive(Debug, Default)]
pub struct GraphBuilder {
  specs: Vec<ProducerSpec>,
}

impl GraphBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add(mut self, spec: ProducerSpec) -> Self {
    self.specs.push(spec);
    self
  }

  pub fn extend(mut self, specs: impl IntoIterator<Item = ProducerSpec>) -> Self {
    self.specs.extend(specs);
    self
  }

  /// Assigns spec ids and compiles the tree.
  #[instrument(level = "trace", skip(self), fields(producers = self.specs.len()))]
  pub fn build(self) -> Result<CompiledGraph, ConfigError> {
    let specs: Vec<Arc<ProducerSpec>> = self
      .specs
      .into_iter()
      .enumerate()
      .map(|(i, mut spec)| {
        spec.id = SpecId(i);
        Arc::new(spec)
      })
      .collect();

    let dependencies = resolve_dependencies(&specs)?;
    check_acyclic(&specs, &dependencies)?;
    let reduced = reduce(&dependencies);

    let referenced: BTreeSet<usize> = dependencies.iter().flatten().copied().collect();
    let terminals: Vec<usize> = (0..specs.len()).filter(|i| !referenced.contains(i)).collect();

    let mut compiler = Compiler {
      specs: &specs,
      dependencies: &reduced,
      memo: HashMap::new(),
    };
    let roots: Vec<Arc<dyn Producer>> = terminals.iter().map(|&i| compiler.compile(i)).collect();
    let root: Arc<dyn Producer> = Arc::new(ParallelNode::new(roots));

    info!(
      producers = specs.len(),
      terminals = terminals.len(),
      "compiled producer tree"
    );
    debug!(tree = %describe(root.as_ref()), "producer tree layout");

    Ok(CompiledGraph {
      dependencies: dependencies
        .iter()
        .map(|deps| deps.iter().map(|&d| specs[d].name().to_string()).collect())
        .collect(),
      terminals: terminals.iter().map(|&i| specs[i].name().to_string()).collect(),
      root,
      specs,
    })
  }
}

/// Executable form of one endpoint's producers.
pub struct CompiledGraph {
  root: Arc<dyn Producer>,
  specs: Vec<Arc<ProducerSpec>>,
  dependencies: Vec<Vec<String>>,
  terminals: Vec<String>,
}

impl CompiledGraph {
  /// `Parallel` of the terminal producers.
  pub fn root(&self) -> &Arc<dyn Producer> {
    &self.root
  }

  pub fn specs(&self) -> &[Arc<ProducerSpec>] {
    &self.specs
  }

  /// Direct dependencies of `name` before reduction, in declaration order.
  pub fn dependencies_of(&self, name: &str) -> Option<&[String]> {
    self
      .specs
      .iter()
      .position(|s| s.name() == name)
      .map(|i| self.dependencies[i].as_slice())
  }

  /// Names of the producers no other producer depends on, in declaration order.
  pub fn terminals(&self) -> &[String] {
    &self.terminals
  }

  /// Number of results the root yields per request.
  pub fn len(&self) -> usize {
    self.root.len()
  }

  pub fn is_empty(&self) -> bool {
    self.specs.is_empty()
  }

  pub fn describe(&self) -> String {
    describe(self.root.as_ref())
  }
}

impl std::fmt::Debug for CompiledGraph {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CompiledGraph")
      .field("tree", &self.describe())
      .field("terminals", &self.terminals)
      .finish()
  }
}

/// Direct dependency indices per spec, in declaration order of the dependencies.
#[instrument(level = "trace", skip_all)]
fn resolve_dependencies(specs: &[Arc<ProducerSpec>]) -> Result<Vec<Vec<usize>>, ConfigError> {
  let mut index: HashMap<&str, usize> = HashMap::new();
  for (i, spec) in specs.iter().enumerate() {
    if index.insert(spec.name(), i).is_some() {
      return Err(ConfigError::DuplicateName(spec.name().to_string()));
    }
  }

  specs
    .iter()
    .map(|spec| {
      let request_refs = spec.request_references();
      if request_refs.contains(&spec.name()) {
        return Err(ConfigError::SelfReference(spec.name().to_string()));
      }
      let names = request_refs.into_iter().chain(spec.response_references());
      let mut deps: Vec<usize> = names.filter_map(|n| index.get(n).copied()).collect();
      deps.sort_unstable();
      deps.dedup();
      Ok(deps)
    })
    .collect()
}

/// Depth-first search with three marks; a back edge is a cycle.
fn check_acyclic(specs: &[Arc<ProducerSpec>], deps: &[Vec<usize>]) -> Result<(), ConfigError> {
  #[derive(Clone, Copy, PartialEq)]
  enum Mark {
    New,
    Active,
    Done,
  }

  fn visit(
    node: usize,
    specs: &[Arc<ProducerSpec>],
    deps: &[Vec<usize>],
    marks: &mut [Mark],
    stack: &mut Vec<usize>,
  ) -> Result<(), ConfigError> {
    marks[node] = Mark::Active;
    stack.push(node);
    for &dep in &deps[node] {
      match marks[dep] {
        Mark::Active => {
          let start = stack.iter().position(|&s| s == dep).unwrap_or(0);
          let path: Vec<&str> = stack[start..]
            .iter()
            .chain(std::iter::once(&dep))
            .map(|&i| specs[i].name())
            .collect();
          return Err(ConfigError::Cycle(path.join(" -> ")));
        }
        Mark::New => visit(dep, specs, deps, marks, stack)?,
        Mark::Done => {}
      }
    }
    stack.pop();
    marks[node] = Mark::Done;
    Ok(())
  }

  let mut marks = vec![Mark::New; specs.len()];
  let mut stack = Vec::new();
  for node in 0..specs.len() {
    if marks[node] == Mark::New {
      visit(node, specs, deps, &mut marks, &mut stack)?;
    }
  }
  Ok(())
}

/// Transitive reduction of an acyclic dependency list.
fn reduce(deps: &[Vec<usize>]) -> Vec<Vec<usize>> {
  fn reach(node: usize, deps: &[Vec<usize>], memo: &mut Vec<Option<BTreeSet<usize>>>) -> BTreeSet<usize> {
    if let Some(known) = &memo[node] {
      return known.clone();
    }
    let mut out = BTreeSet::new();
    for &dep in &deps[node] {
      out.insert(dep);
      out.extend(reach(dep, deps, memo));
    }
    memo[node] = Some(out.clone());
    out
  }

  let mut memo = vec![None; deps.len()];
  let reachable: Vec<BTreeSet<usize>> = (0..deps.len()).map(|i| reach(i, deps, &mut memo)).collect();
  deps
    .iter()
    .map(|direct| {
      direct
        .iter()
        .copied()
        .filter(|&d| !direct.iter().any(|&other| other != d && reachable[other].contains(&d)))
        .collect()
    })
    .collect()
}

struct Compiler<'a> {
  specs: &'a [Arc<ProducerSpec>],
  dependencies: &'a [Vec<usize>],
  memo: HashMap<SpecId, Arc<dyn Producer>>,
}

impl Compiler<'_> {
  fn compile(&mut self, index: usize) -> Arc<dyn Producer> {
    let specs = self.specs;
    let spec = &specs[index];
    if let Some(node) = self.memo.get(&spec.id()) {
      return Arc::clone(node);
    }
    let leaf: Arc<dyn Producer> = match spec.kind() {
      ProducerKind::Request => Arc::new(RequestNode::new(Arc::clone(spec))),
      ProducerKind::Proxy => Arc::new(ProxyNode::new(Arc::clone(spec))),
    };
    let deps = self.dependencies[index].clone();
    let node: Arc<dyn Producer> = match deps.as_slice() {
      [] => leaf,
      [single] => {
        let dep = self.compile(*single);
        Arc::new(SequenceNode::new(vec![dep, leaf]))
      }
      many => {
        let group: Vec<Arc<dyn Producer>> = many.iter().map(|&d| self.compile(d)).collect();
        Arc::new(SequenceNode::new(vec![Arc::new(ParallelNode::new(group)), leaf]))
      }
    };
    self.memo.insert(spec.id(), Arc::clone(&node));
    node
  }
}
