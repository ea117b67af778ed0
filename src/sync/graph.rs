//! Dependency graph for hierarchical import.
//!
//! Starting from seed records, the graph follows owned children (bounded by
//! a depth limit) and references to source records the target lacks. Edges
//! point from a dependent to its prerequisite:
//!
//! - a child depends on its owner (ownership edge)
//! - a referencing record depends on the referenced record (reference edge)
//!
//! [`DependencyGraph::order`] is Kahn's algorithm with deterministic
//! tie-breaking by discovery order. When it stalls, reference edges are
//! relaxed (the importer writes those fields in a second pass). A stall made
//! only of ownership edges is an ownership cycle; that subtree is skipped and
//! the rest of the graph continues.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;

use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::{Record, RecordId};
use crate::storage::RecordSource;

/// Default bound on ownership nesting below a seed.
pub const DEFAULT_MAX_DEPTH: usize = 8;

/// Structural problems found while building or ordering the graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DependencyError {
    #[error("ownership cycle: {}", .chain.join(" -> "))]
    OwnershipCycle { chain: Vec<String> },

    #[error("depth limit {max_depth} reached below {seed}: {}", .chain.join(" -> "))]
    DepthLimit {
        seed: String,
        max_depth: usize,
        chain: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    Ownership,
    Reference,
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ownership => write!(f, "ownership"),
            Self::Reference => write!(f, "reference"),
        }
    }
}

/// `dependent` must be written after `prerequisite`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependencyEdge {
    pub dependent: RecordId,
    pub prerequisite: RecordId,
    pub kind: EdgeKind,
    /// Owning collection or reference property.
    pub field: String,
}

#[derive(Debug, Clone, Copy)]
pub struct GraphOptions {
    pub include_owned: bool,
    pub resolve_references: bool,
    pub max_depth: usize,
    /// Turn depth truncation into an error that skips the seed's subtree.
    pub strict_depth: bool,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            include_owned: true,
            resolve_references: true,
            max_depth: DEFAULT_MAX_DEPTH,
            strict_depth: false,
        }
    }
}

/// Write order produced by [`DependencyGraph::order`].
#[derive(Debug, Clone, Default)]
pub struct Ordering {
    pub order: Vec<RecordId>,
    /// Reference edges dropped to break cycles.
    pub relaxed: Vec<DependencyEdge>,
    pub errors: Vec<DependencyError>,
    /// Records left out because of an ownership cycle or a strict depth limit.
    pub skipped: Vec<RecordId>,
}

#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: Vec<Record>,
    index: HashMap<RecordId, usize>,
    /// Seed each node was discovered from.
    root: Vec<usize>,
    /// Owner through which each node was discovered, for depth chains.
    parent: Vec<Option<usize>>,
    edges: Vec<DependencyEdge>,
    edge_set: HashSet<(usize, usize, EdgeKind)>,
    truncated: Vec<RecordId>,
    excluded_roots: HashSet<usize>,
    errors: Vec<DependencyError>,
}

fn node_label(record: &Record) -> String {
    format!("{} {}", record.record_type(), record.id)
}

impl DependencyGraph {
    /// Discover every record the seeds need.
    ///
    /// References that already resolve in `target` add no node.
    ///
    /// # Errors
    ///
    /// Returns `RecordNotFound` for a seed missing from the source, or a
    /// store error.
    pub fn build<S, T>(source: &S, target: &T, seeds: &[RecordId], options: GraphOptions) -> Result<Self>
    where
        S: RecordSource + ?Sized,
        T: RecordSource + ?Sized,
    {
        let mut graph = Self::default();
        let mut queue = VecDeque::new();

        for seed in seeds {
            if graph.index.contains_key(seed) {
                continue;
            }
            let record = source
                .get(seed)?
                .ok_or_else(|| Error::RecordNotFound { id: seed.to_string() })?;
            let i = graph.add_node(record, None, None);
            queue.push_back((i, 0usize));
        }

        while let Some((i, depth)) = queue.pop_front() {
            if graph.excluded_roots.contains(&graph.root[i]) {
                continue;
            }
            let id = graph.nodes[i].id;

            if options.include_owned {
                let children = source.children(&id)?;
                if !children.is_empty() && depth >= options.max_depth {
                    graph.truncate(i, options);
                } else {
                    for child in children {
                        let field = child.owner.as_ref().map(|o| o.field.clone()).unwrap_or_default();
                        let j = match graph.index.get(&child.id) {
                            Some(&j) => j,
                            None => {
                                let j = graph.add_node(child, Some(graph.root[i]), Some(i));
                                queue.push_back((j, depth + 1));
                                j
                            }
                        };
                        graph.add_edge(j, i, EdgeKind::Ownership, field);
                    }
                }
            }

            if options.resolve_references {
                for (field, ref_id) in graph.nodes[i].references() {
                    if let Some(&j) = graph.index.get(&ref_id) {
                        graph.add_edge(i, j, EdgeKind::Reference, field);
                        continue;
                    }
                    if target.contains(&ref_id)? {
                        continue;
                    }
                    if let Some(referenced) = source.get(&ref_id)? {
                        let j = graph.add_node(referenced, Some(graph.root[i]), None);
                        queue.push_back((j, 0));
                        graph.add_edge(i, j, EdgeKind::Reference, field);
                    }
                }
            }
        }

        debug!(
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            truncated = graph.truncated.len(),
            "Built dependency graph"
        );
        Ok(graph)
    }

    fn add_node(&mut self, record: Record, root: Option<usize>, parent: Option<usize>) -> usize {
        let i = self.nodes.len();
        self.index.insert(record.id, i);
        self.nodes.push(record);
        self.root.push(root.unwrap_or(i));
        self.parent.push(parent);
        i
    }

    fn add_edge(&mut self, dependent: usize, prerequisite: usize, kind: EdgeKind, field: String) {
        if dependent == prerequisite || !self.edge_set.insert((dependent, prerequisite, kind)) {
            return;
        }
        self.edges.push(DependencyEdge {
            dependent: self.nodes[dependent].id,
            prerequisite: self.nodes[prerequisite].id,
            kind,
            field,
        });
    }

    fn chain_to(&self, i: usize) -> Vec<String> {
        let mut chain = vec![node_label(&self.nodes[i])];
        let mut cur = i;
        while let Some(p) = self.parent[cur] {
            chain.push(node_label(&self.nodes[p]));
            cur = p;
        }
        chain.reverse();
        chain
    }

    fn truncate(&mut self, i: usize, options: GraphOptions) {
        let id = self.nodes[i].id;
        self.truncated.push(id);
        let root = self.root[i];
        warn!(id = %id, max_depth = options.max_depth, "Depth limit reached, owned children not followed");
        if options.strict_depth && self.excluded_roots.insert(root) {
            self.errors.push(DependencyError::DepthLimit {
                seed: node_label(&self.nodes[root]),
                max_depth: options.max_depth,
                chain: self.chain_to(i),
            });
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: &RecordId) -> Option<&Record> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    #[must_use]
    pub fn contains(&self, id: &RecordId) -> bool {
        self.index.contains_key(id)
    }

    /// All discovered records, in discovery order.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.nodes.iter()
    }

    #[must_use]
    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    /// Records whose owned children were not followed because of the depth limit.
    #[must_use]
    pub fn truncated(&self) -> &[RecordId] {
        &self.truncated
    }

    /// Errors found while building (strict depth limits).
    #[must_use]
    pub fn errors(&self) -> &[DependencyError] {
        &self.errors
    }

    /// Topological write order: prerequisites first.
    #[must_use]
    pub fn order(&self) -> Ordering {
        let n = self.nodes.len();
        let mut result = Ordering {
            errors: self.errors.clone(),
            ..Ordering::default()
        };

        let mut active: Vec<bool> = (0..n).map(|i| !self.excluded_roots.contains(&self.root[i])).collect();
        for (i, _) in active.iter().enumerate().filter(|(_, a)| !**a) {
            result.skipped.push(self.nodes[i].id);
        }

        let edges: Vec<(usize, usize, EdgeKind)> = self
            .edges
            .iter()
            .map(|e| (self.index[&e.dependent], self.index[&e.prerequisite], e.kind))
            .collect();
        let mut live: Vec<bool> = edges.iter().map(|&(d, p, _)| active[d] && active[p]).collect();
        let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut incoming: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut indegree = vec![0usize; n];
        for (e, &(d, p, _)) in edges.iter().enumerate() {
            outgoing[p].push(e);
            incoming[d].push(e);
            if live[e] {
                indegree[d] += 1;
            }
        }

        let mut done = vec![false; n];
        let mut ready: BTreeSet<usize> = (0..n).filter(|&i| active[i] && indegree[i] == 0).collect();

        loop {
            while let Some(i) = ready.pop_first() {
                done[i] = true;
                result.order.push(self.nodes[i].id);
                for &e in &outgoing[i] {
                    if !live[e] {
                        continue;
                    }
                    live[e] = false;
                    let d = edges[e].0;
                    indegree[d] -= 1;
                    if indegree[d] == 0 && active[d] && !done[d] {
                        ready.insert(d);
                    }
                }
            }

            let remaining: Vec<usize> = (0..n).filter(|&i| active[i] && !done[i]).collect();
            if remaining.is_empty() {
                break;
            }

            // Stalled. Prefer relaxing a node blocked only by references.
            let relaxable = remaining.iter().copied().find(|&i| {
                incoming[i]
                    .iter()
                    .filter(|&&e| live[e])
                    .all(|&e| edges[e].2 == EdgeKind::Reference)
            });
            if let Some(i) = relaxable {
                for &e in &incoming[i] {
                    if live[e] {
                        live[e] = false;
                        result.relaxed.push(self.edges[e].clone());
                    }
                }
                indegree[i] = 0;
                ready.insert(i);
                continue;
            }

            // Every stalled node waits on an owner: follow owners to the cycle.
            let mut path: Vec<usize> = Vec::new();
            let mut cur = remaining[0];
            let cycle = loop {
                if let Some(pos) = path.iter().position(|&p| p == cur) {
                    break path[pos..].to_vec();
                }
                path.push(cur);
                let next = incoming[cur]
                    .iter()
                    .find(|&&e| live[e] && edges[e].2 == EdgeKind::Ownership)
                    .map(|&e| edges[e].1);
                match next {
                    Some(p) => cur = p,
                    None => break vec![cur],
                }
            };

            let chain: Vec<String> = cycle.iter().map(|&i| node_label(&self.nodes[i])).collect();
            warn!(chain = %chain.join(" -> "), "Ownership cycle, skipping subtree");
            result.errors.push(DependencyError::OwnershipCycle { chain });

            // Drop the cycle and everything owned below it.
            let mut dropped: HashSet<usize> = cycle.into_iter().collect();
            let mut frontier: Vec<usize> = dropped.iter().copied().collect();
            while let Some(p) = frontier.pop() {
                for &e in &outgoing[p] {
                    let d = edges[e].0;
                    if edges[e].2 == EdgeKind::Ownership && active[d] && !done[d] && dropped.insert(d) {
                        frontier.push(d);
                    }
                }
            }
            let mut dropped: Vec<usize> = dropped.into_iter().collect();
            dropped.sort_unstable();
            for &p in &dropped {
                active[p] = false;
                result.skipped.push(self.nodes[p].id);
            }
            for &p in &dropped {
                for &e in &outgoing[p] {
                    if !live[e] {
                        continue;
                    }
                    live[e] = false;
                    let d = edges[e].0;
                    indegree[d] -= 1;
                    if indegree[d] == 0 && active[d] && !done[d] {
                        ready.insert(d);
                    }
                }
            }
        }

        debug!(
            ordered = result.order.len(),
            relaxed = result.relaxed.len(),
            skipped = result.skipped.len(),
            "Ordered dependency graph"
        );
        result
    }
}
