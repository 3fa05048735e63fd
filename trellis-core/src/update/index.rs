//! Cross-Graph Dependency Index
//!
//! A reusable sub-graph can be embedded by entry nodes of many graphs,
//! nested arbitrarily. The index answers "who embeds this graph?" so an
//! edit inside a sub-graph can be propagated up to every top-level graph
//! that transitively depends on it.
//!
//! # Caching
//!
//! The index is a pull-based cache: a single dirty flag plus a wholesale
//! rebuild on the next read. Rebuild cost is proportional to the number of
//! graphs, which is small relative to edit frequency, so push-based
//! incremental maintenance would not pay for itself.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::graph::{EntryPoint, GraphId};

use super::registry::TrackerRegistry;
use super::tracker::GraphKind;

/// Hard bound on entries visited while climbing the embedding graph.
/// A true embedding cycle is a pre-existing inconsistency in the host's
/// data, so it is logged rather than raised.
const VISIT_CAP: usize = 10_000;

/// Lazily rebuilt map from each sub-graph to the entry nodes embedding it.
pub struct CrossGraphIndex {
    stale: bool,
    entries: HashMap<GraphId, Vec<EntryPoint>>,
}

impl Default for CrossGraphIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl CrossGraphIndex {
    /// Create an index that will populate itself on first read.
    pub fn new() -> Self {
        Self {
            stale: true,
            entries: HashMap::new(),
        }
    }

    /// Mark the index stale. O(1); the next read rebuilds.
    pub fn invalidate(&mut self) {
        self.stale = true;
    }

    /// Entry nodes directly embedding `sub_graph`, one per embedding site.
    pub fn entries_of(&mut self, registry: &TrackerRegistry, sub_graph: GraphId) -> Vec<EntryPoint> {
        self.rebuild_if_stale(registry);
        self.entries.get(&sub_graph).cloned().unwrap_or_default()
    }

    /// Every entry node through which `sub_graph` is reachable, climbing
    /// from direct embedders through further nesting until top-level graphs
    /// are reached.
    ///
    /// The tracker marks each returned entry node outdated in its owning
    /// graph, which is what turns an edit deep inside a sub-graph into
    /// pending work on every dependent top-level graph.
    pub fn propagate(&mut self, registry: &TrackerRegistry, sub_graph: GraphId) -> Vec<EntryPoint> {
        self.rebuild_if_stale(registry);

        let mut seen: HashSet<EntryPoint> = HashSet::new();
        let mut queue: VecDeque<EntryPoint> = VecDeque::new();
        let mut out = Vec::new();

        if let Some(direct) = self.entries.get(&sub_graph) {
            for &entry in direct {
                seen.insert(entry);
                queue.push_back(entry);
            }
        }

        while let Some(entry) = queue.pop_front() {
            out.push(entry);
            if out.len() > VISIT_CAP {
                tracing::error!(
                    sub_graph = %sub_graph,
                    cap = VISIT_CAP,
                    "embedding graph exceeds visit cap; it likely contains a cycle"
                );
                break;
            }
            if registry.kind(entry.graph) == Some(GraphKind::SubGraph) {
                if let Some(parents) = self.entries.get(&entry.graph) {
                    for &parent_entry in parents {
                        if seen.insert(parent_entry) {
                            queue.push_back(parent_entry);
                        }
                    }
                }
            }
        }
        out
    }

    fn rebuild_if_stale(&mut self, registry: &TrackerRegistry) {
        if !self.stale {
            return;
        }
        self.entries.clear();
        for (graph, tracker) in registry.iter() {
            let Some(snapshot) = tracker.snapshot() else {
                continue;
            };
            for (node, sub_graph) in snapshot.entry_nodes() {
                self.entries
                    .entry(sub_graph)
                    .or_default()
                    .push(EntryPoint { graph, node });
            }
        }
        self.stale = false;
        tracing::debug!(sub_graphs = self.entries.len(), "rebuilt cross-graph index");
    }
}
