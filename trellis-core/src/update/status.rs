//! Node Execution State Store
//!
//! One node definition can be invoked along many different call paths when
//! its graph is reused as a sub-graph. The store therefore keys execution
//! state by (graph, node, invocation path) so that two instantiations of the
//! same sub-graph never share recorded status.
//!
//! # Lifecycle
//!
//! A status springs into existence with all-default values on first lookup,
//! is overwritten every time the owning node finishes executing in a given
//! context, and is removed again (reverting to default) when an edit event
//! explicitly marks the node outdated or the graph is reset.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::NodeError;
use crate::graph::{ExecPath, GraphId, NodeId};

/// Result of a node's most recent execution in one invocation context.
#[derive(Debug, Clone, Default)]
pub struct NodeStatus {
    /// Whether the node's cached result can be trusted by consumers.
    pub is_updated: bool,
    /// Error recorded by the last execution, if it failed or was cancelled.
    pub error: Option<NodeError>,
    /// Wall-clock duration of the last successful execution.
    pub elapsed: Option<Duration>,
    /// Number of completed execution attempts in this context.
    pub updates: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StatusKey {
    graph: GraphId,
    node: NodeId,
    path: ExecPath,
}

/// Process-wide store of per-context node execution state.
#[derive(Default)]
pub struct StatusStore {
    map: HashMap<StatusKey, NodeStatus>,
}

impl StatusStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The node's status in the given context, default when never recorded.
    ///
    /// Lookups never insert; the default is materialized on the first
    /// `record_*` call instead.
    pub fn status(&self, graph: GraphId, node: NodeId, path: &ExecPath) -> NodeStatus {
        self.map
            .get(&StatusKey {
                graph,
                node,
                path: path.clone(),
            })
            .cloned()
            .unwrap_or_default()
    }

    /// True when a recorded status says the node is *not* up to date.
    ///
    /// A node with no recorded status does not block its consumers: only an
    /// execution that failed, was skipped, or was invalidated stands in the
    /// way of downstream work.
    pub fn blocks_downstream(&self, graph: GraphId, node: NodeId, path: &ExecPath) -> bool {
        self.map
            .get(&StatusKey {
                graph,
                node,
                path: path.clone(),
            })
            .map_or(false, |s| !s.is_updated)
    }

    /// Record a successful execution.
    pub fn record_success(
        &mut self,
        graph: GraphId,
        path: &ExecPath,
        node: NodeId,
        elapsed: Duration,
    ) {
        let entry = self.entry(graph, node, path);
        entry.is_updated = true;
        entry.error = None;
        entry.elapsed = Some(elapsed);
        entry.updates += 1;
    }

    /// Record a failed (or cancelled) execution.
    pub fn record_error(
        &mut self,
        graph: GraphId,
        path: &ExecPath,
        node: NodeId,
        error: NodeError,
    ) {
        let entry = self.entry(graph, node, path);
        entry.is_updated = false;
        entry.error = Some(error);
        entry.elapsed = None;
        entry.updates += 1;
    }

    /// Mark a node as not updated without counting an execution attempt.
    ///
    /// Used when a walk skips a node because something upstream is not
    /// updated: the node was not run, but its cached result can no longer be
    /// trusted either.
    pub fn mark_stale(&mut self, graph: GraphId, path: &ExecPath, node: NodeId) {
        self.entry(graph, node, path).is_updated = false;
    }

    /// Drop the node's status in every invocation context.
    pub fn invalidate(&mut self, graph: GraphId, node: NodeId) {
        self.map.retain(|k, _| k.graph != graph || k.node != node);
    }

    /// Drop the node's status in one invocation context only.
    pub fn invalidate_in(&mut self, graph: GraphId, node: NodeId, path: &ExecPath) {
        self.map.remove(&StatusKey {
            graph,
            node,
            path: path.clone(),
        });
    }

    /// Drop every status belonging to one graph.
    pub fn reset_graph(&mut self, graph: GraphId) {
        self.map.retain(|k, _| k.graph != graph);
    }

    /// Drop everything. Called on undo and file reload.
    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Carry statuses of one graph over to a new snapshot's ids.
    ///
    /// `mapping` takes old ids to new ids; statuses of nodes absent from the
    /// mapping (removed from the graph) are dropped.
    pub fn remap(&mut self, graph: GraphId, mapping: &HashMap<NodeId, NodeId>) {
        let keys: Vec<StatusKey> = self
            .map
            .keys()
            .filter(|k| k.graph == graph)
            .cloned()
            .collect();
        for key in keys {
            if let Some(status) = self.map.remove(&key) {
                if let Some(&new_id) = mapping.get(&key.node) {
                    self.map.insert(
                        StatusKey {
                            graph: key.graph,
                            node: new_id,
                            path: key.path,
                        },
                        status,
                    );
                }
            }
        }
    }

    /// The recorded error of a node in a context, if any.
    pub fn error(&self, graph: GraphId, node: NodeId, path: &ExecPath) -> Option<NodeError> {
        self.map
            .get(&StatusKey {
                graph,
                node,
                path: path.clone(),
            })
            .and_then(|s| s.error.clone())
    }

    /// Duration of the last successful execution in a context, if any.
    pub fn elapsed(&self, graph: GraphId, node: NodeId, path: &ExecPath) -> Option<Duration> {
        self.map
            .get(&StatusKey {
                graph,
                node,
                path: path.clone(),
            })
            .and_then(|s| s.elapsed)
    }

    /// Number of completed execution attempts in a context.
    pub fn updates(&self, graph: GraphId, node: NodeId, path: &ExecPath) -> u32 {
        self.map
            .get(&StatusKey {
                graph,
                node,
                path: path.clone(),
            })
            .map_or(0, |s| s.updates)
    }

    fn entry(&mut self, graph: GraphId, node: NodeId, path: &ExecPath) -> &mut NodeStatus {
        self.map
            .entry(StatusKey {
                graph,
                node,
                path: path.clone(),
            })
            .or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EntryPoint;

    fn ids() -> (GraphId, NodeId, ExecPath) {
        (GraphId::from(1), NodeId::from(0), ExecPath::top_level())
    }

    #[test]
    fn unknown_nodes_report_default_status() {
        let store = StatusStore::new();
        let (g, n, path) = ids();
        let status = store.status(g, n, &path);
        assert!(!status.is_updated);
        assert!(status.error.is_none());
        assert!(status.elapsed.is_none());
        assert_eq!(status.updates, 0);
        // And a node never executed does not block downstream work.
        assert!(!store.blocks_downstream(g, n, &path));
    }

    #[test]
    fn success_overwrites_previous_error() {
        let mut store = StatusStore::new();
        let (g, n, path) = ids();

        store.record_error(g, &path, n, NodeError::from_payload("boom".into()));
        assert!(store.blocks_downstream(g, n, &path));
        assert!(store.error(g, n, &path).is_some());

        store.record_success(g, &path, n, Duration::from_millis(3));
        assert!(!store.blocks_downstream(g, n, &path));
        assert!(store.error(g, n, &path).is_none());
        assert_eq!(store.elapsed(g, n, &path), Some(Duration::from_millis(3)));
        assert_eq!(store.updates(g, n, &path), 2);
    }

    #[test]
    fn mark_stale_does_not_count_an_attempt() {
        let mut store = StatusStore::new();
        let (g, n, path) = ids();

        store.record_success(g, &path, n, Duration::from_millis(1));
        store.mark_stale(g, &path, n);

        assert!(store.blocks_downstream(g, n, &path));
        assert_eq!(store.updates(g, n, &path), 1);
    }

    #[test]
    fn contexts_are_isolated() {
        let mut store = StatusStore::new();
        let g = GraphId::from(1);
        let n = NodeId::from(0);
        let e1 = ExecPath::from_entries([EntryPoint {
            graph: GraphId::from(10),
            node: NodeId::from(1),
        }]);
        let e2 = ExecPath::from_entries([EntryPoint {
            graph: GraphId::from(10),
            node: NodeId::from(2),
        }]);

        store.record_success(g, &e1, n, Duration::from_millis(1));
        store.record_success(g, &e2, n, Duration::from_millis(2));

        store.invalidate_in(g, n, &e1);
        assert!(store.elapsed(g, n, &e1).is_none());
        assert_eq!(store.elapsed(g, n, &e2), Some(Duration::from_millis(2)));

        store.invalidate(g, n);
        assert!(store.elapsed(g, n, &e2).is_none());
    }

    #[test]
    fn remap_carries_statuses_to_new_ids() {
        let mut store = StatusStore::new();
        let (g, _, path) = ids();
        let old = NodeId::from(3);
        let new = NodeId::from(5);

        store.record_success(g, &path, old, Duration::from_millis(7));

        let mut mapping = HashMap::new();
        mapping.insert(old, new);
        store.remap(g, &mapping);

        assert!(store.elapsed(g, old, &path).is_none());
        assert_eq!(store.elapsed(g, new, &path), Some(Duration::from_millis(7)));
    }

    #[test]
    fn remap_drops_removed_nodes() {
        let mut store = StatusStore::new();
        let (g, n, path) = ids();
        store.record_success(g, &path, n, Duration::from_millis(1));

        store.remap(g, &HashMap::new());
        assert_eq!(store.updates(g, n, &path), 0);
    }
}
