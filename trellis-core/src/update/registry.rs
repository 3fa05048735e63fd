//! Tracker Registry
//!
//! Arena-style ownership of every [`TreeTracker`] in the process: one
//! registry object, constructed once and passed explicitly, instead of
//! ambient global state. Teardown on undo or file reload is a single
//! explicit call.

use indexmap::IndexMap;

use crate::graph::{ExecPath, GraphId};

use super::tracker::{GraphKind, TrackerState, TreeTracker};

/// Owns the tracker of every registered graph.
///
/// Iteration order is registration order, which keeps job scheduling
/// deterministic.
#[derive(Default)]
pub struct TrackerRegistry {
    trackers: IndexMap<GraphId, TreeTracker>,
}

impl TrackerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The tracker for `graph`, created with `kind` when first seen.
    ///
    /// An already-registered graph keeps its original kind.
    pub fn ensure(&mut self, graph: GraphId, kind: GraphKind) -> &mut TreeTracker {
        self.trackers
            .entry(graph)
            .or_insert_with(|| TreeTracker::new(graph, kind))
    }

    /// Look a tracker up.
    pub fn get(&self, graph: GraphId) -> Option<&TreeTracker> {
        self.trackers.get(&graph)
    }

    /// Look a tracker up mutably.
    pub fn get_mut(&mut self, graph: GraphId) -> Option<&mut TreeTracker> {
        self.trackers.get_mut(&graph)
    }

    /// The registered kind of a graph.
    pub fn kind(&self, graph: GraphId) -> Option<GraphKind> {
        self.trackers.get(&graph).map(|t| t.kind())
    }

    /// All trackers, in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (GraphId, &TreeTracker)> {
        self.trackers.iter().map(|(id, t)| (*id, t))
    }

    /// Number of registered graphs.
    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    /// True when no graph is registered.
    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    /// The first top-level graph with pending outdated work, in
    /// registration order.
    pub fn first_dirty_top_level(&self) -> Option<GraphId> {
        self.trackers
            .iter()
            .find(|(_, t)| t.kind() == GraphKind::TopLevel && t.state() == TrackerState::Dirty)
            .map(|(id, _)| *id)
    }

    /// Hand every tracker a copy of the UI's open invocation path.
    pub fn set_open_path(&mut self, path: &ExecPath) {
        for tracker in self.trackers.values_mut() {
            tracker.set_open_path(path.clone());
        }
    }

    /// Drop every tracker. Called on undo and file reload, where node
    /// identities cannot be trusted anymore.
    pub fn reset(&mut self) {
        self.trackers.clear();
    }
}
