//! Tree Update Tracker
//!
//! One tracker owns the current [`Snapshot`] of one graph plus the set of
//! *outdated* nodes: nodes whose cached results must be disregarded before
//! downstream consumers can trust them again.
//!
//! # State machine
//!
//! A tracker is `Clean` (nothing outdated), `Dirty` (outdated nodes pending,
//! no walk running) or `Executing` (a walk is consuming the outdated set).
//! Marking nodes outdated moves `Clean` to `Dirty` and is a no-op otherwise.
//!
//! # Topology rebuilds
//!
//! Installing a new snapshot diffs the new link set against the old one,
//! comparing links by (node name, socket identifier) since ids shift across
//! rebuilds:
//!
//! - An added link marks the *producer* outdated when its output had no
//!   links before (hosts may compute an output only while it is connected),
//!   and the *consumer* otherwise, so adding a second reader to a live
//!   output never recomputes the producer.
//! - A removed link marks the former consumer outdated.
//! - Nodes whose name did not exist before are outdated: they have never
//!   run.
//!
//! # Walk planning
//!
//! Planning snapshots the outdated set and clears it before any node runs,
//! so statuses recorded *during* the walk cannot re-trigger the same walk;
//! nodes erroring mid-walk are re-queued for the next one. A plan can be
//! restricted to a viewer subset (only nodes feeding given terminal nodes);
//! outdated work falling outside the subset stays queued for a future full
//! walk.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use indexmap::IndexSet;
use smallvec::SmallVec;

use crate::error::CycleError;
use crate::graph::{ExecPath, GraphId, NodeId, PayloadHandle, Snapshot, SocketRef};

use super::status::StatusStore;

/// Whether a graph is editable at the top level or reused inside others.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphKind {
    /// A graph the user edits and executes directly.
    TopLevel,
    /// A reusable graph embedded by entry nodes of other graphs.
    SubGraph,
}

/// Lifecycle state of one tracked graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    /// No outdated nodes; the last walk's results stand.
    Clean,
    /// Outdated nodes pending, no walk in progress.
    Dirty,
    /// A walk is consuming the outdated set.
    Executing,
}

/// How old per-node state maps onto a freshly installed snapshot.
pub struct InstallReport {
    /// Old node id to new node id, for nodes present in both snapshots.
    pub remap: HashMap<NodeId, NodeId>,
    /// New-snapshot ids of nodes that did not exist before.
    pub fresh: Vec<NodeId>,
}

/// One executable step of a walk plan.
///
/// Steps are self-contained (name, payload handle, upstream ids) so a
/// suspended walk never borrows the snapshot it was planned from.
pub struct PlanStep {
    /// The node to process.
    pub node: NodeId,
    /// Node name, for progress reporting.
    pub name: String,
    /// The node's computation.
    pub payload: PayloadHandle,
    /// Distinct producer nodes, consulted for the skip-on-stale-upstream rule.
    pub upstream: SmallVec<[NodeId; 4]>,
    /// Source output socket per input.
    pub inputs: SmallVec<[Option<SocketRef>; 4]>,
}

/// Topologically ordered, self-contained plan for one walk.
pub struct WalkPlan {
    /// Graph the plan belongs to.
    pub graph: GraphId,
    /// Invocation context statuses will be recorded under.
    pub path: ExecPath,
    /// Steps in execution order.
    pub steps: Vec<PlanStep>,
}

impl WalkPlan {
    /// A plan with nothing to do.
    pub fn empty(graph: GraphId, path: ExecPath) -> Self {
        Self {
            graph,
            path,
            steps: Vec::new(),
        }
    }
}

/// Dirty-state bookkeeping for one graph.
pub struct TreeTracker {
    graph: GraphId,
    kind: GraphKind,
    snapshot: Option<Snapshot>,
    state: TrackerState,
    outdated: IndexSet<NodeId>,
    topology_stale: bool,
    open_path: ExecPath,
}

impl TreeTracker {
    /// Create a tracker with no snapshot yet.
    pub fn new(graph: GraphId, kind: GraphKind) -> Self {
        Self {
            graph,
            kind,
            snapshot: None,
            state: TrackerState::Clean,
            outdated: IndexSet::new(),
            topology_stale: false,
            open_path: ExecPath::top_level(),
        }
    }

    /// The tracked graph's id.
    pub fn graph(&self) -> GraphId {
        self.graph
    }

    /// Whether the graph is top-level or reusable.
    pub fn kind(&self) -> GraphKind {
        self.kind
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TrackerState {
        self.state
    }

    /// The currently installed snapshot, if any.
    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    /// Ids currently marked outdated.
    pub fn outdated(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.outdated.iter().copied()
    }

    /// True after a topology-changed event, until a snapshot is installed.
    pub fn is_topology_stale(&self) -> bool {
        self.topology_stale
    }

    /// Note that the host's topology no longer matches the snapshot.
    pub fn set_topology_stale(&mut self) {
        self.topology_stale = true;
    }

    /// The UI's currently open invocation path into this graph.
    pub fn open_path(&self) -> &ExecPath {
        &self.open_path
    }

    /// Keep a copy of the UI's open invocation path.
    pub fn set_open_path(&mut self, path: ExecPath) {
        self.open_path = path;
    }

    /// Add nodes to the outdated set. Ids unknown to the current snapshot
    /// are ignored (the node was removed under the caller's feet).
    pub fn mark_outdated(&mut self, nodes: impl IntoIterator<Item = NodeId>) {
        let bound = self.snapshot.as_ref().map(|s| s.node_count());
        for node in nodes {
            if bound.map_or(true, |b| node.index() < b) {
                self.outdated.insert(node);
            }
        }
        if self.state == TrackerState::Clean && !self.outdated.is_empty() {
            self.state = TrackerState::Dirty;
        }
    }

    /// Mark every node of the current snapshot outdated.
    pub fn mark_all_outdated(&mut self) {
        if let Some(snapshot) = &self.snapshot {
            let all: Vec<NodeId> = snapshot.nodes().map(|n| n.id()).collect();
            self.mark_outdated(all);
        }
    }

    /// Re-queue a node for the *next* walk. Unlike [`Self::mark_outdated`]
    /// this is legal while `Executing`; the walk in progress is unaffected
    /// because it already snapshotted its seeds.
    pub fn requeue(&mut self, node: NodeId) {
        self.outdated.insert(node);
    }

    /// Install a freshly built snapshot, diffing it against the previous one
    /// to decide which nodes became outdated.
    ///
    /// The returned report tells the caller how to carry per-context node
    /// statuses over to the new ids.
    pub fn install(&mut self, new: Snapshot) -> InstallReport {
        debug_assert!(
            self.state != TrackerState::Executing,
            "topology installed while a walk is executing"
        );
        let report = match self.snapshot.take() {
            None => {
                self.outdated = new.nodes().map(|n| n.id()).collect();
                InstallReport {
                    remap: HashMap::new(),
                    fresh: new.nodes().map(|n| n.id()).collect(),
                }
            }
            Some(old) => self.diff_install(&old, &new),
        };
        self.snapshot = Some(new);
        self.topology_stale = false;
        self.state = if self.outdated.is_empty() {
            TrackerState::Clean
        } else {
            TrackerState::Dirty
        };
        tracing::debug!(
            graph = %self.graph,
            outdated = self.outdated.len(),
            "installed topology snapshot"
        );
        report
    }

    fn diff_install(&mut self, old: &Snapshot, new: &Snapshot) -> InstallReport {
        let mut remap = HashMap::new();
        for node in old.nodes() {
            if let Some(new_id) = new.node_id(node.name()) {
                remap.insert(node.id(), new_id);
            }
        }

        let carried: IndexSet<NodeId> = self
            .outdated
            .iter()
            .filter_map(|id| remap.get(id).copied())
            .collect();
        self.outdated = carried;

        let old_names: HashSet<&str> = old.nodes().map(|n| n.name()).collect();
        let mut fresh = Vec::new();
        for node in new.nodes() {
            if !old_names.contains(node.name()) {
                fresh.push(node.id());
                self.outdated.insert(node.id());
            }
        }

        let old_keys = old.link_keys();
        let new_keys = new.link_keys();
        for key in new_keys.difference(&old_keys) {
            // A first connection out of an output recomputes the producer:
            // hosts may compute an output only while it is connected. A
            // second consumer on a live output only recomputes itself.
            let marked = if old.output_linked_by_name(&key.from_node, &key.from_socket) {
                new.node_id(&key.to_node)
            } else {
                new.node_id(&key.from_node)
            };
            if let Some(id) = marked {
                self.outdated.insert(id);
            }
        }
        for key in old_keys.difference(&new_keys) {
            if let Some(id) = new.node_id(&key.to_node) {
                self.outdated.insert(id);
            }
        }

        InstallReport { remap, fresh }
    }

    /// Plan the next walk and transition to `Executing`.
    ///
    /// Seeds are the current outdated set; the plan covers their downstream
    /// closure, optionally restricted to nodes feeding `viewer`. On success
    /// the outdated set is cleared except for closure nodes the plan does
    /// not cover. On a cycle the tracker is left untouched.
    pub fn plan_walk(
        &mut self,
        path: &ExecPath,
        viewer: Option<&[NodeId]>,
    ) -> Result<WalkPlan, CycleError> {
        let Some(snapshot) = self.snapshot.as_ref() else {
            return Ok(WalkPlan::empty(self.graph, path.clone()));
        };

        let mut seeds: Vec<NodeId> = self.outdated.iter().copied().collect();
        seeds.sort_unstable();

        let raw_steps = match viewer {
            None => snapshot.topo_walk(&seeds, |_| true)?,
            Some(outputs) => {
                let keep: HashSet<NodeId> =
                    snapshot.upstream_closure(outputs).into_iter().collect();
                snapshot.topo_walk(&seeds, |n| keep.contains(&n))?
            }
        };
        let closure = snapshot.downstream_closure(&seeds);

        let steps: Vec<PlanStep> = raw_steps
            .into_iter()
            .map(|step| {
                let node = snapshot.node(step.node);
                PlanStep {
                    node: step.node,
                    name: node.name().to_string(),
                    payload: node.payload().clone(),
                    upstream: SmallVec::from_slice(snapshot.upstream(step.node)),
                    inputs: step.inputs,
                }
            })
            .collect();

        let planned: HashSet<NodeId> = steps.iter().map(|s| s.node).collect();
        self.outdated.clear();
        for node in closure {
            if !planned.contains(&node) {
                self.outdated.insert(node);
            }
        }
        self.state = TrackerState::Executing;

        tracing::debug!(
            graph = %self.graph,
            path = %path,
            seeds = seeds.len(),
            "planned walk"
        );
        Ok(WalkPlan {
            graph: self.graph,
            path: path.clone(),
            steps,
        })
    }

    /// Leave `Executing` once the walk finished, was cancelled, or failed.
    pub fn finish_walk(&mut self) {
        self.state = if self.outdated.is_empty() {
            TrackerState::Clean
        } else {
            TrackerState::Dirty
        };
    }

    /// Total elapsed time of a node plus everything upstream of it, in one
    /// context. `None` until the node itself has run successfully; upstream
    /// nodes without a recorded duration contribute nothing.
    pub fn cumulative_elapsed(
        &self,
        store: &StatusStore,
        path: &ExecPath,
        node: NodeId,
    ) -> Option<Duration> {
        let snapshot = self.snapshot.as_ref()?;
        store.elapsed(self.graph, node, path)?;
        let mut total = Duration::ZERO;
        for n in snapshot.upstream_closure(&[node]) {
            if let Some(elapsed) = store.elapsed(self.graph, n, path) {
                total += elapsed;
            }
        }
        Some(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{fn_payload, LinkSpec, NodeSpec};

    fn graph_id() -> GraphId {
        GraphId::from(1)
    }

    fn spec(name: &str) -> NodeSpec {
        NodeSpec::new(name, fn_payload(|_| Ok(true)))
            .input("in")
            .output("out")
    }

    fn snapshot(names: &[&str], links: &[(&str, &str)]) -> Snapshot {
        let specs = names.iter().map(|n| spec(n)).collect();
        let link_specs = links
            .iter()
            .map(|(f, t)| LinkSpec::new(*f, "out", *t, "in"))
            .collect();
        Snapshot::build(graph_id(), specs, link_specs).unwrap()
    }

    fn names_of(tracker: &TreeTracker) -> Vec<String> {
        let snap = tracker.snapshot().unwrap();
        let mut names: Vec<String> = tracker
            .outdated()
            .map(|id| snap.node(id).name().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn first_install_marks_everything_outdated() {
        let mut tracker = TreeTracker::new(graph_id(), GraphKind::TopLevel);
        assert_eq!(tracker.state(), TrackerState::Clean);

        tracker.install(snapshot(&["A", "B"], &[("A", "B")]));
        assert_eq!(tracker.state(), TrackerState::Dirty);
        assert_eq!(names_of(&tracker), vec!["A", "B"]);
    }

    #[test]
    fn added_first_connection_marks_producer() {
        let mut tracker = TreeTracker::new(graph_id(), GraphKind::TopLevel);
        tracker.install(snapshot(&["A", "B"], &[]));
        drain(&mut tracker);

        tracker.install(snapshot(&["A", "B"], &[("A", "B")]));
        assert_eq!(names_of(&tracker), vec!["A"]);
    }

    #[test]
    fn added_second_consumer_marks_consumer_only() {
        let mut tracker = TreeTracker::new(graph_id(), GraphKind::TopLevel);
        tracker.install(snapshot(&["A", "B", "C"], &[("A", "B")]));
        drain(&mut tracker);

        tracker.install(snapshot(&["A", "B", "C"], &[("A", "B"), ("A", "C")]));
        assert_eq!(names_of(&tracker), vec!["C"]);
    }

    #[test]
    fn third_consumer_still_marks_only_itself() {
        let mut tracker = TreeTracker::new(graph_id(), GraphKind::TopLevel);
        tracker.install(snapshot(
            &["A", "B", "C", "D"],
            &[("A", "B"), ("A", "C")],
        ));
        drain(&mut tracker);

        tracker.install(snapshot(
            &["A", "B", "C", "D"],
            &[("A", "B"), ("A", "C"), ("A", "D")],
        ));
        assert_eq!(names_of(&tracker), vec!["D"]);
    }

    #[test]
    fn removed_link_marks_former_consumer() {
        let mut tracker = TreeTracker::new(graph_id(), GraphKind::TopLevel);
        tracker.install(snapshot(&["A", "B"], &[("A", "B")]));
        drain(&mut tracker);

        tracker.install(snapshot(&["A", "B"], &[]));
        assert_eq!(names_of(&tracker), vec!["B"]);
    }

    #[test]
    fn renamed_node_counts_as_fresh() {
        let mut tracker = TreeTracker::new(graph_id(), GraphKind::TopLevel);
        tracker.install(snapshot(&["A", "B"], &[]));
        drain(&mut tracker);

        let report = tracker.install(snapshot(&["A", "B2"], &[]));
        assert_eq!(report.fresh.len(), 1);
        assert_eq!(names_of(&tracker), vec!["B2"]);
    }

    #[test]
    fn outdated_marks_survive_id_shifts() {
        let mut tracker = TreeTracker::new(graph_id(), GraphKind::TopLevel);
        tracker.install(snapshot(&["A", "B"], &[]));
        drain(&mut tracker);

        let b = tracker.snapshot().unwrap().node_id("B").unwrap();
        tracker.mark_outdated([b]);

        // B moves to index 2 once a node is inserted ahead of it.
        tracker.install(snapshot(&["A", "New", "B"], &[]));
        let names = names_of(&tracker);
        assert!(names.contains(&"B".to_string()));
        assert!(names.contains(&"New".to_string()));
        assert!(!names.contains(&"A".to_string()));
    }

    #[test]
    fn planning_consumes_the_outdated_set() {
        let mut tracker = TreeTracker::new(graph_id(), GraphKind::TopLevel);
        tracker.install(snapshot(&["A", "B", "C"], &[("A", "B"), ("B", "C")]));

        let plan = tracker.plan_walk(&ExecPath::top_level(), None).unwrap();
        assert_eq!(plan.steps.len(), 3);
        assert_eq!(tracker.state(), TrackerState::Executing);
        assert_eq!(tracker.outdated().count(), 0);

        tracker.finish_walk();
        assert_eq!(tracker.state(), TrackerState::Clean);

        // Nothing left: the next plan is empty.
        let plan = tracker.plan_walk(&ExecPath::top_level(), None).unwrap();
        assert!(plan.steps.is_empty());
    }

    #[test]
    fn viewer_plans_keep_out_of_subset_work_queued() {
        // A feeds both B and C; only B is on the viewer path.
        let mut tracker = TreeTracker::new(graph_id(), GraphKind::TopLevel);
        tracker.install(snapshot(&["A", "B", "C"], &[("A", "B"), ("A", "C")]));

        let snap = tracker.snapshot().unwrap();
        let b = snap.node_id("B").unwrap();

        let plan = tracker.plan_walk(&ExecPath::top_level(), Some(&[b])).unwrap();
        let planned: Vec<&str> = plan.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(planned, vec!["A", "B"]);

        // C stays queued for a future full walk.
        tracker.finish_walk();
        assert_eq!(tracker.state(), TrackerState::Dirty);
        assert_eq!(names_of(&tracker), vec!["C"]);
    }

    #[test]
    fn requeue_during_walk_feeds_the_next_walk() {
        let mut tracker = TreeTracker::new(graph_id(), GraphKind::TopLevel);
        tracker.install(snapshot(&["A"], &[]));

        let plan = tracker.plan_walk(&ExecPath::top_level(), None).unwrap();
        assert_eq!(plan.steps.len(), 1);

        tracker.requeue(plan.steps[0].node);
        tracker.finish_walk();
        assert_eq!(tracker.state(), TrackerState::Dirty);
    }

    #[test]
    fn cycle_leaves_the_outdated_set_intact() {
        let mut tracker = TreeTracker::new(graph_id(), GraphKind::TopLevel);
        tracker.install(snapshot(&["X", "Y"], &[("X", "Y"), ("Y", "X")]));

        let before: Vec<NodeId> = tracker.outdated().collect();
        let err = tracker.plan_walk(&ExecPath::top_level(), None);
        assert!(err.is_err());
        assert_eq!(tracker.state(), TrackerState::Dirty);
        let after: Vec<NodeId> = tracker.outdated().collect();
        assert_eq!(before, after);
    }

    fn drain(tracker: &mut TreeTracker) {
        tracker.plan_walk(&ExecPath::top_level(), None).unwrap();
        tracker.finish_walk();
        assert_eq!(tracker.state(), TrackerState::Clean);
    }
}
