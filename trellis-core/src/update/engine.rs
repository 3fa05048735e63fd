//! Update Engine
//!
//! The engine is the host editor's single entry point: it owns the tracker
//! registry, the status store, the cross-graph index and the coordinator,
//! and turns inbound edit events into outdated marks, queued jobs and
//! status queries.
//!
//! # Event flow
//!
//! An edit event cancels any live job first (its results would be built on
//! stale premises), then marks the affected nodes outdated. If the edited
//! graph is a reusable sub-graph, the outdatedness climbs through the
//! cross-graph index to every top-level graph that transitively embeds it.
//! The host's timer then drives [`Engine::start_job_if_needed`] and
//! [`Engine::tick`] until everything is clean again.

use std::time::Duration;

use indexmap::IndexSet;

use crate::error::{CycleError, NodeError, StructuralError};
use crate::graph::{ExecPath, GraphId, LinkSpec, NodeId, NodeSpec, Snapshot};

use super::coordinator::{Coordinator, CoordinatorConfig, ProgressSink};
use super::index::CrossGraphIndex;
use super::registry::TrackerRegistry;
use super::status::{NodeStatus, StatusStore};
use super::task::{StepResult, WalkTask};
use super::tracker::{GraphKind, TrackerState};

/// Edits and UI changes the host editor feeds into the engine.
#[derive(Debug, Clone)]
pub enum Event {
    /// Properties of the given nodes changed; their cached results are void.
    NodePropertyChanged {
        /// The graph owning the nodes.
        graph: GraphId,
        /// The edited nodes.
        nodes: Vec<NodeId>,
    },
    /// The graph's topology no longer matches its installed snapshot. The
    /// host follows up with [`Engine::install_topology`].
    TopologyChanged {
        /// The restructured graph.
        graph: GraphId,
    },
    /// A reusable sub-graph came into existence, embedded under `parent`.
    SubGraphCreated {
        /// The new sub-graph.
        sub_graph: GraphId,
        /// The graph whose entry node embeds it.
        parent: GraphId,
    },
    /// Undo rewrote history; node identities cannot be trusted anymore.
    UndoPerformed,
    /// A new file was loaded; every tracker and status is void.
    FileReloaded,
    /// Recompute the whole graph regardless of cached state.
    ForceUpdate {
        /// The graph to recompute.
        graph: GraphId,
    },
    /// The UI now edits through this nested sub-graph path.
    InvocationPathChanged {
        /// The newly opened path.
        path: ExecPath,
    },
}

/// The incremental update engine.
pub struct Engine {
    registry: TrackerRegistry,
    statuses: StatusStore,
    index: CrossGraphIndex,
    coordinator: Coordinator,
    open_path: ExecPath,
    /// Graphs whose next walk an event has asked for. Errored nodes keep
    /// their tracker Dirty without re-entering this queue, so a broken node
    /// is retried on the next edit, not busily every tick.
    pending: IndexSet<GraphId>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// An engine with default scheduling configuration.
    pub fn new() -> Self {
        Self::with_config(CoordinatorConfig::default())
    }

    /// An engine with explicit scheduling knobs.
    pub fn with_config(config: CoordinatorConfig) -> Self {
        Self {
            registry: TrackerRegistry::new(),
            statuses: StatusStore::new(),
            index: CrossGraphIndex::new(),
            coordinator: Coordinator::with_config(config),
            open_path: ExecPath::top_level(),
            pending: IndexSet::new(),
        }
    }

    /// Route progress text to the host UI.
    pub fn set_progress_sink(&mut self, sink: Box<dyn ProgressSink>) {
        self.coordinator.set_progress_sink(sink);
    }

    /// Register a graph before its first topology arrives. Optional for
    /// top-level graphs; sub-graphs are registered by their creation event.
    pub fn register_graph(&mut self, graph: GraphId, kind: GraphKind) {
        self.registry.ensure(graph, kind);
    }

    /// Build and install a new snapshot for `graph`.
    ///
    /// On a structural error the tracker keeps its previous valid snapshot
    /// and the error is surfaced to the host. On success, per-context node
    /// statuses are carried over to the new ids by node name, and any
    /// outdatedness found by the topology diff climbs to embedding graphs.
    pub fn install_topology(
        &mut self,
        graph: GraphId,
        nodes: Vec<NodeSpec>,
        links: Vec<LinkSpec>,
    ) -> Result<(), StructuralError> {
        let snapshot = Snapshot::build(graph, nodes, links)?;
        self.cancel_job();

        let tracker = self.registry.ensure(graph, GraphKind::TopLevel);
        let report = tracker.install(snapshot);
        let dirty = tracker.state() == TrackerState::Dirty;
        self.statuses.remap(graph, &report.remap);
        self.index.invalidate();

        if dirty {
            self.pending.insert(graph);
            self.propagate_to_parents(graph);
        }
        Ok(())
    }

    /// Apply one inbound event.
    pub fn handle_event(&mut self, event: Event) {
        match event {
            Event::NodePropertyChanged { graph, nodes } => {
                self.cancel_job();
                for &node in &nodes {
                    self.statuses.invalidate(graph, node);
                }
                let mut dirty = false;
                if let Some(tracker) = self.registry.get_mut(graph) {
                    tracker.mark_outdated(nodes);
                    dirty = tracker.state() == TrackerState::Dirty;
                }
                if dirty {
                    self.pending.insert(graph);
                    self.propagate_to_parents(graph);
                }
            }
            Event::TopologyChanged { graph } => {
                self.cancel_job();
                if let Some(tracker) = self.registry.get_mut(graph) {
                    tracker.set_topology_stale();
                }
            }
            Event::SubGraphCreated { sub_graph, parent } => {
                self.registry.ensure(sub_graph, GraphKind::SubGraph);
                self.registry.ensure(parent, GraphKind::TopLevel);
                self.index.invalidate();
            }
            Event::UndoPerformed | Event::FileReloaded => {
                self.cancel_job();
                self.registry.reset();
                self.statuses.clear();
                self.index.invalidate();
                self.pending.clear();
            }
            Event::ForceUpdate { graph } => {
                self.cancel_job();
                self.statuses.reset_graph(graph);
                let mut dirty = false;
                if let Some(tracker) = self.registry.get_mut(graph) {
                    tracker.mark_all_outdated();
                    dirty = tracker.state() == TrackerState::Dirty;
                }
                if dirty {
                    self.pending.insert(graph);
                    self.propagate_to_parents(graph);
                }
            }
            Event::InvocationPathChanged { path } => {
                self.open_path = path.clone();
                self.registry.set_open_path(&path);
            }
        }
    }

    /// Queue and start a job for the first event-requested top-level graph,
    /// if the coordinator is idle. Part of the host's per-timer driver.
    pub fn start_job_if_needed(&mut self) -> Result<bool, CycleError> {
        if self.coordinator.is_job_running() || self.coordinator.has_pending_job() {
            return Ok(false);
        }
        while let Some(graph) = self.pending.shift_remove_index(0) {
            let startable = self.registry.kind(graph) == Some(GraphKind::TopLevel)
                && self.graph_state(graph) == Some(TrackerState::Dirty);
            if !startable {
                // Sub-graphs are walked through their embedding entry
                // nodes; graphs already clean have nothing to do.
                continue;
            }
            self.coordinator
                .queue(graph)
                .expect("idle coordinator takes a job");
            return self.coordinator.start(&mut self.registry);
        }
        Ok(false)
    }

    /// Resume the live job within the tick budget. Part of the host's
    /// per-timer driver. Returns whether a job is still live.
    pub fn tick(&mut self) -> bool {
        self.coordinator.tick(&mut self.registry, &mut self.statuses)
    }

    /// The host's whole timer callback in one call: start a job when one is
    /// due, then tick.
    pub fn drive(&mut self) -> Result<bool, CycleError> {
        self.start_job_if_needed()?;
        Ok(self.tick())
    }

    /// Cancel the live (or queued) job, if any.
    pub fn cancel_job(&mut self) {
        self.coordinator.cancel(&mut self.registry, &mut self.statuses);
    }

    /// True when a graph is queued but not started.
    pub fn has_pending_job(&self) -> bool {
        self.coordinator.has_pending_job()
    }

    /// True while a job is live.
    pub fn is_job_running(&self) -> bool {
        self.coordinator.is_job_running()
    }

    /// True while events have asked for walks that have not finished yet.
    pub fn has_pending_work(&self) -> bool {
        !self.pending.is_empty()
            || self.coordinator.has_pending_job()
            || self.coordinator.is_job_running()
    }

    /// Mark nodes outdated in one invocation context only.
    ///
    /// The nodes' statuses under `path` are dropped; other contexts stay
    /// trusted. Used by the host's nested sub-graph editors, where the same
    /// node carries independent state per entry chain.
    pub fn mark_nodes_outdated_in(&mut self, graph: GraphId, nodes: &[NodeId], path: &ExecPath) {
        self.cancel_job();
        for &node in nodes {
            self.statuses.invalidate_in(graph, node, path);
        }
        let mut dirty = false;
        if let Some(tracker) = self.registry.get_mut(graph) {
            tracker.mark_outdated(nodes.iter().copied());
            dirty = tracker.state() == TrackerState::Dirty;
        }
        if dirty {
            self.pending.insert(graph);
            self.propagate_to_parents(graph);
        }
    }

    /// Walk a graph synchronously to completion, bypassing time slicing.
    ///
    /// For host callbacks that must hand back a finished result, like frame
    /// changes during playback.
    pub fn process_now(&mut self, graph: GraphId) -> Result<(), CycleError> {
        self.process_now_for(graph, None, &ExecPath::top_level())
    }

    /// Synchronous walk restricted to a viewer subset and recorded under an
    /// explicit invocation context.
    ///
    /// With `viewer` set, only nodes feeding the given terminal nodes are
    /// executed; outdated work outside the subset stays queued for a future
    /// full walk.
    pub fn process_now_for(
        &mut self,
        graph: GraphId,
        viewer: Option<&[NodeId]>,
        path: &ExecPath,
    ) -> Result<(), CycleError> {
        self.cancel_job();
        let Some(tracker) = self.registry.get_mut(graph) else {
            return Ok(());
        };
        let plan = tracker.plan_walk(path, viewer)?;
        let mut task = WalkTask::new(plan);
        while let Some(tracker) = self.registry.get_mut(graph) {
            match task.resume(tracker, &mut self.statuses) {
                StepResult::Continue => {}
                StepResult::Done | StepResult::Cancelled => break,
            }
        }
        if let Some(tracker) = self.registry.get_mut(graph) {
            tracker.finish_walk();
        }
        Ok(())
    }

    /// The UI's currently open invocation path.
    pub fn open_path(&self) -> &ExecPath {
        &self.open_path
    }

    /// The lifecycle state of a graph's tracker.
    pub fn graph_state(&self, graph: GraphId) -> Option<TrackerState> {
        self.registry.get(graph).map(|t| t.state())
    }

    /// The currently installed snapshot of a graph.
    pub fn snapshot(&self, graph: GraphId) -> Option<&Snapshot> {
        self.registry.get(graph).and_then(|t| t.snapshot())
    }

    /// Full status of a node in a context.
    pub fn node_status(&self, graph: GraphId, node: NodeId, path: &ExecPath) -> NodeStatus {
        self.statuses.status(graph, node, path)
    }

    /// The recorded error of a node in a context, for UI display.
    pub fn node_error(&self, graph: GraphId, node: NodeId, path: &ExecPath) -> Option<NodeError> {
        self.statuses.error(graph, node, path)
    }

    /// Duration of a node's last successful execution in a context.
    pub fn node_elapsed(&self, graph: GraphId, node: NodeId, path: &ExecPath) -> Option<Duration> {
        self.statuses.elapsed(graph, node, path)
    }

    /// Number of completed execution attempts of a node in a context.
    pub fn node_updates(&self, graph: GraphId, node: NodeId, path: &ExecPath) -> u32 {
        self.statuses.updates(graph, node, path)
    }

    /// Elapsed time of a node plus everything upstream of it, for the UI's
    /// cumulative timing display.
    pub fn cumulative_elapsed(
        &self,
        graph: GraphId,
        node: NodeId,
        path: &ExecPath,
    ) -> Option<Duration> {
        self.registry
            .get(graph)
            .and_then(|t| t.cumulative_elapsed(&self.statuses, path, node))
    }

    /// Total elapsed time of the most recently finished job.
    pub fn last_job_elapsed(&self) -> Option<Duration> {
        self.coordinator.last_job_elapsed()
    }

    /// Mark every entry node through which `graph` is reachable outdated,
    /// so each dependent top-level graph schedules a future walk.
    fn propagate_to_parents(&mut self, graph: GraphId) {
        if self.registry.kind(graph) != Some(GraphKind::SubGraph) {
            return;
        }
        let entries = self.index.propagate(&self.registry, graph);
        for entry in entries {
            self.statuses.invalidate(entry.graph, entry.node);
            if let Some(tracker) = self.registry.get_mut(entry.graph) {
                tracker.mark_outdated([entry.node]);
            }
            self.pending.insert(entry.graph);
        }
    }
}
