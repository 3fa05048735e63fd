//! Suspendable Walk Task
//!
//! A [`WalkTask`] is one graph walk turned into an explicit state machine:
//! the coordinator resumes it one step at a time, and between steps it is
//! plain suspended data. One resume handles exactly one node, or one
//! declared sub-step of a node exposing a suspendable sub-protocol; no
//! partial-node state is observable from outside.
//!
//! # Cancellation
//!
//! `cancel` flips a flag; the *next* (and final) resume observes it, records
//! a cancelled status on the node at the suspension point, re-queues the
//! node and everything after it, and unwinds. There is no exception
//! injection across suspension boundaries, and a cancelled task must not be
//! resumed again.
//!
//! # Failure
//!
//! A failing payload is data, not control flow: the error lands in the
//! node's status, the node is re-queued for the next walk, and the walk
//! carries on. Downstream nodes see a not-updated upstream and are skipped
//! without being marked errored themselves, so sibling branches keep
//! executing. Walk-level failures (cycles) are caught at planning time,
//! before a task exists.

use std::time::Instant;

use crate::error::NodeError;
use crate::graph::{GraphId, ProcessContext, ProcessStep};

use super::status::StatusStore;
use super::tracker::{TreeTracker, WalkPlan};

/// Result of resuming a suspended walk by one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    /// A node or sub-step was handled; more work remains.
    Continue,
    /// The walk ran to completion. Terminal.
    Done,
    /// Cancellation was observed and the task unwound. Terminal.
    Cancelled,
}

/// One suspended graph walk.
pub struct WalkTask {
    plan: WalkPlan,
    cursor: usize,
    sub_step: usize,
    node_started: Option<Instant>,
    cancelled: bool,
    finished: bool,
}

impl WalkTask {
    /// Wrap a plan into a suspendable task.
    pub fn new(plan: WalkPlan) -> Self {
        Self {
            plan,
            cursor: 0,
            sub_step: 0,
            node_started: None,
            cancelled: false,
            finished: false,
        }
    }

    /// The graph this task walks.
    pub fn graph(&self) -> GraphId {
        self.plan.graph
    }

    /// True once the task returned `Done` or `Cancelled`.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Name of the node at the current suspension point, if any.
    pub fn current_node(&self) -> Option<&str> {
        self.plan.steps.get(self.cursor).map(|s| s.name.as_str())
    }

    /// Number of nodes fully handled so far.
    pub fn nodes_done(&self) -> usize {
        self.cursor
    }

    /// Number of nodes in the plan.
    pub fn nodes_total(&self) -> usize {
        self.plan.steps.len()
    }

    /// Request cancellation. Takes effect on the next resume.
    pub fn cancel(&mut self) {
        if !self.finished {
            self.cancelled = true;
        }
    }

    /// Advance the walk by one node or sub-step.
    ///
    /// Must not be called again after `Done` or `Cancelled`.
    pub fn resume(&mut self, tracker: &mut TreeTracker, store: &mut StatusStore) -> StepResult {
        debug_assert!(!self.finished, "resumed a finished walk task");
        if self.finished {
            return StepResult::Done;
        }
        if self.cancelled {
            return self.unwind(tracker, store);
        }
        if self.cursor >= self.plan.steps.len() {
            self.finished = true;
            return StepResult::Done;
        }

        let graph = self.plan.graph;
        let path = self.plan.path.clone();
        let node = self.plan.steps[self.cursor].node;

        if self.sub_step == 0 {
            let blocked = self.plan.steps[self.cursor]
                .upstream
                .iter()
                .any(|&up| store.blocks_downstream(graph, up, &path));
            if blocked {
                // Short-circuit failure cascades: the node is not run and
                // its cached result no longer counts as updated.
                store.mark_stale(graph, &path, node);
                tracing::debug!(
                    node = %self.plan.steps[self.cursor].name,
                    "skipped, upstream not updated"
                );
                self.cursor += 1;
                return self.continue_or_done();
            }
            self.node_started = Some(Instant::now());
        }

        let payload = self.plan.steps[self.cursor].payload.clone();
        let result = {
            let step = &self.plan.steps[self.cursor];
            let mut ctx = ProcessContext {
                node,
                name: &step.name,
                path: &path,
                inputs: &step.inputs,
                sub_step: self.sub_step,
            };
            payload.lock().process(&mut ctx)
        };

        match result {
            Ok(ProcessStep::Yielded) => {
                self.sub_step += 1;
                StepResult::Continue
            }
            Ok(ProcessStep::Done { .. }) => {
                let elapsed = self
                    .node_started
                    .take()
                    .map(|t| t.elapsed())
                    .unwrap_or_default();
                store.record_success(graph, &path, node, elapsed);
                self.sub_step = 0;
                self.cursor += 1;
                self.continue_or_done()
            }
            Err(err) => {
                tracing::warn!(
                    node = %self.plan.steps[self.cursor].name,
                    error = %err,
                    "node execution failed"
                );
                store.record_error(graph, &path, node, NodeError::from_payload(err));
                // Stays outdated, so the next walk attempts it again.
                tracker.requeue(node);
                self.node_started = None;
                self.sub_step = 0;
                self.cursor += 1;
                self.continue_or_done()
            }
        }
    }

    fn continue_or_done(&mut self) -> StepResult {
        if self.cursor >= self.plan.steps.len() {
            self.finished = true;
            StepResult::Done
        } else {
            StepResult::Continue
        }
    }

    fn unwind(&mut self, tracker: &mut TreeTracker, store: &mut StatusStore) -> StepResult {
        if self.cursor < self.plan.steps.len() {
            let node = self.plan.steps[self.cursor].node;
            store.record_error(self.plan.graph, &self.plan.path, node, NodeError::Cancelled);
            for step in &self.plan.steps[self.cursor..] {
                tracker.requeue(step.node);
            }
        }
        self.finished = true;
        tracing::debug!(graph = %self.plan.graph, done = self.cursor, "walk cancelled");
        StepResult::Cancelled
    }
}
