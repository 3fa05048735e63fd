//! Execution Coordinator
//!
//! Exactly one job is live at a time: `Idle -> Queued -> Running -> Idle`.
//! The host drives the coordinator from a low-frequency timer; each tick
//! resumes the suspended walk task until a wall-clock budget is spent, the
//! job completes, or it is cancelled.
//!
//! The default budget is 150 ms per tick, chosen to stay under a 60-100 ms
//! UI redraw cadence while amortizing per-call overhead. The budget bounds
//! *tick* duration, not node duration: a single `process` call may overrun
//! it, since nodes are never preempted.
//!
//! Progress is pushed to a [`ProgressSink`] after every resumed node so the
//! host can show the current node name and a cancel affordance.

use std::time::{Duration, Instant};

use crate::error::{CycleError, ScheduleError};
use crate::graph::{ExecPath, GraphId};

use super::registry::TrackerRegistry;
use super::status::StatusStore;
use super::task::{StepResult, WalkTask};

/// Scheduling knobs.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Wall-clock budget per tick.
    pub tick_budget: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            tick_budget: Duration::from_millis(150),
        }
    }
}

/// Sink for user-facing progress text.
pub trait ProgressSink {
    /// Show `Some(text)` while a job runs; `None` clears the display.
    fn set_progress_text(&mut self, text: Option<&str>);
}

/// Sink that drops progress silently. The default.
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn set_progress_text(&mut self, _text: Option<&str>) {}
}

/// Drives one suspendable walk job at a time.
pub struct Coordinator {
    config: CoordinatorConfig,
    sink: Box<dyn ProgressSink>,
    queued: Option<GraphId>,
    task: Option<WalkTask>,
    job_started: Option<Instant>,
    last_job_elapsed: Option<Duration>,
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl Coordinator {
    /// A coordinator with the default configuration and no progress sink.
    pub fn new() -> Self {
        Self::with_config(CoordinatorConfig::default())
    }

    /// A coordinator with explicit scheduling knobs.
    pub fn with_config(config: CoordinatorConfig) -> Self {
        Self {
            config,
            sink: Box::new(NullProgress),
            queued: None,
            task: None,
            job_started: None,
            last_job_elapsed: None,
        }
    }

    /// Replace the progress sink.
    pub fn set_progress_sink(&mut self, sink: Box<dyn ProgressSink>) {
        self.sink = sink;
    }

    /// True when a graph is queued but its job has not started yet.
    pub fn has_pending_job(&self) -> bool {
        self.queued.is_some()
    }

    /// True while a job is live.
    pub fn is_job_running(&self) -> bool {
        self.task.is_some()
    }

    /// The graph occupying the coordinator, queued or running.
    pub fn active_graph(&self) -> Option<GraphId> {
        self.queued.or_else(|| self.task.as_ref().map(|t| t.graph()))
    }

    /// Total elapsed time of the most recently finished job.
    pub fn last_job_elapsed(&self) -> Option<Duration> {
        self.last_job_elapsed
    }

    /// Queue a graph for execution.
    ///
    /// Fails while another graph is queued or running; the caller is
    /// expected to cancel first.
    pub fn queue(&mut self, graph: GraphId) -> Result<(), ScheduleError> {
        if let Some(busy) = self.active_graph() {
            return Err(ScheduleError(busy));
        }
        self.queued = Some(graph);
        Ok(())
    }

    /// Materialize the queued graph's walk into a live job.
    ///
    /// Returns `Ok(false)` when nothing is queued. A cycle fails the start;
    /// the tracker keeps its outdated set and stays `Dirty`.
    pub fn start(&mut self, registry: &mut TrackerRegistry) -> Result<bool, CycleError> {
        debug_assert!(self.task.is_none(), "started a job while one is running");
        let Some(graph) = self.queued.take() else {
            return Ok(false);
        };
        let Some(tracker) = registry.get_mut(graph) else {
            return Ok(false);
        };
        let plan = tracker.plan_walk(&ExecPath::top_level(), None)?;
        self.task = Some(WalkTask::new(plan));
        self.job_started = Some(Instant::now());
        tracing::debug!(%graph, "job started");
        Ok(true)
    }

    /// Resume the live job until the tick budget is spent or the job ends.
    ///
    /// Returns whether a job is still live afterwards.
    pub fn tick(&mut self, registry: &mut TrackerRegistry, store: &mut StatusStore) -> bool {
        if self.task.is_none() {
            return false;
        }
        let deadline = Instant::now() + self.config.tick_budget;
        let mut job_over = false;

        while let Some(task) = self.task.as_mut() {
            let Some(tracker) = registry.get_mut(task.graph()) else {
                job_over = true;
                break;
            };
            match task.resume(tracker, store) {
                StepResult::Continue => {
                    if let Some(name) = task.current_node() {
                        let text = format!("Updating {name}. Press Esc to cancel");
                        self.sink.set_progress_text(Some(&text));
                    }
                    if Instant::now() >= deadline {
                        break;
                    }
                }
                StepResult::Done | StepResult::Cancelled => {
                    job_over = true;
                    break;
                }
            }
        }

        if job_over {
            self.finish_job(registry);
        }
        self.task.is_some()
    }

    /// Cancel the live job (or drop the queued graph).
    ///
    /// The cancellation is observed at the task's current suspension point
    /// on one final resume; the coordinator then finalizes as on normal
    /// completion.
    pub fn cancel(&mut self, registry: &mut TrackerRegistry, store: &mut StatusStore) {
        if let Some(task) = self.task.as_mut() {
            task.cancel();
            if let Some(tracker) = registry.get_mut(task.graph()) {
                let observed = task.resume(tracker, store);
                debug_assert_eq!(observed, StepResult::Cancelled);
            }
            self.finish_job(registry);
        } else {
            self.queued = None;
        }
    }

    fn finish_job(&mut self, registry: &mut TrackerRegistry) {
        if let Some(task) = self.task.take() {
            if let Some(tracker) = registry.get_mut(task.graph()) {
                tracker.finish_walk();
            }
            let elapsed = self.job_started.take().map(|t| t.elapsed());
            self.last_job_elapsed = elapsed;
            tracing::debug!(graph = %task.graph(), ?elapsed, "job finished");
        }
        self.queued = None;
        self.sink.set_progress_text(None);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::graph::{fn_payload, LinkSpec, NodeSpec, PayloadHandle, Snapshot};
    use crate::update::tracker::{GraphKind, TrackerState};

    struct RecordingSink(Arc<Mutex<Vec<Option<String>>>>);

    impl ProgressSink for RecordingSink {
        fn set_progress_text(&mut self, text: Option<&str>) {
            self.0.lock().push(text.map(str::to_string));
        }
    }

    fn counting(counter: Arc<AtomicUsize>) -> PayloadHandle {
        fn_payload(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        })
    }

    fn registry_with_chain(
        graph: GraphId,
        names: &[&str],
        counter: &Arc<AtomicUsize>,
    ) -> TrackerRegistry {
        let specs = names
            .iter()
            .map(|n| {
                NodeSpec::new(*n, counting(counter.clone()))
                    .input("in")
                    .output("out")
            })
            .collect();
        let links = names
            .windows(2)
            .map(|w| LinkSpec::new(w[0], "out", w[1], "in"))
            .collect();
        let snapshot = Snapshot::build(graph, specs, links).unwrap();
        let mut registry = TrackerRegistry::new();
        registry.ensure(graph, GraphKind::TopLevel).install(snapshot);
        registry
    }

    #[test]
    fn queueing_twice_fails_loudly() {
        let mut coordinator = Coordinator::new();
        let g1 = GraphId::from(1);
        let g2 = GraphId::from(2);

        coordinator.queue(g1).unwrap();
        let err = coordinator.queue(g2).unwrap_err();
        assert_eq!(err, ScheduleError(g1));
        assert!(coordinator.has_pending_job());
    }

    #[test]
    fn a_generous_budget_finishes_the_job_in_one_tick() {
        let counter = Arc::new(AtomicUsize::new(0));
        let g = GraphId::from(1);
        let mut registry = registry_with_chain(g, &["A", "B", "C"], &counter);
        let mut store = StatusStore::new();
        let mut coordinator = Coordinator::with_config(CoordinatorConfig {
            tick_budget: Duration::from_secs(5),
        });

        coordinator.queue(g).unwrap();
        assert!(coordinator.start(&mut registry).unwrap());
        assert!(coordinator.is_job_running());

        let still_running = coordinator.tick(&mut registry, &mut store);
        assert!(!still_running);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(registry.get(g).unwrap().state(), TrackerState::Clean);
        assert!(coordinator.last_job_elapsed().is_some());
    }

    #[test]
    fn a_zero_budget_resumes_exactly_once_per_tick() {
        let counter = Arc::new(AtomicUsize::new(0));
        let g = GraphId::from(1);
        let mut registry = registry_with_chain(g, &["A", "B", "C"], &counter);
        let mut store = StatusStore::new();
        let mut coordinator = Coordinator::with_config(CoordinatorConfig {
            tick_budget: Duration::ZERO,
        });

        coordinator.queue(g).unwrap();
        coordinator.start(&mut registry).unwrap();

        assert!(coordinator.tick(&mut registry, &mut store));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(coordinator.tick(&mut registry, &mut store));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        // The last node completes and the job finalizes.
        assert!(!coordinator.tick(&mut registry, &mut store));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn progress_is_emitted_and_cleared() {
        let counter = Arc::new(AtomicUsize::new(0));
        let g = GraphId::from(1);
        let mut registry = registry_with_chain(g, &["A", "B"], &counter);
        let mut store = StatusStore::new();

        let texts = Arc::new(Mutex::new(Vec::new()));
        let mut coordinator = Coordinator::with_config(CoordinatorConfig {
            tick_budget: Duration::from_secs(5),
        });
        coordinator.set_progress_sink(Box::new(RecordingSink(texts.clone())));

        coordinator.queue(g).unwrap();
        coordinator.start(&mut registry).unwrap();
        coordinator.tick(&mut registry, &mut store);

        let texts = texts.lock();
        // At least one progress line, and a final clear.
        assert!(texts.iter().any(|t| t.as_deref().is_some_and(|s| s.contains("Updating"))));
        assert_eq!(texts.last(), Some(&None));
    }

    #[test]
    fn cancel_finalizes_like_normal_completion() {
        let counter = Arc::new(AtomicUsize::new(0));
        let g = GraphId::from(1);
        let mut registry = registry_with_chain(g, &["P", "Q", "R"], &counter);
        let mut store = StatusStore::new();
        let mut coordinator = Coordinator::with_config(CoordinatorConfig {
            tick_budget: Duration::ZERO,
        });

        coordinator.queue(g).unwrap();
        coordinator.start(&mut registry).unwrap();
        coordinator.tick(&mut registry, &mut store);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        coordinator.cancel(&mut registry, &mut store);
        assert!(!coordinator.is_job_running());
        assert!(!coordinator.has_pending_job());

        // Only P ran; the tracker holds Q and R for the next walk.
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(registry.get(g).unwrap().state(), TrackerState::Dirty);
        assert_eq!(registry.get(g).unwrap().outdated().count(), 2);
    }

    #[test]
    fn cancel_without_a_job_just_clears_the_queue() {
        let mut registry = TrackerRegistry::new();
        let mut store = StatusStore::new();
        let mut coordinator = Coordinator::new();

        coordinator.queue(GraphId::from(1)).unwrap();
        coordinator.cancel(&mut registry, &mut store);
        assert!(!coordinator.has_pending_job());
    }

    #[test]
    fn cycles_fail_the_start_and_leave_the_tracker_dirty() {
        let g = GraphId::from(1);
        let specs = vec![
            NodeSpec::new("X", fn_payload(|_| Ok(true))).input("in").output("out"),
            NodeSpec::new("Y", fn_payload(|_| Ok(true))).input("in").output("out"),
        ];
        let links = vec![
            LinkSpec::new("X", "out", "Y", "in"),
            LinkSpec::new("Y", "out", "X", "in"),
        ];
        let snapshot = Snapshot::build(g, specs, links).unwrap();
        let mut registry = TrackerRegistry::new();
        registry.ensure(g, GraphKind::TopLevel).install(snapshot);

        let mut coordinator = Coordinator::new();
        coordinator.queue(g).unwrap();
        assert!(coordinator.start(&mut registry).is_err());
        assert!(!coordinator.is_job_running());
        assert_eq!(registry.get(g).unwrap().state(), TrackerState::Dirty);
    }
}
