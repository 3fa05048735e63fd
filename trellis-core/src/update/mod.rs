//! Incremental Update Engine
//!
//! This module decides, after any edit, the minimal set of nodes that must
//! be re-executed, in what order, and drives that execution without blocking
//! the host UI.
//!
//! # Concepts
//!
//! ## Outdated nodes
//!
//! A node whose cached result must be disregarded before downstream
//! consumers can trust it again. Each [`TreeTracker`] keeps one outdated set
//! per graph; a walk consumes it and brings the downstream closure up to
//! date in topological order.
//!
//! ## Invocation contexts
//!
//! A reusable sub-graph can be instantiated many times; execution state is
//! recorded per invocation path in the [`StatusStore`] so instantiations
//! never bleed into each other.
//!
//! ## Cross-graph propagation
//!
//! The [`CrossGraphIndex`] knows which entry nodes embed which sub-graph,
//! so an edit deep inside a nested sub-graph dirties every top-level graph
//! that transitively depends on it.
//!
//! ## Cooperative scheduling
//!
//! The [`Coordinator`] runs a single suspendable [`WalkTask`] at a time,
//! resumed from the host's timer under a wall-clock budget per tick, with
//! out-of-band cancellation observed at suspension points. Everything is
//! single-threaded; "suspending" means returning to the timer, not yielding
//! to another thread.

mod coordinator;
mod engine;
mod index;
mod registry;
mod status;
mod task;
mod tracker;

pub use coordinator::{Coordinator, CoordinatorConfig, NullProgress, ProgressSink};
pub use engine::{Engine, Event};
pub use index::CrossGraphIndex;
pub use registry::TrackerRegistry;
pub use status::{NodeStatus, StatusStore};
pub use task::{StepResult, WalkTask};
pub use tracker::{
    GraphKind, InstallReport, PlanStep, TrackerState, TreeTracker, WalkPlan,
};
