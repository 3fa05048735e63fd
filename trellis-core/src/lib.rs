//! Trellis Core
//!
//! This crate provides the incremental update engine for the Trellis
//! node-based procedural geometry editor. It implements:
//!
//! - Dependency-graph modeling with immutable per-version snapshots
//! - Dirty-node tracking and topologically ordered re-execution
//! - Cross-graph dependency resolution for nested, reusable sub-graphs
//! - Per-invocation-path execution state, errors and timings
//! - A cooperative, time-sliced, cancellable scheduler driven by the host
//!
//! The engine decides *when* nodes run; the host editor owns *what* they
//! compute, through the opaque [`graph::NodePayload`] contract.
//!
//! # Architecture
//!
//! The crate is organized into two modules:
//!
//! - `graph`: identities, sockets, links, the payload contract, and the
//!   immutable snapshot with adjacency queries and topological walk
//! - `update`: trackers, the per-context status store, the cross-graph
//!   index, the suspendable walk task, the coordinator and the engine facade
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::graph::{fn_payload, GraphId, LinkSpec, NodeSpec};
//! use trellis_core::update::{Engine, Event};
//!
//! let mut engine = Engine::new();
//! let graph = GraphId::from(1);
//!
//! // Describe the topology after an edit.
//! engine.install_topology(
//!     graph,
//!     vec![
//!         NodeSpec::new("Grid", fn_payload(|_| Ok(true))).output("mesh"),
//!         NodeSpec::new("Extrude", fn_payload(|_| Ok(true))).input("mesh"),
//!     ],
//!     vec![LinkSpec::new("Grid", "mesh", "Extrude", "mesh")],
//! )?;
//!
//! // Host timer, every ~10 ms:
//! engine.start_job_if_needed()?;
//! if engine.is_job_running() {
//!     engine.tick();
//! }
//! ```

pub mod error;
pub mod graph;
pub mod update;
