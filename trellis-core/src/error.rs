//! Error types for trellis-core.
//!
//! The engine distinguishes four failure classes:
//!
//! - [`StructuralError`]: a snapshot could not be built from the host's node
//!   and link lists. Fatal to that rebuild only; the tracker keeps its
//!   previous valid snapshot.
//! - [`CycleError`]: the link set describes a cycle, detected by the
//!   topological walk. Fatal to that walk only; cached statuses are left
//!   untouched.
//! - [`NodeError`]: a node payload failed (or was cancelled mid-job).
//!   Recovered locally; the error is recorded into the node's status and the
//!   node is retried on the next walk.
//! - [`ScheduleError`]: the host violated the one-job-at-a-time contract.

use std::sync::Arc;

use thiserror::Error;

use crate::graph::GraphId;

/// Boxed error returned by node payloads.
pub type BoxedNodeError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A snapshot could not be built from the host-supplied topology.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralError {
    /// Two nodes share the same name.
    #[error("duplicate node name `{0}`")]
    DuplicateNode(String),

    /// A node declares the same socket identifier twice on one side.
    #[error("duplicate {side} socket `{socket}` on node `{node}`")]
    DuplicateSocket {
        /// Owning node name.
        node: String,
        /// Socket identifier.
        socket: String,
        /// "input" or "output".
        side: &'static str,
    },

    /// A link references a node that is not part of the snapshot.
    #[error("link references unknown node `{0}`")]
    UnknownNode(String),

    /// A link references a socket its endpoint node does not declare.
    #[error("link references unknown socket `{socket}` on node `{node}`")]
    UnknownSocket {
        /// Endpoint node name.
        node: String,
        /// Socket identifier.
        socket: String,
    },

    /// Two links point at the same input socket.
    #[error("input socket `{socket}` on node `{node}` has more than one incoming link")]
    InputFanIn {
        /// Consumer node name.
        node: String,
        /// Input socket identifier.
        socket: String,
    },
}

/// The walked portion of the graph contains a dependency cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("graph contains a cycle blocking node `{node}`")]
pub struct CycleError {
    /// Name of a node the cycle prevented from being ordered.
    pub node: String,
}

/// Failure of a single node execution, kept in the status store.
///
/// Cheap to clone so the same value can live in the store and be handed to
/// the UI for display.
#[derive(Debug, Clone, Error)]
pub enum NodeError {
    /// The job was cancelled while this node was in flight.
    #[error("execution was cancelled")]
    Cancelled,

    /// The node payload raised.
    #[error("{0}")]
    Process(Arc<dyn std::error::Error + Send + Sync + 'static>),
}

impl NodeError {
    /// Wrap a payload error.
    pub fn from_payload(err: BoxedNodeError) -> Self {
        Self::Process(Arc::from(err))
    }

    /// True if this error records a cancellation rather than a payload failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// The coordinator was asked to take a job while one is queued or running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("a job for graph {0} is already queued or running; cancel it first")]
pub struct ScheduleError(pub GraphId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_error_wraps_payload_error() {
        let boxed: BoxedNodeError = "mesh has no faces".into();
        let err = NodeError::from_payload(boxed);
        assert!(!err.is_cancelled());
        assert_eq!(err.to_string(), "mesh has no faces");
    }

    #[test]
    fn cancelled_is_distinct_from_process_errors() {
        let err = NodeError::Cancelled;
        assert!(err.is_cancelled());
        assert_eq!(err.to_string(), "execution was cancelled");
    }

    #[test]
    fn structural_errors_format_with_context() {
        let err = StructuralError::InputFanIn {
            node: "Extrude".into(),
            socket: "mesh".into(),
        };
        assert!(err.to_string().contains("Extrude"));
        assert!(err.to_string().contains("mesh"));
    }
}
