//! Computational Graph Model
//!
//! This module owns the static picture of a node graph: identities, sockets,
//! links, the opaque node payload contract, and the immutable per-version
//! [`Snapshot`] with its adjacency queries and topological walk.
//!
//! The dynamic side (dirty tracking, scheduling, execution state) lives in
//! [`crate::update`]; it consumes snapshots but never mutates them.

mod node;
mod snapshot;

pub use node::{
    fn_payload, payload, EntryPoint, ExecPath, FnPayload, GraphId, LinkSpec, Node, NodeId,
    NodePayload, NodeSpec, PayloadHandle, ProcessContext, ProcessStep, Socket, SocketRef,
    SocketSide,
};
pub use snapshot::{Link, LinkKey, Snapshot, WalkStep};
