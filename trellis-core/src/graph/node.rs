//! Graph Identities and the Node Payload Contract
//!
//! This module defines the identity types shared by the whole engine (graph
//! ids, node ids, socket references, invocation paths) and the contract the
//! host's node implementations fulfil.
//!
//! # Identity
//!
//! Node ids are plain indices assigned at snapshot build time, in declaration
//! order. The stable identity of a node across snapshots is its *name*; the
//! update tracker remaps ids by name whenever a new snapshot is installed.
//! Sockets are identified by their owning node, a direction, and a stable
//! string identifier (never by position, since hosts reorder sockets).
//!
//! # Invocation paths
//!
//! One reusable sub-graph can be embedded by many entry nodes, possibly
//! nested. The chain of entry nodes through which execution reaches a node
//! is its [`ExecPath`]; execution state is recorded per path so two
//! instantiations of the same sub-graph never share status.
//!
//! # Payloads
//!
//! The engine never computes node data itself. Each node carries an opaque
//! [`NodePayload`] supplied by the host; the engine only decides *when* to
//! call it. A payload either finishes in one `process` call or yields
//! between sub-steps, letting the scheduler suspend mid-node.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::error::BoxedNodeError;

/// Stable identifier of an editable graph, supplied by the host.
///
/// The id survives snapshot rebuilds; it names "the same" graph across
/// successive versions of its topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphId(u64);

impl GraphId {
    /// Get the raw id value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl From<u64> for GraphId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// Identifier of a node within one graph snapshot.
///
/// Assigned at build time as the node's declaration index. Ids are only
/// meaningful together with the snapshot (or its tracker) that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    /// Get the raw index value.
    pub fn raw(&self) -> u32 {
        self.0
    }

    pub(crate) fn index(&self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for NodeId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Direction of a socket relative to its owning node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketSide {
    /// The socket consumes data.
    Input,
    /// The socket produces data.
    Output,
}

impl SocketSide {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

/// Position-independent reference to a socket within one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketRef {
    /// Owning node.
    pub node: NodeId,
    /// Direction on the owning node.
    pub side: SocketSide,
    /// Index within the node's sockets of that direction.
    pub index: usize,
}

/// A socket owned by a node in a snapshot.
#[derive(Debug, Clone)]
pub struct Socket {
    node: NodeId,
    side: SocketSide,
    index: usize,
    ident: String,
}

impl Socket {
    pub(crate) fn new(node: NodeId, side: SocketSide, index: usize, ident: String) -> Self {
        Self {
            node,
            side,
            index,
            ident,
        }
    }

    /// The stable identifier the host declared for this socket.
    pub fn ident(&self) -> &str {
        &self.ident
    }

    /// Direction of the socket.
    pub fn side(&self) -> SocketSide {
        self.side
    }

    /// Reference usable for adjacency queries.
    pub fn socket_ref(&self) -> SocketRef {
        SocketRef {
            node: self.node,
            side: self.side,
            index: self.index,
        }
    }
}

/// One entry node on an invocation path: a node in `graph` that embeds a
/// reusable sub-graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryPoint {
    /// The graph owning the entry node.
    pub graph: GraphId,
    /// The entry node itself.
    pub node: NodeId,
}

/// Ordered chain of entry nodes through which execution reaches a node.
///
/// The empty path is the top-level context. Paths are short (nesting depth),
/// so they are kept inline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ExecPath(SmallVec<[EntryPoint; 2]>);

impl ExecPath {
    /// The top-level (empty) path.
    pub fn top_level() -> Self {
        Self::default()
    }

    /// Build a path from a chain of entry points, outermost first.
    pub fn from_entries(entries: impl IntoIterator<Item = EntryPoint>) -> Self {
        Self(entries.into_iter().collect())
    }

    /// True for the top-level context.
    pub fn is_top_level(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of entry points on the path.
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// The path extended by one more entry point.
    pub fn entered(&self, entry: EntryPoint) -> Self {
        let mut entries = self.0.clone();
        entries.push(entry);
        Self(entries)
    }

    /// Entry points, outermost first.
    pub fn entries(&self) -> &[EntryPoint] {
        &self.0
    }
}

impl fmt::Display for ExecPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "<top>");
        }
        for (i, entry) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}:{}", entry.graph, entry.node)?;
        }
        Ok(())
    }
}

/// Outcome of one `process` call on a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStep {
    /// More sub-steps remain; the scheduler may suspend here and resume the
    /// payload later.
    Yielded,
    /// Processing finished.
    Done {
        /// Whether the node's outputs differ from its previous execution.
        /// Reserved for hosts that gate downstream propagation on it.
        output_changed: bool,
    },
}

/// Everything a payload may inspect while processing.
pub struct ProcessContext<'a> {
    /// Id of the node being processed.
    pub node: NodeId,
    /// Name of the node being processed.
    pub name: &'a str,
    /// Invocation path under which the node is being executed.
    pub path: &'a ExecPath,
    /// For each input socket (in declaration order), the output socket
    /// feeding it, or `None` when the input is unconnected.
    pub inputs: &'a [Option<SocketRef>],
    /// Zero-based sub-step counter; 0 on the first `process` call of a node,
    /// incremented after every `Yielded`.
    pub sub_step: usize,
}

/// The opaque per-node computation supplied by the host.
///
/// `process` is called with the node's context; it reads and writes the
/// host's socket data out-of-band. Returning an error records it into the
/// node's status and re-queues the node for the next walk; it never aborts
/// the walk as a whole.
pub trait NodePayload: Send {
    /// Run one step of the node's computation.
    ///
    /// Single-shot nodes return `Done` on the first call. Nodes that expose
    /// sub-steps return `Yielded` until the final step; the engine calls
    /// again with an incremented `sub_step` and may suspend in between.
    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<ProcessStep, BoxedNodeError>;
}

/// Shared handle to a payload.
///
/// Payloads outlive snapshots: rebuilding topology produces new node objects
/// but the same payload handles, so host-side state carries over.
pub type PayloadHandle = Arc<Mutex<dyn NodePayload>>;

/// Wrap a payload into a handle.
pub fn payload<P: NodePayload + 'static>(p: P) -> PayloadHandle {
    Arc::new(Mutex::new(p))
}

/// A single-shot payload made from a closure.
///
/// The closure returns whether the node's output changed. Convenient for
/// hosts whose nodes are plain functions, and for tests.
pub struct FnPayload<F>(F);

impl<F> NodePayload for FnPayload<F>
where
    F: FnMut(&mut ProcessContext<'_>) -> Result<bool, BoxedNodeError> + Send,
{
    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<ProcessStep, BoxedNodeError> {
        (self.0)(ctx).map(|output_changed| ProcessStep::Done { output_changed })
    }
}

/// Wrap a closure into a single-shot payload handle.
pub fn fn_payload<F>(f: F) -> PayloadHandle
where
    F: FnMut(&mut ProcessContext<'_>) -> Result<bool, BoxedNodeError> + Send + 'static,
{
    payload(FnPayload(f))
}

/// Host-side description of one node, input to snapshot building.
pub struct NodeSpec {
    /// Name, unique within the graph.
    pub name: String,
    /// Input socket identifiers, in order.
    pub inputs: Vec<String>,
    /// Output socket identifiers, in order.
    pub outputs: Vec<String>,
    /// The node's computation.
    pub payload: PayloadHandle,
    /// Set when this node embeds a reusable sub-graph (an entry node).
    pub sub_graph: Option<GraphId>,
}

impl NodeSpec {
    /// A node with no sockets.
    pub fn new(name: impl Into<String>, payload: PayloadHandle) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            payload,
            sub_graph: None,
        }
    }

    /// Append an input socket.
    pub fn input(mut self, ident: impl Into<String>) -> Self {
        self.inputs.push(ident.into());
        self
    }

    /// Append an output socket.
    pub fn output(mut self, ident: impl Into<String>) -> Self {
        self.outputs.push(ident.into());
        self
    }

    /// Mark this node as the entry node of a sub-graph.
    pub fn embeds(mut self, sub_graph: GraphId) -> Self {
        self.sub_graph = Some(sub_graph);
        self
    }
}

/// Host-side description of one link, input to snapshot building.
///
/// Endpoints are named by (node name, socket identifier) so specs stay valid
/// across snapshot rebuilds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSpec {
    /// Producer node name.
    pub from_node: String,
    /// Output socket identifier on the producer.
    pub from_socket: String,
    /// Consumer node name.
    pub to_node: String,
    /// Input socket identifier on the consumer.
    pub to_socket: String,
}

impl LinkSpec {
    /// Link `from_node.from_socket` to `to_node.to_socket`.
    pub fn new(
        from_node: impl Into<String>,
        from_socket: impl Into<String>,
        to_node: impl Into<String>,
        to_socket: impl Into<String>,
    ) -> Self {
        Self {
            from_node: from_node.into(),
            from_socket: from_socket.into(),
            to_node: to_node.into(),
            to_socket: to_socket.into(),
        }
    }
}

/// A node inside a built snapshot.
pub struct Node {
    id: NodeId,
    name: String,
    inputs: SmallVec<[Socket; 4]>,
    outputs: SmallVec<[Socket; 4]>,
    payload: PayloadHandle,
    sub_graph: Option<GraphId>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("payload", &"<payload>")
            .field("sub_graph", &self.sub_graph)
            .finish()
    }
}

impl Node {
    pub(crate) fn from_spec(id: NodeId, spec: NodeSpec) -> Self {
        let inputs = spec
            .inputs
            .into_iter()
            .enumerate()
            .map(|(i, ident)| Socket::new(id, SocketSide::Input, i, ident))
            .collect();
        let outputs = spec
            .outputs
            .into_iter()
            .enumerate()
            .map(|(i, ident)| Socket::new(id, SocketSide::Output, i, ident))
            .collect();
        Self {
            id,
            name: spec.name,
            inputs,
            outputs,
            payload: spec.payload,
            sub_graph: spec.sub_graph,
        }
    }

    /// The node's id in its snapshot.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The node's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Input sockets, in declaration order.
    pub fn inputs(&self) -> &[Socket] {
        &self.inputs
    }

    /// Output sockets, in declaration order.
    pub fn outputs(&self) -> &[Socket] {
        &self.outputs
    }

    /// Handle to the node's computation.
    pub fn payload(&self) -> &PayloadHandle {
        &self.payload
    }

    /// The sub-graph this node embeds, when it is an entry node.
    pub fn sub_graph(&self) -> Option<GraphId> {
        self.sub_graph
    }

    /// Find an input socket by identifier.
    pub fn input_by_ident(&self, ident: &str) -> Option<&Socket> {
        self.inputs.iter().find(|s| s.ident() == ident)
    }

    /// Find an output socket by identifier.
    pub fn output_by_ident(&self, ident: &str) -> Option<&Socket> {
        self.outputs.iter().find(|s| s.ident() == ident)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> PayloadHandle {
        fn_payload(|_| Ok(true))
    }

    #[test]
    fn node_ids_order_by_index() {
        let a = NodeId::from(0);
        let b = NodeId::from(1);
        assert!(a < b);
        assert_eq!(b.raw(), 1);
    }

    #[test]
    fn exec_path_extension_does_not_mutate_original() {
        let top = ExecPath::top_level();
        assert!(top.is_top_level());

        let entry = EntryPoint {
            graph: GraphId::from(7),
            node: NodeId::from(3),
        };
        let nested = top.entered(entry);

        assert!(top.is_top_level());
        assert!(!nested.is_top_level());
        assert_eq!(nested.depth(), 1);
        assert_eq!(nested.entries()[0], entry);
    }

    #[test]
    fn exec_paths_with_same_entries_are_equal() {
        let entry = EntryPoint {
            graph: GraphId::from(1),
            node: NodeId::from(2),
        };
        let a = ExecPath::from_entries([entry]);
        let b = ExecPath::top_level().entered(entry);
        assert_eq!(a, b);
    }

    #[test]
    fn fn_payload_finishes_in_one_step() {
        let handle = fn_payload(|_| Ok(true));
        let path = ExecPath::top_level();
        let mut ctx = ProcessContext {
            node: NodeId::from(0),
            name: "Box",
            path: &path,
            inputs: &[],
            sub_step: 0,
        };
        let step = handle.lock().process(&mut ctx).unwrap();
        assert_eq!(
            step,
            ProcessStep::Done {
                output_changed: true
            }
        );
    }

    #[test]
    fn node_from_spec_indexes_sockets() {
        let spec = NodeSpec::new("Extrude", noop())
            .input("mesh")
            .input("amount")
            .output("mesh");
        let node = Node::from_spec(NodeId::from(4), spec);

        assert_eq!(node.name(), "Extrude");
        assert_eq!(node.inputs().len(), 2);
        assert_eq!(node.outputs().len(), 1);
        assert_eq!(node.inputs()[1].ident(), "amount");
        assert_eq!(
            node.input_by_ident("amount").unwrap().socket_ref(),
            SocketRef {
                node: NodeId::from(4),
                side: SocketSide::Input,
                index: 1,
            }
        );
        assert!(node.sub_graph().is_none());
    }
}
