//! Graph Snapshot
//!
//! A snapshot is the immutable per-version picture of one graph's topology:
//! nodes, sockets and links, plus precomputed adjacency so the update engine
//! can answer "who feeds whom" in O(1).
//!
//! # Lifecycle
//!
//! A snapshot is built once per topology-affecting edit and never mutated.
//! Successive snapshots of the same editable graph share its [`GraphId`];
//! the update tracker diffs their link sets (compared by [`LinkKey`], not by
//! object identity) to decide which nodes became outdated.
//!
//! # Walk order
//!
//! [`Snapshot::topo_walk`] yields nodes so that every node appears only
//! after everything it depends on within the walk. Ties are broken by node
//! declaration order, keeping the output reproducible for identical inputs.
//! A cycle in the walked portion fails the walk with [`CycleError`] rather
//! than looping or dropping nodes.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use indexmap::IndexMap;
use smallvec::{smallvec, SmallVec};

use crate::error::{CycleError, StructuralError};

use super::node::{GraphId, LinkSpec, Node, NodeId, NodeSpec, Socket, SocketRef, SocketSide};

/// A link between two sockets inside one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    /// Producing output socket.
    pub from: SocketRef,
    /// Consuming input socket.
    pub to: SocketRef,
}

/// Snapshot-independent identity of a link.
///
/// Links are compared across snapshots by (node name, socket identifier)
/// tuples because snapshots are rebuilt wholesale and ids shift.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkKey {
    /// Producer node name.
    pub from_node: String,
    /// Output socket identifier.
    pub from_socket: String,
    /// Consumer node name.
    pub to_node: String,
    /// Input socket identifier.
    pub to_socket: String,
}

/// One entry of a topological walk: a node together with the source socket
/// of each of its inputs.
#[derive(Debug, Clone)]
pub struct WalkStep {
    /// The node to process.
    pub node: NodeId,
    /// Source output socket per input, in input declaration order.
    pub inputs: SmallVec<[Option<SocketRef>; 4]>,
}

/// Immutable snapshot of one graph version.
#[derive(Debug)]
pub struct Snapshot {
    graph: GraphId,
    nodes: Vec<Node>,
    by_name: IndexMap<String, NodeId>,
    links: Vec<Link>,
    /// Per node, per input index: the output socket feeding it.
    input_sources: Vec<SmallVec<[Option<SocketRef>; 4]>>,
    /// Output socket -> input sockets it feeds.
    fanout: HashMap<SocketRef, SmallVec<[SocketRef; 2]>>,
    /// Per node: distinct producer nodes, ascending.
    upstream: Vec<SmallVec<[NodeId; 4]>>,
    /// Per node: distinct consumer nodes, ascending.
    downstream: Vec<SmallVec<[NodeId; 4]>>,
}

impl Snapshot {
    /// Build a snapshot from host-supplied node and link lists.
    ///
    /// Fails fast on malformed topology: duplicate node names, duplicate
    /// socket identifiers on one side of a node, links referencing unknown
    /// endpoints, or more than one link into the same input socket.
    pub fn build(
        graph: GraphId,
        specs: Vec<NodeSpec>,
        link_specs: Vec<LinkSpec>,
    ) -> Result<Self, StructuralError> {
        let mut by_name = IndexMap::with_capacity(specs.len());
        let mut nodes = Vec::with_capacity(specs.len());

        for (i, spec) in specs.into_iter().enumerate() {
            let id = NodeId::from(i as u32);
            check_distinct(&spec.name, &spec.inputs, SocketSide::Input)?;
            check_distinct(&spec.name, &spec.outputs, SocketSide::Output)?;
            if by_name.insert(spec.name.clone(), id).is_some() {
                return Err(StructuralError::DuplicateNode(spec.name));
            }
            nodes.push(Node::from_spec(id, spec));
        }

        let mut input_sources: Vec<SmallVec<[Option<SocketRef>; 4]>> = nodes
            .iter()
            .map(|n| smallvec![None; n.inputs().len()])
            .collect();
        let mut fanout: HashMap<SocketRef, SmallVec<[SocketRef; 2]>> = HashMap::new();
        let mut links = Vec::with_capacity(link_specs.len());

        for ls in link_specs {
            let from_id = *by_name
                .get(&ls.from_node)
                .ok_or_else(|| StructuralError::UnknownNode(ls.from_node.clone()))?;
            let from = nodes[from_id.index()]
                .output_by_ident(&ls.from_socket)
                .ok_or_else(|| StructuralError::UnknownSocket {
                    node: ls.from_node.clone(),
                    socket: ls.from_socket.clone(),
                })?
                .socket_ref();
            let to_id = *by_name
                .get(&ls.to_node)
                .ok_or_else(|| StructuralError::UnknownNode(ls.to_node.clone()))?;
            let to = nodes[to_id.index()]
                .input_by_ident(&ls.to_socket)
                .ok_or_else(|| StructuralError::UnknownSocket {
                    node: ls.to_node.clone(),
                    socket: ls.to_socket.clone(),
                })?
                .socket_ref();

            let slot = &mut input_sources[to_id.index()][to.index];
            if slot.is_some() {
                return Err(StructuralError::InputFanIn {
                    node: ls.to_node,
                    socket: ls.to_socket,
                });
            }
            *slot = Some(from);
            fanout.entry(from).or_default().push(to);
            links.push(Link { from, to });
        }

        let mut upstream: Vec<SmallVec<[NodeId; 4]>> = vec![SmallVec::new(); nodes.len()];
        let mut downstream: Vec<SmallVec<[NodeId; 4]>> = vec![SmallVec::new(); nodes.len()];
        for link in &links {
            upstream[link.to.node.index()].push(link.from.node);
            downstream[link.from.node.index()].push(link.to.node);
        }
        for list in upstream.iter_mut().chain(downstream.iter_mut()) {
            list.sort_unstable();
            list.dedup();
        }

        Ok(Self {
            graph,
            nodes,
            by_name,
            links,
            input_sources,
            fanout,
            upstream,
            downstream,
        })
    }

    /// The stable id of the graph this snapshot describes.
    pub fn graph(&self) -> GraphId {
        self.graph
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// All nodes, in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// The node with the given id.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    /// Look a node up by name.
    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.by_name.get(name).copied()
    }

    /// Input sockets of a node.
    pub fn inputs_of(&self, node: NodeId) -> &[Socket] {
        self.nodes[node.index()].inputs()
    }

    /// Output sockets of a node.
    pub fn outputs_of(&self, node: NodeId) -> &[Socket] {
        self.nodes[node.index()].outputs()
    }

    /// All links.
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// The sockets linked to the given socket: the 0..1 producer of an
    /// input, or every consumer of an output.
    pub fn linked_sockets(&self, socket: SocketRef) -> SmallVec<[SocketRef; 2]> {
        match socket.side {
            SocketSide::Input => self.input_sources[socket.node.index()][socket.index]
                .into_iter()
                .collect(),
            SocketSide::Output => self.fanout.get(&socket).cloned().unwrap_or_default(),
        }
    }

    /// Source output socket per input of a node.
    pub fn input_sources(&self, node: NodeId) -> &[Option<SocketRef>] {
        &self.input_sources[node.index()]
    }

    /// Distinct producer nodes of a node, ascending.
    pub fn upstream(&self, node: NodeId) -> &[NodeId] {
        &self.upstream[node.index()]
    }

    /// Distinct consumer nodes of a node, ascending.
    pub fn downstream(&self, node: NodeId) -> &[NodeId] {
        &self.downstream[node.index()]
    }

    /// True when any link leaves the given output socket.
    pub fn output_linked(&self, socket: SocketRef) -> bool {
        self.fanout.contains_key(&socket)
    }

    /// True when the named node exists, declares the output, and has at
    /// least one link leaving it. Used when diffing against an older
    /// snapshot, where ids are not comparable.
    pub fn output_linked_by_name(&self, node: &str, socket: &str) -> bool {
        let Some(id) = self.node_id(node) else {
            return false;
        };
        let Some(sock) = self.nodes[id.index()].output_by_ident(socket) else {
            return false;
        };
        self.output_linked(sock.socket_ref())
    }

    /// Entry nodes of this snapshot: nodes embedding a reusable sub-graph.
    pub fn entry_nodes(&self) -> impl Iterator<Item = (NodeId, GraphId)> + '_ {
        self.nodes
            .iter()
            .filter_map(|n| n.sub_graph().map(|g| (n.id(), g)))
    }

    /// Snapshot-independent identities of all links.
    pub fn link_keys(&self) -> HashSet<LinkKey> {
        self.links
            .iter()
            .map(|link| LinkKey {
                from_node: self.nodes[link.from.node.index()].name().to_string(),
                from_socket: self.nodes[link.from.node.index()].outputs()[link.from.index]
                    .ident()
                    .to_string(),
                to_node: self.nodes[link.to.node.index()].name().to_string(),
                to_socket: self.nodes[link.to.node.index()].inputs()[link.to.index]
                    .ident()
                    .to_string(),
            })
            .collect()
    }

    /// Every node reachable downstream from the seeds, seeds included,
    /// ascending.
    pub fn downstream_closure(&self, seeds: &[NodeId]) -> Vec<NodeId> {
        self.closure(seeds, |n| &self.downstream[n.index()])
    }

    /// Every node reachable upstream from the seeds, seeds included,
    /// ascending.
    pub fn upstream_closure(&self, seeds: &[NodeId]) -> Vec<NodeId> {
        self.closure(seeds, |n| &self.upstream[n.index()])
    }

    fn closure<'a>(
        &'a self,
        seeds: &[NodeId],
        neighbors: impl Fn(NodeId) -> &'a [NodeId],
    ) -> Vec<NodeId> {
        let mut seen = vec![false; self.nodes.len()];
        let mut queue: VecDeque<NodeId> = VecDeque::new();
        for &seed in seeds {
            if !seen[seed.index()] {
                seen[seed.index()] = true;
                queue.push_back(seed);
            }
        }
        let mut out = Vec::new();
        while let Some(n) = queue.pop_front() {
            out.push(n);
            for &next in neighbors(n) {
                if !seen[next.index()] {
                    seen[next.index()] = true;
                    queue.push_back(next);
                }
            }
        }
        out.sort_unstable();
        out
    }

    /// Topologically walk the downstream closure of `seeds`, restricted to
    /// nodes admitted by `filter`.
    ///
    /// Every yielded node appears after all walked nodes it depends on. Ties
    /// are broken by ascending node id (declaration order). Reachability is
    /// propagated only through admitted nodes, which is sound for the
    /// upstream-closed filters the tracker uses.
    pub fn topo_walk(
        &self,
        seeds: &[NodeId],
        filter: impl Fn(NodeId) -> bool,
    ) -> Result<Vec<WalkStep>, CycleError> {
        let mut member = vec![false; self.nodes.len()];
        let mut queue: VecDeque<NodeId> = VecDeque::new();
        for &seed in seeds {
            if filter(seed) && !member[seed.index()] {
                member[seed.index()] = true;
                queue.push_back(seed);
            }
        }
        while let Some(n) = queue.pop_front() {
            for &next in self.downstream(n) {
                if filter(next) && !member[next.index()] {
                    member[next.index()] = true;
                    queue.push_back(next);
                }
            }
        }
        let total = member.iter().filter(|m| **m).count();

        let mut in_degree = vec![0usize; self.nodes.len()];
        let mut ready: BinaryHeap<Reverse<NodeId>> = BinaryHeap::new();
        for (i, is_member) in member.iter().enumerate() {
            if !is_member {
                continue;
            }
            let id = NodeId::from(i as u32);
            let degree = self
                .upstream(id)
                .iter()
                .filter(|u| member[u.index()])
                .count();
            in_degree[i] = degree;
            if degree == 0 {
                ready.push(Reverse(id));
            }
        }

        let mut steps = Vec::with_capacity(total);
        while let Some(Reverse(node)) = ready.pop() {
            steps.push(WalkStep {
                node,
                inputs: self.input_sources[node.index()].clone(),
            });
            for &next in self.downstream(node) {
                if member[next.index()] {
                    in_degree[next.index()] -= 1;
                    if in_degree[next.index()] == 0 {
                        ready.push(Reverse(next));
                    }
                }
            }
        }

        if steps.len() != total {
            let emitted: HashSet<NodeId> = steps.iter().map(|s| s.node).collect();
            let stuck = (0..self.nodes.len())
                .map(|i| NodeId::from(i as u32))
                .find(|id| member[id.index()] && !emitted.contains(id))
                .expect("cycle member exists when counts disagree");
            return Err(CycleError {
                node: self.nodes[stuck.index()].name().to_string(),
            });
        }
        Ok(steps)
    }
}

fn check_distinct(
    node: &str,
    idents: &[String],
    side: SocketSide,
) -> Result<(), StructuralError> {
    let mut seen = HashSet::with_capacity(idents.len());
    for ident in idents {
        if !seen.insert(ident.as_str()) {
            return Err(StructuralError::DuplicateSocket {
                node: node.to_string(),
                socket: ident.clone(),
                side: side.label(),
            });
        }
    }
    Ok(())
}
