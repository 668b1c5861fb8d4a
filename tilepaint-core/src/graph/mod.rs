//! # Graph
//!
//! The document is a directed acyclic graph of processing nodes. Every node has typed input
//! and output sockets, and each input is either unconnected or fed by exactly one output.
//! There is exactly one [`NodeKind::Output`] node, and rendering pulls from it.
//!
//! Layers and folders are ordinary nodes too, see [`structure`] for how they form a stack.

pub mod node;
pub mod nodes;
pub mod registry;
pub mod snapshot;
pub mod structure;

pub use node::{
    Node, NodeError, NodeKind, Outputs, ParamError, ParamValue, RasterContent, RenderContext,
    SocketDesc, SocketType, StructureKind, Value,
};
pub use registry::{NodeContext, NodeRegistry};
pub use structure::Location;

use crate::tile::TileStoreError;

pub struct NodeEntry {
    node: Box<dyn Node>,
    inputs: smallvec::SmallVec<[Option<OutputRef>; 2]>,
}
pub type NodeId = crate::id::Id<NodeEntry>;

/// An output socket of a node.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, serde::Serialize)]
pub struct OutputRef {
    pub node: NodeId,
    pub socket: usize,
}
/// An input socket of a node.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, serde::Serialize)]
pub struct InputRef {
    pub node: NodeId,
    pub socket: usize,
}
impl OutputRef {
    #[must_use]
    pub fn new(node: NodeId, socket: usize) -> Self {
        Self { node, socket }
    }
}
impl InputRef {
    #[must_use]
    pub fn new(node: NodeId, socket: usize) -> Self {
        Self { node, socket }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("node {0} not found")]
    UnknownNode(NodeId),
    #[error("node {0} already exists")]
    IdInUse(NodeId),
    #[error("node {} has no input {}", .0.node, .0.socket)]
    NoSuchInput(InputRef),
    #[error("node {} has no output {}", .0.node, .0.socket)]
    NoSuchOutput(OutputRef),
    #[error("can't connect {output:?} output to {input:?} input")]
    TypeMismatch {
        output: SocketType,
        input: SocketType,
    },
    #[error("connection would form a cycle")]
    WouldCycle,
    #[error("the output node can't be removed or used as a source")]
    OutputNode,
    #[error("{0} is not a layer or folder")]
    NotAMember(NodeId),
    #[error("{0} is not a folder")]
    NotAFolder(NodeId),
    #[error("no constructor registered for {0:?}")]
    Unregistered(NodeKind),
    #[error(transparent)]
    Store(#[from] TileStoreError),
    #[error(transparent)]
    Param(#[from] ParamError),
}

/// Everything needed to put a removed node back exactly where it was.
pub struct RemovedNode {
    node: Box<dyn Node>,
    inputs: smallvec::SmallVec<[Option<OutputRef>; 2]>,
    /// Inputs of other nodes that were fed by the removed node.
    consumers: Vec<(InputRef, OutputRef)>,
}
impl RemovedNode {
    #[must_use]
    pub fn node(&self) -> &dyn Node {
        self.node.as_ref()
    }
    #[must_use]
    pub fn into_node(self) -> Box<dyn Node> {
        self.node
    }
}

/// One primitive, invertible graph mutation.
pub enum GraphEdit {
    Insert { id: NodeId, node: Box<dyn Node> },
    Remove { id: NodeId },
    Restore { id: NodeId, removed: RemovedNode },
    SetInput {
        target: InputRef,
        source: Option<OutputRef>,
    },
}
impl std::fmt::Debug for GraphEdit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Insert { id, node } => write!(f, "Insert({id}, {:?})", node.kind()),
            Self::Remove { id } => write!(f, "Remove({id})"),
            Self::Restore { id, .. } => write!(f, "Restore({id})"),
            Self::SetInput { target, source } => write!(f, "SetInput({target:?} <- {source:?})"),
        }
    }
}

pub struct NodeGraph {
    nodes: hashbrown::HashMap<NodeId, NodeEntry>,
    output: NodeId,
}
impl Default for NodeGraph {
    fn default() -> Self {
        Self::with_output(NodeId::default(), Box::new(nodes::OutputNode))
    }
}
impl NodeGraph {
    fn with_output(output: NodeId, node: Box<dyn Node>) -> Self {
        let mut nodes = hashbrown::HashMap::new();
        let inputs = std::iter::repeat(None).take(node.inputs().len()).collect();
        nodes.insert(output, NodeEntry { node, inputs });
        Self { nodes, output }
    }
    #[must_use]
    pub fn output(&self) -> NodeId {
        self.output
    }
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }
    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&dyn Node> {
        self.nodes.get(&id).map(|entry| entry.node.as_ref())
    }
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut (dyn Node + 'static)> {
        self.nodes.get_mut(&id).map(|entry| entry.node.as_mut())
    }
    /// Iterate all nodes, in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &dyn Node)> + '_ {
        self.nodes.iter().map(|(id, entry)| (*id, entry.node.as_ref()))
    }
    /// Sources of every input of `id`, by socket index.
    #[must_use]
    pub fn inputs_of(&self, id: NodeId) -> Option<&[Option<OutputRef>]> {
        self.nodes.get(&id).map(|entry| entry.inputs.as_slice())
    }
    #[must_use]
    pub fn input_source(&self, input: InputRef) -> Option<OutputRef> {
        self.nodes
            .get(&input.node)?
            .inputs
            .get(input.socket)
            .copied()
            .flatten()
    }
    /// Every input fed by any output of `id`.
    #[must_use]
    pub fn consumers(&self, id: NodeId) -> Vec<(InputRef, OutputRef)> {
        let mut out: Vec<_> = self
            .nodes
            .iter()
            .flat_map(|(consumer, entry)| {
                entry
                    .inputs
                    .iter()
                    .enumerate()
                    .filter_map(move |(socket, source)| {
                        source
                            .filter(|source| source.node == id)
                            .map(|source| (InputRef::new(*consumer, socket), source))
                    })
            })
            .collect();
        out.sort_unstable_by_key(|(input, _)| (input.node, input.socket));
        out
    }
    /// Add a node with a fresh ID. All inputs start unconnected.
    pub fn add_node(&mut self, node: Box<dyn Node>) -> NodeId {
        let id = NodeId::default();
        // Fresh IDs can't collide.
        let _ = self.add_node_with_id(id, node);
        id
    }
    /// Add a node under a pre-allocated ID.
    pub fn add_node_with_id(&mut self, id: NodeId, node: Box<dyn Node>) -> Result<(), GraphError> {
        if self.nodes.contains_key(&id) {
            return Err(GraphError::IdInUse(id));
        }
        let inputs = std::iter::repeat(None).take(node.inputs().len()).collect();
        self.nodes.insert(id, NodeEntry { node, inputs });
        Ok(())
    }
    /// Remove a node, disconnecting everything it fed.
    pub fn remove_node(&mut self, id: NodeId) -> Result<RemovedNode, GraphError> {
        if id == self.output {
            return Err(GraphError::OutputNode);
        }
        if !self.nodes.contains_key(&id) {
            return Err(GraphError::UnknownNode(id));
        }
        let consumers = self.consumers(id);
        for (input, _) in &consumers {
            if let Some(entry) = self.nodes.get_mut(&input.node) {
                entry.inputs[input.socket] = None;
            }
        }
        let entry = self
            .nodes
            .remove(&id)
            .ok_or(GraphError::UnknownNode(id))?;
        log::trace!("removed node {id} ({:?})", entry.node.kind());
        Ok(RemovedNode {
            node: entry.node,
            inputs: entry.inputs,
            consumers,
        })
    }
    /// Undo a [`Self::remove_node`]. Every node the removed node was connected to must exist.
    pub fn restore_node(&mut self, id: NodeId, removed: RemovedNode) -> Result<(), GraphError> {
        if self.nodes.contains_key(&id) {
            return Err(GraphError::IdInUse(id));
        }
        let missing = removed
            .inputs
            .iter()
            .flatten()
            .map(|source| source.node)
            .chain(removed.consumers.iter().map(|(input, _)| input.node))
            .find(|node| !self.nodes.contains_key(node));
        if let Some(missing) = missing {
            return Err(GraphError::UnknownNode(missing));
        }
        let RemovedNode {
            node,
            inputs,
            consumers,
        } = removed;
        self.nodes.insert(id, NodeEntry { node, inputs });
        for (input, source) in consumers {
            if let Some(entry) = self.nodes.get_mut(&input.node) {
                entry.inputs[input.socket] = Some(source);
            }
        }
        Ok(())
    }
    /// Check that `source` could feed `target`, without connecting anything.
    pub fn can_connect(&self, source: OutputRef, target: InputRef) -> Result<(), GraphError> {
        let source_node = self
            .get(source.node)
            .ok_or(GraphError::UnknownNode(source.node))?;
        if source.node == self.output {
            return Err(GraphError::OutputNode);
        }
        let output_ty = source_node
            .outputs()
            .get(source.socket)
            .ok_or(GraphError::NoSuchOutput(source))?
            .ty;
        let input_ty = self
            .get(target.node)
            .ok_or(GraphError::UnknownNode(target.node))?
            .inputs()
            .get(target.socket)
            .ok_or(GraphError::NoSuchInput(target))?
            .ty;
        if output_ty != input_ty {
            return Err(GraphError::TypeMismatch {
                output: output_ty,
                input: input_ty,
            });
        }
        if self.depends_on(source.node, target.node) {
            return Err(GraphError::WouldCycle);
        }
        Ok(())
    }
    /// Connect `source` into `target`, replacing and returning whatever fed it before.
    pub fn connect(
        &mut self,
        source: OutputRef,
        target: InputRef,
    ) -> Result<Option<OutputRef>, GraphError> {
        self.can_connect(source, target)?;
        let entry = self
            .nodes
            .get_mut(&target.node)
            .ok_or(GraphError::UnknownNode(target.node))?;
        Ok(entry.inputs[target.socket].replace(source))
    }
    /// Disconnect an input, returning what fed it.
    pub fn disconnect(&mut self, target: InputRef) -> Result<Option<OutputRef>, GraphError> {
        let entry = self
            .nodes
            .get_mut(&target.node)
            .ok_or(GraphError::UnknownNode(target.node))?;
        let slot = entry
            .inputs
            .get_mut(target.socket)
            .ok_or(GraphError::NoSuchInput(target))?;
        Ok(slot.take())
    }
    /// Whether `node` is `upstream` or transitively reads from it.
    #[must_use]
    pub fn depends_on(&self, node: NodeId, upstream: NodeId) -> bool {
        let mut visited = hashbrown::HashSet::new();
        let mut stack = vec![node];
        while let Some(next) = stack.pop() {
            if next == upstream {
                return true;
            }
            if !visited.insert(next) {
                continue;
            }
            if let Some(inputs) = self.inputs_of(next) {
                stack.extend(inputs.iter().flatten().map(|source| source.node));
            }
        }
        false
    }
    /// Apply one primitive edit, returning its inverse.
    pub fn apply_edit(&mut self, edit: GraphEdit) -> Result<GraphEdit, GraphError> {
        log::trace!("graph edit {edit:?}");
        match edit {
            GraphEdit::Insert { id, node } => {
                self.add_node_with_id(id, node)?;
                Ok(GraphEdit::Remove { id })
            }
            GraphEdit::Remove { id } => Ok(GraphEdit::Restore {
                id,
                removed: self.remove_node(id)?,
            }),
            GraphEdit::Restore { id, removed } => {
                self.restore_node(id, removed)?;
                Ok(GraphEdit::Remove { id })
            }
            GraphEdit::SetInput { target, source } => {
                let previous = match source {
                    Some(source) => self.connect(source, target)?,
                    None => self.disconnect(target)?,
                };
                Ok(GraphEdit::SetInput {
                    target,
                    source: previous,
                })
            }
        }
    }
    /// Nodes reachable backwards from the output, dependencies before dependents.
    ///
    /// Nodes are discovered breadth-first from the output, visiting inputs in socket order.
    /// Among nodes whose dependents have all been scheduled, the earliest discovered goes
    /// first, which makes the order a pure function of the graph's structure.
    #[must_use]
    pub fn execution_order(&self) -> Vec<NodeId> {
        let mut discovered: hashbrown::HashMap<NodeId, usize> = hashbrown::HashMap::new();
        // Number of edges from reachable consumers into each node.
        let mut pending_consumers: hashbrown::HashMap<NodeId, usize> = hashbrown::HashMap::new();
        let mut queue = std::collections::VecDeque::from([self.output]);
        discovered.insert(self.output, 0);
        while let Some(id) = queue.pop_front() {
            for source in self.inputs_of(id).into_iter().flatten().flatten() {
                *pending_consumers.entry(source.node).or_default() += 1;
                if !discovered.contains_key(&source.node) {
                    discovered.insert(source.node, discovered.len());
                    queue.push_back(source.node);
                }
            }
        }

        let mut ready = std::collections::BinaryHeap::new();
        ready.push(std::cmp::Reverse((0usize, self.output)));
        let mut order = Vec::with_capacity(discovered.len());
        while let Some(std::cmp::Reverse((_, id))) = ready.pop() {
            order.push(id);
            for source in self.inputs_of(id).into_iter().flatten().flatten() {
                let Some(count) = pending_consumers.get_mut(&source.node) else {
                    continue;
                };
                *count -= 1;
                if *count == 0 {
                    ready.push(std::cmp::Reverse((discovered[&source.node], source.node)));
                }
            }
        }
        if order.len() != discovered.len() {
            log::error!(
                "graph contains a cycle, {} of {} reachable nodes scheduled",
                order.len(),
                discovered.len()
            );
        }
        order.reverse();
        order
    }
    /// Insert a node with its inputs as-is. For building derived graphs.
    fn insert_entry(&mut self, id: NodeId, node: Box<dyn Node>, inputs: &[Option<OutputRef>]) {
        self.nodes.insert(
            id,
            NodeEntry {
                node,
                inputs: inputs.iter().copied().collect(),
            },
        );
    }
    fn set_input_raw(&mut self, target: InputRef, source: Option<OutputRef>) {
        if let Some(slot) = self
            .nodes
            .get_mut(&target.node)
            .and_then(|entry| entry.inputs.get_mut(target.socket))
        {
            *slot = source;
        }
    }
}
/// Very expensive clone impl! Deep copies every node, raster content included.
impl Clone for NodeGraph {
    fn clone(&self) -> Self {
        Self {
            nodes: self
                .nodes
                .iter()
                .map(|(id, entry)| {
                    (
                        *id,
                        NodeEntry {
                            node: entry.node.clone_node(),
                            inputs: entry.inputs.clone(),
                        },
                    )
                })
                .collect(),
            output: self.output,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::color::ColorMatrix;

    fn filter() -> Box<dyn Node> {
        Box::<nodes::ColorMatrixFilter>::default()
    }

    #[test]
    fn connect_checks_types() {
        let mut graph = NodeGraph::default();
        let color = graph.add_node(Box::<nodes::ColorSource>::default());
        assert_eq!(
            graph.connect(OutputRef::new(color, 0), InputRef::new(graph.output(), 0)),
            Err(GraphError::TypeMismatch {
                output: SocketType::Color,
                input: SocketType::Image
            })
        );
        let f = graph.add_node(filter());
        assert_eq!(
            graph.connect(OutputRef::new(f, 0), InputRef::new(graph.output(), 3)),
            Err(GraphError::NoSuchInput(InputRef::new(graph.output(), 3)))
        );
    }
    #[test]
    fn connect_rejects_cycles() {
        let mut graph = NodeGraph::default();
        let a = graph.add_node(filter());
        let b = graph.add_node(filter());
        graph
            .connect(OutputRef::new(a, 0), InputRef::new(b, 0))
            .unwrap();
        assert_eq!(
            graph.connect(OutputRef::new(b, 0), InputRef::new(a, 0)),
            Err(GraphError::WouldCycle)
        );
        assert_eq!(
            graph.connect(OutputRef::new(a, 0), InputRef::new(a, 0)),
            Err(GraphError::WouldCycle)
        );
    }
    #[test]
    fn execution_order_is_topological_and_stable() {
        // matrix -> b.matrix, a -> b.image, b -> output
        let mut graph = NodeGraph::default();
        let a = graph.add_node(filter());
        let b = graph.add_node(filter());
        let m = graph.add_node(Box::new(nodes::MatrixSource {
            matrix: ColorMatrix::grayscale(),
        }));
        let unreachable = graph.add_node(filter());
        graph
            .connect(OutputRef::new(b, 0), InputRef::new(graph.output(), 0))
            .unwrap();
        graph
            .connect(OutputRef::new(a, 0), InputRef::new(b, 0))
            .unwrap();
        graph
            .connect(OutputRef::new(m, 0), InputRef::new(b, 1))
            .unwrap();
        let order = graph.execution_order();
        assert_eq!(order, vec![m, a, b, graph.output()]);
        assert!(!order.contains(&unreachable));
        assert_eq!(order, graph.execution_order());
    }
    #[test]
    fn shared_upstream_runs_once_before_all_consumers() {
        let mut graph = NodeGraph::default();
        let merge = graph.add_node(Box::<nodes::Merge>::default());
        let a = graph.add_node(filter());
        let shared = graph.add_node(filter());
        graph
            .connect(OutputRef::new(merge, 0), InputRef::new(graph.output(), 0))
            .unwrap();
        graph
            .connect(OutputRef::new(shared, 0), InputRef::new(merge, 0))
            .unwrap();
        graph
            .connect(OutputRef::new(a, 0), InputRef::new(merge, 1))
            .unwrap();
        graph
            .connect(OutputRef::new(shared, 0), InputRef::new(a, 0))
            .unwrap();
        let order = graph.execution_order();
        assert_eq!(order, vec![shared, a, merge, graph.output()]);
    }
    #[test]
    fn remove_and_restore() {
        let mut graph = NodeGraph::default();
        let a = graph.add_node(filter());
        let b = graph.add_node(filter());
        graph
            .connect(OutputRef::new(a, 0), InputRef::new(b, 0))
            .unwrap();
        graph
            .connect(OutputRef::new(b, 0), InputRef::new(graph.output(), 0))
            .unwrap();
        let inverse = graph.apply_edit(GraphEdit::Remove { id: b }).unwrap();
        assert!(!graph.contains(b));
        assert_eq!(graph.input_source(InputRef::new(graph.output(), 0)), None);
        graph.apply_edit(inverse).unwrap();
        assert_eq!(
            graph.input_source(InputRef::new(graph.output(), 0)),
            Some(OutputRef::new(b, 0))
        );
        assert_eq!(
            graph.input_source(InputRef::new(b, 0)),
            Some(OutputRef::new(a, 0))
        );
        assert_eq!(
            graph.remove_node(graph.output()).err(),
            Some(GraphError::OutputNode)
        );
    }
    #[test]
    fn preallocated_ids() {
        let mut graph = NodeGraph::default();
        let id = NodeId::default();
        graph.add_node_with_id(id, filter()).unwrap();
        assert_eq!(
            graph.add_node_with_id(id, filter()),
            Err(GraphError::IdInUse(id))
        );
    }
}
