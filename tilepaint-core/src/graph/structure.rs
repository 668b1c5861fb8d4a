//! # Structure
//!
//! Layers and folders ("members") form a stack on top of the graph. A stack is headed by an
//! input socket: input 0 of the output node for the root, or the `content` input of a folder.
//! The head is fed by the topmost member, whose `background` is fed by the member below it,
//! and so on until a background is unconnected or fed by a node that isn't a member.
//!
//! Index 0 is the top of a stack.

use super::{
    GraphEdit, GraphError, InputRef, NodeGraph, NodeId, OutputRef, StructureKind,
};

#[derive(Copy, Clone, PartialEq, Eq, Debug, serde::Serialize)]
pub enum Location {
    /// The position directly above this member, in the same stack.
    AboveMember(NodeId),
    /// Set as the nth member of this folder, where top = 0
    ///
    /// An index too large will be clamped to the bottom position.
    IndexIntoFolder(NodeId, usize),
    /// Set as the nth member of the root stack, where top = 0
    ///
    /// An index too large will be clamped to the bottom position.
    IndexIntoRoot(usize),
}

/// A member's place in the tree. `parent` is `None` for the root stack.
#[derive(Copy, Clone, PartialEq, Eq, Debug, serde::Serialize)]
pub struct Position {
    pub parent: Option<NodeId>,
    pub index: usize,
}

impl NodeGraph {
    #[must_use]
    pub fn is_member(&self, id: NodeId) -> bool {
        self.get(id).and_then(|node| node.structure()).is_some()
    }
    #[must_use]
    pub fn is_folder(&self, id: NodeId) -> bool {
        self.get(id).and_then(|node| node.structure()) == Some(StructureKind::Folder)
    }
    /// The input socket at the top of a stack.
    fn stack_head(&self, parent: Option<NodeId>) -> InputRef {
        match parent {
            None => InputRef::new(self.output(), 0),
            Some(folder) => InputRef::new(folder, StructureKind::CONTENT),
        }
    }
    /// Members of a stack, top first. Empty if `parent` is not a folder.
    #[must_use]
    pub fn stack(&self, parent: Option<NodeId>) -> Vec<NodeId> {
        if parent.is_some_and(|folder| !self.is_folder(folder)) {
            return Vec::new();
        }
        let mut members = Vec::new();
        let mut next = self.input_source(self.stack_head(parent));
        while let Some(source) = next {
            // Guards against a corrupted chain looping back on itself.
            if !self.is_member(source.node) || members.contains(&source.node) {
                break;
            }
            members.push(source.node);
            next = self.input_source(InputRef::new(source.node, StructureKind::BACKGROUND));
        }
        members
    }
    /// All members, depth first, top to bottom, each with its position.
    #[must_use]
    pub fn members(&self) -> Vec<(NodeId, Position)> {
        fn walk(graph: &NodeGraph, parent: Option<NodeId>, out: &mut Vec<(NodeId, Position)>) {
            for (index, member) in graph.stack(parent).into_iter().enumerate() {
                out.push((member, Position { parent, index }));
                if graph.is_folder(member) {
                    walk(graph, Some(member), out);
                }
            }
        }
        let mut out = Vec::new();
        walk(self, None, &mut out);
        out
    }
    /// Where a member sits in the tree, or `None` if it is not in any stack.
    #[must_use]
    pub fn position_of(&self, member: NodeId) -> Option<Position> {
        self.members()
            .into_iter()
            .find_map(|(id, position)| (id == member).then_some(position))
    }
    /// The member itself, followed by every member nested inside it.
    #[must_use]
    pub fn subtree(&self, member: NodeId) -> Vec<NodeId> {
        let mut out = vec![member];
        if self.is_folder(member) {
            for child in self.stack(Some(member)) {
                out.extend(self.subtree(child));
            }
        }
        out
    }
    /// Convert a location into a stack and an index within it. Indices are clamped.
    pub fn resolve_location(&self, location: Location) -> Result<Position, GraphError> {
        match location {
            Location::AboveMember(member) => {
                if !self.contains(member) {
                    return Err(GraphError::UnknownNode(member));
                }
                self.position_of(member).ok_or(GraphError::NotAMember(member))
            }
            Location::IndexIntoFolder(folder, index) => {
                if !self.contains(folder) {
                    return Err(GraphError::UnknownNode(folder));
                }
                if !self.is_folder(folder) {
                    return Err(GraphError::NotAFolder(folder));
                }
                Ok(Position {
                    parent: Some(folder),
                    index: index.min(self.stack(Some(folder)).len()),
                })
            }
            Location::IndexIntoRoot(index) => Ok(Position {
                parent: None,
                index: index.min(self.stack(None).len()),
            }),
        }
    }
    /// The input that the member at `position` is (or would be) connected to.
    fn slot_at(&self, position: Position) -> InputRef {
        let stack = self.stack(position.parent);
        match position.index.checked_sub(1).and_then(|above| stack.get(above)) {
            Some(above) => InputRef::new(*above, StructureKind::BACKGROUND),
            None => self.stack_head(position.parent),
        }
    }
    /// Edits linking a detached member into a stack. The member must already be in the graph.
    #[must_use]
    pub fn attach_edits(&self, member: NodeId, position: Position) -> [GraphEdit; 2] {
        let slot = self.slot_at(position);
        let below = self.input_source(slot);
        [
            GraphEdit::SetInput {
                target: InputRef::new(member, StructureKind::BACKGROUND),
                source: below,
            },
            GraphEdit::SetInput {
                target: slot,
                source: Some(OutputRef::new(member, 0)),
            },
        ]
    }
    /// Edits unlinking a member from its stack, closing the gap. `None` if it is not in one.
    #[must_use]
    pub fn detach_edits(&self, member: NodeId) -> Option<[GraphEdit; 2]> {
        let position = self.position_of(member)?;
        let slot = self.slot_at(position);
        let below = self.input_source(InputRef::new(member, StructureKind::BACKGROUND));
        Some([
            GraphEdit::SetInput {
                target: slot,
                source: below,
            },
            GraphEdit::SetInput {
                target: InputRef::new(member, StructureKind::BACKGROUND),
                source: None,
            },
        ])
    }

    /// A new graph holding only the chosen members, in their original stacking order, plus
    /// everything that feeds them. Folders with a chosen descendant are kept as containers,
    /// and a chosen folder brings all of its content.
    ///
    /// Nodes keep their IDs. The real graph is not touched; pixel content is deep-copied.
    #[must_use]
    pub fn filtered(&self, chosen: &hashbrown::HashSet<NodeId>) -> NodeGraph {
        let output = self.output();
        let output_node = match self.get(output) {
            Some(node) => node.clone_node(),
            None => Box::new(super::nodes::OutputNode),
        };
        let mut out = NodeGraph::with_output(output, output_node);
        let top = self.copy_stack(None, chosen, false, &mut out);
        out.set_input_raw(InputRef::new(output, 0), top);
        out
    }
    fn copy_stack(
        &self,
        parent: Option<NodeId>,
        chosen: &hashbrown::HashSet<NodeId>,
        keep_all: bool,
        out: &mut NodeGraph,
    ) -> Option<OutputRef> {
        let mut kept = Vec::new();
        for member in self.stack(parent) {
            let keep_member = keep_all || chosen.contains(&member);
            let content = if self.is_folder(member) {
                self.copy_stack(Some(member), chosen, keep_member, out)
            } else {
                None
            };
            if !keep_member && content.is_none() {
                continue;
            }
            let (Some(node), Some(inputs)) = (self.get(member), self.inputs_of(member)) else {
                continue;
            };
            out.insert_entry(member, node.clone_node(), inputs);
            out.set_input_raw(InputRef::new(member, StructureKind::BACKGROUND), None);
            if self.is_folder(member) {
                out.set_input_raw(InputRef::new(member, StructureKind::CONTENT), content);
            }
            // Non-structural inputs, such as a layer's filter.
            for (socket, source) in inputs.iter().enumerate() {
                let structural = socket == StructureKind::BACKGROUND
                    || (self.is_folder(member) && socket == StructureKind::CONTENT);
                if let (false, Some(source)) = (structural, source) {
                    self.copy_upstream(source.node, out);
                }
            }
            kept.push(member);
        }
        for pair in kept.windows(2) {
            out.set_input_raw(
                InputRef::new(pair[0], StructureKind::BACKGROUND),
                Some(OutputRef::new(pair[1], 0)),
            );
        }
        kept.first().map(|top| OutputRef::new(*top, 0))
    }
    fn copy_upstream(&self, id: NodeId, out: &mut NodeGraph) {
        if out.contains(id) {
            return;
        }
        let (Some(node), Some(inputs)) = (self.get(id), self.inputs_of(id)) else {
            return;
        };
        out.insert_entry(id, node.clone_node(), inputs);
        for source in inputs.iter().flatten() {
            self.copy_upstream(source.node, out);
        }
    }
}
