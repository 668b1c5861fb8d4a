//! Raw graph edits, for wiring nodes that are not part of the layer stack.

use super::{Applied, Change, ChangeError, ChangeInfo, EditLog, ValidationError};
use crate::document::Document;
use crate::graph::{
    GraphEdit, InputRef, Node, NodeId, NodeKind, NodeRegistry, OutputRef, ParamValue,
};

pub struct AddNode {
    id: NodeId,
    kind: NodeKind,
    parameters: Vec<(String, ParamValue)>,
    node: Option<Box<dyn Node>>,
    log: EditLog,
}
impl AddNode {
    #[must_use]
    pub fn new(id: NodeId, kind: NodeKind, parameters: Vec<(String, ParamValue)>) -> Self {
        Self {
            id,
            kind,
            parameters,
            node: None,
            log: EditLog::default(),
        }
    }
}
impl Change for AddNode {
    fn name(&self) -> &'static str {
        "add node"
    }
    fn initialize_and_validate(
        &mut self,
        document: &Document,
        registry: &NodeRegistry,
    ) -> Result<(), ValidationError> {
        if document.graph.contains(self.id) {
            return Err(ValidationError::IdInUse(self.id));
        }
        if self.kind == NodeKind::Output {
            return Err(ValidationError::OutputNode);
        }
        let node = registry.build(
            self.kind,
            &document.node_context(),
            self.parameters
                .iter()
                .map(|(name, value)| (name.as_str(), value.clone())),
        )?;
        self.node = Some(node);
        Ok(())
    }
    fn apply(&mut self, document: &mut Document, first_apply: bool) -> Result<Applied, ChangeError> {
        if first_apply {
            let node = self.node.take().ok_or(ChangeError::MissingNode(self.id))?;
            let id = self.id;
            self.log
                .record(&mut document.graph, |rec| rec.apply(GraphEdit::Insert { id, node }))?;
        } else {
            self.log.redo(&mut document.graph)?;
        }
        Ok(Applied::new(vec![ChangeInfo::NodeAdded {
            node: self.id,
            kind: self.kind,
        }]))
    }
    fn revert(&mut self, document: &mut Document) -> Result<Vec<ChangeInfo>, ChangeError> {
        self.log.undo(&mut document.graph)?;
        Ok(vec![ChangeInfo::NodeRemoved { node: self.id }])
    }
}

/// Remove a node that is not a layer or folder, disconnecting whatever it fed.
pub struct RemoveNode {
    id: NodeId,
    kind: Option<NodeKind>,
    log: EditLog,
}
impl RemoveNode {
    #[must_use]
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            kind: None,
            log: EditLog::default(),
        }
    }
}
impl Change for RemoveNode {
    fn name(&self) -> &'static str {
        "remove node"
    }
    fn initialize_and_validate(
        &mut self,
        document: &Document,
        _: &NodeRegistry,
    ) -> Result<(), ValidationError> {
        if self.id == document.graph.output() {
            return Err(ValidationError::OutputNode);
        }
        let node = document
            .graph
            .get(self.id)
            .ok_or(ValidationError::UnknownNode(self.id))?;
        if node.structure().is_some() {
            return Err(ValidationError::UseDeleteMember(self.id));
        }
        self.kind = Some(node.kind());
        Ok(())
    }
    fn apply(&mut self, document: &mut Document, first_apply: bool) -> Result<Applied, ChangeError> {
        if first_apply {
            let id = self.id;
            self.log
                .record(&mut document.graph, |rec| rec.apply(GraphEdit::Remove { id }))?;
        } else {
            self.log.redo(&mut document.graph)?;
        }
        Ok(Applied::new(vec![ChangeInfo::NodeRemoved { node: self.id }]))
    }
    fn revert(&mut self, document: &mut Document) -> Result<Vec<ChangeInfo>, ChangeError> {
        self.log.undo(&mut document.graph)?;
        let kind = self.kind.ok_or(ChangeError::MissingNode(self.id))?;
        Ok(vec![ChangeInfo::NodeAdded {
            node: self.id,
            kind,
        }])
    }
}

/// Connect an output into an input, replacing whatever fed it.
pub struct Connect {
    from: OutputRef,
    to: InputRef,
    log: EditLog,
}
impl Connect {
    #[must_use]
    pub fn new(from: OutputRef, to: InputRef) -> Self {
        Self {
            from,
            to,
            log: EditLog::default(),
        }
    }
}
impl Change for Connect {
    fn name(&self) -> &'static str {
        "connect"
    }
    fn initialize_and_validate(
        &mut self,
        document: &Document,
        _: &NodeRegistry,
    ) -> Result<(), ValidationError> {
        document.graph.can_connect(self.from, self.to)?;
        Ok(())
    }
    fn apply(&mut self, document: &mut Document, first_apply: bool) -> Result<Applied, ChangeError> {
        if first_apply {
            let (from, to) = (self.from, self.to);
            let unchanged = document.graph.input_source(to) == Some(from);
            self.log.record(&mut document.graph, |rec| {
                rec.apply(GraphEdit::SetInput {
                    target: to,
                    source: Some(from),
                })
            })?;
            let info = ChangeInfo::Connected { from, to };
            return Ok(Applied {
                infos: vec![info],
                ignore_in_undo: unchanged,
            });
        }
        self.log.redo(&mut document.graph)?;
        Ok(Applied::new(vec![ChangeInfo::Connected {
            from: self.from,
            to: self.to,
        }]))
    }
    fn revert(&mut self, document: &mut Document) -> Result<Vec<ChangeInfo>, ChangeError> {
        self.log.undo(&mut document.graph)?;
        Ok(vec![match document.graph.input_source(self.to) {
            Some(from) => ChangeInfo::Connected { from, to: self.to },
            None => ChangeInfo::Disconnected { input: self.to },
        }])
    }
}

pub struct Disconnect {
    input: InputRef,
    log: EditLog,
}
impl Disconnect {
    #[must_use]
    pub fn new(input: InputRef) -> Self {
        Self {
            input,
            log: EditLog::default(),
        }
    }
}
impl Change for Disconnect {
    fn name(&self) -> &'static str {
        "disconnect"
    }
    fn initialize_and_validate(
        &mut self,
        document: &Document,
        _: &NodeRegistry,
    ) -> Result<(), ValidationError> {
        let node = document
            .graph
            .get(self.input.node)
            .ok_or(ValidationError::UnknownNode(self.input.node))?;
        if self.input.socket >= node.inputs().len() {
            return Err(crate::graph::GraphError::NoSuchInput(self.input).into());
        }
        Ok(())
    }
    fn apply(&mut self, document: &mut Document, first_apply: bool) -> Result<Applied, ChangeError> {
        let info = ChangeInfo::Disconnected { input: self.input };
        if first_apply {
            let input = self.input;
            let unchanged = document.graph.input_source(input).is_none();
            self.log.record(&mut document.graph, |rec| {
                rec.apply(GraphEdit::SetInput {
                    target: input,
                    source: None,
                })
            })?;
            return Ok(Applied {
                infos: vec![info],
                ignore_in_undo: unchanged,
            });
        }
        self.log.redo(&mut document.graph)?;
        Ok(Applied::new(vec![info]))
    }
    fn revert(&mut self, document: &mut Document) -> Result<Vec<ChangeInfo>, ChangeError> {
        self.log.undo(&mut document.graph)?;
        Ok(vec![match document.graph.input_source(self.input) {
            Some(from) => ChangeInfo::Connected {
                from,
                to: self.input,
            },
            None => ChangeInfo::Disconnected { input: self.input },
        }])
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::changes::TrackedChange;
    use crate::graph::GraphError;
    use crate::settings::EngineSettings;

    fn run(document: &mut Document, change: impl Change + 'static) -> TrackedChange {
        let mut change = TrackedChange::new(Box::new(change));
        change
            .validate(document, &NodeRegistry::default())
            .unwrap();
        change.apply(document).unwrap();
        change
    }

    #[test]
    fn add_connect_remove_round_trip() {
        let mut document = Document::new([16, 16], &EngineSettings::default()).unwrap();
        let before = document.graph.to_snapshot();
        let filter = NodeId::default();
        let matrix = NodeId::default();
        let mut changes = vec![
            run(
                &mut document,
                AddNode::new(filter, NodeKind::ColorMatrix, Vec::new()),
            ),
            run(
                &mut document,
                AddNode::new(
                    matrix,
                    NodeKind::Matrix,
                    vec![(
                        "matrix".into(),
                        ParamValue::Matrix(crate::color::ColorMatrix::invert()),
                    )],
                ),
            ),
        ];
        changes.push(run(
            &mut document,
            Connect::new(OutputRef::new(matrix, 0), InputRef::new(filter, 1)),
        ));
        let output = document.graph.output();
        changes.push(run(
            &mut document,
            Connect::new(OutputRef::new(filter, 0), InputRef::new(output, 0)),
        ));
        changes.push(run(&mut document, RemoveNode::new(matrix)));
        assert_eq!(document.graph.input_source(InputRef::new(filter, 1)), None);

        for change in changes.iter_mut().rev() {
            change.revert(&mut document).unwrap();
        }
        assert_eq!(document.graph.to_snapshot(), before);
        for change in &mut changes {
            change.apply(&mut document).unwrap();
        }
        assert!(!document.graph.contains(matrix));
        assert_eq!(
            document.graph.input_source(InputRef::new(output, 0)),
            Some(OutputRef::new(filter, 0))
        );
    }
    #[test]
    fn connect_validation() {
        let mut document = Document::new([16, 16], &EngineSettings::default()).unwrap();
        let registry = NodeRegistry::default();
        let a = document
            .graph
            .add_node(Box::<crate::graph::nodes::ColorMatrixFilter>::default());
        let b = document
            .graph
            .add_node(Box::<crate::graph::nodes::ColorMatrixFilter>::default());
        document
            .graph
            .connect(OutputRef::new(a, 0), InputRef::new(b, 0))
            .unwrap();
        assert_eq!(
            Connect::new(OutputRef::new(b, 0), InputRef::new(a, 0))
                .initialize_and_validate(&document, &registry),
            Err(ValidationError::Graph(GraphError::WouldCycle))
        );
        assert_eq!(
            Disconnect::new(InputRef::new(a, 7)).initialize_and_validate(&document, &registry),
            Err(ValidationError::Graph(GraphError::NoSuchInput(InputRef::new(
                a, 7
            ))))
        );
    }
    #[test]
    fn members_and_output_are_protected() {
        let mut document = Document::new([16, 16], &EngineSettings::default()).unwrap();
        let registry = NodeRegistry::default();
        let folder = document
            .graph
            .add_node(Box::new(crate::graph::nodes::Folder::new("f")));
        assert_eq!(
            RemoveNode::new(folder).initialize_and_validate(&document, &registry),
            Err(ValidationError::UseDeleteMember(folder))
        );
        let output = document.graph.output();
        assert_eq!(
            RemoveNode::new(output).initialize_and_validate(&document, &registry),
            Err(ValidationError::OutputNode)
        );
        assert_eq!(
            AddNode::new(NodeId::default(), NodeKind::Output, Vec::new())
                .initialize_and_validate(&document, &registry),
            Err(ValidationError::OutputNode)
        );
    }
    #[test]
    fn disconnecting_nothing_is_ignored() {
        let mut document = Document::new([16, 16], &EngineSettings::default()).unwrap();
        let input = InputRef::new(document.graph.output(), 0);
        let mut change = Disconnect::new(input);
        change
            .initialize_and_validate(&document, &NodeRegistry::default())
            .unwrap();
        assert!(change.apply(&mut document, true).unwrap().ignore_in_undo);
    }
}
