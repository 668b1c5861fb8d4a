use super::{Applied, Change, ChangeError, ChangeInfo, ValidationError};
use crate::document::Document;
use crate::graph::{NodeId, NodeRegistry, ParamValue};

/// Set one parameter of any node, such as a layer's opacity or a filter's matrix.
pub struct SetParameter {
    node: NodeId,
    name: String,
    value: ParamValue,
    /// Value before the last apply.
    old: Option<ParamValue>,
}
impl SetParameter {
    #[must_use]
    pub fn new(node: NodeId, name: impl Into<String>, value: ParamValue) -> Self {
        Self {
            node,
            name: name.into(),
            value,
            old: None,
        }
    }
    fn set(
        &self,
        document: &mut Document,
        value: ParamValue,
    ) -> Result<ParamValue, ChangeError> {
        let node = document
            .graph
            .get_mut(self.node)
            .ok_or(ChangeError::MissingNode(self.node))?;
        Ok(node.set_parameter(&self.name, value)?)
    }
}
impl Change for SetParameter {
    fn name(&self) -> &'static str {
        "set parameter"
    }
    fn initialize_and_validate(
        &mut self,
        document: &Document,
        _: &NodeRegistry,
    ) -> Result<(), ValidationError> {
        let node = document
            .graph
            .get(self.node)
            .ok_or(ValidationError::UnknownNode(self.node))?;
        node.check_parameter(&self.name, &self.value)?;
        Ok(())
    }
    fn apply(&mut self, document: &mut Document, _: bool) -> Result<Applied, ChangeError> {
        let old = self.set(document, self.value.clone())?;
        let unchanged = old == self.value;
        self.old = Some(old);
        let info = ChangeInfo::ParameterChanged {
            node: self.node,
            name: self.name.clone(),
            value: self.value.clone(),
        };
        Ok(Applied {
            infos: vec![info],
            ignore_in_undo: unchanged,
        })
    }
    fn revert(&mut self, document: &mut Document) -> Result<Vec<ChangeInfo>, ChangeError> {
        let old = self.old.take().ok_or(ChangeError::DiffConsumed)?;
        self.set(document, old.clone())?;
        Ok(vec![ChangeInfo::ParameterChanged {
            node: self.node,
            name: self.name.clone(),
            value: old,
        }])
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::changes::TrackedChange;
    use crate::graph::nodes::{self, Folder};
    use crate::graph::ParamError;
    use crate::settings::EngineSettings;

    #[test]
    fn set_and_revert() {
        let mut document = Document::new([16, 16], &EngineSettings::default()).unwrap();
        let folder = document.graph.add_node(Box::new(Folder::new("f")));
        let mut change = TrackedChange::new(Box::new(SetParameter::new(
            folder,
            "opacity",
            nodes::opacity(0.5),
        )));
        change
            .validate(&document, &NodeRegistry::default())
            .unwrap();
        let applied = change.apply(&mut document).unwrap();
        assert!(!applied.ignore_in_undo);
        assert_eq!(
            document.graph.get(folder).unwrap().parameter("opacity"),
            Some(nodes::opacity(0.5))
        );
        change.revert(&mut document).unwrap();
        assert_eq!(
            document.graph.get(folder).unwrap().parameter("opacity"),
            Some(nodes::opacity(1.0))
        );
    }
    #[test]
    fn same_value_is_ignored() {
        let mut document = Document::new([16, 16], &EngineSettings::default()).unwrap();
        let folder = document.graph.add_node(Box::new(Folder::new("f")));
        let mut change = SetParameter::new(folder, "visible", ParamValue::Bool(true));
        change
            .initialize_and_validate(&document, &NodeRegistry::default())
            .unwrap();
        assert!(change.apply(&mut document, true).unwrap().ignore_in_undo);
    }
    #[test]
    fn validation() {
        let document = Document::new([16, 16], &EngineSettings::default()).unwrap();
        let registry = NodeRegistry::default();
        let output = document.graph.output();
        assert!(matches!(
            SetParameter::new(output, "opacity", nodes::opacity(0.5))
                .initialize_and_validate(&document, &registry),
            Err(ValidationError::Param(ParamError::Unknown { .. }))
        ));
        let mut document = document;
        let folder = document.graph.add_node(Box::new(Folder::new("f")));
        assert!(matches!(
            SetParameter::new(folder, "visible", ParamValue::Text("yes".into()))
                .initialize_and_validate(&document, &registry),
            Err(ValidationError::Param(ParamError::WrongType {
                name: "visible",
                expected: "bool",
                ..
            }))
        ));
        assert!(matches!(
            SetParameter::new(NodeId::default(), "visible", ParamValue::Bool(false))
                .initialize_and_validate(&document, &registry),
            Err(ValidationError::UnknownNode(_))
        ));
    }
}
