//! Layer stack edits: creating, deleting and moving members, and adding or removing masks.

use super::{
    validate_store, Applied, Change, ChangeError, ChangeInfo, EditLog, ValidationError,
};
use crate::blend::Blend;
use crate::color::Rgba8;
use crate::document::{Document, DrawTarget};
use crate::graph::structure::Position;
use crate::graph::{GraphEdit, Location, Node, NodeId, NodeKind, NodeRegistry, ParamValue};
use crate::tile::{DrawOperation, Shape, TileStore};

/// Checks shared by every edit of an existing member.
fn validate_member(document: &Document, member: NodeId) -> Result<(), ValidationError> {
    if member == document.graph.output() {
        return Err(ValidationError::OutputNode);
    }
    if !document.graph.contains(member) {
        return Err(ValidationError::UnknownNode(member));
    }
    if !document.graph.is_member(member) {
        return Err(ValidationError::NotAMember(member));
    }
    Ok(())
}

pub struct CreateMember {
    id: NodeId,
    kind: NodeKind,
    name: Option<String>,
    location: Location,
    /// Built during validation, moved into the graph on first apply.
    node: Option<Box<dyn Node>>,
    position: Option<Position>,
    log: EditLog,
}
impl CreateMember {
    #[must_use]
    pub fn new(id: NodeId, kind: NodeKind, name: Option<String>, location: Location) -> Self {
        Self {
            id,
            kind,
            name,
            location,
            node: None,
            position: None,
            log: EditLog::default(),
        }
    }
    fn info(&self) -> ChangeInfo {
        let position = self.position.unwrap_or(Position {
            parent: None,
            index: 0,
        });
        ChangeInfo::MemberCreated {
            member: self.id,
            kind: self.kind,
            parent: position.parent,
            index: position.index,
        }
    }
}
impl Change for CreateMember {
    fn name(&self) -> &'static str {
        "create member"
    }
    fn initialize_and_validate(
        &mut self,
        document: &Document,
        registry: &NodeRegistry,
    ) -> Result<(), ValidationError> {
        if document.graph.contains(self.id) {
            return Err(ValidationError::IdInUse(self.id));
        }
        let mut node = registry.create(self.kind, &document.node_context())?;
        if node.structure().is_none() {
            return Err(ValidationError::NotAMember(self.id));
        }
        if let Some(name) = &self.name {
            node.set_parameter("name", ParamValue::Text(name.clone()))?;
        }
        document.graph.resolve_location(self.location)?;
        self.node = Some(node);
        Ok(())
    }
    fn apply(&mut self, document: &mut Document, first_apply: bool) -> Result<Applied, ChangeError> {
        if first_apply {
            let node = self.node.take().ok_or(ChangeError::MissingNode(self.id))?;
            let (id, location) = (self.id, self.location);
            let mut position = None;
            self.log.record(&mut document.graph, |rec| {
                let resolved = rec.graph().resolve_location(location)?;
                rec.apply(GraphEdit::Insert { id, node })?;
                let attach = rec.graph().attach_edits(id, resolved);
                rec.apply_all(attach)?;
                position = Some(resolved);
                Ok(())
            })?;
            self.position = position;
        } else {
            self.log.redo(&mut document.graph)?;
        }
        log::debug!("created {:?} member {}", self.kind, self.id);
        Ok(Applied::new(vec![self.info()]))
    }
    fn revert(&mut self, document: &mut Document) -> Result<Vec<ChangeInfo>, ChangeError> {
        self.log.undo(&mut document.graph)?;
        Ok(vec![ChangeInfo::MemberDeleted { member: self.id }])
    }
}

pub struct DeleteMember {
    member: NodeId,
    /// The member and everything nested in it, with where each sat, top-down.
    removed: Vec<(NodeId, NodeKind, Position)>,
    log: EditLog,
}
impl DeleteMember {
    #[must_use]
    pub fn new(member: NodeId) -> Self {
        Self {
            member,
            removed: Vec::new(),
            log: EditLog::default(),
        }
    }
}
impl Change for DeleteMember {
    fn name(&self) -> &'static str {
        "delete member"
    }
    fn initialize_and_validate(
        &mut self,
        document: &Document,
        _: &NodeRegistry,
    ) -> Result<(), ValidationError> {
        validate_member(document, self.member)
    }
    fn apply(&mut self, document: &mut Document, first_apply: bool) -> Result<Applied, ChangeError> {
        if first_apply {
            let graph = &document.graph;
            let subtree = graph.subtree(self.member);
            let positions: hashbrown::HashMap<_, _> = graph.members().into_iter().collect();
            self.removed = subtree
                .iter()
                .filter_map(|id| {
                    let kind = graph.get(*id)?.kind();
                    let position = positions.get(id).copied().unwrap_or(Position {
                        parent: None,
                        index: 0,
                    });
                    Some((*id, kind, position))
                })
                .collect();
            let member = self.member;
            self.log.record(&mut document.graph, |rec| {
                if let Some(detach) = rec.graph().detach_edits(member) {
                    rec.apply_all(detach)?;
                }
                rec.apply_all(subtree.into_iter().map(|id| GraphEdit::Remove { id }))
            })?;
        } else {
            self.log.redo(&mut document.graph)?;
        }
        log::debug!("deleted member {} ({} nodes)", self.member, self.removed.len());
        Ok(Applied::new(
            self.removed
                .iter()
                .map(|(member, ..)| ChangeInfo::MemberDeleted { member: *member })
                .collect(),
        ))
    }
    fn revert(&mut self, document: &mut Document) -> Result<Vec<ChangeInfo>, ChangeError> {
        self.log.undo(&mut document.graph)?;
        Ok(self
            .removed
            .iter()
            .map(|(member, kind, position)| ChangeInfo::MemberCreated {
                member: *member,
                kind: *kind,
                parent: position.parent,
                index: position.index,
            })
            .collect())
    }
}

pub struct MoveMember {
    member: NodeId,
    location: Location,
    from: Option<Position>,
    to: Option<Position>,
    log: EditLog,
}
impl MoveMember {
    #[must_use]
    pub fn new(member: NodeId, location: Location) -> Self {
        Self {
            member,
            location,
            from: None,
            to: None,
            log: EditLog::default(),
        }
    }
}
impl Change for MoveMember {
    fn name(&self) -> &'static str {
        "move member"
    }
    fn initialize_and_validate(
        &mut self,
        document: &Document,
        _: &NodeRegistry,
    ) -> Result<(), ValidationError> {
        validate_member(document, self.member)?;
        let anchor = match self.location {
            Location::AboveMember(anchor) | Location::IndexIntoFolder(anchor, _) => Some(anchor),
            Location::IndexIntoRoot(_) => None,
        };
        if let Some(anchor) = anchor {
            if document.graph.subtree(self.member).contains(&anchor) {
                return Err(ValidationError::MoveIntoSelf(self.member));
            }
        }
        document.graph.resolve_location(self.location)?;
        Ok(())
    }
    fn apply(&mut self, document: &mut Document, first_apply: bool) -> Result<Applied, ChangeError> {
        if first_apply {
            self.from = document.graph.position_of(self.member);
            let (member, location) = (self.member, self.location);
            let mut to = None;
            self.log.record(&mut document.graph, |rec| {
                if let Some(detach) = rec.graph().detach_edits(member) {
                    rec.apply_all(detach)?;
                }
                let position = rec.graph().resolve_location(location)?;
                let attach = rec.graph().attach_edits(member, position);
                rec.apply_all(attach)?;
                to = Some(position);
                Ok(())
            })?;
            self.to = to;
        } else {
            self.log.redo(&mut document.graph)?;
        }
        let to = self.to.ok_or(ChangeError::MissingNode(self.member))?;
        Ok(Applied::new(vec![ChangeInfo::MemberMoved {
            member: self.member,
            parent: to.parent,
            index: to.index,
        }]))
    }
    fn revert(&mut self, document: &mut Document) -> Result<Vec<ChangeInfo>, ChangeError> {
        self.log.undo(&mut document.graph)?;
        Ok(self
            .from
            .map(|from| ChangeInfo::MemberMoved {
                member: self.member,
                parent: from.parent,
                index: from.index,
            })
            .into_iter()
            .collect())
    }
}

/// Give a raster layer a mask revealing everything.
pub struct CreateMask {
    member: NodeId,
    /// The mask while it is not attached (before the first apply it is built fresh).
    mask: Option<TileStore>,
}
impl CreateMask {
    #[must_use]
    pub fn new(member: NodeId) -> Self {
        Self { member, mask: None }
    }
}
impl Change for CreateMask {
    fn name(&self) -> &'static str {
        "create mask"
    }
    fn initialize_and_validate(
        &mut self,
        document: &Document,
        _: &NodeRegistry,
    ) -> Result<(), ValidationError> {
        validate_store(document, self.member, DrawTarget::Image)?;
        if document.store(self.member, DrawTarget::Mask).is_some() {
            return Err(ValidationError::MaskExists(self.member));
        }
        Ok(())
    }
    fn apply(&mut self, document: &mut Document, first_apply: bool) -> Result<Applied, ChangeError> {
        let mask = match self.mask.take() {
            Some(mask) => mask,
            None if first_apply => {
                let mut mask = TileStore::new(document.size(), document.tile_size())
                    .map_err(crate::graph::GraphError::from)?;
                mask.enqueue(DrawOperation::Shape {
                    shape: Shape::rectangle(
                        0.0,
                        0.0,
                        document.size()[0] as f32,
                        document.size()[1] as f32,
                    ),
                    color: Rgba8::WHITE,
                    blend: Blend::default(),
                    antialias: false,
                });
                mask.commit();
                mask
            }
            None => return Err(ChangeError::DiffConsumed),
        };
        let member = self.member;
        let raster = document
            .graph
            .get_mut(member)
            .and_then(|node| node.raster_mut())
            .ok_or(ChangeError::MissingNode(member))?;
        if raster.mask.is_some() {
            // Keep it for a retry rather than dropping it.
            self.mask = Some(mask);
            return Err(ChangeError::MaskExists(member));
        }
        raster.mask = Some(mask);
        Ok(Applied::new(vec![ChangeInfo::MaskCreated { member }]))
    }
    fn revert(&mut self, document: &mut Document) -> Result<Vec<ChangeInfo>, ChangeError> {
        let raster = document
            .graph
            .get_mut(self.member)
            .and_then(|node| node.raster_mut())
            .ok_or(ChangeError::MissingNode(self.member))?;
        let mask = raster.mask.take().ok_or(ChangeError::MissingStore {
            member: self.member,
            target: DrawTarget::Mask,
        })?;
        self.mask = Some(mask);
        Ok(vec![ChangeInfo::MaskDeleted {
            member: self.member,
        }])
    }
    fn memory_usage(&self) -> usize {
        self.mask.as_ref().map_or(0, TileStore::memory_usage)
    }
}

pub struct DeleteMask {
    member: NodeId,
    mask: Option<TileStore>,
}
impl DeleteMask {
    #[must_use]
    pub fn new(member: NodeId) -> Self {
        Self { member, mask: None }
    }
}
impl Change for DeleteMask {
    fn name(&self) -> &'static str {
        "delete mask"
    }
    fn initialize_and_validate(
        &mut self,
        document: &Document,
        _: &NodeRegistry,
    ) -> Result<(), ValidationError> {
        validate_store(document, self.member, DrawTarget::Mask)
    }
    fn apply(&mut self, document: &mut Document, _: bool) -> Result<Applied, ChangeError> {
        let raster = document
            .graph
            .get_mut(self.member)
            .and_then(|node| node.raster_mut())
            .ok_or(ChangeError::MissingNode(self.member))?;
        let mask = raster.mask.take().ok_or(ChangeError::MissingStore {
            member: self.member,
            target: DrawTarget::Mask,
        })?;
        self.mask = Some(mask);
        Ok(Applied::new(vec![ChangeInfo::MaskDeleted {
            member: self.member,
        }]))
    }
    fn revert(&mut self, document: &mut Document) -> Result<Vec<ChangeInfo>, ChangeError> {
        let raster = document
            .graph
            .get_mut(self.member)
            .and_then(|node| node.raster_mut())
            .ok_or(ChangeError::MissingNode(self.member))?;
        if raster.mask.is_some() {
            return Err(ChangeError::MaskExists(self.member));
        }
        raster.mask = Some(self.mask.take().ok_or(ChangeError::DiffConsumed)?);
        Ok(vec![ChangeInfo::MaskCreated {
            member: self.member,
        }])
    }
    fn memory_usage(&self) -> usize {
        self.mask.as_ref().map_or(0, TileStore::memory_usage)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::changes::TrackedChange;
    use crate::settings::EngineSettings;

    fn document() -> Document {
        Document::new([64, 64], &EngineSettings::default()).unwrap()
    }
    fn run(document: &mut Document, change: impl Change + 'static) -> TrackedChange {
        let mut change = TrackedChange::new(Box::new(change));
        change
            .validate(document, &NodeRegistry::default())
            .unwrap();
        change.apply(document).unwrap();
        change
    }
    fn create(document: &mut Document, kind: NodeKind, location: Location) -> NodeId {
        let id = NodeId::default();
        run(document, CreateMember::new(id, kind, None, location));
        id
    }

    #[test]
    fn create_member_round_trip() {
        let mut document = document();
        let before = document.graph.to_snapshot();
        let id = NodeId::default();
        let mut change = run(
            &mut document,
            CreateMember::new(
                id,
                NodeKind::RasterLayer,
                Some("Sketch".into()),
                Location::IndexIntoRoot(0),
            ),
        );
        assert_eq!(document.graph.stack(None), vec![id]);
        assert_eq!(
            document.graph.get(id).unwrap().parameter("name"),
            Some(ParamValue::Text("Sketch".into()))
        );
        change.revert(&mut document).unwrap();
        assert_eq!(document.graph.to_snapshot(), before);
        change.apply(&mut document).unwrap();
        assert_eq!(document.graph.stack(None), vec![id]);
    }
    #[test]
    fn create_member_validation() {
        let document = document();
        let registry = NodeRegistry::default();
        let mut not_member = CreateMember::new(
            NodeId::default(),
            NodeKind::Merge,
            None,
            Location::IndexIntoRoot(0),
        );
        assert!(matches!(
            not_member.initialize_and_validate(&document, &registry),
            Err(ValidationError::NotAMember(_))
        ));
        let mut bad_location = CreateMember::new(
            NodeId::default(),
            NodeKind::Folder,
            None,
            Location::AboveMember(NodeId::default()),
        );
        assert!(bad_location
            .initialize_and_validate(&document, &registry)
            .is_err());
        let output = document.graph.output();
        let mut taken =
            CreateMember::new(output, NodeKind::Folder, None, Location::IndexIntoRoot(0));
        assert_eq!(
            taken.initialize_and_validate(&document, &registry),
            Err(ValidationError::IdInUse(output))
        );
    }
    #[test]
    fn delete_folder_with_content_round_trip() {
        let mut document = document();
        let folder = create(&mut document, NodeKind::Folder, Location::IndexIntoRoot(0));
        let inner = create(
            &mut document,
            NodeKind::RasterLayer,
            Location::IndexIntoFolder(folder, 0),
        );
        let inner2 = create(
            &mut document,
            NodeKind::VectorLayer,
            Location::IndexIntoFolder(folder, 1),
        );
        let below = create(&mut document, NodeKind::RasterLayer, Location::IndexIntoRoot(1));
        let before = document.graph.to_snapshot();

        let mut change = run(&mut document, DeleteMember::new(folder));
        for id in [folder, inner, inner2] {
            assert!(!document.graph.contains(id));
        }
        assert_eq!(document.graph.stack(None), vec![below]);
        change.revert(&mut document).unwrap();
        assert_eq!(document.graph.to_snapshot(), before);
        assert_eq!(document.graph.stack(Some(folder)), vec![inner, inner2]);
    }
    #[test]
    fn move_member() {
        let mut document = document();
        let c = create(&mut document, NodeKind::RasterLayer, Location::IndexIntoRoot(0));
        let b = create(&mut document, NodeKind::RasterLayer, Location::IndexIntoRoot(0));
        let folder = create(&mut document, NodeKind::Folder, Location::IndexIntoRoot(0));
        assert_eq!(document.graph.stack(None), vec![folder, b, c]);

        let mut change = run(&mut document, MoveMember::new(c, Location::IndexIntoFolder(folder, 0)));
        assert_eq!(document.graph.stack(None), vec![folder, b]);
        assert_eq!(document.graph.stack(Some(folder)), vec![c]);
        change.revert(&mut document).unwrap();
        assert_eq!(document.graph.stack(None), vec![folder, b, c]);

        run(&mut document, MoveMember::new(folder, Location::AboveMember(c)));
        assert_eq!(document.graph.stack(None), vec![b, folder, c]);
    }
    #[test]
    fn move_into_self_rejected() {
        let mut document = document();
        let folder = create(&mut document, NodeKind::Folder, Location::IndexIntoRoot(0));
        let inner = create(
            &mut document,
            NodeKind::RasterLayer,
            Location::IndexIntoFolder(folder, 0),
        );
        let registry = NodeRegistry::default();
        for location in [
            Location::IndexIntoFolder(folder, 0),
            Location::AboveMember(inner),
            Location::AboveMember(folder),
        ] {
            assert_eq!(
                MoveMember::new(folder, location).initialize_and_validate(&document, &registry),
                Err(ValidationError::MoveIntoSelf(folder))
            );
        }
    }
    #[test]
    fn masks() {
        let mut document = document();
        let layer = create(&mut document, NodeKind::RasterLayer, Location::IndexIntoRoot(0));
        let mut created = run(&mut document, CreateMask::new(layer));
        let mask = document.store(layer, DrawTarget::Mask).unwrap();
        assert_eq!(mask.read_pixel([63, 63]), Rgba8::WHITE);
        assert_eq!(
            CreateMask::new(layer).initialize_and_validate(&document, &NodeRegistry::default()),
            Err(ValidationError::MaskExists(layer))
        );

        let mut deleted = run(&mut document, DeleteMask::new(layer));
        assert!(document.store(layer, DrawTarget::Mask).is_none());
        deleted.revert(&mut document).unwrap();
        assert!(document.store(layer, DrawTarget::Mask).is_some());

        created.revert(&mut document).unwrap();
        assert!(document.store(layer, DrawTarget::Mask).is_none());
        created.apply(&mut document).unwrap();
        assert!(document.store(layer, DrawTarget::Mask).is_some());
    }
    #[test]
    fn reverting_a_vanished_mask_fails_loudly() {
        let mut document = document();
        let layer = create(&mut document, NodeKind::RasterLayer, Location::IndexIntoRoot(0));
        let mut created = run(&mut document, CreateMask::new(layer));
        // Removed behind the change's back.
        document
            .graph
            .get_mut(layer)
            .and_then(|node| node.raster_mut())
            .unwrap()
            .mask = None;
        assert!(matches!(
            created.revert(&mut document),
            Err(ChangeError::MissingStore { .. })
        ));
    }
}
