//! Pixel edits: draw operations and flood fills against one layer store.

use super::{validate_store, Applied, Change, ChangeError, ChangeInfo, ValidationError};
use crate::blend::Blend;
use crate::diff::ChangeDiff;
use crate::document::{Document, DrawTarget};
use crate::fill::{self, FillError, FillOptions, MergedTileCache};
use crate::graph::{NodeId, NodeRegistry};
use crate::tile::{AffectedArea, DrawOperation};

pub(crate) fn image_area(member: NodeId, target: DrawTarget, area: &AffectedArea) -> ChangeInfo {
    let mut tiles: Vec<_> = area.tiles.iter().copied().collect();
    tiles.sort_unstable();
    ChangeInfo::ImageArea {
        member,
        target,
        tiles,
        bounds: area.bounds,
    }
}

/// Operations committed to one store, and the diff to take them back.
pub(crate) struct RasterEdit {
    member: NodeId,
    target: DrawTarget,
    operations: Vec<DrawOperation>,
    diff: Option<ChangeDiff>,
}
impl RasterEdit {
    pub(crate) fn new(member: NodeId, target: DrawTarget, operations: Vec<DrawOperation>) -> Self {
        Self {
            member,
            target,
            operations,
            diff: None,
        }
    }
    /// Commit the operations. The flag is set when the store ended up exactly as it was.
    pub(crate) fn apply(&mut self, document: &mut Document) -> Result<(ChangeInfo, bool), ChangeError> {
        let space = document.color_space;
        let store = document
            .store_mut(self.member, self.target)
            .ok_or(ChangeError::MissingStore {
                member: self.member,
                target: self.target,
            })?;
        if store.has_pending() {
            return Err(crate::diff::DiffError::PendingOperations.into());
        }
        for operation in &self.operations {
            store.enqueue(operation.clone());
        }
        let diff = ChangeDiff::capture(store, store.pending_affected_tiles());
        let area = store.commit_in(space);
        let unchanged = diff.matches(store);
        log::trace!(
            "{} operations on {} {:?}, {} tiles captured",
            self.operations.len(),
            self.member,
            self.target,
            diff.len()
        );
        self.diff = Some(diff);
        Ok((image_area(self.member, self.target, &area), unchanged))
    }
    pub(crate) fn revert(&mut self, document: &mut Document) -> Result<ChangeInfo, ChangeError> {
        let diff = self.diff.take().ok_or(ChangeError::DiffConsumed)?;
        let store = document
            .store_mut(self.member, self.target)
            .ok_or(ChangeError::MissingStore {
                member: self.member,
                target: self.target,
            })?;
        let area = diff.apply_and_clear(store)?;
        Ok(image_area(self.member, self.target, &area))
    }
    pub(crate) fn memory_usage(&self) -> usize {
        self.diff.as_ref().map_or(0, ChangeDiff::memory_usage)
    }
}

/// Shapes, blits and clears.
pub struct DrawChange {
    edit: RasterEdit,
}
impl DrawChange {
    #[must_use]
    pub fn new(member: NodeId, target: DrawTarget, operations: Vec<DrawOperation>) -> Self {
        Self {
            edit: RasterEdit::new(member, target, operations),
        }
    }
}
impl Change for DrawChange {
    fn name(&self) -> &'static str {
        "draw"
    }
    fn initialize_and_validate(
        &mut self,
        document: &Document,
        _: &NodeRegistry,
    ) -> Result<(), ValidationError> {
        validate_store(document, self.edit.member, self.edit.target)?;
        if self.edit.operations.is_empty() {
            return Err(ValidationError::NoOperations);
        }
        Ok(())
    }
    fn apply(&mut self, document: &mut Document, _: bool) -> Result<Applied, ChangeError> {
        let (info, unchanged) = self.edit.apply(document)?;
        if unchanged {
            self.edit.diff = None;
            Ok(Applied::ignored(vec![info]))
        } else {
            Ok(Applied::new(vec![info]))
        }
    }
    fn revert(&mut self, document: &mut Document) -> Result<Vec<ChangeInfo>, ChangeError> {
        Ok(vec![self.edit.revert(document)?])
    }
    fn memory_usage(&self) -> usize {
        self.edit.memory_usage()
    }
}

/// What a fill compares pixels against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FillReference {
    /// The store being filled.
    Target,
    /// These layers composited, top first. Hidden layers are skipped.
    Merged(Vec<NodeId>),
}

pub struct FloodFillChange {
    member: NodeId,
    target: DrawTarget,
    options: FillOptions,
    reference: FillReference,
    /// Computed on first apply, replayed on redo.
    edit: Option<RasterEdit>,
}
impl FloodFillChange {
    #[must_use]
    pub fn new(
        member: NodeId,
        target: DrawTarget,
        options: FillOptions,
        reference: FillReference,
    ) -> Self {
        Self {
            member,
            target,
            options,
            reference,
            edit: None,
        }
    }
    fn compute(&self, document: &Document) -> Result<fill::FillResult, ChangeError> {
        match &self.reference {
            FillReference::Target => {
                let store = document.store(self.member, self.target).ok_or(
                    ChangeError::MissingStore {
                        member: self.member,
                        target: self.target,
                    },
                )?;
                Ok(fill::flood_fill(store, &self.options))
            }
            FillReference::Merged(layers) => {
                let mut sources = Vec::with_capacity(layers.len());
                for layer in layers {
                    let node = document
                        .graph
                        .get(*layer)
                        .ok_or(ChangeError::MissingNode(*layer))?;
                    let Some(raster) = node.raster() else {
                        continue;
                    };
                    match node.properties() {
                        Some(props) if !props.visible => (),
                        Some(props) => sources.push((&raster.image, props.blend)),
                        None => sources.push((&raster.image, Blend::default())),
                    }
                }
                let mut cache = match MergedTileCache::new(sources, document.color_space) {
                    Ok(cache) => cache,
                    // Everything hidden, nothing to compare against.
                    Err(FillError::NoSources) => return Ok(fill::FillResult::default()),
                    Err(err) => return Err(err.into()),
                };
                let result = fill::flood_fill(&mut cache, &self.options);
                log::trace!("merged fill reference built {} tiles", cache.merge_count());
                Ok(result)
            }
        }
    }
}
impl Change for FloodFillChange {
    fn name(&self) -> &'static str {
        "flood fill"
    }
    fn initialize_and_validate(
        &mut self,
        document: &Document,
        _: &NodeRegistry,
    ) -> Result<(), ValidationError> {
        validate_store(document, self.member, self.target)?;
        if let FillReference::Merged(layers) = &self.reference {
            if layers.is_empty() {
                return Err(FillError::NoSources.into());
            }
            for layer in layers {
                let node = document
                    .graph
                    .get(*layer)
                    .ok_or(ValidationError::UnknownNode(*layer))?;
                if node.raster().is_none() {
                    return Err(ValidationError::NotARasterLayer(*layer));
                }
            }
        }
        Ok(())
    }
    fn apply(&mut self, document: &mut Document, first_apply: bool) -> Result<Applied, ChangeError> {
        if first_apply || self.edit.is_none() {
            let result = self.compute(document)?;
            if result.is_empty() {
                log::debug!("fill at {:?} changed nothing", self.options.seed);
                return Ok(Applied::ignored(vec![image_area(
                    self.member,
                    self.target,
                    &AffectedArea::default(),
                )]));
            }
            log::debug!(
                "fill at {:?} covers {} pixels in {} tiles",
                self.options.seed,
                result.filled_pixels,
                result.deltas.len()
            );
            self.edit = Some(RasterEdit::new(
                self.member,
                self.target,
                vec![result.into_operation()],
            ));
        }
        let edit = self.edit.as_mut().ok_or(ChangeError::DiffConsumed)?;
        let (info, unchanged) = edit.apply(document)?;
        Ok(Applied {
            infos: vec![info],
            ignore_in_undo: unchanged,
        })
    }
    fn revert(&mut self, document: &mut Document) -> Result<Vec<ChangeInfo>, ChangeError> {
        let edit = self.edit.as_mut().ok_or(ChangeError::DiffConsumed)?;
        Ok(vec![edit.revert(document)?])
    }
    fn memory_usage(&self) -> usize {
        self.edit.as_ref().map_or(0, RasterEdit::memory_usage)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::changes::TrackedChange;
    use crate::color::{ColorSpace, Rgba8};
    use crate::graph::nodes::RasterLayer;
    use crate::graph::Node;
    use crate::settings::EngineSettings;
    use crate::tile::Shape;

    fn document() -> (Document, NodeId) {
        let mut document = Document::new([128, 128], &EngineSettings::default()).unwrap();
        let layer = RasterLayer::new("layer", document.size(), document.tile_size()).unwrap();
        let id = document.graph.add_node(Box::new(layer));
        (document, id)
    }
    fn rect(x: f32, y: f32, w: f32, h: f32, color: Rgba8) -> DrawOperation {
        DrawOperation::Shape {
            shape: Shape::rectangle(x, y, w, h),
            color,
            blend: Blend::default(),
            antialias: false,
        }
    }
    fn run(document: &mut Document, change: impl Change + 'static) -> (TrackedChange, Applied) {
        let mut change = TrackedChange::new(Box::new(change));
        change
            .validate(document, &NodeRegistry::default())
            .unwrap();
        let applied = change.apply(document).unwrap();
        (change, applied)
    }

    #[test]
    fn draw_then_revert() {
        let (mut document, layer) = document();
        let (mut change, applied) = run(
            &mut document,
            DrawChange::new(
                layer,
                DrawTarget::Image,
                vec![rect(0.0, 0.0, 64.0, 64.0, Rgba8::WHITE)],
            ),
        );
        assert!(!applied.ignore_in_undo);
        let store = document.store(layer, DrawTarget::Image).unwrap();
        assert_eq!(store.tile_count(), 1);
        change.revert(&mut document).unwrap();
        assert_eq!(
            document.store(layer, DrawTarget::Image).unwrap().tile_count(),
            0
        );
        // Redo.
        change.apply(&mut document).unwrap();
        assert_eq!(
            document.store(layer, DrawTarget::Image).unwrap().tile_count(),
            1
        );
    }
    #[test]
    fn draws_blend_in_document_color_space() {
        let (mut document, layer) = document();
        document.color_space = ColorSpace::LinearSrgb;
        let red = Rgba8::from_straight(255, 0, 0, 255);
        let blue = Rgba8::from_straight(0, 0, 255, 128);
        run(
            &mut document,
            DrawChange::new(
                layer,
                DrawTarget::Image,
                vec![
                    rect(0.0, 0.0, 16.0, 16.0, red),
                    rect(0.0, 0.0, 16.0, 16.0, blue),
                ],
            ),
        );
        let linear = Blend::default().pixel(ColorSpace::LinearSrgb, blue, red);
        assert_ne!(linear, Blend::default().pixel(ColorSpace::Srgb, blue, red));
        let store = document.store(layer, DrawTarget::Image).unwrap();
        assert_eq!(store.read_pixel([8, 8]), linear);
    }
    #[test]
    fn redundant_draw_is_ignored() {
        let (mut document, layer) = document();
        let op = rect(0.0, 0.0, 64.0, 64.0, Rgba8::WHITE);
        run(
            &mut document,
            DrawChange::new(layer, DrawTarget::Image, vec![op.clone()]),
        );
        let (_, applied) = run(
            &mut document,
            DrawChange::new(layer, DrawTarget::Image, vec![op]),
        );
        assert!(applied.ignore_in_undo);
        assert_eq!(applied.infos.len(), 1);
    }
    #[test]
    fn validation() {
        let (document, layer) = document();
        let registry = NodeRegistry::default();
        let mut missing = DrawChange::new(NodeId::default(), DrawTarget::Image, vec![DrawOperation::Clear]);
        assert!(matches!(
            missing.initialize_and_validate(&document, &registry),
            Err(ValidationError::UnknownNode(_))
        ));
        let mut mask = DrawChange::new(layer, DrawTarget::Mask, vec![DrawOperation::Clear]);
        assert_eq!(
            mask.initialize_and_validate(&document, &registry),
            Err(ValidationError::NoMask(layer))
        );
        let mut empty = DrawChange::new(layer, DrawTarget::Image, Vec::new());
        assert_eq!(
            empty.initialize_and_validate(&document, &registry),
            Err(ValidationError::NoOperations)
        );
        let output = document.graph.output();
        let mut not_raster = DrawChange::new(output, DrawTarget::Image, vec![DrawOperation::Clear]);
        assert_eq!(
            not_raster.initialize_and_validate(&document, &registry),
            Err(ValidationError::NotARasterLayer(output))
        );
    }
    #[test]
    fn fill_reverts_and_redoes() {
        let (mut document, layer) = document();
        // A box outline spanning four tiles.
        let outline = vec![
            rect(32.0, 32.0, 64.0, 2.0, Rgba8::BLACK),
            rect(32.0, 94.0, 64.0, 2.0, Rgba8::BLACK),
            rect(32.0, 32.0, 2.0, 64.0, Rgba8::BLACK),
            rect(94.0, 32.0, 2.0, 64.0, Rgba8::BLACK),
        ];
        run(
            &mut document,
            DrawChange::new(layer, DrawTarget::Image, outline),
        );
        let before = document.store(layer, DrawTarget::Image).unwrap().to_snapshot();
        let options = FillOptions::new([64, 64], Rgba8::WHITE);
        let (mut change, applied) = run(
            &mut document,
            FloodFillChange::new(layer, DrawTarget::Image, options, FillReference::Target),
        );
        assert!(!applied.ignore_in_undo);
        let store = document.store(layer, DrawTarget::Image).unwrap();
        assert_eq!(store.read_pixel([64, 64]), Rgba8::WHITE);
        assert_eq!(store.read_pixel([10, 10]), Rgba8::TRANSPARENT);
        assert_eq!(store.read_pixel([33, 33]), Rgba8::BLACK);

        change.revert(&mut document).unwrap();
        assert_eq!(
            document.store(layer, DrawTarget::Image).unwrap().to_snapshot(),
            before
        );
        change.apply(&mut document).unwrap();
        assert_eq!(
            document
                .store(layer, DrawTarget::Image)
                .unwrap()
                .read_pixel([40, 90]),
            Rgba8::WHITE
        );
    }
    #[test]
    fn fill_with_nothing_to_do_is_ignored() {
        let (mut document, layer) = document();
        let options = FillOptions::new([5, 5], Rgba8::TRANSPARENT);
        let (_, applied) = run(
            &mut document,
            FloodFillChange::new(layer, DrawTarget::Image, options, FillReference::Target),
        );
        assert!(applied.ignore_in_undo);
    }
    #[test]
    fn fill_against_merged_reference() {
        let (mut document, target) = document();
        let line = RasterLayer::new("lines", document.size(), document.tile_size()).unwrap();
        let lines = document.graph.add_node(Box::new(line));
        run(
            &mut document,
            DrawChange::new(
                lines,
                DrawTarget::Image,
                vec![rect(64.0, 0.0, 1.0, 128.0, Rgba8::BLACK)],
            ),
        );
        let options = FillOptions::new([10, 10], Rgba8::WHITE);
        run(
            &mut document,
            FloodFillChange::new(
                target,
                DrawTarget::Image,
                options.clone(),
                FillReference::Merged(vec![lines, target]),
            ),
        );
        let store = document.store(target, DrawTarget::Image).unwrap();
        assert_eq!(store.read_pixel([63, 100]), Rgba8::WHITE);
        assert_eq!(store.read_pixel([64, 100]), Rgba8::TRANSPARENT);
        assert_eq!(store.read_pixel([100, 100]), Rgba8::TRANSPARENT);
        // The reference layer is not written to.
        let lines_store = document.store(lines, DrawTarget::Image).unwrap();
        assert_eq!(lines_store.read_pixel([10, 10]), Rgba8::TRANSPARENT);

        // Hidden layers don't count as boundaries.
        let node = document.graph.get_mut(lines).unwrap();
        node.set_parameter("visible", crate::graph::ParamValue::Bool(false))
            .unwrap();
        let fresh = RasterLayer::new("fresh", document.size(), document.tile_size()).unwrap();
        let fresh = document.graph.add_node(Box::new(fresh));
        run(
            &mut document,
            FloodFillChange::new(
                fresh,
                DrawTarget::Image,
                options,
                FillReference::Merged(vec![lines, fresh]),
            ),
        );
        let store = document.store(fresh, DrawTarget::Image).unwrap();
        assert_eq!(store.read_pixel([100, 100]), Rgba8::WHITE);
    }
}
