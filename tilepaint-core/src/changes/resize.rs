use super::{Applied, Change, ChangeError, ChangeInfo, ValidationError};
use crate::blend::Blend;
use crate::color::Rgba8;
use crate::diff::{ChangeDiff, DiffChain};
use crate::document::{Document, DrawTarget};
use crate::graph::{NodeId, NodeRegistry};
use crate::tile::{DrawOperation, Shape};
use crate::util::RectI;

/// Largest allowed image side, in pixels.
pub const MAX_SIDE: u32 = 1 << 16;

/// Change the document bounds. Every raster store is resized, its content moved by `offset`.
///
/// All checks happen in validation, so once applying starts it runs to completion. Each store
/// is captured whole before it is touched.
pub struct ResizeCanvas {
    size: [u32; 2],
    offset: [i32; 2],
    old_size: [u32; 2],
    diffs: Option<DiffChain<(NodeId, DrawTarget)>>,
}
impl ResizeCanvas {
    #[must_use]
    pub fn new(size: [u32; 2], offset: [i32; 2]) -> Self {
        Self {
            size,
            offset,
            old_size: [0; 2],
            diffs: None,
        }
    }
}
impl Change for ResizeCanvas {
    fn name(&self) -> &'static str {
        "resize canvas"
    }
    fn initialize_and_validate(
        &mut self,
        document: &Document,
        _: &NodeRegistry,
    ) -> Result<(), ValidationError> {
        if self.size.contains(&0) {
            return Err(ValidationError::EmptySize(self.size));
        }
        if self.size.iter().any(|side| *side > MAX_SIDE) {
            return Err(ValidationError::TooLarge(self.size));
        }
        // Past this, no old pixel can land inside the new bounds.
        let current = document.size();
        let too_far = (0..2).any(|axis| {
            i64::from(self.offset[axis]).abs() > i64::from(MAX_SIDE) + i64::from(current[axis])
        });
        if too_far {
            return Err(ValidationError::OffsetTooLarge(self.offset));
        }
        Ok(())
    }
    fn apply(&mut self, document: &mut Document, _: bool) -> Result<Applied, ChangeError> {
        self.old_size = document.size();
        let info = ChangeInfo::SizeChanged {
            old: self.old_size,
            new: self.size,
        };
        if self.size == self.old_size && self.offset == [0, 0] {
            return Ok(Applied::ignored(vec![info]));
        }
        let keys: Vec<_> = document
            .stores()
            .map(|(member, target, _)| (member, target))
            .collect();
        if document.stores().any(|(_, _, store)| store.has_pending()) {
            return Err(crate::diff::DiffError::PendingOperations.into());
        }

        let mut diffs = DiffChain::default();
        for (member, target) in keys {
            let store = document
                .store_mut(member, target)
                .ok_or(ChangeError::MissingStore { member, target })?;
            diffs.push((member, target), ChangeDiff::capture_all(store));
            store.enqueue(DrawOperation::Resize {
                size: self.size,
                offset: self.offset,
            });
            if target == DrawTarget::Mask {
                // Masks reveal everything they were not painted over.
                for rect in exposed(self.old_size, self.size, self.offset) {
                    store.enqueue(DrawOperation::Shape {
                        shape: Shape::rectangle(
                            rect.x as f32,
                            rect.y as f32,
                            rect.width as f32,
                            rect.height as f32,
                        ),
                        color: Rgba8::WHITE,
                        blend: Blend::default(),
                        antialias: false,
                    });
                }
            }
            store.commit();
        }
        document.set_size(self.size);
        log::debug!(
            "resized {:?} -> {:?}, {} stores captured ({})",
            self.old_size,
            self.size,
            diffs.len(),
            human_bytes::human_bytes(diffs.memory_usage() as f64)
        );
        self.diffs = Some(diffs);
        Ok(Applied::new(vec![info]))
    }
    fn revert(&mut self, document: &mut Document) -> Result<Vec<ChangeInfo>, ChangeError> {
        let diffs = self.diffs.take().ok_or(ChangeError::DiffConsumed)?;
        diffs.apply_and_clear(document, |document, (member, target)| {
            document.store_mut(*member, *target)
        })?;
        document.set_size(self.old_size);
        Ok(vec![ChangeInfo::SizeChanged {
            old: self.size,
            new: self.old_size,
        }])
    }
    fn memory_usage(&self) -> usize {
        self.diffs.as_ref().map_or(0, DiffChain::memory_usage)
    }
}

/// Parts of the new bounds not covered by the moved old image, as up to four strips.
fn exposed(old_size: [u32; 2], size: [u32; 2], offset: [i32; 2]) -> Vec<RectI> {
    let bounds = RectI::from_size(size);
    let kept = RectI::from_size(old_size).translated(offset).intersect(&bounds);
    if kept.is_empty() {
        return vec![bounds];
    }
    let rows = |top: i32, bottom: i32| RectI::from_corners([0, top], [bounds.right(), bottom]);
    let columns = |left: i32, right: i32| RectI::from_corners([left, kept.y], [right, kept.bottom()]);
    [
        rows(0, kept.y),
        rows(kept.bottom(), bounds.bottom()),
        columns(0, kept.x),
        columns(kept.right(), bounds.right()),
    ]
    .into_iter()
    .filter(|rect| !rect.is_empty())
    .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::changes::TrackedChange;
    use crate::graph::nodes::RasterLayer;
    use crate::settings::EngineSettings;

    #[test]
    fn resize_round_trip() {
        let mut document = Document::new([128, 64], &EngineSettings::default()).unwrap();
        let mut layer = RasterLayer::new("l", document.size(), document.tile_size()).unwrap();
        layer.content.image.enqueue(DrawOperation::Shape {
            shape: Shape::rectangle(0.0, 0.0, 128.0, 64.0),
            color: Rgba8::WHITE,
            blend: Blend::default(),
            antialias: false,
        });
        layer.content.image.commit();
        layer.content.mask = Some(layer.content.image.clone_committed());
        let id = document.graph.add_node(Box::new(layer));
        let before = document.graph.to_snapshot();

        let mut change = TrackedChange::new(Box::new(ResizeCanvas::new([64, 192], [-64, 64])));
        change
            .validate(&document, &NodeRegistry::default())
            .unwrap();
        change.apply(&mut document).unwrap();
        assert_eq!(document.size(), [64, 192]);
        for target in [DrawTarget::Image, DrawTarget::Mask] {
            let store = document.store(id, target).unwrap();
            assert_eq!(store.size(), [64, 192]);
            assert_eq!(store.read_pixel([10, 10]), Rgba8::TRANSPARENT);
            assert_eq!(store.read_pixel([10, 70]), Rgba8::WHITE);
        }
        change.revert(&mut document).unwrap();
        assert_eq!(document.size(), [128, 64]);
        assert_eq!(document.graph.to_snapshot(), before);
    }
    #[test]
    fn rejects_bad_sizes_before_touching_anything() {
        let document = Document::new([16, 16], &EngineSettings::default()).unwrap();
        let registry = NodeRegistry::default();
        assert_eq!(
            ResizeCanvas::new([0, 10], [0, 0]).initialize_and_validate(&document, &registry),
            Err(ValidationError::EmptySize([0, 10]))
        );
        assert_eq!(
            ResizeCanvas::new([10, MAX_SIDE + 1], [0, 0])
                .initialize_and_validate(&document, &registry),
            Err(ValidationError::TooLarge([10, MAX_SIDE + 1]))
        );
    }
    #[test]
    fn rejects_offsets_past_any_overlap() {
        let document = Document::new([32, 32], &EngineSettings::default()).unwrap();
        let registry = NodeRegistry::default();
        let offset = [i32::MAX - 5, 0];
        assert_eq!(
            ResizeCanvas::new([32, 32], offset).initialize_and_validate(&document, &registry),
            Err(ValidationError::OffsetTooLarge(offset))
        );
        let offset = [0, i32::MIN];
        assert_eq!(
            ResizeCanvas::new([32, 32], offset).initialize_and_validate(&document, &registry),
            Err(ValidationError::OffsetTooLarge(offset))
        );
    }
    #[test]
    fn unaligned_offsets_move_pixels() {
        let settings = EngineSettings {
            tile_size: 16,
            ..Default::default()
        };
        let mut document = Document::new([32, 32], &settings).unwrap();
        let mut layer = RasterLayer::new("l", document.size(), document.tile_size()).unwrap();
        layer.content.image.enqueue(DrawOperation::Shape {
            shape: Shape::rectangle(0.0, 0.0, 32.0, 32.0),
            color: Rgba8::WHITE,
            blend: Blend::default(),
            antialias: false,
        });
        layer.content.image.commit();
        let id = document.graph.add_node(Box::new(layer));
        let before = document.graph.to_snapshot();
        let registry = NodeRegistry::default();

        let mut change = TrackedChange::new(Box::new(ResizeCanvas::new([40, 40], [-7, 5])));
        change.validate(&document, &registry).unwrap();
        change.apply(&mut document).unwrap();
        let store = document.store(id, DrawTarget::Image).unwrap();
        assert_eq!(store.read_pixel([0, 5]), Rgba8::WHITE);
        assert_eq!(store.read_pixel([24, 36]), Rgba8::WHITE);
        assert_eq!(store.read_pixel([25, 5]), Rgba8::TRANSPARENT);
        assert_eq!(store.read_pixel([0, 4]), Rgba8::TRANSPARENT);
        assert_eq!(store.read_pixel([0, 37]), Rgba8::TRANSPARENT);
        change.revert(&mut document).unwrap();
        assert_eq!(document.graph.to_snapshot(), before);

        // As far as an offset may go, everything lands outside.
        let far = [-(MAX_SIDE as i32) - 32, 0];
        let mut change = TrackedChange::new(Box::new(ResizeCanvas::new([48, 48], far)));
        change.validate(&document, &registry).unwrap();
        change.apply(&mut document).unwrap();
        assert_eq!(document.store(id, DrawTarget::Image).unwrap().tile_count(), 0);
        change.revert(&mut document).unwrap();
        assert_eq!(document.graph.to_snapshot(), before);
    }
    #[test]
    fn grown_masks_reveal_the_new_area() {
        use crate::actions::{Action, ActionSource};
        use crate::graph::{Location, NodeKind};
        use crate::queue::ActionAccumulator;
        use crate::tile::{Resolution, TileCoord};

        let settings = EngineSettings {
            tile_size: 16,
            ..Default::default()
        };
        let document = Document::new([32, 32], &settings).unwrap();
        let queue = ActionAccumulator::new(document, settings, std::sync::Arc::default());
        let layer = NodeId::default();
        for action in [
            Action::CreateMember {
                id: layer,
                kind: NodeKind::RasterLayer,
                name: None,
                location: Location::IndexIntoRoot(0),
            },
            Action::CreateMask { member: layer },
            Action::ResizeCanvas {
                size: [64, 64],
                offset: [0, 0],
            },
            Action::DrawShape {
                member: layer,
                target: DrawTarget::Image,
                shape: Shape::rectangle(0.0, 0.0, 64.0, 64.0),
                color: Rgba8::WHITE,
                blend: Blend::default(),
                antialias: false,
            },
        ] {
            queue.submit(ActionSource::User, action);
        }
        let reports = queue.process().unwrap();
        assert!(reports.iter().all(|report| report.rejected.is_empty()));
        {
            let document = queue.document().read();
            let mask = document.store(layer, DrawTarget::Mask).unwrap();
            assert_eq!(mask.read_pixel([5, 5]), Rgba8::WHITE);
            assert_eq!(mask.read_pixel([50, 50]), Rgba8::WHITE);
            assert_eq!(mask.read_pixel([5, 50]), Rgba8::WHITE);
        }
        let grown = TileCoord::new(3, 3);
        let region = queue
            .renderer()
            .render_region([grown], Resolution::Full, 0)
            .unwrap();
        assert_eq!(region.get(grown).unwrap().get(0, 0), Rgba8::WHITE);

        queue.undo();
        queue.undo();
        queue.process().unwrap();
        let document = queue.document().read();
        let mask = document.store(layer, DrawTarget::Mask).unwrap();
        assert_eq!(mask.size(), [32, 32]);
        assert_eq!(mask.tile_count(), 4);
    }
    #[test]
    fn exposed_strips_cover_only_new_pixels() {
        let strips = exposed([32, 32], [64, 48], [8, -4]);
        let area: u32 = strips.iter().map(|rect| rect.width * rect.height).sum();
        // The old image keeps 32x28 pixels of the new 64x48.
        assert_eq!(area, 64 * 48 - 32 * 28);
        assert!(strips
            .iter()
            .all(|rect| rect.intersect(&RectI::new(8, 0, 32, 28)).is_empty()));
        assert_eq!(exposed([16, 16], [16, 16], [0, 0]), Vec::new());
        assert_eq!(
            exposed([16, 16], [8, 8], [100, 0]),
            vec![RectI::from_size([8, 8])]
        );
    }
    #[test]
    fn same_size_is_ignored() {
        let mut document = Document::new([16, 16], &EngineSettings::default()).unwrap();
        let mut change = ResizeCanvas::new([16, 16], [0, 0]);
        assert!(change.apply(&mut document, true).unwrap().ignore_in_undo);
    }
}
