use crate::graph::{NodeContext, NodeGraph, NodeId};
use crate::tile::{AffectedArea, TileStore, TileStoreError};
use crate::util::RectI;

pub type DocumentID = crate::id::Id<Document>;

/// Which raster store of a layer an edit goes to.
#[derive(
    Copy, Clone, PartialEq, Eq, Hash, Debug, Default, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DrawTarget {
    #[default]
    Image,
    Mask,
}

/// One open image: its bounds and its node graph. All raster content lives in graph nodes.
pub struct Document {
    id: DocumentID,
    pub name: String,
    size: [u32; 2],
    tile_size: u32,
    pub color_space: crate::color::ColorSpace,
    pub graph: NodeGraph,
}
impl Document {
    /// An empty document holding only an output node.
    pub fn new(
        size: [u32; 2],
        settings: &crate::settings::EngineSettings,
    ) -> Result<Self, TileStoreError> {
        if size.contains(&0) {
            return Err(TileStoreError::EmptySize(size));
        }
        if !crate::tile::is_valid_tile_size(settings.tile_size) {
            return Err(TileStoreError::BadTileSize(settings.tile_size));
        }
        Ok(Self {
            id: DocumentID::default(),
            name: "New Document".into(),
            size,
            tile_size: settings.tile_size,
            color_space: settings.color_space,
            graph: NodeGraph::default(),
        })
    }
    #[must_use]
    pub fn id(&self) -> DocumentID {
        self.id
    }
    #[must_use]
    pub fn size(&self) -> [u32; 2] {
        self.size
    }
    #[must_use]
    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }
    #[must_use]
    pub fn bounds(&self) -> RectI {
        RectI::from_size(self.size)
    }
    pub(crate) fn set_size(&mut self, size: [u32; 2]) {
        self.size = size;
    }
    /// What new nodes need to know to be built for this document.
    #[must_use]
    pub fn node_context(&self) -> NodeContext {
        NodeContext {
            size: self.size,
            tile_size: self.tile_size,
        }
    }
    /// The raster store of a layer. `None` if the member has no such store.
    #[must_use]
    pub fn store(&self, member: NodeId, target: DrawTarget) -> Option<&TileStore> {
        let raster = self.graph.get(member)?.raster()?;
        match target {
            DrawTarget::Image => Some(&raster.image),
            DrawTarget::Mask => raster.mask.as_ref(),
        }
    }
    pub fn store_mut(&mut self, member: NodeId, target: DrawTarget) -> Option<&mut TileStore> {
        let raster = self.graph.get_mut(member)?.raster_mut()?;
        match target {
            DrawTarget::Image => Some(&mut raster.image),
            DrawTarget::Mask => raster.mask.as_mut(),
        }
    }
    /// Every raster store in the graph.
    pub fn stores(&self) -> impl Iterator<Item = (NodeId, DrawTarget, &TileStore)> + '_ {
        self.graph.iter().flat_map(|(id, node)| {
            node.raster().into_iter().flat_map(move |raster| {
                std::iter::once((id, DrawTarget::Image, &raster.image))
                    .chain(raster.mask.as_ref().map(|mask| (id, DrawTarget::Mask, mask)))
            })
        })
    }
    /// Union of what every store touched since the last call, clipped to the document.
    pub fn take_affected_area(&mut self) -> AffectedArea {
        let ids: Vec<NodeId> = self.graph.iter().map(|(id, _)| id).collect();
        let mut area = AffectedArea::default();
        for id in ids {
            let Some(raster) = self.graph.get_mut(id).and_then(|node| node.raster_mut()) else {
                continue;
            };
            area.merge(&raster.image.find_affected_area());
            if let Some(mask) = &mut raster.mask {
                area.merge(&mask.find_affected_area());
            }
        }
        area.bounds = area.bounds.intersect(&self.bounds());
        area
    }
    /// Bytes of pixel data held by every store.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        self.stores().map(|(_, _, store)| store.memory_usage()).sum()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::graph::nodes::RasterLayer;
    use crate::settings::EngineSettings;

    #[test]
    fn stores_by_target() {
        let mut doc = Document::new([100, 100], &EngineSettings::default()).unwrap();
        let layer = RasterLayer::new("l", doc.size(), doc.tile_size()).unwrap();
        let id = doc.graph.add_node(Box::new(layer));
        assert!(doc.store(id, DrawTarget::Image).is_some());
        assert!(doc.store(id, DrawTarget::Mask).is_none());
        assert!(doc.store(doc.graph.output(), DrawTarget::Image).is_none());
        assert_eq!(doc.stores().count(), 1);
    }
    #[test]
    fn rejects_empty() {
        assert!(Document::new([0, 5], &EngineSettings::default()).is_err());
    }
}
