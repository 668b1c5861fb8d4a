//! Plain-data form of a node graph, for external codecs: node list with typed parameters (and
//! raster content), edge list, and which node is the output.
//!
//! Node IDs are process-local, so nodes are referred to by their index in the list.

use super::{GraphError, InputRef, NodeContext, NodeGraph, NodeId, NodeKind, NodeRegistry, OutputRef, ParamValue};
use crate::tile::snapshot::TileStoreSnapshot;
use crate::tile::TileStore;

#[derive(Clone, PartialEq, Eq, Debug, serde::Serialize, serde::Deserialize)]
pub struct RasterSnapshot {
    pub image: TileStoreSnapshot,
    pub mask: Option<TileStoreSnapshot>,
}

#[derive(Clone, PartialEq, Eq, Debug, serde::Serialize, serde::Deserialize)]
pub struct NodeSnapshot {
    pub kind: NodeKind,
    pub parameters: Vec<(String, ParamValue)>,
    pub raster: Option<RasterSnapshot>,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, serde::Serialize, serde::Deserialize)]
pub struct EdgeSnapshot {
    pub from: usize,
    pub output: usize,
    pub to: usize,
    pub input: usize,
}

#[derive(Clone, PartialEq, Eq, Debug, serde::Serialize, serde::Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<NodeSnapshot>,
    pub edges: Vec<EdgeSnapshot>,
    pub output: usize,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("node index {0} out of range")]
    BadIndex(usize),
    #[error("output index does not refer to an output node")]
    BadOutput,
    #[error("node {0} carries raster content but has no raster storage")]
    UnexpectedRaster(usize),
    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl NodeGraph {
    /// Nodes in ID order, so an unchanged graph always gives the same snapshot.
    #[must_use]
    pub fn to_snapshot(&self) -> GraphSnapshot {
        let mut ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        ids.sort_unstable();
        let index_of: hashbrown::HashMap<NodeId, usize> =
            ids.iter().enumerate().map(|(idx, id)| (*id, idx)).collect();

        let mut nodes = Vec::with_capacity(ids.len());
        let mut edges = Vec::new();
        for (to, id) in ids.iter().enumerate() {
            let entry = &self.nodes[id];
            nodes.push(NodeSnapshot {
                kind: entry.node.kind(),
                parameters: entry
                    .node
                    .parameters()
                    .into_iter()
                    .map(|(name, value)| (name.to_owned(), value))
                    .collect(),
                raster: entry.node.raster().map(|raster| RasterSnapshot {
                    image: raster.image.to_snapshot(),
                    mask: raster.mask.as_ref().map(TileStore::to_snapshot),
                }),
            });
            for (input, source) in entry.inputs.iter().enumerate() {
                if let Some(source) = source {
                    edges.push(EdgeSnapshot {
                        from: index_of[&source.node],
                        output: source.socket,
                        to,
                        input,
                    });
                }
            }
        }
        GraphSnapshot {
            nodes,
            edges,
            output: index_of[&self.output],
        }
    }
    /// Rebuild a graph, returning it along with the fresh ID of each snapshot node.
    pub fn from_snapshot(
        snapshot: &GraphSnapshot,
        registry: &NodeRegistry,
        ctx: &NodeContext,
    ) -> Result<(Self, Vec<NodeId>), SnapshotError> {
        let output_node = snapshot
            .nodes
            .get(snapshot.output)
            .filter(|node| node.kind == NodeKind::Output)
            .ok_or(SnapshotError::BadOutput)?;
        let ids: Vec<NodeId> = NodeId::many(snapshot.nodes.len()).collect();
        let mut graph = Self::with_output(
            ids[snapshot.output],
            registry.create(output_node.kind, ctx)?,
        );
        for (idx, node) in snapshot.nodes.iter().enumerate() {
            if idx == snapshot.output {
                continue;
            }
            let mut built = registry.build(
                node.kind,
                ctx,
                node.parameters
                    .iter()
                    .map(|(name, value)| (name.as_str(), value.clone())),
            )?;
            if let Some(raster) = &node.raster {
                let content = built
                    .raster_mut()
                    .ok_or(SnapshotError::UnexpectedRaster(idx))?;
                content.image =
                    TileStore::from_snapshot(&raster.image).map_err(GraphError::Store)?;
                content.mask = raster
                    .mask
                    .as_ref()
                    .map(TileStore::from_snapshot)
                    .transpose()
                    .map_err(GraphError::Store)?;
            }
            graph.add_node_with_id(ids[idx], built)?;
        }
        for edge in &snapshot.edges {
            let from = *ids.get(edge.from).ok_or(SnapshotError::BadIndex(edge.from))?;
            let to = *ids.get(edge.to).ok_or(SnapshotError::BadIndex(edge.to))?;
            graph.connect(OutputRef::new(from, edge.output), InputRef::new(to, edge.input))?;
        }
        Ok((graph, ids))
    }
}

#[cfg(test)]
mod test {
    use super::super::nodes::{Folder, RasterLayer};
    use super::super::Location;
    use super::*;
    use crate::blend::Blend;
    use crate::color::Rgba8;
    use crate::tile::{DrawOperation, Shape};

    #[test]
    fn snapshot_round_trip() {
        let ctx = NodeContext {
            size: [40, 40],
            tile_size: 16,
        };
        let mut graph = NodeGraph::default();
        let mut layer = RasterLayer::new("paint", ctx.size, ctx.tile_size).unwrap();
        layer.content.image.enqueue(DrawOperation::Shape {
            shape: Shape::rectangle(3.0, 3.0, 20.0, 20.0),
            color: Rgba8::from_straight(10, 200, 30, 255),
            blend: Blend::default(),
            antialias: false,
        });
        layer.content.image.commit();
        let layer = graph.add_node(Box::new(layer));
        let folder = graph.add_node(Box::new(Folder::new("group")));
        for (id, location) in [
            (folder, Location::IndexIntoRoot(0)),
            (layer, Location::IndexIntoFolder(folder, 0)),
        ] {
            let position = graph.resolve_location(location).unwrap();
            for edit in graph.attach_edits(id, position) {
                graph.apply_edit(edit).unwrap();
            }
        }

        let snapshot = graph.to_snapshot();
        let (restored, ids) =
            NodeGraph::from_snapshot(&snapshot, &NodeRegistry::default(), &ctx).unwrap();
        assert_eq!(restored.to_snapshot(), snapshot);
        assert_eq!(restored.stack(None).len(), 1);
        let restored_layer = restored.stack(Some(restored.stack(None)[0]))[0];
        assert!(ids.contains(&restored_layer));
        let pixels = restored.get(restored_layer).unwrap().raster().unwrap();
        assert_eq!(pixels.image.read_pixel([10, 10]), Rgba8::from_straight(10, 200, 30, 255));
    }
    #[test]
    fn rejects_bad_output() {
        let snapshot = GraphSnapshot {
            nodes: vec![],
            edges: vec![],
            output: 0,
        };
        assert_eq!(
            NodeGraph::from_snapshot(
                &snapshot,
                &NodeRegistry::default(),
                &NodeContext {
                    size: [1, 1],
                    tile_size: 16
                }
            )
            .err(),
            Some(SnapshotError::BadOutput)
        );
    }
}
