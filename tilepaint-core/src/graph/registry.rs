//! Construction of nodes by kind, so nodes can be created from plain data (actions, snapshots)
//! without matching on concrete types.

use super::node::{Node, NodeKind, ParamValue};
use super::nodes;
use super::GraphError;

/// What a constructor may need to know about the document it builds for.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NodeContext {
    pub size: [u32; 2],
    pub tile_size: u32,
}

pub type Constructor = fn(&NodeContext) -> Result<Box<dyn Node>, GraphError>;

pub struct NodeRegistry {
    constructors: hashbrown::HashMap<NodeKind, Constructor>,
}
impl Default for NodeRegistry {
    fn default() -> Self {
        let mut registry = Self {
            constructors: hashbrown::HashMap::new(),
        };
        registry.register(NodeKind::Output, |_| Ok(Box::new(nodes::OutputNode)));
        registry.register(NodeKind::RasterLayer, |ctx| {
            Ok(Box::new(nodes::RasterLayer::new(
                "Layer",
                ctx.size,
                ctx.tile_size,
            )?))
        });
        registry.register(NodeKind::VectorLayer, |_| {
            Ok(Box::new(nodes::VectorLayer::new("Vector")))
        });
        registry.register(NodeKind::Folder, |_| Ok(Box::new(nodes::Folder::new("Folder"))));
        registry.register(NodeKind::Merge, |_| Ok(Box::<nodes::Merge>::default()));
        registry.register(NodeKind::ColorMatrix, |_| {
            Ok(Box::<nodes::ColorMatrixFilter>::default())
        });
        registry.register(NodeKind::Color, |_| Ok(Box::<nodes::ColorSource>::default()));
        registry.register(NodeKind::Matrix, |_| Ok(Box::<nodes::MatrixSource>::default()));
        registry.register(NodeKind::Shape, |_| Ok(Box::<nodes::ShapeSource>::default()));
        registry
    }
}
impl NodeRegistry {
    /// Install or replace the constructor for `kind`.
    pub fn register(&mut self, kind: NodeKind, constructor: Constructor) {
        self.constructors.insert(kind, constructor);
    }
    pub fn kinds(&self) -> impl Iterator<Item = NodeKind> + '_ {
        self.constructors.keys().copied()
    }
    /// A node of `kind` with default parameters.
    pub fn create(&self, kind: NodeKind, ctx: &NodeContext) -> Result<Box<dyn Node>, GraphError> {
        let constructor = self
            .constructors
            .get(&kind)
            .ok_or(GraphError::Unregistered(kind))?;
        let node = constructor(ctx)?;
        debug_assert_eq!(node.kind(), kind);
        Ok(node)
    }
    /// A node of `kind` with the given parameters applied in order.
    pub fn build<'p>(
        &self,
        kind: NodeKind,
        ctx: &NodeContext,
        params: impl IntoIterator<Item = (&'p str, ParamValue)>,
    ) -> Result<Box<dyn Node>, GraphError> {
        let mut node = self.create(kind, ctx)?;
        for (name, value) in params {
            node.set_parameter(name, value)?;
        }
        Ok(node)
    }
}
