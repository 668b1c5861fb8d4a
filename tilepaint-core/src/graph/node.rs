//! The node capability: typed sockets, typed parameters, and a per-tile execution function.

use std::sync::Arc;

use crate::blend::BlendMode;
use crate::color::{ColorMatrix, ColorSpace, Rgba8};
use crate::tile::{Resolution, Shape, Tile, TileCoord};
use crate::util::{ContentHasher, FiniteF32, RectI};

#[derive(
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Debug,
    strum::AsRefStr,
    strum::EnumIter,
    strum::EnumString,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NodeKind {
    /// The single sink of the graph. Its input is the rendered document.
    Output,
    RasterLayer,
    VectorLayer,
    Folder,
    /// Blend one image over another.
    Merge,
    /// Apply a color matrix to an image.
    ColorMatrix,
    Color,
    Matrix,
    Shape,
}

/// Structural nodes form the layer stack, chained through their `background` input.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureKind {
    Layer,
    /// Has a second `content` input, heading its own stack.
    Folder,
}
impl StructureKind {
    pub const BACKGROUND: usize = 0;
    pub const CONTENT: usize = 1;
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, strum::AsRefStr, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SocketType {
    /// One tile of premultiplied pixels at the context resolution.
    Image,
    Color,
    Matrix,
    Shape,
}

#[derive(Copy, Clone, Debug)]
pub struct SocketDesc {
    pub name: &'static str,
    pub ty: SocketType,
}
impl SocketDesc {
    #[must_use]
    pub const fn new(name: &'static str, ty: SocketType) -> Self {
        Self { name, ty }
    }
}

/// A value flowing along an edge.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Image(Arc<Tile>),
    Color(Rgba8),
    Matrix(ColorMatrix),
    Shape(Option<Arc<Shape>>),
}
impl Value {
    #[must_use]
    pub fn ty(&self) -> SocketType {
        match self {
            Self::Image(_) => SocketType::Image,
            Self::Color(_) => SocketType::Color,
            Self::Matrix(_) => SocketType::Matrix,
            Self::Shape(_) => SocketType::Shape,
        }
    }
    #[must_use]
    pub fn image(&self) -> Option<&Arc<Tile>> {
        match self {
            Self::Image(image) => Some(image),
            _ => None,
        }
    }
    #[must_use]
    pub fn color(&self) -> Option<Rgba8> {
        match self {
            Self::Color(color) => Some(*color),
            _ => None,
        }
    }
    #[must_use]
    pub fn matrix(&self) -> Option<&ColorMatrix> {
        match self {
            Self::Matrix(matrix) => Some(matrix),
            _ => None,
        }
    }
    /// `Some(None)` for a shape socket carrying no shape.
    #[must_use]
    pub fn shape(&self) -> Option<Option<&Shape>> {
        match self {
            Self::Shape(shape) => Some(shape.as_deref()),
            _ => None,
        }
    }
}

/// Most nodes produce exactly one value.
pub type Outputs = smallvec::SmallVec<[Value; 1]>;

/// Everything a node needs to know about the tile being produced.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct RenderContext {
    pub frame: u32,
    pub resolution: Resolution,
    pub tile: TileCoord,
    /// Full resolution tile size of the document.
    pub tile_size: u32,
    /// Document bounds in full resolution pixels.
    pub image: RectI,
    pub color_space: ColorSpace,
}
impl RenderContext {
    /// Side length of the produced tile.
    #[must_use]
    pub fn extent(&self) -> u32 {
        self.resolution.tile_extent(self.tile_size)
    }
    #[must_use]
    pub fn transparent(&self) -> Tile {
        Tile::transparent(self.extent())
    }
    /// Full resolution rect covered by the produced tile.
    #[must_use]
    pub fn document_rect(&self) -> RectI {
        self.tile.pixel_rect(self.tile_size)
    }
    /// Document-space top-left of a local pixel. Each local pixel covers `divisor` document
    /// pixels per side.
    #[must_use]
    pub fn document_pos(&self, local: [u32; 2]) -> [i32; 2] {
        let rect = self.document_rect();
        let div = self.resolution.divisor() as i32;
        [rect.x + local[0] as i32 * div, rect.y + local[1] as i32 * div]
    }
}

#[derive(
    Clone,
    PartialEq,
    Eq,
    Hash,
    Debug,
    strum::AsRefStr,
    strum::IntoStaticStr,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
#[strum(serialize_all = "snake_case")]
pub enum ParamValue {
    Bool(bool),
    Float(FiniteF32),
    Text(String),
    Color(Rgba8),
    Matrix(ColorMatrix),
    Shape(Option<Shape>),
    BlendMode(BlendMode),
}
impl ParamValue {
    pub fn bool(self, name: &'static str) -> Result<bool, ParamError> {
        match self {
            Self::Bool(v) => Ok(v),
            other => Err(ParamError::wrong_type(name, "bool", &other)),
        }
    }
    pub fn float(self, name: &'static str) -> Result<FiniteF32, ParamError> {
        match self {
            Self::Float(v) => Ok(v),
            other => Err(ParamError::wrong_type(name, "float", &other)),
        }
    }
    pub fn text(self, name: &'static str) -> Result<String, ParamError> {
        match self {
            Self::Text(v) => Ok(v),
            other => Err(ParamError::wrong_type(name, "text", &other)),
        }
    }
    pub fn color(self, name: &'static str) -> Result<Rgba8, ParamError> {
        match self {
            Self::Color(v) => Ok(v),
            other => Err(ParamError::wrong_type(name, "color", &other)),
        }
    }
    pub fn matrix(self, name: &'static str) -> Result<ColorMatrix, ParamError> {
        match self {
            Self::Matrix(v) => Ok(v),
            other => Err(ParamError::wrong_type(name, "matrix", &other)),
        }
    }
    pub fn shape(self, name: &'static str) -> Result<Option<Shape>, ParamError> {
        match self {
            Self::Shape(v) => Ok(v),
            other => Err(ParamError::wrong_type(name, "shape", &other)),
        }
    }
    pub fn blend_mode(self, name: &'static str) -> Result<BlendMode, ParamError> {
        match self {
            Self::BlendMode(v) => Ok(v),
            other => Err(ParamError::wrong_type(name, "blend_mode", &other)),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ParamError {
    #[error("{kind:?} has no parameter {name:?}")]
    Unknown { kind: NodeKind, name: String },
    #[error("parameter {name:?} expects {expected}, got {got}")]
    WrongType {
        name: &'static str,
        expected: &'static str,
        got: String,
    },
    #[error("value for {name:?} is out of range")]
    OutOfRange { name: &'static str },
}
impl ParamError {
    fn wrong_type(name: &'static str, expected: &'static str, got: &ParamValue) -> Self {
        Self::WrongType {
            name,
            expected,
            got: got.as_ref().to_owned(),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    #[error("input {socket} carries {got:?}, expected {expected:?}")]
    InputType {
        socket: usize,
        expected: SocketType,
        got: SocketType,
    },
}

/// Raster content owned by a layer node.
pub struct RasterContent {
    pub image: crate::tile::TileStore,
    pub mask: Option<crate::tile::TileStore>,
}
impl RasterContent {
    /// Deep copy of the committed state of both stores.
    #[must_use]
    pub fn clone_committed(&self) -> Self {
        Self {
            image: self.image.clone_committed(),
            mask: self.mask.as_ref().map(crate::tile::TileStore::clone_committed),
        }
    }
}

/// A processing node.
///
/// Nodes never see the graph. They are handed the values on their inputs (`None` where
/// unconnected, in which case the node supplies its own default) and return one value per
/// output socket.
pub trait Node: Send + Sync {
    fn kind(&self) -> NodeKind;
    fn inputs(&self) -> &'static [SocketDesc];
    fn outputs(&self) -> &'static [SocketDesc];
    /// Current value of every parameter, in a stable order.
    fn parameters(&self) -> Vec<(&'static str, ParamValue)>;
    /// Set a parameter, returning the previous value. On error `self` is unchanged.
    fn set_parameter(&mut self, name: &str, value: ParamValue) -> Result<ParamValue, ParamError>;
    /// Feed everything the output depends on, besides the inputs, into `hasher`.
    fn hash_content(&self, ctx: &RenderContext, hasher: &mut ContentHasher);
    fn execute(&self, ctx: &RenderContext, inputs: &[Option<&Value>]) -> Result<Outputs, NodeError>;
    /// Deep copy. Owned pixel content is copied, never shared.
    fn clone_node(&self) -> Box<dyn Node>;

    fn structure(&self) -> Option<StructureKind> {
        None
    }
    fn raster(&self) -> Option<&RasterContent> {
        None
    }
    fn raster_mut(&mut self) -> Option<&mut RasterContent> {
        None
    }
    /// Name, visibility and blend of a layer stack member.
    fn properties(&self) -> Option<&super::nodes::MemberProperties> {
        None
    }
    /// Convenience lookup of a single parameter.
    fn parameter(&self, name: &str) -> Option<ParamValue> {
        self.parameters()
            .into_iter()
            .find_map(|(n, v)| (n == name).then_some(v))
    }
    /// Whether `name` exists and takes values of the same type as `value`. Range checks are
    /// left to [`Self::set_parameter`].
    fn check_parameter(&self, name: &str, value: &ParamValue) -> Result<(), ParamError> {
        let (name, current) = self
            .parameters()
            .into_iter()
            .find(|(n, _)| *n == name)
            .ok_or_else(|| ParamError::Unknown {
                kind: self.kind(),
                name: name.to_owned(),
            })?;
        if std::mem::discriminant(&current) != std::mem::discriminant(value) {
            return Err(ParamError::WrongType {
                name,
                expected: (&current).into(),
                got: value.as_ref().to_owned(),
            });
        }
        Ok(())
    }
}

/// Resolve an optional image input, defaulting to a transparent tile.
pub(crate) fn image_input(
    ctx: &RenderContext,
    inputs: &[Option<&Value>],
    socket: usize,
) -> Result<Arc<Tile>, NodeError> {
    match inputs.get(socket).copied().flatten() {
        None => Ok(Arc::new(ctx.transparent())),
        Some(Value::Image(image)) => Ok(image.clone()),
        Some(other) => Err(NodeError::InputType {
            socket,
            expected: SocketType::Image,
            got: other.ty(),
        }),
    }
}

/// Resolve an optional non-image input with `get`, `None` if unconnected.
pub(crate) fn typed_input<'v, T>(
    inputs: &[Option<&'v Value>],
    socket: usize,
    expected: SocketType,
    get: impl FnOnce(&'v Value) -> Option<T>,
) -> Result<Option<T>, NodeError> {
    match inputs.get(socket).copied().flatten() {
        None => Ok(None),
        Some(value) => get(value).map(Some).ok_or(NodeError::InputType {
            socket,
            expected,
            got: value.ty(),
        }),
    }
}
