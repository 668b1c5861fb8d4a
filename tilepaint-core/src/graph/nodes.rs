//! Built-in node kinds.

use std::hash::Hash;
use std::sync::Arc;

use super::node::{
    image_input, typed_input, Node, NodeError, NodeKind, Outputs, ParamError, ParamValue,
    RasterContent, RenderContext, SocketDesc, SocketType, StructureKind, Value,
};
use crate::blend::Blend;
use crate::color::{ColorMatrix, Rgba8};
use crate::tile::{Shape, Tile, TileStore, TileStoreError};
use crate::util::{ContentHasher, FiniteF32};

const IMAGE_OUT: &[SocketDesc] = &[SocketDesc::new("image", SocketType::Image)];

fn composite(ctx: &RenderContext, blend: &Blend, content: &Tile, background: &Tile) -> Arc<Tile> {
    let mut out = background.clone();
    blend.rows(ctx.color_space, content.pixels(), out.pixels_mut());
    Arc::new(out)
}

/// Properties shared by every layer stack member.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MemberProperties {
    pub name: String,
    pub visible: bool,
    pub blend: Blend,
}
impl MemberProperties {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            visible: true,
            blend: Blend::default(),
        }
    }
    fn parameters(&self) -> [(&'static str, ParamValue); 5] {
        [
            ("name", ParamValue::Text(self.name.clone())),
            ("visible", ParamValue::Bool(self.visible)),
            ("blend_mode", ParamValue::BlendMode(self.blend.mode)),
            ("opacity", ParamValue::Float(self.blend.opacity)),
            ("alpha_clip", ParamValue::Bool(self.blend.alpha_clip)),
        ]
    }
    /// `Ok(None)` if `name` is not a member property.
    fn set(&mut self, name: &str, value: ParamValue) -> Result<Option<ParamValue>, ParamError> {
        let old = match name {
            "name" => ParamValue::Text(std::mem::replace(&mut self.name, value.text("name")?)),
            "visible" => ParamValue::Bool(std::mem::replace(
                &mut self.visible,
                value.bool("visible")?,
            )),
            "blend_mode" => ParamValue::BlendMode(std::mem::replace(
                &mut self.blend.mode,
                value.blend_mode("blend_mode")?,
            )),
            "opacity" => {
                let opacity = value.float("opacity")?;
                if !(0.0..=1.0).contains(&opacity.get()) {
                    return Err(ParamError::OutOfRange { name: "opacity" });
                }
                ParamValue::Float(std::mem::replace(&mut self.blend.opacity, opacity))
            }
            "alpha_clip" => ParamValue::Bool(std::mem::replace(
                &mut self.blend.alpha_clip,
                value.bool("alpha_clip")?,
            )),
            _ => return Ok(None),
        };
        Ok(Some(old))
    }
    fn hash_render(&self, hasher: &mut ContentHasher) {
        // The name does not affect pixels.
        self.visible.hash(hasher);
        self.blend.hash(hasher);
    }
}

fn unknown(kind: NodeKind, name: &str) -> ParamError {
    ParamError::Unknown {
        kind,
        name: name.to_owned(),
    }
}

pub struct OutputNode;
impl Node for OutputNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Output
    }
    fn inputs(&self) -> &'static [SocketDesc] {
        IMAGE_OUT
    }
    fn outputs(&self) -> &'static [SocketDesc] {
        IMAGE_OUT
    }
    fn parameters(&self) -> Vec<(&'static str, ParamValue)> {
        Vec::new()
    }
    fn set_parameter(&mut self, name: &str, _: ParamValue) -> Result<ParamValue, ParamError> {
        Err(unknown(NodeKind::Output, name))
    }
    fn hash_content(&self, _: &RenderContext, _: &mut ContentHasher) {}
    fn execute(&self, ctx: &RenderContext, inputs: &[Option<&Value>]) -> Result<Outputs, NodeError> {
        Ok(smallvec::smallvec![Value::Image(image_input(ctx, inputs, 0)?)])
    }
    fn clone_node(&self) -> Box<dyn Node> {
        Box::new(Self)
    }
}

const LAYER_INPUTS: &[SocketDesc] = &[
    SocketDesc::new("background", SocketType::Image),
    SocketDesc::new("filter", SocketType::Matrix),
];

/// A member holding raster content, with an optional visibility mask.
pub struct RasterLayer {
    pub properties: MemberProperties,
    pub content: RasterContent,
}
impl RasterLayer {
    pub fn new(name: impl Into<String>, size: [u32; 2], tile_size: u32) -> Result<Self, TileStoreError> {
        Ok(Self {
            properties: MemberProperties::named(name),
            content: RasterContent {
                image: TileStore::new(size, tile_size)?,
                mask: None,
            },
        })
    }
}
impl Node for RasterLayer {
    fn kind(&self) -> NodeKind {
        NodeKind::RasterLayer
    }
    fn inputs(&self) -> &'static [SocketDesc] {
        LAYER_INPUTS
    }
    fn outputs(&self) -> &'static [SocketDesc] {
        IMAGE_OUT
    }
    fn parameters(&self) -> Vec<(&'static str, ParamValue)> {
        self.properties.parameters().into()
    }
    fn set_parameter(&mut self, name: &str, value: ParamValue) -> Result<ParamValue, ParamError> {
        self.properties
            .set(name, value)?
            .ok_or_else(|| unknown(NodeKind::RasterLayer, name))
    }
    fn hash_content(&self, ctx: &RenderContext, hasher: &mut ContentHasher) {
        self.properties.hash_render(hasher);
        self.content.image.size().hash(hasher);
        self.content.image.tile_generation(ctx.tile).hash(hasher);
        match &self.content.mask {
            Some(mask) => (true, mask.tile_generation(ctx.tile)).hash(hasher),
            None => false.hash(hasher),
        }
    }
    fn execute(&self, ctx: &RenderContext, inputs: &[Option<&Value>]) -> Result<Outputs, NodeError> {
        let background = image_input(ctx, inputs, 0)?;
        let filter = typed_input(inputs, 1, SocketType::Matrix, Value::matrix)?;
        let Some(tile) = self
            .content
            .image
            .read_tile(ctx.tile, ctx.resolution)
            .filter(|_| self.properties.visible)
        else {
            return Ok(smallvec::smallvec![Value::Image(background)]);
        };
        let mut tile = tile.clone();
        if let Some(mask) = &self.content.mask {
            match mask.read_tile(ctx.tile, ctx.resolution) {
                // Nothing revealed.
                None => return Ok(smallvec::smallvec![Value::Image(background)]),
                Some(mask) => {
                    for (px, m) in tile.pixels_mut().iter_mut().zip(mask.pixels()) {
                        let cover = f32::from(m.a) / 255.0;
                        *px = Rgba8::from_f32(px.to_f32().map(|c| c * cover));
                    }
                }
            }
        }
        if let Some(filter) = filter {
            for px in tile.pixels_mut() {
                *px = filter.apply(*px);
            }
        }
        Ok(smallvec::smallvec![Value::Image(composite(
            ctx,
            &self.properties.blend,
            &tile,
            &background
        ))])
    }
    fn clone_node(&self) -> Box<dyn Node> {
        Box::new(Self {
            properties: self.properties.clone(),
            content: self.content.clone_committed(),
        })
    }
    fn structure(&self) -> Option<StructureKind> {
        Some(StructureKind::Layer)
    }
    fn raster(&self) -> Option<&RasterContent> {
        Some(&self.content)
    }
    fn raster_mut(&mut self) -> Option<&mut RasterContent> {
        Some(&mut self.content)
    }
    fn properties(&self) -> Option<&MemberProperties> {
        Some(&self.properties)
    }
}

const VECTOR_INPUTS: &[SocketDesc] = &[
    SocketDesc::new("background", SocketType::Image),
    SocketDesc::new("shape", SocketType::Shape),
    SocketDesc::new("color", SocketType::Color),
];

/// A member rasterizing one filled shape at whatever resolution is requested.
pub struct VectorLayer {
    pub properties: MemberProperties,
    /// Used while the `shape` input is unconnected.
    pub shape: Option<Shape>,
    /// Used while the `color` input is unconnected.
    pub color: Rgba8,
    pub antialias: bool,
}
impl VectorLayer {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            properties: MemberProperties::named(name),
            shape: None,
            color: Rgba8::BLACK,
            antialias: true,
        }
    }
}
impl Node for VectorLayer {
    fn kind(&self) -> NodeKind {
        NodeKind::VectorLayer
    }
    fn inputs(&self) -> &'static [SocketDesc] {
        VECTOR_INPUTS
    }
    fn outputs(&self) -> &'static [SocketDesc] {
        IMAGE_OUT
    }
    fn parameters(&self) -> Vec<(&'static str, ParamValue)> {
        let mut params: Vec<_> = self.properties.parameters().into();
        params.extend([
            ("shape", ParamValue::Shape(self.shape.clone())),
            ("color", ParamValue::Color(self.color)),
            ("antialias", ParamValue::Bool(self.antialias)),
        ]);
        params
    }
    fn set_parameter(&mut self, name: &str, value: ParamValue) -> Result<ParamValue, ParamError> {
        if let Some(old) = self.properties.set(name, value.clone())? {
            return Ok(old);
        }
        match name {
            "shape" => Ok(ParamValue::Shape(std::mem::replace(
                &mut self.shape,
                value.shape("shape")?,
            ))),
            "color" => Ok(ParamValue::Color(std::mem::replace(
                &mut self.color,
                value.color("color")?,
            ))),
            "antialias" => Ok(ParamValue::Bool(std::mem::replace(
                &mut self.antialias,
                value.bool("antialias")?,
            ))),
            _ => Err(unknown(NodeKind::VectorLayer, name)),
        }
    }
    fn hash_content(&self, _: &RenderContext, hasher: &mut ContentHasher) {
        self.properties.hash_render(hasher);
        self.shape.hash(hasher);
        self.color.hash(hasher);
        self.antialias.hash(hasher);
    }
    fn execute(&self, ctx: &RenderContext, inputs: &[Option<&Value>]) -> Result<Outputs, NodeError> {
        let background = image_input(ctx, inputs, 0)?;
        let shape = typed_input(inputs, 1, SocketType::Shape, Value::shape)?
            .unwrap_or(self.shape.as_ref());
        let color = typed_input(inputs, 2, SocketType::Color, Value::color)?.unwrap_or(self.color);
        let visible_rect = ctx.document_rect().intersect(&ctx.image);
        let Some(shape) = shape.filter(|shape| {
            self.properties.visible && !shape.bounds().intersect(&visible_rect).is_empty()
        }) else {
            return Ok(smallvec::smallvec![Value::Image(background)]);
        };

        let extent = ctx.extent();
        let scale = ctx.resolution.divisor() as f32;
        let straight = color.to_f32();
        let mut content = ctx.transparent();
        for ly in 0..extent {
            for lx in 0..extent {
                let [x, y] = ctx.document_pos([lx, ly]);
                if !ctx.image.contains(x, y) {
                    continue;
                }
                let coverage = shape.coverage(x as f32, y as f32, scale, self.antialias);
                if coverage > 0.0 {
                    content.set(lx, ly, Rgba8::from_f32(straight.map(|c| c * coverage)));
                }
            }
        }
        Ok(smallvec::smallvec![Value::Image(composite(
            ctx,
            &self.properties.blend,
            &content,
            &background
        ))])
    }
    fn clone_node(&self) -> Box<dyn Node> {
        Box::new(Self {
            properties: self.properties.clone(),
            shape: self.shape.clone(),
            color: self.color,
            antialias: self.antialias,
        })
    }
    fn structure(&self) -> Option<StructureKind> {
        Some(StructureKind::Layer)
    }
    fn properties(&self) -> Option<&MemberProperties> {
        Some(&self.properties)
    }
}

const FOLDER_INPUTS: &[SocketDesc] = &[
    SocketDesc::new("background", SocketType::Image),
    SocketDesc::new("content", SocketType::Image),
];

/// A member whose content is its own stack, composited as a single image.
pub struct Folder {
    pub properties: MemberProperties,
}
impl Folder {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            properties: MemberProperties::named(name),
        }
    }
}
impl Node for Folder {
    fn kind(&self) -> NodeKind {
        NodeKind::Folder
    }
    fn inputs(&self) -> &'static [SocketDesc] {
        FOLDER_INPUTS
    }
    fn outputs(&self) -> &'static [SocketDesc] {
        IMAGE_OUT
    }
    fn parameters(&self) -> Vec<(&'static str, ParamValue)> {
        self.properties.parameters().into()
    }
    fn set_parameter(&mut self, name: &str, value: ParamValue) -> Result<ParamValue, ParamError> {
        self.properties
            .set(name, value)?
            .ok_or_else(|| unknown(NodeKind::Folder, name))
    }
    fn hash_content(&self, _: &RenderContext, hasher: &mut ContentHasher) {
        self.properties.hash_render(hasher);
    }
    fn execute(&self, ctx: &RenderContext, inputs: &[Option<&Value>]) -> Result<Outputs, NodeError> {
        let background = image_input(ctx, inputs, StructureKind::BACKGROUND)?;
        if !self.properties.visible || inputs.get(StructureKind::CONTENT).copied().flatten().is_none() {
            return Ok(smallvec::smallvec![Value::Image(background)]);
        }
        let content = image_input(ctx, inputs, StructureKind::CONTENT)?;
        Ok(smallvec::smallvec![Value::Image(composite(
            ctx,
            &self.properties.blend,
            &content,
            &background
        ))])
    }
    fn clone_node(&self) -> Box<dyn Node> {
        Box::new(Self {
            properties: self.properties.clone(),
        })
    }
    fn structure(&self) -> Option<StructureKind> {
        Some(StructureKind::Folder)
    }
    fn properties(&self) -> Option<&MemberProperties> {
        Some(&self.properties)
    }
}

/// Generic get/set for nodes whose only parameter is a [`Blend`].
fn blend_parameters(blend: &Blend) -> Vec<(&'static str, ParamValue)> {
    vec![
        ("blend_mode", ParamValue::BlendMode(blend.mode)),
        ("opacity", ParamValue::Float(blend.opacity)),
        ("alpha_clip", ParamValue::Bool(blend.alpha_clip)),
    ]
}

const MERGE_INPUTS: &[SocketDesc] = &[
    SocketDesc::new("base", SocketType::Image),
    SocketDesc::new("top", SocketType::Image),
];

pub struct Merge {
    pub blend: Blend,
}
impl Node for Merge {
    fn kind(&self) -> NodeKind {
        NodeKind::Merge
    }
    fn inputs(&self) -> &'static [SocketDesc] {
        MERGE_INPUTS
    }
    fn outputs(&self) -> &'static [SocketDesc] {
        IMAGE_OUT
    }
    fn parameters(&self) -> Vec<(&'static str, ParamValue)> {
        blend_parameters(&self.blend)
    }
    fn set_parameter(&mut self, name: &str, value: ParamValue) -> Result<ParamValue, ParamError> {
        // Reuse the member validation, minus the properties merge doesn't have.
        let mut props = MemberProperties {
            name: String::new(),
            visible: true,
            blend: self.blend,
        };
        match name {
            "blend_mode" | "opacity" | "alpha_clip" => {
                let old = props
                    .set(name, value)?
                    .ok_or_else(|| unknown(NodeKind::Merge, name))?;
                self.blend = props.blend;
                Ok(old)
            }
            _ => Err(unknown(NodeKind::Merge, name)),
        }
    }
    fn hash_content(&self, _: &RenderContext, hasher: &mut ContentHasher) {
        self.blend.hash(hasher);
    }
    fn execute(&self, ctx: &RenderContext, inputs: &[Option<&Value>]) -> Result<Outputs, NodeError> {
        let base = image_input(ctx, inputs, 0)?;
        let top = image_input(ctx, inputs, 1)?;
        Ok(smallvec::smallvec![Value::Image(composite(ctx, &self.blend, &top, &base))])
    }
    fn clone_node(&self) -> Box<dyn Node> {
        Box::new(Self { blend: self.blend })
    }
}

const FILTER_INPUTS: &[SocketDesc] = &[
    SocketDesc::new("image", SocketType::Image),
    SocketDesc::new("matrix", SocketType::Matrix),
];

/// Applies a color matrix to every pixel of its input.
pub struct ColorMatrixFilter {
    /// Used while the `matrix` input is unconnected.
    pub matrix: ColorMatrix,
}
impl Node for ColorMatrixFilter {
    fn kind(&self) -> NodeKind {
        NodeKind::ColorMatrix
    }
    fn inputs(&self) -> &'static [SocketDesc] {
        FILTER_INPUTS
    }
    fn outputs(&self) -> &'static [SocketDesc] {
        IMAGE_OUT
    }
    fn parameters(&self) -> Vec<(&'static str, ParamValue)> {
        vec![("matrix", ParamValue::Matrix(self.matrix))]
    }
    fn set_parameter(&mut self, name: &str, value: ParamValue) -> Result<ParamValue, ParamError> {
        match name {
            "matrix" => Ok(ParamValue::Matrix(std::mem::replace(
                &mut self.matrix,
                value.matrix("matrix")?,
            ))),
            _ => Err(unknown(NodeKind::ColorMatrix, name)),
        }
    }
    fn hash_content(&self, _: &RenderContext, hasher: &mut ContentHasher) {
        self.matrix.hash(hasher);
    }
    fn execute(&self, ctx: &RenderContext, inputs: &[Option<&Value>]) -> Result<Outputs, NodeError> {
        let image = image_input(ctx, inputs, 0)?;
        let matrix = typed_input(inputs, 1, SocketType::Matrix, Value::matrix)?
            .unwrap_or(&self.matrix);
        let mut out = (*image).clone();
        for px in out.pixels_mut() {
            *px = matrix.apply(*px);
        }
        Ok(smallvec::smallvec![Value::Image(Arc::new(out))])
    }
    fn clone_node(&self) -> Box<dyn Node> {
        Box::new(Self {
            matrix: self.matrix,
        })
    }
}

/// A node with no inputs producing one constant.
macro_rules! constant_node {
    ($name:ident, $kind:ident, $field:ident: $ty:ty, $socket:literal, $socket_ty:ident,
     $param:ident, |$this:ident| $value:expr) => {
        pub struct $name {
            pub $field: $ty,
        }
        impl Node for $name {
            fn kind(&self) -> NodeKind {
                NodeKind::$kind
            }
            fn inputs(&self) -> &'static [SocketDesc] {
                &[]
            }
            fn outputs(&self) -> &'static [SocketDesc] {
                const OUT: &[SocketDesc] = &[SocketDesc::new($socket, SocketType::$socket_ty)];
                OUT
            }
            fn parameters(&self) -> Vec<(&'static str, ParamValue)> {
                vec![($socket, ParamValue::$socket_ty(self.$field.clone()))]
            }
            fn set_parameter(
                &mut self,
                name: &str,
                value: ParamValue,
            ) -> Result<ParamValue, ParamError> {
                if name != $socket {
                    return Err(unknown(NodeKind::$kind, name));
                }
                Ok(ParamValue::$socket_ty(std::mem::replace(
                    &mut self.$field,
                    value.$param($socket)?,
                )))
            }
            fn hash_content(&self, _: &RenderContext, hasher: &mut ContentHasher) {
                self.$field.hash(hasher);
            }
            fn execute(
                &self,
                _: &RenderContext,
                _: &[Option<&Value>],
            ) -> Result<Outputs, NodeError> {
                let $this = self;
                Ok(smallvec::smallvec![$value])
            }
            fn clone_node(&self) -> Box<dyn Node> {
                Box::new(Self {
                    $field: self.$field.clone(),
                })
            }
        }
    };
}

constant_node!(ColorSource, Color, color: Rgba8, "color", Color, color, |this| Value::Color(
    this.color
));
constant_node!(
    MatrixSource,
    Matrix,
    matrix: ColorMatrix,
    "matrix",
    Matrix,
    matrix,
    |this| Value::Matrix(this.matrix)
);
constant_node!(
    ShapeSource,
    Shape,
    shape: Option<Shape>,
    "shape",
    Shape,
    shape,
    |this| Value::Shape(this.shape.clone().map(Arc::new))
);

impl Default for Merge {
    fn default() -> Self {
        Self {
            blend: Blend::default(),
        }
    }
}
impl Default for ColorMatrixFilter {
    fn default() -> Self {
        Self {
            matrix: ColorMatrix::identity(),
        }
    }
}
impl Default for ColorSource {
    fn default() -> Self {
        Self {
            color: Rgba8::BLACK,
        }
    }
}
impl Default for MatrixSource {
    fn default() -> Self {
        Self {
            matrix: ColorMatrix::identity(),
        }
    }
}
impl Default for ShapeSource {
    fn default() -> Self {
        Self { shape: None }
    }
}

/// Opacity parameter helper for callers building [`ParamValue`]s from plain floats.
#[must_use]
pub fn opacity(value: f32) -> ParamValue {
    ParamValue::Float(FiniteF32::clamped(value, 0.0, 1.0))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::color::ColorSpace;
    use crate::tile::{DrawOperation, Resolution, TileCoord};
    use crate::util::RectI;

    fn ctx(resolution: Resolution) -> RenderContext {
        RenderContext {
            frame: 0,
            resolution,
            tile: TileCoord::new(0, 0),
            tile_size: 16,
            image: RectI::from_size([16, 16]),
            color_space: ColorSpace::Srgb,
        }
    }
    fn image(outputs: &Outputs) -> &Tile {
        outputs[0].image().unwrap()
    }

    #[test]
    fn raster_layer_composites_over_background() {
        let mut layer = RasterLayer::new("a", [16, 16], 16).unwrap();
        layer.content.image.enqueue(DrawOperation::Shape {
            shape: Shape::rectangle(0.0, 0.0, 8.0, 16.0),
            color: Rgba8::WHITE,
            blend: Blend::default(),
            antialias: false,
        });
        layer.content.image.commit();
        let ctx = ctx(Resolution::Full);
        let bg = Value::Image(Arc::new(Tile::filled(16, Rgba8::BLACK)));
        let out = layer.execute(&ctx, &[Some(&bg), None]).unwrap();
        assert_eq!(image(&out).get(0, 0), Rgba8::WHITE);
        assert_eq!(image(&out).get(15, 0), Rgba8::BLACK);

        layer.set_parameter("visible", ParamValue::Bool(false)).unwrap();
        let out = layer.execute(&ctx, &[Some(&bg), None]).unwrap();
        assert_eq!(image(&out).get(0, 0), Rgba8::BLACK);
    }
    #[test]
    fn mask_hides_content() {
        let mut layer = RasterLayer::new("a", [16, 16], 16).unwrap();
        layer.content.image.enqueue(DrawOperation::Shape {
            shape: Shape::rectangle(0.0, 0.0, 16.0, 16.0),
            color: Rgba8::WHITE,
            blend: Blend::default(),
            antialias: false,
        });
        layer.content.image.commit();
        let mut mask = TileStore::new([16, 16], 16).unwrap();
        mask.enqueue(DrawOperation::Shape {
            shape: Shape::rectangle(0.0, 0.0, 4.0, 16.0),
            color: Rgba8::WHITE,
            blend: Blend::default(),
            antialias: false,
        });
        mask.commit();
        layer.content.mask = Some(mask);
        let out = layer.execute(&ctx(Resolution::Full), &[None, None]).unwrap();
        assert_eq!(image(&out).get(0, 0), Rgba8::WHITE);
        assert_eq!(image(&out).get(8, 0), Rgba8::TRANSPARENT);
    }
    #[test]
    fn vector_layer_scales_with_resolution() {
        let mut layer = VectorLayer::new("v");
        layer.antialias = false;
        layer.color = Rgba8::WHITE;
        layer.shape = Some(Shape::rectangle(0.0, 0.0, 8.0, 8.0));
        let full = layer.execute(&ctx(Resolution::Full), &[None, None, None]).unwrap();
        assert_eq!(image(&full).get(7, 7), Rgba8::WHITE);
        assert_eq!(image(&full).get(8, 8), Rgba8::TRANSPARENT);
        let half = layer.execute(&ctx(Resolution::Half), &[None, None, None]).unwrap();
        assert_eq!(image(&half).size(), 8);
        assert_eq!(image(&half).get(3, 3), Rgba8::WHITE);
        assert_eq!(image(&half).get(4, 4), Rgba8::TRANSPARENT);
    }
    #[test]
    fn set_parameter_validates() {
        let mut layer = VectorLayer::new("v");
        assert_eq!(
            layer.set_parameter("opacity", ParamValue::Float(FiniteF32::ONE)),
            Ok(ParamValue::Float(FiniteF32::ONE))
        );
        assert_eq!(
            layer.set_parameter("opacity", opacity(2.0)),
            Ok(ParamValue::Float(FiniteF32::ONE))
        );
        assert!(layer
            .set_parameter("opacity", ParamValue::Float(FiniteF32::new(1.5).unwrap()))
            .is_err());
        assert!(matches!(
            layer.set_parameter("bogus", ParamValue::Bool(true)),
            Err(ParamError::Unknown { .. })
        ));
        let mut color = ColorSource::default();
        assert_eq!(
            color.set_parameter("color", ParamValue::Color(Rgba8::WHITE)),
            Ok(ParamValue::Color(Rgba8::BLACK))
        );
        assert_eq!(color.parameter("color"), Some(ParamValue::Color(Rgba8::WHITE)));
    }
    #[test]
    fn filter_applies_matrix() {
        let filter = ColorMatrixFilter {
            matrix: ColorMatrix::invert(),
        };
        let white = Value::Image(Arc::new(Tile::filled(16, Rgba8::WHITE)));
        let out = filter.execute(&ctx(Resolution::Full), &[Some(&white), None]).unwrap();
        assert_eq!(image(&out).get(3, 3), Rgba8::BLACK);
        let identity = Value::Matrix(ColorMatrix::identity());
        let out = filter
            .execute(&ctx(Resolution::Full), &[Some(&white), Some(&identity)])
            .unwrap();
        assert_eq!(image(&out).get(3, 3), Rgba8::WHITE);
    }
}
