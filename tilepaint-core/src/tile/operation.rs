//! Draw operations queued against a [`super::TileStore`].

use super::{Shape, Surface, Tile, TileCoord, TileDelta};
use crate::blend::Blend;
use crate::color::{ColorSpace, Rgba8};
use crate::util::RectI;

/// One pending edit of a tile store. Nothing here touches committed content until the store
/// commits its queue.
///
/// Operations outside of the image bounds are clipped, never an error.
#[derive(Clone, Debug)]
pub enum DrawOperation {
    /// Fill a shape with a solid color.
    Shape {
        shape: Shape,
        color: Rgba8,
        blend: Blend,
        antialias: bool,
    },
    /// Composite an image with its top-left corner at `position`.
    Blit {
        surface: Surface,
        position: [i32; 2],
        blend: Blend,
    },
    /// Remove all content.
    Clear,
    /// Make a region transparent.
    ClearRegion(RectI),
    /// Change the image bounds, moving existing content by `offset` pixels.
    /// Content falling outside the new bounds is discarded.
    Resize { size: [u32; 2], offset: [i32; 2] },
    /// Raw per-tile pixel writes. `None` replaces masked pixels outright, `Some` composites them.
    WritePixels {
        deltas: hashbrown::HashMap<TileCoord, TileDelta>,
        blend: Option<Blend>,
    },
}

impl DrawOperation {
    /// Tiles this operation may modify, given the current image bounds and allocated tiles.
    pub(super) fn affected_tiles<'a>(
        &self,
        tile_size: u32,
        image: RectI,
        existing: impl Iterator<Item = &'a TileCoord>,
    ) -> hashbrown::HashSet<TileCoord> {
        let covering = |rect: RectI| TileCoord::covering(rect.intersect(&image), tile_size);
        match self {
            Self::Shape { shape, .. } => covering(shape.bounds()).collect(),
            Self::Blit {
                surface, position, ..
            } => covering(RectI::new(
                position[0],
                position[1],
                surface.width(),
                surface.height(),
            ))
            .collect(),
            Self::ClearRegion(rect) => {
                let existing: hashbrown::HashSet<_> = existing.copied().collect();
                covering(*rect).filter(|c| existing.contains(c)).collect()
            }
            Self::Clear => existing.copied().collect(),
            Self::Resize { size, .. } => existing
                .copied()
                .chain(TileCoord::covering(RectI::from_size(*size), tile_size))
                .collect(),
            Self::WritePixels { deltas, .. } => deltas
                .keys()
                .filter(|coord| !coord.pixel_rect(tile_size).intersect(&image).is_empty())
                .copied()
                .collect(),
        }
    }
    /// Tight pixel bounds of what this operation can touch, clipped to `image`.
    pub(super) fn pixel_bounds(&self, tile_size: u32, image: RectI, current: RectI) -> RectI {
        match self {
            Self::Shape { shape, .. } => shape.bounds().intersect(&image),
            Self::Blit {
                surface, position, ..
            } => RectI::new(position[0], position[1], surface.width(), surface.height())
                .intersect(&image),
            Self::ClearRegion(rect) => rect.intersect(&image).intersect(&current),
            Self::Clear => current,
            Self::Resize { size, .. } => current.union(&RectI::from_size(*size)),
            Self::WritePixels { deltas, .. } => deltas
                .keys()
                .map(|coord| coord.pixel_rect(tile_size).intersect(&image))
                .fold(RectI::default(), |acc, r| acc.union(&r)),
        }
    }
    /// Apply a per-tile operation to one tile, blending in `space`. `Clear` and `Resize` are
    /// whole-store operations handled by the store itself, and are ignored here.
    pub(super) fn apply_to_tile(
        &self,
        coord: TileCoord,
        image: RectI,
        space: ColorSpace,
        tile: &mut Tile,
    ) {
        let tile_size = tile.size();
        let tile_rect = coord.pixel_rect(tile_size);
        let region = tile_rect.intersect(&image);
        if region.is_empty() {
            return;
        }
        // Pixels in document space, handed out with their tile-local position.
        let pixels = move || {
            (region.y..region.bottom()).flat_map(move |y| {
                (region.x..region.right()).map(move |x| {
                    (
                        x,
                        y,
                        (x - tile_rect.x) as u32,
                        (y - tile_rect.y) as u32,
                    )
                })
            })
        };
        match self {
            Self::Shape {
                shape,
                color,
                blend,
                antialias,
            } => {
                let bounds = shape.bounds();
                for (x, y, lx, ly) in pixels() {
                    if !bounds.contains(x, y) {
                        continue;
                    }
                    let coverage = shape.coverage(x as f32, y as f32, 1.0, *antialias);
                    if coverage <= 0.0 {
                        continue;
                    }
                    let src = if coverage >= 1.0 {
                        *color
                    } else {
                        Rgba8::from_f32(color.to_f32().map(|c| c * coverage))
                    };
                    let dst = tile.get(lx, ly);
                    tile.set(lx, ly, blend.pixel(space, src, dst));
                }
            }
            Self::Blit {
                surface,
                position,
                blend,
            } => {
                for (x, y, lx, ly) in pixels() {
                    if let Some(src) = surface.get(x - position[0], y - position[1]) {
                        let dst = tile.get(lx, ly);
                        tile.set(lx, ly, blend.pixel(space, src, dst));
                    }
                }
            }
            Self::ClearRegion(rect) => {
                for (x, y, lx, ly) in pixels() {
                    if rect.contains(x, y) {
                        tile.set(lx, ly, Rgba8::TRANSPARENT);
                    }
                }
            }
            Self::WritePixels { deltas, blend } => {
                let Some(delta) = deltas.get(&coord) else {
                    return;
                };
                if delta.pixels.size() != tile_size {
                    log::warn!("pixel delta for {coord:?} has mismatched size, skipped");
                    return;
                }
                for (_, _, lx, ly) in pixels() {
                    if !delta.is_set(lx, ly) {
                        continue;
                    }
                    let src = delta.pixels.get(lx, ly);
                    let out = match blend {
                        None => src,
                        Some(blend) => blend.pixel(space, src, tile.get(lx, ly)),
                    };
                    tile.set(lx, ly, out);
                }
            }
            Self::Clear | Self::Resize { .. } => (),
        }
    }
}
