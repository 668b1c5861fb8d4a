//! # Tiles
//!
//! Raster content is stored as a sparse grid of fixed-size square tiles (chunks). Only
//! coordinates with content are allocated. Each tile can be viewed at several
//! [`Resolution`]s, the lower ones derived lazily from full resolution.

pub mod operation;
pub mod shape;
pub mod snapshot;
mod store;

pub use operation::DrawOperation;
pub use shape::Shape;
pub use store::{AffectedArea, TileStore, TileStoreError};

use crate::color::Rgba8;
use crate::util::RectI;

pub const DEFAULT_TILE_SIZE: u32 = 64;
pub const MIN_TILE_SIZE: u32 = 16;
pub const MAX_TILE_SIZE: u32 = 512;

/// Is `size` usable as a tile size? Must be a power of two, large enough that every
/// [`Resolution`] level keeps at least two pixels per side.
#[must_use]
pub fn is_valid_tile_size(size: u32) -> bool {
    size.is_power_of_two() && (MIN_TILE_SIZE..=MAX_TILE_SIZE).contains(&size)
}

/// Position of a tile in the tile grid, in units of tiles.
#[derive(
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Debug,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct TileCoord {
    pub x: i32,
    pub y: i32,
}
impl TileCoord {
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
    /// The tile containing the given pixel.
    #[must_use]
    pub fn containing(px: [i32; 2], tile_size: u32) -> Self {
        let size = tile_size as i32;
        Self::new(px[0].div_euclid(size), px[1].div_euclid(size))
    }
    /// Full-resolution pixel rect covered by this tile.
    #[must_use]
    pub fn pixel_rect(self, tile_size: u32) -> RectI {
        let size = tile_size as i32;
        RectI::new(
            self.x.saturating_mul(size),
            self.y.saturating_mul(size),
            tile_size,
            tile_size,
        )
    }
    #[must_use]
    pub fn offset(self, dx: i32, dy: i32) -> Self {
        Self::new(self.x.saturating_add(dx), self.y.saturating_add(dy))
    }
    /// Every tile touching `rect`. Empty rect yields nothing.
    pub fn covering(rect: RectI, tile_size: u32) -> impl Iterator<Item = Self> {
        let (min, max) = if rect.is_empty() {
            (Self::new(0, 0), Self::new(-1, -1))
        } else {
            (
                Self::containing([rect.x, rect.y], tile_size),
                Self::containing([rect.right() - 1, rect.bottom() - 1], tile_size),
            )
        };
        (min.y..=max.y).flat_map(move |y| (min.x..=max.x).map(move |x| Self::new(x, y)))
    }
}

/// The levels of detail each tile is available in.
#[derive(
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Debug,
    Default,
    strum::EnumIter,
    strum::AsRefStr,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    #[default]
    Full,
    Half,
    Quarter,
    Eighth,
}
impl Resolution {
    pub const COUNT: usize = 4;
    /// log2 of the downscale factor.
    #[must_use]
    pub fn level(self) -> u32 {
        match self {
            Self::Full => 0,
            Self::Half => 1,
            Self::Quarter => 2,
            Self::Eighth => 3,
        }
    }
    #[must_use]
    pub fn divisor(self) -> u32 {
        1 << self.level()
    }
    /// Side length of a tile at this resolution.
    #[must_use]
    pub fn tile_extent(self, tile_size: u32) -> u32 {
        tile_size >> self.level()
    }
    /// The next coarser level, or `None` for the coarsest.
    #[must_use]
    pub fn coarser(self) -> Option<Self> {
        match self {
            Self::Full => Some(Self::Half),
            Self::Half => Some(Self::Quarter),
            Self::Quarter => Some(Self::Eighth),
            Self::Eighth => None,
        }
    }
}

/// A square block of premultiplied pixels. Deep-copied on `clone`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Tile {
    size: u32,
    pixels: Box<[Rgba8]>,
}
impl std::fmt::Debug for Tile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tile")
            .field("size", &self.size)
            .field("opaque_pixels", &self.pixels.iter().filter(|p| p.a == 255).count())
            .finish_non_exhaustive()
    }
}
impl Tile {
    #[must_use]
    pub fn transparent(size: u32) -> Self {
        Self::filled(size, Rgba8::TRANSPARENT)
    }
    #[must_use]
    pub fn filled(size: u32, color: Rgba8) -> Self {
        Self {
            size,
            pixels: vec![color; (size as usize) * (size as usize)].into_boxed_slice(),
        }
    }
    /// Build from raw bytes in `RGBA8` premultiplied order. `None` if the length is wrong.
    #[must_use]
    pub fn from_bytes(size: u32, bytes: &[u8]) -> Option<Self> {
        let expected = (size as usize) * (size as usize) * 4;
        if bytes.len() != expected {
            return None;
        }
        let pixels: Box<[Rgba8]> = bytes
            .chunks_exact(4)
            .map(|c| Rgba8::premultiplied(c[0], c[1], c[2], c[3]))
            .collect();
        Some(Self { size, pixels })
    }
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.pixels)
    }
    #[must_use]
    pub fn size(&self) -> u32 {
        self.size
    }
    #[must_use]
    pub fn pixels(&self) -> &[Rgba8] {
        &self.pixels
    }
    pub fn pixels_mut(&mut self) -> &mut [Rgba8] {
        &mut self.pixels
    }
    fn index(&self, x: u32, y: u32) -> usize {
        (y as usize) * (self.size as usize) + (x as usize)
    }
    /// Panics if out of bounds.
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> Rgba8 {
        self.pixels[self.index(x, y)]
    }
    /// Panics if out of bounds.
    pub fn set(&mut self, x: u32, y: u32, px: Rgba8) {
        let idx = self.index(x, y);
        self.pixels[idx] = px;
    }
    #[must_use]
    pub fn is_transparent(&self) -> bool {
        self.pixels.iter().all(|px| px.is_transparent())
    }
    /// Box-filter down by a factor of two. Deterministic: same input, same bits.
    #[must_use]
    pub fn downsample(&self) -> Self {
        let half = (self.size / 2).max(1);
        let mut out = Self::transparent(half);
        for y in 0..half {
            for x in 0..half {
                let (sx, sy) = (x * 2, y * 2);
                let block = [(0, 0), (1, 0), (0, 1), (1, 1)]
                    .into_iter()
                    .filter(|(dx, dy)| sx + dx < self.size && sy + dy < self.size)
                    .map(|(dx, dy)| self.get(sx + dx, sy + dy));
                out.set(x, y, Rgba8::average(block));
            }
        }
        out
    }
}

/// An arbitrarily sized image, used to move pixels in and out of tile stores.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Surface {
    width: u32,
    height: u32,
    pixels: Vec<Rgba8>,
}
impl Surface {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![Rgba8::TRANSPARENT; (width as usize) * (height as usize)],
        }
    }
    /// `None` if `pixels` does not hold exactly `width * height` entries.
    #[must_use]
    pub fn from_pixels(width: u32, height: u32, pixels: Vec<Rgba8>) -> Option<Self> {
        ((width as usize) * (height as usize) == pixels.len()).then_some(Self {
            width,
            height,
            pixels,
        })
    }
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }
    #[must_use]
    pub fn pixels(&self) -> &[Rgba8] {
        &self.pixels
    }
    /// `None` if out of bounds.
    #[must_use]
    pub fn get(&self, x: i32, y: i32) -> Option<Rgba8> {
        let x = u32::try_from(x).ok().filter(|x| *x < self.width)?;
        let y = u32::try_from(y).ok().filter(|y| *y < self.height)?;
        self.pixels
            .get((y as usize) * (self.width as usize) + (x as usize))
            .copied()
    }
    pub fn set(&mut self, x: u32, y: u32, px: Rgba8) {
        if x < self.width && y < self.height {
            self.pixels[(y as usize) * (self.width as usize) + (x as usize)] = px;
        }
    }
    /// Copy a tile into this surface with its top-left at `at`. Clipped.
    pub fn paste_tile(&mut self, tile: &Tile, at: [i64; 2]) {
        for ty in 0..tile.size() {
            for tx in 0..tile.size() {
                let (x, y) = (at[0] + i64::from(tx), at[1] + i64::from(ty));
                if let (Ok(x), Ok(y)) = (u32::try_from(x), u32::try_from(y)) {
                    self.set(x, y, tile.get(tx, ty));
                }
            }
        }
    }
    /// Straight-alpha RGBA8 bytes, as expected by most image encoders.
    #[must_use]
    pub fn to_straight_bytes(&self) -> Vec<u8> {
        self.pixels.iter().flat_map(|px| px.to_straight()).collect()
    }
}

/// A sparse per-tile pixel delta: new pixels where `mask` is set, untouched elsewhere.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TileDelta {
    pub pixels: Tile,
    /// One bit per pixel, row-major.
    pub mask: bitvec::vec::BitVec,
}
impl TileDelta {
    #[must_use]
    pub fn empty(size: u32) -> Self {
        Self {
            pixels: Tile::transparent(size),
            mask: bitvec::vec::BitVec::repeat(false, (size as usize) * (size as usize)),
        }
    }
    /// A delta replacing every pixel of the tile.
    #[must_use]
    pub fn whole(pixels: Tile) -> Self {
        let len = pixels.pixels().len();
        Self {
            pixels,
            mask: bitvec::vec::BitVec::repeat(true, len),
        }
    }
    pub fn write(&mut self, x: u32, y: u32, px: Rgba8) {
        let idx = (y as usize) * (self.pixels.size() as usize) + (x as usize);
        self.pixels.set(x, y, px);
        self.mask.set(idx, true);
    }
    #[must_use]
    pub fn is_set(&self, x: u32, y: u32) -> bool {
        let idx = (y as usize) * (self.pixels.size() as usize) + (x as usize);
        self.mask.get(idx).is_some_and(|bit| *bit)
    }
    #[must_use]
    pub fn count(&self) -> usize {
        self.mask.count_ones()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    #[test]
    fn covering_rect() {
        let tiles: Vec<_> = TileCoord::covering(RectI::new(0, 0, 64, 64), 64).collect();
        assert_eq!(tiles, vec![TileCoord::new(0, 0)]);
        let tiles: Vec<_> = TileCoord::covering(RectI::new(-1, 63, 2, 2), 64).collect();
        assert_eq!(tiles.len(), 4);
        assert_eq!(TileCoord::covering(RectI::default(), 64).count(), 0);
    }
    #[test]
    fn negative_pixels_belong_to_negative_tiles() {
        assert_eq!(TileCoord::containing([-1, 0], 64), TileCoord::new(-1, 0));
        assert_eq!(TileCoord::containing([64, 127], 64), TileCoord::new(1, 1));
    }
    #[test]
    fn downsample_is_deterministic() {
        let mut tile = Tile::transparent(16);
        tile.set(0, 0, Rgba8::WHITE);
        let a = tile.downsample();
        let b = tile.downsample();
        assert_eq!(a, b);
        assert_eq!(a.size(), 8);
        assert_eq!(a.get(0, 0).a, 64);
    }
    #[test]
    fn bytes_roundtrip() {
        let tile = Tile::filled(16, Rgba8::from_straight(1, 2, 3, 255));
        assert_eq!(Tile::from_bytes(16, tile.as_bytes()), Some(tile));
        assert!(Tile::from_bytes(16, &[0; 3]).is_none());
    }
}
