//! # Flood fill
//!
//! Tile-by-tile fill over any [`TileSource`]. Within a tile a stack-based fill runs over the
//! tile's pixels; whenever it steps over a tile edge the pixel is handed to the neighbouring
//! tile as a seed, and that tile is processed later. The result is a per-tile pixel delta
//! which is never written back to the source. Callers decide whether to commit it.

use crate::blend::Blend;
use crate::color::{ColorSpace, Rgba8};
use crate::tile::{DrawOperation, Resolution, Shape, Tile, TileCoord, TileDelta, TileStore};
use crate::util::RectI;

/// Tile-granular read access to full resolution pixels.
pub trait TileSource {
    fn tile_size(&self) -> u32;
    /// Pixels outside of this are never read nor filled.
    fn bounds(&self) -> RectI;
    /// Content of a tile, `None` if fully transparent.
    fn tile(&mut self, coord: TileCoord) -> Option<&Tile>;
    /// The fill will not come back to this tile soon. Sources holding derived data may drop it.
    fn release(&mut self, _coord: TileCoord) {}
}
impl TileSource for &TileStore {
    fn tile_size(&self) -> u32 {
        TileStore::tile_size(self)
    }
    fn bounds(&self) -> RectI {
        TileStore::bounds(self)
    }
    fn tile(&mut self, coord: TileCoord) -> Option<&Tile> {
        self.read_tile(coord, Resolution::Full)
    }
}
impl<S: TileSource + ?Sized> TileSource for &mut S {
    fn tile_size(&self) -> u32 {
        (**self).tile_size()
    }
    fn bounds(&self) -> RectI {
        (**self).bounds()
    }
    fn tile(&mut self, coord: TileCoord) -> Option<&Tile> {
        (**self).tile(coord)
    }
    fn release(&mut self, coord: TileCoord) {
        (**self).release(coord);
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillError {
    #[error("no layers to merge")]
    NoSources,
    #[error("layers with different tile sizes can't be merged")]
    TileSizeMismatch,
}

/// A virtual composite of several stores, merged one tile at a time on demand.
pub struct MergedTileCache<'a> {
    /// Top first.
    sources: Vec<(&'a TileStore, Blend)>,
    color_space: ColorSpace,
    tile_size: u32,
    bounds: RectI,
    merged: hashbrown::HashMap<TileCoord, Option<Tile>>,
    merge_count: usize,
}
impl<'a> MergedTileCache<'a> {
    /// `sources` are listed top first, like a layer stack.
    pub fn new(
        sources: impl IntoIterator<Item = (&'a TileStore, Blend)>,
        color_space: ColorSpace,
    ) -> Result<Self, FillError> {
        let sources: Vec<_> = sources.into_iter().collect();
        let (first, _) = sources.first().ok_or(FillError::NoSources)?;
        let tile_size = first.tile_size();
        if sources.iter().any(|(store, _)| store.tile_size() != tile_size) {
            return Err(FillError::TileSizeMismatch);
        }
        let bounds = sources
            .iter()
            .fold(RectI::default(), |acc, (store, _)| acc.union(&store.bounds()));
        Ok(Self {
            sources,
            color_space,
            tile_size,
            bounds,
            merged: hashbrown::HashMap::new(),
            merge_count: 0,
        })
    }
    /// Number of merged tiles currently held.
    #[must_use]
    pub fn resident(&self) -> usize {
        self.merged.len()
    }
    /// Total number of tile merges performed, including repeats of released tiles.
    #[must_use]
    pub fn merge_count(&self) -> usize {
        self.merge_count
    }
    fn merge(&self, coord: TileCoord) -> Option<Tile> {
        let mut out: Option<Tile> = None;
        for (store, blend) in self.sources.iter().rev() {
            if let Some(tile) = store.read_tile(coord, Resolution::Full) {
                let dst = out.get_or_insert_with(|| Tile::transparent(self.tile_size));
                blend.rows(self.color_space, tile.pixels(), dst.pixels_mut());
            }
        }
        out.filter(|tile| !tile.is_transparent())
    }
}
impl TileSource for MergedTileCache<'_> {
    fn tile_size(&self) -> u32 {
        self.tile_size
    }
    fn bounds(&self) -> RectI {
        self.bounds
    }
    fn tile(&mut self, coord: TileCoord) -> Option<&Tile> {
        if !self.merged.contains_key(&coord) {
            let merged = self.merge(coord);
            self.merge_count += 1;
            self.merged.insert(coord, merged);
        }
        self.merged.get(&coord).and_then(Option::as_ref)
    }
    fn release(&mut self, coord: TileCoord) {
        self.merged.remove(&coord);
    }
}

#[derive(
    Copy, Clone, PartialEq, Eq, Hash, Debug, Default, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    /// Edge neighbours only.
    #[default]
    Four,
    /// Edge and corner neighbours.
    Eight,
}
impl Connectivity {
    fn offsets(self) -> &'static [[i32; 2]] {
        const FOUR: [[i32; 2]; 4] = [[-1, 0], [1, 0], [0, -1], [0, 1]];
        const EIGHT: [[i32; 2]; 8] = [
            [-1, 0],
            [1, 0],
            [0, -1],
            [0, 1],
            [-1, -1],
            [1, -1],
            [-1, 1],
            [1, 1],
        ];
        match self {
            Self::Four => &FOUR,
            Self::Eight => &EIGHT,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FillOptions {
    pub seed: [i32; 2],
    /// Premultiplied color written to every filled pixel.
    pub color: Rgba8,
    /// Largest per-channel difference from the seed pixel that still counts as inside.
    pub tolerance: u8,
    pub connectivity: Connectivity,
    /// Pixels whose centers fall outside are treated as boundary.
    pub clip: Option<Shape>,
}
impl FillOptions {
    #[must_use]
    pub fn new(seed: [i32; 2], color: Rgba8) -> Self {
        Self {
            seed,
            color,
            tolerance: 0,
            connectivity: Connectivity::Four,
            clip: None,
        }
    }
    fn in_clip(&self, x: i32, y: i32) -> bool {
        self.clip
            .as_ref()
            .map_or(true, |clip| clip.contains(x as f32 + 0.5, y as f32 + 0.5))
    }
}

#[derive(Clone, Debug, Default)]
pub struct FillResult {
    pub deltas: hashbrown::HashMap<TileCoord, TileDelta>,
    /// Tight bounds of the filled pixels.
    pub bounds: RectI,
    pub filled_pixels: usize,
}
impl FillResult {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filled_pixels == 0
    }
    /// Whether the fill wrote this document pixel.
    #[must_use]
    pub fn is_filled(&self, px: [i32; 2], tile_size: u32) -> bool {
        let coord = TileCoord::containing(px, tile_size);
        let origin = coord.pixel_rect(tile_size);
        self.deltas.get(&coord).is_some_and(|delta| {
            delta.is_set((px[0] - origin.x) as u32, (px[1] - origin.y) as u32)
        })
    }
    /// A draw operation replacing the filled pixels.
    #[must_use]
    pub fn into_operation(self) -> DrawOperation {
        DrawOperation::WritePixels {
            deltas: self.deltas,
            blend: None,
        }
    }
}

/// Fill the region connected to `options.seed` whose pixels are within tolerance of the seed
/// pixel.
///
/// Nothing is filled if the seed lies outside the source or the clip, or if the seed pixel
/// already is the fill color.
pub fn flood_fill<S: TileSource>(mut source: S, options: &FillOptions) -> FillResult {
    let tile_size = source.tile_size();
    let side = tile_size as i32;
    let bounds = source.bounds();
    let mut result = FillResult::default();

    let [sx, sy] = options.seed;
    if !bounds.contains(sx, sy) || !options.in_clip(sx, sy) {
        log::trace!("fill seed {:?} outside of fillable area", options.seed);
        return result;
    }
    let seed_tile = TileCoord::containing(options.seed, tile_size);
    let origin = seed_tile.pixel_rect(tile_size);
    let local = [(sx - origin.x) as u32, (sy - origin.y) as u32];
    let reference = source
        .tile(seed_tile)
        .map_or(Rgba8::TRANSPARENT, |tile| tile.get(local[0], local[1]));
    if reference == options.color {
        return result;
    }

    // Seeds waiting per tile, and the order tiles became pending.
    let mut pending: hashbrown::HashMap<TileCoord, Vec<[u32; 2]>> = hashbrown::HashMap::new();
    let mut work = std::collections::VecDeque::new();
    pending.insert(seed_tile, vec![local]);
    work.push_back(seed_tile);
    // One bit per pixel, set once the pixel has been tested.
    let mut seen: hashbrown::HashMap<TileCoord, bitvec::vec::BitVec> = hashbrown::HashMap::new();
    let mut live: hashbrown::HashSet<TileCoord> = hashbrown::HashSet::new();
    let area = (tile_size as usize) * (tile_size as usize);

    while let Some(coord) = work.pop_front() {
        let Some(mut stack) = pending.remove(&coord) else {
            continue;
        };
        live.insert(coord);
        let rect = coord.pixel_rect(tile_size);
        let mut visited = seen
            .remove(&coord)
            .unwrap_or_else(|| bitvec::vec::BitVec::repeat(false, area));
        let tile = source.tile(coord);

        while let Some([lx, ly]) = stack.pop() {
            let idx = (ly as usize) * (tile_size as usize) + (lx as usize);
            if visited[idx] {
                continue;
            }
            visited.set(idx, true);
            let (x, y) = (rect.x + lx as i32, rect.y + ly as i32);
            let px = tile.map_or(Rgba8::TRANSPARENT, |tile| tile.get(lx, ly));
            if px.max_channel_distance(reference) > options.tolerance || !options.in_clip(x, y) {
                continue;
            }
            result
                .deltas
                .entry(coord)
                .or_insert_with(|| TileDelta::empty(tile_size))
                .write(lx, ly, options.color);
            result.filled_pixels += 1;
            result.bounds = result.bounds.union(&RectI::new(x, y, 1, 1));

            for [dx, dy] in options.connectivity.offsets() {
                let (nx, ny) = (x + dx, y + dy);
                if !bounds.contains(nx, ny) {
                    continue;
                }
                let (nlx, nly) = (lx as i32 + dx, ly as i32 + dy);
                if (0..side).contains(&nlx) && (0..side).contains(&nly) {
                    stack.push([nlx as u32, nly as u32]);
                    continue;
                }
                // Crossing into a neighbouring tile.
                let next = TileCoord::containing([nx, ny], tile_size);
                let next_origin = next.pixel_rect(tile_size);
                let next_local = [(nx - next_origin.x) as u32, (ny - next_origin.y) as u32];
                let next_idx = (next_local[1] as usize) * (tile_size as usize)
                    + (next_local[0] as usize);
                if seen.get(&next).is_some_and(|bits| bits[next_idx]) {
                    continue;
                }
                pending
                    .entry(next)
                    .or_insert_with(|| {
                        work.push_back(next);
                        Vec::new()
                    })
                    .push(next_local);
            }
        }
        seen.insert(coord, visited);

        // Drop tiles the frontier has moved away from.
        live.retain(|held| {
            let needed = (-1..=1)
                .any(|dy| (-1..=1).any(|dx| pending.contains_key(&held.offset(dx, dy))));
            if !needed {
                source.release(*held);
            }
            needed
        });
    }
    log::debug!(
        "flood fill from {:?}: {} pixels over {} tiles",
        options.seed,
        result.filled_pixels,
        result.deltas.len()
    );
    result
}

#[cfg(test)]
mod test {
    use super::*;

    const RED: Rgba8 = Rgba8::premultiplied(255, 0, 0, 255);

    fn store_with(size: [u32; 2], shapes: &[Shape]) -> TileStore {
        let mut store = TileStore::new(size, 16).unwrap();
        for shape in shapes {
            store.enqueue(DrawOperation::Shape {
                shape: shape.clone(),
                color: Rgba8::BLACK,
                blend: Blend::default(),
                antialias: false,
            });
        }
        store.commit();
        store
    }
    /// One pixel wide outline of a rectangle.
    fn outline(x: f32, y: f32, w: f32, h: f32) -> Vec<Shape> {
        vec![
            Shape::rectangle(x, y, w, 1.0),
            Shape::rectangle(x, y + h - 1.0, w, 1.0),
            Shape::rectangle(x, y, 1.0, h),
            Shape::rectangle(x + w - 1.0, y, 1.0, h),
        ]
    }

    #[test]
    fn enclosed_region_across_tiles() {
        // Outline from 5..45 spans three tiles per axis at tile size 16.
        let store = store_with([64, 64], &outline(5.0, 5.0, 40.0, 40.0));
        let result = flood_fill(&store, &FillOptions::new([20, 20], RED));
        assert_eq!(result.filled_pixels, 38 * 38);
        assert_eq!(result.bounds, RectI::new(6, 6, 38, 38));
        assert!(result.is_filled([6, 6], 16));
        assert!(!result.is_filled([5, 5], 16));
        assert!(!result.is_filled([50, 50], 16));
        assert_eq!(result.deltas.len(), 9);
    }
    #[test]
    fn nothing_to_do() {
        let store = store_with([32, 32], &[]);
        assert!(flood_fill(&store, &FillOptions::new([-1, 3], RED)).is_empty());
        assert!(flood_fill(&store, &FillOptions::new([3, 32], RED)).is_empty());
        let black = store_with([32, 32], &[Shape::rectangle(0.0, 0.0, 32.0, 32.0)]);
        assert!(flood_fill(&black, &FillOptions::new([3, 3], Rgba8::BLACK)).is_empty());
    }
    #[test]
    fn transparent_canvas_fills_everything() {
        let store = store_with([40, 24], &[]);
        let result = flood_fill(&store, &FillOptions::new([0, 0], RED));
        assert_eq!(result.filled_pixels, 40 * 24);
        assert_eq!(result.bounds, RectI::new(0, 0, 40, 24));
    }
    #[test]
    fn diagonal_gaps_need_eight_connectivity() {
        // Two quadrants touching only at a corner, at a tile corner.
        let store = store_with(
            [32, 32],
            &[
                Shape::rectangle(16.0, 0.0, 16.0, 16.0),
                Shape::rectangle(0.0, 16.0, 16.0, 16.0),
            ],
        );
        let four = flood_fill(&store, &FillOptions::new([0, 0], RED));
        assert_eq!(four.filled_pixels, 256);
        let eight = flood_fill(
            &store,
            &FillOptions {
                connectivity: Connectivity::Eight,
                ..FillOptions::new([0, 0], RED)
            },
        );
        assert_eq!(eight.filled_pixels, 512);
        assert!(eight.is_filled([31, 31], 16));
    }
    #[test]
    fn tolerance() {
        let mut store = TileStore::new([16, 16], 16).unwrap();
        store.enqueue(DrawOperation::Shape {
            shape: Shape::rectangle(8.0, 0.0, 8.0, 16.0),
            color: Rgba8::premultiplied(10, 10, 10, 10),
            blend: Blend::default(),
            antialias: false,
        });
        store.commit();
        let strict = flood_fill(&store, &FillOptions::new([0, 0], RED));
        assert_eq!(strict.filled_pixels, 128);
        let loose = flood_fill(
            &store,
            &FillOptions {
                tolerance: 10,
                ..FillOptions::new([0, 0], RED)
            },
        );
        assert_eq!(loose.filled_pixels, 256);
    }
    #[test]
    fn clip_limits_fill() {
        let store = store_with([32, 32], &[]);
        let result = flood_fill(
            &store,
            &FillOptions {
                clip: Some(Shape::rectangle(0.0, 0.0, 20.0, 10.0)),
                ..FillOptions::new([1, 1], RED)
            },
        );
        assert_eq!(result.filled_pixels, 200);
        assert!(flood_fill(
            &store,
            &FillOptions {
                clip: Some(Shape::rectangle(0.0, 0.0, 20.0, 10.0)),
                ..FillOptions::new([25, 25], RED)
            },
        )
        .is_empty());
    }
    #[test]
    fn merged_sources_share_boundaries() {
        // The boundary lives on one layer, the seed area on another.
        let walls = store_with([48, 48], &outline(0.0, 0.0, 30.0, 30.0));
        let empty = store_with([48, 48], &[]);
        let mut cache = MergedTileCache::new(
            [(&empty, Blend::default()), (&walls, Blend::default())],
            ColorSpace::Srgb,
        )
        .unwrap();
        let result = flood_fill(&mut cache, &FillOptions::new([10, 10], RED));
        assert_eq!(result.filled_pixels, 28 * 28);
        // Every merged tile is dropped once the fill is over.
        assert_eq!(cache.resident(), 0);
        assert!(cache.merge_count() >= 4);

        // Alone, the empty layer fills completely.
        assert_eq!(
            flood_fill(&empty, &FillOptions::new([10, 10], RED)).filled_pixels,
            48 * 48
        );
    }
    #[test]
    fn merged_rejects_bad_sources() {
        assert_eq!(
            MergedTileCache::new(Vec::new(), ColorSpace::Srgb).err(),
            Some(FillError::NoSources)
        );
        let a = TileStore::new([8, 8], 16).unwrap();
        let b = TileStore::new([8, 8], 32).unwrap();
        assert_eq!(
            MergedTileCache::new(
                [(&a, Blend::default()), (&b, Blend::default())],
                ColorSpace::Srgb
            )
            .err(),
            Some(FillError::TileSizeMismatch)
        );
    }
}
