use super::{DrawOperation, Resolution, Tile, TileCoord};
use crate::color::{ColorSpace, Rgba8};
use crate::util::RectI;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileStoreError {
    #[error("image size {}x{} is empty", .0[0], .0[1])]
    EmptySize([u32; 2]),
    #[error("tile size {0} is not a supported power of two")]
    BadTileSize(u32),
    #[error("tile data for {0:?} is malformed")]
    MalformedTile(TileCoord),
}

/// Tiles and pixels touched since some point in time.
#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct AffectedArea {
    pub tiles: hashbrown::HashSet<TileCoord>,
    /// Tight pixel bounding box of the touched content. Empty if nothing was touched.
    pub bounds: RectI,
}
impl AffectedArea {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
    pub fn merge(&mut self, other: &Self) {
        self.tiles.extend(other.tiles.iter().copied());
        self.bounds = self.bounds.union(&other.bounds);
    }
}

/// Full resolution content of one tile, plus lazily derived lower resolutions.
pub(super) struct TileEntry {
    pub(super) full: Tile,
    /// Half, quarter, eighth. Emptied whenever `full` changes.
    lower: [std::sync::OnceLock<Tile>; Resolution::COUNT - 1],
}
impl TileEntry {
    pub(super) fn new(full: Tile) -> Self {
        Self {
            full,
            lower: Default::default(),
        }
    }
    fn full_mut(&mut self) -> &mut Tile {
        self.lower = Default::default();
        &mut self.full
    }
    fn at(&self, resolution: Resolution) -> &Tile {
        match resolution.level() {
            0 => &self.full,
            level => {
                let level = level as usize;
                self.lower[level - 1].get_or_init(|| {
                    // Each level is derived from the one above it, never from the
                    // lower levels, so regeneration always gives the same bits.
                    let finer = match level {
                        1 => Resolution::Full,
                        2 => Resolution::Half,
                        _ => Resolution::Quarter,
                    };
                    self.at(finer).downsample()
                })
            }
        }
    }
}

/// The raster content of one layer or mask.
///
/// Edits are queued with [`TileStore::enqueue`] and only become visible to readers after
/// [`TileStore::commit`]. Reads and enqueues both take `&self` and may race each other;
/// commits need `&mut self` so they can never overlap a read.
pub struct TileStore {
    pub(super) tile_size: u32,
    pub(super) size: [u32; 2],
    pub(super) committed: hashbrown::HashMap<TileCoord, TileEntry>,
    pending: parking_lot::Mutex<Vec<DrawOperation>>,
    /// Stamped every time a tile changes, including removal. Stamps come from one process-wide
    /// counter, so a value is never reused for different content in any store.
    generations: hashbrown::HashMap<TileCoord, u64>,
    /// Accumulated since the last `find_affected_area`.
    affected: AffectedArea,
}

impl std::fmt::Debug for TileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileStore")
            .field("size", &self.size)
            .field("tile_size", &self.tile_size)
            .field("tiles", &self.committed.len())
            .field("pending", &self.pending.lock().len())
            .finish_non_exhaustive()
    }
}

impl TileStore {
    pub fn new(size: [u32; 2], tile_size: u32) -> Result<Self, TileStoreError> {
        if size.contains(&0) {
            return Err(TileStoreError::EmptySize(size));
        }
        if !super::is_valid_tile_size(tile_size) {
            return Err(TileStoreError::BadTileSize(tile_size));
        }
        Ok(Self {
            tile_size,
            size,
            committed: hashbrown::HashMap::new(),
            pending: parking_lot::Mutex::default(),
            generations: hashbrown::HashMap::new(),
            affected: AffectedArea::default(),
        })
    }
    #[must_use]
    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }
    /// Committed image size.
    #[must_use]
    pub fn size(&self) -> [u32; 2] {
        self.size
    }
    #[must_use]
    pub fn bounds(&self) -> RectI {
        RectI::from_size(self.size)
    }
    /// Queue an operation. Committed reads are unaffected until [`Self::commit`].
    pub fn enqueue(&self, operation: DrawOperation) {
        log::trace!("enqueue {operation:?}");
        self.pending.lock().push(operation);
    }
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.lock().is_empty()
    }
    /// Drop every queued operation without applying it.
    pub fn cancel_pending(&mut self) {
        self.pending.get_mut().clear();
    }
    /// Tiles the queued operations will touch once committed. Needed to capture undo state
    /// before committing.
    #[must_use]
    pub fn pending_affected_tiles(&self) -> hashbrown::HashSet<TileCoord> {
        let pending = self.pending.lock();
        let mut image = self.bounds();
        let mut existing: hashbrown::HashSet<TileCoord> = self.committed.keys().copied().collect();
        let mut out = hashbrown::HashSet::new();
        for op in pending.iter() {
            let touched = op.affected_tiles(self.tile_size, image, existing.iter());
            if let DrawOperation::Resize { size, .. } = op {
                image = RectI::from_size(*size);
            }
            existing.extend(touched.iter().copied());
            out.extend(touched);
        }
        out
    }
    /// [`Self::commit_in`] the default color space.
    pub fn commit(&mut self) -> AffectedArea {
        self.commit_in(ColorSpace::default())
    }
    /// Apply all queued operations, blending in `space`, and return what they touched.
    /// Committing an empty queue touches nothing.
    pub fn commit_in(&mut self, space: ColorSpace) -> AffectedArea {
        let operations = std::mem::take(self.pending.get_mut());
        let mut area = AffectedArea::default();
        if operations.is_empty() {
            return area;
        }
        for operation in &operations {
            match operation {
                DrawOperation::Clear => {
                    area.bounds = area.bounds.union(&self.content_bounds());
                    let coords: Vec<_> = self.committed.keys().copied().collect();
                    self.committed.clear();
                    for coord in coords {
                        self.touch(coord);
                        area.tiles.insert(coord);
                    }
                }
                DrawOperation::Resize { size, offset } => {
                    self.resize_content(*size, *offset, &mut area);
                }
                _ => {
                    let image = self.bounds();
                    let tiles = operation.affected_tiles(
                        self.tile_size,
                        image,
                        self.committed.keys(),
                    );
                    area.bounds = area.bounds.union(&operation.pixel_bounds(
                        self.tile_size,
                        image,
                        self.content_bounds(),
                    ));
                    for coord in tiles {
                        let tile_size = self.tile_size;
                        let entry = self
                            .committed
                            .entry(coord)
                            .or_insert_with(|| TileEntry::new(Tile::transparent(tile_size)));
                        let tile = entry.full_mut();
                        operation.apply_to_tile(coord, image, space, tile);
                        if tile.is_transparent() {
                            self.committed.remove(&coord);
                        }
                        self.touch(coord);
                        area.tiles.insert(coord);
                    }
                }
            }
        }
        log::trace!(
            "committed {} operations, {} tiles affected",
            operations.len(),
            area.tiles.len()
        );
        self.affected.merge(&area);
        area
    }
    /// Take everything touched since the previous call.
    pub fn find_affected_area(&mut self) -> AffectedArea {
        std::mem::take(&mut self.affected)
    }
    /// Committed content of a tile, or `None` if it is empty.
    #[must_use]
    pub fn read_tile(&self, coord: TileCoord, resolution: Resolution) -> Option<&Tile> {
        self.committed.get(&coord).map(|entry| entry.at(resolution))
    }
    /// Committed pixel. Out-of-bounds and unallocated pixels are transparent.
    #[must_use]
    pub fn read_pixel(&self, px: [i32; 2]) -> Rgba8 {
        if !self.bounds().contains(px[0], px[1]) {
            return Rgba8::TRANSPARENT;
        }
        let coord = TileCoord::containing(px, self.tile_size);
        let origin = coord.pixel_rect(self.tile_size);
        self.read_tile(coord, Resolution::Full)
            .map_or(Rgba8::TRANSPARENT, |tile| {
                tile.get((px[0] - origin.x) as u32, (px[1] - origin.y) as u32)
            })
    }
    /// Changes whenever the committed content of `coord` changes.
    #[must_use]
    pub fn tile_generation(&self, coord: TileCoord) -> u64 {
        self.generations.get(&coord).copied().unwrap_or(0)
    }
    /// Coordinates of every allocated tile, in no particular order.
    pub fn allocated_tiles(&self) -> impl Iterator<Item = TileCoord> + '_ {
        self.committed.keys().copied()
    }
    #[must_use]
    pub fn tile_count(&self) -> usize {
        self.committed.len()
    }
    /// Bytes of full resolution pixel data held.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        let per_tile = (self.tile_size as usize).pow(2) * std::mem::size_of::<Rgba8>();
        self.committed.len() * per_tile
    }
    /// Deep copy of the committed state. Queued operations are not carried over.
    #[must_use]
    pub fn clone_committed(&self) -> Self {
        let committed = self
            .committed
            .iter()
            .map(|(coord, entry)| (*coord, TileEntry::new(entry.full.clone())))
            .collect();
        log::trace!(
            "deep copy of {} tiles ({})",
            self.committed.len(),
            human_bytes::human_bytes(self.memory_usage() as f64)
        );
        Self {
            tile_size: self.tile_size,
            size: self.size,
            committed,
            pending: parking_lot::Mutex::default(),
            generations: self.generations.clone(),
            affected: AffectedArea::default(),
        }
    }
    /// Overwrite or remove a committed tile directly, bypassing the queue.
    /// Used when reverting to captured state.
    pub(crate) fn restore_tile(&mut self, coord: TileCoord, tile: Option<Tile>) {
        let rect = coord.pixel_rect(self.tile_size).intersect(&self.bounds());
        match tile.filter(|tile| !tile.is_transparent()) {
            Some(tile) => {
                self.committed.insert(coord, TileEntry::new(tile));
            }
            None => {
                self.committed.remove(&coord);
            }
        }
        self.touch(coord);
        self.affected.tiles.insert(coord);
        self.affected.bounds = self.affected.bounds.union(&rect);
    }
    /// Change bounds without moving content. Used when reverting a resize.
    pub(crate) fn restore_size(&mut self, size: [u32; 2]) {
        self.size = size;
    }
    fn touch(&mut self, coord: TileCoord) {
        static NEXT_GENERATION: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);
        let generation = NEXT_GENERATION.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.generations.insert(coord, generation);
    }
    /// Union of the rects of allocated tiles, clipped to the image.
    fn content_bounds(&self) -> RectI {
        self.committed
            .keys()
            .map(|coord| coord.pixel_rect(self.tile_size))
            .fold(RectI::default(), |acc, r| acc.union(&r))
            .intersect(&self.bounds())
    }
    fn resize_content(&mut self, size: [u32; 2], offset: [i32; 2], area: &mut AffectedArea) {
        let tile_size = self.tile_size;
        let new_bounds = RectI::from_size(size);
        area.bounds = area
            .bounds
            .union(&self.content_bounds())
            .union(&self.content_bounds().translated(offset).intersect(&new_bounds));

        let old = std::mem::take(&mut self.committed);
        let mut moved: hashbrown::HashMap<TileCoord, Tile> = hashbrown::HashMap::new();
        let ts = tile_size as i32;
        let aligned = offset[0] % ts == 0 && offset[1] % ts == 0;
        for (coord, entry) in old {
            area.tiles.insert(coord);
            let tile = entry.full;
            if aligned {
                let dest = coord.offset(offset[0] / ts, offset[1] / ts);
                moved.insert(dest, tile);
                continue;
            }
            let origin = coord.pixel_rect(tile_size);
            for ly in 0..tile_size {
                for lx in 0..tile_size {
                    let px = tile.get(lx, ly);
                    if px.is_transparent() {
                        continue;
                    }
                    // Overflowing positions are far outside any valid image.
                    let (Some(x), Some(y)) = (
                        (origin.x + lx as i32).checked_add(offset[0]),
                        (origin.y + ly as i32).checked_add(offset[1]),
                    ) else {
                        continue;
                    };
                    if !new_bounds.contains(x, y) {
                        continue;
                    }
                    let dest = TileCoord::containing([x, y], tile_size);
                    let dest_origin = dest.pixel_rect(tile_size);
                    moved
                        .entry(dest)
                        .or_insert_with(|| Tile::transparent(tile_size))
                        .set((x - dest_origin.x) as u32, (y - dest_origin.y) as u32, px);
                }
            }
        }
        self.size = size;
        for (coord, mut tile) in moved {
            // Aligned moves keep whole tiles, trim whatever crossed the new edge.
            let rect = coord.pixel_rect(tile_size);
            if rect.intersect(&new_bounds).is_empty() {
                continue;
            }
            if !new_bounds.contains(rect.x, rect.y)
                || !new_bounds.contains(rect.right() - 1, rect.bottom() - 1)
            {
                for ly in 0..tile_size {
                    for lx in 0..tile_size {
                        if !new_bounds.contains(rect.x + lx as i32, rect.y + ly as i32) {
                            tile.set(lx, ly, Rgba8::TRANSPARENT);
                        }
                    }
                }
            }
            area.tiles.insert(coord);
            if !tile.is_transparent() {
                self.committed.insert(coord, TileEntry::new(tile));
            }
        }
        let touched: Vec<_> = area.tiles.iter().copied().collect();
        for coord in touched {
            self.touch(coord);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::blend::Blend;
    use crate::tile::Shape;

    fn fill(store: &TileStore, x: f32, y: f32, w: f32, h: f32, color: Rgba8) {
        store.enqueue(DrawOperation::Shape {
            shape: Shape::rectangle(x, y, w, h),
            color,
            blend: Blend::default(),
            antialias: false,
        });
    }

    #[test]
    fn queued_is_invisible_until_commit() {
        let mut store = TileStore::new([128, 128], 64).unwrap();
        fill(&store, 0.0, 0.0, 64.0, 64.0, Rgba8::WHITE);
        assert!(store.read_tile(TileCoord::new(0, 0), Resolution::Full).is_none());
        let area = store.commit();
        assert_eq!(area.tiles.len(), 1);
        assert_eq!(area.bounds, RectI::new(0, 0, 64, 64));
        assert_eq!(store.read_pixel([10, 10]), Rgba8::WHITE);
        assert_eq!(store.read_pixel([64, 10]), Rgba8::TRANSPARENT);
    }
    #[test]
    fn idempotent_commit() {
        let mut store = TileStore::new([128, 128], 64).unwrap();
        fill(&store, 10.0, 10.0, 100.0, 100.0, Rgba8::BLACK);
        assert_eq!(store.commit().tiles.len(), 4);
        assert!(store.commit().is_empty());
        assert!(store.commit().is_empty());
    }
    #[test]
    fn out_of_range_is_clipped() {
        let mut store = TileStore::new([100, 100], 64).unwrap();
        fill(&store, -50.0, -50.0, 500.0, 500.0, Rgba8::BLACK);
        store.commit();
        assert_eq!(store.tile_count(), 4);
        assert_eq!(store.read_pixel([99, 99]), Rgba8::BLACK);
        let corner = store.read_tile(TileCoord::new(1, 1), Resolution::Full).unwrap();
        // Pixel (100, 100) is outside the image.
        assert_eq!(corner.get(36, 36), Rgba8::TRANSPARENT);
    }
    #[test]
    fn lower_resolutions_cached_until_change() {
        let mut store = TileStore::new([64, 64], 64).unwrap();
        fill(&store, 0.0, 0.0, 32.0, 32.0, Rgba8::WHITE);
        store.commit();
        let coord = TileCoord::new(0, 0);
        let a: *const Tile = store.read_tile(coord, Resolution::Quarter).unwrap();
        let b: *const Tile = store.read_tile(coord, Resolution::Quarter).unwrap();
        assert_eq!(a, b, "regenerated without a change");
        let quarter = store.read_tile(coord, Resolution::Quarter).unwrap();
        assert_eq!(quarter.size(), 16);
        assert_eq!(quarter.get(0, 0), Rgba8::WHITE);
        assert_eq!(quarter.get(15, 15), Rgba8::TRANSPARENT);

        let before = store.tile_generation(coord);
        fill(&store, 32.0, 32.0, 32.0, 32.0, Rgba8::WHITE);
        store.commit();
        assert_ne!(before, store.tile_generation(coord));
        let quarter = store.read_tile(coord, Resolution::Quarter).unwrap();
        assert_eq!(quarter.get(15, 15), Rgba8::WHITE);
    }
    #[test]
    fn transparent_tiles_are_released() {
        let mut store = TileStore::new([128, 128], 64).unwrap();
        fill(&store, 0.0, 0.0, 128.0, 128.0, Rgba8::WHITE);
        store.commit();
        store.enqueue(DrawOperation::ClearRegion(RectI::new(0, 0, 64, 64)));
        store.commit();
        assert_eq!(store.tile_count(), 3);
        store.enqueue(DrawOperation::Clear);
        let area = store.commit();
        assert_eq!(store.tile_count(), 0);
        assert_eq!(area.tiles.len(), 3);
    }
    #[test]
    fn affected_area_accumulates_until_queried() {
        let mut store = TileStore::new([256, 256], 64).unwrap();
        fill(&store, 0.0, 0.0, 10.0, 10.0, Rgba8::WHITE);
        store.commit();
        fill(&store, 200.0, 200.0, 10.0, 10.0, Rgba8::WHITE);
        store.commit();
        let area = store.find_affected_area();
        assert_eq!(area.tiles.len(), 2);
        assert_eq!(area.bounds, RectI::new(0, 0, 210, 210));
        assert!(store.find_affected_area().is_empty());
    }
    #[test]
    fn resize_moves_content() {
        let mut store = TileStore::new([64, 64], 64).unwrap();
        fill(&store, 0.0, 0.0, 4.0, 4.0, Rgba8::WHITE);
        store.commit();
        store.enqueue(DrawOperation::Resize {
            size: [128, 128],
            offset: [70, 70],
        });
        store.commit();
        assert_eq!(store.size(), [128, 128]);
        assert_eq!(store.read_pixel([0, 0]), Rgba8::TRANSPARENT);
        assert_eq!(store.read_pixel([70, 70]), Rgba8::WHITE);
        assert_eq!(store.read_pixel([73, 73]), Rgba8::WHITE);
        assert_eq!(store.tile_count(), 1);
    }
    #[test]
    fn clone_is_deep_and_drops_pending() {
        let mut store = TileStore::new([64, 64], 64).unwrap();
        fill(&store, 0.0, 0.0, 64.0, 64.0, Rgba8::WHITE);
        store.commit();
        fill(&store, 0.0, 0.0, 64.0, 64.0, Rgba8::BLACK);
        let mut copy = store.clone_committed();
        assert!(!copy.has_pending());
        store.commit();
        assert_eq!(copy.read_pixel([0, 0]), Rgba8::WHITE);
        assert!(copy.commit().is_empty());
    }
    #[test]
    fn rejects_bad_sizes() {
        assert_eq!(
            TileStore::new([0, 10], 64).unwrap_err(),
            TileStoreError::EmptySize([0, 10])
        );
        assert_eq!(
            TileStore::new([10, 10], 48).unwrap_err(),
            TileStoreError::BadTileSize(48)
        );
    }
}
