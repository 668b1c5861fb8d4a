//! # Change diffs
//!
//! Before a change commits edits to a [`TileStore`], it captures the committed content of every
//! tile about to be touched. Reverting writes those tiles back. A diff owns deep copies, never
//! references into the store, and is consumed by applying it.

use crate::tile::{AffectedArea, Tile, TileCoord, TileStore};

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffError {
    #[error("store has queued operations, refusing to overwrite committed tiles")]
    PendingOperations,
    #[error("diff captured with tile size {captured}, store uses {store}")]
    TileSizeMismatch { captured: u32, store: u32 },
}

/// Pre-edit content of a set of tiles: the tile itself, or `None` if it did not exist.
pub struct ChangeDiff {
    tile_size: u32,
    size: [u32; 2],
    tiles: hashbrown::HashMap<TileCoord, Option<Tile>>,
    /// Every allocated tile was captured. On apply, tiles not in the diff are removed and the
    /// image size is restored too.
    exhaustive: bool,
}
impl std::fmt::Debug for ChangeDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeDiff")
            .field("tiles", &self.tiles.len())
            .field("exhaustive", &self.exhaustive)
            .finish_non_exhaustive()
    }
}
impl ChangeDiff {
    /// Snapshot the committed state of `coords`.
    #[must_use]
    pub fn capture(store: &TileStore, coords: impl IntoIterator<Item = TileCoord>) -> Self {
        let tiles = coords
            .into_iter()
            .map(|coord| {
                (
                    coord,
                    store.read_tile(coord, crate::tile::Resolution::Full).cloned(),
                )
            })
            .collect();
        Self {
            tile_size: store.tile_size(),
            size: store.size(),
            tiles,
            exhaustive: false,
        }
    }
    /// Snapshot every allocated tile and the image size.
    #[must_use]
    pub fn capture_all(store: &TileStore) -> Self {
        let mut diff = Self::capture(store, store.allocated_tiles().collect::<Vec<_>>());
        diff.exhaustive = true;
        diff
    }
    /// Number of captured coordinates, including ones marked absent.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tiles.len()
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        self.tiles.values().flatten().map(|tile| tile.pixels().len() * 4).sum()
    }
    /// Whether `store` still holds exactly the captured content, i.e. whatever happened since
    /// the capture changed nothing.
    #[must_use]
    pub fn matches(&self, store: &TileStore) -> bool {
        if self.exhaustive
            && (store.size() != self.size
                || store.tile_count() != self.tiles.values().flatten().count())
        {
            return false;
        }
        self.tiles.iter().all(|(coord, tile)| {
            store.read_tile(*coord, crate::tile::Resolution::Full) == tile.as_ref()
        })
    }
    /// Write the captured tiles back into `store`, consuming the diff.
    pub fn apply_and_clear(self, store: &mut TileStore) -> Result<AffectedArea, DiffError> {
        if store.has_pending() {
            return Err(DiffError::PendingOperations);
        }
        if store.tile_size() != self.tile_size {
            return Err(DiffError::TileSizeMismatch {
                captured: self.tile_size,
                store: store.tile_size(),
            });
        }
        let mut area = AffectedArea::default();
        if self.exhaustive {
            let extra: Vec<_> = store
                .allocated_tiles()
                .filter(|coord| !self.tiles.contains_key(coord))
                .collect();
            for coord in extra {
                store.restore_tile(coord, None);
                area.tiles.insert(coord);
            }
            store.restore_size(self.size);
        }
        for (coord, tile) in self.tiles {
            let rect = coord.pixel_rect(self.tile_size);
            store.restore_tile(coord, tile);
            area.tiles.insert(coord);
            area.bounds = area.bounds.union(&rect.intersect(&store.bounds()));
        }
        log::trace!("restored {} tiles", area.tiles.len());
        Ok(area)
    }
    /// Fold a later capture of the same store into this one. Coordinates already captured keep
    /// their older (earlier) content.
    fn absorb(&mut self, later: Self) {
        for (coord, tile) in later.tiles {
            self.tiles.entry(coord).or_insert(tile);
        }
        if later.exhaustive && !self.exhaustive {
            self.exhaustive = true;
            self.size = later.size;
        }
    }
}

/// An ordered list of diffs over several stores, keyed by whatever names a store to the owner.
pub struct DiffChain<K> {
    diffs: Vec<(K, ChangeDiff)>,
}
impl<K> Default for DiffChain<K> {
    fn default() -> Self {
        Self { diffs: Vec::new() }
    }
}
impl<K: std::fmt::Debug> std::fmt::Debug for DiffChain<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.diffs.iter()).finish()
    }
}
impl<K: PartialEq> DiffChain<K> {
    /// Append a diff. A second diff for the same key is merged into the first, so a store is
    /// only ever restored once, to its oldest state.
    pub fn push(&mut self, key: K, diff: ChangeDiff) {
        if let Some((_, existing)) = self.diffs.iter_mut().find(|(k, _)| *k == key) {
            existing.absorb(diff);
        } else {
            self.diffs.push((key, diff));
        }
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.diffs.is_empty()
    }
    #[must_use]
    pub fn len(&self) -> usize {
        self.diffs.len()
    }
    /// Replay oldest-to-newest. `resolve` maps a key to its store within `ctx`. A missing
    /// store aborts, leaving the remaining diffs unapplied.
    pub fn apply_and_clear<C, F>(
        self,
        ctx: &mut C,
        resolve: F,
    ) -> Result<Vec<(K, AffectedArea)>, ChainError<K>>
    where
        C: ?Sized,
        K: std::fmt::Debug,
        F: for<'c> Fn(&'c mut C, &K) -> Option<&'c mut TileStore>,
    {
        let mut out = Vec::with_capacity(self.diffs.len());
        for (key, diff) in self.diffs {
            let Some(store) = resolve(ctx, &key) else {
                return Err(ChainError::MissingStore(key));
            };
            match diff.apply_and_clear(store) {
                Ok(area) => out.push((key, area)),
                Err(e) => return Err(ChainError::Diff(key, e)),
            }
        }
        Ok(out)
    }
    /// Total bytes of captured pixels.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        self.diffs.iter().map(|(_, diff)| diff.memory_usage()).sum()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ChainError<K: std::fmt::Debug> {
    #[error("store {0:?} no longer exists")]
    MissingStore(K),
    #[error("store {0:?}: {1}")]
    Diff(K, DiffError),
}
