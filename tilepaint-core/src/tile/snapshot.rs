//! Plain-data form of a tile store, for external codecs.
//!
//! The core defines no file format. This is just the shape that an encoder needs to read and
//! a decoder needs to produce: image size, tile size, and the raw premultiplied RGBA8 bytes of
//! every allocated full-resolution tile. Every [`Resolution`](super::Resolution) below full is derived from those
//! bytes on read, so no level list is stored.

use super::store::TileEntry;
use super::{Tile, TileCoord, TileStore, TileStoreError};

#[derive(Clone, PartialEq, Eq, Debug, serde::Serialize, serde::Deserialize)]
pub struct TileSnapshot {
    pub coord: TileCoord,
    /// `tile_size * tile_size * 4` bytes, row-major, premultiplied RGBA8.
    pub bytes: Vec<u8>,
}

#[derive(Clone, PartialEq, Eq, Debug, serde::Serialize, serde::Deserialize)]
pub struct TileStoreSnapshot {
    pub size: [u32; 2],
    pub tile_size: u32,
    pub tiles: Vec<TileSnapshot>,
}

impl TileStore {
    /// Snapshot of the committed state. Tiles are sorted by coordinate so equal stores give
    /// equal snapshots.
    #[must_use]
    pub fn to_snapshot(&self) -> TileStoreSnapshot {
        let mut tiles: Vec<_> = self
            .committed
            .iter()
            .map(|(coord, entry)| TileSnapshot {
                coord: *coord,
                bytes: entry.full.as_bytes().to_vec(),
            })
            .collect();
        tiles.sort_unstable_by_key(|tile| tile.coord);
        TileStoreSnapshot {
            size: self.size,
            tile_size: self.tile_size,
            tiles,
        }
    }
    pub fn from_snapshot(snapshot: &TileStoreSnapshot) -> Result<Self, TileStoreError> {
        let mut store = Self::new(snapshot.size, snapshot.tile_size)?;
        let bounds = store.bounds();
        for tile in &snapshot.tiles {
            let rect = tile.coord.pixel_rect(snapshot.tile_size);
            if rect.intersect(&bounds).is_empty() {
                return Err(TileStoreError::MalformedTile(tile.coord));
            }
            let pixels = Tile::from_bytes(snapshot.tile_size, &tile.bytes)
                .ok_or(TileStoreError::MalformedTile(tile.coord))?;
            if !pixels.is_transparent() {
                store.committed.insert(tile.coord, TileEntry::new(pixels));
            }
        }
        Ok(store)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::blend::Blend;
    use crate::color::Rgba8;
    use crate::tile::{DrawOperation, Resolution, Shape};

    #[test]
    fn snapshot_restores_pixels() {
        let mut store = TileStore::new([100, 70], 32).unwrap();
        store.enqueue(DrawOperation::Shape {
            shape: Shape::ellipse(5.0, 5.0, 80.0, 50.0),
            color: Rgba8::from_straight(200, 10, 10, 200),
            blend: Blend::default(),
            antialias: true,
        });
        store.commit();
        let snapshot = store.to_snapshot();
        let restored = TileStore::from_snapshot(&snapshot).unwrap();
        assert_eq!(restored.to_snapshot(), snapshot);
        assert_eq!(restored.read_pixel([45, 30]), store.read_pixel([45, 30]));
        let coord = TileCoord::new(1, 1);
        for resolution in <Resolution as strum::IntoEnumIterator>::iter() {
            assert_eq!(
                restored.read_tile(coord, resolution),
                store.read_tile(coord, resolution)
            );
        }
    }
    #[test]
    fn rejects_short_tiles() {
        let snapshot = TileStoreSnapshot {
            size: [64, 64],
            tile_size: 64,
            tiles: vec![TileSnapshot {
                coord: TileCoord::new(0, 0),
                bytes: vec![0; 12],
            }],
        };
        assert_eq!(
            TileStore::from_snapshot(&snapshot).unwrap_err(),
            TileStoreError::MalformedTile(TileCoord::new(0, 0))
        );
    }
}
