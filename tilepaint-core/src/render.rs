//! # Renderer
//!
//! Pull-based, tile-at-a-time evaluation of a document's node graph. Every node output is
//! cached per tile, keyed by a content hash of the node's own parameters combined with the
//! hashes of everything feeding it, so after a small edit only the nodes downstream of the
//! edit are executed again.

use std::hash::Hash;
use std::sync::{Arc, Weak};

use rayon::prelude::*;

use crate::document::Document;
use crate::graph::{NodeError, NodeGraph, NodeId, Outputs, RenderContext, Value};
use crate::tile::{Resolution, Surface, Tile, TileCoord};
use crate::util::{ContentHasher, RectI};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("node {node} failed: {source}")]
    Node {
        node: NodeId,
        #[source]
        source: NodeError,
    },
    #[error("output node produced no image")]
    NoImage,
}

/// Where a cached output applies.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
struct TileKey {
    tile: TileCoord,
    resolution: Resolution,
    frame: u32,
}
struct CacheEntry {
    hash: u64,
    outputs: Outputs,
}

/// Rendered tiles of one region, sorted by coordinate.
#[derive(Clone, Debug, Default)]
pub struct RenderedRegion {
    pub resolution: Resolution,
    pub frame: u32,
    pub tiles: Vec<(TileCoord, Arc<Tile>)>,
}
impl RenderedRegion {
    #[must_use]
    pub fn get(&self, coord: TileCoord) -> Option<&Arc<Tile>> {
        self.tiles
            .binary_search_by_key(&coord, |(c, _)| *c)
            .ok()
            .map(|idx| &self.tiles[idx].1)
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

/// Renders one document. Holds it weakly, so a closed document simply renders nothing.
pub struct Renderer {
    document: Weak<parking_lot::RwLock<Document>>,
    cache: parking_lot::Mutex<hashbrown::HashMap<(NodeId, TileKey), CacheEntry>>,
    executions: parking_lot::Mutex<hashbrown::HashMap<NodeId, usize>>,
    /// Held for the duration of every render. Rendering is not reentrant.
    busy: parking_lot::Mutex<()>,
    pool: Option<rayon::ThreadPool>,
}
impl Renderer {
    /// `threads == 0` renders on the global rayon pool.
    #[must_use]
    pub fn new(document: &Arc<parking_lot::RwLock<Document>>, threads: usize) -> Self {
        let pool = (threads != 0)
            .then(|| {
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|idx| format!("tile-render-{idx}"))
                    .build()
            })
            .and_then(|pool| {
                pool.map_err(|err| {
                    log::warn!("failed to build render pool, using global pool: {err}");
                })
                .ok()
            });
        Self {
            document: Arc::downgrade(document),
            cache: parking_lot::Mutex::default(),
            executions: parking_lot::Mutex::default(),
            busy: parking_lot::Mutex::new(()),
            pool,
        }
    }
    /// Render the given tiles of the document at `resolution`. Tiles outside the document are
    /// skipped. A closed document renders nothing.
    pub fn render_region(
        &self,
        tiles: impl IntoIterator<Item = TileCoord>,
        resolution: Resolution,
        frame: u32,
    ) -> Result<RenderedRegion, RenderError> {
        let Some(document) = self.document.upgrade() else {
            log::debug!("render requested for a closed document");
            return Ok(RenderedRegion {
                resolution,
                frame,
                tiles: Vec::new(),
            });
        };
        let _busy = self.busy.lock();
        let document = document.read();
        self.render_graph(&document, &document.graph, tiles, resolution, frame, true)
    }
    /// Render only the chosen members (and whatever feeds them) without touching the real graph
    /// or the cache. Returns `None` immediately if a render is already in progress.
    pub fn render_preview(
        &self,
        members: &hashbrown::HashSet<NodeId>,
        tiles: impl IntoIterator<Item = TileCoord>,
        resolution: Resolution,
        frame: u32,
    ) -> Option<Result<RenderedRegion, RenderError>> {
        let Some(_busy) = self.busy.try_lock() else {
            log::trace!("preview skipped, renderer busy");
            return None;
        };
        let document = self.document.upgrade()?;
        let document = document.read();
        let graph = document.graph.filtered(members);
        Some(self.render_graph(&document, &graph, tiles, resolution, frame, false))
    }
    /// The whole document as one image at `resolution`.
    pub fn render_document(&self, resolution: Resolution) -> Result<Surface, RenderError> {
        let Some(document) = self.document.upgrade() else {
            return Ok(Surface::new(0, 0));
        };
        let (size, tile_size) = {
            let document = document.read();
            (document.size(), document.tile_size())
        };
        let tiles: Vec<_> = TileCoord::covering(RectI::from_size(size), tile_size).collect();
        let region = self.render_region(tiles, resolution, 0)?;

        let divisor = resolution.divisor();
        let extent = i64::from(resolution.tile_extent(tile_size));
        let mut surface = Surface::new(size[0].div_ceil(divisor), size[1].div_ceil(divisor));
        for (coord, tile) in &region.tiles {
            surface.paste_tile(tile, [i64::from(coord.x) * extent, i64::from(coord.y) * extent]);
        }
        Ok(surface)
    }
    /// Forget cached outputs of nodes no longer in the document, and of tiles
    /// that no longer touch its bounds.
    pub fn prune(&self) {
        let Some(document) = self.document.upgrade() else {
            self.cache.lock().clear();
            return;
        };
        let document = document.read();
        let mut cache = self.cache.lock();
        let before = cache.len();
        let (bounds, tile_size) = (document.bounds(), document.tile_size());
        cache.retain(|(node, key), _| {
            document.graph.contains(*node)
                && !key.tile.pixel_rect(tile_size).intersect(&bounds).is_empty()
        });
        self.executions
            .lock()
            .retain(|node, _| document.graph.contains(*node));
        log::debug!("pruned {} cached outputs", before - cache.len());
    }
    /// Drop every cached output.
    pub fn invalidate(&self) {
        self.cache.lock().clear();
    }
    /// How many times `node` has been executed, across all tiles.
    #[must_use]
    pub fn execution_count(&self, node: NodeId) -> usize {
        self.executions.lock().get(&node).copied().unwrap_or(0)
    }
    /// Hash of the cached output of `node` for a tile, if one is cached.
    #[must_use]
    pub fn cached_hash(
        &self,
        node: NodeId,
        tile: TileCoord,
        resolution: Resolution,
        frame: u32,
    ) -> Option<u64> {
        let key = TileKey {
            tile,
            resolution,
            frame,
        };
        self.cache.lock().get(&(node, key)).map(|entry| entry.hash)
    }

    fn render_graph(
        &self,
        document: &Document,
        graph: &NodeGraph,
        tiles: impl IntoIterator<Item = TileCoord>,
        resolution: Resolution,
        frame: u32,
        cached: bool,
    ) -> Result<RenderedRegion, RenderError> {
        let image = document.bounds();
        let tile_size = document.tile_size();
        let mut tiles: Vec<TileCoord> = tiles
            .into_iter()
            .filter(|coord| !coord.pixel_rect(tile_size).intersect(&image).is_empty())
            .collect();
        tiles.sort_unstable();
        tiles.dedup();
        let order = graph.execution_order();

        let render = || {
            tiles
                .par_iter()
                .map(|tile| {
                    let ctx = RenderContext {
                        frame,
                        resolution,
                        tile: *tile,
                        tile_size,
                        image,
                        color_space: document.color_space,
                    };
                    self.render_tile(graph, &order, &ctx, cached)
                        .map(|rendered| (*tile, rendered))
                })
                .collect::<Result<Vec<_>, _>>()
        };
        let tiles = match &self.pool {
            Some(pool) => pool.install(render),
            None => render(),
        }?;
        log::debug!(
            "rendered {} tiles at {} over {} nodes",
            tiles.len(),
            resolution.as_ref(),
            order.len()
        );
        Ok(RenderedRegion {
            resolution,
            frame,
            tiles,
        })
    }
    /// Walk the execution order for one tile, reusing cached outputs whose hash is unchanged.
    fn render_tile(
        &self,
        graph: &NodeGraph,
        order: &[NodeId],
        ctx: &RenderContext,
        cached: bool,
    ) -> Result<Arc<Tile>, RenderError> {
        let key = TileKey {
            tile: ctx.tile,
            resolution: ctx.resolution,
            frame: ctx.frame,
        };
        let mut values: hashbrown::HashMap<NodeId, (u64, Outputs)> =
            hashbrown::HashMap::with_capacity(order.len());
        for &id in order {
            let (Some(node), Some(sources)) = (graph.get(id), graph.inputs_of(id)) else {
                continue;
            };
            let mut hasher = ContentHasher::new();
            node.kind().hash(&mut hasher);
            ctx.hash(&mut hasher);
            node.hash_content(ctx, &mut hasher);
            for source in sources {
                match source.and_then(|source| Some((source, values.get(&source.node)?))) {
                    Some((source, (upstream, _))) => (1u8, *upstream, source.socket).hash(&mut hasher),
                    None => 0u8.hash(&mut hasher),
                }
            }
            let hash = std::hash::Hasher::finish(&hasher);

            let hit = if cached {
                self.cache
                    .lock()
                    .get(&(id, key))
                    .filter(|entry| entry.hash == hash)
                    .map(|entry| entry.outputs.clone())
            } else {
                None
            };
            let outputs = if let Some(outputs) = hit {
                outputs
            } else {
                let inputs: smallvec::SmallVec<[Option<&Value>; 4]> = sources
                    .iter()
                    .map(|source| {
                        source.and_then(|source| {
                            values
                                .get(&source.node)
                                .and_then(|(_, outputs)| outputs.get(source.socket))
                        })
                    })
                    .collect();
                let outputs = node
                    .execute(ctx, &inputs)
                    .map_err(|source| RenderError::Node { node: id, source })?;
                *self.executions.lock().entry(id).or_default() += 1;
                if cached {
                    self.cache.lock().insert(
                        (id, key),
                        CacheEntry {
                            hash,
                            outputs: outputs.clone(),
                        },
                    );
                }
                outputs
            };
            values.insert(id, (hash, outputs));
        }
        let image = values
            .get(&graph.output())
            .and_then(|(_, outputs)| outputs.first())
            .and_then(Value::image)
            .cloned()
            .ok_or(RenderError::NoImage)?;
        Ok(clip_to_image(ctx, image))
    }
}

/// Make pixels of edge tiles that lie outside the document transparent.
fn clip_to_image(ctx: &RenderContext, tile: Arc<Tile>) -> Arc<Tile> {
    let rect = ctx.document_rect();
    if rect.intersect(&ctx.image) == rect {
        return tile;
    }
    let mut tile = Arc::unwrap_or_clone(tile);
    let extent = tile.size();
    for ly in 0..extent {
        for lx in 0..extent {
            let [x, y] = ctx.document_pos([lx, ly]);
            if !ctx.image.contains(x, y) {
                tile.set(lx, ly, crate::color::Rgba8::TRANSPARENT);
            }
        }
    }
    Arc::new(tile)
}
