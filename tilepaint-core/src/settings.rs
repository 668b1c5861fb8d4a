use crate::color::ColorSpace;
use crate::tile::{self, Resolution};

/// Tunables of the editing core. Loaded by the application, so every field has a default and
/// unknown or missing fields are tolerated.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Side length of a tile, in pixels. Power of two.
    pub tile_size: u32,
    /// Undo steps kept before the oldest are made permanent.
    pub max_undo_steps: usize,
    /// Resolutions re-rendered after every batch.
    pub active_resolutions: Vec<Resolution>,
    pub color_space: ColorSpace,
    /// Worker threads for tile rendering. Zero lets rayon decide.
    pub render_threads: usize,
}
impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tile_size: tile::DEFAULT_TILE_SIZE,
            max_undo_steps: 256,
            active_resolutions: vec![Resolution::Full],
            color_space: ColorSpace::default(),
            render_threads: 0,
        }
    }
}
impl EngineSettings {
    const MAX_RENDER_THREADS: usize = 256;
    /// Replace out-of-range values with the nearest usable ones, logging each fix.
    #[must_use]
    pub fn validated(mut self) -> Self {
        if !tile::is_valid_tile_size(self.tile_size) {
            let fixed = self
                .tile_size
                .clamp(tile::MIN_TILE_SIZE, tile::MAX_TILE_SIZE)
                .next_power_of_two()
                .min(tile::MAX_TILE_SIZE);
            log::warn!("tile size {} unsupported, using {fixed}", self.tile_size);
            self.tile_size = fixed;
        }
        if self.max_undo_steps == 0 {
            log::warn!("max undo steps must be at least one");
            self.max_undo_steps = 1;
        }
        self.active_resolutions.sort_unstable();
        self.active_resolutions.dedup();
        if self.active_resolutions.is_empty() {
            self.active_resolutions.push(Resolution::Full);
        }
        if self.render_threads > Self::MAX_RENDER_THREADS {
            log::warn!("{} render threads is excessive, clamping", self.render_threads);
            self.render_threads = Self::MAX_RENDER_THREADS;
        }
        self
    }
}
