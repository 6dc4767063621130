use crate::tile_pos::MAX_LODS;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct MapConfig {
    /// Tiles are built for levels `0..max_levels`. Clamped to [`MAX_LODS`].
    pub max_levels: u8,
    /// Idle tiles kept by the tile pool.
    pub tile_pool_capacity: usize,
    /// Store snapshots LZ4-compressed.
    pub compress_snapshots: bool,
}

impl MapConfig {
    pub fn levels(&self) -> u8 {
        self.max_levels.min(MAX_LODS)
    }
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            max_levels: 10,
            tile_pool_capacity: 256,
            compress_snapshots: true,
        }
    }
}
