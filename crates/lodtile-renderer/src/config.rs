use lodtile_map::core::arena::Growth;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Give every LOD level its own vertex and index buffers.
    pub per_level_storage: bool,
    /// Ignore fitted vertex positions and place every vertex at its voxel's center.
    pub force_blocky_mesh: bool,
    pub buffer_growth: Growth,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            per_level_storage: true,
            force_blocky_mesh: false,
            buffer_growth: Growth::default(),
        }
    }
}
