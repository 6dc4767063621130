//! Turning finished tiles into GPU geometry: the [`VoxelBaker`] meshes tiles and a [`BakeStorage`] packs the meshes into
//! shared vertex and index buffers for draw call assembly.

mod baker;
mod buffer;
mod config;
mod storage;

pub use baker::*;
pub use buffer::*;
pub use config::*;
pub use storage::*;
