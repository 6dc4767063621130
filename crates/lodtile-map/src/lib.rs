//! The lodtile map data model and the CPU side of the tile pipeline.
//!
//! # Tiles
//!
//! A [`Tile`] holds the surface of a cube of `TILE_VOXELS³` voxels as sparse, edge-based data: for each voxel that the
//! surface passes near, which of its 3 primary edges cross a material boundary (and in which direction), the material on
//! each crossing edge, and a fixed-point vertex position inside the voxel. A voxel at level `L` is `2^L` blocks wide.
//!
//! # Pipeline
//!
//! Level 0 tiles are extracted from raw world samples by the [`ExactTileGenerator`]. Every other level is built by the
//! [`TileScaler`] from the level below, fitting each parent vertex to the children's surface with a QEF solve. Finished
//! tiles are stored and shipped as [`TileSnapshot`]s.

mod config;
mod generator;
mod sampling;
mod scaler;
mod snapshot;
mod tile;
mod tile_pos;

#[cfg(test)]
mod test_worlds;

pub use config::*;
pub use generator::*;
pub use sampling::*;
pub use scaler::*;
pub use snapshot::*;
pub use tile::*;
pub use tile_pos::*;

pub use lodtile_core as core;
