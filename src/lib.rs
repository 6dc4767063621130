//! A level-of-detail terrain engine built from fixed-size tiles.
//!
//! Level 0 tiles are extracted from world samples, every coarser level is fitted from the level below, and finished tiles are
//! meshed into shared GPU buffers. The [`TileWorld`] ties the CPU side together; [`Config`] is loaded from a RON file.

mod config;
mod scratch;
mod world;

pub use config::{Config, ConfigError};
pub use scratch::ThreadLocalTiles;
pub use world::{TileWorld, WorldError};

pub use lodtile_map as map;
pub use lodtile_renderer as renderer;
