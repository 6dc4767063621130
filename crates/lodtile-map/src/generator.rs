//! Extraction of level 0 tiles directly from world samples.

use crate::sampling::{
    pack_light, unpack_block_light, unpack_sky_light, BlockType, GenerationNotAllowed, SampleBuffer, WorldSampler,
};
use crate::tile::{edge_bits, Tile, TileData, EDGE_COUNT, EDGE_DIR_NEGATIVE, EDGE_DIR_POSITIVE, TILE_VOXELS};
use crate::tile_pos::{child_offset, BlockExtent, TilePos};

use itertools::iproduct;
use lodtile_core::glam::{IVec3, UVec3};
use lodtile_core::pool::{Pool, Recycle};

/// Offset of the sample cache from the tile's minimum block.
const CACHE_MIN: i32 = -1;
/// The cache covers `[CACHE_MIN, TILE_VOXELS + 1)` on each axis.
const CACHE_SIZE: u32 = TILE_VOXELS + 2;

/// Batches never extend further than this many tiles from the requested one on any axis.
pub const MAX_BATCH_RADIUS: i32 = 2;

const CORNER_COUNT: usize = 8;

/// Builds level 0 tiles from world samples.
///
/// Voxel `X` of a tile has its 8 corners on the samples `X + {0, 1}³`. Only the 3 edges meeting at corner 7 belong to the
/// voxel; the edge on axis `a` runs from corner `7 ^ (1 << a)` to corner 7.
pub struct ExactTileGenerator {
    scratch: Pool<GeneratorScratch>,
}

#[derive(Default)]
struct GeneratorScratch {
    samples: SampleBuffer,
    types: Vec<BlockType>,
}

impl Recycle for GeneratorScratch {
    fn reset(&mut self) {
        // Both buffers are fully rewritten on every use.
    }
}

impl Default for ExactTileGenerator {
    fn default() -> Self {
        Self::new(16)
    }
}

impl ExactTileGenerator {
    /// `scratch_capacity` bounds how many idle sample caches are kept for reuse between calls.
    pub fn new(scratch_capacity: usize) -> Self {
        Self {
            scratch: Pool::new(scratch_capacity, GeneratorScratch::default),
        }
    }

    /// Overwrites `out` with the surface data of the level 0 tile at `pos`.
    ///
    /// On error, `out` is left empty.
    pub fn generate(
        &self,
        sampler: &(impl WorldSampler + ?Sized),
        pos: TilePos,
        out: &mut Tile,
    ) -> Result<(), GenerationNotAllowed> {
        assert_eq!(pos.level, 0, "exact generation only produces level 0 tiles, got {:?}", pos);

        out.reset();

        let mut scratch = self.scratch.acquire();
        let GeneratorScratch { samples, types } = &mut *scratch;
        samples.prepare(cache_extent(pos).min, UVec3::splat(CACHE_SIZE));
        sampler.fetch(samples)?;
        types.clear();
        types.extend(samples.as_slice().iter().map(|s| sampler.block_type(s.state)));

        let mut corners = [0; CORNER_COUNT];
        let mut corner_types = [BlockType::Invisible; CORNER_COUNT];
        for (z, y, x) in iproduct!(0..TILE_VOXELS, 0..TILE_VOXELS, 0..TILE_VOXELS) {
            let base = UVec3::new(x, y, z) + UVec3::ONE;
            for c in 0..CORNER_COUNT {
                corners[c] = samples.index(base + child_offset(c as u8).as_uvec3());
                corner_types[c] = types[corners[c]];
            }
            if corner_types.iter().all(|&t| t == corner_types[0]) {
                continue;
            }

            let mut data = TileData {
                biome: samples.as_slice()[corners[0]].biome,
                ..Default::default()
            };
            let mut lit = LightSum::default();
            for axis in 0..EDGE_COUNT {
                let (c0, c1) = (7 ^ (1 << axis), 7);
                let (t0, t1) = (corner_types[c0], corner_types[c1]);
                if t0 == t1 {
                    continue;
                }
                // The state comes from the more opaque end, the light from the other.
                let (dir, opaque, clear) = if t0 < t1 {
                    (EDGE_DIR_NEGATIVE, c1, c0)
                } else {
                    (EDGE_DIR_POSITIVE, c0, c1)
                };
                data.edges |= edge_bits(dir, axis);
                data.states[axis] = samples.as_slice()[corners[opaque]].state;
                lit.add(samples.as_slice()[corners[clear]].light);
            }
            if data.edges == 0 {
                let min_type = corner_types.iter().copied().min().unwrap_or_default();
                for c in 0..CORNER_COUNT {
                    if corner_types[c] == min_type {
                        lit.add(samples.as_slice()[corners[c]].light);
                    }
                }
            }
            data.light = lit.average();

            out.set(x, y, z, &data);
        }
        out.set_extra(0);

        Ok(())
    }
}

/// The sample cuboid that generating `pos` reads.
pub fn cache_extent(pos: TilePos) -> BlockExtent {
    let min = pos.min_block() + IVec3::splat(CACHE_MIN);
    BlockExtent::from_min_and_max(min, min + IVec3::splat(CACHE_SIZE as i32 - 1))
}

/// Returns the level 0 tiles worth generating together with `pos`: every tile near `pos` whose sample cache lies within the
/// volume `sampler` guarantees is available. If the sampler reports nothing beyond the tile's own cache, that is just `pos`.
pub fn batch_generation_group(sampler: &(impl WorldSampler + ?Sized), pos: TilePos) -> Vec<TilePos> {
    let initial = cache_extent(pos);
    let available = sampler.guaranteed_data_available_volume(initial);
    if available == initial || !available.contains_extent(&initial) {
        return vec![pos];
    }

    let tile = TILE_VOXELS as i64;
    let cache_hi = CACHE_MIN as i64 + CACHE_SIZE as i64 - 1;
    let range = |center: i32, min: i32, max: i32| {
        let lo = ceil_div(min as i64 - CACHE_MIN as i64, tile).max(center as i64 - MAX_BATCH_RADIUS as i64);
        let hi = (max as i64 - cache_hi).div_euclid(tile).min(center as i64 + MAX_BATCH_RADIUS as i64);
        lo as i32..=hi as i32
    };
    let xs = range(pos.x, available.min.x, available.max.x);
    let ys = range(pos.y, available.min.y, available.max.y);
    let zs = range(pos.z, available.min.z, available.max.z);

    iproduct!(zs, ys, xs)
        .map(|(z, y, x)| TilePos::new(0, x, y, z))
        .collect()
}

fn ceil_div(a: i64, b: i64) -> i64 {
    -((-a).div_euclid(b))
}

#[derive(Default)]
struct LightSum {
    sky: u32,
    block: u32,
    samples: u32,
}

impl LightSum {
    fn add(&mut self, light: u8) {
        self.sky += unpack_sky_light(light) as u32;
        self.block += unpack_block_light(light) as u32;
        self.samples += 1;
    }

    fn average(&self) -> u8 {
        if self.samples > 1 {
            pack_light((self.sky / self.samples) as u8, (self.block / self.samples) as u8)
        } else {
            pack_light(self.sky as u8, self.block as u8)
        }
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
