use crate::sampling::{pack_light, BlockType, GenerationNotAllowed, Sample, SampleBuffer, WorldSampler};
use crate::tile_pos::BlockExtent;

use lodtile_core::glam::IVec3;
use lodtile_core::SmallKeyHashSet;

pub const AIR: u32 = 0;
pub const STONE: u32 = 1;

fn block_type(state: u32) -> BlockType {
    if state == AIR {
        BlockType::Invisible
    } else {
        BlockType::Opaque
    }
}

/// Stone below block `y = height`, fully lit air above. Biome 7 everywhere.
pub struct FlatWorld {
    pub height: i32,
    pub available: Option<BlockExtent>,
}

impl FlatWorld {
    pub fn new(height: i32) -> Self {
        Self { height, available: None }
    }

    pub fn with_available(mut self, extent: BlockExtent) -> Self {
        self.available = Some(extent);
        self
    }
}

impl WorldSampler for FlatWorld {
    fn fetch(&self, out: &mut SampleBuffer) -> Result<(), GenerationNotAllowed> {
        out.fill_with(|p| {
            let solid = p.y < self.height;
            Sample {
                state: if solid { STONE } else { AIR },
                biome: 7,
                light: if solid { 0 } else { pack_light(15, 0) },
            }
        });
        Ok(())
    }

    fn guaranteed_data_available_volume(&self, query: BlockExtent) -> BlockExtent {
        self.available.unwrap_or(query)
    }

    fn block_type(&self, state: u32) -> BlockType {
        block_type(state)
    }
}

/// Air everywhere except for a set of stone blocks.
pub struct BlobWorld {
    solids: SmallKeyHashSet<IVec3>,
    light: fn(IVec3) -> u8,
}

impl BlobWorld {
    pub fn new(solids: &[IVec3]) -> Self {
        Self {
            solids: solids.iter().copied().collect(),
            light: |_| pack_light(15, 0),
        }
    }

    pub fn with_light(mut self, light: fn(IVec3) -> u8) -> Self {
        self.light = light;
        self
    }
}

impl WorldSampler for BlobWorld {
    fn fetch(&self, out: &mut SampleBuffer) -> Result<(), GenerationNotAllowed> {
        out.fill_with(|p| Sample {
            state: if self.solids.contains(&p) { STONE } else { AIR },
            biome: 0,
            light: (self.light)(p),
        });
        Ok(())
    }

    fn block_type(&self, state: u32) -> BlockType {
        block_type(state)
    }
}

/// Refuses every fetch.
pub struct ForbiddenWorld;

impl WorldSampler for ForbiddenWorld {
    fn fetch(&self, out: &mut SampleBuffer) -> Result<(), GenerationNotAllowed> {
        Err(GenerationNotAllowed { region: out.extent() })
    }

    fn block_type(&self, state: u32) -> BlockType {
        block_type(state)
    }
}
