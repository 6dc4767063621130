use crate::tile_pos::BlockExtent;

use lodtile_core::glam::{IVec3, UVec3};

/// Returned by a [`WorldSampler`] when the requested region may not be procedurally generated on demand.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[error("world data in {region:?} is not allowed to be generated on demand")]
pub struct GenerationNotAllowed {
    pub region: BlockExtent,
}

/// How opaque a block state is, for the purposes of surface extraction. Ordered from least to most opaque.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(u8)]
pub enum BlockType {
    Invisible = 0,
    Transparent = 1,
    Opaque = 2,
}

impl Default for BlockType {
    fn default() -> Self {
        BlockType::Invisible
    }
}

#[inline]
pub fn pack_light(sky_light: u8, block_light: u8) -> u8 {
    (sky_light << 4) | (block_light & 0xF)
}

#[inline]
pub fn unpack_sky_light(packed: u8) -> u8 {
    packed >> 4
}

#[inline]
pub fn unpack_block_light(packed: u8) -> u8 {
    packed & 0xF
}

/// Raw world data for one block.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Sample {
    pub state: u32,
    pub biome: u16,
    /// See [`pack_light`].
    pub light: u8,
}

/// A dense cuboid of [`Sample`]s, x-fastest.
#[derive(Clone, Debug, Default)]
pub struct SampleBuffer {
    origin: IVec3,
    size: UVec3,
    samples: Vec<Sample>,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sizes the buffer for the cuboid `[origin, origin + size)` and fills it with default samples.
    pub fn prepare(&mut self, origin: IVec3, size: UVec3) {
        self.origin = origin;
        self.size = size;
        self.samples.clear();
        self.samples.resize((size.x * size.y * size.z) as usize, Sample::default());
    }

    #[inline]
    pub fn origin(&self) -> IVec3 {
        self.origin
    }

    #[inline]
    pub fn size(&self) -> UVec3 {
        self.size
    }

    pub fn extent(&self) -> BlockExtent {
        BlockExtent::from_min_and_max(self.origin, self.origin + self.size.as_ivec3() - IVec3::ONE)
    }

    /// Index of the sample at offset `p` from the origin.
    #[inline]
    pub fn index(&self, p: UVec3) -> usize {
        debug_assert!(p.cmplt(self.size).all());
        (p.x + self.size.x * (p.y + self.size.y * p.z)) as usize
    }

    #[inline]
    pub fn get(&self, p: UVec3) -> Sample {
        self.samples[self.index(p)]
    }

    #[inline]
    pub fn set(&mut self, p: UVec3, sample: Sample) {
        let i = self.index(p);
        self.samples[i] = sample;
    }

    pub fn as_slice(&self) -> &[Sample] {
        &self.samples
    }

    /// Fills every sample from its block coordinates.
    pub fn fill_with(&mut self, mut f: impl FnMut(IVec3) -> Sample) {
        let (origin, size) = (self.origin, self.size);
        let mut i = 0;
        for z in 0..size.z {
            for y in 0..size.y {
                for x in 0..size.x {
                    self.samples[i] = f(origin + UVec3::new(x, y, z).as_ivec3());
                    i += 1;
                }
            }
        }
    }
}

/// Read access to raw world data.
///
/// Implementations are shared between generation workers, so they must tolerate concurrent calls.
pub trait WorldSampler: Send + Sync {
    /// Fills `out` with the samples of its prepared cuboid.
    fn fetch(&self, out: &mut SampleBuffer) -> Result<(), GenerationNotAllowed>;

    /// A volume containing `query` throughout which data is known to be available without on-demand generation. Used to
    /// decide whether several tiles should be generated in one batch.
    fn guaranteed_data_available_volume(&self, query: BlockExtent) -> BlockExtent {
        query
    }

    /// Classifies a block state for surface extraction.
    fn block_type(&self, state: u32) -> BlockType;
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn light_packing() {
        let packed = pack_light(15, 7);
        assert_eq!(packed, 0xF7);
        assert_eq!(unpack_sky_light(packed), 15);
        assert_eq!(unpack_block_light(packed), 7);
        assert_eq!(pack_light(1, 0x1F), 0x1F);
    }

    #[test]
    fn block_types_order_by_opacity() {
        assert!(BlockType::Invisible < BlockType::Transparent);
        assert!(BlockType::Transparent < BlockType::Opaque);
    }

    #[test]
    fn fill_visits_block_coordinates() {
        let mut buffer = SampleBuffer::new();
        buffer.prepare(IVec3::new(-1, 10, 5), UVec3::new(2, 3, 4));
        buffer.fill_with(|p| Sample {
            state: (p.x + 10) as u32,
            biome: p.y as u16,
            light: p.z as u8,
        });
        assert_eq!(buffer.as_slice().len(), 24);
        assert_eq!(
            buffer.get(UVec3::new(1, 2, 3)),
            Sample {
                state: 10,
                biome: 12,
                light: 8
            }
        );
        assert_eq!(buffer.extent().max, IVec3::new(0, 12, 8));
    }
}
