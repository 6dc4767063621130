use crate::snapshot::SnapshotError;

use lodtile_core::pool::{Pool, Recycle};
use lodtile_core::static_assertions::const_assert;
use ndshape::{ConstShape, ConstShape3u32};
use std::fmt;

pub const TILE_SHIFT: u32 = 4;
pub const TILE_VOXELS: u32 = 1 << TILE_SHIFT;
pub const TILE_MASK: u32 = TILE_VOXELS - 1;

pub type TileShape = ConstShape3u32<TILE_VOXELS, TILE_VOXELS, TILE_VOXELS>;
pub const TILE_SIZE: usize = TileShape::SIZE as usize;

// Voxel slots are addressed by `i16` and serialized as `u16`.
const_assert!(TILE_SIZE <= i16::MAX as usize);

/// Number of primary axes, and so of surface-crossing edges per voxel.
pub const EDGE_COUNT: usize = 3;

pub const EDGE_DIR_NONE: u8 = 0;
pub const EDGE_DIR_POSITIVE: u8 = 1;
pub const EDGE_DIR_NEGATIVE: u8 = 2;
pub const EDGE_DIR_BOTH: u8 = EDGE_DIR_POSITIVE | EDGE_DIR_NEGATIVE;
pub const EDGE_DIR_MASK: u8 = 0b11;

/// Vertex offsets are fixed point with this many fractional bits.
pub const POS_FRACT_SHIFT: u32 = 4;
/// Fixed-point representation of 1.0 (one voxel edge length).
pub const POS_ONE: u8 = 1 << POS_FRACT_SHIFT;

#[inline]
pub fn edge_dir(edges: u8, axis: usize) -> u8 {
    (edges >> (axis << 1)) & EDGE_DIR_MASK
}

#[inline]
pub fn edge_bits(dir: u8, axis: usize) -> u8 {
    (dir & EDGE_DIR_MASK) << (axis << 1)
}

/// Surface data for a single voxel in a [`Tile`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct TileData {
    /// Vertex offset within the voxel, each in `[0, POS_ONE]`.
    pub x: u8,
    pub y: u8,
    pub z: u8,
    /// 2 direction bits per axis.
    pub edges: u8,
    /// Material of the surface crossing each axis' edge. Only meaningful for axes with a direction set.
    pub states: [u32; EDGE_COUNT],
    pub biome: u16,
    /// 4-bit sky light in the high nibble, 4-bit block light in the low nibble.
    pub light: u8,
}

impl Default for TileData {
    fn default() -> Self {
        Self {
            x: POS_ONE >> 1,
            y: POS_ONE >> 1,
            z: POS_ONE >> 1,
            edges: 0,
            states: [0; EDGE_COUNT],
            biome: 0,
            light: 0,
        }
    }
}

impl TileData {
    const ENCODED_LEN: usize = 21;

    #[inline]
    pub fn edge_dir(&self, axis: usize) -> u8 {
        edge_dir(self.edges, axis)
    }

    fn write(&self, pos: u16, out: &mut Vec<u8>) {
        out.extend_from_slice(&pos.to_le_bytes());
        out.extend_from_slice(&[self.x, self.y, self.z, self.edges, self.light]);
        out.extend_from_slice(&self.biome.to_le_bytes());
        for state in self.states {
            out.extend_from_slice(&state.to_le_bytes());
        }
    }

    fn read(bytes: &[u8]) -> (u16, Self) {
        let u32_at = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        let pos = u16::from_le_bytes([bytes[0], bytes[1]]);
        let data = Self {
            x: bytes[2],
            y: bytes[3],
            z: bytes[4],
            edges: bytes[5],
            light: bytes[6],
            biome: u16::from_le_bytes([bytes[7], bytes[8]]),
            states: [u32_at(9), u32_at(13), u32_at(17)],
        };
        (pos, data)
    }
}

/// A sparse cube of `TILE_VOXELS³` voxels' surface data.
///
/// Only voxels that carry surface data are stored, in insertion order, with a dense index from voxel position to slot for
/// random access. Tiles are meant to be reused through a [`TilePool`] so the index allocation is amortized.
#[derive(Clone)]
pub struct Tile {
    index: Box<[i16; TILE_SIZE]>,
    voxels: Vec<(u16, TileData)>,
    extra: u64,
}

impl Default for Tile {
    fn default() -> Self {
        Self {
            index: Box::new([-1; TILE_SIZE]),
            voxels: Vec::new(),
            extra: 0,
        }
    }
}

impl fmt::Debug for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tile")
            .field("count", &self.count())
            .field("extra", &self.extra)
            .finish()
    }
}

impl PartialEq for Tile {
    fn eq(&self, other: &Self) -> bool {
        self.extra == other.extra
            && self.count() == other.count()
            && self
                .voxels
                .iter()
                .all(|&(pos, data)| other.get_linear(pos as usize) == Some(data))
    }
}

impl Eq for Tile {}

impl Recycle for Tile {
    fn reset(&mut self) {
        Tile::reset(self)
    }
}

impl Tile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of voxels holding data.
    #[inline]
    pub fn count(&self) -> usize {
        self.voxels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.voxels.is_empty()
    }

    #[inline]
    pub fn extra(&self) -> u64 {
        self.extra
    }

    pub fn set_extra(&mut self, extra: u64) {
        self.extra = extra;
    }

    #[inline]
    pub fn linearize(x: u32, y: u32, z: u32) -> usize {
        debug_assert!(x < TILE_VOXELS && y < TILE_VOXELS && z < TILE_VOXELS);
        TileShape::linearize([x, y, z]) as usize
    }

    #[inline]
    pub fn delinearize(i: usize) -> [u32; 3] {
        TileShape::delinearize(i as u32)
    }

    pub fn get(&self, x: u32, y: u32, z: u32) -> Option<TileData> {
        self.get_linear(Self::linearize(x, y, z))
    }

    fn get_linear(&self, i: usize) -> Option<TileData> {
        let slot = self.index[i];
        (slot >= 0).then(|| self.voxels[slot as usize].1)
    }

    pub fn set(&mut self, x: u32, y: u32, z: u32, data: &TileData) {
        let i = Self::linearize(x, y, z);
        let slot = self.index[i];
        if slot >= 0 {
            self.voxels[slot as usize].1 = *data;
        } else {
            self.index[i] = self.voxels.len() as i16;
            self.voxels.push((i as u16, *data));
        }
    }

    /// The `j`-th stored voxel's linear position and data, for `j < count()`.
    pub fn get_index(&self, j: usize) -> (usize, TileData) {
        let (pos, data) = self.voxels[j];
        (pos as usize, data)
    }

    pub fn iter(&self) -> impl Iterator<Item = ([u32; 3], TileData)> + '_ {
        self.voxels.iter().map(|&(pos, data)| (Self::delinearize(pos as usize), data))
    }

    pub fn reset(&mut self) {
        for &(pos, _) in self.voxels.iter() {
            self.index[pos as usize] = -1;
        }
        self.voxels.clear();
        self.extra = 0;
    }

    /// Appends the binary encoding of this tile to `out`. An empty tile encodes to nothing.
    pub fn write(&self, out: &mut Vec<u8>) {
        if self.is_empty() {
            return;
        }
        out.reserve(12 + self.count() * TileData::ENCODED_LEN);
        out.extend_from_slice(&(self.count() as i32).to_le_bytes());
        out.extend_from_slice(&self.extra.to_le_bytes());
        for &(pos, data) in self.voxels.iter() {
            data.write(pos, out);
        }
    }

    /// Replaces the contents of this tile with the encoding in `bytes`.
    pub fn read(&mut self, bytes: &[u8]) -> Result<(), SnapshotError> {
        self.reset();
        if bytes.is_empty() {
            return Ok(());
        }
        if bytes.len() < 12 {
            return Err(SnapshotError::Truncated);
        }

        let count = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if count < 0 || count as usize > TILE_SIZE {
            return Err(SnapshotError::Malformed("voxel count out of range"));
        }
        let mut extra = [0; 8];
        extra.copy_from_slice(&bytes[4..12]);
        self.extra = u64::from_le_bytes(extra);

        let body = &bytes[12..];
        if body.len() != count as usize * TileData::ENCODED_LEN {
            self.reset();
            return Err(SnapshotError::Truncated);
        }
        for chunk in body.chunks_exact(TileData::ENCODED_LEN) {
            let (pos, data) = TileData::read(chunk);
            if pos as usize >= TILE_SIZE || self.index[pos as usize] >= 0 {
                self.reset();
                return Err(SnapshotError::Malformed("bad voxel position"));
            }
            self.index[pos as usize] = self.voxels.len() as i16;
            self.voxels.push((pos, data));
        }
        Ok(())
    }
}

/// Reusable [`Tile`] buffers.
pub type TilePool = Pool<Tile>;

pub fn new_tile_pool(capacity: usize) -> TilePool {
    Pool::new(capacity, Tile::new)
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

    fn sample_data(seed: u32) -> TileData {
        TileData {
            x: (seed % 17) as u8,
            y: 3,
            z: POS_ONE,
            edges: edge_bits(EDGE_DIR_NEGATIVE, 1) | edge_bits(EDGE_DIR_BOTH, 2),
            states: [0, seed, seed + 1],
            biome: 300,
            light: 0xF3,
        }
    }

    #[test]
    fn set_get_and_overwrite() {
        let mut tile = Tile::new();
        assert_eq!(tile.get(1, 2, 3), None);
        tile.set(1, 2, 3, &sample_data(1));
        tile.set(15, 0, 7, &sample_data(2));
        tile.set(1, 2, 3, &sample_data(3));
        assert_eq!(tile.count(), 2);
        assert_eq!(tile.get(1, 2, 3), Some(sample_data(3)));
        assert_eq!(tile.get(15, 0, 7), Some(sample_data(2)));

        let (pos, data) = tile.get_index(1);
        assert_eq!(Tile::delinearize(pos), [15, 0, 7]);
        assert_eq!(data, sample_data(2));
    }

    #[test]
    fn edge_helpers() {
        let data = sample_data(0);
        assert_eq!(data.edge_dir(0), EDGE_DIR_NONE);
        assert_eq!(data.edge_dir(1), EDGE_DIR_NEGATIVE);
        assert_eq!(data.edge_dir(2), EDGE_DIR_BOTH);
    }

    #[test]
    fn empty_tile_encodes_to_nothing() {
        let mut out = Vec::new();
        Tile::new().write(&mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn encode_decode() {
        let mut tile = Tile::new();
        for i in 0..40 {
            tile.set(i % 16, (i * 7) % 16, (i * 3) % 16, &sample_data(i));
        }
        tile.set_extra(0xDEAD_BEEF);

        let mut bytes = Vec::new();
        tile.write(&mut bytes);
        assert_eq!(bytes.len(), 12 + tile.count() * TileData::ENCODED_LEN);

        let mut decoded = Tile::new();
        decoded.set(0, 0, 0, &TileData::default());
        decoded.read(&bytes).unwrap();
        assert_eq!(decoded, tile);
        assert_eq!(decoded.extra(), 0xDEAD_BEEF);
    }

    #[test]
    fn truncated_input_is_rejected() {
        let mut tile = Tile::new();
        tile.set(1, 1, 1, &sample_data(1));
        let mut bytes = Vec::new();
        tile.write(&mut bytes);
        bytes.pop();

        let mut decoded = Tile::new();
        assert!(matches!(decoded.read(&bytes), Err(SnapshotError::Truncated)));
        assert!(decoded.is_empty());
    }

    #[test]
    fn pooled_tiles_come_back_empty() {
        let pool = new_tile_pool(2);
        {
            let mut tile = pool.acquire();
            tile.set(4, 5, 6, &sample_data(9));
            tile.set_extra(1);
        }
        let tile = pool.acquire();
        assert!(tile.is_empty());
        assert_eq!(tile.extra(), 0);
        assert_eq!(tile.get(4, 5, 6), None);
    }
}
