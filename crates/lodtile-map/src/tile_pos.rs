use crate::tile::{TILE_SHIFT, TILE_VOXELS};

use lodtile_core::glam::IVec3;

/// LOD levels are `0..MAX_LODS`.
pub const MAX_LODS: u8 = 24;

pub type Level = u8;

/// An inclusive box of block coordinates.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct BlockExtent {
    pub min: IVec3,
    pub max: IVec3,
}

impl BlockExtent {
    pub fn from_min_and_max(min: IVec3, max: IVec3) -> Self {
        Self { min, max }
    }

    pub fn contains_extent(&self, other: &Self) -> bool {
        self.min.cmple(other.min).all() && other.max.cmple(self.max).all()
    }

    pub fn contains(&self, p: IVec3) -> bool {
        self.min.cmple(p).all() && p.cmple(self.max).all()
    }
}

/// The address of a tile: a cube of `TILE_VOXELS << level` blocks on a side.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TilePos {
    pub level: Level,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl TilePos {
    /// Size of [`encode`](Self::encode)'s output.
    pub const ENCODED_LEN: usize = 13;

    pub const fn new(level: Level, x: i32, y: i32, z: i32) -> Self {
        Self { level, x, y, z }
    }

    pub fn from_coords(level: Level, coords: IVec3) -> Self {
        Self::new(level, coords.x, coords.y, coords.z)
    }

    #[inline]
    pub fn coords(&self) -> IVec3 {
        IVec3::new(self.x, self.y, self.z)
    }

    pub fn is_valid(&self) -> bool {
        self.level < MAX_LODS
    }

    /// The tile one level up that contains this one.
    pub fn parent(&self) -> Self {
        self.up(1)
    }

    pub fn up(&self, levels: u8) -> Self {
        Self::from_coords(self.level + levels, parent_coords(self.coords(), levels))
    }

    /// The child at octant `i`, where bit 0 of `i` selects +x, bit 1 +y and bit 2 +z.
    pub fn child(&self, i: u8) -> Self {
        assert!(self.level > 0, "level 0 tiles have no children");
        assert!(i < 8, "child index {} out of range", i);
        Self::from_coords(self.level - 1, min_child_coords(self.coords()) + child_offset(i))
    }

    pub fn children(&self) -> [Self; 8] {
        let mut out = [*self; 8];
        for (i, child) in out.iter_mut().enumerate() {
            *child = self.child(i as u8);
        }
        out
    }

    /// Minimum corner in block coordinates.
    pub fn min_block(&self) -> IVec3 {
        self.coords() << (TILE_SHIFT as i32 + self.level as i32)
    }

    pub fn block_extent(&self) -> BlockExtent {
        let min = self.min_block();
        BlockExtent::from_min_and_max(min, min + IVec3::splat((TILE_VOXELS << self.level) as i32 - 1))
    }

    /// Returns `true` if `other` is this tile or one of its descendants.
    pub fn contains(&self, other: &Self) -> bool {
        other.level <= self.level && parent_coords(other.coords(), self.level - other.level) == self.coords()
    }

    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut bytes = [0; Self::ENCODED_LEN];
        bytes[0] = self.level;
        bytes[1..5].copy_from_slice(&self.x.to_le_bytes());
        bytes[5..9].copy_from_slice(&self.y.to_le_bytes());
        bytes[9..13].copy_from_slice(&self.z.to_le_bytes());
        bytes
    }

    pub fn decode(bytes: &[u8; Self::ENCODED_LEN]) -> Self {
        let int_at = |i: usize| i32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Self::new(bytes[0], int_at(1), int_at(5), int_at(9))
    }
}

pub fn min_child_coords(parent_coords: IVec3) -> IVec3 {
    parent_coords << 1
}

/// Floor division by `2^levels_up`.
pub fn parent_coords(child_coords: IVec3, levels_up: u8) -> IVec3 {
    child_coords >> levels_up as i32
}

#[inline]
pub fn child_offset(i: u8) -> IVec3 {
    IVec3::new((i & 1) as i32, ((i >> 1) & 1) as i32, ((i >> 2) & 1) as i32)
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
    fn parent_floors_negative_coordinates() {
        assert_eq!(TilePos::new(0, -1, -2, 3).parent(), TilePos::new(1, -1, -1, 1));
        assert_eq!(TilePos::new(2, -5, 0, 5).up(2), TilePos::new(4, -2, 0, 1));
    }

    #[test]
    fn children_round_trip_to_parent() {
        let pos = TilePos::new(3, -7, 2, 9);
        let children = pos.children();
        for (i, child) in children.iter().enumerate() {
            assert_eq!(child.level, 2);
            assert_eq!(child.parent(), pos);
            assert_eq!(child.coords() - min_child_coords(pos.coords()), child_offset(i as u8));
            assert!(pos.contains(child));
        }
        assert!(!children[0].contains(&pos));
    }

    #[test]
    fn block_extent_scales_with_level() {
        let pos = TilePos::new(2, 1, -1, 0);
        let extent = pos.block_extent();
        assert_eq!(extent.min, IVec3::new(64, -64, 0));
        assert_eq!(extent.max, IVec3::new(127, -1, 63));
    }

    #[test]
    fn encoding_is_stable() {
        let pos = TilePos::new(5, i32::MIN, -1, 12345);
        let bytes = pos.encode();
        assert_eq!(bytes[0], 5);
        assert_eq!(TilePos::decode(&bytes), pos);
    }
}
