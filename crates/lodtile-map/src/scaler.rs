//! Downsampling of tiles one level up by intersecting the children's dual surface with the parent's edges.
//!
//! All geometry is done in source (child level) voxel units relative to the parent tile's minimum corner, so parent voxel
//! `D` spans `[2D, 2D + 2]` and child voxel `s` has its vertex at `s + 0.5`.

use crate::tile::{
    edge_bits, edge_dir, Tile, TileData, EDGE_COUNT, EDGE_DIR_NONE, POS_ONE, TILE_MASK, TILE_SHIFT, TILE_VOXELS,
};
use crate::tile_pos::{child_offset, TilePos};

use itertools::iproduct;
use lodtile_core::geometry::{Quad, Segment};
use lodtile_core::glam::{IVec3, Vec3A};
use lodtile_core::pool::{Pool, Recycle};
use lodtile_core::qef::QefSolver;
use ndshape::{ConstShape, ConstShape3u32};
use smallvec::SmallVec;

/// Child voxels read by one scale, relative to the parent tile's minimum corner in child units.
const SRC_MIN: i32 = -4;
const SRC_MAX: i32 = ((TILE_VOXELS as i32) << 1) + 4;
const SRC_SIZE: u32 = (SRC_MAX - SRC_MIN) as u32;

/// Parent voxels whose edges are tested. Only `[0, TILE_VOXELS)` is written; the rest exists to find connecting voxels.
const DST_MIN: i32 = -1;
const DST_MAX: i32 = TILE_VOXELS as i32 + 1;
const DST_SIZE: u32 = (DST_MAX - DST_MIN) as u32;

/// Child tiles covering the source voxels, as offsets from the first child.
pub const WINDOW_MIN: i32 = SRC_MIN >> TILE_SHIFT;
pub const WINDOW_MAX: i32 = ((SRC_MAX - 1) >> TILE_SHIFT) + 1;
const WINDOW_SIDE: u32 = (WINDOW_MAX - WINDOW_MIN) as u32;
pub const WINDOW_SIZE: usize = (WINDOW_SIDE * WINDOW_SIDE * WINDOW_SIDE) as usize;

type SrcShape = ConstShape3u32<SRC_SIZE, SRC_SIZE, SRC_SIZE>;
type DstShape = ConstShape3u32<DST_SIZE, DST_SIZE, DST_SIZE>;
type WindowShape = ConstShape3u32<WINDOW_SIDE, WINDOW_SIDE, WINDOW_SIDE>;

/// The child tiles around a parent, ordered like [`TileScaler::inputs`]. Absent tiles are treated as empty.
pub type ScaleWindow<'a> = [Option<&'a Tile>; WINDOW_SIZE];

/// Builds a tile at level `L` from the tiles at level `L - 1` below and around it.
pub struct TileScaler {
    scratch: Pool<ScalerScratch>,
}

impl Default for TileScaler {
    fn default() -> Self {
        Self::new(4)
    }
}

impl TileScaler {
    pub fn new(scratch_capacity: usize) -> Self {
        Self {
            scratch: Pool::new(scratch_capacity, ScalerScratch::default),
        }
    }

    /// The child positions read when scaling `dst`, in [`ScaleWindow`] order.
    pub fn inputs(&self, dst: TilePos) -> Vec<TilePos> {
        assert!(dst.level > 0, "level 0 tiles can't be scaled, they must be generated");
        let base = dst.coords() << 1;
        iproduct!(WINDOW_MIN..WINDOW_MAX, WINDOW_MIN..WINDOW_MAX, WINDOW_MIN..WINDOW_MAX)
            .map(|(z, y, x)| TilePos::from_coords(dst.level - 1, base + IVec3::new(x, y, z)))
            .collect()
    }

    /// The parent positions whose [`inputs`](Self::inputs) contain `src`.
    pub fn outputs(&self, src: TilePos) -> Vec<TilePos> {
        // Parent p reads children [2p + WINDOW_MIN, 2p + WINDOW_MAX).
        let range = |c: i32| {
            let c = c as i64;
            let lo = -((WINDOW_MAX as i64 - 1 - c).div_euclid(2));
            let hi = (c - WINDOW_MIN as i64).div_euclid(2);
            lo as i32..=hi as i32
        };
        iproduct!(range(src.z), range(src.y), range(src.x))
            .map(|(z, y, x)| TilePos::new(src.level + 1, x, y, z))
            .collect()
    }

    /// Scales the 2×2×2 children of a parent, in [`TilePos::child`] order, with no neighboring context.
    pub fn scale(&self, children: &[Option<&Tile>; 8], out: &mut Tile) {
        let mut window: ScaleWindow = [None; WINDOW_SIZE];
        for (i, child) in children.iter().enumerate() {
            window[window_index(child_offset(i as u8))] = *child;
        }
        self.scale_window(&window, out);
    }

    /// Overwrites `out` with the parent of the children in `window`.
    pub fn scale_window(&self, window: &ScaleWindow, out: &mut Tile) {
        out.reset();

        let mut scratch = self.scratch.acquire();
        let s = &mut *scratch;
        s.prepare();

        s.read_sources(window);
        if s.quads.iter().all(|q| q.is_empty()) {
            return;
        }
        s.find_dst_edges();
        s.mark_dst_voxels();

        for (z, y, x) in iproduct!(0..TILE_VOXELS as i32, 0..TILE_VOXELS as i32, 0..TILE_VOXELS as i32) {
            let p = IVec3::new(x, y, z);
            if !s.dst_marked[dst_index(p)] {
                continue;
            }
            let data = s.solve_voxel(p);
            out.set(x as u32, y as u32, z as u32, &data);
        }
        out.set_extra(0);

        log::trace!("scaled {} voxels", out.count());
    }
}

#[derive(Clone, Copy, Debug)]
struct AxisQuad {
    quad: Quad,
    axis: u8,
    dir: u8,
}

#[derive(Default)]
struct ScalerScratch {
    src_edges: Vec<u8>,
    /// Zero for axes without a crossing.
    src_states: Vec<[u32; EDGE_COUNT]>,
    src_attrs: Vec<(u16, u8)>,
    /// Dual quads of the source edges, bucketed by the parent voxel containing their source voxel.
    quads: Vec<SmallVec<[AxisQuad; 4]>>,
    dst_edges: Vec<u8>,
    dst_marked: Vec<bool>,
    qef: QefSolver,
}

impl Recycle for ScalerScratch {
    fn reset(&mut self) {
        for q in self.quads.iter_mut() {
            q.clear();
        }
    }
}

impl ScalerScratch {
    fn prepare(&mut self) {
        let src_len = SrcShape::SIZE as usize;
        let dst_len = DstShape::SIZE as usize;

        self.src_edges.clear();
        self.src_edges.resize(src_len, 0);
        self.src_states.clear();
        self.src_states.resize(src_len, [0; EDGE_COUNT]);
        self.src_attrs.clear();
        self.src_attrs.resize(src_len, (0, 0));
        self.quads.resize_with(dst_len, SmallVec::new);
        for q in self.quads.iter_mut() {
            q.clear();
        }
        self.dst_edges.clear();
        self.dst_edges.resize(dst_len, 0);
        self.dst_marked.clear();
        self.dst_marked.resize(dst_len, false);
        self.qef.reset();
    }

    fn read_sources(&mut self, window: &ScaleWindow) {
        for (z, y, x) in iproduct!(SRC_MIN..SRC_MAX, SRC_MIN..SRC_MAX, SRC_MIN..SRC_MAX) {
            let p = IVec3::new(x, y, z);
            let tile = match window[window_index(p >> TILE_SHIFT as i32)] {
                Some(tile) => tile,
                None => continue,
            };
            let local = (p & IVec3::splat(TILE_MASK as i32)).as_uvec3();
            let data = match tile.get(local.x, local.y, local.z) {
                Some(data) => data,
                None => continue,
            };

            let i = src_index(p);
            self.src_edges[i] = data.edges;
            self.src_attrs[i] = (data.biome, data.light);
            for axis in 0..EDGE_COUNT {
                if edge_dir(data.edges, axis) != EDGE_DIR_NONE {
                    self.src_states[i][axis] = data.states[axis];
                }
            }

            let cell = p >> 1;
            if data.edges == 0 || !in_dst(cell) {
                continue;
            }
            let bucket = &mut self.quads[dst_index(cell)];
            for axis in 0..EDGE_COUNT {
                let dir = edge_dir(data.edges, axis);
                if dir != EDGE_DIR_NONE {
                    bucket.push(AxisQuad {
                        quad: dual_quad(p, axis),
                        axis: axis as u8,
                        dir,
                    });
                }
            }
        }
    }

    fn find_dst_edges(&mut self) {
        for (z, y, x) in iproduct!(DST_MIN..DST_MAX, DST_MIN..DST_MAX, DST_MIN..DST_MAX) {
            let p = IVec3::new(x, y, z);
            let i = dst_index(p);
            let bucket = &self.quads[i];
            if bucket.is_empty() {
                continue;
            }
            let mut edges = 0;
            for axis in 0..EDGE_COUNT {
                let segment = dst_edge(p, axis);
                let dir = bucket
                    .iter()
                    .filter(|q| q.axis as usize == axis && q.quad.intersect_segment(&segment).is_some())
                    .fold(0, |dir, q| dir | q.dir);
                edges |= edge_bits(dir, axis);
            }
            self.dst_edges[i] = edges;
        }
    }

    /// Marks every parent voxel that a crossed parent edge connects, including voxels that own no crossing themselves.
    fn mark_dst_voxels(&mut self) {
        for (z, y, x) in iproduct!(DST_MIN..DST_MAX - 1, DST_MIN..DST_MAX - 1, DST_MIN..DST_MAX - 1) {
            let p = IVec3::new(x, y, z);
            let edges = self.dst_edges[dst_index(p)];
            for axis in 0..EDGE_COUNT {
                if edge_dir(edges, axis) == EDGE_DIR_NONE {
                    continue;
                }
                let (u, v) = other_axes(axis);
                for (du, dv) in iproduct!(0..2, 0..2) {
                    let q = p + du * unit(u) + dv * unit(v);
                    self.dst_marked[dst_index(q)] = true;
                }
            }
        }
    }

    fn solve_voxel(&mut self, p: IVec3) -> TileData {
        self.qef.reset();
        let base = (p << 1i32).as_vec3a();
        for axis in 0..EDGE_COUNT {
            let (u, v) = other_axes(axis);
            for (du, dv) in iproduct!(0..2, 0..2) {
                let start = base + 2.0 * (du as f32 * unit(u).as_vec3a() + dv as f32 * unit(v).as_vec3a());
                let segment = Segment::new(start, start + 2.0 * unit(axis).as_vec3a());
                for (dz, dy, dx) in iproduct!(-1..=0, -1..=0, -1..=0) {
                    for q in self.quads[dst_index(p + IVec3::new(dx, dy, dz))].iter() {
                        if let Some(i) = q.quad.intersect_segment(&segment) {
                            self.qef.add(i, q.quad.normal);
                        }
                    }
                }
            }
        }

        let mut data = TileData::default();
        if let Some(vertex) = self.qef.solve() {
            let offset = ((vertex - base) * 0.5 * POS_ONE as f32).floor();
            let offset = offset.clamp(Vec3A::ZERO, Vec3A::splat(POS_ONE as f32));
            data.x = offset.x as u8;
            data.y = offset.y as u8;
            data.z = offset.z as u8;
        }

        data.edges = self.dst_edges[dst_index(p)];
        for axis in 0..EDGE_COUNT {
            if edge_dir(data.edges, axis) == EDGE_DIR_NONE {
                continue;
            }
            // Materials stay discrete: take the first child that has one.
            for (dx, dy, dz) in iproduct!(0..2, 0..2, 0..2) {
                let i = src_index((p << 1) + IVec3::new(dx, dy, dz));
                let state = self.src_states[i][axis];
                if state != 0 {
                    data.states[axis] = state;
                    data.biome = self.src_attrs[i].0;
                    data.light = self.src_attrs[i].1;
                    break;
                }
            }
        }
        data
    }
}

/// The quad joining the vertices of the 4 source voxels that share source voxel `p`'s edge on `axis`.
fn dual_quad(p: IVec3, axis: usize) -> Quad {
    let (u, v) = other_axes(axis);
    let (eu, ev) = (unit(u).as_vec3a(), unit(v).as_vec3a());
    let v0 = p.as_vec3a() + Vec3A::splat(0.5);
    Quad::new(v0, v0 + eu, v0 + ev, v0 + eu + ev)
}

/// Parent voxel `p`'s own edge on `axis`, in source units.
fn dst_edge(p: IVec3, axis: usize) -> Segment {
    let end = ((p + IVec3::ONE) << 1i32).as_vec3a();
    Segment::new(end - 2.0 * unit(axis).as_vec3a(), end)
}

/// The two remaining axes, in cyclic order so that `unit(u) × unit(v) = unit(axis)`.
#[inline]
fn other_axes(axis: usize) -> (usize, usize) {
    ((axis + 1) % 3, (axis + 2) % 3)
}

#[inline]
fn unit(axis: usize) -> IVec3 {
    let mut v = IVec3::ZERO;
    v[axis] = 1;
    v
}

#[inline]
fn in_dst(p: IVec3) -> bool {
    p.cmpge(IVec3::splat(DST_MIN)).all() && p.cmplt(IVec3::splat(DST_MAX)).all()
}

#[inline]
fn src_index(p: IVec3) -> usize {
    SrcShape::linearize((p - IVec3::splat(SRC_MIN)).as_uvec3().to_array()) as usize
}

#[inline]
fn dst_index(p: IVec3) -> usize {
    DstShape::linearize((p - IVec3::splat(DST_MIN)).as_uvec3().to_array()) as usize
}

#[inline]
fn window_index(tile_offset: IVec3) -> usize {
    WindowShape::linearize((tile_offset - IVec3::splat(WINDOW_MIN)).as_uvec3().to_array()) as usize
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

    use crate::generator::ExactTileGenerator;
    use crate::test_worlds::{FlatWorld, STONE};
    use crate::tile::EDGE_DIR_POSITIVE;

    use lodtile_core::approx::assert_abs_diff_eq;

    /// Block height of a level 1 vertex's y coordinate.
    fn level_1_block_y(voxel_y: u32, offset: u8) -> f32 {
        let sample_y = voxel_y as f32 + offset as f32 / POS_ONE as f32;
        sample_y * 2.0 + 0.5
    }

    fn generate_all(positions: &[TilePos], height: i32) -> Vec<Tile> {
        let generator = ExactTileGenerator::default();
        let world = FlatWorld::new(height);
        positions
            .iter()
            .map(|&pos| {
                let mut tile = Tile::new();
                generator.generate(&world, pos, &mut tile).unwrap();
                tile
            })
            .collect()
    }

    #[test]
    fn window_covers_source_voxels() {
        assert_eq!(WINDOW_MIN, -1);
        assert_eq!(WINDOW_MAX, 3);
        assert_eq!(WINDOW_SIZE, 64);
    }

    #[test]
    fn absent_children_make_an_empty_tile() {
        let scaler = TileScaler::default();
        let mut out = Tile::new();
        out.set(1, 2, 3, &TileData::default());

        scaler.scale(&[None; 8], &mut out);

        assert!(out.is_empty());
    }

    #[test]
    fn inputs_and_outputs_agree() {
        let scaler = TileScaler::default();
        let dst = TilePos::new(3, -2, 5, 0);
        let inputs = scaler.inputs(dst);
        assert_eq!(inputs.len(), WINDOW_SIZE);
        for child in dst.children().iter() {
            assert!(inputs.contains(child));
        }
        for (i, &src) in inputs.iter().enumerate() {
            assert_eq!(window_index(src.coords() - (dst.coords() << 1)), i);
            assert!(scaler.outputs(src).contains(&dst));
        }

        let src = TilePos::new(0, 4, -3, 0);
        let outputs = scaler.outputs(src);
        assert_eq!(outputs.len(), 8);
        assert!(outputs.contains(&src.parent()));
        for dst in outputs {
            assert!(scaler.inputs(dst).contains(&src));
        }
    }

    #[test]
    #[should_panic]
    fn level_0_has_no_inputs() {
        TileScaler::default().inputs(TilePos::new(0, 0, 0, 0));
    }

    #[test]
    fn flat_children_scale_to_the_same_height() {
        let dst = TilePos::new(1, 0, 0, 0);
        let children = dst.children();
        let tiles = generate_all(&children, 13);
        let refs: Vec<Option<&Tile>> = tiles.iter().map(Some).collect();
        let mut child_refs = [None; 8];
        child_refs.copy_from_slice(&refs);

        let mut out = Tile::new();
        TileScaler::default().scale(&child_refs, &mut out);

        assert!(!out.is_empty());
        for ([_, y, _], data) in out.iter() {
            assert_eq!(y, 6);
            assert_eq!(edge_dir(data.edges, 1), EDGE_DIR_POSITIVE);
            assert_eq!(data.states[1], STONE);
            assert_abs_diff_eq!(level_1_block_y(y, data.y), 13.0, epsilon = 2.0 / POS_ONE as f32);
        }
    }

    #[test]
    fn full_window_scales_every_column() {
        let scaler = TileScaler::default();
        let dst = TilePos::new(1, 0, 0, 0);
        let inputs = scaler.inputs(dst);
        let tiles = generate_all(&inputs, 13);
        let mut window: ScaleWindow = [None; WINDOW_SIZE];
        for (slot, tile) in window.iter_mut().zip(tiles.iter()) {
            *slot = Some(tile);
        }

        let mut out = Tile::new();
        scaler.scale_window(&window, &mut out);

        assert_eq!(out.count(), (TILE_VOXELS * TILE_VOXELS) as usize);
        for ([_, y, _], data) in out.iter() {
            assert_eq!(y, 6);
            assert_eq!(data.edges, edge_bits(EDGE_DIR_POSITIVE, 1));
            // With neighbors on every side the vertex is centered horizontally.
            assert_eq!(data.x, POS_ONE / 2);
            assert_eq!(data.z, POS_ONE / 2);
            assert_abs_diff_eq!(level_1_block_y(y, data.y), 13.0, epsilon = 1.0 / POS_ONE as f32);
        }
    }

    #[test]
    fn scaling_twice_keeps_the_height() {
        let scaler = TileScaler::default();
        let top = TilePos::new(2, 0, 0, 0);

        let mut level_1 = Vec::new();
        for pos in top.children().iter() {
            let tiles = generate_all(&pos.children(), 40);
            let refs: Vec<Option<&Tile>> = tiles.iter().map(Some).collect();
            let mut children = [None; 8];
            children.copy_from_slice(&refs);
            let mut out = Tile::new();
            scaler.scale(&children, &mut out);
            level_1.push(out);
        }
        let refs: Vec<Option<&Tile>> = level_1.iter().map(Some).collect();
        let mut children = [None; 8];
        children.copy_from_slice(&refs);
        let mut out = Tile::new();
        scaler.scale(&children, &mut out);

        assert!(!out.is_empty());
        for ([_, y, _], data) in out.iter() {
            // Level 2 sample units are 4 blocks.
            let block_y = (y as f32 + data.y as f32 / POS_ONE as f32) * 4.0 + 0.5;
            assert_abs_diff_eq!(block_y, 40.0, epsilon = 4.0 / POS_ONE as f32 + 1.0);
        }
    }
}
