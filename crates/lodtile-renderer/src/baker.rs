//! Meshing of tiles into vertex and index data.

use lodtile_map::core::glam::UVec3;
use lodtile_map::core::pool::{Pool, Recycle};
use lodtile_map::{
    child_offset, edge_dir, Tile, TileData, TilePos, EDGE_COUNT, EDGE_DIR_BOTH, EDGE_DIR_NEGATIVE, EDGE_DIR_NONE,
    EDGE_DIR_POSITIVE, POS_FRACT_SHIFT, POS_ONE, TILE_VOXELS,
};

use crate::config::RenderConfig;

use bytemuck::{Pod, Zeroable};
use ndshape::{ConstShape, ConstShape3u32};

/// Vertices come from the tile's own voxels plus the first layer of each positive neighbor.
const TILE_VERTS: u32 = TILE_VOXELS + 1;
type VertexMapShape = ConstShape3u32<TILE_VERTS, TILE_VERTS, TILE_VERTS>;

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(u8)]
pub enum RenderPass {
    Solid = 0,
    Cutout = 1,
    Translucent = 2,
}

pub const PASS_COUNT: usize = 3;

/// What the renderer needs to know about block states.
pub trait StateRenderInfo {
    fn render_pass(&self, state: u32) -> RenderPass;

    /// Surfaces of this state are visible from both sides (e.g. water).
    fn double_sided(&self, _state: u32) -> bool {
        false
    }

    /// RGB tint of `state` in `biome`.
    fn tint(&self, _state: u32, _biome: u16) -> [u8; 3] {
        [0xFF; 3]
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub state: u32,
    /// Block and sky light, each expanded from 4 bits to 8.
    pub light: [u8; 2],
    /// Fixed point with [`POS_FRACT_SHIFT`] fractional bits, in voxels relative to the tile's minimum corner.
    pub pos: [u16; 3],
    pub color: [u8; 4],
}

/// Geometry of one baked tile: a shared vertex list and one triangle list per [`RenderPass`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BakeOutput {
    pub verts: Vec<Vertex>,
    pub indices_per_pass: [Vec<u32>; PASS_COUNT],
}

impl BakeOutput {
    pub fn is_empty(&self) -> bool {
        self.indices_per_pass.iter().all(|i| i.is_empty())
    }

    pub fn reset(&mut self) {
        self.verts.clear();
        for indices in self.indices_per_pass.iter_mut() {
            indices.clear();
        }
    }

    pub fn index_count(&self) -> usize {
        self.indices_per_pass.iter().map(|i| i.len()).sum()
    }
}

/// Builds a [`BakeOutput`] from a tile and its positive neighbors.
///
/// Each voxel gets one vertex per distinct state among its edges. A crossed edge of voxel `X` on axis `a` becomes a quad
/// joining the vertices of `X + {0, 1}` on the other two axes, so the last layer of quads needs the neighboring tiles.
pub struct VoxelBaker<I> {
    info: I,
    force_blocky: bool,
    scratch: Pool<BakerScratch>,
}

struct BakerScratch {
    /// Vertex index per voxel and axis, or -1.
    map: Vec<i32>,
}

impl Default for BakerScratch {
    fn default() -> Self {
        Self {
            map: vec![-1; VertexMapShape::SIZE as usize * EDGE_COUNT],
        }
    }
}

impl Recycle for BakerScratch {
    fn reset(&mut self) {
        self.map.fill(-1);
    }
}

impl<I: StateRenderInfo> VoxelBaker<I> {
    /// With `force_blocky`, vertex offsets are ignored and every vertex sits at its voxel's center.
    pub fn new(info: I, force_blocky: bool) -> Self {
        Self {
            info,
            force_blocky,
            scratch: Pool::new(4, BakerScratch::default),
        }
    }

    pub fn from_config(info: I, config: &RenderConfig) -> Self {
        Self::new(info, config.force_blocky_mesh)
    }

    pub fn info(&self) -> &I {
        &self.info
    }

    /// Tiles read when baking `pos`, in the order [`bake`](Self::bake) expects them.
    pub fn bake_inputs(pos: TilePos) -> [TilePos; 8] {
        let mut out = [pos; 8];
        for (i, p) in out.iter_mut().enumerate() {
            *p = TilePos::from_coords(pos.level, pos.coords() + child_offset(i as u8));
        }
        out
    }

    /// Baked tiles that read the tile at `pos`.
    pub fn bake_outputs(pos: TilePos) -> [TilePos; 8] {
        let mut out = [pos; 8];
        for (i, p) in out.iter_mut().enumerate() {
            *p = TilePos::from_coords(pos.level, pos.coords() - child_offset(i as u8));
        }
        out
    }

    /// Overwrites `out` with the mesh of `srcs[0]`. `srcs` are the tiles at [`bake_inputs`](Self::bake_inputs); without
    /// the first one there is nothing to bake.
    pub fn bake(&self, srcs: &[Option<&Tile>; 8], out: &mut BakeOutput) {
        out.reset();
        let own = match srcs[0] {
            Some(tile) => tile,
            None => return,
        };

        let mut scratch = self.scratch.acquire();
        let map = &mut scratch.map;

        for (i, src) in srcs.iter().enumerate() {
            let src = match src {
                Some(src) => src,
                None => continue,
            };
            let offset = child_offset(i as u8).as_uvec3();
            for j in 0..src.count() {
                let (linear, data) = src.get_index(j);
                let local = UVec3::from(Tile::delinearize(linear));
                // Neighbors only contribute their first layer on each axis they are offset along.
                if (offset * local).cmpgt(UVec3::ZERO).any() {
                    continue;
                }
                self.write_vertices(local + offset * TILE_VOXELS, &data, map, &mut out.verts);
            }
        }

        for j in 0..own.count() {
            let (linear, data) = own.get_index(j);
            let p = UVec3::from(Tile::delinearize(linear));
            self.write_quads(p, &data, map, out);
        }
    }

    fn write_vertices(&self, p: UVec3, data: &TileData, map: &mut [i32], verts: &mut Vec<Vertex>) {
        let (x, y, z) = if self.force_blocky {
            (POS_ONE >> 1, POS_ONE >> 1, POS_ONE >> 1)
        } else {
            (data.x, data.y, data.z)
        };
        let expand = |l: u8| l | (l << 4);
        let template = Vertex {
            state: 0,
            light: [
                expand(lodtile_map::unpack_block_light(data.light)),
                expand(lodtile_map::unpack_sky_light(data.light)),
            ],
            pos: [
                ((p.x << POS_FRACT_SHIFT) + x as u32) as u16,
                ((p.y << POS_FRACT_SHIFT) + y as u32) as u16,
                ((p.z << POS_FRACT_SHIFT) + z as u32) as u16,
            ],
            color: [0xFF; 4],
        };

        let base = VertexMapShape::linearize(p.to_array()) as usize * EDGE_COUNT;
        for axis in 0..EDGE_COUNT {
            let state = data.states[axis];
            // Share the vertex with an earlier axis of the same state.
            if let Some(prev) = (0..axis).find(|&prev| data.states[prev] == state) {
                map[base + axis] = map[base + prev];
                continue;
            }
            let [r, g, b] = self.info.tint(state, data.biome);
            map[base + axis] = verts.len() as i32;
            verts.push(Vertex {
                state,
                color: [r, g, b, 0xFF],
                ..template
            });
        }
    }

    fn write_quads(&self, p: UVec3, data: &TileData, map: &[i32], out: &mut BakeOutput) {
        for axis in 0..EDGE_COUNT {
            let mut dir = edge_dir(data.edges, axis);
            if dir == EDGE_DIR_NONE {
                continue;
            }
            let (u, v) = ((axis + 1) % 3, (axis + 2) % 3);
            let corner = |du: u32, dv: u32| {
                let mut q = p;
                q[u] += du;
                q[v] += dv;
                map[VertexMapShape::linearize(q.to_array()) as usize * EDGE_COUNT + axis]
            };
            let quad = [corner(0, 0), corner(1, 0), corner(0, 1), corner(1, 1)];
            if quad.iter().any(|&i| i < 0) {
                continue;
            }
            let quad = quad.map(|i| i as u32);

            let state = data.states[axis];
            if self.info.double_sided(state) {
                dir = EDGE_DIR_BOTH;
            }
            let indices = &mut out.indices_per_pass[self.info.render_pass(state) as usize];
            if dir & EDGE_DIR_POSITIVE != 0 {
                emit_quad(indices, quad, false);
            }
            if dir & EDGE_DIR_NEGATIVE != 0 {
                emit_quad(indices, quad, true);
            }
        }
    }
}

/// Emits `[v0, v1, v2, v3]` (with `v3` opposite `v0`) as two triangles, counter-clockwise around `(v1 - v0) × (v2 - v0)`
/// unless `flip`ped. The quad's own voxel `v0` is the last vertex of both triangles.
fn emit_quad(indices: &mut Vec<u32>, [v0, v1, v2, v3]: [u32; 4], flip: bool) {
    let (v1, v2) = if flip { (v2, v1) } else { (v1, v2) };
    indices.extend_from_slice(&[v1, v3, v0, v3, v2, v0]);
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

    use lodtile_map::core::glam::Vec3;
    use lodtile_map::{edge_bits, pack_light};

    struct Blocks;

    const STONE: u32 = 1;
    const WATER: u32 = 2;

    impl StateRenderInfo for Blocks {
        fn render_pass(&self, state: u32) -> RenderPass {
            if state == WATER {
                RenderPass::Translucent
            } else {
                RenderPass::Solid
            }
        }

        fn double_sided(&self, state: u32) -> bool {
            state == WATER
        }
    }

    /// A horizontal surface crossing every voxel at `y` in a tile, facing up.
    fn flat_tile(y: u32, state: u32) -> Tile {
        let mut tile = Tile::new();
        for (x, z) in (0..TILE_VOXELS).flat_map(|x| (0..TILE_VOXELS).map(move |z| (x, z))) {
            let mut data = TileData {
                edges: edge_bits(EDGE_DIR_POSITIVE, 1),
                light: pack_light(15, 3),
                ..Default::default()
            };
            data.states[1] = state;
            tile.set(x, y, z, &data);
        }
        tile
    }

    fn triangle_normal(verts: &[Vertex], tri: &[u32]) -> Vec3 {
        let p = |i: u32| {
            let [x, y, z] = verts[i as usize].pos;
            Vec3::new(x as f32, y as f32, z as f32)
        };
        (p(tri[1]) - p(tri[0])).cross(p(tri[2]) - p(tri[0]))
    }

    #[test]
    fn missing_own_tile_bakes_nothing() {
        let baker = VoxelBaker::new(Blocks, false);
        let tile = flat_tile(4, STONE);
        let mut out = BakeOutput::default();
        out.verts.push(Vertex::default());

        baker.bake(&[None, Some(&tile), None, None, None, None, None, None], &mut out);

        assert!(out.is_empty());
        assert!(out.verts.is_empty());
    }

    #[test]
    fn lone_tile_skips_the_last_layer() {
        let baker = VoxelBaker::new(Blocks, false);
        let tile = flat_tile(4, STONE);
        let mut out = BakeOutput::default();

        baker.bake(&[Some(&tile), None, None, None, None, None, None, None], &mut out);

        // One vertex for the empty X/Z states and one for the stone Y state.
        assert_eq!(out.verts.len(), 2 * 256);
        let solid = &out.indices_per_pass[RenderPass::Solid as usize];
        assert_eq!(solid.len(), 15 * 15 * 6);
        for tri in solid.chunks(3) {
            let n = triangle_normal(&out.verts, tri);
            assert!(n.y > 0.0 && n.x == 0.0 && n.z == 0.0, "{:?}", n);
        }
        assert_eq!(out.verts[1].light, [0x33, 0xFF]);
    }

    #[test]
    fn neighbors_close_the_seams() {
        let baker = VoxelBaker::new(Blocks, false);
        let tile = flat_tile(4, STONE);
        let srcs = [Some(&tile); 8];
        let mut out = BakeOutput::default();

        baker.bake(&srcs, &mut out);

        assert_eq!(out.indices_per_pass[RenderPass::Solid as usize].len(), 16 * 16 * 6);
        // Neighbors with a y offset have no voxels in their first layer.
        assert_eq!(out.verts.len(), 2 * 17 * 17);
    }

    #[test]
    fn double_sided_states_emit_both_windings() {
        let baker = VoxelBaker::new(Blocks, false);
        let tile = flat_tile(4, WATER);
        let srcs = [Some(&tile); 8];
        let mut out = BakeOutput::default();

        baker.bake(&srcs, &mut out);

        assert!(out.indices_per_pass[RenderPass::Solid as usize].is_empty());
        let water = &out.indices_per_pass[RenderPass::Translucent as usize];
        assert_eq!(water.len(), 2 * 16 * 16 * 6);
        let up = water.chunks(3).filter(|tri| triangle_normal(&out.verts, tri).y > 0.0).count();
        assert_eq!(up * 2, water.len() / 3);
    }

    #[test]
    fn negative_edges_face_down() {
        let baker = VoxelBaker::new(Blocks, false);
        let mut tile = Tile::new();
        for (x, z) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            let mut data = TileData {
                edges: edge_bits(EDGE_DIR_NEGATIVE, 1),
                ..Default::default()
            };
            data.states[1] = STONE;
            tile.set(x, 2, z, &data);
        }
        let mut out = BakeOutput::default();

        baker.bake(&[Some(&tile), None, None, None, None, None, None, None], &mut out);

        let solid = &out.indices_per_pass[RenderPass::Solid as usize];
        assert_eq!(solid.len(), 6);
        for tri in solid.chunks(3) {
            assert!(triangle_normal(&out.verts, tri).y < 0.0);
        }
    }

    #[test]
    fn blocky_mode_centers_vertices() {
        let baker = VoxelBaker::new(Blocks, true);
        let mut tile = Tile::new();
        tile.set(
            3,
            3,
            3,
            &TileData {
                x: 0,
                y: POS_ONE,
                z: 1,
                ..Default::default()
            },
        );
        let mut out = BakeOutput::default();

        baker.bake(&[Some(&tile), None, None, None, None, None, None, None], &mut out);

        let half = (POS_ONE >> 1) as u16;
        let at = (3 << POS_FRACT_SHIFT) + half;
        assert_eq!(out.verts[0].pos, [at, at, at]);
    }

    #[test]
    fn inputs_and_outputs_mirror() {
        let pos = TilePos::new(2, 5, -1, 0);
        let inputs = VoxelBaker::<Blocks>::bake_inputs(pos);
        assert_eq!(inputs[0], pos);
        assert_eq!(inputs[7], TilePos::new(2, 6, 0, 1));
        for input in inputs.iter() {
            assert!(VoxelBaker::<Blocks>::bake_outputs(*input).contains(&pos));
        }
    }
}
