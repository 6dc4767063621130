//! Placement of baked tile geometry in shared GPU buffers.

use crate::baker::{BakeOutput, Vertex, PASS_COUNT};
use crate::buffer::{BufferUploader, GpuBuffer};
use crate::config::RenderConfig;

use lodtile_map::core::arena::{AllocError, Growth, SequentialAllocator};
use lodtile_map::core::SmallKeyHashMap;
use lodtile_map::{Level, TilePos};

use std::mem::size_of;
use std::ops::AddAssign;

pub const VERTEX_SIZE: u64 = size_of::<Vertex>() as u64;
pub const INDEX_SIZE: u64 = size_of::<u32>() as u64;

/// Where one pass of a tile's geometry lives. Indices are relative to `base_vertex`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Location {
    pub base_vertex: u32,
    pub vertex_count: u32,
    pub first_index: u32,
    pub index_count: u32,
}

/// One location per render pass, `None` for passes the tile draws nothing in.
pub type Locations = [Option<Location>; PASS_COUNT];

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BakeStats {
    pub tiles: u64,
    pub allocated_vertices: u64,
    pub total_vertices: u64,
    pub allocated_indices: u64,
    pub total_indices: u64,
    pub allocated_vram: u64,
    pub total_vram: u64,
    pub vertex_size: u64,
    pub index_size: u64,
}

impl AddAssign for BakeStats {
    fn add_assign(&mut self, other: Self) {
        self.tiles += other.tiles;
        self.allocated_vertices += other.allocated_vertices;
        self.total_vertices += other.total_vertices;
        self.allocated_indices += other.allocated_indices;
        self.total_indices += other.total_indices;
        self.allocated_vram += other.allocated_vram;
        self.total_vram += other.total_vram;
        self.vertex_size = other.vertex_size;
        self.index_size = other.index_size;
    }
}

/// Maps tile positions to ranges of shared vertex and index buffers.
///
/// Uploads made by [`update`](Self::update) are only visible in the buffers after [`flush`](Self::flush).
pub trait BakeStorage {
    type Buffer: GpuBuffer;

    /// Installs (`Some`) or deletes (`None`) the geometry of each position. Returns the positions whose geometry could not be
    /// stored; those positions are left without geometry and everything else is applied.
    fn update<'a>(&mut self, changes: impl IntoIterator<Item = (TilePos, Option<&'a BakeOutput>)>) -> Vec<TilePos>;

    fn find(&self, pos: &TilePos) -> Option<Locations>;

    /// Panics if `pass >= PASS_COUNT` or `level` is not stored.
    fn vertex_buffer(&self, level: Level, pass: usize) -> &Self::Buffer;

    /// Panics if `pass >= PASS_COUNT` or `level` is not stored.
    fn index_buffer(&self, level: Level, pass: usize) -> &Self::Buffer;

    fn flush(&mut self);

    fn stats(&self) -> BakeStats;
}

/// A growable buffer of fixed-size elements and the allocator that carves it up.
struct Arena<B> {
    alloc: SequentialAllocator,
    uploader: BufferUploader<B>,
    element_size: u64,
}

impl<B: GpuBuffer> Arena<B> {
    fn new(buffer: B, element_size: u64, growth: Growth) -> Self {
        Self {
            alloc: SequentialAllocator::new(1, growth),
            uploader: BufferUploader::new(buffer),
            element_size,
        }
    }

    fn multi_alloc(&mut self, counts: &[u64]) -> Result<Vec<Option<u64>>, AllocError> {
        let Self {
            alloc,
            uploader,
            element_size,
        } = self;
        let element_size = *element_size;
        let mut grow = |old: u64, new: u64| -> Result<(), AllocError> {
            uploader.resize(new * element_size).map_err(|e| {
                log::warn!("{}", e);
                AllocError::GrowthFailed { requested_capacity: new }
            })?;
            log::debug!("grew buffer from {} to {} elements of {} bytes", old, new, element_size);
            Ok(())
        };
        alloc.multi_alloc(counts, &mut grow)
    }

    fn alloc(&mut self, count: u64) -> Result<Option<u64>, AllocError> {
        Ok(self.multi_alloc(&[count])?.pop().flatten())
    }

    fn free(&mut self, address: Option<u64>) {
        if let Some(address) = address {
            self.alloc.free(address);
        }
    }

    fn upload(&mut self, address: u64, bytes: &[u8]) {
        self.uploader.upload(address * self.element_size, bytes);
    }
}

#[derive(Clone, Copy, Debug)]
struct Entry {
    base_vertex: Option<u64>,
    vertex_count: u32,
    first_index: [Option<u64>; PASS_COUNT],
    index_count: [u32; PASS_COUNT],
}

/// One vertex arena and one index arena shared by all passes and levels.
pub struct SimpleBakeStorage<B> {
    vertices: Arena<B>,
    indices: Arena<B>,
    entries: SmallKeyHashMap<TilePos, Entry>,
}

impl<B: GpuBuffer> SimpleBakeStorage<B> {
    pub fn new(vertex_buffer: B, index_buffer: B, growth: Growth) -> Self {
        Self {
            vertices: Arena::new(vertex_buffer, VERTEX_SIZE, growth),
            indices: Arena::new(index_buffer, INDEX_SIZE, growth),
            entries: SmallKeyHashMap::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replaces the geometry at `pos`. On error the position is left without geometry.
    pub fn update_one(&mut self, pos: TilePos, output: Option<&BakeOutput>) -> Result<(), AllocError> {
        if let Some(old) = self.entries.remove(&pos) {
            self.vertices.free(old.base_vertex);
            for first_index in old.first_index {
                self.indices.free(first_index);
            }
        }

        let output = match output {
            Some(output) if !output.is_empty() => output,
            _ => return Ok(()),
        };

        let base_vertex = self.vertices.alloc(output.verts.len() as u64)?;
        let mut index_counts = [0; PASS_COUNT];
        for (count, indices) in index_counts.iter_mut().zip(output.indices_per_pass.iter()) {
            *count = indices.len() as u64;
        }
        let first_index = match self.indices.multi_alloc(&index_counts) {
            Ok(first_index) => first_index,
            Err(e) => {
                self.vertices.free(base_vertex);
                return Err(e);
            }
        };

        let mut entry = Entry {
            base_vertex,
            vertex_count: output.verts.len() as u32,
            first_index: [None; PASS_COUNT],
            index_count: [0; PASS_COUNT],
        };
        if let Some(base) = base_vertex {
            self.vertices.upload(base, bytemuck::cast_slice(&output.verts));
        }
        for (pass, (first, indices)) in first_index.into_iter().zip(output.indices_per_pass.iter()).enumerate() {
            entry.first_index[pass] = first;
            entry.index_count[pass] = indices.len() as u32;
            if let Some(first) = first {
                self.indices.upload(first, bytemuck::cast_slice(indices));
            }
        }
        self.entries.insert(pos, entry);

        Ok(())
    }
}

impl<B: GpuBuffer> BakeStorage for SimpleBakeStorage<B> {
    type Buffer = B;

    fn update<'a>(&mut self, changes: impl IntoIterator<Item = (TilePos, Option<&'a BakeOutput>)>) -> Vec<TilePos> {
        let mut failed = Vec::new();
        for (pos, output) in changes {
            if let Err(e) = self.update_one(pos, output) {
                log::warn!("dropping baked geometry of {:?}: {}", pos, e);
                failed.push(pos);
            }
        }
        failed
    }

    fn find(&self, pos: &TilePos) -> Option<Locations> {
        let entry = self.entries.get(pos)?;
        let base_vertex = entry.base_vertex.unwrap_or(0) as u32;
        let mut out = [None; PASS_COUNT];
        for (pass, location) in out.iter_mut().enumerate() {
            if let Some(first) = entry.first_index[pass] {
                *location = Some(Location {
                    base_vertex,
                    vertex_count: entry.vertex_count,
                    first_index: first as u32,
                    index_count: entry.index_count[pass],
                });
            }
        }
        Some(out)
    }

    fn vertex_buffer(&self, _level: Level, pass: usize) -> &B {
        assert!(pass < PASS_COUNT, "render pass {} out of range", pass);
        self.vertices.uploader.buffer()
    }

    fn index_buffer(&self, _level: Level, pass: usize) -> &B {
        assert!(pass < PASS_COUNT, "render pass {} out of range", pass);
        self.indices.uploader.buffer()
    }

    fn flush(&mut self) {
        self.vertices.uploader.flush();
        self.indices.uploader.flush();
    }

    fn stats(&self) -> BakeStats {
        let vertices = self.vertices.alloc.stats();
        let indices = self.indices.alloc.stats();
        BakeStats {
            tiles: self.entries.len() as u64,
            allocated_vertices: vertices.allocated_space,
            total_vertices: vertices.total_space,
            allocated_indices: indices.allocated_space,
            total_indices: indices.total_space,
            allocated_vram: vertices.allocated_space * VERTEX_SIZE + indices.allocated_space * INDEX_SIZE,
            total_vram: vertices.total_space * VERTEX_SIZE + indices.total_space * INDEX_SIZE,
            vertex_size: VERTEX_SIZE,
            index_size: INDEX_SIZE,
        }
    }
}

/// A [`SimpleBakeStorage`] per level, so each level's buffers grow with that level's tiles only.
pub struct PerLevelBakeStorage<B> {
    levels: Vec<SimpleBakeStorage<B>>,
}

impl<B: GpuBuffer> PerLevelBakeStorage<B> {
    pub fn new(levels: Level, growth: Growth, mut make_buffer: impl FnMut() -> B) -> Self {
        Self {
            levels: (0..levels)
                .map(|_| SimpleBakeStorage::new(make_buffer(), make_buffer(), growth))
                .collect(),
        }
    }

    pub fn level(&self, level: Level) -> &SimpleBakeStorage<B> {
        assert!((level as usize) < self.levels.len(), "level {} is not stored", level);
        &self.levels[level as usize]
    }

    fn level_mut(&mut self, level: Level) -> &mut SimpleBakeStorage<B> {
        assert!((level as usize) < self.levels.len(), "level {} is not stored", level);
        &mut self.levels[level as usize]
    }
}

impl<B: GpuBuffer> BakeStorage for PerLevelBakeStorage<B> {
    type Buffer = B;

    fn update<'a>(&mut self, changes: impl IntoIterator<Item = (TilePos, Option<&'a BakeOutput>)>) -> Vec<TilePos> {
        let mut failed = Vec::new();
        for (pos, output) in changes {
            if let Err(e) = self.level_mut(pos.level).update_one(pos, output) {
                log::warn!("dropping baked geometry of {:?}: {}", pos, e);
                failed.push(pos);
            }
        }
        failed
    }

    fn find(&self, pos: &TilePos) -> Option<Locations> {
        self.levels.get(pos.level as usize)?.find(pos)
    }

    fn vertex_buffer(&self, level: Level, pass: usize) -> &B {
        self.level(level).vertex_buffer(level, pass)
    }

    fn index_buffer(&self, level: Level, pass: usize) -> &B {
        self.level(level).index_buffer(level, pass)
    }

    fn flush(&mut self) {
        for level in self.levels.iter_mut() {
            level.flush();
        }
    }

    fn stats(&self) -> BakeStats {
        let mut stats = BakeStats {
            vertex_size: VERTEX_SIZE,
            index_size: INDEX_SIZE,
            ..Default::default()
        };
        for level in self.levels.iter() {
            stats += level.stats();
        }
        stats
    }
}

/// The storage layout selected by [`RenderConfig::per_level_storage`].
pub enum ConfiguredBakeStorage<B> {
    Simple(SimpleBakeStorage<B>),
    PerLevel(PerLevelBakeStorage<B>),
}

impl<B: GpuBuffer> ConfiguredBakeStorage<B> {
    pub fn from_config(config: &RenderConfig, levels: Level, mut make_buffer: impl FnMut() -> B) -> Self {
        if config.per_level_storage {
            Self::PerLevel(PerLevelBakeStorage::new(levels, config.buffer_growth, make_buffer))
        } else {
            Self::Simple(SimpleBakeStorage::new(make_buffer(), make_buffer(), config.buffer_growth))
        }
    }
}

impl<B: GpuBuffer> BakeStorage for ConfiguredBakeStorage<B> {
    type Buffer = B;

    fn update<'a>(&mut self, changes: impl IntoIterator<Item = (TilePos, Option<&'a BakeOutput>)>) -> Vec<TilePos> {
        match self {
            Self::Simple(s) => s.update(changes),
            Self::PerLevel(s) => s.update(changes),
        }
    }

    fn find(&self, pos: &TilePos) -> Option<Locations> {
        match self {
            Self::Simple(s) => s.find(pos),
            Self::PerLevel(s) => s.find(pos),
        }
    }

    fn vertex_buffer(&self, level: Level, pass: usize) -> &B {
        match self {
            Self::Simple(s) => s.vertex_buffer(level, pass),
            Self::PerLevel(s) => s.vertex_buffer(level, pass),
        }
    }

    fn index_buffer(&self, level: Level, pass: usize) -> &B {
        match self {
            Self::Simple(s) => s.index_buffer(level, pass),
            Self::PerLevel(s) => s.index_buffer(level, pass),
        }
    }

    fn flush(&mut self) {
        match self {
            Self::Simple(s) => s.flush(),
            Self::PerLevel(s) => s.flush(),
        }
    }

    fn stats(&self) -> BakeStats {
        match self {
            Self::Simple(s) => s.stats(),
            Self::PerLevel(s) => s.stats(),
        }
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
