use crate::scratch::ThreadLocalTiles;

use lodtile_map::core::glam::IVec3;
use lodtile_map::core::segtree::{AsyncInitSegtreeSet, IndexLoadError};
use lodtile_map::core::SmallKeyHashMap;
use lodtile_map::{
    batch_generation_group, new_tile_pool, ExactTileGenerator, GenerationNotAllowed, Level, MapConfig, ScaleWindow,
    SnapshotError, Tile, TilePool, TilePos, TileScaler, TileSnapshot, WorldSampler, WINDOW_SIZE,
};
use lodtile_renderer::{BakeOutput, StateRenderInfo, VoxelBaker};

use parking_lot::RwLock;
use std::convert::Infallible;
use std::sync::atomic::{AtomicI64, Ordering};

#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    #[error(transparent)]
    Generation(#[from] GenerationNotAllowed),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Index(#[from] IndexLoadError),
}

/// The CPU side of the tile pipeline: generates and scales tiles, and keeps the latest snapshot of every tile together with
/// a per-level presence index.
///
/// Every method takes `&self`, so one world can be shared by a pool of worker threads.
pub struct TileWorld {
    config: MapConfig,
    tiles: TilePool,
    generator: ExactTileGenerator,
    scaler: TileScaler,
    /// One set of tile coordinates per level, holding the positions with a non-empty tile.
    index: Vec<AsyncInitSegtreeSet<3>>,
    snapshots: RwLock<SmallKeyHashMap<TilePos, TileSnapshot>>,
    /// The newest timestamp seen so far.
    clock: AtomicI64,
    window_tiles: ThreadLocalTiles,
}

impl TileWorld {
    pub fn new(config: MapConfig) -> Self {
        let index = (0..config.levels())
            .map(|_| AsyncInitSegtreeSet::loaded(std::iter::empty()))
            .collect();
        Self::with_parts(config, index, SmallKeyHashMap::default(), 0)
    }

    /// Creates a world holding `snapshots`. The presence index is rebuilt on background threads; queries that need it block
    /// until it is ready, while writes proceed immediately.
    ///
    /// When a position appears more than once, the newest snapshot is kept. Snapshots of levels beyond the configured ones
    /// are dropped.
    pub fn restore(config: MapConfig, snapshots: impl IntoIterator<Item = TileSnapshot>) -> Self {
        let levels = config.levels();

        let mut store = SmallKeyHashMap::<TilePos, TileSnapshot>::default();
        for snapshot in snapshots {
            let pos = snapshot.pos();
            if pos.level >= levels {
                log::warn!("Dropping snapshot of {:?}, only {} levels are configured", pos, levels);
                continue;
            }
            match store.get(&pos) {
                Some(old) if old.timestamp() > snapshot.timestamp() => {}
                _ => {
                    store.insert(pos, snapshot);
                }
            }
        }

        let mut present = vec![Vec::new(); levels as usize];
        let mut clock = 0;
        for (pos, snapshot) in store.iter() {
            clock = clock.max(snapshot.timestamp());
            if !snapshot.is_empty() {
                present[pos.level as usize].push(pos.coords().to_array());
            }
        }
        log::debug!("Restoring {} snapshots", store.len());

        let index = present
            .into_iter()
            .map(|points| {
                AsyncInitSegtreeSet::spawn(move |sink| {
                    for p in points {
                        sink.push(p);
                    }
                    Ok::<_, Infallible>(())
                })
            })
            .collect();

        Self::with_parts(config, index, store, clock)
    }

    fn with_parts(
        config: MapConfig,
        index: Vec<AsyncInitSegtreeSet<3>>,
        store: SmallKeyHashMap<TilePos, TileSnapshot>,
        clock: i64,
    ) -> Self {
        Self {
            config,
            tiles: new_tile_pool(config.tile_pool_capacity),
            generator: ExactTileGenerator::default(),
            scaler: TileScaler::default(),
            index,
            snapshots: RwLock::new(store),
            clock: AtomicI64::new(clock),
            window_tiles: ThreadLocalTiles::new(),
        }
    }

    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    pub fn levels(&self) -> Level {
        self.index.len() as Level
    }

    /// Blocks until the presence index of every level is loaded.
    pub fn wait_loaded(&self) -> Result<(), WorldError> {
        for index in self.index.iter() {
            index.wait()?;
        }
        Ok(())
    }

    /// Generates and stores the level 0 tile at `pos`.
    pub fn generate(&self, sampler: &(impl WorldSampler + ?Sized), pos: TilePos) -> Result<TileSnapshot, WorldError> {
        let mut tile = self.tiles.acquire();
        self.generator.generate(sampler, pos, &mut tile)?;
        log::trace!("Generated {:?} with {} voxels", pos, tile.count());

        self.commit(pos, &tile)
    }

    /// Generates `pos` along with the other tiles the sampler can provide without more fetching.
    pub fn generate_batch(
        &self,
        sampler: &(impl WorldSampler + ?Sized),
        pos: TilePos,
    ) -> Result<Vec<TileSnapshot>, WorldError> {
        batch_generation_group(sampler, pos)
            .into_iter()
            .map(|p| self.generate(sampler, p))
            .collect()
    }

    /// Rebuilds and stores the tile at `pos` from the stored tiles of the level below.
    ///
    /// Panics unless `1 <= pos.level < self.levels()`.
    pub fn scale(&self, pos: TilePos) -> Result<TileSnapshot, WorldError> {
        assert!(
            pos.level >= 1 && pos.level < self.levels(),
            "can't scale {:?} with {} levels",
            pos,
            self.levels()
        );

        let inputs = self.scaler.inputs(pos);
        let mut out = self.tiles.acquire();
        {
            let mut tiles = self.window_tiles.get(WINDOW_SIZE);
            let mut present = [false; WINDOW_SIZE];
            self.load_tiles(&inputs, &mut tiles, &mut present)?;

            let mut window: ScaleWindow<'_> = [None; WINDOW_SIZE];
            for ((slot, tile), present) in window.iter_mut().zip(tiles.iter()).zip(present) {
                if present {
                    *slot = Some(tile);
                }
            }
            self.scaler.scale_window(&window, &mut out);
        }
        log::trace!("Scaled {:?} to {} voxels", pos, out.count());

        self.commit(pos, &out)
    }

    /// Positions whose scaled tile depends on the tile at `pos`, limited to the configured levels.
    pub fn scale_targets(&self, pos: TilePos) -> Vec<TilePos> {
        let levels = self.levels();
        self.scaler
            .outputs(pos)
            .into_iter()
            .filter(|p| p.level < levels)
            .collect()
    }

    /// Bakes the stored tile at `pos` with its neighbors into `out`.
    pub fn bake<I: StateRenderInfo>(
        &self,
        baker: &VoxelBaker<I>,
        pos: TilePos,
        out: &mut BakeOutput,
    ) -> Result<(), WorldError> {
        let inputs = VoxelBaker::<I>::bake_inputs(pos);
        let mut tiles = self.window_tiles.get(inputs.len());
        let mut present = [false; 8];
        self.load_tiles(&inputs, &mut tiles, &mut present)?;

        let mut srcs: [Option<&Tile>; 8] = [None; 8];
        for ((slot, tile), present) in srcs.iter_mut().zip(tiles.iter()).zip(present) {
            if present {
                *slot = Some(tile);
            }
        }
        baker.bake(&srcs, out);

        Ok(())
    }

    fn load_tiles(&self, positions: &[TilePos], tiles: &mut [Tile], present: &mut [bool]) -> Result<(), WorldError> {
        let store = self.snapshots.read();
        for ((pos, tile), present) in positions.iter().zip(tiles.iter_mut()).zip(present.iter_mut()) {
            *present = match store.get(pos) {
                Some(snapshot) => snapshot.load_tile(tile)?,
                None => false,
            };
        }
        Ok(())
    }

    fn commit(&self, pos: TilePos, tile: &Tile) -> Result<TileSnapshot, WorldError> {
        let timestamp = self.clock.fetch_add(1, Ordering::Relaxed) + 1;
        let mut snapshot = if tile.is_empty() {
            TileSnapshot::empty(pos, timestamp)
        } else {
            TileSnapshot::new(pos, timestamp, Some(tile))
        };
        if self.config.compress_snapshots {
            snapshot = snapshot.compressed()?;
        }
        self.put(snapshot.clone())?;

        Ok(snapshot)
    }

    /// Stores `snapshot` unless a newer one is already stored for its position. Returns whether it was stored.
    ///
    /// Panics if the snapshot's level is not configured.
    pub fn put(&self, snapshot: TileSnapshot) -> Result<bool, WorldError> {
        let pos = snapshot.pos();
        let index = self.level_index(pos.level);
        let snapshot = if self.config.compress_snapshots {
            snapshot.compressed()?
        } else {
            snapshot
        };

        let mut store = self.snapshots.write();
        if let Some(old) = store.get(&pos) {
            if old.timestamp() > snapshot.timestamp() {
                log::debug!(
                    "Ignoring snapshot of {:?} at {}, have {}",
                    pos,
                    snapshot.timestamp(),
                    old.timestamp()
                );
                return Ok(false);
            }
        }
        self.clock.fetch_max(snapshot.timestamp(), Ordering::Relaxed);

        let point = pos.coords().to_array();
        if snapshot.is_empty() {
            index.remove(point)?;
        } else {
            index.add(point)?;
        }
        store.insert(pos, snapshot);

        Ok(true)
    }

    /// Forgets the tile at `pos`, returning its last snapshot.
    pub fn remove(&self, pos: TilePos) -> Result<Option<TileSnapshot>, WorldError> {
        let index = self.level_index(pos.level);
        let mut store = self.snapshots.write();
        index.remove(pos.coords().to_array())?;

        Ok(store.remove(&pos))
    }

    pub fn snapshot(&self, pos: TilePos) -> Option<TileSnapshot> {
        self.snapshots.read().get(&pos).cloned()
    }

    /// Decodes the stored tile at `pos` into `tile`. Returns `false` (leaving `tile` reset) if there is none.
    pub fn load_tile(&self, pos: TilePos, tile: &mut Tile) -> Result<bool, WorldError> {
        match self.snapshots.read().get(&pos) {
            Some(snapshot) => Ok(snapshot.load_tile(tile)?),
            None => {
                tile.reset();
                Ok(false)
            }
        }
    }

    /// Returns `true` if a non-empty tile is stored at any position of `level` in the inclusive box `[min, max]`.
    pub fn any_tiles_in(&self, level: Level, min: IVec3, max: IVec3) -> Result<bool, WorldError> {
        Ok(self.level_index(level).contains_any(min.to_array(), max.to_array())?)
    }

    /// Number of non-empty tiles stored at `level`.
    pub fn tile_count(&self, level: Level) -> Result<usize, WorldError> {
        Ok(self.level_index(level).len()?)
    }

    /// Total bytes held by stored snapshots.
    pub fn stored_bytes(&self) -> usize {
        self.snapshots.read().values().map(TileSnapshot::stored_size).sum()
    }

    fn level_index(&self, level: Level) -> &AsyncInitSegtreeSet<3> {
        assert!(level < self.levels(), "level {} is not configured", level);
        &self.index[level as usize]
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
