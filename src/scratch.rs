use lodtile_map::Tile;

use std::cell::{RefCell, RefMut};
use thread_local::ThreadLocal;

/// Per-thread sets of [`Tile`] buffers for operations that decode many neighboring tiles at once.
///
/// Each worker thread gets its own set, so concurrent callers never contend. The buffers grow to the largest request seen on
/// that thread and are reused afterwards.
#[derive(Default)]
pub struct ThreadLocalTiles {
    tiles: ThreadLocal<RefCell<Vec<Tile>>>,
}

impl ThreadLocalTiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrows at least `count` tiles owned by the calling thread.
    ///
    /// Panics if the calling thread already holds a borrow.
    pub fn get(&self, count: usize) -> RefMut<'_, Vec<Tile>> {
        let mut tiles = self.tiles.get_or(|| RefCell::new(Vec::new())).borrow_mut();
        if tiles.len() < count {
            tiles.resize_with(count, Tile::new);
        }
        tiles
    }

    /// Number of threads that have allocated a set so far.
    pub fn thread_count(&mut self) -> usize {
        self.tiles.iter_mut().count()
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
