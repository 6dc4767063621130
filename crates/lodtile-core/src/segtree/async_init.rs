use super::{Point, SegtreeSet};
use crate::SmallKeyHashSet;

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::error::Error;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

/// Returned by every operation on an [`AsyncInitSegtreeSet`] whose background load failed.
#[derive(Clone, Debug, thiserror::Error)]
pub enum IndexLoadError {
    #[error("background index load failed: {0}")]
    Failed(Arc<dyn Error + Send + Sync>),
    #[error("background index load panicked")]
    Panicked,
}

/// Points produced by a background loader are handed over in batches of this size to keep lock hold times short.
const SINK_BATCH_SIZE: usize = 1024;

/// A [`SegtreeSet`] whose initial contents are computed on a background thread.
///
/// Reads block until the background load has finished. Writes are applied immediately, even while loading, and they win over
/// the loader: a point removed while loading will not be resurrected when the loader later emits it. If the loader fails, every
/// subsequent operation returns the latched [`IndexLoadError`].
pub struct AsyncInitSegtreeSet<const D: usize> {
    shared: Arc<Shared<D>>,
}

struct Shared<const D: usize> {
    state: Mutex<State<D>>,
    loaded: Condvar,
}

struct State<const D: usize> {
    set: SegtreeSet<D>,
    progress: LoadProgress<D>,
}

enum LoadProgress<const D: usize> {
    Loading {
        /// Points removed by writers while the load was in progress.
        removed: SmallKeyHashSet<Point<D>>,
    },
    Done,
    Failed(IndexLoadError),
}

/// Receives points from a background loader.
pub struct PointSink<'a, const D: usize> {
    shared: &'a Shared<D>,
    batch: Vec<Point<D>>,
}

impl<'a, const D: usize> PointSink<'a, D> {
    pub fn push(&mut self, point: Point<D>) {
        self.batch.push(point);
        if self.batch.len() >= SINK_BATCH_SIZE {
            self.flush();
        }
    }

    fn flush(&mut self) {
        if self.batch.is_empty() {
            return;
        }
        let mut state = self.shared.state.lock();
        let State { set, progress } = &mut *state;
        if let LoadProgress::Loading { removed } = progress {
            for p in self.batch.drain(..) {
                if !removed.contains(&p) {
                    set.add(p);
                }
            }
        }
        self.batch.clear();
    }
}

impl<const D: usize> AsyncInitSegtreeSet<D> {
    /// Spawns a thread that runs `load`, which pushes the initial points into the given sink.
    pub fn spawn<F, E>(load: F) -> Self
    where
        F: FnOnce(&mut PointSink<'_, D>) -> Result<(), E> + Send + 'static,
        E: Error + Send + Sync + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                set: SegtreeSet::new(),
                progress: LoadProgress::Loading {
                    removed: SmallKeyHashSet::default(),
                },
            }),
            loaded: Condvar::new(),
        });

        let thread_shared = shared.clone();
        thread::spawn(move || {
            let shared = &*thread_shared;
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                let mut sink = PointSink {
                    shared,
                    batch: Vec::with_capacity(SINK_BATCH_SIZE),
                };
                let result = load(&mut sink);
                sink.flush();
                result
            }));

            let mut state = shared.state.lock();
            state.progress = match result {
                Ok(Ok(())) => {
                    log::debug!("Loaded {} points into presence index", state.set.len());
                    LoadProgress::Done
                }
                Ok(Err(e)) => {
                    log::warn!("Presence index load failed: {}", e);
                    LoadProgress::Failed(IndexLoadError::Failed(Arc::new(e)))
                }
                Err(_) => {
                    log::warn!("Presence index loader panicked");
                    LoadProgress::Failed(IndexLoadError::Panicked)
                }
            };
            shared.loaded.notify_all();
        });

        Self { shared }
    }

    /// Creates a set that is already loaded with `points`.
    pub fn loaded(points: impl IntoIterator<Item = Point<D>>) -> Self {
        let mut set = SegtreeSet::new();
        for p in points {
            set.add(p);
        }
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    set,
                    progress: LoadProgress::Done,
                }),
                loaded: Condvar::new(),
            }),
        }
    }

    pub fn is_loaded(&self) -> bool {
        !matches!(self.shared.state.lock().progress, LoadProgress::Loading { .. })
    }

    /// Blocks until the background load has finished.
    pub fn wait(&self) -> Result<(), IndexLoadError> {
        self.read_guard().map(drop)
    }

    fn read_guard(&self) -> Result<MutexGuard<'_, State<D>>, IndexLoadError> {
        let mut state = self.shared.state.lock();
        while let LoadProgress::Loading { .. } = state.progress {
            self.shared.loaded.wait(&mut state);
        }
        match &state.progress {
            LoadProgress::Failed(e) => Err(e.clone()),
            _ => Ok(state),
        }
    }

    fn write_guard(&self) -> Result<MutexGuard<'_, State<D>>, IndexLoadError> {
        let state = self.shared.state.lock();
        match &state.progress {
            LoadProgress::Failed(e) => Err(e.clone()),
            _ => Ok(state),
        }
    }

    /// While the load is in progress, the return value only reflects the points loaded so far.
    pub fn add(&self, point: Point<D>) -> Result<bool, IndexLoadError> {
        let mut state = self.write_guard()?;
        let State { set, progress } = &mut *state;
        if let LoadProgress::Loading { removed } = progress {
            removed.remove(&point);
        }
        Ok(set.add(point))
    }

    /// While the load is in progress, the return value only reflects the points loaded so far.
    pub fn remove(&self, point: Point<D>) -> Result<bool, IndexLoadError> {
        let mut state = self.write_guard()?;
        let State { set, progress } = &mut *state;
        if let LoadProgress::Loading { removed } = progress {
            removed.insert(point);
        }
        Ok(set.remove(point))
    }

    pub fn clear(&self) -> Result<(), IndexLoadError> {
        // Clearing must not be undone by points the loader has yet to emit.
        let mut state = self.read_guard()?;
        state.set.clear();
        Ok(())
    }

    pub fn contains(&self, point: Point<D>) -> Result<bool, IndexLoadError> {
        Ok(self.read_guard()?.set.contains(point))
    }

    pub fn contains_any(&self, a: Point<D>, b: Point<D>) -> Result<bool, IndexLoadError> {
        Ok(self.read_guard()?.set.contains_any(a, b))
    }

    pub fn len(&self) -> Result<usize, IndexLoadError> {
        Ok(self.read_guard()?.set.len())
    }

    pub fn is_empty(&self) -> Result<bool, IndexLoadError> {
        Ok(self.read_guard()?.set.is_empty())
    }

    /// `f` runs while the set is locked; it must not call back into this set.
    pub fn for_each(&self, f: impl FnMut(Point<D>)) -> Result<(), IndexLoadError> {
        self.read_guard()?.set.for_each(f);
        Ok(())
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
