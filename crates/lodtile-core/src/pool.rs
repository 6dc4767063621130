use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};

/// Something that can be returned to a [`Pool`] and handed out again.
pub trait Recycle {
    /// Restore the value to the state of a freshly created one, keeping any heap allocations around.
    fn reset(&mut self);
}

/// A bounded free list of reusable heap values.
///
/// [`acquire`](Self::acquire) hands out a [`Pooled`] guard that resets the value and returns it on drop, so values come back
/// on every exit path including unwinding. If more values are checked out than the pool retains, the extras are simply dropped
/// on release.
pub struct Pool<T> {
    free: Mutex<Vec<Box<T>>>,
    capacity: usize,
    make: fn() -> T,
}

impl<T: Recycle> Pool<T> {
    pub fn new(capacity: usize, make: fn() -> T) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            make,
        }
    }

    pub fn acquire(&self) -> Pooled<'_, T> {
        let value = self.free.lock().pop().unwrap_or_else(|| Box::new((self.make)()));
        Pooled {
            pool: self,
            value: Some(value),
        }
    }

    /// Number of idle values held by the pool.
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn release(&self, mut value: Box<T>) {
        value.reset();
        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(value);
        }
    }
}

impl<T: Recycle + Default> Default for Pool<T> {
    fn default() -> Self {
        Self::new(64, T::default)
    }
}

pub struct Pooled<'a, T: Recycle> {
    pool: &'a Pool<T>,
    // Only `None` while being dropped.
    value: Option<Box<T>>,
}

impl<'a, T: Recycle> Deref for Pooled<'a, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        self.value.as_deref().unwrap_or_else(|| unreachable!())
    }
}

impl<'a, T: Recycle> DerefMut for Pooled<'a, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_deref_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<'a, T: Recycle> Drop for Pooled<'a, T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.pool.release(value);
        }
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
