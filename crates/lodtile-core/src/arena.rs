//! A sequential variable-sized allocator that hands out ranges of a single growable address space.
//!
//! The allocator only does bookkeeping. Whatever actually backs the address space (usually a GPU buffer) is resized through a
//! [`HeapManager`] passed into each allocating call, so the owner of the backing store can keep it in the same struct as the
//! allocator without any shared-ownership gymnastics.

use crate::SmallKeyHashMap;

use serde::{Deserialize, Serialize};
use slab::Slab;
use std::collections::BTreeSet;

/// Resizes the storage behind a [`SequentialAllocator`].
pub trait HeapManager {
    /// Grows the backing storage to exactly `new_capacity` units, preserving the contents of the first `old_capacity` units. On
    /// error the storage must be left as it was.
    fn grow(&mut self, old_capacity: u64, new_capacity: u64) -> Result<(), AllocError>;
}

impl<F> HeapManager for F
where
    F: FnMut(u64, u64) -> Result<(), AllocError>,
{
    fn grow(&mut self, old_capacity: u64, new_capacity: u64) -> Result<(), AllocError> {
        self(old_capacity, new_capacity)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum AllocError {
    #[error("failed to grow backing storage to {requested_capacity} units")]
    GrowthFailed { requested_capacity: u64 },
}

/// How the address space grows when no free range is large enough.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Growth {
    /// Grow by a factor of `sqrt(2)`, rounded up to a multiple of `step`.
    Sqrt2 { step: u64 },
    /// Grow to the next power of two.
    Pow2,
}

impl Default for Growth {
    fn default() -> Self {
        Growth::Sqrt2 { step: 4096 }
    }
}

impl Growth {
    /// The capacity to grow to when at least `increment` more units are needed on top of `old_capacity`.
    pub fn grow(self, old_capacity: u64, increment: u64) -> u64 {
        let required = old_capacity + increment;
        match self {
            Growth::Sqrt2 { step } => {
                let scaled = (old_capacity as f64 * std::f64::consts::SQRT_2).ceil() as u64;
                round_up(required.max(scaled), step.max(1))
            }
            Growth::Pow2 => required.next_power_of_two(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AllocatorStats {
    pub heap_regions: u64,
    pub allocations: u64,
    pub allocated_space: u64,
    pub total_space: u64,
}

type NodeId = usize;

#[derive(Clone, Copy, Debug)]
struct Node {
    base: u64,
    size: u64,
    prev: Option<NodeId>,
    next: Option<NodeId>,
    free: bool,
}

/// Splits a growable address space into variable-sized ranges.
///
/// Ranges are kept in a doubly linked list ordered by address. Free ranges are additionally indexed by `(size, base)` for
/// best-fit lookup, and used ranges by base address for [`free`](Self::free).
pub struct SequentialAllocator {
    block_size: u64,
    growth: Growth,
    capacity: u64,

    nodes: Slab<Node>,
    tail: Option<NodeId>,
    free_ranges: BTreeSet<(u64, u64, NodeId)>,
    used_ranges: SmallKeyHashMap<u64, NodeId>,

    allocated_space: u64,
}

impl SequentialAllocator {
    /// Every allocation is rounded up to a multiple of `block_size` units.
    pub fn new(block_size: u64, growth: Growth) -> Self {
        assert!(block_size > 0, "block size must be positive");
        Self {
            block_size,
            growth,
            capacity: 0,
            nodes: Slab::new(),
            tail: None,
            free_ranges: BTreeSet::new(),
            used_ranges: SmallKeyHashMap::default(),
            allocated_space: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Allocates a range of at least `size` units and returns its base address. A zero-sized request allocates nothing and
    /// returns `None`.
    pub fn alloc(&mut self, size: u64, heap: &mut impl HeapManager) -> Result<Option<u64>, AllocError> {
        if size == 0 {
            return Ok(None);
        }
        let size = round_up(size, self.block_size);

        let node = match self.best_fit(size) {
            Some(node) => node,
            None => {
                self.expand(size, heap)?;
                // After expansion the tail is free and large enough.
                match self.best_fit(size) {
                    Some(node) => node,
                    None => {
                        return Err(AllocError::GrowthFailed {
                            requested_capacity: self.capacity + size,
                        })
                    }
                }
            }
        };

        Ok(Some(self.take(node, size)))
    }

    /// Allocates one range per entry of `sizes`. If any allocation fails, the ranges allocated so far are freed again and the
    /// error is returned.
    pub fn multi_alloc(&mut self, sizes: &[u64], heap: &mut impl HeapManager) -> Result<Vec<Option<u64>>, AllocError> {
        let mut out = Vec::with_capacity(sizes.len());
        for &size in sizes {
            match self.alloc(size, heap) {
                Ok(address) => out.push(address),
                Err(e) => {
                    for address in out.into_iter().flatten() {
                        self.free(address);
                    }
                    return Err(e);
                }
            }
        }
        Ok(out)
    }

    /// Returns the range starting at `address` to the free list.
    ///
    /// Panics if `address` is not the base of a live allocation.
    pub fn free(&mut self, address: u64) {
        let id = self
            .used_ranges
            .remove(&address)
            .unwrap_or_else(|| panic!("address {} is not allocated", address));

        let node = &mut self.nodes[id];
        node.free = true;
        self.allocated_space -= node.size;

        let mut id = id;
        if let Some(next) = self.nodes[id].next {
            if self.nodes[next].free {
                self.remove_free(next);
                self.merge(id, next);
            }
        }
        if let Some(prev) = self.nodes[id].prev {
            if self.nodes[prev].free {
                self.remove_free(prev);
                self.merge(prev, id);
                id = prev;
            }
        }
        self.insert_free(id);
    }

    pub fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            heap_regions: (self.capacity > 0) as u64,
            allocations: self.used_ranges.len() as u64,
            allocated_space: self.allocated_space,
            total_space: self.capacity,
        }
    }

    fn best_fit(&self, size: u64) -> Option<NodeId> {
        self.free_ranges
            .range((size, 0, 0)..)
            .next()
            .map(|&(_, _, id)| id)
    }

    /// Marks the free `node` used, splitting off the unused remainder as a new free node.
    fn take(&mut self, id: NodeId, size: u64) -> u64 {
        self.remove_free(id);

        let Node { base, size: node_size, next, .. } = self.nodes[id];
        if node_size > size {
            let rest = self.nodes.insert(Node {
                base: base + size,
                size: node_size - size,
                prev: Some(id),
                next,
                free: true,
            });
            match next {
                Some(next) => self.nodes[next].prev = Some(rest),
                None => self.tail = Some(rest),
            }
            self.nodes[id].next = Some(rest);
            self.nodes[id].size = size;
            self.insert_free(rest);
        }

        self.nodes[id].free = false;
        self.used_ranges.insert(base, id);
        self.allocated_space += size;
        base
    }

    /// Grows the address space so that a free range of at least `size` units exists at the end.
    fn expand(&mut self, size: u64, heap: &mut impl HeapManager) -> Result<(), AllocError> {
        let tail_free = match self.tail {
            Some(tail) if self.nodes[tail].free => self.nodes[tail].size,
            _ => 0,
        };
        let old_capacity = self.capacity;
        let new_capacity = self.growth.grow(old_capacity, size - tail_free);

        // Nothing is touched until the backing storage has actually grown.
        if let Err(e) = heap.grow(old_capacity, new_capacity) {
            log::warn!("Allocator failed to grow from {} to {}: {}", old_capacity, new_capacity, e);
            return Err(e);
        }
        log::debug!("Allocator grew from {} to {}", old_capacity, new_capacity);
        self.capacity = new_capacity;

        let added = new_capacity - old_capacity;
        match self.tail {
            Some(tail) if self.nodes[tail].free => {
                self.remove_free(tail);
                self.nodes[tail].size += added;
                self.insert_free(tail);
            }
            prev => {
                let id = self.nodes.insert(Node {
                    base: old_capacity,
                    size: added,
                    prev,
                    next: None,
                    free: true,
                });
                if let Some(prev) = prev {
                    self.nodes[prev].next = Some(id);
                }
                self.tail = Some(id);
                self.insert_free(id);
            }
        }
        Ok(())
    }

    /// Absorbs node `id` into its predecessor `prev`. Neither may be in the free index.
    fn merge(&mut self, prev: NodeId, id: NodeId) {
        let node = self.nodes.remove(id);
        debug_assert_eq!(node.prev, Some(prev));
        self.nodes[prev].size += node.size;
        self.nodes[prev].next = node.next;
        match node.next {
            Some(next) => self.nodes[next].prev = Some(prev),
            None => self.tail = Some(prev),
        }
    }

    fn insert_free(&mut self, id: NodeId) {
        let node = &self.nodes[id];
        self.free_ranges.insert((node.size, node.base, id));
    }

    fn remove_free(&mut self, id: NodeId) {
        let node = &self.nodes[id];
        self.free_ranges.remove(&(node.size, node.base, id));
    }
}

#[inline]
fn round_up(value: u64, step: u64) -> u64 {
    ((value + step - 1) / step) * step
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
