//! A set of integer points that can cheaply answer "is any point inside this box?"
//!
//! Every point is stored redundantly at each coarsening level `0..LEVELS`. Level `i` holds the point's coordinates
//! arithmetic-shifted right by `i`, so a coarse cell is present iff any of the points it covers is present. Queries descend
//! from the coarsest level and stop as soon as a cell is either absent or fully contained in the query box, which bounds the
//! work by the bit depth of the coordinates instead of the number of points.

mod async_init;

pub use async_init::*;

use crate::SmallKeyHashSet;

/// Number of coarsening levels. Level `LEVELS - 1` only contains coordinates in `{-1, 0}`; above it is a single implicit root
/// cell that is present iff the set is non-empty.
pub const LEVELS: usize = i32::BITS as usize;

pub type Point<const D: usize> = [i32; D];

#[derive(Clone, Debug)]
pub struct SegtreeSet<const D: usize> {
    levels: Vec<SmallKeyHashSet<Point<D>>>,
}

impl<const D: usize> Default for SegtreeSet<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const D: usize> SegtreeSet<D> {
    pub fn new() -> Self {
        assert!(D > 0 && D < 16, "unsupported dimensionality {}", D);
        Self {
            levels: (0..LEVELS).map(|_| SmallKeyHashSet::default()).collect(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.levels[0].len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.levels[0].is_empty()
    }

    /// Returns `true` if `point` was not already present.
    pub fn add(&mut self, point: Point<D>) -> bool {
        if !self.levels[0].insert(point) {
            return false;
        }
        // Stop climbing as soon as an ancestor already exists, it already represents this point.
        for level in 1..LEVELS {
            if !self.levels[level].insert(shift_down(point, level)) {
                break;
            }
        }
        true
    }

    /// Returns `true` if `point` was present.
    pub fn remove(&mut self, point: Point<D>) -> bool {
        if !self.levels[0].remove(&point) {
            return false;
        }
        for level in 1..LEVELS {
            let ancestor = shift_down(point, level);
            let below = &self.levels[level - 1];
            if children(ancestor).any(|child| below.contains(&child)) {
                break;
            }
            self.levels[level].remove(&ancestor);
        }
        true
    }

    #[inline]
    pub fn contains(&self, point: Point<D>) -> bool {
        self.levels[0].contains(&point)
    }

    /// Returns `true` if the cell `cell` at coarsening `level` covers any point in the set.
    pub fn contains_at_level(&self, level: usize, cell: Point<D>) -> bool {
        assert!(level < LEVELS, "level {} out of range", level);
        self.levels[level].contains(&cell)
    }

    /// Number of cells stored at coarsening `level`.
    pub fn count_in_level(&self, level: usize) -> usize {
        assert!(level < LEVELS, "level {} out of range", level);
        self.levels[level].len()
    }

    /// Returns `true` if any point lies in the box spanned by `a` and `b`, both corners inclusive. The corners may be given in
    /// any order.
    pub fn contains_any(&self, a: Point<D>, b: Point<D>) -> bool {
        if self.is_empty() {
            return false;
        }

        let mut query = QueryBox {
            min: [0; D],
            max: [0; D],
        };
        for i in 0..D {
            query.min[i] = a[i].min(b[i]) as i64;
            query.max[i] = a[i].max(b[i]) as i64;
        }

        // The children of the implicit root are the cells of the top level, whose coordinates are all -1 or 0.
        let top = LEVELS - 1;
        (0..1u32 << D).any(|bits| {
            let mut cell = [0; D];
            for (i, c) in cell.iter_mut().enumerate() {
                *c = -(((bits >> i) & 1) as i32);
            }
            self.contains_any_in_cell(top, cell, &query)
        })
    }

    fn contains_any_in_cell(&self, level: usize, cell: Point<D>, query: &QueryBox<D>) -> bool {
        let mut fully_inside = true;
        for i in 0..D {
            let lo = (cell[i] as i64) << level;
            let hi = ((cell[i] as i64 + 1) << level) - 1;
            if hi < query.min[i] || lo > query.max[i] {
                return false;
            }
            fully_inside &= lo >= query.min[i] && hi <= query.max[i];
        }

        let present = self.levels[level].contains(&cell);
        if fully_inside || !present {
            return present;
        }

        debug_assert!(level > 0);
        children(cell).any(|child| self.contains_any_in_cell(level - 1, child, query))
    }

    pub fn clear(&mut self) {
        for level in self.levels.iter_mut() {
            level.clear();
        }
    }

    /// Visits every point in the set, in no particular order.
    pub fn for_each(&self, mut f: impl FnMut(Point<D>)) {
        for &p in self.levels[0].iter() {
            f(p);
        }
    }

    pub fn add_slice(&mut self, point: &[i32]) -> bool {
        self.add(point_from_slice(point))
    }

    pub fn remove_slice(&mut self, point: &[i32]) -> bool {
        self.remove(point_from_slice(point))
    }

    pub fn contains_slice(&self, point: &[i32]) -> bool {
        self.contains(point_from_slice(point))
    }

    pub fn contains_any_slice(&self, a: &[i32], b: &[i32]) -> bool {
        self.contains_any(point_from_slice(a), point_from_slice(b))
    }
}

struct QueryBox<const D: usize> {
    min: [i64; D],
    max: [i64; D],
}

/// Converts a slice into a point, panicking on a dimensionality mismatch.
pub fn point_from_slice<const D: usize>(s: &[i32]) -> Point<D> {
    assert_eq!(s.len(), D, "expected a {}-dimensional point, got {} coordinates", D, s.len());
    // Length is checked above.
    s.try_into().unwrap_or([0; D])
}

#[inline]
fn shift_down<const D: usize>(mut p: Point<D>, shift: usize) -> Point<D> {
    for c in p.iter_mut() {
        *c >>= shift;
    }
    p
}

/// All `2^D` cells one level finer than `parent` ("LSB permutations" of `parent << 1`).
fn children<const D: usize>(parent: Point<D>) -> impl Iterator<Item = Point<D>> {
    (0..1u32 << D).map(move |bits| {
        let mut child = parent;
        for (i, c) in child.iter_mut().enumerate() {
            *c = (*c << 1) | ((bits >> i) & 1) as i32;
        }
        child
    })
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

    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn brute_force_contains_any(points: &SmallKeyHashSet<[i32; 3]>, a: [i32; 3], b: [i32; 3]) -> bool {
        points.iter().any(|p| (0..3).all(|i| p[i] >= a[i].min(b[i]) && p[i] <= a[i].max(b[i])))
    }

    #[test]
    fn duplicate_add_and_remove() {
        let mut set = SegtreeSet::<3>::new();
        assert!(set.add([1, 2, 3]));
        assert!(!set.add([1, 2, 3]));
        assert_eq!(set.len(), 1);
        assert!(set.remove([1, 2, 3]));
        assert!(!set.remove([1, 2, 3]));
        assert!(set.is_empty());
        for level in 0..LEVELS {
            assert_eq!(set.count_in_level(level), 0);
        }
    }

    #[test]
    fn negative_coordinates_coarsen_toward_negative_infinity() {
        let mut set = SegtreeSet::<2>::new();
        set.add([-1, -3]);
        assert!(set.contains_at_level(1, [-1, -2]));
        assert!(set.contains_at_level(2, [-1, -1]));
        assert!(set.contains_at_level(LEVELS - 1, [-1, -1]));
        assert!(!set.contains_at_level(1, [0, -1]));
    }

    #[test]
    fn removing_one_sibling_keeps_shared_ancestors() {
        let mut set = SegtreeSet::<3>::new();
        set.add([4, 4, 4]);
        set.add([5, 4, 4]);
        set.remove([4, 4, 4]);
        assert!(set.contains_at_level(1, [2, 2, 2]));
        assert!(set.contains_any([5, 4, 4], [5, 4, 4]));
        assert!(!set.contains_any([4, 4, 4], [4, 5, 5]));
        set.remove([5, 4, 4]);
        assert!(!set.contains_at_level(1, [2, 2, 2]));
        assert!(!set.contains_at_level(LEVELS - 1, [0, 0, 0]));
    }

    #[test]
    fn query_corners_in_any_order() {
        let mut set = SegtreeSet::<3>::new();
        set.add([10, -20, 30]);
        assert!(set.contains_any([0, 0, 0], [10, -20, 30]));
        assert!(set.contains_any([10, -20, 30], [0, 0, 0]));
        assert!(set.contains_any([i32::MIN; 3], [i32::MAX; 3]));
        assert!(!set.contains_any([11, -20, 30], [20, 0, 40]));
    }

    #[test]
    fn extreme_coordinates() {
        let mut set = SegtreeSet::<3>::new();
        set.add([i32::MAX, i32::MIN, 0]);
        assert!(set.contains_any([i32::MAX, i32::MIN, 0], [i32::MAX, i32::MIN, 0]));
        assert!(set.contains_any([0, i32::MIN, -1], [i32::MAX, 0, 1]));
        assert!(!set.contains_any([0, 0, 0], [i32::MAX, i32::MAX, i32::MAX]));
        assert!(set.remove([i32::MAX, i32::MIN, 0]));
        assert!(!set.contains_any([i32::MIN; 3], [i32::MAX; 3]));
    }

    #[test]
    #[should_panic]
    fn dimension_mismatch_panics() {
        let mut set = SegtreeSet::<3>::new();
        set.add_slice(&[1, 2]);
    }

    #[test]
    fn matches_reference_set() {
        let mut rng = StdRng::seed_from_u64(0x5e67);
        let mut set = SegtreeSet::<3>::new();
        let mut reference = SmallKeyHashSet::default();

        for _ in 0..2000 {
            let p = [rng.random_range(-40..40), rng.random_range(-40..40), rng.random_range(-40..40)];
            if rng.random_bool(0.6) {
                assert_eq!(set.add(p), reference.insert(p));
            } else {
                assert_eq!(set.remove(p), reference.remove(&p));
            }
            assert_eq!(set.len(), reference.len());

            let q = [rng.random_range(-40..40), rng.random_range(-40..40), rng.random_range(-40..40)];
            assert_eq!(set.contains(q), reference.contains(&q));

            let a = [rng.random_range(-50..50), rng.random_range(-50..50), rng.random_range(-50..50)];
            let b = [
                a[0] + rng.random_range(-12..12),
                a[1] + rng.random_range(-12..12),
                a[2] + rng.random_range(-12..12),
            ];
            assert_eq!(
                set.contains_any(a, b),
                brute_force_contains_any(&reference, a, b),
                "box {:?} {:?}",
                a,
                b
            );
        }

        let mut visited = SmallKeyHashSet::default();
        set.for_each(|p| {
            visited.insert(p);
        });
        assert_eq!(visited, reference);
    }

    #[test]
    fn absent_coarse_cell_implies_absent_region() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut set = SegtreeSet::<3>::new();
        for _ in 0..300 {
            set.add([rng.random_range(-64..64), rng.random_range(-64..64), rng.random_range(-64..64)]);
        }
        for _ in 0..100 {
            set.remove([rng.random_range(-64..64), rng.random_range(-64..64), rng.random_range(-64..64)]);
        }

        for level in 1..8 {
            let half = 64 >> level;
            for x in -half - 1..=half {
                for y in -half - 1..=half {
                    for z in -half - 1..=half {
                        let cell = [x, y, z];
                        let min = cell.map(|c| c << level);
                        let max = cell.map(|c| ((c + 1) << level) - 1);
                        let region = set.contains_any(min, max);
                        assert_eq!(set.contains_at_level(level, cell), region, "level {} cell {:?}", level, cell);
                        // Finer levels agree with coarser ones over the same region.
                        if !set.contains_at_level(level, cell) {
                            assert!(!set.contains_at_level(level - 1, cell.map(|c| c << 1)));
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn clear_empties_every_level() {
        let mut set = SegtreeSet::<4>::new();
        set.add([1, 2, 3, 4]);
        set.add([-1, -2, -3, -4]);
        set.clear();
        assert!(set.is_empty());
        assert!(!set.contains_any([i32::MIN; 4], [i32::MAX; 4]));
        for level in 0..LEVELS {
            assert_eq!(set.count_in_level(level), 0);
        }
    }
}
