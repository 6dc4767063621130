//! Dependency-light building blocks shared by the lodtile crates.

pub mod arena;
pub mod geometry;
pub mod pool;
pub mod qef;
pub mod segtree;

use ahash::{AHashMap, AHashSet};
pub type SmallKeyHashMap<K, V> = AHashMap<K, V>;
pub type SmallKeyHashSet<K> = AHashSet<K>;

// Re-exports.
pub use approx;
pub use glam;
pub use static_assertions;
