//! Zero-sized hash builder for the engine's internal graph collections.
//!
//! Node ids are small integers we hand out ourselves, so HashDoS resistance
//! buys nothing here. A fixed-seed foldhash keeps every set zero-overhead and
//! makes iteration order reproducible across runs.

use std::hash::BuildHasher;

use foldhash::fast::{FixedState, FoldHasher};
use indexmap::{IndexMap, IndexSet};

/// Insertion-ordered set used for edge lists and propagation work sets.
pub(crate) type NodeSet<K> = IndexSet<K, FastHashBuilder>;

/// Insertion-ordered map used for per-round bookkeeping (in-degrees).
pub(crate) type NodeMap<K, V> = IndexMap<K, V, FastHashBuilder>;

/// A zero-sized `BuildHasher` that uses foldhash with a fixed seed.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct FastHashBuilder;

impl BuildHasher for FastHashBuilder {
    type Hasher = FoldHasher<'static>;

    #[inline]
    fn build_hasher(&self) -> Self::Hasher {
        FixedState::with_seed(0x9e37_79b9_7f4a_7c15).build_hasher()
    }
}
