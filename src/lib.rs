//! stripemap: a concurrent, resizable hash map with lock-free reads.
//!
//! Keys live in cache-line sized buckets of [`ENTRIES_PER_BUCKET`] slots. Each bucket carries a
//! single 64-bit metadata word packing a spinlock bit with a presence flag and a short hash
//! signature per slot, so readers can reject non-matching slots from one atomic snapshot without
//! touching the entries. Writers lock only the root bucket of a chain; the size is tracked by
//! striped counters; the table grows and shrinks by migrating bucket by bucket while readers keep
//! using the old generation. Retired tables and entries are reclaimed with epoch-based
//! reclamation.
//!
//! ```
//! use stripemap::MapOf;
//!
//! let map: MapOf<u64, String> = MapOf::new();
//! map.store(1, "one".to_string());
//! assert_eq!(map.load(&1), Some("one".to_string()));
//!
//! let (value, loaded) = map.load_or_store(1, "uno".to_string());
//! assert_eq!((value.as_str(), loaded), ("one", true));
//!
//! map.compute(2, |old| Some(old.map_or(0, |v: &String| v.len()).to_string()));
//! assert_eq!(map.load(&2), Some("0".to_string()));
//! assert_eq!(map.len(), 2);
//! ```

use std::sync::LazyLock;
use std::thread;

mod bucket;
mod config;
mod counter;
pub mod error;
mod hasher;
mod iter;
mod map;
mod meta;
mod stats;

pub use config::MapConfig;
pub use error::{Error, Result};
pub use hasher::{HasherFn, KeyHasher};
pub use iter::{Iter, Keys, Values};
pub use map::MapOf;
pub use stats::Stats;

/// Map with `String` keys.
pub type Map<V, H = ahash::RandomState> = MapOf<String, V, H>;

// ================================================================================================
// CONSTANTS
// ================================================================================================

/// Entry slots per bucket: the meta word, five entry pointers and the overflow pointer fill one
/// 64-byte cache line.
pub const ENTRIES_PER_BUCKET: usize = 5;

/// Smallest table, in root buckets.
pub const MIN_TABLE_LEN: usize = 32;

/// Occupancy of the root slots beyond which a writer that needs an overflow bucket grows the
/// table instead.
const LOAD_FACTOR: f64 = 0.75;

/// The table shrinks once `size <= capacity / SHRINK_FRACTION`.
const SHRINK_FRACTION: usize = 128;

/// Upper bound on size counter stripes.
const MAX_COUNTER_LEN: usize = 32;

/// Largest addressable table, in root buckets.
const MAX_TABLE_LEN: usize = 1 << (usize::BITS - 8);

static CPU_COUNT: LazyLock<usize> = LazyLock::new(|| {
    thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
});

#[inline(always)]
fn cpu_count() -> usize {
    *CPU_COUNT
}

// ================================================================================================
// SIZING
// ================================================================================================

/// Root bucket count for a presize hint, or `None` if it does not fit.
fn calc_table_len(size_hint: usize) -> Option<usize> {
    let min_len = (size_hint as f64 / (ENTRIES_PER_BUCKET as f64 * LOAD_FACTOR)).ceil() as usize;
    let len = min_len.max(MIN_TABLE_LEN).checked_next_power_of_two()?;
    (len <= MAX_TABLE_LEN).then_some(len)
}

/// Entry count beyond which an insert that needs an overflow bucket grows the table instead.
#[inline(always)]
fn grow_threshold(table_len: usize) -> usize {
    (table_len as f64 * ENTRIES_PER_BUCKET as f64 * LOAD_FACTOR) as usize
}

/// Whether an insert that needs an overflow bucket should grow a table of `table_len` root
/// buckets holding `size` entries. Tables at [`MAX_TABLE_LEN`] keep chaining instead.
#[inline(always)]
fn should_grow(table_len: usize, size: usize) -> bool {
    table_len < MAX_TABLE_LEN && size > grow_threshold(table_len)
}

/// Entry count at or below which a delete shrinks the table.
#[inline(always)]
fn shrink_threshold(table_len: usize) -> usize {
    table_len * ENTRIES_PER_BUCKET / SHRINK_FRACTION
}
