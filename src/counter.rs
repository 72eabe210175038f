//! Striped size counters.

use std::cell::Cell;
use std::sync::atomic::{AtomicI64, Ordering};
use std::thread;

use ahash::RandomState;
use crossbeam_utils::CachePadded;

use crate::{cpu_count, MAX_COUNTER_LEN};

thread_local! {
    static RNG_STATE: Cell<u64> = Cell::new(RandomState::new().hash_one(thread::current().id()));
}

/// Per-thread wyrand step. Picks counter stripes and table seeds; not for anything that needs
/// unpredictability.
#[inline(always)]
pub(crate) fn fast_rand() -> u64 {
    RNG_STATE.with(|state| {
        let s = state.get().wrapping_add(0xa076_1d64_78bd_642f);
        state.set(s);
        let t = (s as u128).wrapping_mul((s ^ 0xe703_7ed1_a0b4_28db) as u128);
        ((t >> 64) ^ t) as u64
    })
}

/// Number of stripes for a table of `table_len` root buckets.
pub(crate) fn counter_len(table_len: usize) -> usize {
    let max = cpu_count().min(MAX_COUNTER_LEN).max(1);
    (table_len >> 10).clamp(1, max).next_power_of_two().min(MAX_COUNTER_LEN)
}

/// Signed counters summed to get a table's size. Each stripe sits on its own cache line.
pub(crate) struct Counters {
    stripes: Box<[CachePadded<AtomicI64>]>,
}

impl Counters {
    pub(crate) fn new(len: usize) -> Self {
        debug_assert!(len.is_power_of_two());
        Self {
            stripes: (0..len).map(|_| CachePadded::new(AtomicI64::new(0))).collect(),
        }
    }

    #[inline(always)]
    pub(crate) fn len(&self) -> usize {
        self.stripes.len()
    }

    /// Adds `delta` to a randomly picked stripe.
    #[inline(always)]
    pub(crate) fn add(&self, delta: i64) {
        let stripe = fast_rand() as usize & (self.stripes.len() - 1);
        self.add_at(stripe, delta);
    }

    #[inline(always)]
    pub(crate) fn add_at(&self, stripe: usize, delta: i64) {
        self.stripes[stripe & (self.stripes.len() - 1)].fetch_add(delta, Ordering::Relaxed);
    }

    /// Sum of all stripes. Individual stripes may be negative; so may the sum while writers are
    /// in flight.
    pub(crate) fn sum(&self) -> i64 {
        self.stripes
            .iter()
            .map(|stripe| stripe.load(Ordering::Relaxed))
            .sum()
    }

    /// [`sum`](Self::sum) clamped to a count.
    #[inline]
    pub(crate) fn total(&self) -> usize {
        self.sum().max(0) as usize
    }
}
