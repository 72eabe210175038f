//! Bit-packed bucket metadata.
//!
//! A bucket's whole metadata lives in one `u64` so that a lock-free reader can take a single
//! atomic snapshot of it:
//!
//! ```text
//! bit 0                      bucket spinlock (only meaningful on root buckets)
//! bits 1 + i*12 .. 13 + i*12 slot i: bit 0 = presence flag, bits 1..12 = top-hash signature
//! ```
//!
//! With [`ENTRIES_PER_BUCKET`] = 5 the slot fields occupy bits 1..=60.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::Backoff;

use crate::ENTRIES_PER_BUCKET;

/// Bucket spinlock bit.
const LOCK_BIT: u64 = 1;

/// Bits per slot field: one presence flag plus the signature.
const SLOT_BITS: u32 = 12;

/// Bits of the hash kept as the per-slot signature.
const SIGNATURE_BITS: u32 = SLOT_BITS - 1;

const SLOT_FIELD_MASK: u64 = (1 << SLOT_BITS) - 1;

const PRESENT: u64 = 1;

const _: () = assert!(1 + ENTRIES_PER_BUCKET as u32 * SLOT_BITS <= u64::BITS);

#[inline(always)]
const fn slot_shift(idx: usize) -> u32 {
    1 + idx as u32 * SLOT_BITS
}

/// Slot field value for `hash`: signature from the top bits, presence flag set.
#[inline(always)]
const fn slot_field(hash: u64) -> u64 {
    ((hash >> (u64::BITS - SIGNATURE_BITS)) << 1) | PRESENT
}

/// Snapshot of a bucket's metadata word.
///
/// All methods are pure bit arithmetic; publishing a new word is done through [`BucketMeta`].
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct MetaWord(u64);

impl MetaWord {
    pub(crate) const EMPTY: MetaWord = MetaWord(0);

    #[inline(always)]
    pub(crate) fn is_locked(self) -> bool {
        self.0 & LOCK_BIT != 0
    }

    #[inline(always)]
    fn field(self, idx: usize) -> u64 {
        (self.0 >> slot_shift(idx)) & SLOT_FIELD_MASK
    }

    #[inline(always)]
    pub(crate) fn is_occupied(self, idx: usize) -> bool {
        self.field(idx) & PRESENT != 0
    }

    /// Whether slot `idx` is occupied and carries the signature of `hash`.
    #[inline(always)]
    pub(crate) fn top_hash_match(self, hash: u64, idx: usize) -> bool {
        self.field(idx) == slot_field(hash)
    }

    /// Marks slot `idx` occupied with the signature of `hash`.
    #[inline(always)]
    #[must_use]
    pub(crate) fn store_top_hash(self, hash: u64, idx: usize) -> MetaWord {
        let shift = slot_shift(idx);
        MetaWord((self.0 & !(SLOT_FIELD_MASK << shift)) | (slot_field(hash) << shift))
    }

    /// Clears slot `idx`.
    #[inline(always)]
    #[must_use]
    pub(crate) fn erase_top_hash(self, idx: usize) -> MetaWord {
        MetaWord(self.0 & !(SLOT_FIELD_MASK << slot_shift(idx)))
    }

    /// Slots whose signature matches `hash`.
    #[inline(always)]
    pub(crate) fn matches(self, hash: u64) -> SlotMask {
        let mut mask = 0u8;
        for idx in 0..ENTRIES_PER_BUCKET {
            if self.top_hash_match(hash, idx) {
                mask |= 1 << idx;
            }
        }
        SlotMask(mask)
    }

    /// Occupied slots.
    #[inline(always)]
    pub(crate) fn occupied(self) -> SlotMask {
        let mut mask = 0u8;
        for idx in 0..ENTRIES_PER_BUCKET {
            if self.is_occupied(idx) {
                mask |= 1 << idx;
            }
        }
        SlotMask(mask)
    }

    #[inline(always)]
    pub(crate) fn first_free(self) -> Option<usize> {
        (0..ENTRIES_PER_BUCKET).find(|&idx| !self.is_occupied(idx))
    }

    #[inline(always)]
    pub(crate) fn occupied_count(self) -> usize {
        self.occupied().0.count_ones() as usize
    }

    #[inline(always)]
    pub(crate) fn is_empty(self) -> bool {
        self.occupied().0 == 0
    }
}

impl std::fmt::Debug for MetaWord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MetaWord({:#018x})", self.0)
    }
}

/// Set of slot indices, iterated lowest first.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SlotMask(u8);

impl Iterator for SlotMask {
    type Item = usize;

    #[inline(always)]
    fn next(&mut self) -> Option<usize> {
        if self.0 == 0 {
            return None;
        }
        let idx = self.0.trailing_zeros() as usize;
        self.0 &= self.0 - 1;
        Some(idx)
    }
}

/// Atomic cell holding a bucket's [`MetaWord`].
///
/// Readers only ever `load`; writers mutate it while holding the lock bit of the chain's root.
pub(crate) struct BucketMeta(AtomicU64);

impl BucketMeta {
    pub(crate) const fn new(word: MetaWord) -> Self {
        Self(AtomicU64::new(word.0))
    }

    #[inline(always)]
    pub(crate) fn load(&self) -> MetaWord {
        MetaWord(self.0.load(Ordering::Acquire))
    }

    /// Publishes `word`. The caller holds the chain's root lock; a word derived from a locked
    /// snapshot keeps the lock bit set.
    #[inline(always)]
    pub(crate) fn store(&self, word: MetaWord) {
        self.0.store(word.0, Ordering::Release);
    }

    /// Spins until the lock bit is won. Released when the returned guard drops.
    #[inline]
    pub(crate) fn lock(&self) -> MetaLock<'_> {
        let backoff = Backoff::new();
        loop {
            let cur = self.0.load(Ordering::Relaxed);
            if cur & LOCK_BIT == 0
                && self
                    .0
                    .compare_exchange_weak(cur, cur | LOCK_BIT, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                return MetaLock { meta: self };
            }
            backoff.snooze();
        }
    }

    /// Clears the lock bit. Only the lock holder stores to this word, so a plain store suffices.
    #[inline(always)]
    fn unlock(&self) {
        let cur = self.0.load(Ordering::Relaxed);
        debug_assert!(MetaWord(cur).is_locked(), "unlocking a bucket that is not locked");
        self.0.store(cur & !LOCK_BIT, Ordering::Release);
    }
}

/// Held bucket lock; unlocks on drop so every exit path releases it.
pub(crate) struct MetaLock<'a> {
    meta: &'a BucketMeta,
}

impl Drop for MetaLock<'_> {
    #[inline(always)]
    fn drop(&mut self) {
        self.meta.unlock();
    }
}
