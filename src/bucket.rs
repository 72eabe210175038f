//! Entries, buckets and tables.
//!
//! A [`Table`] owns its root buckets and their overflow chains but never the entries they point
//! to: a resize moves entry pointers into the successor table while readers may still walk the
//! retired one, so entries are retired individually by whoever unlinks them for good.

use std::borrow::Borrow;
use std::sync::atomic::Ordering;

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};

use crate::counter::{counter_len, fast_rand, Counters};
use crate::meta::{BucketMeta, MetaWord};
use crate::ENTRIES_PER_BUCKET;

/// Immutable key/value pair. Updates publish a new entry instead of mutating this one.
pub(crate) struct Entry<K, V> {
    pub(crate) key: K,
    pub(crate) value: V,
}

/// Cache-line sized slot group.
#[repr(align(64))]
pub(crate) struct Bucket<K, V> {
    pub(crate) meta: BucketMeta,
    pub(crate) entries: [Atomic<Entry<K, V>>; ENTRIES_PER_BUCKET],
    pub(crate) next: Atomic<Bucket<K, V>>,
}

impl<K, V> Bucket<K, V> {
    fn new() -> Self {
        Self {
            meta: BucketMeta::new(MetaWord::EMPTY),
            entries: std::array::from_fn(|_| Atomic::null()),
            next: Atomic::null(),
        }
    }

    /// Overflow bucket holding a single entry in slot 0.
    fn with_entry<P>(hash: u64, entry: P) -> Self
    where
        P: crossbeam_epoch::Pointer<Entry<K, V>>,
    {
        let bucket = Self::new();
        bucket.entries[0].store(entry, Ordering::Relaxed);
        bucket.meta.store(MetaWord::EMPTY.store_top_hash(hash, 0));
        bucket
    }

    #[inline(always)]
    pub(crate) fn entry<'g>(&self, idx: usize, guard: &'g Guard) -> Option<&'g Entry<K, V>> {
        // SAFETY: entry pointers are either null or point at entries retired through the epoch
        // collector, which keeps them alive while `guard` is pinned.
        unsafe { self.entries[idx].load(Ordering::Acquire, guard).as_ref() }
    }

    /// This bucket followed by its overflow chain.
    #[inline(always)]
    pub(crate) fn chain<'g>(&'g self, guard: &'g Guard) -> Chain<'g, K, V> {
        Chain {
            next: Some(self),
            guard,
        }
    }

    /// Searches the chain rooted at `self` for `key`, noting the first free slot on the way.
    /// The caller holds the root lock.
    pub(crate) fn locate<'g, Q>(
        &'g self,
        hash: u64,
        key: &Q,
        guard: &'g Guard,
    ) -> Located<'g, K, V>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        let mut free = None;
        let mut prev = None;
        let mut tail = self;
        for bucket in self.chain(guard) {
            let meta = bucket.meta.load();
            for idx in meta.matches(hash) {
                let entry = bucket.entries[idx].load(Ordering::Relaxed, guard);
                // SAFETY: see `entry`.
                if let Some(e) = unsafe { entry.as_ref() } {
                    if <K as Borrow<Q>>::borrow(&e.key) == key {
                        return Located {
                            found: Some(Found {
                                bucket,
                                prev,
                                idx,
                                entry,
                            }),
                            free,
                            tail: bucket,
                        };
                    }
                }
            }
            if free.is_none() {
                free = meta.first_free().map(|idx| (bucket, idx));
            }
            prev = Some(bucket);
            tail = bucket;
        }
        Located {
            found: None,
            free,
            tail,
        }
    }

    /// Publishes `entry` into the first free slot of the chain, appending an overflow bucket when
    /// every slot is taken. The caller holds the chain's root lock.
    pub(crate) fn publish<P>(free: Option<(&Self, usize)>, tail: &Self, hash: u64, entry: P)
    where
        P: crossbeam_epoch::Pointer<Entry<K, V>>,
    {
        match free {
            Some((bucket, idx)) => {
                // Pointer before metadata: a reader that sees the slot flag finds the entry.
                bucket.entries[idx].store(entry, Ordering::Release);
                bucket.meta.store(bucket.meta.load().store_top_hash(hash, idx));
            }
            None => tail
                .next
                .store(Owned::new(Bucket::with_entry(hash, entry)), Ordering::Release),
        }
    }

    /// Retires every entry of this chain. Returns how many were retired. The caller holds
    /// this root's lock and unpublishes the table afterwards.
    ///
    /// # Safety
    ///
    /// No other table may still reference these entries once this table is unpublished.
    pub(crate) unsafe fn retire_entries(&self, guard: &Guard) -> usize {
        let mut retired = 0;
        for bucket in self.chain(guard) {
            for idx in bucket.meta.load().occupied() {
                let entry = bucket.entries[idx].load(Ordering::Relaxed, guard);
                if !entry.is_null() {
                    guard.defer_destroy(entry);
                    retired += 1;
                }
            }
        }
        retired
    }
}

/// Iterator over a bucket chain.
pub(crate) struct Chain<'g, K, V> {
    next: Option<&'g Bucket<K, V>>,
    guard: &'g Guard,
}

impl<'g, K, V> Iterator for Chain<'g, K, V> {
    type Item = &'g Bucket<K, V>;

    #[inline(always)]
    fn next(&mut self) -> Option<Self::Item> {
        let bucket = self.next?;
        // SAFETY: overflow buckets are freed either with their table or through the epoch
        // collector after being unlinked, so they outlive `guard`.
        self.next = unsafe { bucket.next.load(Ordering::Acquire, self.guard).as_ref() };
        Some(bucket)
    }
}

/// Result of [`Bucket::locate`].
pub(crate) struct Located<'g, K, V> {
    pub(crate) found: Option<Found<'g, K, V>>,
    pub(crate) free: Option<(&'g Bucket<K, V>, usize)>,
    pub(crate) tail: &'g Bucket<K, V>,
}

/// Position of a live entry inside a locked chain.
pub(crate) struct Found<'g, K, V> {
    pub(crate) bucket: &'g Bucket<K, V>,
    /// Predecessor in the chain, `None` for the root.
    prev: Option<&'g Bucket<K, V>>,
    pub(crate) idx: usize,
    pub(crate) entry: Shared<'g, Entry<K, V>>,
}

impl<'g, K, V> Found<'g, K, V> {
    #[inline(always)]
    pub(crate) fn entry(&self) -> &'g Entry<K, V> {
        // SAFETY: `locate` only reports non-null entries, pinned by the same guard.
        unsafe { self.entry.deref() }
    }
}

/// One generation of the map's storage.
pub(crate) struct Table<K, V> {
    pub(crate) buckets: Box<[Bucket<K, V>]>,
    pub(crate) counters: Counters,
    pub(crate) seed: u64,
}

impl<K, V> Table<K, V> {
    pub(crate) fn new(len: usize) -> Self {
        debug_assert!(len.is_power_of_two());
        Self {
            buckets: (0..len).map(|_| Bucket::new()).collect(),
            counters: Counters::new(counter_len(len)),
            seed: fast_rand(),
        }
    }

    #[inline(always)]
    pub(crate) fn len(&self) -> usize {
        self.buckets.len()
    }

    #[inline(always)]
    pub(crate) fn root(&self, hash: u64) -> &Bucket<K, V> {
        &self.buckets[hash as usize & (self.buckets.len() - 1)]
    }

    /// Removes a located entry and retires it. Empty overflow buckets are unlinked and retired
    /// too. The caller holds the root lock.
    ///
    /// # Safety
    ///
    /// `found` must come from [`Bucket::locate`] on a root of this table, under the same lock.
    pub(crate) unsafe fn erase(&self, found: Found<'_, K, V>, guard: &Guard) {
        let Found {
            bucket,
            prev,
            idx,
            entry,
        } = found;
        bucket.entries[idx].store(Shared::null(), Ordering::Release);
        let meta = bucket.meta.load().erase_top_hash(idx);
        bucket.meta.store(meta);
        if let Some(prev) = prev {
            if meta.is_empty() {
                prev.next
                    .store(bucket.next.load(Ordering::Relaxed, guard), Ordering::Release);
                guard.defer_destroy(Shared::from(bucket as *const Bucket<K, V>));
            }
        }
        self.counters.add(-1);
        guard.defer_destroy(entry);
    }

    /// Moves every entry of the chain at `old` into this (unpublished) table, rehashing with this
    /// table's seed. Returns the number of entries moved. The caller holds `old`'s lock.
    pub(crate) fn adopt_chain(
        &self,
        old: &Bucket<K, V>,
        hash: impl Fn(&K, u64) -> u64,
        guard: &Guard,
    ) -> usize {
        let mut moved = 0;
        for bucket in old.chain(guard) {
            for idx in bucket.meta.load().occupied() {
                let entry = bucket.entries[idx].load(Ordering::Relaxed, guard);
                // SAFETY: see `Bucket::entry`.
                let Some(e) = (unsafe { entry.as_ref() }) else {
                    continue;
                };
                let h = hash(&e.key, self.seed);
                let root = self.root(h);
                let mut free = None;
                let mut tail = root;
                for b in root.chain(guard) {
                    if let Some(idx) = b.meta.load().first_free() {
                        free = Some((b, idx));
                        break;
                    }
                    tail = b;
                }
                Bucket::publish(free, tail, h, entry);
                moved += 1;
            }
        }
        moved
    }

    /// Frees every entry immediately.
    ///
    /// # Safety
    ///
    /// The caller has exclusive access to the table and its entries.
    pub(crate) unsafe fn destroy_entries(&self) {
        let guard = epoch::unprotected();
        for root in self.buckets.iter() {
            for bucket in root.chain(guard) {
                for idx in bucket.meta.load().occupied() {
                    let entry = bucket.entries[idx].load(Ordering::Relaxed, guard);
                    if !entry.is_null() {
                        drop(entry.into_owned());
                    }
                }
            }
        }
    }
}

impl<K, V> Drop for Table<K, V> {
    fn drop(&mut self) {
        // SAFETY: a table is dropped only once unreachable; its overflow buckets are owned by
        // it alone, entries are left to their own retirement.
        unsafe {
            let guard = epoch::unprotected();
            for root in self.buckets.iter() {
                let mut next = root.next.load(Ordering::Relaxed, guard);
                while !next.is_null() {
                    let bucket = next.into_owned();
                    next = bucket.next.load(Ordering::Relaxed, guard);
                }
            }
        }
    }
}
