use std::borrow::Borrow;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use ahash::RandomState;
use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use log::{debug, trace};
use parking_lot::Mutex;

use crate::bucket::{Bucket, Entry, Table};
use crate::config::MapConfig;
use crate::hasher::KeyHasher;
use crate::iter::{Iter, Keys, Values};
use crate::meta::MetaLock;
use crate::stats::Stats;
use crate::{should_grow, shrink_threshold, ENTRIES_PER_BUCKET, MAX_TABLE_LEN, MIN_TABLE_LEN};

// ================================================================================================
// MAP STRUCTURE
// ================================================================================================

/// Concurrent hash map with lock-free reads and per-bucket locked writes.
///
/// Reads ([`load`](Self::load), [`range`](Self::range), [`len`](Self::len)) never block. Writes
/// lock the root bucket of the key's chain with a spinlock bit in its metadata word, so writers
/// on different buckets do not contend. Values are returned as clones.
///
/// The closures passed to [`compute`](Self::compute) and the `load_or_*` methods run while the
/// key's bucket is locked; they must not write to the same map.
pub struct MapOf<K, V, H = RandomState> {
    table: Atomic<Table<K, V>>,
    /// Serializes resizes.
    resize_lock: Mutex<()>,
    /// Set while a resize migrates buckets; writers that see it wait on `resize_lock`.
    resizing: AtomicBool,
    /// Root bucket count the map was created with; floor for shrinking and target of `clear`.
    min_table_len: usize,
    grow_only: bool,
    total_growths: AtomicU64,
    total_shrinks: AtomicU64,
    hasher: H,
}

/// Decision of a compute closure.
enum Op<V> {
    Keep,
    Store(V),
    Delete,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ResizeHint {
    Grow,
    Shrink,
    Clear,
}

/// A locked root bucket of the current table. Unlocks on drop.
struct Locked<'g, K, V> {
    table_ptr: Shared<'g, Table<K, V>>,
    table: &'g Table<K, V>,
    root: &'g Bucket<K, V>,
    hash: u64,
    _lock: MetaLock<'g>,
}

// ================================================================================================
// CONSTRUCTORS
// ================================================================================================

impl<K, V> MapOf<K, V, RandomState> {
    /// Creates an empty map with the smallest table.
    pub fn new() -> Self {
        Self::with_hasher(RandomState::new())
    }

    /// Creates a map sized to hold `entries` without growing.
    ///
    /// # Panics
    ///
    /// If no table can hold `entries`; use [`MapConfig::build`] to handle that as an error.
    pub fn with_presize(entries: usize) -> Self {
        Self::with_presize_and_hasher(entries, RandomState::new())
    }
}

impl<K, V, H> MapOf<K, V, H> {
    pub(crate) fn from_parts(table_len: usize, grow_only: bool, hasher: H) -> Self {
        Self {
            table: Atomic::new(Table::new(table_len)),
            resize_lock: Mutex::new(()),
            resizing: AtomicBool::new(false),
            min_table_len: table_len,
            grow_only,
            total_growths: AtomicU64::new(0),
            total_shrinks: AtomicU64::new(0),
            hasher,
        }
    }

    /// Creates an empty map using `hasher` for keys.
    ///
    /// The hasher cannot be changed later since it decides bucket placement.
    pub fn with_hasher(hasher: H) -> Self {
        Self::from_parts(MIN_TABLE_LEN, false, hasher)
    }

    /// Creates a map sized for `entries` using `hasher` for keys.
    ///
    /// # Panics
    ///
    /// If no table can hold `entries`.
    pub fn with_presize_and_hasher(entries: usize, hasher: H) -> Self {
        match MapConfig::new().presize(entries).hasher(hasher).build() {
            Ok(map) => map,
            Err(err) => panic!("{err}"),
        }
    }

    /// The map's key hasher.
    pub fn hasher(&self) -> &H {
        &self.hasher
    }

    #[inline(always)]
    pub(crate) fn current<'g>(&self, guard: &'g Guard) -> (Shared<'g, Table<K, V>>, &'g Table<K, V>) {
        let ptr = self.table.load(Ordering::Acquire, guard);
        // SAFETY: the table pointer is never null while the map is alive, and a replaced table
        // is retired through the collector, so it outlives `guard`.
        (ptr, unsafe { ptr.deref() })
    }

    #[inline(always)]
    fn hash<Q: ?Sized>(&self, key: &Q, seed: u64) -> u64
    where
        H: KeyHasher<Q>,
    {
        KeyHasher::<Q>::hash_key(&self.hasher, key, seed)
    }
}

// ================================================================================================
// PUBLIC API
// ================================================================================================

impl<K, V, H> MapOf<K, V, H>
where
    K: Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
    H: KeyHasher<K>,
{
    /// Returns a clone of the value stored for `key`.
    ///
    /// Lock-free: takes one atomic snapshot of each bucket's metadata on the chain and compares
    /// full keys only for slots whose signature matches.
    pub fn load<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
        H: KeyHasher<Q>,
        V: Clone,
    {
        let guard = &epoch::pin();
        self.find(key, guard).map(|entry| entry.value.clone())
    }

    /// Whether `key` is present. Lock-free.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
        H: KeyHasher<Q>,
    {
        let guard = &epoch::pin();
        self.find(key, guard).is_some()
    }

    /// Sets the value for `key`.
    pub fn store(&self, key: K, value: V) {
        self.compute_with(key, |_| (Op::Store(value), ()));
    }

    /// Returns the existing value for `key` if present, otherwise stores `value`.
    ///
    /// The flag is `true` when the value was loaded, `false` when `value` was stored.
    pub fn load_or_store(&self, key: K, value: V) -> (V, bool)
    where
        V: Clone,
    {
        if let Some(existing) = self.load(&key) {
            return (existing, true);
        }
        self.compute_with(key, |old| match old {
            Some(old) => (Op::Keep, (old.clone(), true)),
            None => (Op::Store(value.clone()), (value, false)),
        })
    }

    /// Stores `value` and returns the previous value, if any.
    pub fn load_and_store(&self, key: K, value: V) -> Option<V>
    where
        V: Clone,
    {
        self.compute_with(key, |old| (Op::Store(value), old.cloned()))
    }

    /// Returns the existing value for `key`, or stores the one produced by `factory`.
    ///
    /// `factory` runs at most once, and only while the key is absent under the bucket lock.
    pub fn load_or_compute<F>(&self, key: K, factory: F) -> (V, bool)
    where
        F: FnOnce() -> V,
        V: Clone,
    {
        if let Some(existing) = self.load(&key) {
            return (existing, true);
        }
        self.compute_with(key, |old| match old {
            Some(old) => (Op::Keep, (old.clone(), true)),
            None => {
                let value = factory();
                (Op::Store(value.clone()), (value, false))
            }
        })
    }

    /// Like [`load_or_compute`](Self::load_or_compute), but `factory` may return `None` to leave
    /// the map unchanged. Returns `(None, false)` in that case.
    pub fn load_or_try_compute<F>(&self, key: K, factory: F) -> (Option<V>, bool)
    where
        F: FnOnce() -> Option<V>,
        V: Clone,
    {
        if let Some(existing) = self.load(&key) {
            return (Some(existing), true);
        }
        self.compute_with(key, |old| match old {
            Some(old) => (Op::Keep, (Some(old.clone()), true)),
            None => match factory() {
                Some(value) => (Op::Store(value.clone()), (Some(value), false)),
                None => (Op::Keep, (None, false)),
            },
        })
    }

    /// Atomically updates the value for `key`.
    ///
    /// `f` receives the current value (`None` if absent) and returns the new value, or `None`
    /// to delete the key. It runs exactly once, with the key's bucket locked, so concurrent
    /// computes on one key never lose an update. Returns the value present afterwards.
    ///
    /// ```
    /// use stripemap::MapOf;
    ///
    /// let hits: MapOf<&str, u64> = MapOf::new();
    /// hits.compute("home", |n| Some(n.copied().unwrap_or(0) + 1));
    /// hits.compute("home", |n| Some(n.copied().unwrap_or(0) + 1));
    /// assert_eq!(hits.load("home"), Some(2));
    ///
    /// assert_eq!(hits.compute("home", |_| None), None);
    /// assert!(hits.is_empty());
    /// ```
    pub fn compute<F>(&self, key: K, f: F) -> Option<V>
    where
        F: FnOnce(Option<&V>) -> Option<V>,
        V: Clone,
    {
        self.compute_with(key, |old| match f(old) {
            Some(value) => (Op::Store(value.clone()), Some(value)),
            None => (Op::Delete, None),
        })
    }

    /// Removes `key`.
    pub fn delete<Q>(&self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
        H: KeyHasher<Q>,
    {
        self.delete_with(key, |_| ());
    }

    /// Removes `key` and returns its value, if it was present.
    pub fn load_and_delete<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
        H: KeyHasher<Q>,
        V: Clone,
    {
        self.delete_with(key, V::clone)
    }

    /// Calls `f` for each entry until it returns `false`.
    ///
    /// Takes no locks and walks the table current at call time. Writes made while ranging may
    /// or may not be observed, but an entry left untouched is visited exactly once. `f` may
    /// write to the map.
    pub fn range<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V) -> bool,
    {
        let guard = &epoch::pin();
        let (_, table) = self.current(guard);
        for root in table.buckets.iter() {
            for bucket in root.chain(guard) {
                for idx in bucket.meta.load().occupied() {
                    if let Some(entry) = bucket.entry(idx, guard) {
                        if !f(&entry.key, &entry.value) {
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Snapshot iterator over cloned entries, with the same consistency as [`range`](Self::range).
    pub fn iter(&self) -> Iter<'_, K, V, H>
    where
        K: Clone,
        V: Clone,
    {
        Iter::new(self)
    }

    /// Snapshot iterator over cloned keys.
    pub fn keys(&self) -> Keys<'_, K, V, H>
    where
        K: Clone,
    {
        Keys::new(self)
    }

    /// Snapshot iterator over cloned values.
    pub fn values(&self) -> Values<'_, K, V, H>
    where
        V: Clone,
    {
        Values::new(self)
    }

    /// Removes every entry and shrinks the table back to its initial size.
    pub fn clear(&self) {
        let guard = &epoch::pin();
        let (table_ptr, _) = self.current(guard);
        self.resize(table_ptr, ResizeHint::Clear, guard);
    }

    /// Number of entries.
    ///
    /// Sums the size counter stripes, so it is approximate while writes are in flight and exact
    /// once they complete.
    pub fn len(&self) -> usize {
        let guard = &epoch::pin();
        self.current(guard).1.counters.total()
    }

    /// Whether [`len`](Self::len) is zero.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Walks the table and reports its shape. Meant for tests and capacity introspection.
    pub fn stats(&self) -> Stats {
        let guard = &epoch::pin();
        let (_, table) = self.current(guard);
        let mut stats = Stats {
            root_buckets: table.len(),
            counter: table.counters.total(),
            counter_len: table.counters.len(),
            min_entries: usize::MAX,
            total_growths: self.total_growths.load(Ordering::Relaxed),
            total_shrinks: self.total_shrinks.load(Ordering::Relaxed),
            ..Stats::default()
        };
        for root in table.buckets.iter() {
            let mut entries = 0;
            for bucket in root.chain(guard) {
                let n = bucket.meta.load().occupied_count();
                stats.total_buckets += 1;
                if n == 0 {
                    stats.empty_buckets += 1;
                }
                entries += n;
            }
            stats.size += entries;
            stats.min_entries = stats.min_entries.min(entries);
            stats.max_entries = stats.max_entries.max(entries);
        }
        stats.capacity = stats.total_buckets * ENTRIES_PER_BUCKET;
        stats
    }

    // ============================================================================================
    // PRIVATE HELPERS
    // ============================================================================================

    fn find<'g, Q>(&self, key: &Q, guard: &'g Guard) -> Option<&'g Entry<K, V>>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
        H: KeyHasher<Q>,
    {
        let (_, table) = self.current(guard);
        let hash = self.hash(key, table.seed);
        for bucket in table.root(hash).chain(guard) {
            let meta = bucket.meta.load();
            for idx in meta.matches(hash) {
                if let Some(entry) = bucket.entry(idx, guard) {
                    if <K as Borrow<Q>>::borrow(&entry.key) == key {
                        return Some(entry);
                    }
                }
            }
        }
        None
    }

    /// Locks the root bucket for `key` in the current table, sitting out resizes in flight.
    fn lock_bucket<'g, Q>(&self, key: &Q, guard: &'g Guard) -> Locked<'g, K, V>
    where
        Q: ?Sized,
        H: KeyHasher<Q>,
    {
        loop {
            let (table_ptr, table) = self.current(guard);
            let hash = self.hash(key, table.seed);
            let root = table.root(hash);
            let lock = root.meta.lock();
            if self.resizing.load(Ordering::Acquire) {
                drop(lock);
                trace!("bucket write waiting for resize in flight");
                drop(self.resize_lock.lock());
                continue;
            }
            if self.table.load(Ordering::Acquire, guard) != table_ptr {
                drop(lock);
                trace!("table replaced while locking bucket, retrying");
                continue;
            }
            return Locked {
                table_ptr,
                table,
                root,
                hash,
                _lock: lock,
            };
        }
    }

    /// Shared write path. `f` sees the current value and decides; it is called once, under the
    /// bucket lock, after any resize this insert needs.
    fn compute_with<F, R>(&self, key: K, f: F) -> R
    where
        F: FnOnce(Option<&V>) -> (Op<V>, R),
    {
        let guard = &epoch::pin();
        loop {
            let locked = self.lock_bucket(&key, guard);
            let located = locked.root.locate(locked.hash, &key, guard);

            if let Some(found) = located.found {
                let (op, result) = f(Some(&found.entry().value));
                let mut deleted = false;
                match op {
                    Op::Keep => {}
                    Op::Store(value) => {
                        let old = found.bucket.entries[found.idx].swap(
                            Owned::new(Entry { key, value }),
                            Ordering::Release,
                            guard,
                        );
                        // SAFETY: the old entry is unreachable from the current table; retired
                        // tables may still point at it but never free entries.
                        unsafe { guard.defer_destroy(old) };
                    }
                    Op::Delete => {
                        // SAFETY: located under this lock.
                        unsafe { locked.table.erase(found, guard) };
                        deleted = true;
                    }
                }
                let table_ptr = locked.table_ptr;
                drop(locked);
                if deleted {
                    self.maybe_shrink(table_ptr, guard);
                }
                return result;
            }

            if located.free.is_none()
                && should_grow(locked.table.len(), locked.table.counters.total())
            {
                let table_ptr = locked.table_ptr;
                drop(locked);
                self.resize(table_ptr, ResizeHint::Grow, guard);
                continue;
            }

            let (op, result) = f(None);
            if let Op::Store(value) = op {
                Bucket::publish(
                    located.free,
                    located.tail,
                    locked.hash,
                    Owned::new(Entry { key, value }),
                );
                locked.table.counters.add(1);
            }
            return result;
        }
    }

    fn delete_with<Q, R>(&self, key: &Q, f: impl FnOnce(&V) -> R) -> Option<R>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
        H: KeyHasher<Q>,
    {
        let guard = &epoch::pin();
        let locked = self.lock_bucket(key, guard);
        let found = locked.root.locate(locked.hash, key, guard).found?;
        let result = f(&found.entry().value);
        // SAFETY: located under this lock.
        unsafe { locked.table.erase(found, guard) };
        let table_ptr = locked.table_ptr;
        drop(locked);
        self.maybe_shrink(table_ptr, guard);
        Some(result)
    }

    fn maybe_shrink<'g>(&self, table_ptr: Shared<'g, Table<K, V>>, guard: &'g Guard) {
        if self.grow_only {
            return;
        }
        // SAFETY: loaded under `guard`.
        let table = unsafe { table_ptr.deref() };
        if table.len() > self.min_table_len
            && table.counters.total() <= shrink_threshold(table.len())
        {
            self.resize(table_ptr, ResizeHint::Shrink, guard);
        }
    }

    // ============================================================================================
    // RESIZE
    // ============================================================================================

    /// Replaces the table `known` with a grown, shrunk or empty one.
    ///
    /// Runs under `resize_lock`; returns early if another resize already replaced `known`.
    /// Old root buckets are locked one at a time while their chains are moved, and writers that
    /// lock one afterwards see `resizing` and wait. The old table stays readable throughout and
    /// is retired once the new one is published.
    fn resize<'g>(&self, known: Shared<'g, Table<K, V>>, hint: ResizeHint, guard: &'g Guard) {
        let _resize = self.resize_lock.lock();
        let (table_ptr, table) = self.current(guard);
        if hint != ResizeHint::Clear && table_ptr != known {
            return;
        }
        let old_len = table.len();
        let new_len = match hint {
            ResizeHint::Grow if old_len >= MAX_TABLE_LEN => return,
            ResizeHint::Grow => old_len << 1,
            ResizeHint::Shrink if old_len <= self.min_table_len => return,
            ResizeHint::Shrink => old_len >> 1,
            ResizeHint::Clear => self.min_table_len,
        };
        debug!("resize {hint:?} started: {old_len} -> {new_len} root buckets");

        let new_table = Table::new(new_len);
        self.resizing.store(true, Ordering::Release);
        let mut moved = 0;
        for (i, root) in table.buckets.iter().enumerate() {
            let _lock = root.meta.lock();
            if hint == ResizeHint::Clear {
                // SAFETY: the replacement table shares no entries with this one.
                moved += unsafe { root.retire_entries(guard) };
            } else {
                let n = new_table.adopt_chain(root, |key, seed| self.hash(key, seed), guard);
                new_table.counters.add_at(i, n as i64);
                moved += n;
            }
        }
        self.table.store(Owned::new(new_table), Ordering::Release);
        self.resizing.store(false, Ordering::Release);

        match hint {
            ResizeHint::Grow => self.total_growths.fetch_add(1, Ordering::Relaxed),
            ResizeHint::Shrink => self.total_shrinks.fetch_add(1, Ordering::Relaxed),
            ResizeHint::Clear => 0,
        };
        // SAFETY: unpublished above; readers still walking it are pinned.
        unsafe { guard.defer_destroy(table_ptr) };
        match hint {
            ResizeHint::Clear => debug!("clear finished: {moved} entries retired"),
            _ => debug!("resize {hint:?} finished: {moved} entries moved"),
        }
    }
}

// ================================================================================================
// STANDARD TRAIT IMPLEMENTATIONS
// ================================================================================================

impl<K, V, H: Default> Default for MapOf<K, V, H> {
    fn default() -> Self {
        Self::with_hasher(H::default())
    }
}

impl<K, V, H> fmt::Debug for MapOf<K, V, H>
where
    K: fmt::Debug + Eq + Send + Sync + 'static,
    V: fmt::Debug + Send + Sync + 'static,
    H: KeyHasher<K>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        self.range(|key, value| {
            map.entry(key, value);
            true
        });
        map.finish()
    }
}

impl<'a, K, V, H> IntoIterator for &'a MapOf<K, V, H>
where
    K: Clone + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    H: KeyHasher<K>,
{
    type Item = (K, V);
    type IntoIter = Iter<'a, K, V, H>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K, V, H> FromIterator<(K, V)> for MapOf<K, V, H>
where
    K: Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
    H: KeyHasher<K> + Default,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let map = Self::with_hasher(H::default());
        for (key, value) in iter {
            map.store(key, value);
        }
        map
    }
}

impl<K, V, H> Extend<(K, V)> for MapOf<K, V, H>
where
    K: Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
    H: KeyHasher<K>,
{
    fn extend<T: IntoIterator<Item = (K, V)>>(&mut self, iter: T) {
        for (key, value) in iter {
            self.store(key, value);
        }
    }
}

impl<K, V, H> Drop for MapOf<K, V, H> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` excludes every reader and writer. Entries of the current table are
        // owned by it alone; retired tables and entries are already with the collector.
        unsafe {
            let guard = epoch::unprotected();
            let table = self.table.swap(Shared::null(), Ordering::Relaxed, guard);
            if table.is_null() {
                return;
            }
            let table = table.into_owned();
            table.destroy_entries();
        }
    }
}
