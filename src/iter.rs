//! Snapshot iterators.
//!
//! Each iterator pins the epoch for its whole lifetime and walks the table that was current when
//! it was created, one root bucket chain at a time. Items are cloned out of the chain so nothing
//! borrowed from the map escapes the pin.

use std::collections::VecDeque;
use std::marker::PhantomData;

use ahash::RandomState;
use crossbeam_epoch::{self as epoch, Guard};

use crate::bucket::Table;
use crate::map::MapOf;

struct Cursor<K, V> {
    guard: Guard,
    table: *const Table<K, V>,
    next_root: usize,
}

impl<K, V> Cursor<K, V> {
    fn new<H>(map: &MapOf<K, V, H>) -> Self {
        let guard = epoch::pin();
        let table: *const Table<K, V> = map.current(&guard).1;
        Self {
            guard,
            table,
            next_root: 0,
        }
    }

    /// Pushes the entries of the next non-empty chain onto `out`. Returns `false` once every
    /// root bucket has been visited.
    fn fill<T>(&mut self, out: &mut VecDeque<T>, make: impl Fn(&K, &V) -> T) -> bool {
        // SAFETY: `self.guard` has been pinned since `self.table` was loaded.
        let table = unsafe { &*self.table };
        while self.next_root < table.len() {
            let root = &table.buckets[self.next_root];
            self.next_root += 1;
            for bucket in root.chain(&self.guard) {
                for idx in bucket.meta.load().occupied() {
                    if let Some(entry) = bucket.entry(idx, &self.guard) {
                        out.push_back(make(&entry.key, &entry.value));
                    }
                }
            }
            if !out.is_empty() {
                return true;
            }
        }
        false
    }
}

macro_rules! snapshot_iter {
    ($(#[$doc:meta])* $name:ident, $item:ty, [$($bound:ident: Clone),*], $make:expr) => {
        $(#[$doc])*
        pub struct $name<'a, K, V, H = RandomState> {
            cursor: Cursor<K, V>,
            pending: VecDeque<$item>,
            _map: PhantomData<&'a MapOf<K, V, H>>,
        }

        impl<'a, K, V, H> $name<'a, K, V, H> {
            pub(crate) fn new(map: &'a MapOf<K, V, H>) -> Self {
                Self {
                    cursor: Cursor::new(map),
                    pending: VecDeque::new(),
                    _map: PhantomData,
                }
            }
        }

        impl<'a, K, V, H> Iterator for $name<'a, K, V, H>
        where
            $($bound: Clone,)*
        {
            type Item = $item;

            fn next(&mut self) -> Option<Self::Item> {
                loop {
                    if let Some(item) = self.pending.pop_front() {
                        return Some(item);
                    }
                    if !self.cursor.fill(&mut self.pending, $make) {
                        return None;
                    }
                }
            }
        }
    };
}

snapshot_iter!(
    /// Iterator over cloned `(key, value)` pairs, from [`MapOf::iter`].
    Iter,
    (K, V),
    [K: Clone, V: Clone],
    |k: &K, v: &V| (k.clone(), v.clone())
);

snapshot_iter!(
    /// Iterator over cloned keys, from [`MapOf::keys`].
    Keys,
    K,
    [K: Clone],
    |k: &K, _: &V| k.clone()
);

snapshot_iter!(
    /// Iterator over cloned values, from [`MapOf::values`].
    Values,
    V,
    [V: Clone],
    |_: &K, v: &V| v.clone()
);

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use crate::MapOf;

    #[test]
    fn iterators_visit_every_entry_once() {
        let map: MapOf<u32, u32> = MapOf::new();
        for i in 0..500 {
            map.store(i, i * 2);
        }

        let pairs: Vec<(u32, u32)> = map.iter().collect();
        assert_eq!(pairs.len(), 500);
        assert!(pairs.iter().all(|&(k, v)| v == k * 2));

        let keys: HashSet<u32> = map.keys().collect();
        assert_eq!(keys, (0..500).collect());

        let sum: u32 = map.values().sum();
        assert_eq!(sum, (0..500).map(|i| i * 2).sum());
    }

    #[test]
    fn empty_map_yields_nothing() {
        let map: MapOf<String, u8> = MapOf::new();
        assert_eq!(map.iter().next(), None);
        assert_eq!((&map).into_iter().count(), 0);
    }

    #[test]
    fn iterator_outlives_concurrent_resize() {
        let map: MapOf<u64, u64> = MapOf::new();
        for i in 0..100 {
            map.store(i, i);
        }
        let mut iter = map.keys();
        let mut seen: HashSet<u64> = iter.next().into_iter().collect();
        // Grow the table underneath the iterator; it keeps walking the old generation.
        for i in 100..5_000 {
            map.store(i, i);
        }
        seen.extend(iter);
        assert!(map.stats().total_growths > 0);
        assert!((0..100).all(|k| seen.contains(&k)));
    }
}
