//! Pluggable key hashing.

use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};

/// Maps a key and a per-table seed to a 64-bit hash.
///
/// The low bits of the result select the bucket, the high bits form the per-slot signature, so
/// both ends should be well mixed. Every [`BuildHasher`] implements this trait by feeding the seed
/// to the hasher before the key.
pub trait KeyHasher<K: ?Sized> {
    fn hash_key(&self, key: &K, seed: u64) -> u64;
}

impl<K, S> KeyHasher<K> for S
where
    K: Hash + ?Sized,
    S: BuildHasher,
{
    #[inline(always)]
    fn hash_key(&self, key: &K, seed: u64) -> u64 {
        let mut state = self.build_hasher();
        state.write_u64(seed);
        key.hash(&mut state);
        state.finish()
    }
}

/// A plain hash function `fn(&K, seed) -> u64` used as a [`KeyHasher`].
///
/// ```
/// use stripemap::{HasherFn, MapOf};
///
/// fn id_hash(key: &u64, seed: u64) -> u64 {
///     (key ^ seed).wrapping_mul(0x9e37_79b9_7f4a_7c15)
/// }
///
/// let map: MapOf<u64, &str, _> = MapOf::with_hasher(HasherFn::new(id_hash));
/// map.store(7, "seven");
/// assert_eq!(map.load(&7), Some("seven"));
/// ```
pub struct HasherFn<K: ?Sized> {
    f: fn(&K, u64) -> u64,
}

impl<K: ?Sized> HasherFn<K> {
    /// Wraps `f`, which receives the key and the current table's seed.
    pub const fn new(f: fn(&K, u64) -> u64) -> Self {
        Self { f }
    }
}

impl<K: ?Sized> KeyHasher<K> for HasherFn<K> {
    #[inline(always)]
    fn hash_key(&self, key: &K, seed: u64) -> u64 {
        (self.f)(key, seed)
    }
}

impl<K: ?Sized> Clone for HasherFn<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K: ?Sized> Copy for HasherFn<K> {}

impl<K: ?Sized> fmt::Debug for HasherFn<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HasherFn").field(&(self.f as *const ())).finish()
    }
}
