//! Construction-time options.

use ahash::RandomState;

use crate::error::{Error, Result};
use crate::{calc_table_len, MapOf};

/// Builder for [`MapOf`].
///
/// ```
/// use stripemap::{MapConfig, MapOf};
///
/// let map: MapOf<u64, u64> = MapConfig::new().presize(10_000).grow_only().build().unwrap();
/// assert!(map.stats().root_buckets >= 2048);
/// ```
#[derive(Debug, Clone)]
pub struct MapConfig<H = RandomState> {
    presize: usize,
    grow_only: bool,
    hasher: H,
}

impl MapConfig<RandomState> {
    /// Default options: smallest table, shrinking enabled, `ahash` hasher.
    pub fn new() -> Self {
        Self {
            presize: 0,
            grow_only: false,
            hasher: RandomState::new(),
        }
    }
}

impl Default for MapConfig<RandomState> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> MapConfig<H> {
    /// Sizes the initial table to hold `entries` without growing. The resulting table length is
    /// also the floor the map shrinks back to and the length [`MapOf::clear`] resets to.
    pub fn presize(mut self, entries: usize) -> Self {
        self.presize = entries;
        self
    }

    /// Never shrink the table when entries are deleted. `clear` still resets it.
    pub fn grow_only(mut self) -> Self {
        self.grow_only = true;
        self
    }

    /// Replaces the key hasher.
    pub fn hasher<H2>(self, hasher: H2) -> MapConfig<H2> {
        MapConfig {
            presize: self.presize,
            grow_only: self.grow_only,
            hasher,
        }
    }

    /// Allocates the map.
    ///
    /// # Errors
    ///
    /// [`Error::CapacityOverflow`] if the presize hint cannot be represented as a table.
    pub fn build<K, V>(self) -> Result<MapOf<K, V, H>> {
        let table_len = calc_table_len(self.presize).ok_or(Error::CapacityOverflow {
            requested: self.presize,
        })?;
        Ok(MapOf::from_parts(table_len, self.grow_only, self.hasher))
    }
}
