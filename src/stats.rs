use std::fmt;

/// Point-in-time statistics of a map, for tests and capacity introspection.
///
/// Gathered without locks, so under concurrent writes the fields may disagree slightly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    /// Root buckets in the current table.
    pub root_buckets: usize,
    /// Root plus overflow buckets.
    pub total_buckets: usize,
    /// Buckets (root or overflow) holding no entries.
    pub empty_buckets: usize,
    /// Entry slots across all buckets.
    pub capacity: usize,
    /// Entries found by walking the table.
    pub size: usize,
    /// Sum of the size counter stripes.
    pub counter: usize,
    /// Number of size counter stripes.
    pub counter_len: usize,
    /// Fewest entries in any root bucket's chain.
    pub min_entries: usize,
    /// Most entries in any root bucket's chain.
    pub max_entries: usize,
    /// Completed grow resizes since the map was created.
    pub total_growths: u64,
    /// Completed shrink resizes since the map was created.
    pub total_shrinks: u64,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "---- map stats ----")?;
        writeln!(f, "root_buckets:  {}", self.root_buckets)?;
        writeln!(f, "total_buckets: {}", self.total_buckets)?;
        writeln!(f, "empty_buckets: {}", self.empty_buckets)?;
        writeln!(f, "capacity:      {}", self.capacity)?;
        writeln!(f, "size:          {}", self.size)?;
        writeln!(f, "counter:       {}", self.counter)?;
        writeln!(f, "counter_len:   {}", self.counter_len)?;
        writeln!(f, "min_entries:   {}", self.min_entries)?;
        writeln!(f, "max_entries:   {}", self.max_entries)?;
        writeln!(f, "total_growths: {}", self.total_growths)?;
        writeln!(f, "total_shrinks: {}", self.total_shrinks)?;
        write!(f, "-------------------")
    }
}
