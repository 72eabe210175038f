//! Error types.
//!
//! Map operations themselves never fail; only construction can.

use thiserror::Error;

/// Result type alias for map construction.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building a map.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The presize hint needs more root buckets than a table can address.
    #[error("cannot presize map for {requested} entries: table size overflows")]
    CapacityOverflow { requested: usize },
}
