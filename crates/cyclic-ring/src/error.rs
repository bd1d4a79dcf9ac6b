//! Error types for ring construction and growth.
//!
//! Full and empty conditions are not errors: they are reported through
//! `Result<(), T>`, `Option<T>`, `bool` or a transferred count.

use std::fmt;
use thiserror::Error;

/// Errors surfaced by ring construction and growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RingError {
    /// Requested capacity is zero or not a power of two.
    #[error("invalid ring capacity {capacity}: must be a non-zero power of two")]
    InvalidCapacity {
        /// The rejected capacity.
        capacity: usize,
    },

    /// The store for a new ring could not be allocated.
    #[error("ring allocation failed ({capacity} slots)")]
    AllocationFailed {
        /// The requested capacity.
        capacity: usize,
    },

    /// A growable ring could not allocate its larger store.
    #[error("ring growth failed ({current} -> {requested} slots)")]
    GrowthFailed {
        /// Capacity before the attempted growth.
        current: usize,
        /// Capacity that could not be allocated (`usize::MAX` if it overflowed).
        requested: usize,
    },
}

impl RingError {
    /// Returns `true` if retrying the same operation later may succeed.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::GrowthFailed { .. })
    }
}

/// A growable-ring insert that could not complete.
///
/// Hands the rejected item back so the caller can retry or apply backpressure.
pub struct InsertError<T> {
    item: T,
    cause: RingError,
}

impl<T> InsertError<T> {
    pub(crate) fn new(item: T, cause: RingError) -> Self {
        Self { item, cause }
    }

    /// The error that stopped the insert.
    #[inline]
    pub fn cause(&self) -> RingError {
        self.cause
    }

    /// Recovers the item that was not inserted.
    #[inline]
    pub fn into_inner(self) -> T {
        self.item
    }
}

impl<T> fmt::Debug for InsertError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InsertError")
            .field("cause", &self.cause)
            .finish_non_exhaustive()
    }
}

impl<T> fmt::Display for InsertError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "insert rejected: {}", self.cause)
    }
}

impl<T> std::error::Error for InsertError<T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}
