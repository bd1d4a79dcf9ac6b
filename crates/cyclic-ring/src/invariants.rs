//! Debug assertion macros for ring cursor invariants.
//!
//! Only active in debug builds (`#[cfg(debug_assertions)]`), so there is
//! zero overhead in release builds.
//!
//! Cursors are `usize` values that wrap, so every check is phrased in terms of
//! wrapping distances rather than absolute comparisons.

// =============================================================================
// Bounded count: 0 ≤ head - tail ≤ capacity
// =============================================================================

/// Assert that the number of live slots does not exceed capacity.
///
/// Used in: producer publication after computing the new head
macro_rules! debug_assert_bounded_count {
    ($count:expr, $capacity:expr) => {
        debug_assert!(
            $count <= $capacity,
            "bounded count violated: {} live slots in a ring of {}",
            $count,
            $capacity
        )
    };
}

// =============================================================================
// Cursor advance: a side never moves past what the other side has published
// =============================================================================

/// Assert that a cursor advance stays within the observed window.
///
/// Used in: consumer publication (`tail` may not pass `head`) and producer
/// publication (`head` may not lap `tail`)
macro_rules! debug_assert_advance_within {
    ($name:literal, $advance:expr, $window:expr) => {
        debug_assert!(
            $advance <= $window,
            "{} advanced by {} but only {} slots were available",
            $name,
            $advance,
            $window
        )
    };
}

// =============================================================================
// Initialized range: only slots in [tail, head) hold values
// =============================================================================

/// Assert that we're reading from an initialized slot.
///
/// Used in: every consumer read before `assume_init_*`
macro_rules! debug_assert_initialized_read {
    ($offset:expr, $available:expr) => {
        debug_assert!(
            $offset < $available,
            "reading slot at offset {} outside initialized range [0, {})",
            $offset,
            $available
        )
    };
}

pub(crate) use debug_assert_advance_within;
pub(crate) use debug_assert_bounded_count;
pub(crate) use debug_assert_initialized_read;
