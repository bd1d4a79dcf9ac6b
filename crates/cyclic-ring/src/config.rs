use std::sync::atomic::Ordering;

/// Memory-ordering mode used for the cross-side cursor accesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryOrdering {
    /// Acquire when observing the other side's cursor, Release when publishing
    /// our own. Always sound.
    #[default]
    AcquireRelease,
    /// Relaxed everywhere. Only meaningful on targets with a total store order;
    /// obtainable solely through [`Config::with_relaxed_ordering`].
    Relaxed,
}

impl MemoryOrdering {
    /// Ordering for loads of the opposite side's cursor.
    #[inline]
    pub(crate) const fn acquire(self) -> Ordering {
        match self {
            Self::AcquireRelease => Ordering::Acquire,
            Self::Relaxed => Ordering::Relaxed,
        }
    }

    /// Ordering for stores that publish our own cursor.
    #[inline]
    pub(crate) const fn release(self) -> Ordering {
        match self {
            Self::AcquireRelease => Ordering::Release,
            Self::Relaxed => Ordering::Relaxed,
        }
    }
}

/// Configuration for `FixedRing` and `GrowableRing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Enable metrics collection (slight overhead)
    pub enable_metrics: bool,
    ordering: MemoryOrdering,
}

impl Config {
    /// Creates a new configuration with the default (acquire/release) ordering.
    pub const fn new(enable_metrics: bool) -> Self {
        Self {
            enable_metrics,
            ordering: MemoryOrdering::AcquireRelease,
        }
    }

    /// Turns metrics collection on.
    pub const fn with_metrics(mut self) -> Self {
        self.enable_metrics = true;
        self
    }

    /// Switches every cross-thread cursor access to `Relaxed`.
    ///
    /// # Safety
    ///
    /// Relaxed cursor publication no longer orders the slot write before the
    /// cursor store, so a consumer may read a slot the producer has not finished
    /// writing. The caller must guarantee the target hardware and compiler keep
    /// stores in program order (total store order) for every ring built from
    /// this configuration.
    pub const unsafe fn with_relaxed_ordering(mut self) -> Self {
        self.ordering = MemoryOrdering::Relaxed;
        self
    }

    /// Returns the configured memory-ordering mode.
    #[inline]
    pub const fn ordering(&self) -> MemoryOrdering {
        self.ordering
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Default configuration with metrics enabled.
pub const METRICS_CONFIG: Config = Config::new(true);

/// Returns `true` if `capacity` can back a ring (non-zero power of two).
#[inline]
pub const fn is_valid_capacity(capacity: usize) -> bool {
    capacity.is_power_of_two()
}
