use std::sync::atomic::{AtomicU64, Ordering};

/// Optional counters for monitoring a ring.
///
/// Updated with `Relaxed` increments; only gathered when
/// [`Config::enable_metrics`](crate::Config::enable_metrics) is set.
#[derive(Debug, Default)]
pub struct Metrics {
    inserted: AtomicU64,
    removed: AtomicU64,
    discarded: AtomicU64,
    rejected: AtomicU64,
    growths: AtomicU64,
}

/// Point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Items published by the producer.
    pub inserted: u64,
    /// Items handed to the consumer.
    pub removed: u64,
    /// Items dropped in place by `drop_n` / `clear`.
    pub discarded: u64,
    /// Inserts refused because the ring was full.
    pub rejected: u64,
    /// Completed growth events (growable ring only).
    pub growths: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn add_inserted(&self, n: u64) {
        self.inserted.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_removed(&self, n: u64) {
        self.removed.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_discarded(&self, n: u64) {
        self.discarded.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_rejected(&self, n: u64) {
        self.rejected.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_growth(&self) {
        self.growths.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            inserted: self.inserted.load(Ordering::Relaxed),
            removed: self.removed.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            growths: self.growths.load(Ordering::Relaxed),
        }
    }
}
