//! Bounded lock-free SPSC ring and its producer/consumer handles.
//!
//! ```
//! use cyclic_ring::FixedRing;
//!
//! let (mut producer, mut consumer) = FixedRing::<u32>::new(8).unwrap().split();
//!
//! assert!(producer.try_insert(7).is_ok());
//! assert_eq!(consumer.peek(), Some(&7));
//! assert_eq!(consumer.try_remove(), Some(7));
//! assert!(consumer.is_empty());
//! ```

use crate::backoff::Backoff;
use crate::config::Config;
use crate::error::RingError;
use crate::metrics::MetricsSnapshot;
use crate::raw::RawRing;
use crate::sync::Arc;
use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::time::Instant;
use tracing::trace;

/// Handles are `Send` but not `Sync`: exactly one thread drives each side.
type NotSync = PhantomData<Cell<()>>;

/// Observability shared by the ring and both handles. All reads are lock-free.
macro_rules! ring_observers {
    () => {
        /// Returns the ring capacity.
        #[inline]
        pub fn capacity(&self) -> usize {
            self.ring.capacity()
        }

        /// Number of unread items (snapshot).
        #[inline]
        pub fn len(&self) -> usize {
            self.ring.len()
        }

        /// Returns true if no unread item is visible.
        #[inline]
        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        /// Returns true if no free slot is visible.
        #[inline]
        pub fn is_full(&self) -> bool {
            self.len() == self.capacity()
        }

        /// Free slots (snapshot).
        #[inline]
        pub fn available_to_write(&self) -> usize {
            self.capacity() - self.len()
        }

        /// Unread items (snapshot).
        #[inline]
        pub fn available_to_read(&self) -> usize {
            self.len()
        }

        /// Get a snapshot of metrics if enabled.
        pub fn metrics(&self) -> MetricsSnapshot {
            self.ring.metrics()
        }
    };
}

/// A fixed-capacity single-producer single-consumer ring buffer.
///
/// The capacity is a power of two chosen at construction and never changes.
/// Use [`split`](Self::split) to obtain the only [`Producer`] and the only
/// [`Consumer`] for this ring; the SPSC precondition is carried by those two
/// non-`Clone` handles rather than by documentation.
pub struct FixedRing<T> {
    ring: RawRing<T>,
}

impl<T> FixedRing<T> {
    /// Creates a ring with the default configuration.
    ///
    /// Fails with [`RingError::InvalidCapacity`] unless `capacity` is a
    /// non-zero power of two, and with [`RingError::AllocationFailed`] if the
    /// store cannot be allocated.
    pub fn new(capacity: usize) -> Result<Self, RingError> {
        Self::with_config(capacity, Config::default())
    }

    /// Creates a ring with an explicit configuration.
    pub fn with_config(capacity: usize, config: Config) -> Result<Self, RingError> {
        RawRing::new(capacity, config).map(|ring| Self { ring })
    }

    ring_observers!();

    /// Consumes the ring, returning its producer and consumer handles.
    pub fn split(self) -> (Producer<T>, Consumer<T>) {
        let ring = Arc::new(self.ring);
        (
            Producer {
                ring: Arc::clone(&ring),
                _not_sync: PhantomData,
            },
            Consumer {
                ring,
                _not_sync: PhantomData,
            },
        )
    }
}

impl<T> fmt::Debug for FixedRing<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedRing")
            .field("capacity", &self.capacity())
            .finish()
    }
}

// =============================================================================
// PRODUCER
// =============================================================================

/// Write side of a [`FixedRing`].
///
/// Intentionally not `Clone`: a second producer would break the
/// single-writer invariant on `head`.
pub struct Producer<T> {
    ring: Arc<RawRing<T>>,
    _not_sync: NotSync,
}

impl<T> Producer<T> {
    ring_observers!();

    /// Inserts one item, or hands it back if the ring is full.
    ///
    /// # Example
    /// ```
    /// # use cyclic_ring::FixedRing;
    /// let (mut producer, _consumer) = FixedRing::<u8>::new(1).unwrap().split();
    /// assert!(producer.try_insert(1).is_ok());
    /// assert_eq!(producer.try_insert(2), Err(2)); // full: backpressure
    /// ```
    #[inline]
    pub fn try_insert(&mut self, item: T) -> Result<(), T> {
        self.ring.push(item)
    }

    /// Inserts the value produced by `make`, which only runs if a slot is free.
    #[inline]
    pub fn try_insert_with<F>(&mut self, make: F) -> bool
    where
        F: FnOnce() -> T,
    {
        self.ring.push_with(make)
    }

    /// Writes as many of `items` as currently fit and returns how many.
    ///
    /// Free space is sampled once; items never overwrite unread data.
    #[inline]
    pub fn write_batch(&mut self, items: &[T]) -> usize
    where
        T: Copy,
    {
        self.ring.write_slice(items)
    }

    /// Writes `items` in chunks of `chunk_size`, publishing each chunk and then
    /// calling `on_chunk` with its length, so a consumer can start draining
    /// before the whole batch is queued.
    ///
    /// Stops early once no slot is free and returns the number written.
    /// A `chunk_size` of 0 writes everything that fits as one chunk.
    #[inline]
    pub fn write_batch_with_callback<F>(
        &mut self,
        items: &[T],
        chunk_size: usize,
        on_chunk: F,
    ) -> usize
    where
        T: Copy,
        F: FnMut(usize),
    {
        self.ring.write_slice_chunked(items, chunk_size, on_chunk)
    }

    /// Writes all of `items` or none of them.
    pub fn write_all(&mut self, items: &[T]) -> bool
    where
        T: Copy,
    {
        // Free space only grows from the producer's point of view
        if self.ring.available_to_write() < items.len() {
            return false;
        }
        self.ring.write_slice(items) == items.len()
    }

    /// Retries `try_insert` with adaptive backoff; gives up when the backoff
    /// is exhausted and hands the item back.
    pub fn insert_with_backoff(&mut self, mut item: T) -> Result<(), T> {
        let mut backoff = Backoff::new();
        loop {
            match self.ring.push(item) {
                Ok(()) => return Ok(()),
                Err(rejected) if backoff.is_completed() => return Err(rejected),
                Err(rejected) => item = rejected,
            }
            backoff.snooze();
        }
    }

    /// Retries `try_insert` until it succeeds or `deadline` passes.
    pub fn insert_until(&mut self, mut item: T, deadline: Instant) -> Result<(), T> {
        let mut backoff = Backoff::new();
        loop {
            match self.ring.push(item) {
                Ok(()) => return Ok(()),
                Err(rejected) if Instant::now() >= deadline => return Err(rejected),
                Err(rejected) => item = rejected,
            }
            backoff.wait();
        }
    }
}

impl<T> fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

// =============================================================================
// CONSUMER
// =============================================================================

/// Read side of a [`FixedRing`].
///
/// Mutating calls take `&mut self`, so a reference obtained from
/// [`peek`](Self::peek) or [`at`](Self::at) cannot outlive the slot it
/// points into.
pub struct Consumer<T> {
    ring: Arc<RawRing<T>>,
    _not_sync: NotSync,
}

impl<T> Consumer<T> {
    ring_observers!();

    /// Removes the oldest item, or returns `None` if the ring is empty.
    #[inline]
    pub fn try_remove(&mut self) -> Option<T> {
        self.ring.pop()
    }

    /// Moves the oldest item into `out`. Returns false (leaving `out`
    /// untouched) if the ring is empty.
    #[inline]
    pub fn try_remove_into(&mut self, out: &mut T) -> bool {
        match self.ring.pop() {
            Some(item) => {
                *out = item;
                true
            }
            None => false,
        }
    }

    /// Borrows the oldest unread item without consuming it.
    #[inline]
    pub fn peek(&self) -> Option<&T> {
        self.at(0)
    }

    /// Borrows the unread item `index` places after the oldest one.
    #[inline]
    pub fn at(&self, index: usize) -> Option<&T> {
        // SAFETY: we are the only consumer, and tail only moves through
        // `&mut self`, which the returned borrow prevents.
        unsafe { self.ring.at(index) }
    }

    /// Copies up to `out.len()` items into `out` and returns how many.
    #[inline]
    pub fn read_batch(&mut self, out: &mut [T]) -> usize
    where
        T: Copy,
    {
        self.ring.read_slice(out)
    }

    /// Reads in chunks of `chunk_size`, releasing each chunk's slots to the
    /// producer and then calling `on_chunk` with its length.
    ///
    /// Stops early once nothing is readable. A `chunk_size` of 0 reads
    /// everything available as one chunk.
    #[inline]
    pub fn read_batch_with_callback<F>(
        &mut self,
        out: &mut [T],
        chunk_size: usize,
        on_chunk: F,
    ) -> usize
    where
        T: Copy,
        F: FnMut(usize),
    {
        self.ring.read_slice_chunked(out, chunk_size, on_chunk)
    }

    /// Fills `out` completely or reads nothing.
    pub fn read_exact(&mut self, out: &mut [T]) -> bool
    where
        T: Copy,
    {
        if self.ring.available_to_read() < out.len() {
            return false;
        }
        self.ring.read_slice(out) == out.len()
    }

    /// Copies up to `out.len()` unread items without consuming them.
    #[inline]
    pub fn peek_batch(&self, out: &mut [T]) -> usize
    where
        T: Copy,
    {
        self.ring.peek_slice(out)
    }

    /// Discards up to `count` unread items and returns how many.
    #[inline]
    pub fn drop_n(&mut self, count: usize) -> usize {
        self.ring.discard(count)
    }

    /// Discards exactly `count` items, or nothing if fewer are readable.
    pub fn discard_exact(&mut self, count: usize) -> bool {
        if self.ring.available_to_read() < count {
            return false;
        }
        self.ring.discard(count) == count
    }

    /// Discards everything currently readable and returns how much.
    ///
    /// Items the producer publishes concurrently may or may not be included.
    pub fn clear(&mut self) -> usize {
        let discarded = self.ring.discard(usize::MAX);
        trace!(discarded, "ring cleared");
        discarded
    }

    /// Moves up to `max` items into `handler`, handing their slots back to the
    /// producer with a single cursor update.
    #[inline]
    pub fn drain_up_to<F>(&mut self, max: usize, handler: F) -> usize
    where
        F: FnMut(T),
    {
        self.ring.drain_up_to(max, handler)
    }

    /// Retries `try_remove` with adaptive backoff; returns `None` once the
    /// backoff is exhausted.
    pub fn remove_with_backoff(&mut self) -> Option<T> {
        let mut backoff = Backoff::new();
        loop {
            if let Some(item) = self.ring.pop() {
                return Some(item);
            }
            if backoff.is_completed() {
                return None;
            }
            backoff.snooze();
        }
    }

    /// Retries `try_remove` until an item arrives or `deadline` passes.
    pub fn remove_until(&mut self, deadline: Instant) -> Option<T> {
        let mut backoff = Backoff::new();
        loop {
            if let Some(item) = self.ring.pop() {
                return Some(item);
            }
            if Instant::now() >= deadline {
                return None;
            }
            backoff.wait();
        }
    }
}

impl<T> fmt::Debug for Consumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fill_reject_then_wrap() {
        let (mut tx, mut rx) = FixedRing::<u32>::new(8).unwrap().split();

        for i in 0..8 {
            assert!(tx.try_insert(i).is_ok());
        }
        assert!(tx.is_full());
        assert_eq!(tx.try_insert(8), Err(8));

        assert_eq!(rx.try_remove(), Some(0));
        assert_eq!(tx.available_to_write(), 1);
        assert!(tx.try_insert(8).is_ok());

        let mut drained = Vec::new();
        while let Some(v) = rx.try_remove() {
            drained.push(v);
        }
        assert_eq!(drained, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_peek_and_at() {
        let (mut tx, mut rx) = FixedRing::<String>::new(4).unwrap().split();
        assert!(rx.peek().is_none());

        tx.try_insert("a".into()).unwrap();
        tx.try_insert("b".into()).unwrap();

        assert_eq!(rx.peek().map(String::as_str), Some("a"));
        assert_eq!(rx.at(1).map(String::as_str), Some("b"));
        assert!(rx.at(2).is_none());
        // peek does not consume
        assert_eq!(rx.len(), 2);

        assert_eq!(rx.try_remove().as_deref(), Some("a"));
        assert_eq!(rx.peek().map(String::as_str), Some("b"));
    }

    #[test]
    fn test_try_remove_into() {
        let (mut tx, mut rx) = FixedRing::<u64>::new(2).unwrap().split();
        let mut out = 0;
        assert!(!rx.try_remove_into(&mut out));
        assert_eq!(out, 0);

        tx.try_insert(42).unwrap();
        assert!(rx.try_remove_into(&mut out));
        assert_eq!(out, 42);
    }

    #[test]
    fn test_try_insert_with_is_lazy() {
        let (mut tx, _rx) = FixedRing::<u64>::new(1).unwrap().split();
        let mut calls = 0;

        assert!(tx.try_insert_with(|| {
            calls += 1;
            1
        }));
        assert!(!tx.try_insert_with(|| {
            calls += 1;
            2
        }));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_all_or_nothing_batches() {
        let (mut tx, mut rx) = FixedRing::<u8>::new(4).unwrap().split();

        assert!(!tx.write_all(&[1, 2, 3, 4, 5]));
        assert!(tx.is_empty());
        assert!(tx.write_all(&[1, 2, 3]));

        let mut out = [0u8; 4];
        assert!(!rx.read_exact(&mut out));
        assert_eq!(rx.len(), 3);

        let mut out = [0u8; 2];
        assert!(rx.read_exact(&mut out));
        assert_eq!(out, [1, 2]);
    }

    #[test]
    fn test_peek_batch_does_not_consume() {
        let (mut tx, mut rx) = FixedRing::<u8>::new(8).unwrap().split();
        tx.write_batch(&[9, 8, 7]);

        let mut out = [0u8; 8];
        assert_eq!(rx.peek_batch(&mut out), 3);
        assert_eq!(&out[..3], &[9, 8, 7]);
        assert_eq!(rx.len(), 3);
        assert_eq!(rx.try_remove(), Some(9));
    }

    #[test]
    fn test_drop_n_discard_exact_and_clear() {
        let (mut tx, mut rx) = FixedRing::<u32>::new(8).unwrap().split();
        tx.write_batch(&[1, 2, 3, 4, 5, 6]);

        assert_eq!(rx.drop_n(2), 2);
        assert_eq!(rx.peek(), Some(&3));
        assert!(!rx.discard_exact(5));
        assert!(rx.discard_exact(1));
        assert_eq!(rx.peek(), Some(&4));
        assert_eq!(rx.drop_n(100), 3);
        assert!(rx.is_empty());

        tx.write_batch(&[7, 8]);
        assert_eq!(rx.clear(), 2);
        assert!(rx.is_empty());
        assert_eq!(tx.available_to_write(), 8);
    }

    #[test]
    fn test_read_batch_with_callback() {
        let (mut tx, mut rx) = FixedRing::<u16>::new(16).unwrap().split();
        tx.write_batch(&(0..10).collect::<Vec<_>>());

        let mut out = [0u16; 16];
        let mut chunks = Vec::new();
        let read = rx.read_batch_with_callback(&mut out, 4, |n| chunks.push(n));
        assert_eq!(read, 10);
        assert_eq!(chunks, vec![4, 4, 2]);
        assert_eq!(&out[..10], &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_capacity_invariant_holds() {
        let (mut tx, mut rx) = FixedRing::<u8>::new(4).unwrap().split();
        for step in 0..20u8 {
            if step % 3 == 0 {
                rx.try_remove();
            } else {
                let _ = tx.try_insert(step);
            }
            assert!(rx.available_to_read() <= rx.capacity());
            assert_eq!(
                rx.available_to_read() + tx.available_to_write(),
                tx.capacity()
            );
        }
    }

    #[test]
    fn test_timeouts_give_item_back() {
        let (mut tx, mut rx) = FixedRing::<u8>::new(1).unwrap().split();
        assert!(rx.remove_until(Instant::now() + Duration::from_millis(5)).is_none());
        assert!(rx.remove_with_backoff().is_none());

        tx.try_insert(1).unwrap();
        let deadline = Instant::now() + Duration::from_millis(5);
        assert_eq!(tx.insert_until(2, deadline), Err(2));
        assert_eq!(tx.insert_with_backoff(3), Err(3));

        assert_eq!(rx.remove_until(Instant::now()), Some(1));
        assert!(tx.insert_with_backoff(4).is_ok());
    }

    #[test]
    fn test_metrics_when_enabled() {
        let ring = FixedRing::<u8>::with_config(2, Config::default().with_metrics()).unwrap();
        let (mut tx, mut rx) = ring.split();

        tx.try_insert(1).unwrap();
        tx.try_insert(2).unwrap();
        assert!(tx.try_insert(3).is_err());
        rx.try_remove();
        rx.drop_n(1);

        let m = rx.metrics();
        assert_eq!(m.inserted, 2);
        assert_eq!(m.rejected, 1);
        assert_eq!(m.removed, 1);
        assert_eq!(m.discarded, 1);
        assert_eq!(m.growths, 0);
    }

    #[test]
    fn test_relaxed_ordering_round_trip() {
        // SAFETY: both handles stay on this thread.
        let config = unsafe { Config::default().with_relaxed_ordering() };
        let (mut tx, mut rx) = FixedRing::<u32>::with_config(4, config).unwrap().split();

        for round in 0..3u32 {
            assert_eq!(tx.write_batch(&[round, round + 1, round + 2]), 3);
            assert!(tx.try_insert(round + 3).is_ok());
            assert_eq!(tx.try_insert(99), Err(99));

            assert_eq!(rx.try_remove(), Some(round));
            let mut out = [0u32; 3];
            assert!(rx.read_exact(&mut out));
            assert_eq!(out, [round + 1, round + 2, round + 3]);
            assert!(rx.is_empty());
        }
    }

    #[test]
    fn test_metrics_disabled_by_default() {
        let (mut tx, _rx) = FixedRing::<u8>::new(2).unwrap().split();
        tx.try_insert(1).unwrap();
        assert_eq!(tx.metrics(), MetricsSnapshot::default());
    }
}
