//! Growable ("soft") SPSC ring.
//!
//! The store sits behind a [`parking_lot::RwLock`]. In the steady state the
//! producer holds an upgradable read lock and the consumer a plain read lock,
//! so both sides run concurrently under the same cursor protocol as
//! [`FixedRing`](crate::FixedRing). Only when an insert finds the ring full does
//! the producer upgrade to the exclusive lock, move every unread item into a
//! larger store and carry on.
//!
//! ```
//! use cyclic_ring::{GrowableRing, Growth};
//!
//! let (mut producer, mut consumer) = GrowableRing::<u32>::new(2).unwrap().split();
//!
//! assert_eq!(producer.insert(1).unwrap(), None);
//! assert_eq!(producer.insert(2).unwrap(), None);
//! assert_eq!(producer.insert(3).unwrap(), Some(Growth { from: 2, to: 4 }));
//!
//! assert_eq!(consumer.try_remove(), Some(1));
//! assert_eq!(consumer.len(), 2);
//! ```

use crate::config::Config;
use crate::error::{InsertError, RingError};
use crate::metrics::MetricsSnapshot;
use crate::raw::RawRing;
use parking_lot::{
    MappedRwLockReadGuard, RwLock, RwLockReadGuard, RwLockUpgradableReadGuard, RwLockWriteGuard,
};
use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// A completed growth event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Growth {
    /// Capacity before the growth.
    pub from: usize,
    /// Capacity after the growth.
    pub to: usize,
}

/// Next capacity in the growth sequence: `ceil(c * 1.5)` rounded up to a
/// power of two, or `None` on overflow.
#[inline]
pub(crate) fn next_capacity(capacity: usize) -> Option<usize> {
    capacity
        .checked_add(capacity.div_ceil(2))?
        .checked_next_power_of_two()
}

/// Smallest capacity in the growth sequence starting at `capacity` that
/// leaves `needed` free slots next to `len` unread items.
fn growth_target(capacity: usize, len: usize, needed: usize) -> Option<usize> {
    let required = len.checked_add(needed)?;
    let mut target = capacity;
    while target < required {
        target = next_capacity(target)?;
    }
    Some(target)
}

struct Shared<T> {
    ring: RwLock<RawRing<T>>,
    /// Mirror of the store's capacity, readable without the lock.
    capacity: AtomicUsize,
}

impl<T> Shared<T> {
    /// Makes sure `needed` slots are free, growing the store if they are not.
    ///
    /// Returns the producer's upgradable guard (downgraded again after a
    /// growth) together with the growth it performed, if any.
    fn reserve<'a>(
        &'a self,
        ring: RwLockUpgradableReadGuard<'a, RawRing<T>>,
        needed: usize,
    ) -> Result<(RwLockUpgradableReadGuard<'a, RawRing<T>>, Option<Growth>), RingError> {
        if ring.available_to_write() >= needed {
            return Ok((ring, None));
        }

        let mut ring = RwLockUpgradableReadGuard::upgrade(ring);
        let growth = self.grow(&mut ring, needed)?;
        Ok((RwLockWriteGuard::downgrade_to_upgradable(ring), growth))
    }

    /// Grows `ring` until `needed` slots are free. Requires the exclusive lock.
    fn grow(&self, ring: &mut RawRing<T>, needed: usize) -> Result<Option<Growth>, RingError> {
        let from = ring.capacity();
        let free = ring.available_to_write();
        // The consumer may have made room while we waited for the upgrade
        if free >= needed {
            return Ok(None);
        }

        let result = growth_target(from, from - free, needed)
            .ok_or(RingError::GrowthFailed {
                current: from,
                requested: usize::MAX,
            })
            .and_then(|to| ring.regrow(to).map(|()| to));

        match result {
            Ok(to) => {
                self.capacity.store(to, Ordering::Relaxed);
                debug!(from, to, "ring growth");
                Ok(Some(Growth { from, to }))
            }
            Err(err) => {
                warn!(error = %err, needed, "ring growth failed");
                Err(err)
            }
        }
    }
}

/// Handles are `Send` but not `Sync`: exactly one thread drives each side.
type NotSync = PhantomData<Cell<()>>;

macro_rules! growable_observers {
    () => {
        /// Current capacity. Lock-free.
        #[inline]
        pub fn capacity(&self) -> usize {
            self.shared.capacity.load(Ordering::Relaxed)
        }

        /// Number of unread items (snapshot).
        pub fn len(&self) -> usize {
            self.shared.ring.read_recursive().len()
        }

        /// Returns true if no unread item is visible.
        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        /// Returns true if the next insert would have to grow the ring.
        pub fn is_full(&self) -> bool {
            let ring = self.shared.ring.read_recursive();
            ring.len() == ring.capacity()
        }

        /// Free slots before the next growth (snapshot).
        pub fn available_to_write(&self) -> usize {
            let ring = self.shared.ring.read_recursive();
            ring.capacity() - ring.len()
        }

        /// Unread items (snapshot).
        pub fn available_to_read(&self) -> usize {
            self.len()
        }

        /// Get a snapshot of metrics if enabled.
        pub fn metrics(&self) -> MetricsSnapshot {
            self.shared.ring.read_recursive().metrics()
        }
    };
}

/// An SPSC ring that grows instead of rejecting inserts.
///
/// Inserts never fail for lack of space. They fail only when a larger store
/// cannot be allocated, and the ring never shrinks.
pub struct GrowableRing<T> {
    ring: RawRing<T>,
}

impl<T> GrowableRing<T> {
    /// Creates a ring with the default configuration.
    ///
    /// The initial capacity must be a non-zero power of two whose store can
    /// be allocated.
    pub fn new(capacity: usize) -> Result<Self, RingError> {
        Self::with_config(capacity, Config::default())
    }

    /// Creates a ring with an explicit configuration.
    pub fn with_config(capacity: usize, config: Config) -> Result<Self, RingError> {
        RawRing::new(capacity, config).map(|ring| Self { ring })
    }

    /// Returns the initial capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Consumes the ring, returning its producer and consumer handles.
    pub fn split(self) -> (GrowableProducer<T>, GrowableConsumer<T>) {
        let capacity = self.ring.capacity();
        let shared = Arc::new(Shared {
            ring: RwLock::new(self.ring),
            capacity: AtomicUsize::new(capacity),
        });
        (
            GrowableProducer {
                shared: Arc::clone(&shared),
                _not_sync: PhantomData,
            },
            GrowableConsumer {
                shared,
                _not_sync: PhantomData,
            },
        )
    }
}

impl<T> fmt::Debug for GrowableRing<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrowableRing")
            .field("capacity", &self.capacity())
            .finish()
    }
}

// =============================================================================
// PRODUCER
// =============================================================================

/// Write side of a [`GrowableRing`].
pub struct GrowableProducer<T> {
    shared: Arc<Shared<T>>,
    _not_sync: NotSync,
}

impl<T> GrowableProducer<T> {
    growable_observers!();

    /// Inserts one item, growing the ring first if it is full.
    ///
    /// Returns the growth this call performed, if any. On growth failure the
    /// ring keeps its previous store and the item is handed back inside the
    /// error.
    ///
    /// Growth waits for outstanding [`peek`](GrowableConsumer::peek) and
    /// [`at`](GrowableConsumer::at) guards to be released, so do not insert
    /// from a thread that is holding one.
    pub fn insert(&mut self, item: T) -> Result<Option<Growth>, InsertError<T>> {
        let ring = self.shared.ring.upgradable_read();
        let (ring, growth) = match self.shared.reserve(ring, 1) {
            Ok(reserved) => reserved,
            Err(cause) => return Err(InsertError::new(item, cause)),
        };

        // Free space only grows while we hold the producer side
        let pushed = ring.push(item);
        debug_assert!(pushed.is_ok(), "reserved slot vanished");
        Ok(growth)
    }

    /// Writes every item in `items`, growing the ring once if needed.
    pub fn write_batch(&mut self, items: &[T]) -> Result<Option<Growth>, RingError>
    where
        T: Copy,
    {
        let ring = self.shared.ring.upgradable_read();
        let (ring, growth) = self.shared.reserve(ring, items.len())?;

        let written = ring.write_slice(items);
        debug_assert_eq!(written, items.len());
        Ok(growth)
    }

    /// Writes every item in `items` in chunks of `chunk_size`, growing the
    /// ring once up front and calling `on_chunk` after each chunk is
    /// published. A `chunk_size` of 0 writes everything as one chunk.
    pub fn write_batch_with_callback<F>(
        &mut self,
        items: &[T],
        chunk_size: usize,
        on_chunk: F,
    ) -> Result<Option<Growth>, RingError>
    where
        T: Copy,
        F: FnMut(usize),
    {
        let ring = self.shared.ring.upgradable_read();
        let (ring, growth) = self.shared.reserve(ring, items.len())?;

        let written = ring.write_slice_chunked(items, chunk_size, on_chunk);
        debug_assert_eq!(written, items.len());
        Ok(growth)
    }
}

impl<T> fmt::Debug for GrowableProducer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrowableProducer")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

// =============================================================================
// CONSUMER
// =============================================================================

/// Read side of a [`GrowableRing`].
///
/// Every call takes a shared lock, so reads proceed alongside the producer
/// and only pause while the ring grows.
pub struct GrowableConsumer<T> {
    shared: Arc<Shared<T>>,
    _not_sync: NotSync,
}

impl<T> GrowableConsumer<T> {
    growable_observers!();

    /// Removes the oldest item, or returns `None` if the ring is empty.
    pub fn try_remove(&mut self) -> Option<T> {
        self.shared.ring.read().pop()
    }

    /// Moves the oldest item into `out`. Returns false (leaving `out`
    /// untouched) if the ring is empty.
    pub fn try_remove_into(&mut self, out: &mut T) -> bool {
        match self.try_remove() {
            Some(item) => {
                *out = item;
                true
            }
            None => false,
        }
    }

    /// Borrows the oldest unread item.
    ///
    /// The guard keeps a shared lock: the ring cannot grow until it is dropped.
    pub fn peek(&self) -> Option<MappedRwLockReadGuard<'_, T>> {
        self.at(0)
    }

    /// Borrows the unread item `index` places after the oldest one.
    pub fn at(&self, index: usize) -> Option<MappedRwLockReadGuard<'_, T>> {
        RwLockReadGuard::try_map(self.shared.ring.read_recursive(), |ring| {
            // SAFETY: we are the only consumer; tail moves only through
            // `&mut self` and growth needs the lock this guard holds.
            unsafe { ring.at(index) }
        })
        .ok()
    }

    /// Copies up to `out.len()` items into `out` and returns how many.
    pub fn read_batch(&mut self, out: &mut [T]) -> usize
    where
        T: Copy,
    {
        self.shared.ring.read().read_slice(out)
    }

    /// Reads in chunks of `chunk_size`, releasing each chunk's slots and then
    /// calling `on_chunk` with its length. Stops early once nothing is
    /// readable; a `chunk_size` of 0 reads everything available as one chunk.
    ///
    /// `on_chunk` runs under the shared lock.
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
        self.shared
            .ring
            .read()
            .read_slice_chunked(out, chunk_size, on_chunk)
    }

    /// Fills `out` completely or reads nothing.
    pub fn read_exact(&mut self, out: &mut [T]) -> bool
    where
        T: Copy,
    {
        let ring = self.shared.ring.read();
        if ring.available_to_read() < out.len() {
            return false;
        }
        ring.read_slice(out) == out.len()
    }

    /// Copies up to `out.len()` unread items without consuming them.
    pub fn peek_batch(&self, out: &mut [T]) -> usize
    where
        T: Copy,
    {
        self.shared.ring.read_recursive().peek_slice(out)
    }

    /// Discards up to `count` unread items and returns how many.
    pub fn drop_n(&mut self, count: usize) -> usize {
        self.shared.ring.read().discard(count)
    }

    /// Discards exactly `count` items, or nothing if fewer are readable.
    pub fn discard_exact(&mut self, count: usize) -> bool {
        let ring = self.shared.ring.read();
        if ring.available_to_read() < count {
            return false;
        }
        ring.discard(count) == count
    }

    /// Discards everything currently readable and returns how much.
    pub fn clear(&mut self) -> usize {
        let discarded = self.shared.ring.read().discard(usize::MAX);
        trace!(discarded, "ring cleared");
        discarded
    }

    /// Moves up to `max` items into `handler`.
    ///
    /// `handler` runs under the shared lock; a growth waits for it to finish.
    pub fn drain_up_to<F>(&mut self, max: usize, handler: F) -> usize
    where
        F: FnMut(T),
    {
        self.shared.ring.read().drain_up_to(max, handler)
    }
}

impl<T> fmt::Debug for GrowableConsumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrowableConsumer")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    #[test]
    fn test_next_capacity() {
        assert_eq!(next_capacity(1), Some(2));
        assert_eq!(next_capacity(2), Some(4));
        assert_eq!(next_capacity(8), Some(16));
        assert_eq!(next_capacity(1 << (usize::BITS - 1)), None);
    }

    #[test]
    fn test_growth_target() {
        assert_eq!(growth_target(8, 8, 1), Some(16));
        assert_eq!(growth_target(8, 8, 20), Some(32));
        assert_eq!(growth_target(8, 2, 6), Some(8));
        assert_eq!(growth_target(4, usize::MAX, 1), None);
        assert_eq!(growth_target(1 << (usize::BITS - 1), 1 << (usize::BITS - 1), 1), None);
    }

    #[test]
    fn test_rejects_bad_capacity() {
        assert_eq!(
            GrowableRing::<u8>::new(6).err(),
            Some(RingError::InvalidCapacity { capacity: 6 })
        );
    }

    #[test]
    fn test_insert_grows_when_full() {
        let (mut tx, mut rx) = GrowableRing::<u32>::new(8).unwrap().split();
        for i in 0..8 {
            assert_eq!(tx.insert(i).unwrap(), None);
        }
        assert!(tx.is_full());

        assert_eq!(tx.insert(8).unwrap(), Some(Growth { from: 8, to: 16 }));
        assert_eq!(tx.capacity(), 16);
        assert_eq!(rx.len(), 9);

        let mut drained = Vec::new();
        rx.drain_up_to(usize::MAX, |v| drained.push(v));
        assert_eq!(drained, (0..9).collect::<Vec<_>>());
    }

    #[test]
    fn test_growth_after_wrap_keeps_order() {
        let (mut tx, mut rx) = GrowableRing::<u32>::new(4).unwrap().split();
        for i in 0..4 {
            tx.insert(i).unwrap();
        }
        assert_eq!(rx.try_remove(), Some(0));
        assert_eq!(rx.try_remove(), Some(1));
        tx.insert(4).unwrap();
        tx.insert(5).unwrap();

        // Wrapped store [4, 5, 2, 3] moves into index 0 onward
        assert_eq!(tx.insert(6).unwrap(), Some(Growth { from: 4, to: 8 }));
        assert_eq!(rx.peek().as_deref(), Some(&2));
        assert_eq!(rx.at(4).as_deref(), Some(&6));
        assert!(rx.at(5).is_none());

        let mut out = [0u32; 5];
        assert!(rx.read_exact(&mut out));
        assert_eq!(out, [2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_batch_write_grows_to_fit() {
        let (mut tx, mut rx) = GrowableRing::<u16>::new(2).unwrap().split();
        let items: Vec<u16> = (0..10).collect();

        assert_eq!(
            tx.write_batch(&items).unwrap(),
            Some(Growth { from: 2, to: 16 })
        );
        assert_eq!(tx.write_batch(&[10]).unwrap(), None);

        let mut out = [0u16; 16];
        assert_eq!(rx.read_batch(&mut out), 11);
        assert_eq!(&out[..11], &(0..11).collect::<Vec<_>>()[..]);
    }

    #[test]
    fn test_batch_callback_sees_every_chunk() {
        let (mut tx, rx) = GrowableRing::<u8>::new(4).unwrap().split();
        let mut chunks = Vec::new();

        let growth = tx
            .write_batch_with_callback(&[1, 2, 3, 4, 5, 6, 7], 3, |n| chunks.push(n))
            .unwrap();
        assert_eq!(growth, Some(Growth { from: 4, to: 8 }));
        assert_eq!(chunks, vec![3, 3, 1]);

        let mut out = [0u8; 3];
        assert_eq!(rx.peek_batch(&mut out), 3);
        assert_eq!(out, [1, 2, 3]);
        assert_eq!(rx.len(), 7);
    }

    #[test]
    fn test_discard_and_clear() {
        let (mut tx, mut rx) = GrowableRing::<String>::new(4).unwrap().split();
        for s in ["a", "b", "c", "d", "e"] {
            tx.insert(s.to_string()).unwrap();
        }

        assert_eq!(rx.drop_n(1), 1);
        assert!(!rx.discard_exact(10));
        assert!(rx.discard_exact(1));
        assert_eq!(rx.peek().as_deref().map(String::as_str), Some("c"));

        let mut out = String::new();
        assert!(rx.try_remove_into(&mut out));
        assert_eq!(out, "c");

        assert_eq!(rx.clear(), 2);
        assert!(rx.is_empty());
        assert!(!rx.try_remove_into(&mut out));
    }

    #[test]
    fn test_read_batch_with_callback() {
        let (mut tx, mut rx) = GrowableRing::<u16>::new(4).unwrap().split();
        tx.write_batch(&(0..7).collect::<Vec<u16>>()).unwrap();

        let mut out = [0u16; 8];
        let mut chunks = Vec::new();
        assert_eq!(rx.read_batch_with_callback(&mut out, 3, |n| chunks.push(n)), 7);
        assert_eq!(chunks, vec![3, 3, 1]);
        assert_eq!(&out[..7], &[0, 1, 2, 3, 4, 5, 6]);
        assert!(rx.is_empty());

        chunks.clear();
        tx.write_batch(&[9, 8]).unwrap();
        assert_eq!(rx.read_batch_with_callback(&mut out, 0, |n| chunks.push(n)), 2);
        assert_eq!(chunks, vec![2]);
        assert_eq!(&out[..2], &[9, 8]);
    }

    #[test]
    fn test_failed_growth_hands_item_back() {
        let ring = GrowableRing::<String>::with_config(2, Config::default().with_metrics()).unwrap();
        let (mut tx, mut rx) = ring.split();
        tx.insert("a".to_string()).unwrap();
        tx.insert("b".to_string()).unwrap();

        crate::raw::fail_allocations(true);
        let err = tx.insert("c".to_string()).unwrap_err();
        crate::raw::fail_allocations(false);

        assert_eq!(
            err.cause(),
            RingError::GrowthFailed {
                current: 2,
                requested: 4
            }
        );
        assert_eq!(err.into_inner(), "c");

        // Ring keeps its store and contents
        assert_eq!(tx.capacity(), 2);
        assert_eq!(rx.len(), 2);
        assert_eq!(tx.metrics().growths, 0);
        assert_eq!(rx.peek().as_deref().map(String::as_str), Some("a"));

        // The same insert succeeds once memory is available again
        assert_eq!(
            tx.insert("c".to_string()).unwrap(),
            Some(Growth { from: 2, to: 4 })
        );
        let mut drained = Vec::new();
        rx.drain_up_to(usize::MAX, |s| drained.push(s));
        assert_eq!(drained, ["a", "b", "c"]);
    }

    #[test]
    fn test_overflowing_batch_reports_max_request() {
        let (mut tx, rx) = GrowableRing::<()>::new(1).unwrap().split();
        tx.insert(()).unwrap();

        let err = tx.write_batch(&vec![(); usize::MAX]).unwrap_err();
        assert_eq!(
            err,
            RingError::GrowthFailed {
                current: 1,
                requested: usize::MAX
            }
        );
        assert_eq!(rx.len(), 1);
        assert_eq!(tx.capacity(), 1);
    }

    #[test]
    fn test_growth_counted_in_metrics() {
        let ring = GrowableRing::<u8>::with_config(1, Config::default().with_metrics()).unwrap();
        let (mut tx, _rx) = ring.split();
        for i in 0..5 {
            tx.insert(i).unwrap();
        }
        // 1 -> 2 -> 4 -> 8
        assert_eq!(tx.capacity(), 8);
        let m = tx.metrics();
        assert_eq!(m.growths, 3);
        assert_eq!(m.inserted, 5);
        assert_eq!(m.rejected, 0);
    }
}
