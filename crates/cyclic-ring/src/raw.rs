use crate::config::{is_valid_capacity, Config, MemoryOrdering};
use crate::error::RingError;
use crate::invariants::{
    debug_assert_advance_within, debug_assert_bounded_count, debug_assert_initialized_read,
};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::sync::{AtomicUsize, Ordering, UnsafeCell};
use crossbeam_utils::CachePadded;
use std::mem::MaybeUninit;

// =============================================================================
// MEMORY ORDERING & SYNCHRONIZATION STRATEGY
// =============================================================================
//
// ## Cursors
//
// `head` and `tail` are free-running `usize` counters. They wrap on overflow;
// every distance is computed with `wrapping_sub` in the same width, so the
// wrap cancels out. A slot index is always `cursor & mask`.
//
// - `head - tail == 0`        → empty
// - `head - tail == capacity` → full
//
// ## Memory Ordering Protocol
//
// **Producer (write path):**
// 1. Load `head` with Relaxed (only the producer writes head)
// 2. Load `tail` with Acquire (synchronizes with the consumer's Release)
// 3. Write data into `storage[head & mask]`
// 4. Store `head + n` with Release (publishes the writes)
//
// **Consumer (read path):**
// 1. Load `tail` with Relaxed (only the consumer writes tail)
// 2. Load `head` with Acquire (synchronizes with the producer's Release)
// 3. Read data out of `storage[tail & mask]`
// 4. Store `tail + n` with Release (hands the slots back)
//
// In `MemoryOrdering::Relaxed` mode steps 2 and 4 degrade to Relaxed. That mode
// is only reachable through an `unsafe` configuration call.
//
// ## Single-Writer Invariants
//
// - `head`: written by the producer only
// - `tail`: written by the consumer only
// - `storage[i]`: written by the producer while `i` is outside [tail, head),
//                 read by the consumer while `i` is inside [tail, head)
//
// `RawRing` itself does not enforce who is the producer; the handle types in
// `fixed` and `growable` do.
//
// =============================================================================

/// Storage plus cursors: the SPSC protocol shared by every ring flavour.
pub(crate) struct RawRing<T> {
    /// Next slot to write (producer-owned)
    head: CachePadded<AtomicUsize>,
    /// Next slot to read (consumer-owned)
    tail: CachePadded<AtomicUsize>,
    mask: usize,
    ordering: MemoryOrdering,
    enable_metrics: bool,
    metrics: Metrics,
    buffer: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

// Safety: values of T move from the producer thread to the consumer thread,
// hence T: Send. Slot access is serialized by the cursor protocol above.
unsafe impl<T: Send> Send for RawRing<T> {}
unsafe impl<T: Send> Sync for RawRing<T> {}

#[cfg(test)]
thread_local! {
    static FAIL_ALLOCATIONS: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

/// Makes every store allocation on this thread fail while `on` is set.
#[cfg(test)]
pub(crate) fn fail_allocations(on: bool) {
    FAIL_ALLOCATIONS.with(|flag| flag.set(on));
}

#[cfg(test)]
fn allocations_disabled() -> bool {
    FAIL_ALLOCATIONS.with(std::cell::Cell::get)
}

#[cfg(not(test))]
#[inline]
const fn allocations_disabled() -> bool {
    false
}

fn try_allocate<T>(capacity: usize) -> Option<Box<[UnsafeCell<MaybeUninit<T>>]>> {
    if allocations_disabled() {
        return None;
    }

    let mut buffer = Vec::new();
    buffer.try_reserve_exact(capacity).ok()?;
    buffer.resize_with(capacity, || UnsafeCell::new(MaybeUninit::uninit()));
    Some(buffer.into_boxed_slice())
}

impl<T> RawRing<T> {
    pub(crate) fn new(capacity: usize, config: Config) -> Result<Self, RingError> {
        Self::starting_at(capacity, config, 0)
    }

    /// Builds a ring whose cursors both start at `start`.
    pub(crate) fn starting_at(
        capacity: usize,
        config: Config,
        start: usize,
    ) -> Result<Self, RingError> {
        if !is_valid_capacity(capacity) {
            return Err(RingError::InvalidCapacity { capacity });
        }
        let buffer =
            try_allocate(capacity).ok_or(RingError::AllocationFailed { capacity })?;

        Ok(Self {
            head: CachePadded::new(AtomicUsize::new(start)),
            tail: CachePadded::new(AtomicUsize::new(start)),
            mask: capacity - 1,
            ordering: config.ordering(),
            enable_metrics: config.enable_metrics,
            metrics: Metrics::new(),
            buffer,
        })
    }

    // ---------------------------------------------------------------------
    // STATUS
    // ---------------------------------------------------------------------

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Number of unread items as seen by a third party.
    ///
    /// `tail` is loaded first so the difference can only overshoot, never go
    /// negative; the overshoot is clamped.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        head.wrapping_sub(tail).min(self.capacity())
    }

    /// Free slots, exact from the producer's point of view.
    #[inline]
    pub(crate) fn available_to_write(&self) -> usize {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(self.ordering.acquire());
        self.capacity() - head.wrapping_sub(tail)
    }

    /// Unread items, exact from the consumer's point of view.
    #[inline]
    pub(crate) fn available_to_read(&self) -> usize {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(self.ordering.acquire());
        head.wrapping_sub(tail)
    }

    pub(crate) fn metrics(&self) -> MetricsSnapshot {
        if self.enable_metrics {
            self.metrics.snapshot()
        } else {
            MetricsSnapshot::default()
        }
    }

    #[inline]
    fn record(&self, update: impl FnOnce(&Metrics)) {
        if self.enable_metrics {
            update(&self.metrics);
        }
    }

    #[inline]
    fn cell(&self, cursor: usize) -> &UnsafeCell<MaybeUninit<T>> {
        &self.buffer[cursor & self.mask]
    }

    /// # Safety
    ///
    /// Caller is the producer and `cursor` lies outside [tail, head).
    #[inline]
    unsafe fn write_slot(&self, cursor: usize, item: T) {
        self.cell(cursor)
            .with_mut(|slot| unsafe { slot.write(MaybeUninit::new(item)) });
    }

    /// Moves the value out; the slot is uninitialized afterwards.
    ///
    /// # Safety
    ///
    /// Caller is the consumer and `cursor` lies inside [tail, head).
    #[inline]
    unsafe fn read_slot(&self, cursor: usize) -> T {
        self.cell(cursor)
            .with(|slot| unsafe { slot.read().assume_init() })
    }

    /// # Safety
    ///
    /// Same as `read_slot`, and `tail` must not pass `cursor` while the
    /// reference is alive.
    #[inline]
    unsafe fn slot_ref(&self, cursor: usize) -> &T {
        self.cell(cursor)
            .with(|slot| unsafe { (*slot).assume_init_ref() })
    }

    /// # Safety
    ///
    /// Same as `read_slot`; the value is dropped in place exactly once.
    #[inline]
    unsafe fn drop_slot(&self, cursor: usize) {
        self.cell(cursor)
            .with_mut(|slot| unsafe { (*slot).assume_init_drop() });
    }

    // ---------------------------------------------------------------------
    // PRODUCER SIDE
    // ---------------------------------------------------------------------

    /// Returns `(head, free)` for the producer.
    #[inline]
    fn producer_window(&self) -> (usize, usize) {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(self.ordering.acquire());
        (head, self.capacity() - head.wrapping_sub(tail))
    }

    /// Publishes `n` freshly written slots and returns the new head.
    #[inline]
    fn publish_head(&self, head: usize, n: usize) -> usize {
        let new_head = head.wrapping_add(n);
        let tail = self.tail.load(Ordering::Relaxed);

        // Bounded count: the producer never laps the consumer
        debug_assert_bounded_count!(new_head.wrapping_sub(tail), self.capacity());

        self.head.store(new_head, self.ordering.release());
        self.record(|m| m.add_inserted(n as u64));
        new_head
    }

    pub(crate) fn push(&self, item: T) -> Result<(), T> {
        let (head, free) = self.producer_window();
        if free == 0 {
            self.record(|m| m.add_rejected(1));
            return Err(item);
        }

        // SAFETY: free > 0, so slot `head` lies outside [tail, head) and the
        // consumer will not touch it until the Release store below.
        unsafe { self.write_slot(head, item) };
        self.publish_head(head, 1);
        Ok(())
    }

    /// Like `push`, but `make` only runs once a free slot is confirmed.
    pub(crate) fn push_with<F>(&self, make: F) -> bool
    where
        F: FnOnce() -> T,
    {
        let (head, free) = self.producer_window();
        if free == 0 {
            self.record(|m| m.add_rejected(1));
            return false;
        }

        // SAFETY: see `push`
        unsafe { self.write_slot(head, make()) };
        self.publish_head(head, 1);
        true
    }

    /// Copies `items` into consecutive slots starting at `head`.
    ///
    /// # Safety
    ///
    /// Caller is the producer and has observed at least `items.len()` free slots.
    #[inline]
    unsafe fn copy_in(&self, head: usize, items: &[T])
    where
        T: Copy,
    {
        for (offset, item) in items.iter().enumerate() {
            self.write_slot(head.wrapping_add(offset), *item);
        }
    }

    /// Writes as many items as fit, with availability sampled once.
    pub(crate) fn write_slice(&self, items: &[T]) -> usize
    where
        T: Copy,
    {
        let (head, free) = self.producer_window();
        let n = items.len().min(free);
        if n < items.len() {
            self.record(|m| m.add_rejected((items.len() - n) as u64));
        }
        if n == 0 {
            return 0;
        }

        // SAFETY: n ≤ free
        unsafe { self.copy_in(head, &items[..n]) };
        self.publish_head(head, n);
        n
    }

    /// Writes in chunks of `chunk_size`, publishing and calling `on_chunk`
    /// after each one. Stops when everything is written or no slot is free.
    pub(crate) fn write_slice_chunked<F>(
        &self,
        items: &[T],
        chunk_size: usize,
        mut on_chunk: F,
    ) -> usize
    where
        T: Copy,
        F: FnMut(usize),
    {
        let chunk_size = if chunk_size == 0 { items.len() } else { chunk_size };
        let mut written = 0;

        while written < items.len() {
            let (head, free) = self.producer_window();
            if free == 0 {
                break;
            }

            let n = chunk_size.min(items.len() - written).min(free);
            // SAFETY: n ≤ free
            unsafe { self.copy_in(head, &items[written..written + n]) };
            self.publish_head(head, n);
            written += n;
            on_chunk(n);
        }

        if written < items.len() {
            self.record(|m| m.add_rejected((items.len() - written) as u64));
        }
        written
    }

    // ---------------------------------------------------------------------
    // CONSUMER SIDE
    // ---------------------------------------------------------------------

    /// Returns `(tail, available)` for the consumer.
    #[inline]
    fn consumer_window(&self) -> (usize, usize) {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(self.ordering.acquire());
        (tail, head.wrapping_sub(tail))
    }

    /// Hands `n` consumed slots back to the producer.
    #[inline]
    fn publish_tail(&self, tail: usize, n: usize) {
        let head = self.head.load(Ordering::Relaxed);

        // The consumer never passes the producer
        debug_assert_advance_within!("tail", n, head.wrapping_sub(tail));

        self.tail.store(tail.wrapping_add(n), self.ordering.release());
    }

    pub(crate) fn pop(&self) -> Option<T> {
        let (tail, available) = self.consumer_window();
        if available == 0 {
            return None;
        }

        // SAFETY: slot `tail` is inside [tail, head); the Acquire load of head
        // synchronizes with the producer's Release store that published it.
        // The value is moved out before the slot is handed back.
        let item = unsafe { self.read_slot(tail) };
        self.publish_tail(tail, 1);
        self.record(|m| m.add_removed(1));
        Some(item)
    }

    /// Reference to the unread item `index` places after the oldest one.
    ///
    /// # Safety
    ///
    /// Caller is the consumer and must not advance `tail` while the returned
    /// reference is alive.
    pub(crate) unsafe fn at(&self, index: usize) -> Option<&T> {
        let (tail, available) = self.consumer_window();
        if index >= available {
            return None;
        }

        debug_assert_initialized_read!(index, available);
        Some(self.slot_ref(tail.wrapping_add(index)))
    }

    /// Copies `out.len()` items starting at `tail` without consuming them.
    ///
    /// # Safety
    ///
    /// Caller is the consumer and has observed at least `out.len()` items.
    #[inline]
    unsafe fn copy_out(&self, tail: usize, out: &mut [T])
    where
        T: Copy,
    {
        for (offset, dst) in out.iter_mut().enumerate() {
            *dst = self.read_slot(tail.wrapping_add(offset));
        }
    }

    pub(crate) fn read_slice(&self, out: &mut [T]) -> usize
    where
        T: Copy,
    {
        let (tail, available) = self.consumer_window();
        let n = out.len().min(available);
        if n == 0 {
            return 0;
        }

        // SAFETY: n ≤ available
        unsafe { self.copy_out(tail, &mut out[..n]) };
        self.publish_tail(tail, n);
        self.record(|m| m.add_removed(n as u64));
        n
    }

    pub(crate) fn read_slice_chunked<F>(
        &self,
        out: &mut [T],
        chunk_size: usize,
        mut on_chunk: F,
    ) -> usize
    where
        T: Copy,
        F: FnMut(usize),
    {
        let chunk_size = if chunk_size == 0 { out.len() } else { chunk_size };
        let mut read = 0;

        while read < out.len() {
            let (tail, available) = self.consumer_window();
            if available == 0 {
                break;
            }

            let n = chunk_size.min(out.len() - read).min(available);
            // SAFETY: n ≤ available
            unsafe { self.copy_out(tail, &mut out[read..read + n]) };
            self.publish_tail(tail, n);
            self.record(|m| m.add_removed(n as u64));
            read += n;
            on_chunk(n);
        }

        read
    }

    /// Copies unread items into `out` without advancing `tail`.
    pub(crate) fn peek_slice(&self, out: &mut [T]) -> usize
    where
        T: Copy,
    {
        let (tail, available) = self.consumer_window();
        let n = out.len().min(available);
        // SAFETY: n ≤ available and tail is not advanced
        unsafe { self.copy_out(tail, &mut out[..n]) };
        n
    }

    /// Drops up to `count` unread items in place.
    pub(crate) fn discard(&self, count: usize) -> usize {
        let (tail, available) = self.consumer_window();
        let n = count.min(available);
        if n == 0 {
            return 0;
        }

        let mut guard = TailGuard::new(self, tail);
        while guard.consumed < n {
            let cursor = tail.wrapping_add(guard.consumed);
            // Count first: if the destructor panics the slot is still released
            guard.consumed += 1;
            // SAFETY: slot is inside [tail, head) and dropped exactly once
            unsafe { self.drop_slot(cursor) };
        }
        drop(guard);

        self.record(|m| m.add_discarded(n as u64));
        n
    }

    /// Moves up to `max` items into `handler` with a single tail publication.
    pub(crate) fn drain_up_to<F>(&self, max: usize, mut handler: F) -> usize
    where
        F: FnMut(T),
    {
        let (tail, available) = self.consumer_window();
        let n = max.min(available);
        if n == 0 {
            return 0;
        }

        let mut guard = TailGuard::new(self, tail);
        while guard.consumed < n {
            debug_assert_initialized_read!(guard.consumed, available);
            // SAFETY: slot is inside [tail, head); ownership moves to handler
            let item = unsafe { self.read_slot(tail.wrapping_add(guard.consumed)) };
            guard.consumed += 1;
            handler(item);
        }
        drop(guard);

        self.record(|m| m.add_removed(n as u64));
        n
    }

    // ---------------------------------------------------------------------
    // GROWTH (exclusive access)
    // ---------------------------------------------------------------------

    /// Moves every unread item into a fresh store of `new_capacity` slots,
    /// oldest first at index 0. On allocation failure nothing changes.
    pub(crate) fn regrow(&mut self, new_capacity: usize) -> Result<(), RingError> {
        let current = self.capacity();
        debug_assert!(is_valid_capacity(new_capacity) && new_capacity > current);

        let Some(buffer) = try_allocate::<T>(new_capacity) else {
            return Err(RingError::GrowthFailed {
                current,
                requested: new_capacity,
            });
        };

        // &mut self: neither side is running, Relaxed is enough
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Relaxed);
        let len = head.wrapping_sub(tail);

        for (offset, dst) in buffer.iter().take(len).enumerate() {
            // SAFETY: source slot is inside [tail, head); it is moved exactly
            // once and the old store is released without dropping its slots.
            let item = unsafe { self.read_slot(tail.wrapping_add(offset)) };
            dst.with_mut(|slot| unsafe { slot.write(MaybeUninit::new(item)) });
        }

        self.buffer = buffer;
        self.mask = new_capacity - 1;
        self.tail.store(0, Ordering::Relaxed);
        self.head.store(len, Ordering::Relaxed);
        self.record(Metrics::add_growth);
        Ok(())
    }
}

impl<T> Drop for RawRing<T> {
    fn drop(&mut self) {
        // Drop every item that was never consumed
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Relaxed);
        let count = head.wrapping_sub(tail);

        for offset in 0..count {
            // SAFETY: items in [tail, head) are initialized and owned by us
            unsafe { self.drop_slot(tail.wrapping_add(offset)) };
        }
    }
}

/// Publishes the consumer's progress on drop, so a panicking handler or
/// destructor never leaves moved-out slots inside [tail, head).
struct TailGuard<'a, T> {
    ring: &'a RawRing<T>,
    start: usize,
    consumed: usize,
}

impl<'a, T> TailGuard<'a, T> {
    fn new(ring: &'a RawRing<T>, start: usize) -> Self {
        Self {
            ring,
            start,
            consumed: 0,
        }
    }
}

impl<T> Drop for TailGuard<'_, T> {
    fn drop(&mut self) {
        if self.consumed > 0 {
            self.ring.publish_tail(self.start, self.consumed);
        }
    }
}
