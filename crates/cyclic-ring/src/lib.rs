//! cyclic-ring - Lock-Free SPSC Ring Buffers
//!
//! Two circular buffers shared by exactly one producer thread and one consumer
//! thread:
//!
//! - [`FixedRing`]: bounded, lock-free. A full ring reports backpressure by
//!   handing the item back.
//! - [`GrowableRing`]: never full. When an insert would overflow, the producer
//!   takes an exclusive lock and moves every unread item into a store 1.5x
//!   larger (rounded up to a power of two).
//!
//! # Key Features
//!
//! - Free-running `usize` cursors with power-of-two masking
//! - Acquire/release publication, cache-padded cursors
//! - Batch transfer with per-chunk callbacks
//! - SPSC enforced by the type system: one `Producer`, one `Consumer`
//!
//! # Example
//!
//! ```
//! use cyclic_ring::FixedRing;
//! use std::thread;
//!
//! let (mut producer, mut consumer) = FixedRing::<u64>::new(1024).unwrap().split();
//!
//! let handle = thread::spawn(move || {
//!     for i in 0..10_000u64 {
//!         let mut item = i;
//!         while let Err(rejected) = producer.try_insert(item) {
//!             item = rejected;
//!             thread::yield_now();
//!         }
//!     }
//! });
//!
//! let mut expected = 0;
//! while expected < 10_000 {
//!     consumer.drain_up_to(256, |item| {
//!         assert_eq!(item, expected);
//!         expected += 1;
//!     });
//! }
//! handle.join().unwrap();
//! ```

mod backoff;
mod config;
mod error;
mod fixed;
mod growable;
mod invariants;
mod metrics;
mod raw;
mod sync;

pub use backoff::Backoff;
pub use config::{is_valid_capacity, Config, MemoryOrdering, METRICS_CONFIG};
pub use error::{InsertError, RingError};
pub use fixed::{Consumer, FixedRing, Producer};
pub use growable::{GrowableConsumer, GrowableProducer, GrowableRing, Growth};
pub use metrics::{Metrics, MetricsSnapshot};
