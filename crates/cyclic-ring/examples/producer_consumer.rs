//! A producer thread and a consumer thread exchanging fixed-size log records,
//! once through a bounded ring (backpressure) and once through a growable ring.
//!
//! Run with: `RUST_LOG=cyclic_ring=debug cargo run --example producer_consumer`

use cyclic_ring::{FixedRing, GrowableRing, METRICS_CONFIG};
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

/// Fixed-size record: timestamp, level and a short inline message.
#[derive(Debug, Clone, Copy)]
struct Record {
    micros: u64,
    level: u8,
    len: u8,
    text: [u8; 54],
}

impl Record {
    fn new(micros: u64, level: u8, message: &str) -> Self {
        let mut text = [0u8; 54];
        let len = message.len().min(text.len());
        text[..len].copy_from_slice(&message.as_bytes()[..len]);
        Self {
            micros,
            level,
            len: len as u8,
            text,
        }
    }

    fn message(&self) -> &str {
        std::str::from_utf8(&self.text[..usize::from(self.len)]).unwrap_or("<invalid>")
    }
}

const RECORDS: u64 = 200_000;
const BATCH: usize = 64;

fn run_fixed() {
    let ring = FixedRing::<Record>::with_config(1024, METRICS_CONFIG).unwrap();
    let (mut producer, mut consumer) = ring.split();
    let start = Instant::now();

    let handle = thread::spawn(move || {
        let mut batch = Vec::with_capacity(BATCH);
        let mut next = 0;
        while next < RECORDS {
            batch.clear();
            batch.extend((next..RECORDS.min(next + BATCH as u64)).map(|i| {
                Record::new(i, (i % 4) as u8, "request served")
            }));

            let mut sent = 0;
            while sent < batch.len() {
                let written = producer.write_batch(&batch[sent..]);
                if written == 0 {
                    thread::yield_now();
                }
                sent += written;
            }
            next += batch.len() as u64;
        }
        producer
    });

    let mut received = 0;
    let mut last = None;
    let deadline = Instant::now() + Duration::from_secs(30);
    while received < RECORDS {
        match consumer.remove_until(deadline) {
            Some(record) => {
                received += 1;
                last = Some(record);
                received += consumer.drain_up_to(BATCH, |r| last = Some(r)) as u64;
            }
            None => break,
        }
    }

    let producer = handle.join().unwrap();
    let metrics = producer.metrics();
    info!(
        received,
        elapsed_ms = start.elapsed().as_millis() as u64,
        rejected = metrics.rejected,
        "fixed ring done"
    );
    if let Some(record) = last {
        info!(micros = record.micros, level = record.level, message = record.message(), "last record");
    }
}

fn run_growable() {
    let (mut producer, mut consumer) = GrowableRing::<Record>::new(16).unwrap().split();
    let start = Instant::now();

    // Burst faster than the consumer drains: the ring grows instead of refusing
    let handle = thread::spawn(move || {
        let mut growths = 0;
        for i in 0..RECORDS {
            match producer.insert(Record::new(i, 1, "burst")) {
                Ok(Some(_)) => growths += 1,
                Ok(None) => {}
                Err(err) => {
                    tracing::error!(%err, "dropping record");
                    break;
                }
            }
        }
        growths
    });

    let mut received = 0;
    while received < RECORDS && !(handle.is_finished() && consumer.is_empty()) {
        let n = consumer.drain_up_to(BATCH, |_| {});
        if n == 0 {
            thread::sleep(Duration::from_micros(50));
        }
        received += n as u64;
    }

    let growths = handle.join().unwrap();
    info!(
        received,
        growths,
        capacity = consumer.capacity(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "growable ring done"
    );
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("producer_consumer=info".parse().unwrap()),
        )
        .init();

    run_fixed();
    run_growable();
}
