//! Ambient statistics counters and the optional periodic printer thread
//! (spec.md §5, §6 `--benchmark`).
//!
//! Counters are single-writer (the receive thread), many-reader; all
//! accesses use relaxed ordering since they are monotone monitors, not
//! synchronization points (spec.md §5). The printer thread reads them on a
//! coarse wall-clock sleep and never touches the pool or ring, matching
//! the teacher's background-observer-thread pattern
//! (`linux/profiler.rs`'s `observer_thread`).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
pub struct Counters {
    pub packets_received: AtomicU64,
    pub packets_processed: AtomicU64,
    pub parse_errors: AtomicU64,
    pub ring_buffer_full: AtomicU64,
}

impl Counters {
    pub fn new() -> Arc<Self> {
        Arc::new(Counters::default())
    }

    #[inline(always)]
    pub fn inc_received(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_processed(&self) {
        self.packets_processed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_parse_errors(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_ring_full(&self) {
        self.ring_buffer_full.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_processed: self.packets_processed.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            ring_buffer_full: self.ring_buffer_full.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub packets_received: u64,
    pub packets_processed: u64,
    pub parse_errors: u64,
    pub ring_buffer_full: u64,
}

const STATS_PRINT_INTERVAL: Duration = Duration::from_secs(5);

/// Spawns the optional periodic stats-printing thread (`--benchmark`).
/// Sleeps on a coarse wall clock and reads counters with relaxed
/// ordering; never touches the slot pool or the ring.
pub fn spawn_printer(counters: Arc<Counters>, stop: Arc<AtomicBool>) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let mut last = CountersSnapshot::default();
        while !stop.load(Ordering::Relaxed) {
            std::thread::sleep(STATS_PRINT_INTERVAL);
            let now = counters.snapshot();
            log::info!(
                "rx={} ({:+}/5s) processed={} parse_errors={} ring_full={}",
                now.packets_received,
                now.packets_received as i64 - last.packets_received as i64,
                now.packets_processed,
                now.parse_errors,
                now.ring_buffer_full,
            );
            last = now;
        }
    })
}
