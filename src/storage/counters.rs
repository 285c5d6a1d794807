//! Per-store operation counters
//!
//! Every store owns one `Counters`. Values only ever grow and are read once,
//! for the summary printed at the end of a verbose run.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free get/put counters for one store
#[derive(Debug, Default)]
pub struct Counters {
    gets: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    get_errors: AtomicU64,
    puts: AtomicU64,
    put_errors: AtomicU64,
}

/// Point-in-time copy of a store's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub gets: u64,
    pub hits: u64,
    pub misses: u64,
    pub get_errors: u64,
    pub puts: u64,
    pub put_errors: u64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) {
        self.gets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_error(&self) {
        self.get_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn put(&self) {
        self.puts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn put_error(&self) {
        self.put_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            gets: self.gets.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            get_errors: self.get_errors.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            put_errors: self.put_errors.load(Ordering::Relaxed),
        }
    }

    /// Two summary lines tagged with the store kind
    pub fn summary(&self, kind: &str) -> String {
        let s = self.snapshot();
        format!(
            "[{kind}] {} gets, {} hits, {} misses, {} errors\n[{kind}] {} puts, {} errors",
            s.gets, s.hits, s.misses, s.get_errors, s.puts, s.put_errors
        )
    }
}
