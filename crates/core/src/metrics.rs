use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub events_in: u64,
    pub cache_hits: u64,
    pub duplicates: u64,
    pub replies_in_time: u64,
    pub replies_timed_out: u64,
    pub late_completions: u64,
    pub generation_failures: u64,
    pub deliveries_failed: u64,
}

#[derive(Debug)]
pub struct MetricsStore {
    start_time: Instant,
    events_in: AtomicU64,
    cache_hits: AtomicU64,
    duplicates: AtomicU64,
    replies_in_time: AtomicU64,
    replies_timed_out: AtomicU64,
    late_completions: AtomicU64,
    generation_failures: AtomicU64,
    deliveries_failed: AtomicU64,
}

impl MetricsStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            events_in: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            replies_in_time: AtomicU64::new(0),
            replies_timed_out: AtomicU64::new(0),
            late_completions: AtomicU64::new(0),
            generation_failures: AtomicU64::new(0),
            deliveries_failed: AtomicU64::new(0),
        })
    }

    pub fn inc_events_in(&self) {
        self.events_in.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cache_hits(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_duplicates(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_replies_in_time(&self) {
        self.replies_in_time.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_replies_timed_out(&self) {
        self.replies_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_late_completions(&self) {
        self.late_completions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_generation_failures(&self) {
        self.generation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_deliveries_failed(&self) {
        self.deliveries_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            events_in: self.events_in.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            replies_in_time: self.replies_in_time.load(Ordering::Relaxed),
            replies_timed_out: self.replies_timed_out.load(Ordering::Relaxed),
            late_completions: self.late_completions.load(Ordering::Relaxed),
            generation_failures: self.generation_failures.load(Ordering::Relaxed),
            deliveries_failed: self.deliveries_failed.load(Ordering::Relaxed),
        }
    }
}
