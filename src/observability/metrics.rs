//! Metrics registry for tidekv
//!
//! - Counters only, monotonic, reset on process start
//! - Thread-safe and lock-free
//! - Serialized with serde for the `/metrics` endpoint

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters shared by the store, the sweeper and the server
///
/// Relaxed ordering throughout; each counter is exact, cross-counter
/// consistency of a snapshot is not guaranteed.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    gets: AtomicU64,
    puts: AtomicU64,
    deletes: AtomicU64,
    cas_conflicts: AtomicU64,
    batch_commits: AtomicU64,
    batch_rejections: AtomicU64,
    scans: AtomicU64,
    lazy_expirations: AtomicU64,
    sweep_runs: AtomicU64,
    sweep_purged: AtomicU64,
    sweep_skipped: AtomicU64,
    sweep_stale_removed: AtomicU64,
    sweep_failed_batches: AtomicU64,
    corrupt_records: AtomicU64,
    engine_failures: AtomicU64,
    http_requests: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Record operations

    pub fn increment_gets(&self) {
        self.gets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_puts(&self) {
        self.puts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_deletes(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cas_conflicts(&self) {
        self.cas_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_batch_commits(&self) {
        self.batch_commits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_batch_rejections(&self) {
        self.batch_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_scans(&self) {
        self.scans.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_lazy_expirations(&self, count: u64) {
        self.lazy_expirations.fetch_add(count, Ordering::Relaxed);
    }

    // Sweeper

    pub fn increment_sweep_runs(&self) {
        self.sweep_runs.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold one sweeper pass into the totals.
    pub fn record_sweep(&self, purged: u64, skipped: u64, stale_removed: u64, failed_batches: u64) {
        self.sweep_purged.fetch_add(purged, Ordering::Relaxed);
        self.sweep_skipped.fetch_add(skipped, Ordering::Relaxed);
        self.sweep_stale_removed.fetch_add(stale_removed, Ordering::Relaxed);
        self.sweep_failed_batches.fetch_add(failed_batches, Ordering::Relaxed);
    }

    // Failures

    pub fn increment_corrupt_records(&self) {
        self.corrupt_records.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_engine_failures(&self) {
        self.engine_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Server

    pub fn increment_http_requests(&self) {
        self.http_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Current values of every counter as a JSON object
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            gets: self.gets.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            cas_conflicts: self.cas_conflicts.load(Ordering::Relaxed),
            batch_commits: self.batch_commits.load(Ordering::Relaxed),
            batch_rejections: self.batch_rejections.load(Ordering::Relaxed),
            scans: self.scans.load(Ordering::Relaxed),
            lazy_expirations: self.lazy_expirations.load(Ordering::Relaxed),
            sweep_runs: self.sweep_runs.load(Ordering::Relaxed),
            sweep_purged: self.sweep_purged.load(Ordering::Relaxed),
            sweep_skipped: self.sweep_skipped.load(Ordering::Relaxed),
            sweep_stale_removed: self.sweep_stale_removed.load(Ordering::Relaxed),
            sweep_failed_batches: self.sweep_failed_batches.load(Ordering::Relaxed),
            corrupt_records: self.corrupt_records.load(Ordering::Relaxed),
            engine_failures: self.engine_failures.load(Ordering::Relaxed),
            http_requests: self.http_requests.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub gets: u64,
    pub puts: u64,
    pub deletes: u64,
    pub cas_conflicts: u64,
    pub batch_commits: u64,
    pub batch_rejections: u64,
    pub scans: u64,
    pub lazy_expirations: u64,
    pub sweep_runs: u64,
    pub sweep_purged: u64,
    pub sweep_skipped: u64,
    pub sweep_stale_removed: u64,
    pub sweep_failed_batches: u64,
    pub corrupt_records: u64,
    pub engine_failures: u64,
    pub http_requests: u64,
}
