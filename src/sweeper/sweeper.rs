//! One pass of the expiry sweeper
//!
//! A pass reads every due expiry entry from one snapshot and removes them
//! in fixed-size batches, each its own atomic write. Removal is
//! conditional on the version seen by the scan, so a record rewritten
//! while the pass runs is left alone.
//!
//! Failure policy:
//! - a batch that fails is logged and counted; the pass moves on and the
//!   entries are retried next run
//! - a corrupt entry is counted and skipped
//! - a failure reading the expiry index itself ends the pass

use std::sync::Arc;

use serde::Serialize;

use crate::clock::Timestamp;
use crate::kv::KvError;
use crate::observability::{log_event_with_fields, Event, MetricsRegistry, ObservationScope};

use super::errors::{SweepError, SweepResult};
use super::source::{ExpireReport, ExpiryCandidate, ExpirySource};

/// Totals of one sweeper pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Due entries read from the expiry index.
    pub scanned: u64,
    pub purged: u64,
    /// Records changed since the scan.
    pub skipped: u64,
    pub stale_removed: u64,
    pub corrupt: u64,
    pub failed_batches: u64,
}

impl SweepReport {
    fn absorb(&mut self, batch: ExpireReport) {
        self.purged += batch.purged;
        self.skipped += batch.skipped;
        self.stale_removed += batch.stale_removed;
        self.corrupt += batch.corrupt;
    }

    fn as_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("corrupt", self.corrupt.to_string()),
            ("failed_batches", self.failed_batches.to_string()),
            ("purged", self.purged.to_string()),
            ("scanned", self.scanned.to_string()),
            ("skipped", self.skipped.to_string()),
            ("stale_removed", self.stale_removed.to_string()),
        ]
    }
}

pub struct ExpirySweeper {
    source: Arc<dyn ExpirySource>,
    batch_size: usize,
    metrics: Arc<MetricsRegistry>,
}

impl ExpirySweeper {
    /// `batch_size` below 1 is raised to 1.
    pub fn new(source: Arc<dyn ExpirySource>, batch_size: usize, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            source,
            batch_size: batch_size.max(1),
            metrics,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Run one pass to completion.
    pub fn run_once(&self) -> SweepResult<SweepReport> {
        self.metrics.increment_sweep_runs();
        let now = self.source.now();
        let now_ms = now.as_millis().to_string();
        let scope = ObservationScope::with_fields("SWEEP", &[("now_ms", &now_ms)]);

        let mut report = SweepReport::default();
        let result = self.sweep(now, &mut report);
        self.metrics.record_sweep(
            report.purged,
            report.skipped,
            report.stale_removed,
            report.failed_batches,
        );

        let fields = report.as_fields();
        match result {
            Ok(()) => {
                let fields: Vec<(&str, &str)> =
                    fields.iter().map(|(k, v)| (*k, v.as_str())).collect();
                scope.complete_with_fields(&fields);
                Ok(report)
            }
            Err(e) => {
                scope.fail(&e.to_string());
                Err(e)
            }
        }
    }

    fn sweep(&self, now: Timestamp, report: &mut SweepReport) -> SweepResult<()> {
        let entries = self.source.expired_entries(now).map_err(SweepError::Scan)?;
        let mut batch: Vec<ExpiryCandidate> = Vec::with_capacity(self.batch_size);

        for entry in entries {
            match entry {
                Ok(candidate) => {
                    report.scanned += 1;
                    batch.push(candidate);
                    if batch.len() == self.batch_size {
                        self.expire(&mut batch, report);
                    }
                }
                Err(KvError::CorruptRecord(_)) => {
                    report.scanned += 1;
                    report.corrupt += 1;
                }
                Err(e) => return Err(SweepError::Scan(e)),
            }
        }
        self.expire(&mut batch, report);
        Ok(())
    }

    fn expire(&self, batch: &mut Vec<ExpiryCandidate>, report: &mut SweepReport) {
        if batch.is_empty() {
            return;
        }
        match self.source.expire_batch(batch) {
            Ok(outcome) => report.absorb(outcome),
            Err(e) => {
                report.failed_batches += 1;
                log_event_with_fields(
                    Event::SweepBatchFailed,
                    &[
                        ("code", e.code()),
                        ("entries", &batch.len().to_string()),
                        ("reason", &e.to_string()),
                    ],
                );
            }
        }
        batch.clear();
    }
}
