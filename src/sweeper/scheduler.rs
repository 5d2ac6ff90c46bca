//! Periodic sweeper task

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::observability::{log_event_with_fields, Event, Logger};

use super::errors::SweepError;
use super::sweeper::ExpirySweeper;

/// Run `sweeper` every `interval` until `shutdown` turns true or its
/// sender is dropped.
///
/// Passes run on the blocking pool, one at a time. A tick that arrives
/// while a pass is still running is skipped. A pass in progress when
/// shutdown is signalled finishes before the task exits.
pub fn spawn_sweeper(
    sweeper: Arc<ExpirySweeper>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut passes: u64 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            let pass = Arc::clone(&sweeper);
            let outcome = tokio::task::spawn_blocking(move || pass.run_once())
                .await
                .map_err(|e| SweepError::Task(e.to_string()))
                .and_then(|result| result);
            passes += 1;

            if let Err(e) = outcome {
                Logger::error("SWEEP_PASS_FAILED", &[("code", e.code()), ("reason", &e.to_string())]);
            }
        }

        log_event_with_fields(Event::SweeperStopped, &[("passes", &passes.to_string())]);
    })
}
