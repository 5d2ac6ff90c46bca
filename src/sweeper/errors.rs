//! Expiry sweeper errors
//!
//! Error codes:
//! - TIDE_SWEEP_SCAN_FAILED (ERROR)
//! - TIDE_SWEEP_TASK_FAILED (ERROR)

use thiserror::Error;

use crate::kv::KvError;

#[derive(Debug, Error)]
pub enum SweepError {
    /// The expiry index could not be read; the pass ended early.
    #[error("expiry scan failed: {0}")]
    Scan(#[source] KvError),

    /// The blocking task running a pass panicked or was cancelled.
    #[error("sweeper task failed: {0}")]
    Task(String),
}

impl SweepError {
    pub fn code(&self) -> &'static str {
        match self {
            SweepError::Scan(_) => "TIDE_SWEEP_SCAN_FAILED",
            SweepError::Task(_) => "TIDE_SWEEP_TASK_FAILED",
        }
    }
}

pub type SweepResult<T> = Result<T, SweepError>;
