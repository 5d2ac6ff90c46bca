//! Versioned record store errors
//!
//! Error codes:
//! - TIDE_NOT_FOUND (ERROR)
//! - TIDE_VERSION_MISMATCH (ERROR)
//! - TIDE_BATCH_REJECTED (ERROR)
//! - TIDE_CORRUPT_RECORD (FATAL)
//! - TIDE_ENGINE_FAILURE (ERROR)
//! - TIDE_INVALID_REQUEST (ERROR)

use std::fmt;

use thiserror::Error;

use crate::codec::CodecError;
use crate::storage::{Severity, StorageError};

/// Why one operation of a rejected batch failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Precondition did not hold. `actual` is `None` when the key is absent.
    VersionMismatch { expected: u64, actual: Option<u64> },
    /// Delete of a key that has no live record.
    NotFound,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::VersionMismatch { expected, actual } => match actual {
                Some(actual) => write!(f, "expected version {}, found {}", expected, actual),
                None => write!(f, "expected version {}, key is absent", expected),
            },
            FailureReason::NotFound => write!(f, "key not found"),
        }
    }
}

/// One failed operation of a rejected batch, by position in the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    pub index: usize,
    pub reason: FailureReason,
}

impl fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op {}: {}", self.index, self.reason)
    }
}

/// Errors surfaced by the versioned record store.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("key not found")]
    NotFound,

    #[error("version mismatch: expected {expected}, actual {}", display_version(.actual))]
    VersionMismatch { expected: u64, actual: Option<u64> },

    #[error("batch rejected: {} operation(s) failed", .failures.len())]
    BatchRejected { failures: Vec<BatchFailure> },

    #[error("corrupt record: {0}")]
    CorruptRecord(#[from] CodecError),

    #[error("engine failure: {0}")]
    EngineFailure(#[from] StorageError),

    #[error("invalid request: {}", .0.join("; "))]
    InvalidRequest(Vec<String>),
}

fn display_version(version: &Option<u64>) -> String {
    match version {
        Some(v) => v.to_string(),
        None => "absent".to_string(),
    }
}

impl KvError {
    /// Stable machine code.
    pub fn code(&self) -> &'static str {
        match self {
            KvError::NotFound => "TIDE_NOT_FOUND",
            KvError::VersionMismatch { .. } => "TIDE_VERSION_MISMATCH",
            KvError::BatchRejected { .. } => "TIDE_BATCH_REJECTED",
            KvError::CorruptRecord(_) => "TIDE_CORRUPT_RECORD",
            KvError::EngineFailure(_) => "TIDE_ENGINE_FAILURE",
            KvError::InvalidRequest(_) => "TIDE_INVALID_REQUEST",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            KvError::CorruptRecord(_) => Severity::Fatal,
            KvError::EngineFailure(e) if e.is_fatal() => Severity::Fatal,
            _ => Severity::Error,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// Single-violation convenience constructor.
    pub fn invalid(violation: impl Into<String>) -> Self {
        KvError::InvalidRequest(vec![violation.into()])
    }
}

impl From<FailureReason> for KvError {
    fn from(reason: FailureReason) -> Self {
        match reason {
            FailureReason::VersionMismatch { expected, actual } => {
                KvError::VersionMismatch { expected, actual }
            }
            FailureReason::NotFound => KvError::NotFound,
        }
    }
}

pub type KvResult<T> = Result<T, KvError>;
