//! Storage adapter error types
//!
//! Error codes:
//! - TIDE_STORAGE_OPEN_FAILED (FATAL severity)
//! - TIDE_STORAGE_READ_FAILED (ERROR severity)
//! - TIDE_STORAGE_WRITE_FAILED (ERROR severity)
//! - TIDE_STORAGE_CONFLICT (ERROR severity)
//! - TIDE_STORAGE_INCOMPATIBLE (FATAL severity)

use std::error::Error as StdError;
use std::fmt;

/// Severity levels shared by tidekv error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Operation fails, server continues
    Error,
    /// tidekv must terminate
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Storage-specific error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorCode {
    /// Engine could not be opened
    TideStorageOpenFailed,
    /// Point read or iteration failed
    TideStorageReadFailed,
    /// Write, batch commit or journal persist failed
    TideStorageWriteFailed,
    /// A transaction kept losing to concurrent commits
    TideStorageConflict,
    /// Data directory holds an unknown on-disk format
    TideStorageIncompatible,
}

impl StorageErrorCode {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            StorageErrorCode::TideStorageOpenFailed => "TIDE_STORAGE_OPEN_FAILED",
            StorageErrorCode::TideStorageReadFailed => "TIDE_STORAGE_READ_FAILED",
            StorageErrorCode::TideStorageWriteFailed => "TIDE_STORAGE_WRITE_FAILED",
            StorageErrorCode::TideStorageConflict => "TIDE_STORAGE_CONFLICT",
            StorageErrorCode::TideStorageIncompatible => "TIDE_STORAGE_INCOMPATIBLE",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            StorageErrorCode::TideStorageOpenFailed => Severity::Fatal,
            StorageErrorCode::TideStorageReadFailed => Severity::Error,
            StorageErrorCode::TideStorageWriteFailed => Severity::Error,
            StorageErrorCode::TideStorageConflict => Severity::Error,
            StorageErrorCode::TideStorageIncompatible => Severity::Fatal,
        }
    }
}

impl fmt::Display for StorageErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

type BoxedSource = Box<dyn StdError + Send + Sync + 'static>;

/// Storage error type with full context
#[derive(Debug)]
pub struct StorageError {
    /// Error code
    code: StorageErrorCode,
    /// Human-readable message
    message: String,
    /// Optional details about the error context
    details: Option<String>,
    /// Underlying engine error if applicable
    source: Option<BoxedSource>,
}

impl StorageError {
    fn new(code: StorageErrorCode, message: impl Into<String>, source: Option<BoxedSource>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            source,
        }
    }

    /// Engine failed to open
    pub fn open_failed(message: impl Into<String>, source: impl Into<BoxedSource>) -> Self {
        Self::new(StorageErrorCode::TideStorageOpenFailed, message, Some(source.into()))
    }

    /// Read or iteration failed
    pub fn read_failed(message: impl Into<String>, source: impl Into<BoxedSource>) -> Self {
        Self::new(StorageErrorCode::TideStorageReadFailed, message, Some(source.into()))
    }

    /// Write or commit failed
    pub fn write_failed(message: impl Into<String>, source: impl Into<BoxedSource>) -> Self {
        Self::new(StorageErrorCode::TideStorageWriteFailed, message, Some(source.into()))
    }

    /// Commit lost to a concurrent one on every attempt
    pub fn conflict(attempts: u32, source: impl Into<BoxedSource>) -> Self {
        Self::new(
            StorageErrorCode::TideStorageConflict,
            "Transaction conflicted with concurrent commits",
            Some(source.into()),
        )
        .with_details(format!("attempts: {}", attempts))
    }

    /// On-disk format is not one this build can read
    pub fn incompatible(found: impl Into<String>) -> Self {
        let mut err = Self::new(
            StorageErrorCode::TideStorageIncompatible,
            "Incompatible on-disk format",
            None,
        );
        err.details = Some(format!("found: {}", found.into()));
        err
    }

    /// Attach context details
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Returns the error code
    pub fn code(&self) -> StorageErrorCode {
        self.code
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns additional error details
    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    /// Returns whether a retry of the whole operation may succeed
    pub fn is_conflict(&self) -> bool {
        self.code == StorageErrorCode::TideStorageConflict
    }

    /// Returns whether this error is fatal
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        if let Some(ref source) = self.source {
            write!(f, " (caused by: {})", source)?;
        }
        Ok(())
    }
}

impl StdError for StorageError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
