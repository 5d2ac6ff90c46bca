//! Codec error types
//!
//! Every decoding failure means bytes read back from the engine are not
//! what tidekv wrote. The store surfaces them as `CorruptRecord`.

use thiserror::Error;

/// Result type for codec operations
pub type CodecResult<T> = Result<T, CodecError>;

/// Codec errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Input shorter than the fixed part of the layout
    #[error("Truncated {what}: {actual} bytes, need at least {expected}")]
    Truncated {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Declared value length disagrees with the envelope size
    #[error("Length mismatch: envelope declares {declared} value bytes, {available} present")]
    LengthMismatch { declared: usize, available: usize },

    /// Stored checksum does not match the recomputed one
    #[error("Checksum mismatch: computed {computed:08x}, stored {stored:08x}")]
    ChecksumMismatch { computed: u32, stored: u32 },

    /// Envelope written by an unknown format revision
    #[error("Unsupported record format: {0}")]
    UnsupportedFormat(u8),

    /// Flag bits this build does not understand
    #[error("Unknown record flags: {0:#04x}")]
    UnknownFlags(u8),

    /// Physical key does not belong to the expected region
    #[error("Key is not in the {expected} region")]
    WrongRegion { expected: &'static str },

    /// Physical key lacks the namespace separator where one must be
    #[error("Missing namespace separator in {what} key")]
    MissingSeparator { what: &'static str },

    /// Catalog value is not a namespace id
    #[error("Invalid namespace catalog entry: {0}")]
    InvalidCatalogEntry(String),
}
