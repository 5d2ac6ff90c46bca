//! Public record and operation types

use std::time::Duration;

use crate::clock::Timestamp;
use crate::codec::RecordEnvelope;

/// A live record as returned by reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub namespace: String,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub version: u64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub expires_at: Option<Timestamp>,
}

impl Record {
    pub(crate) fn from_envelope(namespace: &str, key: Vec<u8>, envelope: RecordEnvelope) -> Self {
        Self {
            namespace: namespace.to_string(),
            key,
            value: envelope.value,
            version: envelope.version,
            created_at: envelope.created_at,
            updated_at: envelope.updated_at,
            expires_at: envelope.expires_at,
        }
    }
}

/// One end of a scan range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanBound {
    pub key: Vec<u8>,
    pub inclusive: bool,
}

impl ScanBound {
    pub fn inclusive(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            inclusive: true,
        }
    }

    pub fn exclusive(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            inclusive: false,
        }
    }
}

/// Parameters of one scan page.
///
/// `cursor` is the last key of the previous page; the page starts strictly
/// after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    pub prefix: Option<Vec<u8>>,
    pub start: Option<ScanBound>,
    pub end: Option<ScanBound>,
    pub limit: usize,
    pub cursor: Option<Vec<u8>>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            prefix: None,
            start: None,
            end: None,
            limit: 100,
            cursor: None,
        }
    }
}

impl ScanOptions {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }

    pub fn prefix(mut self, prefix: impl Into<Vec<u8>>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn start(mut self, bound: ScanBound) -> Self {
        self.start = Some(bound);
        self
    }

    pub fn end(mut self, bound: ScanBound) -> Self {
        self.end = Some(bound);
        self
    }

    pub fn cursor(mut self, cursor: Option<Vec<u8>>) -> Self {
        self.cursor = cursor;
        self
    }
}

/// One ordered page of live records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPage {
    pub records: Vec<Record>,
    /// Present iff more entries exist in range after this page.
    pub next_cursor: Option<Vec<u8>>,
}

/// What one batch operation does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOpKind {
    Put { value: Vec<u8>, ttl: Option<Duration> },
    Delete,
}

/// One operation of [`VersionedStore::batch_write`](super::VersionedStore::batch_write).
///
/// With `expected_version` set the op is conditional, with the same
/// semantics as `compare_and_swap` / conditional `delete`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOp {
    pub namespace: String,
    pub key: Vec<u8>,
    pub kind: BatchOpKind,
    pub expected_version: Option<u64>,
}

impl BatchOp {
    pub fn put(namespace: impl Into<String>, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
            kind: BatchOpKind::Put {
                value: value.into(),
                ttl: None,
            },
            expected_version: None,
        }
    }

    pub fn delete(namespace: impl Into<String>, key: impl Into<Vec<u8>>) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
            kind: BatchOpKind::Delete,
            expected_version: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        if let BatchOpKind::Put { ttl: slot, .. } = &mut self.kind {
            *slot = Some(ttl);
        }
        self
    }

    pub fn expect_version(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }
}

/// Per-op result of a committed batch, in request order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Put { version: u64 },
    Deleted { version: u64 },
}

impl BatchOutcome {
    pub fn version(&self) -> u64 {
        match self {
            BatchOutcome::Put { version } | BatchOutcome::Deleted { version } => *version,
        }
    }
}
