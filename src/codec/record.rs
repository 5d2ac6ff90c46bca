//! Primary index value envelope
//!
//! ```text
//! +------------------+
//! | Format           | (u8, currently 1)
//! +------------------+
//! | Flags            | (u8: bit0 tombstone, bit1 has expiry)
//! +------------------+
//! | Version          | (u64 LE)
//! +------------------+
//! | Created At       | (u64 LE, ms)
//! +------------------+
//! | Updated At       | (u64 LE, ms)
//! +------------------+
//! | Expires At       | (u64 LE, ms, 0 when absent)
//! +------------------+
//! | Value Length     | (u32 LE)
//! +------------------+
//! | Value            | (opaque bytes)
//! +------------------+
//! | Checksum         | (u32 LE)
//! +------------------+
//! ```
//!
//! Checksum covers all bytes except the checksum itself.

use crate::clock::Timestamp;

use super::checksum::compute_checksum;
use super::errors::{CodecError, CodecResult};

/// Current envelope format revision.
pub const RECORD_FORMAT: u8 = 1;

const FLAG_TOMBSTONE: u8 = 0b0000_0001;
const FLAG_HAS_EXPIRY: u8 = 0b0000_0010;
const KNOWN_FLAGS: u8 = FLAG_TOMBSTONE | FLAG_HAS_EXPIRY;

const HEADER_LEN: usize = 1 + 1 + 8 + 8 + 8 + 8 + 4;
const CHECKSUM_LEN: usize = 4;

/// Smallest well-formed envelope: header, empty value, checksum.
pub const MIN_RECORD_SIZE: usize = HEADER_LEN + CHECKSUM_LEN;

/// A decoded primary index value.
///
/// Tombstones keep the last version of a deleted key so that a later
/// recreate continues the version sequence instead of restarting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordEnvelope {
    pub version: u64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub expires_at: Option<Timestamp>,
    pub is_tombstone: bool,
    pub value: Vec<u8>,
}

impl RecordEnvelope {
    /// A live record.
    pub fn live(
        value: Vec<u8>,
        version: u64,
        created_at: Timestamp,
        updated_at: Timestamp,
        expires_at: Option<Timestamp>,
    ) -> Self {
        Self {
            version,
            created_at,
            updated_at,
            expires_at,
            is_tombstone: false,
            value,
        }
    }

    /// A tombstone remembering `version`.
    pub fn tombstone(version: u64, deleted_at: Timestamp) -> Self {
        Self {
            version,
            created_at: deleted_at,
            updated_at: deleted_at,
            expires_at: None,
            is_tombstone: true,
            value: Vec::new(),
        }
    }

    /// Whether this live record has expired at `now`.
    ///
    /// `expires_at == now` counts as expired.
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }

    /// Serialize to the on-disk envelope.
    pub fn encode(&self) -> Vec<u8> {
        encode_record(
            &self.value,
            self.version,
            self.created_at,
            self.updated_at,
            self.expires_at,
            self.is_tombstone,
        )
    }

    /// Parse an envelope, verifying length and checksum.
    pub fn decode(data: &[u8]) -> CodecResult<Self> {
        decode_record(data)
    }
}

/// Encode the envelope fields.
pub fn encode_record(
    value: &[u8],
    version: u64,
    created_at: Timestamp,
    updated_at: Timestamp,
    expires_at: Option<Timestamp>,
    is_tombstone: bool,
) -> Vec<u8> {
    let mut flags = 0u8;
    if is_tombstone {
        flags |= FLAG_TOMBSTONE;
    }
    if expires_at.is_some() {
        flags |= FLAG_HAS_EXPIRY;
    }

    let mut buf = Vec::with_capacity(MIN_RECORD_SIZE + value.len());
    buf.push(RECORD_FORMAT);
    buf.push(flags);
    buf.extend_from_slice(&version.to_le_bytes());
    buf.extend_from_slice(&created_at.as_millis().to_le_bytes());
    buf.extend_from_slice(&updated_at.as_millis().to_le_bytes());
    buf.extend_from_slice(&expires_at.map(|t| t.as_millis()).unwrap_or(0).to_le_bytes());
    buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buf.extend_from_slice(value);

    let checksum = compute_checksum(&buf);
    buf.extend_from_slice(&checksum.to_le_bytes());
    buf
}

/// Decode an envelope produced by [`encode_record`].
pub fn decode_record(data: &[u8]) -> CodecResult<RecordEnvelope> {
    if data.len() < MIN_RECORD_SIZE {
        return Err(CodecError::Truncated {
            what: "record",
            expected: MIN_RECORD_SIZE,
            actual: data.len(),
        });
    }

    let checksum_offset = data.len() - CHECKSUM_LEN;
    let stored = read_u32(&data[checksum_offset..]);
    let computed = compute_checksum(&data[..checksum_offset]);
    if computed != stored {
        return Err(CodecError::ChecksumMismatch { computed, stored });
    }

    let format = data[0];
    if format != RECORD_FORMAT {
        return Err(CodecError::UnsupportedFormat(format));
    }
    let flags = data[1];
    if flags & !KNOWN_FLAGS != 0 {
        return Err(CodecError::UnknownFlags(flags));
    }

    let version = read_u64(&data[2..10]);
    let created_at = Timestamp::from_millis(read_u64(&data[10..18]));
    let updated_at = Timestamp::from_millis(read_u64(&data[18..26]));
    let raw_expires_at = read_u64(&data[26..34]);
    let value_len = read_u32(&data[34..38]) as usize;

    let available = checksum_offset - HEADER_LEN;
    if value_len != available {
        return Err(CodecError::LengthMismatch {
            declared: value_len,
            available,
        });
    }

    let expires_at = if flags & FLAG_HAS_EXPIRY != 0 {
        Some(Timestamp::from_millis(raw_expires_at))
    } else {
        None
    };

    Ok(RecordEnvelope {
        version,
        created_at,
        updated_at,
        expires_at,
        is_tombstone: flags & FLAG_TOMBSTONE != 0,
        value: data[HEADER_LEN..checksum_offset].to_vec(),
    })
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}
