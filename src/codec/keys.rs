//! Physical key layout
//!
//! The engine keyspace is split into disjoint regions by a leading tag byte:
//!
//! ```text
//! 0x00 | name                                        metadata
//! 0x01 | ns_id (u32 BE) | 0x1F | key                 primary index
//! 0x02 | expires_at (u64 BE) | ns_id | 0x1F | key    expiry index
//! 0x03 | namespace name                              namespace catalog
//! ```
//!
//! Namespace ids are fixed width, so one namespace's keys can never sort
//! into another's range. Ids whose bytes contain the separator are never
//! allocated. Big-endian `expires_at` makes a forward scan of the expiry
//! region enumerate entries in expiry order.

use crate::clock::Timestamp;

use super::errors::{CodecError, CodecResult};

/// Separator between the namespace prefix and the logical key.
pub const SEPARATOR: u8 = 0x1F;

/// Region tags.
pub const META_TAG: u8 = 0x00;
pub const PRIMARY_TAG: u8 = 0x01;
pub const EXPIRY_TAG: u8 = 0x02;
pub const CATALOG_TAG: u8 = 0x03;

const NAMESPACE_ID_LEN: usize = 4;
const TIMESTAMP_LEN: usize = 8;
const PRIMARY_HEADER_LEN: usize = 1 + NAMESPACE_ID_LEN + 1;
const EXPIRY_HEADER_LEN: usize = 1 + TIMESTAMP_LEN + NAMESPACE_ID_LEN + 1;

/// Fixed-width namespace prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NamespaceId(u32);

impl NamespaceId {
    /// First id handed out by the catalog.
    pub const FIRST: NamespaceId = NamespaceId(1);

    /// Wrap a raw id. Returns `None` for 0 or ids containing the separator.
    pub fn new(raw: u32) -> Option<Self> {
        if raw == 0 || raw.to_be_bytes().contains(&SEPARATOR) {
            None
        } else {
            Some(Self(raw))
        }
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    pub fn to_bytes(&self) -> [u8; NAMESPACE_ID_LEN] {
        self.0.to_be_bytes()
    }

    /// The next allocatable id, skipping ids that contain the separator.
    pub fn next(&self) -> Option<Self> {
        let mut raw = self.0;
        loop {
            raw = raw.checked_add(1)?;
            if let Some(id) = Self::new(raw) {
                return Some(id);
            }
        }
    }

    fn from_slice(bytes: &[u8]) -> CodecResult<Self> {
        let raw: [u8; NAMESPACE_ID_LEN] =
            bytes.try_into().map_err(|_| CodecError::Truncated {
                what: "namespace id",
                expected: NAMESPACE_ID_LEN,
                actual: bytes.len(),
            })?;
        Self::new(u32::from_be_bytes(raw)).ok_or_else(|| {
            CodecError::InvalidCatalogEntry(format!("reserved namespace id {:?}", raw))
        })
    }
}

/// Half-open byte range `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub start: Vec<u8>,
    pub end: Vec<u8>,
}

impl KeyRange {
    pub fn new(start: Vec<u8>, end: Vec<u8>) -> Self {
        Self { start, end }
    }

    /// Whether the range can contain any key at all.
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// Decoded expiry index key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiryKey {
    pub expires_at: Timestamp,
    pub namespace: NamespaceId,
    pub key: Vec<u8>,
}

/// `0x01 || ns_id || 0x1F || key`
pub fn encode_primary_key(namespace: NamespaceId, key: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(PRIMARY_HEADER_LEN + key.len());
    buf.push(PRIMARY_TAG);
    buf.extend_from_slice(&namespace.to_bytes());
    buf.push(SEPARATOR);
    buf.extend_from_slice(key);
    buf
}

/// Inverse of [`encode_primary_key`].
pub fn decode_primary_key(bytes: &[u8]) -> CodecResult<(NamespaceId, Vec<u8>)> {
    if bytes.len() < PRIMARY_HEADER_LEN {
        return Err(CodecError::Truncated {
            what: "primary key",
            expected: PRIMARY_HEADER_LEN,
            actual: bytes.len(),
        });
    }
    if bytes[0] != PRIMARY_TAG {
        return Err(CodecError::WrongRegion { expected: "primary" });
    }
    let namespace = NamespaceId::from_slice(&bytes[1..1 + NAMESPACE_ID_LEN])?;
    if bytes[PRIMARY_HEADER_LEN - 1] != SEPARATOR {
        return Err(CodecError::MissingSeparator { what: "primary" });
    }
    Ok((namespace, bytes[PRIMARY_HEADER_LEN..].to_vec()))
}

/// Every primary key of one namespace.
pub fn primary_namespace_range(namespace: NamespaceId) -> KeyRange {
    let start = encode_primary_key(namespace, &[]);
    let mut end = start.clone();
    // The separator is the last header byte; bumping it bounds the namespace.
    if let Some(last) = end.last_mut() {
        *last = SEPARATOR + 1;
    }
    KeyRange::new(start, end)
}

/// Primary keys of one namespace that start with `prefix`.
pub fn primary_prefix_range(namespace: NamespaceId, prefix: &[u8]) -> KeyRange {
    let namespace_range = primary_namespace_range(namespace);
    if prefix.is_empty() {
        return namespace_range;
    }
    let start = encode_primary_key(namespace, prefix);
    let end = match prefix_upper_bound(prefix) {
        Some(upper) => encode_primary_key(namespace, &upper),
        None => namespace_range.end,
    };
    KeyRange::new(start, end)
}

/// `0x02 || expires_at || ns_id || 0x1F || key`
pub fn encode_expiry_key(expires_at: Timestamp, namespace: NamespaceId, key: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(EXPIRY_HEADER_LEN + key.len());
    buf.push(EXPIRY_TAG);
    buf.extend_from_slice(&expires_at.as_millis().to_be_bytes());
    buf.extend_from_slice(&namespace.to_bytes());
    buf.push(SEPARATOR);
    buf.extend_from_slice(key);
    buf
}

/// Inverse of [`encode_expiry_key`].
pub fn decode_expiry_key(bytes: &[u8]) -> CodecResult<ExpiryKey> {
    if bytes.len() < EXPIRY_HEADER_LEN {
        return Err(CodecError::Truncated {
            what: "expiry key",
            expected: EXPIRY_HEADER_LEN,
            actual: bytes.len(),
        });
    }
    if bytes[0] != EXPIRY_TAG {
        return Err(CodecError::WrongRegion { expected: "expiry" });
    }
    let mut ts = [0u8; TIMESTAMP_LEN];
    ts.copy_from_slice(&bytes[1..1 + TIMESTAMP_LEN]);
    let ns_start = 1 + TIMESTAMP_LEN;
    let namespace = NamespaceId::from_slice(&bytes[ns_start..ns_start + NAMESPACE_ID_LEN])?;
    if bytes[EXPIRY_HEADER_LEN - 1] != SEPARATOR {
        return Err(CodecError::MissingSeparator { what: "expiry" });
    }
    Ok(ExpiryKey {
        expires_at: Timestamp::from_millis(u64::from_be_bytes(ts)),
        namespace,
        key: bytes[EXPIRY_HEADER_LEN..].to_vec(),
    })
}

/// Expiry entries with `expires_at <= now`, in expiry order.
pub fn expiry_range_until(now: Timestamp) -> KeyRange {
    let start = vec![EXPIRY_TAG];
    let end = match now.as_millis().checked_add(1) {
        Some(bound) => {
            let mut end = Vec::with_capacity(1 + TIMESTAMP_LEN);
            end.push(EXPIRY_TAG);
            end.extend_from_slice(&bound.to_be_bytes());
            end
        }
        None => vec![EXPIRY_TAG + 1],
    };
    KeyRange::new(start, end)
}

/// `0x03 || name`
pub fn encode_catalog_key(name: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + name.len());
    buf.push(CATALOG_TAG);
    buf.extend_from_slice(name.as_bytes());
    buf
}

/// The whole namespace catalog.
pub fn catalog_range() -> KeyRange {
    KeyRange::new(vec![CATALOG_TAG], vec![CATALOG_TAG + 1])
}

/// Decode one catalog entry into `(name, id)`.
pub fn decode_catalog_entry(key: &[u8], value: &[u8]) -> CodecResult<(String, NamespaceId)> {
    match key.split_first() {
        Some((&CATALOG_TAG, name)) => {
            let name = String::from_utf8(name.to_vec())
                .map_err(|e| CodecError::InvalidCatalogEntry(e.to_string()))?;
            Ok((name, NamespaceId::from_slice(value)?))
        }
        _ => Err(CodecError::WrongRegion { expected: "catalog" }),
    }
}

/// `0x00 || name`
pub fn encode_meta_key(name: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + name.len());
    buf.push(META_TAG);
    buf.extend_from_slice(name.as_bytes());
    buf
}

/// Encode a namespace id as a catalog/metadata value.
pub fn encode_namespace_id(namespace: NamespaceId) -> Vec<u8> {
    namespace.to_bytes().to_vec()
}

/// Decode a namespace id stored as a metadata value.
pub fn decode_namespace_id(bytes: &[u8]) -> CodecResult<NamespaceId> {
    NamespaceId::from_slice(bytes)
}

/// Smallest key strictly greater than `key`.
pub fn successor(key: &[u8]) -> Vec<u8> {
    let mut next = Vec::with_capacity(key.len() + 1);
    next.extend_from_slice(key);
    next.push(0x00);
    next
}

/// Smallest key greater than every key starting with `prefix`.
///
/// `None` when no such key exists (prefix is empty or all `0xFF`).
pub fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut upper = prefix.to_vec();
    while let Some(last) = upper.pop() {
        if last < 0xFF {
            upper.push(last + 1);
            return Some(upper);
        }
    }
    None
}
