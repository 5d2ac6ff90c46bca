//! Codec: logical records and identifiers to physical bytes and back
//!
//! This is the only place that knows the physical layout of the engine
//! keyspace. Everything above it deals in namespaces, keys and
//! [`RecordEnvelope`]s.
//!
//! # Guarantees
//!
//! - Encodings round-trip exactly
//! - Byte order of encoded keys matches the logical order the store needs:
//!   keys within a namespace, expiry entries by time
//! - Every record envelope is checksummed; decoding rejects truncated or
//!   altered input with a [`CodecError`]

mod checksum;
mod errors;
mod keys;
mod record;

pub use checksum::{compute_checksum, verify_checksum};
pub use errors::{CodecError, CodecResult};
pub use keys::{
    catalog_range, decode_catalog_entry, decode_expiry_key, decode_namespace_id,
    decode_primary_key, encode_catalog_key, encode_expiry_key, encode_meta_key,
    encode_namespace_id, encode_primary_key, expiry_range_until, prefix_upper_bound,
    primary_namespace_range, primary_prefix_range, successor, ExpiryKey, KeyRange, NamespaceId,
    SEPARATOR,
};
pub use record::{decode_record, encode_record, RecordEnvelope, MIN_RECORD_SIZE, RECORD_FORMAT};
