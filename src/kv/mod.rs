//! Versioned record store
//!
//! Namespaced keys mapping to versioned records with optional TTL, over
//! the storage adapter.
//!
//! # Guarantees
//!
//! - Versions of a key strictly increase across its whole history,
//!   deletions and expirations included
//! - A conditional write or delete commits only if its precondition held
//!   at commit time
//! - A batch applies every operation or none
//! - An expired record is never returned, whether or not it was purged
//! - Primary and expiry index entries of a key change in the same commit

mod errors;
mod expiry;
mod namespace;
mod record;
mod store;
mod validator;

pub use errors::{BatchFailure, FailureReason, KvError, KvResult};
pub use namespace::NamespaceCatalog;
pub use record::{
    BatchOp, BatchOpKind, BatchOutcome, Record, ScanBound, ScanOptions, ScanPage,
};
pub use store::{NamespaceStats, VersionedStore, MAX_SCAN_EXAMINED};
pub use validator::{
    clamp_scan_limit, is_valid_namespace, RequestValidator, MAX_BATCH_OPS, MAX_KEY_SIZE,
    MAX_SCAN_LIMIT, MAX_TTL, MAX_VALUE_SIZE,
};
