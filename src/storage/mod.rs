//! Storage adapter for tidekv
//!
//! Thin layer over an embedded ordered key-value engine (fjall). It knows
//! nothing about namespaces, versions or expiry; it stores opaque byte keys
//! and values in byte order.
//!
//! # Guarantees
//!
//! - A successful `put`, `delete`, `write_batch` or transaction commit is
//!   durable per the configured [`Durability`] before returning
//! - Batches and transactions apply all of their writes or none
//! - Iteration is ascending by unsigned byte comparison
//! - A [`Snapshot`] observes no writes committed after it was taken
//! - Transactions are serializable: a transaction whose reads were
//!   overwritten by a concurrent commit reruns instead of committing

mod batch;
mod engine;
mod errors;

pub use batch::{WriteBatch, WriteOp};
pub use engine::{
    Durability, KvPair, RangeIter, Snapshot, Storage, Transaction, MAX_TRANSACTION_ATTEMPTS,
    STORAGE_FORMAT_VERSION,
};
pub use errors::{Severity, StorageError, StorageErrorCode, StorageResult};
