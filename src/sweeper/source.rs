//! The store-facing seam of the expiry sweeper

use crate::clock::Timestamp;
use crate::codec::NamespaceId;
use crate::kv::KvResult;

/// One expiry index entry found due, with what the primary index held for
/// its key in the same snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiryCandidate {
    /// Raw expiry index key, removed once the entry is handled.
    pub expiry_key: Vec<u8>,
    pub namespace: NamespaceId,
    pub key: Vec<u8>,
    pub expires_at: Timestamp,
    /// Version of the record this entry belongs to, or `None` when the
    /// primary index no longer references this expiry (a stale entry).
    pub observed_version: Option<u64>,
}

/// Outcome of one [`ExpirySource::expire_batch`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpireReport {
    /// Records replaced by a tombstone.
    pub purged: u64,
    /// Records changed since the scan; the mutator wins.
    pub skipped: u64,
    /// Index entries with no matching record, removed.
    pub stale_removed: u64,
    /// Records that failed to decode, left in place.
    pub corrupt: u64,
}

/// What the sweeper needs from the store.
///
/// Implemented by [`VersionedStore`](crate::kv::VersionedStore); the sweeper
/// never sees physical storage directly.
pub trait ExpirySource: Send + Sync {
    /// Current time according to the store's clock.
    fn now(&self) -> Timestamp;

    /// Every expiry index entry with `expires_at <= now`, in expiry order,
    /// read from a single snapshot held until the iterator is dropped.
    ///
    /// Entries that cannot be decoded are yielded as `Err` and the
    /// iteration continues.
    fn expired_entries(
        &self,
        now: Timestamp,
    ) -> KvResult<Box<dyn Iterator<Item = KvResult<ExpiryCandidate>> + '_>>;

    /// Conditionally remove a batch of candidates in one atomic write.
    ///
    /// A candidate whose record changed since it was observed is skipped.
    fn expire_batch(&self, batch: &[ExpiryCandidate]) -> KvResult<ExpireReport>;
}
