//! Versioned record store
//!
//! Per key the store moves through:
//!
//! ```text
//! Absent --put/cas(0)--> Live(v=1) --put/cas--> Live(v=2) ... --delete--> Absent
//!                           |                                     ^
//!                           +--expires_at <= now--> Expired ------+ (lazy purge / sweeper)
//! ```
//!
//! "Absent" is either no primary entry at all or a tombstone envelope that
//! remembers the last version, so a recreated key continues its sequence.
//!
//! Every read-modify-write runs inside one [`Storage::transaction`]: the
//! check and the write it guards commit together or not at all, and the
//! primary and expiry index entries of a key always change in the same
//! commit. Transactions are optimistic. When a concurrent commit overwrites
//! a slot an operation read, the operation is evaluated again from the
//! start, so a compare-and-swap that lost the race reports the winner's
//! version and an unconditional put simply lands after it. The clock is
//! read inside each attempt, so timestamps follow commit order.

use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, Timestamp};
use crate::codec::{
    decode_primary_key, encode_expiry_key, encode_primary_key, expiry_range_until,
    primary_namespace_range, primary_prefix_range, successor, CodecError, KeyRange,
    NamespaceId, RecordEnvelope,
};
use crate::observability::{log_event_with_fields, Event, Logger, MetricsRegistry};
use crate::storage::{Storage, Transaction};

use super::errors::{BatchFailure, FailureReason, KvError, KvResult};
use super::namespace::{CreatedNamespaces, NamespaceCatalog};
use super::record::{BatchOp, BatchOpKind, BatchOutcome, Record, ScanOptions, ScanPage};
use super::validator::{clamp_scan_limit, RequestValidator, MAX_SCAN_LIMIT};

/// Raw primary entries one scan page may walk past, live or not.
///
/// A page that reaches it stops early with a cursor at the last entry
/// examined, so a run of tombstones costs several short pages instead of
/// one unbounded one.
pub const MAX_SCAN_EXAMINED: usize = 2 * MAX_SCAN_LIMIT;

/// What the primary index holds for one key at a given instant.
pub(crate) enum Slot {
    Missing,
    Tombstone(RecordEnvelope),
    Expired(RecordEnvelope),
    Live(RecordEnvelope),
}

impl Slot {
    pub(crate) fn classify(envelope: Option<RecordEnvelope>, now: Timestamp) -> Self {
        match envelope {
            None => Slot::Missing,
            Some(envelope) if envelope.is_tombstone => Slot::Tombstone(envelope),
            Some(envelope) if envelope.is_expired_at(now) => Slot::Expired(envelope),
            Some(envelope) => Slot::Live(envelope),
        }
    }

    /// Version visible to callers; 0 means absent.
    fn live_version(&self) -> u64 {
        match self {
            Slot::Live(envelope) => envelope.version,
            _ => 0,
        }
    }

    /// Highest version ever written for the key.
    fn last_version(&self) -> u64 {
        self.envelope().map_or(0, |envelope| envelope.version)
    }

    pub(crate) fn envelope(&self) -> Option<&RecordEnvelope> {
        match self {
            Slot::Missing => None,
            Slot::Tombstone(envelope) | Slot::Expired(envelope) | Slot::Live(envelope) => {
                Some(envelope)
            }
        }
    }
}

fn check_expected(slot: &Slot, expected: u64) -> Result<(), FailureReason> {
    let actual = slot.live_version();
    if actual == expected {
        Ok(())
    } else {
        Err(FailureReason::VersionMismatch {
            expected,
            actual: (actual != 0).then_some(actual),
        })
    }
}

fn absent_delete_reason(expected: Option<u64>) -> FailureReason {
    match expected {
        None | Some(0) => FailureReason::NotFound,
        Some(expected) => FailureReason::VersionMismatch {
            expected,
            actual: None,
        },
    }
}

fn check_delete(slot: &Slot, expected: Option<u64>) -> Result<&RecordEnvelope, FailureReason> {
    match (slot, expected) {
        (Slot::Live(envelope), None) => Ok(envelope),
        (Slot::Live(envelope), Some(expected)) if envelope.version == expected => Ok(envelope),
        (Slot::Live(envelope), Some(expected)) => Err(FailureReason::VersionMismatch {
            expected,
            actual: Some(envelope.version),
        }),
        (_, expected) => Err(absent_delete_reason(expected)),
    }
}

/// Stage a live record replacing `slot`, keeping the expiry index in step.
fn stage_put(
    tx: &mut Transaction<'_>,
    namespace: NamespaceId,
    key: &[u8],
    slot: &Slot,
    value: Vec<u8>,
    ttl: Option<Duration>,
    now: Timestamp,
) -> u64 {
    let version = slot.last_version() + 1;
    let created_at = match slot {
        Slot::Live(prior) => prior.created_at,
        _ => now,
    };
    let expires_at = ttl.map(|ttl| now.saturating_add(ttl));

    if let Some(old) = slot.envelope().and_then(|prior| prior.expires_at) {
        if Some(old) != expires_at {
            tx.delete(encode_expiry_key(old, namespace, key));
        }
    }
    if let Some(new) = expires_at {
        tx.put(encode_expiry_key(new, namespace, key), Vec::new());
    }

    let envelope = RecordEnvelope::live(value, version, created_at, now, expires_at);
    tx.put(encode_primary_key(namespace, key), envelope.encode());
    version
}

/// Stage a tombstone carrying `version` over `prior`.
pub(crate) fn stage_tombstone(
    tx: &mut Transaction<'_>,
    namespace: NamespaceId,
    key: &[u8],
    prior: &RecordEnvelope,
    version: u64,
    now: Timestamp,
) {
    if let Some(expires_at) = prior.expires_at {
        tx.delete(encode_expiry_key(expires_at, namespace, key));
    }
    tx.put(
        encode_primary_key(namespace, key),
        RecordEnvelope::tombstone(version, now).encode(),
    );
}

/// Per-namespace counts for operators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NamespaceStats {
    pub live: u64,
    pub expired_pending: u64,
    pub tombstones: u64,
    pub value_bytes: u64,
}

/// The versioned key-value store.
///
/// Safe to share across threads; holds no lock across a logical operation.
pub struct VersionedStore {
    pub(crate) storage: Arc<Storage>,
    catalog: NamespaceCatalog,
    pub(crate) clock: Arc<dyn Clock>,
    metrics: Arc<MetricsRegistry>,
}

impl VersionedStore {
    /// Build a store over an opened engine, loading the namespace catalog.
    pub fn open(
        storage: Arc<Storage>,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsRegistry>,
    ) -> KvResult<Self> {
        let catalog = NamespaceCatalog::load(&storage)?;
        log_event_with_fields(
            Event::NamespacesLoaded,
            &[("count", &catalog.names().len().to_string())],
        );
        Ok(Self {
            storage,
            catalog,
            clock,
            metrics,
        })
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Known namespaces, sorted.
    pub fn namespaces(&self) -> Vec<String> {
        self.catalog.names()
    }

    /// Create `namespace` if it does not exist yet.
    pub fn ensure_namespace(&self, namespace: &str) -> KvResult<NamespaceId> {
        RequestValidator::new().namespace(namespace).finish()?;
        let existed = self.catalog.lookup(namespace).is_some();
        let id = self.observe(self.catalog.ensure(&self.storage, namespace))?;
        if !existed {
            log_event_with_fields(
                Event::NamespaceCreated,
                &[("namespace", namespace), ("id", &id.value().to_string())],
            );
        }
        Ok(id)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Live record for `(namespace, key)`.
    ///
    /// An expired record reads as `NotFound` and is purged inline.
    pub fn get(&self, namespace: &str, key: &[u8]) -> KvResult<Record> {
        RequestValidator::new().namespace(namespace).key(key).finish()?;
        self.metrics.increment_gets();
        let result = self.get_inner(namespace, key);
        self.observe(result)
    }

    fn get_inner(&self, namespace: &str, key: &[u8]) -> KvResult<Record> {
        let ns = self.catalog.lookup(namespace).ok_or(KvError::NotFound)?;
        let now = self.clock.now();
        let raw = self
            .storage
            .get(&encode_primary_key(ns, key))?
            .ok_or(KvError::NotFound)?;

        match Slot::classify(Some(self.decode(&raw, ns, key)?), now) {
            Slot::Live(envelope) => Ok(Record::from_envelope(namespace, key.to_vec(), envelope)),
            Slot::Expired(envelope) => {
                self.purge_expired(ns, vec![(key.to_vec(), envelope)]);
                Err(KvError::NotFound)
            }
            Slot::Missing | Slot::Tombstone(_) => Err(KvError::NotFound),
        }
    }

    /// One ordered page of live records.
    ///
    /// The page is read from a single snapshot. Expired entries met on the
    /// way are skipped and purged after the snapshot is released.
    pub fn scan(&self, namespace: &str, options: ScanOptions) -> KvResult<ScanPage> {
        RequestValidator::new().namespace(namespace).finish()?;
        self.metrics.increment_scans();
        let result = self.scan_inner(namespace, &options);
        self.observe(result)
    }

    fn scan_inner(&self, namespace: &str, options: &ScanOptions) -> KvResult<ScanPage> {
        let empty = ScanPage {
            records: Vec::new(),
            next_cursor: None,
        };
        let ns = match self.catalog.lookup(namespace) {
            Some(ns) => ns,
            None => return Ok(empty),
        };
        let range = scan_range(ns, options);
        if range.is_empty() {
            return Ok(empty);
        }

        let limit = clamp_scan_limit(options.limit);
        let now = self.clock.now();
        let mut records: Vec<Record> = Vec::with_capacity(limit.min(128));
        let mut expired = Vec::new();
        let mut next_cursor = None;
        let mut examined = 0;
        let mut last_examined: Option<Vec<u8>> = None;

        {
            let snapshot = self.storage.snapshot();
            for entry in snapshot.iterate(&range.start, &range.end) {
                let (raw_key, raw_value) = entry?;
                if records.len() == limit {
                    next_cursor = records.last().map(|record| record.key.clone());
                    break;
                }
                if examined == MAX_SCAN_EXAMINED {
                    next_cursor = last_examined;
                    break;
                }
                examined += 1;
                let (_, key) =
                    decode_primary_key(&raw_key).map_err(|e| self.corrupt(e, ns, &raw_key))?;
                last_examined = Some(key.clone());
                match Slot::classify(Some(self.decode(&raw_value, ns, &key)?), now) {
                    Slot::Live(envelope) => {
                        records.push(Record::from_envelope(namespace, key, envelope))
                    }
                    Slot::Expired(envelope) => expired.push((key, envelope)),
                    Slot::Missing | Slot::Tombstone(_) => {}
                }
            }
        }

        self.purge_expired(ns, expired);
        Ok(ScanPage {
            records,
            next_cursor,
        })
    }

    /// Count entries of one namespace by state.
    pub fn namespace_stats(&self, namespace: &str) -> KvResult<NamespaceStats> {
        let mut stats = NamespaceStats::default();
        let ns = match self.catalog.lookup(namespace) {
            Some(ns) => ns,
            None => return Ok(stats),
        };
        let now = self.clock.now();
        let range = primary_namespace_range(ns);
        let snapshot = self.storage.snapshot();
        for entry in snapshot.iterate(&range.start, &range.end) {
            let (raw_key, raw_value) = entry?;
            match Slot::classify(Some(self.decode(&raw_value, ns, &raw_key)?), now) {
                Slot::Live(envelope) => {
                    stats.live += 1;
                    stats.value_bytes += envelope.value.len() as u64;
                }
                Slot::Expired(_) => stats.expired_pending += 1,
                Slot::Tombstone(_) => stats.tombstones += 1,
                Slot::Missing => {}
            }
        }
        Ok(stats)
    }

    /// Number of expiry index entries, due or not.
    pub fn expiry_index_len(&self) -> KvResult<u64> {
        let range = expiry_range_until(Timestamp::from_millis(u64::MAX));
        let snapshot = self.storage.snapshot();
        let mut count = 0;
        for entry in snapshot.iterate(&range.start, &range.end) {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Unconditional upsert. Returns the new version.
    pub fn put(
        &self,
        namespace: &str,
        key: &[u8],
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> KvResult<u64> {
        RequestValidator::new()
            .namespace(namespace)
            .key(key)
            .value(&value)
            .ttl(ttl)
            .finish()?;
        let result = self.write_one(namespace, key, value, ttl, None);
        if result.is_ok() {
            self.metrics.increment_puts();
        }
        self.observe(result)
    }

    /// Write only if the current live version equals `expected_version`
    /// (0 = absent). Returns the new version.
    pub fn compare_and_swap(
        &self,
        namespace: &str,
        key: &[u8],
        expected_version: u64,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> KvResult<u64> {
        RequestValidator::new()
            .namespace(namespace)
            .key(key)
            .value(&value)
            .ttl(ttl)
            .finish()?;
        let result = self.write_one(namespace, key, value, ttl, Some(expected_version));
        match &result {
            Ok(_) => self.metrics.increment_puts(),
            Err(KvError::VersionMismatch { .. }) => self.metrics.increment_cas_conflicts(),
            Err(_) => {}
        }
        self.observe(result)
    }

    fn write_one(
        &self,
        namespace: &str,
        key: &[u8],
        value: Vec<u8>,
        ttl: Option<Duration>,
        expected_version: Option<u64>,
    ) -> KvResult<u64> {
        let mut created = CreatedNamespaces::new();
        let version = self.storage.transaction(|tx| -> KvResult<u64> {
            created.clear();
            let ns = self.catalog.resolve_for_write(tx, namespace, &mut created)?;
            let now = self.clock.now();
            let slot = self.read_slot(tx, ns, key, now)?;
            if let Some(expected) = expected_version {
                check_expected(&slot, expected)?;
            }
            Ok(stage_put(tx, ns, key, &slot, value.clone(), ttl, now))
        })?;
        self.catalog.publish(created);
        Ok(version)
    }

    /// Delete the live record, optionally only at `expected_version`.
    ///
    /// Returns the version the deletion was recorded at, one past the
    /// deleted record's.
    pub fn delete(
        &self,
        namespace: &str,
        key: &[u8],
        expected_version: Option<u64>,
    ) -> KvResult<u64> {
        RequestValidator::new().namespace(namespace).key(key).finish()?;
        let result = self.delete_inner(namespace, key, expected_version);
        match &result {
            Ok(_) => self.metrics.increment_deletes(),
            Err(KvError::VersionMismatch { .. }) => self.metrics.increment_cas_conflicts(),
            Err(_) => {}
        }
        self.observe(result)
    }

    fn delete_inner(
        &self,
        namespace: &str,
        key: &[u8],
        expected_version: Option<u64>,
    ) -> KvResult<u64> {
        let ns = match self.catalog.lookup(namespace) {
            Some(ns) => ns,
            None => return Err(absent_delete_reason(expected_version).into()),
        };
        self.storage.transaction(|tx| -> KvResult<u64> {
            let now = self.clock.now();
            let slot = self.read_slot(tx, ns, key, now)?;
            let prior = check_delete(&slot, expected_version)?;
            let version = prior.version + 1;
            stage_tombstone(tx, ns, key, prior, version, now);
            Ok(version)
        })
    }

    /// Apply every op atomically, or none of them.
    ///
    /// Ops are evaluated in order and each sees the effects of the ones
    /// before it. If any precondition fails the batch is rejected with
    /// every failure listed and nothing is written.
    pub fn batch_write(&self, ops: Vec<BatchOp>) -> KvResult<Vec<BatchOutcome>> {
        RequestValidator::new().batch(&ops).finish()?;
        if ops.is_empty() {
            return Ok(Vec::new());
        }

        let op_count = ops.len();
        let mut created = CreatedNamespaces::new();
        let result = self.storage.transaction(|tx| -> KvResult<Vec<BatchOutcome>> {
            created.clear();
            let now = self.clock.now();
            let mut outcomes = Vec::with_capacity(op_count);
            let mut failures = Vec::new();
            for (index, op) in ops.iter().enumerate() {
                match self.apply_batch_op(tx, op, now, &mut created)? {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(reason) => failures.push(BatchFailure { index, reason }),
                }
            }
            if failures.is_empty() {
                Ok(outcomes)
            } else {
                Err(KvError::BatchRejected { failures })
            }
        });

        match &result {
            Ok(_) => {
                self.catalog.publish(created);
                self.metrics.increment_batch_commits();
            }
            Err(KvError::BatchRejected { failures }) => {
                self.metrics.increment_batch_rejections();
                log_event_with_fields(
                    Event::BatchRejected,
                    &[
                        ("failed", &failures.len().to_string()),
                        ("ops", &op_count.to_string()),
                    ],
                );
            }
            Err(_) => {}
        }
        self.observe(result)
    }

    fn apply_batch_op(
        &self,
        tx: &mut Transaction<'_>,
        op: &BatchOp,
        now: Timestamp,
        created: &mut CreatedNamespaces,
    ) -> KvResult<Result<BatchOutcome, FailureReason>> {
        match &op.kind {
            BatchOpKind::Put { value, ttl } => {
                let ns = self.catalog.resolve_for_write(tx, &op.namespace, created)?;
                let slot = self.read_slot(tx, ns, &op.key, now)?;
                if let Some(expected) = op.expected_version {
                    if let Err(reason) = check_expected(&slot, expected) {
                        return Ok(Err(reason));
                    }
                }
                let version = stage_put(tx, ns, &op.key, &slot, value.clone(), *ttl, now);
                Ok(Ok(BatchOutcome::Put { version }))
            }
            BatchOpKind::Delete => {
                let ns = match self.catalog.lookup_in(tx, &op.namespace)? {
                    Some(ns) => ns,
                    None => return Ok(Err(absent_delete_reason(op.expected_version))),
                };
                let slot = self.read_slot(tx, ns, &op.key, now)?;
                let prior = match check_delete(&slot, op.expected_version) {
                    Ok(prior) => prior,
                    Err(reason) => return Ok(Err(reason)),
                };
                let version = prior.version + 1;
                stage_tombstone(tx, ns, &op.key, prior, version, now);
                Ok(Ok(BatchOutcome::Deleted { version }))
            }
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    pub(crate) fn read_slot(
        &self,
        tx: &mut Transaction<'_>,
        namespace: NamespaceId,
        key: &[u8],
        now: Timestamp,
    ) -> KvResult<Slot> {
        let envelope = match tx.get(&encode_primary_key(namespace, key))? {
            Some(raw) => Some(self.decode(&raw, namespace, key)?),
            None => None,
        };
        Ok(Slot::classify(envelope, now))
    }

    pub(crate) fn decode(
        &self,
        raw: &[u8],
        namespace: NamespaceId,
        key: &[u8],
    ) -> KvResult<RecordEnvelope> {
        RecordEnvelope::decode(raw).map_err(|e| self.corrupt(e, namespace, key))
    }

    pub(crate) fn corrupt(&self, err: CodecError, namespace: NamespaceId, key: &[u8]) -> KvError {
        self.metrics.increment_corrupt_records();
        log_event_with_fields(
            Event::CorruptRecord,
            &[
                ("key", &String::from_utf8_lossy(key)),
                ("namespace_id", &namespace.value().to_string()),
                ("reason", &err.to_string()),
            ],
        );
        KvError::CorruptRecord(err)
    }

    /// Tombstone records observed expired, unless they changed since.
    ///
    /// Best effort: a failure is logged and left for the sweeper.
    fn purge_expired(&self, namespace: NamespaceId, observed: Vec<(Vec<u8>, RecordEnvelope)>) {
        if observed.is_empty() {
            return;
        }
        let result = self.storage.transaction(|tx| -> KvResult<u64> {
            let now = self.clock.now();
            let mut purged = 0;
            for (key, seen) in &observed {
                if let Slot::Expired(current) = self.read_slot(tx, namespace, key, now)? {
                    if current.version == seen.version && current.expires_at == seen.expires_at {
                        stage_tombstone(tx, namespace, key, &current, current.version, now);
                        purged += 1;
                    }
                }
            }
            Ok(purged)
        });

        match result {
            Ok(purged) => {
                self.metrics.add_lazy_expirations(purged);
                Logger::trace(
                    Event::LazyExpire.as_str(),
                    &[
                        ("namespace_id", &namespace.value().to_string()),
                        ("purged", &purged.to_string()),
                    ],
                );
            }
            Err(e) => Logger::warn(
                "LAZY_EXPIRE_FAILED",
                &[("code", e.code()), ("reason", &e.to_string())],
            ),
        }
    }

    fn observe<T>(&self, result: KvResult<T>) -> KvResult<T> {
        if let Err(KvError::EngineFailure(e)) = &result {
            self.metrics.increment_engine_failures();
            log_event_with_fields(
                Event::EngineFailure,
                &[("code", e.code().code()), ("reason", &e.to_string())],
            );
        }
        result
    }
}

/// Physical range of one scan page.
fn scan_range(namespace: NamespaceId, options: &ScanOptions) -> KeyRange {
    let base = primary_prefix_range(namespace, options.prefix.as_deref().unwrap_or_default());
    let mut start = base.start;
    let mut end = base.end;

    if let Some(bound) = &options.start {
        let key = encode_primary_key(namespace, &bound.key);
        start = start.max(if bound.inclusive { key } else { successor(&key) });
    }
    if let Some(bound) = &options.end {
        let key = encode_primary_key(namespace, &bound.key);
        end = end.min(if bound.inclusive { successor(&key) } else { key });
    }
    if let Some(cursor) = &options.cursor {
        start = start.max(successor(&encode_primary_key(namespace, cursor)));
    }
    KeyRange::new(start, end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::kv::record::ScanBound;
    use crate::storage::WriteBatch;
    use std::sync::atomic::{AtomicBool, Ordering};
    use crate::storage::Durability;
    use tempfile::TempDir;

    const START: Timestamp = Timestamp::from_millis(1_700_000_000_000);

    struct Fixture {
        _dir: TempDir,
        clock: Arc<ManualClock>,
        store: VersionedStore,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(dir.path(), Durability::Buffer).unwrap());
        let clock = Arc::new(ManualClock::new(START));
        let store = VersionedStore::open(
            storage,
            clock.clone(),
            Arc::new(MetricsRegistry::new()),
        )
        .unwrap();
        Fixture {
            _dir: dir,
            clock,
            store,
        }
    }

    fn keys(page: &ScanPage) -> Vec<Vec<u8>> {
        page.records.iter().map(|r| r.key.clone()).collect()
    }

    // =========================================================================
    // put / get
    // =========================================================================

    #[test]
    fn test_put_then_get() {
        let f = fixture();
        let version = f.store.put("users", b"alice", b"v1".to_vec(), None).unwrap();
        assert_eq!(version, 1);

        let record = f.store.get("users", b"alice").unwrap();
        assert_eq!(record.value, b"v1");
        assert_eq!(record.version, 1);
        assert_eq!(record.namespace, "users");
        assert_eq!(record.created_at, START);
        assert_eq!(record.expires_at, None);
    }

    #[test]
    fn test_put_bumps_version_and_keeps_created_at() {
        let f = fixture();
        f.store.put("users", b"k", b"a".to_vec(), None).unwrap();
        f.clock.advance(Duration::from_millis(10));
        let version = f.store.put("users", b"k", b"b".to_vec(), None).unwrap();
        assert_eq!(version, 2);

        let record = f.store.get("users", b"k").unwrap();
        assert_eq!(record.created_at, START);
        assert_eq!(record.updated_at, START.saturating_add(Duration::from_millis(10)));
    }

    #[test]
    fn test_get_missing() {
        let f = fixture();
        assert!(matches!(f.store.get("users", b"nope"), Err(KvError::NotFound)));
        f.store.put("users", b"k", b"v".to_vec(), None).unwrap();
        assert!(matches!(f.store.get("users", b"nope"), Err(KvError::NotFound)));
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let f = fixture();
        f.store.put("a", b"k", b"in-a".to_vec(), None).unwrap();
        f.store.put("b", b"k", b"in-b".to_vec(), None).unwrap();
        assert_eq!(f.store.get("a", b"k").unwrap().value, b"in-a");
        assert_eq!(f.store.get("b", b"k").unwrap().value, b"in-b");
        assert_eq!(f.store.namespaces(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_invalid_request_rejected_before_storage() {
        let f = fixture();
        let err = f
            .store
            .put("bad name", b"", b"v".to_vec(), Some(Duration::ZERO))
            .unwrap_err();
        match err {
            KvError::InvalidRequest(violations) => assert_eq!(violations.len(), 3),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(f.store.namespaces().is_empty());
    }

    // =========================================================================
    // compare_and_swap
    // =========================================================================

    #[test]
    fn test_cas_create_against_absent() {
        let f = fixture();
        assert_eq!(f.store.compare_and_swap("ns", b"k", 0, b"v".to_vec(), None).unwrap(), 1);

        let err = f
            .store
            .compare_and_swap("ns", b"k", 0, b"again".to_vec(), None)
            .unwrap_err();
        assert!(matches!(
            err,
            KvError::VersionMismatch {
                expected: 0,
                actual: Some(1)
            }
        ));
    }

    #[test]
    fn test_cas_mismatch_has_no_side_effects() {
        let f = fixture();
        f.store.put("ns", b"k", b"orig".to_vec(), None).unwrap();

        let err = f
            .store
            .compare_and_swap("ns", b"k", 7, b"new".to_vec(), Some(Duration::from_secs(5)))
            .unwrap_err();
        assert!(matches!(err, KvError::VersionMismatch { actual: Some(1), .. }));

        let record = f.store.get("ns", b"k").unwrap();
        assert_eq!(record.value, b"orig");
        assert_eq!(record.version, 1);
        assert_eq!(f.store.expiry_index_len().unwrap(), 0);
        assert_eq!(f.store.metrics().snapshot().cas_conflicts, 1);
    }

    #[test]
    fn test_cas_against_absent_in_unknown_namespace_creates_nothing() {
        let f = fixture();
        let err = f
            .store
            .compare_and_swap("fresh", b"k", 3, b"v".to_vec(), None)
            .unwrap_err();
        assert!(matches!(err, KvError::VersionMismatch { actual: None, .. }));
        assert!(f.store.namespaces().is_empty());
    }

    // =========================================================================
    // delete
    // =========================================================================

    #[test]
    fn test_delete_then_recreate_continues_versions() {
        let f = fixture();
        assert_eq!(f.store.put("ns", b"k", b"a".to_vec(), None).unwrap(), 1);
        assert_eq!(f.store.put("ns", b"k", b"b".to_vec(), None).unwrap(), 2);
        assert_eq!(f.store.delete("ns", b"k", None).unwrap(), 3);
        assert!(matches!(f.store.get("ns", b"k"), Err(KvError::NotFound)));

        // Absent again, so CAS against 0 succeeds, but the version moves on.
        assert_eq!(f.store.compare_and_swap("ns", b"k", 0, b"c".to_vec(), None).unwrap(), 4);
        let record = f.store.get("ns", b"k").unwrap();
        assert_eq!(record.version, 4);
        assert_eq!(record.value, b"c");
    }

    #[test]
    fn test_delete_missing_and_conditional() {
        let f = fixture();
        assert!(matches!(f.store.delete("ns", b"k", None), Err(KvError::NotFound)));
        assert!(matches!(f.store.delete("ns", b"k", Some(0)), Err(KvError::NotFound)));
        assert!(matches!(
            f.store.delete("ns", b"k", Some(2)),
            Err(KvError::VersionMismatch { expected: 2, actual: None })
        ));

        f.store.put("ns", b"k", b"v".to_vec(), None).unwrap();
        assert!(matches!(
            f.store.delete("ns", b"k", Some(5)),
            Err(KvError::VersionMismatch { expected: 5, actual: Some(1) })
        ));
        assert_eq!(f.store.get("ns", b"k").unwrap().version, 1);
        assert_eq!(f.store.delete("ns", b"k", Some(1)).unwrap(), 2);
        assert!(matches!(f.store.delete("ns", b"k", None), Err(KvError::NotFound)));
    }

    #[test]
    fn test_delete_removes_expiry_entry() {
        let f = fixture();
        f.store
            .put("ns", b"k", b"v".to_vec(), Some(Duration::from_secs(60)))
            .unwrap();
        assert_eq!(f.store.expiry_index_len().unwrap(), 1);
        f.store.delete("ns", b"k", None).unwrap();
        assert_eq!(f.store.expiry_index_len().unwrap(), 0);
    }

    // =========================================================================
    // TTL
    // =========================================================================

    #[test]
    fn test_ttl_expires_lazily_on_read() {
        let f = fixture();
        f.store
            .put("ns", b"k", b"v".to_vec(), Some(Duration::from_secs(1)))
            .unwrap();
        let record = f.store.get("ns", b"k").unwrap();
        assert_eq!(record.expires_at, Some(START.saturating_add(Duration::from_secs(1))));

        f.clock.advance(Duration::from_millis(999));
        assert!(f.store.get("ns", b"k").is_ok());

        // expires_at == now counts as expired.
        f.clock.advance(Duration::from_millis(1));
        assert!(matches!(f.store.get("ns", b"k"), Err(KvError::NotFound)));

        // The read purged both index entries.
        assert_eq!(f.store.expiry_index_len().unwrap(), 0);
        let stats = f.store.namespace_stats("ns").unwrap();
        assert_eq!(stats.tombstones, 1);
        assert_eq!(stats.expired_pending, 0);
        assert_eq!(f.store.metrics().snapshot().lazy_expirations, 1);
    }

    #[test]
    fn test_expired_key_version_survives_purge() {
        let f = fixture();
        f.store
            .put("ns", b"k", b"v".to_vec(), Some(Duration::from_secs(1)))
            .unwrap();
        f.clock.advance(Duration::from_secs(2));
        assert!(f.store.get("ns", b"k").is_err());
        assert_eq!(f.store.put("ns", b"k", b"v2".to_vec(), None).unwrap(), 2);
    }

    #[test]
    fn test_put_replaces_expiry_entry() {
        let f = fixture();
        f.store
            .put("ns", b"k", b"v".to_vec(), Some(Duration::from_secs(10)))
            .unwrap();
        f.clock.advance(Duration::from_secs(1));
        f.store
            .put("ns", b"k", b"v".to_vec(), Some(Duration::from_secs(10)))
            .unwrap();
        assert_eq!(f.store.expiry_index_len().unwrap(), 1);

        f.store.put("ns", b"k", b"v".to_vec(), None).unwrap();
        assert_eq!(f.store.expiry_index_len().unwrap(), 0);
    }

    #[test]
    fn test_overwriting_expired_record_starts_fresh() {
        let f = fixture();
        f.store
            .put("ns", b"k", b"old".to_vec(), Some(Duration::from_secs(1)))
            .unwrap();
        f.clock.advance(Duration::from_secs(5));

        // Expired but unpurged reads as absent for CAS.
        let version = f
            .store
            .compare_and_swap("ns", b"k", 0, b"new".to_vec(), None)
            .unwrap();
        assert_eq!(version, 2);
        let record = f.store.get("ns", b"k").unwrap();
        assert_eq!(record.created_at, f.clock.now());
        assert_eq!(f.store.expiry_index_len().unwrap(), 0);
    }

    // =========================================================================
    // scan
    // =========================================================================

    #[test]
    fn test_scan_pages_in_order() {
        let f = fixture();
        for key in [b"c", b"a", b"b"] {
            f.store.put("ns", key, b"v".to_vec(), None).unwrap();
        }

        let first = f.store.scan("ns", ScanOptions::with_limit(2)).unwrap();
        assert_eq!(keys(&first), vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(first.next_cursor, Some(b"b".to_vec()));

        let second = f
            .store
            .scan("ns", ScanOptions::with_limit(2).cursor(first.next_cursor))
            .unwrap();
        assert_eq!(keys(&second), vec![b"c".to_vec()]);
        assert_eq!(second.next_cursor, None);
    }

    #[test]
    fn test_scan_exact_fit_has_no_cursor() {
        let f = fixture();
        f.store.put("ns", b"a", b"v".to_vec(), None).unwrap();
        f.store.put("ns", b"b", b"v".to_vec(), None).unwrap();
        let page = f.store.scan("ns", ScanOptions::with_limit(2)).unwrap();
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.next_cursor, None);
    }

    #[test]
    fn test_scan_prefix_and_bounds() {
        let f = fixture();
        for key in ["user:1", "user:2", "user:3", "user:4", "order:1"] {
            f.store.put("ns", key.as_bytes(), b"v".to_vec(), None).unwrap();
        }

        let page = f
            .store
            .scan("ns", ScanOptions::with_limit(10).prefix(b"user:".to_vec()))
            .unwrap();
        assert_eq!(page.records.len(), 4);

        let page = f
            .store
            .scan(
                "ns",
                ScanOptions::with_limit(10)
                    .prefix(b"user:".to_vec())
                    .start(ScanBound::exclusive(b"user:1".to_vec()))
                    .end(ScanBound::inclusive(b"user:3".to_vec())),
            )
            .unwrap();
        assert_eq!(keys(&page), vec![b"user:2".to_vec(), b"user:3".to_vec()]);
    }

    #[test]
    fn test_scan_skips_deleted_and_purges_expired() {
        let f = fixture();
        f.store.put("ns", b"a", b"v".to_vec(), None).unwrap();
        f.store
            .put("ns", b"b", b"v".to_vec(), Some(Duration::from_secs(1)))
            .unwrap();
        f.store.put("ns", b"c", b"v".to_vec(), None).unwrap();
        f.store.delete("ns", b"c", None).unwrap();
        f.store.put("ns", b"d", b"v".to_vec(), None).unwrap();
        f.clock.advance(Duration::from_secs(1));

        let page = f.store.scan("ns", ScanOptions::with_limit(10)).unwrap();
        assert_eq!(keys(&page), vec![b"a".to_vec(), b"d".to_vec()]);
        assert_eq!(f.store.expiry_index_len().unwrap(), 0);
    }

    #[test]
    fn test_scan_page_stops_after_examining_cap() {
        let f = fixture();
        let ns = f.store.ensure_namespace("ns").unwrap();
        let tombstones = MAX_SCAN_EXAMINED + 50;
        let mut batch = WriteBatch::new();
        for i in 0..tombstones {
            let key = format!("t{:05}", i);
            batch.put(
                encode_primary_key(ns, key.as_bytes()),
                RecordEnvelope::tombstone(1, START).encode(),
            );
        }
        f.store.storage().write_batch(batch).unwrap();
        f.store.put("ns", b"z", b"v".to_vec(), None).unwrap();

        let first = f.store.scan("ns", ScanOptions::with_limit(10)).unwrap();
        assert!(first.records.is_empty());
        let cursor = first.next_cursor.unwrap();
        assert_eq!(cursor, format!("t{:05}", MAX_SCAN_EXAMINED - 1).into_bytes());

        let second = f
            .store
            .scan(
                "ns",
                ScanOptions {
                    cursor: Some(cursor),
                    ..ScanOptions::with_limit(10)
                },
            )
            .unwrap();
        assert_eq!(keys(&second), vec![b"z".to_vec()]);
        assert!(second.next_cursor.is_none());
    }

    #[test]
    fn test_scan_unknown_namespace_is_empty() {
        let f = fixture();
        let page = f.store.scan("ghost", ScanOptions::default()).unwrap();
        assert!(page.records.is_empty());
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn test_scan_limit_is_clamped() {
        let f = fixture();
        f.store.put("ns", b"a", b"v".to_vec(), None).unwrap();
        f.store.put("ns", b"b", b"v".to_vec(), None).unwrap();
        let page = f.store.scan("ns", ScanOptions::with_limit(0)).unwrap();
        assert_eq!(page.records.len(), 1);
        assert!(page.next_cursor.is_some());
    }

    // =========================================================================
    // batch_write
    // =========================================================================

    #[test]
    fn test_batch_commits_all() {
        let f = fixture();
        f.store.put("ns", b"gone", b"x".to_vec(), None).unwrap();

        let outcomes = f
            .store
            .batch_write(vec![
                BatchOp::put("ns", b"a".to_vec(), b"1".to_vec()),
                BatchOp::put("other", b"b".to_vec(), b"2".to_vec()).expect_version(0),
                BatchOp::delete("ns", b"gone".to_vec()).expect_version(1),
            ])
            .unwrap();
        assert_eq!(
            outcomes,
            vec![
                BatchOutcome::Put { version: 1 },
                BatchOutcome::Put { version: 1 },
                BatchOutcome::Deleted { version: 2 },
            ]
        );
        assert_eq!(f.store.get("other", b"b").unwrap().value, b"2");
        assert!(f.store.get("ns", b"gone").is_err());
        assert!(f.store.namespaces().contains(&"other".to_string()));
    }

    #[test]
    fn test_batch_rejects_everything_on_one_failure() {
        let f = fixture();
        f.store.put("ns", b"x", b"orig".to_vec(), None).unwrap();

        let err = f
            .store
            .batch_write(vec![
                BatchOp::put("ns", b"x".to_vec(), b"new".to_vec()).expect_version(1),
                BatchOp::put("ns", b"y".to_vec(), b"new".to_vec()).expect_version(4),
                BatchOp::delete("ns", b"missing".to_vec()),
                BatchOp::put("brand-new", b"z".to_vec(), b"v".to_vec()),
            ])
            .unwrap_err();

        match err {
            KvError::BatchRejected { failures } => {
                assert_eq!(
                    failures,
                    vec![
                        BatchFailure {
                            index: 1,
                            reason: FailureReason::VersionMismatch { expected: 4, actual: None }
                        },
                        BatchFailure {
                            index: 2,
                            reason: FailureReason::NotFound
                        },
                    ]
                );
            }
            other => panic!("unexpected: {:?}", other),
        }

        let record = f.store.get("ns", b"x").unwrap();
        assert_eq!(record.value, b"orig");
        assert_eq!(record.version, 1);
        assert!(f.store.get("ns", b"y").is_err());
        assert!(!f.store.namespaces().contains(&"brand-new".to_string()));
    }

    #[test]
    fn test_batch_ops_see_earlier_ops() {
        let f = fixture();
        let outcomes = f
            .store
            .batch_write(vec![
                BatchOp::put("ns", b"k".to_vec(), b"1".to_vec()),
                BatchOp::put("ns", b"k".to_vec(), b"2".to_vec()).expect_version(1),
                BatchOp::delete("ns", b"k".to_vec()).expect_version(2),
            ])
            .unwrap();
        assert_eq!(outcomes.last().map(|o| o.version()), Some(3));
        assert!(f.store.get("ns", b"k").is_err());
    }

    #[test]
    fn test_empty_batch() {
        let f = fixture();
        assert!(f.store.batch_write(Vec::new()).unwrap().is_empty());
    }

    // =========================================================================
    // Corruption
    // =========================================================================

    #[test]
    fn test_corrupt_record_surfaces_as_fatal() {
        let f = fixture();
        let ns = f.store.ensure_namespace("ns").unwrap();
        f.store
            .storage()
            .put(encode_primary_key(ns, b"bad"), vec![1, 2, 3])
            .unwrap();

        let err = f.store.get("ns", b"bad").unwrap_err();
        assert!(matches!(err, KvError::CorruptRecord(_)));
        assert!(err.is_fatal());
        assert!(matches!(
            f.store.scan("ns", ScanOptions::default()),
            Err(KvError::CorruptRecord(_))
        ));
        assert_eq!(f.store.metrics().snapshot().corrupt_records, 2);
    }

    // =========================================================================
    // Concurrent commits
    // =========================================================================

    /// Clock whose first reading after arming commits a competing record
    /// for `target` from inside the caller's transaction.
    struct RacingClock {
        inner: ManualClock,
        storage: Arc<Storage>,
        target: Vec<u8>,
        armed: AtomicBool,
    }

    impl Clock for RacingClock {
        fn now(&self) -> Timestamp {
            if self.armed.swap(false, Ordering::SeqCst) {
                let winner = RecordEnvelope::live(b"winner".to_vec(), 5, START, START, None);
                self.storage.put(self.target.clone(), winner.encode()).unwrap();
                let now = self.inner.now();
                self.inner.advance(Duration::from_secs(1));
                return now;
            }
            self.inner.now()
        }
    }

    fn racing_fixture() -> (TempDir, Arc<RacingClock>, VersionedStore) {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(dir.path(), Durability::Buffer).unwrap());
        let clock = Arc::new(RacingClock {
            inner: ManualClock::new(START),
            storage: storage.clone(),
            target: encode_primary_key(NamespaceId::FIRST, b"k"),
            armed: AtomicBool::new(false),
        });
        let store =
            VersionedStore::open(storage, clock.clone(), Arc::new(MetricsRegistry::new())).unwrap();
        assert_eq!(store.ensure_namespace("ns").unwrap(), NamespaceId::FIRST);
        (dir, clock, store)
    }

    #[test]
    fn test_put_lands_after_concurrent_commit() {
        let (_dir, clock, store) = racing_fixture();
        clock.armed.store(true, Ordering::SeqCst);

        assert_eq!(store.put("ns", b"k", b"mine".to_vec(), None).unwrap(), 6);

        let record = store.get("ns", b"k").unwrap();
        assert_eq!(record.value, b"mine");
        assert_eq!(record.created_at, START);
        // Stamped by the attempt that committed, not the one that lost.
        assert_eq!(record.updated_at, START.saturating_add(Duration::from_secs(1)));
    }

    #[test]
    fn test_cas_that_loses_the_race_reports_winner_version() {
        let (_dir, clock, store) = racing_fixture();
        assert_eq!(store.put("ns", b"k", b"v1".to_vec(), None).unwrap(), 1);
        clock.armed.store(true, Ordering::SeqCst);

        let err = store
            .compare_and_swap("ns", b"k", 1, b"mine".to_vec(), None)
            .unwrap_err();
        assert!(matches!(
            err,
            KvError::VersionMismatch {
                expected: 1,
                actual: Some(5)
            }
        ));
        assert_eq!(store.get("ns", b"k").unwrap().value, b"winner");
        assert_eq!(store.metrics().snapshot().cas_conflicts, 1);
    }

    #[test]
    fn test_conditional_delete_that_loses_the_race_is_rejected() {
        let (_dir, clock, store) = racing_fixture();
        store.put("ns", b"k", b"v1".to_vec(), None).unwrap();
        clock.armed.store(true, Ordering::SeqCst);

        assert!(matches!(
            store.delete("ns", b"k", Some(1)),
            Err(KvError::VersionMismatch {
                expected: 1,
                actual: Some(5)
            })
        ));
        assert_eq!(store.get("ns", b"k").unwrap().version, 5);
    }

    #[test]
    fn test_conditional_batch_that_loses_the_race_is_rejected() {
        let (_dir, clock, store) = racing_fixture();
        store.put("ns", b"k", b"v1".to_vec(), None).unwrap();
        clock.armed.store(true, Ordering::SeqCst);

        let mut op = BatchOp::put("ns", b"k".to_vec(), b"mine".to_vec());
        op.expected_version = Some(1);
        let ops = vec![BatchOp::put("ns", b"other".to_vec(), b"x".to_vec()), op];

        match store.batch_write(ops) {
            Err(KvError::BatchRejected { failures }) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].index, 1);
                assert!(matches!(
                    failures[0].reason,
                    FailureReason::VersionMismatch {
                        expected: 1,
                        actual: Some(5)
                    }
                ));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        assert!(matches!(store.get("ns", b"other"), Err(KvError::NotFound)));
    }
}
