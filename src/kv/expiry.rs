//! Expiry index access for the sweeper
//!
//! The expiry region is ordered by `expires_at`, so everything due at
//! `now` is one contiguous range starting at the region tag. A scan holds
//! one snapshot for its whole life and reads the primary entry of each
//! candidate from that same snapshot; the removal re-checks both inside
//! a write transaction, so a record rewritten after the scan is never
//! purged.

use std::collections::VecDeque;

use crate::clock::Timestamp;
use crate::codec::{decode_expiry_key, encode_primary_key, expiry_range_until, successor};
use crate::observability::{log_event_with_fields, Event};
use crate::storage::{KvPair, Snapshot};
use crate::sweeper::{ExpireReport, ExpiryCandidate, ExpirySource};

use super::errors::{KvError, KvResult};
use super::store::{stage_tombstone, Slot, VersionedStore};

const SCAN_PAGE_SIZE: usize = 256;

/// Iterator over due expiry entries, bound to one snapshot.
pub(crate) struct ExpiryScan<'a> {
    store: &'a VersionedStore,
    snapshot: Snapshot,
    next_start: Option<Vec<u8>>,
    end: Vec<u8>,
    buffer: VecDeque<KvPair>,
}

impl<'a> ExpiryScan<'a> {
    fn new(store: &'a VersionedStore, now: Timestamp) -> Self {
        let range = expiry_range_until(now);
        Self {
            store,
            snapshot: store.storage.snapshot(),
            next_start: (!range.is_empty()).then_some(range.start),
            end: range.end,
            buffer: VecDeque::new(),
        }
    }

    fn refill(&mut self) -> KvResult<()> {
        let start = match self.next_start.take() {
            Some(start) => start,
            None => return Ok(()),
        };
        for entry in self
            .snapshot
            .iterate(&start, &self.end)
            .take(SCAN_PAGE_SIZE)
        {
            self.buffer.push_back(entry?);
        }
        if self.buffer.len() == SCAN_PAGE_SIZE {
            if let Some((last, _)) = self.buffer.back() {
                self.next_start = Some(successor(last));
            }
        }
        Ok(())
    }

    fn candidate(&self, expiry_key: Vec<u8>) -> KvResult<ExpiryCandidate> {
        let decoded = decode_expiry_key(&expiry_key).map_err(|e| {
            self.store.metrics().increment_corrupt_records();
            log_event_with_fields(
                Event::CorruptRecord,
                &[("region", "expiry"), ("reason", &e.to_string())],
            );
            KvError::CorruptRecord(e)
        })?;

        let primary = self
            .snapshot
            .get(&encode_primary_key(decoded.namespace, &decoded.key))?;
        let observed_version = match primary {
            Some(raw) => {
                let envelope = self.store.decode(&raw, decoded.namespace, &decoded.key)?;
                (!envelope.is_tombstone && envelope.expires_at == Some(decoded.expires_at))
                    .then_some(envelope.version)
            }
            None => None,
        };

        Ok(ExpiryCandidate {
            expiry_key,
            namespace: decoded.namespace,
            key: decoded.key,
            expires_at: decoded.expires_at,
            observed_version,
        })
    }
}

impl Iterator for ExpiryScan<'_> {
    type Item = KvResult<ExpiryCandidate>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() {
            if let Err(e) = self.refill() {
                self.next_start = None;
                return Some(Err(e));
            }
        }
        let (expiry_key, _) = self.buffer.pop_front()?;
        Some(self.candidate(expiry_key))
    }
}

impl ExpirySource for VersionedStore {
    fn now(&self) -> Timestamp {
        self.clock.now()
    }

    fn expired_entries(
        &self,
        now: Timestamp,
    ) -> KvResult<Box<dyn Iterator<Item = KvResult<ExpiryCandidate>> + '_>> {
        Ok(Box::new(ExpiryScan::new(self, now)))
    }

    fn expire_batch(&self, batch: &[ExpiryCandidate]) -> KvResult<ExpireReport> {
        if batch.is_empty() {
            return Ok(ExpireReport::default());
        }
        self.storage.transaction(|tx| -> KvResult<ExpireReport> {
            let now = self.clock.now();
            let mut report = ExpireReport::default();
            for candidate in batch {
                let slot = match self.read_slot(tx, candidate.namespace, &candidate.key, now) {
                    Ok(slot) => slot,
                    Err(KvError::CorruptRecord(_)) => {
                        report.corrupt += 1;
                        continue;
                    }
                    Err(e) => return Err(e),
                };

                let references_entry = slot.envelope().is_some_and(|envelope| {
                    !envelope.is_tombstone && envelope.expires_at == Some(candidate.expires_at)
                });
                if !references_entry {
                    tx.delete(candidate.expiry_key.clone());
                    report.stale_removed += 1;
                    continue;
                }

                match (candidate.observed_version, &slot) {
                    (Some(observed), Slot::Expired(current)) if current.version == observed => {
                        stage_tombstone(
                            tx,
                            candidate.namespace,
                            &candidate.key,
                            current,
                            current.version,
                            now,
                        );
                        report.purged += 1;
                    }
                    _ => report.skipped += 1,
                }
            }
            Ok(report)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::clock::{Clock, ManualClock};
    use crate::codec::{encode_expiry_key, RecordEnvelope};
    use crate::observability::MetricsRegistry;
    use crate::storage::{Durability, Storage};
    use tempfile::TempDir;

    const START: Timestamp = Timestamp::from_millis(1_700_000_000_000);

    fn open() -> (TempDir, Arc<ManualClock>, VersionedStore) {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(dir.path(), Durability::Buffer).unwrap());
        let clock = Arc::new(ManualClock::new(START));
        let store =
            VersionedStore::open(storage, clock.clone(), Arc::new(MetricsRegistry::new())).unwrap();
        (dir, clock, store)
    }

    fn collect(store: &VersionedStore) -> Vec<ExpiryCandidate> {
        store
            .expired_entries(store.now())
            .unwrap()
            .collect::<KvResult<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_only_due_entries_are_listed_in_expiry_order() {
        let (_dir, clock, store) = open();
        store.put("ns", b"late", b"v".to_vec(), Some(Duration::from_secs(30))).unwrap();
        store.put("ns", b"early", b"v".to_vec(), Some(Duration::from_secs(10))).unwrap();
        store.put("ns", b"mid", b"v".to_vec(), Some(Duration::from_secs(20))).unwrap();
        store.put("ns", b"forever", b"v".to_vec(), None).unwrap();

        assert!(collect(&store).is_empty());

        clock.advance(Duration::from_secs(20));
        let due: Vec<Vec<u8>> = collect(&store).into_iter().map(|c| c.key).collect();
        assert_eq!(due, vec![b"early".to_vec(), b"mid".to_vec()]);
    }

    #[test]
    fn test_expire_batch_purges_observed_versions() {
        let (_dir, clock, store) = open();
        store.put("ns", b"a", b"v".to_vec(), Some(Duration::from_secs(1))).unwrap();
        store.put("ns", b"b", b"v".to_vec(), Some(Duration::from_secs(1))).unwrap();
        clock.advance(Duration::from_secs(1));

        let candidates = collect(&store);
        assert_eq!(candidates.len(), 2);
        assert!(candidates.iter().all(|c| c.observed_version == Some(1)));

        let report = store.expire_batch(&candidates).unwrap();
        assert_eq!(report.purged, 2);
        assert_eq!(store.expiry_index_len().unwrap(), 0);
        assert_eq!(store.namespace_stats("ns").unwrap().tombstones, 2);

        // Versions survive the purge.
        assert_eq!(store.put("ns", b"a", b"again".to_vec(), None).unwrap(), 2);
    }

    #[test]
    fn test_rewritten_record_is_skipped() {
        let (_dir, clock, store) = open();
        store.put("ns", b"k", b"v1".to_vec(), Some(Duration::from_secs(1))).unwrap();
        clock.advance(Duration::from_secs(1));
        let candidates = collect(&store);
        assert_eq!(candidates[0].observed_version, Some(1));

        // Same deadline, newer version: the expiry entry stays valid.
        let ns = store.ensure_namespace("ns").unwrap();
        let deadline = START.saturating_add(Duration::from_secs(1));
        let v2 = RecordEnvelope::live(b"v2".to_vec(), 2, START, clock.now(), Some(deadline));
        store
            .storage()
            .put(encode_primary_key(ns, b"k"), v2.encode())
            .unwrap();

        let report = store.expire_batch(&candidates).unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.purged, 0);
        assert_eq!(report.stale_removed, 0);
        assert_eq!(store.namespace_stats("ns").unwrap().expired_pending, 1);
        assert_eq!(store.expiry_index_len().unwrap(), 1);
    }

    #[test]
    fn test_extended_ttl_leaves_stale_candidate() {
        let (_dir, clock, store) = open();
        store.put("ns", b"k", b"v".to_vec(), Some(Duration::from_secs(1))).unwrap();
        clock.advance(Duration::from_secs(1));
        let candidates = collect(&store);

        store.put("ns", b"k", b"v".to_vec(), Some(Duration::from_secs(60))).unwrap();
        let report = store.expire_batch(&candidates).unwrap();
        assert_eq!(report.stale_removed, 1);
        assert_eq!(store.get("ns", b"k").unwrap().version, 2);
        assert_eq!(store.expiry_index_len().unwrap(), 1);
    }

    #[test]
    fn test_orphan_index_entry_is_removed() {
        let (_dir, clock, store) = open();
        let ns = store.ensure_namespace("ns").unwrap();
        store
            .storage()
            .put(encode_expiry_key(START, ns, b"orphan"), Vec::new())
            .unwrap();
        clock.advance(Duration::from_millis(1));

        let candidates = collect(&store);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].observed_version, None);

        let report = store.expire_batch(&candidates).unwrap();
        assert_eq!(report.stale_removed, 1);
        assert_eq!(store.expiry_index_len().unwrap(), 0);
    }

    #[test]
    fn test_scan_crosses_page_boundaries() {
        let (_dir, clock, store) = open();
        let total = SCAN_PAGE_SIZE + 10;
        for i in 0..total {
            store
                .put("ns", format!("k{:04}", i).as_bytes(), b"v".to_vec(), Some(Duration::from_secs(1)))
                .unwrap();
        }
        clock.advance(Duration::from_secs(2));
        assert_eq!(collect(&store).len(), total);
    }

    #[test]
    fn test_corrupt_expiry_key_is_reported_and_skipped() {
        let (_dir, clock, store) = open();
        store.put("ns", b"k", b"v".to_vec(), Some(Duration::from_secs(1))).unwrap();
        // Region tag with a truncated body.
        store.storage().put(vec![0x02, 0x00], Vec::new()).unwrap();
        clock.advance(Duration::from_secs(1));

        let entries: Vec<KvResult<ExpiryCandidate>> =
            store.expired_entries(clock.now()).unwrap().collect();
        assert_eq!(entries.len(), 2);
        assert!(matches!(entries[0], Err(KvError::CorruptRecord(_))));
        assert!(entries[1].is_ok());
    }
}
