//! fjall-backed ordered key-value engine
//!
//! All tidekv data lives in a single partition of a transactional fjall
//! keyspace. Read-modify-write sequences go through [`Storage::transaction`],
//! an optimistic serializable transaction: the closure reads from a snapshot
//! and stages writes, and the commit fails if another commit touched a key it
//! read in the meantime. Such a conflict reruns the closure against fresh
//! state, so writers on unrelated keys never wait for each other. Readers
//! never block: they work against the latest committed state or a
//! [`Snapshot`].

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use fjall::{
    Config, PartitionCreateOptions, PersistMode, ReadTransaction, TxKeyspace, TxPartitionHandle,
    WriteTransaction,
};
use serde::{Deserialize, Serialize};

use crate::codec::{encode_meta_key, successor};

use super::batch::{WriteBatch, WriteOp};
use super::errors::{StorageError, StorageResult};

/// Partition holding every tidekv region.
const PARTITION_NAME: &str = "records";

/// Metadata key recording the on-disk layout revision.
const FORMAT_MARKER_KEY: &str = "format";

/// Layout revision written by this build.
pub const STORAGE_FORMAT_VERSION: u32 = 1;

/// Entries fetched per refill by [`RangeIter`].
const RANGE_PAGE_SIZE: usize = 256;

/// Runs of a transaction body before a commit conflict is reported.
pub const MAX_TRANSACTION_ATTEMPTS: u32 = 16;

/// Owned key/value pair returned by iteration.
pub type KvPair = (Vec<u8>, Vec<u8>);

/// How hard each commit pushes data towards the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Durability {
    /// fsync data and metadata after every commit
    #[default]
    SyncAll,
    /// fsync data after every commit
    SyncData,
    /// Hand the journal to the OS without syncing
    Buffer,
}

impl Durability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Durability::SyncAll => "sync_all",
            Durability::SyncData => "sync_data",
            Durability::Buffer => "buffer",
        }
    }

    fn persist_mode(self) -> PersistMode {
        match self {
            Durability::SyncAll => PersistMode::SyncAll,
            Durability::SyncData => PersistMode::SyncData,
            Durability::Buffer => PersistMode::Buffer,
        }
    }
}

/// Ordered, durable key-value engine.
pub struct Storage {
    path: PathBuf,
    keyspace: TxKeyspace,
    partition: TxPartitionHandle,
    durability: Durability,
}

impl Storage {
    /// Open or create the engine under `path`.
    ///
    /// A fresh directory gets the current format marker. An existing one
    /// must carry the same marker or opening fails.
    pub fn open(path: impl AsRef<Path>, durability: Durability) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();

        let keyspace = Config::new(&path).open_transactional().map_err(|e| {
            StorageError::open_failed("Failed to open keyspace", e)
                .with_details(format!("path: {}", path.display()))
        })?;
        let partition = keyspace
            .open_partition(PARTITION_NAME, PartitionCreateOptions::default())
            .map_err(|e| StorageError::open_failed("Failed to open partition", e))?;

        let storage = Self {
            path,
            keyspace,
            partition,
            durability,
        };
        storage.check_format_marker()?;
        Ok(storage)
    }

    fn check_format_marker(&self) -> StorageResult<()> {
        let marker_key = encode_meta_key(FORMAT_MARKER_KEY);
        match self.get(&marker_key)? {
            Some(raw) => {
                let found: [u8; 4] = raw
                    .as_slice()
                    .try_into()
                    .map_err(|_| StorageError::incompatible(format!("{:?}", raw)))?;
                let found = u32::from_be_bytes(found);
                if found != STORAGE_FORMAT_VERSION {
                    return Err(StorageError::incompatible(found.to_string()));
                }
                Ok(())
            }
            None => self.put(marker_key, STORAGE_FORMAT_VERSION.to_be_bytes().to_vec()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn durability(&self) -> Durability {
        self.durability
    }

    /// Point read against the latest committed state.
    pub fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.partition
            .get(key)
            .map(|value| value.map(|v| v.to_vec()))
            .map_err(|e| StorageError::read_failed("Point read failed", e))
    }

    /// Single durable put.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        let mut batch = WriteBatch::with_capacity(1);
        batch.put(key, value);
        self.write_batch(batch)
    }

    /// Single durable delete. Deleting a missing key is not an error.
    pub fn delete(&self, key: Vec<u8>) -> StorageResult<()> {
        let mut batch = WriteBatch::with_capacity(1);
        batch.delete(key);
        self.write_batch(batch)
    }

    /// Apply every op of `batch` atomically.
    pub fn write_batch(&self, batch: WriteBatch) -> StorageResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut tx = self.begin()?;
        for op in batch.into_ops() {
            match op {
                WriteOp::Put { key, value } => tx.insert(&self.partition, key, value),
                WriteOp::Delete { key } => tx.remove(&self.partition, key),
            }
        }
        // A batch reads nothing, so no other commit can invalidate it.
        tx.commit()
            .map_err(|e| StorageError::write_failed("Batch commit failed", e))?
            .map_err(|conflict| StorageError::conflict(1, conflict))?;
        self.persist()
    }

    /// Lazily iterate `[start, end)` in ascending key order.
    ///
    /// The iterator refills in pages, each from a fresh view of the
    /// committed state. Callers that need a single consistent view across
    /// the whole range should iterate a [`Snapshot`] instead.
    pub fn iterate(&self, start: &[u8], end: &[u8]) -> RangeIter<'_> {
        RangeIter {
            storage: self,
            next_start: if start < end { Some(start.to_vec()) } else { None },
            end: end.to_vec(),
            buffer: VecDeque::new(),
        }
    }

    /// Consistent point-in-time view. Released on drop.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            tx: self.keyspace.read_tx(),
            partition: self.partition.clone(),
        }
    }

    /// Run `body` as one atomic read-modify-write unit.
    ///
    /// Reads inside `body` observe a snapshot taken when the attempt began
    /// plus the attempt's own staged writes. `Ok` commits every staged
    /// write; `Err` discards them and is returned unchanged. If another
    /// commit wrote a key this attempt read, the attempt is discarded and
    /// `body` runs again, up to [`MAX_TRANSACTION_ATTEMPTS`] times, after
    /// which the conflict is returned.
    ///
    /// No lock is held while `body` runs.
    pub fn transaction<T, E>(
        &self,
        mut body: impl FnMut(&mut Transaction<'_>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StorageError>,
    {
        let mut attempt = 1;
        loop {
            let mut staged = Transaction {
                tx: self.begin()?,
                partition: &self.partition,
                writes: 0,
            };

            // Dropping an uncommitted transaction rolls it back.
            let output = body(&mut staged)?;
            if staged.writes == 0 {
                return Ok(output);
            }

            match staged.tx.commit() {
                Ok(Ok(())) => {
                    self.persist()?;
                    return Ok(output);
                }
                Ok(Err(conflict)) if attempt >= MAX_TRANSACTION_ATTEMPTS => {
                    return Err(StorageError::conflict(attempt, conflict).into());
                }
                Ok(Err(_)) => attempt += 1,
                Err(e) => {
                    return Err(StorageError::write_failed("Transaction commit failed", e).into())
                }
            }
        }
    }

    /// Force the journal to stable storage regardless of durability mode.
    pub fn flush(&self) -> StorageResult<()> {
        self.keyspace
            .persist(PersistMode::SyncAll)
            .map_err(|e| StorageError::write_failed("Flush failed", e))
    }

    /// Flush and release the engine.
    pub fn close(self) -> StorageResult<()> {
        self.flush()
    }

    fn begin(&self) -> StorageResult<WriteTransaction> {
        self.keyspace
            .write_tx()
            .map_err(|e| StorageError::write_failed("Failed to begin transaction", e))
    }

    fn persist(&self) -> StorageResult<()> {
        self.keyspace
            .persist(self.durability.persist_mode())
            .map_err(|e| StorageError::write_failed("Journal persist failed", e))
    }
}

/// One attempt of a [`Storage::transaction`] call.
pub struct Transaction<'s> {
    tx: WriteTransaction,
    partition: &'s TxPartitionHandle,
    writes: usize,
}

impl Transaction<'_> {
    /// Read through staged writes to the attempt's snapshot.
    ///
    /// The key joins the read set checked at commit.
    pub fn get(&mut self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.tx
            .get(self.partition, key)
            .map(|value| value.map(|v| v.to_vec()))
            .map_err(|e| StorageError::read_failed("Transactional read failed", e))
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.tx.insert(self.partition, key, value);
        self.writes += 1;
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.tx.remove(self.partition, key);
        self.writes += 1;
    }

    /// Number of writes staged so far.
    pub fn len(&self) -> usize {
        self.writes
    }

    pub fn is_empty(&self) -> bool {
        self.writes == 0
    }
}

/// Read-only point-in-time view of the engine.
pub struct Snapshot {
    tx: ReadTransaction,
    partition: TxPartitionHandle,
}

impl Snapshot {
    pub fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.tx
            .get(&self.partition, key)
            .map(|value| value.map(|v| v.to_vec()))
            .map_err(|e| StorageError::read_failed("Snapshot read failed", e))
    }

    /// Iterate `[start, end)` as of the snapshot.
    pub fn iterate<'a>(
        &'a self,
        start: &[u8],
        end: &[u8],
    ) -> Box<dyn Iterator<Item = StorageResult<KvPair>> + 'a> {
        if start >= end {
            return Box::new(std::iter::empty());
        }
        let iter = self
            .tx
            .range(&self.partition, start.to_vec()..end.to_vec())
            .map(|entry| {
                entry
                    .map(|(k, v)| (k.to_vec(), v.to_vec()))
                    .map_err(|e| StorageError::read_failed("Snapshot iteration failed", e))
            });
        Box::new(iter)
    }
}

/// Paged ascending iterator returned by [`Storage::iterate`].
pub struct RangeIter<'s> {
    storage: &'s Storage,
    next_start: Option<Vec<u8>>,
    end: Vec<u8>,
    buffer: VecDeque<KvPair>,
}

impl RangeIter<'_> {
    fn refill(&mut self) -> StorageResult<()> {
        let start = match self.next_start.take() {
            Some(start) => start,
            None => return Ok(()),
        };
        let snapshot = self.storage.snapshot();
        for entry in snapshot.iterate(&start, &self.end).take(RANGE_PAGE_SIZE) {
            self.buffer.push_back(entry?);
        }
        if self.buffer.len() == RANGE_PAGE_SIZE {
            if let Some((last, _)) = self.buffer.back() {
                self.next_start = Some(successor(last));
            }
        }
        Ok(())
    }
}

impl Iterator for RangeIter<'_> {
    type Item = StorageResult<KvPair>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() {
            if let Err(e) = self.refill() {
                self.next_start = None;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn open() -> (TempDir, Storage) {
        let dir = TempDir::new().unwrap();
        let storage = Storage::open(dir.path(), Durability::SyncData).unwrap();
        (dir, storage)
    }

    #[derive(Debug)]
    enum TestError {
        Storage(StorageError),
        Abort,
    }

    impl From<StorageError> for TestError {
        fn from(e: StorageError) -> Self {
            TestError::Storage(e)
        }
    }

    // =========================================================================
    // Point operations
    // =========================================================================

    #[test]
    fn test_put_get_delete() {
        let (_dir, storage) = open();
        storage.put(b"\x01k".to_vec(), b"v".to_vec()).unwrap();
        assert_eq!(storage.get(b"\x01k").unwrap(), Some(b"v".to_vec()));

        storage.delete(b"\x01k".to_vec()).unwrap();
        assert_eq!(storage.get(b"\x01k").unwrap(), None);

        // Deleting twice is fine.
        storage.delete(b"\x01k".to_vec()).unwrap();
    }

    #[test]
    fn test_reopen_keeps_data_and_marker() {
        let dir = TempDir::new().unwrap();
        {
            let storage = Storage::open(dir.path(), Durability::SyncAll).unwrap();
            storage.put(b"\x01persist".to_vec(), b"yes".to_vec()).unwrap();
            storage.close().unwrap();
        }
        let storage = Storage::open(dir.path(), Durability::SyncAll).unwrap();
        assert_eq!(storage.get(b"\x01persist").unwrap(), Some(b"yes".to_vec()));
    }

    #[test]
    fn test_unknown_format_marker_rejected() {
        let dir = TempDir::new().unwrap();
        {
            let storage = Storage::open(dir.path(), Durability::SyncAll).unwrap();
            storage
                .put(encode_meta_key(FORMAT_MARKER_KEY), 99u32.to_be_bytes().to_vec())
                .unwrap();
            storage.close().unwrap();
        }
        let err = Storage::open(dir.path(), Durability::SyncAll).err().unwrap();
        assert!(err.is_fatal());
        assert_eq!(err.details(), Some("found: 99"));
    }

    // =========================================================================
    // Batches and transactions
    // =========================================================================

    #[test]
    fn test_write_batch_applies_all() {
        let (_dir, storage) = open();
        storage.put(b"\x01gone".to_vec(), b"x".to_vec()).unwrap();

        let mut batch = WriteBatch::new();
        batch
            .put(b"\x01a".to_vec(), b"1".to_vec())
            .put(b"\x01b".to_vec(), b"2".to_vec())
            .delete(b"\x01gone".to_vec());
        storage.write_batch(batch).unwrap();

        assert_eq!(storage.get(b"\x01a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(storage.get(b"\x01b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(storage.get(b"\x01gone").unwrap(), None);
    }

    #[test]
    fn test_transaction_reads_own_writes_and_commits() {
        let (_dir, storage) = open();
        let seen = storage
            .transaction(|tx| -> Result<Option<Vec<u8>>, StorageError> {
                tx.put(b"\x01k".to_vec(), b"staged".to_vec());
                tx.get(b"\x01k")
            })
            .unwrap();
        assert_eq!(seen, Some(b"staged".to_vec()));
        assert_eq!(storage.get(b"\x01k").unwrap(), Some(b"staged".to_vec()));
    }

    #[test]
    fn test_transaction_error_rolls_back() {
        let (_dir, storage) = open();
        storage.put(b"\x01k".to_vec(), b"before".to_vec()).unwrap();

        let result: Result<(), TestError> = storage.transaction(|tx| {
            tx.put(b"\x01k".to_vec(), b"after".to_vec());
            tx.put(b"\x01other".to_vec(), b"x".to_vec());
            Err(TestError::Abort)
        });
        assert!(matches!(result, Err(TestError::Abort)));

        assert_eq!(storage.get(b"\x01k").unwrap(), Some(b"before".to_vec()));
        assert_eq!(storage.get(b"\x01other").unwrap(), None);
    }

    #[test]
    fn test_transaction_delete_then_read() {
        let (_dir, storage) = open();
        storage.put(b"\x01k".to_vec(), b"v".to_vec()).unwrap();
        storage
            .transaction(|tx| -> Result<(), TestError> {
                tx.delete(b"\x01k".to_vec());
                assert_eq!(tx.get(b"\x01k")?, None);
                assert_eq!(tx.len(), 1);
                Ok(())
            })
            .unwrap();
        assert_eq!(storage.get(b"\x01k").unwrap(), None);
    }

    #[test]
    fn test_open_transaction_does_not_block_other_writers() {
        let (_dir, storage) = open();
        let storage = Arc::new(storage);
        let (started_tx, started_rx) = mpsc::channel();

        let slow = {
            let storage = Arc::clone(&storage);
            thread::spawn(move || {
                storage
                    .transaction(|tx| -> Result<(), TestError> {
                        tx.get(b"\x01slow")?;
                        let _ = started_tx.send(());
                        thread::sleep(Duration::from_millis(800));
                        tx.put(b"\x01slow".to_vec(), b"done".to_vec());
                        Ok(())
                    })
                    .unwrap();
            })
        };

        started_rx.recv().unwrap();
        let begun = Instant::now();
        storage.put(b"\x01unrelated".to_vec(), b"v".to_vec()).unwrap();
        storage
            .transaction(|tx| -> Result<(), TestError> {
                tx.get(b"\x01other")?;
                tx.put(b"\x01other".to_vec(), b"v".to_vec());
                Ok(())
            })
            .unwrap();
        assert!(begun.elapsed() < Duration::from_millis(300));

        slow.join().unwrap();
        assert_eq!(storage.get(b"\x01slow").unwrap(), Some(b"done".to_vec()));
    }

    #[test]
    fn test_conflicting_commit_reruns_body() {
        let (_dir, storage) = open();
        let storage = Arc::new(storage);
        storage.put(b"\x01counter".to_vec(), vec![0]).unwrap();

        let (read_tx, read_rx) = mpsc::channel();
        let (written_tx, written_rx) = mpsc::channel();
        let writer = {
            let storage = Arc::clone(&storage);
            thread::spawn(move || {
                read_rx.recv().unwrap();
                storage.put(b"\x01counter".to_vec(), vec![10]).unwrap();
                written_tx.send(()).unwrap();
            })
        };

        let attempts = AtomicU32::new(0);
        let seen = storage
            .transaction(|tx| -> Result<u8, TestError> {
                let current = tx.get(b"\x01counter")?.unwrap()[0];
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    // Let the other writer commit over what we just read.
                    read_tx.send(()).unwrap();
                    written_rx.recv().unwrap();
                }
                tx.put(b"\x01counter".to_vec(), vec![current + 1]);
                Ok(current)
            })
            .unwrap();
        writer.join().unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(seen, 10);
        assert_eq!(storage.get(b"\x01counter").unwrap(), Some(vec![11]));
    }

    #[test]
    fn test_blind_writes_do_not_conflict() {
        let (_dir, storage) = open();
        storage.put(b"\x01k".to_vec(), b"old".to_vec()).unwrap();
        let mut runs = 0;
        storage
            .transaction(|tx| -> Result<(), TestError> {
                runs += 1;
                tx.put(b"\x01k".to_vec(), b"ours".to_vec());
                if runs == 1 {
                    storage.put(b"\x01k".to_vec(), b"theirs".to_vec())?;
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(runs, 1);
        assert_eq!(storage.get(b"\x01k").unwrap(), Some(b"ours".to_vec()));
    }

    // =========================================================================
    // Iteration and snapshots
    // =========================================================================

    #[test]
    fn test_iterate_is_ordered_and_bounded() {
        let (_dir, storage) = open();
        for key in [b"\x01c", b"\x01a", b"\x01b", b"\x02z"] {
            storage.put(key.to_vec(), b"v".to_vec()).unwrap();
        }
        let keys: Vec<Vec<u8>> = storage
            .iterate(b"\x01", b"\x02")
            .map(|entry| entry.unwrap().0)
            .collect();
        assert_eq!(keys, vec![b"\x01a".to_vec(), b"\x01b".to_vec(), b"\x01c".to_vec()]);
    }

    #[test]
    fn test_iterate_crosses_page_boundaries() {
        let (_dir, storage) = open();
        let total = RANGE_PAGE_SIZE * 2 + 7;
        let mut batch = WriteBatch::new();
        for i in 0..total {
            let mut key = vec![0x01];
            key.extend_from_slice(&(i as u32).to_be_bytes());
            batch.put(key, b"v".to_vec());
        }
        storage.write_batch(batch).unwrap();

        let count = storage.iterate(b"\x01", b"\x02").filter(|e| e.is_ok()).count();
        assert_eq!(count, total);
    }

    #[test]
    fn test_iterate_empty_range() {
        let (_dir, storage) = open();
        storage.put(b"\x01a".to_vec(), b"v".to_vec()).unwrap();
        assert_eq!(storage.iterate(b"\x02", b"\x01").count(), 0);
    }

    #[test]
    fn test_snapshot_isolated_from_later_writes() {
        let (_dir, storage) = open();
        storage.put(b"\x01a".to_vec(), b"old".to_vec()).unwrap();

        let snapshot = storage.snapshot();
        storage.put(b"\x01a".to_vec(), b"new".to_vec()).unwrap();
        storage.put(b"\x01b".to_vec(), b"added".to_vec()).unwrap();

        assert_eq!(snapshot.get(b"\x01a").unwrap(), Some(b"old".to_vec()));
        assert_eq!(snapshot.get(b"\x01b").unwrap(), None);
        assert_eq!(snapshot.iterate(b"\x01", b"\x02").count(), 1);

        assert_eq!(storage.get(b"\x01a").unwrap(), Some(b"new".to_vec()));
    }
}
