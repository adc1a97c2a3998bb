//! In-memory reference engine.
//!
//! Committed state lives in an `Arc`'d `BTreeMap` that is swapped wholesale on
//! commit, so taking a snapshot is a pointer clone and readers are never
//! blocked by writers. Conflict detection is first-committer-wins: each commit
//! stamps its keys with a fresh engine version, and a later commit fails if
//! any of its *tracked* keys carries a stamp newer than the transaction's
//! snapshot version.
//!
//! The engine counts cursor creations so tests can observe cursor recycling
//! in the transaction layer.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::{get_last_upper_bound, prefix_scan_end, KvCursor, KvEngine, KvEntry, KvTransaction, StorageError};

/// Committed engine state. Swapped atomically under the engine lock.
struct Committed {
    data: Arc<BTreeMap<Vec<u8>, Vec<u8>>>,
    /// Version at which each key was last committed.
    stamps: BTreeMap<Vec<u8>, u64>,
    /// Monotonic commit counter.
    version: u64,
}

struct EngineState {
    committed: RwLock<Committed>,
    cursors_created: AtomicU64,
    cursors_live: AtomicI64,
}

/// Ordered in-memory KV engine with optimistic snapshot transactions.
#[derive(Clone)]
pub struct MemoryEngine {
    state: Arc<EngineState>,
}

impl MemoryEngine {
    /// Create an empty engine.
    pub fn new() -> Self {
        Self {
            state: Arc::new(EngineState {
                committed: RwLock::new(Committed {
                    data: Arc::new(BTreeMap::new()),
                    stamps: BTreeMap::new(),
                    version: 0,
                }),
                cursors_created: AtomicU64::new(0),
                cursors_live: AtomicI64::new(0),
            }),
        }
    }

    /// Total number of cursors ever created. A recycling transaction layer
    /// keeps this O(1) in the number of iterations.
    pub fn cursors_created(&self) -> u64 {
        self.state.cursors_created.load(Ordering::Acquire)
    }

    /// Number of cursors currently alive.
    pub fn cursors_live(&self) -> i64 {
        self.state.cursors_live.load(Ordering::Acquire)
    }

    /// Number of committed keys.
    pub fn len(&self) -> usize {
        self.state.committed.read().data.len()
    }

    /// Whether the committed state is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "memory")
    }
}

impl KvEngine for MemoryEngine {
    fn begin(&self, writable: bool) -> Result<Box<dyn KvTransaction>, StorageError> {
        let committed = self.state.committed.read();
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            snapshot: Arc::clone(&committed.data),
            base_version: committed.version,
            writes: BTreeMap::new(),
            writable,
            indexing: true,
            done: false,
        }))
    }
}

/// A buffered write. Tracked writes participate in conflict validation.
#[derive(Debug, Clone, PartialEq, Eq)]
enum WriteOp {
    Put { value: Vec<u8>, tracked: bool },
    Delete,
}

/// One optimistic transaction over [`MemoryEngine`].
pub struct MemoryTransaction {
    state: Arc<EngineState>,
    snapshot: Arc<BTreeMap<Vec<u8>, Vec<u8>>>,
    base_version: u64,
    writes: BTreeMap<Vec<u8>, WriteOp>,
    writable: bool,
    indexing: bool,
    done: bool,
}

impl MemoryTransaction {
    fn check_usable(&self) -> Result<(), StorageError> {
        if self.done {
            Err(StorageError::TransactionDone)
        } else {
            Ok(())
        }
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        self.check_usable()?;
        if self.writable {
            Ok(())
        } else {
            Err(StorageError::ReadOnly)
        }
    }

    /// The write buffer as seen by reads: populated only while the
    /// uncommitted read-index is enabled and the transaction is writable.
    fn read_buffer(&self) -> Option<&BTreeMap<Vec<u8>, WriteOp>> {
        (self.indexing && self.writable && !self.writes.is_empty()).then_some(&self.writes)
    }
}

impl KvTransaction for MemoryTransaction {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.check_usable()?;
        if let Some(buffer) = self.read_buffer() {
            match buffer.get(key) {
                Some(WriteOp::Put { value, .. }) => return Ok(Some(value.clone())),
                Some(WriteOp::Delete) => return Ok(None),
                None => {}
            }
        }
        Ok(self.snapshot.get(key).cloned())
    }

    fn get_last(&self, prefix: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.check_usable()?;
        let upper = get_last_upper_bound(prefix);
        let range = (Bound::Included(prefix.to_vec()), Bound::Excluded(upper));

        let buffered = self.read_buffer().and_then(|buffer| {
            buffer
                .range(range.clone())
                .rev()
                .find(|(_, op)| matches!(op, WriteOp::Put { .. }))
                .map(|(key, _)| key.clone())
        });
        let deleted =
            |key: &[u8]| matches!(self.read_buffer().and_then(|b| b.get(key)), Some(WriteOp::Delete));
        let committed = self
            .snapshot
            .range(range)
            .rev()
            .find(|(key, _)| !deleted(key))
            .map(|(key, _)| key.clone());

        Ok(match (buffered, committed) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        })
    }

    fn put(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), StorageError> {
        self.check_writable()?;
        self.writes.insert(key.to_vec(), WriteOp::Put { value, tracked: true });
        Ok(())
    }

    fn put_untracked(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), StorageError> {
        self.check_writable()?;
        self.writes.insert(key.to_vec(), WriteOp::Put { value, tracked: false });
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StorageError> {
        self.check_writable()?;
        self.writes.insert(key.to_vec(), WriteOp::Delete);
        Ok(())
    }

    fn cursor(&self, prefix: &[u8]) -> Result<Box<dyn KvCursor>, StorageError> {
        self.check_usable()?;
        self.state.cursors_created.fetch_add(1, Ordering::AcqRel);
        self.state.cursors_live.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(MemoryCursor {
            state: Arc::clone(&self.state),
            snapshot: Arc::clone(&self.snapshot),
            // Writable cursors capture the buffer as of creation; read-only
            // cursors carry none and are safe to pool across iterations.
            buffer: self.read_buffer().cloned(),
            prefix: prefix.to_vec(),
            end: prefix_scan_end(prefix),
            last: None,
        }))
    }

    fn disable_indexing(&mut self) {
        self.indexing = false;
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        self.check_writable()?;
        self.done = true;

        let mut committed = self.state.committed.write();
        for (key, op) in &self.writes {
            let tracked = match op {
                WriteOp::Put { tracked, .. } => *tracked,
                WriteOp::Delete => true,
            };
            if tracked {
                if let Some(stamp) = committed.stamps.get(key) {
                    if *stamp > self.base_version {
                        return Err(StorageError::Conflict);
                    }
                }
            }
        }

        committed.version += 1;
        let version = committed.version;
        let mut data = (*committed.data).clone();
        for (key, op) in std::mem::take(&mut self.writes) {
            match op {
                WriteOp::Put { value, .. } => {
                    data.insert(key.clone(), value);
                }
                WriteOp::Delete => {
                    data.remove(&key);
                }
            }
            committed.stamps.insert(key, version);
        }
        committed.data = Arc::new(data);
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StorageError> {
        // Callable even after a failed commit, so the kernel's
        // rollback-before-surface path never compounds the error.
        self.writes.clear();
        Ok(())
    }

    fn close(&mut self) {
        self.done = true;
        self.writes.clear();
    }
}

/// Lazily stepping cursor over a snapshot, with an optional captured write
/// buffer overlaid (buffer entries win on key ties, deletes hide entries).
struct MemoryCursor {
    state: Arc<EngineState>,
    snapshot: Arc<BTreeMap<Vec<u8>, Vec<u8>>>,
    buffer: Option<BTreeMap<Vec<u8>, WriteOp>>,
    prefix: Vec<u8>,
    end: Option<Vec<u8>>,
    last: Option<Vec<u8>>,
}

impl MemoryCursor {
    fn bounds(&self) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
        let lower = match &self.last {
            Some(key) => Bound::Excluded(key.clone()),
            None => Bound::Included(self.prefix.clone()),
        };
        let upper = match &self.end {
            Some(end) => Bound::Excluded(end.clone()),
            None => Bound::Unbounded,
        };
        (lower, upper)
    }
}

impl KvCursor for MemoryCursor {
    fn seek(&mut self, prefix: &[u8]) {
        self.end = prefix_scan_end(prefix);
        self.prefix = prefix.to_vec();
        self.last = None;
    }

    fn next_entry(&mut self) -> Result<Option<KvEntry>, StorageError> {
        loop {
            let range = self.bounds();
            let committed = self.snapshot.range(range.clone()).next();
            let buffered = self.buffer.as_ref().and_then(|b| b.range(range).next());

            let (key, value) = match (committed, buffered) {
                (None, None) => return Ok(None),
                (Some((key, value)), None) => (key.clone(), Some(value.clone())),
                (None, Some((key, op))) => (key.clone(), op_value(op)),
                (Some((ck, cv)), Some((bk, op))) => {
                    if bk <= ck {
                        (bk.clone(), op_value(op))
                    } else {
                        (ck.clone(), Some(cv.clone()))
                    }
                }
            };
            self.last = Some(key.clone());
            match value {
                Some(value) => return Ok(Some((key, value))),
                // Tombstone in the buffer hides the committed entry.
                None => continue,
            }
        }
    }
}

fn op_value(op: &WriteOp) -> Option<Vec<u8>> {
    match op {
        WriteOp::Put { value, .. } => Some(value.clone()),
        WriteOp::Delete => None,
    }
}

impl Drop for MemoryCursor {
    fn drop(&mut self) {
        self.state.cursors_live.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(tx: &mut Box<dyn KvTransaction>, key: &[u8], value: &[u8]) {
        tx.put(key, value.to_vec()).unwrap();
    }

    #[test]
    fn test_snapshot_isolation() {
        let engine = MemoryEngine::new();

        let mut writer = engine.begin(true).unwrap();
        put(&mut writer, b"a", b"1");

        let reader = engine.begin(false).unwrap();
        writer.commit().unwrap();

        // The reader's snapshot predates the commit.
        assert_eq!(reader.get(b"a").unwrap(), None);

        // A fresh transaction sees it.
        let fresh = engine.begin(false).unwrap();
        assert_eq!(fresh.get(b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn test_write_write_conflict() {
        let engine = MemoryEngine::new();

        let mut a = engine.begin(true).unwrap();
        let mut b = engine.begin(true).unwrap();
        put(&mut a, b"k", b"a");
        put(&mut b, b"k", b"b");

        a.commit().unwrap();
        assert!(matches!(b.commit(), Err(StorageError::Conflict)));
    }

    #[test]
    fn test_untracked_write_bypasses_conflict() {
        let engine = MemoryEngine::new();

        let mut a = engine.begin(true).unwrap();
        let mut b = engine.begin(true).unwrap();
        put(&mut a, b"k", b"a");
        b.put_untracked(b"k", b"b".to_vec()).unwrap();

        a.commit().unwrap();
        b.commit().unwrap();

        let fresh = engine.begin(false).unwrap();
        assert_eq!(fresh.get(b"k").unwrap(), Some(b"b".to_vec()));
    }

    #[test]
    fn test_reads_see_own_writes() {
        let engine = MemoryEngine::new();
        let mut tx = engine.begin(true).unwrap();
        put(&mut tx, b"x", b"1");
        assert_eq!(tx.get(b"x").unwrap(), Some(b"1".to_vec()));
        tx.delete(b"x").unwrap();
        assert_eq!(tx.get(b"x").unwrap(), None);
    }

    #[test]
    fn test_disable_indexing_hides_buffer() {
        let engine = MemoryEngine::new();
        let mut tx = engine.begin(true).unwrap();
        put(&mut tx, b"x", b"1");
        tx.disable_indexing();
        assert_eq!(tx.get(b"x").unwrap(), None);
        tx.commit().unwrap();
    }

    #[test]
    fn test_get_last_prefers_greatest_key() {
        let engine = MemoryEngine::new();
        let mut setup = engine.begin(true).unwrap();
        put(&mut setup, &[1, 1], b"a");
        put(&mut setup, &[1, 9], b"b");
        put(&mut setup, &[2, 0], b"c");
        setup.commit().unwrap();

        let tx = engine.begin(false).unwrap();
        assert_eq!(tx.get_last(&[1]).unwrap(), Some(vec![1, 9]));
        assert_eq!(tx.get_last(&[3]).unwrap(), None);
    }

    #[test]
    fn test_get_last_sees_buffered_and_deleted() {
        let engine = MemoryEngine::new();
        let mut setup = engine.begin(true).unwrap();
        put(&mut setup, &[1, 5], b"a");
        setup.commit().unwrap();

        let mut tx = engine.begin(true).unwrap();
        put(&mut tx, &[1, 7], b"b");
        assert_eq!(tx.get_last(&[1]).unwrap(), Some(vec![1, 7]));
        tx.delete(&[1, 7]).unwrap();
        tx.delete(&[1, 5]).unwrap();
        assert_eq!(tx.get_last(&[1]).unwrap(), None);
    }

    #[test]
    fn test_cursor_merges_buffer() {
        let engine = MemoryEngine::new();
        let mut setup = engine.begin(true).unwrap();
        put(&mut setup, &[1, 1], b"a");
        put(&mut setup, &[1, 3], b"c");
        setup.commit().unwrap();

        let mut tx = engine.begin(true).unwrap();
        put(&mut tx, &[1, 2], b"b");
        tx.delete(&[1, 3]).unwrap();
        put(&mut tx, &[1, 1], b"a2");

        let mut cursor = tx.cursor(&[1]).unwrap();
        let mut entries = Vec::new();
        while let Some(entry) = cursor.next_entry().unwrap() {
            entries.push(entry);
        }
        assert_eq!(
            entries,
            vec![
                (vec![1, 1], b"a2".to_vec()),
                (vec![1, 2], b"b".to_vec()),
            ]
        );
    }

    #[test]
    fn test_cursor_seek_restarts() {
        let engine = MemoryEngine::new();
        let mut setup = engine.begin(true).unwrap();
        put(&mut setup, &[1, 1], b"a");
        put(&mut setup, &[2, 1], b"b");
        setup.commit().unwrap();

        let tx = engine.begin(false).unwrap();
        let mut cursor = tx.cursor(&[1]).unwrap();
        assert_eq!(cursor.next_entry().unwrap(), Some((vec![1, 1], b"a".to_vec())));
        assert_eq!(cursor.next_entry().unwrap(), None);

        cursor.seek(&[2]);
        assert_eq!(cursor.next_entry().unwrap(), Some((vec![2, 1], b"b".to_vec())));
        assert_eq!(engine.cursors_created(), 1);
    }

    #[test]
    fn test_cursor_counters() {
        let engine = MemoryEngine::new();
        let tx = engine.begin(false).unwrap();
        {
            let _c1 = tx.cursor(&[1]).unwrap();
            let _c2 = tx.cursor(&[1]).unwrap();
            assert_eq!(engine.cursors_live(), 2);
        }
        assert_eq!(engine.cursors_live(), 0);
        assert_eq!(engine.cursors_created(), 2);
    }
}
