//! Ordered key-value adapter.
//!
//! The kernel does not mandate a specific KV engine. Any engine offering
//! ordered byte keys, prefix iteration, and optimistic transactions with a
//! snapshot read view can sit behind [`KvEngine`]. Keys and values are opaque
//! byte strings compared lexicographically; the encoding layer
//! ([`crate::graph::encoding`]) guarantees the prefix-structure requirements
//! documented on the individual operations.
//!
//! [`memory::MemoryEngine`] is the bundled reference engine, used by the test
//! suite and suitable for embedding where durability is not required.

pub mod memory;

pub use memory::MemoryEngine;

/// Engine-level error. Converted to
/// [`KernelError::StorageFailure`](crate::KernelError::StorageFailure) at the
/// transaction façade.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    /// Optimistic write-write conflict detected at commit.
    #[error("write conflict: a concurrent transaction committed to a tracked key")]
    Conflict,

    /// The KV transaction was used after commit, rollback, or close.
    #[error("the storage transaction is no longer usable")]
    TransactionDone,

    /// A write was attempted through a read-only transaction.
    #[error("the storage transaction is read-only")]
    ReadOnly,

    /// A persisted record failed to decode.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// A key-value pair yielded by prefix iteration.
pub type KvEntry = (Vec<u8>, Vec<u8>);

/// An ordered KV engine with optimistic snapshot transactions.
///
/// Implementations are shared behind `Arc` and must tolerate concurrent
/// `begin` calls. Transaction handles themselves are used through the
/// kernel's per-transaction read/write lock and need not be `Sync`.
pub trait KvEngine: Send + Sync {
    /// Begin a transaction. The snapshot is taken at call time; subsequent
    /// reads through the returned transaction observe exactly that snapshot
    /// plus the transaction's own buffered writes.
    fn begin(&self, writable: bool) -> Result<Box<dyn KvTransaction>, StorageError>;
}

/// A single optimistic transaction over a [`KvEngine`].
///
/// Writes are buffered and validated for conflicts at `commit`. Reads of keys
/// written earlier in the same transaction return the buffered value, unless
/// indexing of the write buffer has been disabled via [`disable_indexing`].
///
/// [`disable_indexing`]: KvTransaction::disable_indexing
pub trait KvTransaction: Send {
    /// Get the value for `key`, or `None` if absent.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// Return the lexicographically greatest key with the given prefix, or
    /// `None` if no key carries it.
    ///
    /// Implemented by seeking to the first key strictly above `prefix` with
    /// its last byte incremented, then stepping back. The last byte of
    /// `prefix` must be strictly less than `0xFF`; the encoding layer
    /// guarantees this and implementations may `debug_assert!` it rather
    /// than enforce it.
    fn get_last(&self, prefix: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// Buffer a write of `key -> value`, tracked for conflict validation.
    fn put(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), StorageError>;

    /// Buffer a write that bypasses optimistic conflict validation.
    fn put_untracked(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), StorageError>;

    /// Buffer a tracked delete of `key`.
    fn delete(&mut self, key: &[u8]) -> Result<(), StorageError>;

    /// Open a cursor positioned at the start of `prefix`. Entries are yielded
    /// in lexicographic key order; iteration ends at the first key without
    /// the prefix.
    fn cursor(&self, prefix: &[u8]) -> Result<Box<dyn KvCursor>, StorageError>;

    /// Hint that no further reads will consult the write buffer. Called
    /// immediately before commit of a write-only transaction so the engine
    /// can skip building the uncommitted read-index. Engines without such an
    /// index ignore the call.
    fn disable_indexing(&mut self);

    /// Validate tracked writes against concurrently committed state and, on
    /// success, apply the buffer atomically. One-shot.
    fn commit(&mut self) -> Result<(), StorageError>;

    /// Discard all buffered writes. The transaction remains usable for reads.
    fn rollback(&mut self) -> Result<(), StorageError>;

    /// Release the snapshot and all engine-side resources. Idempotent.
    fn close(&mut self);
}

/// A restartable cursor over a key prefix.
///
/// Cursors from read-only transactions are detachable from the transaction's
/// write buffer and are pooled by the kernel: [`seek`](KvCursor::seek)
/// repositions a pooled cursor on a new prefix without re-creating it.
/// Cursors from writable transactions capture the write buffer as of cursor
/// creation and are never pooled.
pub trait KvCursor: Send {
    /// Reposition at the start of `prefix`, restarting iteration.
    fn seek(&mut self, prefix: &[u8]);

    /// Yield the next entry under the current prefix, or `None` when
    /// exhausted.
    fn next_entry(&mut self) -> Result<Option<KvEntry>, StorageError>;
}

/// Compute the exclusive upper bound for `get_last`: `prefix` with its final
/// byte incremented.
///
/// Precondition (guaranteed by the encoding layer): `prefix` is non-empty and
/// its last byte is strictly less than `0xFF`.
pub(crate) fn get_last_upper_bound(prefix: &[u8]) -> Vec<u8> {
    debug_assert!(
        prefix.last().is_some_and(|b| *b < 0xFF),
        "get_last requires a non-empty prefix ending below 0xFF"
    );
    let mut bound = prefix.to_vec();
    if let Some(last) = bound.last_mut() {
        *last += 1;
    }
    bound
}

/// Compute the exclusive upper bound for a general prefix scan, tolerating
/// trailing `0xFF` bytes. `None` means the scan is unbounded above.
pub(crate) fn prefix_scan_end(prefix: &[u8]) -> Option<Vec<u8>> {
    prefix.iter().rposition(|b| *b != 0xFF).map(|i| {
        prefix
            .iter()
            .take(i)
            .copied()
            .chain(std::iter::once(prefix[i] + 1))
            .collect()
    })
}
