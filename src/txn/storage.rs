//! Per-transaction storage façade.
//!
//! Serialises all KV calls of one transaction through its read/write lock:
//! reads and iteration take the read side, writes take the write side, so a
//! worker pool sharing the transaction never observes mid-iteration
//! mutation. Any storage error closes the transaction before it surfaces.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::KernelError;
use crate::kv::{KvEngine, KvTransaction, StorageError};

use super::iterator::{CursorPool, IteratorRegistry, PrefixIterator};

struct StorageInner {
    kv: RwLock<Box<dyn KvTransaction>>,
    open: Arc<AtomicBool>,
    pool: Arc<CursorPool>,
    registry: IteratorRegistry,
}

impl StorageInner {
    fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            self.registry.close_all();
            self.pool.clear();
            self.kv.write().close();
        }
    }
}

/// The storage view of one transaction. Cheap to clone; all clones share the
/// same underlying KV transaction and lifecycle.
#[derive(Clone)]
pub struct TransactionStorage {
    inner: Arc<StorageInner>,
}

impl TransactionStorage {
    /// Wrap a freshly begun KV transaction.
    pub(crate) fn new(kv: Box<dyn KvTransaction>, writable: bool) -> Self {
        Self {
            inner: Arc::new(StorageInner {
                kv: RwLock::new(kv),
                open: Arc::new(AtomicBool::new(true)),
                // WRITE cursors observe the write buffer and cannot be
                // reused across operations.
                pool: Arc::new(CursorPool::new(!writable)),
                registry: IteratorRegistry::new(),
            }),
        }
    }

    /// Whether the underlying KV transaction is still usable.
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    fn check_open(&self) -> Result<(), KernelError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(KernelError::TransactionClosed)
        }
    }

    /// Close the transaction on failure, then surface the wrapped error.
    fn fatal<T>(&self, result: Result<T, StorageError>) -> Result<T, KernelError> {
        result.map_err(|e| {
            tracing::warn!(error = %e, "storage failure, closing transaction");
            self.inner.close();
            KernelError::StorageFailure(e)
        })
    }

    /// Read a key under the read lock.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KernelError> {
        self.check_open()?;
        let result = self.inner.kv.read().get(key);
        self.fatal(result)
    }

    /// Greatest key under `prefix`, read under the read lock. The engine's
    /// reverse seek honours the incremented-last-byte bound contract.
    pub fn get_last(&self, prefix: &[u8]) -> Result<Option<Vec<u8>>, KernelError> {
        self.check_open()?;
        let result = self.inner.kv.read().get_last(prefix);
        self.fatal(result)
    }

    /// Buffer a tracked write under the write lock.
    pub fn put(&self, key: &[u8], value: Vec<u8>) -> Result<(), KernelError> {
        self.check_open()?;
        let result = self.inner.kv.write().put(key, value);
        self.fatal(result)
    }

    /// Buffer an untracked write under the write lock.
    pub fn put_untracked(&self, key: &[u8], value: Vec<u8>) -> Result<(), KernelError> {
        self.check_open()?;
        let result = self.inner.kv.write().put_untracked(key, value);
        self.fatal(result)
    }

    /// Buffer a tracked delete under the write lock.
    pub fn delete(&self, key: &[u8]) -> Result<(), KernelError> {
        self.check_open()?;
        let result = self.inner.kv.write().delete(key);
        self.fatal(result)
    }

    /// Open a registered prefix iterator, reusing a pooled cursor when the
    /// transaction is read-only.
    pub fn iterate(&self, prefix: &[u8]) -> Result<PrefixIterator, KernelError> {
        self.check_open()?;
        let cursor = match self.inner.pool.take() {
            Some(mut cursor) => {
                cursor.seek(prefix);
                cursor
            }
            None => {
                let result = self.inner.kv.read().cursor(prefix);
                self.fatal(result)?
            }
        };
        let inner = Arc::clone(&self.inner);
        Ok(PrefixIterator::new(
            cursor,
            Arc::clone(&self.inner.pool),
            &self.inner.registry,
            Arc::clone(&self.inner.open),
            Arc::new(move || inner.close()),
        ))
    }

    /// Forward the pre-commit indexing hint.
    pub fn disable_indexing(&self) {
        if self.is_open() {
            self.inner.kv.write().disable_indexing();
        }
    }

    /// Commit the KV transaction. Does not close; the transaction layer owns
    /// the rollback-and-close sequencing around commit failure.
    pub fn commit(&self) -> Result<(), KernelError> {
        self.check_open()?;
        self.inner.kv.write().commit().map_err(KernelError::StorageFailure)
    }

    /// Discard buffered writes, leaving the transaction open for reads.
    pub fn rollback(&self) -> Result<(), KernelError> {
        self.check_open()?;
        let result = self.inner.kv.write().rollback();
        self.fatal(result)
    }

    /// Replace the underlying KV transaction with a fresh read-only snapshot.
    /// The old transaction is closed only after the new one is in place, so
    /// concurrent readers never observe a gap.
    pub fn replace_snapshot(&self, engine: &dyn KvEngine) -> Result<(), KernelError> {
        self.check_open()?;
        let fresh = engine.begin(false).map_err(KernelError::StorageFailure)?;
        let mut old = std::mem::replace(&mut *self.inner.kv.write(), fresh);
        old.close();
        tracing::debug!("storage snapshot refreshed");
        Ok(())
    }

    /// Close all iterators, drop pooled cursors, and release the KV
    /// transaction. Idempotent.
    pub fn close(&self) {
        self.inner.close();
    }
}
