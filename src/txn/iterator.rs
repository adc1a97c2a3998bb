//! Iterator lifecycle: registration, closure, cursor recycling.
//!
//! Every iterator handed out by a transaction is registered so closing the
//! transaction closes all of them. Cursors drained by READ transactions are
//! pushed into a recycled pool and reused by later iterations via `seek`;
//! WRITE cursors see the transaction's write buffer as of creation and are
//! never pooled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::KernelError;
use crate::kv::{KvCursor, KvEntry};

/// Unbounded concurrent pool of detached cursors. Disabled for WRITE
/// transactions.
pub(crate) struct CursorPool {
    recycled: Mutex<Vec<Box<dyn KvCursor>>>,
    enabled: bool,
}

impl CursorPool {
    pub(crate) fn new(enabled: bool) -> Self {
        Self { recycled: Mutex::new(Vec::new()), enabled }
    }

    /// Take a pooled cursor, if any.
    pub(crate) fn take(&self) -> Option<Box<dyn KvCursor>> {
        self.enabled.then(|| self.recycled.lock().pop()).flatten()
    }

    /// Return a cursor to the pool; dropped outright when pooling is off.
    pub(crate) fn give(&self, cursor: Box<dyn KvCursor>) {
        if self.enabled {
            self.recycled.lock().push(cursor);
        }
    }

    /// Drop all pooled cursors. Called en masse on transaction close.
    pub(crate) fn clear(&self) {
        self.recycled.lock().clear();
    }
}

/// The cursor slot shared between an iterator handle and the registry.
/// Taking the cursor out closes the iterator.
struct IteratorSlot {
    cursor: Mutex<Option<Box<dyn KvCursor>>>,
}

/// Registry of live iterators, held weakly so dropped iterators vanish.
pub(crate) struct IteratorRegistry {
    live: Mutex<Vec<Weak<IteratorSlot>>>,
}

impl IteratorRegistry {
    pub(crate) fn new() -> Self {
        Self { live: Mutex::new(Vec::new()) }
    }

    fn register(&self, slot: &Arc<IteratorSlot>) {
        let mut live = self.live.lock();
        live.retain(|weak| weak.strong_count() > 0);
        live.push(Arc::downgrade(slot));
    }

    /// Close every live iterator by stealing its cursor. In-flight `next`
    /// calls may still yield one element they had already fetched.
    pub(crate) fn close_all(&self) {
        for weak in self.live.lock().drain(..) {
            if let Some(slot) = weak.upgrade() {
                slot.cursor.lock().take();
            }
        }
    }
}

/// A registered prefix iterator over a transaction's storage view.
///
/// Yields entries in lexicographic key order. After the transaction (or the
/// iterator itself) is closed, every call yields
/// [`KernelError::TransactionClosed`].
pub struct PrefixIterator {
    slot: Arc<IteratorSlot>,
    pool: Arc<CursorPool>,
    tx_open: Arc<AtomicBool>,
    /// Closes the owning transaction on a storage error.
    on_fatal: Arc<dyn Fn()>,
    /// Naturally exhausted, as opposed to closed from outside.
    drained: bool,
}

impl PrefixIterator {
    pub(crate) fn new(
        cursor: Box<dyn KvCursor>,
        pool: Arc<CursorPool>,
        registry: &IteratorRegistry,
        tx_open: Arc<AtomicBool>,
        on_fatal: Arc<dyn Fn()>,
    ) -> Self {
        let slot = Arc::new(IteratorSlot { cursor: Mutex::new(Some(cursor)) });
        registry.register(&slot);
        Self { slot, pool, tx_open, on_fatal, drained: false }
    }

    /// Close this iterator, recycling its cursor when the transaction is a
    /// READ transaction. Dropping the iterator has the same effect.
    pub fn close(&mut self) {
        if let Some(cursor) = self.slot.cursor.lock().take() {
            if self.tx_open.load(Ordering::Acquire) {
                self.pool.give(cursor);
            }
        }
    }
}

impl Iterator for PrefixIterator {
    type Item = Result<KvEntry, KernelError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.drained {
            return None;
        }
        if !self.tx_open.load(Ordering::Acquire) {
            return Some(Err(KernelError::TransactionClosed));
        }
        let mut guard = self.slot.cursor.lock();
        let Some(cursor) = guard.as_mut() else {
            return Some(Err(KernelError::TransactionClosed));
        };
        match cursor.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                // Drained: recycle the cursor immediately.
                self.drained = true;
                if let Some(cursor) = guard.take() {
                    drop(guard);
                    self.pool.give(cursor);
                }
                None
            }
            Err(e) => {
                guard.take();
                drop(guard);
                (self.on_fatal)();
                Some(Err(KernelError::StorageFailure(e)))
            }
        }
    }
}

impl Drop for PrefixIterator {
    fn drop(&mut self) {
        self.close();
    }
}
