//! Transactions over the typed graph store.
//!
//! Two variants share one core: [`schema::SchemaTransaction`] mutates the
//! type lattice under the database's schema-write lock, and
//! [`data::DataTransaction`] mutates the thing graph against a pinned
//! schema cache. Both own a [`storage::TransactionStorage`] façade that
//! serialises KV access and recycles read cursors.

pub mod cache;
pub mod data;
pub mod iterator;
pub mod schema;
pub mod storage;

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::KernelError;
use crate::SCHEMA_GRAPH_STORAGE_REFRESH_RATE;

use self::storage::TransactionStorage;

/// Read or write intent, fixed at open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionType {
    /// Reads only; commit is illegal.
    Read,
    /// Buffered writes, committed optimistically.
    Write,
}

impl TransactionType {
    /// Whether this transaction may write.
    pub fn is_write(self) -> bool {
        matches!(self, Self::Write)
    }

    /// Whether this transaction is read-only.
    pub fn is_read(self) -> bool {
        matches!(self, Self::Read)
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
        }
    }
}

/// Per-transaction configuration.
///
/// `transaction_type` is required (via the constructors); the reasoner and
/// planner inputs (`explain`, `parallel`, `infer`, `trace_inference`) are
/// stored for downstream consumers and not acted upon by the kernel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionOptions {
    /// Read or write intent.
    pub transaction_type: TransactionType,
    /// Snapshot refresh cadence of the schema cache; meaningful for the
    /// read-only storage backing the cached schema graph.
    pub schema_refresh_rate: u64,
    /// Request reasoner explanations.
    pub explain: bool,
    /// Allow parallel query execution.
    pub parallel: bool,
    /// Enable rule inference.
    pub infer: bool,
    /// Trace inference for debugging.
    pub trace_inference: bool,
}

impl TransactionOptions {
    /// Options for a READ transaction.
    pub fn read() -> Self {
        Self {
            transaction_type: TransactionType::Read,
            schema_refresh_rate: SCHEMA_GRAPH_STORAGE_REFRESH_RATE,
            explain: false,
            parallel: false,
            infer: false,
            trace_inference: false,
        }
    }

    /// Options for a WRITE transaction.
    pub fn write() -> Self {
        Self { transaction_type: TransactionType::Write, ..Self::read() }
    }

    /// Override the schema cache refresh cadence.
    pub fn with_schema_refresh_rate(mut self, rate: u64) -> Self {
        self.schema_refresh_rate = rate;
        self
    }

    /// Enable rule inference.
    pub fn with_infer(mut self, infer: bool) -> Self {
        self.infer = infer;
        self
    }
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self::read()
    }
}

/// State shared by both transaction variants.
pub(crate) struct TxnCore {
    pub(crate) id: Uuid,
    pub(crate) txn_type: TransactionType,
    pub(crate) options: TransactionOptions,
    /// The one-shot commit/close flip. Distinct from the storage's own open
    /// flag: a commit flips this first, then keeps using storage internally.
    pub(crate) open: AtomicBool,
    pub(crate) storage: TransactionStorage,
    pub(crate) opened_at: DateTime<Utc>,
}

impl TxnCore {
    pub(crate) fn new(storage: TransactionStorage, options: TransactionOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            txn_type: options.transaction_type,
            options,
            open: AtomicBool::new(true),
            storage,
            opened_at: Utc::now(),
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// The storage façade, gated on the transaction being open.
    pub(crate) fn storage(&self) -> Result<&TransactionStorage, KernelError> {
        if self.is_open() {
            Ok(&self.storage)
        } else {
            Err(KernelError::TransactionClosed)
        }
    }

    /// Mark closed. Idempotent; returns whether this call did the flip.
    /// Every commit protocol opens with this: a `false` return rejects
    /// double commits and commits on closed transactions.
    pub(crate) fn mark_closed(&self) -> bool {
        self.open.swap(false, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_defaults() {
        let options = TransactionOptions::default();
        assert_eq!(options.transaction_type, TransactionType::Read);
        assert_eq!(options.schema_refresh_rate, SCHEMA_GRAPH_STORAGE_REFRESH_RATE);
        assert!(!options.infer);

        let write = TransactionOptions::write().with_infer(true);
        assert!(write.transaction_type.is_write());
        assert!(write.infer);
    }
}
