//! Sessions: schema or data, producing matching transactions.
//!
//! A session borrows its database and tracks the transactions it produced
//! through weak references, so closing the session closes whatever is still
//! alive without keeping finished transactions around.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::database::Database;
use crate::error::KernelError;
use crate::txn::data::DataTransaction;
use crate::txn::schema::SchemaTransaction;
use crate::txn::TransactionOptions;

/// Session kind; transactions match it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionType {
    /// Produces [`SchemaTransaction`]s.
    Schema,
    /// Produces [`DataTransaction`]s.
    Data,
}

impl std::fmt::Display for SessionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Schema => write!(f, "schema"),
            Self::Data => write!(f, "data"),
        }
    }
}

struct SessionState<T> {
    db: Arc<Database>,
    id: Uuid,
    opened_at: DateTime<Utc>,
    open: AtomicBool,
    transactions: Mutex<Vec<Weak<T>>>,
}

impl<T> SessionState<T> {
    fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            id: Uuid::new_v4(),
            opened_at: Utc::now(),
            open: AtomicBool::new(true),
            transactions: Mutex::new(Vec::new()),
        }
    }

    fn check_open(&self) -> Result<(), KernelError> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(KernelError::SessionClosed)
        }
    }

    fn register(&self, inner: &Arc<T>) {
        let mut transactions = self.transactions.lock();
        transactions.retain(|weak| weak.strong_count() > 0);
        transactions.push(Arc::downgrade(inner));
    }

    fn drain(&self) -> Vec<Arc<T>> {
        self.transactions.lock().drain(..).filter_map(|weak| weak.upgrade()).collect()
    }
}

/// A session producing schema transactions.
pub struct SchemaSession {
    state: SessionState<crate::txn::schema::SchemaTransactionInner>,
}

impl SchemaSession {
    pub(crate) fn new(db: Arc<Database>) -> Self {
        let state = SessionState::new(db);
        tracing::debug!(session = %state.id, opened_at = %state.opened_at, "schema session opened");
        Self { state }
    }

    /// The session id.
    pub fn id(&self) -> Uuid {
        self.state.id
    }

    /// Open a transaction under this session.
    pub fn transaction(&self, options: TransactionOptions) -> Result<SchemaTransaction, KernelError> {
        self.state.check_open()?;
        let tx = SchemaTransaction::open(Arc::clone(&self.state.db), options)?;
        self.state.register(tx.inner_handle());
        Ok(tx)
    }

    /// Close the session and every transaction still live under it.
    pub fn close(&self) {
        if self.state.open.swap(false, Ordering::AcqRel) {
            for inner in self.state.drain() {
                inner.close();
            }
            tracing::debug!(session = %self.state.id, "schema session closed");
        }
    }
}

impl Drop for SchemaSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// A session producing data transactions.
pub struct DataSession {
    state: SessionState<crate::txn::data::DataTransactionInner>,
}

impl DataSession {
    pub(crate) fn new(db: Arc<Database>) -> Self {
        let state = SessionState::new(db);
        tracing::debug!(session = %state.id, opened_at = %state.opened_at, "data session opened");
        Self { state }
    }

    /// The session id.
    pub fn id(&self) -> Uuid {
        self.state.id
    }

    /// Open a transaction under this session.
    pub fn transaction(&self, options: TransactionOptions) -> Result<DataTransaction, KernelError> {
        self.state.check_open()?;
        let tx = DataTransaction::open(Arc::clone(&self.state.db), options)?;
        self.state.register(tx.inner_handle());
        Ok(tx)
    }

    /// Close the session and every transaction still live under it.
    pub fn close(&self) {
        if self.state.open.swap(false, Ordering::AcqRel) {
            for inner in self.state.drain() {
                inner.close();
            }
            tracing::debug!(session = %self.state.id, "data session closed");
        }
    }
}

impl Drop for DataSession {
    fn drop(&mut self) {
        self.close();
    }
}
