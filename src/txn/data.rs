//! Data transactions: thing graph reads and writes.
//!
//! Opening takes the database's data-read/schema-write lock in read mode
//! just long enough to pin the cached schema graph and take the KV snapshot,
//! so a schema commit that has returned is visible to every data transaction
//! opened afterwards. Commits never take the schema-write lock; conflicting
//! data writers are caught by the engine's optimistic validation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::database::Database;
use crate::error::KernelError;
use crate::graph::encoding::VertexId;
use crate::graph::thing_graph::ThingGraph;
use crate::graph::vertex::ThingVertexRecord;
use crate::graph::{Kind, Value};
use crate::kv::StorageError;
use crate::lattice;

use super::cache::SchemaCache;
use super::storage::TransactionStorage;
use super::{TransactionOptions, TransactionType, TxnCore};

pub(crate) struct DataTransactionInner {
    pub(crate) core: TxnCore,
    db: Arc<Database>,
    /// Pinned schema cache; the reference count keeps it alive for our
    /// lifetime even across a schema commit's eviction.
    schema: Arc<SchemaCache>,
    things: RwLock<ThingGraph>,
    /// Guard flag for the commit protocol; data transactions have no schema
    /// mutation surface, so this only trips on kernel bugs.
    schema_modified: AtomicBool,
}

/// A transaction over the thing graph. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct DataTransaction {
    inner: Arc<DataTransactionInner>,
}

impl DataTransaction {
    pub(crate) fn open(
        db: Arc<Database>,
        options: TransactionOptions,
    ) -> Result<Self, KernelError> {
        let writable = options.transaction_type.is_write();
        let (schema, storage) = {
            // Held only across cache pinning and snapshot acquisition; a
            // committing schema transaction drains us here.
            let _open_phase = db.data_read_schema_lock().read();
            let schema = db.borrow_cache(None)?;
            let storage = TransactionStorage::new(
                db.engine().begin(writable).map_err(KernelError::StorageFailure)?,
                writable,
            );
            (schema, storage)
        };

        let inner = Arc::new(DataTransactionInner {
            core: TxnCore::new(storage, options),
            db,
            schema,
            things: RwLock::new(ThingGraph::new()),
            schema_modified: AtomicBool::new(false),
        });
        tracing::debug!(tx = %inner.core.id, txn_type = %inner.core.txn_type, "data transaction opened");
        Ok(Self { inner })
    }

    pub(crate) fn inner_handle(&self) -> &Arc<DataTransactionInner> {
        &self.inner
    }

    /// Read or write intent.
    pub fn transaction_type(&self) -> TransactionType {
        self.inner.core.txn_type
    }

    /// Whether the transaction is still open.
    pub fn is_open(&self) -> bool {
        self.inner.core.is_open()
    }

    /// The configured options.
    pub fn options(&self) -> &TransactionOptions {
        &self.inner.core.options
    }

    /// When the transaction was opened.
    pub fn opened_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.inner.core.opened_at
    }

    /// The storage façade; fails once the transaction is closed.
    pub fn storage(&self) -> Result<TransactionStorage, KernelError> {
        Ok(self.inner.core.storage()?.clone())
    }

    /// The pinned schema cache.
    pub fn schema(&self) -> Result<&SchemaCache, KernelError> {
        self.inner.core.storage()?;
        Ok(&self.inner.schema)
    }

    fn check_writable(&self) -> Result<(), KernelError> {
        self.inner.core.storage()?;
        if self.inner.core.txn_type.is_read() {
            return Err(KernelError::StorageFailure(StorageError::ReadOnly));
        }
        Ok(())
    }

    fn next_thing_id(&self, kind: Kind) -> Result<VertexId, KernelError> {
        let storage = self.inner.core.storage()?.clone();
        self.inner.db.data_keys().next(kind, |prefix| storage.get_last(prefix))
    }

    /// Resolve a type by label through the pinned schema.
    pub fn type_by_label(&self, label: &str) -> Result<VertexId, KernelError> {
        self.schema()?
            .graph()
            .read()
            .by_label(label)
            .ok_or_else(|| KernelError::TypeNotFound { label: label.to_string() })
    }

    /// Visible attributes of a type through the pinned schema.
    pub fn type_attributes(&self, t: VertexId) -> Result<Vec<VertexId>, KernelError> {
        lattice::attributes(&self.schema()?.graph().read(), t).collect()
    }

    /// Visible keys of a type through the pinned schema.
    pub fn type_keys(&self, t: VertexId) -> Result<Vec<VertexId>, KernelError> {
        lattice::keys(&self.schema()?.graph().read(), t).collect()
    }

    /// Visible roles a type can play, through the pinned schema.
    pub fn type_plays(&self, t: VertexId) -> Result<Vec<VertexId>, KernelError> {
        lattice::plays(&self.schema()?.graph().read(), t).collect()
    }

    fn put_thing(
        &self,
        type_id: VertexId,
        expected: Kind,
        value: Option<Value>,
    ) -> Result<VertexId, KernelError> {
        self.check_writable()?;
        let type_kind = self.schema()?.graph().read().get(type_id)?.kind();
        if type_kind != expected {
            return Err(KernelError::IllegalCast {
                expected: expected.to_string(),
                actual: type_kind.to_string(),
            });
        }
        let instance_kind = expected
            .instance_kind()
            .ok_or_else(|| KernelError::internal(format!("no instance kind for {expected}")))?;
        let id = self.next_thing_id(instance_kind)?;
        self.inner.things.write().create(id, type_id, value)
    }

    /// Create an entity instance of `type_id`.
    pub fn put_entity(&self, type_id: VertexId) -> Result<VertexId, KernelError> {
        self.put_thing(type_id, Kind::EntityType, None)
    }

    /// Create a relation instance of `type_id`.
    pub fn put_relation(&self, type_id: VertexId) -> Result<VertexId, KernelError> {
        self.put_thing(type_id, Kind::RelationType, None)
    }

    /// Create an attribute instance carrying `value`, which must inhabit the
    /// type's declared value type.
    pub fn put_attribute(&self, type_id: VertexId, value: Value) -> Result<VertexId, KernelError> {
        self.check_writable()?;
        let declared = self.schema()?.graph().read().get(type_id)?.body.value_type;
        if declared != Some(value.value_type()) {
            return Err(KernelError::IllegalCast {
                expected: declared.map(|v| v.to_string()).unwrap_or_default(),
                actual: value.value_type().to_string(),
            });
        }
        self.put_thing(type_id, Kind::AttributeType, Some(value))
    }

    /// Attach an attribute instance to a thing.
    pub fn put_has(&self, owner: VertexId, attribute: VertexId) -> Result<(), KernelError> {
        self.check_writable()?;
        self.inner.things.write().put_has(owner, attribute);
        Ok(())
    }

    /// Record `player` playing `role_type` in `relation`; returns the
    /// repetition index assigned to the new role-player edge.
    pub fn put_role_player(
        &self,
        relation: VertexId,
        player: VertexId,
        role_type: VertexId,
    ) -> Result<u16, KernelError> {
        self.check_writable()?;
        let storage = self.inner.core.storage()?.clone();
        self.inner.things.write().put_role_player(&storage, relation, player, role_type, || {
            self.next_thing_id(Kind::Role)
        })
    }

    /// Resolve a thing vertex.
    pub fn get_thing(&self, id: VertexId) -> Result<Option<ThingVertexRecord>, KernelError> {
        let storage = self.inner.core.storage()?.clone();
        self.inner.things.read().get(&storage, id)
    }

    /// Attribute instances attached to `owner`.
    pub fn attributes_of(&self, owner: VertexId) -> Result<Vec<VertexId>, KernelError> {
        let storage = self.inner.core.storage()?.clone();
        self.inner.things.read().has(&storage, owner)
    }

    /// Role players of `relation` as `(player, role type, repetition)`.
    pub fn role_players(
        &self,
        relation: VertexId,
    ) -> Result<Vec<(VertexId, VertexId, u16)>, KernelError> {
        let storage = self.inner.core.storage()?.clone();
        self.inner.things.read().role_players(&storage, relation)
    }

    /// Direct instances of a type.
    pub fn instances(&self, type_id: VertexId) -> Result<Vec<VertexId>, KernelError> {
        let storage = self.inner.core.storage()?.clone();
        self.inner.things.read().instances(&storage, type_id)
    }

    /// Commit all thing mutations.
    ///
    /// One-shot: flips the transaction closed, validates buffered things
    /// against the pinned schema, flushes, and commits the KV transaction,
    /// relying on optimistic conflict detection against overlapping data
    /// writers. Whatever the outcome, the in-memory graph is cleared, the
    /// schema cache signalled and unpinned, and all resources closed.
    pub fn commit(&self) -> Result<(), KernelError> {
        if !self.inner.core.mark_closed() {
            return Err(KernelError::TransactionClosed);
        }

        let result = (|| {
            if self.inner.core.txn_type.is_read() {
                return Err(KernelError::IllegalCommit);
            }
            if self.inner.schema_modified.load(Ordering::Acquire) {
                return Err(KernelError::SessionDataViolation);
            }
            let storage = &self.inner.core.storage;
            storage.disable_indexing();
            let mut things = self.inner.things.write();
            if let Some(error) =
                things.validate(&self.inner.schema.graph().read()).into_iter().next()
            {
                return Err(error);
            }
            things.flush(storage)?;
            storage.commit().map_err(|e| {
                let _ = storage.rollback();
                e
            })
        })();

        self.inner.things.write().clear();
        self.inner.schema.may_refresh_storage();
        self.inner.core.storage.close();
        self.inner.schema.release();

        match &result {
            Ok(()) => tracing::debug!(tx = %self.inner.core.id, "data committed"),
            Err(e) => tracing::warn!(tx = %self.inner.core.id, error = %e, "data commit failed"),
        }
        result
    }

    /// Discard buffered mutations, leaving the transaction open for reads.
    pub fn rollback(&self) -> Result<(), KernelError> {
        let storage = self.inner.core.storage()?.clone();
        self.inner.things.write().clear();
        storage.rollback()?;
        tracing::debug!(tx = %self.inner.core.id, "data transaction rolled back");
        Ok(())
    }

    /// Close the transaction and release all resources. Idempotent.
    pub fn close(&self) {
        self.inner.close();
    }
}

impl DataTransactionInner {
    pub(crate) fn close(&self) {
        if self.core.mark_closed() {
            self.things.write().clear();
            self.core.storage.close();
            self.schema.release();
            tracing::debug!(tx = %self.core.id, "data transaction closed");
        }
    }
}

impl Drop for DataTransactionInner {
    fn drop(&mut self) {
        self.close();
    }
}
