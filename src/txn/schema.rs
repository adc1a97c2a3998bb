//! Schema transactions: type lattice reads and writes.
//!
//! A WRITE schema transaction owns a private [`SchemaCache`] loaded through
//! its own writable storage; its commit drains data-transaction opens by
//! taking the database's data-read/schema-write lock, then evicts the
//! database-level cache so the next borrower reloads the committed schema.
//! A READ schema transaction borrows the database cache instead, so data
//! commits can roll its snapshot forward via `may_refresh_storage`.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::database::Database;
use crate::error::KernelError;
use crate::graph::encoding::VertexId;
use crate::graph::schema_graph::SchemaGraph;
use crate::graph::thing_graph::ThingGraph;
use crate::graph::{Kind, ValueType};
use crate::kv::StorageError;
use crate::lattice;

use super::cache::SchemaCache;
use super::storage::TransactionStorage;
use super::{TransactionOptions, TransactionType, TxnCore};

pub(crate) struct SchemaTransactionInner {
    pub(crate) core: TxnCore,
    db: Arc<Database>,
    cache: Arc<SchemaCache>,
    things: RwLock<ThingGraph>,
    /// WRITE transactions own their cache and storage; READ transactions
    /// borrow the database cache and must not close its backing storage.
    owns_storage: bool,
}

/// A transaction over the schema graph. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SchemaTransaction {
    inner: Arc<SchemaTransactionInner>,
}

impl SchemaTransaction {
    pub(crate) fn open(
        db: Arc<Database>,
        options: TransactionOptions,
    ) -> Result<Self, KernelError> {
        let writable = options.transaction_type.is_write();
        let (cache, storage, owns_storage) = if writable {
            let storage = TransactionStorage::new(
                db.engine().begin(true).map_err(KernelError::StorageFailure)?,
                true,
            );
            let cache =
                SchemaCache::new(db.engine(), storage.clone(), options.schema_refresh_rate)?;
            (cache, storage, true)
        } else {
            let cache = db.borrow_cache(Some(options.schema_refresh_rate))?;
            let storage = cache.storage().clone();
            (cache, storage, false)
        };

        let inner = Arc::new(SchemaTransactionInner {
            core: TxnCore::new(storage, options),
            db,
            cache,
            things: RwLock::new(ThingGraph::new()),
            owns_storage,
        });
        tracing::debug!(tx = %inner.core.id, txn_type = %inner.core.txn_type, "schema transaction opened");
        Ok(Self { inner })
    }

    pub(crate) fn inner_handle(&self) -> &Arc<SchemaTransactionInner> {
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

    fn graph(&self) -> Result<&RwLock<SchemaGraph>, KernelError> {
        self.inner.core.storage()?;
        Ok(self.inner.cache.graph())
    }

    /// Run a lattice mutation under the graph write lock. Rejected on READ
    /// transactions so the shared cache graph can never be dirtied.
    fn mutate<T>(
        &self,
        op: impl FnOnce(&mut SchemaGraph) -> Result<T, KernelError>,
    ) -> Result<T, KernelError> {
        if self.inner.core.txn_type.is_read() {
            return Err(KernelError::StorageFailure(StorageError::ReadOnly));
        }
        op(&mut self.graph()?.write())
    }

    fn next_type_id(&self, kind: Kind) -> Result<VertexId, KernelError> {
        let storage = self.inner.core.storage()?.clone();
        self.inner.db.schema_keys().next(kind, |prefix| storage.get_last(prefix))
    }

    /// Create an entity type under the entity root.
    pub fn put_entity_type(&self, label: &str) -> Result<VertexId, KernelError> {
        let id = self.next_type_id(Kind::EntityType)?;
        self.mutate(|graph| lattice::define_type(graph, id, label, None))
    }

    /// Create a relation type under the relation root.
    pub fn put_relation_type(&self, label: &str) -> Result<VertexId, KernelError> {
        let id = self.next_type_id(Kind::RelationType)?;
        self.mutate(|graph| lattice::define_type(graph, id, label, None))
    }

    /// Create an attribute type with a fixed value type.
    pub fn put_attribute_type(
        &self,
        label: &str,
        value_type: ValueType,
    ) -> Result<VertexId, KernelError> {
        let id = self.next_type_id(Kind::AttributeType)?;
        self.mutate(|graph| lattice::define_type(graph, id, label, Some(value_type)))
    }

    /// Declare a role on a relation type, creating the role type.
    pub fn put_relates(&self, relation: VertexId, role_label: &str) -> Result<VertexId, KernelError> {
        let id = self.next_type_id(Kind::RoleType)?;
        self.mutate(|graph| lattice::set_relates(graph, relation, id, role_label))
    }

    /// Resolve a type by label.
    pub fn type_by_label(&self, label: &str) -> Result<VertexId, KernelError> {
        self.graph()?
            .read()
            .by_label(label)
            .ok_or_else(|| KernelError::TypeNotFound { label: label.to_string() })
    }

    /// The label of a type.
    pub fn label(&self, t: VertexId) -> Result<String, KernelError> {
        Ok(self.graph()?.read().get(t)?.body.label.clone())
    }

    /// The root type of a kind.
    pub fn root(&self, kind: Kind) -> Result<VertexId, KernelError> {
        self.graph()?.read().root(kind)
    }

    /// Re-parent a type.
    pub fn set_supertype(&self, t: VertexId, parent: VertexId) -> Result<(), KernelError> {
        self.mutate(|graph| lattice::set_supertype(graph, t, parent))
    }

    /// Set or clear the abstract flag.
    pub fn set_abstract(&self, t: VertexId, is_abstract: bool) -> Result<(), KernelError> {
        self.mutate(|graph| lattice::set_abstract(graph, t, is_abstract))
    }

    /// Re-label a type.
    pub fn set_label(&self, t: VertexId, label: &str) -> Result<(), KernelError> {
        self.mutate(|graph| lattice::set_label(graph, t, label))
    }

    /// Declare a key attribute, optionally overriding an inherited one.
    pub fn set_key(
        &self,
        t: VertexId,
        attr: VertexId,
        overridden: Option<VertexId>,
    ) -> Result<(), KernelError> {
        self.mutate(|graph| lattice::set_key(graph, t, attr, overridden))
    }

    /// Declare a plain attribute, optionally overriding an inherited one.
    pub fn set_has(
        &self,
        t: VertexId,
        attr: VertexId,
        overridden: Option<VertexId>,
    ) -> Result<(), KernelError> {
        self.mutate(|graph| lattice::set_has(graph, t, attr, overridden))
    }

    /// Declare a playable role, optionally overriding an inherited one.
    pub fn set_plays(
        &self,
        t: VertexId,
        role: VertexId,
        overridden: Option<VertexId>,
    ) -> Result<(), KernelError> {
        self.mutate(|graph| lattice::set_plays(graph, t, role, overridden))
    }

    /// Remove a declared key.
    pub fn unset_key(&self, t: VertexId, attr: VertexId) -> Result<(), KernelError> {
        self.mutate(|graph| lattice::unset_key(graph, t, attr))
    }

    /// Remove a declared attribute ownership.
    pub fn unset_has(&self, t: VertexId, attr: VertexId) -> Result<(), KernelError> {
        self.mutate(|graph| lattice::unset_has(graph, t, attr))
    }

    /// Remove a declared role capability.
    pub fn unset_plays(&self, t: VertexId, role: VertexId) -> Result<(), KernelError> {
        self.mutate(|graph| lattice::unset_plays(graph, t, role))
    }

    /// Remove a declared role from a relation type. The role type itself
    /// survives; drop it with [`delete_type`](Self::delete_type).
    pub fn unset_relates(&self, relation: VertexId, role: VertexId) -> Result<(), KernelError> {
        self.mutate(|graph| lattice::unset_relates(graph, relation, role))
    }

    /// Delete a type with no subtypes and no instances in its subtree.
    pub fn delete_type(&self, t: VertexId) -> Result<(), KernelError> {
        let storage = self.inner.core.storage()?.clone();
        let things = &self.inner.things;
        self.mutate(|graph| {
            lattice::delete_type(graph, t, |id| things.read().has_instances(&storage, id))
        })
    }

    /// Visible keys of a type, declared first, nearest ancestors next.
    pub fn keys(&self, t: VertexId) -> Result<Vec<VertexId>, KernelError> {
        lattice::keys(&self.graph()?.read(), t).collect()
    }

    /// Visible attributes of a type (keys included).
    pub fn attributes(&self, t: VertexId) -> Result<Vec<VertexId>, KernelError> {
        lattice::attributes(&self.graph()?.read(), t).collect()
    }

    /// Visible attributes of a type filtered by value type.
    pub fn attributes_with_value_type(
        &self,
        t: VertexId,
        value_type: ValueType,
    ) -> Result<Vec<VertexId>, KernelError> {
        lattice::attributes_with_value_type(&self.graph()?.read(), t, value_type).collect()
    }

    /// Visible keys of a type filtered by value type.
    pub fn keys_with_value_type(
        &self,
        t: VertexId,
        value_type: ValueType,
    ) -> Result<Vec<VertexId>, KernelError> {
        lattice::keys_with_value_type(&self.graph()?.read(), t, value_type).collect()
    }

    /// Visible roles a type can play.
    pub fn plays(&self, t: VertexId) -> Result<Vec<VertexId>, KernelError> {
        lattice::plays(&self.graph()?.read(), t).collect()
    }

    /// Roles declared on a relation type.
    pub fn relates(&self, relation: VertexId) -> Result<Vec<VertexId>, KernelError> {
        lattice::relates(&self.graph()?.read(), relation)
    }

    /// Proper supertypes of a type, nearest first.
    pub fn supertypes(&self, t: VertexId) -> Result<Vec<VertexId>, KernelError> {
        lattice::supertypes(&self.graph()?.read(), t)
    }

    /// Proper subtypes of a type.
    pub fn subtypes(&self, t: VertexId) -> Result<Vec<VertexId>, KernelError> {
        lattice::subtypes(&self.graph()?.read(), t)
    }

    /// Validate the whole lattice, collecting every violation.
    pub fn validate(&self) -> Result<Vec<KernelError>, KernelError> {
        Ok(lattice::validate_all(&self.graph()?.read()))
    }

    /// Commit all schema mutations.
    ///
    /// One-shot: flips the transaction closed, validates, flushes the graph,
    /// takes the database's schema-write lock to drain data-transaction
    /// opens, and commits the KV transaction. Whatever the outcome, the
    /// database cache is evicted, the lock released, the in-memory graphs
    /// cleared, and all resources closed.
    pub fn commit(&self) -> Result<(), KernelError> {
        if !self.inner.core.mark_closed() {
            return Err(KernelError::TransactionClosed);
        }

        let mut schema_guard = None;
        let result = (|| {
            if self.inner.core.txn_type.is_read() {
                return Err(KernelError::IllegalCommit);
            }
            if self.inner.things.read().is_modified() {
                return Err(KernelError::SessionSchemaViolation);
            }
            let storage = &self.inner.core.storage;
            storage.disable_indexing();

            let graph = self.inner.cache.graph();
            if let Some(error) = lattice::validate_all(&graph.read()).into_iter().next() {
                return Err(error);
            }
            graph.write().flush(storage)?;

            // Drains all data transactions out of their open phase, so every
            // data transaction begun after we return sees this schema.
            schema_guard = Some(self.inner.db.data_read_schema_lock().write());
            storage.commit().map_err(|e| {
                let _ = storage.rollback();
                e
            })
        })();

        self.inner.db.evict_cache();
        drop(schema_guard);
        if self.inner.owns_storage {
            // A borrowed cache graph stays intact for its other holders.
            *self.inner.cache.graph().write() = SchemaGraph::new();
        }
        self.inner.things.write().clear();
        self.release_resources();

        match &result {
            Ok(()) => tracing::info!(tx = %self.inner.core.id, "schema committed"),
            Err(e) => {
                tracing::warn!(tx = %self.inner.core.id, error = %e, "schema commit failed")
            }
        }
        result
    }

    /// Discard buffered mutations, leaving the transaction open for reads.
    pub fn rollback(&self) -> Result<(), KernelError> {
        let storage = self.inner.core.storage()?.clone();
        storage.rollback()?;
        if self.inner.core.txn_type.is_write() {
            *self.inner.cache.graph().write() = SchemaGraph::load(&storage)?;
        }
        self.inner.things.write().clear();
        tracing::debug!(tx = %self.inner.core.id, "schema transaction rolled back");
        Ok(())
    }

    /// Close the transaction and release all resources. Idempotent.
    pub fn close(&self) {
        self.inner.close();
    }

    fn release_resources(&self) {
        self.inner.release_resources();
    }
}

impl SchemaTransactionInner {
    pub(crate) fn close(&self) {
        if self.core.mark_closed() {
            self.release_resources();
            tracing::debug!(tx = %self.core.id, "schema transaction closed");
        }
    }

    fn release_resources(&self) {
        if self.owns_storage {
            self.core.storage.close();
        } else {
            // Borrowed database cache: unpin, never close shared storage.
            self.cache.release();
        }
    }
}

impl Drop for SchemaTransactionInner {
    fn drop(&mut self) {
        self.close();
    }
}
