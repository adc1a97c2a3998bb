//! The database: engine ownership, schema cache, cross-transaction locks.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::KernelError;
use crate::graph::encoding::KeyGenerator;
use crate::graph::schema_graph::SchemaGraph;
use crate::kv::{KvEngine, MemoryEngine};
use crate::session::{DataSession, SchemaSession};
use crate::txn::cache::SchemaCache;
use crate::txn::storage::TransactionStorage;
use crate::SCHEMA_GRAPH_STORAGE_REFRESH_RATE;

/// A database over one KV engine.
///
/// Owns the engine, the **data-read/schema-write** lock (read side held
/// briefly by data-transaction opens, write side across schema commits), the
/// lazily rebuilt schema cache, and the two monotonic key generators.
pub struct Database {
    name: String,
    engine: Arc<dyn KvEngine>,
    data_read_schema_lock: RwLock<()>,
    cache: Mutex<Option<Arc<SchemaCache>>>,
    schema_keys: KeyGenerator,
    data_keys: KeyGenerator,
}

impl Database {
    /// Open a database over `engine`, bootstrapping the root types into an
    /// empty store.
    pub fn open(name: impl Into<String>, engine: Arc<dyn KvEngine>) -> Result<Arc<Self>, KernelError> {
        let db = Arc::new(Self {
            name: name.into(),
            engine,
            data_read_schema_lock: RwLock::new(()),
            cache: Mutex::new(None),
            schema_keys: KeyGenerator::new(),
            data_keys: KeyGenerator::new(),
        });
        db.bootstrap()?;
        tracing::info!(database = %db.name, "database opened");
        Ok(db)
    }

    /// Open a throwaway database over the bundled in-memory engine.
    pub fn in_memory(name: impl Into<String>) -> Result<Arc<Self>, KernelError> {
        Self::open(name, Arc::new(MemoryEngine::new()))
    }

    fn bootstrap(&self) -> Result<(), KernelError> {
        let storage = TransactionStorage::new(
            self.engine.begin(true).map_err(KernelError::StorageFailure)?,
            true,
        );
        let mut graph = SchemaGraph::load(&storage)?;
        graph.bootstrap(|kind| self.schema_keys.next(kind, |prefix| storage.get_last(prefix)))?;
        let result = if graph.is_modified() {
            graph.flush(&storage).and_then(|()| storage.commit())
        } else {
            Ok(())
        };
        storage.close();
        result
    }

    /// The database name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn engine(&self) -> Arc<dyn KvEngine> {
        Arc::clone(&self.engine)
    }

    pub(crate) fn data_read_schema_lock(&self) -> &RwLock<()> {
        &self.data_read_schema_lock
    }

    pub(crate) fn schema_keys(&self) -> &KeyGenerator {
        &self.schema_keys
    }

    pub(crate) fn data_keys(&self) -> &KeyGenerator {
        &self.data_keys
    }

    /// Borrow the shared schema cache, building it on first use. The
    /// returned handle is pinned; callers release it on close.
    pub(crate) fn borrow_cache(
        &self,
        refresh_rate: Option<u64>,
    ) -> Result<Arc<SchemaCache>, KernelError> {
        let mut slot = self.cache.lock();
        let cache = match slot.as_ref() {
            Some(cache) => Arc::clone(cache),
            None => {
                let storage = TransactionStorage::new(
                    self.engine.begin(false).map_err(KernelError::StorageFailure)?,
                    false,
                );
                let cache = SchemaCache::new(
                    Arc::clone(&self.engine),
                    storage,
                    refresh_rate.unwrap_or(SCHEMA_GRAPH_STORAGE_REFRESH_RATE),
                )?;
                *slot = Some(Arc::clone(&cache));
                tracing::debug!(database = %self.name, "schema cache built");
                cache
            }
        };
        cache.acquire();
        Ok(cache)
    }

    /// Evict the cached schema graph; the next borrower reloads it. The
    /// evicted cache's snapshot is released once its last holder lets go.
    pub(crate) fn evict_cache(&self) {
        if let Some(cache) = self.cache.lock().take() {
            cache.set_may_close();
            tracing::debug!(database = %self.name, "schema cache evicted");
        }
    }

    /// Open a schema session.
    pub fn session_schema(self: &Arc<Self>) -> SchemaSession {
        SchemaSession::new(Arc::clone(self))
    }

    /// Open a data session.
    pub fn session_data(self: &Arc<Self>) -> DataSession {
        DataSession::new(Arc::clone(self))
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.evict_cache();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Kind;

    #[test]
    fn test_open_bootstraps_roots() {
        let db = Database::in_memory("bootstrap").unwrap();
        let cache = db.borrow_cache(None).unwrap();
        let graph = cache.graph().read();
        for kind in [Kind::EntityType, Kind::RelationType, Kind::AttributeType, Kind::RoleType] {
            assert!(graph.root(kind).is_ok());
        }
        drop(graph);
        cache.release();
    }

    #[test]
    fn test_bootstrap_is_idempotent() {
        let engine: Arc<dyn KvEngine> = Arc::new(MemoryEngine::new());
        let first = Database::open("db", Arc::clone(&engine)).unwrap();
        let root = {
            let cache = first.borrow_cache(None).unwrap();
            let id = cache.graph().read().root(Kind::EntityType).unwrap();
            cache.release();
            id
        };
        drop(first);

        let second = Database::open("db", engine).unwrap();
        let cache = second.borrow_cache(None).unwrap();
        assert_eq!(cache.graph().read().root(Kind::EntityType).unwrap(), root);
        cache.release();
    }
}
