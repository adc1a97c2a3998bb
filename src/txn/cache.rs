//! The schema cache: one loaded schema graph shared by reference count.
//!
//! A cache pairs a fully loaded [`SchemaGraph`] with the storage that backs
//! it. The database keeps one cache for data transactions, which pin it with
//! the reference counter; a committing schema transaction evicts it by
//! setting `may_close`, and the backing snapshot is dropped once the counter
//! returns to zero. Data commits signal `may_refresh_storage`, and every
//! [`SCHEMA_GRAPH_STORAGE_REFRESH_RATE`] signals the backing read-only KV
//! transaction is replaced with a fresh snapshot so the long-lived cache
//! does not pin old engine versions.
//!
//! [`SCHEMA_GRAPH_STORAGE_REFRESH_RATE`]: crate::SCHEMA_GRAPH_STORAGE_REFRESH_RATE

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::KernelError;
use crate::graph::schema_graph::SchemaGraph;
use crate::kv::KvEngine;
use crate::traversal::Structure;

use super::storage::TransactionStorage;

/// Memoised traversal plans, keyed by canonical query text. The planner is an
/// external collaborator; the kernel only caches its partitioned structures.
#[derive(Default)]
pub struct PlannerCache {
    entries: Mutex<BTreeMap<String, Arc<Vec<Structure>>>>,
}

impl PlannerCache {
    /// Look up a cached plan.
    pub fn get(&self, key: &str) -> Option<Arc<Vec<Structure>>> {
        self.entries.lock().get(key).cloned()
    }

    /// Insert a plan, returning the shared handle.
    pub fn insert(&self, key: impl Into<String>, plan: Vec<Structure>) -> Arc<Vec<Structure>> {
        let plan = Arc::new(plan);
        self.entries.lock().insert(key.into(), Arc::clone(&plan));
        plan
    }
}

/// Memoised reasoner artifacts, opaque to the kernel.
#[derive(Default)]
pub struct RuleCache {
    entries: Mutex<BTreeMap<String, Arc<serde_json::Value>>>,
}

impl RuleCache {
    /// Look up a cached artifact.
    pub fn get(&self, key: &str) -> Option<Arc<serde_json::Value>> {
        self.entries.lock().get(key).cloned()
    }

    /// Insert an artifact, returning the shared handle.
    pub fn insert(&self, key: impl Into<String>, value: serde_json::Value) -> Arc<serde_json::Value> {
        let value = Arc::new(value);
        self.entries.lock().insert(key.into(), Arc::clone(&value));
        value
    }
}

/// A loaded schema graph plus the traversal and reasoner cache slots.
pub struct SchemaCache {
    graph: RwLock<SchemaGraph>,
    storage: TransactionStorage,
    engine: Arc<dyn KvEngine>,
    refs: AtomicUsize,
    may_close: AtomicBool,
    refresh_signals: AtomicU64,
    refresh_rate: u64,
    /// Cached traversal plans, invalidated with the cache itself.
    pub traversal: PlannerCache,
    /// Cached reasoner artifacts, invalidated with the cache itself.
    pub reasoner: RuleCache,
}

impl SchemaCache {
    /// Load the schema graph through `storage` and wrap it in a cache.
    pub(crate) fn new(
        engine: Arc<dyn KvEngine>,
        storage: TransactionStorage,
        refresh_rate: u64,
    ) -> Result<Arc<Self>, KernelError> {
        let graph = SchemaGraph::load(&storage)?;
        Ok(Arc::new(Self {
            graph: RwLock::new(graph),
            storage,
            engine,
            refs: AtomicUsize::new(0),
            may_close: AtomicBool::new(false),
            refresh_signals: AtomicU64::new(0),
            refresh_rate: refresh_rate.max(1),
            traversal: PlannerCache::default(),
            reasoner: RuleCache::default(),
        }))
    }

    /// The cached schema graph.
    pub fn graph(&self) -> &RwLock<SchemaGraph> {
        &self.graph
    }

    /// The storage backing this cache's graph.
    pub(crate) fn storage(&self) -> &TransactionStorage {
        &self.storage
    }

    /// Number of live borrowers.
    pub fn references(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    /// Pin the cache, preventing snapshot release.
    pub(crate) fn acquire(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Unpin the cache; the backing snapshot is dropped when this was the
    /// last borrower of an evicted cache.
    pub(crate) fn release(&self) {
        if self.refs.fetch_sub(1, Ordering::AcqRel) == 1 && self.may_close.load(Ordering::Acquire)
        {
            self.storage.close();
        }
    }

    /// Mark the cache evicted. Called by a committing schema transaction;
    /// closes the backing snapshot immediately when nobody holds the cache.
    pub(crate) fn set_may_close(&self) {
        self.may_close.store(true, Ordering::Release);
        if self.refs.load(Ordering::Acquire) == 0 {
            self.storage.close();
        }
    }

    /// Signal from a committed data transaction. Every `refresh_rate`
    /// signals the backing read-only KV transaction is replaced with a fresh
    /// snapshot; the old one is closed after the new one is in place.
    pub(crate) fn may_refresh_storage(&self) {
        let signals = self.refresh_signals.fetch_add(1, Ordering::AcqRel) + 1;
        if signals % self.refresh_rate == 0 && !self.may_close.load(Ordering::Acquire) {
            if let Err(e) = self.storage.replace_snapshot(self.engine.as_ref()) {
                tracing::warn!(error = %e, "schema cache snapshot refresh failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{KvEngine, MemoryEngine};

    fn cache(refresh_rate: u64) -> (MemoryEngine, Arc<SchemaCache>) {
        let engine = MemoryEngine::new();
        let storage =
            TransactionStorage::new(engine.begin(false).unwrap(), false);
        let cache =
            SchemaCache::new(Arc::new(engine.clone()), storage, refresh_rate).unwrap();
        (engine, cache)
    }

    #[test]
    fn test_refcount_defers_snapshot_close() {
        let (_engine, cache) = cache(100);
        cache.acquire();
        cache.set_may_close();
        assert!(cache.storage().is_open());

        cache.release();
        assert!(!cache.storage().is_open());
    }

    #[test]
    fn test_refresh_fires_at_the_configured_rate() {
        let (_engine, cache) = cache(3);
        for _ in 0..3 {
            cache.may_refresh_storage();
        }
        // The snapshot was replaced, not closed.
        assert!(cache.storage().is_open());
    }

    #[test]
    fn test_planner_and_rule_cache_slots() {
        let (_engine, cache) = cache(100);

        assert!(cache.traversal.get("match $x").is_none());
        let plan = cache.traversal.insert("match $x", vec![Structure::new()]);
        assert_eq!(plan.len(), 1);
        assert!(cache.traversal.get("match $x").is_some());

        cache.reasoner.insert("rule-index", serde_json::json!({"rules": []}));
        assert!(cache.reasoner.get("rule-index").is_some());
    }
}
