//! The data graph: instance vertices and edges, buffered per transaction.
//!
//! Unlike the schema graph, the data graph is never fully materialised.
//! Reads go to storage through the owning transaction and landed records are
//! kept in a bounded LRU handle cache; writes accumulate in the buffer and
//! flush at commit. Role players are written as a `RolePlayer` shortcut edge
//! (relation -> player, annotated with role type and repetition) plus
//! `Relating`/`Playing` edges through a role instance vertex.

use std::collections::{BTreeMap, BTreeSet};
use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use crate::error::KernelError;
use crate::txn::storage::TransactionStorage;

use super::encoding::{
    isa_index_key, isa_index_prefix, parse_isa_index_key, parse_thing_edge_key, thing_edge_key,
    thing_edge_prefix, thing_edge_reverse_key, VertexId,
};
use super::schema_graph::{decode_record, encode_record, SchemaGraph};
use super::vertex::{ThingEdgeRecord, ThingVertexBody, ThingVertexRecord};
use super::{EdgeKind, Kind, Value};

/// Bound on cached thing-vertex handles per transaction.
const THING_CACHE_CAPACITY: usize = 10_240;

/// Buffered per-transaction view of the data graph.
pub struct ThingGraph {
    created: BTreeMap<VertexId, ThingVertexRecord>,
    created_edges: BTreeSet<ThingEdgeRecord>,
    /// Role instance per (relation, role type), so repeated players of the
    /// same role share one role vertex.
    role_vertices: BTreeMap<(VertexId, VertexId), VertexId>,
    cache: Mutex<LruCache<VertexId, ThingVertexRecord>>,
}

impl ThingGraph {
    /// An empty, unmodified graph.
    pub fn new() -> Self {
        let capacity = NonZeroUsize::new(THING_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            created: BTreeMap::new(),
            created_edges: BTreeSet::new(),
            role_vertices: BTreeMap::new(),
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Whether any mutation is pending.
    pub fn is_modified(&self) -> bool {
        !(self.created.is_empty() && self.created_edges.is_empty())
    }

    /// Discard all buffered mutations and cached handles.
    pub fn clear(&mut self) {
        self.created.clear();
        self.created_edges.clear();
        self.role_vertices.clear();
        self.cache.lock().clear();
    }

    /// Record a new thing vertex of `type_id`.
    pub fn create(
        &mut self,
        id: VertexId,
        type_id: VertexId,
        value: Option<Value>,
    ) -> Result<VertexId, KernelError> {
        if !id.kind().is_thing() {
            return Err(KernelError::internal(format!("thing created with type-kind id {id}")));
        }
        self.created.insert(id, ThingVertexRecord::new(id, type_id, value));
        Ok(id)
    }

    /// Resolve a thing vertex, consulting the buffer, then the handle cache,
    /// then storage.
    pub fn get(
        &self,
        storage: &TransactionStorage,
        id: VertexId,
    ) -> Result<Option<ThingVertexRecord>, KernelError> {
        if let Some(record) = self.created.get(&id) {
            return Ok(Some(record.clone()));
        }
        if let Some(record) = self.cache.lock().get(&id) {
            return Ok(Some(record.clone()));
        }
        let Some(bytes) = storage.get(&id.to_bytes())? else {
            return Ok(None);
        };
        let body: ThingVertexBody = decode_record(&bytes)?;
        let record = ThingVertexRecord { id, body };
        self.cache.lock().put(id, record.clone());
        Ok(Some(record))
    }

    /// Record `owner -[has]-> attribute`.
    pub fn put_has(&mut self, owner: VertexId, attribute: VertexId) {
        self.created_edges.insert(ThingEdgeRecord {
            from: owner,
            kind: EdgeKind::HasAttribute,
            to: attribute,
            role: None,
            repetition: 0,
        });
    }

    /// Record `player` playing `role_type` in `relation`.
    ///
    /// Returns the repetition index assigned to the new role-player edge; the
    /// same (relation, player, role) triple may be added repeatedly and each
    /// addition stays distinguishable.
    pub fn put_role_player(
        &mut self,
        storage: &TransactionStorage,
        relation: VertexId,
        player: VertexId,
        role_type: VertexId,
        role_vertex: impl FnOnce() -> Result<VertexId, KernelError>,
    ) -> Result<u16, KernelError> {
        let repetition = self
            .role_players(storage, relation)?
            .into_iter()
            .filter(|(p, r, _)| *p == player && *r == role_type)
            .map(|(_, _, repetition)| repetition + 1)
            .max()
            .unwrap_or(0);

        let role = match self.role_vertices.get(&(relation, role_type)) {
            Some(role) => *role,
            None => {
                let role = self.create(role_vertex()?, role_type, None)?;
                self.role_vertices.insert((relation, role_type), role);
                role
            }
        };
        self.created_edges.insert(ThingEdgeRecord {
            from: relation,
            kind: EdgeKind::Relating,
            to: role,
            role: None,
            repetition: 0,
        });
        self.created_edges.insert(ThingEdgeRecord {
            from: player,
            kind: EdgeKind::Playing,
            to: role,
            role: None,
            repetition: 0,
        });
        self.created_edges.insert(ThingEdgeRecord {
            from: relation,
            kind: EdgeKind::RolePlayer,
            to: player,
            role: Some(role_type),
            repetition,
        });
        Ok(repetition)
    }

    /// Attributes attached to `owner`, buffered and persisted, in id order.
    pub fn has(
        &self,
        storage: &TransactionStorage,
        owner: VertexId,
    ) -> Result<Vec<VertexId>, KernelError> {
        let mut result = BTreeSet::new();
        let mut iter = storage.iterate(&thing_edge_prefix(owner, EdgeKind::HasAttribute))?;
        while let Some(entry) = iter.next() {
            let (key, _) = entry?;
            let (_, _, to, _, _) = parse_thing_edge_key(&key)?;
            result.insert(to);
        }
        for edge in &self.created_edges {
            if edge.from == owner && edge.kind == EdgeKind::HasAttribute {
                result.insert(edge.to);
            }
        }
        Ok(result.into_iter().collect())
    }

    /// Role players of `relation` as `(player, role type, repetition)`.
    pub fn role_players(
        &self,
        storage: &TransactionStorage,
        relation: VertexId,
    ) -> Result<Vec<(VertexId, VertexId, u16)>, KernelError> {
        let mut result = BTreeSet::new();
        let mut iter = storage.iterate(&thing_edge_prefix(relation, EdgeKind::RolePlayer))?;
        while let Some(entry) = iter.next() {
            let (key, _) = entry?;
            let (_, _, player, role, repetition) = parse_thing_edge_key(&key)?;
            let role = role.ok_or_else(|| KernelError::internal("role player edge without role"))?;
            result.insert((player, role, repetition));
        }
        for edge in &self.created_edges {
            if edge.from == relation && edge.kind == EdgeKind::RolePlayer {
                let role = edge
                    .role
                    .ok_or_else(|| KernelError::internal("role player edge without role"))?;
                result.insert((edge.to, role, edge.repetition));
            }
        }
        Ok(result.into_iter().collect())
    }

    /// Direct instances of `type_id`, buffered and persisted, in id order.
    pub fn instances(
        &self,
        storage: &TransactionStorage,
        type_id: VertexId,
    ) -> Result<Vec<VertexId>, KernelError> {
        let mut result = BTreeSet::new();
        let mut iter = storage.iterate(&isa_index_prefix(type_id))?;
        while let Some(entry) = iter.next() {
            let (key, _) = entry?;
            result.insert(parse_isa_index_key(&key)?);
        }
        for record in self.created.values() {
            if record.body.type_id == type_id {
                result.insert(record.id);
            }
        }
        Ok(result.into_iter().collect())
    }

    /// Whether `type_id` has any direct instance.
    pub fn has_instances(
        &self,
        storage: &TransactionStorage,
        type_id: VertexId,
    ) -> Result<bool, KernelError> {
        if self.created.values().any(|r| r.body.type_id == type_id) {
            return Ok(true);
        }
        let mut iter = storage.iterate(&isa_index_prefix(type_id))?;
        Ok(iter.next().transpose()?.is_some())
    }

    /// Check buffered things against the schema: the instance kind must match
    /// its type's kind, and attribute values must inhabit the declared value
    /// type. Errors are collected, not short-circuited.
    pub fn validate(&self, schema: &SchemaGraph) -> Vec<KernelError> {
        let mut errors = Vec::new();
        for record in self.created.values() {
            let type_record = match schema.get(record.body.type_id) {
                Ok(record) => record,
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };
            if type_record.kind().instance_kind() != Some(record.kind()) {
                errors.push(KernelError::IllegalCast {
                    expected: type_record.kind().to_string(),
                    actual: record.kind().to_string(),
                });
                continue;
            }
            if record.kind() == Kind::Attribute {
                let declared = type_record.body.value_type;
                let actual = record.body.value.as_ref().map(Value::value_type);
                if declared.is_none() || declared != actual {
                    errors.push(KernelError::internal(format!(
                        "attribute {} value does not inhabit its type's value type",
                        record.id
                    )));
                }
            }
        }
        errors
    }

    /// Write all buffered mutations through `storage` and clear the buffer.
    pub fn flush(&mut self, storage: &TransactionStorage) -> Result<(), KernelError> {
        for record in self.created.values() {
            storage.put(&record.id.to_bytes(), encode_record(&record.body)?)?;
            storage.put_untracked(&isa_index_key(record.body.type_id, record.id), Vec::new())?;
        }
        for edge in &self.created_edges {
            storage.put(
                &thing_edge_key(edge.from, edge.kind, edge.to, edge.role, edge.repetition),
                Vec::new(),
            )?;
            storage.put_untracked(
                &thing_edge_reverse_key(edge.from, edge.kind, edge.to, edge.role, edge.repetition),
                Vec::new(),
            )?;
        }
        let written = self.created.len() + self.created_edges.len();
        tracing::debug!(records = written, "thing graph flushed");
        self.created.clear();
        self.created_edges.clear();
        self.role_vertices.clear();
        Ok(())
    }
}

impl Default for ThingGraph {
    fn default() -> Self {
        Self::new()
    }
}
