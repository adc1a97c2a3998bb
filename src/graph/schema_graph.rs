//! The schema graph: all type vertices, fully loaded.
//!
//! Schemas are small, so the whole type graph is materialised per transaction
//! (and once per database in the shared cache). Mutations are applied to the
//! in-memory records and tracked in dirty sets; `flush` writes vertex bodies,
//! forward/reverse edge records, override pointers, and label-index entries
//! through the owning transaction's storage in one pass at commit.

use std::collections::{BTreeMap, BTreeSet};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::KernelError;
use crate::kv::StorageError;
use crate::txn::storage::TransactionStorage;

use super::encoding::{
    self, label_index_key, override_key, parse_type_edge_key, type_edge_key,
    type_edge_reverse_key, vertex_kind_prefix, VertexId,
};
use super::vertex::{TypeVertexBody, TypeVertexRecord};
use super::{EdgeKind, Kind};

pub(crate) fn encode_record<T: Serialize>(record: &T) -> Result<Vec<u8>, KernelError> {
    serde_json::to_vec(record).map_err(|e| KernelError::internal(format!("record encode: {e}")))
}

pub(crate) fn decode_record<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, KernelError> {
    serde_json::from_slice(bytes)
        .map_err(|e| KernelError::StorageFailure(StorageError::Corrupt(e.to_string())))
}

type EdgeTriple = (VertexId, EdgeKind, VertexId);

/// In-memory view of the persisted type graph.
#[derive(Debug, Default)]
pub struct SchemaGraph {
    vertices: BTreeMap<VertexId, TypeVertexRecord>,
    labels: BTreeMap<String, VertexId>,

    dirty_vertices: BTreeSet<VertexId>,
    deleted_vertices: BTreeSet<VertexId>,
    dirty_edges: BTreeSet<EdgeTriple>,
    deleted_edges: BTreeSet<EdgeTriple>,
    deleted_overrides: BTreeSet<EdgeTriple>,
    /// Label-index entries to rewrite; `None` deletes the entry.
    dirty_labels: BTreeMap<String, Option<VertexId>>,
}

impl SchemaGraph {
    /// An empty, unmodified graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the full type graph from storage.
    pub fn load(storage: &TransactionStorage) -> Result<Self, KernelError> {
        let mut graph = Self::new();
        for kind in [Kind::EntityType, Kind::RelationType, Kind::AttributeType, Kind::RoleType] {
            let mut iter = storage.iterate(&vertex_kind_prefix(kind))?;
            while let Some(entry) = iter.next() {
                let (key, value) = entry?;
                let id = VertexId::from_bytes(&key)?;
                let body: TypeVertexBody = decode_record(&value)?;
                graph.labels.insert(body.label.clone(), id);
                graph.vertices.insert(
                    id,
                    TypeVertexRecord {
                        id,
                        body,
                        outs: BTreeMap::new(),
                        ins: BTreeMap::new(),
                        overrides: BTreeMap::new(),
                    },
                );
            }
        }

        let mut edges = storage.iterate(&[encoding::TYPE_EDGE_PREFIX])?;
        while let Some(entry) = edges.next() {
            let (key, _) = entry?;
            let (from, kind, to) = parse_type_edge_key(&key)?;
            graph.link(from, kind, to)?;
        }

        let mut overrides = storage.iterate(&[encoding::OVERRIDE_PREFIX])?;
        while let Some(entry) = overrides.next() {
            let (key, value) = entry?;
            // Override keys share the edge-key shape behind their prefix.
            let mut edge_key = key;
            edge_key[0] = encoding::TYPE_EDGE_PREFIX;
            let (from, kind, to) = parse_type_edge_key(&edge_key)?;
            let overridden = VertexId::from_bytes(&value)?;
            graph
                .vertex_mut_untracked(from)?
                .overrides
                .insert((kind, to), overridden);
        }

        tracing::debug!(types = graph.vertices.len(), "schema graph loaded");
        graph.clear_tracking();
        Ok(graph)
    }

    /// Create the four root types in an empty graph.
    pub fn bootstrap(
        &mut self,
        mut next_id: impl FnMut(Kind) -> Result<VertexId, KernelError>,
    ) -> Result<(), KernelError> {
        for kind in [Kind::EntityType, Kind::RelationType, Kind::AttributeType, Kind::RoleType] {
            let label = kind
                .root_label()
                .ok_or_else(|| KernelError::internal("bootstrap over a thing kind"))?;
            if !self.labels.contains_key(label) {
                let id = next_id(kind)?;
                self.insert_vertex(TypeVertexRecord::new(id, label, true));
            }
        }
        Ok(())
    }

    /// Whether any mutation is pending.
    pub fn is_modified(&self) -> bool {
        !(self.dirty_vertices.is_empty()
            && self.deleted_vertices.is_empty()
            && self.dirty_edges.is_empty()
            && self.deleted_edges.is_empty()
            && self.deleted_overrides.is_empty()
            && self.dirty_labels.is_empty())
    }

    /// All vertices in id order.
    pub fn vertices(&self) -> impl Iterator<Item = &TypeVertexRecord> {
        self.vertices.values()
    }

    /// Resolve a vertex record.
    pub fn get(&self, id: VertexId) -> Result<&TypeVertexRecord, KernelError> {
        self.vertices
            .get(&id)
            .ok_or_else(|| KernelError::internal(format!("dangling type vertex {id}")))
    }

    /// Resolve a type by label.
    pub fn by_label(&self, label: &str) -> Option<VertexId> {
        self.labels.get(label).copied()
    }

    /// The root vertex of a type kind.
    pub fn root(&self, kind: Kind) -> Result<VertexId, KernelError> {
        let label = kind
            .root_label()
            .ok_or_else(|| KernelError::internal(format!("no root for kind {kind}")))?;
        self.by_label(label)
            .ok_or_else(|| KernelError::internal(format!("root type '{label}' missing")))
    }

    /// Insert a freshly allocated vertex and index its label.
    pub fn insert_vertex(&mut self, record: TypeVertexRecord) {
        debug_assert!(record.id.kind().is_type(), "schema graph vertices must be type kinds");
        let id = record.id;
        self.labels.insert(record.body.label.clone(), id);
        self.dirty_labels.insert(record.body.label.clone(), Some(id));
        self.dirty_vertices.insert(id);
        self.vertices.insert(id, record);
    }

    fn vertex_mut_untracked(&mut self, id: VertexId) -> Result<&mut TypeVertexRecord, KernelError> {
        self.vertices
            .get_mut(&id)
            .ok_or_else(|| KernelError::internal(format!("dangling type vertex {id}")))
    }

    /// Mutable access to a vertex's properties, marking it dirty.
    pub fn vertex_mut(&mut self, id: VertexId) -> Result<&mut TypeVertexRecord, KernelError> {
        self.dirty_vertices.insert(id);
        self.vertex_mut_untracked(id)
    }

    /// Re-label a vertex, keeping the label index consistent.
    pub fn set_label(&mut self, id: VertexId, label: impl Into<String>) -> Result<(), KernelError> {
        let label = label.into();
        if let Some(existing) = self.by_label(&label) {
            if existing != id {
                return Err(KernelError::LabelTaken { label });
            }
            return Ok(());
        }
        let old = self.vertex_mut(id)?.body.label.clone();
        self.labels.remove(&old);
        self.dirty_labels.insert(old, None);
        self.labels.insert(label.clone(), id);
        self.dirty_labels.insert(label.clone(), Some(id));
        self.vertex_mut(id)?.body.label = label;
        Ok(())
    }

    fn link(&mut self, from: VertexId, kind: EdgeKind, to: VertexId) -> Result<(), KernelError> {
        self.vertex_mut_untracked(from)?.outs.entry(kind).or_default().insert(to);
        self.vertex_mut_untracked(to)?.ins.entry(kind).or_default().insert(from);
        Ok(())
    }

    fn unlink(&mut self, from: VertexId, kind: EdgeKind, to: VertexId) -> Result<(), KernelError> {
        let from_record = self.vertex_mut_untracked(from)?;
        if let Some(set) = from_record.outs.get_mut(&kind) {
            set.remove(&to);
        }
        from_record.overrides.remove(&(kind, to));
        if let Some(set) = self.vertex_mut_untracked(to)?.ins.get_mut(&kind) {
            set.remove(&from);
        }
        Ok(())
    }

    /// Record the edge `from -[kind]-> to`. Idempotent.
    pub fn put_edge(&mut self, from: VertexId, kind: EdgeKind, to: VertexId) -> Result<(), KernelError> {
        debug_assert!(kind.is_type_edge(), "schema graph edges must be type edges");
        self.link(from, kind, to)?;
        self.deleted_edges.remove(&(from, kind, to));
        self.dirty_edges.insert((from, kind, to));
        Ok(())
    }

    /// Remove the edge and any override pointer attached to it. Idempotent.
    pub fn delete_edge(
        &mut self,
        from: VertexId,
        kind: EdgeKind,
        to: VertexId,
    ) -> Result<(), KernelError> {
        let had_override = self.get(from)?.overridden(kind, to).is_some();
        self.unlink(from, kind, to)?;
        self.dirty_edges.remove(&(from, kind, to));
        self.deleted_edges.insert((from, kind, to));
        if had_override {
            self.deleted_overrides.insert((from, kind, to));
        }
        Ok(())
    }

    /// Install an override pointer on an existing declared edge.
    pub fn set_override(
        &mut self,
        from: VertexId,
        kind: EdgeKind,
        to: VertexId,
        overridden: VertexId,
    ) -> Result<(), KernelError> {
        if !self.get(from)?.has_out(kind, to) {
            return Err(KernelError::internal(format!(
                "override on missing edge {from} -[{kind}]-> {to}"
            )));
        }
        self.vertex_mut_untracked(from)?.overrides.insert((kind, to), overridden);
        self.deleted_overrides.remove(&(from, kind, to));
        self.dirty_edges.insert((from, kind, to));
        Ok(())
    }

    /// Set the abstract flag.
    pub fn set_abstract(&mut self, id: VertexId, is_abstract: bool) -> Result<(), KernelError> {
        self.vertex_mut(id)?.body.is_abstract = is_abstract;
        Ok(())
    }

    /// Delete a vertex and every incident edge. The lattice layer has already
    /// verified the vertex has no subtypes and no instances.
    pub fn delete_vertex(&mut self, id: VertexId) -> Result<(), KernelError> {
        let record = self.get(id)?.clone();
        for (kind, targets) in &record.outs {
            for to in targets {
                self.delete_edge(id, *kind, *to)?;
            }
        }
        for (kind, sources) in &record.ins {
            for from in sources {
                self.delete_edge(*from, *kind, id)?;
            }
        }
        self.labels.remove(&record.body.label);
        self.dirty_labels.insert(record.body.label, None);
        self.dirty_vertices.remove(&id);
        self.deleted_vertices.insert(id);
        self.vertices.remove(&id);
        Ok(())
    }

    /// Write all pending mutations through `storage` and clear the dirty
    /// sets. The caller commits the KV transaction afterwards.
    pub fn flush(&mut self, storage: &TransactionStorage) -> Result<(), KernelError> {
        for id in &self.deleted_vertices {
            storage.delete(&id.to_bytes())?;
        }
        for (from, kind, to) in &self.deleted_edges {
            storage.delete(&type_edge_key(*from, *kind, *to))?;
            storage.delete(&type_edge_reverse_key(*from, *kind, *to))?;
        }
        for (from, kind, to) in &self.deleted_overrides {
            storage.delete(&override_key(*from, *kind, *to))?;
        }
        for (label, entry) in &self.dirty_labels {
            match entry {
                Some(id) => storage.put(&label_index_key(label), id.to_bytes().to_vec())?,
                None => storage.delete(&label_index_key(label))?,
            }
        }
        for id in &self.dirty_vertices {
            let record = self.get(*id)?;
            storage.put(&id.to_bytes(), encode_record(&record.body)?)?;
        }
        for (from, kind, to) in &self.dirty_edges {
            storage.put(&type_edge_key(*from, *kind, *to), Vec::new())?;
            storage.put(&type_edge_reverse_key(*from, *kind, *to), Vec::new())?;
            if let Some(overridden) = self.get(*from)?.overridden(*kind, *to) {
                storage.put(&override_key(*from, *kind, *to), overridden.to_bytes().to_vec())?;
            }
        }
        let written = self.dirty_vertices.len() + self.dirty_edges.len();
        tracing::debug!(records = written, "schema graph flushed");
        self.clear_tracking();
        Ok(())
    }

    fn clear_tracking(&mut self) {
        self.dirty_vertices.clear();
        self.deleted_vertices.clear();
        self.dirty_edges.clear();
        self.deleted_edges.clear();
        self.deleted_overrides.clear();
        self.dirty_labels.clear();
    }
}
