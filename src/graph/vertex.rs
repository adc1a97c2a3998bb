//! In-memory vertex and edge records.
//!
//! The persisted vertex body carries only vertex-local properties; adjacency
//! is reconstructed from edge records at load time and indexed by edge kind,
//! so `outs(kind)` / `ins(kind)` are O(result size).

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::encoding::VertexId;
use super::{EdgeKind, Kind, Value, ValueType};

/// Persisted body of a type vertex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeVertexBody {
    /// Unique human-readable label.
    pub label: String,
    /// Abstract types admit no direct instances.
    pub is_abstract: bool,
    /// Value type, present exactly on attribute types.
    pub value_type: Option<ValueType>,
    /// Root sentinel flag; root types reject all mutation.
    pub root: bool,
}

/// A schema-graph vertex with its adjacency.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeVertexRecord {
    /// Stable identity.
    pub id: VertexId,
    /// Vertex-local properties.
    pub body: TypeVertexBody,
    /// Outgoing adjacency indexed by edge kind.
    pub outs: BTreeMap<EdgeKind, BTreeSet<VertexId>>,
    /// Incoming adjacency indexed by edge kind.
    pub ins: BTreeMap<EdgeKind, BTreeSet<VertexId>>,
    /// Override pointers: `(edge kind, declared target) -> overridden target`.
    pub overrides: BTreeMap<(EdgeKind, VertexId), VertexId>,
}

impl TypeVertexRecord {
    /// Create a vertex with empty adjacency.
    pub fn new(id: VertexId, label: impl Into<String>, root: bool) -> Self {
        Self {
            id,
            body: TypeVertexBody {
                label: label.into(),
                is_abstract: root,
                value_type: None,
                root,
            },
            outs: BTreeMap::new(),
            ins: BTreeMap::new(),
            overrides: BTreeMap::new(),
        }
    }

    /// The vertex kind (encoded in the id).
    pub fn kind(&self) -> Kind {
        self.id.kind()
    }

    /// Outgoing neighbours over `kind`, in id order.
    pub fn outs(&self, kind: EdgeKind) -> impl Iterator<Item = VertexId> + '_ {
        self.outs.get(&kind).into_iter().flatten().copied()
    }

    /// Incoming neighbours over `kind`, in id order.
    pub fn ins(&self, kind: EdgeKind) -> impl Iterator<Item = VertexId> + '_ {
        self.ins.get(&kind).into_iter().flatten().copied()
    }

    /// Whether an out-edge `self -[kind]-> to` is recorded.
    pub fn has_out(&self, kind: EdgeKind, to: VertexId) -> bool {
        self.outs.get(&kind).is_some_and(|set| set.contains(&to))
    }

    /// The single SUB parent, absent only on roots.
    pub fn sub_parent(&self) -> Option<VertexId> {
        self.outs(EdgeKind::Sub).next()
    }

    /// The override pointer on the declared edge `self -[kind]-> to`, if any.
    pub fn overridden(&self, kind: EdgeKind, to: VertexId) -> Option<VertexId> {
        self.overrides.get(&(kind, to)).copied()
    }

    /// All override targets declared at this vertex over the given edge
    /// kinds. This is the `overridden_*_at(T)` set of the visibility rules.
    pub fn overridden_targets(&self, kinds: &[EdgeKind]) -> BTreeSet<VertexId> {
        self.overrides
            .iter()
            .filter(|((kind, _), _)| kinds.contains(kind))
            .map(|(_, overridden)| *overridden)
            .collect()
    }
}

/// Persisted body of a thing vertex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThingVertexBody {
    /// The direct type of this instance.
    pub type_id: VertexId,
    /// Attribute value, present exactly on attribute instances.
    pub value: Option<Value>,
}

/// A data-graph vertex.
#[derive(Debug, Clone, PartialEq)]
pub struct ThingVertexRecord {
    /// Stable identity.
    pub id: VertexId,
    /// Vertex-local properties.
    pub body: ThingVertexBody,
}

impl ThingVertexRecord {
    /// Create a thing of `type_id`.
    pub fn new(id: VertexId, type_id: VertexId, value: Option<Value>) -> Self {
        Self { id, body: ThingVertexBody { type_id, value } }
    }

    /// The vertex kind (encoded in the id).
    pub fn kind(&self) -> Kind {
        self.id.kind()
    }
}

/// A buffered data-graph edge.
///
/// Role-player edges carry the role type and a repetition index; the same
/// (from, to, role) triple may recur under distinct repetitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThingEdgeRecord {
    /// Source thing.
    pub from: VertexId,
    /// Edge kind.
    pub kind: EdgeKind,
    /// Target thing.
    pub to: VertexId,
    /// Role type, present on role-player edges.
    pub role: Option<VertexId>,
    /// Repetition index, zero outside role-player edges.
    pub repetition: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertex(kind: Kind, serial: u64) -> VertexId {
        VertexId::new(kind, serial)
    }

    #[test]
    fn test_adjacency_indexed_by_edge_kind() {
        let mut record = TypeVertexRecord::new(vertex(Kind::EntityType, 1), "person", false);
        let name = vertex(Kind::AttributeType, 1);
        let employment = vertex(Kind::RoleType, 1);
        record.outs.entry(EdgeKind::Has).or_default().insert(name);
        record.outs.entry(EdgeKind::Plays).or_default().insert(employment);

        assert_eq!(record.outs(EdgeKind::Has).collect::<Vec<_>>(), vec![name]);
        assert_eq!(record.outs(EdgeKind::Plays).collect::<Vec<_>>(), vec![employment]);
        assert_eq!(record.outs(EdgeKind::Key).count(), 0);
        assert!(record.has_out(EdgeKind::Has, name));
    }

    #[test]
    fn test_overridden_targets_filters_by_edge_kind() {
        let mut record = TypeVertexRecord::new(vertex(Kind::EntityType, 1), "employee", false);
        let a = vertex(Kind::AttributeType, 1);
        let b = vertex(Kind::AttributeType, 2);
        let r = vertex(Kind::RoleType, 3);
        record.overrides.insert((EdgeKind::Has, a), b);
        record.overrides.insert((EdgeKind::Plays, r), r);

        let has_only = record.overridden_targets(&[EdgeKind::Key, EdgeKind::Has]);
        assert!(has_only.contains(&b));
        assert!(!has_only.contains(&r));
    }

    #[test]
    fn test_root_vertices_start_abstract() {
        let root = TypeVertexRecord::new(vertex(Kind::EntityType, 0), "entity", true);
        assert!(root.body.is_abstract);
        assert!(root.body.root);
    }
}
