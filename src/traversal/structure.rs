//! Query structure: vertices, edge variants, disjoint partitioning.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::KernelError;
use crate::graph::EdgeKind;

/// Identifier of a structure vertex: a named query variable or an anonymous
/// placeholder introduced during query normalisation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Identifier {
    /// A named variable.
    Variable(String),
    /// An anonymous vertex, unique per ordinal.
    Anonymous(u32),
}

impl Identifier {
    /// Build a variable identifier.
    pub fn var(name: impl Into<String>) -> Self {
        Self::Variable(name.into())
    }

    /// Whether this identifier names a variable.
    pub fn is_variable(&self) -> bool {
        matches!(self, Self::Variable(_))
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Variable(name) => write!(f, "${name}"),
            Self::Anonymous(ordinal) => write!(f, "$_{ordinal}"),
        }
    }
}

/// Whether a structure vertex stands for a thing or a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StructureVertexKind {
    /// Instance-level vertex.
    Thing,
    /// Schema-level vertex.
    Type,
}

impl std::fmt::Display for StructureVertexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Thing => write!(f, "thing"),
            Self::Type => write!(f, "type"),
        }
    }
}

/// Comparison predicate carried by predicate edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Predicate {
    /// Equality.
    Eq,
    /// Inequality.
    Neq,
    /// Strictly greater.
    Gt,
    /// Greater or equal.
    Gte,
    /// Strictly less.
    Lt,
    /// Less or equal.
    Lte,
    /// String pattern match.
    Like,
    /// Substring containment.
    Contains,
}

/// The variant payload of a structure edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EdgeContent {
    /// Both endpoints bind to the same concept.
    Equal,
    /// Value comparison between the endpoints.
    Predicate(Predicate),
    /// An edge of the typed graph, optionally closed transitively.
    Native {
        /// The typed-graph edge kind to traverse.
        kind: EdgeKind,
        /// Whether the planner should close this edge transitively.
        transitive: bool,
        /// Planner hints, opaque to the kernel.
        annotations: BTreeSet<String>,
    },
    /// A role-player constraint between a relation and a player.
    RolePlayer {
        /// Admissible role-type labels.
        roles: BTreeSet<String>,
        /// Repetition index distinguishing repeated (relation, player, role)
        /// bindings.
        repetition: u16,
        /// Planner hints, opaque to the kernel.
        annotations: BTreeSet<String>,
    },
}

/// An edge of the structure. Edges form a multiset: each construction is its
/// own edge, however equal its parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureEdge {
    /// Source endpoint.
    pub from: Identifier,
    /// Target endpoint.
    pub to: Identifier,
    /// Variant payload.
    pub content: EdgeContent,
}

/// Property bag of a variable-identified thing vertex, stored once per
/// structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VertexProps {
    /// Bound instance identity.
    pub iid: Option<Vec<u8>>,
    /// Value predicates annotating the vertex.
    pub predicates: Vec<Predicate>,
}

impl VertexProps {
    fn is_empty(&self) -> bool {
        self.iid.is_none() && self.predicates.is_empty()
    }
}

/// Property bag of a variable-identified type vertex, stored once per
/// structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeProps {
    /// Label constraints.
    pub labels: BTreeSet<String>,
    /// Abstractness constraint.
    pub is_abstract: bool,
}

impl TypeProps {
    fn is_empty(&self) -> bool {
        self.labels.is_empty() && !self.is_abstract
    }
}

/// A vertex with its adjacency. Self-loops live only in `loops`, never in
/// `outs` or `ins`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureVertex {
    /// The vertex identifier.
    pub id: Identifier,
    /// Thing or type.
    pub kind: StructureVertexKind,
    /// Indices of outgoing edges.
    pub outs: BTreeSet<usize>,
    /// Indices of incoming edges.
    pub ins: BTreeSet<usize>,
    /// Indices of self-loop edges.
    pub loops: BTreeSet<usize>,
}

impl StructureVertex {
    fn new(id: Identifier, kind: StructureVertexKind) -> Self {
        Self { id, kind, outs: BTreeSet::new(), ins: BTreeSet::new(), loops: BTreeSet::new() }
    }
}

/// A query as a multigraph, plus per-variable property bags.
///
/// Mutable while the query pipeline builds it; immutable once execution
/// begins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Structure {
    vertices: BTreeMap<Identifier, StructureVertex>,
    edges: Vec<StructureEdge>,
    thing_props: BTreeMap<Identifier, VertexProps>,
    type_props: BTreeMap<Identifier, TypeProps>,
}

impl Structure {
    /// An empty structure.
    pub fn new() -> Self {
        Self::default()
    }

    fn vertex_of_kind(
        &mut self,
        id: Identifier,
        kind: StructureVertexKind,
    ) -> Result<&mut StructureVertex, KernelError> {
        let vertex = self
            .vertices
            .entry(id.clone())
            .or_insert_with(|| StructureVertex::new(id, kind));
        if vertex.kind != kind {
            return Err(KernelError::IllegalCast {
                expected: kind.to_string(),
                actual: vertex.kind.to_string(),
            });
        }
        Ok(vertex)
    }

    /// Get or create the thing vertex `id`. Requesting an existing vertex
    /// under the opposite kind is a caller error.
    pub fn thing_vertex(&mut self, id: Identifier) -> Result<&mut StructureVertex, KernelError> {
        self.vertex_of_kind(id, StructureVertexKind::Thing)
    }

    /// Get or create the type vertex `id`.
    pub fn type_vertex(&mut self, id: Identifier) -> Result<&mut StructureVertex, KernelError> {
        self.vertex_of_kind(id, StructureVertexKind::Type)
    }

    /// The property bag of the thing vertex `id`, created on first access.
    pub fn thing_props_mut(&mut self, id: &Identifier) -> &mut VertexProps {
        self.thing_props.entry(id.clone()).or_default()
    }

    /// The property bag of the thing vertex `id`, if any.
    pub fn thing_props(&self, id: &Identifier) -> Option<&VertexProps> {
        self.thing_props.get(id)
    }

    /// The property bag of the type vertex `id`, created on first access.
    pub fn type_props_mut(&mut self, id: &Identifier) -> &mut TypeProps {
        self.type_props.entry(id.clone()).or_default()
    }

    /// The property bag of the type vertex `id`, if any.
    pub fn type_props(&self, id: &Identifier) -> Option<&TypeProps> {
        self.type_props.get(id)
    }

    /// All vertices in identifier order.
    pub fn vertices(&self) -> impl Iterator<Item = &StructureVertex> {
        self.vertices.values()
    }

    /// Resolve one vertex.
    pub fn vertex(&self, id: &Identifier) -> Option<&StructureVertex> {
        self.vertices.get(id)
    }

    /// All edges, in construction order.
    pub fn edges(&self) -> &[StructureEdge] {
        &self.edges
    }

    /// Number of vertices.
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Whether the structure has no vertices.
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    fn push_edge(
        &mut self,
        from: Identifier,
        to: Identifier,
        content: EdgeContent,
    ) -> Result<(), KernelError> {
        for endpoint in [&from, &to] {
            if !self.vertices.contains_key(endpoint) {
                return Err(KernelError::internal(format!(
                    "edge endpoint {endpoint} is not a structure vertex"
                )));
            }
        }
        let index = self.edges.len();
        if from == to {
            if let Some(vertex) = self.vertices.get_mut(&from) {
                vertex.loops.insert(index);
            }
        } else {
            if let Some(vertex) = self.vertices.get_mut(&from) {
                vertex.outs.insert(index);
            }
            if let Some(vertex) = self.vertices.get_mut(&to) {
                vertex.ins.insert(index);
            }
        }
        self.edges.push(StructureEdge { from, to, content });
        Ok(())
    }

    /// Append an equality edge.
    pub fn equal_edge(&mut self, a: Identifier, b: Identifier) -> Result<(), KernelError> {
        self.push_edge(a, b, EdgeContent::Equal)
    }

    /// Append a predicate edge.
    pub fn predicate_edge(
        &mut self,
        a: Identifier,
        b: Identifier,
        predicate: Predicate,
    ) -> Result<(), KernelError> {
        self.push_edge(a, b, EdgeContent::Predicate(predicate))
    }

    /// Append a typed-graph edge constraint.
    pub fn native_edge(
        &mut self,
        from: Identifier,
        to: Identifier,
        kind: EdgeKind,
        transitive: bool,
        annotations: BTreeSet<String>,
    ) -> Result<(), KernelError> {
        self.push_edge(from, to, EdgeContent::Native { kind, transitive, annotations })
    }

    /// Append a role-player constraint.
    pub fn role_player_edge(
        &mut self,
        from: Identifier,
        to: Identifier,
        roles: BTreeSet<String>,
        repetition: u16,
    ) -> Result<(), KernelError> {
        self.push_edge(
            from,
            to,
            EdgeContent::RolePlayer { roles, repetition, annotations: BTreeSet::new() },
        )
    }

    /// Partition into weakly connected components.
    ///
    /// With a non-empty `force_connect` seed list, the first output collects
    /// every component reachable from any seed, even when no edge links the
    /// seeds. Remaining components come out one structure each. Every vertex
    /// and every edge of `self` lands in exactly one output.
    pub fn split_disjoint(&self, force_connect: &[Identifier]) -> Vec<Structure> {
        let mut unvisited_vertices: BTreeSet<Identifier> = self.vertices.keys().cloned().collect();
        let mut unvisited_edges: BTreeSet<usize> = (0..self.edges.len()).collect();
        let mut outputs = Vec::new();

        if !force_connect.is_empty() {
            let mut seeded = Structure::new();
            for seed in force_connect {
                self.walk(seed, &mut seeded, &mut unvisited_vertices, &mut unvisited_edges);
            }
            outputs.push(seeded);
        }

        while let Some(seed) = unvisited_vertices.first().cloned() {
            let mut output = Structure::new();
            self.walk(&seed, &mut output, &mut unvisited_vertices, &mut unvisited_edges);
            outputs.push(output);
        }

        tracing::trace!(
            components = outputs.len(),
            seeded = !force_connect.is_empty(),
            "structure split"
        );
        outputs
    }

    /// Copy the component around `seed` into `output`, consuming its
    /// vertices and edges from the unvisited sets. A seed already visited is
    /// a no-op, which is what lets several seeds collapse into one output.
    fn walk(
        &self,
        seed: &Identifier,
        output: &mut Structure,
        unvisited_vertices: &mut BTreeSet<Identifier>,
        unvisited_edges: &mut BTreeSet<usize>,
    ) {
        let mut frontier = vec![seed.clone()];
        while let Some(current) = frontier.pop() {
            if !unvisited_vertices.remove(&current) {
                continue;
            }
            let Some(vertex) = self.vertices.get(&current) else { continue };
            output
                .vertices
                .entry(current.clone())
                .or_insert_with(|| StructureVertex::new(current.clone(), vertex.kind));
            if current.is_variable() {
                if let Some(props) = self.thing_props.get(&current) {
                    if !props.is_empty() {
                        output.thing_props.insert(current.clone(), props.clone());
                    }
                }
                if let Some(props) = self.type_props.get(&current) {
                    if !props.is_empty() {
                        output.type_props.insert(current.clone(), props.clone());
                    }
                }
            }

            let incident = vertex.outs.iter().chain(&vertex.ins).chain(&vertex.loops);
            for &edge_index in incident {
                if !unvisited_edges.remove(&edge_index) {
                    continue;
                }
                let edge = &self.edges[edge_index];
                self.copy_edge(edge, output);
                // Loops advance no vertex.
                if edge.from != edge.to {
                    let other = if edge.from == current { &edge.to } else { &edge.from };
                    frontier.push(other.clone());
                }
            }
        }
    }

    /// Copy one edge, materialising any endpoint the walk has not reached
    /// yet (the walk fills in its props when it gets there).
    fn copy_edge(&self, edge: &StructureEdge, output: &mut Structure) {
        for endpoint in [&edge.from, &edge.to] {
            if let Some(vertex) = self.vertices.get(endpoint) {
                output
                    .vertices
                    .entry(endpoint.clone())
                    .or_insert_with(|| StructureVertex::new(endpoint.clone(), vertex.kind));
            }
        }
        // push_edge cannot fail here: both endpoints were just materialised.
        let _ = output.push_edge(edge.from.clone(), edge.to.clone(), edge.content.clone());
    }
}

impl std::fmt::Display for Structure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "structure[{} vertices, {} edges]", self.vertices.len(), self.edges.len())
    }
}
