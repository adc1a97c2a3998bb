//! The traversal query structure.
//!
//! A [`Structure`] is the planner's input: an in-memory multigraph over
//! variable or anonymous identifiers, partitioned into thing and type
//! vertices, with directionally annotated edges. The kernel's job ends at
//! [`Structure::split_disjoint`]; planning and execution belong to the
//! (external) planner, which calls back into the typed graph store through a
//! transaction.

pub mod structure;

pub use structure::{
    EdgeContent, Identifier, Predicate, Structure, StructureEdge, StructureVertex,
    StructureVertexKind, TypeProps, VertexProps,
};
