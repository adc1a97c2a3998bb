//! `split_disjoint` partition properties.

use std::collections::BTreeSet;

use proptest::prelude::*;

use lattice_kernel::traversal::{Identifier, Predicate, Structure};

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn var(index: usize) -> Identifier {
    Identifier::var(format!("v{index}"))
}

/// Build a structure with `n` thing vertices and the given edges (self-edges
/// allowed).
fn build(n: usize, edges: &[(usize, usize)]) -> Structure {
    let mut structure = Structure::new();
    for i in 0..n {
        structure.thing_vertex(var(i)).unwrap();
        structure.thing_props_mut(&var(i)).iid = Some(vec![i as u8]);
    }
    for (a, b) in edges {
        structure.predicate_edge(var(*a), var(*b), Predicate::Eq).unwrap();
    }
    structure
}

fn vertex_ids(structure: &Structure) -> BTreeSet<Identifier> {
    structure.vertices().map(|v| v.id.clone()).collect()
}

/// The connected component of `seed` under the undirected closure of `edges`.
fn component_of(seed: usize, n: usize, edges: &[(usize, usize)]) -> BTreeSet<usize> {
    let mut members = BTreeSet::from([seed]);
    loop {
        let mut grew = false;
        for (a, b) in edges {
            if *a < n && *b < n {
                if members.contains(a) && members.insert(*b) {
                    grew = true;
                }
                if members.contains(b) && members.insert(*a) {
                    grew = true;
                }
            }
        }
        if !grew {
            return members;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// S5: seeded and unseeded splits
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_split_with_and_without_seeds() {
    // a–b, c–d, e isolated.
    let structure = build(5, &[(0, 1), (2, 3)]);

    let parts = structure.split_disjoint(&[]);
    let sizes: Vec<usize> = parts.iter().map(Structure::vertex_count).collect();
    assert_eq!(sizes, vec![2, 2, 1]);

    let parts = structure.split_disjoint(&[var(0), var(2)]);
    assert_eq!(parts.len(), 2);
    assert_eq!(
        vertex_ids(&parts[0]),
        BTreeSet::from([var(0), var(1), var(2), var(3)])
    );
    assert_eq!(vertex_ids(&parts[1]), BTreeSet::from([var(4)]));
}

#[test]
fn test_seeds_in_one_component_change_nothing() {
    let structure = build(3, &[(0, 1), (1, 2)]);
    let parts = structure.split_disjoint(&[var(0), var(2)]);
    assert_eq!(parts.len(), 1);
    assert_eq!(parts[0].vertex_count(), 3);
    assert_eq!(parts[0].edges().len(), 2);
}

// ─────────────────────────────────────────────────────────────────────────────
// Properties 4 & 5
// ─────────────────────────────────────────────────────────────────────────────

proptest! {
    /// Property 4: the outputs partition the input, whatever the seeds.
    #[test]
    fn prop_split_is_a_partition(
        n in 1usize..10,
        raw_edges in proptest::collection::vec((0usize..10, 0usize..10), 0..20),
        raw_seeds in proptest::collection::vec(0usize..10, 0..4),
    ) {
        let edges: Vec<(usize, usize)> =
            raw_edges.into_iter().filter(|(a, b)| *a < n && *b < n).collect();
        let seeds: Vec<Identifier> =
            raw_seeds.iter().filter(|s| **s < n).map(|s| var(*s)).collect();
        let structure = build(n, &edges);

        let parts = structure.split_disjoint(&seeds);

        // Every vertex appears in exactly one output.
        let mut seen = BTreeSet::new();
        for part in &parts {
            for id in vertex_ids(part) {
                prop_assert!(seen.insert(id), "vertex appears in two outputs");
            }
        }
        prop_assert_eq!(seen, vertex_ids(&structure));

        // Every edge appears in exactly one output, multiplicity preserved.
        let total_edges: usize = parts.iter().map(|p| p.edges().len()).sum();
        prop_assert_eq!(total_edges, structure.edges().len());

        // Property bags survive the copy.
        for part in &parts {
            for id in vertex_ids(part) {
                prop_assert_eq!(structure.thing_props(&id), part.thing_props(&id));
                prop_assert_eq!(structure.type_props(&id), part.type_props(&id));
            }
        }
    }

    /// Property 5: the seeded output is exactly the union of the components
    /// intersecting the seed list; the rest stay separate.
    #[test]
    fn prop_seeded_output_collects_seeded_components(
        n in 1usize..10,
        raw_edges in proptest::collection::vec((0usize..10, 0usize..10), 0..20),
        raw_seeds in proptest::collection::vec(0usize..10, 1..4),
    ) {
        let edges: Vec<(usize, usize)> =
            raw_edges.into_iter().filter(|(a, b)| *a < n && *b < n).collect();
        let seeds: Vec<usize> = raw_seeds.into_iter().filter(|s| *s < n).collect();
        prop_assume!(!seeds.is_empty());
        let structure = build(n, &edges);

        let parts = structure.split_disjoint(
            &seeds.iter().map(|s| var(*s)).collect::<Vec<_>>(),
        );

        let expected_first: BTreeSet<Identifier> = seeds
            .iter()
            .flat_map(|s| component_of(*s, n, &edges))
            .map(var)
            .collect();
        prop_assert_eq!(vertex_ids(&parts[0]), expected_first.clone());

        // No later output touches a seeded component.
        for part in &parts[1..] {
            for id in vertex_ids(part) {
                prop_assert!(!expected_first.contains(&id));
            }
        }
    }
}
