//! Kernel benchmarks: iterator recycling and structure splitting.
//!
//! Run with: `cargo bench --bench kernel`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;

use lattice_kernel::traversal::{Identifier, Predicate, Structure};
use lattice_kernel::{Database, MemoryEngine, TransactionOptions};

/// A database holding one entity type with `count` committed instances.
fn seeded_database(count: usize) -> (Arc<Database>, lattice_kernel::VertexId) {
    let db = Database::open("bench", Arc::new(MemoryEngine::new())).unwrap();

    let schema = db.session_schema();
    let tx = schema.transaction(TransactionOptions::write()).unwrap();
    let person = tx.put_entity_type("person").unwrap();
    tx.commit().unwrap();

    let data = db.session_data();
    let tx = data.transaction(TransactionOptions::write()).unwrap();
    for _ in 0..count {
        tx.put_entity(person).unwrap();
    }
    tx.commit().unwrap();

    (db, person)
}

/// A chain structure `v0 – v1 – … – v(n-1)`.
fn chain_structure(n: usize) -> Structure {
    let mut structure = Structure::new();
    for i in 0..n {
        structure.thing_vertex(Identifier::var(format!("v{i}"))).unwrap();
    }
    for i in 1..n {
        structure
            .predicate_edge(
                Identifier::var(format!("v{}", i - 1)),
                Identifier::var(format!("v{i}")),
                Predicate::Eq,
            )
            .unwrap();
    }
    structure
}

fn bench_prefix_iteration(c: &mut Criterion) {
    let mut group = c.benchmark_group("prefix_iteration");
    for count in [64usize, 512] {
        let (db, person) = seeded_database(count);
        let data = db.session_data();
        let reader = data.transaction(TransactionOptions::read()).unwrap();
        let storage = reader.storage().unwrap();
        let prefix = lattice_kernel::graph::encoding::isa_index_prefix(person);

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("recycled_drain", count), &count, |b, _| {
            b.iter(|| {
                let drained = storage.iterate(&prefix).unwrap().map(Result::unwrap).count();
                black_box(drained)
            });
        });
        reader.close();
    }
    group.finish();
}

fn bench_split_disjoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("split_disjoint");
    for n in [100usize, 1000] {
        let structure = chain_structure(n);
        let seeds = [Identifier::var("v0")];

        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("unseeded", n), &n, |b, _| {
            b.iter(|| black_box(structure.split_disjoint(&[])));
        });
        group.bench_with_input(BenchmarkId::new("seeded", n), &n, |b, _| {
            b.iter(|| black_box(structure.split_disjoint(&seeds)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_prefix_iteration, bench_split_disjoint);
criterion_main!(benches);
