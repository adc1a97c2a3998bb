//! Snapshot isolation, commit ordering, and lifecycle scenarios.

use std::sync::Arc;
use std::thread;

use lattice_kernel::{
    Database, KernelError, MemoryEngine, TransactionOptions, Value, ValueType,
};

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// A database with `person` (has `name`) committed.
fn person_database(name: &str) -> Arc<Database> {
    let db = Database::in_memory(name).unwrap();
    let session = db.session_schema();
    let tx = session.transaction(TransactionOptions::write()).unwrap();
    let person = tx.put_entity_type("person").unwrap();
    let name_attr = tx.put_attribute_type("name", ValueType::String).unwrap();
    tx.set_has(person, name_attr, None).unwrap();
    tx.commit().unwrap();
    db
}

// ─────────────────────────────────────────────────────────────────────────────
// S3: schema-data isolation
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_data_transaction_keeps_its_schema_snapshot() {
    let db = person_database("s3");
    let data = db.session_data();

    // tx1 pins the schema cache before `vehicle` exists.
    let tx1 = data.transaction(TransactionOptions::write()).unwrap();

    let schema = db.session_schema();
    let tx2 = schema.transaction(TransactionOptions::write()).unwrap();
    tx2.put_entity_type("vehicle").unwrap();
    tx2.commit().unwrap();

    // tx1 still sees its pinned snapshot of the schema.
    let err = tx1.type_by_label("vehicle").unwrap_err();
    assert_eq!(err.code(), "TYPE_NOT_FOUND");

    // Unrelated data writes under the old schema still commit.
    let person = tx1.type_by_label("person").unwrap();
    tx1.put_entity(person).unwrap();
    tx1.commit().unwrap();

    // A data transaction opened after the schema commit returned sees it.
    let tx3 = data.transaction(TransactionOptions::read()).unwrap();
    assert!(tx3.type_by_label("vehicle").is_ok());
}

// ─────────────────────────────────────────────────────────────────────────────
// S4: optimistic conflicts and the schema-write drain
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_conflicting_data_writers_one_wins() {
    let db = person_database("s4");
    let data = db.session_data();

    // Persist an entity and an attribute for both writers to contend on.
    let setup = data.transaction(TransactionOptions::write()).unwrap();
    let person = setup.type_by_label("person").unwrap();
    let name = setup.type_by_label("name").unwrap();
    let entity = setup.put_entity(person).unwrap();
    let value = setup.put_attribute(name, Value::String("x".to_string())).unwrap();
    setup.commit().unwrap();

    let a = data.transaction(TransactionOptions::write()).unwrap();
    let b = data.transaction(TransactionOptions::write()).unwrap();
    a.put_has(entity, value).unwrap();
    b.put_has(entity, value).unwrap();

    a.commit().unwrap();
    let err = b.commit().unwrap_err();
    assert_eq!(err.code(), "STORAGE_FAILURE");
}

#[test]
fn test_schema_commit_proceeds_while_data_transactions_are_open() {
    let db = person_database("drain");
    let data = db.session_data();

    // Both data transactions are past their open phase; the schema commit
    // must not block on them.
    let tx_a = data.transaction(TransactionOptions::write()).unwrap();
    let tx_b = data.transaction(TransactionOptions::write()).unwrap();

    let schema_db = Arc::clone(&db);
    let schema_thread = thread::spawn(move || {
        let session = schema_db.session_schema();
        let tx = session.transaction(TransactionOptions::write()).unwrap();
        tx.put_entity_type("vehicle").unwrap();
        tx.commit().unwrap();
    });
    schema_thread.join().unwrap();

    // The drained writers commit their unrelated work afterwards.
    let person = tx_a.type_by_label("person").unwrap();
    tx_a.put_entity(person).unwrap();
    tx_a.commit().unwrap();
    let person = tx_b.type_by_label("person").unwrap();
    tx_b.put_entity(person).unwrap();
    tx_b.commit().unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Property 1: schema commits are visible to later data transactions
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_schema_visibility_across_threads() {
    let db = person_database("visibility");
    let mut threads = Vec::new();
    for i in 0..4 {
        let db = Arc::clone(&db);
        threads.push(thread::spawn(move || {
            let label = format!("type_{i}");
            let session = db.session_schema();
            let tx = session.transaction(TransactionOptions::write()).unwrap();
            tx.put_entity_type(&label).unwrap();
            if tx.commit().is_ok() {
                // Every data transaction opened strictly after the commit
                // returned must observe the type.
                let data = db.session_data();
                let read = data.transaction(TransactionOptions::read()).unwrap();
                assert!(read.type_by_label(&label).is_ok(), "{label} invisible after commit");
            }
        }));
    }
    for thread in threads {
        thread.join().unwrap();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Property 2: concurrent schema commits
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_overlapping_schema_commits_are_detected() {
    let db = person_database("property2");
    let schema = db.session_schema();

    let a = schema.transaction(TransactionOptions::write()).unwrap();
    let b = schema.transaction(TransactionOptions::write()).unwrap();
    let person_a = a.type_by_label("person").unwrap();
    let person_b = b.type_by_label("person").unwrap();
    a.set_abstract(person_a, true).unwrap();
    b.set_abstract(person_b, true).unwrap();

    a.commit().unwrap();
    let err = b.commit().unwrap_err();
    assert_eq!(err.code(), "STORAGE_FAILURE");
}

// ─────────────────────────────────────────────────────────────────────────────
// Property 7 & lifecycle: close, rollback, illegal commits
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_closed_transaction_rejects_everything() {
    let db = person_database("closed");
    let data = db.session_data();
    let tx = data.transaction(TransactionOptions::read()).unwrap();
    let person = tx.type_by_label("person").unwrap();

    let storage = tx.storage().unwrap();
    let mut iter = storage
        .iterate(&lattice_kernel::graph::encoding::isa_index_prefix(person))
        .unwrap();

    tx.close();
    assert!(!tx.is_open());
    assert!(matches!(tx.instances(person), Err(KernelError::TransactionClosed)));
    assert!(matches!(tx.storage(), Err(KernelError::TransactionClosed)));
    assert!(matches!(iter.next(), Some(Err(KernelError::TransactionClosed))));
    // close is idempotent
    tx.close();
}

#[test]
fn test_read_transactions_cannot_commit() {
    let db = person_database("illegal");
    let data = db.session_data();
    let tx = data.transaction(TransactionOptions::read()).unwrap();
    assert!(matches!(tx.commit(), Err(KernelError::IllegalCommit)));
    // The failed commit closed the transaction; a second commit reports that.
    assert!(matches!(tx.commit(), Err(KernelError::TransactionClosed)));
}

#[test]
fn test_commit_is_one_shot() {
    let db = person_database("oneshot");
    let data = db.session_data();
    let tx = data.transaction(TransactionOptions::write()).unwrap();
    let person = tx.type_by_label("person").unwrap();
    tx.put_entity(person).unwrap();
    tx.commit().unwrap();
    assert!(matches!(tx.commit(), Err(KernelError::TransactionClosed)));
}

#[test]
fn test_rollback_discards_writes_but_leaves_transaction_open() {
    let db = person_database("rollback");
    let data = db.session_data();
    let tx = data.transaction(TransactionOptions::write()).unwrap();
    let person = tx.type_by_label("person").unwrap();
    tx.put_entity(person).unwrap();

    tx.rollback().unwrap();
    assert!(tx.is_open());
    assert_eq!(tx.instances(person).unwrap(), vec![]);

    // Still usable for further writes after the rollback.
    let entity = tx.put_entity(person).unwrap();
    tx.commit().unwrap();

    let read = data.transaction(TransactionOptions::read()).unwrap();
    assert_eq!(read.instances(person).unwrap(), vec![entity]);
}

#[test]
fn test_session_close_closes_live_transactions() {
    let db = person_database("session_close");
    let data = db.session_data();
    let tx = data.transaction(TransactionOptions::read()).unwrap();
    data.close();
    assert!(!tx.is_open());
    assert!(matches!(
        data.transaction(TransactionOptions::read()),
        Err(KernelError::SessionClosed)
    ));
}

// ─────────────────────────────────────────────────────────────────────────────
// Schema cache reference counting
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_evicted_cache_snapshot_released_with_last_holder() {
    let engine = Arc::new(MemoryEngine::new());
    let db = Database::open("refcount", engine).unwrap();
    let data = db.session_data();

    let tx1 = data.transaction(TransactionOptions::write()).unwrap();

    // A schema commit evicts the cache tx1 still pins.
    let schema = db.session_schema();
    let stx = schema.transaction(TransactionOptions::write()).unwrap();
    stx.put_entity_type("vehicle").unwrap();
    stx.commit().unwrap();

    // The pinned cache keeps answering from the old schema until released.
    assert!(tx1.type_by_label("vehicle").is_err());
    tx1.close();

    // A new borrower gets a freshly built cache with the new schema.
    let tx2 = data.transaction(TransactionOptions::read()).unwrap();
    assert!(tx2.type_by_label("vehicle").is_ok());
}
