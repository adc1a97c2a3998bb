//! # lattice-kernel
//!
//! Transactional typed-graph storage core: the composite of an ordered KV
//! engine with optimistic snapshot transactions, a schema type lattice with
//! override-aware inheritance, and the traversal `Structure` handed to the
//! query planner.
//!
//! ## Architecture
//!
//! ```text
//! Session ── Transaction (Schema | Data) ── TransactionStorage ── KvEngine
//!                  │                               │
//!           SchemaGraph / ThingGraph        iterator registry +
//!           (typed graph store)             recycled cursor pool
//!                  │
//!           lattice (inheritance, overrides, validation)
//!
//! Query pipeline ── Structure ── split_disjoint ── planner (external)
//! ```
//!
//! ## Consistency contract
//!
//! - A data transaction opened after a schema commit returns observes the
//!   committed schema: schema commits hold the database's
//!   data-read/schema-write lock across flush and KV commit, and data
//!   transactions take its read side while pinning the schema cache and
//!   their snapshot.
//! - A READ transaction observes exactly its snapshot for its lifetime.
//! - Conflicting data writers are resolved optimistically: the first commit
//!   wins, the loser surfaces `STORAGE_FAILURE`.
//!
//! ## Example
//!
//! ```rust
//! use lattice_kernel::{Database, TransactionOptions, ValueType};
//!
//! # fn main() -> Result<(), lattice_kernel::KernelError> {
//! let db = Database::in_memory("example")?;
//!
//! let schema = db.session_schema();
//! let tx = schema.transaction(TransactionOptions::write())?;
//! let person = tx.put_entity_type("person")?;
//! let name = tx.put_attribute_type("name", ValueType::String)?;
//! tx.set_has(person, name, None)?;
//! tx.commit()?;
//!
//! let data = db.session_data();
//! let tx = data.transaction(TransactionOptions::write())?;
//! let person = tx.type_by_label("person")?;
//! tx.put_entity(person)?;
//! tx.commit()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod database;
pub mod error;
pub mod graph;
pub mod kv;
pub mod lattice;
pub mod session;
pub mod traversal;
pub mod txn;

// Re-exports
pub use database::Database;
pub use error::KernelError;
pub use graph::encoding::VertexId;
pub use graph::{EdgeKind, Kind, Value, ValueType};
pub use kv::{KvCursor, KvEngine, KvTransaction, MemoryEngine, StorageError};
pub use session::{DataSession, SchemaSession, SessionType};
pub use traversal::{Identifier, Predicate, Structure};
pub use txn::data::DataTransaction;
pub use txn::schema::SchemaTransaction;
pub use txn::storage::TransactionStorage;
pub use txn::{TransactionOptions, TransactionType};

/// Snapshot refresh cadence of the schema cache: after this many committed
/// data transactions, the cache's read-only KV transaction is replaced with
/// a fresh snapshot.
pub const SCHEMA_GRAPH_STORAGE_REFRESH_RATE: u64 = 100;
