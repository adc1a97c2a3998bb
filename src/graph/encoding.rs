//! Key layout for persisted graph records.
//!
//! Every key starts with a record-family prefix byte, followed by the encoded
//! vertex identifiers the record is about. All builder functions here produce
//! prefixes whose final byte is below `0xFF` wherever `get_last` is applied
//! (serial allocation scans a single-byte kind prefix; label bytes are UTF-8,
//! which never contains `0xFF`), upholding the KV adapter's seek contract.
//!
//! Families:
//!
//! | prefix | record | key shape | value |
//! |--------|--------|-----------|-------|
//! | `0x10..=0x17` | vertex | `[kind, serial:8]` | record JSON |
//! | `0x20` | label index | `[0x20, label-utf8]` | vertex id bytes |
//! | `0x30` | type edge | `[0x30, from:9, edge:1, to:9]` | empty |
//! | `0x31` | type edge (reverse) | `[0x31, to:9, edge:1, from:9]` | empty |
//! | `0x32` | edge override | `[0x32, from:9, edge:1, to:9]` | overridden id bytes |
//! | `0x40` | thing edge | `[0x40, from:9, edge:1, to:9, role:9?, rep:2?]` | empty |
//! | `0x41` | thing edge (reverse) | mirrored | empty |
//! | `0x42` | isa index | `[0x42, type:9, thing:9]` | empty |

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{EdgeKind, Kind};
use crate::error::KernelError;

/// Record-family prefix for the label index.
pub const LABEL_INDEX_PREFIX: u8 = 0x20;
/// Record-family prefix for forward type edges.
pub const TYPE_EDGE_PREFIX: u8 = 0x30;
/// Record-family prefix for reverse type edges.
pub const TYPE_EDGE_REVERSE_PREFIX: u8 = 0x31;
/// Record-family prefix for edge override pointers.
pub const OVERRIDE_PREFIX: u8 = 0x32;
/// Record-family prefix for forward thing edges.
pub const THING_EDGE_PREFIX: u8 = 0x40;
/// Record-family prefix for reverse thing edges.
pub const THING_EDGE_REVERSE_PREFIX: u8 = 0x41;
/// Record-family prefix for the type-to-instance index.
pub const ISA_INDEX_PREFIX: u8 = 0x42;

const VERTEX_ID_LEN: usize = 9;

fn kind_prefix(kind: Kind) -> u8 {
    match kind {
        Kind::EntityType => 0x10,
        Kind::RelationType => 0x11,
        Kind::AttributeType => 0x12,
        Kind::RoleType => 0x13,
        Kind::Entity => 0x14,
        Kind::Relation => 0x15,
        Kind::Attribute => 0x16,
        Kind::Role => 0x17,
    }
}

fn kind_from_prefix(prefix: u8) -> Option<Kind> {
    match prefix {
        0x10 => Some(Kind::EntityType),
        0x11 => Some(Kind::RelationType),
        0x12 => Some(Kind::AttributeType),
        0x13 => Some(Kind::RoleType),
        0x14 => Some(Kind::Entity),
        0x15 => Some(Kind::Relation),
        0x16 => Some(Kind::Attribute),
        0x17 => Some(Kind::Role),
        _ => None,
    }
}

/// Stable identity of a typed-graph vertex: a kind plus a serial allocated by
/// [`KeyGenerator`]. Encodes to the vertex's 9-byte storage key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VertexId {
    kind: Kind,
    serial: u64,
}

impl VertexId {
    /// Assemble an id from parts. Serials come from [`KeyGenerator`].
    pub fn new(kind: Kind, serial: u64) -> Self {
        Self { kind, serial }
    }

    /// The vertex kind, encoded in the id's prefix byte.
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// The serial within the kind's keyspace.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Encode to the 9-byte storage key.
    pub fn to_bytes(self) -> [u8; VERTEX_ID_LEN] {
        let mut bytes = [0u8; VERTEX_ID_LEN];
        bytes[0] = kind_prefix(self.kind);
        bytes[1..].copy_from_slice(&self.serial.to_be_bytes());
        bytes
    }

    /// Decode from a storage key.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KernelError> {
        if bytes.len() != VERTEX_ID_LEN {
            return Err(KernelError::internal(format!(
                "vertex id must be {VERTEX_ID_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let kind = kind_from_prefix(bytes[0])
            .ok_or_else(|| KernelError::internal(format!("unknown vertex kind prefix {:#04x}", bytes[0])))?;
        let mut serial = [0u8; 8];
        serial.copy_from_slice(&bytes[1..]);
        Ok(Self { kind, serial: u64::from_be_bytes(serial) })
    }
}

impl std::fmt::Display for VertexId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.serial)
    }
}

/// Prefix under which all vertices of `kind` are stored.
pub fn vertex_kind_prefix(kind: Kind) -> [u8; 1] {
    [kind_prefix(kind)]
}

/// Key of the label-index record mapping `label` to its type vertex.
pub fn label_index_key(label: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + label.len());
    key.push(LABEL_INDEX_PREFIX);
    key.extend_from_slice(label.as_bytes());
    key
}

fn edge_key(family: u8, a: VertexId, kind: EdgeKind, b: VertexId) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 2 * VERTEX_ID_LEN + 1);
    key.push(family);
    key.extend_from_slice(&a.to_bytes());
    key.push(kind.code());
    key.extend_from_slice(&b.to_bytes());
    key
}

/// Key of the forward type-edge record `from -[kind]-> to`.
pub fn type_edge_key(from: VertexId, kind: EdgeKind, to: VertexId) -> Vec<u8> {
    edge_key(TYPE_EDGE_PREFIX, from, kind, to)
}

/// Key of the reverse type-edge record, scanned for in-adjacency.
pub fn type_edge_reverse_key(from: VertexId, kind: EdgeKind, to: VertexId) -> Vec<u8> {
    edge_key(TYPE_EDGE_REVERSE_PREFIX, to, kind, from)
}

/// Key of the override pointer attached to the type edge `from -[kind]-> to`.
pub fn override_key(from: VertexId, kind: EdgeKind, to: VertexId) -> Vec<u8> {
    edge_key(OVERRIDE_PREFIX, from, kind, to)
}

/// Decompose a forward type-edge key into `(from, edge kind, to)`.
pub fn parse_type_edge_key(key: &[u8]) -> Result<(VertexId, EdgeKind, VertexId), KernelError> {
    if key.len() != 1 + 2 * VERTEX_ID_LEN + 1 || key[0] != TYPE_EDGE_PREFIX {
        return Err(KernelError::internal("malformed type edge key"));
    }
    let from = VertexId::from_bytes(&key[1..1 + VERTEX_ID_LEN])?;
    let kind = EdgeKind::from_code(key[1 + VERTEX_ID_LEN])
        .ok_or_else(|| KernelError::internal("unknown edge kind in type edge key"))?;
    let to = VertexId::from_bytes(&key[2 + VERTEX_ID_LEN..])?;
    Ok((from, kind, to))
}

/// Key of a forward thing-edge record. Role-player edges append the role type
/// and a big-endian repetition index so the same (relation, player, role)
/// triple stays distinguishable.
pub fn thing_edge_key(
    from: VertexId,
    kind: EdgeKind,
    to: VertexId,
    role: Option<VertexId>,
    repetition: u16,
) -> Vec<u8> {
    let mut key = edge_key(THING_EDGE_PREFIX, from, kind, to);
    if let Some(role) = role {
        key.extend_from_slice(&role.to_bytes());
        key.extend_from_slice(&repetition.to_be_bytes());
    }
    key
}

/// Key of the mirrored reverse thing-edge record.
pub fn thing_edge_reverse_key(
    from: VertexId,
    kind: EdgeKind,
    to: VertexId,
    role: Option<VertexId>,
    repetition: u16,
) -> Vec<u8> {
    let mut key = edge_key(THING_EDGE_REVERSE_PREFIX, to, kind, from);
    if let Some(role) = role {
        key.extend_from_slice(&role.to_bytes());
        key.extend_from_slice(&repetition.to_be_bytes());
    }
    key
}

/// Scan prefix for all forward thing edges of `kind` out of `from`.
pub fn thing_edge_prefix(from: VertexId, kind: EdgeKind) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + VERTEX_ID_LEN + 1);
    key.push(THING_EDGE_PREFIX);
    key.extend_from_slice(&from.to_bytes());
    key.push(kind.code());
    key
}

/// Decompose a forward thing-edge key.
pub fn parse_thing_edge_key(
    key: &[u8],
) -> Result<(VertexId, EdgeKind, VertexId, Option<VertexId>, u16), KernelError> {
    let bare = 1 + 2 * VERTEX_ID_LEN + 1;
    let with_role = bare + VERTEX_ID_LEN + 2;
    if (key.len() != bare && key.len() != with_role) || key[0] != THING_EDGE_PREFIX {
        return Err(KernelError::internal("malformed thing edge key"));
    }
    let from = VertexId::from_bytes(&key[1..1 + VERTEX_ID_LEN])?;
    let kind = EdgeKind::from_code(key[1 + VERTEX_ID_LEN])
        .ok_or_else(|| KernelError::internal("unknown edge kind in thing edge key"))?;
    let to = VertexId::from_bytes(&key[2 + VERTEX_ID_LEN..bare])?;
    if key.len() == bare {
        return Ok((from, kind, to, None, 0));
    }
    let role = VertexId::from_bytes(&key[bare..bare + VERTEX_ID_LEN])?;
    let repetition = u16::from_be_bytes([key[with_role - 2], key[with_role - 1]]);
    Ok((from, kind, to, Some(role), repetition))
}

/// Key of the isa-index record linking a type to one of its direct instances.
pub fn isa_index_key(type_id: VertexId, thing: VertexId) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 2 * VERTEX_ID_LEN);
    key.push(ISA_INDEX_PREFIX);
    key.extend_from_slice(&type_id.to_bytes());
    key.extend_from_slice(&thing.to_bytes());
    key
}

/// Scan prefix for the isa index of one type.
pub fn isa_index_prefix(type_id: VertexId) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + VERTEX_ID_LEN);
    key.push(ISA_INDEX_PREFIX);
    key.extend_from_slice(&type_id.to_bytes());
    key
}

/// Extract the instance id from an isa-index key.
pub fn parse_isa_index_key(key: &[u8]) -> Result<VertexId, KernelError> {
    if key.len() != 1 + 2 * VERTEX_ID_LEN || key[0] != ISA_INDEX_PREFIX {
        return Err(KernelError::internal("malformed isa index key"));
    }
    VertexId::from_bytes(&key[1 + VERTEX_ID_LEN..])
}

/// Monotonic serial allocator for one half of the keyspace (schema kinds or
/// thing kinds).
///
/// The first allocation for a kind seeds the counter from the greatest
/// persisted vertex key under the kind's single-byte prefix; later
/// allocations increment in memory. The database owns one generator for
/// schema kinds and one for thing kinds, so schema serials survive data-only
/// restarts untouched.
pub struct KeyGenerator {
    counters: Mutex<BTreeMap<Kind, u64>>,
}

impl KeyGenerator {
    /// Create a generator with no seeded counters.
    pub fn new() -> Self {
        Self { counters: Mutex::new(BTreeMap::new()) }
    }

    /// Allocate the next id of `kind`. `last_key` resolves the greatest
    /// persisted key under a prefix (a `get_last` through the calling
    /// transaction's storage).
    pub fn next(
        &self,
        kind: Kind,
        last_key: impl FnOnce(&[u8]) -> Result<Option<Vec<u8>>, KernelError>,
    ) -> Result<VertexId, KernelError> {
        let mut counters = self.counters.lock();
        let next = match counters.get(&kind) {
            Some(current) => current + 1,
            None => match last_key(&vertex_kind_prefix(kind))? {
                Some(key) => VertexId::from_bytes(&key)?.serial() + 1,
                None => 0,
            },
        };
        counters.insert(kind, next);
        Ok(VertexId::new(kind, next))
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_id_round_trip() {
        let id = VertexId::new(Kind::AttributeType, 42);
        let decoded = VertexId::from_bytes(&id.to_bytes()).unwrap();
        assert_eq!(decoded, id);
        assert_eq!(decoded.kind(), Kind::AttributeType);
        assert_eq!(decoded.serial(), 42);
    }

    #[test]
    fn test_vertex_ids_order_by_kind_then_serial() {
        let a = VertexId::new(Kind::EntityType, 9).to_bytes();
        let b = VertexId::new(Kind::RelationType, 0).to_bytes();
        assert!(a < b);
    }

    #[test]
    fn test_type_edge_key_round_trip() {
        let from = VertexId::new(Kind::EntityType, 1);
        let to = VertexId::new(Kind::AttributeType, 2);
        let key = type_edge_key(from, EdgeKind::Key, to);
        assert_eq!(parse_type_edge_key(&key).unwrap(), (from, EdgeKind::Key, to));
    }

    #[test]
    fn test_role_player_key_round_trip() {
        let relation = VertexId::new(Kind::Relation, 7);
        let player = VertexId::new(Kind::Entity, 3);
        let role = VertexId::new(Kind::RoleType, 1);
        let key = thing_edge_key(relation, EdgeKind::RolePlayer, player, Some(role), 2);
        assert_eq!(
            parse_thing_edge_key(&key).unwrap(),
            (relation, EdgeKind::RolePlayer, player, Some(role), 2)
        );
    }

    #[test]
    fn test_generator_seeds_from_storage() {
        let generator = KeyGenerator::new();
        let persisted = VertexId::new(Kind::EntityType, 5);
        let id = generator
            .next(Kind::EntityType, |_| Ok(Some(persisted.to_bytes().to_vec())))
            .unwrap();
        assert_eq!(id.serial(), 6);

        // Second allocation must not consult storage again.
        let id = generator
            .next(Kind::EntityType, |_| panic!("storage consulted twice"))
            .unwrap();
        assert_eq!(id.serial(), 7);
    }

    #[test]
    fn test_generator_starts_empty_keyspace_at_zero() {
        let generator = KeyGenerator::new();
        let id = generator.next(Kind::Entity, |_| Ok(None)).unwrap();
        assert_eq!(id.serial(), 0);
    }
}
