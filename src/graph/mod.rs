//! Typed graph model and storage.
//!
//! Vertices and edges of both the schema graph (types) and the thing graph
//! (instances) are persisted as kind-prefixed KV records; see [`encoding`]
//! for the key layout. [`schema_graph`] holds the fully loaded schema view,
//! [`thing_graph`] the buffered per-transaction data view.

pub mod encoding;
pub mod schema_graph;
pub mod thing_graph;
pub mod vertex;

use serde::{Deserialize, Serialize};

/// Kind of a typed-graph vertex.
///
/// Type kinds form the schema graph; thing kinds form the data graph. The
/// discriminant order is canonical and matches the storage prefix order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Kind {
    /// Entity type vertex.
    EntityType,
    /// Relation type vertex.
    RelationType,
    /// Attribute type vertex.
    AttributeType,
    /// Role type vertex, owned by a relation type.
    RoleType,
    /// Entity instance.
    Entity,
    /// Relation instance.
    Relation,
    /// Attribute instance.
    Attribute,
    /// Role instance.
    Role,
}

impl Kind {
    /// Whether this kind lives in the schema graph.
    pub fn is_type(self) -> bool {
        matches!(
            self,
            Self::EntityType | Self::RelationType | Self::AttributeType | Self::RoleType
        )
    }

    /// Whether this kind lives in the data graph.
    pub fn is_thing(self) -> bool {
        !self.is_type()
    }

    /// The label of the distinguished root type for a type kind, or `None`
    /// for thing kinds.
    pub fn root_label(self) -> Option<&'static str> {
        match self {
            Self::EntityType => Some("entity"),
            Self::RelationType => Some("relation"),
            Self::AttributeType => Some("attribute"),
            Self::RoleType => Some("role"),
            _ => None,
        }
    }

    /// The thing kind whose instances a type kind describes.
    pub fn instance_kind(self) -> Option<Kind> {
        match self {
            Self::EntityType => Some(Self::Entity),
            Self::RelationType => Some(Self::Relation),
            Self::AttributeType => Some(Self::Attribute),
            Self::RoleType => Some(Self::Role),
            _ => None,
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::EntityType => "entity_type",
            Self::RelationType => "relation_type",
            Self::AttributeType => "attribute_type",
            Self::RoleType => "role_type",
            Self::Entity => "entity",
            Self::Relation => "relation",
            Self::Attribute => "attribute",
            Self::Role => "role",
        };
        write!(f, "{name}")
    }
}

/// Kind of a typed-graph edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    /// Subtyping: child type -> parent type.
    Sub,
    /// Attribute ownership: owner type -> attribute type.
    Has,
    /// Key ownership: owner type -> attribute type.
    Key,
    /// Role playing capability: player type -> role type.
    Plays,
    /// Role declaration: relation type -> role type.
    Relates,
    /// Instance-level role playing: player thing -> role instance.
    Playing,
    /// Instance-level role containment: relation thing -> role instance.
    Relating,
    /// Instance-level attribute ownership: owner thing -> attribute thing.
    HasAttribute,
    /// Shortcut edge: relation thing -> player thing, annotated with the
    /// role type and a repetition index.
    RolePlayer,
}

impl EdgeKind {
    /// Whether this edge kind connects schema-graph vertices.
    pub fn is_type_edge(self) -> bool {
        matches!(self, Self::Sub | Self::Has | Self::Key | Self::Plays | Self::Relates)
    }

    /// Storage discriminant byte. Stable across releases.
    pub(crate) fn code(self) -> u8 {
        match self {
            Self::Sub => 0x01,
            Self::Has => 0x02,
            Self::Key => 0x03,
            Self::Plays => 0x04,
            Self::Relates => 0x05,
            Self::Playing => 0x06,
            Self::Relating => 0x07,
            Self::HasAttribute => 0x08,
            Self::RolePlayer => 0x09,
        }
    }

    pub(crate) fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::Sub),
            0x02 => Some(Self::Has),
            0x03 => Some(Self::Key),
            0x04 => Some(Self::Plays),
            0x05 => Some(Self::Relates),
            0x06 => Some(Self::Playing),
            0x07 => Some(Self::Relating),
            0x08 => Some(Self::HasAttribute),
            0x09 => Some(Self::RolePlayer),
            _ => None,
        }
    }
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Sub => "sub",
            Self::Has => "has",
            Self::Key => "key",
            Self::Plays => "plays",
            Self::Relates => "relates",
            Self::Playing => "playing",
            Self::Relating => "relating",
            Self::HasAttribute => "has_attribute",
            Self::RolePlayer => "role_player",
        };
        write!(f, "{name}")
    }
}

/// Value type of an attribute type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ValueType {
    /// 64-bit signed integer.
    Long,
    /// UTF-8 string.
    String,
    /// Boolean.
    Boolean,
    /// Millisecond-precision UTC datetime.
    DateTime,
    /// 64-bit float. Not keyable: float equality is unfit for identity.
    Double,
}

impl ValueType {
    /// Whether attribute types of this value type may back KEY edges.
    pub fn is_keyable(self) -> bool {
        matches!(self, Self::Long | Self::String | Self::Boolean | Self::DateTime)
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Long => "long",
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::DateTime => "datetime",
            Self::Double => "double",
        };
        write!(f, "{name}")
    }
}

/// A concrete attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// 64-bit signed integer.
    Long(i64),
    /// UTF-8 string.
    String(String),
    /// Boolean.
    Boolean(bool),
    /// UTC datetime.
    DateTime(chrono::DateTime<chrono::Utc>),
    /// 64-bit float.
    Double(f64),
}

impl Value {
    /// The value type this value inhabits.
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Long(_) => ValueType::Long,
            Self::String(_) => ValueType::String,
            Self::Boolean(_) => ValueType::Boolean,
            Self::DateTime(_) => ValueType::DateTime,
            Self::Double(_) => ValueType::Double,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::DateTime(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
        }
    }
}
