//! The schema type lattice: inheritance, overrides, visibility, validation.
//!
//! All operations here work on an in-memory [`SchemaGraph`]; the owning
//! schema transaction serialises access and flushes at commit. Visibility
//! queries are lazy: [`VisibleSeq`] walks the ancestor chain on demand,
//! yielding declared targets first, then inherited targets from the nearest
//! ancestor outwards, hiding everything shadowed by an override along the
//! way:
//!
//! ```text
//! keys(T) = declared_keys(T) ∪ { a ∈ keys(parent(T)) : a ∉ overridden_keys_at(T) }
//! ```
//!
//! `attributes` is the same recursion over KEY ∪ HAS, `plays` over PLAYS.
//! Equality throughout is vertex identity.

use std::collections::BTreeSet;

use crate::error::KernelError;
use crate::graph::encoding::VertexId;
use crate::graph::schema_graph::SchemaGraph;
use crate::graph::vertex::TypeVertexRecord;
use crate::graph::{EdgeKind, Kind, ValueType};

const KEY_KINDS: &[EdgeKind] = &[EdgeKind::Key];
const OWNS_KINDS: &[EdgeKind] = &[EdgeKind::Key, EdgeKind::Has];
const PLAYS_KINDS: &[EdgeKind] = &[EdgeKind::Plays];

fn guard_not_root(record: &TypeVertexRecord) -> Result<(), KernelError> {
    if record.body.root {
        Err(KernelError::InvalidRootTypeMutation { label: record.body.label.clone() })
    } else {
        Ok(())
    }
}

fn guard_kind(record: &TypeVertexRecord, expected: Kind) -> Result<(), KernelError> {
    if record.kind() == expected {
        Ok(())
    } else {
        Err(KernelError::IllegalCast {
            expected: expected.to_string(),
            actual: record.kind().to_string(),
        })
    }
}

/// Proper supertypes of `t`, nearest first, ending at the kind root.
pub fn supertypes(graph: &SchemaGraph, t: VertexId) -> Result<Vec<VertexId>, KernelError> {
    let mut result = Vec::new();
    let mut seen = BTreeSet::from([t]);
    let mut current = graph.get(t)?.sub_parent();
    while let Some(parent) = current {
        if !seen.insert(parent) {
            return Err(KernelError::internal(format!("subtyping cycle through {parent}")));
        }
        result.push(parent);
        current = graph.get(parent)?.sub_parent();
    }
    Ok(result)
}

/// Proper subtypes of `t`, breadth-first.
pub fn subtypes(graph: &SchemaGraph, t: VertexId) -> Result<Vec<VertexId>, KernelError> {
    let mut result = Vec::new();
    let mut frontier = vec![t];
    while let Some(current) = frontier.pop() {
        for child in graph.get(current)?.ins(EdgeKind::Sub) {
            result.push(child);
            frontier.push(child);
        }
    }
    Ok(result)
}

/// Whether `sub` is `sup` or a transitive subtype of it.
pub fn is_subtype_inclusive(
    graph: &SchemaGraph,
    sub: VertexId,
    sup: VertexId,
) -> Result<bool, KernelError> {
    Ok(sub == sup || supertypes(graph, sub)?.contains(&sup))
}

/// Lazy visible-set sequence over one edge-kind group.
///
/// Restartable by re-creating; each `next` advances at most one ancestor
/// level. Yields declared targets in id order, then each ancestor's visible
/// remainder, without materialising the ancestor walk.
pub struct VisibleSeq<'a> {
    graph: &'a SchemaGraph,
    kinds: &'static [EdgeKind],
    current: Option<VertexId>,
    level: std::vec::IntoIter<VertexId>,
    hidden: BTreeSet<VertexId>,
    emitted: BTreeSet<VertexId>,
    walked: BTreeSet<VertexId>,
    failed: bool,
}

impl<'a> VisibleSeq<'a> {
    fn new(graph: &'a SchemaGraph, t: VertexId, kinds: &'static [EdgeKind]) -> Self {
        Self {
            graph,
            kinds,
            current: Some(t),
            level: Vec::new().into_iter(),
            hidden: BTreeSet::new(),
            emitted: BTreeSet::new(),
            walked: BTreeSet::new(),
            failed: false,
        }
    }

    fn declared_at(record: &TypeVertexRecord, kinds: &[EdgeKind]) -> Vec<VertexId> {
        let mut targets = BTreeSet::new();
        for kind in kinds {
            targets.extend(record.outs(*kind));
        }
        targets.into_iter().collect()
    }
}

impl<'a> Iterator for VisibleSeq<'a> {
    type Item = Result<VertexId, KernelError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            for target in self.level.by_ref() {
                if !self.hidden.contains(&target) && self.emitted.insert(target) {
                    return Some(Ok(target));
                }
            }
            let vertex = self.current?;
            if !self.walked.insert(vertex) {
                self.failed = true;
                return Some(Err(KernelError::internal(format!(
                    "subtyping cycle through {vertex}"
                ))));
            }
            let record = match self.graph.get(vertex) {
                Ok(record) => record,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            };
            self.level = Self::declared_at(record, self.kinds).into_iter();
            // Overrides declared here shadow ancestors, not this level.
            self.hidden.extend(record.overridden_targets(self.kinds));
            self.current = record.sub_parent();
        }
    }
}

/// Visible key attributes of `t`.
pub fn keys<'a>(graph: &'a SchemaGraph, t: VertexId) -> VisibleSeq<'a> {
    VisibleSeq::new(graph, t, KEY_KINDS)
}

/// Visible attributes of `t` (keys and plain ownerships).
pub fn attributes<'a>(graph: &'a SchemaGraph, t: VertexId) -> VisibleSeq<'a> {
    VisibleSeq::new(graph, t, OWNS_KINDS)
}

/// Visible role types `t` can play.
pub fn plays<'a>(graph: &'a SchemaGraph, t: VertexId) -> VisibleSeq<'a> {
    VisibleSeq::new(graph, t, PLAYS_KINDS)
}

fn filter_value_type<'a>(
    graph: &'a SchemaGraph,
    seq: VisibleSeq<'a>,
    value_type: ValueType,
) -> impl Iterator<Item = Result<VertexId, KernelError>> + 'a {
    seq.filter(move |item| match item {
        Ok(id) => graph
            .get(*id)
            .is_ok_and(|record| record.body.value_type == Some(value_type)),
        Err(_) => true,
    })
}

/// Visible attributes filtered to one value type.
pub fn attributes_with_value_type<'a>(
    graph: &'a SchemaGraph,
    t: VertexId,
    value_type: ValueType,
) -> impl Iterator<Item = Result<VertexId, KernelError>> + 'a {
    filter_value_type(graph, attributes(graph, t), value_type)
}

/// Visible keys filtered to one value type.
pub fn keys_with_value_type<'a>(
    graph: &'a SchemaGraph,
    t: VertexId,
    value_type: ValueType,
) -> impl Iterator<Item = Result<VertexId, KernelError>> + 'a {
    filter_value_type(graph, keys(graph, t), value_type)
}

/// Roles declared on a relation type, in id order.
pub fn relates(graph: &SchemaGraph, relation: VertexId) -> Result<Vec<VertexId>, KernelError> {
    let record = graph.get(relation)?;
    guard_kind(record, Kind::RelationType)?;
    Ok(record.outs(EdgeKind::Relates).collect())
}

/// Create a type of `kind` with `label`, subtyped under the kind root.
pub fn define_type(
    graph: &mut SchemaGraph,
    id: VertexId,
    label: &str,
    value_type: Option<ValueType>,
) -> Result<VertexId, KernelError> {
    if graph.by_label(label).is_some() {
        return Err(KernelError::LabelTaken { label: label.to_string() });
    }
    let root = graph.root(id.kind())?;
    let mut record = TypeVertexRecord::new(id, label, false);
    record.body.value_type = value_type;
    graph.insert_vertex(record);
    graph.put_edge(id, EdgeKind::Sub, root)?;
    Ok(id)
}

/// Re-parent `t` under `parent`. Idempotent.
pub fn set_supertype(
    graph: &mut SchemaGraph,
    t: VertexId,
    parent: VertexId,
) -> Result<(), KernelError> {
    let record = graph.get(t)?;
    guard_not_root(record)?;
    guard_kind(graph.get(parent)?, record.kind())?;
    if record.sub_parent() == Some(parent) {
        return Ok(());
    }
    if is_subtype_inclusive(graph, parent, t)? {
        return Err(KernelError::CyclicSupertype {
            label: graph.get(t)?.body.label.clone(),
            supertype: graph.get(parent)?.body.label.clone(),
        });
    }
    if t.kind() == Kind::AttributeType && !graph.get(parent)?.body.root {
        let declared = graph.get(t)?.body.value_type;
        let inherited = graph.get(parent)?.body.value_type;
        if declared != inherited {
            return Err(KernelError::IllegalCast {
                expected: inherited.map(|v| v.to_string()).unwrap_or_default(),
                actual: declared.map(|v| v.to_string()).unwrap_or_default(),
            });
        }
    }
    if let Some(old) = graph.get(t)?.sub_parent() {
        graph.delete_edge(t, EdgeKind::Sub, old)?;
    }
    graph.put_edge(t, EdgeKind::Sub, parent)
}

/// Set or clear the abstract flag.
pub fn set_abstract(
    graph: &mut SchemaGraph,
    t: VertexId,
    is_abstract: bool,
) -> Result<(), KernelError> {
    guard_not_root(graph.get(t)?)?;
    graph.set_abstract(t, is_abstract)
}

/// Re-label a type.
pub fn set_label(graph: &mut SchemaGraph, t: VertexId, label: &str) -> Result<(), KernelError> {
    guard_not_root(graph.get(t)?)?;
    graph.set_label(t, label)
}

/// Shared precondition walk for KEY and HAS declarations.
///
/// `edge_kind` is the kind being declared; the twin kind is the one it is
/// mutually exclusive with on the same attribute.
fn set_owns(
    graph: &mut SchemaGraph,
    t: VertexId,
    attr: VertexId,
    edge_kind: EdgeKind,
    overridden: Option<VertexId>,
) -> Result<(), KernelError> {
    let record = graph.get(t)?;
    guard_not_root(record)?;
    guard_kind(graph.get(attr)?, Kind::AttributeType)?;

    let label = record.body.label.clone();
    let attr_label = graph.get(attr)?.body.label.clone();

    if edge_kind == EdgeKind::Key {
        let value_type = graph.get(attr)?.body.value_type;
        if !value_type.is_some_and(ValueType::is_keyable) {
            return Err(KernelError::InvalidKeyValueType {
                label: attr_label,
                value_type: value_type.map(|v| v.to_string()).unwrap_or_default(),
            });
        }
    }

    let twin = if edge_kind == EdgeKind::Key { EdgeKind::Has } else { EdgeKind::Key };
    if graph.get(t)?.has_out(twin, attr) {
        return Err(KernelError::AlreadyOwned { label, target: attr_label });
    }
    if graph.get(t)?.has_out(edge_kind, attr) {
        // Idempotent re-declaration; only re-installing the override below.
        if overridden.is_none() {
            return Ok(());
        }
    }

    let inherited = match graph.get(t)?.sub_parent() {
        Some(parent) => attributes(graph, parent).collect::<Result<BTreeSet<_>, _>>()?,
        None => BTreeSet::new(),
    };

    match overridden {
        None => {
            if inherited.contains(&attr) {
                return Err(KernelError::AlreadyOwned { label, target: attr_label });
            }
        }
        Some(overridden) => {
            let overridden_label = graph.get(overridden)?.body.label.clone();
            if !inherited.contains(&overridden)
                || graph.get(t)?.has_out(EdgeKind::Key, overridden)
                || graph.get(t)?.has_out(EdgeKind::Has, overridden)
            {
                return Err(KernelError::InvalidOverrideNotAvailable {
                    label,
                    overridden: overridden_label,
                });
            }
            if !is_subtype_inclusive(graph, attr, overridden)? {
                return Err(KernelError::InvalidOverrideNotSupertype {
                    label: attr_label,
                    overridden: overridden_label,
                });
            }
        }
    }

    graph.put_edge(t, edge_kind, attr)?;
    if let Some(overridden) = overridden {
        graph.set_override(t, edge_kind, attr, overridden)?;
    }
    Ok(())
}

/// Declare `attr` as a key of `t`, optionally overriding an inherited
/// attribute.
pub fn set_key(
    graph: &mut SchemaGraph,
    t: VertexId,
    attr: VertexId,
    overridden: Option<VertexId>,
) -> Result<(), KernelError> {
    set_owns(graph, t, attr, EdgeKind::Key, overridden)
}

/// Declare `attr` as a plain attribute of `t`, optionally overriding an
/// inherited attribute.
pub fn set_has(
    graph: &mut SchemaGraph,
    t: VertexId,
    attr: VertexId,
    overridden: Option<VertexId>,
) -> Result<(), KernelError> {
    set_owns(graph, t, attr, EdgeKind::Has, overridden)
}

/// Declare that `t` can play `role`, optionally overriding an inherited role.
pub fn set_plays(
    graph: &mut SchemaGraph,
    t: VertexId,
    role: VertexId,
    overridden: Option<VertexId>,
) -> Result<(), KernelError> {
    let record = graph.get(t)?;
    guard_not_root(record)?;
    guard_kind(graph.get(role)?, Kind::RoleType)?;
    let label = record.body.label.clone();

    if graph.get(t)?.has_out(EdgeKind::Plays, role) && overridden.is_none() {
        return Ok(());
    }

    let inherited = match graph.get(t)?.sub_parent() {
        Some(parent) => plays(graph, parent).collect::<Result<BTreeSet<_>, _>>()?,
        None => BTreeSet::new(),
    };

    match overridden {
        None => {
            if inherited.contains(&role) {
                return Err(KernelError::AlreadyOwned {
                    label,
                    target: graph.get(role)?.body.label.clone(),
                });
            }
        }
        Some(overridden) => {
            let overridden_label = graph.get(overridden)?.body.label.clone();
            if !inherited.contains(&overridden) || graph.get(t)?.has_out(EdgeKind::Plays, overridden)
            {
                return Err(KernelError::InvalidOverrideNotAvailable {
                    label,
                    overridden: overridden_label,
                });
            }
            if !is_subtype_inclusive(graph, role, overridden)? {
                return Err(KernelError::InvalidOverrideNotSupertype {
                    label: graph.get(role)?.body.label.clone(),
                    overridden: overridden_label,
                });
            }
        }
    }

    graph.put_edge(t, EdgeKind::Plays, role)?;
    if let Some(overridden) = overridden {
        graph.set_override(t, EdgeKind::Plays, role, overridden)?;
    }
    Ok(())
}

/// Declare a role on a relation type, creating the role-type vertex.
pub fn set_relates(
    graph: &mut SchemaGraph,
    relation: VertexId,
    role_id: VertexId,
    role_label: &str,
) -> Result<VertexId, KernelError> {
    let record = graph.get(relation)?;
    guard_not_root(record)?;
    guard_kind(record, Kind::RelationType)?;
    if let Some(existing) = graph.by_label(role_label) {
        if graph.get(relation)?.has_out(EdgeKind::Relates, existing) {
            return Ok(existing);
        }
        return Err(KernelError::LabelTaken { label: role_label.to_string() });
    }
    let role = define_type(graph, role_id, role_label, None)?;
    graph.put_edge(relation, EdgeKind::Relates, role)?;
    Ok(role)
}

fn unset_edge(
    graph: &mut SchemaGraph,
    t: VertexId,
    kind: EdgeKind,
    to: VertexId,
) -> Result<(), KernelError> {
    guard_not_root(graph.get(t)?)?;
    if graph.get(t)?.has_out(kind, to) {
        graph.delete_edge(t, kind, to)?;
    }
    Ok(())
}

/// Remove a declared KEY edge if present.
pub fn unset_key(graph: &mut SchemaGraph, t: VertexId, attr: VertexId) -> Result<(), KernelError> {
    unset_edge(graph, t, EdgeKind::Key, attr)
}

/// Remove a declared HAS edge if present.
pub fn unset_has(graph: &mut SchemaGraph, t: VertexId, attr: VertexId) -> Result<(), KernelError> {
    unset_edge(graph, t, EdgeKind::Has, attr)
}

/// Remove a declared PLAYS edge if present.
pub fn unset_plays(graph: &mut SchemaGraph, t: VertexId, role: VertexId) -> Result<(), KernelError> {
    unset_edge(graph, t, EdgeKind::Plays, role)
}

/// Remove a declared RELATES edge if present. The role-type vertex survives
/// under its label; drop it with [`delete_type`].
pub fn unset_relates(
    graph: &mut SchemaGraph,
    relation: VertexId,
    role: VertexId,
) -> Result<(), KernelError> {
    guard_kind(graph.get(relation)?, Kind::RelationType)?;
    unset_edge(graph, relation, EdgeKind::Relates, role)
}

/// Delete `t`. Fails while any proper subtype exists or any instance exists
/// in the subtree; relation types cascade into their declared roles.
pub fn delete_type(
    graph: &mut SchemaGraph,
    t: VertexId,
    mut has_instances: impl FnMut(VertexId) -> Result<bool, KernelError>,
) -> Result<(), KernelError> {
    let record = graph.get(t)?;
    guard_not_root(record)?;
    let label = record.body.label.clone();
    if record.ins(EdgeKind::Sub).next().is_some() || has_instances(t)? {
        return Err(KernelError::TypeInUse { label });
    }
    let roles: Vec<VertexId> = graph.get(t)?.outs(EdgeKind::Relates).collect();
    for role in roles {
        let role_record = graph.get(role)?;
        if role_record.ins(EdgeKind::Sub).next().is_some() || has_instances(role)? {
            return Err(KernelError::TypeInUse { label: role_record.body.label.clone() });
        }
        graph.delete_vertex(role)?;
    }
    graph.delete_vertex(t)
}

/// Validate the whole lattice, collecting every violation. Root types are
/// no-ops; each non-root type is checked for a terminating SUB chain, keyable
/// key value types, KEY/HAS disjointness, and well-formed overrides.
pub fn validate_all(graph: &SchemaGraph) -> Vec<KernelError> {
    let mut errors = Vec::new();
    for record in graph.vertices() {
        if record.body.root {
            continue;
        }
        validate_type(graph, record, &mut errors);
    }
    errors
}

fn validate_type(graph: &SchemaGraph, record: &TypeVertexRecord, errors: &mut Vec<KernelError>) {
    let label = &record.body.label;

    if record.sub_parent().is_none() {
        errors.push(KernelError::internal(format!("non-root type '{label}' has no supertype")));
    }
    if let Err(e) = supertypes(graph, record.id) {
        errors.push(e);
        return;
    }

    for attr in record.outs(EdgeKind::Key) {
        if record.has_out(EdgeKind::Has, attr) {
            let target = graph
                .get(attr)
                .map(|a| a.body.label.clone())
                .unwrap_or_else(|_| attr.to_string());
            errors.push(KernelError::AlreadyOwned { label: label.clone(), target });
        }
        let value_type = graph.get(attr).ok().and_then(|a| a.body.value_type);
        if !value_type.is_some_and(ValueType::is_keyable) {
            errors.push(KernelError::InvalidKeyValueType {
                label: graph
                    .get(attr)
                    .map(|a| a.body.label.clone())
                    .unwrap_or_else(|_| attr.to_string()),
                value_type: value_type.map(|v| v.to_string()).unwrap_or_default(),
            });
        }
    }

    let inherited: BTreeSet<VertexId> = match record.sub_parent() {
        Some(parent) => {
            match attributes(graph, parent)
                .chain(plays(graph, parent))
                .collect::<Result<BTreeSet<_>, _>>()
            {
                Ok(set) => set,
                Err(e) => {
                    errors.push(e);
                    return;
                }
            }
        }
        None => BTreeSet::new(),
    };
    for ((_, declared), overridden) in &record.overrides {
        let overridden_label = graph
            .get(*overridden)
            .map(|v| v.body.label.clone())
            .unwrap_or_else(|_| overridden.to_string());
        if !inherited.contains(overridden) {
            errors.push(KernelError::InvalidOverrideNotAvailable {
                label: label.clone(),
                overridden: overridden_label,
            });
            continue;
        }
        match is_subtype_inclusive(graph, *declared, *overridden) {
            Ok(true) => {}
            Ok(false) => errors.push(KernelError::InvalidOverrideNotSupertype {
                label: graph
                    .get(*declared)
                    .map(|v| v.body.label.clone())
                    .unwrap_or_else(|_| declared.to_string()),
                overridden: overridden_label,
            }),
            Err(e) => errors.push(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        graph: SchemaGraph,
        serial: u64,
    }

    impl Fixture {
        fn new() -> Self {
            let mut graph = SchemaGraph::new();
            let mut serial = 0;
            graph
                .bootstrap(|kind| {
                    serial += 1;
                    Ok(VertexId::new(kind, serial))
                })
                .unwrap();
            Self { graph, serial }
        }

        fn next(&mut self, kind: Kind) -> VertexId {
            self.serial += 1;
            VertexId::new(kind, self.serial)
        }

        fn entity(&mut self, label: &str) -> VertexId {
            let id = self.next(Kind::EntityType);
            define_type(&mut self.graph, id, label, None).unwrap()
        }

        fn attribute(&mut self, label: &str, value_type: ValueType) -> VertexId {
            let id = self.next(Kind::AttributeType);
            define_type(&mut self.graph, id, label, Some(value_type)).unwrap()
        }

        fn collect(
            seq: impl Iterator<Item = Result<VertexId, KernelError>>,
        ) -> Vec<VertexId> {
            seq.collect::<Result<_, _>>().unwrap()
        }
    }

    #[test]
    fn test_define_links_to_root() {
        let mut fx = Fixture::new();
        let person = fx.entity("person");
        let root = fx.graph.root(Kind::EntityType).unwrap();
        assert_eq!(fx.graph.get(person).unwrap().sub_parent(), Some(root));
        assert!(is_subtype_inclusive(&fx.graph, person, root).unwrap());
    }

    #[test]
    fn test_visible_attributes_inherit() {
        let mut fx = Fixture::new();
        let person = fx.entity("person");
        let employee = fx.entity("employee");
        set_supertype(&mut fx.graph, employee, person).unwrap();

        let name = fx.attribute("name", ValueType::String);
        let badge = fx.attribute("badge", ValueType::Long);
        set_has(&mut fx.graph, person, name, None).unwrap();
        set_key(&mut fx.graph, employee, badge, None).unwrap();

        // Declared first, then inherited.
        assert_eq!(Fixture::collect(attributes(&fx.graph, employee)), vec![badge, name]);
        assert_eq!(Fixture::collect(keys(&fx.graph, employee)), vec![badge]);
        assert_eq!(Fixture::collect(keys(&fx.graph, person)), vec![]);
    }

    #[test]
    fn test_override_hides_ancestor_attribute() {
        let mut fx = Fixture::new();
        let person = fx.entity("person");
        let employee = fx.entity("employee");
        set_supertype(&mut fx.graph, employee, person).unwrap();

        let name = fx.attribute("name", ValueType::String);
        let full_name = fx.attribute("full_name", ValueType::String);
        set_supertype(&mut fx.graph, full_name, name).unwrap();

        set_has(&mut fx.graph, person, name, None).unwrap();
        set_has(&mut fx.graph, employee, full_name, Some(name)).unwrap();

        assert_eq!(Fixture::collect(attributes(&fx.graph, employee)), vec![full_name]);
        assert_eq!(Fixture::collect(attributes(&fx.graph, person)), vec![name]);
    }

    #[test]
    fn test_override_requires_supertype_target() {
        let mut fx = Fixture::new();
        let person = fx.entity("person");
        let employee = fx.entity("employee");
        set_supertype(&mut fx.graph, employee, person).unwrap();

        let name = fx.attribute("name", ValueType::String);
        let unrelated = fx.attribute("nickname", ValueType::String);
        set_has(&mut fx.graph, person, name, None).unwrap();

        assert!(matches!(
            set_has(&mut fx.graph, employee, unrelated, Some(name)),
            Err(KernelError::InvalidOverrideNotSupertype { .. })
        ));
    }

    #[test]
    fn test_override_requires_inherited_target() {
        let mut fx = Fixture::new();
        let person = fx.entity("person");
        let name = fx.attribute("name", ValueType::String);
        let other = fx.attribute("other", ValueType::String);

        assert!(matches!(
            set_has(&mut fx.graph, person, name, Some(other)),
            Err(KernelError::InvalidOverrideNotAvailable { .. })
        ));
    }

    #[test]
    fn test_key_requires_keyable_value_type() {
        let mut fx = Fixture::new();
        let person = fx.entity("person");
        let weight = fx.attribute("weight", ValueType::Double);

        assert!(matches!(
            set_key(&mut fx.graph, person, weight, None),
            Err(KernelError::InvalidKeyValueType { .. })
        ));
    }

    #[test]
    fn test_key_and_has_are_mutually_exclusive() {
        let mut fx = Fixture::new();
        let person = fx.entity("person");
        let ssn = fx.attribute("ssn", ValueType::String);

        set_key(&mut fx.graph, person, ssn, None).unwrap();
        assert!(matches!(
            set_has(&mut fx.graph, person, ssn, None),
            Err(KernelError::AlreadyOwned { .. })
        ));
    }

    #[test]
    fn test_redeclaring_inherited_attribute_fails_without_override() {
        let mut fx = Fixture::new();
        let person = fx.entity("person");
        let employee = fx.entity("employee");
        set_supertype(&mut fx.graph, employee, person).unwrap();
        let name = fx.attribute("name", ValueType::String);
        set_has(&mut fx.graph, person, name, None).unwrap();

        assert!(matches!(
            set_has(&mut fx.graph, employee, name, None),
            Err(KernelError::AlreadyOwned { .. })
        ));
    }

    #[test]
    fn test_root_mutation_rejected() {
        let mut fx = Fixture::new();
        let root = fx.graph.root(Kind::EntityType).unwrap();
        let name = fx.attribute("name", ValueType::String);

        assert!(matches!(
            set_has(&mut fx.graph, root, name, None),
            Err(KernelError::InvalidRootTypeMutation { .. })
        ));
        assert!(matches!(
            set_abstract(&mut fx.graph, root, false),
            Err(KernelError::InvalidRootTypeMutation { .. })
        ));
    }

    #[test]
    fn test_cyclic_supertype_rejected() {
        let mut fx = Fixture::new();
        let a = fx.entity("a");
        let b = fx.entity("b");
        set_supertype(&mut fx.graph, b, a).unwrap();

        assert!(matches!(
            set_supertype(&mut fx.graph, a, b),
            Err(KernelError::CyclicSupertype { .. })
        ));
    }

    #[test]
    fn test_delete_guards_subtypes() {
        let mut fx = Fixture::new();
        let person = fx.entity("person");
        let employee = fx.entity("employee");
        set_supertype(&mut fx.graph, employee, person).unwrap();

        assert!(matches!(
            delete_type(&mut fx.graph, person, |_| Ok(false)),
            Err(KernelError::TypeInUse { .. })
        ));
        delete_type(&mut fx.graph, employee, |_| Ok(false)).unwrap();
        delete_type(&mut fx.graph, person, |_| Ok(false)).unwrap();
    }

    #[test]
    fn test_delete_guards_instances() {
        let mut fx = Fixture::new();
        let person = fx.entity("person");
        assert!(matches!(
            delete_type(&mut fx.graph, person, |_| Ok(true)),
            Err(KernelError::TypeInUse { .. })
        ));
    }

    #[test]
    fn test_unset_is_idempotent() {
        let mut fx = Fixture::new();
        let person = fx.entity("person");
        let name = fx.attribute("name", ValueType::String);
        set_has(&mut fx.graph, person, name, None).unwrap();

        unset_has(&mut fx.graph, person, name).unwrap();
        unset_has(&mut fx.graph, person, name).unwrap();
        assert_eq!(Fixture::collect(attributes(&fx.graph, person)), vec![]);
    }

    #[test]
    fn test_unset_override_restores_inherited_visibility() {
        let mut fx = Fixture::new();
        let person = fx.entity("person");
        let employee = fx.entity("employee");
        set_supertype(&mut fx.graph, employee, person).unwrap();
        let name = fx.attribute("name", ValueType::String);
        let full_name = fx.attribute("full_name", ValueType::String);
        set_supertype(&mut fx.graph, full_name, name).unwrap();
        set_has(&mut fx.graph, person, name, None).unwrap();
        set_has(&mut fx.graph, employee, full_name, Some(name)).unwrap();

        unset_has(&mut fx.graph, employee, full_name).unwrap();
        assert_eq!(Fixture::collect(attributes(&fx.graph, employee)), vec![name]);
    }

    #[test]
    fn test_validate_reports_dangling_override() {
        let mut fx = Fixture::new();
        let person = fx.entity("person");
        let employee = fx.entity("employee");
        set_supertype(&mut fx.graph, employee, person).unwrap();
        let name = fx.attribute("name", ValueType::String);
        let full_name = fx.attribute("full_name", ValueType::String);
        set_supertype(&mut fx.graph, full_name, name).unwrap();
        set_has(&mut fx.graph, person, name, None).unwrap();
        set_has(&mut fx.graph, employee, full_name, Some(name)).unwrap();
        assert!(validate_all(&fx.graph).is_empty());

        // Removing the parent's declaration leaves the override dangling.
        unset_has(&mut fx.graph, person, name).unwrap();
        let errors = validate_all(&fx.graph);
        assert!(errors
            .iter()
            .any(|e| matches!(e, KernelError::InvalidOverrideNotAvailable { .. })));
    }

    #[test]
    fn test_value_type_filter() {
        let mut fx = Fixture::new();
        let person = fx.entity("person");
        let name = fx.attribute("name", ValueType::String);
        let age = fx.attribute("age", ValueType::Long);
        set_has(&mut fx.graph, person, name, None).unwrap();
        set_has(&mut fx.graph, person, age, None).unwrap();

        let strings =
            Fixture::collect(attributes_with_value_type(&fx.graph, person, ValueType::String));
        assert_eq!(strings, vec![name]);
    }
}
