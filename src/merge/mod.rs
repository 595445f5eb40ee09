//! Schema merging.
//!
//! The gateway's public schema is the union of every upstream schema. Types
//! declared by a single service are copied; types declared by several
//! services must either be complete copies of each other, or (for `Node`
//! implementors) be split into disjoint field sets that the planner can
//! route per service.

mod type_url_map;

use std::collections::BTreeSet;
use std::sync::Arc;

use apollo_compiler::schema::ExtendedType;
use apollo_compiler::Node;

pub use type_url_map::TypeUrlMap;
pub(crate) use type_url_map::{is_id_field, is_node_field};

use crate::error::SchemaError;
use crate::spec::is_builtin_name;
use crate::spec::is_root_type;
use crate::spec::Schema;
use crate::spec::NODE_FIELD;
use crate::spec::NODE_INTERFACE;
use crate::spec::QUERY_TYPE;

/// One upstream schema and the URL it was introspected from.
pub struct MergeInput {
    pub schema: apollo_compiler::Schema,
    pub url: Arc<str>,
}

pub struct MergeResult {
    pub schema: Schema,
    pub type_url_map: TypeUrlMap,
}

/// Anything able to turn a list of upstream schemas into a merged schema
/// plus the routing table.
pub trait Merger: Send + Sync {
    fn merge(&self, inputs: Vec<MergeInput>) -> Result<MergeResult, SchemaError>;
}

/// The default merger: pairwise left-to-right type union with the collision
/// rules described on [`merge`](self).
#[derive(Debug, Default, Clone, Copy)]
pub struct ExtendMerger;

/// Like [`ExtendMerger`] but strips `node(id: ID!): Node` from the merged
/// `Query`, hiding the federation primitive from the public surface.
#[derive(Debug, Default, Clone, Copy)]
pub struct SanitizeNodeMerger;

impl Merger for ExtendMerger {
    fn merge(&self, inputs: Vec<MergeInput>) -> Result<MergeResult, SchemaError> {
        let (merged, type_url_map) = merge_raw(inputs)?;
        Ok(MergeResult {
            schema: Schema::reformat(&merged)?,
            type_url_map,
        })
    }
}

impl Merger for SanitizeNodeMerger {
    fn merge(&self, inputs: Vec<MergeInput>) -> Result<MergeResult, SchemaError> {
        let (mut merged, type_url_map) = merge_raw(inputs)?;
        if let Some(ExtendedType::Object(query)) = merged.types.get_mut(QUERY_TYPE) {
            query.make_mut().fields.shift_remove(NODE_FIELD);
        }
        Ok(MergeResult {
            schema: Schema::reformat(&merged)?,
            type_url_map,
        })
    }
}

fn merge_raw(inputs: Vec<MergeInput>) -> Result<(apollo_compiler::Schema, TypeUrlMap), SchemaError> {
    let mut inputs = inputs.into_iter();
    let first = inputs.next().ok_or(SchemaError::NoSchemas)?;

    let mut type_url_map = TypeUrlMap::new();
    type_url_map.set_from_schema(&first.schema, &first.url);

    let mut left_implementers = implementers_of(&first.schema);
    let mut merged = first.schema;

    for input in inputs {
        let right_implementers = implementers_of(&input.schema);
        merge_types(
            &mut merged,
            &input.schema,
            &left_implementers,
            &right_implementers,
        )?;
        type_url_map.set_from_schema(&input.schema, &input.url);

        for (interface, objects) in right_implementers {
            left_implementers
                .entry(interface)
                .or_default()
                .extend(objects);
        }
        for (name, definition) in input.schema.directive_definitions.iter() {
            // later wins
            merged
                .directive_definitions
                .insert(name.clone(), definition.clone());
        }
    }

    Ok((merged, type_url_map))
}

/// `interface name -> implementing object names` for one schema.
fn implementers_of(
    schema: &apollo_compiler::Schema,
) -> std::collections::BTreeMap<String, BTreeSet<String>> {
    schema
        .implementers_map()
        .iter()
        .map(|(interface, implementers)| {
            (
                interface.to_string(),
                implementers
                    .objects
                    .iter()
                    .map(|object| object.to_string())
                    .collect(),
            )
        })
        .collect()
}

fn merge_types(
    merged: &mut apollo_compiler::Schema,
    right: &apollo_compiler::Schema,
    left_implementers: &std::collections::BTreeMap<String, BTreeSet<String>>,
    right_implementers: &std::collections::BTreeMap<String, BTreeSet<String>>,
) -> Result<(), SchemaError> {
    for (name, right_ty) in right.types.iter() {
        if right_ty.is_built_in() || is_builtin_name(name) {
            continue;
        }

        let Some(left_ty) = merged.types.get(name.as_str()) else {
            merged.types.insert(name.clone(), right_ty.clone());
            continue;
        };

        // the Node interface itself is identical everywhere
        if name == NODE_INTERFACE {
            continue;
        }

        let left_kind = kind_of(left_ty);
        let right_kind = kind_of(right_ty);
        if left_kind != right_kind {
            return Err(SchemaError::NameCollision {
                name: name.to_string(),
                kind: right_kind,
                other_kind: left_kind,
            });
        }

        if implements_node(left_ty) != implements_node(right_ty) {
            return Err(SchemaError::NodeCollision {
                name: name.to_string(),
            });
        }

        match right_ty {
            // later wins
            ExtendedType::Scalar(_) => {
                merged.types.insert(name.clone(), right_ty.clone());
            }
            ExtendedType::Union(right_union) => {
                let ExtendedType::Union(left_union) = left_ty else {
                    continue;
                };
                let left_members: BTreeSet<String> =
                    left_union.members.iter().map(|m| m.to_string()).collect();
                let right_members: BTreeSet<String> =
                    right_union.members.iter().map(|m| m.to_string()).collect();
                if left_members != right_members {
                    return Err(SchemaError::UnionCollision {
                        name: name.to_string(),
                    });
                }
            }
            ExtendedType::Enum(right_enum) => {
                let values: Vec<_> = right_enum
                    .values
                    .iter()
                    .map(|(value_name, value)| (value_name.clone(), value.clone()))
                    .collect();
                if let Some(ExtendedType::Enum(left_enum)) = merged.types.get_mut(name.as_str()) {
                    let left_enum = left_enum.make_mut();
                    for (value_name, value) in values {
                        left_enum.values.entry(value_name).or_insert(value);
                    }
                }
            }
            ExtendedType::Interface(right_interface) => {
                let empty = BTreeSet::new();
                let left_set = left_implementers.get(name.as_str()).unwrap_or(&empty);
                let right_set = right_implementers.get(name.as_str()).unwrap_or(&empty);
                if left_set != right_set {
                    return Err(SchemaError::InterfaceCollision {
                        name: name.to_string(),
                    });
                }
                let node = implements_node(right_ty);
                let right_fields: Vec<_> = right_interface
                    .fields
                    .iter()
                    .map(|(field_name, field)| (field_name.clone(), field.clone()))
                    .collect();
                if let Some(ExtendedType::Interface(left_interface)) =
                    merged.types.get_mut(name.as_str())
                {
                    let left_interface = left_interface.make_mut();
                    merge_object_fields(
                        name.as_str(),
                        node,
                        &mut left_interface.fields,
                        right_fields,
                    )?;
                }
            }
            ExtendedType::Object(right_object) => {
                let node = implements_node(right_ty);
                let right_fields: Vec<_> = right_object
                    .fields
                    .iter()
                    .map(|(field_name, field)| (field_name.clone(), field.clone()))
                    .collect();
                let right_interfaces: Vec<_> =
                    right_object.implements_interfaces.iter().cloned().collect();
                let right_description = right_object.description.clone();
                if let Some(ExtendedType::Object(left_object)) = merged.types.get_mut(name.as_str())
                {
                    let left_object = left_object.make_mut();
                    if is_root_type(name) {
                        merge_root_fields(name.as_str(), &mut left_object.fields, right_fields)?;
                    } else {
                        merge_object_fields(name.as_str(), node, &mut left_object.fields, right_fields)?;
                    }
                    for interface in right_interfaces {
                        left_object.implements_interfaces.insert(interface);
                    }
                    left_object.description =
                        merge_descriptions(left_object.description.take(), right_description);
                }
            }
            ExtendedType::InputObject(right_input) => {
                let right_fields: Vec<String> = right_input
                    .fields
                    .iter()
                    .map(|(field_name, _)| field_name.to_string())
                    .collect();
                let new_fields: Vec<_> = right_input
                    .fields
                    .iter()
                    .map(|(field_name, field)| (field_name.clone(), field.clone()))
                    .collect();
                if let Some(ExtendedType::InputObject(left_input)) =
                    merged.types.get_mut(name.as_str())
                {
                    let left_input = left_input.make_mut();
                    let overlapping: Vec<String> = right_fields
                        .iter()
                        .filter(|field| left_input.fields.contains_key(field.as_str()))
                        .cloned()
                        .collect();
                    let complete_copy = overlapping.len() == right_fields.len()
                        && overlapping.len() == left_input.fields.len();
                    if !overlapping.is_empty() && !complete_copy {
                        return Err(SchemaError::OverlappingFieldsNotCompleteCopy {
                            type_name: name.to_string(),
                            fields: overlapping.join(","),
                        });
                    }
                    if overlapping.is_empty() {
                        for (field_name, field) in new_fields {
                            left_input.fields.insert(field_name, field);
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

/// Root object fields must be disjoint after removing built-ins and the
/// `node` field.
fn merge_root_fields(
    type_name: &str,
    left: &mut apollo_compiler::collections::IndexMap<
        apollo_compiler::Name,
        apollo_compiler::schema::Component<apollo_compiler::ast::FieldDefinition>,
    >,
    right: Vec<(
        apollo_compiler::Name,
        apollo_compiler::schema::Component<apollo_compiler::ast::FieldDefinition>,
    )>,
) -> Result<(), SchemaError> {
    for (field_name, field) in right {
        if is_builtin_name(&field_name) || is_node_field(&field) {
            continue;
        }
        if left.contains_key(&field_name) {
            return Err(SchemaError::OverlappingRootFields {
                type_name: type_name.to_string(),
                field: field_name.to_string(),
            });
        }
        left.insert(field_name, field);
    }
    Ok(())
}

/// Custom object (or interface) field merge.
///
/// Complete copies on both sides keep the left definition. Disjoint field
/// sets union into a split type, which is only legal when the type does not
/// implement `Node` in zero services (splitting relies on `node` lookups
/// for non-root types, but overlap on a `Node` type is ambiguous routing).
fn merge_object_fields(
    type_name: &str,
    implements_node: bool,
    left: &mut apollo_compiler::collections::IndexMap<
        apollo_compiler::Name,
        apollo_compiler::schema::Component<apollo_compiler::ast::FieldDefinition>,
    >,
    right: Vec<(
        apollo_compiler::Name,
        apollo_compiler::schema::Component<apollo_compiler::ast::FieldDefinition>,
    )>,
) -> Result<(), SchemaError> {
    let mut overlapping: Vec<String> = Vec::new();
    let mut fresh = Vec::new();
    let mut right_mergeable = 0usize;
    for (field_name, field) in right {
        if is_builtin_name(&field_name) || is_id_field(&field) {
            continue;
        }
        right_mergeable += 1;
        if left.contains_key(&field_name) {
            overlapping.push(field_name.to_string());
        } else {
            fresh.push((field_name, field));
        }
    }

    let some_overlap = !overlapping.is_empty();
    let all_right_overlap = right_mergeable > 0 && fresh.is_empty();

    if implements_node && some_overlap {
        return Err(SchemaError::OverlappingFields {
            type_name: type_name.to_string(),
            fields: overlapping.join(","),
        });
    }

    if some_overlap && !all_right_overlap {
        return Err(SchemaError::OverlappingFieldsNotCompleteCopy {
            type_name: type_name.to_string(),
            fields: overlapping.join(","),
        });
    }

    if all_right_overlap {
        // a complete copy must hold in both directions: the left side may
        // not carry extra non-id fields either
        let left_extra: Vec<String> = left
            .iter()
            .filter(|(field_name, field)| {
                !is_builtin_name(field_name)
                    && !is_id_field(field)
                    && !overlapping.contains(&field_name.to_string())
            })
            .map(|(field_name, _)| field_name.to_string())
            .collect();
        if !left_extra.is_empty() {
            return Err(SchemaError::OverlappingFieldsNotCompleteCopy {
                type_name: type_name.to_string(),
                fields: overlapping.join(","),
            });
        }
        return Ok(());
    }

    for (field_name, field) in fresh {
        left.insert(field_name, field);
    }
    Ok(())
}

fn kind_of(ty: &ExtendedType) -> &'static str {
    match ty {
        ExtendedType::Scalar(_) => "SCALAR",
        ExtendedType::Object(_) => "OBJECT",
        ExtendedType::Interface(_) => "INTERFACE",
        ExtendedType::Union(_) => "UNION",
        ExtendedType::Enum(_) => "ENUM",
        ExtendedType::InputObject(_) => "INPUT_OBJECT",
    }
}

fn implements_node(ty: &ExtendedType) -> bool {
    let interfaces = match ty {
        ExtendedType::Object(object) => &object.implements_interfaces,
        ExtendedType::Interface(interface) => &interface.implements_interfaces,
        _ => return false,
    };
    interfaces
        .iter()
        .any(|interface| interface.name == NODE_INTERFACE)
}

fn merge_descriptions(
    left: Option<Node<str>>,
    right: Option<Node<str>>,
) -> Option<Node<str>> {
    match (left, right) {
        (None, right) => right,
        (left, None) => left,
        (Some(left), Some(right)) => {
            if left == right {
                Some(left)
            } else {
                Some(Node::new_str(&format!("{right}\n\n{left}")))
            }
        }
    }
}
