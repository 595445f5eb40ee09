//! The routing table: which service owns each field of each object type.

use std::collections::BTreeMap;
use std::sync::Arc;

use apollo_compiler::ast;
use apollo_compiler::schema::ExtendedType;

use crate::spec::is_builtin_name;
use crate::spec::ID_FIELD;
use crate::spec::NODE_FIELD;
use crate::spec::NODE_INTERFACE;

#[derive(Debug, Default, Clone)]
pub struct TypeProps {
    /// field name -> service URL
    fields: BTreeMap<String, Arc<str>>,
    implements_node: bool,
}

/// `type -> field -> service URL` plus whether the type implements `Node`.
/// Built once at startup, read-only afterwards.
#[derive(Debug, Default, Clone)]
pub struct TypeUrlMap {
    types: BTreeMap<String, TypeProps>,
}

impl TypeUrlMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every service URL that owns at least one field, deduplicated, in
    /// first-registration order is not needed here: sorted for determinism.
    pub fn urls(&self) -> Vec<Arc<str>> {
        let mut urls: Vec<Arc<str>> = Vec::new();
        for props in self.types.values() {
            for url in props.fields.values() {
                if !urls.iter().any(|known| known == url) {
                    urls.push(url.clone());
                }
            }
        }
        urls.sort();
        urls
    }

    /// Record the owner of a field. The virtualized `id` field is never
    /// recorded.
    pub fn set(&mut self, type_name: &str, field_name: &str, url: Arc<str>) {
        if field_name == ID_FIELD {
            return;
        }
        self.types
            .entry(type_name.to_string())
            .or_default()
            .fields
            .insert(field_name.to_string(), url);
    }

    pub fn set_implements_node(&mut self, type_name: &str) {
        self.types
            .entry(type_name.to_string())
            .or_default()
            .implements_node = true;
    }

    pub fn get(&self, type_name: &str, field_name: &str) -> Option<&Arc<str>> {
        self.types.get(type_name)?.fields.get(field_name)
    }

    /// `None` when the type is unknown to the map.
    pub fn implements_node(&self, type_name: &str) -> Option<bool> {
        self.types.get(type_name).map(|props| props.implements_node)
    }

    /// The distinct service URLs owning fields of this type.
    pub fn urls_for_type(&self, type_name: &str) -> Option<Vec<Arc<str>>> {
        let props = self.types.get(type_name)?;
        let mut urls: Vec<Arc<str>> = Vec::new();
        for url in props.fields.values() {
            if !urls.iter().any(|known| known == url) {
                urls.push(url.clone());
            }
        }
        urls.sort();
        Some(urls)
    }

    /// Register every object type of an upstream schema under its URL.
    pub fn set_from_schema(&mut self, schema: &apollo_compiler::Schema, url: &Arc<str>) {
        for (name, ty) in schema.types.iter() {
            let ExtendedType::Object(object) = ty else {
                continue;
            };
            if ty.is_built_in() || is_builtin_name(name) {
                continue;
            }

            if object
                .implements_interfaces
                .iter()
                .any(|interface| interface.name == NODE_INTERFACE)
            {
                self.set_implements_node(name);
            }

            for (field_name, field) in object.fields.iter() {
                if is_builtin_name(field_name) || is_node_field(field) {
                    continue;
                }
                self.set(name, field_name, url.clone());
            }
        }
    }
}

/// `id: ID!` with no arguments.
pub(crate) fn is_id_field(field: &ast::FieldDefinition) -> bool {
    field.name == ID_FIELD && field.arguments.is_empty() && is_id_type(&field.ty)
}

/// The federation primitive `node(id: ID!): Node`.
pub(crate) fn is_node_field(field: &ast::FieldDefinition) -> bool {
    if field.name != NODE_FIELD || field.arguments.len() != 1 {
        return false;
    }
    let argument = &field.arguments[0];
    argument.name == ID_FIELD
        && is_id_type(&argument.ty)
        && matches!(&field.ty, ast::Type::Named(name) if name == NODE_INTERFACE)
}

fn is_id_type(ty: &ast::Type) -> bool {
    matches!(ty, ast::Type::NonNullNamed(name) if name == "ID")
}
