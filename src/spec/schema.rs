//! The merged public schema.

use std::collections::HashMap;
use std::sync::Arc;

use apollo_compiler::ast;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::validation::Valid;
use apollo_compiler::ExecutableDocument;

use crate::error::SchemaError;

/// A parsed, validated GraphQL schema plus the derived lookups the planner
/// needs on every request. Read-only after startup.
#[derive(Debug)]
pub struct Schema {
    pub(crate) raw_sdl: Arc<String>,
    pub(crate) definitions: Valid<apollo_compiler::Schema>,
    /// interface or union name -> concrete object type names
    possible_types: HashMap<String, Vec<String>>,
}

impl Schema {
    /// Parse and validate an SDL document.
    pub fn parse(sdl: &str) -> Result<Self, SchemaError> {
        let definitions = apollo_compiler::Schema::parse_and_validate(sdl, "schema.graphql")
            .map_err(|invalid| SchemaError::Validate {
                errors: invalid.errors.iter().map(|d| d.to_string()).collect(),
            })?;
        Ok(Self::from_definitions(Arc::new(sdl.to_owned()), definitions))
    }

    /// Canonicalize an in-memory schema: print it and re-parse the output so
    /// the result is exactly what a validating parser accepts.
    pub(crate) fn reformat(schema: &apollo_compiler::Schema) -> Result<Self, SchemaError> {
        Self::parse(&schema.to_string())
    }

    fn from_definitions(raw_sdl: Arc<String>, definitions: Valid<apollo_compiler::Schema>) -> Self {
        let mut possible_types: HashMap<String, Vec<String>> = HashMap::new();
        for (name, implementers) in definitions.implementers_map() {
            possible_types.insert(
                name.to_string(),
                implementers
                    .objects
                    .iter()
                    .map(|o| o.to_string())
                    .collect(),
            );
        }
        for (name, ty) in definitions.types.iter() {
            if let ExtendedType::Union(union_type) = ty {
                possible_types.insert(
                    name.to_string(),
                    union_type.members.iter().map(|m| m.to_string()).collect(),
                );
            }
        }
        Schema {
            raw_sdl,
            definitions,
            possible_types,
        }
    }

    pub fn as_string(&self) -> &Arc<String> {
        &self.raw_sdl
    }

    /// Parse and validate an operation document against this schema.
    pub(crate) fn parse_operation(
        &self,
        query: &str,
    ) -> Result<Valid<ExecutableDocument>, SchemaError> {
        ExecutableDocument::parse_and_validate(&self.definitions, query, "operation.graphql")
            .map_err(|invalid| SchemaError::Validate {
                errors: invalid.errors.iter().map(|d| d.to_string()).collect(),
            })
    }

    pub(crate) fn has_type(&self, name: &str) -> bool {
        self.definitions.types.contains_key(name)
    }

    pub(crate) fn is_interface(&self, name: &str) -> bool {
        matches!(
            self.definitions.types.get(name),
            Some(ExtendedType::Interface(_))
        )
    }

    pub(crate) fn is_union(&self, name: &str) -> bool {
        matches!(
            self.definitions.types.get(name),
            Some(ExtendedType::Union(_))
        )
    }

    pub(crate) fn is_abstract(&self, name: &str) -> bool {
        self.is_interface(name) || self.is_union(name)
    }

    /// Concrete object types behind an interface or union, in schema order.
    pub(crate) fn possible_types(&self, name: &str) -> &[String] {
        self.possible_types
            .get(name)
            .map(|v| v.as_slice())
            .unwrap_or_default()
    }

    /// Whether an object or interface type declares the field.
    pub(crate) fn type_has_field(&self, name: &str, field: &str) -> bool {
        match self.definitions.types.get(name) {
            Some(ExtendedType::Object(object)) => object.fields.contains_key(field),
            Some(ExtendedType::Interface(interface)) => interface.fields.contains_key(field),
            _ => false,
        }
    }

    /// Whether an interface (or union member contract) declares the field.
    pub(crate) fn abstract_type_has_field(&self, name: &str, field: &str) -> bool {
        match self.definitions.types.get(name) {
            Some(ExtendedType::Interface(interface)) => interface.fields.contains_key(field),
            _ => false,
        }
    }

    /// The declared type of a field on an input object, for variable
    /// declaration inference inside object-shaped argument values.
    pub(crate) fn input_field_type(&self, input_type: &str, field: &str) -> Option<&ast::Type> {
        match self.definitions.types.get(input_type)? {
            ExtendedType::InputObject(input) => input.fields.get(field).map(|f| &*f.ty),
            _ => None,
        }
    }

}
