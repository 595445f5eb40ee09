//! Answering `__schema` / `__type` selections from the merged schema.

use apollo_compiler::ast;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::Name;

use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::spec::collect_fields;
use crate::spec::is_builtin_name;
use crate::spec::ArgumentValue;
use crate::spec::Field;
use crate::spec::Schema;
use crate::spec::Selection;

const DEPRECATED_DIRECTIVE: &str = "deprecated";

/// Resolves introspection root fields against the merged schema.
pub(crate) struct IntrospectionResolver<'a> {
    pub(crate) variables: &'a Object,
}

impl<'a> IntrospectionResolver<'a> {
    /// Returns `None` when the selection set contains no introspection
    /// fields at all.
    pub(crate) fn resolve_introspection_fields(
        &self,
        selection_set: &[Selection],
        schema: &Schema,
    ) -> Option<Object> {
        let mut result = Object::default();
        let mut is_introspection = false;

        for field in collect_fields(selection_set, None) {
            match field.name.as_str() {
                "__type" => {
                    let name = self.argument_string(field, "name")?;
                    let value = self
                        .resolve_type(schema, &ast::Type::Named(Name::new(&name).ok()?), &field.selection_set)
                        .map(Value::Object)
                        .unwrap_or(Value::Null);
                    result.insert(field.response_key(), value);
                    is_introspection = true;
                }
                "__schema" => {
                    result.insert(
                        field.response_key(),
                        Value::Object(self.resolve_schema(schema, &field.selection_set)),
                    );
                    is_introspection = true;
                }
                _ => {}
            }
        }

        is_introspection.then_some(result)
    }

    fn argument_string(&self, field: &Field, name: &str) -> Option<String> {
        let argument = field.arguments.iter().find(|argument| argument.name == name)?;
        match &argument.value {
            ArgumentValue::Variable(variable) => self
                .variables
                .get(variable.as_str())
                .and_then(|value| value.as_str())
                .map(|value| value.to_string()),
            ArgumentValue::Literal(rendered) => serde_json::from_str(rendered).ok(),
            _ => None,
        }
    }

    fn argument_bool(&self, field: &Field, name: &str) -> bool {
        let Some(argument) = field.arguments.iter().find(|argument| argument.name == name) else {
            return false;
        };
        match &argument.value {
            ArgumentValue::Variable(variable) => self
                .variables
                .get(variable.as_str())
                .and_then(|value| value.as_bool())
                .unwrap_or(false),
            ArgumentValue::Literal(rendered) => rendered == "true",
            _ => false,
        }
    }

    fn resolve_schema(&self, schema: &Schema, selection_set: &[Selection]) -> Object {
        let mut result = Object::default();
        for field in collect_fields(selection_set, None) {
            match field.name.as_str() {
                "types" => {
                    let mut types: Vec<Value> = schema
                        .definitions
                        .types
                        .values()
                        .filter_map(|ty| {
                            self.resolve_named_type(schema, ty, &field.selection_set)
                        })
                        .map(Value::Object)
                        .collect();
                    sort_by_name(&mut types);
                    result.insert(field.response_key(), Value::Array(types));
                }
                "queryType" => {
                    result.insert(
                        field.response_key(),
                        self.resolve_root(schema, "Query", &field.selection_set),
                    );
                }
                "mutationType" => {
                    result.insert(
                        field.response_key(),
                        self.resolve_root(schema, "Mutation", &field.selection_set),
                    );
                }
                "subscriptionType" => {
                    result.insert(
                        field.response_key(),
                        self.resolve_root(schema, "Subscription", &field.selection_set),
                    );
                }
                "directives" => {
                    let mut directives: Vec<Value> = schema
                        .definitions
                        .directive_definitions
                        .values()
                        .map(|directive| {
                            Value::Object(self.resolve_directive(schema, directive, &field.selection_set))
                        })
                        .collect();
                    sort_by_name(&mut directives);
                    result.insert(field.response_key(), Value::Array(directives));
                }
                _ => {
                    result.insert(field.response_key(), Value::Null);
                }
            }
        }
        result
    }

    fn resolve_root(&self, schema: &Schema, name: &str, selection_set: &[Selection]) -> Value {
        match Name::new(name) {
            Ok(name) => self
                .resolve_type(schema, &ast::Type::Named(name), selection_set)
                .map(Value::Object)
                .unwrap_or(Value::Null),
            Err(_) => Value::Null,
        }
    }

    /// `NON_NULL` and `LIST` wrappers resolve first, recursing into
    /// `ofType`; a named type resolves from the schema.
    fn resolve_type(
        &self,
        schema: &Schema,
        ty: &ast::Type,
        selection_set: &[Selection],
    ) -> Option<Object> {
        match ty {
            ast::Type::NonNullNamed(name) => Some(self.resolve_wrapper(
                schema,
                "NON_NULL",
                &ast::Type::Named(name.clone()),
                selection_set,
            )),
            ast::Type::NonNullList(inner) => Some(self.resolve_wrapper(
                schema,
                "NON_NULL",
                &ast::Type::List(inner.clone()),
                selection_set,
            )),
            ast::Type::List(inner) => {
                Some(self.resolve_wrapper(schema, "LIST", inner, selection_set))
            }
            ast::Type::Named(name) => {
                let ty = schema.definitions.types.get(name.as_str())?;
                self.resolve_named_type(schema, ty, selection_set)
            }
        }
    }

    fn resolve_wrapper(
        &self,
        schema: &Schema,
        kind: &str,
        inner: &ast::Type,
        selection_set: &[Selection],
    ) -> Object {
        let mut result = Object::default();
        for field in collect_fields(selection_set, None) {
            match field.name.as_str() {
                "kind" => {
                    result.insert(field.response_key(), Value::String(kind.to_string().into()));
                }
                "ofType" => {
                    let value = self
                        .resolve_type(schema, inner, &field.selection_set)
                        .map(Value::Object)
                        .unwrap_or(Value::Null);
                    result.insert(field.response_key(), value);
                }
                _ => {
                    result.insert(field.response_key(), Value::Null);
                }
            }
        }
        result
    }

    fn resolve_named_type(
        &self,
        schema: &Schema,
        ty: &ExtendedType,
        selection_set: &[Selection],
    ) -> Option<Object> {
        let mut result = Object::default();
        for field in collect_fields(selection_set, None) {
            match field.name.as_str() {
                "kind" => {
                    result.insert(field.response_key(), Value::String(kind_name(ty).into()));
                }
                "name" => {
                    result.insert(
                        field.response_key(),
                        Value::String(type_name(ty).to_string().into()),
                    );
                }
                "description" => {
                    result.insert(field.response_key(), description_value(type_description(ty)));
                }
                "fields" => {
                    let include_deprecated = self.argument_bool(field, "includeDeprecated");
                    let fields = type_fields(ty)
                        .into_iter()
                        .filter(|(name, definition)| {
                            if is_builtin_name(name) {
                                return false;
                            }
                            include_deprecated || !is_deprecated(&definition.directives).0
                        })
                        .map(|(_, definition)| {
                            Value::Object(self.resolve_field(schema, definition, &field.selection_set))
                        })
                        .collect();
                    result.insert(field.response_key(), Value::Array(fields));
                }
                "interfaces" => {
                    let interfaces = type_interfaces(ty)
                        .into_iter()
                        .map(|name| {
                            self.resolve_root(schema, &name, &field.selection_set)
                        })
                        .collect();
                    result.insert(field.response_key(), Value::Array(interfaces));
                }
                "possibleTypes" => {
                    let possible = schema.possible_types(type_name(ty));
                    if possible.is_empty() {
                        result.insert(field.response_key(), Value::Null);
                    } else {
                        let possible = possible
                            .iter()
                            .map(|name| self.resolve_root(schema, name, &field.selection_set))
                            .collect();
                        result.insert(field.response_key(), Value::Array(possible));
                    }
                }
                "enumValues" => {
                    let include_deprecated = self.argument_bool(field, "includeDeprecated");
                    let values = enum_values(ty)
                        .into_iter()
                        .filter(|value| {
                            include_deprecated || !is_deprecated(&value.directives).0
                        })
                        .map(|value| {
                            Value::Object(self.resolve_enum_value(value, &field.selection_set))
                        })
                        .collect();
                    result.insert(field.response_key(), Value::Array(values));
                }
                "inputFields" => {
                    let fields = input_fields(ty)
                        .into_iter()
                        .map(|definition| {
                            Value::Object(self.resolve_input_value(schema, definition, &field.selection_set))
                        })
                        .collect();
                    result.insert(field.response_key(), Value::Array(fields));
                }
                _ => {
                    result.insert(field.response_key(), Value::Null);
                }
            }
        }
        Some(result)
    }

    fn resolve_field(
        &self,
        schema: &Schema,
        definition: &ast::FieldDefinition,
        selection_set: &[Selection],
    ) -> Object {
        let (deprecated, reason) = is_deprecated(&definition.directives);
        let mut result = Object::default();
        for field in collect_fields(selection_set, None) {
            match field.name.as_str() {
                "name" => {
                    result.insert(
                        field.response_key(),
                        Value::String(definition.name.to_string().into()),
                    );
                }
                "description" => {
                    result.insert(
                        field.response_key(),
                        description_value(definition.description.as_deref()),
                    );
                }
                "args" => {
                    let args = definition
                        .arguments
                        .iter()
                        .map(|argument| {
                            Value::Object(self.resolve_input_value(schema, argument, &field.selection_set))
                        })
                        .collect();
                    result.insert(field.response_key(), Value::Array(args));
                }
                "type" => {
                    let value = self
                        .resolve_type(schema, &definition.ty, &field.selection_set)
                        .map(Value::Object)
                        .unwrap_or(Value::Null);
                    result.insert(field.response_key(), value);
                }
                "isDeprecated" => {
                    result.insert(field.response_key(), Value::Bool(deprecated));
                }
                "deprecationReason" => {
                    result.insert(
                        field.response_key(),
                        reason
                            .clone()
                            .map(|reason| Value::String(reason.into()))
                            .unwrap_or(Value::Null),
                    );
                }
                _ => {
                    result.insert(field.response_key(), Value::Null);
                }
            }
        }
        result
    }

    fn resolve_input_value(
        &self,
        schema: &Schema,
        definition: &ast::InputValueDefinition,
        selection_set: &[Selection],
    ) -> Object {
        let mut result = Object::default();
        for field in collect_fields(selection_set, None) {
            match field.name.as_str() {
                "name" => {
                    result.insert(
                        field.response_key(),
                        Value::String(definition.name.to_string().into()),
                    );
                }
                "description" => {
                    result.insert(
                        field.response_key(),
                        description_value(definition.description.as_deref()),
                    );
                }
                "type" => {
                    let value = self
                        .resolve_type(schema, &definition.ty, &field.selection_set)
                        .map(Value::Object)
                        .unwrap_or(Value::Null);
                    result.insert(field.response_key(), value);
                }
                "defaultValue" => {
                    let value = definition
                        .default_value
                        .as_ref()
                        .map(|default| Value::String(default.to_string().into()))
                        .unwrap_or(Value::Null);
                    result.insert(field.response_key(), value);
                }
                _ => {
                    result.insert(field.response_key(), Value::Null);
                }
            }
        }
        result
    }

    fn resolve_enum_value(
        &self,
        definition: &ast::EnumValueDefinition,
        selection_set: &[Selection],
    ) -> Object {
        let (deprecated, reason) = is_deprecated(&definition.directives);
        let mut result = Object::default();
        for field in collect_fields(selection_set, None) {
            match field.name.as_str() {
                "name" => {
                    result.insert(
                        field.response_key(),
                        Value::String(definition.value.to_string().into()),
                    );
                }
                "description" => {
                    result.insert(
                        field.response_key(),
                        description_value(definition.description.as_deref()),
                    );
                }
                "isDeprecated" => {
                    result.insert(field.response_key(), Value::Bool(deprecated));
                }
                "deprecationReason" => {
                    result.insert(
                        field.response_key(),
                        reason
                            .clone()
                            .map(|reason| Value::String(reason.into()))
                            .unwrap_or(Value::Null),
                    );
                }
                _ => {
                    result.insert(field.response_key(), Value::Null);
                }
            }
        }
        result
    }

    fn resolve_directive(
        &self,
        schema: &Schema,
        definition: &ast::DirectiveDefinition,
        selection_set: &[Selection],
    ) -> Object {
        let mut result = Object::default();
        for field in collect_fields(selection_set, None) {
            match field.name.as_str() {
                "name" => {
                    result.insert(
                        field.response_key(),
                        Value::String(definition.name.to_string().into()),
                    );
                }
                "description" => {
                    result.insert(
                        field.response_key(),
                        description_value(definition.description.as_deref()),
                    );
                }
                "locations" => {
                    let locations = definition
                        .locations
                        .iter()
                        .map(|location| Value::String(location.name().to_string().into()))
                        .collect();
                    result.insert(field.response_key(), Value::Array(locations));
                }
                "args" => {
                    let args = definition
                        .arguments
                        .iter()
                        .map(|argument| {
                            Value::Object(self.resolve_input_value(schema, argument, &field.selection_set))
                        })
                        .collect();
                    result.insert(field.response_key(), Value::Array(args));
                }
                _ => {
                    result.insert(field.response_key(), Value::Null);
                }
            }
        }
        result
    }
}

fn type_name(ty: &ExtendedType) -> &str {
    match ty {
        ExtendedType::Scalar(scalar) => scalar.name.as_str(),
        ExtendedType::Object(object) => object.name.as_str(),
        ExtendedType::Interface(interface) => interface.name.as_str(),
        ExtendedType::Union(union_type) => union_type.name.as_str(),
        ExtendedType::Enum(enum_type) => enum_type.name.as_str(),
        ExtendedType::InputObject(input) => input.name.as_str(),
    }
}

fn type_description(ty: &ExtendedType) -> Option<&str> {
    match ty {
        ExtendedType::Scalar(scalar) => scalar.description.as_deref(),
        ExtendedType::Object(object) => object.description.as_deref(),
        ExtendedType::Interface(interface) => interface.description.as_deref(),
        ExtendedType::Union(union_type) => union_type.description.as_deref(),
        ExtendedType::Enum(enum_type) => enum_type.description.as_deref(),
        ExtendedType::InputObject(input) => input.description.as_deref(),
    }
}

fn kind_name(ty: &ExtendedType) -> String {
    match ty {
        ExtendedType::Scalar(_) => "SCALAR",
        ExtendedType::Object(_) => "OBJECT",
        ExtendedType::Interface(_) => "INTERFACE",
        ExtendedType::Union(_) => "UNION",
        ExtendedType::Enum(_) => "ENUM",
        ExtendedType::InputObject(_) => "INPUT_OBJECT",
    }
    .to_string()
}

fn description_value(description: Option<&str>) -> Value {
    description
        .map(|description| Value::String(description.to_string().into()))
        .unwrap_or(Value::Null)
}

fn type_fields(
    ty: &ExtendedType,
) -> Vec<(&str, &apollo_compiler::schema::Component<ast::FieldDefinition>)> {
    match ty {
        ExtendedType::Object(object) => object
            .fields
            .iter()
            .map(|(name, field)| (name.as_str(), field))
            .collect(),
        ExtendedType::Interface(interface) => interface
            .fields
            .iter()
            .map(|(name, field)| (name.as_str(), field))
            .collect(),
        _ => Vec::new(),
    }
}

fn type_interfaces(ty: &ExtendedType) -> Vec<String> {
    match ty {
        ExtendedType::Object(object) => object
            .implements_interfaces
            .iter()
            .map(|interface| interface.to_string())
            .collect(),
        ExtendedType::Interface(interface) => interface
            .implements_interfaces
            .iter()
            .map(|interface| interface.to_string())
            .collect(),
        _ => Vec::new(),
    }
}

fn enum_values(
    ty: &ExtendedType,
) -> Vec<&apollo_compiler::schema::Component<ast::EnumValueDefinition>> {
    match ty {
        ExtendedType::Enum(enum_type) => enum_type.values.values().collect(),
        _ => Vec::new(),
    }
}

fn input_fields(
    ty: &ExtendedType,
) -> Vec<&apollo_compiler::schema::Component<ast::InputValueDefinition>> {
    match ty {
        ExtendedType::InputObject(input) => input.fields.values().collect(),
        _ => Vec::new(),
    }
}

fn is_deprecated(directives: &ast::DirectiveList) -> (bool, Option<String>) {
    match directives.get(DEPRECATED_DIRECTIVE) {
        Some(directive) => {
            let reason = directive
                .specified_argument_by_name("reason")
                .and_then(|value| value.as_str())
                .map(|reason| reason.to_string());
            (true, reason)
        }
        None => (false, None),
    }
}

fn sort_by_name(values: &mut [Value]) {
    values.sort_by(|left, right| {
        let left = left.as_object().and_then(|object| object.get("name"));
        let right = right.as_object().and_then(|object| object.get("name"));
        left.and_then(Value::as_str).cmp(&right.and_then(Value::as_str))
    });
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    fn schema() -> Schema {
        Schema::parse(
            r#"
            "A color."
            enum Color { RED GREEN BLUE @deprecated(reason: "use GREEN") }
            interface Node { id: ID! }
            type User implements Node {
                id: ID!
                name: String
                oldName: String @deprecated(reason: "renamed")
            }
            type Query { node(id: ID!): Node user(id: ID!): User }
            "#,
        )
        .unwrap()
    }

    fn selections(schema: &Schema, query: &str) -> Vec<Selection> {
        let document = schema.parse_operation(query).unwrap();
        let operation = document.operations.get(None).unwrap();
        Selection::from_operation(operation, &document)
    }

    #[test]
    fn non_introspection_selections_resolve_to_none() {
        let schema = schema();
        let set = selections(&schema, r#"{ user(id: "1") { id } }"#);
        let variables = Object::default();
        let resolver = IntrospectionResolver {
            variables: &variables,
        };
        assert!(resolver
            .resolve_introspection_fields(&set, &schema)
            .is_none());
    }

    #[test]
    fn resolves_type_by_name() {
        let schema = schema();
        let set = selections(
            &schema,
            r#"{ __type(name: "User") { kind name fields { name type { kind name ofType { name } } } } }"#,
        );
        let variables = Object::default();
        let resolver = IntrospectionResolver {
            variables: &variables,
        };
        let result = resolver
            .resolve_introspection_fields(&set, &schema)
            .unwrap();
        let user = result.get("__type").unwrap();
        assert_eq!(user.get("kind"), Some(&json!("OBJECT")));
        assert_eq!(user.get("name"), Some(&json!("User")));
        let fields = user.get("fields").unwrap().as_array().unwrap();
        // the deprecated field is hidden by default
        let names: Vec<&str> = fields
            .iter()
            .map(|field| field.get("name").unwrap().as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["id", "name"]);
        // id renders as NON_NULL wrapping ID
        let id_type = fields[0].get("type").unwrap();
        assert_eq!(id_type.get("kind"), Some(&json!("NON_NULL")));
        assert_eq!(
            id_type.get("ofType").unwrap().get("name"),
            Some(&json!("ID"))
        );
    }

    #[test]
    fn resolves_schema_roots_and_enum_deprecation() {
        let schema = schema();
        let set = selections(
            &schema,
            r#"{ __schema { queryType { name } mutationType { name } } alias: __type(name: "Color") { enumValues(includeDeprecated: true) { name isDeprecated } } }"#,
        );
        let variables = Object::default();
        let resolver = IntrospectionResolver {
            variables: &variables,
        };
        let result = resolver
            .resolve_introspection_fields(&set, &schema)
            .unwrap();
        let root = result.get("__schema").unwrap();
        assert_eq!(
            root.get("queryType").unwrap().get("name"),
            Some(&json!("Query"))
        );
        assert_eq!(root.get("mutationType"), Some(&json!(null)));

        let values = result
            .get("alias")
            .unwrap()
            .get("enumValues")
            .unwrap()
            .as_array()
            .unwrap();
        assert_eq!(values.len(), 3);
        assert_eq!(values[2].get("isDeprecated"), Some(&json!(true)));
    }
}
