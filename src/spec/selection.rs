//! A crate-local selection tree.
//!
//! Validated operations arrive as `apollo_compiler::executable` documents.
//! The planner rewrites selection sets heavily (fragment fan-out, synthetic
//! `id`/`__typename` fields, `node` wrapping), so instead of mutating
//! compiler ASTs we convert each operation into this owned tree once and
//! manipulate it freely afterwards. Fragment spreads are inlined during the
//! conversion.

use apollo_compiler::ast;
use apollo_compiler::executable;

use crate::spec::ID_FIELD;
use crate::spec::NODE_FIELD;
use crate::spec::NODE_INTERFACE;
use crate::spec::TYPENAME;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Selection {
    Field(Field),
    InlineFragment(InlineFragment),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Field {
    pub(crate) name: String,
    pub(crate) alias: Option<String>,
    pub(crate) arguments: Vec<Argument>,
    /// Argument definitions from the schema, for variable declarations.
    pub(crate) argument_definitions: Vec<ArgumentDefinition>,
    /// The field's declared type.
    pub(crate) ty: FieldType,
    pub(crate) selection_set: Vec<Selection>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InlineFragment {
    pub(crate) type_condition: String,
    pub(crate) selection_set: Vec<Selection>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Argument {
    pub(crate) name: String,
    pub(crate) value: ArgumentValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ArgumentValue {
    Variable(String),
    List(Vec<ArgumentValue>),
    Object(Vec<(String, ArgumentValue)>),
    /// Any other literal, kept in its GraphQL-rendered form.
    Literal(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ArgumentDefinition {
    pub(crate) name: String,
    pub(crate) ty: FieldType,
}

/// The shape of a declared type: inner named type plus the outermost
/// wrapping, which is all the executor needs to walk results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FieldType {
    pub(crate) name: String,
    pub(crate) rendered: String,
    pub(crate) non_null: bool,
    pub(crate) is_list: bool,
}

impl FieldType {
    pub(crate) fn from_ast(ty: &ast::Type) -> Self {
        FieldType {
            name: ty.inner_named_type().to_string(),
            rendered: ty.to_string(),
            non_null: matches!(ty, ast::Type::NonNullNamed(_) | ast::Type::NonNullList(_)),
            is_list: matches!(ty, ast::Type::List(_) | ast::Type::NonNullList(_)),
        }
    }

    pub(crate) fn named(name: &str) -> Self {
        FieldType {
            name: name.to_string(),
            rendered: name.to_string(),
            non_null: false,
            is_list: false,
        }
    }

    fn non_null_named(name: &str) -> Self {
        FieldType {
            name: name.to_string(),
            rendered: format!("{name}!"),
            non_null: true,
            is_list: false,
        }
    }
}

impl Selection {
    pub(crate) fn from_operation(
        operation: &executable::Operation,
        document: &executable::ExecutableDocument,
    ) -> Vec<Selection> {
        convert_selection_set(&operation.selection_set, document)
    }

    pub(crate) fn as_field(&self) -> Option<&Field> {
        match self {
            Selection::Field(field) => Some(field),
            Selection::InlineFragment(_) => None,
        }
    }
}

fn convert_selection_set(
    selection_set: &executable::SelectionSet,
    document: &executable::ExecutableDocument,
) -> Vec<Selection> {
    let mut result = Vec::with_capacity(selection_set.selections.len());
    for selection in &selection_set.selections {
        match selection {
            executable::Selection::Field(field) => {
                result.push(Selection::Field(Field {
                    name: field.name.to_string(),
                    alias: field.alias.as_ref().map(|a| a.to_string()),
                    arguments: field
                        .arguments
                        .iter()
                        .map(|arg| Argument {
                            name: arg.name.to_string(),
                            value: convert_value(&arg.value),
                        })
                        .collect(),
                    argument_definitions: field
                        .definition
                        .arguments
                        .iter()
                        .map(|def| ArgumentDefinition {
                            name: def.name.to_string(),
                            ty: FieldType::from_ast(&def.ty),
                        })
                        .collect(),
                    ty: FieldType::from_ast(field.ty()),
                    selection_set: convert_selection_set(&field.selection_set, document),
                }));
            }
            executable::Selection::InlineFragment(fragment) => {
                result.push(Selection::InlineFragment(InlineFragment {
                    type_condition: fragment
                        .type_condition
                        .as_ref()
                        .map(|tc| tc.to_string())
                        .unwrap_or_else(|| fragment.selection_set.ty.to_string()),
                    selection_set: convert_selection_set(&fragment.selection_set, document),
                }));
            }
            executable::Selection::FragmentSpread(spread) => {
                // inline the named fragment
                if let Some(fragment) = document.fragments.get(&spread.fragment_name) {
                    result.push(Selection::InlineFragment(InlineFragment {
                        type_condition: fragment.selection_set.ty.to_string(),
                        selection_set: convert_selection_set(&fragment.selection_set, document),
                    }));
                }
            }
        }
    }
    result
}

fn convert_value(value: &ast::Value) -> ArgumentValue {
    match value {
        ast::Value::Variable(name) => ArgumentValue::Variable(name.to_string()),
        ast::Value::List(items) => {
            ArgumentValue::List(items.iter().map(|item| convert_value(item)).collect())
        }
        ast::Value::Object(fields) => ArgumentValue::Object(
            fields
                .iter()
                .map(|(name, value)| (name.to_string(), convert_value(value)))
                .collect(),
        ),
        other => ArgumentValue::Literal(other.to_string()),
    }
}

impl Field {
    /// The key under which this field appears in a response object.
    pub(crate) fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// A synthetic `__typename` selection.
    pub(crate) fn typename() -> Field {
        Field {
            name: TYPENAME.to_string(),
            alias: None,
            arguments: Vec::new(),
            argument_definitions: Vec::new(),
            ty: FieldType::named("String"),
            selection_set: Vec::new(),
        }
    }

    /// A synthetic `id` selection.
    pub(crate) fn id() -> Field {
        Field {
            name: ID_FIELD.to_string(),
            alias: None,
            arguments: Vec::new(),
            argument_definitions: Vec::new(),
            ty: FieldType::non_null_named("ID"),
            selection_set: Vec::new(),
        }
    }

    /// The federation primitive: `node(id: $id) { ... }`.
    pub(crate) fn node(selection_set: Vec<Selection>) -> Field {
        Field {
            name: NODE_FIELD.to_string(),
            alias: None,
            arguments: vec![Argument {
                name: ID_FIELD.to_string(),
                value: ArgumentValue::Variable(ID_FIELD.to_string()),
            }],
            argument_definitions: vec![ArgumentDefinition {
                name: ID_FIELD.to_string(),
                ty: FieldType::non_null_named("ID"),
            }],
            ty: FieldType::named(NODE_INTERFACE),
            selection_set,
        }
    }
}

/// Flattens a selection set into its fields, descending through inline
/// fragments. When `type_condition` is given, only fragments matching it
/// contribute and only fields it declares are kept.
pub(crate) fn collect_fields<'a>(
    selections: &'a [Selection],
    type_condition: Option<&str>,
) -> Vec<&'a Field> {
    let mut result = Vec::new();
    for selection in selections {
        match selection {
            Selection::Field(field) => result.push(field),
            Selection::InlineFragment(fragment) => {
                if let Some(condition) = type_condition {
                    if fragment.type_condition != condition {
                        continue;
                    }
                }
                result.extend(collect_fields(&fragment.selection_set, type_condition));
            }
        }
    }
    result
}

/// True when any field (possibly inside an inline fragment) has this name.
pub(crate) fn contains_field(selections: &[Selection], name: &str) -> bool {
    selections.iter().any(|selection| match selection {
        Selection::Field(field) => field.name == name,
        Selection::InlineFragment(fragment) => contains_field(&fragment.selection_set, name),
    })
}

/// True when a top-level field carries this response key.
pub(crate) fn has_field_named(selections: &[Selection], key: &str) -> bool {
    selections
        .iter()
        .any(|selection| matches!(selection, Selection::Field(field) if field.response_key() == key))
}

/// Depth-first search for the field with the given response key.
pub(crate) fn find_selection<'a>(selections: &'a [Selection], key: &str) -> Option<&'a Field> {
    for field in collect_fields(selections, None) {
        if field.response_key() == key {
            return Some(field);
        }
        if !field.selection_set.is_empty() {
            if let Some(found) = find_selection(&field.selection_set, key) {
                return Some(found);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::Schema;

    fn parse(query: &str) -> Vec<Selection> {
        let schema = Schema::parse(
            r#"
            interface Node { id: ID! }
            type User implements Node { id: ID! name: String friends(first: Int): [User] }
            type Query { user(id: ID!): User users: [User] }
            "#,
        )
        .unwrap();
        let document = schema.parse_operation(query).unwrap();
        let operation = document.operations.get(None).unwrap();
        Selection::from_operation(operation, &document)
    }

    #[test]
    fn converts_fields_aliases_and_arguments() {
        let selections = parse(r#"{ me: user(id: "1") { name friends(first: $n) { id } } }"#);
        let field = selections[0].as_field().unwrap();
        assert_eq!(field.name, "user");
        assert_eq!(field.response_key(), "me");
        assert_eq!(field.ty.name, "User");
        assert_eq!(
            field.arguments[0].value,
            ArgumentValue::Literal("\"1\"".to_string())
        );
        let friends = field.selection_set[1].as_field().unwrap();
        assert!(friends.ty.is_list);
        assert_eq!(
            friends.arguments[0].value,
            ArgumentValue::Variable("n".to_string())
        );
        assert_eq!(friends.argument_definitions[0].ty.rendered, "Int");
    }

    #[test]
    fn inlines_fragment_spreads() {
        let selections = parse(
            r#"
            query { user(id: "1") { ...parts } }
            fragment parts on User { name }
            "#,
        );
        let field = selections[0].as_field().unwrap();
        match &field.selection_set[0] {
            Selection::InlineFragment(fragment) => {
                assert_eq!(fragment.type_condition, "User");
                assert_eq!(fragment.selection_set.len(), 1);
            }
            other => panic!("expected an inline fragment, got {other:?}"),
        }
    }

    #[test]
    fn find_selection_matches_response_keys() {
        let selections = parse(r#"{ users { id pals: friends { name } } }"#);
        assert!(find_selection(&selections, "users").is_some());
        assert!(find_selection(&selections, "pals").is_some());
        assert!(find_selection(&selections, "friends").is_none());
        assert_eq!(find_selection(&selections, "name").unwrap().name, "name");
    }

    #[test]
    fn field_helpers() {
        assert_eq!(Field::typename().name, "__typename");
        assert!(Field::id().ty.non_null);
        let node = Field::node(vec![Selection::Field(Field::id())]);
        assert_eq!(node.name, "node");
        assert!(matches!(
            &node.arguments[0].value,
            ArgumentValue::Variable(v) if v == "id"
        ));
    }
}
