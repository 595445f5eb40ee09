//! Names and schema-level helpers shared by the merger, planner and executor.

pub(crate) mod schema;
pub(crate) mod selection;

pub use schema::Schema;
pub(crate) use selection::collect_fields;
pub(crate) use selection::contains_field;
pub(crate) use selection::find_selection;
pub(crate) use selection::has_field_named;
pub(crate) use selection::ArgumentValue;
pub(crate) use selection::Field;
pub(crate) use selection::FieldType;
pub(crate) use selection::InlineFragment;
pub(crate) use selection::Selection;

pub(crate) const TYPENAME: &str = "__typename";
pub(crate) const ID_FIELD: &str = "id";
pub(crate) const NODE_FIELD: &str = "node";
pub(crate) const NODE_INTERFACE: &str = "Node";

pub(crate) const QUERY_TYPE: &str = "Query";
pub(crate) const MUTATION_TYPE: &str = "Mutation";
pub(crate) const SUBSCRIPTION_TYPE: &str = "Subscription";

/// Returns true for `__`-prefixed names reserved by the GraphQL spec.
pub(crate) fn is_builtin_name(name: &str) -> bool {
    name.starts_with("__")
}

pub(crate) fn is_root_type(name: &str) -> bool {
    name == QUERY_TYPE || name == MUTATION_TYPE || name == SUBSCRIPTION_TYPE
}
