//! Rendering selection sets back into query strings.
//!
//! Every step of a query plan executes as its own operation, so the
//! formatter reconstructs a full query string from a selection tree and
//! infers the variable declarations it must carry. The output is
//! deterministic (declarations sorted lexicographically) so that equal
//! selection sets render to equal strings and can key the plan cache.

use std::collections::BTreeMap;

use crate::query_planner::OperationKind;
use crate::spec::collect_fields;
use crate::spec::ArgumentValue;
use crate::spec::Field;
use crate::spec::Schema;
use crate::spec::Selection;

/// Renders `selections` as an executable operation.
pub(crate) fn format_operation(
    selections: &[Selection],
    kind: OperationKind,
    operation_name: Option<&str>,
    schema: &Schema,
) -> String {
    let body = format_selection_set(selections);

    let declarations = infer_variable_declarations(selections, schema);
    let mut tuples: Vec<String> = declarations
        .into_iter()
        .map(|(name, ty)| format!("${name}: {ty}"))
        .collect();
    tuples.sort();

    let mut header = String::new();
    if kind != OperationKind::Query || operation_name.is_some() || !tuples.is_empty() {
        header.push_str(kind.keyword());
        if let Some(name) = operation_name {
            header.push(' ');
            header.push_str(name);
        }
        if !tuples.is_empty() {
            header.push_str(" (");
            header.push_str(&tuples.join(", "));
            header.push(')');
        }
        header.push(' ');
    }

    format!("{header}{body}")
}

/// Renders just the braces body, tab-indented.
pub(crate) fn format_selection_set(selections: &[Selection]) -> String {
    let mut buffer = String::new();
    write_selection_set(&mut buffer, selections, 0);
    buffer
}

/// One-line rendition for logs and plan debugging.
pub(crate) fn debug_format_selection_set(selections: &[Selection]) -> String {
    let formatted = format_selection_set(selections);
    let mut out = String::with_capacity(formatted.len());
    let mut last_was_space = false;
    for ch in formatted.chars() {
        let ch = if ch == '\n' || ch == '\t' { ' ' } else { ch };
        if ch == ' ' {
            if last_was_space {
                continue;
            }
            last_was_space = true;
        } else {
            last_was_space = false;
        }
        out.push(ch);
    }
    out
}

/// All variable names referenced anywhere in the argument values, in
/// first-appearance order, deduplicated.
pub(crate) fn variables_used(selections: &[Selection]) -> Vec<String> {
    let mut names = Vec::new();
    collect_variables(selections, &mut names);
    names
}

fn collect_variables(selections: &[Selection], names: &mut Vec<String>) {
    for field in collect_fields(selections, None) {
        for argument in &field.arguments {
            collect_value_variables(&argument.value, names);
        }
        collect_variables(&field.selection_set, names);
    }
}

fn collect_value_variables(value: &ArgumentValue, names: &mut Vec<String>) {
    match value {
        ArgumentValue::Variable(name) => {
            if !names.iter().any(|known| known == name) {
                names.push(name.clone());
            }
        }
        ArgumentValue::List(items) => {
            for item in items {
                collect_value_variables(item, names);
            }
        }
        ArgumentValue::Object(fields) => {
            for (_, item) in fields {
                collect_value_variables(item, names);
            }
        }
        ArgumentValue::Literal(_) => {}
    }
}

fn write_selection_set(buffer: &mut String, selections: &[Selection], indent: usize) {
    if selections.is_empty() {
        return;
    }
    buffer.push_str("{\n");
    for selection in selections {
        match selection {
            Selection::Field(field) => write_field(buffer, field, indent + 1),
            Selection::InlineFragment(fragment) => {
                push_indent(buffer, indent + 1);
                buffer.push_str("... on ");
                buffer.push_str(&fragment.type_condition);
                buffer.push(' ');
                write_selection_set(buffer, &fragment.selection_set, indent + 1);
                buffer.push('\n');
            }
        }
    }
    push_indent(buffer, indent);
    buffer.push('}');
}

fn write_field(buffer: &mut String, field: &Field, indent: usize) {
    push_indent(buffer, indent);
    if let Some(alias) = &field.alias {
        if alias != &field.name {
            buffer.push_str(alias);
            buffer.push_str(": ");
        }
    }
    buffer.push_str(&field.name);
    if !field.arguments.is_empty() {
        buffer.push('(');
        for (index, argument) in field.arguments.iter().enumerate() {
            if index > 0 {
                buffer.push_str(", ");
            }
            buffer.push_str(&argument.name);
            buffer.push_str(": ");
            write_value(buffer, &argument.value);
        }
        buffer.push(')');
    }
    if !field.selection_set.is_empty() {
        buffer.push(' ');
        write_selection_set(buffer, &field.selection_set, indent);
    }
    buffer.push('\n');
}

fn write_value(buffer: &mut String, value: &ArgumentValue) {
    match value {
        ArgumentValue::Variable(name) => {
            buffer.push('$');
            buffer.push_str(name);
        }
        ArgumentValue::List(items) => {
            buffer.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    buffer.push_str(", ");
                }
                write_value(buffer, item);
            }
            buffer.push(']');
        }
        ArgumentValue::Object(fields) => {
            buffer.push('{');
            for (index, (name, item)) in fields.iter().enumerate() {
                if index > 0 {
                    buffer.push_str(", ");
                }
                buffer.push_str(name);
                buffer.push_str(": ");
                write_value(buffer, item);
            }
            buffer.push('}');
        }
        ArgumentValue::Literal(rendered) => buffer.push_str(rendered),
    }
}

fn push_indent(buffer: &mut String, indent: usize) {
    for _ in 0..indent {
        buffer.push('\t');
    }
}

/// Variable name -> declared type, resolved through argument definitions
/// and, for object-shaped values, through the schema's input types.
fn infer_variable_declarations(
    selections: &[Selection],
    schema: &Schema,
) -> BTreeMap<String, String> {
    let mut declarations = BTreeMap::new();
    walk_declarations(selections, schema, &mut declarations);
    declarations
}

fn walk_declarations(
    selections: &[Selection],
    schema: &Schema,
    declarations: &mut BTreeMap<String, String>,
) {
    for field in collect_fields(selections, None) {
        for argument in &field.arguments {
            let Some(definition) = field
                .argument_definitions
                .iter()
                .find(|definition| definition.name == argument.name)
            else {
                continue;
            };
            declare_value(
                &argument.value,
                &definition.ty.rendered,
                &definition.ty.name,
                schema,
                declarations,
            );
        }
        walk_declarations(&field.selection_set, schema, declarations);
    }
}

fn declare_value(
    value: &ArgumentValue,
    rendered_type: &str,
    named_type: &str,
    schema: &Schema,
    declarations: &mut BTreeMap<String, String>,
) {
    match value {
        ArgumentValue::Variable(name) => {
            declarations.insert(name.clone(), rendered_type.to_string());
        }
        ArgumentValue::List(items) => {
            // items of a list share the list's inner named type
            for item in items {
                declare_value(item, named_type, named_type, schema, declarations);
            }
        }
        ArgumentValue::Object(fields) => {
            for (field_name, item) in fields {
                let Some(field_type) = schema.input_field_type(named_type, field_name) else {
                    continue;
                };
                declare_value(
                    item,
                    &field_type.to_string(),
                    field_type.inner_named_type().as_str(),
                    schema,
                    declarations,
                );
            }
        }
        ArgumentValue::Literal(_) => {}
    }
}
