//! Planner phase 1: normalize the operation's selection set.
//!
//! Fragment spreads are already inlined by the conversion into the crate
//! selection tree. This pass adds the bookkeeping fields the executor
//! relies on (`__typename` on abstract types, `id` on `Node` implementors),
//! records every injected field for the final scrub, fans interface
//! fragments out into one fragment per concrete implementer, and unfolds
//! redundant union fragments.

use crate::query_planner::ScrubFields;
use crate::query_planner::sequential::PlanningContext;
use crate::spec::contains_field;
use crate::spec::has_field_named;
use crate::spec::Field;
use crate::spec::InlineFragment;
use crate::spec::Selection;
use crate::spec::ID_FIELD;
use crate::spec::TYPENAME;

pub(crate) fn sanitize_selection_set(
    ctx: &PlanningContext<'_>,
    selections: Vec<Selection>,
    parent_type: &str,
    insertion_point: &[String],
) -> (Vec<Selection>, ScrubFields) {
    let mut scrub = ScrubFields::new();
    let mut result: Vec<Selection> = Vec::new();

    for selection in selections {
        match selection {
            Selection::Field(mut field) => {
                if !field.selection_set.is_empty() {
                    let mut child_point = insertion_point.to_vec();
                    child_point.push(field.response_key().to_string());
                    let (child_set, child_scrub) = sanitize_selection_set(
                        ctx,
                        std::mem::take(&mut field.selection_set),
                        &field.ty.name,
                        &child_point,
                    );
                    scrub.merge(child_scrub);

                    let (child_set, added) =
                        add_bookkeeping_fields(ctx, child_set, &field.ty.name);
                    record_scrub_fields(ctx, &mut scrub, &child_point, &field.ty.name, &added);

                    field.selection_set = child_set;
                }
                push_deduped(&mut result, Selection::Field(field));
            }
            Selection::InlineFragment(fragment) => {
                let (child_set, child_scrub) = sanitize_selection_set(
                    ctx,
                    fragment.selection_set,
                    &fragment.type_condition,
                    insertion_point,
                );
                scrub.merge(child_scrub);

                let (child_set, added) =
                    add_bookkeeping_fields(ctx, child_set, &fragment.type_condition);
                for field in &added {
                    scrub.set(insertion_point, &fragment.type_condition, field);
                }

                let fragment = InlineFragment {
                    type_condition: fragment.type_condition,
                    selection_set: child_set,
                };

                if ctx.schema.is_interface(parent_type) {
                    for selection in fan_out_interface_fragment(ctx, fragment, parent_type) {
                        push_deduped(&mut result, selection);
                    }
                } else if ctx.schema.is_union(parent_type) {
                    for selection in unfold_union_fragment(fragment, parent_type) {
                        push_deduped(&mut result, selection);
                    }
                } else {
                    push_deduped(&mut result, Selection::InlineFragment(fragment));
                }
            }
        }
    }

    (result, scrub)
}

/// Interface fragments that don't already target one concrete implementer
/// are fanned out into one fragment per implementer.
fn fan_out_interface_fragment(
    ctx: &PlanningContext<'_>,
    fragment: InlineFragment,
    interface_name: &str,
) -> Vec<Selection> {
    let possible = ctx.schema.possible_types(interface_name);
    if possible
        .iter()
        .any(|implementer| implementer == &fragment.type_condition)
    {
        return vec![Selection::InlineFragment(fragment)];
    }

    possible
        .iter()
        .map(|implementer| {
            Selection::InlineFragment(InlineFragment {
                type_condition: implementer.clone(),
                selection_set: fragment.selection_set.clone(),
            })
        })
        .collect()
}

/// A union fragment whose condition names the enclosing union itself adds
/// nothing; unfold its body. Nested duplicates of the same condition are
/// folded into one fragment first.
fn unfold_union_fragment(fragment: InlineFragment, union_name: &str) -> Vec<Selection> {
    let mut folded: Vec<Selection> = Vec::new();
    for selection in fragment.selection_set {
        match selection {
            Selection::InlineFragment(inner) if inner.type_condition == fragment.type_condition => {
                for nested in inner.selection_set {
                    push_deduped(&mut folded, nested);
                }
            }
            other => push_deduped(&mut folded, other),
        }
    }

    if fragment.type_condition == union_name {
        folded
    } else {
        vec![Selection::InlineFragment(InlineFragment {
            type_condition: fragment.type_condition,
            selection_set: folded,
        })]
    }
}

/// Adds `__typename` (abstract types) and `id` (`Node` implementors) to a
/// selection set when absent, returning the names that were injected.
fn add_bookkeeping_fields(
    ctx: &PlanningContext<'_>,
    mut selections: Vec<Selection>,
    type_name: &str,
) -> (Vec<Selection>, Vec<String>) {
    let mut added = Vec::new();

    let implements_node = if ctx.schema.is_abstract(type_name) {
        if !contains_field(&selections, TYPENAME) {
            selections.insert(0, Selection::Field(Field::typename()));
            added.push(TYPENAME.to_string());
        }
        // the abstract type is reachable through `node` only when its
        // implementers are and it declares `id` itself
        let first_implementer = ctx.schema.possible_types(type_name).first();
        first_implementer
            .map(|implementer| {
                ctx.type_url_map
                    .implements_node(implementer)
                    .unwrap_or(false)
            })
            .unwrap_or(false)
            && ctx.schema.abstract_type_has_field(type_name, ID_FIELD)
    } else {
        ctx.type_url_map
            .implements_node(type_name)
            .unwrap_or(false)
    };

    if implements_node && !contains_field(&selections, ID_FIELD) {
        selections.insert(0, Selection::Field(Field::id()));
        added.push(ID_FIELD.to_string());
    }

    (selections, added)
}

/// Registers the injected fields of a field's child selection set. For
/// abstract types every concrete implementer gets an entry, since the
/// response objects will carry the implementer's `__typename`.
fn record_scrub_fields(
    ctx: &PlanningContext<'_>,
    scrub: &mut ScrubFields,
    path: &[String],
    type_name: &str,
    added: &[String],
) {
    for field in added {
        if ctx.schema.is_abstract(type_name) {
            for possible in ctx.schema.possible_types(type_name) {
                scrub.set(path, possible, field);
            }
        } else {
            scrub.set(path, type_name, field);
        }
    }
}

/// Appends selections, dropping fields whose response key is already taken.
fn push_deduped(result: &mut Vec<Selection>, selection: Selection) {
    if let Selection::Field(field) = &selection {
        if has_field_named(result, field.response_key()) {
            return;
        }
    }
    result.push(selection);
}
