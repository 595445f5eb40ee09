//! Planner phases 2-4: route selections to owning services, split them
//! into steps, and attach the derived query artifacts.

use std::collections::BTreeMap;
use std::sync::Arc;

use apollo_compiler::executable;

use crate::error::PlanError;
use crate::merge::TypeUrlMap;
use crate::query_planner::sanitize::sanitize_selection_set;
use crate::query_planner::OperationKind;
use crate::query_planner::QueryPlan;
use crate::query_planner::QueryPlanStep;
use crate::query_planner::StepService;
use crate::spec::collect_fields;
use crate::spec::is_builtin_name;
use crate::spec::is_root_type;
use crate::spec::Field;
use crate::spec::InlineFragment;
use crate::spec::Schema;
use crate::spec::Selection;
use crate::spec::ID_FIELD;
use crate::spec::NODE_FIELD;

/// Everything needed to plan one operation.
pub struct PlanningContext<'a> {
    pub schema: &'a Schema,
    pub type_url_map: &'a TypeUrlMap,
    pub operation_kind: OperationKind,
    pub operation_name: Option<String>,
    pub(crate) selections: Vec<Selection>,
}

impl<'a> PlanningContext<'a> {
    pub fn new(
        schema: &'a Schema,
        type_url_map: &'a TypeUrlMap,
        operation: &executable::Operation,
        document: &executable::ExecutableDocument,
    ) -> Self {
        PlanningContext {
            schema,
            type_url_map,
            operation_kind: operation.operation_type.into(),
            operation_name: operation.name.as_ref().map(|name| name.to_string()),
            selections: Selection::from_operation(operation, document),
        }
    }

    /// The service owning `field_name` on `type_name`. Built-in fields stay
    /// wherever their enclosing selection already executes.
    pub(crate) fn url_for(
        &self,
        type_name: &str,
        field_name: &str,
        fallback: &StepService,
    ) -> Result<StepService, PlanError> {
        if is_builtin_name(field_name) {
            return Ok(fallback.clone());
        }
        match self.type_url_map.get(type_name, field_name) {
            Some(url) => Ok(StepService::Url(url.clone())),
            None => Err(PlanError::UnknownFieldLocation {
                field: field_name.to_string(),
                parent_type: type_name.to_string(),
            }),
        }
    }
}

/// Produces a [`QueryPlan`] from a planning context.
pub trait Planner: Send + Sync {
    fn plan(&self, ctx: &PlanningContext<'_>) -> Result<Arc<QueryPlan>, PlanError>;
}

/// The default planner.
#[derive(Debug, Default, Clone, Copy)]
pub struct SequentialPlanner;

impl Planner for SequentialPlanner {
    fn plan(&self, ctx: &PlanningContext<'_>) -> Result<Arc<QueryPlan>, PlanError> {
        let parent_type = match ctx.operation_kind {
            OperationKind::Query => crate::spec::QUERY_TYPE,
            OperationKind::Mutation => crate::spec::MUTATION_TYPE,
            OperationKind::Subscription => crate::spec::SUBSCRIPTION_TYPE,
        };

        let (selections, scrub_fields) =
            sanitize_selection_set(ctx, ctx.selections.clone(), parent_type, &[]);

        let mut root_steps = create_query_plan_steps(ctx, &[], parent_type, None, selections)?;
        for step in &mut root_steps {
            step.operation_kind = ctx.operation_kind;
            step.operation_name = ctx.operation_name.clone();
            step.finalize(ctx.schema);
        }

        tracing::debug!(
            steps = root_steps.len(),
            operation = ?ctx.operation_name,
            "planned operation"
        );

        Ok(Arc::new(QueryPlan {
            root_steps,
            scrub_fields,
        }))
    }
}

fn create_query_plan_steps(
    ctx: &PlanningContext<'_>,
    insertion_point: &[String],
    parent_type: &str,
    parent_location: Option<&StepService>,
    selections: Vec<Selection>,
) -> Result<Vec<QueryPlanStep>, PlanError> {
    let routed = route_selection_set(ctx, parent_type, parent_location, selections)?;

    let mut result = Vec::with_capacity(routed.len());
    for (service, selection_set) in routed {
        let (selection_set, children) =
            extract_selection_set(ctx, insertion_point, parent_type, selection_set, &service)?;
        result.push(QueryPlanStep::new(
            service,
            parent_type,
            selection_set,
            insertion_point.to_vec(),
            children,
        ));
    }
    Ok(result)
}

/// Phase 2: group a selection set by owning service.
fn route_selection_set(
    ctx: &PlanningContext<'_>,
    parent_type: &str,
    parent_location: Option<&StepService>,
    selections: Vec<Selection>,
) -> Result<BTreeMap<StepService, Vec<Selection>>, PlanError> {
    let mut result: BTreeMap<StepService, Vec<Selection>> = BTreeMap::new();

    let Some(parent_location) = parent_location else {
        // at the root: peel off `node(id:...)` fields, split their inner
        // fragments by service, and route the remaining top-level fields
        let (node_groups, other) = group_node_root_fields(ctx, &selections)?;

        if !other.is_empty() {
            for url in ctx.type_url_map.urls() {
                let service = StepService::Url(url);
                let set = filter_selection_set_by_service(ctx, &other, &service, parent_type)?;
                if !set.is_empty() {
                    result.insert(service, set);
                }
            }
            if let Ok(set) =
                filter_selection_set_by_service(ctx, &other, &StepService::Internal, parent_type)
            {
                if !set.is_empty() {
                    result.insert(StepService::Internal, set);
                }
            }
        }

        for (service, group) in node_groups {
            result.entry(service).or_default().extend(group);
        }

        return Ok(result);
    };

    for selection in selections {
        match selection {
            Selection::Field(field) => {
                if is_builtin_name(&field.name) {
                    continue;
                }
                let service = match ctx.type_url_map.get(parent_type, &field.name) {
                    Some(url) => StepService::Url(url.clone()),
                    None => {
                        return Err(PlanError::UnknownFieldLocation {
                            field: field.name.clone(),
                            parent_type: parent_type.to_string(),
                        })
                    }
                };
                result
                    .entry(service)
                    .or_default()
                    .push(Selection::Field(field));
            }
            Selection::InlineFragment(_) => {
                return Err(PlanError::NotImplemented {
                    reason: "inline fragments cannot be routed outside the root".to_string(),
                })
            }
        }
    }
    Ok(result)
}

fn filter_selection_set_by_service(
    ctx: &PlanningContext<'_>,
    selections: &[Selection],
    service: &StepService,
    parent_type: &str,
) -> Result<Vec<Selection>, PlanError> {
    let mut result = Vec::new();
    for field in collect_fields(selections, None) {
        let owner = ctx.url_for(parent_type, &field.name, &StepService::Internal)?;
        if owner == *service {
            result.push(Selection::Field(field.clone()));
        }
    }
    Ok(result)
}

type NodeGroups = BTreeMap<StepService, Vec<Selection>>;

/// Splits each root `node` field's inline fragments by owning service, so
/// `node(id:...){ ... on T { a b } }` becomes one root step per service
/// that owns some of `a`,`b`. The `id` travels with every split so results
/// can be stitched.
fn group_node_root_fields(
    ctx: &PlanningContext<'_>,
    selections: &[Selection],
) -> Result<(NodeGroups, Vec<Selection>), PlanError> {
    let mut node_fields: Vec<&Field> = Vec::new();
    let mut other: Vec<Selection> = Vec::new();

    for field in collect_fields(selections, None) {
        if field.name == NODE_FIELD {
            node_fields.push(field);
        } else {
            other.push(Selection::Field(field.clone()));
        }
    }

    let mut groups: NodeGroups = BTreeMap::new();

    for node_field in node_fields {
        for selection in &node_field.selection_set {
            let Selection::InlineFragment(fragment) = selection else {
                continue;
            };

            let known_locations = ctx
                .type_url_map
                .urls_for_type(&fragment.type_condition)
                .ok_or_else(|| PlanError::UnknownTypeLocation {
                    name: fragment.type_condition.clone(),
                })?;

            let mut found_id: Option<Field> = None;
            let mut inner: BTreeMap<StepService, Vec<Selection>> = BTreeMap::new();

            for child in collect_fields(&fragment.selection_set, None) {
                if child.name == ID_FIELD {
                    found_id = Some(child.clone());
                    continue;
                }
                let service =
                    ctx.url_for(&fragment.type_condition, &child.name, &StepService::Internal)?;
                inner
                    .entry(service)
                    .or_default()
                    .push(Selection::Field(child.clone()));
            }

            // wrap each service's fields back into the type fragment
            for set in inner.values_mut() {
                let wrapped = Selection::InlineFragment(InlineFragment {
                    type_condition: fragment.type_condition.clone(),
                    selection_set: std::mem::take(set),
                });
                *set = vec![wrapped];
            }

            if inner.is_empty() {
                // only `id` (or nothing) was selected; any owner can answer
                if let Some(first) = known_locations.first() {
                    inner.insert(
                        StepService::Url(first.clone()),
                        vec![Selection::InlineFragment(fragment.clone())],
                    );
                }
            } else if let Some(id_field) = found_id {
                for set in inner.values_mut() {
                    set.push(Selection::Field(id_field.clone()));
                }
            }

            for (service, selection_set) in inner {
                let mut node_clone = node_field.clone();
                node_clone.selection_set = selection_set;
                groups
                    .entry(service)
                    .or_default()
                    .push(Selection::Field(node_clone));
            }
        }
    }

    Ok((groups, other))
}

/// Phase 3: walk a routed selection set, keeping what the current service
/// owns and emitting child steps for everything else.
fn extract_selection_set(
    ctx: &PlanningContext<'_>,
    insertion_point: &[String],
    parent_type: &str,
    selections: Vec<Selection>,
    location: &StepService,
) -> Result<(Vec<Selection>, Vec<QueryPlanStep>), PlanError> {
    if !ctx.schema.has_type(parent_type) {
        return Err(PlanError::UnknownType {
            name: parent_type.to_string(),
        });
    }

    let parent_implements_node = ctx
        .type_url_map
        .implements_node(parent_type)
        .unwrap_or(false);

    // fields of an interface may live in different services per
    // implementer; rewrite as per-implementer fragments first
    let selections = if ctx.schema.is_interface(parent_type) {
        format_interface_selections(ctx, parent_type, selections, location)
    } else {
        selections
    };

    let mut selection_result: Vec<Selection> = Vec::new();
    let mut children: Vec<QueryPlanStep> = Vec::new();

    for selection in selections {
        match selection {
            Selection::Field(field) => {
                let owner = match ctx.url_for(parent_type, &field.name, location) {
                    Ok(owner) => owner,
                    Err(_) => {
                        // interface-declared fields and bare `id`s have no
                        // entry of their own; they ride along
                        selection_result.push(Selection::Field(field));
                        continue;
                    }
                };

                if owner == *location {
                    if field.selection_set.is_empty() {
                        selection_result.push(Selection::Field(field));
                    } else {
                        let mut child_point = insertion_point.to_vec();
                        child_point.push(field.response_key().to_string());
                        let (child_set, child_steps) = extract_selection_set(
                            ctx,
                            &child_point,
                            &field.ty.name,
                            field.selection_set.clone(),
                            location,
                        )?;
                        let mut new_field = field;
                        new_field.selection_set = child_set;
                        selection_result.push(Selection::Field(new_field));
                        children.extend(child_steps);
                    }
                    continue;
                }

                // owned elsewhere: merge into an existing sibling step for
                // that service, or open a new one
                let mut merged = false;
                for step in children.iter_mut() {
                    if step.service == owner && step.insertion_point == insertion_point {
                        let mut modified = field.clone();
                        if !field.selection_set.is_empty() {
                            let mut child_point = insertion_point.to_vec();
                            child_point.push(field.response_key().to_string());
                            let (child_set, child_steps) = extract_selection_set(
                                ctx,
                                &child_point,
                                &field.ty.name,
                                field.selection_set.clone(),
                                &step.service,
                            )?;
                            modified.selection_set = child_set;
                            step.then.extend(child_steps);
                        }
                        match add_field_to_node_query(
                            parent_type,
                            &step.selection_set,
                            Selection::Field(modified.clone()),
                        ) {
                            Some(new_set) => step.selection_set = new_set,
                            None => step.selection_set.push(Selection::Field(modified)),
                        }
                        merged = true;
                        break;
                    }
                }

                if !merged {
                    let steps = create_query_plan_steps(
                        ctx,
                        insertion_point,
                        parent_type,
                        Some(location),
                        vec![Selection::Field(field)],
                    )?;
                    children.extend(steps);
                }
            }
            Selection::InlineFragment(fragment) => {
                let (child_set, child_steps) = extract_selection_set(
                    ctx,
                    insertion_point,
                    &fragment.type_condition,
                    fragment.selection_set,
                    location,
                )?;
                selection_result.push(Selection::InlineFragment(InlineFragment {
                    type_condition: fragment.type_condition,
                    selection_set: child_set,
                }));
                children.extend(child_steps);
            }
        }
    }

    // non-root selections on a Node type execute through the federation
    // primitive, unless an explicit id anchors them already
    let has_top_level_id = selection_result
        .iter()
        .any(|selection| matches!(selection, Selection::Field(field) if field.name == ID_FIELD));
    if !is_root_type(parent_type) && parent_implements_node && !has_top_level_id {
        selection_result = vec![Selection::Field(Field::node(vec![
            Selection::InlineFragment(InlineFragment {
                type_condition: parent_type.to_string(),
                selection_set: selection_result,
            }),
        ]))];
    }

    Ok((selection_result, children))
}

/// Rewrites an interface selection set as `__typename` plus one fragment
/// per implementer when its fields are spread across services.
fn format_interface_selections(
    ctx: &PlanningContext<'_>,
    interface_name: &str,
    selections: Vec<Selection>,
    location: &StepService,
) -> Vec<Selection> {
    let implementers = ctx.schema.possible_types(interface_name);

    let mut services: Vec<StepService> = Vec::new();
    for field in collect_fields(&selections, None) {
        for implementer in implementers {
            if let Some(url) = ctx.type_url_map.get(implementer, &field.name) {
                let service = StepService::Url(url.clone());
                if !services.contains(&service) {
                    services.push(service);
                }
            }
        }
    }

    if services.len() == 1 && services[0] == *location {
        return selections;
    }

    let mut result = vec![Selection::Field(Field::typename())];
    for implementer in implementers {
        let fields = fields_declared_on(ctx, &selections, implementer);
        result.push(Selection::InlineFragment(InlineFragment {
            type_condition: implementer.clone(),
            selection_set: fields,
        }));
    }
    result
}

/// The selections that apply to one concrete implementer, deduplicated by
/// response key.
fn fields_declared_on(
    ctx: &PlanningContext<'_>,
    selections: &[Selection],
    type_name: &str,
) -> Vec<Selection> {
    let mut seen: Vec<String> = Vec::new();
    let mut result = Vec::new();
    for field in collect_fields(selections, Some(type_name)) {
        if is_builtin_name(&field.name) || !ctx.schema.type_has_field(type_name, &field.name) {
            continue;
        }
        let key = field.response_key().to_string();
        if seen.contains(&key) {
            continue;
        }
        seen.push(key);
        result.push(Selection::Field(field.clone()));
    }
    result
}

/// Adds a selection inside an existing `node(id: $id) { ... on T { … } }`
/// wrapper, returning the rebuilt selection set.
fn add_field_to_node_query(
    parent_type: &str,
    node_query: &[Selection],
    selection: Selection,
) -> Option<Vec<Selection>> {
    let first = node_query.first()?.as_field()?;
    if first.name != NODE_FIELD || first.selection_set.is_empty() {
        return None;
    }
    let Selection::InlineFragment(fragment) = &first.selection_set[0] else {
        return None;
    };

    let mut selection_set = fragment.selection_set.clone();
    selection_set.push(selection);
    Some(vec![Selection::Field(Field::node(vec![
        Selection::InlineFragment(InlineFragment {
            type_condition: parent_type.to_string(),
            selection_set,
        }),
    ]))])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::ExtendMerger;
    use crate::merge::MergeInput;
    use crate::merge::Merger;

    const USERS_SDL: &str = r#"
        interface Node { id: ID! }
        type User implements Node { id: ID! firstName: String }
        type Query { node(id: ID!): Node user: User version: String }
        type Mutation { setVersion(to: String!): String }
    "#;

    const PHOTOS_SDL: &str = r#"
        interface Node { id: ID! }
        type Photo implements Node { id: ID! url: String }
        type User implements Node { id: ID! favoriteCatPhoto: Photo }
        type Query { node(id: ID!): Node allPhotos: [Photo] }
    "#;

    fn merged() -> crate::merge::MergeResult {
        ExtendMerger
            .merge(vec![
                MergeInput {
                    schema: apollo_compiler::Schema::parse(USERS_SDL, "users.graphql").unwrap(),
                    url: Arc::from("http://users"),
                },
                MergeInput {
                    schema: apollo_compiler::Schema::parse(PHOTOS_SDL, "photos.graphql").unwrap(),
                    url: Arc::from("http://photos"),
                },
            ])
            .unwrap()
    }

    fn plan(query: &str) -> Arc<QueryPlan> {
        let merged = merged();
        plan_against(&merged, query)
    }

    fn plan_against(merged: &crate::merge::MergeResult, query: &str) -> Arc<QueryPlan> {
        let document = merged.schema.parse_operation(query).unwrap();
        let operation = document.operations.get(None).unwrap();
        let ctx = PlanningContext::new(&merged.schema, &merged.type_url_map, operation, &document);
        SequentialPlanner.plan(&ctx).unwrap()
    }

    fn url(step: &QueryPlanStep) -> &str {
        step.service.as_url().unwrap()
    }

    #[test]
    fn single_service_query_is_one_step() {
        let plan = plan("{ version }");
        assert_eq!(plan.root_steps.len(), 1);
        let step = &plan.root_steps[0];
        assert_eq!(url(step), "http://users");
        assert_eq!(step.parent_type, "Query");
        assert!(step.insertion_point.is_empty());
        assert!(step.then.is_empty());
        assert_eq!(step.query_string, "{\n\tversion\n}");
        assert!(step.variables_list.is_empty());
    }

    #[test]
    fn cross_service_object_splits_into_a_node_child_step() {
        let plan = plan("{ user { firstName favoriteCatPhoto { url } } }");
        assert_eq!(plan.root_steps.len(), 1);
        let root = &plan.root_steps[0];
        assert_eq!(url(root), "http://users");
        assert_eq!(root.then.len(), 1);

        let child = &root.then[0];
        assert_eq!(url(child), "http://photos");
        assert_eq!(child.parent_type, "User");
        assert_eq!(child.insertion_point, vec!["user"]);
        assert!(child.query_string.contains("node(id: $id)"));
        assert!(child.query_string.contains("... on User"));
        assert!(child.query_string.contains("favoriteCatPhoto"));
        assert!(child.query_string.starts_with("query ($id: ID!)"));
        assert_eq!(child.variables_list, vec!["id"]);

        // the parent carries the id the child will stitch by
        assert!(root.query_string.contains("id"));
        // and the injected id is scheduled for scrubbing
        assert_eq!(
            plan.scrub_fields.get(&["user".to_string()], "User").unwrap(),
            &["id".to_string()]
        );
    }

    #[test]
    fn sibling_fields_for_one_service_share_a_step() {
        let merged = merged();
        let plan = plan_against(&merged, "{ version user { firstName } }");
        // both top-level fields belong to the users service
        assert_eq!(plan.root_steps.len(), 1);
        let step = &plan.root_steps[0];
        assert!(step.query_string.contains("version"));
        assert!(step.query_string.contains("firstName"));
    }

    #[test]
    fn root_fields_of_different_services_become_separate_steps() {
        let plan = plan("{ version allPhotos { url } }");
        assert_eq!(plan.root_steps.len(), 2);
        let mut urls: Vec<&str> = plan.root_steps.iter().map(url).collect();
        urls.sort();
        assert_eq!(urls, vec!["http://photos", "http://users"]);
    }

    #[test]
    fn mutation_steps_keep_the_mutation_keyword() {
        let plan = plan(r#"mutation Rename ($to: String!) { setVersion(to: $to) }"#);
        let step = &plan.root_steps[0];
        assert_eq!(step.operation_kind, OperationKind::Mutation);
        assert!(step
            .query_string
            .starts_with("mutation Rename ($to: String!)"));
        assert_eq!(step.variables_list, vec!["to"]);
        assert_eq!(step.operation_name.as_deref(), Some("Rename"));
    }

    #[test]
    fn node_root_field_splits_by_service() {
        let plan = plan(r#"{ node(id: "User_1") { ... on User { firstName favoriteCatPhoto { url } } } }"#);
        assert_eq!(plan.root_steps.len(), 2);

        let users_step = plan
            .root_steps
            .iter()
            .find(|step| url(step) == "http://users")
            .unwrap();
        assert!(users_step.query_string.contains("firstName"));
        assert!(users_step.query_string.contains("node(id: \"User_1\")"));

        let photos_step = plan
            .root_steps
            .iter()
            .find(|step| url(step) == "http://photos")
            .unwrap();
        assert!(photos_step.query_string.contains("favoriteCatPhoto"));
    }

    #[test]
    fn interface_fields_split_per_implementer() {
        let accounts = r#"
            interface Node { id: ID! }
            interface User { id: ID! name: String }
            type BasicUser implements Node & User { id: ID! name: String }
            type OtherUser implements Node & User { id: ID! name: String }
            type Query { node(id: ID!): Node getUsers: [User] }
        "#;
        let files = r#"
            interface Node { id: ID! }
            type File implements Node { id: ID! }
            type BasicUser implements Node { id: ID! files: [File] }
            type OtherUser implements Node { id: ID! files: [File] }
            type Query { node(id: ID!): Node }
        "#;
        let merged = ExtendMerger
            .merge(vec![
                MergeInput {
                    schema: apollo_compiler::Schema::parse(accounts, "accounts.graphql").unwrap(),
                    url: Arc::from("http://accounts"),
                },
                MergeInput {
                    schema: apollo_compiler::Schema::parse(files, "files.graphql").unwrap(),
                    url: Arc::from("http://files"),
                },
            ])
            .unwrap();

        let plan = plan_against(&merged, "{ getUsers { id name files { id } } }");
        assert_eq!(plan.root_steps.len(), 1);
        let root = &plan.root_steps[0];
        assert_eq!(url(root), "http://accounts");
        assert!(root.query_string.contains("__typename"));
        assert!(root.query_string.contains("... on BasicUser"));
        assert!(root.query_string.contains("... on OtherUser"));
        assert!(!root.query_string.contains("files"));

        assert_eq!(root.then.len(), 2);
        let mut parents: Vec<&str> = root
            .then
            .iter()
            .map(|step| step.parent_type.as_str())
            .collect();
        parents.sort();
        assert_eq!(parents, vec!["BasicUser", "OtherUser"]);
        for child in &root.then {
            assert_eq!(url(child), "http://files");
            assert_eq!(child.insertion_point, vec!["getUsers"]);
            assert!(child.query_string.contains("node(id: $id)"));
            assert!(child.query_string.contains("files"));
        }
    }

    #[test]
    fn sibling_cross_service_fields_merge_into_one_node_step() {
        let photos = r#"
            interface Node { id: ID! }
            type Photo implements Node { id: ID! url: String }
            type User implements Node { id: ID! favoriteCatPhoto: Photo photoCount: Int }
            type Query { node(id: ID!): Node }
        "#;
        let merged = ExtendMerger
            .merge(vec![
                MergeInput {
                    schema: apollo_compiler::Schema::parse(USERS_SDL, "users.graphql").unwrap(),
                    url: Arc::from("http://users"),
                },
                MergeInput {
                    schema: apollo_compiler::Schema::parse(photos, "photos.graphql").unwrap(),
                    url: Arc::from("http://photos"),
                },
            ])
            .unwrap();

        let plan = plan_against(
            &merged,
            "{ user { firstName photoCount favoriteCatPhoto { url } } }",
        );
        let root = &plan.root_steps[0];
        // both photo-owned fields ride in a single child step
        assert_eq!(root.then.len(), 1);
        let child = &root.then[0];
        assert!(child.query_string.contains("photoCount"));
        assert!(child.query_string.contains("favoriteCatPhoto"));
        assert_eq!(child.query_string.matches("node(id: $id)").count(), 1);
    }
}
