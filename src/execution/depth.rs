//! The depth scheduler.
//!
//! The plan tree flattens into depths: root steps at depth 0, each `then`
//! one deeper. A depth executes as one batch: its requests are grouped by
//! service, deduplicated and fanned out concurrently, and its merged
//! results determine the next depth's requests. No deeper request is
//! issued before the whole depth is stitched into the accumulator.

use std::collections::HashMap;

use crate::error::FetchError;
use crate::execution::insertion::extract_value_modifying_source;
use crate::execution::insertion::find_insertion_points;
use crate::execution::point_data::CachedPointDataExtractor;
use crate::execution::ExecutionContext;
use crate::fanout::async_map_reduce;
use crate::graphql;
use crate::graphql::Request;
use crate::json_ext::merge_objects;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::query_planner::QueryPlanStep;
use crate::query_planner::StepService;
use crate::spec::is_root_type;
use crate::spec::ID_FIELD;
use crate::spec::NODE_FIELD;

/// One step scheduled at one concrete insertion point.
pub(crate) struct ExecutionRequest<'a> {
    pub(crate) step: &'a QueryPlanStep,
    pub(crate) insertion_point: Vec<String>,
}

impl ExecutionRequest<'_> {
    fn to_graphql_errors(&self, error: FetchError) -> Vec<graphql::Error> {
        error.to_graphql_errors(&self.insertion_point)
    }
}

/// A step's partial result, ready to stitch in at `insertion_point`.
struct ExecutionResult {
    insertion_point: Vec<String>,
    result: Object,
}

struct DepthResponse<'a> {
    results: Vec<ExecutionResult>,
    next_requests: Vec<ExecutionRequest<'a>>,
}

pub(crate) async fn execute_plan(
    ctx: &ExecutionContext<'_>,
) -> Result<Object, Vec<graphql::Error>> {
    let extractor = CachedPointDataExtractor::new();
    let mut accumulator = ctx.initial_result.clone().unwrap_or_default();

    let mut requests: Vec<ExecutionRequest> = ctx
        .plan
        .root_steps
        .iter()
        .map(|step| ExecutionRequest {
            step,
            insertion_point: step.insertion_point.clone(),
        })
        .collect();

    let mut depth = 0usize;
    while !requests.is_empty() {
        tracing::trace!(depth, requests = requests.len(), "executing depth");
        let response = execute_depth(ctx, &extractor, requests).await?;

        // the merge phase is serial: only this loop writes the accumulator
        for result in response.results {
            merge_result(&extractor, &mut accumulator, result).map_err(|error| vec![error])?;
        }

        requests = response.next_requests;
        depth += 1;
    }

    Ok(accumulator)
}

fn merge_result(
    extractor: &CachedPointDataExtractor,
    accumulator: &mut Object,
    result: ExecutionResult,
) -> Result<(), graphql::Error> {
    if result.insertion_point.is_empty() {
        merge_objects(accumulator, result.result);
        return Ok(());
    }

    let target = extract_value_modifying_source(extractor, accumulator, &result.insertion_point)
        .map_err(|error| error.to_graphql_error(&result.insertion_point))?;
    merge_objects(target, result.result);
    Ok(())
}

/// Executes one depth: partition by service, fan out per service, parse.
async fn execute_depth<'a>(
    ctx: &ExecutionContext<'_>,
    extractor: &CachedPointDataExtractor,
    requests: Vec<ExecutionRequest<'a>>,
) -> Result<DepthResponse<'a>, Vec<graphql::Error>> {
    // group by service, preserving first-appearance order so the depth's
    // result list is deterministic
    let mut groups: Vec<(StepService, Vec<ExecutionRequest<'a>>)> = Vec::new();
    for request in requests {
        match groups
            .iter_mut()
            .find(|(service, _)| *service == request.step.service)
        {
            Some((_, group)) => group.push(request),
            None => groups.push((request.step.service.clone(), vec![request])),
        }
    }

    async_map_reduce(
        groups,
        DepthResponse {
            results: Vec::new(),
            next_requests: Vec::new(),
        },
        |(service, group)| async move {
            let responses = execute_requests(ctx, extractor, &service, group).await?;
            parse_responses(responses)
        },
        |mut acc, value| {
            acc.results.extend(value.results);
            acc.next_requests.extend(value.next_requests);
            acc
        },
    )
    .await
    .map_err(|errors| errors.into_iter().flatten().collect())
}

/// The dedup bookkeeping: every batch input gets a key; inputs sharing a
/// key collapse into one outgoing request and share its response.
struct IndexMapValue {
    target_index: usize,
    indexes: Vec<usize>,
}

fn dedup_key(request: &ExecutionRequest<'_>, variables: &Object) -> Option<String> {
    if is_root_type(&request.step.parent_type) || variables.len() != 1 {
        return None;
    }
    let id = variables.get(ID_FIELD)?;
    Some(format!("!{}{}", id, request.step.query_hash))
}

/// Sends one service's slice of the depth. Responses come back in input
/// order; deduplicated requests receive deep copies, elided requests a
/// null node.
async fn execute_requests<'a>(
    ctx: &ExecutionContext<'_>,
    extractor: &CachedPointDataExtractor,
    service: &StepService,
    requests: Vec<ExecutionRequest<'a>>,
) -> Result<Vec<(ExecutionRequest<'a>, Object)>, Vec<graphql::Error>> {
    let mut batch: Vec<Request> = Vec::new();
    let mut index_map: HashMap<String, IndexMapValue> = HashMap::new();
    let mut elided: Vec<usize> = Vec::new();

    for (index, request) in requests.iter().enumerate() {
        let variables = get_variables(ctx, extractor, request)
            .map_err(|error| request.to_graphql_errors(error))?;

        if !is_need_to_query(ctx, request, &variables) {
            elided.push(index);
            continue;
        }

        let key = dedup_key(request, &variables).unwrap_or_else(|| index.to_string());
        if let Some(entry) = index_map.get_mut(&key) {
            entry.indexes.push(index);
            continue;
        }
        index_map.insert(
            key,
            IndexMapValue {
                target_index: batch.len(),
                indexes: vec![index],
            },
        );

        batch.push(Request {
            query: request.step.query_string.clone(),
            variables,
            operation_name: request.step.operation_name.clone(),
            uploads: Vec::new(),
        });
    }

    let mut slots: Vec<Option<Object>> = Vec::with_capacity(requests.len());
    slots.resize_with(requests.len(), || None);

    if !batch.is_empty() {
        let StepService::Url(url) = service else {
            return Err(requests[0].to_graphql_errors(FetchError::stitching(
                "introspection steps cannot be sent to an upstream service",
            )));
        };
        let queryer = ctx.queryers.get(url).ok_or_else(|| {
            requests[0].to_graphql_errors(FetchError::stitching(format!(
                "unable to find queryer for: {url}"
            )))
        })?;

        let batch_len = batch.len();
        let responses = queryer
            .query(batch)
            .await
            .map_err(|error| requests[0].to_graphql_errors(error))?;
        if responses.len() != batch_len {
            return Err(requests[0].to_graphql_errors(
                FetchError::SubrequestMalformedResponse {
                    service: url.to_string(),
                    reason: "not all requests were fetched".to_string(),
                },
            ));
        }

        for (target_index, response) in responses.into_iter().enumerate() {
            let indexes = index_map
                .values()
                .find(|entry| entry.target_index == target_index)
                .map(|entry| entry.indexes.as_slice())
                .unwrap_or_default();
            for &index in indexes {
                // deep copy so parallel consumers never alias
                slots[index] = Some(response.clone());
            }
        }
    }

    for index in elided {
        let mut null_node = Object::default();
        null_node.insert(NODE_FIELD, Value::Null);
        slots[index] = Some(null_node);
    }

    Ok(requests
        .into_iter()
        .zip(slots)
        .map(|(request, slot)| (request, slot.unwrap_or_default()))
        .collect())
}

/// The variables a request sends: the step's declared variables from the
/// operation, plus the node id from the insertion point's last atom.
fn get_variables(
    ctx: &ExecutionContext<'_>,
    extractor: &CachedPointDataExtractor,
    request: &ExecutionRequest<'_>,
) -> Result<Object, FetchError> {
    let mut variables = Object::default();

    for name in &request.step.variables_list {
        if let Some(value) = ctx.variables.get(name.as_str()) {
            variables.insert(name.as_str(), value.clone());
        }
    }

    if let Some(head) = request.insertion_point.last() {
        let data = extractor.extract(head)?;
        let id = data
            .id
            .clone()
            .ok_or_else(|| FetchError::stitching("could not find id in path"))?;
        variables.insert(ID_FIELD, Value::String(id.into()));
    }

    Ok(variables)
}

/// Statically-known misses on interfaces are elided entirely.
fn is_need_to_query(
    ctx: &ExecutionContext<'_>,
    request: &ExecutionRequest<'_>,
    variables: &Object,
) -> bool {
    if is_root_type(&request.step.parent_type) {
        return true;
    }
    let Some(resolver) = &ctx.get_parent_type_from_id else {
        return true;
    };
    let Some(id) = variables.get(ID_FIELD).and_then(|value| value.as_str()) else {
        return true;
    };
    match resolver(id) {
        Some(parent_type) => parent_type == request.step.parent_type,
        None => true,
    }
}

/// Parses each response: unwrap the `node` envelope for non-root steps and
/// compute the requests the step's children need.
fn parse_responses<'a>(
    responses: Vec<(ExecutionRequest<'a>, Object)>,
) -> Result<DepthResponse<'a>, Vec<graphql::Error>> {
    let mut results = Vec::with_capacity(responses.len());
    let mut next_requests = Vec::new();

    for (request, mut response) in responses {
        let step = request.step;

        let result = if is_root_type(&step.parent_type) {
            response
        } else {
            // a non-root step always queries through `node`; only the
            // object underneath it is the step's result
            match response.remove(NODE_FIELD) {
                None => {
                    return Err(request
                        .to_graphql_errors(FetchError::stitching("missing node key when expected")))
                }
                Some(Value::Null) => Object::default(),
                Some(Value::Object(object)) => object,
                Some(_) => {
                    return Err(
                        request.to_graphql_errors(FetchError::stitching("node is not a map"))
                    )
                }
            }
        };

        next_requests.extend(
            find_next_execution_requests(&request, &result)
                .map_err(|error| request.to_graphql_errors(error))?,
        );

        results.push(ExecutionResult {
            insertion_point: request.insertion_point,
            result,
        });
    }

    Ok(DepthResponse {
        results,
        next_requests,
    })
}

/// One request per concrete insertion point, for each child step.
///
/// At the root (empty insertion point) siblings frequently share the same
/// dependent insertion point over a large body, so discovered points are
/// memoized per target path.
fn find_next_execution_requests<'a>(
    request: &ExecutionRequest<'a>,
    result: &Object,
) -> Result<Vec<ExecutionRequest<'a>>, FetchError> {
    let step = request.step;
    if step.then.is_empty() {
        return Ok(Vec::new());
    }

    let mut next = Vec::new();
    let mut cache: HashMap<Vec<String>, Vec<Vec<String>>> = HashMap::new();
    let use_cache = request.insertion_point.is_empty();

    for child in &step.then {
        let points = if use_cache {
            match cache.get(&child.insertion_point) {
                Some(points) => points.clone(),
                None => {
                    let points = find_insertion_points(
                        &child.insertion_point,
                        &step.selection_set,
                        result,
                        vec![request.insertion_point.clone()],
                    )?;
                    cache.insert(child.insertion_point.clone(), points.clone());
                    points
                }
            }
        } else {
            find_insertion_points(
                &child.insertion_point,
                &step.selection_set,
                result,
                vec![request.insertion_point.clone()],
            )?
        };

        for insertion_point in points {
            next.push(ExecutionRequest {
                step: child,
                insertion_point,
            });
        }
    }

    Ok(next)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json_bytes::json;
    use tokio::sync::mpsc;
    use tokio::sync::oneshot;

    use super::*;
    use crate::execution::Executor;
    use crate::execution::ParallelExecutor;
    use crate::graphql::Response;
    use crate::merge::ExtendMerger;
    use crate::merge::MergeInput;
    use crate::merge::Merger;
    use crate::query_planner::Planner;
    use crate::query_planner::PlanningContext;
    use crate::query_planner::QueryPlan;
    use crate::query_planner::SequentialPlanner;
    use crate::services::Queryer;

    type Handler = Box<dyn Fn(&Request) -> Object + Send + Sync>;

    struct MockQueryer {
        url: String,
        handler: Handler,
        batches: Mutex<Vec<usize>>,
    }

    impl MockQueryer {
        fn new(url: &str, handler: Handler) -> Arc<Self> {
            Arc::new(MockQueryer {
                url: url.to_string(),
                handler,
                batches: Mutex::new(Vec::new()),
            })
        }

        fn batch_sizes(&self) -> Vec<usize> {
            self.batches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Queryer for MockQueryer {
        fn url(&self) -> &str {
            &self.url
        }

        async fn query(&self, requests: Vec<Request>) -> Result<Vec<Object>, FetchError> {
            self.batches.lock().unwrap().push(requests.len());
            Ok(requests.iter().map(|request| (self.handler)(request)).collect())
        }

        async fn subscribe(
            &self,
            _request: Request,
            _close: oneshot::Receiver<()>,
            _responses: mpsc::Sender<Response>,
        ) -> Result<(), FetchError> {
            Err(FetchError::SubrequestWsError {
                service: self.url.clone(),
                reason: "not supported by the mock".to_string(),
            })
        }
    }

    const USERS_SDL: &str = r#"
        interface Node { id: ID! }
        type User implements Node { id: ID! firstName: String }
        type Query { node(id: ID!): Node user: User users: [User] values: [String] }
    "#;

    const PHOTOS_SDL: &str = r#"
        interface Node { id: ID! }
        type Photo implements Node { id: ID! url: String }
        type User implements Node { id: ID! favoriteCatPhoto: Photo }
        type Query { node(id: ID!): Node }
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

    fn plan(merged: &crate::merge::MergeResult, query: &str) -> Arc<QueryPlan> {
        let document = merged.schema.parse_operation(query).unwrap();
        let operation = document.operations.get(None).unwrap();
        let ctx = PlanningContext::new(&merged.schema, &merged.type_url_map, operation, &document);
        SequentialPlanner.plan(&ctx).unwrap()
    }

    async fn execute(
        plan: &QueryPlan,
        queryers: Vec<Arc<MockQueryer>>,
        resolver: Option<Arc<crate::execution::GetParentTypeFromIdFn>>,
    ) -> Result<Object, Vec<graphql::Error>> {
        let queryers: HashMap<Arc<str>, Arc<dyn Queryer>> = queryers
            .into_iter()
            .map(|queryer| {
                (
                    Arc::from(queryer.url().to_string().as_str()),
                    queryer as Arc<dyn Queryer>,
                )
            })
            .collect();
        let variables = Object::default();
        let ctx = ExecutionContext {
            plan,
            variables: &variables,
            queryers: &queryers,
            initial_result: None,
            get_parent_type_from_id: resolver,
        };
        ParallelExecutor.execute(&ctx).await
    }

    fn object(value: Value) -> Object {
        match value {
            Value::Object(object) => object,
            other => panic!("expected an object, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn single_service_root_query() {
        let merged = merged();
        let plan = plan(&merged, "{ values }");
        let users = MockQueryer::new(
            "http://users",
            Box::new(|_| object(json!({"values": ["hello", "world"]}))),
        );

        let result = execute(&plan, vec![users], None).await.unwrap();
        assert_eq!(Value::Object(result), json!({"values": ["hello", "world"]}));
    }

    #[tokio::test]
    async fn cross_service_object_stitch() {
        let merged = merged();
        let plan = plan(&merged, "{ user { firstName favoriteCatPhoto { url } } }");
        let users = MockQueryer::new(
            "http://users",
            Box::new(|_| object(json!({"user": {"id": "1", "firstName": "hello"}}))),
        );
        let photos = MockQueryer::new(
            "http://photos",
            Box::new(|request| {
                assert_eq!(request.variables.get("id"), Some(&json!("1")));
                object(json!({"node": {"favoriteCatPhoto": {"url": "hello world"}}}))
            }),
        );

        let mut result = execute(&plan, vec![users, photos], None).await.unwrap();
        assert_eq!(
            Value::Object(result.clone()),
            json!({"user": {"id": "1", "firstName": "hello", "favoriteCatPhoto": {"url": "hello world"}}})
        );

        // scrubbing removes the injected id, leaving exactly what the
        // client asked for
        plan.scrub_fields.clean(&mut result);
        assert_eq!(
            Value::Object(result),
            json!({"user": {"firstName": "hello", "favoriteCatPhoto": {"url": "hello world"}}})
        );
    }

    #[tokio::test]
    async fn null_node_leaves_no_key() {
        let merged = merged();
        let plan = plan(&merged, "{ user { firstName favoriteCatPhoto { url } } }");
        let users = MockQueryer::new(
            "http://users",
            Box::new(|_| object(json!({"user": {"id": "1", "firstName": "hello"}}))),
        );
        let photos = MockQueryer::new(
            "http://photos",
            Box::new(|_| object(json!({"node": null}))),
        );

        let result = execute(&plan, vec![users, photos], None).await.unwrap();
        assert_eq!(
            Value::Object(result),
            json!({"user": {"id": "1", "firstName": "hello"}})
        );
    }

    #[tokio::test]
    async fn duplicate_ids_collapse_into_one_upstream_request() {
        let merged = merged();
        let plan = plan(&merged, "{ users { favoriteCatPhoto { url } } }");
        let users = MockQueryer::new(
            "http://users",
            Box::new(|_| {
                object(json!({"users": [
                    {"id": "1"}, {"id": "2"}, {"id": "1"}, {"id": "3"}, {"id": "1"}
                ]}))
            }),
        );
        let photos = MockQueryer::new(
            "http://photos",
            Box::new(|request| {
                let id = request.variables.get("id").unwrap().as_str().unwrap();
                object(json!({"node": {"favoriteCatPhoto": {"url": format!("url-{id}")}}}))
            }),
        );

        let result = execute(&plan, vec![users, photos.clone()], None)
            .await
            .unwrap();

        // 5 child requests, 3 distinct ids, one upstream batch of 3
        assert_eq!(photos.batch_sizes(), vec![3]);

        let users_list = result.get("users").unwrap().as_array().unwrap();
        assert_eq!(users_list.len(), 5);
        for (index, expected) in ["url-1", "url-2", "url-1", "url-3", "url-1"]
            .iter()
            .enumerate()
        {
            let url = users_list[index]
                .get("favoriteCatPhoto")
                .unwrap()
                .get("url")
                .unwrap();
            assert_eq!(url, &json!(*expected));
        }
    }

    #[tokio::test]
    async fn parent_type_filter_elides_known_misses() {
        let merged = merged();
        let plan = plan(&merged, "{ user { firstName favoriteCatPhoto { url } } }");
        let users = MockQueryer::new(
            "http://users",
            Box::new(|_| object(json!({"user": {"id": "1", "firstName": "hello"}}))),
        );
        let photos = MockQueryer::new(
            "http://photos",
            Box::new(|_| panic!("the photos service must not be called")),
        );

        let resolver: Arc<crate::execution::GetParentTypeFromIdFn> =
            Arc::new(|_id: &str| Some("Photo".to_string()));
        let result = execute(&plan, vec![users, photos.clone()], Some(resolver))
            .await
            .unwrap();

        assert!(photos.batch_sizes().is_empty());
        assert_eq!(
            Value::Object(result),
            json!({"user": {"id": "1", "firstName": "hello"}})
        );
    }

    #[tokio::test]
    async fn upstream_transport_errors_carry_the_insertion_point() {
        struct FailingQueryer;

        #[async_trait]
        impl Queryer for FailingQueryer {
            fn url(&self) -> &str {
                "http://photos"
            }

            async fn query(&self, _requests: Vec<Request>) -> Result<Vec<Object>, FetchError> {
                Err(FetchError::SubrequestHttpError {
                    status_code: Some(502),
                    service: "http://photos".to_string(),
                    reason: "bad gateway".to_string(),
                })
            }

            async fn subscribe(
                &self,
                _request: Request,
                _close: oneshot::Receiver<()>,
                _responses: mpsc::Sender<Response>,
            ) -> Result<(), FetchError> {
                unreachable!()
            }
        }

        let merged = merged();
        let plan = plan(&merged, "{ user { firstName favoriteCatPhoto { url } } }");
        let users = MockQueryer::new(
            "http://users",
            Box::new(|_| object(json!({"user": {"id": "1", "firstName": "hello"}}))),
        );

        let mut queryers: HashMap<Arc<str>, Arc<dyn Queryer>> = HashMap::new();
        queryers.insert(Arc::from("http://users"), users as Arc<dyn Queryer>);
        queryers.insert(Arc::from("http://photos"), Arc::new(FailingQueryer));

        let variables = Object::default();
        let ctx = ExecutionContext {
            plan: &plan,
            variables: &variables,
            queryers: &queryers,
            initial_result: None,
            get_parent_type_from_id: None,
        };
        let errors = ParallelExecutor.execute(&ctx).await.unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].extension_code(), Some("UNDEFINED_ERROR"));
        assert_eq!(errors[0].path[0], json!("user#1"));
    }
}

