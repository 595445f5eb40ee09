//! The gateway façade: startup and per-request orchestration.

use std::collections::HashMap;
use std::sync::Arc;

use apollo_compiler::executable;
use apollo_compiler::validation::Valid;
use apollo_compiler::ExecutableDocument;
use apollo_compiler::Node;

use crate::error::SchemaError;
use crate::execution::ExecutionContext;
use crate::execution::Executor;
use crate::execution::GetParentTypeFromIdFn;
use crate::execution::ParallelExecutor;
use crate::graphql;
use crate::graphql::IntoGraphQLErrors;
use crate::graphql::Request;
use crate::graphql::Response;
use crate::introspection::remote::default_introspector;
use crate::introspection::IntrospectionResolver;
use crate::introspection::RemoteSchemaIntrospector;
use crate::json_ext::Value;
use crate::merge::ExtendMerger;
use crate::merge::MergeInput;
use crate::merge::Merger;
use crate::merge::TypeUrlMap;
use crate::query_planner::Planner;
use crate::query_planner::PlanningContext;
use crate::query_planner::QueryPlan;
use crate::query_planner::SequentialPlanner;
use crate::query_planner::StepService;
use crate::services::HttpQueryer;
use crate::services::Queryer;
use crate::spec::Schema;

/// Builds the queryer for one upstream service URL.
pub type QueryerFactory = dyn Fn(Arc<str>) -> Arc<dyn Queryer> + Send + Sync;

const DEFAULT_MAX_BATCH_SIZE: usize = 3000;

/// One unified GraphQL endpoint over N upstream services.
///
/// Built once at startup; everything it holds is immutable afterwards, so
/// requests share it freely behind an [`Arc`].
pub struct Gateway {
    pub(crate) schema: Arc<Schema>,
    pub(crate) type_url_map: Arc<TypeUrlMap>,
    pub(crate) planner: Arc<dyn Planner>,
    pub(crate) executor: Arc<dyn Executor>,
    pub(crate) queryers: HashMap<Arc<str>, Arc<dyn Queryer>>,
    pub(crate) playground: bool,
    pub(crate) get_parent_type_from_id: Option<Arc<GetParentTypeFromIdFn>>,
}

impl Gateway {
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    /// The merged public schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Runs one request through the full pipeline: validate, plan, execute,
    /// stitch, scrub.
    pub async fn execute(&self, request: &Request) -> Response {
        let plan = match self.plan_request(request) {
            Ok(plan) => plan,
            Err(errors) => return Response::from_errors(errors),
        };

        // introspection-only plans are answered from the merged schema
        for step in &plan.root_steps {
            if step.service == StepService::Internal {
                let resolver = IntrospectionResolver {
                    variables: &request.variables,
                };
                if let Some(result) =
                    resolver.resolve_introspection_fields(&step.selection_set, &self.schema)
                {
                    return Response::from_data(Value::Object(result));
                }
            }
        }

        let ctx = ExecutionContext {
            plan: &plan,
            variables: &request.variables,
            queryers: &self.queryers,
            initial_result: None,
            get_parent_type_from_id: self.get_parent_type_from_id.clone(),
        };

        match self.executor.execute(&ctx).await {
            Ok(mut result) => {
                plan.scrub_fields.clean(&mut result);
                Response::from_data(Value::Object(result))
            }
            Err(errors) => Response { data: None, errors },
        }
    }

    /// Validate and plan a request, reporting failures as response errors.
    pub(crate) fn plan_request(
        &self,
        request: &Request,
    ) -> Result<Arc<QueryPlan>, Vec<graphql::Error>> {
        let document = self
            .schema
            .parse_operation(&request.query)
            .map_err(|error| error.into_graphql_errors())?;

        let operation = select_operation(&document, request.operation_name.as_deref())
            .map_err(|error| vec![error])?;

        let ctx = PlanningContext::new(&self.schema, &self.type_url_map, operation, &document);
        self.planner
            .plan(&ctx)
            .map_err(|error| error.into_graphql_errors())
    }
}

fn select_operation<'d>(
    document: &'d Valid<ExecutableDocument>,
    operation_name: Option<&str>,
) -> Result<&'d Node<executable::Operation>, graphql::Error> {
    match operation_name {
        Some(name) => document.operations.named.get(name).ok_or_else(|| {
            graphql::Error::validation(format!("unable to extract query for operation {name}"))
        }),
        None => {
            let named_count = document.operations.named.len();
            if let Some(anonymous) = &document.operations.anonymous {
                if named_count == 0 {
                    return Ok(anonymous);
                }
            } else if named_count == 1 {
                if let Some(operation) = document.operations.named.values().next() {
                    return Ok(operation);
                }
            }
            Err(graphql::Error::validation(
                "many queries provided, but no operationName",
            ))
        }
    }
}

/// Startup configuration. Every knob has a production default.
pub struct GatewayBuilder {
    urls: Vec<Arc<str>>,
    merger: Arc<dyn Merger>,
    planner: Arc<dyn Planner>,
    executor: Arc<dyn Executor>,
    queryer_factory: Arc<QueryerFactory>,
    introspector: Arc<dyn RemoteSchemaIntrospector>,
    playground: bool,
    get_parent_type_from_id: Option<Arc<GetParentTypeFromIdFn>>,
}

impl GatewayBuilder {
    fn new() -> Self {
        GatewayBuilder {
            urls: Vec::new(),
            merger: Arc::new(ExtendMerger),
            planner: Arc::new(SequentialPlanner),
            executor: Arc::new(ParallelExecutor),
            queryer_factory: Arc::new(|url: Arc<str>| {
                Arc::new(HttpQueryer::new(url, DEFAULT_MAX_BATCH_SIZE)) as Arc<dyn Queryer>
            }),
            introspector: Arc::new(default_introspector()),
            playground: false,
            get_parent_type_from_id: None,
        }
    }

    pub fn service(mut self, url: impl AsRef<str>) -> Self {
        self.urls.push(Arc::from(url.as_ref()));
        self
    }

    pub fn services<I: IntoIterator<Item = S>, S: AsRef<str>>(mut self, urls: I) -> Self {
        for url in urls {
            self.urls.push(Arc::from(url.as_ref()));
        }
        self
    }

    pub fn merger(mut self, merger: Arc<dyn Merger>) -> Self {
        self.merger = merger;
        self
    }

    pub fn planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = planner;
        self
    }

    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn queryer_factory(mut self, factory: Arc<QueryerFactory>) -> Self {
        self.queryer_factory = factory;
        self
    }

    pub fn introspector(mut self, introspector: Arc<dyn RemoteSchemaIntrospector>) -> Self {
        self.introspector = introspector;
        self
    }

    pub fn playground(mut self, enabled: bool) -> Self {
        self.playground = enabled;
        self
    }

    pub fn get_parent_type_from_id(mut self, resolver: Arc<GetParentTypeFromIdFn>) -> Self {
        self.get_parent_type_from_id = Some(resolver);
        self
    }

    /// Introspect every upstream in parallel, merge the schemas, memoize
    /// the queryers. Any introspection or merge failure aborts startup.
    pub async fn build(self) -> Result<Gateway, SchemaError> {
        let schemas = self.introspector.introspect(&self.urls).await?;

        let inputs: Vec<MergeInput> = schemas
            .into_iter()
            .zip(self.urls.iter())
            .map(|(schema, url)| MergeInput {
                schema,
                url: url.clone(),
            })
            .collect();

        let merged = self.merger.merge(inputs)?;
        tracing::info!(services = self.urls.len(), "merged upstream schemas");

        let queryers = self
            .urls
            .iter()
            .map(|url| (url.clone(), (self.queryer_factory)(url.clone())))
            .collect();

        Ok(Gateway {
            schema: Arc::new(merged.schema),
            type_url_map: Arc::new(merged.type_url_map),
            planner: self.planner,
            executor: self.executor,
            queryers,
            playground: self.playground,
            get_parent_type_from_id: self.get_parent_type_from_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;
    use crate::json_ext::Object;
    use crate::test_utils::MockQueryer;
    use crate::test_utils::StaticIntrospector;

    const USERS_SDL: &str = r#"
        interface Node { id: ID! }
        type User implements Node { id: ID! firstName: String }
        type Query { node(id: ID!): Node user: User }
    "#;

    const PHOTOS_SDL: &str = r#"
        interface Node { id: ID! }
        type Photo implements Node { id: ID! url: String }
        type User implements Node { id: ID! favoriteCatPhoto: Photo }
        type Query { node(id: ID!): Node }
    "#;

    fn object(value: Value) -> Object {
        match value {
            Value::Object(object) => object,
            other => panic!("expected an object, got {other:?}"),
        }
    }

    pub(crate) async fn test_gateway() -> Gateway {
        let users = MockQueryer::new(
            "http://users",
            Box::new(|_| Ok(object(json!({"user": {"id": "1", "firstName": "hello"}})))),
        );
        let photos = MockQueryer::new(
            "http://photos",
            Box::new(|_| {
                Ok(object(
                    json!({"node": {"favoriteCatPhoto": {"url": "hello world"}}}),
                ))
            }),
        );

        Gateway::builder()
            .services(["http://users", "http://photos"])
            .introspector(Arc::new(StaticIntrospector {
                schemas: vec![USERS_SDL, PHOTOS_SDL],
            }))
            .queryer_factory(Arc::new(move |url: Arc<str>| {
                if url.as_ref() == "http://users" {
                    users.clone() as Arc<dyn Queryer>
                } else {
                    photos.clone() as Arc<dyn Queryer>
                }
            }))
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn executes_a_stitched_query_end_to_end() {
        let gateway = test_gateway().await;
        let response = gateway
            .execute(&Request::new(
                "{ user { firstName favoriteCatPhoto { url } } }",
            ))
            .await;
        assert!(response.errors.is_empty());
        assert_eq!(
            response.data,
            Some(json!({"user": {"firstName": "hello", "favoriteCatPhoto": {"url": "hello world"}}}))
        );
    }

    #[tokio::test]
    async fn validation_failures_are_reported_with_null_data() {
        let gateway = test_gateway().await;
        let response = gateway.execute(&Request::new("{ doesNotExist }")).await;
        assert_eq!(response.data, None);
        assert_eq!(
            response.errors[0].extension_code(),
            Some("GRAPHQL_VALIDATION_FAILED")
        );
    }

    #[tokio::test]
    async fn unknown_operation_names_fail_validation() {
        let gateway = test_gateway().await;
        let request = Request::new("query A { user { firstName } }").with_operation_name("B");
        let response = gateway.execute(&request).await;
        assert!(response.errors[0]
            .message
            .contains("unable to extract query for operation B"));
    }

    #[tokio::test]
    async fn introspection_is_answered_from_the_merged_schema() {
        let gateway = test_gateway().await;
        let response = gateway
            .execute(&Request::new(r#"{ __type(name: "User") { name kind } }"#))
            .await;
        assert!(response.errors.is_empty());
        assert_eq!(
            response.data,
            Some(json!({"__type": {"name": "User", "kind": "OBJECT"}}))
        );
    }

    #[tokio::test]
    async fn typename_probe_resolves_internally() {
        let gateway = test_gateway().await;
        let response = gateway.execute(&Request::new("{ __schema { queryType { name } } }")).await;
        assert_eq!(
            response.data,
            Some(json!({"__schema": {"queryType": {"name": "Query"}}}))
        );
    }
}
