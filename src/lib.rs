//! A federated GraphQL gateway.
//!
//! `trellis` presents one GraphQL endpoint over any number of upstream
//! GraphQL services. At startup it introspects every upstream, merges the
//! schemas into a single public schema and builds a `type → field →
//! service` routing table. Each incoming operation is planned as a tree of
//! per-service steps, executed depth by depth with per-service batching
//! and deduplication, and the partial results are stitched back into one
//! response. Subscriptions delegate the root stream to the owning service
//! and re-run the dependent steps on every event.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let gateway = Arc::new(
//!     trellis::Gateway::builder()
//!         .services(["http://users:8080/graphql", "http://photos:8080/graphql"])
//!         .playground(true)
//!         .build()
//!         .await?,
//! );
//!
//! let app = trellis::http_server::router(gateway);
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:4000").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod execution;
mod fanout;
mod format;
mod gateway;
pub mod graphql;
pub mod http_server;
mod introspection;
mod json_ext;
mod merge;
mod playground;
mod protocols;
mod query_planner;
mod services;
mod spec;
mod subscription;

#[cfg(test)]
mod test_utils;

pub use error::FetchError;
pub use error::PlanError;
pub use error::RequestError;
pub use error::SchemaError;
pub use execution::Executor;
pub use execution::GetParentTypeFromIdFn;
pub use execution::ParallelExecutor;
pub use gateway::Gateway;
pub use gateway::GatewayBuilder;
pub use gateway::QueryerFactory;
pub use introspection::ParallelRemoteIntrospector;
pub use introspection::RemoteSchemaIntrospector;
pub use merge::ExtendMerger;
pub use merge::MergeInput;
pub use merge::MergeResult;
pub use merge::Merger;
pub use merge::SanitizeNodeMerger;
pub use merge::TypeUrlMap;
pub use query_planner::CachedPlanner;
pub use query_planner::OperationKind;
pub use query_planner::Planner;
pub use query_planner::PlanningContext;
pub use query_planner::QueryPlan;
pub use query_planner::QueryPlanStep;
pub use query_planner::ScrubFields;
pub use query_planner::SequentialPlanner;
pub use query_planner::StepService;
pub use services::HttpQueryer;
pub use services::Queryer;
pub use spec::Schema;
