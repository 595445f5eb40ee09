//! Plan execution: depth-by-depth, batched per service.

pub(crate) mod depth;
pub(crate) mod insertion;
pub(crate) mod point_data;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

pub use point_data::CachedPointDataExtractor;
pub use point_data::PointData;

use crate::graphql;
use crate::json_ext::Object;
use crate::query_planner::QueryPlan;
use crate::services::Queryer;

/// Resolves a node id to its concrete type name, letting the executor skip
/// requests that could never match a step's parent type.
pub type GetParentTypeFromIdFn = dyn Fn(&str) -> Option<String> + Send + Sync;

/// Everything one plan execution needs. Lives for a single operation.
pub struct ExecutionContext<'a> {
    pub plan: &'a QueryPlan,
    pub variables: &'a Object,
    pub queryers: &'a HashMap<Arc<str>, Arc<dyn Queryer>>,
    /// Seed for the accumulator; used by subscription re-runs.
    pub initial_result: Option<Object>,
    pub get_parent_type_from_id: Option<Arc<GetParentTypeFromIdFn>>,
}

/// Runs a query plan to completion.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, ctx: &ExecutionContext<'_>) -> Result<Object, Vec<graphql::Error>>;
}

/// The default executor: flattens the plan into depths and executes each
/// depth's steps concurrently, stitching results between depths.
#[derive(Debug, Default, Clone, Copy)]
pub struct ParallelExecutor;

#[async_trait]
impl Executor for ParallelExecutor {
    async fn execute(&self, ctx: &ExecutionContext<'_>) -> Result<Object, Vec<graphql::Error>> {
        depth::execute_plan(ctx).await
    }
}
