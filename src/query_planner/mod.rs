//! Query planning: splitting one validated operation into a tree of
//! per-service steps.

mod caching;
mod plan;
mod sanitize;
mod scrub;
mod sequential;

pub use caching::CachedPlanner;
pub use plan::QueryPlan;
pub use plan::QueryPlanStep;
pub use plan::StepService;
pub use scrub::ScrubFields;
pub use sequential::Planner;
pub use sequential::PlanningContext;
pub use sequential::SequentialPlanner;

use serde::Deserialize;
use serde::Serialize;

/// The three GraphQL operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    pub(crate) fn keyword(&self) -> &'static str {
        match self {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
            OperationKind::Subscription => "subscription",
        }
    }
}

impl From<apollo_compiler::ast::OperationType> for OperationKind {
    fn from(operation_type: apollo_compiler::ast::OperationType) -> Self {
        match operation_type {
            apollo_compiler::ast::OperationType::Query => OperationKind::Query,
            apollo_compiler::ast::OperationType::Mutation => OperationKind::Mutation,
            apollo_compiler::ast::OperationType::Subscription => OperationKind::Subscription,
        }
    }
}
