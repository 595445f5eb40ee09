//! The query plan model.

use std::fmt;
use std::sync::Arc;

use sha1::Digest;
use sha1::Sha1;

use crate::format;
use crate::query_planner::OperationKind;
use crate::query_planner::ScrubFields;
use crate::spec::Schema;
use crate::spec::Selection;

/// The target of a step: a real upstream service, or the gateway itself for
/// introspection-only selections.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StepService {
    Url(Arc<str>),
    Internal,
}

impl StepService {
    pub fn as_url(&self) -> Option<&Arc<str>> {
        match self {
            StepService::Url(url) => Some(url),
            StepService::Internal => None,
        }
    }
}

impl fmt::Display for StepService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepService::Url(url) => url.fmt(f),
            StepService::Internal => "<internal>".fmt(f),
        }
    }
}

/// One unit of the plan: one query to one service, stitched in at
/// `insertion_point`, with `then` steps that depend on its result.
#[derive(Debug, Clone)]
pub struct QueryPlanStep {
    pub service: StepService,
    pub parent_type: String,
    pub(crate) selection_set: Vec<Selection>,
    pub insertion_point: Vec<String>,
    pub then: Vec<QueryPlanStep>,

    // derived artifacts, set once by `finalize`
    pub operation_kind: OperationKind,
    pub operation_name: Option<String>,
    pub query_string: String,
    pub variables_list: Vec<String>,
    pub query_hash: String,
}

impl QueryPlanStep {
    pub(crate) fn new(
        service: StepService,
        parent_type: impl Into<String>,
        selection_set: Vec<Selection>,
        insertion_point: Vec<String>,
        then: Vec<QueryPlanStep>,
    ) -> Self {
        QueryPlanStep {
            service,
            parent_type: parent_type.into(),
            selection_set,
            insertion_point,
            then,
            operation_kind: OperationKind::Query,
            operation_name: None,
            query_string: String::new(),
            variables_list: Vec::new(),
            query_hash: String::new(),
        }
    }

    /// Compute the query string, variable list and query hash for this step
    /// and every step below it.
    pub(crate) fn finalize(&mut self, schema: &Schema) {
        self.variables_list = format::variables_used(&self.selection_set);
        self.query_string = format::format_operation(
            &self.selection_set,
            self.operation_kind,
            self.operation_name.as_deref(),
            schema,
        );
        let mut hasher = Sha1::new();
        hasher.update(self.query_string.as_bytes());
        self.query_hash = format!("{:x}", hasher.finalize());

        for child in &mut self.then {
            child.finalize(schema);
        }
    }

    /// One-line rendering for logs.
    pub fn debug_selection_set(&self) -> String {
        format::debug_format_selection_set(&self.selection_set)
    }
}

/// The plan for one operation: the root steps plus the table of synthetic
/// fields to scrub from the final response.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub root_steps: Vec<QueryPlanStep>,
    pub scrub_fields: ScrubFields,
}

impl QueryPlan {
    /// Every distinct upstream service the plan touches.
    pub fn service_urls(&self) -> Vec<Arc<str>> {
        let mut urls = Vec::new();
        fn walk(steps: &[QueryPlanStep], urls: &mut Vec<Arc<str>>) {
            for step in steps {
                if let StepService::Url(url) = &step.service {
                    if !urls.iter().any(|known| known == url) {
                        urls.push(url.clone());
                    }
                }
                walk(&step.then, urls);
            }
        }
        walk(&self.root_steps, &mut urls);
        urls
    }
}
