//! Gateway errors.

use displaydoc::Display;
use thiserror::Error;

use crate::graphql;
use crate::graphql::IntoGraphQLErrors;
use crate::graphql::ERROR_CODE_UNDEFINED;
use crate::graphql::ERROR_CODE_VALIDATION_FAILED;
use crate::json_ext::Value;

/// Errors raised while talking to upstream services or stitching their
/// responses. Converted to response errors before reaching the client.
#[derive(Error, Display, Debug, Clone, PartialEq)]
pub enum FetchError {
    /// HTTP fetch failed from '{service}': {reason}
    SubrequestHttpError {
        status_code: Option<u16>,
        service: String,
        reason: String,
    },

    /// websocket fetch failed from '{service}': {reason}
    SubrequestWsError { service: String, reason: String },

    /// service '{service}' response was malformed: {reason}
    SubrequestMalformedResponse { service: String, reason: String },

    /// service '{service}' returned errors
    SubrequestErrors {
        service: String,
        errors: Vec<graphql::Error>,
    },

    /// request was malformed: {reason}
    MalformedRequest { reason: String },

    /// {reason}
    StitchingError { reason: String },
}

impl FetchError {
    pub(crate) fn stitching(reason: impl Into<String>) -> Self {
        FetchError::StitchingError {
            reason: reason.into(),
        }
    }

    /// Convert to GraphQL errors located at the given insertion point.
    /// Upstream GraphQL errors are forwarded as-is, rebased onto the
    /// stitching insertion point; everything else becomes one
    /// `UNDEFINED_ERROR`.
    pub(crate) fn to_graphql_errors(&self, path: &[String]) -> Vec<graphql::Error> {
        if let FetchError::SubrequestErrors { errors, .. } = self {
            let mut errors = errors.clone();
            for error in &mut errors {
                error.prefix_path(path);
            }
            return errors;
        }
        let mut error = graphql::Error::new(ERROR_CODE_UNDEFINED, self.to_string());
        error.path = path
            .iter()
            .map(|atom| Value::String(atom.as_str().into()))
            .collect();
        vec![error]
    }

    /// The first error of [`FetchError::to_graphql_errors`].
    pub(crate) fn to_graphql_error(&self, path: &[String]) -> graphql::Error {
        self.to_graphql_errors(path)
            .into_iter()
            .next()
            .unwrap_or_else(|| graphql::Error::new(ERROR_CODE_UNDEFINED, self.to_string()))
    }
}

impl IntoGraphQLErrors for FetchError {
    fn into_graphql_errors(self) -> Vec<graphql::Error> {
        match self {
            FetchError::SubrequestErrors { errors, .. } => errors,
            other => vec![other.to_graphql_error(&[])],
        }
    }
}

/// Schema lifecycle errors: introspection, parsing, validation and merging.
#[derive(Error, Display, Debug, Clone)]
pub enum SchemaError {
    /// schema validation failed: {errors:?}
    Validate { errors: Vec<String> },

    /// unable to introspect remote schema at '{url}': {reason}
    Introspection { url: String, reason: String },

    /// no source schemas
    NoSchemas,

    /// name collision: {name}({kind}) conflicts with {other_kind}
    NameCollision {
        name: String,
        kind: &'static str,
        other_kind: &'static str,
    },

    /// union collision: {name} has conflicting member sets
    UnionCollision { name: String },

    /// interface collision: {name} has conflicting possible types
    InterfaceCollision { name: String },

    /// node interface collision: {name} not implemented in all schemas
    NodeCollision { name: String },

    /// overlapping root types fields {type_name} : {field}
    OverlappingRootFields { type_name: String, field: String },

    /// overlapping fields {type_name} : {fields}
    OverlappingFields { type_name: String, fields: String },

    /// overlapping fields, not complete copy {type_name} : {fields}
    OverlappingFieldsNotCompleteCopy { type_name: String, fields: String },
}

impl IntoGraphQLErrors for SchemaError {
    fn into_graphql_errors(self) -> Vec<graphql::Error> {
        match self {
            SchemaError::Validate { errors } => errors
                .into_iter()
                .map(|message| graphql::Error::new(ERROR_CODE_VALIDATION_FAILED, message))
                .collect(),
            other => vec![graphql::Error::new(ERROR_CODE_UNDEFINED, other.to_string())],
        }
    }
}

/// Planner failures. All of these surface to the client as validation
/// errors for the whole request.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// could not find location type {name}
    UnknownType { name: String },

    /// could not find location for {field} of type {parent_type}
    UnknownFieldLocation {
        field: String,
        parent_type: String,
    },

    /// could not find location for type {name}
    UnknownTypeLocation { name: String },

    /// not implemented: {reason}
    NotImplemented { reason: String },
}

impl IntoGraphQLErrors for PlanError {
    fn into_graphql_errors(self) -> Vec<graphql::Error> {
        vec![graphql::Error::new(
            ERROR_CODE_VALIDATION_FAILED,
            self.to_string(),
        )]
    }
}

/// Malformed incoming HTTP requests; answered with 422.
#[derive(Error, Display, Debug, Clone)]
pub enum RequestError {
    /// only POST requests are supported
    MethodNotSupported,

    /// unknown content-type: {0}
    UnknownContentType(String),

    /// missing query from request
    MissingQuery,

    /// unable to parse request: {reason}
    ParseFailure { reason: String },

    /// error parsing file map: {reason}
    InvalidFileMap { reason: String },

    /// file with index {index} not found
    MissingFilePart { index: String },

    /// invalid file path: {path}
    InvalidFilePath { path: String },
}
