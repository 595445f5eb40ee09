//! GraphQL request, response and error wire types.

mod request;
mod response;

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

pub use request::FileUpload;
pub use request::Request;
pub use response::Response;

use crate::json_ext::Object;
use crate::json_ext::Value;

pub const ERROR_CODE_VALIDATION_FAILED: &str = "GRAPHQL_VALIDATION_FAILED";
pub const ERROR_CODE_UNDEFINED: &str = "UNDEFINED_ERROR";

/// The location of an error in the originating GraphQL document.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

/// A [GraphQL error](https://spec.graphql.org/October2021/#sec-Errors) as
/// found in the `errors` field of a [`Response`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct Error {
    pub message: String,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub locations: Vec<Location>,

    /// Path to the field this error applies to, as response keys and list
    /// indices.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub path: Vec<Value>,

    #[serde(skip_serializing_if = "Object::is_empty", default)]
    pub extensions: Object,
}

impl Error {
    /// An error with the given `extensions.code`.
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        let mut extensions = Object::default();
        extensions.insert("code", Value::String(code.to_string().into()));
        Error {
            message: message.into(),
            locations: Vec::new(),
            path: Vec::new(),
            extensions,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ERROR_CODE_VALIDATION_FAILED, message)
    }

    pub fn with_path(mut self, path: Vec<Value>) -> Self {
        self.path = path;
        self
    }

    /// Prefix the error's path with the insertion point it was stitched
    /// under, so upstream field errors point into the merged response.
    pub(crate) fn prefix_path(&mut self, prefix: &[String]) {
        if prefix.is_empty() {
            return;
        }
        let mut path: Vec<Value> = prefix
            .iter()
            .map(|atom| Value::String(atom.as_str().into()))
            .collect();
        path.append(&mut self.path);
        self.path = path;
    }

    pub fn extension_code(&self) -> Option<&str> {
        self.extensions.get("code").and_then(|code| code.as_str())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.message.fmt(f)
    }
}

impl std::error::Error for Error {}

/// Conversion of typed errors into the response error list.
pub(crate) trait IntoGraphQLErrors {
    fn into_graphql_errors(self) -> Vec<Error>;
}

impl IntoGraphQLErrors for Error {
    fn into_graphql_errors(self) -> Vec<Error> {
        vec![self]
    }
}

impl<T: IntoGraphQLErrors> IntoGraphQLErrors for Vec<T> {
    fn into_graphql_errors(self) -> Vec<Error> {
        self.into_iter()
            .flat_map(IntoGraphQLErrors::into_graphql_errors)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    #[test]
    fn serializes_minimal_error() {
        let error = Error::new(ERROR_CODE_UNDEFINED, "boom");
        let serialized = serde_json::to_value(&error).unwrap();
        assert_eq!(
            serialized,
            serde_json::json!({
                "message": "boom",
                "extensions": {"code": "UNDEFINED_ERROR"}
            })
        );
    }

    #[test]
    fn prefixes_paths_with_insertion_points() {
        let mut error = Error::validation("bad").with_path(vec![json!("url")]);
        error.prefix_path(&["user".to_string(), "photo#Photo_1".to_string()]);
        assert_eq!(error.path, vec![json!("user"), json!("photo#Photo_1"), json!("url")]);
    }
}
