use bytes::Bytes;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;

use crate::json_ext::Object;

/// A GraphQL request as sent over HTTP or a websocket frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub query: String,

    /// Clients may send `"variables": null`; it reads as empty.
    #[serde(
        skip_serializing_if = "Object::is_empty",
        default,
        deserialize_with = "nullable_variables"
    )]
    pub variables: Object,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub operation_name: Option<String>,

    /// File uploads attached through a multipart body. Never serialized;
    /// the queryer re-encodes them as multipart when forwarding upstream.
    #[serde(skip)]
    pub uploads: Vec<FileUpload>,
}

/// One file from a multipart request, addressed at a variable slot.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FileUpload {
    /// Dotted path under `variables`, e.g. `file` or `input.files.1`.
    pub variable_path: String,
    pub filename: String,
    pub content: Bytes,
}

fn nullable_variables<'de, D>(deserializer: D) -> Result<Object, D::Error>
where
    D: Deserializer<'de>,
{
    let variables = Option::<Object>::deserialize(deserializer)?;
    Ok(variables.unwrap_or_default())
}

impl Request {
    pub fn new(query: impl Into<String>) -> Self {
        Request {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_variables(mut self, variables: Object) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_operation_name(mut self, operation_name: impl Into<String>) -> Self {
        self.operation_name = Some(operation_name.into());
        self
    }
}
