use bytes::Bytes;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;

use crate::error::FetchError;
use crate::graphql::Error;
use crate::json_ext::Value;

/// A GraphQL response, from an upstream service or produced by the gateway.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// `data` is always emitted, `null` included.
    pub data: Option<Value>,

    /// Some servers send `"errors": null`; it reads as empty.
    #[serde(
        skip_serializing_if = "Vec::is_empty",
        default,
        deserialize_with = "nullable_errors"
    )]
    pub errors: Vec<Error>,
}

fn nullable_errors<'de, D>(deserializer: D) -> Result<Vec<Error>, D::Error>
where
    D: Deserializer<'de>,
{
    let errors = Option::<Vec<Error>>::deserialize(deserializer)?;
    Ok(errors.unwrap_or_default())
}

impl Response {
    pub fn from_data(data: Value) -> Self {
        Response {
            data: Some(data),
            errors: Vec::new(),
        }
    }

    pub fn from_errors(errors: Vec<Error>) -> Self {
        Response {
            data: None,
            errors,
        }
    }

    /// Parse the body returned by an upstream service.
    pub(crate) fn from_bytes(service: &str, body: Bytes) -> Result<Response, FetchError> {
        serde_json::from_slice(&body).map_err(|error| FetchError::SubrequestMalformedResponse {
            service: service.to_string(),
            reason: error.to_string(),
        })
    }

    /// Parse the body returned for a batched request: one response per
    /// request, in request order.
    pub(crate) fn batch_from_bytes(service: &str, body: Bytes) -> Result<Vec<Response>, FetchError> {
        serde_json::from_slice(&body).map_err(|error| FetchError::SubrequestMalformedResponse {
            service: service.to_string(),
            reason: error.to_string(),
        })
    }
}
