//! The `graphql-ws` subscription subprotocol.
//!
//! The gateway speaks this protocol on both legs: as a server to its own
//! clients and as a client to the upstream service that owns the
//! subscription root field.

use serde::Deserialize;
use serde::Serialize;

use crate::graphql;
use crate::json_ext::Value;

pub(crate) const GRAPHQL_WS_PROTOCOL: &str = "graphql-ws";

/// Messages sent by the party that initiated the connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ClientMessage {
    ConnectionInit {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    Start {
        id: String,
        payload: graphql::Request,
    },
    Stop {
        id: String,
    },
    ConnectionTerminate,
}

/// Messages sent by the party that accepted the connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ServerMessage {
    ConnectionAck,
    #[serde(rename = "ka")]
    KeepAlive,
    ConnectionError {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    Data {
        id: String,
        payload: graphql::Response,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        payload: Value,
    },
    Complete {
        id: String,
    },
}

impl ServerMessage {
    pub(crate) fn error(id: Option<String>, errors: Vec<graphql::Error>) -> Self {
        let payload = serde_json_bytes::to_value(&errors).unwrap_or(Value::Null);
        ServerMessage::Error { id, payload }
    }
}
