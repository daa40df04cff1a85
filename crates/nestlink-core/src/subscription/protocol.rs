//! `graphql-transport-ws` frames and close codes

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::operation::{GraphQlError, GraphQlResponse, Operation};
use crate::Result;

/// WebSocket subprotocol negotiated on connect
pub const SUBPROTOCOL: &str = "graphql-transport-ws";

/// Normal closure
pub const CLOSE_NORMAL: u16 = 1000;
/// Connection dropped without a close frame
pub const CLOSE_ABNORMAL: u16 = 1006;
/// The server refused the connection params
pub const CLOSE_UNAUTHORIZED: u16 = 4401;
/// The server refused the authenticated user
pub const CLOSE_FORBIDDEN: u16 = 4403;
/// `connection_ack` never arrived
pub const CLOSE_INIT_TIMEOUT: u16 = 4408;

/// Close codes that mean the credentials were rejected.
///
/// Reconnecting with the same token would fail again, so these are terminal.
pub fn is_auth_rejection(code: u16) -> bool {
    matches!(code, CLOSE_UNAUTHORIZED | CLOSE_FORBIDDEN)
}

/// Frames sent by the client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    ConnectionInit {
        payload: Value,
    },
    Subscribe {
        id: String,
        payload: Value,
    },
    Complete {
        id: String,
    },
    Ping {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
}

impl ClientMessage {
    pub fn subscribe(id: &str, operation: &Operation) -> Result<Self> {
        Ok(Self::Subscribe {
            id: id.to_string(),
            payload: serde_json::to_value(operation.body())?,
        })
    }

    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Frames sent by the server
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ConnectionAck {
        #[serde(default)]
        payload: Option<Value>,
    },
    Next {
        id: String,
        payload: GraphQlResponse,
    },
    Error {
        id: String,
        payload: Vec<GraphQlError>,
    },
    Complete {
        id: String,
    },
    Ping {
        #[serde(default)]
        payload: Option<Value>,
    },
    Pong {
        #[serde(default)]
        payload: Option<Value>,
    },
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
