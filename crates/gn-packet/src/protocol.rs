//! JSON text envelopes exchanged over the session channel
//!
//! Inbound: `{"type":"schema"}` and `{"type":"set","values":{...}}`.
//! Outbound text: the schema document or `{"type":"error","message":...}`.
//! Meshes travel as binary frames and never pass through here.

use crate::params::ParameterMap;
use crate::schema::SchemaDescription;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Invalid JSON")]
    InvalidJson,
    #[error("Message has no type")]
    MissingType,
    #[error("Unknown message type: {0}")]
    UnknownType(String),
    #[error("Invalid {kind} message: {cause}")]
    InvalidBody { kind: String, cause: String },
    /// An `error` reply, seen from the client side.
    #[error("{0}")]
    Remote(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Schema,
    Set {
        #[serde(default)]
        values: ParameterMap,
    },
}

impl ClientMessage {
    const KINDS: [&'static str; 2] = ["schema", "set"];

    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|_| ProtocolError::InvalidJson)?;
        let kind = match value.get("type") {
            Some(serde_json::Value::String(kind)) => kind.clone(),
            Some(_) => return Err(ProtocolError::InvalidJson),
            None if value.is_object() => return Err(ProtocolError::MissingType),
            None => return Err(ProtocolError::InvalidJson),
        };
        if !Self::KINDS.contains(&kind.as_str()) {
            return Err(ProtocolError::UnknownType(kind));
        }
        serde_json::from_value(value).map_err(|e| ProtocolError::InvalidBody {
            kind,
            cause: e.to_string(),
        })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Schema(SchemaDescription),
    Error { message: String },
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidBody {
            kind: "server".to_string(),
            cause: e.to_string(),
        })
    }

    /// Text frame for an error reply.
    pub fn error_json(message: impl Into<String>) -> String {
        serde_json::json!({ "type": "error", "message": message.into() }).to_string()
    }
}
