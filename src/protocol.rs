use serde::Deserialize;
use serde_json::{json, Value};

/* ---------------- server -> client ---------------- */
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    CodeUpdate { code: String },
    UserCount { count: usize },
}

impl ServerMessage {
    pub fn encode(&self) -> String {
        match self {
            ServerMessage::CodeUpdate { code } => json!({ "type": "code_update", "code": code }),
            ServerMessage::UserCount { count } => json!({ "type": "user_count", "count": count }),
        }
        .to_string()
    }
}

/* ---------------- client -> server ---------------- */
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientMessage {
    CodeUpdate { code: String },
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("frame has no string `type`")]
    MissingType,

    #[error("unknown message type {0:?}")]
    UnknownType(String),

    #[error("{0:?} is server-only")]
    ServerOnly(String),

    #[error("code_update without a string `code`")]
    MissingCode,
}

/// Decodes one inbound text frame. Unknown fields are ignored.
pub fn decode_client(raw: &str) -> Result<ClientMessage, ProtocolError> {
    let v: Value = serde_json::from_str(raw).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    let Some(obj) = v.as_object() else {
        return Err(ProtocolError::Malformed("not a JSON object".into()));
    };
    let kind = obj.get("type").and_then(Value::as_str).ok_or(ProtocolError::MissingType)?;

    match kind {
        "code_update" => match obj.get("code").and_then(Value::as_str) {
            Some(code) => Ok(ClientMessage::CodeUpdate { code: code.to_string() }),
            None => Err(ProtocolError::MissingCode),
        },
        "user_count" => Err(ProtocolError::ServerOnly(kind.to_string())),
        other => Err(ProtocolError::UnknownType(other.to_string())),
    }
}
