//! Envelope types for JSON-RPC 2.0.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Envelope id as it appears on the wire. Requests built here always carry
/// `Number`; peers may echo any of the three forms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(u64),
    Text(String),
    Null,
}

impl RpcId {
    pub fn as_u64(&self) -> Option<u64> {
        if let Self::Number(n) = self {
            Some(*n)
        } else {
            None
        }
    }
}

impl From<u64> for RpcId {
    fn from(n: u64) -> Self {
        Self::Number(n)
    }
}

impl std::fmt::Display for RpcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => n.fmt(f),
            Self::Text(s) => write!(f, "{s:?}"),
            Self::Null => f.write_str("null"),
        }
    }
}

pub type RpcParam = Value;

/// Outbound envelope. Borrows method and params so encoding never copies them.
#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: &'a [RpcParam],
}

impl<'a> JsonRpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: &'a [RpcParam]) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        }
    }
}

/// Application-level failure reported by the node (`{code, message, data?}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(data) = &self.data {
            write!(f, " ({data})")?;
        }
        Ok(())
    }
}

/// Inbound envelope.
///
/// `result` distinguishes an absent field (`None`) from an explicit `null`
/// (`Some(Value::Null)`); the codec relies on this to reject envelopes that
/// carry neither member.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    pub id: RpcId,
    #[serde(default, deserialize_with = "present")]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl JsonRpcResponse {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// The node's error if one was sent, else the result (`null` if absent).
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or_default()),
        }
    }
}
