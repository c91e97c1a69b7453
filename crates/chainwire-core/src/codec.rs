//! Request encoding and response decoding.
//!
//! The codec owns the per-provider id counter: every call to
//! [`JsonRpcCodec::encode`] allocates a fresh, monotonically increasing id.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde_json::Value;

use crate::error::RpcError;
use crate::request::{JsonRpcRequest, JsonRpcResponse, RpcParam};

/// A request envelope together with its serialized body.
#[derive(Debug, Clone)]
pub struct EncodedRequest {
    pub id: u64,
    pub method: String,
    pub body: String,
}

/// JSON-RPC 2.0 codec with a process-local id counter.
#[derive(Debug)]
pub struct JsonRpcCodec {
    next_id: AtomicU64,
}

impl Default for JsonRpcCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonRpcCodec {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate the next request id.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Build a request envelope with a fresh id and serialize it.
    pub fn encode(&self, method: &str, params: &[RpcParam]) -> Result<EncodedRequest, RpcError> {
        let id = self.next_id();
        let body = serde_json::to_string(&JsonRpcRequest::new(id, method, params))
            .map_err(|e| RpcError::Encoding(e.to_string()))?;
        Ok(EncodedRequest {
            id,
            method: method.to_string(),
            body,
        })
    }

    /// Decode a raw response envelope, enforcing that exactly one of
    /// `result` / `error` is present. An error envelope is still `Ok` here;
    /// see [`JsonRpcCodec::decode_result`].
    pub fn decode(raw: &[u8]) -> Result<JsonRpcResponse, RpcError> {
        let value: Value =
            serde_json::from_slice(raw).map_err(|e| RpcError::Decoding(e.to_string()))?;
        if !value.is_object() {
            return Err(RpcError::Decoding(format!(
                "expected a response object, got {}",
                kind_of(&value)
            )));
        }
        let resp: JsonRpcResponse =
            serde_json::from_value(value).map_err(|e| RpcError::Decoding(e.to_string()))?;
        match (&resp.result, &resp.error) {
            (Some(_), Some(_)) => Err(RpcError::Decoding(
                "response carries both result and error".into(),
            )),
            (None, None) => Err(RpcError::Decoding(
                "response carries neither result nor error".into(),
            )),
            _ => Ok(resp),
        }
    }

    /// Decode a raw response and unwrap its result. A node error envelope
    /// surfaces as [`RpcError::Rpc`].
    pub fn decode_result(raw: &[u8]) -> Result<Value, RpcError> {
        Self::decode(raw)?.into_result().map_err(RpcError::Rpc)
    }
}

/// Convert arbitrary serializable params into a positional params list.
///
/// Arrays become the params list, `()`/`null` becomes an empty list, and any
/// other value is wrapped as a single positional param.
pub fn to_params<P: Serialize>(params: P) -> Result<Vec<RpcParam>, RpcError> {
    match serde_json::to_value(params).map_err(|e| RpcError::Encoding(e.to_string()))? {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        other => Ok(vec![other]),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
