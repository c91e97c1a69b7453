//! Error taxonomy shared by every layer of the pipeline.

use thiserror::Error;

use crate::request::JsonRpcError;

/// Which transport variant produced a connection-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Http,
    WebSocket,
    Ipc,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http => write!(f, "HTTP"),
            Self::WebSocket => write!(f, "WebSocket"),
            Self::Ipc => write!(f, "IPC"),
        }
    }
}

/// Errors that can occur while making an RPC request.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Params could not be serialized into a request envelope.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// The response bytes are not a well-formed response envelope.
    #[error("Decoding error: {0}")]
    Decoding(String),

    /// JSON-RPC error returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// Connection refused, reset, or dropped.
    #[error("{kind} transport error: {reason}")]
    Transport { kind: TransportKind, reason: String },

    /// No response arrived within the deadline.
    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The provider was closed before or while the request was pending.
    #[error("Provider closed")]
    Closed,

    /// The pending request was cancelled before a response arrived.
    #[error("Request cancelled")]
    Cancelled,

    /// Endpoint failed validation at construction time.
    #[error("Invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// A request with this id is already in flight.
    #[error("Request id {0} is already in flight")]
    DuplicateRequestId(u64),

    /// Circuit breaker is open for this endpoint.
    #[error("Circuit breaker open for endpoint: {endpoint}")]
    CircuitOpen { endpoint: String },

    /// Every endpoint behind a failover transport is unavailable.
    #[error("All endpoints unavailable")]
    AllEndpointsDown,
}

impl RpcError {
    pub fn http(reason: impl Into<String>) -> Self {
        Self::Transport {
            kind: TransportKind::Http,
            reason: reason.into(),
        }
    }

    pub fn ws(reason: impl Into<String>) -> Self {
        Self::Transport {
            kind: TransportKind::WebSocket,
            reason: reason.into(),
        }
    }

    pub fn ipc(reason: impl Into<String>) -> Self {
        Self::Transport {
            kind: TransportKind::Ipc,
            reason: reason.into(),
        }
    }

    pub fn invalid_endpoint(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error is transient and may be retried
    /// (subject to the method allow-list).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Timeout { .. })
    }

    /// Returns `true` if this is a node-side application error.
    pub fn is_rpc_error(&self) -> bool {
        matches!(self, Self::Rpc(_))
    }

    /// Returns `true` for connection-level failures.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Create an independent copy of this error for fan-out to several waiters.
    pub(crate) fn duplicate(&self) -> Self {
        match self {
            Self::Encoding(s) => Self::Encoding(s.clone()),
            Self::Decoding(s) => Self::Decoding(s.clone()),
            Self::Rpc(e) => Self::Rpc(e.clone()),
            Self::Transport { kind, reason } => Self::Transport {
                kind: *kind,
                reason: reason.clone(),
            },
            Self::Timeout { ms } => Self::Timeout { ms: *ms },
            Self::Closed => Self::Closed,
            Self::Cancelled => Self::Cancelled,
            Self::InvalidEndpoint { endpoint, reason } => Self::InvalidEndpoint {
                endpoint: endpoint.clone(),
                reason: reason.clone(),
            },
            Self::DuplicateRequestId(id) => Self::DuplicateRequestId(*id),
            Self::CircuitOpen { endpoint } => Self::CircuitOpen {
                endpoint: endpoint.clone(),
            },
            Self::AllEndpointsDown => Self::AllEndpointsDown,
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decoding(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_and_timeout_are_retryable() {
        assert!(RpcError::http("connection refused").is_retryable());
        assert!(RpcError::Timeout { ms: 10 }.is_retryable());
        assert!(!RpcError::Closed.is_retryable());
        assert!(!RpcError::Decoding("bad".into()).is_retryable());
        assert!(!RpcError::Rpc(JsonRpcError {
            code: -32000,
            message: "execution reverted".into(),
            data: None,
        })
        .is_retryable());
    }

    #[test]
    fn transport_error_display_names_variant() {
        let err = RpcError::ipc("broken pipe");
        assert_eq!(err.to_string(), "IPC transport error: broken pipe");
    }
}
