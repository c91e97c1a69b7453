//! The `RpcTransport` trait: the seam every transport variant plugs into.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{RpcError, TransportKind};
use crate::subscriptions::SubscriptionManager;

/// Coarse liveness reported by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    /// Usable but impaired: reconnecting, or some failover endpoints tripped.
    Degraded,
    /// Closed, disconnected for good, or every endpoint tripped.
    Unhealthy,
    /// No traffic observed yet.
    Unknown,
}

impl HealthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One encoded request handed to a transport.
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    /// Envelope id; streaming transports correlate the reply by it.
    pub id: u64,
    pub method: String,
    /// Serialized request envelope.
    pub body: String,
    /// Per-call header overrides (HTTP only).
    pub headers: Vec<(String, String)>,
    /// Per-call deadline, if any.
    pub timeout: Option<Duration>,
    /// Whether the request may be replayed (retry or failover) on a transient failure.
    pub idempotent: bool,
}

impl OutgoingRequest {
    pub fn new(id: u64, method: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id,
            method: method.into(),
            body: body.into(),
            headers: Vec::new(),
            timeout: None,
            idempotent: false,
        }
    }
}

/// A way of getting one encoded request to a node and its reply back.
///
/// `send` exchanges raw envelope text: the dispatcher encodes before and
/// decodes after. Request/response transports (HTTP) return the body of the
/// reply; streaming transports (WebSocket, IPC) register `req.id` with their
/// pending registry and return the frame that carried the matching id.
///
/// Providers hold transports as `Arc<dyn RpcTransport>` and call them from
/// many tasks at once.
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    /// Send one encoded request and return the raw response envelope.
    async fn send(&self, req: OutgoingRequest) -> Result<String, RpcError>;

    /// Release connection resources and fail everything still pending.
    async fn close(&self) {}

    /// Which transport variant this is.
    fn kind(&self) -> TransportKind;

    fn health(&self) -> HealthStatus {
        HealthStatus::Unknown
    }

    /// URL or socket path, for logs.
    fn url(&self) -> &str;

    /// Number of requests awaiting a correlated response.
    fn pending_requests(&self) -> usize {
        0
    }

    /// Push-notification registry, present on streaming transports only.
    fn subscriptions(&self) -> Option<&SubscriptionManager> {
        None
    }
}
