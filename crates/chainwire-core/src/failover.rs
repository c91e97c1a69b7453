//! Multi-endpoint failover transport with round-robin selection and
//! per-endpoint circuit breakers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{RpcError, TransportKind};
use crate::policy::{CircuitBreaker, CircuitBreakerConfig};
use crate::subscriptions::SubscriptionManager;
use crate::transport::{HealthStatus, OutgoingRequest, RpcTransport};

struct EndpointSlot {
    transport: Arc<dyn RpcTransport>,
    circuit: CircuitBreaker,
}

/// Round-robin transport over several endpoints.
///
/// Skips endpoints whose circuit is open. On a transient failure an
/// idempotent request falls through to the next available endpoint; a
/// non-idempotent request fails immediately so it is never submitted twice.
pub struct FailoverTransport {
    slots: Vec<EndpointSlot>,
    cursor: AtomicUsize,
    label: String,
}

impl FailoverTransport {
    /// Build a failover transport. The first transport is the primary.
    pub fn new(transports: Vec<Arc<dyn RpcTransport>>, config: CircuitBreakerConfig) -> Self {
        let label = transports
            .iter()
            .map(|t| t.url())
            .collect::<Vec<_>>()
            .join(",");
        let slots = transports
            .into_iter()
            .map(|t| EndpointSlot {
                circuit: CircuitBreaker::new(t.url(), config.clone()),
                transport: t,
            })
            .collect();
        Self {
            slots,
            cursor: AtomicUsize::new(0),
            label,
        }
    }

    /// Number of endpoints.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The first endpoint. Subscriptions are pinned to it, since
    /// notifications only arrive on the connection that created them.
    pub fn primary(&self) -> Option<&Arc<dyn RpcTransport>> {
        self.slots.first().map(|s| &s.transport)
    }

    /// Slot indices to try, starting at the round-robin cursor, skipping open circuits.
    fn candidates(&self) -> Vec<usize> {
        if self.slots.is_empty() {
            return Vec::new();
        }
        let n = self.slots.len();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % n;
        (0..n)
            .map(|i| (start + i) % n)
            .filter(|&idx| self.slots[idx].circuit.is_allowed())
            .collect()
    }
}

#[async_trait]
impl RpcTransport for FailoverTransport {
    async fn send(&self, req: OutgoingRequest) -> Result<String, RpcError> {
        let candidates = self.candidates();
        if candidates.is_empty() {
            return Err(match self.slots.as_slice() {
                [only] => RpcError::CircuitOpen {
                    endpoint: only.transport.url().to_string(),
                },
                _ => RpcError::AllEndpointsDown,
            });
        }

        let mut last_err = RpcError::AllEndpointsDown;
        for idx in candidates {
            let slot = &self.slots[idx];
            match slot.transport.send(req.clone()).await {
                Ok(resp) => {
                    slot.circuit.record_success();
                    return Ok(resp);
                }
                Err(e) if e.is_retryable() => {
                    slot.circuit.record_failure();
                    if !req.idempotent {
                        return Err(e);
                    }
                    tracing::warn!(
                        endpoint = %slot.transport.url(),
                        id = req.id,
                        method = %req.method,
                        error = %e,
                        "endpoint failed, failing over"
                    );
                    last_err = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }

    async fn close(&self) {
        for slot in &self.slots {
            slot.transport.close().await;
        }
    }

    fn kind(&self) -> TransportKind {
        self.slots
            .first()
            .map_or(TransportKind::Http, |s| s.transport.kind())
    }

    fn health(&self) -> HealthStatus {
        let available = self.slots.iter().filter(|s| s.circuit.is_allowed()).count();
        match available {
            0 => HealthStatus::Unhealthy,
            n if n == self.slots.len() => HealthStatus::Healthy,
            _ => HealthStatus::Degraded,
        }
    }

    fn url(&self) -> &str {
        &self.label
    }

    fn pending_requests(&self) -> usize {
        self.slots.iter().map(|s| s.transport.pending_requests()).sum()
    }

    fn subscriptions(&self) -> Option<&SubscriptionManager> {
        self.primary().and_then(|t| t.subscriptions())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    struct MockTransport {
        url: String,
        should_fail: bool,
        calls: AtomicU32,
    }

    #[async_trait]
    impl RpcTransport for MockTransport {
        async fn send(&self, req: OutgoingRequest) -> Result<String, RpcError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.should_fail {
                Err(RpcError::http("mock error"))
            } else {
                Ok(format!(r#"{{"jsonrpc":"2.0","id":{},"result":"{}"}}"#, req.id, self.url))
            }
        }
        fn kind(&self) -> TransportKind {
            TransportKind::Http
        }
        fn url(&self) -> &str {
            &self.url
        }
    }

    fn mock(url: &str, fail: bool) -> Arc<MockTransport> {
        Arc::new(MockTransport {
            url: url.to_string(),
            should_fail: fail,
            calls: AtomicU32::new(0),
        })
    }

    fn pool(transports: Vec<Arc<MockTransport>>) -> FailoverTransport {
        FailoverTransport::new(
            transports.into_iter().map(|t| t as Arc<dyn RpcTransport>).collect(),
            CircuitBreakerConfig {
                failure_threshold: 1,
                open_duration: Duration::from_secs(60),
                success_threshold: 1,
            },
        )
    }

    fn read_request() -> OutgoingRequest {
        let mut req = OutgoingRequest::new(1, "eth_blockNumber", "{}");
        req.idempotent = true;
        req
    }

    #[tokio::test]
    async fn idempotent_request_fails_over() {
        let a = mock("https://a.com", true);
        let b = mock("https://b.com", false);
        let pool = pool(vec![a.clone(), b.clone()]);

        let resp = pool.send(read_request()).await.unwrap();
        assert!(resp.contains("https://b.com"));
        assert_eq!(pool.health(), HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn write_request_does_not_fail_over() {
        let a = mock("https://a.com", true);
        let b = mock("https://b.com", false);
        let pool = pool(vec![a.clone(), b.clone()]);

        let req = OutgoingRequest::new(1, "eth_sendRawTransaction", "{}");
        assert!(pool.send(req).await.unwrap_err().is_transport());
        assert_eq!(b.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn all_open_circuits_report_down() {
        let pool = pool(vec![mock("https://a.com", true), mock("https://b.com", true)]);
        let _ = pool.send(read_request()).await;
        assert_eq!(pool.health(), HealthStatus::Unhealthy);
        assert!(matches!(
            pool.send(read_request()).await,
            Err(RpcError::AllEndpointsDown)
        ));
    }

    #[tokio::test]
    async fn single_tripped_endpoint_reports_its_circuit() {
        let pool = pool(vec![mock("https://a.com", true)]);
        let _ = pool.send(read_request()).await;
        match pool.send(read_request()).await {
            Err(RpcError::CircuitOpen { endpoint }) => assert_eq!(endpoint, "https://a.com"),
            other => panic!("expected open circuit, got {other:?}"),
        }
    }

    struct StreamingMock {
        subscriptions: SubscriptionManager,
    }

    #[async_trait]
    impl RpcTransport for StreamingMock {
        async fn send(&self, _req: OutgoingRequest) -> Result<String, RpcError> {
            Err(RpcError::ws("unused"))
        }
        fn kind(&self) -> TransportKind {
            TransportKind::WebSocket
        }
        fn url(&self) -> &str {
            "ws://primary"
        }
        fn subscriptions(&self) -> Option<&SubscriptionManager> {
            Some(&self.subscriptions)
        }
    }

    #[test]
    fn subscriptions_come_from_the_primary() {
        let primary = StreamingMock {
            subscriptions: SubscriptionManager::new(),
        };
        let registry = primary.subscriptions.clone();
        let pool = FailoverTransport::new(
            vec![
                Arc::new(primary) as Arc<dyn RpcTransport>,
                mock("https://b.com", false) as Arc<dyn RpcTransport>,
            ],
            CircuitBreakerConfig::default(),
        );

        let manager = pool.subscriptions().expect("primary streams");
        let _rx = manager.register("0xabc".into(), "eth_subscribe");
        assert_eq!(registry.len(), 1);
        assert_eq!(pool.primary().map(|t| t.url()), Some("ws://primary"));

        let http_first = self::pool(vec![mock("https://a.com", false)]);
        assert!(http_first.subscriptions().is_none());
    }

    #[test]
    fn empty_pool_has_no_candidates() {
        let pool = FailoverTransport::new(vec![], CircuitBreakerConfig::default());
        assert!(pool.is_empty());
        assert!(pool.candidates().is_empty());
    }
}
