//! HTTP JSON-RPC transport backed by `reqwest`.
//!
//! One request is one POST through the connection pool. The transport keeps
//! no per-request state and never retries: retry belongs to the dispatcher.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;

use chainwire_core::{Endpoint, HealthStatus, OutgoingRequest, RpcError, RpcTransport, TransportKind};

use crate::headers::{construct_user_agent, default_headers, merge_headers};

/// Configuration for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Headers sent with every request, applied over the defaults.
    pub headers: Vec<(String, String)>,
    pub user_agent: String,
    pub connect_timeout: Duration,
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            user_agent: construct_user_agent("HttpTransport"),
            connect_timeout: Duration::from_secs(10),
            pool_max_idle_per_host: 32,
        }
    }
}

const HEALTH_UNKNOWN: u8 = 0;
const HEALTH_OK: u8 = 1;
const HEALTH_FAILING: u8 = 2;

/// HTTP JSON-RPC transport.
pub struct HttpTransport {
    url: String,
    http: reqwest::Client,
    base_headers: HeaderMap,
    last_outcome: AtomicU8,
    closed: AtomicBool,
}

impl HttpTransport {
    /// Create a transport for an `http`/`https` endpoint.
    pub fn new(url: &str, config: HttpConfig) -> Result<Self, RpcError> {
        let endpoint = Endpoint::parse(url)?;
        endpoint.expect_kind(TransportKind::Http)?;

        let base_headers = merge_headers(&default_headers(&config.user_agent)?, &config.headers)?;
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build()
            .map_err(|e| RpcError::http(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            url: endpoint.to_string(),
            http,
            base_headers,
            last_outcome: AtomicU8::new(HEALTH_UNKNOWN),
            closed: AtomicBool::new(false),
        })
    }

    /// Create with default configuration.
    pub fn default_for(url: &str) -> Result<Self, RpcError> {
        Self::new(url, HttpConfig::default())
    }

    async fn post(&self, req: OutgoingRequest) -> Result<String, RpcError> {
        let headers = merge_headers(&self.base_headers, &req.headers)?;
        let mut builder = self.http.post(&self.url).headers(headers).body(req.body);
        if let Some(timeout) = req.timeout {
            builder = builder.timeout(timeout);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, req.timeout))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(RpcError::http(format!("HTTP {status}: {body}")));
        }

        resp.text()
            .await
            .map_err(|e| map_reqwest_error(e, req.timeout))
    }
}

fn map_reqwest_error(e: reqwest::Error, timeout: Option<Duration>) -> RpcError {
    match timeout {
        Some(t) if e.is_timeout() => RpcError::Timeout {
            ms: t.as_millis() as u64,
        },
        _ => RpcError::http(e.to_string()),
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn send(&self, req: OutgoingRequest) -> Result<String, RpcError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RpcError::Closed);
        }
        let id = req.id;
        tracing::debug!(url = %self.url, id, method = %req.method, "POST");

        let result = self.post(req).await;
        let outcome = match &result {
            Err(e) if e.is_retryable() => HEALTH_FAILING,
            _ => HEALTH_OK,
        };
        self.last_outcome.store(outcome, Ordering::Relaxed);
        result
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::info!(url = %self.url, "HTTP transport closed");
        }
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    fn health(&self) -> HealthStatus {
        if self.closed.load(Ordering::Acquire) {
            return HealthStatus::Unhealthy;
        }
        match self.last_outcome.load(Ordering::Relaxed) {
            HEALTH_OK => HealthStatus::Healthy,
            HEALTH_FAILING => HealthStatus::Degraded,
            _ => HealthStatus::Unknown,
        }
    }

    fn url(&self) -> &str {
        &self.url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_endpoint() {
        assert!(matches!(
            HttpTransport::default_for("ws://localhost:8546"),
            Err(RpcError::InvalidEndpoint { .. })
        ));
    }

    #[tokio::test]
    async fn posts_json_with_merged_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_header("content-type", "application/json")
            .match_header("x-api-key", "override")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"method":"eth_blockNumber","id":7}"#.into(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":7,"result":"0x10"}"#)
            .create_async()
            .await;

        let transport = HttpTransport::new(
            &server.url(),
            HttpConfig {
                headers: vec![("X-Api-Key".into(), "configured".into())],
                ..Default::default()
            },
        )
        .unwrap();

        let mut req = OutgoingRequest::new(
            7,
            "eth_blockNumber",
            r#"{"jsonrpc":"2.0","id":7,"method":"eth_blockNumber","params":[]}"#,
        );
        req.headers.push(("x-api-key".into(), "override".into()));

        let body = transport.send(req).await.unwrap();
        assert!(body.contains("0x10"));
        assert_eq!(transport.health(), HealthStatus::Healthy);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_status_is_transport_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(503)
            .with_body("upstream unavailable")
            .create_async()
            .await;

        let transport = HttpTransport::default_for(&server.url()).unwrap();
        let err = transport
            .send(OutgoingRequest::new(1, "eth_chainId", "{}"))
            .await
            .unwrap_err();
        assert!(err.is_transport());
        assert!(err.to_string().contains("503"));
        assert_eq!(transport.health(), HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn closed_transport_rejects_requests() {
        let transport = HttpTransport::default_for("http://127.0.0.1:9").unwrap();
        transport.close().await;
        assert!(matches!(
            transport.send(OutgoingRequest::new(1, "eth_chainId", "{}")).await,
            Err(RpcError::Closed)
        ));
    }
}
