//! Request dispatcher: one logical call = encode → send → await → decode,
//! wrapped in the timeout, retry, and close policies.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;

use crate::codec::JsonRpcCodec;
use crate::error::RpcError;
use crate::policy::{RetryAllowList, RetryConfig, RetryPolicy};
use crate::request::RpcParam;
use crate::transport::{OutgoingRequest, RpcTransport};

/// Per-call overrides.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Deadline for each attempt; defaults to the dispatcher's `request_timeout`.
    pub timeout: Option<Duration>,
    /// Extra headers, applied over the transport defaults (HTTP only).
    pub headers: Vec<(String, String)>,
    /// Retry budget; defaults to `RetryConfig::max_retries`. Ignored for
    /// methods outside the allow-list.
    pub retries: Option<u32>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }
}

/// Configuration for [`Dispatcher`].
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub request_timeout: Duration,
    pub retry: RetryConfig,
    pub retry_methods: RetryAllowList,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            retry_methods: RetryAllowList::default(),
        }
    }
}

/// Drives requests through one transport.
pub struct Dispatcher {
    transport: Arc<dyn RpcTransport>,
    codec: JsonRpcCodec,
    retry: RetryPolicy,
    config: DispatcherConfig,
    closed: watch::Sender<bool>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn RpcTransport>, config: DispatcherConfig) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            transport,
            codec: JsonRpcCodec::new(),
            retry: RetryPolicy::new(config.retry.clone()),
            config,
            closed,
        }
    }

    pub fn transport(&self) -> &Arc<dyn RpcTransport> {
        &self.transport
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Perform one request and return its result value.
    ///
    /// Suspends until a response, an error, the deadline, or [`Dispatcher::close`].
    /// Dropping the returned future cancels the request.
    pub async fn make_request(
        &self,
        method: &str,
        params: Vec<RpcParam>,
        options: &CallOptions,
    ) -> Result<Value, RpcError> {
        self.make_request_on(self.transport.as_ref(), method, params, options)
            .await
    }

    /// [`Dispatcher::make_request`] pinned to `transport`, which must be this
    /// dispatcher's transport or one it wraps (a failover slot). Ids still
    /// come from this dispatcher's codec, so they never collide.
    pub async fn make_request_on(
        &self,
        transport: &dyn RpcTransport,
        method: &str,
        params: Vec<RpcParam>,
        options: &CallOptions,
    ) -> Result<Value, RpcError> {
        if self.is_closed() {
            return Err(RpcError::Closed);
        }
        let closed = self.closed.subscribe();
        tokio::select! {
            biased;
            _ = closed_signal(closed) => Err(RpcError::Closed),
            res = self.run(transport, method, &params, options) => res,
        }
    }

    async fn run(
        &self,
        transport: &dyn RpcTransport,
        method: &str,
        params: &[RpcParam],
        options: &CallOptions,
    ) -> Result<Value, RpcError> {
        let idempotent = self.config.retry_methods.allows(method);
        let max_retries = if idempotent {
            options.retries.unwrap_or(self.config.retry.max_retries)
        } else {
            0
        };
        let timeout = options.timeout.unwrap_or(self.config.request_timeout);

        let mut attempt = 0u32;
        loop {
            match self
                .attempt(transport, method, params, options, timeout, idempotent)
                .await
            {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    attempt += 1;
                    match self.retry.next_delay(attempt, max_retries) {
                        Some(delay) => {
                            tracing::warn!(
                                method,
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                error = %e,
                                "retrying request"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            if max_retries > 0 {
                                tracing::error!(method, attempt, error = %e, "max retries exceeded");
                            }
                            return Err(e);
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt(
        &self,
        transport: &dyn RpcTransport,
        method: &str,
        params: &[RpcParam],
        options: &CallOptions,
        timeout: Duration,
        idempotent: bool,
    ) -> Result<Value, RpcError> {
        let encoded = self.codec.encode(method, params)?;
        let id = encoded.id;
        let req = OutgoingRequest {
            id,
            method: encoded.method,
            body: encoded.body,
            headers: options.headers.clone(),
            timeout: Some(timeout),
            idempotent,
        };

        tracing::debug!(id, method, "sending request");
        let raw = match tokio::time::timeout(timeout, transport.send(req)).await {
            Ok(res) => res?,
            Err(_) => {
                tracing::debug!(id, method, "request timed out");
                return Err(RpcError::Timeout {
                    ms: timeout.as_millis() as u64,
                });
            }
        };

        let resp = JsonRpcCodec::decode(raw.as_bytes())?;
        if let Some(resp_id) = resp.id.as_u64() {
            if resp_id != id {
                return Err(RpcError::Decoding(format!(
                    "response id {resp_id} does not match request id {id}"
                )));
            }
        }
        tracing::debug!(id, method, error = resp.is_error(), "response received");
        resp.into_result().map_err(RpcError::Rpc)
    }

    /// Fail in-flight and future calls with [`RpcError::Closed`] and release
    /// the transport. Idempotent.
    pub async fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        self.transport.close().await;
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

async fn closed_signal(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
