//! The provider facade: one `make_request` contract regardless of transport.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{Instrument, Span};

use chainwire_core::policy::RetryAllowList;
use chainwire_core::{
    to_params, CallOptions, Dispatcher, Endpoint, FailoverTransport, HealthStatus, RpcError,
    RpcParam, RpcTransport, SubscriptionId, TransportKind,
};
use chainwire_http::HttpTransport;
use chainwire_ws::WsTransport;

use crate::config::ProviderConfig;

/// Client-facing handle wrapping exactly one transport.
///
/// Safe to share across tasks (`Arc<Provider>`); concurrent calls on a
/// streaming transport proceed independently and are matched by id.
pub struct Provider {
    endpoint: Endpoint,
    dispatcher: Dispatcher,
    /// Transport that owns subscriptions: the primary endpoint.
    subscriber: Arc<dyn RpcTransport>,
    span: Span,
}

impl Provider {
    /// Connect to `uri` with default configuration.
    pub async fn connect(uri: &str) -> Result<Self, RpcError> {
        Self::builder(uri).build().await
    }

    /// Connect to `$CHAINWIRE_PROVIDER_URI` (or the local default node) with
    /// configuration taken from the environment.
    pub async fn from_env() -> Result<Self, RpcError> {
        ProviderBuilder::from_endpoint(Endpoint::from_env_or_default()?)
            .config(ProviderConfig::from_env())
            .build()
            .await
    }

    pub fn builder(uri: impl Into<String>) -> ProviderBuilder {
        ProviderBuilder::new(uri)
    }

    /// Call `method` with positional `params` and return the raw result.
    pub async fn make_request(&self, method: &str, params: Vec<RpcParam>) -> Result<Value, RpcError> {
        self.make_request_with(method, params, &CallOptions::default())
            .await
    }

    /// [`Provider::make_request`] with per-call timeout, headers, and retry budget.
    pub async fn make_request_with(
        &self,
        method: &str,
        params: Vec<RpcParam>,
        options: &CallOptions,
    ) -> Result<Value, RpcError> {
        self.dispatcher
            .make_request(method, params, options)
            .instrument(self.span.clone())
            .await
    }

    /// Typed convenience: serialize `params`, deserialize the result.
    pub async fn request<T, P>(&self, method: &str, params: P) -> Result<T, RpcError>
    where
        T: DeserializeOwned,
        P: Serialize,
    {
        let value = self.make_request(method, to_params(params)?).await?;
        serde_json::from_value(value).map_err(|e| RpcError::Decoding(e.to_string()))
    }

    /// Open a server-push subscription (e.g. `eth_subscribe` with `["newHeads"]`).
    ///
    /// Only streaming transports (WebSocket, IPC) support subscriptions. With
    /// fallbacks configured, subscriptions always go to the primary endpoint.
    pub async fn subscribe(
        &self,
        method: &str,
        params: Vec<RpcParam>,
    ) -> Result<(SubscriptionId, mpsc::UnboundedReceiver<Value>), RpcError> {
        let subscriptions = self.subscriber.subscriptions().ok_or_else(|| {
            RpcError::Transport {
                kind: self.subscriber.kind(),
                reason: "subscriptions require a streaming transport".into(),
            }
        })?;
        let result = self.call_subscriber(method, params).await?;
        let id = SubscriptionId::from_value(result);
        let rx = subscriptions.register(id.clone(), method);
        tracing::debug!(parent: &self.span, subscription = %id, method, "subscribed");
        Ok((id, rx))
    }

    /// Cancel a subscription with `method` (e.g. `eth_unsubscribe`).
    pub async fn unsubscribe(&self, method: &str, id: &SubscriptionId) -> Result<bool, RpcError> {
        if let Some(subscriptions) = self.subscriber.subscriptions() {
            subscriptions.remove(id);
        }
        let result = self
            .call_subscriber(method, vec![Value::from(id.as_str())])
            .await?;
        Ok(result.as_bool().unwrap_or(false))
    }

    async fn call_subscriber(&self, method: &str, params: Vec<RpcParam>) -> Result<Value, RpcError> {
        self.dispatcher
            .make_request_on(self.subscriber.as_ref(), method, params, &CallOptions::default())
            .instrument(self.span.clone())
            .await
    }

    /// Release transport resources; pending and later calls fail with
    /// [`RpcError::Closed`]. Idempotent.
    pub async fn close(&self) {
        tracing::info!(parent: &self.span, "closing provider");
        self.dispatcher.close().instrument(self.span.clone()).await;
    }

    pub fn is_closed(&self) -> bool {
        self.dispatcher.is_closed()
    }

    /// Requests awaiting a correlated response (always 0 over HTTP).
    pub fn pending_requests(&self) -> usize {
        self.dispatcher.transport().pending_requests()
    }

    pub fn health(&self) -> HealthStatus {
        self.dispatcher.transport().health()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn kind(&self) -> TransportKind {
        self.dispatcher.transport().kind()
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RPC connection {}", self.endpoint)
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("endpoint", &self.endpoint.to_string())
            .field("transport", &self.kind())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[derive(Debug)]
enum Target {
    Uri(String),
    Parsed(Endpoint),
}

/// Builder for [`Provider`].
#[derive(Debug)]
pub struct ProviderBuilder {
    target: Target,
    fallbacks: Vec<String>,
    config: ProviderConfig,
    span: Option<Span>,
}

impl ProviderBuilder {
    pub fn new(uri: impl Into<String>) -> Self {
        Self::with_target(Target::Uri(uri.into()))
    }

    /// Start from an endpoint that has already been validated.
    pub fn from_endpoint(endpoint: Endpoint) -> Self {
        Self::with_target(Target::Parsed(endpoint))
    }

    fn with_target(target: Target) -> Self {
        Self {
            target,
            fallbacks: Vec::new(),
            config: ProviderConfig::default(),
            span: None,
        }
    }

    pub fn config(mut self, config: ProviderConfig) -> Self {
        self.config = config;
        self
    }

    /// Header sent with every HTTP request; overrides the defaults.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.http.headers.push((name.into(), value.into()));
        self
    }

    /// Default per-request deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.dispatcher.request_timeout = timeout;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.dispatcher.retry.max_retries = retries;
        self
    }

    /// Methods eligible for automatic retry and failover.
    pub fn retry_methods(mut self, methods: RetryAllowList) -> Self {
        self.config.dispatcher.retry_methods = methods;
        self
    }

    /// Additional endpoint tried when earlier ones fail. Any fallback turns
    /// the transport into a [`FailoverTransport`]; subscriptions stay on the
    /// primary endpoint.
    pub fn fallback(mut self, uri: impl Into<String>) -> Self {
        self.fallbacks.push(uri.into());
        self
    }

    /// Span that scopes every log line this provider emits.
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Validate the endpoint(s) and connect the matching transport(s).
    pub async fn build(self) -> Result<Provider, RpcError> {
        let endpoint = match self.target {
            Target::Uri(uri) => Endpoint::parse(&uri)?,
            Target::Parsed(endpoint) => endpoint,
        };
        let primary = connect_transport(&endpoint, &self.config).await?;

        let subscriber = primary.clone();
        let transport: Arc<dyn RpcTransport> = if self.fallbacks.is_empty() {
            primary
        } else {
            let mut transports = vec![primary];
            for uri in &self.fallbacks {
                transports.push(connect_transport(&Endpoint::parse(uri)?, &self.config).await?);
            }
            Arc::new(FailoverTransport::new(
                transports,
                self.config.circuit_breaker.clone(),
            ))
        };

        let span = self.span.unwrap_or_else(|| {
            tracing::info_span!(
                "chainwire::provider",
                endpoint = %endpoint,
                transport = %endpoint.kind()
            )
        });
        tracing::info!(parent: &span, fallbacks = self.fallbacks.len(), "provider ready");

        Ok(Provider {
            endpoint,
            dispatcher: Dispatcher::new(transport, self.config.dispatcher),
            subscriber,
            span,
        })
    }
}

/// Instantiate the transport variant an endpoint calls for.
pub async fn connect_transport(
    endpoint: &Endpoint,
    config: &ProviderConfig,
) -> Result<Arc<dyn RpcTransport>, RpcError> {
    let uri = endpoint.to_string();
    match endpoint {
        Endpoint::Http(_) => Ok(Arc::new(HttpTransport::new(&uri, config.http.clone())?)),
        Endpoint::WebSocket(_) => Ok(Arc::new(WsTransport::connect(&uri, config.ws.clone()).await?)),
        Endpoint::Ipc(path) => connect_ipc(path).await,
    }
}

#[cfg(unix)]
async fn connect_ipc(path: &std::path::Path) -> Result<Arc<dyn RpcTransport>, RpcError> {
    Ok(Arc::new(chainwire_ipc::IpcTransport::connect_path(path).await?))
}

#[cfg(not(unix))]
async fn connect_ipc(path: &std::path::Path) -> Result<Arc<dyn RpcTransport>, RpcError> {
    Err(RpcError::invalid_endpoint(
        path.display().to_string(),
        "IPC transport requires Unix domain sockets",
    ))
}
