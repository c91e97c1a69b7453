//! chainwire: JSON-RPC providers over HTTP, WebSocket, and IPC.
//!
//! The transport is picked once, from the endpoint's scheme, when the
//! provider is built; callers only ever see [`Provider::make_request`].
//!
//! # Quick start
//! ```rust,no_run
//! use chainwire::Provider;
//!
//! # async fn run() -> Result<(), chainwire::RpcError> {
//! let provider = Provider::connect("https://cloudflare-eth.com").await?;
//! let block = provider.make_request("eth_blockNumber", vec![]).await?;
//! println!("{provider}: {block}");
//! provider.close().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod provider;

pub use config::ProviderConfig;
pub use provider::{connect_transport, Provider, ProviderBuilder};

pub use chainwire_core::policy::{CircuitBreakerConfig, RetryAllowList, RetryConfig};
pub use chainwire_core::{
    CallOptions, DispatcherConfig, Endpoint, HealthStatus, JsonRpcError, RpcError, RpcTransport,
    SubscriptionId, TransportKind,
};
pub use chainwire_http::HttpConfig;
pub use chainwire_ws::WsConfig;
