//! chainwire-core: foundation traits and types for ChainWire.
//!
//! # Overview
//!
//! ChainWire is a protocol-method-agnostic JSON-RPC pipeline for blockchain
//! clients. The core crate defines:
//!
//! - [`JsonRpcCodec`]: request encoding, response decoding, id allocation
//! - [`RpcTransport`]: the async trait every transport variant implements
//! - [`PendingRegistry`]: correlation of streamed responses to waiting requests
//! - [`Dispatcher`]: timeout, retry (read-only allow-list), and close handling
//! - [`RpcError`]: the structured error taxonomy
//! - [`FailoverTransport`]: multi-endpoint failover with circuit breakers
//! - [`Endpoint`]: validated connection targets

pub mod codec;
pub mod correlation;
pub mod dispatcher;
pub mod endpoint;
pub mod error;
pub mod failover;
pub mod inbound;
pub mod policy;
pub mod request;
pub mod subscriptions;
pub mod transport;

pub use codec::{to_params, EncodedRequest, JsonRpcCodec};
pub use correlation::{PendingHandle, PendingRegistry};
pub use dispatcher::{CallOptions, Dispatcher, DispatcherConfig};
pub use endpoint::Endpoint;
pub use error::{RpcError, TransportKind};
pub use failover::FailoverTransport;
pub use inbound::{route_frame, Routed};
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId, RpcParam};
pub use subscriptions::{SubscriptionId, SubscriptionManager};
pub use transport::{HealthStatus, OutgoingRequest, RpcTransport};
