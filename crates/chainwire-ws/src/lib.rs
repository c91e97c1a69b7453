//! chainwire-ws: WebSocket JSON-RPC transport.
//!
//! # Features
//! - Request multiplexing over a single connection, correlated by envelope id
//! - Serialized writes through one connection task
//! - Auto-reconnect on disconnect (exponential backoff); pending requests fail fast
//! - Subscription notifications routed to per-subscription channels

pub mod client;

pub use client::{WsConfig, WsTransport};
