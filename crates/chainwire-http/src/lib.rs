//! chainwire-http: HTTP JSON-RPC transport.
//!
//! One envelope per POST body, `Content-Type: application/json`, configurable
//! user agent and extra headers, per-request header and timeout overrides.

pub mod client;
pub mod headers;

pub use client::{HttpConfig, HttpTransport};
pub use headers::{construct_user_agent, merge_headers};
