//! chainwire-ipc: JSON-RPC over a local Unix domain socket.
//!
//! Each envelope is one JSON value on the stream; replies are split at JSON
//! parse boundaries and correlated by id, so nodes may answer out of order.

#[cfg(unix)]
pub mod client;
pub mod framing;

#[cfg(unix)]
pub use client::IpcTransport;
pub use framing::FrameBuffer;
