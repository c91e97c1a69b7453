//! Reliability policies applied around a transport.
//!
//! ```text
//! Dispatcher → [RetryPolicy + RetryAllowList] → [FailoverTransport → CircuitBreaker] → Transport
//! ```

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use retry::{RetryAllowList, RetryConfig, RetryPolicy};
