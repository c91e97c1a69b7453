//! Provider configuration.

use std::time::Duration;

use chainwire_core::policy::CircuitBreakerConfig;
use chainwire_core::DispatcherConfig;
use chainwire_http::HttpConfig;
use chainwire_ws::WsConfig;

/// Overrides the default request timeout, in milliseconds.
pub const TIMEOUT_ENV: &str = "CHAINWIRE_TIMEOUT_MS";
/// Overrides the default retry budget for allow-listed methods.
pub const MAX_RETRIES_ENV: &str = "CHAINWIRE_MAX_RETRIES";

/// Everything a [`crate::Provider`] needs besides its endpoint.
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    pub dispatcher: DispatcherConfig,
    pub http: HttpConfig,
    pub ws: WsConfig,
    /// Per-endpoint breaker, used when fallbacks are configured.
    pub circuit_breaker: CircuitBreakerConfig,
}

impl ProviderConfig {
    /// Defaults, with `CHAINWIRE_TIMEOUT_MS` / `CHAINWIRE_MAX_RETRIES` applied
    /// when set. Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::default().with_env(|key| std::env::var(key).ok())
    }

    fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(raw) = lookup(TIMEOUT_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(ms) => self.dispatcher.request_timeout = Duration::from_millis(ms),
                Err(e) => tracing::warn!(var = TIMEOUT_ENV, value = %raw, error = %e, "ignoring invalid value"),
            }
        }
        if let Some(raw) = lookup(MAX_RETRIES_ENV) {
            match raw.trim().parse::<u32>() {
                Ok(n) => self.dispatcher.retry.max_retries = n,
                Err(e) => tracing::warn!(var = MAX_RETRIES_ENV, value = %raw, error = %e, "ignoring invalid value"),
            }
        }
        self
    }
}
