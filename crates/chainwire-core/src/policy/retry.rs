//! Backoff schedule for retried requests, and the list of methods that
//! are safe to send more than once.

use std::collections::BTreeSet;
use std::time::Duration;

/// Backoff parameters. A call is attempted at most `1 + max_retries` times.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Fraction of the delay added as jitter (half of it, deterministically).
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_fraction: 0.1,
        }
    }
}

/// Computes retry delays from a [`RetryConfig`]. Holds no per-call state.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay before retry number `attempt` (1-based). `None` once the
    /// per-call budget `max_retries` is spent.
    pub fn next_delay(&self, attempt: u32, max_retries: u32) -> Option<Duration> {
        if !(1..=max_retries).contains(&attempt) {
            return None;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let grown = self.config.initial_backoff.as_millis() as f64 * self.config.multiplier.powi(exponent);
        let delay_ms = grown.min(self.config.max_backoff.as_millis() as f64);
        let jitter_ms = delay_ms * self.config.jitter_fraction / 2.0;
        Some(Duration::from_millis((delay_ms + jitter_ms) as u64))
    }
}

/// Methods eligible for automatic retry and failover.
///
/// Entries are exact method names or prefixes ending in `*`
/// (`"eth_get*"` matches `eth_getBalance`). State-changing methods must
/// never appear here: replaying them risks double submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryAllowList {
    exact: BTreeSet<String>,
    prefixes: BTreeSet<String>,
}

const READ_ONLY_METHODS: &[&str] = &[
    "web3_clientVersion",
    "web3_sha3",
    "net_version",
    "net_listening",
    "net_peerCount",
    "eth_chainId",
    "eth_blockNumber",
    "eth_call",
    "eth_estimateGas",
    "eth_gasPrice",
    "eth_feeHistory",
    "eth_maxPriorityFeePerGas",
    "eth_syncing",
    "eth_get*",
    "platon_chainId",
    "platon_blockNumber",
    "platon_call",
    "platon_estimateGas",
    "platon_gasPrice",
    "platon_syncing",
    "platon_get*",
];

impl Default for RetryAllowList {
    fn default() -> Self {
        Self::new(READ_ONLY_METHODS.iter().copied())
    }
}

impl RetryAllowList {
    pub fn new<I, S>(methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::none();
        for m in methods {
            list.insert(m.as_ref());
        }
        list
    }

    /// An empty list: nothing is retried.
    pub fn none() -> Self {
        Self {
            exact: BTreeSet::new(),
            prefixes: BTreeSet::new(),
        }
    }

    pub fn insert(&mut self, pattern: &str) {
        match pattern.strip_suffix('*') {
            Some(prefix) => self.prefixes.insert(prefix.to_string()),
            None => self.exact.insert(pattern.to_string()),
        };
    }

    pub fn with(mut self, pattern: &str) -> Self {
        self.insert(pattern);
        self
    }

    pub fn allows(&self, method: &str) -> bool {
        self.exact.contains(method) || self.prefixes.iter().any(|p| method.starts_with(p.as_str()))
    }
}
