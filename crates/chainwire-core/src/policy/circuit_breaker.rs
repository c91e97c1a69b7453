//! Per-endpoint circuit breaker used by the failover transport.
//!
//! A run of `failure_threshold` transient failures trips the breaker. While
//! tripped the endpoint is skipped; after `open_duration` it admits probe
//! traffic, and `success_threshold` good probes restore it. A failed probe
//! trips it again immediately.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        })
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive transient failures that trip the breaker.
    pub failure_threshold: u32,
    /// Time an endpoint is skipped before probing resumes.
    pub open_duration: Duration,
    /// Successful probes needed to restore the endpoint.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
            success_threshold: 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed { failures: u32 },
    Open { since: Instant },
    HalfOpen { successes: u32 },
}

impl Phase {
    fn state(self) -> CircuitState {
        match self {
            Self::Closed { .. } => CircuitState::Closed,
            Self::Open { .. } => CircuitState::Open,
            Self::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }
}

#[derive(Clone)]
pub struct CircuitBreaker {
    endpoint: Arc<str>,
    config: CircuitBreakerConfig,
    phase: Arc<Mutex<Phase>>,
}

impl CircuitBreaker {
    pub fn new(endpoint: impl Into<Arc<str>>, config: CircuitBreakerConfig) -> Self {
        Self {
            endpoint: endpoint.into(),
            config,
            phase: Arc::new(Mutex::new(Phase::Closed { failures: 0 })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current state. An expired open window is observed as half-open.
    pub fn state(&self) -> CircuitState {
        let mut phase = self.lock();
        if let Phase::Open { since } = *phase {
            if since.elapsed() >= self.config.open_duration {
                *phase = Phase::HalfOpen { successes: 0 };
                tracing::info!(endpoint = %self.endpoint, "circuit half-open, probing");
            }
        }
        phase.state()
    }

    pub fn is_allowed(&self) -> bool {
        self.state() != CircuitState::Open
    }

    pub fn record_success(&self) {
        let mut phase = self.lock();
        *phase = match *phase {
            Phase::HalfOpen { successes } if successes + 1 >= self.config.success_threshold => {
                tracing::info!(endpoint = %self.endpoint, "circuit closed");
                Phase::Closed { failures: 0 }
            }
            Phase::HalfOpen { successes } => Phase::HalfOpen {
                successes: successes + 1,
            },
            Phase::Closed { .. } => Phase::Closed { failures: 0 },
            open @ Phase::Open { .. } => open,
        };
    }

    pub fn record_failure(&self) {
        let mut phase = self.lock();
        *phase = match *phase {
            Phase::Closed { failures } if failures + 1 >= self.config.failure_threshold => {
                tracing::warn!(endpoint = %self.endpoint, failures = failures + 1, "circuit open");
                Phase::Open {
                    since: Instant::now(),
                }
            }
            Phase::Closed { failures } => Phase::Closed {
                failures: failures + 1,
            },
            Phase::HalfOpen { .. } => {
                tracing::warn!(endpoint = %self.endpoint, "probe failed, circuit reopened");
                Phase::Open {
                    since: Instant::now(),
                }
            }
            open @ Phase::Open { .. } => open,
        };
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .finish()
    }
}
