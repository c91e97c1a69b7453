//! Correlation layer: matches asynchronously-arriving responses to the
//! requests waiting on them.
//!
//! Every registered id leaves the registry exactly once, by one of:
//! - [`PendingRegistry::complete`] with the matching response,
//! - [`PendingRegistry::cancel`] or dropping the [`PendingHandle`] (timeouts),
//! - [`PendingRegistry::fail_all`] / [`PendingRegistry::close`] (disconnect, shutdown).
//!
//! Responses for ids that are not registered are logged and discarded.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::error::RpcError;

type Slot = oneshot::Sender<Result<String, RpcError>>;

struct PendingEntry {
    method: String,
    submitted_at: Instant,
    slot: Slot,
}

#[derive(Default)]
struct RegistryInner {
    entries: HashMap<u64, PendingEntry>,
    closed: bool,
}

/// Thread-safe map of in-flight request ids to their completion slots.
#[derive(Clone, Default)]
pub struct PendingRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert a new pending request and return its wait handle.
    pub fn register(&self, id: u64, method: &str) -> Result<PendingHandle, RpcError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(RpcError::Closed);
        }
        if inner.entries.contains_key(&id) {
            return Err(RpcError::DuplicateRequestId(id));
        }
        let (tx, rx) = oneshot::channel();
        inner.entries.insert(
            id,
            PendingEntry {
                method: method.to_string(),
                submitted_at: Instant::now(),
                slot: tx,
            },
        );
        Ok(PendingHandle {
            id,
            rx,
            registry: self.clone(),
        })
    }

    /// Fulfil the pending request `id` with a raw response.
    ///
    /// Returns `false` (and drops the response) if `id` is unknown, already
    /// completed, or was evicted by a timeout.
    pub fn complete(&self, id: u64, response: String) -> bool {
        let entry = self.lock().entries.remove(&id);
        match entry {
            Some(entry) => {
                tracing::debug!(
                    id,
                    method = %entry.method,
                    elapsed_ms = entry.submitted_at.elapsed().as_millis() as u64,
                    "response correlated"
                );
                // Receiver may already be gone; the entry is removed either way.
                let _ = entry.slot.send(Ok(response));
                true
            }
            None => {
                tracing::warn!(id, "discarding orphan response");
                false
            }
        }
    }

    /// Remove `id` and wake its waiter with [`RpcError::Cancelled`].
    pub fn cancel(&self, id: u64) -> bool {
        let entry = self.lock().entries.remove(&id);
        match entry {
            Some(entry) => {
                let _ = entry.slot.send(Err(RpcError::Cancelled));
                true
            }
            None => false,
        }
    }

    /// Fail every pending request with a copy of `err`. The registry stays
    /// open for new requests (used on disconnect before reconnecting).
    pub fn fail_all(&self, err: &RpcError) -> usize {
        let drained: Vec<PendingEntry> = {
            let mut inner = self.lock();
            inner.entries.drain().map(|(_, e)| e).collect()
        };
        let n = drained.len();
        for entry in drained {
            let _ = entry.slot.send(Err(err.duplicate()));
        }
        if n > 0 {
            tracing::warn!(failed = n, error = %err, "failed all pending requests");
        }
        n
    }

    /// Fail everything pending with [`RpcError::Closed`] and reject future
    /// registrations. Idempotent.
    pub fn close(&self) -> usize {
        self.lock().closed = true;
        self.fail_all(&RpcError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn contains(&self, id: u64) -> bool {
        self.lock().entries.contains_key(&id)
    }

    /// Number of in-flight requests.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Age of the longest-waiting request.
    pub fn oldest(&self) -> Option<Duration> {
        self.lock()
            .entries
            .values()
            .map(|e| e.submitted_at.elapsed())
            .max()
    }

    fn evict(&self, id: u64) {
        if self.lock().entries.remove(&id).is_some() {
            tracing::debug!(id, "evicted pending request");
        }
    }
}

impl std::fmt::Debug for PendingRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("PendingRegistry")
            .field("pending", &inner.entries.len())
            .field("closed", &inner.closed)
            .finish()
    }
}

/// Wait handle for one pending request.
///
/// Dropping the handle before the response arrives evicts the id from the
/// registry synchronously, so a later `complete` for it is a no-op.
pub struct PendingHandle {
    id: u64,
    rx: oneshot::Receiver<Result<String, RpcError>>,
    registry: PendingRegistry,
}

impl PendingHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Suspend until the request is completed, cancelled, or failed.
    pub async fn wait(mut self) -> Result<String, RpcError> {
        match (&mut self.rx).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::Closed),
        }
    }
}

impl Drop for PendingHandle {
    fn drop(&mut self) {
        self.registry.evict(self.id);
    }
}
