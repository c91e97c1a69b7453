//! Server-push subscriptions on a streaming connection.
//!
//! A `*_subscribe` call returns an id; every later notification whose
//! `params.subscription` matches it is forwarded to that subscriber's channel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::mpsc;

/// Node-assigned subscription handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub String);

impl SubscriptionId {
    /// Nodes usually send a hex string; anything else is keyed by its JSON text.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(s) => Self(s),
            other => Self(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SubscriptionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

struct SubscriptionEntry {
    method: String,
    sender: mpsc::UnboundedSender<Value>,
}

/// Live subscriptions of one connection, shared between the connection task
/// and the provider.
#[derive(Clone, Default)]
pub struct SubscriptionManager {
    entries: Arc<Mutex<HashMap<SubscriptionId, SubscriptionEntry>>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SubscriptionId, SubscriptionEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start forwarding notifications for `id`. Re-registering an id replaces
    /// the previous stream.
    pub fn register(
        &self,
        id: SubscriptionId,
        method: impl Into<String>,
    ) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().insert(
            id,
            SubscriptionEntry {
                method: method.into(),
                sender: tx,
            },
        );
        rx
    }

    /// Deliver one notification payload. `false` when nobody is listening;
    /// a closed receiver also unregisters the id.
    pub fn dispatch(&self, id: &SubscriptionId, message: Value) -> bool {
        let mut entries = self.lock();
        let Some(entry) = entries.get(id) else {
            return false;
        };
        if entry.sender.send(message).is_err() {
            tracing::debug!(subscription = %id, "subscriber dropped, removing");
            entries.remove(id);
            return false;
        }
        true
    }

    pub fn remove(&self, id: &SubscriptionId) -> bool {
        self.lock().remove(id).is_some()
    }

    pub fn method_of(&self, id: &SubscriptionId) -> Option<String> {
        self.lock().get(id).map(|e| e.method.clone())
    }

    /// Forget every subscription; receivers see end-of-stream.
    pub fn clear(&self) -> usize {
        let mut entries = self.lock();
        let n = entries.len();
        entries.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("active", &self.len())
            .finish()
    }
}
