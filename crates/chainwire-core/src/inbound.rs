//! Demultiplexing of frames arriving on a streaming connection.
//!
//! A frame is either a subscription notification (has `method` and a
//! `params.subscription` id) or a response envelope routed by its `id`.
//! Framing is never used for correlation: responses may arrive in any order.

use serde::Deserialize;
use serde_json::Value;

use crate::correlation::PendingRegistry;
use crate::request::RpcId;
use crate::subscriptions::{SubscriptionId, SubscriptionManager};

/// Where an inbound frame ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// Delivered to the request waiting on this id.
    Response(u64),
    /// Forwarded to a subscription stream.
    Notification(SubscriptionId),
    /// Unknown id, unknown subscription, or unparseable frame.
    Dropped,
}

#[derive(Deserialize)]
struct InboundFrame {
    #[serde(default)]
    id: Option<RpcId>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<NotificationParams>,
}

#[derive(Deserialize)]
struct NotificationParams {
    subscription: Value,
    #[serde(default)]
    result: Value,
}

/// Route one inbound text frame.
pub fn route_frame(
    text: &str,
    pending: &PendingRegistry,
    subscriptions: &SubscriptionManager,
) -> Routed {
    let frame: InboundFrame = match serde_json::from_str(text) {
        Ok(p) => p,
        Err(e) => {
            tracing::debug!(error = %e, "failed to parse inbound frame");
            return Routed::Dropped;
        }
    };

    if let (Some(method), Some(params)) = (&frame.method, frame.params) {
        let sub_id = SubscriptionId::from_value(params.subscription);
        if subscriptions.dispatch(&sub_id, params.result) {
            return Routed::Notification(sub_id);
        }
        tracing::debug!(%method, subscription = %sub_id, "notification for unknown subscription");
        return Routed::Dropped;
    }

    match frame.id.as_ref().and_then(RpcId::as_u64) {
        Some(id) if pending.complete(id, text.to_string()) => Routed::Response(id),
        Some(_) => Routed::Dropped,
        None => {
            tracing::warn!("inbound frame without a numeric id");
            Routed::Dropped
        }
    }
}
