//! Subscription types for live transaction updates.

use crate::types::NotificationEvent;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Why a subscription was dropped.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly unsubscribed.
    Unsubscribed,
    /// The hub is shutting down.
    Shutdown,
}

/// Events delivered to subscribers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransactionEvent {
    /// A persisted status transition, or the initial snapshot delivered
    /// synthetically on subscribe.
    Status(NotificationEvent),

    /// Subscription terminated by the hub. Always the last event.
    Dropped { reason: DropReason },
}

/// Synchronous observer invoked on every transition for one transaction.
pub type UpdateCallback = Box<dyn Fn(&NotificationEvent) + Send + Sync>;

/// Receiving half of a channel subscription.
pub struct EventStream {
    pub(crate) id: SubscriptionId,
    pub(crate) receiver: mpsc::Receiver<TransactionEvent>,
}

impl EventStream {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Receive the next event. `None` once the subscription is gone and the
    /// buffer is drained.
    pub async fn recv(&mut self) -> Option<TransactionEvent> {
        self.receiver.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<TransactionEvent> {
        self.receiver.try_recv().ok()
    }
}
