//! Notification hub: broadcasts persisted transitions to subscribers.

use crate::types::{NotificationEvent, TransactionId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::warn;

use super::types::{DropReason, EventStream, SubscriptionId, TransactionEvent, UpdateCallback};

/// Default per-subscriber event buffer.
const DEFAULT_BUFFER_SIZE: usize = 256;

/// Where events for one subscription go.
enum Sink {
    Channel(mpsc::Sender<TransactionEvent>),
    Callback(UpdateCallback),
}

/// Internal subscription state.
struct Subscription {
    transaction_id: TransactionId,
    sink: Sink,
}

impl Subscription {
    /// Deliver an event. Returns false if the subscriber is gone or its
    /// buffer is full (it will be dropped).
    fn deliver(&self, event: &TransactionEvent) -> bool {
        match &self.sink {
            Sink::Channel(sender) => sender.try_send(event.clone()).is_ok(),
            Sink::Callback(callback) => {
                if let TransactionEvent::Status(ev) = event {
                    // A panicking listener must not break delivery to the
                    // rest of the registry.
                    let outcome = catch_unwind(AssertUnwindSafe(|| callback(ev)));
                    if outcome.is_err() {
                        warn!(
                            transaction_id = %self.transaction_id,
                            "subscriber callback panicked; continuing"
                        );
                    }
                }
                true
            }
        }
    }
}

/// Manages subscriptions and broadcasts transitions.
///
/// Broadcasting happens on the manager's write path, so every subscriber
/// for an id observes transitions in the persisted write order.
pub struct NotificationHub {
    /// Active subscriptions by ID.
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
    /// Per-subscriber channel capacity.
    buffer_size: usize,
}

impl NotificationHub {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer_size,
        }
    }

    /// Subscribe to one transaction's transitions over a bounded channel.
    pub fn subscribe(&self, transaction_id: &TransactionId) -> EventStream {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = mpsc::channel(self.buffer_size);

        self.subscriptions.write().insert(
            id,
            Subscription {
                transaction_id: transaction_id.clone(),
                sink: Sink::Channel(sender),
            },
        );

        EventStream { id, receiver }
    }

    /// Register a synchronous callback for one transaction's transitions.
    pub fn subscribe_callback(
        &self,
        transaction_id: &TransactionId,
        callback: UpdateCallback,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));

        self.subscriptions.write().insert(
            id,
            Subscription {
                transaction_id: transaction_id.clone(),
                sink: Sink::Callback(callback),
            },
        );

        id
    }

    /// Unsubscribe and clean up. Idempotent.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subs = self.subscriptions.write();
        if let Some(sub) = subs.remove(&id) {
            // Best effort: tell a channel subscriber why its stream ends.
            sub.deliver(&TransactionEvent::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }

    /// Active subscription count.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Active subscription count for one transaction.
    pub fn subscriber_count_for(&self, transaction_id: &TransactionId) -> usize {
        self.subscriptions
            .read()
            .values()
            .filter(|sub| &sub.transaction_id == transaction_id)
            .count()
    }

    /// Broadcast a persisted transition to every subscriber of its id.
    /// Subscribers that fail to receive are dropped.
    pub fn broadcast(&self, event: &NotificationEvent) {
        let wrapped = TransactionEvent::Status(event.clone());
        let mut to_remove = Vec::new();

        {
            let subs = self.subscriptions.read();
            for (id, sub) in subs.iter() {
                if sub.transaction_id == event.transaction_id && !sub.deliver(&wrapped) {
                    to_remove.push(*id);
                }
            }
        }

        if !to_remove.is_empty() {
            let mut subs = self.subscriptions.write();
            for id in to_remove {
                if let Some(sub) = subs.remove(&id) {
                    warn!(
                        transaction_id = %sub.transaction_id,
                        subscription = id.0,
                        "dropping slow subscriber"
                    );
                    sub.deliver(&TransactionEvent::Dropped {
                        reason: DropReason::BufferOverflow,
                    });
                }
            }
        }
    }

    /// Send an event directly to one subscription (the synthetic snapshot
    /// on subscribe). Returns false if the subscription is gone.
    pub fn send_to(&self, id: SubscriptionId, event: TransactionEvent) -> bool {
        let subs = self.subscriptions.read();
        match subs.get(&id) {
            Some(sub) => sub.deliver(&event),
            None => false,
        }
    }

    /// Drop every subscription, notifying channel subscribers.
    pub fn shutdown(&self) {
        let mut subs = self.subscriptions.write();
        for (_, sub) in subs.drain() {
            sub.deliver(&TransactionEvent::Dropped {
                reason: DropReason::Shutdown,
            });
        }
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TransactionInput, TransactionRecord, TransactionStatus};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn make_event(id: &TransactionId, status: TransactionStatus) -> NotificationEvent {
        let mut record =
            TransactionRecord::new(id.clone(), TransactionInput::new("deploy", json!({})));
        record.status = status;
        NotificationEvent::from(&record)
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let hub = NotificationHub::default();

        let stream = hub.subscribe(&TransactionId::generate());
        assert_eq!(hub.subscription_count(), 1);

        hub.unsubscribe(stream.id());
        assert_eq!(hub.subscription_count(), 0);

        // Idempotent.
        hub.unsubscribe(stream.id());
        assert_eq!(hub.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_to_matching_id_only() {
        let hub = NotificationHub::default();
        let id = TransactionId::generate();
        let other = TransactionId::generate();

        let mut stream = hub.subscribe(&id);
        let mut other_stream = hub.subscribe(&other);

        hub.broadcast(&make_event(&id, TransactionStatus::Processing));

        let event = stream.try_recv().expect("subscriber should receive");
        match event {
            TransactionEvent::Status(ev) => assert_eq!(ev.status, TransactionStatus::Processing),
            _ => panic!("expected status event"),
        }
        assert!(other_stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_slow_subscriber_is_dropped() {
        let hub = NotificationHub::new(2);
        let id = TransactionId::generate();
        let _stream = hub.subscribe(&id);

        for _ in 0..10 {
            hub.broadcast(&make_event(&id, TransactionStatus::Processing));
        }

        assert_eq!(hub.subscription_count(), 0);
    }

    #[test]
    fn test_callback_delivery_and_panic_isolation() {
        let hub = NotificationHub::default();
        let id = TransactionId::generate();
        let seen = Arc::new(AtomicUsize::new(0));

        let _panicky = hub.subscribe_callback(
            &id,
            Box::new(|_| panic!("listener bug")),
        );
        let seen_clone = seen.clone();
        let _counting = hub.subscribe_callback(
            &id,
            Box::new(move |_| {
                seen_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        hub.broadcast(&make_event(&id, TransactionStatus::Processing));
        hub.broadcast(&make_event(&id, TransactionStatus::Completed));

        // The panicking listener never broke delivery to the healthy one.
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(hub.subscription_count(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_notifies_subscribers() {
        let hub = NotificationHub::default();
        let mut stream = hub.subscribe(&TransactionId::generate());

        hub.shutdown();

        match stream.recv().await {
            Some(TransactionEvent::Dropped { reason }) => {
                assert!(matches!(reason, DropReason::Shutdown))
            }
            _ => panic!("expected drop notice"),
        }
        assert_eq!(hub.subscription_count(), 0);
    }
}
