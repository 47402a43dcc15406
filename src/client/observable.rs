//! Per-transaction observable: connection state, callbacks, reconnection.

use crate::error::Result;
use crate::lifecycle::TransactionManager;
use crate::notify::{EventStream, SubscriptionId, TransactionEvent};
use crate::types::{TransactionId, TransactionStatus};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::time::timeout;
use tracing::{debug, warn};

use super::multiplexer::ResolvedOptions;

/// Latest-only view of one logical subscription. No history is retained.
#[derive(Clone, Debug)]
pub struct SubscriptionSnapshot {
    pub transaction_id: TransactionId,
    pub status: Option<TransactionStatus>,
    pub is_connected: bool,
    pub is_reconnecting: bool,
    pub error: Option<String>,
    pub reconnect_attempts: u32,
}

impl SubscriptionSnapshot {
    pub(crate) fn new(transaction_id: TransactionId) -> Self {
        Self {
            transaction_id,
            status: None,
            is_connected: false,
            is_reconnecting: false,
            error: None,
            reconnect_attempts: 0,
        }
    }
}

/// Transport behind an observable. `LocalSource` serves in-process
/// subscriptions; the trait keeps the wire swappable.
#[async_trait]
pub trait StatusSource: Send + Sync + 'static {
    /// Open a live stream for one transaction: snapshot first, then every
    /// persisted transition.
    async fn connect(&self, id: &TransactionId) -> Result<EventStream>;

    /// Release a stream's subscription.
    fn disconnect(&self, subscription: SubscriptionId);
}

/// In-process source backed directly by the manager.
pub struct LocalSource {
    manager: Arc<TransactionManager>,
}

impl LocalSource {
    pub fn new(manager: Arc<TransactionManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl StatusSource for LocalSource {
    async fn connect(&self, id: &TransactionId) -> Result<EventStream> {
        self.manager.subscribe(id)
    }

    fn disconnect(&self, subscription: SubscriptionId) {
        self.manager.unsubscribe(subscription);
    }
}

type SnapshotCallback = Arc<dyn Fn(&SubscriptionSnapshot) + Send + Sync>;

/// Shared state of one logical subscription.
pub(crate) struct Observable {
    state: RwLock<SubscriptionSnapshot>,
    callbacks: Mutex<Vec<(u64, SnapshotCallback)>>,
    next_callback: AtomicU64,
}

impl Observable {
    pub(crate) fn new(transaction_id: TransactionId) -> Self {
        Self {
            state: RwLock::new(SubscriptionSnapshot::new(transaction_id)),
            callbacks: Mutex::new(Vec::new()),
            next_callback: AtomicU64::new(1),
        }
    }

    pub(crate) fn snapshot(&self) -> SubscriptionSnapshot {
        self.state.read().clone()
    }

    /// Mutate the snapshot and notify every callback with the new value.
    /// A panicking callback is logged and skipped; the others still run.
    pub(crate) fn apply(&self, mutate: impl FnOnce(&mut SubscriptionSnapshot)) {
        let snapshot = {
            let mut state = self.state.write();
            mutate(&mut state);
            state.clone()
        };

        let callbacks = self.callbacks.lock().clone();
        for (callback_id, callback) in callbacks {
            let outcome = catch_unwind(AssertUnwindSafe(|| callback(&snapshot)));
            if outcome.is_err() {
                warn!(
                    transaction_id = %snapshot.transaction_id,
                    callback = callback_id,
                    "subscription callback panicked; continuing"
                );
            }
        }
    }

    pub(crate) fn add_callback(&self, callback: SnapshotCallback) -> u64 {
        let id = self.next_callback.fetch_add(1, Ordering::SeqCst);
        self.callbacks.lock().push((id, callback));
        id
    }

    pub(crate) fn remove_callback(&self, id: u64) {
        self.callbacks.lock().retain(|(cb_id, _)| *cb_id != id);
    }
}

/// Disposer for a registered update callback.
pub struct CallbackRegistration {
    pub(crate) observable: Weak<Observable>,
    pub(crate) callback_id: u64,
}

impl CallbackRegistration {
    /// Remove the callback. A no-op if the subscription is already gone.
    pub fn unregister(self) {
        if let Some(observable) = self.observable.upgrade() {
            observable.remove_callback(self.callback_id);
        }
    }
}

/// Connection loop for one logical subscription.
///
/// The registration (key, callbacks, latest snapshot) outlives every
/// reconnect attempt; only an explicit unsubscribe tears it down.
pub(crate) async fn run(
    observable: Arc<Observable>,
    source: Arc<dyn StatusSource>,
    id: TransactionId,
    options: ResolvedOptions,
) {
    let mut attempts: u32 = 0;

    loop {
        let mut last_error = None;

        match source.connect(&id).await {
            Ok(mut stream) => {
                let subscription = stream.id();
                attempts = 0;
                observable.apply(|s| {
                    s.is_connected = true;
                    s.is_reconnecting = false;
                    s.error = None;
                    s.reconnect_attempts = 0;
                });

                let reached_terminal = loop {
                    match timeout(options.silence_timeout, stream.recv()).await {
                        Ok(Some(TransactionEvent::Status(ev))) => {
                            let terminal = ev.status.is_terminal();
                            observable.apply(|s| s.status = Some(ev.status));
                            if terminal {
                                break true;
                            }
                        }
                        Ok(Some(TransactionEvent::Dropped { reason })) => {
                            debug!(transaction_id = %id, ?reason, "stream dropped; reconnecting");
                            break false;
                        }
                        Ok(None) => break false,
                        Err(_) => {
                            // Prolonged silence counts as connection loss.
                            debug!(transaction_id = %id, "silence timeout; reconnecting");
                            break false;
                        }
                    }
                };

                source.disconnect(subscription);

                if reached_terminal {
                    // Clean close: the transaction is finished.
                    observable.apply(|s| s.is_connected = false);
                    return;
                }
            }
            Err(e) => {
                last_error = Some(e.to_string());
            }
        }

        attempts += 1;
        if attempts > options.max_reconnect_attempts {
            observable.apply(|s| {
                s.is_connected = false;
                s.is_reconnecting = false;
                s.reconnect_attempts = attempts - 1;
                s.error = Some(match &last_error {
                    Some(cause) => format!("reconnect attempts exhausted: {cause}"),
                    None => "reconnect attempts exhausted".to_string(),
                });
            });
            return;
        }

        observable.apply(|s| {
            s.is_connected = false;
            s.is_reconnecting = true;
            s.reconnect_attempts = attempts;
        });
        tokio::time::sleep(options.reconnect_delay * attempts).await;
    }
}
