//! Transaction lifecycle manager: enqueue, drive, retry, cancel.

use crate::error::{Result, TxError};
use crate::notify::{EventStream, NotificationHub, SubscriptionId, TransactionEvent};
use crate::processor::ProcessorRegistry;
use crate::store::TransactionStore;
use crate::types::{
    NotificationEvent, Timestamp, TransactionId, TransactionInput, TransactionRecord,
    TransactionStatus, ID_PREFIX,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::retry::RetryPolicy;
use super::worker::{self, DispatchQueue};

/// Manager configuration.
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    /// Retry/backoff policy applied to retryable processor failures.
    pub retry: RetryPolicy,

    /// Maximum processor attempts running concurrently.
    pub max_concurrent: usize,

    /// Per-subscriber event buffer.
    pub event_buffer: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            max_concurrent: 8,
            event_buffer: 256,
        }
    }
}

/// Disposer for a callback subscription.
///
/// Teardown is explicit: call [`SubscriptionGuard::unsubscribe`]. Dropping
/// the guard does not unregister the callback.
pub struct SubscriptionGuard {
    hub: Arc<NotificationHub>,
    id: SubscriptionId,
}

impl SubscriptionGuard {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn unsubscribe(self) {
        self.hub.unsubscribe(self.id);
    }
}

/// Owns the full life cycle of every transaction record.
///
/// The manager is the single writer of the injected store. One brief write
/// mutex serializes persist+broadcast, so the order subscribers observe is
/// exactly the persisted write order. Processor execution happens in
/// spawned tasks outside any lock and never blocks enqueue or reads.
///
/// Constructed explicitly and handed to the gateway and worker loop; the
/// host service owns startup and shutdown.
pub struct TransactionManager {
    store: Arc<dyn TransactionStore>,
    registry: ProcessorRegistry,
    hub: Arc<NotificationHub>,
    config: ManagerConfig,
    queue: DispatchQueue,
    limiter: Arc<Semaphore>,
    /// Serializes persist+broadcast. Never held across an await.
    write_lock: Mutex<()>,
    shutdown: Notify,
    shutting_down: AtomicBool,
}

impl TransactionManager {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        registry: ProcessorRegistry,
        config: ManagerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            registry,
            hub: Arc::new(NotificationHub::new(config.event_buffer)),
            limiter: Arc::new(Semaphore::new(config.max_concurrent)),
            queue: DispatchQueue::new(),
            write_lock: Mutex::new(()),
            shutdown: Notify::new(),
            shutting_down: AtomicBool::new(false),
            config,
        })
    }

    /// Spawn the worker loop. The handle resolves once shutdown completes.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(worker::run(self.clone()))
    }

    /// Stop accepting work and release all subscribers. In-flight attempts
    /// finish; their terminal writes still apply.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
        self.hub.shutdown();
    }

    // --- Entry points ---

    /// Validate and persist a new transaction, returning its id.
    ///
    /// The record is durably `queued` (and the transition broadcast) before
    /// this returns.
    pub fn enqueue(&self, input: TransactionInput) -> Result<TransactionId> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(TxError::ShuttingDown);
        }

        let processor = self
            .registry
            .get(&input.tx_type)
            .ok_or_else(|| TxError::UnknownType(input.tx_type.clone()))?;
        processor
            .validate(&input.payload)
            .map_err(TxError::InvalidPayload)?;

        let priority = input.priority;
        let record = TransactionRecord::new(TransactionId::generate(), input);
        let id = record.id.clone();

        {
            let _write = self.write_lock.lock();
            self.store.insert(record.clone())?;
            self.hub.broadcast(&NotificationEvent::from(&record));
        }

        self.queue.push(id.clone(), priority, Timestamp::now());
        info!(transaction_id = %id, tx_type = %record.tx_type, "transaction enqueued");
        Ok(id)
    }

    /// Read-only snapshot of a record.
    pub fn status(&self, id: &TransactionId) -> Result<TransactionRecord> {
        self.store
            .get(id)?
            .ok_or_else(|| TxError::NotFound(id.clone()))
    }

    /// Cancel a transaction.
    ///
    /// `Ok(true)` iff the status was non-terminal at acceptance time;
    /// `Ok(false)` if the record is already terminal (including a repeat
    /// cancel); `Err(NotFound)` for an unknown id. Cancellation of in-flight
    /// processor work is advisory: the attempt may still run to its end, but
    /// its late result loses to the terminal write made here.
    pub fn cancel(&self, id: &TransactionId) -> Result<bool> {
        let outcome = self.transition(id, &mut |record| {
            if record.status.is_terminal() {
                return Err(TxError::NotCancellable {
                    id: record.id.clone(),
                    status: record.status,
                });
            }
            let now = Timestamp::now();
            record.status = TransactionStatus::Cancelled;
            record.cancelled_at = Some(now);
            record.updated_at = now;
            record.next_retry_at = None;
            Ok(())
        });

        match outcome {
            Ok(_) => {
                info!(transaction_id = %id, "transaction cancelled");
                Ok(true)
            }
            Err(TxError::NotCancellable { status, .. }) => {
                debug!(transaction_id = %id, %status, "cancel refused: already terminal");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Subscribe to a transaction's transitions over a channel.
    ///
    /// The current snapshot arrives immediately as a synthetic first event;
    /// every later persisted transition follows in write order. Snapshot
    /// read and registration happen atomically, so nothing is skipped in
    /// between.
    pub fn subscribe(&self, id: &TransactionId) -> Result<EventStream> {
        let _write = self.write_lock.lock();
        let record = self
            .store
            .get(id)?
            .ok_or_else(|| TxError::NotFound(id.clone()))?;

        let stream = self.hub.subscribe(id);
        self.hub.send_to(
            stream.id(),
            TransactionEvent::Status(NotificationEvent::from(&record)),
        );
        Ok(stream)
    }

    /// Subscribe with a synchronous callback.
    ///
    /// The callback runs on the manager's write path: keep it fast and do
    /// not call back into the manager from inside it. Returns an explicit
    /// disposer.
    pub fn subscribe_with<F>(&self, id: &TransactionId, on_update: F) -> Result<SubscriptionGuard>
    where
        F: Fn(&NotificationEvent) + Send + Sync + 'static,
    {
        let _write = self.write_lock.lock();
        let record = self
            .store
            .get(id)?
            .ok_or_else(|| TxError::NotFound(id.clone()))?;

        let sub_id = self.hub.subscribe_callback(id, Box::new(on_update));
        self.hub.send_to(
            sub_id,
            TransactionEvent::Status(NotificationEvent::from(&record)),
        );
        Ok(SubscriptionGuard {
            hub: self.hub.clone(),
            id: sub_id,
        })
    }

    /// Release a channel subscription.
    pub fn unsubscribe(&self, subscription: SubscriptionId) {
        self.hub.unsubscribe(subscription);
    }

    /// Re-dispatch every non-terminal record found in the store, honoring
    /// persisted retry schedules. Call once after construction when reusing
    /// a durable store.
    pub fn recover(&self) -> Result<usize> {
        let mut recovered = 0;
        for id in self.store.ids_with_prefix(ID_PREFIX)? {
            if let Some(record) = self.store.get(&id)? {
                if !record.is_terminal() {
                    let due = record.next_retry_at.unwrap_or_else(Timestamp::now);
                    self.queue.push(id, record.priority, due);
                    recovered += 1;
                }
            }
        }
        if recovered > 0 {
            info!(count = recovered, "re-dispatched interrupted transactions");
        }
        Ok(recovered)
    }

    // --- Drive loop ---

    /// Run one attempt for a dispatched id. Re-schedules itself through the
    /// queue on retryable failure. Errors here are persisted and broadcast,
    /// never propagated.
    pub(crate) async fn drive(&self, id: &TransactionId) {
        let record = match self.store.get(id) {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(transaction_id = %id, "dispatched id no longer in store");
                return;
            }
            Err(e) => {
                error!(transaction_id = %id, error = %e, "store read failed; attempt abandoned");
                return;
            }
        };

        // Cancelled (or otherwise finished) while waiting in the queue.
        if record.is_terminal() {
            return;
        }

        let marked = self.transition(id, &mut |record| {
            if record.status.is_terminal() {
                return Err(TxError::TerminalConflict {
                    id: record.id.clone(),
                    status: record.status,
                });
            }
            let now = Timestamp::now();
            record.status = TransactionStatus::Processing;
            record.updated_at = now;
            if record.retry_count > 0 {
                record.last_retry_at = Some(now);
            }
            record.next_retry_at = None;
            Ok(())
        });

        let record = match marked {
            Ok(record) => record,
            Err(TxError::TerminalConflict { status, .. }) => {
                warn!(transaction_id = %id, %status, "terminal write conflict ignored");
                return;
            }
            Err(e) => {
                error!(transaction_id = %id, error = %e, "failed to mark processing");
                return;
            }
        };

        let processor = match self.registry.get(&record.tx_type) {
            Some(processor) => processor,
            None => {
                // Possible after recovery against a changed registry.
                self.finish_failed(id, format!("no processor registered for type: {}", record.tx_type));
                return;
            }
        };

        match processor.execute(&record.payload).await {
            Ok(result) => self.finish_completed(id, result),
            Err(e) => self.handle_failure(id, e.is_retryable(), e.to_string()),
        }
    }

    /// Terminal `completed` write. A lost race against cancel is logged and
    /// ignored: the first terminal write wins.
    fn finish_completed(&self, id: &TransactionId, result: serde_json::Value) {
        let mut result = Some(result);
        let outcome = self.transition(id, &mut |record| {
            if record.status.is_terminal() {
                return Err(TxError::TerminalConflict {
                    id: record.id.clone(),
                    status: record.status,
                });
            }
            let now = Timestamp::now();
            record.status = TransactionStatus::Completed;
            record.result = result.take();
            record.completed_at = Some(now);
            record.updated_at = now;
            record.next_retry_at = None;
            Ok(())
        });

        match outcome {
            Ok(record) => {
                info!(
                    transaction_id = %id,
                    retry_count = record.retry_count,
                    "transaction completed"
                );
            }
            Err(TxError::TerminalConflict { status, .. }) => {
                warn!(transaction_id = %id, %status, "late success ignored: terminal write already applied");
            }
            Err(e) => {
                error!(transaction_id = %id, error = %e, "failed to persist completion");
            }
        }
    }

    /// Terminal `failed` write.
    fn finish_failed(&self, id: &TransactionId, message: String) {
        let outcome = self.transition(id, &mut |record| {
            if record.status.is_terminal() {
                return Err(TxError::TerminalConflict {
                    id: record.id.clone(),
                    status: record.status,
                });
            }
            record.status = TransactionStatus::Failed;
            record.last_error = Some(message.clone());
            record.updated_at = Timestamp::now();
            record.next_retry_at = None;
            Ok(())
        });

        match outcome {
            Ok(record) => {
                warn!(
                    transaction_id = %id,
                    retry_count = record.retry_count,
                    error = %message,
                    "transaction failed"
                );
            }
            Err(TxError::TerminalConflict { status, .. }) => {
                warn!(transaction_id = %id, %status, "terminal write conflict ignored");
            }
            Err(e) => {
                error!(transaction_id = %id, error = %e, "failed to persist failure");
            }
        }
    }

    /// Account one failed attempt: schedule a retry or go terminal.
    fn handle_failure(&self, id: &TransactionId, retryable: bool, message: String) {
        let policy = &self.config.retry;
        let outcome = self.transition(id, &mut |record| {
            if record.status.is_terminal() {
                return Err(TxError::TerminalConflict {
                    id: record.id.clone(),
                    status: record.status,
                });
            }
            let now = Timestamp::now();
            record.retry_count += 1;
            record.last_error = Some(message.clone());
            record.updated_at = now;

            if retryable && record.retry_count < policy.max_retries {
                // Stays `processing` between attempts; the schedule is the
                // only thing that changes.
                record.next_retry_at =
                    Some(now.saturating_add(policy.delay_for(record.retry_count)));
            } else {
                record.status = TransactionStatus::Failed;
                record.next_retry_at = None;
            }
            Ok(())
        });

        match outcome {
            Ok(record) => match record.next_retry_at {
                Some(due) => {
                    debug!(
                        transaction_id = %id,
                        retry_count = record.retry_count,
                        error = %message,
                        "attempt failed; retry scheduled"
                    );
                    self.queue.push(id.clone(), record.priority, due);
                }
                None => {
                    warn!(
                        transaction_id = %id,
                        retry_count = record.retry_count,
                        error = %message,
                        "transaction failed"
                    );
                }
            },
            Err(TxError::TerminalConflict { status, .. }) => {
                warn!(transaction_id = %id, %status, "terminal write conflict ignored");
            }
            Err(e) => {
                error!(transaction_id = %id, error = %e, "failed to persist attempt failure");
            }
        }
    }

    /// Persist a transition and broadcast it, atomically with respect to
    /// every other write. Broadcast happens only after the store mutation
    /// commits.
    fn transition(
        &self,
        id: &TransactionId,
        mutate: &mut dyn FnMut(&mut TransactionRecord) -> Result<()>,
    ) -> Result<TransactionRecord> {
        let _write = self.write_lock.lock();
        let record = self.store.update(id, mutate)?;
        self.hub.broadcast(&NotificationEvent::from(&record));
        Ok(record)
    }

    // --- Worker plumbing ---

    pub(crate) fn queue(&self) -> &DispatchQueue {
        &self.queue
    }

    pub(crate) fn limiter(&self) -> Arc<Semaphore> {
        self.limiter.clone()
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub(crate) async fn shutdown_notified(&self) {
        self.shutdown.notified().await;
    }

    /// Active subscriber count, mostly for tests and introspection.
    pub fn subscriber_count(&self) -> usize {
        self.hub.subscription_count()
    }
}
