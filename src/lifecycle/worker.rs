//! Dispatch queue and worker loop.
//!
//! The queue is an explicit delay/priority queue: entries carry a due
//! timestamp (now for fresh work, `next_retry_at` for scheduled retries),
//! so retry state persisted in the store stays meaningful across process
//! restarts: `recover()` just re-pushes what it finds.

use crate::types::{Priority, Timestamp, TransactionId};
use parking_lot::Mutex;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::error;

use super::manager::TransactionManager;

/// One scheduled dispatch.
struct PendingEntry {
    due: Timestamp,
    priority: Priority,
    /// Enqueue order; breaks ties FIFO.
    seq: u64,
    id: TransactionId,
}

impl PartialEq for PendingEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PendingEntry {}

impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Earliest due first; then higher priority; then FIFO.
        self.due
            .cmp(&other.due)
            .then(other.priority.cmp(&self.priority))
            .then(self.seq.cmp(&other.seq))
    }
}

/// Priority/delay queue feeding the worker loop.
pub(crate) struct DispatchQueue {
    heap: Mutex<BinaryHeap<Reverse<PendingEntry>>>,
    notify: Notify,
    next_seq: AtomicU64,
}

impl DispatchQueue {
    pub(crate) fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Schedule an id for dispatch at `due`.
    pub(crate) fn push(&self, id: TransactionId, priority: Priority, due: Timestamp) {
        let seq = self.next_seq.fetch_add(1, AtomicOrdering::SeqCst);
        self.heap.lock().push(Reverse(PendingEntry {
            due,
            priority,
            seq,
            id,
        }));
        self.notify.notify_one();
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.lock().len()
    }

    /// Wait for the next due entry.
    pub(crate) async fn next(&self) -> TransactionId {
        loop {
            let wait = {
                let mut heap = self.heap.lock();
                match heap.peek() {
                    Some(Reverse(entry)) => match entry.due.duration_until() {
                        // Due now.
                        None => {
                            if let Some(Reverse(entry)) = heap.pop() {
                                return entry.id;
                            }
                            None
                        }
                        Some(remaining) => Some(remaining),
                    },
                    None => None,
                }
            };

            match wait {
                // Sleep until the head is due, or until something earlier
                // arrives.
                Some(remaining) => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep(remaining) => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }
}

/// Worker loop: pull due ids and drive them, bounded by the manager's
/// concurrency limit. Exits on shutdown.
pub(crate) async fn run(manager: Arc<TransactionManager>) {
    loop {
        if manager.is_shutting_down() {
            break;
        }

        tokio::select! {
            _ = manager.shutdown_notified() => break,
            id = manager.queue().next() => {
                let permit = match manager.limiter().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        error!("worker semaphore closed; stopping");
                        break;
                    }
                };
                let manager = manager.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    manager.drive(&id).await;
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn id() -> TransactionId {
        TransactionId::generate()
    }

    #[tokio::test]
    async fn test_pops_in_priority_order_when_all_due() {
        let queue = DispatchQueue::new();
        let now = Timestamp::now();

        let low = id();
        let high = id();
        let normal = id();
        queue.push(low.clone(), Priority::Low, now);
        queue.push(high.clone(), Priority::High, now);
        queue.push(normal.clone(), Priority::Normal, now);

        assert_eq!(queue.next().await, high);
        assert_eq!(queue.next().await, normal);
        assert_eq!(queue.next().await, low);
    }

    #[tokio::test]
    async fn test_fifo_within_same_priority() {
        let queue = DispatchQueue::new();
        let now = Timestamp::now();

        let first = id();
        let second = id();
        queue.push(first.clone(), Priority::Normal, now);
        queue.push(second.clone(), Priority::Normal, now);

        assert_eq!(queue.next().await, first);
        assert_eq!(queue.next().await, second);
    }

    #[tokio::test]
    async fn test_delayed_entry_waits_until_due() {
        let queue = DispatchQueue::new();
        let delayed = id();
        queue.push(
            delayed.clone(),
            Priority::Normal,
            Timestamp::now().saturating_add(Duration::from_millis(50)),
        );

        let started = std::time::Instant::now();
        assert_eq!(queue.next().await, delayed);
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_earlier_push_preempts_sleeping_head() {
        let queue = Arc::new(DispatchQueue::new());
        let slow = id();
        queue.push(
            slow.clone(),
            Priority::Normal,
            Timestamp::now().saturating_add(Duration::from_secs(5)),
        );

        let fast = id();
        let pusher = queue.clone();
        let fast_clone = fast.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            pusher.push(fast_clone, Priority::Normal, Timestamp::now());
        });

        let got = tokio::time::timeout(Duration::from_secs(1), queue.next())
            .await
            .expect("should not wait for the far-future entry");
        assert_eq!(got, fast);
        assert_eq!(queue.len(), 1);
    }
}
