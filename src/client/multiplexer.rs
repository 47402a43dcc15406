//! Client-side subscription multiplexer.

use crate::types::TransactionId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use super::observable::{self, CallbackRegistration, Observable, StatusSource, SubscriptionSnapshot};

/// Identifier of one logical client subscription.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionKey(pub u64);

impl fmt::Debug for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionKey({})", self.0)
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub_{}", self.0)
    }
}

/// Instance-wide defaults for new subscriptions.
#[derive(Clone, Debug)]
pub struct MultiplexerConfig {
    /// Reconnect attempts before a subscription surfaces `error`.
    pub max_reconnect_attempts: u32,

    /// Base delay between reconnect attempts (grows linearly).
    pub reconnect_delay: Duration,

    /// Silence on an open stream treated as connection loss.
    pub silence_timeout: Duration,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(1),
            silence_timeout: Duration::from_secs(60),
        }
    }
}

/// Per-call options; anything set here wins over the instance defaults.
#[derive(Clone, Debug, Default)]
pub struct SubscribeOptions {
    pub max_reconnect_attempts: Option<u32>,
    pub reconnect_delay: Option<Duration>,
    pub silence_timeout: Option<Duration>,
}

/// Options after merging caller values over defaults.
#[derive(Clone, Debug)]
pub(crate) struct ResolvedOptions {
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub silence_timeout: Duration,
}

impl ResolvedOptions {
    fn merge(defaults: &MultiplexerConfig, options: &SubscribeOptions) -> Self {
        Self {
            max_reconnect_attempts: options
                .max_reconnect_attempts
                .unwrap_or(defaults.max_reconnect_attempts),
            reconnect_delay: options.reconnect_delay.unwrap_or(defaults.reconnect_delay),
            silence_timeout: options.silence_timeout.unwrap_or(defaults.silence_timeout),
        }
    }
}

/// Aggregate connection health, computed on demand from live state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConnectionSummary {
    pub total: usize,
    pub connected: usize,
    pub reconnecting: usize,
    pub failed: usize,
}

struct Entry {
    observable: Arc<Observable>,
    task: JoinHandle<()>,
}

/// Gives many application-level consumers independent, uniformly-managed
/// views over one or more transactions.
///
/// Each logical subscription is backed by one per-transaction observable
/// task; reconnection happens there, while the multiplexer preserves keys,
/// callbacks and the latest snapshot across attempts.
pub struct SubscriptionMultiplexer {
    source: Arc<dyn StatusSource>,
    defaults: MultiplexerConfig,
    entries: Mutex<HashMap<SubscriptionKey, Entry>>,
    next_key: AtomicU64,
}

impl SubscriptionMultiplexer {
    pub fn new(source: Arc<dyn StatusSource>, defaults: MultiplexerConfig) -> Self {
        Self {
            source,
            defaults,
            entries: Mutex::new(HashMap::new()),
            next_key: AtomicU64::new(1),
        }
    }

    /// Register a logical subscription for one transaction. Caller options
    /// override the instance defaults.
    pub fn subscribe(
        &self,
        transaction_id: TransactionId,
        options: SubscribeOptions,
    ) -> SubscriptionKey {
        let key = SubscriptionKey(self.next_key.fetch_add(1, Ordering::SeqCst));
        let resolved = ResolvedOptions::merge(&self.defaults, &options);

        let observable = Arc::new(Observable::new(transaction_id.clone()));
        let task = tokio::spawn(observable::run(
            observable.clone(),
            self.source.clone(),
            transaction_id,
            resolved,
        ));

        self.entries.lock().insert(key, Entry { observable, task });
        key
    }

    /// Tear a subscription down. Idempotent: returns false if the key is
    /// unknown or already removed.
    pub fn unsubscribe(&self, key: SubscriptionKey) -> bool {
        match self.entries.lock().remove(&key) {
            Some(entry) => {
                entry.task.abort();
                debug!(%key, "subscription removed");
                true
            }
            None => false,
        }
    }

    /// Latest snapshot for a subscription, if it is still registered.
    pub fn get_subscription(&self, key: SubscriptionKey) -> Option<SubscriptionSnapshot> {
        self.entries
            .lock()
            .get(&key)
            .map(|entry| entry.observable.snapshot())
    }

    /// Register a callback invoked on every snapshot change. Returns an
    /// explicit disposer, or `None` for an unknown key.
    pub fn on_subscription_update<F>(
        &self,
        key: SubscriptionKey,
        callback: F,
    ) -> Option<CallbackRegistration>
    where
        F: Fn(&SubscriptionSnapshot) + Send + Sync + 'static,
    {
        let entries = self.entries.lock();
        let entry = entries.get(&key)?;
        let callback_id = entry.observable.add_callback(Arc::new(callback));
        Some(CallbackRegistration {
            observable: Arc::downgrade(&entry.observable),
            callback_id,
        })
    }

    /// Aggregate health across all live subscriptions. Always derived from
    /// current state; there is no separately maintained counter.
    pub fn global_connection_status(&self) -> ConnectionSummary {
        let entries = self.entries.lock();
        let mut summary = ConnectionSummary {
            total: entries.len(),
            ..Default::default()
        };
        for entry in entries.values() {
            let snapshot = entry.observable.snapshot();
            if snapshot.is_connected {
                summary.connected += 1;
            }
            if snapshot.is_reconnecting {
                summary.reconnecting += 1;
            }
            if snapshot.error.is_some() {
                summary.failed += 1;
            }
        }
        summary
    }

    /// Number of live registrations.
    pub fn subscription_count(&self) -> usize {
        self.entries.lock().len()
    }
}

impl Drop for SubscriptionMultiplexer {
    fn drop(&mut self) {
        for entry in self.entries.lock().values() {
            entry.task.abort();
        }
    }
}
