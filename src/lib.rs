//! # txflow
//!
//! An asynchronous transaction lifecycle engine with live status streaming.
//!
//! ## Core Concepts
//!
//! - **Records**: durable per-transaction state driven through
//!   `queued → processing → {completed | failed | cancelled}`
//! - **Processors**: pluggable executors bound to a transaction type,
//!   retried with an explicit backoff policy
//! - **Notifications**: every persisted transition broadcast in write
//!   order to any number of subscribers
//! - **Streaming**: per-transaction SSE streams with heartbeats, plus a
//!   client-side multiplexer with reconnection and aggregated health
//!
//! ## Example
//!
//! ```ignore
//! use txflow::{
//!     ManagerConfig, MemoryStore, ProcessorRegistry, TransactionInput, TransactionManager,
//! };
//!
//! let mut registry = ProcessorRegistry::new();
//! registry.register("deploy", Arc::new(DeployProcessor::new(rpc)));
//!
//! let manager = TransactionManager::new(
//!     Arc::new(MemoryStore::new()),
//!     registry,
//!     ManagerConfig::default(),
//! );
//! let worker = manager.start();
//!
//! let id = manager.enqueue(TransactionInput::new("deploy", payload))?;
//!
//! let mut events = manager.subscribe(&id)?;
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! ```

pub mod client;
pub mod error;
pub mod gateway;
pub mod lifecycle;
pub mod notify;
pub mod processor;
pub mod store;
pub mod types;

// Re-exports
pub use client::{
    CallbackRegistration, ConnectionSummary, LocalSource, MultiplexerConfig, StatusSource,
    SubscribeOptions, SubscriptionKey, SubscriptionMultiplexer, SubscriptionSnapshot,
};
pub use error::{Result, TxError};
pub use gateway::GatewayConfig;
pub use lifecycle::{Backoff, ManagerConfig, RetryPolicy, SubscriptionGuard, TransactionManager};
pub use notify::{DropReason, EventStream, NotificationHub, SubscriptionId, TransactionEvent};
pub use processor::{Processor, ProcessorError, ProcessorRegistry};
pub use store::{JournalStore, MemoryStore, TransactionStore};
pub use types::*;
