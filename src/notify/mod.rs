//! Pub/sub notifier for live transaction updates.
//!
//! This module fans persisted status transitions out to in-process
//! subscribers, one transaction id per subscription:
//! - Channel subscriptions for consumers that await events (the SSE
//!   gateway, the client observables)
//! - Callback subscriptions with synchronous delivery and per-listener
//!   panic isolation
//!
//! Delivery is in write order, at-least-once, with bounded buffers; a slow
//! subscriber is dropped with an explicit `Dropped` event rather than
//! silently skipping transitions.
//!
//! # Example
//!
//! ```ignore
//! let hub = NotificationHub::new(256);
//!
//! let mut stream = hub.subscribe(&id);
//! while let Some(event) = stream.recv().await {
//!     match event {
//!         TransactionEvent::Status(ev) => println!("{} -> {}", ev.transaction_id, ev.status),
//!         TransactionEvent::Dropped { .. } => break,
//!     }
//! }
//! ```

mod hub;
mod types;

pub use hub::NotificationHub;
pub use types::{DropReason, EventStream, SubscriptionId, TransactionEvent, UpdateCallback};
