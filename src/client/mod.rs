//! Client-side subscription layer.
//!
//! Application code subscribes through [`SubscriptionMultiplexer`], which
//! hands out independent logical subscriptions with a uniform lifecycle:
//! latest-only status, connection-health flags, synchronous update
//! callbacks, and aggregated health. Reconnection lives in the underlying
//! per-transaction observable; registrations survive every attempt until
//! the caller explicitly unsubscribes.

mod multiplexer;
mod observable;

pub use multiplexer::{
    ConnectionSummary, MultiplexerConfig, SubscribeOptions, SubscriptionKey,
    SubscriptionMultiplexer,
};
pub use observable::{CallbackRegistration, LocalSource, StatusSource, SubscriptionSnapshot};
