//! Streaming gateway: HTTP + SSE surface over the lifecycle manager.
//!
//! Three routes:
//! - `GET /transactions/{id}`: persisted snapshot with derived progress
//! - `DELETE /transactions/{id}`: attempt cancellation
//! - `GET /transactions/{id}/events`: one-directional SSE stream of
//!   status transitions with heartbeats
//!
//! The gateway is read-only with respect to records (cancellation goes
//! through the manager's entry point) and never cancels a transaction on
//! its own: a client disconnect only releases the subscription.

mod routes;
mod stream;

pub use routes::routes;

use crate::lifecycle::TransactionManager;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Gateway configuration.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Fixed interval between `heartbeat` events on open streams.
    pub heartbeat_interval: Duration,

    /// How long to keep a stream open after forwarding a terminal status,
    /// so the final event flushes before closure.
    pub terminal_grace: Duration,

    /// CORS origin allow-list. `"*"` allows any origin; an empty list
    /// allows none.
    pub allowed_origins: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            terminal_grace: Duration::from_millis(500),
            allowed_origins: Vec::new(),
        }
    }
}

/// Serve the gateway until the process exits.
pub async fn serve(manager: Arc<TransactionManager>, config: GatewayConfig, addr: SocketAddr) {
    warp::serve(routes(manager, config)).run(addr).await
}
