//! Integration tests for the streaming gateway.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use txflow::gateway::routes;
use txflow::{
    Backoff, GatewayConfig, ManagerConfig, MemoryStore, Processor, ProcessorError,
    ProcessorRegistry, RetryPolicy, TransactionInput, TransactionManager, TransactionStatus,
};

struct Echo;

#[async_trait]
impl Processor for Echo {
    async fn execute(
        &self,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, ProcessorError> {
        Ok(payload.clone())
    }
}

struct Slow {
    delay: Duration,
}

#[async_trait]
impl Processor for Slow {
    async fn execute(
        &self,
        _payload: &serde_json::Value,
    ) -> Result<serde_json::Value, ProcessorError> {
        tokio::time::sleep(self.delay).await;
        Ok(json!({"deployed": true}))
    }
}

fn test_manager(processor: Arc<dyn Processor>) -> Arc<TransactionManager> {
    let mut registry = ProcessorRegistry::new();
    registry.register("deploy", processor);
    let config = ManagerConfig {
        retry: RetryPolicy {
            max_retries: 3,
            retry_delay: Duration::from_millis(10),
            backoff: Backoff::Linear,
        },
        ..Default::default()
    };
    TransactionManager::new(Arc::new(MemoryStore::new()), registry, config)
}

fn test_gateway_config() -> GatewayConfig {
    GatewayConfig {
        heartbeat_interval: Duration::from_millis(50),
        terminal_grace: Duration::from_millis(20),
        allowed_origins: vec!["http://localhost:3000".to_string()],
    }
}

fn error_kind(body: &[u8]) -> String {
    let value: serde_json::Value = serde_json::from_slice(body).unwrap();
    value["error"]["kind"].as_str().unwrap_or_default().to_string()
}

// --- Snapshot route ---

#[tokio::test]
async fn test_snapshot_rejects_malformed_id() {
    let manager = test_manager(Arc::new(Echo));
    let api = routes(manager, test_gateway_config());

    let resp = warp::test::request()
        .method("GET")
        .path("/transactions/not-a-transaction")
        .reply(&api)
        .await;

    assert_eq!(resp.status(), 400);
    assert_eq!(error_kind(resp.body()), "invalid_id");
}

#[tokio::test]
async fn test_snapshot_unknown_id_is_404() {
    let manager = test_manager(Arc::new(Echo));
    let api = routes(manager, test_gateway_config());

    let resp = warp::test::request()
        .method("GET")
        .path("/transactions/tx_doesnotexist123")
        .reply(&api)
        .await;

    assert_eq!(resp.status(), 404);
    assert_eq!(error_kind(resp.body()), "not_found");
}

#[tokio::test]
async fn test_snapshot_includes_derived_progress() {
    let manager = test_manager(Arc::new(Echo));
    let id = manager
        .enqueue(TransactionInput::new("deploy", json!({"contract": "token"})))
        .unwrap();
    let api = routes(manager, test_gateway_config());

    let resp = warp::test::request()
        .method("GET")
        .path(&format!("/transactions/{id}"))
        .reply(&api)
        .await;

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body["status"], "queued");
    assert_eq!(body["progress"], 10);
    assert_eq!(body["retry_count"], 0);
}

// --- Cancel route ---

#[tokio::test]
async fn test_cancel_route_states() {
    let manager = test_manager(Arc::new(Echo));
    let id = manager
        .enqueue(TransactionInput::new("deploy", json!({})))
        .unwrap();
    let api = routes(manager.clone(), test_gateway_config());

    let resp = warp::test::request()
        .method("DELETE")
        .path(&format!("/transactions/{id}"))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body["cancelled"], true);
    assert_eq!(
        manager.status(&id).unwrap().status,
        TransactionStatus::Cancelled
    );

    // Already terminal: not cancellable.
    let resp = warp::test::request()
        .method("DELETE")
        .path(&format!("/transactions/{id}"))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), 400);
    assert_eq!(error_kind(resp.body()), "not_cancellable");

    let resp = warp::test::request()
        .method("DELETE")
        .path("/transactions/tx_doesnotexist123")
        .reply(&api)
        .await;
    assert_eq!(resp.status(), 404);
    assert_eq!(error_kind(resp.body()), "not_found");
}

// --- Event stream ---

#[tokio::test]
async fn test_stream_unknown_id_single_error_then_close() {
    let manager = test_manager(Arc::new(Echo));
    let api = routes(manager, test_gateway_config());

    let resp = warp::test::request()
        .method("GET")
        .path("/transactions/tx_doesnotexist123/events")
        .reply(&api)
        .await;

    assert_eq!(resp.status(), 200);
    let body = String::from_utf8_lossy(resp.body());
    assert_eq!(body.matches("event: error").count(), 1);
    assert!(body.contains("not_found"));
    assert!(!body.contains("event: status"));
}

#[tokio::test]
async fn test_stream_closes_after_terminal_snapshot() {
    let manager = test_manager(Arc::new(Echo));
    let id = manager
        .enqueue(TransactionInput::new("deploy", json!({"contract": "token"})))
        .unwrap();
    let worker = manager.start();

    // Drive to completion before connecting.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while manager.status(&id).unwrap().status != TransactionStatus::Completed {
        assert!(tokio::time::Instant::now() < deadline, "timed out");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let api = routes(manager.clone(), test_gateway_config());
    let resp = warp::test::request()
        .method("GET")
        .path(&format!("/transactions/{id}/events"))
        .reply(&api)
        .await;

    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("text/event-stream")
    );
    assert_eq!(
        resp.headers()
            .get("cache-control")
            .and_then(|v| v.to_str().ok()),
        Some("no-cache")
    );

    let body = String::from_utf8_lossy(resp.body());
    // Latest snapshot only: one terminal status event, then closure.
    assert_eq!(body.matches("event: status").count(), 1);
    assert!(body.contains("\"status\":\"completed\""));
    assert!(body.contains("\"progress\":100"));

    manager.shutdown();
    let _ = worker.await;
}

#[tokio::test]
async fn test_stream_forwards_live_transitions() {
    let manager = test_manager(Arc::new(Slow {
        delay: Duration::from_millis(200),
    }));
    let worker = manager.start();
    let id = manager
        .enqueue(TransactionInput::new("deploy", json!({})))
        .unwrap();

    let api = routes(manager.clone(), test_gateway_config());
    let resp = warp::test::request()
        .method("GET")
        .path(&format!("/transactions/{id}/events"))
        .reply(&api)
        .await;

    let body = String::from_utf8_lossy(resp.body());
    // Snapshot plus at least the terminal transition, in order.
    assert!(body.matches("event: status").count() >= 2);
    assert!(body.contains("\"status\":\"completed\""));
    let processing_at = body.find("\"status\":\"processing\"");
    let completed_at = body.find("\"status\":\"completed\"");
    if let (Some(processing_at), Some(completed_at)) = (processing_at, completed_at) {
        assert!(processing_at < completed_at);
    }

    // The 200ms attempt spans several 50ms heartbeat intervals.
    assert!(body.contains("event: heartbeat"));

    manager.shutdown();
    let _ = worker.await;
}

// --- CORS ---

#[tokio::test]
async fn test_cors_allows_configured_origin() {
    let manager = test_manager(Arc::new(Echo));
    let api = routes(manager, test_gateway_config());

    let resp = warp::test::request()
        .method("GET")
        .header("origin", "http://localhost:3000")
        .path("/transactions/tx_doesnotexist123")
        .reply(&api)
        .await;

    assert_eq!(
        resp.headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("http://localhost:3000")
    );
}
