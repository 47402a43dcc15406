//! HTTP routes for the streaming gateway.

use crate::error::TxError;
use crate::lifecycle::TransactionManager;
use crate::types::{TransactionId, TransactionRecord};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use super::stream::sse_events;
use super::GatewayConfig;

fn with_manager(
    manager: Arc<TransactionManager>,
) -> impl Filter<Extract = (Arc<TransactionManager>,), Error = Infallible> + Clone {
    warp::any().map(move || manager.clone())
}

fn with_config(
    config: GatewayConfig,
) -> impl Filter<Extract = (GatewayConfig,), Error = Infallible> + Clone {
    warp::any().map(move || config.clone())
}

/// Build the gateway's route tree with CORS applied from the allow-list.
pub fn routes(
    manager: Arc<TransactionManager>,
    config: GatewayConfig,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let events = warp::get()
        .and(warp::path!("transactions" / String / "events"))
        .and(with_manager(manager.clone()))
        .and(with_config(config.clone()))
        .and_then(stream_events);

    let snapshot = warp::get()
        .and(warp::path!("transactions" / String))
        .and(with_manager(manager.clone()))
        .and_then(get_transaction);

    let cancel = warp::delete()
        .and(warp::path!("transactions" / String))
        .and(with_manager(manager))
        .and_then(cancel_transaction);

    let mut cors = warp::cors().allow_methods(vec!["GET", "DELETE"]);
    if config.allowed_origins.iter().any(|origin| origin == "*") {
        cors = cors.allow_any_origin();
    } else {
        for origin in &config.allowed_origins {
            cors = cors.allow_origin(origin.as_str());
        }
    }

    events.or(snapshot).or(cancel).with(cors)
}

/// Snapshot JSON: the persisted record plus derived progress.
fn snapshot_body(record: &TransactionRecord) -> Result<serde_json::Value, TxError> {
    let mut body = serde_json::to_value(record)?;
    if let Some(map) = body.as_object_mut() {
        map.insert("progress".into(), json!(record.status.progress()));
    }
    Ok(body)
}

/// Structured error reply with a machine-checkable kind.
fn error_reply(e: &TxError) -> warp::reply::WithStatus<warp::reply::Json> {
    let status = match e {
        TxError::NotFound(_) => StatusCode::NOT_FOUND,
        TxError::InvalidId(_)
        | TxError::UnknownType(_)
        | TxError::InvalidPayload(_)
        | TxError::NotCancellable { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = json!({
        "error": { "kind": e.kind(), "message": e.to_string() }
    });
    warp::reply::with_status(warp::reply::json(&body), status)
}

/// Id format check happens before any store access.
fn parse_id(raw: &str) -> Result<TransactionId, TxError> {
    TransactionId::parse(raw).ok_or_else(|| TxError::InvalidId(raw.to_string()))
}

async fn get_transaction(
    raw_id: String,
    manager: Arc<TransactionManager>,
) -> Result<impl Reply, Rejection> {
    let outcome = parse_id(&raw_id)
        .and_then(|id| manager.status(&id))
        .and_then(|record| snapshot_body(&record));

    Ok(match outcome {
        Ok(body) => warp::reply::with_status(warp::reply::json(&body), StatusCode::OK),
        Err(e) => error_reply(&e),
    })
}

async fn cancel_transaction(
    raw_id: String,
    manager: Arc<TransactionManager>,
) -> Result<impl Reply, Rejection> {
    let outcome = parse_id(&raw_id).and_then(|id| match manager.cancel(&id) {
        Ok(true) => Ok(id),
        Ok(false) => Err(TxError::NotCancellable {
            id: id.clone(),
            status: manager
                .status(&id)
                .map(|record| record.status)
                .unwrap_or(crate::types::TransactionStatus::Cancelled),
        }),
        Err(e) => Err(e),
    });

    Ok(match outcome {
        Ok(id) => warp::reply::with_status(
            warp::reply::json(&json!({ "cancelled": true, "transaction_id": id })),
            StatusCode::OK,
        ),
        Err(e) => error_reply(&e),
    })
}

async fn stream_events(
    raw_id: String,
    manager: Arc<TransactionManager>,
    config: GatewayConfig,
) -> Result<Box<dyn Reply>, Rejection> {
    // Malformed ids are rejected before a subscription (or any store read)
    // exists, bounding the cost of junk requests.
    let id = match parse_id(&raw_id) {
        Ok(id) => id,
        Err(e) => return Ok(Box::new(error_reply(&e))),
    };

    let stream = sse_events(manager, config, id);
    let reply = warp::reply::with_header(
        warp::sse::reply(stream),
        "cache-control",
        "no-cache",
    );
    Ok(Box::new(reply))
}
