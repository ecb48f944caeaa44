//! Rebalancer HTTP API
//!
//! Read-only observer endpoints: operation records, the active rebalance
//! config, and a server-sent event stream of operation transitions.

use crate::config::ConfigHandle;
use crate::store::{OperationEvent, OperationStore};
use serde::Serialize;
use std::convert::Infallible;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::info;
use warp::http::StatusCode;
use warp::Filter;

/// Standard API response wrapper.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Shared state behind the API.
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<OperationStore>,
    pub config: ConfigHandle,
}

/// Builds the API routes.
///
/// - `GET /operations` - all operations, oldest first
/// - `GET /operations/{id}` - one operation
/// - `GET /config` - the active rebalance config
/// - `GET /events` - server-sent `OperationEvent`s
pub fn routes(
    state: ApiState,
) -> impl Filter<Extract = (impl warp::Reply,), Error = Infallible> + Clone {
    let store = state.store.clone();
    let store_filter = warp::any().map(move || store.clone());
    let config = state.config.clone();
    let config_filter = warp::any().map(move || config.clone());

    let operations = warp::path("operations")
        .and(warp::path::end())
        .and(warp::get())
        .and(store_filter.clone())
        .and_then(list_operations_handler);

    let operation = warp::path!("operations" / String)
        .and(warp::get())
        .and(store_filter.clone())
        .and_then(get_operation_handler);

    let active_config = warp::path("config")
        .and(warp::path::end())
        .and(warp::get())
        .and(config_filter)
        .and_then(get_config_handler);

    let events = warp::path("events")
        .and(warp::path::end())
        .and(warp::get())
        .and(store_filter)
        .map(events_handler);

    operations
        .or(operation)
        .or(active_config)
        .or(events)
        .recover(handle_rejection)
}

/// Start the observer API server.
///
/// # Arguments
///
/// * `state` - Store and config handle to expose
/// * `host` - Bind host
/// * `port` - Bind port
/// * `shutdown` - Resolves when the server should stop accepting connections
pub async fn run_api_server(
    state: ApiState,
    host: String,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) {
    // Fall back to loopback if host parsing fails.
    let ip: IpAddr = host
        .parse()
        .unwrap_or(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)));
    let (addr, server) = warp::serve(routes(state)).bind_with_graceful_shutdown((ip, port), shutdown);
    info!("Rebalancer API listening on http://{}", addr);
    server.await;
}

async fn list_operations_handler(
    store: Arc<OperationStore>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let operations = store.get_operations().await;
    Ok(warp::reply::json(&ApiResponse::ok(operations)))
}

async fn get_operation_handler(
    id: String,
    store: Arc<OperationStore>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let reply = match store.get_operation(&id).await {
        Some(operation) => warp::reply::with_status(
            warp::reply::json(&ApiResponse::ok(operation)),
            StatusCode::OK,
        ),
        None => warp::reply::with_status(
            warp::reply::json(&ApiResponse::err(format!("Operation {} not found", id))),
            StatusCode::NOT_FOUND,
        ),
    };
    Ok(reply)
}

async fn get_config_handler(config: ConfigHandle) -> Result<impl warp::Reply, warp::Rejection> {
    let current = config.current();
    Ok(warp::reply::json(&ApiResponse::ok(current.as_ref())))
}

/// Streams operation events; lagging clients skip what they missed.
fn events_handler(store: Arc<OperationStore>) -> impl warp::Reply {
    let events = BroadcastStream::new(store.subscribe()).filter_map(|event| {
        let event: OperationEvent = event.ok()?;
        warp::sse::Event::default()
            .event(event.kind())
            .json_data(&event)
            .ok()
            .map(Ok::<_, Infallible>)
    });
    warp::sse::reply(warp::sse::keep_alive().stream(events))
}

/// Normalize rejections into a consistent JSON error response.
async fn handle_rejection(err: warp::Rejection) -> Result<impl warp::Reply, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&ApiResponse::err(message)),
        status,
    ))
}
