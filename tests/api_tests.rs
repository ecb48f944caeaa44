//! Unit tests for the observer API
//!
//! Tests cover operation listing, single-operation lookup, the active config
//! endpoint, error normalization and the server-sent event stream.

#[path = "helpers.rs"]
mod test_helpers;
use test_helpers::create_scenario_rebalance_config;

use rebalancer::api::routes;
use rebalancer::config::ConfigHandle;
use rebalancer::{ApiState, ChainId, OperationStore, TokenSymbol};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use warp::http::StatusCode;
use warp::test::request;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn create_test_state() -> ApiState {
    ApiState {
        store: Arc::new(OperationStore::new()),
        config: ConfigHandle::new(create_scenario_rebalance_config()).unwrap(),
    }
}

async fn create_usdc_operation(store: &OperationStore) -> String {
    store
        .create(ChainId::Base, ChainId::Arbitrum, TokenSymbol::Usdc, 1_500_000_000, 1_500.0)
        .await
        .id
}

// ============================================================================
// OPERATIONS ENDPOINT TESTS
// ============================================================================

/// What is tested: GET /operations returns every operation in creation order
/// Why: Observers list the rebalance history
#[tokio::test]
async fn test_list_operations() {
    let state = create_test_state();
    let first = create_usdc_operation(&state.store).await;
    let second = create_usdc_operation(&state.store).await;
    state.store.mark_processing(&first).await.unwrap();

    let response = request()
        .method("GET")
        .path("/operations")
        .reply(&routes(state))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["success"], true);
    assert!(body["error"].is_null());

    let operations = body["data"].as_array().unwrap();
    assert_eq!(operations.len(), 2);
    assert_eq!(operations[0]["id"], first.as_str());
    assert_eq!(operations[0]["status"], "processing");
    assert_eq!(operations[1]["id"], second.as_str());
    assert_eq!(operations[1]["status"], "pending");
    assert_eq!(operations[1]["source_chain_id"], "base");
    assert_eq!(operations[1]["token"], "USDC");
    assert_eq!(operations[1]["amount"], "1500000000");
}

/// What is tested: GET /operations on an empty store returns an empty list
/// Why: An idle service must still answer
#[tokio::test]
async fn test_list_operations_empty() {
    let response = request()
        .method("GET")
        .path("/operations")
        .reply(&routes(create_test_state()))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["data"], serde_json::json!([]));
}

/// What is tested: GET /operations/{id} returns one operation
/// Why: Observers follow a single operation through its lifecycle
#[tokio::test]
async fn test_get_operation() {
    let state = create_test_state();
    let id = create_usdc_operation(&state.store).await;
    state.store.cancel_operation(&id, "operator request").await.unwrap();

    let response = request()
        .method("GET")
        .path(&format!("/operations/{}", id))
        .reply(&routes(state))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["data"]["id"], id.as_str());
    assert_eq!(body["data"]["status"], "cancelled");
    assert_eq!(body["data"]["error"], "operator request");
}

/// What is tested: GET /operations/{id} for an unknown id returns 404 with a JSON error
/// Why: Clients need a consistent error envelope
#[tokio::test]
async fn test_get_operation_not_found() {
    let response = request()
        .method("GET")
        .path("/operations/does-not-exist")
        .reply(&routes(create_test_state()))
        .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["success"], false);
    assert!(body["data"].is_null());
    assert!(body["error"].as_str().unwrap().contains("does-not-exist"));
}

// ============================================================================
// CONFIG ENDPOINT TESTS
// ============================================================================

/// What is tested: GET /config returns the active config and follows hot reloads
/// Why: Operators confirm which config is live
#[tokio::test]
async fn test_get_config_follows_reload() {
    let state = create_test_state();
    let config = state.config.clone();
    let filter = routes(state);

    let response = request().method("GET").path("/config").reply(&filter).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["data"]["global"]["cooldown_period_ms"], 60_000);
    assert_eq!(body["data"]["chains"]["arbitrum"]["target_percentage"], 90.0);

    let mut next = create_scenario_rebalance_config();
    next.global.enabled = false;
    config.replace(next).unwrap();

    let response = request().method("GET").path("/config").reply(&filter).await;
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["data"]["global"]["enabled"], false);
}

// ============================================================================
// ERROR HANDLING TESTS
// ============================================================================

/// What is tested: Unknown paths return 404 with the JSON error envelope
/// Why: Rejections are normalized for every route
#[tokio::test]
async fn test_unknown_path() {
    let response = request()
        .method("GET")
        .path("/unknown")
        .reply(&routes(create_test_state()))
        .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["success"], false);
}

/// What is tested: Non-GET methods on a known path are rejected
/// Why: The API is read-only
#[tokio::test]
async fn test_post_rejected() {
    let response = request()
        .method("POST")
        .path("/operations")
        .reply(&routes(create_test_state()))
        .await;

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

// ============================================================================
// EVENT STREAM TESTS
// ============================================================================

/// What is tested: GET /events streams operation events as named SSE events
/// Why: Push-based observers react to transitions without polling
#[tokio::test]
async fn test_event_stream() {
    let state = create_test_state();
    let store = state.store.clone();
    let (addr, server) = warp::serve(routes(state)).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);

    let mut response = reqwest::Client::new()
        .get(format!("http://{}/events", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let id = create_usdc_operation(&store).await;

    let received = tokio::time::timeout(Duration::from_secs(5), async {
        let mut received = String::new();
        while !received.contains(&id) {
            match response.chunk().await.unwrap() {
                Some(chunk) => received.push_str(&String::from_utf8_lossy(&chunk)),
                None => break,
            }
        }
        received
    })
    .await
    .expect("no event received");

    assert!(received.contains("event:created"), "unexpected stream: {}", received);
    assert!(received.contains("\"type\":\"created\""));
}
