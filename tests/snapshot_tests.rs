//! Unit tests for the balance snapshot feed
//!
//! Tests cover fetching snapshots from the aggregator and most-recent-wins
//! publication.

#[path = "helpers.rs"]
mod test_helpers;
use test_helpers::{create_scenario_snapshot, create_scenario_snapshot_with};

use rebalancer::{ChainId, SnapshotPoller, SnapshotPublisher, TokenSymbol};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// POLLER TESTS
// ============================================================================

/// What is tested: fetch() parses an aggregate balance document with string raw amounts
/// Why: Raw amounts exceed the JSON number range and arrive as strings
#[tokio::test]
async fn test_fetch_snapshot() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/balances/aggregate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "chains": {
                "base": {
                    "tokens": {
                        "USDC": {"raw": "6000000000", "decimals": 6, "usd_value": 6000.0},
                        "ETH": {"raw": "1000000000000000000", "decimals": 18, "usd_value": 2000.0}
                    },
                    "total_usd": 8000.0,
                    "percentage_of_total": 80.0
                },
                "arbitrum": {
                    "tokens": {
                        "USDC": {"raw": 2000000000u64, "decimals": 6, "usd_value": 2000.0}
                    },
                    "total_usd": 2000.0,
                    "percentage_of_total": 20.0
                }
            },
            "token_totals": {
                "USDC": {"raw": "8000000000", "usd_value": 8000.0},
                "ETH": {"raw": "1000000000000000000", "usd_value": 2000.0}
            },
            "total_balance": 10000.0,
            "last_updated": "2026-01-01T00:00:00Z"
        })))
        .mount(&server)
        .await;

    let poller = SnapshotPoller::new(
        format!("{}/balances/aggregate", server.uri()),
        Duration::from_secs(1),
    )
    .unwrap();
    let snapshot = poller.fetch().await.unwrap();

    assert_eq!(snapshot.total_balance, 10_000.0);
    assert_eq!(snapshot.chains[&ChainId::Base].percentage_of_total, 80.0);
    assert_eq!(
        snapshot.token_balance(ChainId::Base, TokenSymbol::Eth).unwrap().raw,
        1_000_000_000_000_000_000
    );
    assert_eq!(
        snapshot.token_balance(ChainId::Arbitrum, TokenSymbol::Usdc).unwrap().raw,
        2_000_000_000
    );
    assert!(snapshot.token_balance(ChainId::Optimism, TokenSymbol::Usdc).is_none());
}

/// What is tested: fetch() fails on an error status
/// Why: A failed poll must not publish a bogus snapshot
#[tokio::test]
async fn test_fetch_snapshot_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let poller = SnapshotPoller::new(server.uri(), Duration::from_secs(1)).unwrap();
    let err = poller.fetch().await.unwrap_err();
    assert!(format!("{:#}", err).contains("error status"));
}

/// What is tested: run() publishes fetched snapshots to subscribers
/// Why: The orchestrator consumes snapshots through the feed
#[tokio::test]
async fn test_poller_publishes() {
    let server = MockServer::start().await;
    let snapshot = create_scenario_snapshot();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&snapshot))
        .mount(&server)
        .await;

    let publisher = SnapshotPublisher::new();
    let mut feed = publisher.subscribe();
    let poller = SnapshotPoller::new(server.uri(), Duration::from_millis(50)).unwrap();
    let task_publisher = publisher.clone();
    let task = tokio::spawn(async move { poller.run(task_publisher).await });

    tokio::time::timeout(Duration::from_secs(5), feed.changed())
        .await
        .expect("no snapshot published")
        .unwrap();
    let published = feed.borrow_and_update().clone().unwrap();
    assert_eq!(published.total_balance, snapshot.total_balance);
    assert_eq!(
        published.token_balance(ChainId::Base, TokenSymbol::Usdc).unwrap().raw,
        6_000_000_000
    );

    task.abort();
}

// ============================================================================
// PUBLISHER TESTS
// ============================================================================

/// What is tested: Only the latest snapshot is visible after several publishes
/// Why: Snapshots are most-recent-wins; stale ones are never processed
#[tokio::test]
async fn test_publisher_most_recent_wins() {
    let publisher = SnapshotPublisher::new();
    let mut feed = publisher.subscribe();
    assert!(publisher.latest().is_none());

    publisher.publish(create_scenario_snapshot_with(1_000.0, 1_000.0));
    publisher.publish(create_scenario_snapshot_with(3_000.0, 1_000.0));

    feed.changed().await.unwrap();
    let seen = feed.borrow_and_update().clone().unwrap();
    assert_eq!(seen.total_balance, 4_000.0);
    assert_eq!(publisher.latest().unwrap().total_balance, 4_000.0);
    assert!(!feed.has_changed().unwrap());
}
