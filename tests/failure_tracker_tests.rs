//! Unit tests for the FailureTracker
//!
//! Tests cover blocking with unchanged balances, retry after significant
//! balance changes, expiry, and which failure reasons are tracked.

#[path = "helpers.rs"]
mod test_helpers;
use test_helpers::{create_scenario_snapshot, create_scenario_snapshot_with, create_snapshot, usdc};

use rebalancer::{ChainId, FailureReason, FailureTracker, TokenSymbol};
use std::time::Duration;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

async fn record_amount_too_low(tracker: &FailureTracker, snapshot: &rebalancer::AggregateBalance) {
    tracker
        .add_failed_attempt(
            ChainId::Base,
            ChainId::Arbitrum,
            TokenSymbol::Usdc,
            1_000_000,
            FailureReason::AmountTooLow,
            snapshot,
        )
        .await;
}

// ============================================================================
// BLOCKING TESTS
// ============================================================================

/// What is tested: A recent AMOUNT_TOO_LOW failure blocks the same triple while balances are unchanged
/// Why: Resubmitting would be rejected again by the bridge
#[tokio::test]
async fn test_blocks_with_unchanged_balances() {
    let tracker = FailureTracker::new();
    let snapshot = create_scenario_snapshot();
    record_amount_too_low(&tracker, &snapshot).await;

    assert!(
        tracker
            .has_recent_failed_attempt(ChainId::Base, ChainId::Arbitrum, TokenSymbol::Usdc, &snapshot)
            .await
    );
}

/// What is tested: Other triples are not blocked
/// Why: A failure is specific to (source, destination, token)
#[tokio::test]
async fn test_other_triples_not_blocked() {
    let tracker = FailureTracker::new();
    let snapshot = create_scenario_snapshot();
    record_amount_too_low(&tracker, &snapshot).await;

    assert!(
        !tracker
            .has_recent_failed_attempt(ChainId::Arbitrum, ChainId::Base, TokenSymbol::Usdc, &snapshot)
            .await
    );
    assert!(
        !tracker
            .has_recent_failed_attempt(ChainId::Base, ChainId::Arbitrum, TokenSymbol::Weth, &snapshot)
            .await
    );
}

/// What is tested: A change of exactly 10% still blocks; just over 10% allows a retry
/// Why: Only significant balance movement can change the bridge's answer
#[tokio::test]
async fn test_significant_change_allows_retry() {
    let tracker = FailureTracker::new();
    record_amount_too_low(&tracker, &create_scenario_snapshot_with(1_000.0, 1_000.0)).await;

    let exactly_ten = create_scenario_snapshot_with(1_100.0, 1_000.0);
    assert!(
        tracker
            .has_recent_failed_attempt(ChainId::Base, ChainId::Arbitrum, TokenSymbol::Usdc, &exactly_ten)
            .await
    );

    let over_ten = create_scenario_snapshot_with(1_000.0, 1_200.0);
    assert!(
        !tracker
            .has_recent_failed_attempt(ChainId::Base, ChainId::Arbitrum, TokenSymbol::Usdc, &over_ten)
            .await
    );
}

/// What is tested: A balance going from zero to non-zero allows a retry
/// Why: A relative change from zero is undefined but clearly significant
#[tokio::test]
async fn test_zero_to_nonzero_allows_retry() {
    let tracker = FailureTracker::new();
    let before = create_snapshot(vec![
        (ChainId::Base, vec![(TokenSymbol::Usdc, usdc(5_000.0))]),
        (ChainId::Arbitrum, vec![(TokenSymbol::Usdc, usdc(0.0))]),
    ]);
    record_amount_too_low(&tracker, &before).await;
    assert!(
        tracker
            .has_recent_failed_attempt(ChainId::Base, ChainId::Arbitrum, TokenSymbol::Usdc, &before)
            .await
    );

    let after = create_scenario_snapshot_with(5_000.0, 1.0);
    assert!(
        !tracker
            .has_recent_failed_attempt(ChainId::Base, ChainId::Arbitrum, TokenSymbol::Usdc, &after)
            .await
    );
}

/// What is tested: Missing balance data on either side blocks
/// Why: Without data a retry cannot be justified
#[tokio::test]
async fn test_missing_balance_data_blocks() {
    let tracker = FailureTracker::new();
    record_amount_too_low(&tracker, &create_scenario_snapshot()).await;

    let source_only = create_snapshot(vec![(ChainId::Base, vec![(TokenSymbol::Usdc, usdc(9_000.0))])]);
    assert!(
        tracker
            .has_recent_failed_attempt(ChainId::Base, ChainId::Arbitrum, TokenSymbol::Usdc, &source_only)
            .await
    );
}

// ============================================================================
// TRACKED REASONS TESTS
// ============================================================================

/// What is tested: Non-amount, non-route failures are not recorded
/// Why: Transient errors (RPC, reverts) should not block future attempts
#[tokio::test]
async fn test_untracked_reason_not_recorded() {
    let tracker = FailureTracker::new();
    let snapshot = create_scenario_snapshot();
    tracker
        .add_failed_attempt(
            ChainId::Base,
            ChainId::Arbitrum,
            TokenSymbol::Usdc,
            1_000_000,
            FailureReason::Other("execution reverted".to_string()),
            &snapshot,
        )
        .await;

    assert!(tracker.attempts().await.is_empty());
    assert!(
        !tracker
            .has_recent_failed_attempt(ChainId::Base, ChainId::Arbitrum, TokenSymbol::Usdc, &snapshot)
            .await
    );
}

/// What is tested: UNSUPPORTED_TOKEN failures are recorded with both balances
/// Why: Route rejections are as persistent as amount rejections
#[tokio::test]
async fn test_unsupported_token_recorded() {
    let tracker = FailureTracker::new();
    let snapshot = create_scenario_snapshot();
    tracker
        .add_failed_attempt(
            ChainId::Base,
            ChainId::Arbitrum,
            TokenSymbol::Usdc,
            42,
            FailureReason::UnsupportedToken,
            &snapshot,
        )
        .await;

    let attempts = tracker.attempts().await;
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].reason, FailureReason::UnsupportedToken);
    assert_eq!(attempts[0].source_balance, Some(6_000_000_000));
    assert_eq!(attempts[0].destination_balance, Some(4_000_000_000));
}

// ============================================================================
// EXPIRY TESTS
// ============================================================================

/// What is tested: Records stop blocking after the expiry window and are purged
/// Why: A rejection is only evidence for a bounded time
#[tokio::test]
async fn test_expired_attempt_no_longer_blocks() {
    let tracker = FailureTracker::with_expiry(Duration::from_millis(50));
    let snapshot = create_scenario_snapshot();
    record_amount_too_low(&tracker, &snapshot).await;

    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(
        !tracker
            .has_recent_failed_attempt(ChainId::Base, ChainId::Arbitrum, TokenSymbol::Usdc, &snapshot)
            .await
    );
    assert_eq!(tracker.purge_expired().await, 1);
    assert!(tracker.attempts().await.is_empty());
}
