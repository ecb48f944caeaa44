//! Failure Tracker
//!
//! Remembers recently rejected rebalance attempts per (source, destination,
//! token) triple so the decision path does not resubmit a candidate the bridge
//! will reject again. A blocked triple becomes eligible once the balances on
//! either side have moved enough to change the outcome, or the record expires.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::chains::{ChainId, TokenSymbol};
use crate::snapshot::AggregateBalance;

/// How long a failed attempt keeps blocking retries.
pub const FAILED_ATTEMPT_EXPIRY: Duration = Duration::from_secs(30 * 60);

/// Relative balance change that makes a retry worthwhile.
pub const SIGNIFICANT_BALANCE_CHANGE: f64 = 0.10;

/// Why an attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FailureReason {
    /// Amount under the bridge's minimum deposit for the route
    AmountTooLow,
    /// Token not supported on the route
    UnsupportedToken,
    /// Any other failure (RPC error, reverted transaction, timeout, ...)
    Other(String),
}

impl FailureReason {
    /// Only persistent, amount/route-bound failures are tracked.
    pub fn is_tracked(&self) -> bool {
        matches!(self, FailureReason::AmountTooLow | FailureReason::UnsupportedToken)
    }
}

/// A rejected attempt and the balances it was made against.
#[derive(Debug, Clone, Serialize)]
pub struct FailedRebalanceAttempt {
    pub source_chain_id: ChainId,
    pub destination_chain_id: ChainId,
    pub token: TokenSymbol,
    #[serde(with = "crate::snapshot::u128_string")]
    pub amount: u128,
    pub timestamp: DateTime<Utc>,
    pub reason: FailureReason,
    /// Raw token balance on the source chain at failure time
    pub source_balance: Option<u128>,
    /// Raw token balance on the destination chain at failure time
    pub destination_balance: Option<u128>,
}

impl FailedRebalanceAttempt {
    fn matches(&self, source: ChainId, destination: ChainId, token: TokenSymbol) -> bool {
        self.source_chain_id == source
            && self.destination_chain_id == destination
            && self.token == token
    }
}

/// Owns the failed-attempt records.
pub struct FailureTracker {
    attempts: RwLock<Vec<FailedRebalanceAttempt>>,
    expiry: chrono::Duration,
}

impl FailureTracker {
    /// Creates a tracker with the default 30 minute expiry.
    pub fn new() -> Self {
        Self::with_expiry(FAILED_ATTEMPT_EXPIRY)
    }

    /// Creates a tracker with a custom expiry window.
    pub fn with_expiry(expiry: Duration) -> Self {
        Self {
            attempts: RwLock::new(Vec::new()),
            expiry: chrono::Duration::from_std(expiry).unwrap_or_else(|_| chrono::Duration::weeks(52)),
        }
    }

    /// Returns `true` when a recent tracked failure for this triple should
    /// block a retry against the current snapshot.
    ///
    /// A retry is allowed (returns `false`) when:
    /// - there is no tracked failure within the expiry window, or
    /// - either chain's token balance went from zero to non-zero, or
    /// - either chain's token balance changed by more than 10%.
    ///
    /// Missing balance data on either side blocks.
    pub async fn has_recent_failed_attempt(
        &self,
        source: ChainId,
        destination: ChainId,
        token: TokenSymbol,
        snapshot: &AggregateBalance,
    ) -> bool {
        let now = Utc::now();
        let attempts = self.attempts.read().await;

        let Some(latest) = attempts
            .iter()
            .filter(|a| a.reason.is_tracked())
            .filter(|a| a.matches(source, destination, token))
            .filter(|a| now - a.timestamp < self.expiry)
            .max_by_key(|a| a.timestamp)
        else {
            return false;
        };

        let current_source = snapshot.token_balance(source, token).map(|b| b.raw);
        let current_destination = snapshot.token_balance(destination, token).map(|b| b.raw);

        let (
            Some(recorded_source),
            Some(recorded_destination),
            Some(current_source),
            Some(current_destination),
        ) = (
            latest.source_balance,
            latest.destination_balance,
            current_source,
            current_destination,
        )
        else {
            debug!(
                "Blocking {} -> {} ({}): balance data missing",
                source, destination, token
            );
            return true;
        };

        if balance_changed_significantly(recorded_source, current_source)
            || balance_changed_significantly(recorded_destination, current_destination)
        {
            info!(
                "Balances moved since failed {} -> {} ({}) attempt ({:?}), allowing retry",
                source, destination, token, latest.reason
            );
            return false;
        }

        debug!(
            "Blocking {} -> {} ({}): {:?} at {} with unchanged balances",
            source, destination, token, latest.reason, latest.timestamp
        );
        true
    }

    /// Records a failed attempt with both chains' current token balances.
    ///
    /// Only tracked reasons are persisted. Expired entries are purged on write.
    pub async fn add_failed_attempt(
        &self,
        source: ChainId,
        destination: ChainId,
        token: TokenSymbol,
        amount: u128,
        reason: FailureReason,
        snapshot: &AggregateBalance,
    ) {
        if !reason.is_tracked() {
            debug!(
                "Not tracking {} -> {} ({}) failure: {:?}",
                source, destination, token, reason
            );
            return;
        }

        let attempt = FailedRebalanceAttempt {
            source_chain_id: source,
            destination_chain_id: destination,
            token,
            amount,
            timestamp: Utc::now(),
            reason,
            source_balance: snapshot.token_balance(source, token).map(|b| b.raw),
            destination_balance: snapshot.token_balance(destination, token).map(|b| b.raw),
        };

        info!(
            "Recorded failed rebalance attempt {} -> {} ({} {}): {:?}",
            source, destination, amount, token, attempt.reason
        );

        let mut attempts = self.attempts.write().await;
        let now = attempt.timestamp;
        attempts.retain(|a| now - a.timestamp < self.expiry);
        attempts.push(attempt);
    }

    /// Drops expired records. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut attempts = self.attempts.write().await;
        let before = attempts.len();
        attempts.retain(|a| now - a.timestamp < self.expiry);
        before - attempts.len()
    }

    /// Current records (for observers and tests).
    pub async fn attempts(&self) -> Vec<FailedRebalanceAttempt> {
        self.attempts.read().await.clone()
    }
}

impl Default for FailureTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Zero to non-zero, or a relative change above [`SIGNIFICANT_BALANCE_CHANGE`].
fn balance_changed_significantly(recorded: u128, current: u128) -> bool {
    if recorded == 0 {
        return current != 0;
    }
    let change = recorded.abs_diff(current) as f64 / recorded as f64;
    change > SIGNIFICANT_BALANCE_CHANGE
}
