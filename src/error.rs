//! Rebalancer Error Types
//!
//! A single error enum covers every failure the control loop can observe.
//! `failure_reason()` maps an error onto the categories the failure tracker
//! understands, so callers never match on message strings.

use thiserror::Error;

use crate::chains::{ChainId, TokenSymbol};
use crate::failures::FailureReason;
use crate::store::OperationStatus;

/// Errors raised by rebalancer components.
#[derive(Debug, Error)]
pub enum RebalanceError {
    /// Configuration violates an invariant; never partially applied
    #[error("Invalid rebalance configuration: {0}")]
    ConfigInvalid(String),

    /// Requested amount is below the bridge's minimum deposit for the route.
    /// `min_deposit` is unset when the bridge rejected without reporting limits.
    #[error("AMOUNT_TOO_LOW: amount {amount} is below the minimum deposit{}", describe_limit(.min_deposit))]
    AmountTooLow {
        amount: u128,
        min_deposit: Option<u128>,
    },

    /// Requested amount is above the bridge's maximum deposit for the route
    #[error("AMOUNT_TOO_HIGH: amount {amount} is above the maximum deposit {max_deposit}")]
    AmountTooHigh { amount: u128, max_deposit: u128 },

    /// Token has no address on the chain or is not supported by the bridge route
    #[error("UNSUPPORTED_TOKEN: {token} is not supported on {chain}")]
    UnsupportedToken { token: TokenSymbol, chain: ChainId },

    /// No price could be derived for a token on a chain
    #[error("No price available for {token} on {chain}")]
    PriceUnavailable { token: TokenSymbol, chain: ChainId },

    /// The fee quote did not arrive in time (transient)
    #[error("Fee quote timed out after {0}ms")]
    QuoteTimeout(u64),

    /// Fee quote request failed or returned an unusable payload
    #[error("Fee quote failed: {0}")]
    Quote(String),

    /// Deposit submission failed (RPC error, reverted transaction, ...)
    #[error("Deposit submission failed: {0}")]
    Submission(String),

    #[error("Operation {0} not found")]
    OperationNotFound(String),

    /// State machine violation
    #[error("Illegal transition for operation {id}: {from:?} -> {to:?}")]
    IllegalTransition {
        id: String,
        from: OperationStatus,
        to: OperationStatus,
    },
}

impl RebalanceError {
    /// Classifies the error for the failure tracker.
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            RebalanceError::AmountTooLow { .. } => FailureReason::AmountTooLow,
            RebalanceError::UnsupportedToken { .. } => FailureReason::UnsupportedToken,
            other => FailureReason::Other(other.to_string()),
        }
    }

    /// Whether the error is a protocol-bound rejection of the candidate itself
    /// (as opposed to an execution or infrastructure failure).
    pub fn is_feasibility_rejection(&self) -> bool {
        matches!(
            self,
            RebalanceError::AmountTooLow { .. }
                | RebalanceError::AmountTooHigh { .. }
                | RebalanceError::UnsupportedToken { .. }
        )
    }
}

fn describe_limit(limit: &Option<u128>) -> String {
    limit.map(|l| format!(" {}", l)).unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, RebalanceError>;
