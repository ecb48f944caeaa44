//! Solver fund rebalancer
//!
//! Keeps the solver's cross-chain liquidity near operator-configured target
//! allocations: analyzes balance snapshots, picks one move per cycle, gates it
//! on recent failures, and executes it as a bridge deposit.

pub mod analyzer;
pub mod api;
pub mod bridge;
pub mod chains;
pub mod config;
pub mod decision;
pub mod error;
pub mod failures;
pub mod service;
pub mod snapshot;
pub mod store;

// Re-export public types for convenience
pub use analyzer::{AvailableToken, BalanceAnalysis, BalanceAnalyzer, Deficit, Surplus};
pub use api::{ApiResponse, ApiState};
pub use bridge::{
    BridgeAdapter, BridgeApiClient, DepositParams, DepositSubmitter, FeeEstimate, FeeQuote,
    FeeQuoteRequest, FeeQuoter, JsonRpcDepositSubmitter, RebalanceExecutor,
};
pub use chains::{ChainId, TokenSymbol};
pub use config::{
    ChainConfig, ConfigHandle, GlobalRebalanceConfig, RebalanceConfig, RebalancerConfig,
    TokenConfig,
};
pub use decision::{DecisionMaker, RebalanceDecision};
pub use error::RebalanceError;
pub use failures::{FailedRebalanceAttempt, FailureReason, FailureTracker};
pub use service::{RebalanceOrchestrator, SnapshotOutcome, TickOutcome};
pub use snapshot::{AggregateBalance, ChainBalance, SnapshotPoller, SnapshotPublisher, TokenBalance};
pub use store::{OperationEvent, OperationStatus, OperationStore, RebalanceOperation};
