//! Execution Adapter
//!
//! Thin adapter between the control loop and the bridging protocol. A
//! rebalance is a fee quote followed by a single deposit on the source chain;
//! fill confirmation on the destination chain is not awaited.
//!
//! The two network seams ([`FeeQuoter`], [`DepositSubmitter`]) and the
//! orchestrator-facing seam ([`RebalanceExecutor`]) are traits so tests can
//! substitute mocks.

pub mod api;
pub mod deposit;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use crate::chains::{ChainId, TokenSymbol};
use crate::config::RebalancerConfig;
use crate::error::{RebalanceError, Result};

pub use api::BridgeApiClient;
pub use deposit::JsonRpcDepositSubmitter;

// ============================================================================
// BRIDGE DATA STRUCTURES
// ============================================================================

/// Fee quote request for one route and amount.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeeQuoteRequest {
    pub origin_chain_id: ChainId,
    pub destination_chain_id: ChainId,
    pub token: TokenSymbol,
    /// Token address on the origin chain (wrapped address for the native asset)
    pub input_token: String,
    /// Token address on the destination chain
    pub output_token: String,
    #[serde(with = "crate::snapshot::u128_string")]
    pub amount: u128,
}

/// Fee quote as returned by the bridge, amounts in raw input-token units.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeeQuote {
    pub total_relay_fee: u128,
    pub min_deposit: u128,
    pub max_deposit: u128,
    pub exclusive_relayer: String,
    /// Quote timestamp (unix seconds), echoed into the deposit
    pub timestamp: u64,
    pub exclusivity_deadline: u64,
    pub estimated_fill_time_sec: Option<u64>,
}

/// Side-effect-free feasibility and cost summary of a rebalance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeeEstimate {
    pub source_chain_id: ChainId,
    pub destination_chain_id: ChainId,
    pub token: TokenSymbol,
    #[serde(with = "crate::snapshot::u128_string")]
    pub input_amount: u128,
    #[serde(with = "crate::snapshot::u128_string")]
    pub total_fee: u128,
    #[serde(with = "crate::snapshot::u128_string")]
    pub output_amount: u128,
    pub estimated_fill_time_sec: Option<u64>,
}

/// Everything the spoke pool's `depositV3` needs.
#[derive(Debug, Clone, PartialEq)]
pub struct DepositParams {
    pub origin_chain_id: ChainId,
    pub destination_chain_id: ChainId,
    pub depositor: String,
    pub recipient: String,
    pub input_token: String,
    pub output_token: String,
    pub input_amount: u128,
    pub output_amount: u128,
    pub exclusive_relayer: String,
    pub quote_timestamp: u32,
    pub fill_deadline: u32,
    pub exclusivity_deadline: u32,
    pub message: Vec<u8>,
    /// Native value attached to the transaction (non-zero only for the native asset)
    pub native_value: u128,
}

// ============================================================================
// SEAMS
// ============================================================================

/// Quotes bridge fees and deposit limits.
#[async_trait]
pub trait FeeQuoter: Send + Sync {
    async fn quote(&self, request: &FeeQuoteRequest) -> Result<FeeQuote>;
}

/// Submits a deposit on the origin chain and returns its transaction hash.
#[async_trait]
pub trait DepositSubmitter: Send + Sync {
    async fn submit(&self, params: &DepositParams) -> Result<String>;
}

/// What the orchestrator needs from an execution backend.
#[async_trait]
pub trait RebalanceExecutor: Send + Sync {
    /// Executes the move and returns the deposit transaction hash.
    async fn rebalance(
        &self,
        source: ChainId,
        destination: ChainId,
        token: TokenSymbol,
        amount: u128,
    ) -> Result<String>;

    /// Quotes the move and checks it against the bridge limits without
    /// submitting anything.
    async fn get_rebalance_fee_estimate(
        &self,
        source: ChainId,
        destination: ChainId,
        token: TokenSymbol,
        amount: u128,
    ) -> Result<FeeEstimate>;
}

// ============================================================================
// BRIDGE ADAPTER
// ============================================================================

/// Resolved addresses for one route.
#[derive(Debug, Clone, PartialEq)]
struct Route {
    input_token: String,
    output_token: String,
    native: bool,
}

/// [`RebalanceExecutor`] backed by a fee quoter and a deposit submitter.
pub struct BridgeAdapter {
    quoter: Arc<dyn FeeQuoter>,
    submitter: Arc<dyn DepositSubmitter>,
    tokens: BTreeMap<ChainId, BTreeMap<TokenSymbol, String>>,
    depositor: String,
    fill_deadline: Duration,
}

impl BridgeAdapter {
    /// Creates an adapter over explicit seams.
    pub fn new(
        config: &RebalancerConfig,
        quoter: Arc<dyn FeeQuoter>,
        submitter: Arc<dyn DepositSubmitter>,
    ) -> Self {
        Self {
            quoter,
            submitter,
            tokens: config.tokens.clone(),
            depositor: config.bridge.depositor.clone(),
            fill_deadline: Duration::from_secs(config.bridge.fill_deadline_secs),
        }
    }

    /// Creates an adapter talking to the configured bridge API and RPC endpoints.
    pub fn from_config(config: &RebalancerConfig) -> anyhow::Result<Self> {
        let quoter = BridgeApiClient::new(
            &config.bridge.api_url,
            Duration::from_millis(config.bridge.quote_timeout_ms),
        )?;
        let submitter = JsonRpcDepositSubmitter::new(&config.bridge)?;
        Ok(Self::new(config, Arc::new(quoter), Arc::new(submitter)))
    }

    /// Resolves the input and output token addresses of a route.
    ///
    /// The native asset quotes and deposits through the wrapped token's
    /// address on both sides. The deposit carries the amount as `msg.value`
    /// and the spoke pool wraps it, so no ERC-20 allowance is involved.
    fn resolve_route(
        &self,
        source: ChainId,
        destination: ChainId,
        token: TokenSymbol,
    ) -> Result<Route> {
        let registry_symbol = if token.is_native() {
            TokenSymbol::Weth
        } else {
            token
        };
        let address = |chain: ChainId| {
            self.tokens
                .get(&chain)
                .and_then(|t| t.get(&registry_symbol))
                .cloned()
                .ok_or(RebalanceError::UnsupportedToken { token, chain })
        };

        Ok(Route {
            input_token: address(source)?,
            output_token: address(destination)?,
            native: token.is_native(),
        })
    }

    /// Quotes a route and rejects amounts outside the deposit limits.
    async fn checked_quote(
        &self,
        source: ChainId,
        destination: ChainId,
        token: TokenSymbol,
        amount: u128,
    ) -> Result<(Route, FeeQuote)> {
        let route = self.resolve_route(source, destination, token)?;
        let request = FeeQuoteRequest {
            origin_chain_id: source,
            destination_chain_id: destination,
            token,
            input_token: route.input_token.clone(),
            output_token: route.output_token.clone(),
            amount,
        };

        let quote = self.quoter.quote(&request).await?;
        debug!(
            "Fee quote {} -> {} for {} {}: fee {}, limits [{}, {}]",
            source, destination, amount, token, quote.total_relay_fee, quote.min_deposit, quote.max_deposit
        );

        if amount < quote.min_deposit {
            return Err(RebalanceError::AmountTooLow {
                amount,
                min_deposit: Some(quote.min_deposit),
            });
        }
        if amount > quote.max_deposit {
            return Err(RebalanceError::AmountTooHigh {
                amount,
                max_deposit: quote.max_deposit,
            });
        }
        if quote.total_relay_fee >= amount {
            return Err(RebalanceError::AmountTooLow {
                amount,
                min_deposit: None,
            });
        }

        Ok((route, quote))
    }

    fn deposit_params(
        &self,
        source: ChainId,
        destination: ChainId,
        amount: u128,
        route: Route,
        quote: &FeeQuote,
    ) -> Result<DepositParams> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| RebalanceError::Submission(format!("System clock error: {}", e)))?;
        let to_u32 = |value: u64, field: &str| {
            u32::try_from(value)
                .map_err(|_| RebalanceError::Submission(format!("{} {} does not fit in uint32", field, value)))
        };

        Ok(DepositParams {
            origin_chain_id: source,
            destination_chain_id: destination,
            depositor: self.depositor.clone(),
            recipient: self.depositor.clone(),
            input_token: route.input_token,
            output_token: route.output_token,
            input_amount: amount,
            output_amount: amount - quote.total_relay_fee,
            exclusive_relayer: quote.exclusive_relayer.clone(),
            quote_timestamp: to_u32(quote.timestamp, "quoteTimestamp")?,
            fill_deadline: to_u32((now + self.fill_deadline).as_secs(), "fillDeadline")?,
            exclusivity_deadline: to_u32(quote.exclusivity_deadline, "exclusivityDeadline")?,
            message: Vec::new(),
            native_value: if route.native { amount } else { 0 },
        })
    }
}

#[async_trait]
impl RebalanceExecutor for BridgeAdapter {
    async fn rebalance(
        &self,
        source: ChainId,
        destination: ChainId,
        token: TokenSymbol,
        amount: u128,
    ) -> Result<String> {
        info!(
            "Bridging {} {} from {} to {}",
            amount, token, source, destination
        );

        let (route, quote) = self.checked_quote(source, destination, token, amount).await?;
        let params = self.deposit_params(source, destination, amount, route, &quote)?;
        let tx_hash = self.submitter.submit(&params).await.map_err(|e| {
            warn!("Deposit on {} failed: {}", source, e);
            e
        })?;

        info!(
            "Submitted deposit {} -> {}: {} {} in, {} out, tx {}",
            source, destination, params.input_amount, token, params.output_amount, tx_hash
        );
        Ok(tx_hash)
    }

    async fn get_rebalance_fee_estimate(
        &self,
        source: ChainId,
        destination: ChainId,
        token: TokenSymbol,
        amount: u128,
    ) -> Result<FeeEstimate> {
        let (_, quote) = self.checked_quote(source, destination, token, amount).await?;
        Ok(FeeEstimate {
            source_chain_id: source,
            destination_chain_id: destination,
            token,
            input_amount: amount,
            total_fee: quote.total_relay_fee,
            output_amount: amount - quote.total_relay_fee,
            estimated_fill_time_sec: quote.estimated_fill_time_sec,
        })
    }
}
