//! Configuration Management Module
//!
//! This module handles loading and managing configuration for the rebalancer service.
//! Configuration includes service timing, bridge connection settings, the token
//! address registry, and the hot-reloadable rebalance targets.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;

use crate::chains::{ChainId, TokenSymbol};
use crate::error::RebalanceError;

/// Allowed deviation of the chain target percentage sum from 100.
pub const TARGET_SUM_TOLERANCE: f64 = 0.1;

// ============================================================================
// CONFIGURATION STRUCTURES
// ============================================================================

/// Main configuration structure containing all rebalancer service settings.
///
/// This structure holds configuration for:
/// - Service loop timing and the observer API
/// - Bridge API and deposit submission settings
/// - ERC-20 token addresses per chain
/// - Rebalance targets (the only section that is hot-reloaded)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalancerConfig {
    /// Service configuration (tick interval, balance source, API bind address)
    pub service: ServiceConfig,
    /// Bridge configuration (fee API, spoke pools, RPC endpoints)
    pub bridge: BridgeConfig,
    /// ERC-20 token addresses keyed by chain, then symbol (use `[tokens.base]` in TOML)
    #[serde(default)]
    pub tokens: BTreeMap<ChainId, BTreeMap<TokenSymbol, String>>,
    /// Rebalance targets, thresholds and global bounds
    pub rebalance: RebalanceConfig,
}

/// Service-level configuration for the rebalancer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Interval of the execution tick in milliseconds
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// How long terminal operations are retained before being purged
    #[serde(default = "default_operation_retention_ms")]
    pub operation_retention_ms: u64,
    /// Balance aggregator endpoint serving the latest aggregate balance snapshot
    pub balance_source_url: String,
    /// Polling interval for the balance aggregator in milliseconds
    #[serde(default = "default_balance_poll_interval_ms")]
    pub balance_poll_interval_ms: u64,
    /// Observer API host
    #[serde(default = "default_api_host")]
    pub api_host: String,
    /// Observer API port
    #[serde(default = "default_api_port")]
    pub api_port: u16,
}

/// Bridging protocol configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Bridge REST API base URL (e.g., "https://app.across.to/api")
    pub api_url: String,
    /// Timeout for a single fee quote request in milliseconds
    #[serde(default = "default_quote_timeout_ms")]
    pub quote_timeout_ms: u64,
    /// Fill deadline horizon added to the current time for each deposit
    #[serde(default = "default_fill_deadline_secs")]
    pub fill_deadline_secs: u64,
    /// Solver address that deposits on the source chain and receives on the destination
    pub depositor: String,
    /// Spoke pool contract address per chain
    pub spoke_pools: BTreeMap<ChainId, String>,
    /// Signer-enabled JSON-RPC endpoint per chain
    pub rpc_urls: BTreeMap<ChainId, String>,
}

/// Rebalance targets and bounds.
///
/// Replaced atomically on hot-reload (see [`ConfigHandle`]); components receive
/// it explicitly on every call and never hold on to a stale copy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RebalanceConfig {
    pub global: GlobalRebalanceConfig,
    pub chains: BTreeMap<ChainId, ChainConfig>,
}

/// Global switches and bounds applied to every rebalance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GlobalRebalanceConfig {
    pub enabled: bool,
    /// Smallest move worth making, in USD
    pub min_rebalance_usd_value: f64,
    /// Largest single move, in USD
    pub max_rebalance_usd_value: f64,
    /// Minimum spacing between operations
    pub cooldown_period_ms: u64,
}

/// Per-chain allocation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChainConfig {
    /// Desired share of total USD value held on this chain
    pub target_percentage: f64,
    /// Share below which the chain counts as a deficit
    pub trigger_threshold: f64,
    /// 0 = never a source; lower values are preferred
    pub source_priority: u32,
    pub can_be_destination: bool,
    pub tokens: BTreeMap<TokenSymbol, TokenConfig>,
}

/// Per-token settings on a chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenConfig {
    pub enabled: bool,
    /// Tie-break among surplus tokens, higher wins
    #[serde(default)]
    pub priority: u32,
    /// Falls back to the chain's target when unset
    #[serde(default)]
    pub target_percentage: Option<f64>,
    /// Falls back to the chain's threshold when unset
    #[serde(default)]
    pub trigger_threshold: Option<f64>,
}

impl ChainConfig {
    /// Target percentage of a token on this chain (token value or chain fallback).
    pub fn token_target(&self, token: TokenSymbol) -> f64 {
        self.tokens
            .get(&token)
            .and_then(|t| t.target_percentage)
            .unwrap_or(self.target_percentage)
    }

    /// Trigger threshold of a token on this chain (token value or chain fallback).
    pub fn token_threshold(&self, token: TokenSymbol) -> f64 {
        self.tokens
            .get(&token)
            .and_then(|t| t.trigger_threshold)
            .unwrap_or(self.trigger_threshold)
    }

    /// Whether the token is configured and enabled on this chain.
    pub fn token_enabled(&self, token: TokenSymbol) -> bool {
        self.tokens.get(&token).map(|t| t.enabled).unwrap_or(false)
    }
}

fn default_tick_interval_ms() -> u64 {
    30_000
}

fn default_operation_retention_ms() -> u64 {
    24 * 60 * 60 * 1000
}

fn default_balance_poll_interval_ms() -> u64 {
    5_000
}

fn default_api_host() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    4455
}

fn default_quote_timeout_ms() -> u64 {
    10_000
}

fn default_fill_deadline_secs() -> u64 {
    5 * 60 * 60
}

// ============================================================================
// LOADING AND VALIDATION
// ============================================================================

impl RebalancerConfig {
    /// Loads configuration from a TOML file.
    ///
    /// Uses the provided path, or the `REBALANCER_CONFIG_PATH` env var, or
    /// `config/rebalancer.toml`. The configuration is validated before it is
    /// returned.
    ///
    /// # Arguments
    ///
    /// * `path` - Optional path to config file
    ///
    /// # Returns
    ///
    /// * `Ok(RebalancerConfig)` - Successfully loaded and validated configuration
    /// * `Err(anyhow::Error)` - File missing, unparsable, or invalid
    pub fn load_from_path(path: Option<&str>) -> anyhow::Result<Self> {
        let config_path = path
            .map(|p| p.to_string())
            .or_else(|| std::env::var("REBALANCER_CONFIG_PATH").ok())
            .unwrap_or_else(|| "config/rebalancer.toml".to_string());

        if std::path::Path::new(&config_path).exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config = Self::from_toml_str(&content)?;
            Ok(config)
        } else {
            Err(anyhow::anyhow!(
                "Configuration file '{}' not found. Please copy the template:\n\
                cp config/rebalancer.template.toml config/rebalancer.toml\n\
                Then edit config/rebalancer.toml with your actual values.",
                config_path
            ))
        }
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: RebalancerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for consistency and correctness.
    ///
    /// Checks:
    /// - Rebalance targets (see [`RebalanceConfig::validate`])
    /// - Tick, poll and quote intervals are non-zero
    /// - Depositor and contract addresses are 20-byte hex
    /// - Every chain has a spoke pool and an RPC endpoint
    /// - Every enabled ERC-20 token has an address on its chain
    pub fn validate(&self) -> anyhow::Result<()> {
        self.rebalance.validate()?;

        let intervals = [
            ("service.tick_interval_ms", self.service.tick_interval_ms),
            ("service.balance_poll_interval_ms", self.service.balance_poll_interval_ms),
            ("bridge.quote_timeout_ms", self.bridge.quote_timeout_ms),
        ];
        for (field, value) in intervals {
            if value == 0 {
                anyhow::bail!("Configuration error: {} must be greater than zero", field);
            }
        }

        validate_hex_address(&self.bridge.depositor)
            .map_err(|e| anyhow::anyhow!("Invalid bridge.depositor: {}", e))?;

        for chain in ChainId::ALL {
            let spoke_pool = self.bridge.spoke_pools.get(&chain).ok_or_else(|| {
                anyhow::anyhow!("Configuration error: No spoke pool configured for {}", chain)
            })?;
            validate_hex_address(spoke_pool)
                .map_err(|e| anyhow::anyhow!("Invalid spoke pool for {}: {}", chain, e))?;

            if !self.bridge.rpc_urls.contains_key(&chain) {
                anyhow::bail!("Configuration error: No RPC URL configured for {}", chain);
            }

            let chain_config = &self.rebalance.chains[&chain];
            for token in TokenSymbol::ALL {
                if token.is_native() || !chain_config.token_enabled(token) {
                    continue;
                }
                let address = self.token_address(chain, token).ok_or_else(|| {
                    anyhow::anyhow!(
                        "Configuration error: {} is enabled on {} but has no address in [tokens.{}]",
                        token,
                        chain,
                        chain.name()
                    )
                })?;
                validate_hex_address(address)
                    .map_err(|e| anyhow::anyhow!("Invalid {} address on {}: {}", token, chain, e))?;
            }
        }

        Ok(())
    }

    /// ERC-20 address of a token on a chain, if configured.
    pub fn token_address(&self, chain: ChainId, token: TokenSymbol) -> Option<&str> {
        self.tokens
            .get(&chain)
            .and_then(|tokens| tokens.get(&token))
            .map(String::as_str)
    }
}

impl RebalanceConfig {
    /// Validates the rebalance targets.
    ///
    /// Checks:
    /// - Every supported chain is present
    /// - Chain target percentages sum to 100 (within 0.1)
    /// - At least one chain can be a destination
    /// - Every chain enumerates the full token set
    /// - Percentages and thresholds lie within [0, 100]
    /// - USD bounds are finite, non-negative and ordered
    pub fn validate(&self) -> Result<(), RebalanceError> {
        let invalid = |msg: String| Err(RebalanceError::ConfigInvalid(msg));

        for chain in ChainId::ALL {
            if !self.chains.contains_key(&chain) {
                return invalid(format!("Chain {} is missing from rebalance.chains", chain));
            }
        }

        let target_sum: f64 = self.chains.values().map(|c| c.target_percentage).sum();
        if (target_sum - 100.0).abs() > TARGET_SUM_TOLERANCE {
            return invalid(format!(
                "Chain target percentages sum to {:.3}, expected 100",
                target_sum
            ));
        }

        if !self.chains.values().any(|c| c.can_be_destination) {
            return invalid("At least one chain must have can_be_destination = true".to_string());
        }

        for (chain, chain_config) in &self.chains {
            check_percentage(chain_config.target_percentage, "target_percentage", *chain)?;
            check_percentage(chain_config.trigger_threshold, "trigger_threshold", *chain)?;

            for token in TokenSymbol::ALL {
                let Some(token_config) = chain_config.tokens.get(&token) else {
                    return invalid(format!("Chain {} does not configure token {}", chain, token));
                };
                if let Some(target) = token_config.target_percentage {
                    check_percentage(target, "token target_percentage", *chain)?;
                }
                if let Some(threshold) = token_config.trigger_threshold {
                    check_percentage(threshold, "token trigger_threshold", *chain)?;
                }
            }
        }

        let global = &self.global;
        if !global.min_rebalance_usd_value.is_finite() || !global.max_rebalance_usd_value.is_finite()
        {
            return invalid("USD bounds must be finite".to_string());
        }
        if global.min_rebalance_usd_value < 0.0 || global.max_rebalance_usd_value < 0.0 {
            return invalid("USD bounds must be non-negative".to_string());
        }
        if global.min_rebalance_usd_value > global.max_rebalance_usd_value {
            return invalid(format!(
                "min_rebalance_usd_value {} exceeds max_rebalance_usd_value {}",
                global.min_rebalance_usd_value, global.max_rebalance_usd_value
            ));
        }

        Ok(())
    }
}

fn check_percentage(value: f64, field: &str, chain: ChainId) -> Result<(), RebalanceError> {
    if !value.is_finite() || !(0.0..=100.0).contains(&value) {
        return Err(RebalanceError::ConfigInvalid(format!(
            "{} {} on {} must be within [0, 100]",
            field, value, chain
        )));
    }
    Ok(())
}

/// Validates a `0x`-prefixed 20-byte hex address.
///
/// # Returns
///
/// - `Ok(())` - Address format is valid
/// - `Err(anyhow::Error)` - Missing prefix, bad hex, or wrong length
fn validate_hex_address(address: &str) -> anyhow::Result<()> {
    let stripped = address
        .strip_prefix("0x")
        .ok_or_else(|| anyhow::anyhow!("Address must be 0x-prefixed hex string"))?;
    let bytes = hex::decode(stripped).map_err(|_| anyhow::anyhow!("Invalid hex address"))?;
    if bytes.len() != 20 {
        anyhow::bail!("Invalid address length: expected 20 bytes, got {}", bytes.len());
    }
    Ok(())
}

// ============================================================================
// HOT RELOAD
// ============================================================================

/// Shared, atomically replaceable handle to the active [`RebalanceConfig`].
///
/// Readers take an `Arc` snapshot via [`ConfigHandle::current`] and use it for
/// a whole analysis pass; a concurrent [`ConfigHandle::replace`] swaps the
/// pointer and never mutates a config a reader still holds.
#[derive(Clone)]
pub struct ConfigHandle {
    sender: Arc<watch::Sender<Arc<RebalanceConfig>>>,
}

impl ConfigHandle {
    /// Creates a handle after validating the initial config.
    pub fn new(config: RebalanceConfig) -> Result<Self, RebalanceError> {
        config.validate()?;
        let (sender, _receiver) = watch::channel(Arc::new(config));
        Ok(Self {
            sender: Arc::new(sender),
        })
    }

    /// The currently active config.
    pub fn current(&self) -> Arc<RebalanceConfig> {
        self.sender.borrow().clone()
    }

    /// Validates and swaps in a new config. On error the active config is kept.
    pub fn replace(&self, config: RebalanceConfig) -> Result<(), RebalanceError> {
        config.validate()?;
        self.sender.send_replace(Arc::new(config));
        Ok(())
    }

    /// Subscribes to config replacements.
    pub fn subscribe(&self) -> watch::Receiver<Arc<RebalanceConfig>> {
        self.sender.subscribe()
    }
}
