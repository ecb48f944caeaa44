//! Shared test helpers for rebalancer tests
//!
//! This module provides constants and helper functions used by the rebalancer
//! integration tests.

#![allow(dead_code)]

use chrono::Utc;
use rebalancer::config::{
    BridgeConfig, ChainConfig, GlobalRebalanceConfig, RebalanceConfig, RebalancerConfig,
    ServiceConfig, TokenConfig,
};
use rebalancer::snapshot::{AggregateBalance, TokenBalance};
use rebalancer::{ChainId, TokenSymbol};
use std::collections::BTreeMap;

// ============================================================================
// CONSTANTS
// ============================================================================

// -------------------------------- ACCOUNTS --------------------------------

/// Dummy solver/depositor address (EVM format, 40 hex characters)
pub const DUMMY_DEPOSITOR_ADDR: &str = "0x0000000000000000000000000000000000000001";

/// Dummy exclusive relayer address
pub const DUMMY_EXCLUSIVE_RELAYER_ADDR: &str = "0x0000000000000000000000000000000000000002";

/// Zero address (no exclusive relayer)
pub const ZERO_ADDR: &str = "0x0000000000000000000000000000000000000000";

// ------------------------- TOKENS AND CONTRACTS ---------------------------

/// Dummy spoke pool address, shared by every chain in tests
pub const DUMMY_SPOKE_POOL_ADDR: &str = "0x000000000000000000000000000000000000000a";

/// Dummy USDC address on the source chain (Base)
pub const DUMMY_USDC_ADDR_BASE: &str = "0x000000000000000000000000000000000000000b";

/// Dummy USDC address on the destination chain (Arbitrum)
pub const DUMMY_USDC_ADDR_ARBITRUM: &str = "0x000000000000000000000000000000000000000c";

/// Dummy WETH address on Base
pub const DUMMY_WETH_ADDR_BASE: &str = "0x000000000000000000000000000000000000000d";

/// Dummy WETH address on Arbitrum
pub const DUMMY_WETH_ADDR_ARBITRUM: &str = "0x000000000000000000000000000000000000000e";

/// Dummy USDC/WETH address used for chains not exercised directly
pub const DUMMY_TOKEN_ADDR_OTHER: &str = "0x000000000000000000000000000000000000000f";

/// Dummy deposit transaction hash
pub const DUMMY_TX_HASH: &str =
    "0x1111111111111111111111111111111111111111111111111111111111111111";

/// Dummy approve transaction hash
pub const DUMMY_APPROVE_TX_HASH: &str =
    "0x2222222222222222222222222222222222222222222222222222222222222222";

// --------------------------------- PRICES ---------------------------------

/// ETH price used by snapshot builders (USD)
pub const ETH_PRICE_USD: f64 = 2000.0;

// ============================================================================
// CONFIG BUILDERS
// ============================================================================

/// Token configs with every token enabled (ETH prio 1, WETH prio 2, USDC prio 3)
/// and no token-level overrides.
pub fn create_default_token_configs() -> BTreeMap<TokenSymbol, TokenConfig> {
    TokenSymbol::ALL
        .into_iter()
        .zip(1u32..)
        .map(|(token, priority)| {
            (
                token,
                TokenConfig {
                    enabled: true,
                    priority,
                    target_percentage: None,
                    trigger_threshold: None,
                },
            )
        })
        .collect()
}

/// Chain config with all tokens enabled.
pub fn create_chain_config(
    target_percentage: f64,
    trigger_threshold: f64,
    source_priority: u32,
    can_be_destination: bool,
) -> ChainConfig {
    ChainConfig {
        target_percentage,
        trigger_threshold,
        source_priority,
        can_be_destination,
        tokens: create_default_token_configs(),
    }
}

/// Global settings: enabled, $10 min, $10,000 max, 60s cooldown.
pub fn create_default_global_config() -> GlobalRebalanceConfig {
    GlobalRebalanceConfig {
        enabled: true,
        min_rebalance_usd_value: 10.0,
        max_rebalance_usd_value: 10_000.0,
        cooldown_period_ms: 60_000,
    }
}

/// Two-chain scenario config:
/// - Base: target 10%, threshold 0, source priority 1, not a destination
/// - Arbitrum: target 90%, threshold 50, never a source, destination
/// - Ethereum / Optimism: 0%, inert
pub fn create_scenario_rebalance_config() -> RebalanceConfig {
    RebalanceConfig {
        global: create_default_global_config(),
        chains: BTreeMap::from([
            (ChainId::Base, create_chain_config(10.0, 0.0, 1, false)),
            (ChainId::Arbitrum, create_chain_config(90.0, 50.0, 0, true)),
            (ChainId::Ethereum, create_chain_config(0.0, 0.0, 0, false)),
            (ChainId::Optimism, create_chain_config(0.0, 0.0, 0, false)),
        ]),
    }
}

/// Balanced config: 25% per chain, threshold 15, every chain source and destination.
pub fn create_default_rebalance_config() -> RebalanceConfig {
    RebalanceConfig {
        global: create_default_global_config(),
        chains: ChainId::ALL
            .into_iter()
            .map(|chain| (chain, create_chain_config(25.0, 15.0, 1, true)))
            .collect(),
    }
}

/// Full service config pointing the bridge API and every RPC at the given URLs.
pub fn create_default_rebalancer_config(api_url: &str, rpc_url: &str) -> RebalancerConfig {
    let per_chain = |value: &str| -> BTreeMap<ChainId, String> {
        ChainId::ALL
            .into_iter()
            .map(|chain| (chain, value.to_string()))
            .collect()
    };

    let mut tokens = BTreeMap::new();
    for chain in ChainId::ALL {
        let (usdc, weth) = match chain {
            ChainId::Base => (DUMMY_USDC_ADDR_BASE, DUMMY_WETH_ADDR_BASE),
            ChainId::Arbitrum => (DUMMY_USDC_ADDR_ARBITRUM, DUMMY_WETH_ADDR_ARBITRUM),
            ChainId::Ethereum | ChainId::Optimism => (DUMMY_TOKEN_ADDR_OTHER, DUMMY_TOKEN_ADDR_OTHER),
        };
        tokens.insert(
            chain,
            BTreeMap::from([
                (TokenSymbol::Usdc, usdc.to_string()),
                (TokenSymbol::Weth, weth.to_string()),
            ]),
        );
    }

    RebalancerConfig {
        service: ServiceConfig {
            tick_interval_ms: 30_000,
            operation_retention_ms: 24 * 60 * 60 * 1000,
            balance_source_url: "http://127.0.0.1:4400/balances".to_string(),
            balance_poll_interval_ms: 5_000,
            api_host: "127.0.0.1".to_string(),
            api_port: 4455,
        },
        bridge: BridgeConfig {
            api_url: api_url.to_string(),
            quote_timeout_ms: 2_000,
            fill_deadline_secs: 18_000,
            depositor: DUMMY_DEPOSITOR_ADDR.to_string(),
            spoke_pools: per_chain(DUMMY_SPOKE_POOL_ADDR),
            rpc_urls: per_chain(rpc_url),
        },
        tokens,
        rebalance: create_scenario_rebalance_config(),
    }
}

/// Default service config (30s tick, 24h retention).
pub fn create_default_service_config() -> ServiceConfig {
    create_default_rebalancer_config("http://127.0.0.1:1", "http://127.0.0.1:1").service
}

// ============================================================================
// SNAPSHOT BUILDERS
// ============================================================================

/// USDC balance worth `usd` dollars.
pub fn usdc(usd: f64) -> TokenBalance {
    TokenBalance {
        raw: (usd * 1e6) as u128,
        decimals: 6,
        usd_value: usd,
    }
}

/// ETH (or WETH) balance of `amount` whole tokens at [`ETH_PRICE_USD`].
pub fn eth(amount: f64) -> TokenBalance {
    TokenBalance {
        raw: (amount * 1e18) as u128,
        decimals: 18,
        usd_value: amount * ETH_PRICE_USD,
    }
}

/// Builds a snapshot from per-chain token balances.
pub fn create_snapshot(balances: Vec<(ChainId, Vec<(TokenSymbol, TokenBalance)>)>) -> AggregateBalance {
    let chains = balances
        .into_iter()
        .map(|(chain, tokens)| (chain, tokens.into_iter().collect()))
        .collect();
    AggregateBalance::from_chains(chains, Utc::now())
}

/// Scenario snapshot: Base holds $6,000 USDC (60%), Arbitrum $4,000 USDC (40%).
pub fn create_scenario_snapshot() -> AggregateBalance {
    create_scenario_snapshot_with(6_000.0, 4_000.0)
}

/// Scenario snapshot with custom USDC balances on Base and Arbitrum.
pub fn create_scenario_snapshot_with(base_usd: f64, arbitrum_usd: f64) -> AggregateBalance {
    create_snapshot(vec![
        (ChainId::Base, vec![(TokenSymbol::Usdc, usdc(base_usd))]),
        (ChainId::Arbitrum, vec![(TokenSymbol::Usdc, usdc(arbitrum_usd))]),
    ])
}
