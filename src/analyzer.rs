//! Balance Analyzer
//!
//! Turns an aggregate balance snapshot and the active rebalance config into
//! classified deficit and surplus lists. The analysis is a pure function of
//! its two inputs: repeated calls yield identical results.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::chains::{ChainId, TokenSymbol};
use crate::config::RebalanceConfig;
use crate::snapshot::AggregateBalance;

/// Token share per chain: `token -> chain -> percentage of that token's total`.
pub type TokenPercentages = BTreeMap<TokenSymbol, BTreeMap<ChainId, f64>>;

/// A chain (or a single token on a chain) below its trigger threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Deficit {
    pub chain_id: ChainId,
    /// Set for token-scoped deficits
    pub token: Option<TokenSymbol>,
    pub current_percentage: f64,
    pub target_percentage: f64,
    /// `target_percentage - current_percentage`
    pub deficit: f64,
    /// Deficit in USD. Chain-scoped: against the whole portfolio.
    /// Token-scoped: against that token's cross-chain total.
    pub deficit_usd: f64,
}

/// A token a surplus chain can send.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvailableToken {
    pub symbol: TokenSymbol,
    pub balance_usd: f64,
    pub balance_raw: u128,
    pub priority: u32,
    /// How far the token itself is over its target (0 if not over)
    pub excess_percentage: f64,
}

/// A chain holding more than its target share.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Surplus {
    pub chain_id: ChainId,
    pub current_percentage: f64,
    pub target_percentage: f64,
    pub excess: f64,
    pub excess_usd: f64,
    pub source_priority: u32,
    pub available_tokens: Vec<AvailableToken>,
}

/// Result of one analysis pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BalanceAnalysis {
    pub deficits: Vec<Deficit>,
    pub surpluses: Vec<Surplus>,
}

/// Classifies chains into deficits and surpluses.
#[derive(Debug, Clone, Copy, Default)]
pub struct BalanceAnalyzer;

impl BalanceAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Computes each token's share per chain.
    ///
    /// Only chains present in the snapshot appear. A token whose cross-chain
    /// USD total is zero gets 0% everywhere.
    pub fn token_percentages(&self, snapshot: &AggregateBalance) -> TokenPercentages {
        let mut matrix = TokenPercentages::new();

        for token in TokenSymbol::ALL {
            let total: f64 = snapshot
                .chains
                .keys()
                .map(|chain| snapshot.token_usd(*chain, token))
                .sum();

            let per_chain = snapshot
                .chains
                .keys()
                .map(|chain| {
                    let percentage = if total > 0.0 {
                        snapshot.token_usd(*chain, token) / total * 100.0
                    } else {
                        0.0
                    };
                    (*chain, percentage)
                })
                .collect();

            matrix.insert(token, per_chain);
        }

        matrix
    }

    /// Analyzes a snapshot against the config.
    ///
    /// Chains without balance data are skipped entirely.
    pub fn analyze(&self, snapshot: &AggregateBalance, config: &RebalanceConfig) -> BalanceAnalysis {
        let token_percentages = self.token_percentages(snapshot);
        let min_usd = config.global.min_rebalance_usd_value;
        let mut analysis = BalanceAnalysis::default();

        for (chain_id, chain_config) in &config.chains {
            let Some(chain_balance) = snapshot.chain(*chain_id) else {
                continue;
            };
            let current = chain_balance.percentage_of_total;

            if chain_config.can_be_destination && current < chain_config.trigger_threshold {
                let deficit = chain_config.target_percentage - current;
                analysis.deficits.push(Deficit {
                    chain_id: *chain_id,
                    token: None,
                    current_percentage: current,
                    target_percentage: chain_config.target_percentage,
                    deficit,
                    deficit_usd: deficit / 100.0 * snapshot.total_balance,
                });
            }

            if chain_config.can_be_destination {
                for token in TokenSymbol::ALL {
                    if !chain_config.token_enabled(token) {
                        continue;
                    }
                    let token_current = token_percentage(&token_percentages, token, *chain_id);
                    let token_threshold = chain_config.token_threshold(token);
                    if token_current >= token_threshold {
                        continue;
                    }
                    let token_total_usd = snapshot
                        .token_totals
                        .get(&token)
                        .map(|t| t.usd_value)
                        .unwrap_or(0.0);
                    // Nothing held anywhere: no share to restore.
                    if token_total_usd <= 0.0 {
                        continue;
                    }
                    let token_target = chain_config.token_target(token);
                    let deficit = token_target - token_current;
                    analysis.deficits.push(Deficit {
                        chain_id: *chain_id,
                        token: Some(token),
                        current_percentage: token_current,
                        target_percentage: token_target,
                        deficit,
                        deficit_usd: deficit / 100.0 * token_total_usd,
                    });
                }
            }

            if chain_config.source_priority > 0 && current > chain_config.target_percentage {
                let excess = current - chain_config.target_percentage;
                let available_tokens = TokenSymbol::ALL
                    .into_iter()
                    .filter(|token| chain_config.token_enabled(*token))
                    .filter_map(|token| {
                        let balance = chain_balance.tokens.get(&token)?;
                        if balance.usd_value <= min_usd {
                            return None;
                        }
                        let token_current = token_percentage(&token_percentages, token, *chain_id);
                        let token_target = chain_config.token_target(token);
                        Some(AvailableToken {
                            symbol: token,
                            balance_usd: balance.usd_value,
                            balance_raw: balance.raw,
                            priority: chain_config
                                .tokens
                                .get(&token)
                                .map(|t| t.priority)
                                .unwrap_or_default(),
                            excess_percentage: (token_current - token_target).max(0.0),
                        })
                    })
                    .collect();

                analysis.surpluses.push(Surplus {
                    chain_id: *chain_id,
                    current_percentage: current,
                    target_percentage: chain_config.target_percentage,
                    excess,
                    excess_usd: excess / 100.0 * snapshot.total_balance,
                    source_priority: chain_config.source_priority,
                    available_tokens,
                });
            }
        }

        analysis
    }
}

fn token_percentage(matrix: &TokenPercentages, token: TokenSymbol, chain: ChainId) -> f64 {
    matrix
        .get(&token)
        .and_then(|per_chain| per_chain.get(&chain))
        .copied()
        .unwrap_or(0.0)
}
