//! Decision Maker
//!
//! Picks one (source, destination, token) triple from an analysis and sizes
//! the move. At most one decision is produced per cycle.

use serde::Serialize;
use tracing::debug;

use crate::analyzer::{AvailableToken, BalanceAnalysis, Deficit, Surplus};
use crate::chains::{ChainId, TokenSymbol};
use crate::config::{GlobalRebalanceConfig, RebalanceConfig};
use crate::error::{RebalanceError, Result};
use crate::snapshot::AggregateBalance;

/// Lower bound of the deficit-correction factor.
pub const MIN_CORRECTION_FACTOR: f64 = 0.3;
/// Upper bound of the deficit-correction factor.
pub const MAX_CORRECTION_FACTOR: f64 = 0.8;
/// Share of a source's excess that may be moved in one operation.
pub const SAFE_EXCESS_RATIO: f64 = 0.995;

/// A sized rebalance candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RebalanceDecision {
    pub source_chain_id: ChainId,
    pub destination_chain_id: ChainId,
    pub token: TokenSymbol,
    pub amount_usd: f64,
    /// Amount in the token's smallest unit
    pub amount_raw: u128,
}

/// Chooses a single move per cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecisionMaker;

impl DecisionMaker {
    pub fn new() -> Self {
        Self
    }

    /// Produces a decision, or `None` when there is nothing to do this cycle.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(decision))` - A candidate with a non-zero amount
    /// * `Ok(None)` - No deficit, no surplus, no sendable token, or amount under the minimum
    /// * `Err(RebalanceError::PriceUnavailable)` - The chosen token could not be priced
    pub fn decide(
        &self,
        analysis: &BalanceAnalysis,
        snapshot: &AggregateBalance,
        config: &RebalanceConfig,
    ) -> Result<Option<RebalanceDecision>> {
        if analysis.deficits.is_empty() || analysis.surpluses.is_empty() {
            return Ok(None);
        }

        let mut deficits: Vec<&Deficit> = analysis.deficits.iter().collect();
        deficits.sort_by(|a, b| b.deficit.total_cmp(&a.deficit));
        let destination = deficits[0];

        let mut surpluses: Vec<&Surplus> = analysis.surpluses.iter().collect();
        surpluses.sort_by(|a, b| {
            a.source_priority
                .cmp(&b.source_priority)
                .then_with(|| b.excess.total_cmp(&a.excess))
        });
        // A chain can carry a token-scoped deficit while being a surplus overall.
        let Some(source) = surpluses
            .into_iter()
            .find(|s| s.chain_id != destination.chain_id)
        else {
            debug!("No surplus chain other than {}", destination.chain_id);
            return Ok(None);
        };

        let Some(token) = self.select_token(destination, source) else {
            debug!("Surplus chain {} has no available tokens", source.chain_id);
            return Ok(None);
        };

        let amount_usd = self.calculate_rebalance_amount(destination, source, token, &config.global);
        if amount_usd <= 0.0 {
            debug!(
                "Rebalance amount for {} -> {} ({}) is below the minimum",
                source.chain_id, destination.chain_id, token.symbol
            );
            return Ok(None);
        }

        let amount_raw =
            self.token_amount_from_usd(amount_usd, token.symbol, source.chain_id, snapshot)?;
        if amount_raw == 0 {
            return Ok(None);
        }

        Ok(Some(RebalanceDecision {
            source_chain_id: source.chain_id,
            destination_chain_id: destination.chain_id,
            token: token.symbol,
            amount_usd,
            amount_raw,
        }))
    }

    /// Selects which token the surplus chain should send.
    ///
    /// Preference order:
    /// 1. the deficit's own token, if the source has excess of it
    /// 2. its ETH/WETH partner, if the source has excess of that
    /// 3. the token with the highest excess percentage
    /// 4. the token with the highest USD balance
    pub fn select_token<'a>(
        &self,
        deficit: &Deficit,
        surplus: &'a Surplus,
    ) -> Option<&'a AvailableToken> {
        let tokens = &surplus.available_tokens;
        let with_excess = |symbol: TokenSymbol| {
            tokens
                .iter()
                .find(|t| t.symbol == symbol && t.excess_percentage > 0.0)
        };

        if let Some(wanted) = deficit.token {
            if let Some(token) = with_excess(wanted) {
                return Some(token);
            }
            if let Some(token) = wanted.partner().and_then(with_excess) {
                return Some(token);
            }
        }

        let by_excess = tokens
            .iter()
            .filter(|t| t.excess_percentage > 0.0)
            .max_by(|a, b| {
                a.excess_percentage
                    .total_cmp(&b.excess_percentage)
                    .then_with(|| a.priority.cmp(&b.priority))
            });
        if by_excess.is_some() {
            return by_excess;
        }

        tokens.iter().max_by(|a, b| {
            a.balance_usd
                .total_cmp(&b.balance_usd)
                .then_with(|| a.priority.cmp(&b.priority))
        })
    }

    /// Sizes a move in USD.
    ///
    /// Returns exactly 0 when the bounded amount is below
    /// `global.min_rebalance_usd_value`; never negative.
    pub fn calculate_rebalance_amount(
        &self,
        deficit: &Deficit,
        surplus: &Surplus,
        token: &AvailableToken,
        global: &GlobalRebalanceConfig,
    ) -> f64 {
        let factor = correction_factor(deficit);
        let target_amount_usd = deficit.deficit_usd * factor;
        let safe_excess_usd = surplus.excess_usd * SAFE_EXCESS_RATIO;

        let amount = target_amount_usd
            .min(safe_excess_usd)
            .min(token.balance_usd)
            .min(global.max_rebalance_usd_value)
            .max(0.0);

        if amount.is_nan() || amount < global.min_rebalance_usd_value {
            0.0
        } else {
            amount
        }
    }

    /// Converts a USD amount to raw token units on the given chain.
    ///
    /// ETH and WETH are priced from the chain's own ETH balance (falling back
    /// to its WETH balance); USDC is priced at 1.0.
    pub fn token_amount_from_usd(
        &self,
        amount_usd: f64,
        token: TokenSymbol,
        chain: ChainId,
        snapshot: &AggregateBalance,
    ) -> Result<u128> {
        let price = match token {
            TokenSymbol::Usdc => Some(1.0),
            TokenSymbol::Eth | TokenSymbol::Weth => unit_price(snapshot, chain, TokenSymbol::Eth)
                .or_else(|| unit_price(snapshot, chain, TokenSymbol::Weth)),
        }
        .ok_or(RebalanceError::PriceUnavailable { token, chain })?;

        let units = amount_usd / price * 10f64.powi(token.decimals() as i32);
        if !units.is_finite() || units < 0.0 {
            return Err(RebalanceError::PriceUnavailable { token, chain });
        }
        Ok(units.floor() as u128)
    }
}

/// Correction factor in `[0.3, 0.8]`, growing with how far below target the
/// destination is relative to its target.
fn correction_factor(deficit: &Deficit) -> f64 {
    let relative = if deficit.target_percentage > 0.0 {
        (deficit.deficit / deficit.target_percentage).clamp(0.0, 1.0)
    } else {
        1.0
    };
    MIN_CORRECTION_FACTOR + (MAX_CORRECTION_FACTOR - MIN_CORRECTION_FACTOR) * relative
}

/// USD price of one whole token, derived from a chain's reported balance.
fn unit_price(snapshot: &AggregateBalance, chain: ChainId, token: TokenSymbol) -> Option<f64> {
    let balance = snapshot.token_balance(chain, token)?;
    if balance.raw == 0 || balance.usd_value <= 0.0 {
        return None;
    }
    let whole = balance.raw as f64 / 10f64.powi(balance.decimals as i32);
    Some(balance.usd_value / whole).filter(|p| p.is_finite() && *p > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deficit(deficit: f64, target: f64) -> Deficit {
        Deficit {
            chain_id: ChainId::Base,
            token: None,
            current_percentage: target - deficit,
            target_percentage: target,
            deficit,
            deficit_usd: 0.0,
        }
    }

    #[test]
    fn test_correction_factor_bounds() {
        assert!((correction_factor(&deficit(0.0, 50.0)) - 0.3).abs() < 1e-9);
        assert!((correction_factor(&deficit(50.0, 50.0)) - 0.8).abs() < 1e-9);
        assert!((correction_factor(&deficit(25.0, 50.0)) - 0.55).abs() < 1e-9);
        assert!((correction_factor(&deficit(80.0, 50.0)) - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_correction_factor_zero_target_is_max() {
        assert!((correction_factor(&deficit(10.0, 0.0)) - 0.8).abs() < 1e-9);
    }
}
