//! Supported Chains and Tokens
//!
//! The rebalancer operates over a closed set of chains and tokens. Both are
//! plain enums so that every `match` over them is exhaustive and adding a
//! chain or token is a compile-time-checked change.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// CHAINS
// ============================================================================

/// A chain the solver holds liquidity on.
///
/// Serialized by lowercase name (e.g. `[rebalance.chains.base]` in TOML).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainId {
    Ethereum,
    Optimism,
    Base,
    Arbitrum,
}

impl ChainId {
    /// Every supported chain, in canonical order.
    pub const ALL: [ChainId; 4] = [
        ChainId::Ethereum,
        ChainId::Optimism,
        ChainId::Base,
        ChainId::Arbitrum,
    ];

    /// Numeric EVM chain id.
    pub fn id(self) -> u64 {
        match self {
            ChainId::Ethereum => 1,
            ChainId::Optimism => 10,
            ChainId::Base => 8453,
            ChainId::Arbitrum => 42161,
        }
    }

    /// Looks up a supported chain by its numeric EVM chain id.
    pub fn from_id(id: u64) -> Option<ChainId> {
        ChainId::ALL.into_iter().find(|chain| chain.id() == id)
    }

    pub fn name(self) -> &'static str {
        match self {
            ChainId::Ethereum => "ethereum",
            ChainId::Optimism => "optimism",
            ChainId::Base => "base",
            ChainId::Arbitrum => "arbitrum",
        }
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.id())
    }
}

impl FromStr for ChainId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(id) = s.parse::<u64>() {
            return ChainId::from_id(id)
                .ok_or_else(|| anyhow::anyhow!("Unsupported chain id {}", id));
        }
        ChainId::ALL
            .into_iter()
            .find(|chain| chain.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow::anyhow!("Unsupported chain {}", s))
    }
}

// ============================================================================
// TOKENS
// ============================================================================

/// A token the rebalancer is allowed to move between chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TokenSymbol {
    /// Native gas asset (paid as transaction value)
    #[serde(rename = "ETH")]
    Eth,
    /// Wrapped native asset (ERC-20)
    #[serde(rename = "WETH")]
    Weth,
    #[serde(rename = "USDC")]
    Usdc,
}

impl TokenSymbol {
    /// The fixed token set every chain config must enumerate.
    pub const ALL: [TokenSymbol; 3] = [TokenSymbol::Eth, TokenSymbol::Weth, TokenSymbol::Usdc];

    pub fn decimals(self) -> u8 {
        match self {
            TokenSymbol::Eth | TokenSymbol::Weth => 18,
            TokenSymbol::Usdc => 6,
        }
    }

    /// Whether the token is the chain's native asset rather than an ERC-20.
    pub fn is_native(self) -> bool {
        matches!(self, TokenSymbol::Eth)
    }

    /// The interchangeable counterpart (ETH <-> WETH), if any.
    pub fn partner(self) -> Option<TokenSymbol> {
        match self {
            TokenSymbol::Eth => Some(TokenSymbol::Weth),
            TokenSymbol::Weth => Some(TokenSymbol::Eth),
            TokenSymbol::Usdc => None,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            TokenSymbol::Eth => "ETH",
            TokenSymbol::Weth => "WETH",
            TokenSymbol::Usdc => "USDC",
        }
    }
}

impl fmt::Display for TokenSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for TokenSymbol {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TokenSymbol::ALL
            .into_iter()
            .find(|token| token.symbol().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow::anyhow!("Unsupported token {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_id_round_trips_numeric_id() {
        for chain in ChainId::ALL {
            assert_eq!(ChainId::from_id(chain.id()), Some(chain));
        }
        assert_eq!(ChainId::from_id(56), None);
    }

    #[test]
    fn test_chain_id_from_str_accepts_name_and_number() {
        assert_eq!("base".parse::<ChainId>().unwrap(), ChainId::Base);
        assert_eq!("42161".parse::<ChainId>().unwrap(), ChainId::Arbitrum);
        assert!("solana".parse::<ChainId>().is_err());
    }

    #[test]
    fn test_token_partner_is_symmetric() {
        assert_eq!(TokenSymbol::Eth.partner(), Some(TokenSymbol::Weth));
        assert_eq!(TokenSymbol::Weth.partner(), Some(TokenSymbol::Eth));
        assert_eq!(TokenSymbol::Usdc.partner(), None);
    }
}
