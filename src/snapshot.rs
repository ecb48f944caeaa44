//! Aggregate Balance Snapshots
//!
//! The balance aggregator (an external collaborator) produces an immutable
//! snapshot of solver balances across chains. Snapshots are shared as
//! `Arc<AggregateBalance>` and pushed through a `watch` channel, so a slow
//! consumer only ever sees the most recent one.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::chains::{ChainId, TokenSymbol};

// ============================================================================
// SNAPSHOT STRUCTURES
// ============================================================================

/// Balance of one token on one chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBalance {
    /// Raw amount in the token's smallest unit
    #[serde(with = "u128_string")]
    pub raw: u128,
    pub decimals: u8,
    pub usd_value: f64,
}

/// All balances held on one chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainBalance {
    pub tokens: BTreeMap<TokenSymbol, TokenBalance>,
    /// Sum of token USD values on this chain
    pub total_usd: f64,
    /// Share of the whole portfolio held on this chain
    pub percentage_of_total: f64,
}

/// One token summed over every chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenTotal {
    #[serde(with = "u128_string")]
    pub raw: u128,
    pub usd_value: f64,
}

/// Immutable snapshot of solver balances across all chains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateBalance {
    pub chains: BTreeMap<ChainId, ChainBalance>,
    pub token_totals: BTreeMap<TokenSymbol, TokenTotal>,
    pub total_balance: f64,
    pub last_updated: DateTime<Utc>,
}

impl AggregateBalance {
    /// Builds a snapshot from per-chain token balances, deriving chain totals,
    /// portfolio percentages and per-token totals.
    pub fn from_chains(
        balances: BTreeMap<ChainId, BTreeMap<TokenSymbol, TokenBalance>>,
        last_updated: DateTime<Utc>,
    ) -> Self {
        let total_balance: f64 = balances
            .values()
            .flat_map(|tokens| tokens.values())
            .map(|b| b.usd_value)
            .sum();

        let mut token_totals: BTreeMap<TokenSymbol, TokenTotal> = BTreeMap::new();
        let mut chains = BTreeMap::new();

        for (chain, tokens) in balances {
            for (token, balance) in &tokens {
                let total = token_totals.entry(*token).or_insert(TokenTotal {
                    raw: 0,
                    usd_value: 0.0,
                });
                total.raw = total.raw.saturating_add(balance.raw);
                total.usd_value += balance.usd_value;
            }

            let total_usd: f64 = tokens.values().map(|b| b.usd_value).sum();
            let percentage_of_total = if total_balance > 0.0 {
                total_usd / total_balance * 100.0
            } else {
                0.0
            };

            chains.insert(
                chain,
                ChainBalance {
                    tokens,
                    total_usd,
                    percentage_of_total,
                },
            );
        }

        Self {
            chains,
            token_totals,
            total_balance,
            last_updated,
        }
    }

    pub fn chain(&self, chain: ChainId) -> Option<&ChainBalance> {
        self.chains.get(&chain)
    }

    /// Balance of a token on a chain, if the chain reported it.
    pub fn token_balance(&self, chain: ChainId, token: TokenSymbol) -> Option<&TokenBalance> {
        self.chains.get(&chain).and_then(|c| c.tokens.get(&token))
    }

    /// USD value of a token on a chain (0 when not reported).
    pub fn token_usd(&self, chain: ChainId, token: TokenSymbol) -> f64 {
        self.token_balance(chain, token)
            .map(|b| b.usd_value)
            .unwrap_or(0.0)
    }
}

/// Serializes raw token amounts as decimal strings; they overflow JSON numbers.
pub mod u128_string {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(text) => text.parse().map_err(de::Error::custom),
            Raw::Number(n) => Ok(n as u128),
        }
    }
}

// ============================================================================
// SNAPSHOT FEED
// ============================================================================

/// Publishing side of the snapshot feed.
///
/// Each publish replaces the previous snapshot; receivers are woken once and
/// read only the latest value.
#[derive(Clone)]
pub struct SnapshotPublisher {
    sender: Arc<watch::Sender<Option<Arc<AggregateBalance>>>>,
}

impl SnapshotPublisher {
    /// Creates a feed with no snapshot yet.
    pub fn new() -> Self {
        let (sender, _receiver) = watch::channel(None);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn publish(&self, snapshot: AggregateBalance) {
        self.sender.send_replace(Some(Arc::new(snapshot)));
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<AggregateBalance>>> {
        self.sender.subscribe()
    }

    /// The most recently published snapshot.
    pub fn latest(&self) -> Option<Arc<AggregateBalance>> {
        self.sender.borrow().clone()
    }
}

impl Default for SnapshotPublisher {
    fn default() -> Self {
        Self::new()
    }
}

/// Polls the balance aggregator and publishes each snapshot it returns.
pub struct SnapshotPoller {
    client: Client,
    url: String,
    interval: Duration,
}

impl SnapshotPoller {
    /// Creates a poller for the aggregator endpoint.
    ///
    /// # Arguments
    ///
    /// * `url` - Endpoint returning an `AggregateBalance` JSON document
    /// * `interval` - Delay between polls
    pub fn new(url: impl Into<String>, interval: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .no_proxy()
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            url: url.into(),
            interval,
        })
    }

    /// Fetches the current snapshot from the aggregator.
    pub async fn fetch(&self) -> Result<AggregateBalance> {
        let snapshot = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("Failed to send balance snapshot request")?
            .error_for_status()
            .context("Balance aggregator returned an error status")?
            .json::<AggregateBalance>()
            .await
            .context("Failed to parse balance snapshot response")?;
        Ok(snapshot)
    }

    /// Service loop: fetch and publish until the task is dropped.
    pub async fn run(&self, publisher: SnapshotPublisher) {
        info!(
            "Starting balance snapshot poller ({} every {:?})",
            self.url, self.interval
        );

        loop {
            match self.fetch().await {
                Ok(snapshot) => {
                    debug!(
                        "Received balance snapshot: total ${:.2} across {} chain(s)",
                        snapshot.total_balance,
                        snapshot.chains.len()
                    );
                    publisher.publish(snapshot);
                }
                Err(e) => error!("Failed to fetch balance snapshot: {:#}", e),
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}
