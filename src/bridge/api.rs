//! Bridge API Client
//!
//! HTTP client for the bridge's suggested-fees endpoint.

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{FeeQuote, FeeQuoteRequest, FeeQuoter};
use crate::error::{RebalanceError, Result};

// ============================================================================
// WIRE FORMAT
// ============================================================================

/// Response of `GET /suggested-fees`.
///
/// Amounts arrive as decimal strings; timestamps as strings or numbers.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedFees {
    pub total_relay_fee: RelayFee,
    pub limits: DepositLimits,
    #[serde(default = "zero_address")]
    pub exclusive_relayer: String,
    #[serde(with = "u64_flexible")]
    pub timestamp: u64,
    #[serde(default, with = "u64_flexible")]
    pub exclusivity_deadline: u64,
    #[serde(default)]
    pub estimated_fill_time_sec: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayFee {
    #[serde(with = "crate::snapshot::u128_string")]
    pub total: u128,
    #[serde(default)]
    pub pct: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositLimits {
    #[serde(with = "crate::snapshot::u128_string")]
    pub min_deposit: u128,
    #[serde(with = "crate::snapshot::u128_string")]
    pub max_deposit: u128,
}

/// Error body returned with non-2xx statuses.
#[derive(Debug, Clone, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

impl From<SuggestedFees> for FeeQuote {
    fn from(fees: SuggestedFees) -> Self {
        Self {
            total_relay_fee: fees.total_relay_fee.total,
            min_deposit: fees.limits.min_deposit,
            max_deposit: fees.limits.max_deposit,
            exclusive_relayer: fees.exclusive_relayer,
            timestamp: fees.timestamp,
            exclusivity_deadline: fees.exclusivity_deadline,
            estimated_fill_time_sec: fees.estimated_fill_time_sec,
        }
    }
}

fn zero_address() -> String {
    format!("0x{}", "0".repeat(40))
}

mod u64_flexible {
    use serde::{de, Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(text) => text.parse().map_err(de::Error::custom),
            Raw::Number(n) => Ok(n),
        }
    }
}

// ============================================================================
// CLIENT
// ============================================================================

/// reqwest-backed [`FeeQuoter`].
pub struct BridgeApiClient {
    /// Base URL of the bridge API (e.g., "https://app.across.to/api")
    base_url: String,
    client: Client,
    timeout: Duration,
}

impl BridgeApiClient {
    /// Creates a client whose requests time out after `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            timeout,
        })
    }

    /// Fetches suggested fees for a route.
    ///
    /// # Returns
    ///
    /// * `Ok(SuggestedFees)` - Parsed quote
    /// * `Err(RebalanceError::QuoteTimeout)` - No response within the timeout
    /// * `Err(RebalanceError::AmountTooLow)` / `UnsupportedToken` - Bridge rejected the route
    /// * `Err(RebalanceError::Quote)` - Any other failure
    pub async fn suggested_fees(&self, request: &FeeQuoteRequest) -> Result<SuggestedFees> {
        let url = format!("{}/suggested-fees", self.base_url);
        debug!(
            "GET {} ({} -> {}, {} {})",
            url, request.origin_chain_id, request.destination_chain_id, request.amount, request.token
        );

        let response = self
            .client
            .get(&url)
            .query(&[
                ("inputToken", request.input_token.clone()),
                ("outputToken", request.output_token.clone()),
                ("originChainId", request.origin_chain_id.id().to_string()),
                ("destinationChainId", request.destination_chain_id.id().to_string()),
                ("amount", request.amount.to_string()),
            ])
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(rejection(request, status, &body));
        }

        response
            .json::<SuggestedFees>()
            .await
            .map_err(|e| self.map_transport_error(e))
    }

    fn map_transport_error(&self, error: reqwest::Error) -> RebalanceError {
        if error.is_timeout() {
            RebalanceError::QuoteTimeout(self.timeout.as_millis() as u64)
        } else if error.is_decode() {
            RebalanceError::Quote(format!("Failed to parse suggested-fees response: {}", error))
        } else {
            RebalanceError::Quote(format!("Failed to send suggested-fees request: {}", error))
        }
    }
}

/// Maps a non-2xx response onto a typed rejection where the bridge reports one.
fn rejection(request: &FeeQuoteRequest, status: StatusCode, body: &str) -> RebalanceError {
    let parsed: Option<ApiErrorBody> = serde_json::from_str(body).ok();
    let code = parsed.as_ref().and_then(|b| b.code.as_deref());
    let message = parsed
        .as_ref()
        .and_then(|b| b.message.clone())
        .unwrap_or_else(|| body.to_string());

    match code {
        Some("AMOUNT_TOO_LOW") => RebalanceError::AmountTooLow {
            amount: request.amount,
            min_deposit: None,
        },
        Some("UNSUPPORTED_TOKEN") | Some("ROUTE_NOT_ENABLED") => RebalanceError::UnsupportedToken {
            token: request.token,
            chain: request.origin_chain_id,
        },
        _ => RebalanceError::Quote(format!("Bridge API returned {}: {}", status, message)),
    }
}

#[async_trait]
impl FeeQuoter for BridgeApiClient {
    async fn quote(&self, request: &FeeQuoteRequest) -> Result<FeeQuote> {
        Ok(self.suggested_fees(request).await?.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suggested_fees_parses_mixed_number_formats() {
        let json = r#"{
            "totalRelayFee": {"pct": "1000000000000000", "total": "250000"},
            "limits": {"minDeposit": "1000000", "maxDeposit": "5000000000000"},
            "exclusiveRelayer": "0x1111111111111111111111111111111111111111",
            "timestamp": "1700000000",
            "exclusivityDeadline": 0,
            "estimatedFillTimeSec": 4
        }"#;

        let fees: SuggestedFees = serde_json::from_str(json).unwrap();
        let quote = FeeQuote::from(fees);
        assert_eq!(quote.total_relay_fee, 250_000);
        assert_eq!(quote.min_deposit, 1_000_000);
        assert_eq!(quote.timestamp, 1_700_000_000);
        assert_eq!(quote.estimated_fill_time_sec, Some(4));
    }

    #[test]
    fn test_missing_exclusive_relayer_defaults_to_zero_address() {
        let json = r#"{
            "totalRelayFee": {"total": "1"},
            "limits": {"minDeposit": "1", "maxDeposit": "2"},
            "timestamp": 1
        }"#;
        let fees: SuggestedFees = serde_json::from_str(json).unwrap();
        assert_eq!(fees.exclusive_relayer, zero_address());
        assert_eq!(fees.exclusivity_deadline, 0);
    }
}
