//! Spoke Pool Deposit Submitter
//!
//! Encodes `depositV3` calls and sends them through `eth_sendTransaction` on a
//! signer-enabled JSON-RPC endpoint. The node holds the depositor's key.

use anyhow::Context;
use async_trait::async_trait;
use ethereum_types::{Address, U256};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

use super::{DepositParams, DepositSubmitter};
use crate::chains::ChainId;
use crate::config::BridgeConfig;
use crate::error::{RebalanceError, Result};

const DEPOSIT_V3_SIGNATURE: &str = "depositV3(address,address,address,address,uint256,uint256,uint256,address,uint32,uint32,uint32,bytes)";
const ALLOWANCE_SIGNATURE: &str = "allowance(address,address)";
const APPROVE_SIGNATURE: &str = "approve(address,uint256)";

/// Number of static head words in `depositV3` calldata.
const DEPOSIT_V3_HEAD_WORDS: usize = 12;

// ============================================================================
// JSON-RPC
// ============================================================================

#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: Vec<serde_json::Value>,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

// ============================================================================
// ABI ENCODING
// ============================================================================

/// First four bytes of the Keccak-256 hash of a function signature.
pub fn function_selector(signature: &str) -> [u8; 4] {
    let mut hasher = Keccak256::new();
    hasher.update(signature.as_bytes());
    let hash = hasher.finalize();
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Parses a `0x`-prefixed 20-byte hex address.
pub fn parse_address(value: &str) -> Result<Address> {
    let stripped = value.strip_prefix("0x").unwrap_or(value);
    let bytes = hex::decode(stripped)
        .map_err(|e| RebalanceError::Submission(format!("Invalid address '{}': {}", value, e)))?;
    if bytes.len() != 20 {
        return Err(RebalanceError::Submission(format!(
            "Invalid address '{}': expected 20 bytes, got {}",
            value,
            bytes.len()
        )));
    }
    Ok(Address::from_slice(&bytes))
}

fn address_word(address: Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_bytes());
    word
}

fn uint_word(value: U256) -> [u8; 32] {
    let mut word = [0u8; 32];
    value.to_big_endian(&mut word);
    word
}

/// ABI-encodes a `depositV3` call.
pub fn encode_deposit_v3(params: &DepositParams) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(4 + 32 * (DEPOSIT_V3_HEAD_WORDS + 2) + params.message.len());
    data.extend_from_slice(&function_selector(DEPOSIT_V3_SIGNATURE));

    let head = [
        address_word(parse_address(&params.depositor)?),
        address_word(parse_address(&params.recipient)?),
        address_word(parse_address(&params.input_token)?),
        address_word(parse_address(&params.output_token)?),
        uint_word(U256::from(params.input_amount)),
        uint_word(U256::from(params.output_amount)),
        uint_word(U256::from(params.destination_chain_id.id())),
        address_word(parse_address(&params.exclusive_relayer)?),
        uint_word(U256::from(params.quote_timestamp)),
        uint_word(U256::from(params.fill_deadline)),
        uint_word(U256::from(params.exclusivity_deadline)),
        // Offset of the dynamic `message` argument
        uint_word(U256::from(DEPOSIT_V3_HEAD_WORDS * 32)),
    ];
    for word in head {
        data.extend_from_slice(&word);
    }

    data.extend_from_slice(&uint_word(U256::from(params.message.len())));
    data.extend_from_slice(&params.message);
    let padding = (32 - params.message.len() % 32) % 32;
    data.extend(std::iter::repeat(0u8).take(padding));

    Ok(data)
}

fn encode_allowance(owner: Address, spender: Address) -> Vec<u8> {
    let mut data = function_selector(ALLOWANCE_SIGNATURE).to_vec();
    data.extend_from_slice(&address_word(owner));
    data.extend_from_slice(&address_word(spender));
    data
}

fn encode_approve(spender: Address, amount: U256) -> Vec<u8> {
    let mut data = function_selector(APPROVE_SIGNATURE).to_vec();
    data.extend_from_slice(&address_word(spender));
    data.extend_from_slice(&uint_word(amount));
    data
}

fn to_hex(data: &[u8]) -> String {
    format!("0x{}", hex::encode(data))
}

// ============================================================================
// SUBMITTER
// ============================================================================

/// [`DepositSubmitter`] that sends transactions through node-managed accounts.
pub struct JsonRpcDepositSubmitter {
    client: Client,
    rpc_urls: BTreeMap<ChainId, String>,
    spoke_pools: BTreeMap<ChainId, String>,
}

impl JsonRpcDepositSubmitter {
    /// Creates a submitter for the configured RPC endpoints and spoke pools.
    pub fn new(config: &BridgeConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .no_proxy()
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            rpc_urls: config.rpc_urls.clone(),
            spoke_pools: config.spoke_pools.clone(),
        })
    }

    async fn call<T: for<'de> Deserialize<'de>>(
        &self,
        rpc_url: &str,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<T> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id: 1,
        };

        let response: JsonRpcResponse<T> = self
            .client
            .post(rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RebalanceError::Submission(format!("Failed to send {} request: {}", method, e)))?
            .json()
            .await
            .map_err(|e| RebalanceError::Submission(format!("Failed to parse {} response: {}", method, e)))?;

        if let Some(error) = response.error {
            return Err(RebalanceError::Submission(format!(
                "{} failed: {} ({})",
                method, error.message, error.code
            )));
        }
        response
            .result
            .ok_or_else(|| RebalanceError::Submission(format!("{} returned no result", method)))
    }

    async fn allowance(&self, rpc_url: &str, token: Address, owner: Address, spender: Address) -> Result<U256> {
        let result: String = self
            .call(
                rpc_url,
                "eth_call",
                vec![
                    serde_json::json!({
                        "to": to_hex(token.as_bytes()),
                        "data": to_hex(&encode_allowance(owner, spender)),
                    }),
                    serde_json::json!("latest"),
                ],
            )
            .await?;

        let stripped = result.strip_prefix("0x").unwrap_or(&result);
        if stripped.is_empty() {
            return Ok(U256::zero());
        }
        U256::from_str_radix(stripped, 16)
            .map_err(|e| RebalanceError::Submission(format!("Invalid allowance '{}': {:?}", result, e)))
    }

    async fn send_transaction(
        &self,
        rpc_url: &str,
        from: &str,
        to: &str,
        data: &[u8],
        value: u128,
    ) -> Result<String> {
        let mut tx = serde_json::json!({
            "from": from,
            "to": to,
            "data": to_hex(data),
        });
        if value > 0 {
            tx["value"] = serde_json::json!(format!("0x{:x}", value));
        }
        self.call(rpc_url, "eth_sendTransaction", vec![tx]).await
    }
}

#[async_trait]
impl DepositSubmitter for JsonRpcDepositSubmitter {
    async fn submit(&self, params: &DepositParams) -> Result<String> {
        let chain = params.origin_chain_id;
        let rpc_url = self
            .rpc_urls
            .get(&chain)
            .ok_or_else(|| RebalanceError::Submission(format!("No RPC URL configured for {}", chain)))?;
        let spoke_pool = self
            .spoke_pools
            .get(&chain)
            .ok_or_else(|| RebalanceError::Submission(format!("No spoke pool configured for {}", chain)))?;

        if params.native_value == 0 {
            let token = parse_address(&params.input_token)?;
            let owner = parse_address(&params.depositor)?;
            let spender = parse_address(spoke_pool)?;
            let amount = U256::from(params.input_amount);

            let allowance = self.allowance(rpc_url, token, owner, spender).await?;
            if allowance < amount {
                let approve_tx = self
                    .send_transaction(
                        rpc_url,
                        &params.depositor,
                        &params.input_token,
                        &encode_approve(spender, amount),
                        0,
                    )
                    .await?;
                info!(
                    "Approved spoke pool {} on {} for {} (tx {})",
                    spoke_pool, chain, amount, approve_tx
                );
            } else {
                debug!("Spoke pool allowance on {} already covers {}", chain, amount);
            }
        }

        let data = encode_deposit_v3(params)?;
        self.send_transaction(rpc_url, &params.depositor, spoke_pool, &data, params.native_value)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_selectors() {
        assert_eq!(hex::encode(function_selector(APPROVE_SIGNATURE)), "095ea7b3");
        assert_eq!(hex::encode(function_selector(ALLOWANCE_SIGNATURE)), "dd62ed3e");
    }

    #[test]
    fn test_address_word_is_left_padded() {
        let address = parse_address("0x4200000000000000000000000000000000000006").unwrap();
        let word = address_word(address);
        assert!(word[..12].iter().all(|b| *b == 0));
        assert_eq!(word[12], 0x42);
        assert_eq!(word[31], 0x06);
    }

    #[test]
    fn test_parse_address_rejects_wrong_length() {
        assert!(parse_address("0x1234").is_err());
    }
}
