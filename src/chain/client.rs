//! Blockchain client wrapper
//!
//! Thin adapter over the subsidy contract: JSON-RPC 2.0 via reqwest, one
//! sender identity, one contract address, fixed gas ceiling. Each call
//! submits a transaction, polls for the receipt, and parses the emitted
//! event matching the call. Submission and confirmation errors propagate
//! to the caller unchanged; there is no retry here.

use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

use crate::chain::abi::{decode_words, encode_call, event_topic};
use crate::types::{PlatformError, Result};

const FN_CREATE_PROJECT: &str = "createProject(uint256,uint256)";
const FN_CREATE_MILESTONE: &str = "createMilestone(uint256,uint256,uint256)";
const FN_RELEASE_SUBSIDY: &str = "releaseSubsidy(uint256,uint256,uint256)";

const EV_PROJECT_CREATED: &str = "ProjectCreated(uint256,uint256)";
const EV_MILESTONE_CREATED: &str = "MilestoneCreated(uint256,uint256,uint256)";
const EV_SUBSIDY_RELEASED: &str = "SubsidyReleased(uint256,uint256,uint256)";

/// Structured result of a confirmed contract call
#[derive(Debug, Clone, Serialize)]
pub struct TxOutcome {
    pub transaction_hash: String,
    pub block_number: u64,
    pub gas_used: u64,
    /// Decoded data words of the event emitted by the call, if any
    pub event_data: Vec<u128>,
}

/// Chain client configuration
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub sender_address: String,
    pub contract_address: String,
    pub gas_limit: u64,
    pub poll_interval: Duration,
    pub poll_attempts: u32,
}

/// The wrapper itself. Constructed once at startup and injected.
pub struct ChainClient {
    client: reqwest::Client,
    config: ChainConfig,
}

impl ChainClient {
    pub fn new(config: ChainConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PlatformError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Register a project on the contract
    pub async fn create_project(&self, project_id: u128, total_subsidy_wei: u128) -> Result<TxOutcome> {
        self.submit_and_confirm(
            FN_CREATE_PROJECT,
            &[project_id, total_subsidy_wei],
            EV_PROJECT_CREATED,
        )
        .await
    }

    /// Register a milestone under an on-chain project
    pub async fn create_milestone(
        &self,
        project_id: u128,
        sequence_number: u128,
        subsidy_wei: u128,
    ) -> Result<TxOutcome> {
        self.submit_and_confirm(
            FN_CREATE_MILESTONE,
            &[project_id, sequence_number, subsidy_wei],
            EV_MILESTONE_CREATED,
        )
        .await
    }

    /// Release a milestone's subsidy on-chain
    pub async fn release_subsidy(
        &self,
        project_id: u128,
        milestone_id: u128,
        amount_wei: u128,
    ) -> Result<TxOutcome> {
        self.submit_and_confirm(
            FN_RELEASE_SUBSIDY,
            &[project_id, milestone_id, amount_wei],
            EV_SUBSIDY_RELEASED,
        )
        .await
    }

    /// Submit a contract call and block until the receipt arrives
    async fn submit_and_confirm(
        &self,
        signature: &str,
        args: &[u128],
        event_signature: &str,
    ) -> Result<TxOutcome> {
        let calldata = encode_call(signature, args);

        let tx = json!({
            "from": self.config.sender_address,
            "to": self.config.contract_address,
            "gas": format!("0x{:x}", self.config.gas_limit),
            "data": calldata,
        });

        let tx_hash = self
            .rpc("eth_sendTransaction", json!([tx]))
            .await?
            .as_str()
            .ok_or_else(|| PlatformError::Chain("eth_sendTransaction returned no hash".into()))?
            .to_string();

        debug!(tx_hash = %tx_hash, call = signature, "Transaction submitted");

        let receipt = self.await_receipt(&tx_hash).await?;

        let status = receipt
            .get("status")
            .and_then(|s| s.as_str())
            .unwrap_or("0x0");
        if status != "0x1" {
            return Err(PlatformError::Chain(format!(
                "Transaction {} reverted",
                tx_hash
            )));
        }

        let block_number = hex_to_u64(receipt.get("blockNumber"));
        let gas_used = hex_to_u64(receipt.get("gasUsed"));

        // Pull the data words of the log matching this call's event
        let topic = event_topic(event_signature);
        let event_data = receipt
            .get("logs")
            .and_then(|l| l.as_array())
            .and_then(|logs| {
                logs.iter().find(|log| {
                    log.get("topics")
                        .and_then(|t| t.as_array())
                        .and_then(|t| t.first())
                        .and_then(|t0| t0.as_str())
                        .map(|t0| t0.eq_ignore_ascii_case(&topic))
                        .unwrap_or(false)
                })
            })
            .and_then(|log| log.get("data").and_then(|d| d.as_str()))
            .map(decode_words)
            .unwrap_or_default();

        info!(
            tx_hash = %tx_hash,
            block = block_number,
            gas = gas_used,
            call = signature,
            "Transaction confirmed"
        );

        Ok(TxOutcome {
            transaction_hash: tx_hash,
            block_number,
            gas_used,
            event_data,
        })
    }

    /// Poll for the transaction receipt until it lands or attempts run out
    async fn await_receipt(&self, tx_hash: &str) -> Result<Value> {
        for _ in 0..self.config.poll_attempts {
            let receipt = self
                .rpc("eth_getTransactionReceipt", json!([tx_hash]))
                .await?;

            if !receipt.is_null() {
                return Ok(receipt);
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }

        Err(PlatformError::Chain(format!(
            "Transaction {} not confirmed after {} polls",
            tx_hash, self.config.poll_attempts
        )))
    }

    /// One JSON-RPC 2.0 round trip
    async fn rpc(&self, method: &str, params: Value) -> Result<Value> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1,
        });

        let response = self
            .client
            .post(&self.config.rpc_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| PlatformError::Chain(format!("RPC request failed: {}", e)))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| PlatformError::Chain(format!("RPC response not JSON: {}", e)))?;

        if let Some(error) = body.get("error") {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown RPC error");
            return Err(PlatformError::Chain(format!("{}: {}", method, message)));
        }

        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }
}

fn hex_to_u64(value: Option<&Value>) -> u64 {
    value
        .and_then(|v| v.as_str())
        .and_then(|s| u64::from_str_radix(s.trim_start_matches("0x"), 16).ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_to_u64() {
        assert_eq!(hex_to_u64(Some(&json!("0x1a"))), 26);
        assert_eq!(hex_to_u64(Some(&json!("0x0"))), 0);
        assert_eq!(hex_to_u64(Some(&json!(null))), 0);
        assert_eq!(hex_to_u64(None), 0);
    }

    #[test]
    fn test_event_topics_distinct() {
        let topics = [
            event_topic(EV_PROJECT_CREATED),
            event_topic(EV_MILESTONE_CREATED),
            event_topic(EV_SUBSIDY_RELEASED),
        ];
        assert_ne!(topics[0], topics[1]);
        assert_ne!(topics[1], topics[2]);
        assert!(topics.iter().all(|t| t.len() == 66));
    }
}
