//! JSON-RPC chain collaborator
//!
//! Sends updates with `eth_sendTransaction` from an account managed by the
//! node, so keys never pass through this process.

use alloy_primitives::{Address, Bytes, B256};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use oracle_core::{ChainConfig, ExecutionError, ExecutionResult};

use crate::builder::ContractCall;
use crate::client::{ChainClient, Receipt, ReceiptStatus};

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    status: Option<String>,
    block_number: Option<String>,
}

fn parse_hex_u64(raw: &str) -> Option<u64> {
    u64::from_str_radix(raw.trim_start_matches("0x"), 16).ok()
}

impl RpcReceipt {
    fn into_receipt(self, tx_hash: B256) -> ExecutionResult<Receipt> {
        let status = match self.status.as_deref() {
            Some("0x1") | None => ReceiptStatus::Success,
            Some("0x0") => ReceiptStatus::Reverted,
            Some(other) => {
                return Err(ExecutionError::Rpc(format!("unknown receipt status {other}")));
            }
        };

        Ok(Receipt {
            tx_hash,
            status,
            block_number: self.block_number.as_deref().and_then(parse_hex_u64),
        })
    }
}

/// Ethereum JSON-RPC client
pub struct JsonRpcChainClient {
    client: Client,
    rpc_url: String,
    sender: Address,
    poll_interval: Duration,
    next_id: AtomicU64,
}

impl JsonRpcChainClient {
    pub fn new(config: &ChainConfig) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(config.rpc_timeout()).build()?;

        Ok(Self {
            client,
            rpc_url: config.rpc_url.clone(),
            sender: config.sender,
            poll_interval: config.receipt_poll_interval(),
            next_id: AtomicU64::new(1),
        })
    }

    async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> ExecutionResult<Option<T>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        debug!(method, id, "RPC request");

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ExecutionError::Rpc(format!("{method}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExecutionError::Rpc(format!("{method}: HTTP {status}")));
        }

        let envelope: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| ExecutionError::Rpc(format!("{method}: {e}")))?;

        if let Some(err) = envelope.error {
            return Err(ExecutionError::Rpc(format!(
                "{method}: {} (code {})",
                err.message, err.code
            )));
        }

        Ok(envelope.result)
    }

    async fn poll_receipt(&self, tx_hash: B256) -> ExecutionResult<Receipt> {
        loop {
            match self
                .request::<RpcReceipt>("eth_getTransactionReceipt", json!([tx_hash]))
                .await
            {
                Ok(Some(receipt)) => return receipt.into_receipt(tx_hash),
                Ok(None) => {}
                Err(e) => warn!(tx_hash = ?tx_hash, error = %e, "Receipt poll failed"),
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait::async_trait]
impl ChainClient for JsonRpcChainClient {
    async fn submit(&self, call: &ContractCall) -> ExecutionResult<B256> {
        call.validate()?;

        let tx = json!({
            "from": self.sender,
            "to": call.to,
            "data": call.data,
            "gas": format!("{:#x}", call.gas_limit),
        });

        self.request::<B256>("eth_sendTransaction", json!([tx]))
            .await
            .map_err(|e| ExecutionError::SubmitFailed(e.to_string()))?
            .ok_or_else(|| ExecutionError::SubmitFailed("empty eth_sendTransaction result".to_string()))
    }

    async fn await_receipt(&self, tx_hash: B256, timeout: Duration) -> ExecutionResult<Receipt> {
        tokio::time::timeout(timeout, self.poll_receipt(tx_hash))
            .await
            .map_err(|_| ExecutionError::Timeout {
                waited_ms: timeout.as_millis() as u64,
            })?
    }

    async fn call(&self, call: &ContractCall) -> ExecutionResult<Bytes> {
        let request = json!({
            "to": call.to,
            "data": call.data,
        });

        self.request::<Bytes>("eth_call", json!([request, "latest"]))
            .await?
            .ok_or_else(|| ExecutionError::Rpc("empty eth_call result".to_string()))
    }
}
