//! Chain collaborator interface
//!
//! Signing, nonces and raw transaction construction live behind this trait;
//! the updater only hands over typed calls and waits for receipts.

use alloy_primitives::{Bytes, B256};
use std::time::Duration;

use oracle_core::ExecutionResult;

use crate::builder::ContractCall;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

/// Receipt for an included transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: B256,
    pub status: ReceiptStatus,
    pub block_number: Option<u64>,
}

#[async_trait::async_trait]
pub trait ChainClient: Send + Sync {
    /// Submit a state-changing call, returning its transaction hash
    async fn submit(&self, call: &ContractCall) -> ExecutionResult<B256>;

    /// Wait for a receipt, failing with `ExecutionError::Timeout` once
    /// `timeout` elapses
    async fn await_receipt(&self, tx_hash: B256, timeout: Duration) -> ExecutionResult<Receipt>;

    /// Execute a read-only call against the latest block
    async fn call(&self, call: &ContractCall) -> ExecutionResult<Bytes>;
}
