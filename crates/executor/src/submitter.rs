//! Publication of aggregated prices to the registry and price-feed contracts

use alloy_primitives::B256;
use chrono::Utc;
use futures::future::join_all;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use oracle_core::{
    AggregatedPrice, ChainConfig, ExecutionError, ExecutionResult, TargetContract, TokenConfig,
    TransactionRecord,
};

use crate::builder::CallBuilder;
use crate::client::{ChainClient, ReceiptStatus};

/// Terminal records for one publication attempt, one per target
#[derive(Debug, Clone, Default)]
pub struct PublicationReport {
    pub records: Vec<TransactionRecord>,
}

impl PublicationReport {
    pub fn confirmed(&self) -> impl Iterator<Item = &TransactionRecord> {
        self.records.iter().filter(|r| r.is_confirmed())
    }

    pub fn failed_targets(&self) -> Vec<TargetContract> {
        self.records
            .iter()
            .filter(|r| !r.is_confirmed())
            .map(|r| r.target)
            .collect()
    }

    pub fn all_confirmed(&self) -> bool {
        !self.records.is_empty() && self.records.iter().all(|r| r.is_confirmed())
    }

    pub fn is_confirmed(&self, target: TargetContract) -> bool {
        self.records
            .iter()
            .any(|r| r.target == target && r.is_confirmed())
    }

    /// First failure message, for retry bookkeeping
    pub fn first_error(&self) -> Option<&str> {
        self.records.iter().find_map(|r| r.error.as_deref())
    }
}

/// Chain publisher
pub struct ChainPublisher {
    client: Arc<dyn ChainClient>,
    builder: CallBuilder,
    confirmation_timeout: Duration,
}

impl ChainPublisher {
    pub fn new(client: Arc<dyn ChainClient>, chain: &ChainConfig) -> Self {
        Self {
            client,
            builder: CallBuilder::from_config(chain),
            confirmation_timeout: chain.confirmation_timeout(),
        }
    }

    /// Submit the price to every target concurrently and wait for each to
    /// reach a terminal status
    pub async fn publish(
        &self,
        token: &TokenConfig,
        aggregated: &AggregatedPrice,
        targets: &[TargetContract],
    ) -> PublicationReport {
        let records = join_all(
            targets
                .iter()
                .map(|target| self.publish_one(*target, token, aggregated)),
        )
        .await;

        PublicationReport { records }
    }

    async fn publish_one(
        &self,
        target: TargetContract,
        token: &TokenConfig,
        aggregated: &AggregatedPrice,
    ) -> TransactionRecord {
        let contract = self.builder.contract_for(target, token);
        let submitted_at = Utc::now();
        let rejected = |error: ExecutionError| {
            warn!(token = %token.id, target = %target, error = %error, "Submission rejected");
            TransactionRecord::rejected(
                token.id.clone(),
                target,
                contract,
                aggregated.price,
                submitted_at,
                error.to_string(),
            )
        };

        let call = match self.builder.build(target, token, aggregated) {
            Ok(call) => call,
            Err(e) => return rejected(e),
        };

        let tx_hash = match self.client.submit(&call).await {
            Ok(hash) => hash,
            Err(e) => return rejected(e),
        };

        debug!(token = %token.id, target = %target, tx_hash = ?tx_hash, "Submitted");

        let record = TransactionRecord::pending(
            token.id.clone(),
            target,
            contract,
            aggregated.price,
            tx_hash,
            submitted_at,
        );

        self.settle(record, tx_hash).await
    }

    async fn settle(&self, record: TransactionRecord, tx_hash: B256) -> TransactionRecord {
        match self
            .client
            .await_receipt(tx_hash, self.confirmation_timeout)
            .await
        {
            Ok(receipt) if receipt.status == ReceiptStatus::Success => {
                let record = record.confirm(receipt.block_number, Utc::now());
                info!(
                    token = %record.token,
                    target = %record.target,
                    tx_hash = ?tx_hash,
                    block = ?record.block_number,
                    latency_ms = record.confirmation_latency().map(|d| d.as_millis() as u64),
                    "Confirmed"
                );
                record
            }
            Ok(_) => {
                let error = ExecutionError::Reverted(format!("{tx_hash}"));
                warn!(token = %record.token, target = %record.target, error = %error, "Reverted");
                record.fail(error.to_string())
            }
            Err(e) => {
                warn!(token = %record.token, target = %record.target, error = %e, "Not confirmed");
                record.fail(e.to_string())
            }
        }
    }

    /// Prices currently stored in the registry for a token
    pub async fn registry_prices(&self, token: &TokenConfig) -> ExecutionResult<Vec<Decimal>> {
        let data = self.client.call(&self.builder.registry_read(token)).await?;
        self.builder.decode_registry_prices(&data)
    }
}
