//! In-memory sources and chain for cycle tests

use alloy_primitives::{Address, Bytes, B256};
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use oracle_core::{
    AggregationConfig, ChainConfig, ExecutionError, ExecutionResult, OracleConfig,
    PartialPublicationPolicy, PriceObservation, RetryConfig, SourceConfig, SourceError, SourceId,
    SourceResult, TargetContract, TokenConfig, TokenId,
};
use oracle_executor::{ChainClient, ContractCall, Receipt, ReceiptStatus};
use oracle_price_feed::{PriceSource, PublishedState, SourceFactory};

use crate::orchestrator::UpdateOrchestrator;

pub(crate) struct FixedSource {
    id: SourceId,
    price: Option<Decimal>,
}

#[async_trait::async_trait]
impl PriceSource for FixedSource {
    fn id(&self) -> &SourceId {
        &self.id
    }

    async fn fetch(&self, token: &TokenId) -> SourceResult<PriceObservation> {
        match self.price {
            Some(price) => Ok(PriceObservation {
                source: self.id.clone(),
                token: token.clone(),
                price,
                observed_at: Utc::now(),
                latency: Duration::from_millis(1),
            }),
            None => Err(SourceError::Unavailable {
                source_id: self.id.clone(),
                reason: "down".to_string(),
            }),
        }
    }
}

/// Sources answer with fixed prices; `None` means unavailable
///
/// Clones share prices, so a test can move them while a cycle runs.
#[derive(Clone)]
pub(crate) struct FixedFactory {
    prices: Arc<Mutex<HashMap<SourceId, Option<Decimal>>>>,
}

impl FixedFactory {
    pub(crate) fn new(prices: &[(&str, Option<Decimal>)]) -> Self {
        let prices = prices
            .iter()
            .map(|(id, price)| (SourceId::new(*id), *price))
            .collect();
        Self {
            prices: Arc::new(Mutex::new(prices)),
        }
    }

    pub(crate) fn set_all(&self, price: Decimal) {
        for value in self.prices.lock().values_mut() {
            *value = Some(price);
        }
    }
}

impl SourceFactory for FixedFactory {
    fn source(&self, config: &SourceConfig) -> Arc<dyn PriceSource> {
        Arc::new(FixedSource {
            id: config.id.clone(),
            price: self.prices.lock().get(&config.id).copied().flatten(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Script {
    Confirm,
    Revert,
    Timeout,
}

type SubmitHook = Box<dyn FnOnce() + Send>;

/// Chain whose receipts follow a per-target script; confirms once the
/// script is exhausted
#[derive(Default)]
pub(crate) struct ScriptedChain {
    scripts: Mutex<HashMap<TargetContract, VecDeque<Script>>>,
    pending: Mutex<HashMap<B256, Script>>,
    on_first_submit: Mutex<Option<SubmitHook>>,
    pub(crate) submitted: Mutex<Vec<TargetContract>>,
}

impl ScriptedChain {
    pub(crate) fn with(target: TargetContract, script: &[Script]) -> Self {
        let chain = Self::default();
        chain.script(target, script);
        chain
    }

    pub(crate) fn script(&self, target: TargetContract, script: &[Script]) {
        self.scripts
            .lock()
            .insert(target, script.iter().copied().collect());
    }

    /// Run `hook` when the next transaction is submitted
    pub(crate) fn on_first_submit(&self, hook: impl FnOnce() + Send + 'static) {
        *self.on_first_submit.lock() = Some(Box::new(hook));
    }

    pub(crate) fn submissions(&self, target: TargetContract) -> usize {
        self.submitted.lock().iter().filter(|t| **t == target).count()
    }
}

#[async_trait::async_trait]
impl ChainClient for ScriptedChain {
    async fn submit(&self, call: &ContractCall) -> ExecutionResult<B256> {
        let hook = self.on_first_submit.lock().take();
        if let Some(hook) = hook {
            hook();
        }

        let hash = {
            let mut submitted = self.submitted.lock();
            submitted.push(call.target);
            B256::with_last_byte(submitted.len() as u8)
        };

        let script = self
            .scripts
            .lock()
            .get_mut(&call.target)
            .and_then(|s| s.pop_front())
            .unwrap_or(Script::Confirm);
        self.pending.lock().insert(hash, script);
        Ok(hash)
    }

    async fn await_receipt(&self, tx_hash: B256, timeout: Duration) -> ExecutionResult<Receipt> {
        let script = self.pending.lock().remove(&tx_hash).unwrap_or(Script::Confirm);
        let status = match script {
            Script::Confirm => ReceiptStatus::Success,
            Script::Revert => ReceiptStatus::Reverted,
            Script::Timeout => {
                return Err(ExecutionError::Timeout {
                    waited_ms: timeout.as_millis() as u64,
                })
            }
        };
        Ok(Receipt {
            tx_hash,
            status,
            block_number: Some(1),
        })
    }

    async fn call(&self, _call: &ContractCall) -> ExecutionResult<Bytes> {
        Err(ExecutionError::Rpc("reads not scripted".to_string()))
    }
}

pub(crate) fn token_config() -> TokenConfig {
    TokenConfig {
        id: TokenId::new("WETH"),
        address: Address::repeat_byte(0xaa),
        price_feed: Address::repeat_byte(0xbb),
        sources: ["a", "b", "c"]
            .iter()
            .map(|id| SourceConfig {
                id: SourceId::new(*id),
                endpoint: format!("http://{id}.invalid"),
            })
            .collect(),
        aggregation: None,
        gate: None,
    }
}

pub(crate) fn oracle_config(max_retries: u32, policy: PartialPublicationPolicy) -> OracleConfig {
    OracleConfig {
        chain: ChainConfig {
            registry: Address::repeat_byte(0xcc),
            partial_policy: policy,
            ..Default::default()
        },
        aggregation: AggregationConfig {
            min_quorum: 2,
            ..Default::default()
        },
        retry: RetryConfig {
            max_retries,
            base_delay_ms: 1,
            max_delay_ms: 5,
            jitter_ratio: 0.2,
        },
        tokens: vec![token_config()],
        ..Default::default()
    }
}

pub(crate) struct Harness {
    pub(crate) orchestrator: Arc<UpdateOrchestrator>,
    pub(crate) chain: Arc<ScriptedChain>,
    pub(crate) config_tx: Arc<watch::Sender<Arc<OracleConfig>>>,
    pub(crate) config_rx: watch::Receiver<Arc<OracleConfig>>,
    pub(crate) shutdown_tx: watch::Sender<bool>,
    pub(crate) shutdown_rx: watch::Receiver<bool>,
}

pub(crate) fn harness(config: OracleConfig, factory: FixedFactory, chain: ScriptedChain) -> Harness {
    let chain = Arc::new(chain);
    let (config_tx, config_rx) = watch::channel(Arc::new(config));
    let config_tx = Arc::new(config_tx);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let orchestrator = Arc::new(UpdateOrchestrator::new(
        Arc::new(factory),
        chain.clone(),
        Arc::new(PublishedState::new()),
        config_rx.clone(),
        shutdown_rx.clone(),
    ));

    Harness {
        orchestrator,
        chain,
        config_tx,
        config_rx,
        shutdown_tx,
        shutdown_rx,
    }
}

pub(crate) fn healthy_sources() -> FixedFactory {
    FixedFactory::new(&[
        ("a", Some(dec!(100))),
        ("b", Some(dec!(101))),
        ("c", Some(dec!(99))),
    ])
}

pub(crate) fn weth() -> TokenId {
    TokenId::new("WETH")
}
