//! Per-token update cycle
//!
//! A cycle fetches, aggregates, gates and publishes one token's price, then
//! records the outcome. Cycles for one token are serialized by the token's
//! run lock; different tokens run independently.

use chrono::Utc;
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use oracle_core::{
    AggregatedPrice, AggregationError, OracleConfig, PartialPublicationPolicy, PublicationReason,
    TargetContract, TokenConfig, TokenId, TransactionRecord,
};
use oracle_executor::{ChainClient, ChainPublisher};
use oracle_gate::PublicationGate;
use oracle_price_feed::{collect_observations, PriceAggregator, PublishedState, SourceFactory};

use crate::backoff::Backoff;

/// Terminal result of one update cycle
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    PublishedConfirmed {
        price: Decimal,
        reason: PublicationReason,
        attempts: u32,
    },
    SkippedNoChange,
    SkippedInsufficientData {
        valid: usize,
        required: usize,
    },
    FailedAfterRetries {
        attempts: u32,
        error: String,
    },
}

impl CycleOutcome {
    pub fn name(&self) -> &'static str {
        match self {
            CycleOutcome::PublishedConfirmed { .. } => "published_confirmed",
            CycleOutcome::SkippedNoChange => "skipped_no_change",
            CycleOutcome::SkippedInsufficientData { .. } => "skipped_insufficient_data",
            CycleOutcome::FailedAfterRetries { .. } => "failed_after_retries",
        }
    }
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolves once shutdown is signalled; never resolves if the sender is gone
pub(crate) async fn shutdown_signalled(mut shutdown: watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Drives update cycles
pub struct UpdateOrchestrator {
    sources: Arc<dyn SourceFactory>,
    chain: Arc<dyn ChainClient>,
    state: Arc<PublishedState>,
    config: watch::Receiver<Arc<OracleConfig>>,
    shutdown: watch::Receiver<bool>,
}

impl UpdateOrchestrator {
    pub fn new(
        sources: Arc<dyn SourceFactory>,
        chain: Arc<dyn ChainClient>,
        state: Arc<PublishedState>,
        config: watch::Receiver<Arc<OracleConfig>>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            sources,
            chain,
            state,
            config,
            shutdown,
        }
    }

    pub fn state(&self) -> &Arc<PublishedState> {
        &self.state
    }

    /// Current configuration snapshot
    pub fn config(&self) -> Arc<OracleConfig> {
        Arc::clone(&self.config.borrow())
    }

    pub fn is_configured(&self, token: &TokenId) -> bool {
        self.config.borrow().token(token).is_ok()
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Run one cycle for `token`
    ///
    /// Returns `None` when the cycle was abandoned before reaching an
    /// outcome: shutdown was signalled, or the token is no longer configured.
    /// Submissions already in flight are always awaited.
    pub async fn run_cycle(&self, token: &TokenId) -> Option<CycleOutcome> {
        let lock = self.state.run_lock(token);
        let _guard = lock.lock().await;

        let config = self.config();
        let Ok(token_config) = config.token(token) else {
            debug!(token = %token, "Token no longer configured");
            return None;
        };

        let span = tracing::info_span!("cycle", token = %token, cycle_id = %Uuid::new_v4());
        self.cycle(&config, token_config).instrument(span).await
    }

    async fn cycle(&self, config: &OracleConfig, token: &TokenConfig) -> Option<CycleOutcome> {
        if self.is_shutting_down() {
            return None;
        }

        let aggregated = match self.aggregate(config, token).await {
            Ok(aggregated) => aggregated,
            Err(AggregationError::InsufficientData { valid, required }) => {
                info!(valid, required, "Skipping cycle, insufficient data");
                return Some(CycleOutcome::SkippedInsufficientData { valid, required });
            }
        };

        let gate = PublicationGate::new(config.gate_for(token).clone());
        let last = self.state.get(&token.id);
        let decision = gate.should_publish(&aggregated, last.as_ref());
        if !decision.should_publish {
            debug!(
                price = %aggregated.price,
                last_published_secs = last.as_ref().map(|l| l.age(Utc::now()).as_secs()),
                "Skipping cycle, no significant change"
            );
            return Some(CycleOutcome::SkippedNoChange);
        }

        info!(
            price = %aggregated.price,
            observations = aggregated.observation_count,
            reason = %decision.reason,
            "Publishing"
        );

        if self.is_shutting_down() {
            return None;
        }

        self.publish_with_retry(config, token, aggregated, decision.reason)
            .await
    }

    async fn aggregate(
        &self,
        config: &OracleConfig,
        token: &TokenConfig,
    ) -> Result<AggregatedPrice, AggregationError> {
        let sources: Vec<_> = token
            .sources
            .iter()
            .map(|source| self.sources.source(source))
            .collect();

        let report =
            collect_observations(&sources, &token.id, config.sources.fetch_timeout()).await;

        PriceAggregator::new(config.aggregation_for(token).clone()).aggregate(
            &token.id,
            report.observations,
            Utc::now(),
        )
    }

    /// Publish to every target, resubmitting only the targets that failed
    ///
    /// Each retry re-aggregates so the fresh transaction carries the current
    /// price; if that yields no price the previous one is resubmitted. When
    /// the price moved, every target is resubmitted so both contracts and the
    /// recorded state agree on one price.
    async fn publish_with_retry(
        &self,
        config: &OracleConfig,
        token: &TokenConfig,
        mut aggregated: AggregatedPrice,
        reason: PublicationReason,
    ) -> Option<CycleOutcome> {
        let publisher = ChainPublisher::new(Arc::clone(&self.chain), &config.chain);
        let policy = config.chain.partial_policy;
        let mut backoff = Backoff::new(&config.retry);

        let mut pending = TargetContract::ALL.to_vec();
        let mut confirmed: Vec<TransactionRecord> = Vec::new();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let report = publisher.publish(token, &aggregated, &pending).await;
            confirmed.extend(report.confirmed().cloned());
            pending = report.failed_targets();

            let feed_confirmed = confirmed
                .iter()
                .any(|r| r.target == TargetContract::PriceFeed);
            let sufficient = pending.is_empty()
                || (policy == PartialPublicationPolicy::PriceFeedSufficient && feed_confirmed);

            if sufficient {
                if !pending.is_empty() {
                    self.report_partial(&publisher, token, &confirmed, &pending, &aggregated)
                        .await;
                }

                let price = aggregated.price;
                if self.is_configured(&token.id) {
                    self.state.record_confirmed(aggregated, &confirmed);
                } else {
                    info!("Token removed during publication, not recording");
                }
                info!(price = %price, attempts, "Published");
                return Some(CycleOutcome::PublishedConfirmed {
                    price,
                    reason,
                    attempts,
                });
            }

            let last_error = report
                .first_error()
                .unwrap_or("unconfirmed")
                .to_string();

            if attempts > config.retry.max_retries {
                if !confirmed.is_empty() {
                    self.report_partial(&publisher, token, &confirmed, &pending, &aggregated)
                        .await;
                }
                error!(attempts, error = %last_error, "Publication failed after retries");
                return Some(CycleOutcome::FailedAfterRetries {
                    attempts,
                    error: last_error,
                });
            }

            let delay = backoff.next_delay();
            warn!(
                attempt = attempts,
                retry_in_ms = delay.as_millis() as u64,
                pending = ?pending,
                error = %last_error,
                "Publication attempt failed"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_signalled(self.shutdown.clone()) => {
                    info!(attempts, "Shutdown during retry backoff");
                    return None;
                }
            }

            match self.aggregate(config, token).await {
                Ok(fresh) => {
                    if fresh.price != aggregated.price && !confirmed.is_empty() {
                        debug!(
                            previous = %aggregated.price,
                            price = %fresh.price,
                            "Price moved between attempts, resubmitting every target"
                        );
                        confirmed.clear();
                        pending = TargetContract::ALL.to_vec();
                    }
                    aggregated = fresh;
                }
                Err(e) => debug!(error = %e, "Re-aggregation failed, resubmitting previous price"),
            }
        }
    }

    /// Log a token whose contracts now disagree
    async fn report_partial(
        &self,
        publisher: &ChainPublisher,
        token: &TokenConfig,
        confirmed: &[TransactionRecord],
        failed: &[TargetContract],
        attempted: &AggregatedPrice,
    ) {
        let succeeded: Vec<_> = confirmed.iter().map(|r| r.target.name()).collect();
        let failed: Vec<_> = failed.iter().map(|t| t.name()).collect();
        let last_good = self.state.get(&token.id).map(|last| last.price.price);

        let registry = match publisher.registry_prices(token).await {
            Ok(prices) => format!("{prices:?}"),
            Err(e) => format!("unavailable: {e}"),
        };

        error!(
            succeeded = ?succeeded,
            failed = ?failed,
            attempted_price = %attempted.price,
            last_good_price = ?last_good,
            registry_prices = %registry,
            "Partial publication, contracts are inconsistent"
        );
    }
}
