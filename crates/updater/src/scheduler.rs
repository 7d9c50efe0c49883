//! Per-token cycle scheduling
//!
//! One task per configured token runs cycles on a fixed interval. Reloaded
//! configuration starts tasks for new tokens; tasks for removed tokens exit
//! at their next cycle boundary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{info, warn};

use oracle_core::{OracleConfig, TokenId};

use crate::orchestrator::{shutdown_signalled, CycleOutcome, UpdateOrchestrator};

/// Outcome counters across all tokens
#[derive(Debug, Default)]
pub struct UpdaterStats {
    published: AtomicU64,
    skipped_no_change: AtomicU64,
    skipped_insufficient_data: AtomicU64,
    failed: AtomicU64,
    abandoned: AtomicU64,
}

impl UpdaterStats {
    pub fn record(&self, outcome: Option<&CycleOutcome>) {
        let counter = match outcome {
            Some(CycleOutcome::PublishedConfirmed { .. }) => &self.published,
            Some(CycleOutcome::SkippedNoChange) => &self.skipped_no_change,
            Some(CycleOutcome::SkippedInsufficientData { .. }) => &self.skipped_insufficient_data,
            Some(CycleOutcome::FailedAfterRetries { .. }) => &self.failed,
            None => &self.abandoned,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> UpdaterStatsSnapshot {
        UpdaterStatsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            skipped_no_change: self.skipped_no_change.load(Ordering::Relaxed),
            skipped_insufficient_data: self.skipped_insufficient_data.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdaterStatsSnapshot {
    pub published: u64,
    pub skipped_no_change: u64,
    pub skipped_insufficient_data: u64,
    pub failed: u64,
    pub abandoned: u64,
}

impl UpdaterStatsSnapshot {
    pub fn cycles(&self) -> u64 {
        self.published
            + self.skipped_no_change
            + self.skipped_insufficient_data
            + self.failed
            + self.abandoned
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = interval_at(Instant::now(), period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// Runs every token's pipeline until shutdown
pub struct Scheduler {
    orchestrator: Arc<UpdateOrchestrator>,
    stats: Arc<UpdaterStats>,
    config: watch::Receiver<Arc<OracleConfig>>,
    shutdown: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(
        orchestrator: Arc<UpdateOrchestrator>,
        config: watch::Receiver<Arc<OracleConfig>>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            orchestrator,
            stats: Arc::new(UpdaterStats::default()),
            config,
            shutdown,
        }
    }

    pub fn stats(&self) -> Arc<UpdaterStats> {
        Arc::clone(&self.stats)
    }

    /// Run until shutdown is signalled, then wait for in-flight cycles
    pub async fn run(mut self) {
        let mut tasks: HashMap<TokenId, JoinHandle<()>> = HashMap::new();
        self.spawn_missing(&mut tasks);

        let stats_every = self.orchestrator.config().scheduler.stats_interval();
        let mut stats_ticker = interval_at(Instant::now() + stats_every, stats_every);
        stats_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown_signalled(self.shutdown.clone()) => break,
                changed = self.config.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let tokens = self.config.borrow_and_update().token_ids();
                    info!(tokens = tokens.len(), "Configuration changed");
                    self.orchestrator.state().retain_tokens(&tokens);
                    tasks.retain(|_, handle| !handle.is_finished());
                    self.spawn_missing(&mut tasks);
                }
                _ = stats_ticker.tick() => self.log_stats(),
            }
        }

        info!(tasks = tasks.len(), "Waiting for running cycles");
        for (token, handle) in tasks {
            if let Err(e) = handle.await {
                warn!(token = %token, error = %e, "Token task ended abnormally");
            }
        }
        self.log_stats();
    }

    fn spawn_missing(&self, tasks: &mut HashMap<TokenId, JoinHandle<()>>) {
        for token in self.orchestrator.config().token_ids() {
            if tasks.contains_key(&token) {
                continue;
            }
            info!(token = %token, "Starting token pipeline");
            let handle = tokio::spawn(run_token(
                Arc::clone(&self.orchestrator),
                Arc::clone(&self.stats),
                token.clone(),
                self.shutdown.clone(),
            ));
            tasks.insert(token, handle);
        }
    }

    fn log_stats(&self) {
        let stats = self.stats.snapshot();
        let published = self.orchestrator.state().stats();
        info!(
            cycles = stats.cycles(),
            published = stats.published,
            skipped_no_change = stats.skipped_no_change,
            skipped_insufficient_data = stats.skipped_insufficient_data,
            failed = stats.failed,
            abandoned = stats.abandoned,
            tokens_published = published.token_count,
            last_update_secs = published.last_update_age.map(|age| age.as_secs()),
            "Updater stats"
        );
    }
}

async fn run_token(
    orchestrator: Arc<UpdateOrchestrator>,
    stats: Arc<UpdaterStats>,
    token: TokenId,
    shutdown: watch::Receiver<bool>,
) {
    let mut period = orchestrator.config().scheduler.update_interval();
    let mut interval = ticker(period);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown_signalled(shutdown.clone()) => break,
        }

        if !orchestrator.is_configured(&token) {
            info!(token = %token, "Token removed from configuration, stopping pipeline");
            // A cycle that overlapped the reload may have written state back
            orchestrator.state().remove(&token);
            break;
        }

        let outcome = orchestrator.run_cycle(&token).await;
        stats.record(outcome.as_ref());

        let wanted = orchestrator.config().scheduler.update_interval();
        if wanted != period {
            period = wanted;
            interval = ticker(period);
            interval.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use oracle_core::{PartialPublicationPolicy, PublicationReason, SchedulerConfig};
    use rust_decimal::Decimal;

    fn fast_config() -> OracleConfig {
        let mut config = oracle_config(0, PartialPublicationPolicy::RequireBoth);
        config.scheduler = SchedulerConfig {
            update_interval_ms: 10,
            stats_interval_ms: 1_000,
        };
        config
    }

    #[test]
    fn test_stats_count_every_outcome() {
        let stats = UpdaterStats::default();
        stats.record(Some(&CycleOutcome::PublishedConfirmed {
            price: Decimal::ONE,
            reason: PublicationReason::FirstPublication,
            attempts: 1,
        }));
        stats.record(Some(&CycleOutcome::SkippedNoChange));
        stats.record(Some(&CycleOutcome::SkippedNoChange));
        stats.record(Some(&CycleOutcome::FailedAfterRetries {
            attempts: 4,
            error: "timeout".to_string(),
        }));
        stats.record(None);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.published, 1);
        assert_eq!(snapshot.skipped_no_change, 2);
        assert_eq!(snapshot.skipped_insufficient_data, 0);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.abandoned, 1);
        assert_eq!(snapshot.cycles(), 5);
    }

    #[tokio::test]
    async fn test_runs_cycles_until_shutdown() {
        let h = harness(fast_config(), healthy_sources(), ScriptedChain::default());
        let scheduler = Scheduler::new(
            Arc::clone(&h.orchestrator),
            h.config_rx.clone(),
            h.shutdown_rx.clone(),
        );
        let stats = scheduler.stats();
        let handle = tokio::spawn(scheduler.run());

        tokio::time::sleep(Duration::from_millis(200)).await;
        h.shutdown_tx.send_replace(true);
        handle.await.unwrap();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.published, 1);
        assert!(snapshot.skipped_no_change >= 1);
        assert_eq!(snapshot.failed, 0);

        // Nothing runs after shutdown
        let cycles = stats.snapshot().cycles();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(stats.snapshot().cycles(), cycles);
    }

    #[tokio::test]
    async fn test_removed_token_is_dropped_on_reload() {
        let h = harness(fast_config(), healthy_sources(), ScriptedChain::default());
        let scheduler = Scheduler::new(
            Arc::clone(&h.orchestrator),
            h.config_rx.clone(),
            h.shutdown_rx.clone(),
        );
        let handle = tokio::spawn(scheduler.run());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(h.orchestrator.state().get(&weth()).is_some());

        let mut reloaded = fast_config();
        reloaded.tokens.clear();
        h.config_tx.send_replace(Arc::new(reloaded));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(h.orchestrator.state().get(&weth()).is_none());
        let submitted = h.chain.submitted.lock().len();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.chain.submitted.lock().len(), submitted);

        h.shutdown_tx.send_replace(true);
        handle.await.unwrap();
    }
}
