//! Configuration types

use alloy_primitives::Address;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::{CoreError, CoreResult, SourceId, TokenId};

/// Which confirmations make a token count as published
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialPublicationPolicy {
    /// Both the registry and the price feed must confirm
    #[default]
    RequireBoth,
    /// A confirmed price-feed update is enough; a failed registry update is
    /// logged for reconciliation and not retried
    PriceFeedSufficient,
}

/// Chain collaborator and contract configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub rpc_url: String,
    /// Node-managed account the updates are sent from
    pub sender: Address,
    /// Aggregator-registry contract
    pub registry: Address,
    pub gas_limit: u64,
    /// Fixed-point decimals of the on-chain price representation
    pub price_decimals: u32,
    pub rpc_timeout_ms: u64,
    pub confirmation_timeout_ms: u64,
    pub receipt_poll_interval_ms: u64,
    pub partial_policy: PartialPublicationPolicy,
}

impl ChainConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            sender: Address::ZERO,
            registry: Address::ZERO,
            gas_limit: 2_000_000,
            price_decimals: 8,
            rpc_timeout_ms: 10_000,
            confirmation_timeout_ms: 60_000,
            receipt_poll_interval_ms: 1_000,
            partial_policy: PartialPublicationPolicy::RequireBoth,
        }
    }
}

/// HTTP source client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceClientConfig {
    /// Timeout for a single HTTP request
    pub request_timeout_ms: u64,
    /// Shared deadline for all sources of one cycle
    pub fetch_timeout_ms: u64,
}

impl SourceClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

impl Default for SourceClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 2_000,
            fetch_timeout_ms: 3_000,
        }
    }
}

/// Aggregation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    pub min_quorum: usize,
    pub max_observation_age_ms: u64,
    /// Spread above which the furthest observation is dropped
    pub outlier_threshold: Decimal,
}

impl AggregationConfig {
    pub fn max_observation_age(&self) -> Duration {
        Duration::from_millis(self.max_observation_age_ms)
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            min_quorum: 2,
            max_observation_age_ms: 60_000,
            outlier_threshold: Decimal::new(5, 2), // 5%
        }
    }
}

/// Publication gate configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Relative change that forces a republish
    pub deviation_threshold: Decimal,
    /// Age of the last publication that forces a republish
    pub max_staleness_secs: u64,
}

impl GateConfig {
    pub fn max_staleness(&self) -> Duration {
        Duration::from_secs(self.max_staleness_secs)
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            deviation_threshold: Decimal::new(5, 3), // 0.5%
            max_staleness_secs: 3600,
        }
    }
}

/// Publication retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Random extra delay as a fraction of the exponential delay
    pub jitter_ratio: f64,
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter_ratio: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub update_interval_ms: u64,
    pub stats_interval_ms: u64,
}

impl SchedulerConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: 60_000,
            stats_interval_ms: 300_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// One off-chain price provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: SourceId,
    /// Base URL; prices are read from `<endpoint>/price/<token>`
    pub endpoint: String,
}

/// Per-token configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    pub id: TokenId,
    /// Token address passed to the registry
    pub address: Address,
    /// Price-feed contract for this token
    pub price_feed: Address,
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub aggregation: Option<AggregationConfig>,
    #[serde(default)]
    pub gate: Option<GateConfig>,
}

/// Complete updater configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub chain: ChainConfig,
    pub sources: SourceClientConfig,
    pub aggregation: AggregationConfig,
    pub gate: GateConfig,
    pub retry: RetryConfig,
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
    pub tokens: Vec<TokenConfig>,
}

impl OracleConfig {
    pub fn token(&self, id: &TokenId) -> CoreResult<&TokenConfig> {
        self.tokens
            .iter()
            .find(|t| &t.id == id)
            .ok_or_else(|| CoreError::TokenNotFound(id.clone()))
    }

    pub fn token_ids(&self) -> Vec<TokenId> {
        self.tokens.iter().map(|t| t.id.clone()).collect()
    }

    /// Aggregation settings for a token, falling back to the global ones
    pub fn aggregation_for<'a>(&'a self, token: &'a TokenConfig) -> &'a AggregationConfig {
        token.aggregation.as_ref().unwrap_or(&self.aggregation)
    }

    pub fn gate_for<'a>(&'a self, token: &'a TokenConfig) -> &'a GateConfig {
        token.gate.as_ref().unwrap_or(&self.gate)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.tokens.is_empty() {
            return Err(invalid("no tokens configured"));
        }
        if self.chain.price_decimals > 18 {
            return Err(invalid(format!(
                "price_decimals {} exceeds 18",
                self.chain.price_decimals
            )));
        }
        if self.chain.confirmation_timeout_ms == 0 {
            return Err(invalid("confirmation_timeout_ms must be positive"));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(invalid("retry.max_delay_ms is below retry.base_delay_ms"));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_ratio) {
            return Err(invalid("retry.jitter_ratio must be within [0, 1]"));
        }
        if self.scheduler.update_interval_ms == 0 {
            return Err(invalid("scheduler.update_interval_ms must be positive"));
        }
        if self.scheduler.stats_interval_ms == 0 {
            return Err(invalid("scheduler.stats_interval_ms must be positive"));
        }

        validate_aggregation("aggregation", &self.aggregation)?;
        validate_gate("gate", &self.gate)?;

        let mut seen = HashSet::new();
        for token in &self.tokens {
            if !seen.insert(&token.id) {
                return Err(invalid(format!("duplicate token {}", token.id)));
            }

            let aggregation = self.aggregation_for(token);
            validate_aggregation(token.id.as_str(), aggregation)?;
            validate_gate(token.id.as_str(), self.gate_for(token))?;

            if token.sources.len() < aggregation.min_quorum {
                return Err(invalid(format!(
                    "token {} has {} sources but quorum {}",
                    token.id,
                    token.sources.len(),
                    aggregation.min_quorum
                )));
            }

            let mut source_ids = HashSet::new();
            for source in &token.sources {
                if !source_ids.insert(&source.id) {
                    return Err(invalid(format!(
                        "token {} lists source {} twice",
                        token.id, source.id
                    )));
                }
            }
        }

        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> CoreError {
    CoreError::InvalidConfig(msg.into())
}

fn validate_aggregation(scope: &str, config: &AggregationConfig) -> CoreResult<()> {
    if config.min_quorum == 0 {
        return Err(invalid(format!("{scope}: min_quorum must be at least 1")));
    }
    if config.outlier_threshold <= Decimal::ZERO {
        return Err(invalid(format!("{scope}: outlier_threshold must be positive")));
    }
    Ok(())
}

fn validate_gate(scope: &str, config: &GateConfig) -> CoreResult<()> {
    if config.deviation_threshold <= Decimal::ZERO {
        return Err(invalid(format!("{scope}: deviation_threshold must be positive")));
    }
    if config.max_staleness_secs == 0 {
        return Err(invalid(format!("{scope}: max_staleness_secs must be positive")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn token(id: &str, sources: &[&str]) -> TokenConfig {
        TokenConfig {
            id: TokenId::new(id),
            address: Address::repeat_byte(1),
            price_feed: Address::repeat_byte(2),
            sources: sources
                .iter()
                .map(|s| SourceConfig {
                    id: SourceId::new(*s),
                    endpoint: format!("https://{s}.example.com"),
                })
                .collect(),
            aggregation: None,
            gate: None,
        }
    }

    fn config(tokens: Vec<TokenConfig>) -> OracleConfig {
        OracleConfig {
            tokens,
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_config() {
        let cfg = config(vec![token("WETH", &["a", "b"]), token("WBTC", &["a", "b", "c"])]);
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.token_ids().len(), 2);
    }

    #[test]
    fn test_rejects_empty_and_duplicate_tokens() {
        assert!(config(vec![]).validate().is_err());
        let cfg = config(vec![token("WETH", &["a", "b"]), token("WETH", &["a", "b"])]);
        assert!(matches!(cfg.validate(), Err(CoreError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_sources_below_quorum() {
        let cfg = config(vec![token("WETH", &["a"])]);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_per_token_overrides() {
        let mut weth = token("WETH", &["a"]);
        weth.aggregation = Some(AggregationConfig {
            min_quorum: 1,
            ..Default::default()
        });
        weth.gate = Some(GateConfig {
            deviation_threshold: dec!(0.02),
            max_staleness_secs: 600,
        });
        let cfg = config(vec![weth]);
        assert!(cfg.validate().is_ok());

        let weth = cfg.token(&TokenId::new("WETH")).unwrap();
        assert_eq!(cfg.aggregation_for(weth).min_quorum, 1);
        assert_eq!(cfg.gate_for(weth).max_staleness(), Duration::from_secs(600));
        assert!(cfg.token(&TokenId::new("DAI")).is_err());
    }

    #[test]
    fn test_rejects_bad_retry_bounds() {
        let mut cfg = config(vec![token("WETH", &["a", "b"])]);
        cfg.retry.max_delay_ms = 10;
        cfg.retry.base_delay_ms = 100;
        assert!(cfg.validate().is_err());

        cfg.retry = RetryConfig {
            jitter_ratio: 1.5,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
