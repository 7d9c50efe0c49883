//! Core type definitions

use alloy_primitives::{Address, B256};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::{SourceId, TokenId};

/// Elapsed time between two instants, clamped at zero
pub fn elapsed_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> Duration {
    (later - earlier).to_std().unwrap_or(Duration::ZERO)
}

/// A single price reading from one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub source: SourceId,
    pub token: TokenId,
    pub price: Decimal,
    pub observed_at: DateTime<Utc>,
    pub latency: Duration,
}

impl PriceObservation {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        elapsed_between(self.observed_at, now)
    }

    pub fn is_stale(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        self.age(now) > max_age
    }
}

/// Canonical price for a token, reduced from one cycle's observations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedPrice {
    pub token: TokenId,
    pub price: Decimal,
    /// Contributing prices after trimming, ascending
    pub prices: Vec<Decimal>,
    pub observation_count: usize,
    /// (max - min) / median over the contributing prices
    pub spread: Decimal,
    /// Source dropped by the outlier pass, if any
    pub discarded: Option<SourceId>,
    pub computed_at: DateTime<Utc>,
}

/// Why the gate did or did not let a price through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PublicationReason {
    FirstPublication,
    StalenessExceeded,
    DeviationExceeded,
    NoSignificantChange,
}

impl PublicationReason {
    pub fn name(&self) -> &'static str {
        match self {
            PublicationReason::FirstPublication => "first_publication",
            PublicationReason::StalenessExceeded => "staleness_exceeded",
            PublicationReason::DeviationExceeded => "deviation_exceeded",
            PublicationReason::NoSignificantChange => "no_significant_change",
        }
    }
}

impl fmt::Display for PublicationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationDecision {
    pub token: TokenId,
    pub should_publish: bool,
    pub reason: PublicationReason,
}

/// The two contracts every update is written to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetContract {
    AggregatorRegistry,
    PriceFeed,
}

impl TargetContract {
    pub const ALL: [TargetContract; 2] = [TargetContract::AggregatorRegistry, TargetContract::PriceFeed];

    pub fn name(&self) -> &'static str {
        match self {
            TargetContract::AggregatorRegistry => "aggregator_registry",
            TargetContract::PriceFeed => "price_feed",
        }
    }
}

impl fmt::Display for TargetContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Pending,
    Confirmed,
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

/// Lifecycle of one submitted contract update
///
/// Starts `Pending` (or `Failed` when submission itself was rejected) and
/// moves to a terminal status exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub token: TokenId,
    pub target: TargetContract,
    pub contract: Address,
    pub submitted_price: Decimal,
    pub tx_hash: Option<B256>,
    pub status: TransactionStatus,
    pub submitted_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub block_number: Option<u64>,
    pub error: Option<String>,
}

impl TransactionRecord {
    pub fn pending(
        token: TokenId,
        target: TargetContract,
        contract: Address,
        submitted_price: Decimal,
        tx_hash: B256,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            token,
            target,
            contract,
            submitted_price,
            tx_hash: Some(tx_hash),
            status: TransactionStatus::Pending,
            submitted_at,
            confirmed_at: None,
            block_number: None,
            error: None,
        }
    }

    /// Record for a submission the collaborator never accepted
    pub fn rejected(
        token: TokenId,
        target: TargetContract,
        contract: Address,
        submitted_price: Decimal,
        submitted_at: DateTime<Utc>,
        error: String,
    ) -> Self {
        Self {
            token,
            target,
            contract,
            submitted_price,
            tx_hash: None,
            status: TransactionStatus::Failed,
            submitted_at,
            confirmed_at: None,
            block_number: None,
            error: Some(error),
        }
    }

    /// Mark confirmed. No-op on a record that is already terminal.
    pub fn confirm(mut self, block_number: Option<u64>, at: DateTime<Utc>) -> Self {
        if !self.status.is_terminal() {
            self.status = TransactionStatus::Confirmed;
            self.block_number = block_number;
            self.confirmed_at = Some(at);
        }
        self
    }

    /// Mark failed. No-op on a record that is already terminal.
    pub fn fail(mut self, error: String) -> Self {
        if !self.status.is_terminal() {
            self.status = TransactionStatus::Failed;
            self.error = Some(error);
        }
        self
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == TransactionStatus::Confirmed
    }

    pub fn confirmation_latency(&self) -> Option<Duration> {
        self.confirmed_at.map(|at| elapsed_between(self.submitted_at, at))
    }
}

/// Most recent confirmed publication for a token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastPublished {
    pub price: AggregatedPrice,
    pub published_at: DateTime<Utc>,
}

impl LastPublished {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        elapsed_between(self.published_at, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pending_record() -> TransactionRecord {
        TransactionRecord::pending(
            TokenId::new("WETH"),
            TargetContract::PriceFeed,
            Address::repeat_byte(7),
            dec!(2500.5),
            B256::repeat_byte(1),
            Utc::now(),
        )
    }

    #[test]
    fn test_record_transitions_once() {
        let record = pending_record();
        assert_eq!(record.status, TransactionStatus::Pending);

        let confirmed = record.confirm(Some(42), Utc::now());
        assert!(confirmed.is_confirmed());
        assert_eq!(confirmed.block_number, Some(42));
        assert!(confirmed.confirmation_latency().is_some());

        // Terminal records ignore further transitions
        let after_fail = confirmed.clone().fail("late".to_string());
        assert_eq!(after_fail, confirmed);
        let after_confirm = confirmed.clone().confirm(Some(43), Utc::now());
        assert_eq!(after_confirm, confirmed);
    }

    #[test]
    fn test_rejected_record_is_terminal() {
        let record = TransactionRecord::rejected(
            TokenId::new("WETH"),
            TargetContract::AggregatorRegistry,
            Address::ZERO,
            dec!(1),
            Utc::now(),
            "nonce too low".to_string(),
        );
        assert_eq!(record.status, TransactionStatus::Failed);
        assert!(record.tx_hash.is_none());
        assert!(!record.confirm(None, Utc::now()).is_confirmed());
    }

    #[test]
    fn test_observation_age_clamps_future_timestamps() {
        let now = Utc::now();
        let obs = PriceObservation {
            source: SourceId::new("a"),
            token: TokenId::new("WETH"),
            price: dec!(1),
            observed_at: now + chrono::Duration::seconds(5),
            latency: Duration::ZERO,
        };
        assert_eq!(obs.age(now), Duration::ZERO);
        assert!(!obs.is_stale(Duration::from_secs(1), now));
    }
}
