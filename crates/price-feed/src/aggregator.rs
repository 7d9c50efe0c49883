//! Median price aggregation with single-round outlier rejection

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use oracle_core::{
    AggregatedPrice, AggregationConfig, AggregationError, AggregationResult, PriceObservation,
    TokenId,
};

/// Reduces one cycle's observations to a canonical price
#[derive(Debug, Clone)]
pub struct PriceAggregator {
    config: AggregationConfig,
}

impl PriceAggregator {
    pub fn new(config: AggregationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    /// Aggregate observations for `token` as of `now`
    ///
    /// Stale, non-positive and foreign-token observations are dropped before
    /// the quorum check. If the spread exceeds the outlier threshold the
    /// observation furthest from the median is dropped once, provided the
    /// remainder still meets quorum.
    pub fn aggregate(
        &self,
        token: &TokenId,
        observations: Vec<PriceObservation>,
        now: DateTime<Utc>,
    ) -> AggregationResult<AggregatedPrice> {
        let max_age = self.config.max_observation_age();
        let total = observations.len();

        let mut valid: Vec<PriceObservation> = observations
            .into_iter()
            .filter(|obs| {
                &obs.token == token && obs.price > Decimal::ZERO && !obs.is_stale(max_age, now)
            })
            .collect();

        if valid.len() < total {
            debug!(
                token = %token,
                dropped = total - valid.len(),
                "Dropped stale or invalid observations"
            );
        }

        if valid.len() < self.config.min_quorum {
            return Err(AggregationError::InsufficientData {
                valid: valid.len(),
                required: self.config.min_quorum,
            });
        }

        valid.sort_by(|a, b| a.price.cmp(&b.price));

        let (mut median_price, mut spread) = summarize(&valid);
        let mut discarded = None;

        if spread > self.config.outlier_threshold {
            if valid.len() > self.config.min_quorum {
                // max_by keeps the last maximum, so ties drop the higher price
                let furthest = valid
                    .iter()
                    .enumerate()
                    .max_by(|(_, a), (_, b)| {
                        (a.price - median_price).abs().cmp(&(b.price - median_price).abs())
                    })
                    .map(|(idx, _)| idx);

                if let Some(idx) = furthest {
                    let removed = valid.remove(idx);
                    warn!(
                        token = %token,
                        source = %removed.source,
                        price = %removed.price,
                        median = %median_price,
                        spread = %spread,
                        "Discarded outlier observation"
                    );
                    discarded = Some(removed.source);
                    (median_price, spread) = summarize(&valid);
                }
            } else {
                warn!(
                    token = %token,
                    spread = %spread,
                    quorum = self.config.min_quorum,
                    "Spread above outlier threshold but trimming would break quorum"
                );
            }
        }

        Ok(AggregatedPrice {
            token: token.clone(),
            price: median_price,
            prices: valid.iter().map(|obs| obs.price).collect(),
            observation_count: valid.len(),
            spread,
            discarded,
            computed_at: now,
        })
    }
}

/// Median of an ascending slice; the mean of the middle pair on even counts
pub fn median(sorted: &[Decimal]) -> Option<Decimal> {
    let mid = sorted.len() / 2;
    if sorted.is_empty() {
        None
    } else if sorted.len() % 2 == 0 {
        let (low, high) = (sorted[mid - 1], sorted[mid]);
        let midpoint = low
            .checked_add(high)
            .map(|sum| sum / Decimal::TWO)
            .or_else(|| {
                high.checked_sub(low)
                    .and_then(|gap| low.checked_add(gap / Decimal::TWO))
            })
            .unwrap_or(high);
        Some(midpoint)
    } else {
        Some(sorted[mid])
    }
}

/// Median and relative spread of non-empty, sorted, positive observations
///
/// A spread too large to represent saturates at `Decimal::MAX`.
fn summarize(sorted: &[PriceObservation]) -> (Decimal, Decimal) {
    let prices: Vec<Decimal> = sorted.iter().map(|obs| obs.price).collect();
    let median_price = median(&prices).unwrap_or(Decimal::ZERO);

    let spread = match (prices.first(), prices.last()) {
        (Some(min), Some(max)) if !median_price.is_zero() => (*max - *min)
            .checked_div(median_price)
            .unwrap_or(Decimal::MAX),
        _ => Decimal::ZERO,
    };

    (median_price, spread)
}
