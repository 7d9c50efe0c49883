//! Staleness and deviation gate

use rust_decimal::Decimal;
use tracing::debug;

use oracle_core::{
    elapsed_between, AggregatedPrice, GateConfig, LastPublished, PublicationDecision,
    PublicationReason,
};

/// `|new - old| / old`, or `None` when `old` is zero or the ratio overflows
pub fn relative_deviation(new: Decimal, old: Decimal) -> Option<Decimal> {
    new.checked_sub(old)
        .and_then(|delta| delta.checked_div(old))
        .map(|ratio| ratio.abs())
}

/// Publication gate
#[derive(Debug, Clone)]
pub struct PublicationGate {
    config: GateConfig,
}

impl PublicationGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    /// Decide whether `aggregated` should be published
    ///
    /// Elapsed time is measured from the last publication to the aggregate's
    /// computation time. Rules apply in order: first publication, staleness,
    /// deviation.
    pub fn should_publish(
        &self,
        aggregated: &AggregatedPrice,
        last: Option<&LastPublished>,
    ) -> PublicationDecision {
        let reason = match last {
            None => PublicationReason::FirstPublication,
            Some(last) => self.compare(aggregated, last),
        };

        let decision = PublicationDecision {
            token: aggregated.token.clone(),
            should_publish: reason != PublicationReason::NoSignificantChange,
            reason,
        };

        debug!(
            token = %decision.token,
            publish = decision.should_publish,
            reason = %decision.reason,
            "Gate decision"
        );

        decision
    }

    fn compare(&self, aggregated: &AggregatedPrice, last: &LastPublished) -> PublicationReason {
        let elapsed = elapsed_between(last.published_at, aggregated.computed_at);
        if elapsed > self.config.max_staleness() {
            return PublicationReason::StalenessExceeded;
        }

        match relative_deviation(aggregated.price, last.price.price) {
            Some(deviation) if deviation <= self.config.deviation_threshold => {
                PublicationReason::NoSignificantChange
            }
            _ => PublicationReason::DeviationExceeded,
        }
    }
}
