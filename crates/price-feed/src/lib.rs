//! Price collection and aggregation
//!
//! Features:
//! - HTTP price sources with typed per-source failures
//! - Concurrent fetching under a shared deadline
//! - Median aggregation with bounded outlier rejection
//! - Per-token last-published state with run locks

pub mod aggregator;
pub mod sources;
pub mod state;

pub use aggregator::PriceAggregator;
pub use sources::{
    collect_observations, FetchReport, HttpPriceSource, HttpSourceFactory, PriceSource,
    SourceFactory,
};
pub use state::PublishedState;
