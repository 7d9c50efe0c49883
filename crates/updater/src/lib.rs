//! Oracle updater
//!
//! Runs one update pipeline per token: fetch from off-chain sources,
//! aggregate, gate, publish to the registry and price-feed contracts, retry
//! with backoff.

pub mod backoff;
pub mod orchestrator;
pub mod scheduler;
pub mod settings;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod testing;

pub use backoff::Backoff;
pub use orchestrator::{CycleOutcome, UpdateOrchestrator};
pub use scheduler::{Scheduler, UpdaterStats, UpdaterStatsSnapshot};
