//! Publication gating
//!
//! Decides whether a fresh aggregate is worth a transaction: bounded
//! staleness and bounded deviation, nothing else.

pub mod gate;

pub use gate::{relative_deviation, PublicationGate};
