//! Core types and utilities for the price oracle updater
//!
//! This crate provides shared types used across all components:
//! - Token and source identifiers
//! - Observation, aggregate and transaction types
//! - Updater configuration
//! - Error taxonomy

pub mod types;
pub mod tokens;
pub mod config;
pub mod errors;

pub use types::*;
pub use tokens::*;
pub use config::*;
pub use errors::*;
