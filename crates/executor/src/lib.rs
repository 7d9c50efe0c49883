//! On-chain publication of aggregated prices
//!
//! Features:
//! - Typed ABI calls for the registry and price-feed contracts
//! - Fixed-point price scaling
//! - JSON-RPC submission and receipt polling
//! - Concurrent per-target publication with terminal transaction records

pub mod builder;
pub mod client;
pub mod rpc;
pub mod submitter;

pub use builder::{price_to_units, units_to_price, CallBuilder, ContractCall};
pub use client::{ChainClient, Receipt, ReceiptStatus};
pub use rpc::JsonRpcChainClient;
pub use submitter::{ChainPublisher, PublicationReport};
