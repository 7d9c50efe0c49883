//! Last-published price state
//!
//! Uses DashMap for per-token entries; a per-token async run lock keeps
//! cycles for one token from overlapping so each entry has a single writer.

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use oracle_core::{AggregatedPrice, LastPublished, TokenId, TransactionRecord};

/// Process-wide record of confirmed publications
#[derive(Debug)]
pub struct PublishedState {
    /// Latest confirmed price per token
    published: DashMap<TokenId, LastPublished>,

    /// Cycle run locks per token
    run_locks: DashMap<TokenId, Arc<Mutex<()>>>,

    /// Stats
    update_count: AtomicU64,
    last_update: RwLock<Option<Instant>>,
}

impl PublishedState {
    pub fn new() -> Self {
        Self {
            published: DashMap::new(),
            run_locks: DashMap::new(),
            update_count: AtomicU64::new(0),
            last_update: RwLock::new(None),
        }
    }

    /// Last confirmed publication for a token
    pub fn get(&self, token: &TokenId) -> Option<LastPublished> {
        self.published.get(token).map(|r| r.value().clone())
    }

    /// Run lock for a token's update cycle
    pub fn run_lock(&self, token: &TokenId) -> Arc<Mutex<()>> {
        Arc::clone(
            self.run_locks
                .entry(token.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    /// Record a publication backed by confirmed transactions
    ///
    /// Refuses the update unless `records` is non-empty and every record is a
    /// confirmed transaction for `price.token` carrying `price.price`. Returns
    /// whether the state
    /// changed. The publication time is the latest confirmation time.
    pub fn record_confirmed(&self, price: AggregatedPrice, records: &[TransactionRecord]) -> bool {
        let token = price.token.clone();

        let valid = !records.is_empty()
            && records.iter().all(|r| {
                r.is_confirmed() && r.token == token && r.submitted_price == price.price
            });
        if !valid {
            warn!(token = %token, records = records.len(), "Refusing state update without confirmed transactions");
            return false;
        }

        let published_at = records
            .iter()
            .filter_map(|r| r.confirmed_at)
            .max()
            .unwrap_or_else(Utc::now);

        debug!(token = %token, price = %price.price, "Recording published price");

        self.published.insert(token, LastPublished { price, published_at });
        self.update_count.fetch_add(1, Ordering::Relaxed);
        *self.last_update.write() = Some(Instant::now());
        true
    }

    /// Drop state for one token
    pub fn remove(&self, token: &TokenId) {
        self.published.remove(token);
        self.run_locks.remove(token);
    }

    /// Drop state for tokens no longer configured
    pub fn retain_tokens(&self, tokens: &[TokenId]) {
        self.published.retain(|k, _| tokens.contains(k));
        self.run_locks.retain(|k, _| tokens.contains(k));
    }

    /// Stats
    pub fn stats(&self) -> PublishedStateStats {
        PublishedStateStats {
            token_count: self.published.len(),
            update_count: self.update_count.load(Ordering::Relaxed),
            last_update_age: self.last_update.read().map(|at| at.elapsed()),
        }
    }
}

impl Default for PublishedState {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about published state
#[derive(Debug, Clone)]
pub struct PublishedStateStats {
    pub token_count: usize,
    pub update_count: u64,
    pub last_update_age: Option<Duration>,
}
