//! Off-chain price sources
//!
//! Each source answers `GET <endpoint>/price/<token>` with a JSON body holding
//! a numeric `price` and, optionally, a unix `timestamp`. Failures are typed
//! per source so one bad provider never aborts a cycle.

use chrono::{DateTime, TimeZone, Utc};
use futures::future::join_all;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use oracle_core::{
    PriceObservation, SourceClientConfig, SourceConfig, SourceError, SourceId, SourceResult,
    TokenId,
};

/// A single off-chain price provider
#[async_trait::async_trait]
pub trait PriceSource: Send + Sync {
    fn id(&self) -> &SourceId;

    async fn fetch(&self, token: &TokenId) -> SourceResult<PriceObservation>;
}

/// Builds sources from configuration at the start of every cycle
pub trait SourceFactory: Send + Sync {
    fn source(&self, config: &SourceConfig) -> Arc<dyn PriceSource>;
}

/// HTTP JSON price source
pub struct HttpPriceSource {
    config: SourceConfig,
    client: Client,
    request_timeout: Duration,
}

impl HttpPriceSource {
    pub fn new(config: SourceConfig, client: Client, request_timeout: Duration) -> Self {
        Self {
            config,
            client,
            request_timeout,
        }
    }

    fn price_url(&self, token: &TokenId) -> String {
        format!(
            "{}/price/{}",
            self.config.endpoint.trim_end_matches('/'),
            token
        )
    }

    fn transport_error(&self, err: reqwest::Error) -> SourceError {
        if err.is_timeout() {
            SourceError::Timeout {
                source_id: self.config.id.clone(),
                after_ms: self.request_timeout.as_millis() as u64,
            }
        } else {
            SourceError::Unavailable {
                source_id: self.config.id.clone(),
                reason: err.to_string(),
            }
        }
    }
}

#[async_trait::async_trait]
impl PriceSource for HttpPriceSource {
    fn id(&self) -> &SourceId {
        &self.config.id
    }

    async fn fetch(&self, token: &TokenId) -> SourceResult<PriceObservation> {
        let url = self.price_url(token);
        let started = Instant::now();

        debug!(source = %self.config.id, url = %url, "Fetching price");

        let response = self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Unavailable {
                source_id: self.config.id.clone(),
                reason: format!("HTTP {status}"),
            });
        }

        let body = response.text().await.map_err(|e| self.transport_error(e))?;

        parse_price_body(&self.config.id, token, &body, Utc::now(), started.elapsed())
    }
}

/// Creates HTTP sources sharing one connection pool
pub struct HttpSourceFactory {
    client: Client,
    request_timeout: Duration,
}

impl HttpSourceFactory {
    pub fn new(config: &SourceClientConfig) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("oracle-updater/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            request_timeout: config.request_timeout(),
        })
    }
}

impl SourceFactory for HttpSourceFactory {
    fn source(&self, config: &SourceConfig) -> Arc<dyn PriceSource> {
        Arc::new(HttpPriceSource::new(
            config.clone(),
            self.client.clone(),
            self.request_timeout,
        ))
    }
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    price: Option<serde_json::Value>,
    #[serde(default)]
    timestamp: Option<i64>,
}

/// Parse a source response body into an observation
pub fn parse_price_body(
    source: &SourceId,
    token: &TokenId,
    body: &str,
    received_at: DateTime<Utc>,
    latency: Duration,
) -> SourceResult<PriceObservation> {
    let malformed = |reason: String| SourceError::MalformedResponse {
        source_id: source.clone(),
        reason,
    };

    let payload: PriceResponse =
        serde_json::from_str(body).map_err(|e| malformed(e.to_string()))?;

    let price = match payload.price {
        Some(serde_json::Value::Number(n)) => parse_decimal(&n.to_string())
            .ok_or_else(|| malformed(format!("price {n} is not a decimal")))?,
        Some(other) => return Err(malformed(format!("price is not numeric: {other}"))),
        None => return Err(malformed("missing price field".to_string())),
    };

    if price <= Decimal::ZERO {
        return Err(malformed(format!("price {price} is not positive")));
    }

    let observed_at = match payload.timestamp {
        Some(ts) => Utc
            .timestamp_opt(ts, 0)
            .single()
            .ok_or_else(|| malformed(format!("invalid timestamp {ts}")))?,
        None => received_at,
    };

    Ok(PriceObservation {
        source: source.clone(),
        token: token.clone(),
        price,
        observed_at,
        latency,
    })
}

fn parse_decimal(raw: &str) -> Option<Decimal> {
    if raw.contains(['e', 'E']) {
        Decimal::from_scientific(raw).ok()
    } else {
        Decimal::from_str(raw).ok()
    }
}

/// Outcome of polling every source for one token
#[derive(Debug, Default)]
pub struct FetchReport {
    pub observations: Vec<PriceObservation>,
    pub failures: Vec<SourceError>,
}

/// Fetch from all sources concurrently under one shared deadline
///
/// Returns when every source has answered or the deadline passes; sources
/// still running at the deadline are reported as timeouts.
pub async fn collect_observations(
    sources: &[Arc<dyn PriceSource>],
    token: &TokenId,
    timeout: Duration,
) -> FetchReport {
    let deadline = tokio::time::Instant::now() + timeout;

    let fetches = sources.iter().map(|source| async move {
        match tokio::time::timeout_at(deadline, source.fetch(token)).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout {
                source_id: source.id().clone(),
                after_ms: timeout.as_millis() as u64,
            }),
        }
    });

    let mut report = FetchReport::default();
    for result in join_all(fetches).await {
        match result {
            Ok(observation) => report.observations.push(observation),
            Err(e) => {
                warn!(token = %token, source = %e.source_id(), error = %e, "Source excluded");
                report.failures.push(e);
            }
        }
    }

    debug!(
        token = %token,
        ok = report.observations.len(),
        failed = report.failures.len(),
        "Collected observations"
    );

    report
}
