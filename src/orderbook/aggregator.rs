//! Single-owner price table.
//!
//! The aggregator task is the only writer of the table. Every accepted ticker
//! replaces the previous record for its `(instrument, exchange)` pair; once an
//! instrument is quoted by two or more exchanges, a snapshot is handed to the
//! [`SnapshotHandler`] on a separate task so evaluation never stalls ingestion.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rust_decimal::Decimal;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::types::{PriceRecord, PriceSide, PriceSnapshot, RawTicker, TickerEvent};
use crate::error::WsError;
use crate::exchange::{Exchange, Instrument};
use crate::metrics;

/// Receives snapshots produced by the aggregator.
#[async_trait]
pub trait SnapshotHandler: Send + Sync + 'static {
    /// Evaluate one snapshot. Runs on its own task.
    async fn on_snapshot(&self, snapshot: PriceSnapshot);
}

/// Parse a raw ticker into a validated event using the configured side.
pub fn parse_ticker(raw: &RawTicker, side: PriceSide) -> Result<TickerEvent, WsError> {
    let parse = |label: &str, value: &Option<String>| -> Result<Decimal, WsError> {
        let text = value
            .as_deref()
            .ok_or_else(|| WsError::ParseError(format!("missing {label} price")))?;
        let price: Decimal = text
            .trim()
            .parse()
            .map_err(|_| WsError::ParseError(format!("malformed {label} price {text:?}")))?;
        if price <= Decimal::ZERO {
            return Err(WsError::ParseError(format!("non-positive {label} price {price}")));
        }
        Ok(price)
    };

    let price = match side {
        PriceSide::Bid => parse("bid", &raw.bid)?,
        PriceSide::Ask => parse("ask", &raw.ask)?,
        PriceSide::Mid => (parse("bid", &raw.bid)? + parse("ask", &raw.ask)?) / Decimal::TWO,
    };

    Ok(TickerEvent {
        instrument: raw.instrument.clone(),
        exchange: raw.exchange,
        price,
        size: raw.size.as_deref().and_then(|s| s.trim().parse().ok()),
        observed_at: raw.observed_at,
    })
}

/// In-memory table of the latest price per instrument and exchange.
#[derive(Debug)]
pub struct PriceAggregator {
    table: HashMap<Instrument, HashMap<Exchange, PriceRecord>>,
    side: PriceSide,
    max_age: Option<Duration>,
}

impl PriceAggregator {
    /// New empty table.
    pub fn new(side: PriceSide) -> Self {
        Self {
            table: HashMap::new(),
            side,
            max_age: None,
        }
    }

    /// Exclude records older than `max_age` from snapshots.
    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    /// Apply one ticker. Returns a snapshot when at least two exchanges quote
    /// the instrument. Malformed prices are dropped and leave the table as is.
    pub fn ingest(&mut self, raw: RawTicker) -> Option<PriceSnapshot> {
        let event = match parse_ticker(&raw, self.side) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    exchange = %raw.exchange,
                    instrument = %raw.instrument,
                    error = %e,
                    "Dropping ticker"
                );
                metrics::inc_tickers_dropped(raw.exchange);
                return None;
            }
        };

        metrics::inc_tickers_received(event.exchange);
        self.apply(event)
    }

    /// Write an already-validated event.
    pub fn apply(&mut self, event: TickerEvent) -> Option<PriceSnapshot> {
        let now = OffsetDateTime::now_utc();
        let prices = self.table.entry(event.instrument.clone()).or_default();
        prices.insert(
            event.exchange,
            PriceRecord {
                price: event.price,
                last_updated: now,
            },
        );

        self.snapshot(&event.instrument)
    }

    /// Current snapshot for an instrument, if two or more exchanges quote it.
    pub fn snapshot(&self, instrument: &Instrument) -> Option<PriceSnapshot> {
        let prices = self.table.get(instrument)?;
        let now = OffsetDateTime::now_utc();

        let mut fresh: Vec<(Exchange, Decimal)> = prices
            .iter()
            .filter(|(_, record)| match self.max_age {
                Some(max_age) => (now - record.last_updated) <= max_age,
                None => true,
            })
            .map(|(exchange, record)| (*exchange, record.price))
            .collect();

        if fresh.len() < 2 {
            return None;
        }
        fresh.sort_by_key(|(exchange, _)| *exchange);

        Some(PriceSnapshot {
            instrument: instrument.clone(),
            prices: fresh.into_iter().collect(),
            taken_at: now,
        })
    }

    /// Latest record for one `(instrument, exchange)` pair.
    pub fn record(&self, instrument: &Instrument, exchange: Exchange) -> Option<PriceRecord> {
        self.table.get(instrument)?.get(&exchange).copied()
    }

    /// Number of instruments with at least one price.
    pub fn instrument_count(&self) -> usize {
        self.table.len()
    }

    /// Consume tickers until every sender is dropped, dispatching snapshots
    /// to `handler` on spawned tasks.
    ///
    /// Returns only after every dispatched evaluation has finished.
    pub async fn run<H: SnapshotHandler>(mut self, mut rx: mpsc::Receiver<RawTicker>, handler: Arc<H>) {
        info!(side = %self.side, "Price aggregator started");
        let mut last_report = Instant::now();
        let mut ingested = 0u64;
        let mut evaluations = JoinSet::new();

        while let Some(raw) = rx.recv().await {
            ingested += 1;
            if let Some(snapshot) = self.ingest(raw) {
                let handler = handler.clone();
                evaluations.spawn(async move {
                    handler.on_snapshot(snapshot).await;
                });
            }
            while let Some(done) = evaluations.try_join_next() {
                if let Err(e) = done {
                    warn!(error = %e, "Snapshot evaluation task failed");
                }
            }

            if last_report.elapsed() >= Duration::from_secs(60) {
                debug!(
                    ingested = ingested,
                    instruments = self.instrument_count(),
                    "Aggregator throughput"
                );
                last_report = Instant::now();
                ingested = 0;
            }
        }

        info!(
            in_flight = evaluations.len(),
            "Ticker channel closed, waiting for in-flight evaluations"
        );
        while let Some(done) = evaluations.join_next().await {
            if let Err(e) = done {
                warn!(error = %e, "Snapshot evaluation task failed");
            }
        }
        info!("Aggregator stopped");
    }
}
