//! Ticker and price-table types.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use strum::{Display, EnumString};
use time::OffsetDateTime;

use crate::exchange::{Exchange, Instrument};

/// Which side of a best-bid/ask ticker is used as "the" price.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PriceSide {
    /// Best bid.
    Bid,
    /// Best ask.
    Ask,
    /// Midpoint of bid and ask.
    #[default]
    Mid,
}

/// Ticker as emitted by a feed adapter, prices still in wire form.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTicker {
    /// Source exchange.
    pub exchange: Exchange,
    /// Canonical instrument.
    pub instrument: Instrument,
    /// Best bid as sent by the exchange.
    pub bid: Option<String>,
    /// Best ask as sent by the exchange.
    pub ask: Option<String>,
    /// Size at the best ask, if sent.
    pub size: Option<String>,
    /// Local receive time.
    pub observed_at: OffsetDateTime,
}

/// Validated ticker event.
#[derive(Debug, Clone, PartialEq)]
pub struct TickerEvent {
    /// Canonical instrument.
    pub instrument: Instrument,
    /// Source exchange.
    pub exchange: Exchange,
    /// Price on the configured side.
    pub price: Decimal,
    /// Size at that price, when known.
    pub size: Option<Decimal>,
    /// Local receive time.
    pub observed_at: OffsetDateTime,
}

/// Latest price from one exchange.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceRecord {
    /// Price.
    pub price: Decimal,
    /// When it was written.
    pub last_updated: OffsetDateTime,
}

/// Per-exchange prices for one instrument at one moment.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSnapshot {
    /// Instrument.
    pub instrument: Instrument,
    /// `(exchange, price)` pairs in exchange order.
    pub prices: SmallVec<[(Exchange, Decimal); 4]>,
    /// When the snapshot was taken.
    pub taken_at: OffsetDateTime,
}

impl PriceSnapshot {
    /// Build a snapshot from `(exchange, price)` pairs.
    pub fn new(instrument: Instrument, prices: impl IntoIterator<Item = (Exchange, Decimal)>) -> Self {
        Self {
            instrument,
            prices: prices.into_iter().collect(),
            taken_at: OffsetDateTime::now_utc(),
        }
    }

    /// Price quoted by `exchange`, if present.
    pub fn price_on(&self, exchange: Exchange) -> Option<Decimal> {
        self.prices
            .iter()
            .find(|(ex, _)| *ex == exchange)
            .map(|(_, price)| *price)
    }

    /// Number of exchanges quoting.
    pub fn len(&self) -> usize {
        self.prices.len()
    }

    /// Whether no exchange is quoting.
    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::str::FromStr;

    #[test]
    fn snapshot_lookup_by_exchange() {
        let snapshot = PriceSnapshot::new(
            Instrument::new("SOL", "USDT"),
            [(Exchange::Binance, dec!(100)), (Exchange::Kucoin, dec!(102))],
        );

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.price_on(Exchange::Kucoin), Some(dec!(102)));
    }

    #[test]
    fn price_side_parses_lowercase() {
        assert_eq!(PriceSide::from_str("ask").unwrap(), PriceSide::Ask);
        assert_eq!(PriceSide::default(), PriceSide::Mid);
        assert_eq!(PriceSide::Bid.to_string(), "bid");
    }
}
