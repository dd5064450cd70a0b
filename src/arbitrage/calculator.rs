//! Profit and sizing calculations for cross-exchange opportunities.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::ArbitrageError;
use crate::exchange::{Exchange, Instrument};
use crate::orderbook::PriceSnapshot;
use crate::trading::Position;

/// Decimal places used when lots need not be whole units.
const FRACTIONAL_LOT_DP: u32 = 8;

/// Inputs to the profitability test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrategyParams {
    /// Quote committed per leg.
    pub capital: Decimal,
    /// Taker fee as a fraction.
    pub fee_rate: Decimal,
    /// Absolute transfer cost in quote.
    pub transfer_cost: Decimal,
    /// Minimum net gain over capital.
    pub min_profit_margin: Decimal,
}

/// Detected cross-exchange opportunity.
#[derive(Debug, Clone, PartialEq)]
pub struct Opportunity {
    /// Instrument.
    pub instrument: Instrument,
    /// Cheapest venue (spot buy).
    pub buy_exchange: Exchange,
    /// Most expensive venue (margin short).
    pub sell_exchange: Exchange,
    /// Price on the buy venue.
    pub buy_price: Decimal,
    /// Price on the sell venue.
    pub sell_price: Decimal,
    /// Units bought after fees.
    pub buy_units: Decimal,
    /// Quote received on the sell venue after fees.
    pub proceeds: Decimal,
    /// Proceeds minus transfer cost.
    pub net: Decimal,
    /// `net - capital`.
    pub expected_profit: Decimal,
    /// When it was detected.
    pub detected_at: OffsetDateTime,
}

impl Opportunity {
    /// Relative price gap in percent.
    pub fn spread_pct(&self) -> Decimal {
        if self.buy_price.is_zero() {
            Decimal::ZERO
        } else {
            (self.sell_price - self.buy_price) / self.buy_price * Decimal::ONE_HUNDRED
        }
    }
}

/// Lowest and highest quote in a price list. Ties keep the first seen.
pub fn price_extremes(prices: &[(Exchange, Decimal)]) -> Option<((Exchange, Decimal), (Exchange, Decimal))> {
    let mut iter = prices.iter().copied();
    let first = iter.next()?;
    let (mut min, mut max) = (first, first);
    for entry in iter {
        if entry.1 < min.1 {
            min = entry;
        }
        if entry.1 > max.1 {
            max = entry;
        }
    }
    Some((min, max))
}

/// Evaluate one instrument's prices against the strategy parameters.
pub fn evaluate(
    instrument: &Instrument,
    prices: &[(Exchange, Decimal)],
    params: &StrategyParams,
) -> Option<Opportunity> {
    if prices.iter().any(|(_, price)| *price <= Decimal::ZERO) {
        return None;
    }

    let ((buy_exchange, min), (sell_exchange, max)) = price_extremes(prices)?;
    if buy_exchange == sell_exchange {
        return None;
    }

    let buy_units = params.capital / (min * (Decimal::ONE + params.fee_rate));
    let proceeds = buy_units * max * (Decimal::ONE - params.fee_rate);
    let net = proceeds - params.transfer_cost;

    if net <= params.capital + params.min_profit_margin {
        return None;
    }

    Some(Opportunity {
        instrument: instrument.clone(),
        buy_exchange,
        sell_exchange,
        buy_price: min,
        sell_price: max,
        buy_units,
        proceeds,
        net,
        expected_profit: net - params.capital,
        detected_at: OffsetDateTime::now_utc(),
    })
}

/// Whether the gap an open position was opened on has closed.
///
/// Returns false while either venue is missing from the snapshot.
pub fn should_close(position: &Position, snapshot: &PriceSnapshot, close_spread: Decimal) -> bool {
    match (
        snapshot.price_on(position.buy_exchange),
        snapshot.price_on(position.sell_exchange),
    ) {
        (Some(buy_px), Some(sell_px)) => buy_px >= sell_px - close_spread,
        _ => false,
    }
}

/// Base quantity to trade for `capital` at `price`.
pub fn order_amount(capital: Decimal, price: Decimal, integer_lots: bool) -> Result<Decimal, ArbitrageError> {
    if price <= Decimal::ZERO {
        return Err(ArbitrageError::InvalidSize(Decimal::ZERO));
    }

    let raw = capital / price;
    let amount = if integer_lots {
        raw.floor()
    } else {
        raw.round_dp_with_strategy(FRACTIONAL_LOT_DP, RoundingStrategy::ToZero)
    };

    if amount <= Decimal::ZERO {
        return Err(ArbitrageError::InvalidSize(amount));
    }
    Ok(amount.normalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn params() -> StrategyParams {
        StrategyParams {
            capital: dec!(1000),
            fee_rate: dec!(0.001),
            transfer_cost: dec!(0.08),
            min_profit_margin: dec!(0.1),
        }
    }

    fn sol() -> Instrument {
        Instrument::new("SOL", "USDT")
    }

    #[test]
    fn two_percent_gap_is_an_opportunity() {
        let prices = [(Exchange::Binance, dec!(100)), (Exchange::Kucoin, dec!(102))];

        let opp = evaluate(&sol(), &prices, &params()).unwrap();

        assert_eq!(opp.buy_exchange, Exchange::Binance);
        assert_eq!(opp.sell_exchange, Exchange::Kucoin);
        assert!(opp.net > dec!(1017) && opp.net < dec!(1018));
        assert!(opp.expected_profit > dec!(17));
        assert_eq!(opp.spread_pct(), dec!(2));
    }

    #[test]
    fn fees_eat_a_tiny_gap() {
        let prices = [(Exchange::Binance, dec!(100)), (Exchange::Kucoin, dec!(100.05))];
        assert!(evaluate(&sol(), &prices, &params()).is_none());
    }

    #[test]
    fn single_exchange_is_never_an_opportunity() {
        let prices = [(Exchange::Binance, dec!(100))];
        assert!(evaluate(&sol(), &prices, &params()).is_none());
    }

    #[test]
    fn equal_prices_keep_first_seen_and_yield_nothing() {
        let prices = [(Exchange::Kucoin, dec!(100)), (Exchange::Binance, dec!(100))];
        let ((min_ex, _), (max_ex, _)) = price_extremes(&prices).unwrap();
        assert_eq!(min_ex, Exchange::Kucoin);
        assert_eq!(max_ex, Exchange::Kucoin);
        assert!(evaluate(&sol(), &prices, &params()).is_none());
    }

    #[test]
    fn non_positive_price_yields_nothing() {
        let prices = [(Exchange::Binance, dec!(0)), (Exchange::Kucoin, dec!(102))];
        assert!(evaluate(&sol(), &prices, &params()).is_none());
    }

    #[test]
    fn profit_must_exceed_margin_strictly() {
        let tight = StrategyParams {
            fee_rate: dec!(0),
            transfer_cost: dec!(0),
            min_profit_margin: dec!(20),
            ..params()
        };
        let prices = [(Exchange::Binance, dec!(100)), (Exchange::Kucoin, dec!(102))];
        // net = 1020 exactly, threshold 1020
        assert!(evaluate(&sol(), &prices, &tight).is_none());
    }

    #[test]
    fn close_when_gap_has_converged() {
        let position = Position::opened(
            Exchange::Binance,
            Exchange::Kucoin,
            &sol(),
            dec!(9),
            dec!(1000),
            dec!(100),
            dec!(102),
        );
        let open = PriceSnapshot::new(sol(), [(Exchange::Binance, dec!(100)), (Exchange::Kucoin, dec!(101))]);
        let closed = PriceSnapshot::new(sol(), [(Exchange::Binance, dec!(101)), (Exchange::Kucoin, dec!(101))]);

        assert!(!should_close(&position, &open, dec!(0)));
        assert!(should_close(&position, &closed, dec!(0)));
        assert!(should_close(&position, &open, dec!(1)));
    }

    #[test]
    fn close_needs_both_venues() {
        let position = Position::opened(
            Exchange::Binance,
            Exchange::Kucoin,
            &sol(),
            dec!(9),
            dec!(1000),
            dec!(100),
            dec!(102),
        );
        let partial = PriceSnapshot::new(sol(), [(Exchange::Binance, dec!(200))]);
        assert!(!should_close(&position, &partial, dec!(0)));
    }

    #[test]
    fn order_amount_rounds_down() {
        assert_eq!(order_amount(dec!(60), dec!(7), true).unwrap(), dec!(8));
        assert_eq!(order_amount(dec!(60), dec!(7), false).unwrap(), dec!(8.57142857));
        assert!(matches!(
            order_amount(dec!(60), dec!(70), true),
            Err(ArbitrageError::InvalidSize(_))
        ));
        assert!(order_amount(dec!(60), dec!(0), true).is_err());
    }
}
