//! Opportunity detection over price snapshots.

use std::time::Instant;

use rust_decimal::Decimal;
use tracing::{debug, info, instrument, warn};

use super::calculator::{evaluate, price_extremes, Opportunity, StrategyParams};
use crate::error::ArbitrageError;
use crate::exchange::Exchange;
use crate::metrics;
use crate::orderbook::PriceSnapshot;

/// Evaluate a snapshot, logging the outcome.
///
/// A non-positive price is reported as an error rather than silently skipped
/// so a broken feed shows up in the logs.
#[instrument(skip(snapshot, params), fields(instrument = %snapshot.instrument))]
pub fn check_arbitrage(
    snapshot: &PriceSnapshot,
    params: &StrategyParams,
) -> Result<Option<Opportunity>, ArbitrageError> {
    let start = Instant::now();

    if let Some((exchange, price)) = snapshot
        .prices
        .iter()
        .copied()
        .find(|(_, price)| *price <= Decimal::ZERO)
    {
        warn!(exchange = %exchange, price = %price, "Non-positive price in snapshot");
        return Err(ArbitrageError::InvalidPrice { exchange, price });
    }

    let opportunity = evaluate(&snapshot.instrument, &snapshot.prices, params);
    metrics::record_evaluation_latency(start);

    match &opportunity {
        Some(opp) => {
            metrics::inc_opportunities_detected();
            info!(
                buy = %opp.buy_exchange,
                sell = %opp.sell_exchange,
                buy_price = %opp.buy_price,
                sell_price = %opp.sell_price,
                net = %opp.net,
                expected_profit = %opp.expected_profit,
                "Arbitrage opportunity detected"
            );
        }
        None => {
            debug!(diagnosis = %diagnose_no_opportunity(snapshot, params), "No arbitrage opportunity");
        }
    }

    Ok(opportunity)
}

/// Explain why a snapshot produced no opportunity.
pub fn diagnose_no_opportunity(snapshot: &PriceSnapshot, params: &StrategyParams) -> NoOpportunityDiagnosis {
    let extremes = price_extremes(&snapshot.prices);
    let (low, high) = match extremes {
        Some((low, high)) => (Some(low), Some(high)),
        None => (None, None),
    };

    let net = match (low, high) {
        (Some((_, min)), Some((_, max))) if min > Decimal::ZERO => {
            let units = params.capital / (min * (Decimal::ONE + params.fee_rate));
            Some(units * max * (Decimal::ONE - params.fee_rate) - params.transfer_cost)
        }
        _ => None,
    };

    NoOpportunityDiagnosis {
        exchanges: snapshot.len(),
        low,
        high,
        net,
        required: params.capital + params.min_profit_margin,
    }
}

/// Diagnostic information for debugging.
#[derive(Debug, Clone, PartialEq)]
pub struct NoOpportunityDiagnosis {
    /// Exchanges quoting.
    pub exchanges: usize,
    /// Cheapest quote.
    pub low: Option<(Exchange, Decimal)>,
    /// Richest quote.
    pub high: Option<(Exchange, Decimal)>,
    /// Net after fees and transfer, when computable.
    pub net: Option<Decimal>,
    /// Net needed to open.
    pub required: Decimal,
}

impl std::fmt::Display for NoOpportunityDiagnosis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let quote = |q: Option<(Exchange, Decimal)>| {
            q.map(|(ex, px)| format!("{ex}@{px}"))
                .unwrap_or_else(|| "N/A".to_string())
        };
        write!(
            f,
            "low={} high={} net={} required={} ({} exchanges)",
            quote(self.low),
            quote(self.high),
            self.net
                .map(|n| n.round_dp(4).to_string())
                .unwrap_or_else(|| "N/A".to_string()),
            self.required,
            self.exchanges,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::Instrument;
    use rust_decimal_macros::dec;

    fn params() -> StrategyParams {
        StrategyParams {
            capital: dec!(1000),
            fee_rate: dec!(0.001),
            transfer_cost: dec!(0.08),
            min_profit_margin: dec!(0.1),
        }
    }

    fn snapshot(binance: Decimal, kucoin: Decimal) -> PriceSnapshot {
        PriceSnapshot::new(
            Instrument::new("SOL", "USDT"),
            [(Exchange::Binance, binance), (Exchange::Kucoin, kucoin)],
        )
    }

    #[test]
    fn check_arbitrage_finds_opportunity() {
        let result = check_arbitrage(&snapshot(dec!(102), dec!(100)), &params()).unwrap();

        let opp = result.unwrap();
        assert_eq!(opp.buy_exchange, Exchange::Kucoin);
        assert_eq!(opp.sell_exchange, Exchange::Binance);
    }

    #[test]
    fn check_arbitrage_returns_none_for_tight_market() {
        let result = check_arbitrage(&snapshot(dec!(100), dec!(100.05)), &params()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn check_arbitrage_rejects_zero_price() {
        let err = check_arbitrage(&snapshot(dec!(0), dec!(100)), &params()).unwrap_err();
        assert!(matches!(
            err,
            ArbitrageError::InvalidPrice {
                exchange: Exchange::Binance,
                ..
            }
        ));
    }

    #[test]
    fn diagnosis_reports_extremes_and_shortfall() {
        let diagnosis = diagnose_no_opportunity(&snapshot(dec!(100), dec!(100.05)), &params());

        assert_eq!(diagnosis.low, Some((Exchange::Binance, dec!(100))));
        assert_eq!(diagnosis.high, Some((Exchange::Kucoin, dec!(100.05))));
        assert!(diagnosis.net.unwrap() < diagnosis.required);
        assert!(diagnosis.to_string().contains("BINANCE@100"));
    }
}
