//! Shared fixtures.

use std::sync::Arc;
use std::time::Duration;

use cex_arb::arbitrage::{Orchestrator, OrchestratorSettings, StrategyParams};
use cex_arb::exchange::{Exchange, ExchangeRegistry, Instrument, PaperExchange, Wallet};
use cex_arb::notify::{NotifierRegistry, RecordingNotifier};
use cex_arb::trading::PositionStore;
use rust_decimal_macros::dec;

pub struct Venues {
    pub binance: Arc<PaperExchange>,
    pub kucoin: Arc<PaperExchange>,
}

impl Venues {
    pub fn funded() -> Self {
        let binance = Arc::new(PaperExchange::new(Exchange::Binance));
        let kucoin = Arc::new(PaperExchange::new(Exchange::Kucoin));
        binance.deposit("USDT", Wallet::Spot, dec!(5000));
        kucoin.deposit("USDT", Wallet::Spot, dec!(5000));
        Self { binance, kucoin }
    }

    pub fn registry(&self) -> ExchangeRegistry {
        ExchangeRegistry::new()
            .with(self.binance.clone())
            .with(self.kucoin.clone())
    }
}

pub fn settings() -> OrchestratorSettings {
    OrchestratorSettings {
        params: StrategyParams {
            capital: dec!(1000),
            fee_rate: dec!(0.001),
            transfer_cost: dec!(0.08),
            min_profit_margin: dec!(0.1),
        },
        close_spread: dec!(0),
        integer_lots: true,
        stuck_retry: Duration::ZERO,
        rebalance_after_close: false,
    }
}

pub fn orchestrator(
    venues: &Venues,
    store: Arc<dyn PositionStore>,
) -> (Arc<Orchestrator>, RecordingNotifier) {
    let events = RecordingNotifier::new();
    let mut notifier = NotifierRegistry::new();
    notifier.register(Box::new(events.clone()));
    let orchestrator = Orchestrator::new(venues.registry(), store, notifier, settings());
    (Arc::new(orchestrator), events)
}

pub fn sol() -> Instrument {
    Instrument::new("SOL", "USDT")
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
