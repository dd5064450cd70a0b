//! Tickers in, orders out: aggregator driving the orchestrator.

use std::sync::Arc;

use cex_arb::arbitrage::EngineState;
use cex_arb::exchange::{Exchange, PaperOp, Wallet};
use cex_arb::notify::Event;
use cex_arb::orderbook::{PriceAggregator, PriceSide, RawTicker};
use cex_arb::trading::{MemoryStore, PositionStore, Step};
use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;
use time::OffsetDateTime;
use tokio::sync::mpsc;

use crate::common::{eventually, orchestrator, sol, Venues};

fn ticker(exchange: Exchange, bid: &str, ask: &str) -> RawTicker {
    RawTicker {
        exchange,
        instrument: sol(),
        bid: Some(bid.to_string()),
        ask: Some(ask.to_string()),
        size: Some("50".to_string()),
        observed_at: OffsetDateTime::now_utc(),
    }
}

#[tokio::test]
async fn gap_opens_then_convergence_closes() {
    let venues = Venues::funded();
    let store = Arc::new(MemoryStore::new());
    let (engine, events) = orchestrator(&venues, store.clone());
    engine.recover().await.unwrap();

    let (tx, rx) = mpsc::channel(16);
    let aggregator = tokio::spawn(PriceAggregator::new(PriceSide::Mid).run(rx, engine.clone()));

    tx.send(ticker(Exchange::Binance, "99.9", "100.1")).await.unwrap();
    tx.send(ticker(Exchange::Kucoin, "101.9", "102.1")).await.unwrap();
    assert!(eventually(|| engine.state() == EngineState::Open).await);

    let position = store.load().await.unwrap().unwrap();
    assert_eq!(position.step, Step::SellPlaced);
    assert_eq!(position.buy_exchange, Exchange::Binance);
    assert_eq!(position.sell_exchange, Exchange::Kucoin);
    assert_eq!(position.amount, dec!(10));

    // Still a gap: nothing happens.
    tx.send(ticker(Exchange::Kucoin, "100.9", "101.1")).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(engine.state(), EngineState::Open);

    tx.send(ticker(Exchange::Binance, "100.9", "101.1")).await.unwrap();
    assert!(eventually(|| engine.stats().closed == 1).await);

    drop(tx);
    aggregator.await.unwrap();

    assert!(store.load().await.unwrap().is_none());
    assert_eq!(venues.kucoin.loan("SOL"), dec!(0));
    assert_eq!(venues.binance.balance("SOL", Wallet::Spot), dec!(0));
    assert_eq!(venues.binance.calls(PaperOp::PlaceOrder), 2);
    assert_eq!(venues.kucoin.calls(PaperOp::RepayLoan), 1);

    let kinds: Vec<&'static str> = events
        .events()
        .iter()
        .map(|e| match e {
            Event::OpportunityDetected { .. } => "detected",
            Event::PositionOpened { .. } => "opened",
            Event::PositionClosed { .. } => "closed",
            _ => "other",
        })
        .collect();
    assert_eq!(kinds, vec!["detected", "opened", "closed"]);
}

#[tokio::test]
async fn malformed_ticker_does_not_trade() {
    let venues = Venues::funded();
    let store = Arc::new(MemoryStore::new());
    let (engine, _events) = orchestrator(&venues, store.clone());

    let (tx, rx) = mpsc::channel(16);
    let aggregator = tokio::spawn(PriceAggregator::new(PriceSide::Mid).run(rx, engine.clone()));

    tx.send(ticker(Exchange::Binance, "99.9", "100.1")).await.unwrap();
    tx.send(ticker(Exchange::Kucoin, "not-a-price", "102.1")).await.unwrap();
    tx.send(ticker(Exchange::Kucoin, "0", "0")).await.unwrap();
    drop(tx);
    aggregator.await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    assert_eq!(engine.state(), EngineState::Idle);
    assert_eq!(venues.binance.calls(PaperOp::PlaceOrder), 0);
    assert!(store.load().await.unwrap().is_none());
}

#[tokio::test]
async fn instruments_share_one_position_slot() {
    let venues = Venues::funded();
    let store = Arc::new(MemoryStore::new());
    let (engine, _events) = orchestrator(&venues, store.clone());

    let (tx, rx) = mpsc::channel(16);
    let aggregator = tokio::spawn(PriceAggregator::new(PriceSide::Mid).run(rx, engine.clone()));

    tx.send(ticker(Exchange::Binance, "99.9", "100.1")).await.unwrap();
    tx.send(ticker(Exchange::Kucoin, "101.9", "102.1")).await.unwrap();
    assert!(eventually(|| engine.state() == EngineState::Open).await);

    let xrp = cex_arb::exchange::Instrument::new("XRP", "USDT");
    for (exchange, px) in [(Exchange::Binance, "0.50"), (Exchange::Kucoin, "0.60")] {
        tx.send(RawTicker {
            instrument: xrp.clone(),
            ..ticker(exchange, px, px)
        })
        .await
        .unwrap();
    }
    drop(tx);
    aggregator.await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    assert_eq!(engine.stats().opened, 1);
    assert_eq!(store.load().await.unwrap().unwrap().coin, "SOL");
    assert_eq!(venues.binance.calls(PaperOp::PlaceOrder), 1);
}
