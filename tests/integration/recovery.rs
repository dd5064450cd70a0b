//! Restart recovery against the SQLite store.

use std::sync::Arc;

use cex_arb::arbitrage::{evaluate, EngineState};
use cex_arb::exchange::{Exchange, ExchangeClient, PaperOp, Wallet};
use cex_arb::trading::{OrderRequest, PositionStore, SqliteStore, Step};
use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;

use crate::common::{orchestrator, settings, sol, Venues};

#[tokio::test]
async fn open_position_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("positions.db");
    let venues = Venues::funded();

    let opened = {
        let store = Arc::new(SqliteStore::open(&path).unwrap());
        let (engine, _) = orchestrator(&venues, store);
        engine.recover().await.unwrap();
        let opportunity = evaluate(
            &sol(),
            &[(Exchange::Binance, dec!(100)), (Exchange::Kucoin, dec!(102))],
            &settings().params,
        )
        .unwrap();
        engine.open(&opportunity).await.unwrap()
    };

    let store = Arc::new(SqliteStore::open(&path).unwrap());
    let (engine, _) = orchestrator(&venues, store.clone());
    venues.kucoin.reset_calls();

    let state = engine.recover().await.unwrap();

    assert_eq!(state, EngineState::Open);
    assert_eq!(engine.position(), Some(opened.clone()));
    assert_eq!(store.load().await.unwrap(), Some(opened));
    assert!(venues.kucoin.call_log().is_empty());
}

#[tokio::test]
async fn interrupted_close_resumes_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("positions.db");
    let venues = Venues::funded();

    // Short bought back, coin moved, loan still outstanding.
    venues.kucoin.deposit("USDT", Wallet::Margin, dec!(1000));
    venues
        .kucoin
        .place_market_order(&OrderRequest::margin_sell(sol(), dec!(10), dec!(102)))
        .await
        .unwrap();
    venues.kucoin.deposit("SOL", Wallet::Margin, dec!(10));
    venues.kucoin.reset_calls();

    let mut position = cex_arb::trading::Position::opened(
        Exchange::Binance,
        Exchange::Kucoin,
        &sol(),
        dec!(10),
        dec!(1000),
        dec!(100),
        dec!(102),
    );
    position.advance_to(Step::Transfer1).unwrap();
    position.buy_leg = cex_arb::trading::LegState::Reversed;
    position.sell_leg = cex_arb::trading::LegState::Reversed;
    SqliteStore::open(&path).unwrap().save(&position).await.unwrap();

    let store = Arc::new(SqliteStore::open(&path).unwrap());
    let (engine, _) = orchestrator(&venues, store.clone());

    let state = engine.recover().await.unwrap();

    assert_eq!(state, EngineState::Idle);
    assert_eq!(venues.kucoin.calls(PaperOp::RepayLoan), 1);
    assert_eq!(venues.kucoin.calls(PaperOp::TransferInternal), 1);
    assert_eq!(venues.kucoin.calls(PaperOp::PlaceOrder), 0);
    assert_eq!(venues.binance.calls(PaperOp::PlaceOrder), 0);
    assert_eq!(venues.kucoin.loan("SOL"), dec!(0));
    assert!(store.load().await.unwrap().is_none());
}

#[tokio::test]
async fn legacy_record_is_recovered_as_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("legacy.db");
    let venues = Venues::funded();

    let store = SqliteStore::open(&path).unwrap();
    for (key, value) in [
        ("buyMarket", "KUCOIN"),
        ("sellMarket", "BINANCE"),
        ("coin", "SOL"),
        ("amount", "3.000000"),
        ("minPrice", "20.000000"),
        ("maxPrice", "21.000000"),
    ] {
        store.put_raw(key, value).await.unwrap();
    }

    let (engine, _) = orchestrator(&venues, Arc::new(store));
    let state = engine.recover().await.unwrap();

    assert_eq!(state, EngineState::Open);
    let position = engine.position().unwrap();
    assert_eq!(position.buy_exchange, Exchange::Kucoin);
    assert_eq!(position.amount, dec!(3));
    assert_eq!(position.step, Step::SellPlaced);
}
