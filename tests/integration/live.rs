//! Read-only checks against the real exchanges.

use cex_arb::config::Config;
use cex_arb::exchange::{BinanceClient, Exchange, ExchangeClient, KucoinClient};

/// Config with credentials from the environment, if present.
fn live_config() -> Option<Config> {
    let config = Config::load().ok()?;
    (config.has_credentials(Exchange::Binance) && config.has_credentials(Exchange::Kucoin))
        .then_some(config)
}

#[tokio::test]
#[ignore = "requires BINANCE_* and KUCOIN_* API credentials"]
async fn test_get_balances() {
    let Some(config) = live_config() else {
        println!("Skipping: exchange credentials not set");
        return;
    };

    let binance = BinanceClient::new(&config).unwrap();
    let kucoin = KucoinClient::new(&config).unwrap();

    let result = binance.get_balances().await;
    assert!(result.is_ok(), "Binance balances failed: {:?}", result.err());
    let result = kucoin.get_balances().await;
    assert!(result.is_ok(), "KuCoin balances failed: {:?}", result.err());
}

#[tokio::test]
#[ignore = "requires BINANCE_* and KUCOIN_* API credentials"]
async fn test_deposit_addresses() {
    let Some(config) = live_config() else {
        println!("Skipping: exchange credentials not set");
        return;
    };

    let kucoin = KucoinClient::new(&config).unwrap();
    let address = kucoin.deposit_address("USDT").await.unwrap();
    assert!(!address.address.is_empty());
}
