//! Exchange adapters and venue-neutral exchange types.

pub mod binance;
pub mod client;
pub mod kucoin;
pub mod paper;
pub mod retry;
pub mod symbols;
pub mod types;

pub use binance::{BinanceClient, BinanceFeed};
pub use client::{build_http_client, transfer_external, ExchangeClient, ExchangeRegistry, SharedClient};
pub use kucoin::{KucoinClient, KucoinFeed};
pub use paper::{PaperExchange, PaperOp};
pub use retry::{RetryPolicy, Retrying};
pub use symbols::SymbolNormalizer;
pub use types::{available, Balance, DepositAddress, Exchange, Instrument, Wallet};
