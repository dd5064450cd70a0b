//! Cross-exchange spot/margin arbitrage engine for Binance and KuCoin.
//!
//! The engine watches best prices for a set of instruments on both venues.
//! When the cheaper venue's price, after fees and transfer cost, leaves
//! enough profit against the richer venue's price, it buys spot on the cheap
//! venue and sells the same quantity short on margin on the rich one. Once
//! the gap closes it reverses both legs, repays the loan and releases the
//! collateral.
//!
//! ```text
//! BINANCE SOL-USDT: 100.00   buy 10 spot
//! KUCOIN  SOL-USDT: 102.00   sell 10 on margin (borrowed)
//! ─────────────────────────
//! Gap closes at 101 / 101:   sell 10 spot, buy 10 back, repay loan
//! ```
//!
//! At most one position is open at any time, and every step of its lifecycle
//! is persisted so a restart resumes where the previous process stopped.
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from environment
//! - [`error`]: Unified error types
//! - [`exchange`]: Venue types, REST adapters, feeds and the paper exchange
//! - [`orderbook`]: Ticker ingestion, reconnecting feeds and price snapshots
//! - [`arbitrage`]: Opportunity evaluation and the position orchestrator
//! - [`trading`]: Orders, the position record and its store
//! - [`notify`]: Operator notifications
//! - [`metrics`]: Prometheus metrics
//! - [`api`]: HTTP API for health/status/metrics
//! - [`signing`]: Request signing for exchange REST APIs
//! - [`utils`]: Shutdown helpers

pub mod api;
pub mod arbitrage;
pub mod config;
pub mod error;
pub mod exchange;
pub mod metrics;
pub mod notify;
pub mod orderbook;
pub mod signing;
pub mod trading;
pub mod utils;

pub use config::Config;
pub use error::{BotError, Result};
