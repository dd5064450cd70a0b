//! Live price pipeline.
//!
//! - Ticker and snapshot types
//! - Single-owner price aggregator
//! - Reconnecting WebSocket feed shared by the exchange adapters

pub mod aggregator;
pub mod types;
pub mod websocket;

pub use aggregator::{parse_ticker, PriceAggregator, SnapshotHandler};
pub use types::{PriceRecord, PriceSide, PriceSnapshot, RawTicker, TickerEvent};
pub use websocket::{FeedEndpoint, FeedProtocol, ReconnectConfig, TickerFeed};
