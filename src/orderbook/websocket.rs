//! Reconnecting WebSocket ticker feed.
//!
//! Exchange-specific details (endpoint negotiation, subscribe frames, payload
//! parsing, application-level pings) live behind [`FeedProtocol`]; the
//! connection loop, backoff and shutdown handling are shared.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::{SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::types::RawTicker;
use crate::error::WsError;
use crate::exchange::{Exchange, Instrument};
use crate::metrics;

/// Reconnection configuration for WebSocket feeds.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial backoff delay in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum backoff delay in seconds.
    pub max_delay_s: u64,
    /// Backoff multiplier.
    pub backoff_multiplier: f64,
    /// Client ping interval in seconds when the exchange does not dictate one.
    pub heartbeat_interval_s: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_s: 30,
            backoff_multiplier: 2.0,
            heartbeat_interval_s: 20,
        }
    }
}

impl ReconnectConfig {
    /// Create from config values.
    pub fn from_config(max_delay_s: u64, heartbeat_interval_s: u64) -> Self {
        Self {
            max_delay_s,
            heartbeat_interval_s,
            ..Default::default()
        }
    }

    /// Delay before reconnect attempt `attempt` (0-based).
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let max_delay_ms = self.max_delay_s * 1000;
        let clamped_ms = delay_ms.min(max_delay_ms as f64) as u64;
        Duration::from_millis(clamped_ms)
    }
}

/// Where and how to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEndpoint {
    /// Full WebSocket URL.
    pub url: String,
    /// Ping interval dictated by the exchange, if any.
    pub ping_interval: Option<Duration>,
}

/// Exchange-specific half of a ticker feed.
#[async_trait]
pub trait FeedProtocol: Send + Sync + 'static {
    /// Exchange this feed belongs to.
    fn exchange(&self) -> Exchange;

    /// Resolve the URL to connect to. May call out to a REST endpoint.
    async fn endpoint(&self, instruments: &[Instrument]) -> Result<FeedEndpoint, WsError>;

    /// Frames to send right after connecting.
    fn subscribe_messages(&self, instruments: &[Instrument]) -> Vec<String>;

    /// Turn one text frame into zero or more tickers.
    fn parse(&self, text: &str) -> Vec<RawTicker>;

    /// Application-level keepalive frame, if the exchange wants one.
    fn ping_message(&self) -> Option<String> {
        None
    }
}

/// Reconnecting feed for one exchange.
pub struct TickerFeed<P> {
    protocol: P,
    reconnect_config: ReconnectConfig,
    connected: AtomicBool,
    reconnect_attempts: AtomicU64,
    last_message_time: std::sync::RwLock<Option<Instant>>,
}

enum SessionEnd {
    Shutdown,
    ChannelClosed,
    Disconnected,
}

impl<P: FeedProtocol> TickerFeed<P> {
    /// Wrap a protocol with the default reconnect settings.
    pub fn new(protocol: P) -> Self {
        Self::with_reconnect_config(protocol, ReconnectConfig::default())
    }

    /// Wrap a protocol with custom reconnect settings.
    pub fn with_reconnect_config(protocol: P, config: ReconnectConfig) -> Self {
        Self {
            protocol,
            reconnect_config: config,
            connected: AtomicBool::new(false),
            reconnect_attempts: AtomicU64::new(0),
            last_message_time: std::sync::RwLock::new(None),
        }
    }

    /// Exchange this feed reads.
    pub fn exchange(&self) -> Exchange {
        self.protocol.exchange()
    }

    /// Whether a session is currently open.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Total reconnect attempts since start.
    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Whether no frame arrived for two heartbeat intervals.
    pub fn is_stale(&self) -> bool {
        if let Ok(time) = self.last_message_time.read() {
            if let Some(last) = *time {
                return last.elapsed()
                    > Duration::from_secs(self.reconnect_config.heartbeat_interval_s * 2);
            }
        }
        false
    }

    fn touch(&self) {
        if let Ok(mut time) = self.last_message_time.write() {
            *time = Some(Instant::now());
        }
    }

    /// Run the feed on its own task until `shutdown` flips to true or the
    /// ticker channel closes.
    pub fn spawn(
        self: Arc<Self>,
        instruments: Vec<Instrument>,
        tx: mpsc::Sender<RawTicker>,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let exchange = self.exchange();
            let mut attempt = 0u32;

            loop {
                if *shutdown.borrow() {
                    break;
                }
                info!(exchange = %exchange, attempt = attempt, "Connecting ticker feed");

                match self.session(&instruments, &tx, &mut shutdown).await {
                    Ok(SessionEnd::Shutdown) => {
                        info!(exchange = %exchange, "Ticker feed shut down");
                        break;
                    }
                    Ok(SessionEnd::ChannelClosed) => {
                        info!(exchange = %exchange, "Ticker channel closed, stopping feed");
                        break;
                    }
                    Ok(SessionEnd::Disconnected) => {
                        warn!(exchange = %exchange, "Ticker feed disconnected, will reconnect");
                        attempt = 0;
                    }
                    Err(e) => {
                        error!(exchange = %exchange, error = %e, attempt = attempt, "Ticker feed failed");
                    }
                }
                self.connected.store(false, Ordering::SeqCst);

                let delay = self.reconnect_config.next_delay(attempt);
                self.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
                metrics::inc_ws_reconnects(exchange);
                info!(exchange = %exchange, delay_ms = delay.as_millis() as u64, "Reconnecting after delay");

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => {}
                }
                attempt = attempt.saturating_add(1);
            }

            self.connected.store(false, Ordering::SeqCst);
        })
    }

    async fn session(
        &self,
        instruments: &[Instrument],
        tx: &mpsc::Sender<RawTicker>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SessionEnd, WsError> {
        let exchange = self.exchange();
        let endpoint = self.protocol.endpoint(instruments).await?;

        debug!(exchange = %exchange, url = %endpoint.url, "Opening WebSocket");
        let (ws_stream, _) = connect_async(endpoint.url.as_str())
            .await
            .map_err(|e| WsError::ConnectionFailed(e.to_string()))?;
        let (mut write, read) = ws_stream.split();

        for frame in self.protocol.subscribe_messages(instruments) {
            write
                .send(Message::Text(frame))
                .await
                .map_err(|e| WsError::SendFailed(e.to_string()))?;
        }

        self.connected.store(true, Ordering::SeqCst);
        self.touch();
        info!(exchange = %exchange, instruments = instruments.len(), "Ticker feed subscribed");

        let ping_every = endpoint
            .ping_interval
            .unwrap_or(Duration::from_secs(self.reconnect_config.heartbeat_interval_s));
        let mut ping = tokio::time::interval(ping_every);
        ping.tick().await;

        let tickers = self.ticker_stream(read);
        futures::pin_mut!(tickers);

        loop {
            tokio::select! {
                next = tickers.next() => match next {
                    Some(ticker) => {
                        if tx.send(ticker).await.is_err() {
                            return Ok(SessionEnd::ChannelClosed);
                        }
                    }
                    None => return Ok(SessionEnd::Disconnected),
                },
                _ = ping.tick() => {
                    if self.is_stale() {
                        warn!(exchange = %exchange, "No frames for two heartbeat intervals, reconnecting");
                        return Ok(SessionEnd::Disconnected);
                    }
                    let frame = match self.protocol.ping_message() {
                        Some(text) => Message::Text(text),
                        None => Message::Ping(Vec::new()),
                    };
                    if let Err(e) = write.send(frame).await {
                        warn!(exchange = %exchange, error = %e, "Ping failed");
                        return Ok(SessionEnd::Disconnected);
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        let close = Message::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "shutdown".into(),
                        }));
                        if let Err(e) = write.send(close).await {
                            debug!(exchange = %exchange, error = %e, "Close frame not sent");
                        }
                        return Ok(SessionEnd::Shutdown);
                    }
                },
            }
        }
    }

    fn ticker_stream<'a, S>(&'a self, mut read: S) -> impl Stream<Item = RawTicker> + 'a
    where
        S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin + 'a,
    {
        let exchange = self.exchange();
        async_stream::stream! {
            while let Some(msg) = read.next().await {
                self.touch();
                match msg {
                    Ok(Message::Text(text)) => {
                        let start = Instant::now();
                        metrics::inc_ws_messages_received(exchange);
                        let parsed = self.protocol.parse(&text);
                        metrics::record_ws_message_latency(start);
                        for ticker in parsed {
                            yield ticker;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        warn!(exchange = %exchange, frame = ?frame, "WebSocket closed by server");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(exchange = %exchange, error = %e, "WebSocket error");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_clamps() {
        let config = ReconnectConfig::from_config(5, 20);
        assert_eq!(config.next_delay(0), Duration::from_millis(1000));
        assert_eq!(config.next_delay(1), Duration::from_millis(2000));
        assert_eq!(config.next_delay(2), Duration::from_millis(4000));
        assert_eq!(config.next_delay(3), Duration::from_millis(5000));
        assert_eq!(config.next_delay(30), Duration::from_millis(5000));
    }

    #[tokio::test]
    async fn feed_goes_stale_without_frames() {
        let feed = TickerFeed::with_reconnect_config(Unreachable, ReconnectConfig::from_config(5, 0));
        assert!(!feed.is_stale());

        feed.touch();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(feed.is_stale());

        let fresh = TickerFeed::new(Unreachable);
        fresh.touch();
        assert!(!fresh.is_stale());
    }
    struct Unreachable;

    #[async_trait]
    impl FeedProtocol for Unreachable {
        fn exchange(&self) -> Exchange {
            Exchange::Binance
        }

        async fn endpoint(&self, _instruments: &[Instrument]) -> Result<FeedEndpoint, WsError> {
            Err(WsError::Negotiation("offline".to_string()))
        }

        fn subscribe_messages(&self, _instruments: &[Instrument]) -> Vec<String> {
            Vec::new()
        }

        fn parse(&self, _text: &str) -> Vec<RawTicker> {
            Vec::new()
        }
    }

    #[tokio::test]
    async fn spawn_exits_on_shutdown_while_backing_off() {
        let feed = Arc::new(TickerFeed::new(Unreachable));
        let (tx, _rx) = mpsc::channel(4);
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = feed.clone().spawn(vec![Instrument::new("SOL", "USDT")], tx, stop_rx);
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(feed.reconnect_attempts() >= 1);
        assert!(!feed.is_connected());
    }
}
