//! Prometheus metrics for latency tracking and monitoring.
//!
//! Covers price feed throughput, opportunity evaluation, exchange request
//! and order latency, and the position lifecycle.

use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::debug;

use crate::exchange::Exchange;

// === Metric Name Constants ===

/// Order placement latency metric name.
pub const METRIC_ORDER_LATENCY: &str = "order_latency_ms";
/// WebSocket message latency metric name.
pub const METRIC_WS_MESSAGE_LATENCY: &str = "ws_message_latency_ms";
/// Opportunity evaluation latency metric name.
pub const METRIC_EVALUATION_LATENCY: &str = "evaluation_latency_ms";
/// Exchange REST request latency metric name.
pub const METRIC_HTTP_REQUEST_LATENCY: &str = "http_request_latency_ms";
/// Full close sequence latency metric name.
pub const METRIC_CLOSE_LATENCY: &str = "close_latency_ms";
/// Request signing latency metric name.
pub const METRIC_SIGNING_LATENCY: &str = "signing_latency_ms";
/// Orders placed counter metric name.
pub const METRIC_ORDERS_PLACED: &str = "orders_placed_total";
/// Orders failed counter metric name.
pub const METRIC_ORDERS_FAILED: &str = "orders_failed_total";
/// Exchange call retries counter metric name.
pub const METRIC_EXCHANGE_RETRIES: &str = "exchange_retries_total";
/// Opportunities detected counter metric name.
pub const METRIC_OPPORTUNITIES_DETECTED: &str = "opportunities_detected_total";
/// Opportunities executed counter metric name.
pub const METRIC_OPPORTUNITIES_EXECUTED: &str = "opportunities_executed_total";
/// Completed closes counter metric name.
pub const METRIC_CLOSES_COMPLETED: &str = "closes_completed_total";
/// Stuck positions counter metric name.
pub const METRIC_STUCK_POSITIONS: &str = "stuck_positions_total";
/// Tickers accepted counter metric name.
pub const METRIC_TICKERS_RECEIVED: &str = "tickers_received_total";
/// Tickers dropped counter metric name.
pub const METRIC_TICKERS_DROPPED: &str = "tickers_dropped_total";
/// WebSocket messages received counter metric name.
pub const METRIC_WS_MESSAGES_RECEIVED: &str = "ws_messages_received_total";
/// WebSocket reconnects counter metric name.
pub const METRIC_WS_RECONNECTS: &str = "ws_reconnects_total";

/// Initialize all metric descriptions.
/// Call this once at startup, after the recorder is installed.
pub fn init_metrics() {
    // Latency histograms
    describe_histogram!(
        METRIC_ORDER_LATENCY,
        "Market order placement latency in milliseconds"
    );
    describe_histogram!(
        METRIC_WS_MESSAGE_LATENCY,
        "WebSocket message processing latency in milliseconds"
    );
    describe_histogram!(
        METRIC_EVALUATION_LATENCY,
        "Time to evaluate a price snapshot in milliseconds"
    );
    describe_histogram!(
        METRIC_HTTP_REQUEST_LATENCY,
        "Exchange REST request latency in milliseconds"
    );
    describe_histogram!(
        METRIC_CLOSE_LATENCY,
        "Time to drive a position from its current step to closed in milliseconds"
    );
    describe_histogram!(
        METRIC_SIGNING_LATENCY,
        "Request signing latency in milliseconds"
    );

    // Counters
    describe_counter!(METRIC_ORDERS_PLACED, "Orders accepted by an exchange");
    describe_counter!(METRIC_ORDERS_FAILED, "Orders rejected or failed");
    describe_counter!(METRIC_EXCHANGE_RETRIES, "Exchange calls retried after a transient failure");
    describe_counter!(
        METRIC_OPPORTUNITIES_DETECTED,
        "Total number of arbitrage opportunities detected"
    );
    describe_counter!(
        METRIC_OPPORTUNITIES_EXECUTED,
        "Opportunities that resulted in a fully open position"
    );
    describe_counter!(METRIC_CLOSES_COMPLETED, "Positions fully closed");
    describe_counter!(METRIC_STUCK_POSITIONS, "Close or unwind steps that failed and halted trading");
    describe_counter!(METRIC_TICKERS_RECEIVED, "Ticker updates applied to the price table");
    describe_counter!(METRIC_TICKERS_DROPPED, "Malformed ticker updates dropped");
    describe_counter!(
        METRIC_WS_MESSAGES_RECEIVED,
        "Total number of WebSocket messages received"
    );
    describe_counter!(
        METRIC_WS_RECONNECTS,
        "Total number of WebSocket reconnections"
    );

    debug!("Metrics initialized");
}

/// Install the global Prometheus recorder and describe every metric.
pub fn install_prometheus() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    init_metrics();
    Ok(handle)
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Record market order latency.
pub fn record_order_latency(start: Instant) {
    histogram!(METRIC_ORDER_LATENCY).record(elapsed_ms(start));
}

/// Record WebSocket message processing latency.
pub fn record_ws_message_latency(start: Instant) {
    histogram!(METRIC_WS_MESSAGE_LATENCY).record(elapsed_ms(start));
}

/// Record snapshot evaluation latency.
pub fn record_evaluation_latency(start: Instant) {
    histogram!(METRIC_EVALUATION_LATENCY).record(elapsed_ms(start));
}

/// Record exchange REST latency.
pub fn record_http_request_latency(start: Instant) {
    histogram!(METRIC_HTTP_REQUEST_LATENCY).record(elapsed_ms(start));
}

/// Record signing operation latency.
pub fn record_signing_latency(start: Instant) {
    histogram!(METRIC_SIGNING_LATENCY).record(elapsed_ms(start));
}

/// Increment orders placed on `exchange`.
pub fn inc_orders_placed(exchange: Exchange) {
    counter!(METRIC_ORDERS_PLACED, "exchange" => exchange.to_string()).increment(1);
}

/// Increment orders failed on `exchange`.
pub fn inc_orders_failed(exchange: Exchange) {
    counter!(METRIC_ORDERS_FAILED, "exchange" => exchange.to_string()).increment(1);
}

/// Increment retries of `operation`.
pub fn inc_exchange_retries(operation: &str) {
    counter!(METRIC_EXCHANGE_RETRIES, "operation" => operation.to_string()).increment(1);
}

/// Increment opportunities detected counter.
pub fn inc_opportunities_detected() {
    counter!(METRIC_OPPORTUNITIES_DETECTED).increment(1);
}

/// Increment opportunities executed counter.
pub fn inc_opportunities_executed() {
    counter!(METRIC_OPPORTUNITIES_EXECUTED).increment(1);
}

/// Increment completed closes.
pub fn inc_closes_completed() {
    counter!(METRIC_CLOSES_COMPLETED).increment(1);
}

/// Increment stuck positions.
pub fn inc_stuck_positions() {
    counter!(METRIC_STUCK_POSITIONS).increment(1);
}

/// Increment tickers applied from `exchange`.
pub fn inc_tickers_received(exchange: Exchange) {
    counter!(METRIC_TICKERS_RECEIVED, "exchange" => exchange.to_string()).increment(1);
}

/// Increment tickers dropped from `exchange`.
pub fn inc_tickers_dropped(exchange: Exchange) {
    counter!(METRIC_TICKERS_DROPPED, "exchange" => exchange.to_string()).increment(1);
}

/// Increment WebSocket messages received counter.
pub fn inc_ws_messages_received(exchange: Exchange) {
    counter!(METRIC_WS_MESSAGES_RECEIVED, "exchange" => exchange.to_string()).increment(1);
}

/// Increment WebSocket reconnects counter.
pub fn inc_ws_reconnects(exchange: Exchange) {
    counter!(METRIC_WS_RECONNECTS, "exchange" => exchange.to_string()).increment(1);
}

/// RAII guard for timing operations.
/// Automatically records latency when dropped.
pub struct LatencyTimer {
    start: Instant,
    metric_name: &'static str,
}

impl LatencyTimer {
    /// Create a new latency timer for the given metric.
    pub fn new(metric_name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            metric_name,
        }
    }

    /// Get elapsed time in milliseconds (without recording).
    pub fn elapsed_ms(&self) -> f64 {
        elapsed_ms(self.start)
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        histogram!(self.metric_name).record(elapsed_ms(self.start));
    }
}

/// Create a latency timer for a full position close.
pub fn timer_close() -> LatencyTimer {
    LatencyTimer::new(METRIC_CLOSE_LATENCY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn latency_timer_measures_time() {
        let timer = LatencyTimer::new("test_metric");
        sleep(Duration::from_millis(10));
        assert!(timer.elapsed_ms() >= 9.0);
    }

    #[test]
    fn recording_without_recorder_is_a_no_op() {
        inc_orders_placed(Exchange::Binance);
        inc_tickers_dropped(Exchange::Kucoin);
        record_order_latency(Instant::now());
    }
}
