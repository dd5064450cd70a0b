//! Unified error types for the arbitrage engine.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::exchange::Exchange;
use crate::trading::Step;

/// Unified error type for the arbitrage engine.
#[derive(Error, Debug)]
pub enum BotError {
    /// Configuration loading error.
    #[error("configuration error: {0}")]
    Config(#[from] envy::Error),

    /// Exchange adapter error.
    #[error("exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    /// Opportunity evaluation error.
    #[error("arbitrage error: {0}")]
    Arbitrage(#[from] ArbitrageError),

    /// Open/close state machine error.
    #[error("orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    /// Position store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// WebSocket error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    /// HTTP request error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by exchange trading/transfer adapters.
///
/// Adapters retry the retryable subset themselves (see [`crate::exchange::retry`]);
/// whatever reaches the orchestrator is treated as terminal for the current step.
#[derive(Error, Debug)]
pub enum ExchangeError {
    /// Transport-level failure.
    #[error("{exchange} http error: {source}")]
    Http {
        /// Exchange the request was sent to.
        exchange: Exchange,
        /// Underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The exchange answered with an error payload.
    #[error("{exchange} api error (status {status}, code {code}): {message}")]
    Api {
        /// Exchange that rejected the call.
        exchange: Exchange,
        /// HTTP status code.
        status: u16,
        /// Exchange-specific error code.
        code: String,
        /// Error message from the exchange.
        message: String,
    },

    /// Rate limited by the exchange.
    #[error("{exchange} rate limited: retry after {retry_after_seconds}s")]
    RateLimited {
        /// Exchange that throttled the call.
        exchange: Exchange,
        /// Seconds to wait before retrying.
        retry_after_seconds: u64,
    },

    /// Order or transfer rejected outright.
    #[error("{exchange} rejected request: {reason}")]
    Rejected {
        /// Exchange that rejected the request.
        exchange: Exchange,
        /// Rejection reason.
        reason: String,
    },

    /// Not enough funds in the source wallet.
    #[error("{exchange} insufficient {currency}: need {required}, have {available}")]
    InsufficientFunds {
        /// Exchange holding the wallet.
        exchange: Exchange,
        /// Currency that is short.
        currency: String,
        /// Required amount.
        required: Decimal,
        /// Available amount.
        available: Decimal,
    },

    /// Response could not be decoded.
    #[error("{exchange} response parse error: {reason}")]
    Parse {
        /// Exchange that sent the response.
        exchange: Exchange,
        /// What went wrong.
        reason: String,
    },

    /// Request signing failed.
    #[error("signing error: {0}")]
    Signing(String),

    /// API credentials are not configured for this exchange.
    #[error("missing api credentials for {0}")]
    MissingCredentials(Exchange),

    /// Operation is not supported by this venue.
    #[error("{exchange} does not support {operation}")]
    Unsupported {
        /// Exchange lacking the capability.
        exchange: Exchange,
        /// Operation name.
        operation: &'static str,
    },

    /// Failure injected by the paper exchange.
    #[error("{exchange} simulated failure in {operation} (retryable={retryable})")]
    Simulated {
        /// Paper exchange identity.
        exchange: Exchange,
        /// Operation that failed.
        operation: String,
        /// Whether the failure should be retried.
        retryable: bool,
    },
}

impl ExchangeError {
    /// Whether the call may succeed if repeated after a backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExchangeError::Http { source, .. } => {
                source.is_timeout() || source.is_connect() || source.is_request()
            }
            ExchangeError::Api { status, .. } => *status == 429 || *status >= 500,
            ExchangeError::RateLimited { .. } => true,
            ExchangeError::Simulated { retryable, .. } => *retryable,
            ExchangeError::Rejected { .. }
            | ExchangeError::InsufficientFunds { .. }
            | ExchangeError::Parse { .. }
            | ExchangeError::Signing(_)
            | ExchangeError::MissingCredentials(_)
            | ExchangeError::Unsupported { .. } => false,
        }
    }
}

/// Opportunity evaluation errors.
#[derive(Error, Debug)]
pub enum ArbitrageError {
    /// Computed order size is zero or negative.
    #[error("invalid order size: {0}")]
    InvalidSize(Decimal),

    /// A price that cannot be traded on.
    #[error("invalid price {price} on {exchange}")]
    InvalidPrice {
        /// Exchange quoting the price.
        exchange: Exchange,
        /// Offending price.
        price: Decimal,
    },
}

/// Errors raised by the execution orchestrator.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// A position is already recorded; a second one would double-spend capital.
    #[error("position already open in {coin}")]
    PositionAlreadyOpen {
        /// Coin of the open position.
        coin: String,
    },

    /// Close or resume requested without a recorded position.
    #[error("no open position")]
    NoPosition,

    /// New openings are blocked until the stuck position is resolved.
    #[error("orchestrator halted: {reason}")]
    Halted {
        /// Why the orchestrator halted.
        reason: String,
    },

    /// Pre-flight balance check failed.
    #[error("insufficient {currency} on {exchange}: need {required}, have {available}")]
    InsufficientBalance {
        /// Exchange checked.
        exchange: Exchange,
        /// Currency checked.
        currency: String,
        /// Required balance.
        required: Decimal,
        /// Available balance.
        available: Decimal,
    },

    /// No adapter registered for an exchange.
    #[error("no client registered for {0}")]
    UnknownExchange(Exchange),

    /// Opportunity could not be turned into orders.
    #[error(transparent)]
    Arbitrage(#[from] ArbitrageError),

    /// Both opening legs failed before anything was committed.
    #[error("open failed: buy leg: {buy}; sell leg: {sell}")]
    OpenFailed {
        /// Buy leg failure, or "ok".
        buy: String,
        /// Sell leg failure, or "ok".
        sell: String,
    },

    /// Only one opening leg went through.
    #[error("partial open ({failed_leg} leg failed: {reason}); unwound={unwound}")]
    PartialOpen {
        /// Which leg failed.
        failed_leg: &'static str,
        /// Failure reason of that leg.
        reason: String,
        /// Whether the live leg was reversed successfully.
        unwound: bool,
    },

    /// An exchange call failed while driving a close step.
    #[error("step {step} failed on {exchange}: {source}")]
    StepFailed {
        /// Step being attempted.
        step: Step,
        /// Exchange the call went to.
        exchange: Exchange,
        /// Adapter failure.
        #[source]
        source: ExchangeError,
    },

    /// Attempted to move a position backwards.
    #[error("invalid step transition {from} -> {to}")]
    InvalidTransition {
        /// Current step.
        from: Step,
        /// Requested step.
        to: Step,
    },

    /// Exchange failure outside of a tracked step.
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    /// Persisting the position failed; the step was not advanced.
    #[error("position store failure: {0}")]
    Store(#[from] StoreError),
}

/// Position store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Record could not be encoded or decoded.
    #[error("record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Stored record is inconsistent.
    #[error("corrupt position record: {0}")]
    Corrupt(String),

    /// Write failure injected by the in-memory store.
    #[error("simulated store failure: {0}")]
    Simulated(String),
}

/// WebSocket connection and message errors.
#[derive(Error, Debug)]
pub enum WsError {
    /// Connection failed.
    #[error("websocket connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection closed unexpectedly.
    #[error("websocket connection closed: code={code:?}, reason={reason}")]
    ConnectionClosed {
        /// Close code.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },

    /// Message parsing failed.
    #[error("failed to parse websocket message: {0}")]
    ParseError(String),

    /// Send failed.
    #[error("failed to send websocket message: {0}")]
    SendFailed(String),

    /// Feed endpoint negotiation failed (e.g. token request).
    #[error("feed negotiation failed: {0}")]
    Negotiation(String),

    /// Tungstenite error.
    #[error("tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, BotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_retry_on_throttle_and_server_faults() {
        let throttled = ExchangeError::Api {
            exchange: Exchange::Binance,
            status: 429,
            code: "-1003".to_string(),
            message: "too many requests".to_string(),
        };
        let server = ExchangeError::Api {
            exchange: Exchange::Kucoin,
            status: 503,
            code: "503000".to_string(),
            message: "service unavailable".to_string(),
        };
        let rejected = ExchangeError::Api {
            exchange: Exchange::Binance,
            status: 400,
            code: "-2010".to_string(),
            message: "insufficient balance".to_string(),
        };

        assert!(throttled.is_retryable());
        assert!(server.is_retryable());
        assert!(!rejected.is_retryable());
    }

    #[test]
    fn terminal_errors_are_not_retryable() {
        assert!(!ExchangeError::MissingCredentials(Exchange::Kucoin).is_retryable());
        assert!(!ExchangeError::Rejected {
            exchange: Exchange::Binance,
            reason: "MIN_NOTIONAL".to_string(),
        }
        .is_retryable());
        assert!(ExchangeError::Simulated {
            exchange: Exchange::Binance,
            operation: "place_market_order".to_string(),
            retryable: true,
        }
        .is_retryable());
    }
}
