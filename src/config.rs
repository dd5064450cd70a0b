//! Application configuration loaded from environment variables.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::arbitrage::StrategyParams;
use crate::exchange::{Exchange, Instrument, RetryPolicy};
use crate::orderbook::{PriceSide, ReconnectConfig};

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // === Binance Credentials ===
    /// Binance API key.
    #[serde(default)]
    pub binance_api_key: Option<String>,

    /// Binance API secret.
    #[serde(default)]
    pub binance_api_secret: Option<String>,

    // === KuCoin Credentials ===
    /// KuCoin API key.
    #[serde(default)]
    pub kucoin_api_key: Option<String>,

    /// KuCoin API secret.
    #[serde(default)]
    pub kucoin_api_secret: Option<String>,

    /// KuCoin API passphrase.
    #[serde(default)]
    pub kucoin_api_passphrase: Option<String>,

    // === Strategy Parameters ===
    /// Quote notional committed per round trip (e.g. 60 USDT).
    #[serde(default = "default_capital")]
    pub capital: Decimal,

    /// Taker fee as a fraction (0.001 = 0.1%).
    #[serde(default = "default_fee_rate")]
    pub fee_rate: Decimal,

    /// Absolute transfer cost estimate in quote currency.
    #[serde(default = "default_transfer_cost")]
    pub transfer_cost: Decimal,

    /// Minimum profit over capital required to open.
    #[serde(default = "default_min_profit_margin")]
    pub min_profit_margin: Decimal,

    /// Close once the buy venue price reaches the sell venue price minus this.
    #[serde(default)]
    pub close_spread: Decimal,

    /// Round order quantities down to whole units.
    #[serde(default = "default_true")]
    pub integer_lots: bool,

    /// Canonical instruments to watch (comma separated, BASE-QUOTE).
    #[serde(default = "default_instruments")]
    pub instruments: Vec<String>,

    /// Which side of the ticker to price with.
    #[serde(default)]
    pub price_side: PriceSide,

    /// Ignore prices older than this in snapshots (0 disables).
    #[serde(default)]
    pub price_max_age_secs: u64,

    // === Operation Modes ===
    /// Simulation mode (paper exchanges, in-memory store).
    #[serde(default = "default_true")]
    pub dry_run: bool,

    /// Starting quote balance per paper exchange wallet.
    #[serde(default = "default_paper_balance")]
    pub paper_balance: Decimal,

    /// Path of the SQLite position database.
    #[serde(default = "default_store_path")]
    pub store_path: String,

    /// Seconds between resume attempts on a stuck position.
    #[serde(default = "default_stuck_retry")]
    pub stuck_retry_secs: u64,

    /// Move surplus quote between venues after each close.
    #[serde(default)]
    pub rebalance_after_close: bool,

    /// Optional webhook that receives stuck-position alerts.
    #[serde(default)]
    pub alert_webhook_url: Option<String>,

    // === Exchange Endpoints ===
    /// Binance WebSocket base URL.
    #[serde(default = "default_binance_ws_url")]
    pub binance_ws_url: String,

    /// Binance REST base URL.
    #[serde(default = "default_binance_rest_url")]
    pub binance_rest_url: String,

    /// KuCoin REST base URL (also used for the WebSocket token).
    #[serde(default = "default_kucoin_rest_url")]
    pub kucoin_rest_url: String,

    /// HTTP request timeout in milliseconds.
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,

    // === Reconnect / Retry ===
    /// Maximum WebSocket reconnect backoff in seconds.
    #[serde(default = "default_ws_reconnect_max_delay")]
    pub ws_reconnect_max_delay_s: u64,

    /// Heartbeat interval for feeds without a server-provided one.
    #[serde(default = "default_ws_heartbeat")]
    pub ws_heartbeat_interval_s: u64,

    /// Attempts per adapter call before giving up.
    #[serde(default = "default_retry_attempts")]
    pub retry_max_attempts: u32,

    /// Initial adapter retry backoff in milliseconds.
    #[serde(default = "default_retry_initial_delay")]
    pub retry_initial_delay_ms: u64,

    // === Server Configuration ===
    /// HTTP server port for health/metrics endpoints.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub rust_log: String,

    /// Enable verbose logging.
    #[serde(default)]
    pub verbose: bool,
}

fn default_capital() -> Decimal {
    Decimal::new(60, 0) // 60 USDT
}

fn default_fee_rate() -> Decimal {
    Decimal::new(1, 3) // 0.001
}

fn default_transfer_cost() -> Decimal {
    Decimal::new(8, 2) // 0.08 USDT
}

fn default_min_profit_margin() -> Decimal {
    Decimal::new(1, 1) // 0.1 USDT
}

fn default_true() -> bool {
    true
}

fn default_instruments() -> Vec<String> {
    [
        "SOL-USDT", "XRP-USDT", "ETH-USDT", "DOGE-USDT", "ADA-USDT", "AVAX-USDT", "DOT-USDT",
        "NEAR-USDT", "APT-USDT", "ARB-USDT", "OP-USDT", "SUI-USDT", "TIA-USDT", "INJ-USDT",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_paper_balance() -> Decimal {
    Decimal::new(1000, 0)
}

fn default_store_path() -> String {
    "positions.db".to_string()
}

fn default_stuck_retry() -> u64 {
    30
}

fn default_binance_ws_url() -> String {
    "wss://stream.binance.com:9443".to_string()
}

fn default_binance_rest_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_kucoin_rest_url() -> String {
    "https://api.kucoin.com".to_string()
}

fn default_http_timeout_ms() -> u64 {
    5000
}

fn default_ws_reconnect_max_delay() -> u64 {
    30
}

fn default_ws_heartbeat() -> u64 {
    20
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_initial_delay() -> u64 {
    250
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            binance_api_key: None,
            binance_api_secret: None,
            kucoin_api_key: None,
            kucoin_api_secret: None,
            kucoin_api_passphrase: None,
            capital: default_capital(),
            fee_rate: default_fee_rate(),
            transfer_cost: default_transfer_cost(),
            min_profit_margin: default_min_profit_margin(),
            close_spread: Decimal::ZERO,
            integer_lots: true,
            instruments: default_instruments(),
            price_side: PriceSide::default(),
            price_max_age_secs: 0,
            dry_run: true,
            paper_balance: default_paper_balance(),
            store_path: default_store_path(),
            stuck_retry_secs: default_stuck_retry(),
            rebalance_after_close: false,
            alert_webhook_url: None,
            binance_ws_url: default_binance_ws_url(),
            binance_rest_url: default_binance_rest_url(),
            kucoin_rest_url: default_kucoin_rest_url(),
            http_timeout_ms: default_http_timeout_ms(),
            ws_reconnect_max_delay_s: default_ws_reconnect_max_delay(),
            ws_heartbeat_interval_s: default_ws_heartbeat(),
            retry_max_attempts: default_retry_attempts(),
            retry_initial_delay_ms: default_retry_initial_delay(),
            port: default_port(),
            rust_log: default_log_level(),
            verbose: false,
        }
    }
}

impl Config {
    /// Load configuration from environment, reading .env file first.
    pub fn load() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Check if the configuration is valid.
    pub fn validate(&self) -> Result<(), String> {
        if self.capital <= Decimal::ZERO {
            return Err("CAPITAL must be positive".to_string());
        }

        if self.fee_rate < Decimal::ZERO || self.fee_rate >= Decimal::ONE {
            return Err("FEE_RATE must be in [0, 1)".to_string());
        }

        if self.transfer_cost < Decimal::ZERO {
            return Err("TRANSFER_COST must not be negative".to_string());
        }

        if self.instruments.is_empty() {
            return Err("INSTRUMENTS must list at least one BASE-QUOTE pair".to_string());
        }

        for raw in &self.instruments {
            raw.parse::<Instrument>()
                .map_err(|e| format!("INSTRUMENTS entry {raw:?}: {e}"))?;
        }

        if self.ws_heartbeat_interval_s == 0 {
            return Err("WS_HEARTBEAT_INTERVAL_S must be positive".to_string());
        }

        if url::Url::parse(&self.binance_ws_url).is_err() {
            return Err("BINANCE_WS_URL is not a valid URL".to_string());
        }

        if let Some(webhook) = &self.alert_webhook_url {
            if url::Url::parse(webhook).is_err() {
                return Err("ALERT_WEBHOOK_URL is not a valid URL".to_string());
            }
        }

        if !self.dry_run {
            for exchange in [Exchange::Binance, Exchange::Kucoin] {
                if !self.has_credentials(exchange) {
                    return Err(format!("live trading requires API credentials for {exchange}"));
                }
            }
        }

        Ok(())
    }

    /// Whether every credential the given exchange needs is present.
    pub fn has_credentials(&self, exchange: Exchange) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
        match exchange {
            Exchange::Binance => present(&self.binance_api_key) && present(&self.binance_api_secret),
            Exchange::Kucoin => {
                present(&self.kucoin_api_key)
                    && present(&self.kucoin_api_secret)
                    && present(&self.kucoin_api_passphrase)
            }
        }
    }

    /// Parsed instrument list. Invalid entries are skipped (`validate` rejects them).
    pub fn parsed_instruments(&self) -> Vec<Instrument> {
        self.instruments
            .iter()
            .filter_map(|raw| raw.parse().ok())
            .collect()
    }

    /// Evaluator parameters.
    pub fn strategy_params(&self) -> StrategyParams {
        StrategyParams {
            capital: self.capital,
            fee_rate: self.fee_rate,
            transfer_cost: self.transfer_cost,
            min_profit_margin: self.min_profit_margin,
        }
    }

    /// Snapshot staleness cutoff, if enabled.
    pub fn price_max_age(&self) -> Option<Duration> {
        (self.price_max_age_secs > 0).then(|| Duration::from_secs(self.price_max_age_secs))
    }

    /// WebSocket reconnect settings.
    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig::from_config(self.ws_reconnect_max_delay_s, self.ws_heartbeat_interval_s)
    }

    /// Adapter retry settings.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts.max(1),
            initial_delay_ms: self.retry_initial_delay_ms,
            ..RetryPolicy::default()
        }
    }

    /// Mask a secret for display.
    pub fn mask(secret: &Option<String>) -> String {
        match secret.as_deref() {
            Some(s) if s.chars().count() > 4 => format!("{}****", s.chars().take(4).collect::<String>()),
            Some(_) => "****".to_string(),
            None => "<unset>".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn default_values_are_sensible() {
        assert_eq!(default_capital(), dec!(60));
        assert_eq!(default_fee_rate(), dec!(0.001));
        assert_eq!(default_transfer_cost(), dec!(0.08));
        assert_eq!(default_min_profit_margin(), dec!(0.1));
        assert!(default_true());
    }

    #[test]
    fn default_config_validates_in_dry_run() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.parsed_instruments().len() > 1);
    }

    #[test]
    fn validate_requires_credentials_for_live_trading() {
        let config = Config {
            dry_run: false,
            binance_api_key: Some("key".to_string()),
            binance_api_secret: Some("secret".to_string()),
            ..Config::default()
        };

        let err = config.validate().unwrap_err();
        assert!(err.contains("KUCOIN"));
    }

    #[test]
    fn validate_rejects_malformed_instrument() {
        let config = Config {
            instruments: vec!["SOLUSDT".to_string()],
            ..Config::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_heartbeat() {
        let config = Config {
            ws_heartbeat_interval_s: 0,
            ..Config::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_non_positive_capital() {
        let config = Config {
            capital: dec!(0),
            ..Config::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn mask_hides_secret_tail() {
        assert_eq!(Config::mask(&Some("abcdefgh".to_string())), "abcd****");
        assert_eq!(Config::mask(&None), "<unset>");
    }
}
