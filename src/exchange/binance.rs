//! Binance spot/cross-margin adapter and bookTicker feed.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::{debug, instrument, warn};

use super::client::{build_http_client, retry_after_seconds, wire_decimal, ExchangeClient};
use super::symbols::SymbolNormalizer;
use super::types::{Balance, DepositAddress, Exchange, Instrument, Wallet};
use crate::config::Config;
use crate::error::{ExchangeError, WsError};
use crate::metrics;
use crate::orderbook::{FeedEndpoint, FeedProtocol, RawTicker};
use crate::signing;
use crate::trading::order::{AccountType, OrderAck, OrderRequest, Side};

const RECV_WINDOW_MS: &str = "5000";

/// Binance `bookTicker` stream payload.
#[derive(Debug, Clone, Deserialize)]
pub struct BookTicker {
    /// Order book update id.
    #[serde(rename = "u")]
    pub update_id: Option<u64>,
    /// Native symbol, e.g. `SOLUSDT`.
    #[serde(rename = "s")]
    pub symbol: String,
    /// Best bid price.
    #[serde(rename = "b")]
    pub bid: Option<String>,
    /// Best bid quantity.
    #[serde(rename = "B")]
    pub bid_qty: Option<String>,
    /// Best ask price.
    #[serde(rename = "a")]
    pub ask: Option<String>,
    /// Best ask quantity.
    #[serde(rename = "A")]
    pub ask_qty: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CombinedFrame {
    data: BookTicker,
}

/// Ticker feed over the combined `bookTicker` streams.
#[derive(Debug, Clone)]
pub struct BinanceFeed {
    ws_url: String,
    normalizer: SymbolNormalizer,
}

impl BinanceFeed {
    /// Feed for the given instruments.
    pub fn new(ws_url: impl Into<String>, instruments: &[Instrument]) -> Self {
        Self {
            ws_url: ws_url.into(),
            normalizer: SymbolNormalizer::new(instruments),
        }
    }

    /// Combined-stream URL for `instruments`.
    pub fn stream_url(&self, instruments: &[Instrument]) -> String {
        let streams: Vec<String> = instruments
            .iter()
            .map(|i| format!("{}@bookTicker", i.concat().to_lowercase()))
            .collect();
        format!(
            "{}/stream?streams={}",
            self.ws_url.trim_end_matches('/'),
            streams.join("/")
        )
    }
}

#[async_trait]
impl FeedProtocol for BinanceFeed {
    fn exchange(&self) -> Exchange {
        Exchange::Binance
    }

    async fn endpoint(&self, instruments: &[Instrument]) -> Result<FeedEndpoint, WsError> {
        if instruments.is_empty() {
            return Err(WsError::Negotiation("no instruments to subscribe".to_string()));
        }
        Ok(FeedEndpoint {
            url: self.stream_url(instruments),
            ping_interval: None,
        })
    }

    // Streams are selected by URL.
    fn subscribe_messages(&self, _instruments: &[Instrument]) -> Vec<String> {
        Vec::new()
    }

    fn parse(&self, text: &str) -> Vec<RawTicker> {
        let ticker = match serde_json::from_str::<CombinedFrame>(text) {
            Ok(frame) => frame.data,
            Err(_) => match serde_json::from_str::<BookTicker>(text) {
                Ok(ticker) => ticker,
                Err(e) => {
                    debug!(error = %e, "Ignoring non-ticker Binance frame");
                    return Vec::new();
                }
            },
        };

        let Some(instrument) = self.normalizer.normalize(Exchange::Binance, &ticker.symbol) else {
            return Vec::new();
        };

        vec![RawTicker {
            exchange: Exchange::Binance,
            instrument,
            bid: ticker.bid,
            ask: ticker.ask,
            size: ticker.ask_qty,
            observed_at: OffsetDateTime::now_utc(),
        }]
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: u64,
    client_order_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AssetBalance {
    asset: String,
    free: Decimal,
}

#[derive(Debug, Deserialize)]
struct SpotAccount {
    balances: Vec<AssetBalance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarginAccount {
    user_assets: Vec<AssetBalance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranResponse {
    tran_id: u64,
}

#[derive(Debug, Deserialize)]
struct DepositAddressResponse {
    address: String,
    coin: String,
    #[serde(default)]
    tag: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WithdrawResponse {
    id: String,
}

/// Signed REST client for Binance.
#[derive(Debug, Clone)]
pub struct BinanceClient {
    http: reqwest::Client,
    rest_url: String,
    api_key: String,
    api_secret: String,
}

impl BinanceClient {
    /// Build from config. Fails when credentials are missing.
    pub fn new(config: &Config) -> Result<Self, ExchangeError> {
        let (Some(api_key), Some(api_secret)) =
            (config.binance_api_key.clone(), config.binance_api_secret.clone())
        else {
            return Err(ExchangeError::MissingCredentials(Exchange::Binance));
        };

        Ok(Self {
            http: build_http_client(Exchange::Binance, Duration::from_millis(config.http_timeout_ms))?,
            rest_url: config.binance_rest_url.trim_end_matches('/').to_string(),
            api_key,
            api_secret,
        })
    }

    /// Wallet transfer type code for `from -> to`.
    pub fn transfer_type(from: Wallet, to: Wallet) -> Option<&'static str> {
        match (from, to) {
            (Wallet::Spot, Wallet::Margin) => Some("MAIN_MARGIN"),
            (Wallet::Margin, Wallet::Spot) => Some("MARGIN_MAIN"),
            (Wallet::Spot, Wallet::Funding) => Some("MAIN_FUNDING"),
            (Wallet::Funding, Wallet::Spot) => Some("FUNDING_MAIN"),
            (Wallet::Margin, Wallet::Funding) => Some("MARGIN_FUNDING"),
            (Wallet::Funding, Wallet::Margin) => Some("FUNDING_MARGIN"),
            _ => None,
        }
    }

    fn signed_query(&self, params: &[(&str, String)]) -> Result<String, ExchangeError> {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in params {
            query.append_pair(key, value);
        }
        query.append_pair("recvWindow", RECV_WINDOW_MS);
        query.append_pair("timestamp", &signing::timestamp_ms());
        let query = query.finish();

        let signature = signing::binance_signature(&self.api_secret, &query)?;
        Ok(format!("{query}&signature={signature}"))
    }

    async fn signed<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        let url = format!("{}{}?{}", self.rest_url, path, self.signed_query(params)?);
        let start = Instant::now();

        let response = self
            .http
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|source| ExchangeError::Http {
                exchange: Exchange::Binance,
                source,
            })?;
        metrics::record_http_request_latency(start);

        let status = response.status();
        if status.as_u16() == 429 || status.as_u16() == 418 {
            return Err(ExchangeError::RateLimited {
                exchange: Exchange::Binance,
                retry_after_seconds: retry_after_seconds(response.headers()),
            });
        }

        let body = response.text().await.map_err(|source| ExchangeError::Http {
            exchange: Exchange::Binance,
            source,
        })?;

        if !status.is_success() {
            let (code, message) = match serde_json::from_str::<ApiErrorBody>(&body) {
                Ok(err) => (err.code.to_string(), err.msg),
                Err(_) => (String::new(), body),
            };
            warn!(path = %path, status = status.as_u16(), code = %code, "Binance request failed");
            return Err(ExchangeError::Api {
                exchange: Exchange::Binance,
                status: status.as_u16(),
                code,
                message,
            });
        }

        serde_json::from_str(&body).map_err(|e| ExchangeError::Parse {
            exchange: Exchange::Binance,
            reason: format!("{path}: {e}"),
        })
    }
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    fn exchange(&self) -> Exchange {
        Exchange::Binance
    }

    fn withdrawal_wallet(&self) -> Wallet {
        Wallet::Spot
    }

    #[instrument(skip(self, order), fields(side = %order.side, account = %order.account, instrument = %order.instrument))]
    async fn place_market_order(&self, order: &OrderRequest) -> Result<OrderAck, ExchangeError> {
        let mut params = vec![
            ("symbol", order.instrument.concat()),
            ("side", order.side.to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", wire_decimal(order.quantity)),
            ("newClientOrderId", order.client_oid.clone()),
        ];

        let path = match order.account {
            AccountType::Spot => "/api/v3/order",
            AccountType::Margin => {
                let side_effect = match order.side {
                    Side::Sell => "MARGIN_BUY",
                    Side::Buy => "NO_SIDE_EFFECT",
                };
                params.push(("sideEffectType", side_effect.to_string()));
                "/sapi/v1/margin/order"
            }
        };

        let start = Instant::now();
        let response: OrderResponse = self.signed(reqwest::Method::POST, path, &params).await?;
        metrics::record_order_latency(start);

        Ok(OrderAck {
            exchange: Exchange::Binance,
            order_id: response.order_id.to_string(),
            client_oid: response.client_order_id.unwrap_or_else(|| order.client_oid.clone()),
        })
    }

    #[instrument(skip(self))]
    async fn get_balances(&self) -> Result<Vec<Balance>, ExchangeError> {
        let spot: SpotAccount = self
            .signed(
                reqwest::Method::GET,
                "/api/v3/account",
                &[("omitZeroBalances", "true".to_string())],
            )
            .await?;
        let margin: MarginAccount = self
            .signed(reqwest::Method::GET, "/sapi/v1/margin/account", &[])
            .await?;

        let to_balances = |assets: Vec<AssetBalance>, wallet: Wallet| {
            assets
                .into_iter()
                .filter(|a| !a.free.is_zero())
                .map(move |a| Balance {
                    currency: a.asset,
                    amount: a.free,
                    wallet,
                })
        };

        Ok(to_balances(spot.balances, Wallet::Spot)
            .chain(to_balances(margin.user_assets, Wallet::Margin))
            .collect())
    }

    #[instrument(skip(self))]
    async fn transfer_internal(
        &self,
        currency: &str,
        amount: Decimal,
        from: Wallet,
        to: Wallet,
    ) -> Result<String, ExchangeError> {
        let transfer_type = Self::transfer_type(from, to).ok_or(ExchangeError::Unsupported {
            exchange: Exchange::Binance,
            operation: "transfer between identical wallets",
        })?;

        let response: TranResponse = self
            .signed(
                reqwest::Method::POST,
                "/sapi/v1/asset/transfer",
                &[
                    ("type", transfer_type.to_string()),
                    ("asset", currency.to_string()),
                    ("amount", wire_decimal(amount)),
                ],
            )
            .await?;

        Ok(response.tran_id.to_string())
    }

    #[instrument(skip(self))]
    async fn deposit_address(&self, currency: &str) -> Result<DepositAddress, ExchangeError> {
        let response: DepositAddressResponse = self
            .signed(
                reqwest::Method::GET,
                "/sapi/v1/capital/deposit/address",
                &[("coin", currency.to_string())],
            )
            .await?;

        Ok(DepositAddress {
            currency: response.coin,
            address: response.address,
            memo: response.tag.filter(|t| !t.is_empty()),
            chain: None,
        })
    }

    #[instrument(skip(self, destination), fields(address = %destination.address))]
    async fn withdraw(
        &self,
        currency: &str,
        amount: Decimal,
        destination: &DepositAddress,
    ) -> Result<String, ExchangeError> {
        let mut params = vec![
            ("coin", currency.to_string()),
            ("address", destination.address.clone()),
            ("amount", wire_decimal(amount)),
            ("walletType", "0".to_string()),
        ];
        if let Some(memo) = &destination.memo {
            params.push(("addressTag", memo.clone()));
        }
        if let Some(chain) = &destination.chain {
            params.push(("network", chain.clone()));
        }

        let response: WithdrawResponse = self
            .signed(reqwest::Method::POST, "/sapi/v1/capital/withdraw/apply", &params)
            .await?;

        Ok(response.id)
    }

    #[instrument(skip(self))]
    async fn repay_margin_loan(
        &self,
        currency: &str,
        amount: Decimal,
    ) -> Result<String, ExchangeError> {
        let response: TranResponse = self
            .signed(
                reqwest::Method::POST,
                "/sapi/v1/margin/borrow-repay",
                &[
                    ("asset", currency.to_string()),
                    ("isIsolated", "FALSE".to_string()),
                    ("amount", wire_decimal(amount)),
                    ("type", "REPAY".to_string()),
                ],
            )
            .await?;

        Ok(response.tran_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn feed() -> BinanceFeed {
        BinanceFeed::new(
            "wss://stream.binance.com:9443/",
            &[Instrument::new("SOL", "USDT"), Instrument::new("ARB", "USDT")],
        )
    }

    #[test]
    fn stream_url_lists_lowercase_book_tickers() {
        let url = feed().stream_url(&[Instrument::new("SOL", "USDT"), Instrument::new("ARB", "USDT")]);
        assert_eq!(
            url,
            "wss://stream.binance.com:9443/stream?streams=solusdt@bookTicker/arbusdt@bookTicker"
        );
    }

    #[test]
    fn parses_combined_frame() {
        let text = r#"{"stream":"solusdt@bookTicker","data":{"u":400900217,"s":"SOLUSDT","b":"101.10","B":"31.2","a":"101.12","A":"40.6"}}"#;

        let tickers = feed().parse(text);

        assert_eq!(tickers.len(), 1);
        assert_eq!(tickers[0].instrument, Instrument::new("SOL", "USDT"));
        assert_eq!(tickers[0].bid.as_deref(), Some("101.10"));
        assert_eq!(tickers[0].ask.as_deref(), Some("101.12"));
    }

    #[test]
    fn parses_raw_frame_and_skips_unwatched() {
        let raw = r#"{"u":1,"s":"ARBUSDT","b":"1.1","B":"1","a":"1.2","A":"1"}"#;
        let other = r#"{"u":1,"s":"BTCUSDT","b":"1","B":"1","a":"1","A":"1"}"#;

        assert_eq!(feed().parse(raw)[0].instrument, Instrument::new("ARB", "USDT"));
        assert!(feed().parse(other).is_empty());
        assert!(feed().parse(r#"{"result":null,"id":1}"#).is_empty());
    }

    #[test]
    fn transfer_types_cover_wallet_pairs() {
        assert_eq!(BinanceClient::transfer_type(Wallet::Spot, Wallet::Margin), Some("MAIN_MARGIN"));
        assert_eq!(BinanceClient::transfer_type(Wallet::Margin, Wallet::Spot), Some("MARGIN_MAIN"));
        assert_eq!(BinanceClient::transfer_type(Wallet::Spot, Wallet::Spot), None);
    }

    #[test]
    fn new_requires_credentials() {
        let err = BinanceClient::new(&Config::default()).unwrap_err();
        assert!(matches!(err, ExchangeError::MissingCredentials(Exchange::Binance)));
    }

    #[test]
    fn signed_query_appends_signature_last() {
        let config = Config {
            binance_api_key: Some("key".to_string()),
            binance_api_secret: Some("secret".to_string()),
            ..Config::default()
        };
        let client = BinanceClient::new(&config).unwrap();

        let query = client
            .signed_query(&[("symbol", "SOLUSDT".to_string())])
            .unwrap();

        assert!(query.starts_with("symbol=SOLUSDT&recvWindow=5000&timestamp="));
        let (_, signature) = query.rsplit_once("&signature=").unwrap();
        assert_eq!(signature.len(), 64);
    }
}
