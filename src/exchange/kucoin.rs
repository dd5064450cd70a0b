//! KuCoin spot/cross-margin adapter and ticker feed.
//!
//! The public feed needs a short-lived token from `bullet-public`; the token
//! response also dictates the server endpoint and ping interval.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
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
use crate::trading::order::{AccountType, OrderAck, OrderRequest};

const SUCCESS_CODE: &str = "200000";
const TICKER_TOPIC: &str = "/market/ticker:";
/// KuCoin caps topics per subscribe frame.
const MAX_TOPICS_PER_FRAME: usize = 100;

/// Standard KuCoin REST envelope.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: String,
    #[serde(default)]
    msg: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BulletData {
    token: String,
    instance_servers: Vec<InstanceServer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceServer {
    endpoint: String,
    ping_interval: u64,
}

/// Ticker payload of `/market/ticker:{symbol}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerData {
    /// Best bid.
    pub best_bid: Option<String>,
    /// Best bid size.
    pub best_bid_size: Option<String>,
    /// Best ask.
    pub best_ask: Option<String>,
    /// Best ask size.
    pub best_ask_size: Option<String>,
    /// Exchange time in ms.
    pub time: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct FeedFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

/// Ticker feed over the public `/market/ticker` topic.
#[derive(Debug, Clone)]
pub struct KucoinFeed {
    http: reqwest::Client,
    rest_url: String,
    normalizer: SymbolNormalizer,
}

impl KucoinFeed {
    /// Feed for the given instruments.
    pub fn new(http: reqwest::Client, rest_url: impl Into<String>, instruments: &[Instrument]) -> Self {
        Self {
            http,
            rest_url: rest_url.into().trim_end_matches('/').to_string(),
            normalizer: SymbolNormalizer::new(instruments),
        }
    }

    fn subscribe_frame(symbols: &[String]) -> String {
        json!({
            "id": uuid::Uuid::new_v4().simple().to_string(),
            "type": "subscribe",
            "topic": format!("{TICKER_TOPIC}{}", symbols.join(",")),
            "privateChannel": false,
            "response": true,
        })
        .to_string()
    }
}

#[async_trait]
impl FeedProtocol for KucoinFeed {
    fn exchange(&self) -> Exchange {
        Exchange::Kucoin
    }

    async fn endpoint(&self, _instruments: &[Instrument]) -> Result<FeedEndpoint, WsError> {
        let url = format!("{}/api/v1/bullet-public", self.rest_url);
        let response = self
            .http
            .post(&url)
            .send()
            .await
            .map_err(|e| WsError::Negotiation(e.to_string()))?;

        let envelope: Envelope<BulletData> = response
            .json()
            .await
            .map_err(|e| WsError::Negotiation(format!("bullet-public: {e}")))?;
        if envelope.code != SUCCESS_CODE {
            return Err(WsError::Negotiation(format!(
                "bullet-public code {}: {}",
                envelope.code,
                envelope.msg.unwrap_or_default()
            )));
        }

        let bullet = envelope
            .data
            .ok_or_else(|| WsError::Negotiation("bullet-public returned no data".to_string()))?;
        let server = bullet
            .instance_servers
            .first()
            .ok_or_else(|| WsError::Negotiation("no instance servers".to_string()))?;

        Ok(FeedEndpoint {
            url: format!(
                "{}?token={}&connectId={}",
                server.endpoint,
                bullet.token,
                uuid::Uuid::new_v4().simple()
            ),
            ping_interval: Some(Duration::from_millis(server.ping_interval)),
        })
    }

    fn subscribe_messages(&self, instruments: &[Instrument]) -> Vec<String> {
        let symbols: Vec<String> = instruments
            .iter()
            .map(|i| SymbolNormalizer::native(Exchange::Kucoin, i))
            .collect();
        symbols
            .chunks(MAX_TOPICS_PER_FRAME)
            .map(Self::subscribe_frame)
            .collect()
    }

    fn parse(&self, text: &str) -> Vec<RawTicker> {
        let frame: FeedFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "Ignoring undecodable KuCoin frame");
                return Vec::new();
            }
        };
        if frame.kind != "message" {
            return Vec::new();
        }

        let Some(symbol) = frame.topic.as_deref().and_then(|t| t.strip_prefix(TICKER_TOPIC)) else {
            return Vec::new();
        };
        let Some(instrument) = self.normalizer.normalize(Exchange::Kucoin, symbol) else {
            return Vec::new();
        };
        let Some(data) = frame
            .data
            .and_then(|d| serde_json::from_value::<TickerData>(d).ok())
        else {
            return Vec::new();
        };

        vec![RawTicker {
            exchange: Exchange::Kucoin,
            instrument,
            bid: data.best_bid,
            ask: data.best_ask,
            size: data.best_ask_size,
            observed_at: OffsetDateTime::now_utc(),
        }]
    }

    fn ping_message(&self) -> Option<String> {
        Some(
            json!({
                "id": uuid::Uuid::new_v4().simple().to_string(),
                "type": "ping",
            })
            .to_string(),
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderData {
    order_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountData {
    currency: String,
    #[serde(rename = "type")]
    account_type: String,
    available: Decimal,
}

#[derive(Debug, Deserialize)]
struct AddressData {
    address: String,
    #[serde(default)]
    memo: Option<String>,
    #[serde(default)]
    chain: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WithdrawalData {
    withdrawal_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepayData {
    order_no: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderBody<'a> {
    client_oid: &'a str,
    side: &'a str,
    symbol: String,
    #[serde(rename = "type")]
    order_type: &'a str,
    size: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    auto_borrow: Option<bool>,
}

/// Signed REST client for KuCoin (API key version 2).
#[derive(Debug, Clone)]
pub struct KucoinClient {
    http: reqwest::Client,
    rest_url: String,
    api_key: String,
    api_secret: String,
    api_passphrase: String,
}

impl KucoinClient {
    /// Build from config. Fails when credentials are missing.
    pub fn new(config: &Config) -> Result<Self, ExchangeError> {
        let (Some(api_key), Some(api_secret), Some(api_passphrase)) = (
            config.kucoin_api_key.clone(),
            config.kucoin_api_secret.clone(),
            config.kucoin_api_passphrase.clone(),
        ) else {
            return Err(ExchangeError::MissingCredentials(Exchange::Kucoin));
        };

        Ok(Self {
            http: build_http_client(Exchange::Kucoin, Duration::from_millis(config.http_timeout_ms))?,
            rest_url: config.kucoin_rest_url.trim_end_matches('/').to_string(),
            api_key,
            api_secret,
            api_passphrase,
        })
    }

    /// KuCoin account type for a wallet.
    pub fn account_type(wallet: Wallet) -> &'static str {
        match wallet {
            Wallet::Spot => "trade",
            Wallet::Margin => "margin",
            Wallet::Funding => "main",
        }
    }

    fn wallet_for(account_type: &str) -> Option<Wallet> {
        match account_type {
            "trade" => Some(Wallet::Spot),
            "margin" => Some(Wallet::Margin),
            "main" => Some(Wallet::Funding),
            _ => None,
        }
    }

    async fn signed<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path_with_query: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T, ExchangeError> {
        let body = body.map(|b| b.to_string()).unwrap_or_default();
        let timestamp = signing::timestamp_ms();
        let signature = signing::kucoin_signature(
            &self.api_secret,
            &timestamp,
            method.as_str(),
            path_with_query,
            &body,
        )?;
        let passphrase = signing::kucoin_passphrase(&self.api_secret, &self.api_passphrase)?;

        let mut request = self
            .http
            .request(method, format!("{}{}", self.rest_url, path_with_query))
            .header("KC-API-KEY", &self.api_key)
            .header("KC-API-SIGN", signature)
            .header("KC-API-TIMESTAMP", timestamp)
            .header("KC-API-PASSPHRASE", passphrase)
            .header("KC-API-KEY-VERSION", "2");
        if !body.is_empty() {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body);
        }

        let start = Instant::now();
        let response = request.send().await.map_err(|source| ExchangeError::Http {
            exchange: Exchange::Kucoin,
            source,
        })?;
        metrics::record_http_request_latency(start);

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ExchangeError::RateLimited {
                exchange: Exchange::Kucoin,
                retry_after_seconds: retry_after_seconds(response.headers()),
            });
        }

        let text = response.text().await.map_err(|source| ExchangeError::Http {
            exchange: Exchange::Kucoin,
            source,
        })?;
        Self::unwrap_envelope(status.as_u16(), path_with_query, &text)
    }

    fn unwrap_envelope<T: DeserializeOwned>(
        status: u16,
        path: &str,
        text: &str,
    ) -> Result<T, ExchangeError> {
        let envelope: Envelope<T> = serde_json::from_str(text).map_err(|e| ExchangeError::Parse {
            exchange: Exchange::Kucoin,
            reason: format!("{path}: {e}"),
        })?;

        if envelope.code == "429000" {
            return Err(ExchangeError::RateLimited {
                exchange: Exchange::Kucoin,
                retry_after_seconds: 1,
            });
        }
        if envelope.code != SUCCESS_CODE {
            warn!(path = %path, status = status, code = %envelope.code, "KuCoin request failed");
            return Err(ExchangeError::Api {
                exchange: Exchange::Kucoin,
                status,
                code: envelope.code,
                message: envelope.msg.unwrap_or_default(),
            });
        }

        envelope.data.ok_or_else(|| ExchangeError::Parse {
            exchange: Exchange::Kucoin,
            reason: format!("{path}: missing data"),
        })
    }
}

#[async_trait]
impl ExchangeClient for KucoinClient {
    fn exchange(&self) -> Exchange {
        Exchange::Kucoin
    }

    #[instrument(skip(self, order), fields(side = %order.side, account = %order.account, instrument = %order.instrument))]
    async fn place_market_order(&self, order: &OrderRequest) -> Result<OrderAck, ExchangeError> {
        let side = order.side.to_string().to_lowercase();
        let (path, auto_borrow) = match order.account {
            AccountType::Spot => ("/api/v1/orders", None),
            AccountType::Margin => ("/api/v1/margin/order", Some(true)),
        };
        let body = OrderBody {
            client_oid: &order.client_oid,
            side: &side,
            symbol: SymbolNormalizer::native(Exchange::Kucoin, &order.instrument),
            order_type: "market",
            size: wire_decimal(order.quantity),
            auto_borrow,
        };
        let body = serde_json::to_value(&body).map_err(|e| ExchangeError::Parse {
            exchange: Exchange::Kucoin,
            reason: e.to_string(),
        })?;

        let start = Instant::now();
        let data: OrderData = self.signed(reqwest::Method::POST, path, Some(body)).await?;
        metrics::record_order_latency(start);

        Ok(OrderAck {
            exchange: Exchange::Kucoin,
            order_id: data.order_id,
            client_oid: order.client_oid.clone(),
        })
    }

    #[instrument(skip(self))]
    async fn get_balances(&self) -> Result<Vec<Balance>, ExchangeError> {
        let accounts: Vec<AccountData> = self
            .signed(reqwest::Method::GET, "/api/v1/accounts", None)
            .await?;

        Ok(accounts
            .into_iter()
            .filter(|a| !a.available.is_zero())
            .filter_map(|a| {
                Self::wallet_for(&a.account_type).map(|wallet| Balance {
                    currency: a.currency,
                    amount: a.available,
                    wallet,
                })
            })
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
        let body = json!({
            "clientOid": uuid::Uuid::new_v4().simple().to_string(),
            "currency": currency,
            "from": Self::account_type(from),
            "to": Self::account_type(to),
            "amount": wire_decimal(amount),
        });

        let data: OrderData = self
            .signed(reqwest::Method::POST, "/api/v2/accounts/inner-transfer", Some(body))
            .await?;
        Ok(data.order_id)
    }

    #[instrument(skip(self))]
    async fn deposit_address(&self, currency: &str) -> Result<DepositAddress, ExchangeError> {
        let path = format!("/api/v3/deposit-addresses?currency={currency}");
        let addresses: Vec<AddressData> = self.signed(reqwest::Method::GET, &path, None).await?;

        let first = addresses.into_iter().next().ok_or_else(|| ExchangeError::Rejected {
            exchange: Exchange::Kucoin,
            reason: format!("no deposit address for {currency}"),
        })?;

        Ok(DepositAddress {
            currency: currency.to_string(),
            address: first.address,
            memo: first.memo.filter(|m| !m.is_empty()),
            chain: first.chain,
        })
    }

    #[instrument(skip(self, destination), fields(address = %destination.address))]
    async fn withdraw(
        &self,
        currency: &str,
        amount: Decimal,
        destination: &DepositAddress,
    ) -> Result<String, ExchangeError> {
        let mut body = json!({
            "currency": currency,
            "address": destination.address,
            "amount": wire_decimal(amount),
        });
        if let Some(memo) = &destination.memo {
            body["memo"] = json!(memo);
        }
        if let Some(chain) = &destination.chain {
            body["chain"] = json!(chain);
        }

        let data: WithdrawalData = self
            .signed(reqwest::Method::POST, "/api/v1/withdrawals", Some(body))
            .await?;
        Ok(data.withdrawal_id)
    }

    #[instrument(skip(self))]
    async fn repay_margin_loan(
        &self,
        currency: &str,
        amount: Decimal,
    ) -> Result<String, ExchangeError> {
        let body = json!({
            "currency": currency,
            "size": wire_decimal(amount),
            "isIsolated": false,
        });

        let data: RepayData = self
            .signed(reqwest::Method::POST, "/api/v3/margin/repay", Some(body))
            .await?;
        Ok(data.order_no)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn feed() -> KucoinFeed {
        KucoinFeed::new(
            reqwest::Client::new(),
            "https://api.kucoin.com/",
            &[Instrument::new("SOL", "USDT"), Instrument::new("XRP", "USDT")],
        )
    }

    #[test]
    fn parses_ticker_message() {
        let text = r#"{"type":"message","topic":"/market/ticker:SOL-USDT","subject":"trade.ticker","data":{"sequence":"1","price":"101.1","size":"0.2","bestAsk":"101.2","bestAskSize":"3","bestBid":"101.0","bestBidSize":"4","time":1700000000000}}"#;

        let tickers = feed().parse(text);

        assert_eq!(tickers.len(), 1);
        assert_eq!(tickers[0].exchange, Exchange::Kucoin);
        assert_eq!(tickers[0].instrument, Instrument::new("SOL", "USDT"));
        assert_eq!(tickers[0].bid.as_deref(), Some("101.0"));
        assert_eq!(tickers[0].ask.as_deref(), Some("101.2"));
    }

    #[test]
    fn ignores_control_frames_and_unwatched_topics() {
        assert!(feed().parse(r#"{"id":"a","type":"welcome"}"#).is_empty());
        assert!(feed().parse(r#"{"id":"a","type":"pong"}"#).is_empty());
        let other = r#"{"type":"message","topic":"/market/ticker:BTC-USDT","data":{"bestAsk":"1","bestBid":"1"}}"#;
        assert!(feed().parse(other).is_empty());
    }

    #[test]
    fn subscribe_frames_chunk_topics() {
        let instruments: Vec<Instrument> =
            (0..150).map(|i| Instrument::new(format!("C{i}"), "USDT")).collect();

        let frames = feed().subscribe_messages(&instruments);

        assert_eq!(frames.len(), 2);
        let first: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(first["type"], "subscribe");
        assert_eq!(first["privateChannel"], false);
        let topic = first["topic"].as_str().unwrap();
        assert!(topic.starts_with("/market/ticker:C0-USDT,C1-USDT"));
        assert_eq!(topic.matches(',').count(), 99);
    }

    #[test]
    fn ping_frame_has_ping_type() {
        let ping: serde_json::Value = serde_json::from_str(&feed().ping_message().unwrap()).unwrap();
        assert_eq!(ping["type"], "ping");
    }

    #[test]
    fn envelope_errors_map_to_api_and_rate_limit() {
        let ok: OrderData =
            KucoinClient::unwrap_envelope(200, "/x", r#"{"code":"200000","data":{"orderId":"42"}}"#)
                .unwrap();
        assert_eq!(ok.order_id, "42");

        let err = KucoinClient::unwrap_envelope::<OrderData>(
            400,
            "/x",
            r#"{"code":"200004","msg":"Balance insufficient!"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ExchangeError::Api { ref code, .. } if code == "200004"));
        assert!(!err.is_retryable());

        let limited =
            KucoinClient::unwrap_envelope::<OrderData>(200, "/x", r#"{"code":"429000","msg":"busy"}"#)
                .unwrap_err();
        assert!(limited.is_retryable());
    }

    #[test]
    fn wallet_mapping_round_trips() {
        for wallet in [Wallet::Spot, Wallet::Margin, Wallet::Funding] {
            assert_eq!(KucoinClient::wallet_for(KucoinClient::account_type(wallet)), Some(wallet));
        }
    }
}
