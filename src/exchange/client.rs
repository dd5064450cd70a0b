//! Capability interface every exchange adapter implements.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{info, instrument};

use super::types::{Balance, DepositAddress, Exchange, Wallet};
use crate::error::{ExchangeError, OrchestratorError};
use crate::trading::order::{OrderAck, OrderRequest};

/// Trading and transfer operations the orchestrator relies on.
///
/// Implementations retry transient failures themselves; an `Err` returned here
/// is final for the call.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Which exchange this client talks to.
    fn exchange(&self) -> Exchange;

    /// Wallet withdrawals are debited from.
    fn withdrawal_wallet(&self) -> Wallet {
        Wallet::Funding
    }

    /// Place a market order in the spot or margin account.
    async fn place_market_order(&self, order: &OrderRequest) -> Result<OrderAck, ExchangeError>;

    /// All non-zero balances across wallets.
    async fn get_balances(&self) -> Result<Vec<Balance>, ExchangeError>;

    /// Move funds between wallets of the same account. Returns the transfer id.
    async fn transfer_internal(
        &self,
        currency: &str,
        amount: Decimal,
        from: Wallet,
        to: Wallet,
    ) -> Result<String, ExchangeError>;

    /// Deposit address for receiving an inter-exchange transfer.
    async fn deposit_address(&self, currency: &str) -> Result<DepositAddress, ExchangeError>;

    /// Withdraw to an external address. Returns the withdrawal id.
    async fn withdraw(
        &self,
        currency: &str,
        amount: Decimal,
        destination: &DepositAddress,
    ) -> Result<String, ExchangeError>;

    /// Repay a cross-margin loan. Returns the repayment id.
    async fn repay_margin_loan(&self, currency: &str, amount: Decimal)
        -> Result<String, ExchangeError>;
}

/// Move funds from one exchange to another by withdrawing to the
/// destination's deposit address.
#[instrument(skip(from, to), fields(from = %from.exchange(), to = %to.exchange()))]
pub async fn transfer_external(
    from: &dyn ExchangeClient,
    to: &dyn ExchangeClient,
    currency: &str,
    amount: Decimal,
) -> Result<String, ExchangeError> {
    let destination = to.deposit_address(currency).await?;
    let withdrawal_id = from.withdraw(currency, amount, &destination).await?;

    info!(
        withdrawal_id = %withdrawal_id,
        currency = %currency,
        amount = %amount,
        "External transfer submitted"
    );

    Ok(withdrawal_id)
}

/// Shared handle to an adapter.
pub type SharedClient = Arc<dyn ExchangeClient>;

/// HTTP client tuned for low-latency REST calls.
pub fn build_http_client(exchange: Exchange, timeout: Duration) -> Result<reqwest::Client, ExchangeError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_millis(1_000))
        .tcp_nodelay(true)
        .tcp_keepalive(Duration::from_secs(30))
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
        .map_err(|source| ExchangeError::Http { exchange, source })
}

/// Seconds from a `Retry-After` header, defaulting to one.
pub(crate) fn retry_after_seconds(headers: &reqwest::header::HeaderMap) -> u64 {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(1)
}

/// Decimal as the exchanges expect it in request parameters.
pub(crate) fn wire_decimal(value: Decimal) -> String {
    value.normalize().to_string()
}

/// Adapters keyed by exchange.
#[derive(Clone, Default)]
pub struct ExchangeRegistry {
    clients: HashMap<Exchange, SharedClient>,
}

impl ExchangeRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under the exchange it reports.
    pub fn register(&mut self, client: SharedClient) {
        self.clients.insert(client.exchange(), client);
    }

    /// Builder-style register.
    pub fn with(mut self, client: SharedClient) -> Self {
        self.register(client);
        self
    }

    /// Adapter for an exchange.
    pub fn get(&self, exchange: Exchange) -> Result<&SharedClient, OrchestratorError> {
        self.clients
            .get(&exchange)
            .ok_or(OrchestratorError::UnknownExchange(exchange))
    }

    /// Registered exchanges.
    pub fn exchanges(&self) -> Vec<Exchange> {
        let mut all: Vec<Exchange> = self.clients.keys().copied().collect();
        all.sort();
        all
    }
}

impl std::fmt::Debug for ExchangeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeRegistry")
            .field("exchanges", &self.exchanges())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::paper::{PaperExchange, PaperOp};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn transfer_external_withdraws_to_destination_address() {
        let binance = PaperExchange::new(Exchange::Binance);
        let kucoin = PaperExchange::new(Exchange::Kucoin);
        binance.deposit("USDT", Wallet::Funding, dec!(100));

        let id = transfer_external(&binance, &kucoin, "USDT", dec!(40)).await.unwrap();

        assert!(!id.is_empty());
        assert_eq!(kucoin.calls(PaperOp::DepositAddress), 1);
        assert_eq!(binance.calls(PaperOp::Withdraw), 1);
        assert_eq!(binance.balance("USDT", Wallet::Funding), dec!(60));
    }

    #[test]
    fn registry_reports_missing_exchange() {
        let registry = ExchangeRegistry::new().with(Arc::new(PaperExchange::new(Exchange::Binance)));

        assert!(registry.get(Exchange::Binance).is_ok());
        assert!(matches!(
            registry.get(Exchange::Kucoin),
            Err(OrchestratorError::UnknownExchange(Exchange::Kucoin))
        ));
    }
}
