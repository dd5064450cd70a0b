//! Retry with exponential backoff for transient adapter failures.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::warn;

use super::client::ExchangeClient;
use super::types::{Balance, DepositAddress, Exchange, Wallet};
use crate::error::ExchangeError;
use crate::trading::order::{OrderAck, OrderRequest};

/// Backoff settings for adapter calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound on any single delay in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff multiplier.
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 250,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let clamped_ms = delay_ms.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(clamped_ms)
    }

    /// Run `op` until it succeeds, fails terminally, or attempts run out.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, ExchangeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ExchangeError>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt + 1 < self.max_attempts => {
                    let delay = match &e {
                        ExchangeError::RateLimited { retry_after_seconds, .. } => {
                            Duration::from_secs(*retry_after_seconds).max(self.next_delay(attempt))
                        }
                        _ => self.next_delay(attempt),
                    };
                    warn!(
                        operation = %operation,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient exchange error, retrying"
                    );
                    crate::metrics::inc_exchange_retries(operation);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Wraps an adapter so every call goes through a [`RetryPolicy`].
///
/// Only retryable errors are retried. An order keeps its client order id
/// across attempts, so a duplicate fill can be traced, but neither venue
/// rejects a resubmitted market order and transfers get a fresh id on every
/// attempt. A timeout on a request that did reach the venue can therefore
/// execute twice.
pub struct Retrying<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C: ExchangeClient> Retrying<C> {
    /// Wrap `inner` with `policy`.
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// The wrapped adapter.
    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C: ExchangeClient> ExchangeClient for Retrying<C> {
    fn exchange(&self) -> Exchange {
        self.inner.exchange()
    }

    fn withdrawal_wallet(&self) -> Wallet {
        self.inner.withdrawal_wallet()
    }

    async fn place_market_order(&self, order: &OrderRequest) -> Result<OrderAck, ExchangeError> {
        self.policy
            .run("place_market_order", || self.inner.place_market_order(order))
            .await
    }

    async fn get_balances(&self) -> Result<Vec<Balance>, ExchangeError> {
        self.policy.run("get_balances", || self.inner.get_balances()).await
    }

    async fn transfer_internal(
        &self,
        currency: &str,
        amount: Decimal,
        from: Wallet,
        to: Wallet,
    ) -> Result<String, ExchangeError> {
        self.policy
            .run("transfer_internal", || {
                self.inner.transfer_internal(currency, amount, from, to)
            })
            .await
    }

    async fn deposit_address(&self, currency: &str) -> Result<DepositAddress, ExchangeError> {
        self.policy
            .run("deposit_address", || self.inner.deposit_address(currency))
            .await
    }

    async fn withdraw(
        &self,
        currency: &str,
        amount: Decimal,
        destination: &DepositAddress,
    ) -> Result<String, ExchangeError> {
        self.policy
            .run("withdraw", || self.inner.withdraw(currency, amount, destination))
            .await
    }

    async fn repay_margin_loan(
        &self,
        currency: &str,
        amount: Decimal,
    ) -> Result<String, ExchangeError> {
        self.policy
            .run("repay_margin_loan", || self.inner.repay_margin_loan(currency, amount))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::paper::{PaperExchange, PaperOp};
    use rust_decimal_macros::dec;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay_ms: 1,
            max_delay_ms: 2,
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn next_delay_grows_and_clamps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_delay(0), Duration::from_millis(250));
        assert_eq!(policy.next_delay(1), Duration::from_millis(500));
        assert_eq!(policy.next_delay(10), Duration::from_millis(5_000));
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let paper = PaperExchange::new(Exchange::Binance);
        paper.fail_next(PaperOp::GetBalances, 2, true);
        let client = Retrying::new(paper, fast_policy(3));

        assert!(client.get_balances().await.is_ok());
        assert_eq!(client.inner().calls(PaperOp::GetBalances), 3);
    }

    #[tokio::test]
    async fn terminal_failures_are_not_retried() {
        let paper = PaperExchange::new(Exchange::Kucoin);
        paper.fail_next(PaperOp::RepayLoan, 1, false);
        let client = Retrying::new(paper, fast_policy(5));

        assert!(client.repay_margin_loan("SOL", dec!(1)).await.is_err());
        assert_eq!(client.inner().calls(PaperOp::RepayLoan), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let paper = PaperExchange::new(Exchange::Kucoin);
        paper.fail_next(PaperOp::GetBalances, 10, true);
        let client = Retrying::new(paper, fast_policy(2));

        let err = client.get_balances().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(client.inner().calls(PaperOp::GetBalances), 2);
    }
}
