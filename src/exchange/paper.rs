//! In-process simulated exchange.
//!
//! Used for dry-run mode and as the adapter double in tests: it keeps wallet
//! balances and margin loans, fills market orders at the request's reference
//! price, records every call, and can be told to fail the next N calls of an
//! operation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use strum::Display;
use tracing::debug;

use super::client::ExchangeClient;
use super::types::{Balance, DepositAddress, Exchange, Wallet};
use crate::error::ExchangeError;
use crate::trading::order::{AccountType, OrderAck, OrderRequest, Side};

/// Operations the paper exchange counts and can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum PaperOp {
    /// `place_market_order`.
    PlaceOrder,
    /// `get_balances`.
    GetBalances,
    /// `transfer_internal`.
    TransferInternal,
    /// `deposit_address`.
    DepositAddress,
    /// `withdraw`.
    Withdraw,
    /// `repay_margin_loan`.
    RepayLoan,
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaperCall {
    /// Operation invoked.
    pub op: PaperOp,
    /// Human-readable arguments.
    pub detail: String,
}

#[derive(Debug, Clone, Copy)]
struct InjectedFailure {
    remaining: u32,
    retryable: bool,
}

/// Simulated exchange account.
#[derive(Debug)]
pub struct PaperExchange {
    exchange: Exchange,
    balances: DashMap<(Wallet, String), Decimal>,
    loans: DashMap<String, Decimal>,
    calls: Mutex<Vec<PaperCall>>,
    failures: Mutex<HashMap<PaperOp, InjectedFailure>>,
    latency: Duration,
    sequence: AtomicU64,
}

impl PaperExchange {
    /// Empty account on `exchange`.
    pub fn new(exchange: Exchange) -> Self {
        Self {
            exchange,
            balances: DashMap::new(),
            loans: DashMap::new(),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            latency: Duration::ZERO,
            sequence: AtomicU64::new(1),
        }
    }

    /// Add simulated latency to every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Credit a wallet.
    pub fn deposit(&self, currency: &str, wallet: Wallet, amount: Decimal) {
        *self
            .balances
            .entry((wallet, currency.to_ascii_uppercase()))
            .or_insert(Decimal::ZERO) += amount;
    }

    /// Current wallet balance.
    pub fn balance(&self, currency: &str, wallet: Wallet) -> Decimal {
        self.balances
            .get(&(wallet, currency.to_ascii_uppercase()))
            .map(|v| *v)
            .unwrap_or(Decimal::ZERO)
    }

    /// Outstanding margin loan.
    pub fn loan(&self, currency: &str) -> Decimal {
        self.loans
            .get(&currency.to_ascii_uppercase())
            .map(|v| *v)
            .unwrap_or(Decimal::ZERO)
    }

    /// Fail the next `count` calls of `op`.
    pub fn fail_next(&self, op: PaperOp, count: u32, retryable: bool) {
        self.failures_guard().insert(
            op,
            InjectedFailure {
                remaining: count,
                retryable,
            },
        );
    }

    /// Stop injecting failures for `op`.
    pub fn clear_failures(&self, op: PaperOp) {
        self.failures_guard().remove(&op);
    }

    /// Number of calls made for `op`.
    pub fn calls(&self, op: PaperOp) -> usize {
        self.calls_guard().iter().filter(|c| c.op == op).count()
    }

    /// Every call made, in order.
    pub fn call_log(&self) -> Vec<PaperCall> {
        self.calls_guard().clone()
    }

    /// Forget recorded calls.
    pub fn reset_calls(&self) {
        self.calls_guard().clear();
    }

    fn calls_guard(&self) -> std::sync::MutexGuard<'_, Vec<PaperCall>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn failures_guard(&self) -> std::sync::MutexGuard<'_, HashMap<PaperOp, InjectedFailure>> {
        self.failures.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn enter(&self, op: PaperOp, detail: String) -> Result<(), ExchangeError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        debug!(exchange = %self.exchange, op = %op, detail = %detail, "Paper call");
        self.calls_guard().push(PaperCall { op, detail });

        let mut failures = self.failures_guard();
        if let Some(failure) = failures.get_mut(&op) {
            if failure.remaining > 0 {
                failure.remaining -= 1;
                return Err(ExchangeError::Simulated {
                    exchange: self.exchange,
                    operation: op.to_string(),
                    retryable: failure.retryable,
                });
            }
        }
        Ok(())
    }

    fn next_id(&self, prefix: &str) -> String {
        format!(
            "paper-{}-{}-{}",
            self.exchange.to_string().to_lowercase(),
            prefix,
            self.sequence.fetch_add(1, Ordering::SeqCst)
        )
    }

    fn debit(&self, wallet: Wallet, currency: &str, amount: Decimal) -> Result<(), ExchangeError> {
        let mut entry = self
            .balances
            .entry((wallet, currency.to_ascii_uppercase()))
            .or_insert(Decimal::ZERO);
        if *entry < amount {
            return Err(ExchangeError::InsufficientFunds {
                exchange: self.exchange,
                currency: currency.to_string(),
                required: amount,
                available: *entry,
            });
        }
        *entry -= amount;
        Ok(())
    }

    fn fill(&self, order: &OrderRequest) -> Result<(), ExchangeError> {
        let base = order.instrument.base();
        let quote = order.instrument.quote();
        let notional = order.notional();

        match (order.account, order.side) {
            (AccountType::Spot, Side::Buy) => {
                self.debit(Wallet::Spot, quote, notional)?;
                self.deposit(base, Wallet::Spot, order.quantity);
            }
            (AccountType::Spot, Side::Sell) => {
                self.debit(Wallet::Spot, base, order.quantity)?;
                self.deposit(quote, Wallet::Spot, notional);
            }
            (AccountType::Margin, Side::Buy) => {
                self.debit(Wallet::Margin, quote, notional)?;
                self.deposit(base, Wallet::Margin, order.quantity);
            }
            (AccountType::Margin, Side::Sell) => {
                if self.balance(quote, Wallet::Margin).is_zero() {
                    return Err(ExchangeError::Rejected {
                        exchange: self.exchange,
                        reason: "no margin collateral".to_string(),
                    });
                }
                let held = self.balance(base, Wallet::Margin).min(order.quantity);
                let borrowed = order.quantity - held;
                self.debit(Wallet::Margin, base, held)?;
                if borrowed > Decimal::ZERO {
                    *self
                        .loans
                        .entry(base.to_ascii_uppercase())
                        .or_insert(Decimal::ZERO) += borrowed;
                }
                self.deposit(quote, Wallet::Margin, notional);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ExchangeClient for PaperExchange {
    fn exchange(&self) -> Exchange {
        self.exchange
    }

    async fn place_market_order(&self, order: &OrderRequest) -> Result<OrderAck, ExchangeError> {
        self.enter(
            PaperOp::PlaceOrder,
            format!(
                "{} {} {} {}",
                order.account, order.side, order.quantity, order.instrument
            ),
        )
        .await?;

        order.validate().map_err(|reason| ExchangeError::Rejected {
            exchange: self.exchange,
            reason,
        })?;
        self.fill(order)?;

        Ok(OrderAck {
            exchange: self.exchange,
            order_id: self.next_id("order"),
            client_oid: order.client_oid.clone(),
        })
    }

    async fn get_balances(&self) -> Result<Vec<Balance>, ExchangeError> {
        self.enter(PaperOp::GetBalances, String::new()).await?;

        let mut balances: Vec<Balance> = self
            .balances
            .iter()
            .filter(|entry| !entry.value().is_zero())
            .map(|entry| Balance {
                currency: entry.key().1.clone(),
                amount: *entry.value(),
                wallet: entry.key().0,
            })
            .collect();
        balances.sort_by(|a, b| a.currency.cmp(&b.currency));
        Ok(balances)
    }

    async fn transfer_internal(
        &self,
        currency: &str,
        amount: Decimal,
        from: Wallet,
        to: Wallet,
    ) -> Result<String, ExchangeError> {
        self.enter(
            PaperOp::TransferInternal,
            format!("{amount} {currency} {from}->{to}"),
        )
        .await?;

        self.debit(from, currency, amount)?;
        self.deposit(currency, to, amount);
        Ok(self.next_id("transfer"))
    }

    async fn deposit_address(&self, currency: &str) -> Result<DepositAddress, ExchangeError> {
        self.enter(PaperOp::DepositAddress, currency.to_string()).await?;

        Ok(DepositAddress {
            currency: currency.to_string(),
            address: format!("paper-{}-{}", self.exchange, currency).to_lowercase(),
            memo: None,
            chain: None,
        })
    }

    async fn withdraw(
        &self,
        currency: &str,
        amount: Decimal,
        destination: &DepositAddress,
    ) -> Result<String, ExchangeError> {
        self.enter(
            PaperOp::Withdraw,
            format!("{amount} {currency} -> {}", destination.address),
        )
        .await?;

        self.debit(self.withdrawal_wallet(), currency, amount)?;
        Ok(self.next_id("withdrawal"))
    }

    async fn repay_margin_loan(
        &self,
        currency: &str,
        amount: Decimal,
    ) -> Result<String, ExchangeError> {
        self.enter(PaperOp::RepayLoan, format!("{amount} {currency}"))
            .await?;

        let outstanding = self.loan(currency);
        if outstanding.is_zero() {
            return Err(ExchangeError::Rejected {
                exchange: self.exchange,
                reason: format!("no outstanding {currency} loan"),
            });
        }

        let repaid = amount.min(outstanding);
        self.debit(Wallet::Margin, currency, repaid)?;
        if let Some(mut loan) = self.loans.get_mut(&currency.to_ascii_uppercase()) {
            *loan -= repaid;
        }
        Ok(self.next_id("repay"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::Instrument;
    use rust_decimal_macros::dec;

    fn sol() -> Instrument {
        Instrument::new("SOL", "USDT")
    }

    #[tokio::test]
    async fn spot_round_trip_moves_balances() {
        let paper = PaperExchange::new(Exchange::Binance);
        paper.deposit("USDT", Wallet::Spot, dec!(1000));

        paper
            .place_market_order(&OrderRequest::spot_buy(sol(), dec!(5), dec!(100)))
            .await
            .unwrap();
        assert_eq!(paper.balance("USDT", Wallet::Spot), dec!(500));
        assert_eq!(paper.balance("SOL", Wallet::Spot), dec!(5));

        paper
            .place_market_order(&OrderRequest::spot_sell(sol(), dec!(5), dec!(110)))
            .await
            .unwrap();
        assert_eq!(paper.balance("USDT", Wallet::Spot), dec!(1050));
        assert_eq!(paper.balance("SOL", Wallet::Spot), dec!(0));
        assert_eq!(paper.calls(PaperOp::PlaceOrder), 2);
    }

    #[tokio::test]
    async fn margin_sell_borrows_and_repay_clears_loan() {
        let paper = PaperExchange::new(Exchange::Kucoin);
        paper.deposit("USDT", Wallet::Spot, dec!(100));
        paper
            .transfer_internal("USDT", dec!(60), Wallet::Spot, Wallet::Margin)
            .await
            .unwrap();

        paper
            .place_market_order(&OrderRequest::margin_sell(sol(), dec!(2), dec!(30)))
            .await
            .unwrap();
        assert_eq!(paper.loan("SOL"), dec!(2));
        assert_eq!(paper.balance("USDT", Wallet::Margin), dec!(120));

        paper.deposit("SOL", Wallet::Margin, dec!(2));
        paper.repay_margin_loan("SOL", dec!(2)).await.unwrap();
        assert_eq!(paper.loan("SOL"), dec!(0));
        assert_eq!(paper.balance("SOL", Wallet::Margin), dec!(0));
    }

    #[tokio::test]
    async fn margin_sell_without_collateral_is_rejected() {
        let paper = PaperExchange::new(Exchange::Kucoin);
        let err = paper
            .place_market_order(&OrderRequest::margin_sell(sol(), dec!(1), dec!(30)))
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Rejected { .. }));
    }

    #[tokio::test]
    async fn insufficient_funds_leave_balances_untouched() {
        let paper = PaperExchange::new(Exchange::Binance);
        paper.deposit("USDT", Wallet::Spot, dec!(10));

        let err = paper
            .transfer_internal("USDT", dec!(11), Wallet::Spot, Wallet::Margin)
            .await
            .unwrap_err();

        assert!(matches!(err, ExchangeError::InsufficientFunds { .. }));
        assert_eq!(paper.balance("USDT", Wallet::Spot), dec!(10));
        assert_eq!(paper.balance("USDT", Wallet::Margin), dec!(0));
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let paper = PaperExchange::new(Exchange::Binance);
        paper.fail_next(PaperOp::GetBalances, 1, false);

        assert!(paper.get_balances().await.is_err());
        assert!(paper.get_balances().await.is_ok());
        assert_eq!(paper.calls(PaperOp::GetBalances), 2);
    }
}
