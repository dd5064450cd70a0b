//! Execution orchestrator.
//!
//! Owns the one position the engine may hold and drives it through
//! open -> close, persisting after every step so a restart resumes exactly
//! where the previous process stopped. A single decision guard serializes
//! every check-and-act on "is a position open", across all instruments.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use strum::Display;
use tracing::{debug, error, info, instrument, warn};

use super::calculator::{order_amount, should_close, Opportunity, StrategyParams};
use super::detector::check_arbitrage;
use crate::config::Config;
use crate::error::{ExchangeError, OrchestratorError};
use crate::exchange::{available, transfer_external, Exchange, ExchangeRegistry, SharedClient, Wallet};
use crate::metrics;
use crate::notify::{Event, NotifierRegistry};
use crate::orderbook::{PriceSnapshot, SnapshotHandler};
use crate::trading::{LegState, OrderRequest, Position, PositionStore, Step};

/// Lifecycle state reported on the status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EngineState {
    /// No position; looking for opportunities.
    Idle,
    /// Opening legs in flight.
    Opening,
    /// Both legs live; waiting for the gap to close.
    Open,
    /// Close sequence running.
    Closing,
    /// A step failed; new openings are blocked.
    Stuck,
}

/// Tunables the orchestrator reads from config.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Evaluator parameters.
    pub params: StrategyParams,
    /// Close when buy price >= sell price minus this.
    pub close_spread: Decimal,
    /// Whole-unit order quantities.
    pub integer_lots: bool,
    /// Minimum time between resume attempts while stuck.
    pub stuck_retry: Duration,
    /// Rebalance quote between venues after each close.
    pub rebalance_after_close: bool,
}

impl OrchestratorSettings {
    /// Settings from application config.
    pub fn from_config(config: &Config) -> Self {
        Self {
            params: config.strategy_params(),
            close_spread: config.close_spread,
            integer_lots: config.integer_lots,
            stuck_retry: Duration::from_secs(config.stuck_retry_secs),
            rebalance_after_close: config.rebalance_after_close,
        }
    }
}

/// Running counters.
#[derive(Debug, Default)]
pub struct OrchestratorStats {
    opportunities: AtomicU64,
    opened: AtomicU64,
    closed: AtomicU64,
    unwound: AtomicU64,
    failed_opens: AtomicU64,
    skipped_busy: AtomicU64,
}

/// Point-in-time copy of [`OrchestratorStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Opportunities seen while idle.
    pub opportunities: u64,
    /// Positions fully opened.
    pub opened: u64,
    /// Positions fully closed.
    pub closed: u64,
    /// Partial opens reversed.
    pub unwound: u64,
    /// Opening attempts that committed nothing.
    pub failed_opens: u64,
    /// Snapshots skipped because a decision was in flight.
    pub skipped_busy: u64,
}

impl OrchestratorStats {
    /// Copy the counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            opportunities: self.opportunities.load(Ordering::Relaxed),
            opened: self.opened.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
            unwound: self.unwound.load(Ordering::Relaxed),
            failed_opens: self.failed_opens.load(Ordering::Relaxed),
            skipped_busy: self.skipped_busy.load(Ordering::Relaxed),
        }
    }
}

/// Status exposed over HTTP.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    /// Lifecycle state.
    pub state: EngineState,
    /// Whether openings are blocked.
    pub halted: bool,
    /// Why, if halted.
    pub halt_reason: Option<String>,
    /// Current position.
    pub position: Option<Position>,
    /// Counters.
    pub stats: StatsSnapshot,
}

/// Prices the reversing orders are placed at.
#[derive(Debug, Clone, Copy)]
struct ClosePrices {
    buy_venue: Decimal,
    sell_venue: Decimal,
}

impl ClosePrices {
    fn from_position(position: &Position) -> Self {
        Self {
            buy_venue: position.buy_price,
            sell_venue: position.sell_price,
        }
    }

    fn from_snapshot(position: &Position, snapshot: &PriceSnapshot) -> Self {
        Self {
            buy_venue: snapshot
                .price_on(position.buy_exchange)
                .unwrap_or(position.buy_price),
            sell_venue: snapshot
                .price_on(position.sell_exchange)
                .unwrap_or(position.sell_price),
        }
    }
}

/// Drives the single position through its lifecycle.
pub struct Orchestrator {
    registry: ExchangeRegistry,
    store: Arc<dyn PositionStore>,
    notifier: NotifierRegistry,
    settings: OrchestratorSettings,
    decision: tokio::sync::Mutex<()>,
    position: RwLock<Option<Position>>,
    state: RwLock<EngineState>,
    halted: AtomicBool,
    halt_reason: RwLock<Option<String>>,
    last_resume: Mutex<Option<Instant>>,
    stats: OrchestratorStats,
}

impl Orchestrator {
    /// New orchestrator. Call [`Orchestrator::recover`] before feeding snapshots.
    pub fn new(
        registry: ExchangeRegistry,
        store: Arc<dyn PositionStore>,
        notifier: NotifierRegistry,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            registry,
            store,
            notifier,
            settings,
            decision: tokio::sync::Mutex::new(()),
            position: RwLock::new(None),
            state: RwLock::new(EngineState::Idle),
            halted: AtomicBool::new(false),
            halt_reason: RwLock::new(None),
            last_resume: Mutex::new(None),
            stats: OrchestratorStats::default(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether openings are blocked by a stuck position.
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// In-memory copy of the position.
    pub fn position(&self) -> Option<Position> {
        self.position.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Everything the status endpoint reports.
    pub fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            state: self.state(),
            halted: self.is_halted(),
            halt_reason: self.halt_reason.read().unwrap_or_else(|e| e.into_inner()).clone(),
            position: self.position(),
            stats: self.stats(),
        }
    }

    fn set_state(&self, state: EngineState) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn cache(&self, position: Option<Position>) {
        *self.position.write().unwrap_or_else(|e| e.into_inner()) = position;
    }

    fn client(&self, exchange: Exchange) -> Result<SharedClient, OrchestratorError> {
        self.registry.get(exchange).cloned()
    }

    /// Load the persisted position and bring the engine to a consistent state.
    ///
    /// An open position waits for its close trigger; anything mid-way is
    /// resumed immediately.
    #[instrument(skip(self))]
    pub async fn recover(&self) -> Result<EngineState, OrchestratorError> {
        let _guard = self.decision.lock().await;

        let Some(position) = self.store.load().await? else {
            info!("No persisted position, starting idle");
            self.cache(None);
            self.set_state(EngineState::Idle);
            return Ok(EngineState::Idle);
        };

        info!(
            coin = %position.coin,
            step = %position.step,
            buy = %position.buy_exchange,
            sell = %position.sell_exchange,
            "Recovered persisted position"
        );
        self.cache(Some(position.clone()));

        if position.step == Step::SellPlaced {
            self.set_state(EngineState::Open);
            return Ok(EngineState::Open);
        }

        let prices = ClosePrices::from_position(&position);
        let mut position = position;
        self.close_locked(&mut position, prices).await?;
        Ok(self.state())
    }

    /// Open a position on `opportunity`.
    pub async fn open(&self, opportunity: &Opportunity) -> Result<Position, OrchestratorError> {
        let _guard = self.decision.lock().await;
        self.open_locked(opportunity).await
    }

    /// Close the current position at its recorded prices.
    pub async fn close(&self) -> Result<(), OrchestratorError> {
        let _guard = self.decision.lock().await;
        let mut position = self.position().ok_or(OrchestratorError::NoPosition)?;
        let prices = ClosePrices::from_position(&position);
        self.close_locked(&mut position, prices).await
    }

    /// Continue a stuck or recovered position from its last completed step.
    pub async fn resume(&self) -> Result<(), OrchestratorError> {
        let _guard = self.decision.lock().await;
        self.resume_locked().await
    }

    /// Wait for any in-flight open or close to finish.
    ///
    /// Holds the decision guard for the duration of the call, so no new work
    /// starts while draining.
    pub async fn drain(&self) {
        let _guard = self.decision.lock().await;
        debug!(state = %self.state(), "Orchestrator drained");
    }

    async fn resume_locked(&self) -> Result<(), OrchestratorError> {
        *self.last_resume.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
        let mut position = self.position().ok_or(OrchestratorError::NoPosition)?;
        info!(coin = %position.coin, step = %position.step, "Resuming position");

        // Open with both legs live: only the record is missing, keep waiting for the trigger.
        if position.step == Step::SellPlaced && position.buy_leg.is_open() && position.sell_leg.is_open() {
            if let Err(e) = self.store.save(&position).await {
                self.halt(&position, format!("failed to persist open position: {e}"));
                return Err(e.into());
            }
            self.clear_halt(&position);
            self.set_state(EngineState::Open);
            return Ok(());
        }

        let prices = ClosePrices::from_position(&position);
        self.close_locked(&mut position, prices).await
    }

    #[instrument(skip(self, opportunity), fields(instrument = %opportunity.instrument, buy = %opportunity.buy_exchange, sell = %opportunity.sell_exchange))]
    async fn open_locked(&self, opportunity: &Opportunity) -> Result<Position, OrchestratorError> {
        if self.is_halted() {
            return Err(OrchestratorError::Halted {
                reason: self
                    .halt_reason
                    .read()
                    .unwrap_or_else(|e| e.into_inner())
                    .clone()
                    .unwrap_or_default(),
            });
        }
        if let Some(existing) = self.store.load().await? {
            self.cache(Some(existing.clone()));
            return Err(OrchestratorError::PositionAlreadyOpen {
                coin: existing.coin,
            });
        }

        let instrument = opportunity.instrument.clone();
        let quote = instrument.quote().to_string();
        let capital = self.settings.params.capital;
        let buy = self.client(opportunity.buy_exchange)?;
        let sell = self.client(opportunity.sell_exchange)?;

        let (buy_balances, sell_balances) = tokio::join!(buy.get_balances(), sell.get_balances());
        for (exchange, balances) in [
            (opportunity.buy_exchange, buy_balances?),
            (opportunity.sell_exchange, sell_balances?),
        ] {
            let have = available(&balances, &quote, Wallet::Spot);
            if have < capital {
                debug!(exchange = %exchange, have = %have, need = %capital, "Skipping, insufficient balance");
                return Err(OrchestratorError::InsufficientBalance {
                    exchange,
                    currency: quote,
                    required: capital,
                    available: have,
                });
            }
        }

        let amount = order_amount(capital, opportunity.buy_price, self.settings.integer_lots)?;
        self.set_state(EngineState::Opening);
        info!(amount = %amount, capital = %capital, "Opening position");

        let buy_order = OrderRequest::spot_buy(instrument.clone(), amount, opportunity.buy_price);
        let sell_order = OrderRequest::margin_sell(instrument.clone(), amount, opportunity.sell_price);

        let buy_leg = async {
            let result = buy.place_market_order(&buy_order).await;
            record_order(opportunity.buy_exchange, result.is_ok());
            result
        };
        // (collateral_posted, result)
        let sell_leg = async {
            if let Err(e) = sell
                .transfer_internal(&quote, capital, Wallet::Spot, Wallet::Margin)
                .await
            {
                return (false, Err(e));
            }
            let result = sell.place_market_order(&sell_order).await;
            record_order(opportunity.sell_exchange, result.is_ok());
            (true, result)
        };
        let (buy_result, (collateral_posted, sell_result)) = tokio::join!(buy_leg, sell_leg);

        let mut position = Position::opened(
            opportunity.buy_exchange,
            opportunity.sell_exchange,
            &instrument,
            amount,
            capital,
            opportunity.buy_price,
            opportunity.sell_price,
        );

        match (&buy_result, &sell_result) {
            (Ok(buy_ack), Ok(sell_ack)) => {
                info!(
                    buy_order = %buy_ack.order_id,
                    sell_order = %sell_ack.order_id,
                    "Both legs placed"
                );
                self.cache(Some(position.clone()));
                if let Err(e) = self.store.save(&position).await {
                    self.halt(&position, format!("failed to persist open position: {e}"));
                    return Err(e.into());
                }
                self.set_state(EngineState::Open);
                self.stats.opened.fetch_add(1, Ordering::Relaxed);
                metrics::inc_opportunities_executed();
                self.notifier.notify_all(Event::PositionOpened {
                    coin: position.coin.clone(),
                    amount,
                });
                Ok(position)
            }
            _ if buy_result.is_err() && sell_result.is_err() && !collateral_posted => {
                self.set_state(EngineState::Idle);
                self.stats.failed_opens.fetch_add(1, Ordering::Relaxed);
                let describe = |r: &Result<_, ExchangeError>| match r {
                    Ok(_) => "ok".to_string(),
                    Err(e) => e.to_string(),
                };
                let err = OrchestratorError::OpenFailed {
                    buy: describe(&buy_result),
                    sell: describe(&sell_result),
                };
                warn!(error = %err, "Open failed, nothing committed");
                Err(err)
            }
            _ => {
                let (failed_leg, reason) = match (&buy_result, &sell_result) {
                    (Err(e), _) => ("buy", e.to_string()),
                    (_, Err(e)) => ("sell", e.to_string()),
                    _ => ("none", String::new()),
                };
                warn!(failed_leg = failed_leg, reason = %reason, "Partial open, unwinding");

                position.step = Step::BuyPlaced;
                position.buy_leg = if buy_result.is_ok() { LegState::Open } else { LegState::NotPlaced };
                position.sell_leg = if sell_result.is_ok() { LegState::Open } else { LegState::NotPlaced };
                position.collateral_posted = collateral_posted;

                let prices = ClosePrices::from_position(&position);
                let unwound = self.close_locked(&mut position, prices).await.is_ok();
                if unwound {
                    self.stats.unwound.fetch_add(1, Ordering::Relaxed);
                    self.notifier.notify_all(Event::PartialOpenUnwound {
                        coin: position.coin.clone(),
                        reason: reason.clone(),
                    });
                }
                Err(OrchestratorError::PartialOpen {
                    failed_leg,
                    reason,
                    unwound,
                })
            }
        }
    }

    /// Persist, run the remaining close steps and finish up. Halts on failure.
    async fn close_locked(
        &self,
        position: &mut Position,
        prices: ClosePrices,
    ) -> Result<(), OrchestratorError> {
        let unwinding = position.step < Step::SellPlaced;
        let _timer = metrics::timer_close();
        self.set_state(EngineState::Closing);
        self.cache(Some(position.clone()));

        // A resume after a store failure re-saves the completed step first.
        if let Err(e) = self.store.save(position).await {
            self.halt(position, format!("failed to persist position: {e}"));
            return Err(e.into());
        }

        if let Err(e) = self.drive_close(position, prices).await {
            self.halt(position, e.to_string());
            return Err(e);
        }

        self.cache(None);
        self.set_state(EngineState::Idle);
        self.clear_halt(position);

        if !unwinding {
            self.stats.closed.fetch_add(1, Ordering::Relaxed);
            metrics::inc_closes_completed();
            self.notifier.notify_all(Event::PositionClosed {
                coin: position.coin.clone(),
            });
        }

        if self.settings.rebalance_after_close {
            if let Err(e) = self.rebalance(position).await {
                warn!(error = %e, "Rebalance failed");
                self.notifier.notify_all(Event::RebalanceFailed {
                    reason: e.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Step machine. Each arm performs one step's calls, then advances and
    /// persists. Completed steps are never repeated.
    async fn drive_close(
        &self,
        position: &mut Position,
        prices: ClosePrices,
    ) -> Result<(), OrchestratorError> {
        let buy = self.client(position.buy_exchange)?;
        let sell = self.client(position.sell_exchange)?;

        loop {
            debug!(coin = %position.coin, step = %position.step, "Close step");
            match position.step {
                Step::None | Step::BuyPlaced | Step::SellPlaced => {
                    self.reverse_legs(position, &buy, &sell, prices).await?;
                    self.advance(position, Step::BuyReversed).await?;
                }
                Step::BuyReversed => {
                    if position.short_opened() {
                        sell.transfer_internal(&position.coin, position.amount, Wallet::Spot, Wallet::Margin)
                            .await
                            .map_err(|e| step_failed(position, sell.exchange(), e))?;
                    }
                    self.advance(position, Step::Transfer1).await?;
                }
                Step::Transfer1 => {
                    if position.short_opened() {
                        sell.repay_margin_loan(&position.coin, position.amount)
                            .await
                            .map_err(|e| step_failed(position, sell.exchange(), e))?;
                    }
                    self.advance(position, Step::LoanRepaid).await?;
                }
                Step::LoanRepaid => {
                    if position.collateral_posted {
                        sell.transfer_internal(&position.quote, position.capital, Wallet::Margin, Wallet::Spot)
                            .await
                            .map_err(|e| step_failed(position, sell.exchange(), e))?;
                    }
                    self.advance(position, Step::Transfer2).await?;
                }
                Step::Transfer2 => {
                    self.store.clear().await?;
                    position.advance_to(Step::Closed)?;
                    info!(coin = %position.coin, "Position closed");
                }
                Step::Closed => return Ok(()),
            }
        }
    }

    /// Reverse every live leg concurrently, persisting leg flags as they confirm.
    async fn reverse_legs(
        &self,
        position: &mut Position,
        buy: &SharedClient,
        sell: &SharedClient,
        prices: ClosePrices,
    ) -> Result<(), OrchestratorError> {
        let instrument = position.instrument();
        let sell_back = position
            .buy_leg
            .is_open()
            .then(|| OrderRequest::spot_sell(instrument.clone(), position.amount, prices.buy_venue));
        let buy_back = position
            .sell_leg
            .is_open()
            .then(|| OrderRequest::spot_buy(instrument.clone(), position.amount, prices.sell_venue));

        let on_buy_venue = async {
            match &sell_back {
                Some(order) => Some(buy.place_market_order(order).await),
                None => None,
            }
        };
        let on_sell_venue = async {
            match &buy_back {
                Some(order) => Some(sell.place_market_order(order).await),
                None => None,
            }
        };
        let (buy_venue_result, sell_venue_result) = tokio::join!(on_buy_venue, on_sell_venue);

        let mut failure = None;
        if let Some(result) = buy_venue_result {
            record_order(buy.exchange(), result.is_ok());
            match result {
                Ok(_) => position.buy_leg = LegState::Reversed,
                Err(e) => failure = Some((buy.exchange(), e)),
            }
        }
        if let Some(result) = sell_venue_result {
            record_order(sell.exchange(), result.is_ok());
            match result {
                Ok(_) => position.sell_leg = LegState::Reversed,
                Err(e) => {
                    if failure.is_none() {
                        failure = Some((sell.exchange(), e));
                    }
                }
            }
        }

        position.touch();
        self.persist(position).await?;

        match failure {
            Some((exchange, source)) => Err(step_failed(position, exchange, source)),
            None => Ok(()),
        }
    }

    async fn advance(&self, position: &mut Position, step: Step) -> Result<(), OrchestratorError> {
        position.advance_to(step)?;
        self.persist(position).await
    }

    async fn persist(&self, position: &Position) -> Result<(), OrchestratorError> {
        self.cache(Some(position.clone()));
        self.store.save(position).await?;
        Ok(())
    }

    fn halt(&self, position: &Position, reason: String) {
        error!(coin = %position.coin, step = %position.step, reason = %reason, "Halting");
        self.halted.store(true, Ordering::SeqCst);
        *self.halt_reason.write().unwrap_or_else(|e| e.into_inner()) = Some(reason.clone());
        *self.last_resume.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
        self.set_state(EngineState::Stuck);
        metrics::inc_stuck_positions();
        self.notifier.notify_all(Event::PositionStuck {
            coin: position.coin.clone(),
            step: position.step,
            reason,
        });
    }

    fn clear_halt(&self, position: &Position) {
        if self.halted.swap(false, Ordering::SeqCst) {
            *self.halt_reason.write().unwrap_or_else(|e| e.into_inner()) = None;
            info!(coin = %position.coin, step = %position.step, "Stuck position resolved, halt cleared");
            self.notifier.notify_all(Event::HaltCleared);
        }
    }

    fn resume_due(&self) -> bool {
        match *self.last_resume.lock().unwrap_or_else(|e| e.into_inner()) {
            Some(last) => last.elapsed() >= self.settings.stuck_retry,
            None => true,
        }
    }

    /// Even out spot quote between the two venues.
    #[instrument(skip(self, position), fields(quote = %position.quote))]
    async fn rebalance(&self, position: &Position) -> Result<(), OrchestratorError> {
        let a = self.client(position.buy_exchange)?;
        let b = self.client(position.sell_exchange)?;
        let (a_bal, b_bal) = tokio::join!(a.get_balances(), b.get_balances());
        let a_quote = available(&a_bal?, &position.quote, Wallet::Spot);
        let b_quote = available(&b_bal?, &position.quote, Wallet::Spot);

        let (rich, poor, rich_quote, poor_quote) = if a_quote >= b_quote {
            (a, b, a_quote, b_quote)
        } else {
            (b, a, b_quote, a_quote)
        };
        if poor_quote >= self.settings.params.capital {
            debug!(rich = %rich_quote, poor = %poor_quote, "Balances sufficient, no rebalance");
            return Ok(());
        }

        let amount = ((rich_quote - poor_quote) / Decimal::TWO).round_dp(2);
        if amount <= Decimal::ZERO {
            return Ok(());
        }

        let source_wallet = rich.withdrawal_wallet();
        if source_wallet != Wallet::Spot {
            rich.transfer_internal(&position.quote, amount, Wallet::Spot, source_wallet)
                .await?;
        }
        let id = transfer_external(rich.as_ref(), poor.as_ref(), &position.quote, amount).await?;
        info!(
            from = %rich.exchange(),
            to = %poor.exchange(),
            amount = %amount,
            withdrawal_id = %id,
            "Rebalance submitted"
        );
        Ok(())
    }

    async fn handle_snapshot(&self, snapshot: PriceSnapshot) -> Result<(), OrchestratorError> {
        let Ok(_guard) = self.decision.try_lock() else {
            self.stats.skipped_busy.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        };

        if let Some(mut position) = self.position() {
            if self.is_halted() {
                if self.resume_due() {
                    return self.resume_locked().await;
                }
                return Ok(());
            }
            if position.step != Step::SellPlaced {
                return self.resume_locked().await;
            }
            if position.instrument() == snapshot.instrument
                && should_close(&position, &snapshot, self.settings.close_spread)
            {
                info!(
                    coin = %position.coin,
                    buy_px = ?snapshot.price_on(position.buy_exchange),
                    sell_px = ?snapshot.price_on(position.sell_exchange),
                    "Gap closed, closing position"
                );
                let prices = ClosePrices::from_snapshot(&position, &snapshot);
                return self.close_locked(&mut position, prices).await;
            }
            return Ok(());
        }

        if self.is_halted() {
            return Ok(());
        }

        let Some(opportunity) = check_arbitrage(&snapshot, &self.settings.params)? else {
            return Ok(());
        };
        self.stats.opportunities.fetch_add(1, Ordering::Relaxed);
        self.notifier.notify_all(Event::from(&opportunity));

        match self.open_locked(&opportunity).await {
            Ok(_) => Ok(()),
            Err(OrchestratorError::InsufficientBalance { .. }) => {
                self.set_state(EngineState::Idle);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl SnapshotHandler for Orchestrator {
    async fn on_snapshot(&self, snapshot: PriceSnapshot) {
        let instrument = snapshot.instrument.clone();
        if let Err(e) = self.handle_snapshot(snapshot).await {
            warn!(instrument = %instrument, error = %e, "Snapshot handling failed");
        }
    }
}

fn step_failed(position: &Position, exchange: Exchange, source: ExchangeError) -> OrchestratorError {
    OrchestratorError::StepFailed {
        step: position.step,
        exchange,
        source,
    }
}

fn record_order(exchange: Exchange, ok: bool) {
    if ok {
        metrics::inc_orders_placed(exchange);
    } else {
        metrics::inc_orders_failed(exchange);
    }
}
