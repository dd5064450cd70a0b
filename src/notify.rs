//! Operator notifications.
//!
//! Notifiers are fire-and-forget: `notify` must return quickly, so anything
//! that does I/O spawns its own task.

use std::sync::{Arc, Mutex};

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::arbitrage::Opportunity;
use crate::exchange::Exchange;
use crate::trading::Step;

/// Events worth telling an operator about.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// A profitable gap was found.
    OpportunityDetected {
        /// Instrument.
        instrument: String,
        /// Cheap venue.
        buy: Exchange,
        /// Rich venue.
        sell: Exchange,
        /// Expected profit in quote.
        expected_profit: Decimal,
    },
    /// Both legs are live.
    PositionOpened {
        /// Coin.
        coin: String,
        /// Coin amount per leg.
        amount: Decimal,
    },
    /// A position finished closing.
    PositionClosed {
        /// Coin.
        coin: String,
    },
    /// Only one leg filled on open; it was unwound.
    PartialOpenUnwound {
        /// Coin.
        coin: String,
        /// Failure that caused the unwind.
        reason: String,
    },
    /// A close or unwind step failed and the engine halted.
    PositionStuck {
        /// Coin.
        coin: String,
        /// Last completed step.
        step: Step,
        /// Failure.
        reason: String,
    },
    /// A stuck position resumed and closed.
    HaltCleared,
    /// Post-close rebalance failed.
    RebalanceFailed {
        /// Failure.
        reason: String,
    },
}

impl From<&Opportunity> for Event {
    fn from(opp: &Opportunity) -> Self {
        Event::OpportunityDetected {
            instrument: opp.instrument.to_string(),
            buy: opp.buy_exchange,
            sell: opp.sell_exchange,
            expected_profit: opp.expected_profit,
        }
    }
}

impl Event {
    /// Whether the event needs human attention.
    pub fn is_alert(&self) -> bool {
        matches!(self, Event::PositionStuck { .. } | Event::RebalanceFailed { .. })
    }
}

/// Receiver of engine events.
pub trait Notifier: Send + Sync {
    /// Handle an event without blocking.
    fn notify(&self, event: Event);
}

/// Broadcasts events to every registered notifier.
#[derive(Default)]
pub struct NotifierRegistry {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl NotifierRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a notifier.
    pub fn register(&mut self, notifier: Box<dyn Notifier>) {
        self.notifiers.push(notifier);
    }

    /// Send an event to every notifier.
    pub fn notify_all(&self, event: Event) {
        for notifier in &self.notifiers {
            notifier.notify(event.clone());
        }
    }

    /// Number of registered notifiers.
    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

/// Writes events to the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: Event) {
        match &event {
            Event::PositionStuck { coin, step, reason } => {
                error!(coin = %coin, step = %step, reason = %reason, "ALERT: position stuck, trading halted");
            }
            Event::RebalanceFailed { reason } => {
                warn!(reason = %reason, "ALERT: rebalance failed");
            }
            other => info!(event = ?other, "Event"),
        }
    }
}

/// Posts alert events as JSON to a webhook.
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    /// Notifier posting to `url`.
    pub fn new(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, event: Event) {
        if !event.is_alert() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime available for webhook alert");
            return;
        };

        let http = self.http.clone();
        let url = self.url.clone();
        handle.spawn(async move {
            match http.post(&url).json(&event).send().await {
                Ok(resp) if resp.status().is_success() => {}
                Ok(resp) => warn!(status = resp.status().as_u16(), "Webhook alert rejected"),
                Err(e) => warn!(error = %e, "Webhook alert failed"),
            }
        });
    }
}

/// Keeps every event in memory.
#[derive(Default, Clone)]
pub struct RecordingNotifier {
    events: Arc<Mutex<Vec<Event>>>,
}

impl RecordingNotifier {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events seen so far.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: Event) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).push(event);
    }
}
