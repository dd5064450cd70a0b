//! Position tracking.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use time::OffsetDateTime;

use crate::error::OrchestratorError;
use crate::exchange::{Exchange, Instrument};

/// Progress of an open or closing position. Only ever advances.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
    EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum Step {
    /// Nothing placed yet.
    None,
    /// An opening attempt left a single leg live.
    BuyPlaced,
    /// Both legs confirmed; the position is open.
    SellPlaced,
    /// Every live leg has been reversed.
    BuyReversed,
    /// Bought-back coin moved to the margin wallet.
    #[serde(rename = "TRANSFER_1")]
    #[strum(serialize = "TRANSFER_1")]
    Transfer1,
    /// Margin loan repaid.
    LoanRepaid,
    /// Collateral moved back to spot.
    #[serde(rename = "TRANSFER_2")]
    #[strum(serialize = "TRANSFER_2")]
    Transfer2,
    /// Terminal.
    Closed,
}

/// Progress of one leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LegState {
    /// Order never confirmed.
    NotPlaced,
    /// Order filled and not yet reversed.
    Open,
    /// Reversing order filled.
    Reversed,
}

impl LegState {
    /// Whether this leg still needs reversing.
    pub fn is_open(self) -> bool {
        self == LegState::Open
    }
}

/// The single cross-exchange position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Venue the coin was bought on (spot).
    pub buy_exchange: Exchange,
    /// Venue the coin was sold short on (margin).
    pub sell_exchange: Exchange,
    /// Base asset.
    pub coin: String,
    /// Quote asset.
    pub quote: String,
    /// Coin quantity on each leg.
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
    /// Quote committed per leg.
    #[serde(with = "rust_decimal::serde::str")]
    pub capital: Decimal,
    /// Reference price on the buy venue.
    #[serde(with = "rust_decimal::serde::str")]
    pub buy_price: Decimal,
    /// Reference price on the sell venue.
    #[serde(with = "rust_decimal::serde::str")]
    pub sell_price: Decimal,
    /// Last completed step.
    pub step: Step,
    /// Spot buy leg.
    pub buy_leg: LegState,
    /// Margin sell leg.
    pub sell_leg: LegState,
    /// Whether collateral was moved into the sell venue's margin wallet.
    pub collateral_posted: bool,
    /// When the position was opened.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Last persisted change.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Position {
    /// Fully opened position.
    pub fn opened(
        buy_exchange: Exchange,
        sell_exchange: Exchange,
        instrument: &Instrument,
        amount: Decimal,
        capital: Decimal,
        buy_price: Decimal,
        sell_price: Decimal,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            buy_exchange,
            sell_exchange,
            coin: instrument.base().to_string(),
            quote: instrument.quote().to_string(),
            amount,
            capital,
            buy_price,
            sell_price,
            step: Step::SellPlaced,
            buy_leg: LegState::Open,
            sell_leg: LegState::Open,
            collateral_posted: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Instrument traded.
    pub fn instrument(&self) -> Instrument {
        Instrument::new(&self.coin, &self.quote)
    }

    /// Whether the margin short was ever filled, so a loan exists to repay.
    pub fn short_opened(&self) -> bool {
        self.sell_leg != LegState::NotPlaced
    }

    /// Whether any leg is still live.
    pub fn has_open_leg(&self) -> bool {
        self.buy_leg.is_open() || self.sell_leg.is_open()
    }

    /// Move to `step`. Rewinds are rejected.
    pub fn advance_to(&mut self, step: Step) -> Result<(), OrchestratorError> {
        if step < self.step {
            return Err(OrchestratorError::InvalidTransition {
                from: self.step,
                to: step,
            });
        }
        self.step = step;
        self.touch();
        Ok(())
    }

    /// Operator override that may move backwards.
    pub fn force_step(&mut self, step: Step) {
        self.step = step;
        self.touch();
    }

    /// Bump `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = OffsetDateTime::now_utc();
    }
}
