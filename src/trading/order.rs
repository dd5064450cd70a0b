//! Order types.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::exchange::{Exchange, Instrument};

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Buy order.
    #[strum(to_string = "BUY", serialize = "buy")]
    Buy,
    /// Sell order.
    #[strum(to_string = "SELL", serialize = "sell")]
    Sell,
}

impl Side {
    /// The side that reverses this one.
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Account an order is placed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    /// Spot account.
    #[strum(serialize = "spot")]
    Spot,
    /// Cross margin account, borrowing automatically when short.
    #[strum(serialize = "margin")]
    Margin,
}

/// Market order request.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    /// Spot or margin.
    pub account: AccountType,
    /// Order side.
    pub side: Side,
    /// Instrument to trade.
    pub instrument: Instrument,
    /// Base-asset quantity.
    pub quantity: Decimal,
    /// Price the decision was made at (used for logging and paper fills).
    pub reference_price: Decimal,
    /// Client order id, unique per request.
    pub client_oid: String,
}

impl OrderRequest {
    /// Create a market order with a fresh client order id.
    pub fn market(
        account: AccountType,
        side: Side,
        instrument: Instrument,
        quantity: Decimal,
        reference_price: Decimal,
    ) -> Self {
        Self {
            account,
            side,
            instrument,
            quantity,
            reference_price,
            client_oid: uuid::Uuid::new_v4().simple().to_string(),
        }
    }

    /// Spot market buy.
    pub fn spot_buy(instrument: Instrument, quantity: Decimal, reference_price: Decimal) -> Self {
        Self::market(AccountType::Spot, Side::Buy, instrument, quantity, reference_price)
    }

    /// Spot market sell.
    pub fn spot_sell(instrument: Instrument, quantity: Decimal, reference_price: Decimal) -> Self {
        Self::market(AccountType::Spot, Side::Sell, instrument, quantity, reference_price)
    }

    /// Margin market sell with auto-borrow (opens a short).
    pub fn margin_sell(instrument: Instrument, quantity: Decimal, reference_price: Decimal) -> Self {
        Self::market(AccountType::Margin, Side::Sell, instrument, quantity, reference_price)
    }

    /// Notional at the reference price.
    pub fn notional(&self) -> Decimal {
        self.quantity * self.reference_price
    }

    /// Validate order parameters.
    pub fn validate(&self) -> Result<(), String> {
        if self.quantity <= Decimal::ZERO {
            return Err("quantity must be positive".to_string());
        }
        if self.reference_price <= Decimal::ZERO {
            return Err("reference price must be positive".to_string());
        }
        if self.client_oid.is_empty() {
            return Err("client_oid is required".to_string());
        }
        Ok(())
    }
}

/// Exchange acknowledgement of a placed order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderAck {
    /// Exchange that accepted the order.
    pub exchange: Exchange,
    /// Exchange order id.
    pub order_id: String,
    /// Client order id echoed back.
    pub client_oid: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::str::FromStr;

    #[test]
    fn order_request_constructors() {
        let inst = Instrument::new("SOL", "USDT");
        let buy = OrderRequest::spot_buy(inst.clone(), dec!(10), dec!(100));
        assert_eq!(buy.side, Side::Buy);
        assert_eq!(buy.account, AccountType::Spot);
        assert_eq!(buy.notional(), dec!(1000));

        let short = OrderRequest::margin_sell(inst, dec!(10), dec!(102));
        assert_eq!(short.side, Side::Sell);
        assert_eq!(short.account, AccountType::Margin);
        assert_ne!(buy.client_oid, short.client_oid);
    }

    #[test]
    fn order_request_validation() {
        let inst = Instrument::new("SOL", "USDT");
        assert!(OrderRequest::spot_buy(inst.clone(), dec!(1), dec!(100)).validate().is_ok());
        assert!(OrderRequest::spot_buy(inst.clone(), dec!(0), dec!(100)).validate().is_err());
        assert!(OrderRequest::spot_buy(inst, dec!(1), dec!(-1)).validate().is_err());
    }

    #[test]
    fn side_parsing_and_opposite() {
        assert_eq!(Side::from_str("buy").unwrap(), Side::Buy);
        assert_eq!(Side::from_str("SELL").unwrap(), Side::Sell);
        assert_eq!(Side::Buy.opposite(), Side::Sell);
    }
}
