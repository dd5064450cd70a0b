//! Venue-neutral exchange types.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Supported exchanges.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
    EnumString, EnumIter,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Exchange {
    /// Binance spot/cross margin.
    #[strum(to_string = "BINANCE", serialize = "binance")]
    Binance,
    /// KuCoin spot/cross margin.
    #[strum(to_string = "KUCOIN", serialize = "kucoin")]
    Kucoin,
}

/// Wallet (sub-account) on an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
pub enum Wallet {
    /// Spot trading wallet.
    #[strum(serialize = "spot")]
    Spot,
    /// Cross margin wallet holding collateral and loans.
    #[strum(serialize = "margin")]
    Margin,
    /// Funding/main wallet used for deposits and withdrawals.
    #[strum(serialize = "funding")]
    Funding,
}

/// Canonical `BASE-QUOTE` instrument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Instrument {
    base: String,
    quote: String,
}

impl Instrument {
    /// Build from base and quote assets (upper-cased).
    pub fn new(base: impl AsRef<str>, quote: impl AsRef<str>) -> Self {
        Self {
            base: base.as_ref().to_ascii_uppercase(),
            quote: quote.as_ref().to_ascii_uppercase(),
        }
    }

    /// Base asset (the coin traded).
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Quote asset (the capital currency).
    pub fn quote(&self) -> &str {
        &self.quote
    }

    /// Concatenated form without separator, e.g. `SOLUSDT`.
    pub fn concat(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.base, self.quote)
    }
}

impl FromStr for Instrument {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, quote) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| "expected BASE-QUOTE".to_string())?;

        let valid = |part: &str| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric());
        if !valid(base) || !valid(quote) {
            return Err("base and quote must be non-empty alphanumerics".to_string());
        }

        Ok(Self::new(base, quote))
    }
}

impl TryFrom<String> for Instrument {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Instrument> for String {
    fn from(value: Instrument) -> Self {
        value.to_string()
    }
}

/// One currency balance in one wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Currency code.
    pub currency: String,
    /// Available amount.
    pub amount: Decimal,
    /// Wallet holding it.
    pub wallet: Wallet,
}

/// Find the available amount of a currency in a wallet.
pub fn available(balances: &[Balance], currency: &str, wallet: Wallet) -> Decimal {
    balances
        .iter()
        .filter(|b| b.wallet == wallet && b.currency.eq_ignore_ascii_case(currency))
        .map(|b| b.amount)
        .sum()
}

/// Deposit address for inter-exchange transfers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositAddress {
    /// Currency the address accepts.
    pub currency: String,
    /// Address.
    pub address: String,
    /// Memo/tag for chains that need one.
    pub memo: Option<String>,
    /// Network/chain identifier.
    pub chain: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn instrument_parses_and_displays() {
        let inst: Instrument = "sol-usdt".parse().unwrap();
        assert_eq!(inst.base(), "SOL");
        assert_eq!(inst.quote(), "USDT");
        assert_eq!(inst.to_string(), "SOL-USDT");
        assert_eq!(inst.concat(), "SOLUSDT");
    }

    #[test]
    fn instrument_rejects_missing_separator() {
        assert!("SOLUSDT".parse::<Instrument>().is_err());
        assert!("-USDT".parse::<Instrument>().is_err());
        assert!("SOL-".parse::<Instrument>().is_err());
    }

    #[test]
    fn instrument_serializes_as_string() {
        let inst = Instrument::new("ETH", "USDT");
        let json = serde_json::to_string(&inst).unwrap();
        assert_eq!(json, "\"ETH-USDT\"");
        let back: Instrument = serde_json::from_str(&json).unwrap();
        assert_eq!(back, inst);
    }

    #[test]
    fn exchange_from_string() {
        assert_eq!(Exchange::from_str("BINANCE").unwrap(), Exchange::Binance);
        assert_eq!(Exchange::from_str("kucoin").unwrap(), Exchange::Kucoin);
        assert_eq!(Exchange::Kucoin.to_string(), "KUCOIN");
    }

    #[test]
    fn available_sums_matching_wallet_only() {
        let balances = vec![
            Balance { currency: "USDT".to_string(), amount: dec!(50), wallet: Wallet::Spot },
            Balance { currency: "usdt".to_string(), amount: dec!(10), wallet: Wallet::Spot },
            Balance { currency: "USDT".to_string(), amount: dec!(99), wallet: Wallet::Margin },
        ];

        assert_eq!(available(&balances, "USDT", Wallet::Spot), dec!(60));
        assert_eq!(available(&balances, "USDT", Wallet::Funding), dec!(0));
    }
}
