//! Exchange-native symbol <-> canonical `BASE-QUOTE` mapping.
//!
//! Binance concatenates base and quote (`SOLUSDT`), KuCoin already uses the
//! dashed form (`SOL-USDT`). Concatenated symbols are split by matching a known
//! quote suffix and then checking the remaining prefix against the configured
//! base assets, so `ARBUSDT` never resolves to `AR`.

use std::collections::HashSet;

use once_cell::sync::Lazy;

use super::types::{Exchange, Instrument};

/// Quote currencies recognised when splitting concatenated symbols.
/// Longer codes first so `USDT` wins over `USD`.
static KNOWN_QUOTES: Lazy<Vec<&'static str>> =
    Lazy::new(|| vec!["FDUSD", "USDT", "USDC", "BTC", "ETH"]);

/// Maps native symbols to canonical instruments for a fixed universe.
#[derive(Debug, Clone)]
pub struct SymbolNormalizer {
    instruments: HashSet<Instrument>,
}

impl SymbolNormalizer {
    /// Build a normalizer for the watched instruments.
    pub fn new(instruments: &[Instrument]) -> Self {
        Self {
            instruments: instruments.iter().cloned().collect(),
        }
    }

    /// Map an exchange-native symbol to a watched instrument.
    ///
    /// Returns `None` for symbols outside the universe.
    pub fn normalize(&self, exchange: Exchange, native: &str) -> Option<Instrument> {
        let native = native.trim().to_ascii_uppercase();
        let candidate = match exchange {
            Exchange::Kucoin => native.parse::<Instrument>().ok()?,
            Exchange::Binance => split_concatenated(&native)?,
        };

        self.instruments.contains(&candidate).then_some(candidate)
    }

    /// Exchange-native symbol for an instrument.
    pub fn native(exchange: Exchange, instrument: &Instrument) -> String {
        match exchange {
            Exchange::Binance => instrument.concat(),
            Exchange::Kucoin => instrument.to_string(),
        }
    }

    /// Watched instruments, sorted for stable subscription payloads.
    pub fn instruments(&self) -> Vec<Instrument> {
        let mut all: Vec<Instrument> = self.instruments.iter().cloned().collect();
        all.sort();
        all
    }
}

fn split_concatenated(native: &str) -> Option<Instrument> {
    KNOWN_QUOTES.iter().find_map(|quote| {
        let base = native.strip_suffix(quote)?;
        (!base.is_empty()).then(|| Instrument::new(base, quote))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> SymbolNormalizer {
        SymbolNormalizer::new(&[
            Instrument::new("SOL", "USDT"),
            Instrument::new("AR", "USDT"),
            Instrument::new("ARB", "USDT"),
        ])
    }

    #[test]
    fn binance_symbols_split_on_quote_suffix() {
        let n = normalizer();
        assert_eq!(n.normalize(Exchange::Binance, "SOLUSDT"), Some(Instrument::new("SOL", "USDT")));
        assert_eq!(n.normalize(Exchange::Binance, "solusdt"), Some(Instrument::new("SOL", "USDT")));
    }

    #[test]
    fn shared_prefixes_resolve_to_full_base() {
        let n = normalizer();
        assert_eq!(n.normalize(Exchange::Binance, "ARBUSDT"), Some(Instrument::new("ARB", "USDT")));
        assert_eq!(n.normalize(Exchange::Binance, "ARUSDT"), Some(Instrument::new("AR", "USDT")));
    }

    #[test]
    fn kucoin_symbols_are_already_canonical() {
        let n = normalizer();
        assert_eq!(n.normalize(Exchange::Kucoin, "SOL-USDT"), Some(Instrument::new("SOL", "USDT")));
    }

    #[test]
    fn unknown_symbols_are_ignored() {
        let n = normalizer();
        assert_eq!(n.normalize(Exchange::Binance, "BTCUSDT"), None);
        assert_eq!(n.normalize(Exchange::Binance, "SOLEUR"), None);
        assert_eq!(n.normalize(Exchange::Kucoin, "SOLUSDT"), None);
    }

    #[test]
    fn native_round_trips() {
        let inst = Instrument::new("SOL", "USDT");
        assert_eq!(SymbolNormalizer::native(Exchange::Binance, &inst), "SOLUSDT");
        assert_eq!(SymbolNormalizer::native(Exchange::Kucoin, &inst), "SOL-USDT");
    }
}
