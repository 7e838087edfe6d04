use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Tradable currency pair. One worker trades exactly one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Instrument {
    #[serde(rename = "USDJPY")]
    UsdJpy,
    #[serde(rename = "EURUSD")]
    EurUsd,
    #[serde(rename = "AUDJPY")]
    AudJpy,
    #[serde(rename = "GBPJPY")]
    GbpJpy,
}

impl Instrument {
    pub const ALL: [Self; 4] = [Self::UsdJpy, Self::EurUsd, Self::AudJpy, Self::GbpJpy];

    /// Flat code used in store keys and config files.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::UsdJpy => "USDJPY",
            Self::EurUsd => "EURUSD",
            Self::AudJpy => "AUDJPY",
            Self::GbpJpy => "GBPJPY",
        }
    }

    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::UsdJpy => "USD/JPY",
            Self::EurUsd => "EUR/USD",
            Self::AudJpy => "AUD/JPY",
            Self::GbpJpy => "GBP/JPY",
        }
    }

    /// Labels the venue renders for this pair, in English and Japanese.
    #[must_use]
    pub const fn text_markers(self) -> &'static [&'static str] {
        match self {
            Self::UsdJpy => &["USD/JPY", "米ドル/円"],
            Self::EurUsd => &["EUR/USD", "ユーロ/ドル"],
            Self::AudJpy => &["AUD/JPY", "豪ドル/円"],
            Self::GbpJpy => &["GBP/JPY", "ポンド/円"],
        }
    }

    /// Multiplier turning the venue's quoted spread into the unit the
    /// configured ceiling is expressed in.
    ///
    /// EUR/USD is quoted in pips while its ceiling is a price difference.
    #[must_use]
    pub fn spread_scale(self) -> Decimal {
        match self {
            Self::EurUsd => dec!(0.0001),
            Self::UsdJpy | Self::AudJpy | Self::GbpJpy => Decimal::ONE,
        }
    }

    /// Converts yen P/L per unit held into pips.
    ///
    /// JPY crosses move 0.01 yen per pip. EUR/USD P/L is still booked in yen,
    /// so its factor assumes roughly 150 yen per dollar.
    #[must_use]
    pub fn pip_factor(self) -> Decimal {
        match self {
            Self::EurUsd => dec!(66.67),
            Self::UsdJpy | Self::AudJpy | Self::GbpJpy => dec!(100),
        }
    }

    /// Scans rendered venue text for a known label.
    ///
    /// Pairs are checked in [`Instrument::ALL`] order, so the first match wins.
    #[must_use]
    pub fn detect_in_text(text: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|i| i.text_markers().iter().any(|m| text.contains(m)))
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Instrument {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(char::is_ascii_alphabetic)
            .collect::<String>()
            .to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|i| i.code() == normalized)
            .ok_or_else(|| anyhow::anyhow!("Unknown instrument: {s}"))
    }
}

/// One leg of a hedged position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// Suffix used in per-side store keys.
    #[must_use]
    pub const fn key_suffix(self) -> &'static str {
        match self {
            Self::Long => "L",
            Self::Short => "S",
        }
    }

    /// Order that opens (or adds to) this leg.
    #[must_use]
    pub const fn opening_order(self) -> OrderSide {
        match self {
            Self::Long => OrderSide::Buy,
            Self::Short => OrderSide::Sell,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => f.write_str("Long"),
            Self::Short => f.write_str("Short"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => f.write_str("Buy"),
            Self::Sell => f.write_str("Sell"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instrument_serializes_as_code() {
        let json = serde_json::to_string(&Instrument::EurUsd).unwrap();
        assert_eq!(json, "\"EURUSD\"");

        let parsed: Instrument = serde_json::from_str("\"GBPJPY\"").unwrap();
        assert_eq!(parsed, Instrument::GbpJpy);
    }

    #[test]
    fn test_instrument_from_str_accepts_slash_and_case() {
        assert_eq!("usd/jpy".parse::<Instrument>().unwrap(), Instrument::UsdJpy);
        assert_eq!("AUDJPY".parse::<Instrument>().unwrap(), Instrument::AudJpy);
        assert!("BTCUSD".parse::<Instrument>().is_err());
    }

    #[test]
    fn test_detect_in_text_finds_japanese_labels() {
        assert_eq!(
            Instrument::detect_in_text("注文画面 ユーロ/ドル 売 買"),
            Some(Instrument::EurUsd)
        );
        assert_eq!(
            Instrument::detect_in_text("streaming GBP/JPY"),
            Some(Instrument::GbpJpy)
        );
        assert_eq!(Instrument::detect_in_text("nothing here"), None);
    }

    #[test]
    fn test_spread_scale_only_rescales_eurusd() {
        assert_eq!(Instrument::EurUsd.spread_scale(), dec!(0.0001));
        assert_eq!(Instrument::UsdJpy.spread_scale(), Decimal::ONE);
    }

    #[test]
    fn test_side_mapping() {
        assert_eq!(Side::Long.opening_order(), OrderSide::Buy);
        assert_eq!(Side::Short.opening_order(), OrderSide::Sell);
        assert_eq!(Side::Short.key_suffix(), "S");
    }
}
