//! Supported settlement currencies and USD conversion.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Currencies the wallet ledger can hold balances in.
///
/// The set is closed: the aggregator contract enumerates which currency codes
/// it will ever send, and balances are stored per-variant rather than behind
/// string keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Currency {
    USD,
    EUR,
    GBP,
    BRL,
    INR,
    JPY,
    KRW,
    THB,
    VND,
    IDR,
    MYR,
    PHP,
    TRY,
    MXN,
    CNY,
    RUB,
}

impl Currency {
    pub const ALL: [Currency; 16] = [
        Currency::USD,
        Currency::EUR,
        Currency::GBP,
        Currency::BRL,
        Currency::INR,
        Currency::JPY,
        Currency::KRW,
        Currency::THB,
        Currency::VND,
        Currency::IDR,
        Currency::MYR,
        Currency::PHP,
        Currency::TRY,
        Currency::MXN,
        Currency::CNY,
        Currency::RUB,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::USD => "USD",
            Currency::EUR => "EUR",
            Currency::GBP => "GBP",
            Currency::BRL => "BRL",
            Currency::INR => "INR",
            Currency::JPY => "JPY",
            Currency::KRW => "KRW",
            Currency::THB => "THB",
            Currency::VND => "VND",
            Currency::IDR => "IDR",
            Currency::MYR => "MYR",
            Currency::PHP => "PHP",
            Currency::TRY => "TRY",
            Currency::MXN => "MXN",
            Currency::CNY => "CNY",
            Currency::RUB => "RUB",
        }
    }

    /// USD units per one unit of this currency.
    ///
    /// Exchange-rate sourcing is out of scope; every rate is a 1:1 stub until
    /// a rate feed replaces this.
    pub fn usd_rate(&self) -> Decimal {
        Decimal::ONE
    }

    /// Convert an amount in this currency to its USD equivalent.
    pub fn to_usd(&self, amount: Decimal) -> Decimal {
        amount * self.usd_rate()
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = UnknownCurrency;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Currency::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == upper)
            .ok_or_else(|| UnknownCurrency(s.to_string()))
    }
}

/// Currency code outside the supported set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown currency code: {0}")]
pub struct UnknownCurrency(pub String);

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_round_trips_every_code() {
        for currency in Currency::ALL {
            let parsed: Currency = currency.as_str().parse().unwrap();
            assert_eq!(parsed, currency);
        }
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("usd".parse::<Currency>().unwrap(), Currency::USD);
        assert_eq!(" eur ".parse::<Currency>().unwrap(), Currency::EUR);
    }

    #[test]
    fn test_unknown_code_is_rejected() {
        let err = "DOGE".parse::<Currency>().unwrap_err();
        assert_eq!(err, UnknownCurrency("DOGE".to_string()));
    }

    #[test]
    fn test_usd_conversion_stub_is_identity() {
        assert_eq!(Currency::THB.to_usd(dec!(12.34)), dec!(12.34));
    }

    #[test]
    fn test_serde_uses_bare_code() {
        let json = serde_json::to_string(&Currency::BRL).unwrap();
        assert_eq!(json, "\"BRL\"");
        let back: Currency = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Currency::BRL);
    }
}
