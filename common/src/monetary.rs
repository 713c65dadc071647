//! Monetary types for the rate feed.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use crate::format::precision;

/// Number of base units in one whole coin.
pub const COIN: i64 = 100_000_000;

/// Decimal places of the base asset.
pub const BASE_DECIMALS: u32 = 8;

/// Currency code (ISO 4217 plus a few crypto-asset extensions).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Currency(String);

impl Currency {
    /// Create a new currency from code.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().trim().to_uppercase())
    }

    /// Get the currency code.
    pub fn code(&self) -> &str {
        &self.0
    }

    /// Whether the code has the three-letter shape offered in currency lists.
    pub fn is_listable(&self) -> bool {
        self.0.len() == 3 && self.0.chars().all(|c| c.is_ascii_alphabetic())
    }

    /// Get the fractional digits used when displaying this currency.
    pub fn decimal_places(&self) -> u32 {
        precision(&self.0)
    }

    /// Common currencies
    pub fn usd() -> Self {
        Self::new("USD")
    }

    pub fn eur() -> Self {
        Self::new("EUR")
    }

    pub fn jpy() -> Self {
        Self::new("JPY")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Currency {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl FromStr for Currency {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

/// Current-price snapshot from one source: currency to price of one coin.
pub type Quotes = HashMap<Currency, Decimal>;

/// Daily closing prices for one currency.
pub type HistoricalSeries = BTreeMap<NaiveDate, Decimal>;

/// Date format used by upstream history feeds and the series keys.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse a `YYYY-MM-DD` prefix of a date or date-time string.
pub fn parse_day(raw: &str) -> Option<NaiveDate> {
    let day = raw.get(..10)?;
    NaiveDate::parse_from_str(day, DATE_FORMAT).ok()
}

/// Convert an amount of base units to fiat at the given per-coin rate.
pub fn to_fiat(base_units: i64, rate: Decimal) -> Decimal {
    Decimal::new(base_units, BASE_DECIMALS) * rate
}

/// Base units in one display unit of the wallet.
///
/// `decimal_point` is the number of decimals the wallet shows for its unit:
/// 8 for whole coins, 5 for milli-coins, 2 for micro-coins.
pub fn display_unit_size(decimal_point: u32) -> i64 {
    let shift = BASE_DECIMALS.saturating_sub(decimal_point);
    COIN / 10i64.pow(shift)
}
