//! Fiat amount formatting.
//!
//! Amounts are rounded half-to-even (banker's rounding) to the currency's
//! fractional digits and always rendered with exactly that many digits.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::monetary::Currency;

/// Fractional digits for currencies that do not use two.
///
/// See ISO 4217.
pub const CURRENCY_PRECISIONS: &[(&str, u32)] = &[
    ("BHD", 3),
    ("BIF", 0),
    ("BYR", 0),
    ("CLF", 4),
    ("CLP", 0),
    ("CVE", 0),
    ("DJF", 0),
    ("GNF", 0),
    ("IQD", 3),
    ("ISK", 0),
    ("JOD", 3),
    ("JPY", 0),
    ("KMF", 0),
    ("KRW", 0),
    ("KWD", 3),
    ("LYD", 3),
    ("MGA", 1),
    ("MRO", 1),
    ("OMR", 3),
    ("PYG", 0),
    ("RWF", 0),
    ("TND", 3),
    ("UGX", 0),
    ("UYI", 0),
    ("VND", 0),
    ("VUV", 0),
    ("XAF", 0),
    ("XAU", 4),
    ("XOF", 0),
    ("XPF", 0),
];

/// Digits used by any currency missing from [`CURRENCY_PRECISIONS`].
pub const DEFAULT_PRECISION: u32 = 2;

/// Fractional digits for a currency code.
pub fn precision(code: &str) -> u32 {
    CURRENCY_PRECISIONS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, p)| *p)
        .unwrap_or(DEFAULT_PRECISION)
}

/// Renders fiat values with per-currency precision.
#[derive(Debug, Clone, Copy, Default)]
pub struct AmountFormatter;

impl AmountFormatter {
    /// Round `value` to the currency's digits and render it.
    pub fn format(value: Decimal, currency: &Currency, thousands_separator: bool) -> String {
        let places = currency.decimal_places();
        let mut rounded = value.round_dp_with_strategy(places, RoundingStrategy::MidpointNearestEven);
        rounded.rescale(places);
        if rounded.is_zero() {
            rounded.set_sign_positive(true);
        }

        let rendered = rounded.to_string();
        if thousands_separator {
            group_thousands(&rendered)
        } else {
            rendered
        }
    }
}

/// Insert `,` between groups of three integer digits.
fn group_thousands(rendered: &str) -> String {
    let (sign, unsigned) = match rendered.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", rendered),
    };
    let (integer, fraction) = match unsigned.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (unsigned, None),
    };

    let mut grouped = String::with_capacity(integer.len() + integer.len() / 3);
    for (i, digit) in integer.chars().enumerate() {
        if i > 0 && (integer.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    match fraction {
        Some(f) => format!("{}{}.{}", sign, grouped, f),
        None => format!("{}{}", sign, grouped),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_precision() {
        assert_eq!(precision("USD"), 2);
        assert_eq!(precision("ZAR"), 2);
        assert_eq!(precision("JPY"), 0);
        assert_eq!(precision("MGA"), 1);
    }

    #[test]
    fn test_zero_digit_currency_has_no_point() {
        let out = AmountFormatter::format(dec!(50.00), &Currency::jpy(), true);
        assert_eq!(out, "50");
    }

    #[test]
    fn test_pads_fraction() {
        assert_eq!(AmountFormatter::format(dec!(61.2), &Currency::usd(), false), "61.20");
        assert_eq!(AmountFormatter::format(dec!(3), &Currency::new("XAU"), false), "3.0000");
        assert_eq!(AmountFormatter::format(dec!(1.5), &Currency::new("KWD"), false), "1.500");
    }

    #[test]
    fn test_half_even_rounding() {
        let usd = Currency::usd();
        assert_eq!(AmountFormatter::format(dec!(0.125), &usd, false), "0.12");
        assert_eq!(AmountFormatter::format(dec!(0.135), &usd, false), "0.14");
        assert_eq!(AmountFormatter::format(dec!(0.1251), &usd, false), "0.13");
        assert_eq!(AmountFormatter::format(dec!(2.5), &Currency::jpy(), false), "2");
        assert_eq!(AmountFormatter::format(dec!(3.5), &Currency::jpy(), false), "4");
    }

    #[test]
    fn test_thousands_separator() {
        let usd = Currency::usd();
        assert_eq!(AmountFormatter::format(dec!(1234567.891), &usd, true), "1,234,567.89");
        assert_eq!(AmountFormatter::format(dec!(1234567.891), &usd, false), "1234567.89");
        assert_eq!(AmountFormatter::format(dec!(999.999), &usd, true), "1,000.00");
        assert_eq!(AmountFormatter::format(dec!(100), &Currency::jpy(), true), "100");
        assert_eq!(AmountFormatter::format(dec!(-12345.6), &usd, true), "-12,345.60");
    }

    #[test]
    fn test_negative_zero_renders_unsigned() {
        assert_eq!(AmountFormatter::format(dec!(-0.001), &Currency::usd(), true), "0.00");
    }

    proptest! {
        #[test]
        fn prop_fraction_width_matches_precision(
            mantissa in -1_000_000_000_000i64..1_000_000_000_000i64,
            scale in 0u32..10,
            code in prop::sample::select(vec!["USD", "JPY", "KWD", "XAU", "MGA"]),
        ) {
            let currency = Currency::new(code);
            let out = AmountFormatter::format(Decimal::new(mantissa, scale), &currency, false);
            let digits = out.split_once('.').map(|(_, f)| f.len() as u32).unwrap_or(0);
            prop_assert_eq!(digits, currency.decimal_places());
        }

        #[test]
        fn prop_grouping_only_adds_commas(
            mantissa in -1_000_000_000_000i64..1_000_000_000_000i64,
            scale in 0u32..6,
        ) {
            let value = Decimal::new(mantissa, scale);
            let usd = Currency::usd();
            let plain = AmountFormatter::format(value, &usd, false);
            let grouped = AmountFormatter::format(value, &usd, true);
            prop_assert_eq!(grouped.replace(',', ""), plain);
        }
    }
}
