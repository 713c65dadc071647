//! Sources that need one request per quoted currency.

use std::future::Future;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use ratefeed_common::{Currency, Quotes};
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::warn;

use crate::error::{FxError, FxResult};
use crate::provider::PriceSource;
use crate::sources::http::HttpFetcher;
use crate::sources::parse::decimal_at;
use crate::sources::{require_hint, ASSET};

/// Run one request per currency with bounded concurrency and merge.
///
/// Failed currencies are left out. The fetch fails when none succeeded, or
/// when the request for `required` failed or was never made.
pub async fn fan_out<F, Fut>(
    source: &str,
    currencies: Vec<Currency>,
    required: Option<&Currency>,
    concurrency: usize,
    fetch: F,
) -> FxResult<Quotes>
where
    F: Fn(Currency) -> Fut,
    Fut: Future<Output = FxResult<Decimal>>,
{
    let outcomes: Vec<(Currency, FxResult<Decimal>)> = stream::iter(currencies)
        .map(|currency| {
            let request = fetch(currency.clone());
            async move { (currency, request.await) }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut quotes = Quotes::new();
    let mut first_error = None;
    for (currency, outcome) in outcomes {
        match outcome {
            Ok(price) => {
                quotes.insert(currency, price);
            }
            Err(e) => {
                warn!(source, currency = %currency, error = %e, "Currency request failed");
                if required == Some(&currency) {
                    return Err(e);
                }
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) if quotes.is_empty() => Err(e),
        _ => require_hint(quotes, required),
    }
}

/// BTC-e pairs: quoted currency and the pair suffix the API uses for it.
const BTCE_PAIRS: &[(&str, &str)] = &[("EUR", "eur"), ("RUB", "rur"), ("USD", "usd")];

/// BTC-e tickers, one per pair.
pub struct BTCe {
    http: HttpFetcher,
    concurrency: usize,
}

impl BTCe {
    pub const NAME: &'static str = "BTCe";

    pub fn new(http: HttpFetcher, concurrency: usize) -> Self {
        Self { http, concurrency }
    }

    /// `{"lbtc_usd": {"last": ..}}`
    pub fn parse_pair(body: &Value, suffix: &str) -> FxResult<Decimal> {
        let pair = format!("{}_{}", ASSET.to_lowercase(), suffix);
        decimal_at(Self::NAME, body, &[pair.as_str(), "last"])
    }

    fn suffix(currency: &Currency) -> Option<&'static str> {
        BTCE_PAIRS
            .iter()
            .find(|(code, _)| *code == currency.code())
            .map(|(_, suffix)| *suffix)
    }
}

#[async_trait]
impl PriceSource for BTCe {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn fetch_current(&self, currency_hint: Option<&Currency>) -> FxResult<Quotes> {
        let currencies = BTCE_PAIRS.iter().map(|(code, _)| Currency::new(*code)).collect();
        fan_out(Self::NAME, currencies, currency_hint, self.concurrency, |currency| async move {
            let suffix = Self::suffix(&currency)
                .ok_or_else(|| FxError::parse(Self::NAME, format!("no pair for {}", currency)))?;
            let path = format!("/api/3/ticker/{}_{}", ASSET.to_lowercase(), suffix);
            let body = self.http.get_json(Self::NAME, "btc-e.nz", &path).await?;
            Self::parse_pair(&body, suffix)
        })
        .await
    }
}

/// Every currency CoinMarketCap converts to.
pub const COINMARKETCAP_CURRENCIES: &[&str] = &[
    "AUD", "AED", "AFN", "ALL", "AMD", "ANG", "AOA", "ARS", "AWG", "AZN", "BAM", "BBD", "BDT",
    "BGN", "BHD", "BIF", "BMD", "BND", "BOB", "BRL", "BSD", "BTC", "BTN", "BWP", "BYN", "BZD",
    "CAD", "CDF", "CHF", "CLF", "CLP", "CNH", "CNY", "COP", "CRC", "CUC", "CUP", "CVE", "CZK",
    "DJF", "DKK", "DOP", "DZD", "EGP", "ERN", "ETB", "ETH", "EUR", "FJD", "FKP", "GBP", "GEL",
    "GGP", "GHS", "GIP", "GMD", "GNF", "GTQ", "GYD", "HKD", "HNL", "HRK", "HTG", "HUF", "IDR",
    "ILS", "IMP", "INR", "IQD", "IRR", "ISK", "JEP", "JMD", "JOD", "JPY", "KES", "KGS", "KHR",
    "KMF", "KPW", "KRW", "KWD", "KYD", "KZT", "LAK", "LBP", "LKR", "LRD", "LSL", "LYD", "MAD",
    "MDL", "MGA", "MKD", "MMK", "MNT", "MOP", "MRO", "MUR", "MVR", "MWK", "MXN", "MYR", "MZN",
    "NAD", "NGN", "NIO", "NOK", "NPR", "NZD", "OMR", "PAB", "PEN", "PGK", "PHP", "PKR", "PLN",
    "PYG", "QAR", "RON", "RSD", "RUB", "RWF", "SAR", "SBD", "SCR", "SDG", "SEK", "SGD", "SHP",
    "SLL", "SOS", "SRD", "SSP", "STD", "SVC", "SYP", "SZL", "THB", "TJS", "TMT", "TND", "TOP",
    "TRY", "TTD", "TWD", "TZS", "UAH", "UGX", "USD", "UYU", "UZS", "VEF", "VND", "VUV", "WST",
    "XAF", "XAG", "XAU", "XCD", "XDR", "XOF", "XPD", "XPF", "XPT", "XRP", "YER", "ZAR", "ZEC",
    "ZMW", "ZWL",
];

/// CoinMarketCap ticker, converted into each currency separately.
pub struct CoinMarketCap {
    http: HttpFetcher,
    concurrency: usize,
}

impl CoinMarketCap {
    pub const NAME: &'static str = "coinmarketcap";

    pub fn new(http: HttpFetcher, concurrency: usize) -> Self {
        Self { http, concurrency }
    }

    /// `[{"price_usd": "61.2", "price_eur": "52.1", ..}]`
    pub fn parse_conversion(body: &Value, currency: &Currency) -> FxResult<Decimal> {
        let entry = match body {
            Value::Array(items) => items
                .first()
                .ok_or_else(|| FxError::parse(Self::NAME, "empty ticker list"))?,
            other => other,
        };
        let key = format!("price_{}", currency.code().to_lowercase());
        decimal_at(Self::NAME, entry, &[key.as_str()])
    }
}

#[async_trait]
impl PriceSource for CoinMarketCap {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn fetch_current(&self, currency_hint: Option<&Currency>) -> FxResult<Quotes> {
        let currencies = COINMARKETCAP_CURRENCIES
            .iter()
            .map(|code| Currency::new(*code))
            .collect();
        fan_out(Self::NAME, currencies, currency_hint, self.concurrency, |currency| async move {
            let path = format!("/v1/ticker/litebitcoin/?convert={}", currency);
            let body = self
                .http
                .get_json(Self::NAME, "api.coinmarketcap.com", &path)
                .await?;
            Self::parse_conversion(&body, &currency)
        })
        .await
    }
}

/// HitBTC symbol tickers.
pub struct HitBTC {
    http: HttpFetcher,
    concurrency: usize,
}

impl HitBTC {
    pub const NAME: &'static str = "HitBTC";
    const CURRENCIES: &'static [&'static str] = &["EUR", "USD"];

    pub fn new(http: HttpFetcher, concurrency: usize) -> Self {
        Self { http, concurrency }
    }

    /// Currencies to request for a hint: just the hint when quoted, nothing
    /// for an unquoted hint, all of them without a hint.
    pub fn targets(hint: Option<&Currency>) -> Vec<Currency> {
        let all = Self::CURRENCIES.iter().map(|c| Currency::new(*c));
        match hint {
            Some(hint) => all.filter(|c| c == hint).collect(),
            None => all.collect(),
        }
    }
}

#[async_trait]
impl PriceSource for HitBTC {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn fetch_current(&self, currency_hint: Option<&Currency>) -> FxResult<Quotes> {
        let targets = Self::targets(currency_hint);
        fan_out(Self::NAME, targets, currency_hint, self.concurrency, |currency| async move {
            let path = format!("/api/1/public/{}{}/ticker", ASSET, currency);
            let body = self.http.get_json(Self::NAME, "api.hitbtc.com", &path).await?;
            decimal_at(Self::NAME, &body, &["last"])
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[tokio::test]
    async fn test_fan_out_merges_successes() {
        let currencies = vec![Currency::usd(), Currency::eur(), Currency::jpy()];

        let quotes = fan_out("test", currencies, None, 2, |currency| async move {
            match currency.code() {
                "USD" => Ok(dec!(61.23)),
                "EUR" => Ok(dec!(52.10)),
                _ => Err(FxError::network("test", "timeout")),
            }
        })
        .await
        .unwrap();

        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes[&Currency::usd()], dec!(61.23));
        assert!(!quotes.contains_key(&Currency::jpy()));
    }

    #[tokio::test]
    async fn test_fan_out_fails_when_all_fail() {
        let result = fan_out("test", vec![Currency::usd()], None, 4, |_| async {
            Err::<Decimal, _>(FxError::network("test", "timeout"))
        })
        .await;

        assert!(matches!(result, Err(FxError::Network { .. })));
    }

    #[tokio::test]
    async fn test_fan_out_fails_when_hinted_currency_fails() {
        let currencies = vec![Currency::usd(), Currency::eur()];

        let result = fan_out("test", currencies, Some(&Currency::usd()), 2, |currency| async move {
            match currency.code() {
                "EUR" => Ok(dec!(52.10)),
                _ => Err(FxError::network("test", "timeout")),
            }
        })
        .await;

        assert!(matches!(result, Err(FxError::Network { .. })));
    }

    #[tokio::test]
    async fn test_fan_out_hint_not_requested() {
        let result = fan_out("test", Vec::new(), Some(&Currency::jpy()), 4, |_| async {
            Ok(dec!(1))
        })
        .await;

        assert!(matches!(result, Err(FxError::NoData(c)) if c == Currency::jpy()));
    }

    #[tokio::test]
    async fn test_fan_out_empty_list() {
        let quotes = fan_out("test", Vec::new(), None, 4, |_| async { Ok(dec!(1)) })
            .await
            .unwrap();
        assert!(quotes.is_empty());
    }

    #[test]
    fn test_btce_pair_field() {
        let body = json!({"lbtc_rur": {"last": 3500.5, "buy": 3490}});
        assert_eq!(BTCe::parse_pair(&body, "rur").unwrap(), dec!(3500.5));
        assert_eq!(BTCe::suffix(&Currency::new("RUB")), Some("rur"));
        assert_eq!(BTCe::suffix(&Currency::jpy()), None);
    }

    #[test]
    fn test_coinmarketcap_list_and_object() {
        let listed = json!([{"id": "litebitcoin", "price_usd": "61.2", "price_jpy": "6900"}]);
        assert_eq!(
            CoinMarketCap::parse_conversion(&listed, &Currency::jpy()).unwrap(),
            dec!(6900)
        );

        let bare = json!({"price_eur": 52.1});
        assert_eq!(
            CoinMarketCap::parse_conversion(&bare, &Currency::eur()).unwrap(),
            dec!(52.1)
        );

        assert!(CoinMarketCap::parse_conversion(&json!([]), &Currency::eur()).is_err());
    }

    #[test]
    fn test_coinmarketcap_list_is_unique() {
        let mut codes = COINMARKETCAP_CURRENCIES.to_vec();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), COINMARKETCAP_CURRENCIES.len());
    }

    #[test]
    fn test_hitbtc_targets() {
        assert_eq!(HitBTC::targets(Some(&Currency::usd())), vec![Currency::usd()]);
        assert!(HitBTC::targets(Some(&Currency::jpy())).is_empty());
        assert_eq!(HitBTC::targets(None).len(), 2);
    }
}
