//! Sources that return every currency they price in one payload.

use async_trait::async_trait;
use ratefeed_common::{parse_day, Currency, HistoricalSeries, Quotes};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{FxError, FxResult};
use crate::provider::PriceSource;
use crate::sources::http::HttpFetcher;
use crate::sources::parse::{decimal, decimal_at, object_at, text_decimal};
use crate::sources::ASSET;

fn currencies(codes: &[&str]) -> Vec<Currency> {
    codes.iter().map(|c| Currency::new(*c)).collect()
}

/// BitcoinAverage global index.
pub struct BitcoinAverage {
    http: HttpFetcher,
}

impl BitcoinAverage {
    pub const NAME: &'static str = "BitcoinAverage";
    const HOST: &'static str = "apiv2.bitcoinaverage.com";
    const HISTORY: &'static [&'static str] = &[
        "AUD", "BRL", "CAD", "CHF", "CNY", "EUR", "GBP", "IDR", "ILS", "MXN", "NOK", "NZD", "PLN",
        "RON", "RUB", "SEK", "SGD", "USD", "ZAR",
    ];

    pub fn new(http: HttpFetcher) -> Self {
        Self { http }
    }

    /// `{"LBTCUSD": {"last": ..}, .., "timestamp": ..}`
    pub fn parse_ticker(body: &Value) -> FxResult<Quotes> {
        let entries = object_at(Self::NAME, body, &[])?;
        entries
            .iter()
            .filter(|(key, _)| key.as_str() != "timestamp")
            .map(|(key, entry)| {
                let code = Currency::new(key.replace(ASSET, ""));
                Ok((code, decimal_at(Self::NAME, entry, &["last"])?))
            })
            .collect()
    }

    /// CSV with `DateTime` and `Average` columns, one row per day.
    pub fn parse_history(body: &str) -> FxResult<HistoricalSeries> {
        #[derive(Deserialize)]
        struct Row {
            #[serde(rename = "DateTime")]
            date_time: String,
            #[serde(rename = "Average")]
            average: String,
        }

        let mut reader = csv::Reader::from_reader(body.as_bytes());
        let mut series = HistoricalSeries::new();
        for row in reader.deserialize::<Row>() {
            let row = row.map_err(|e| FxError::parse(Self::NAME, e))?;
            let Some(day) = parse_day(&row.date_time) else {
                debug!(source = Self::NAME, value = %row.date_time, "Skipping undated history row");
                continue;
            };
            series.insert(day, text_decimal(Self::NAME, &row.average)?);
        }
        Ok(series)
    }
}

#[async_trait]
impl PriceSource for BitcoinAverage {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn fetch_current(&self, _currency_hint: Option<&Currency>) -> FxResult<Quotes> {
        let body = self
            .http
            .get_json(Self::NAME, Self::HOST, "/indices/global/ticker/short")
            .await?;
        Self::parse_ticker(&body)
    }

    fn history_currencies(&self) -> Vec<Currency> {
        currencies(Self::HISTORY)
    }

    async fn fetch_history_series(&self, currency: &Currency) -> FxResult<HistoricalSeries> {
        let path = format!(
            "/indices/global/history/{}{}?period=alltime&format=csv",
            ASSET, currency
        );
        let body = self.http.get_text(Self::NAME, Self::HOST, &path).await?;
        Self::parse_history(&body)
    }
}

/// BitcoinVenezuela index.
pub struct BitcoinVenezuela {
    http: HttpFetcher,
}

impl BitcoinVenezuela {
    pub const NAME: &'static str = "BitcoinVenezuela";
    const HOST: &'static str = "api.bitcoinvenezuela.com";
    const HISTORY: &'static [&'static str] = &["ARS", "EUR", "USD", "VEF"];

    pub fn new(http: HttpFetcher) -> Self {
        Self { http }
    }

    /// `{"LBTC": {"USD": 61.2, "VEF": null, ..}}`; nulls are skipped.
    pub fn parse_ticker(body: &Value) -> FxResult<Quotes> {
        object_at(Self::NAME, body, &[ASSET])?
            .iter()
            .filter(|(_, price)| !price.is_null())
            .map(|(code, price)| Ok((Currency::new(code.as_str()), decimal(Self::NAME, price)?)))
            .collect()
    }

    /// `{"USD_LBTC": {"2017-11-03": 61.2, ..}, ..}`
    pub fn parse_history(body: &Value, currency: &Currency) -> FxResult<HistoricalSeries> {
        let key = format!("{}_{}", currency, ASSET);
        let mut series = HistoricalSeries::new();
        for (date, price) in object_at(Self::NAME, body, &[key.as_str()])? {
            let Some(day) = parse_day(date) else {
                continue;
            };
            if !price.is_null() {
                series.insert(day, decimal(Self::NAME, price)?);
            }
        }
        Ok(series)
    }
}

#[async_trait]
impl PriceSource for BitcoinVenezuela {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn fetch_current(&self, _currency_hint: Option<&Currency>) -> FxResult<Quotes> {
        let body = self.http.get_json(Self::NAME, Self::HOST, "/").await?;
        Self::parse_ticker(&body)
    }

    fn history_currencies(&self) -> Vec<Currency> {
        currencies(Self::HISTORY)
    }

    async fn fetch_history_series(&self, currency: &Currency) -> FxResult<HistoricalSeries> {
        let path = format!("/historical/index.php?coin={}", ASSET);
        let body = self.http.get_json(Self::NAME, Self::HOST, &path).await?;
        Self::parse_history(&body, currency)
    }
}

/// GoCoin price list.
pub struct GoCoin {
    http: HttpFetcher,
}

impl GoCoin {
    pub const NAME: &'static str = "GoCoin";

    pub fn new(http: HttpFetcher) -> Self {
        Self { http }
    }

    /// `{"prices": {"LBTC": {"USD": "61.2", ..}}}`
    pub fn parse_ticker(body: &Value) -> FxResult<Quotes> {
        object_at(Self::NAME, body, &["prices", ASSET])?
            .iter()
            .map(|(code, price)| Ok((Currency::new(code.as_str()), decimal(Self::NAME, price)?)))
            .collect()
    }
}

#[async_trait]
impl PriceSource for GoCoin {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn fetch_current(&self, _currency_hint: Option<&Currency>) -> FxResult<Quotes> {
        let body = self.http.get_json(Self::NAME, "x.g0cn.com", "/prices").await?;
        Self::parse_ticker(&body)
    }
}
