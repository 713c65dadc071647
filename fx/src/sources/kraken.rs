//! Kraken public market data.

use async_trait::async_trait;
use chrono::DateTime;
use ratefeed_common::{Currency, HistoricalSeries, Quotes};
use serde_json::Value;
use tracing::debug;

use crate::error::{FxError, FxResult};
use crate::provider::PriceSource;
use crate::sources::http::HttpFetcher;
use crate::sources::parse::{decimal, field, object_at};
use crate::sources::{require_hint, ASSET};

/// Kraken spot tickers and daily OHLC history.
pub struct Kraken {
    http: HttpFetcher,
}

impl Kraken {
    pub const NAME: &'static str = "Kraken";
    const HOST: &'static str = "api.kraken.com";
    const HISTORY: &'static [&'static str] = &["EUR", "USD"];

    pub fn new(http: HttpFetcher) -> Self {
        Self { http }
    }

    /// Pair prefix for the asset against fiat, e.g. `XLBTCZ` in `XLBTCZUSD`.
    fn pair_prefix() -> String {
        format!("X{}Z", ASSET)
    }

    /// Kraken reports failures in an `error` array next to `result`.
    fn result(body: &Value) -> FxResult<&Value> {
        if let Some(errors) = body.get("error").and_then(Value::as_array) {
            if !errors.is_empty() {
                let joined: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
                return Err(FxError::parse(Self::NAME, joined.join(", ")));
            }
        }
        field(Self::NAME, body, &["result"])
    }

    /// Fiat pairs listed in an `AssetPairs` response.
    pub fn parse_pairs(body: &Value) -> FxResult<Vec<String>> {
        let prefix = Self::pair_prefix();
        let result = Self::result(body)?;
        let mut pairs: Vec<String> = object_at(Self::NAME, result, &[])?
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .cloned()
            .collect();
        pairs.sort();
        if pairs.is_empty() {
            return Err(FxError::parse(Self::NAME, "no fiat pairs listed"));
        }
        Ok(pairs)
    }

    /// Last trade price (`c[0]`) of every pair in a `Ticker` response.
    pub fn parse_ticker(body: &Value, pairs: &[String]) -> FxResult<Quotes> {
        let prefix = Self::pair_prefix();
        let result = Self::result(body)?;
        let mut quotes = Quotes::new();
        for pair in pairs {
            let Some(ticker) = result.get(pair) else {
                debug!(source = Self::NAME, pair = %pair, "Pair missing from ticker");
                continue;
            };
            let last = ticker
                .get("c")
                .and_then(|c| c.get(0))
                .ok_or_else(|| FxError::parse(Self::NAME, format!("{} has no last trade", pair)))?;
            let code = pair.trim_start_matches(prefix.as_str());
            quotes.insert(Currency::new(code), decimal(Self::NAME, last)?);
        }
        Ok(quotes)
    }

    /// Daily candles `[time, open, high, low, close, ..]`, keyed by UTC day.
    pub fn parse_ohlc(body: &Value, currency: &Currency) -> FxResult<HistoricalSeries> {
        let key = format!("{}{}", Self::pair_prefix(), currency);
        let candles = field(Self::NAME, Self::result(body)?, &[key.as_str()])?
            .as_array()
            .ok_or_else(|| FxError::parse(Self::NAME, format!("{} is not a list", key)))?;

        let mut series = HistoricalSeries::new();
        for candle in candles {
            let time = candle
                .get(0)
                .and_then(Value::as_i64)
                .and_then(|t| DateTime::from_timestamp(t, 0))
                .ok_or_else(|| FxError::parse(Self::NAME, "candle without time"))?;
            let close = candle
                .get(4)
                .ok_or_else(|| FxError::parse(Self::NAME, "candle without close"))?;
            series.insert(time.date_naive(), decimal(Self::NAME, close)?);
        }
        Ok(series)
    }
}

#[async_trait]
impl PriceSource for Kraken {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn fetch_current(&self, currency_hint: Option<&Currency>) -> FxResult<Quotes> {
        let listing = self
            .http
            .get_json(Self::NAME, Self::HOST, "/0/public/AssetPairs")
            .await?;
        let pairs = Self::parse_pairs(&listing)?;

        let path = format!("/0/public/Ticker?pair={}", pairs.join(","));
        let body = self.http.get_json(Self::NAME, Self::HOST, &path).await?;
        require_hint(Self::parse_ticker(&body, &pairs)?, currency_hint)
    }

    fn history_currencies(&self) -> Vec<Currency> {
        Self::HISTORY.iter().map(|c| Currency::new(*c)).collect()
    }

    async fn fetch_history_series(&self, currency: &Currency) -> FxResult<HistoricalSeries> {
        let path = format!("/0/public/OHLC?pair={}{}&interval=1440", ASSET, currency);
        let body = self.http.get_json(Self::NAME, Self::HOST, &path).await?;
        Self::parse_ohlc(&body, currency)
    }
}
