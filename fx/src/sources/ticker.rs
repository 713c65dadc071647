//! Sources that quote a single currency from one ticker endpoint.

use async_trait::async_trait;
use ratefeed_common::{Currency, Quotes};
use serde_json::Value;

use crate::error::FxResult;
use crate::provider::PriceSource;
use crate::sources::http::HttpFetcher;
use crate::sources::parse::decimal_at;

/// Where a single-currency ticker lives and which field holds the price.
#[derive(Debug)]
pub struct TickerSpec {
    pub name: &'static str,
    pub host: &'static str,
    pub path: &'static str,
    pub currency: &'static str,
    pub field: &'static [&'static str],
}

/// Every single-ticker exchange.
pub const TICKERS: &[TickerSpec] = &[
    TickerSpec {
        name: "Bit2C",
        host: "www.bit2c.co.il",
        path: "/Exchanges/LBTCNIS/Ticker.json",
        currency: "NIS",
        field: &["ll"],
    },
    TickerSpec {
        name: "Bitfinex",
        host: "api.bitfinex.com",
        path: "/v1/pubticker/lbtcusd",
        currency: "USD",
        field: &["last_price"],
    },
    TickerSpec {
        name: "BitStamp",
        host: "www.bitstamp.net",
        path: "/api/v2/ticker/lbtcusd/",
        currency: "USD",
        field: &["last"],
    },
    TickerSpec {
        name: "BTCChina",
        host: "data.btcchina.com",
        path: "/data/ticker?market=lbtccny",
        currency: "CNY",
        field: &["ticker", "last"],
    },
    TickerSpec {
        name: "CaVirtEx",
        host: "www.cavirtex.com",
        path: "/api2/ticker.json?currencypair=LBTCCAD",
        currency: "CAD",
        field: &["ticker", "LBTCCAD", "last"],
    },
    TickerSpec {
        name: "CoinSpot",
        host: "www.coinspot.com.au",
        path: "/pubapi/latest",
        currency: "AUD",
        field: &["prices", "lbtc", "last"],
    },
    TickerSpec {
        name: "OKCoin",
        host: "www.okcoin.cn",
        path: "/api/ticker.do?symbol=lbtc_cny",
        currency: "CNY",
        field: &["ticker", "last"],
    },
    TickerSpec {
        name: "MercadoBitcoin",
        host: "mercadobitcoin.net",
        path: "/api/v2/ticker_litebitcoin",
        currency: "BRL",
        field: &["ticker", "last"],
    },
    TickerSpec {
        name: "Bitcointoyou",
        host: "bitcointoyou.com",
        path: "/API/ticker_litebitcoin.aspx",
        currency: "BRL",
        field: &["ticker", "last"],
    },
];

/// Adapter for one [`TickerSpec`].
pub struct TickerSource {
    spec: &'static TickerSpec,
    http: HttpFetcher,
}

impl TickerSource {
    pub fn new(spec: &'static TickerSpec, http: HttpFetcher) -> Self {
        Self { spec, http }
    }

    /// Extract the quote from a ticker payload.
    pub fn parse(spec: &TickerSpec, body: &Value) -> FxResult<Quotes> {
        let price = decimal_at(spec.name, body, spec.field)?;
        Ok(Quotes::from([(Currency::new(spec.currency), price)]))
    }
}

#[async_trait]
impl PriceSource for TickerSource {
    fn name(&self) -> &str {
        self.spec.name
    }

    async fn fetch_current(&self, _currency_hint: Option<&Currency>) -> FxResult<Quotes> {
        let body = self
            .http
            .get_json(self.spec.name, self.spec.host, self.spec.path)
            .await?;
        Self::parse(self.spec, &body)
    }
}
