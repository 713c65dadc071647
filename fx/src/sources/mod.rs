//! Built-in price sources.
//!
//! Every adapter prices the wallet's base asset. Single-ticker exchanges are
//! table driven ([`ticker::TICKERS`]); the rest have their own adapter type.

pub mod basket;
pub mod fanout;
pub mod http;
pub mod kraken;
pub mod parse;
pub mod ticker;

use std::sync::Arc;

use ratefeed_common::{Currency, Quotes};

pub use basket::{BitcoinAverage, BitcoinVenezuela, GoCoin};
pub use fanout::{BTCe, CoinMarketCap, HitBTC};
pub use http::HttpFetcher;
pub use kraken::Kraken;
pub use ticker::{TickerSource, TICKERS};

use crate::error::{FxError, FxResult};
use crate::registry::SourceCatalog;

/// Ticker symbol of the priced asset.
pub const ASSET: &str = "LBTC";

/// Reject a fetch that did not price the hinted currency.
pub fn require_hint(quotes: Quotes, hint: Option<&Currency>) -> FxResult<Quotes> {
    match hint {
        Some(currency) if !quotes.contains_key(currency) => Err(FxError::NoData(currency.clone())),
        _ => Ok(quotes),
    }
}

/// Register every built-in adapter under its name.
pub fn register_builtin(catalog: &mut SourceCatalog, http: HttpFetcher, concurrency: usize) {
    for spec in TICKERS {
        let http = http.clone();
        catalog.register(spec.name, move || Arc::new(TickerSource::new(spec, http.clone())));
    }

    let h = http.clone();
    catalog.register(BitcoinAverage::NAME, move || Arc::new(BitcoinAverage::new(h.clone())));
    let h = http.clone();
    catalog.register(BitcoinVenezuela::NAME, move || {
        Arc::new(BitcoinVenezuela::new(h.clone()))
    });
    let h = http.clone();
    catalog.register(GoCoin::NAME, move || Arc::new(GoCoin::new(h.clone())));
    let h = http.clone();
    catalog.register(Kraken::NAME, move || Arc::new(Kraken::new(h.clone())));
    let h = http.clone();
    catalog.register(BTCe::NAME, move || Arc::new(BTCe::new(h.clone(), concurrency)));
    let h = http.clone();
    catalog.register(CoinMarketCap::NAME, move || {
        Arc::new(CoinMarketCap::new(h.clone(), concurrency))
    });
    catalog.register(HitBTC::NAME, move || Arc::new(HitBTC::new(http.clone(), concurrency)));
}
