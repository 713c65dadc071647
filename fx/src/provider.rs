//! Price source trait and test double.

use async_trait::async_trait;
use ratefeed_common::{Currency, HistoricalSeries, Quotes};

use crate::error::{FxError, FxResult};

/// One upstream pricing backend.
///
/// Implementations are adapters: they build request paths, pick fields out
/// of the upstream payload and coerce them to decimals. Failures come back
/// as [`FxError`] values and never panic.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Registry key of this source.
    fn name(&self) -> &str;

    /// Fetch current quotes.
    ///
    /// `currency_hint` only matters to APIs that price one currency per
    /// request; basket sources ignore it. `None` asks for everything the
    /// source can price.
    async fn fetch_current(&self, currency_hint: Option<&Currency>) -> FxResult<Quotes>;

    /// Currencies with a daily history series. Static, no I/O.
    fn history_currencies(&self) -> Vec<Currency> {
        Vec::new()
    }

    /// Check if this source serves history for `currency`.
    fn supports_history(&self, currency: &Currency) -> bool {
        self.history_currencies().contains(currency)
    }

    /// Fetch the raw history series. Only called for supported currencies.
    async fn fetch_history_series(&self, currency: &Currency) -> FxResult<HistoricalSeries> {
        Err(FxError::UnsupportedOperation {
            source_name: self.name().to_string(),
            currency: currency.clone(),
        })
    }

    /// Fetch the full daily series for `currency`.
    ///
    /// Unsupported currencies are rejected before any request is made.
    async fn fetch_historical(&self, currency: &Currency) -> FxResult<HistoricalSeries> {
        if !self.supports_history(currency) {
            return Err(FxError::UnsupportedOperation {
                source_name: self.name().to_string(),
                currency: currency.clone(),
            });
        }
        self.fetch_history_series(currency).await
    }

    /// List every currency the source currently prices.
    async fn enumerate_currencies(&self) -> FxResult<Vec<Currency>> {
        let quotes = self.fetch_current(None).await?;
        let mut codes: Vec<Currency> = quotes.into_keys().filter(Currency::is_listable).collect();
        codes.sort();
        Ok(codes)
    }
}

/// Mock price source for testing.
#[cfg(any(test, feature = "test-utils"))]
pub struct MockPriceSource {
    name: String,
    quotes: parking_lot::Mutex<Option<Quotes>>,
    history: dashmap::DashMap<Currency, HistoricalSeries>,
    history_currencies: Vec<Currency>,
    gate: Option<std::sync::Arc<tokio::sync::Semaphore>>,
    current_calls: std::sync::atomic::AtomicUsize,
    history_calls: std::sync::atomic::AtomicUsize,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockPriceSource {
    /// Create a mock that fails every fetch until quotes are set.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            quotes: parking_lot::Mutex::new(None),
            history: dashmap::DashMap::new(),
            history_currencies: Vec::new(),
            gate: None,
            current_calls: std::sync::atomic::AtomicUsize::new(0),
            history_calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Advertise history for these currencies.
    pub fn with_history_currencies(mut self, codes: &[&str]) -> Self {
        self.history_currencies = codes.iter().map(|c| Currency::new(*c)).collect();
        self
    }

    /// Hold every fetch until [`MockPriceSource::release`] is called.
    pub fn paused(mut self) -> Self {
        self.gate = Some(std::sync::Arc::new(tokio::sync::Semaphore::new(0)));
        self
    }

    /// Let one held fetch complete.
    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    /// Serve these quotes from now on.
    pub fn set_quotes(&self, quotes: Quotes) {
        *self.quotes.lock() = Some(quotes);
    }

    /// Fail every current-quote fetch from now on.
    pub fn fail_quotes(&self) {
        *self.quotes.lock() = None;
    }

    /// Serve this series for `currency`.
    pub fn set_history(&self, currency: Currency, series: HistoricalSeries) {
        self.history.insert(currency, series);
    }

    /// Number of current-quote fetches started.
    pub fn current_calls(&self) -> usize {
        self.current_calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Number of history fetches that reached the network layer.
    pub fn history_calls(&self) -> usize {
        self.history_calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    async fn wait_gate(&self) -> FxResult<()> {
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| FxError::network(&self.name, e))?
                .forget();
        }
        Ok(())
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl PriceSource for MockPriceSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_current(&self, _currency_hint: Option<&Currency>) -> FxResult<Quotes> {
        self.current_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.wait_gate().await?;
        self.quotes
            .lock()
            .clone()
            .ok_or_else(|| FxError::network(&self.name, "mock outage"))
    }

    fn history_currencies(&self) -> Vec<Currency> {
        self.history_currencies.clone()
    }

    async fn fetch_history_series(&self, currency: &Currency) -> FxResult<HistoricalSeries> {
        self.history_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.wait_gate().await?;
        self.history
            .get(currency)
            .map(|s| s.clone())
            .ok_or_else(|| FxError::parse(&self.name, format!("no history for {}", currency)))
    }
}
