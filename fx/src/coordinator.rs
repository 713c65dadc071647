//! Polling coordinator for spot and historical rates.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use parking_lot::{Mutex, RwLock};
use ratefeed_common::{
    days_before, display_unit_size, to_fiat, AmountFormatter, Clock, Currency, HistoricalSeries,
    Quotes, SystemClock, Timestamp,
};
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::cache::{HistoryCache, QuoteCache};
use crate::config::{keys, ConfigStore, FxSettings};
use crate::error::{FxError, FxResult};
use crate::metrics::{FxMetrics, SharedMetrics};
use crate::notify::{NoopNotifier, Notifier};
use crate::provider::PriceSource;
use crate::registry::SourceRegistry;
use crate::state::{CoordinatorState, Tick};

/// Shown when an amount is not known.
pub const UNKNOWN_AMOUNT: &str = "Unknown";
/// Shown when no rate is available for the amount.
pub const NO_DATA: &str = "No data";
/// Status line suffix when no spot rate is cached.
pub const NO_RATE_STATUS: &str = "  (No FX rate available)";

/// Identifies the selection a spot fetch was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub epoch: u64,
    pub source: String,
    pub currency: Currency,
}

/// Outcome of a background fetch, sent to the completion task.
#[derive(Debug)]
enum Completion {
    Spot {
        ticket: Ticket,
        completed_at: Timestamp,
        result: FxResult<Quotes>,
    },
    History {
        source: String,
        currency: Currency,
        completed_at: Timestamp,
        result: FxResult<HistoricalSeries>,
    },
}

struct Selection {
    epoch: u64,
    source: Arc<dyn PriceSource>,
    currency: Currency,
}

impl Selection {
    fn ticket(&self) -> Ticket {
        Ticket {
            epoch: self.epoch,
            source: self.source.name().to_string(),
            currency: self.currency.clone(),
        }
    }
}

/// State shared between the coordinator and its completion task.
///
/// Lock order: `selection`, then `in_flight`, then `last_refresh`.
struct Shared {
    selection: RwLock<Selection>,
    quotes: QuoteCache,
    history: HistoryCache,
    in_flight: Mutex<Option<Ticket>>,
    last_refresh: Mutex<Option<Timestamp>>,
    used_spot: AtomicBool,
    metrics: SharedMetrics,
}

impl Shared {
    fn apply(&self, completion: Completion, notifier: &dyn Notifier) {
        match completion {
            Completion::Spot {
                ticket,
                completed_at,
                result,
            } => self.apply_spot(ticket, completed_at, result, notifier),
            Completion::History {
                source,
                currency,
                completed_at,
                result,
            } => self.apply_history(source, currency, completed_at, result, notifier),
        }
    }

    fn apply_spot(
        &self,
        ticket: Ticket,
        completed_at: Timestamp,
        result: FxResult<Quotes>,
        notifier: &dyn Notifier,
    ) {
        let selection = self.selection.read();
        if selection.epoch != ticket.epoch {
            debug!(
                source = %ticket.source,
                currency = %ticket.currency,
                epoch = ticket.epoch,
                "Discarding stale quotes"
            );
            self.metrics.stale_completion();
            return;
        }

        *self.in_flight.lock() = None;
        *self.last_refresh.lock() = Some(completed_at);

        // A snapshot must price the selected currency to replace the cache.
        let result = result.and_then(|quotes| {
            if quotes.contains_key(&ticket.currency) {
                Ok(quotes)
            } else {
                Err(FxError::NoData(ticket.currency.clone()))
            }
        });
        match result {
            Ok(quotes) => {
                debug!(
                    source = %ticket.source,
                    currency = %ticket.currency,
                    count = quotes.len(),
                    "Quotes refreshed"
                );
                self.quotes.replace(quotes, completed_at);
                self.metrics.refresh_succeeded();
                drop(selection);
                notifier.on_quotes();
            }
            Err(e) => {
                warn!(
                    source = %ticket.source,
                    currency = %ticket.currency,
                    code = e.error_code(),
                    error = %e,
                    "Failed to refresh quotes"
                );
                self.metrics.refresh_failed();
            }
        }
    }

    fn apply_history(
        &self,
        source: String,
        currency: Currency,
        completed_at: Timestamp,
        result: FxResult<HistoricalSeries>,
        notifier: &dyn Notifier,
    ) {
        let active = self.selection.read().source.name() == source;
        if !active {
            debug!(source = %source, currency = %currency, "Discarding history from inactive source");
            self.history.abandon(&currency);
            self.metrics.stale_completion();
            return;
        }

        match result {
            Ok(series) => {
                self.history.complete(currency, series);
                self.metrics.history_succeeded();
                notifier.on_history();
            }
            Err(e) => {
                warn!(
                    source = %source,
                    currency = %currency,
                    code = e.error_code(),
                    error = %e,
                    "Failed to fetch history"
                );
                self.history.fail(&currency, completed_at);
                self.metrics.history_failed();
            }
        }
    }
}

/// Keeps the fiat rate for the selected source and currency fresh.
///
/// The host calls [`RateCoordinator::tick`] about once a second. Fetches
/// run as tokio tasks and report back over a channel to a single completion
/// task, the only writer of fetched data. Every query is non-blocking and
/// answers from whatever is cached.
pub struct RateCoordinator {
    shared: Arc<Shared>,
    registry: Arc<SourceRegistry>,
    config: Arc<dyn ConfigStore>,
    settings: FxSettings,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: Mutex<Option<mpsc::UnboundedReceiver<Completion>>>,
    runtime: Mutex<Option<Handle>>,
}

impl RateCoordinator {
    /// Create a coordinator using the source and currency named in `config`.
    ///
    /// An unknown configured source falls back to the default source.
    pub fn new(
        registry: Arc<SourceRegistry>,
        config: Arc<dyn ConfigStore>,
        settings: FxSettings,
    ) -> FxResult<Self> {
        settings.validate().map_err(FxError::Config)?;

        let source_name = config.get_string(keys::USE_EXCHANGE, &settings.default_source);
        let source = Self::resolve_source(&registry, &settings, &source_name)?;
        let currency = Currency::new(
            config.get_string(keys::CURRENCY, settings.default_currency.code()),
        );
        info!(source = %source.name(), currency = %currency, "Using rate source");

        let (completions_tx, completions_rx) = mpsc::unbounded_channel();

        Ok(Self {
            shared: Arc::new(Shared {
                selection: RwLock::new(Selection {
                    epoch: 0,
                    source,
                    currency,
                }),
                quotes: QuoteCache::new(),
                history: HistoryCache::new(),
                in_flight: Mutex::new(None),
                last_refresh: Mutex::new(None),
                used_spot: AtomicBool::new(false),
                metrics: Arc::new(FxMetrics::new()),
            }),
            registry,
            config,
            settings,
            clock: Arc::new(SystemClock),
            notifier: Arc::new(NoopNotifier),
            completions_tx,
            completions_rx: Mutex::new(Some(completions_rx)),
            runtime: Mutex::new(None),
        })
    }

    /// Use a different time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Deliver cache change notifications to `notifier`.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Attach to the current tokio runtime and spawn the completion task.
    ///
    /// Calling it again is a no-op.
    #[instrument(skip(self))]
    pub fn start(&self) -> FxResult<()> {
        let handle = Handle::try_current()
            .map_err(|e| FxError::Config(format!("no tokio runtime: {}", e)))?;

        let Some(mut rx) = self.completions_rx.lock().take() else {
            debug!("Coordinator already started");
            return Ok(());
        };

        let shared = self.shared.clone();
        let notifier = self.notifier.clone();
        handle.spawn(async move {
            while let Some(completion) = rx.recv().await {
                shared.apply(completion, notifier.as_ref());
            }
            debug!("Completion channel closed");
        });

        *self.runtime.lock() = Some(handle);
        info!("Rate coordinator started");
        Ok(())
    }

    /// Run one polling step. Never blocks.
    pub fn tick(&self) -> Tick {
        if !self.is_enabled() {
            return Tick::Disabled;
        }
        let Some(handle) = self.runtime.lock().clone() else {
            warn!("Tick before start, nothing spawned");
            return Tick::NotDue;
        };

        let selection = self.shared.selection.read();
        let mut in_flight = self.shared.in_flight.lock();
        if in_flight.is_some() {
            return Tick::InFlight;
        }

        let now = self.clock.now();
        let last_refresh = *self.shared.last_refresh.lock();
        if let Some(last) = last_refresh {
            if now < last + self.settings.refresh_interval {
                return Tick::NotDue;
            }
        }

        let ticket = selection.ticket();
        *in_flight = Some(ticket.clone());
        drop(in_flight);
        self.shared.metrics.refresh_started();
        debug!(source = %ticket.source, currency = %ticket.currency, epoch = ticket.epoch, "Refreshing quotes");

        let source = selection.source.clone();
        let clock = self.clock.clone();
        let tx = self.completions_tx.clone();
        handle.spawn(async move {
            let result = source.fetch_current(Some(&ticket.currency)).await;
            let completed_at = clock.now();
            if tx
                .send(Completion::Spot {
                    ticket,
                    completed_at,
                    result,
                })
                .is_err()
            {
                debug!("Coordinator gone, dropping quotes");
            }
        });

        if last_refresh.is_none() && self.history_shown_for(&selection) {
            self.request_history(&handle, &selection.source, &selection.currency);
        }
        Tick::Started
    }

    /// Current operational state.
    pub fn state(&self) -> CoordinatorState {
        if !self.is_enabled() {
            CoordinatorState::Disabled
        } else if self.shared.in_flight.lock().is_some() {
            CoordinatorState::Refreshing
        } else if self.shared.quotes.is_empty() {
            CoordinatorState::Idle
        } else {
            CoordinatorState::Ready
        }
    }

    /// Spot rate for the selected currency.
    pub fn current_rate(&self) -> Option<Decimal> {
        self.shared.quotes.rate(&self.currency())
    }

    /// Rate for `currency` on `date`.
    ///
    /// A missing series is requested in the background. Dates within the
    /// spot fallback window are answered with the spot quote when history
    /// has nothing yet.
    pub fn historical_rate(&self, currency: &Currency, date: NaiveDate) -> Option<Decimal> {
        if let Some(rate) = self.shared.history.get(currency, date) {
            return Some(rate);
        }

        if !self.shared.history.contains(currency) {
            if let Some(handle) = self.runtime.lock().clone() {
                let source = self.shared.selection.read().source.clone();
                self.request_history(&handle, &source, currency);
            }
        }

        if days_before(date, self.clock.today()) > self.settings.spot_fallback_days {
            return None;
        }
        let snapshot = self.shared.quotes.get()?;
        if !self
            .settings
            .spot_policy
            .allows(snapshot.fetched_at, self.clock.now())
        {
            debug!(currency = %currency, "Spot quote too old to stand in for history");
            return None;
        }
        let rate = snapshot.rate(currency)?;
        self.shared.used_spot.store(true, Ordering::Relaxed);
        self.shared.metrics.spot_substituted();
        Some(rate)
    }

    /// Check if any historical lookup was answered with the spot rate.
    pub fn history_used_spot(&self) -> bool {
        self.shared.used_spot.load(Ordering::Relaxed)
    }

    /// Read and clear the spot substitution flag.
    pub fn take_history_used_spot(&self) -> bool {
        self.shared.used_spot.swap(false, Ordering::Relaxed)
    }

    /// Check if a history fetch for `currency` is running.
    pub fn history_pending(&self, currency: &Currency) -> bool {
        self.shared.history.is_pending(currency)
    }

    /// Base units to a fiat string in the selected currency.
    pub fn format_amount(&self, base_units: Option<i64>) -> String {
        self.value_str(base_units, self.current_rate())
    }

    /// Base units at `rate`, or the matching placeholder.
    pub fn value_str(&self, base_units: Option<i64>, rate: Option<Decimal>) -> String {
        let Some(units) = base_units else {
            return UNKNOWN_AMOUNT.to_string();
        };
        match rate.filter(|r| !r.is_zero()) {
            Some(rate) => AmountFormatter::format(to_fiat(units, rate), &self.currency(), true),
            None => NO_DATA.to_string(),
        }
    }

    /// Amount with the currency code appended, empty without a rate.
    pub fn format_amount_and_units(&self, base_units: Option<i64>) -> String {
        match self.current_rate() {
            Some(rate) => format!(
                "{} {}",
                self.value_str(base_units, Some(rate)),
                self.currency()
            ),
            None => String::new(),
        }
    }

    /// Status bar text: the price of one display unit.
    pub fn fiat_status_text(&self, base_unit: &str, decimal_point: u32) -> String {
        match self.current_rate() {
            Some(rate) => format!(
                " 1 {}~{} {}",
                base_unit,
                self.value_str(Some(display_unit_size(decimal_point)), Some(rate)),
                self.currency()
            ),
            None => NO_RATE_STATUS.to_string(),
        }
    }

    /// Base units valued at the selected currency's rate on `date`.
    pub fn historical_value_str(&self, base_units: Option<i64>, date: NaiveDate) -> String {
        let rate = self.historical_rate(&self.currency(), date);
        self.value_str(base_units, rate)
    }

    /// Switch to the source registered as `name`.
    #[instrument(skip(self))]
    pub fn set_source(&self, name: &str) -> FxResult<()> {
        let source = self.registry.catalog().create(name)?;
        if self.config.get_string(keys::USE_EXCHANGE, "") != name {
            self.config
                .set_key(keys::USE_EXCHANGE, Value::from(name), true)?;
        }

        let mut selection = self.shared.selection.write();
        selection.source = source;
        self.reset(&mut selection);
        info!(source = %name, epoch = selection.epoch, "Switched rate source");
        Ok(())
    }

    /// Switch the fiat currency.
    #[instrument(skip(self))]
    pub fn set_currency(&self, code: &str) -> FxResult<()> {
        let currency = Currency::new(code);
        self.config
            .set_key(keys::CURRENCY, Value::from(currency.code()), true)?;

        {
            let mut selection = self.shared.selection.write();
            selection.currency = currency;
            self.reset(&mut selection);
            info!(currency = %selection.currency, epoch = selection.epoch, "Switched currency");
        }
        self.notifier.on_quotes();
        Ok(())
    }

    fn reset(&self, selection: &mut Selection) {
        selection.epoch += 1;
        *self.shared.in_flight.lock() = None;
        *self.shared.last_refresh.lock() = None;
        self.shared.quotes.clear();
    }

    /// Turn fiat display on or off.
    pub fn set_enabled(&self, enabled: bool) -> FxResult<()> {
        self.config
            .set_key(keys::USE_EXCHANGE_RATE, Value::from(enabled), true)
    }

    pub fn is_enabled(&self) -> bool {
        self.config.get_bool(keys::USE_EXCHANGE_RATE, false)
    }

    /// Turn historical rates on or off.
    pub fn set_history_config(&self, enabled: bool) -> FxResult<()> {
        self.config
            .set_key(keys::HISTORY_RATES, Value::from(enabled), true)
    }

    pub fn history_config(&self) -> bool {
        self.config.get_bool(keys::HISTORY_RATES, false)
    }

    /// Check if history can be shown for the selected currency.
    pub fn show_history(&self) -> bool {
        let selection = self.shared.selection.read();
        self.history_shown_for(&selection)
    }

    fn history_shown_for(&self, selection: &Selection) -> bool {
        self.is_enabled()
            && self.history_config()
            && selection.source.supports_history(&selection.currency)
    }

    /// Selected currency.
    pub fn currency(&self) -> Currency {
        self.shared.selection.read().currency.clone()
    }

    /// Name of the selected source.
    pub fn source_name(&self) -> String {
        self.shared.selection.read().source.name().to_string()
    }

    /// Currencies offered by some source.
    pub fn currencies(&self, history_required: bool) -> Vec<Currency> {
        self.registry.currencies(history_required)
    }

    /// Sources offering `currency`.
    pub fn sources_for_currency(&self, currency: &Currency, history_required: bool) -> Vec<String> {
        self.registry.sources_supporting(currency, history_required)
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.shared.metrics
    }

    pub fn settings(&self) -> &FxSettings {
        &self.settings
    }

    fn request_history(&self, handle: &Handle, source: &Arc<dyn PriceSource>, currency: &Currency) {
        if !source.supports_history(currency) {
            return;
        }
        if !self
            .shared
            .history
            .retry_due(currency, self.clock.now(), self.settings.refresh_interval)
        {
            debug!(currency = %currency, "History fetch failed recently, waiting");
            return;
        }
        if !self.shared.history.try_begin(currency) {
            debug!(currency = %currency, "History fetch already pending");
            return;
        }
        self.shared.metrics.history_started();
        debug!(source = %source.name(), currency = %currency, "Requesting history");

        let source = source.clone();
        let currency = currency.clone();
        let clock = self.clock.clone();
        let tx = self.completions_tx.clone();
        handle.spawn(async move {
            let result = source.fetch_historical(&currency).await;
            let completion = Completion::History {
                source: source.name().to_string(),
                currency,
                completed_at: clock.now(),
                result,
            };
            if tx.send(completion).is_err() {
                debug!("Coordinator gone, dropping history");
            }
        });
    }

    fn resolve_source(
        registry: &SourceRegistry,
        settings: &FxSettings,
        name: &str,
    ) -> FxResult<Arc<dyn PriceSource>> {
        let catalog = registry.catalog();
        if let Ok(source) = catalog.create(name) {
            return Ok(source);
        }
        warn!(source = %name, fallback = %settings.default_source, "Unknown rate source");
        if let Ok(source) = catalog.create(&settings.default_source) {
            return Ok(source);
        }
        catalog
            .names()
            .first()
            .ok_or_else(|| FxError::UnknownSource(name.to_string()))
            .and_then(|first| catalog.create(first))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MemoryConfig, SpotFallbackPolicy};
    use crate::notify::{BroadcastNotifier, FxEvent};
    use crate::provider::MockPriceSource;
    use crate::registry::SourceCatalog;
    use chrono::{Duration, TimeZone, Utc};
    use ratefeed_common::{ManualClock, COIN};
    use rust_decimal_macros::dec;

    struct Harness {
        coordinator: RateCoordinator,
        clock: Arc<ManualClock>,
        config: Arc<MemoryConfig>,
    }

    fn start_time() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    fn usd_quotes(rate: Decimal) -> Quotes {
        Quotes::from([(Currency::usd(), rate)])
    }

    fn harness(sources: &[Arc<MockPriceSource>], config: MemoryConfig, settings: FxSettings) -> Harness {
        harness_with(sources, config, settings, Arc::new(NoopNotifier))
    }

    fn harness_with(
        sources: &[Arc<MockPriceSource>],
        config: MemoryConfig,
        settings: FxSettings,
        notifier: Arc<dyn Notifier>,
    ) -> Harness {
        let mut catalog = SourceCatalog::new();
        for source in sources {
            let s: Arc<dyn PriceSource> = source.clone();
            catalog.register(source.name(), move || s.clone());
        }
        let path = std::env::temp_dir()
            .join(format!("ratefeed-{}", uuid::Uuid::new_v4()))
            .join("currencies.json");
        let registry = Arc::new(SourceRegistry::new(Arc::new(catalog), path));
        let config = Arc::new(config);
        let clock = Arc::new(ManualClock::at(start_time()));

        let coordinator = RateCoordinator::new(registry, config.clone(), settings)
            .unwrap()
            .with_clock(clock.clone())
            .with_notifier(notifier);
        coordinator.start().unwrap();

        Harness {
            coordinator,
            clock,
            config,
        }
    }

    fn enabled(source: &str, currency: &str) -> MemoryConfig {
        MemoryConfig::new()
            .with(keys::USE_EXCHANGE_RATE, true)
            .with(keys::USE_EXCHANGE, source)
            .with(keys::CURRENCY, currency)
    }

    async fn settle(coordinator: &RateCoordinator) {
        for _ in 0..400 {
            let currency = coordinator.currency();
            if !coordinator.state().is_refreshing() && !coordinator.history_pending(&currency) {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("coordinator did not settle");
    }

    async fn wait_until(mut done: impl FnMut() -> bool) {
        for _ in 0..400 {
            if done() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_refresh_interval_schedule() {
        let kraken = Arc::new(MockPriceSource::new("Kraken"));
        kraken.set_quotes(usd_quotes(dec!(61.23)));
        let h = harness(&[kraken.clone()], enabled("Kraken", "USD"), FxSettings::default());

        assert_eq!(h.coordinator.state(), CoordinatorState::Idle);
        assert_eq!(h.coordinator.tick(), Tick::Started);
        settle(&h.coordinator).await;
        assert_eq!(h.coordinator.current_rate(), Some(dec!(61.23)));
        assert_eq!(h.coordinator.state(), CoordinatorState::Ready);

        h.clock.advance(Duration::seconds(60));
        assert_eq!(h.coordinator.tick(), Tick::NotDue);

        h.clock.advance(Duration::seconds(91));
        assert_eq!(h.coordinator.tick(), Tick::Started);
        settle(&h.coordinator).await;

        assert_eq!(kraken.current_calls(), 2);
        assert_eq!(h.coordinator.metrics().snapshot().refreshes_succeeded, 2);
    }

    #[tokio::test]
    async fn test_single_refresh_in_flight() {
        let source = Arc::new(MockPriceSource::new("Kraken").paused());
        source.set_quotes(usd_quotes(dec!(61.23)));
        let h = harness(&[source.clone()], enabled("Kraken", "USD"), FxSettings::default());

        assert_eq!(h.coordinator.tick(), Tick::Started);
        assert_eq!(h.coordinator.state(), CoordinatorState::Refreshing);
        h.clock.advance(Duration::seconds(300));
        assert_eq!(h.coordinator.tick(), Tick::InFlight);

        source.release();
        settle(&h.coordinator).await;
        assert_eq!(source.current_calls(), 1);
        assert_eq!(h.coordinator.current_rate(), Some(dec!(61.23)));
    }

    #[tokio::test]
    async fn test_disabled_does_nothing() {
        let source = Arc::new(MockPriceSource::new("Kraken"));
        source.set_quotes(usd_quotes(dec!(61.23)));
        let config = enabled("Kraken", "USD").with(keys::USE_EXCHANGE_RATE, false);
        let h = harness(&[source.clone()], config, FxSettings::default());

        assert_eq!(h.coordinator.state(), CoordinatorState::Disabled);
        assert_eq!(h.coordinator.tick(), Tick::Disabled);
        assert_eq!(source.current_calls(), 0);

        h.coordinator.set_enabled(true).unwrap();
        assert_eq!(h.coordinator.state(), CoordinatorState::Idle);
        assert_eq!(h.coordinator.tick(), Tick::Started);
        settle(&h.coordinator).await;
        assert_eq!(source.current_calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_quotes() {
        let source = Arc::new(MockPriceSource::new("Kraken"));
        source.set_quotes(usd_quotes(dec!(61.23)));
        let h = harness(&[source.clone()], enabled("Kraken", "USD"), FxSettings::default());

        h.coordinator.tick();
        settle(&h.coordinator).await;

        source.fail_quotes();
        h.clock.advance(Duration::seconds(151));
        assert_eq!(h.coordinator.tick(), Tick::Started);
        settle(&h.coordinator).await;

        assert_eq!(h.coordinator.current_rate(), Some(dec!(61.23)));
        assert_eq!(h.coordinator.metrics().snapshot().refreshes_failed, 1);

        h.clock.advance(Duration::seconds(10));
        assert_eq!(h.coordinator.tick(), Tick::NotDue);
    }

    #[tokio::test]
    async fn test_refresh_missing_currency_keeps_quotes() {
        let source = Arc::new(MockPriceSource::new("coinmarketcap"));
        source.set_quotes(usd_quotes(dec!(61.23)));
        let h = harness(&[source.clone()], enabled("coinmarketcap", "USD"), FxSettings::default());

        h.coordinator.tick();
        settle(&h.coordinator).await;
        assert_eq!(h.coordinator.current_rate(), Some(dec!(61.23)));

        source.set_quotes(Quotes::from([(Currency::eur(), dec!(52.10))]));
        h.clock.advance(Duration::seconds(151));
        assert_eq!(h.coordinator.tick(), Tick::Started);
        settle(&h.coordinator).await;

        assert_eq!(h.coordinator.current_rate(), Some(dec!(61.23)));
        assert_eq!(h.coordinator.format_amount(Some(COIN)), "61.23");
        let metrics = h.coordinator.metrics().snapshot();
        assert_eq!(metrics.refreshes_failed, 1);
        assert_eq!(metrics.refreshes_succeeded, 1);

        h.clock.advance(Duration::seconds(10));
        assert_eq!(h.coordinator.tick(), Tick::NotDue);
    }

    #[tokio::test]
    async fn test_source_switch_resets_quotes() {
        let first = Arc::new(MockPriceSource::new("Kraken"));
        first.set_quotes(usd_quotes(dec!(61.23)));
        let second = Arc::new(MockPriceSource::new("BitStamp"));
        second.set_quotes(usd_quotes(dec!(60)));
        let h = harness(
            &[first.clone(), second.clone()],
            enabled("Kraken", "USD"),
            FxSettings::default(),
        );

        h.coordinator.tick();
        settle(&h.coordinator).await;
        assert_eq!(h.coordinator.current_rate(), Some(dec!(61.23)));

        h.coordinator.set_source("BitStamp").unwrap();
        assert_eq!(h.coordinator.current_rate(), None);
        assert_eq!(h.coordinator.format_amount(Some(COIN)), NO_DATA);
        assert_eq!(h.config.get_string(keys::USE_EXCHANGE, ""), "BitStamp");

        assert_eq!(h.coordinator.tick(), Tick::Started);
        settle(&h.coordinator).await;
        assert_eq!(h.coordinator.current_rate(), Some(dec!(60)));
        assert_eq!(h.coordinator.source_name(), "BitStamp");
    }

    #[tokio::test]
    async fn test_unknown_source_rejected() {
        let source = Arc::new(MockPriceSource::new("Kraken"));
        let h = harness(&[source], enabled("Kraken", "USD"), FxSettings::default());

        let result = h.coordinator.set_source("Nope");

        assert!(matches!(result, Err(FxError::UnknownSource(_))));
        assert_eq!(h.coordinator.source_name(), "Kraken");
    }

    #[tokio::test]
    async fn test_unknown_configured_source_falls_back() {
        let average = Arc::new(MockPriceSource::new("BitcoinAverage"));
        let kraken = Arc::new(MockPriceSource::new("Kraken"));
        let h = harness(&[kraken, average], enabled("Vanished", "USD"), FxSettings::default());

        assert_eq!(h.coordinator.source_name(), "BitcoinAverage");
    }

    #[tokio::test]
    async fn test_stale_completion_discarded() {
        let slow = Arc::new(MockPriceSource::new("Kraken").paused());
        slow.set_quotes(usd_quotes(dec!(1)));
        let fast = Arc::new(MockPriceSource::new("BitStamp"));
        fast.set_quotes(usd_quotes(dec!(60)));
        let h = harness(
            &[slow.clone(), fast.clone()],
            enabled("Kraken", "USD"),
            FxSettings::default(),
        );

        assert_eq!(h.coordinator.tick(), Tick::Started);
        h.coordinator.set_source("BitStamp").unwrap();
        assert_eq!(h.coordinator.tick(), Tick::Started);
        settle(&h.coordinator).await;

        slow.release();
        let metrics = h.coordinator.metrics().clone();
        wait_until(|| metrics.snapshot().stale_discarded == 1).await;

        assert_eq!(h.coordinator.current_rate(), Some(dec!(60)));
        assert_eq!(h.coordinator.state(), CoordinatorState::Ready);
    }

    #[tokio::test]
    async fn test_stale_completion_after_currency_switch() {
        let source = Arc::new(MockPriceSource::new("Kraken").paused());
        source.set_quotes(Quotes::from([
            (Currency::usd(), dec!(61.23)),
            (Currency::eur(), dec!(55)),
        ]));
        let h = harness(&[source.clone()], enabled("Kraken", "USD"), FxSettings::default());

        assert_eq!(h.coordinator.tick(), Tick::Started);
        h.coordinator.set_currency("EUR").unwrap();
        assert_eq!(h.coordinator.state(), CoordinatorState::Idle);

        source.release();
        let metrics = h.coordinator.metrics().clone();
        wait_until(|| metrics.snapshot().stale_discarded == 1).await;

        assert_eq!(h.coordinator.current_rate(), None);
        assert_eq!(h.coordinator.state(), CoordinatorState::Idle);
        assert_eq!(metrics.snapshot().refreshes_succeeded, 0);

        assert_eq!(h.coordinator.tick(), Tick::Started);
        source.release();
        settle(&h.coordinator).await;
        assert_eq!(h.coordinator.current_rate(), Some(dec!(55)));
        assert_eq!(source.current_calls(), 2);
    }

    #[tokio::test]
    async fn test_currency_switch_notifies_and_refetches() {
        let source = Arc::new(MockPriceSource::new("Kraken"));
        source.set_quotes(Quotes::from([
            (Currency::usd(), dec!(61.23)),
            (Currency::eur(), dec!(55)),
        ]));
        let notifier = Arc::new(BroadcastNotifier::new(16));
        let mut events = notifier.subscribe();
        let h = harness_with(
            &[source.clone()],
            enabled("Kraken", "USD"),
            FxSettings::default(),
            notifier.clone(),
        );

        h.coordinator.set_currency("eur").unwrap();

        assert_eq!(events.recv().await.unwrap(), FxEvent::Quotes);
        assert_eq!(h.coordinator.currency(), Currency::eur());
        assert_eq!(h.config.get_string(keys::CURRENCY, ""), "EUR");
        assert_eq!(h.coordinator.tick(), Tick::Started);
        settle(&h.coordinator).await;
        assert_eq!(events.recv().await.unwrap(), FxEvent::Quotes);
        assert_eq!(h.coordinator.current_rate(), Some(dec!(55)));
    }

    #[tokio::test]
    async fn test_format_amount() {
        let source = Arc::new(MockPriceSource::new("Kraken"));
        source.set_quotes(Quotes::from([(Currency::jpy(), dec!(50))]));
        let h = harness(&[source], enabled("Kraken", "JPY"), FxSettings::default());

        assert_eq!(h.coordinator.format_amount(Some(COIN)), NO_DATA);
        h.coordinator.tick();
        settle(&h.coordinator).await;

        assert_eq!(h.coordinator.format_amount(Some(COIN)), "50");
        assert_eq!(h.coordinator.format_amount(None), UNKNOWN_AMOUNT);
        assert_eq!(h.coordinator.format_amount(Some(1_000 * COIN)), "50,000");
    }

    #[tokio::test]
    async fn test_host_strings() {
        let source = Arc::new(MockPriceSource::new("Kraken"));
        source.set_quotes(usd_quotes(dec!(61.23)));
        let h = harness(&[source], enabled("Kraken", "USD"), FxSettings::default());

        assert_eq!(h.coordinator.format_amount_and_units(Some(COIN)), "");
        assert_eq!(h.coordinator.fiat_status_text("LBTC", 8), NO_RATE_STATUS);

        h.coordinator.tick();
        settle(&h.coordinator).await;

        assert_eq!(
            h.coordinator.format_amount_and_units(Some(20 * COIN)),
            "1,224.60 USD"
        );
        assert_eq!(h.coordinator.fiat_status_text("LBTC", 8), " 1 LBTC~61.23 USD");
        assert_eq!(h.coordinator.fiat_status_text("mLBTC", 5), " 1 mLBTC~0.06 USD");
    }

    #[tokio::test]
    async fn test_history_fetched_on_first_tick() {
        let source = Arc::new(MockPriceSource::new("Kraken").with_history_currencies(&["USD"]));
        source.set_quotes(usd_quotes(dec!(61.23)));
        let day = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        source.set_history(Currency::usd(), HistoricalSeries::from([(day, dec!(42.5))]));
        let config = enabled("Kraken", "USD").with(keys::HISTORY_RATES, true);
        let h = harness(&[source.clone()], config, FxSettings::default());
        assert!(h.coordinator.show_history());

        h.coordinator.tick();
        settle(&h.coordinator).await;

        assert_eq!(source.history_calls(), 1);
        assert_eq!(h.coordinator.historical_rate(&Currency::usd(), day), Some(dec!(42.5)));
        assert_eq!(h.coordinator.historical_value_str(Some(2 * COIN), day), "85.00");
        assert!(!h.coordinator.history_used_spot());

        h.clock.advance(Duration::seconds(151));
        h.coordinator.tick();
        settle(&h.coordinator).await;
        assert_eq!(source.history_calls(), 1);
    }

    #[tokio::test]
    async fn test_history_requests_deduplicated() {
        let source = Arc::new(
            MockPriceSource::new("Kraken")
                .with_history_currencies(&["USD"])
                .paused(),
        );
        let day = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        source.set_history(Currency::usd(), HistoricalSeries::from([(day, dec!(42.5))]));
        let h = harness(&[source.clone()], enabled("Kraken", "USD"), FxSettings::default());

        assert_eq!(h.coordinator.historical_rate(&Currency::usd(), day), None);
        assert_eq!(h.coordinator.historical_rate(&Currency::usd(), day), None);
        wait_until(|| source.history_calls() == 1).await;
        assert!(h.coordinator.history_pending(&Currency::usd()));

        source.release();
        settle(&h.coordinator).await;

        assert_eq!(h.coordinator.historical_rate(&Currency::usd(), day), Some(dec!(42.5)));
        assert_eq!(source.history_calls(), 1);
        assert_eq!(h.coordinator.metrics().snapshot().history_started, 1);
    }

    #[tokio::test]
    async fn test_failed_history_waits_for_interval() {
        let source = Arc::new(MockPriceSource::new("Kraken").with_history_currencies(&["USD"]));
        let h = harness(&[source.clone()], enabled("Kraken", "USD"), FxSettings::default());
        let day = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        let metrics = h.coordinator.metrics().clone();

        for _ in 0..10 {
            assert_eq!(h.coordinator.historical_rate(&Currency::usd(), day), None);
            wait_until(|| !h.coordinator.history_pending(&Currency::usd())).await;
            wait_until(|| metrics.snapshot().history_failed == 1).await;
        }
        assert_eq!(source.history_calls(), 1);

        h.clock.advance(Duration::seconds(149));
        assert_eq!(h.coordinator.historical_rate(&Currency::usd(), day), None);
        assert_eq!(source.history_calls(), 1);

        source.set_history(Currency::usd(), HistoricalSeries::from([(day, dec!(42.5))]));
        h.clock.advance(Duration::seconds(1));
        assert_eq!(h.coordinator.historical_rate(&Currency::usd(), day), None);
        wait_until(|| h.coordinator.historical_rate(&Currency::usd(), day).is_some()).await;

        assert_eq!(source.history_calls(), 2);
        assert_eq!(h.coordinator.historical_rate(&Currency::usd(), day), Some(dec!(42.5)));
    }

    #[tokio::test]
    async fn test_history_from_inactive_source_discarded() {
        let first = Arc::new(
            MockPriceSource::new("Kraken")
                .with_history_currencies(&["USD"])
                .paused(),
        );
        let day = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        first.set_history(Currency::usd(), HistoricalSeries::from([(day, dec!(42.5))]));
        let second = Arc::new(MockPriceSource::new("BitStamp"));
        let h = harness(
            &[first.clone(), second],
            enabled("Kraken", "USD"),
            FxSettings::default(),
        );

        assert_eq!(h.coordinator.historical_rate(&Currency::usd(), day), None);
        wait_until(|| first.history_calls() == 1).await;
        h.coordinator.set_source("BitStamp").unwrap();

        first.release();
        let metrics = h.coordinator.metrics().clone();
        wait_until(|| metrics.snapshot().stale_discarded == 1).await;

        assert!(!h.coordinator.history_pending(&Currency::usd()));
        assert_eq!(h.coordinator.historical_rate(&Currency::usd(), day), None);
        assert_eq!(metrics.snapshot().history_succeeded, 0);
    }

    #[tokio::test]
    async fn test_unsupported_history_not_requested() {
        let source = Arc::new(MockPriceSource::new("Kraken").with_history_currencies(&["EUR"]));
        let h = harness(&[source.clone()], enabled("Kraken", "USD"), FxSettings::default());
        let day = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();

        assert_eq!(h.coordinator.historical_rate(&Currency::usd(), day), None);

        assert!(!h.coordinator.history_pending(&Currency::usd()));
        assert_eq!(source.history_calls(), 0);
    }

    #[tokio::test]
    async fn test_spot_fallback_window() {
        let source = Arc::new(MockPriceSource::new("Kraken"));
        source.set_quotes(usd_quotes(dec!(61.23)));
        let h = harness(&[source], enabled("Kraken", "USD"), FxSettings::default());
        h.coordinator.tick();
        settle(&h.coordinator).await;
        let today = start_time().date_naive();

        let three_days_ago = today - Duration::days(3);
        assert_eq!(h.coordinator.historical_rate(&Currency::usd(), three_days_ago), None);
        assert!(!h.coordinator.history_used_spot());

        let yesterday = today - Duration::days(1);
        assert_eq!(
            h.coordinator.historical_rate(&Currency::usd(), yesterday),
            Some(dec!(61.23))
        );
        assert!(h.coordinator.take_history_used_spot());
        assert!(!h.coordinator.history_used_spot());

        let two_days_ago = today - Duration::days(2);
        assert_eq!(
            h.coordinator.historical_rate(&Currency::usd(), two_days_ago),
            Some(dec!(61.23))
        );
        assert_eq!(h.coordinator.metrics().snapshot().spot_substitutions, 2);
    }

    #[tokio::test]
    async fn test_spot_max_age_policy() {
        let source = Arc::new(MockPriceSource::new("Kraken"));
        source.set_quotes(usd_quotes(dec!(61.23)));
        let settings = FxSettings {
            spot_policy: SpotFallbackPolicy::MaxAge(Duration::seconds(60)),
            ..FxSettings::default()
        };
        let h = harness(&[source], enabled("Kraken", "USD"), settings);
        h.coordinator.tick();
        settle(&h.coordinator).await;
        let today = start_time().date_naive();

        assert_eq!(h.coordinator.historical_rate(&Currency::usd(), today), Some(dec!(61.23)));

        h.clock.advance(Duration::seconds(120));
        assert_eq!(h.coordinator.historical_rate(&Currency::usd(), today), None);
    }

    #[tokio::test]
    async fn test_start_requires_runtime_once() {
        let source = Arc::new(MockPriceSource::new("Kraken"));
        let h = harness(&[source], enabled("Kraken", "USD"), FxSettings::default());

        assert!(h.coordinator.start().is_ok());
    }

    #[test]
    fn test_start_outside_runtime() {
        let mut catalog = SourceCatalog::new();
        let source: Arc<dyn PriceSource> = Arc::new(MockPriceSource::new("Kraken"));
        catalog.register("Kraken", move || source.clone());
        let registry = Arc::new(SourceRegistry::new(Arc::new(catalog), "unused.json"));
        let coordinator =
            RateCoordinator::new(registry, Arc::new(MemoryConfig::new()), FxSettings::default())
                .unwrap();

        assert!(matches!(coordinator.start(), Err(FxError::Config(_))));
        assert_eq!(coordinator.currency(), Currency::eur());
    }
}
