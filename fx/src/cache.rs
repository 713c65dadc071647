//! Spot quote snapshot and per-currency history cache.

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;
use ratefeed_common::{Currency, HistoricalSeries, Quotes, Timestamp};
use rust_decimal::Decimal;
use tracing::debug;

/// One successful spot fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteSnapshot {
    pub quotes: Quotes,
    pub fetched_at: Timestamp,
}

impl QuoteSnapshot {
    pub fn rate(&self, currency: &Currency) -> Option<Decimal> {
        self.quotes.get(currency).copied()
    }
}

/// Latest spot snapshot for the active selection.
///
/// Readers clone the `Arc` out; a refresh swaps in a whole new snapshot.
#[derive(Debug, Default)]
pub struct QuoteCache {
    snapshot: RwLock<Option<Arc<QuoteSnapshot>>>,
}

impl QuoteCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot, `None` if never fetched since the last reset.
    pub fn get(&self) -> Option<Arc<QuoteSnapshot>> {
        self.snapshot.read().clone()
    }

    pub fn rate(&self, currency: &Currency) -> Option<Decimal> {
        self.get().and_then(|s| s.rate(currency))
    }

    pub fn replace(&self, quotes: Quotes, fetched_at: Timestamp) {
        *self.snapshot.write() = Some(Arc::new(QuoteSnapshot { quotes, fetched_at }));
    }

    pub fn clear(&self) {
        *self.snapshot.write() = None;
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.read().is_none()
    }
}

/// Daily series per currency, kept for the life of the process.
///
/// A failed fetch is remembered so the currency is not asked for again
/// until a retry interval has passed.
#[derive(Debug, Default)]
pub struct HistoryCache {
    series: DashMap<Currency, Arc<HistoricalSeries>>,
    pending: DashSet<Currency>,
    failed_at: DashMap<Currency, Timestamp>,
}

impl HistoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rate for `currency` on `date`, if that day is cached.
    pub fn get(&self, currency: &Currency, date: NaiveDate) -> Option<Decimal> {
        self.series
            .get(currency)
            .and_then(|series| series.get(&date).copied())
    }

    pub fn contains(&self, currency: &Currency) -> bool {
        self.series.contains_key(currency)
    }

    /// Claim the fetch slot for `currency`. False if one is already pending.
    pub fn try_begin(&self, currency: &Currency) -> bool {
        self.pending.insert(currency.clone())
    }

    pub fn is_pending(&self, currency: &Currency) -> bool {
        self.pending.contains(currency)
    }

    /// Release the fetch slot without storing anything.
    pub fn abandon(&self, currency: &Currency) {
        self.pending.remove(currency);
    }

    /// Release the slot and hold off further fetches from `at`.
    pub fn fail(&self, currency: &Currency, at: Timestamp) {
        self.pending.remove(currency);
        self.failed_at.insert(currency.clone(), at);
    }

    /// Check if `currency` may be fetched at `now`.
    pub fn retry_due(&self, currency: &Currency, now: Timestamp, interval: Duration) -> bool {
        self.failed_at
            .get(currency)
            .map_or(true, |failed| now >= *failed + interval)
    }

    /// Store a fetched series, replacing any older one, and release the slot.
    pub fn complete(&self, currency: Currency, series: HistoricalSeries) {
        debug!(currency = %currency, days = series.len(), "History cached");
        self.pending.remove(&currency);
        self.failed_at.remove(&currency);
        self.series.insert(currency, Arc::new(series));
    }
}
