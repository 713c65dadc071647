//! Counters for rate feed monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Rate feed metrics.
#[derive(Debug, Default)]
pub struct FxMetrics {
    /// Spot refreshes spawned.
    pub refreshes_started: AtomicU64,
    /// Spot refreshes applied.
    pub refreshes_succeeded: AtomicU64,
    /// Spot refreshes that failed upstream.
    pub refreshes_failed: AtomicU64,
    /// Completions dropped because the selection changed.
    pub stale_discarded: AtomicU64,
    /// History fetches spawned.
    pub history_started: AtomicU64,
    /// History series stored.
    pub history_succeeded: AtomicU64,
    /// History fetches that failed upstream.
    pub history_failed: AtomicU64,
    /// Historical lookups answered with the spot quote.
    pub spot_substitutions: AtomicU64,
}

impl FxMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refresh_started(&self) {
        self.refreshes_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn refresh_succeeded(&self) {
        self.refreshes_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn refresh_failed(&self) {
        self.refreshes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stale_completion(&self) {
        self.stale_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn history_started(&self) {
        self.history_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn history_succeeded(&self) {
        self.history_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn history_failed(&self) {
        self.history_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn spot_substituted(&self) {
        self.spot_substitutions.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> FxMetricsSnapshot {
        FxMetricsSnapshot {
            refreshes_started: self.refreshes_started.load(Ordering::Relaxed),
            refreshes_succeeded: self.refreshes_succeeded.load(Ordering::Relaxed),
            refreshes_failed: self.refreshes_failed.load(Ordering::Relaxed),
            stale_discarded: self.stale_discarded.load(Ordering::Relaxed),
            history_started: self.history_started.load(Ordering::Relaxed),
            history_succeeded: self.history_succeeded.load(Ordering::Relaxed),
            history_failed: self.history_failed.load(Ordering::Relaxed),
            spot_substitutions: self.spot_substitutions.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let counters = [
            ("refreshes_started", "Spot refreshes started", snapshot.refreshes_started),
            ("refreshes_succeeded", "Spot refreshes applied", snapshot.refreshes_succeeded),
            ("refreshes_failed", "Spot refreshes failed", snapshot.refreshes_failed),
            ("stale_discarded", "Completions for a replaced selection", snapshot.stale_discarded),
            ("history_started", "History fetches started", snapshot.history_started),
            ("history_succeeded", "History series stored", snapshot.history_succeeded),
            ("history_failed", "History fetches failed", snapshot.history_failed),
            ("spot_substitutions", "Historical lookups served from spot", snapshot.spot_substitutions),
        ];

        let mut out = String::new();
        for (name, help, value) in counters {
            out.push_str(&format!(
                "# HELP ratefeed_{name} {help}\n# TYPE ratefeed_{name} counter\nratefeed_{name} {value}\n\n"
            ));
        }
        out
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FxMetricsSnapshot {
    pub refreshes_started: u64,
    pub refreshes_succeeded: u64,
    pub refreshes_failed: u64,
    pub stale_discarded: u64,
    pub history_started: u64,
    pub history_succeeded: u64,
    pub history_failed: u64,
    pub spot_substitutions: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<FxMetrics>;
