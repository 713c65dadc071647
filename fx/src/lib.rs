//! Ratefeed FX
//!
//! Fiat exchange-rate feed for the wallet's base asset.
//!
//! # Features
//!
//! - Pluggable price sources normalised into one quote map
//! - Capability registry persisted as a JSON cache file
//! - Polling coordinator with tagged async completions
//! - Historical rates with a spot fallback for recent days
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ratefeed_fx::{FxSettings, HttpFetcher, MemoryConfig, RateCoordinator, SourceCatalog, SourceRegistry};
//!
//! let settings = FxSettings::from_env();
//! let http = HttpFetcher::new(settings.http_timeout, &settings.user_agent)?;
//! let catalog = Arc::new(SourceCatalog::builtin(http, settings.fanout_concurrency));
//! let registry = Arc::new(SourceRegistry::new(catalog, settings.cache_path.clone()));
//!
//! let coordinator = RateCoordinator::new(registry, Arc::new(MemoryConfig::new()), settings)?;
//! coordinator.start()?;
//! coordinator.tick();
//! println!("{}", coordinator.format_amount(Some(100_000_000)));
//! ```

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod notify;
pub mod provider;
pub mod registry;
pub mod sources;
pub mod state;

pub use cache::{HistoryCache, QuoteCache, QuoteSnapshot};
pub use config::{keys, ConfigStore, FxSettings, JsonFileConfig, MemoryConfig, SpotFallbackPolicy};
pub use coordinator::{RateCoordinator, Ticket, NO_DATA, NO_RATE_STATUS, UNKNOWN_AMOUNT};
pub use error::{FxError, FxResult};
pub use metrics::{FxMetrics, FxMetricsSnapshot, SharedMetrics};
pub use notify::{BroadcastNotifier, FxEvent, NoopNotifier, Notifier};
pub use provider::PriceSource;
#[cfg(any(test, feature = "test-utils"))]
pub use provider::MockPriceSource;
pub use registry::{CapabilityMap, SourceCatalog, SourceFactory, SourceRegistry};
pub use sources::{HttpFetcher, ASSET};
pub use state::{CoordinatorState, Tick};
