//! Feed settings and the wallet configuration collaborator.

use std::path::{Path, PathBuf};

use chrono::Duration;
use parking_lot::RwLock;
use ratefeed_common::time::constants;
use ratefeed_common::{Currency, Timestamp};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{FxError, FxResult};

/// Keys read from and written to the [`ConfigStore`].
pub mod keys {
    /// Fiat display enabled (bool).
    pub const USE_EXCHANGE_RATE: &str = "use_exchange_rate";
    /// Selected source name (string).
    pub const USE_EXCHANGE: &str = "use_exchange";
    /// Selected fiat currency (string).
    pub const CURRENCY: &str = "currency";
    /// Historical rates enabled (bool).
    pub const HISTORY_RATES: &str = "history_rates";
}

/// When a missing historical rate may be replaced by the spot quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpotFallbackPolicy {
    /// Substitute whatever spot quote is cached.
    #[default]
    Always,
    /// Substitute only a spot quote younger than the limit.
    MaxAge(Duration),
}

impl SpotFallbackPolicy {
    /// Check if a snapshot fetched at `fetched_at` may stand in at `now`.
    pub fn allows(&self, fetched_at: Timestamp, now: Timestamp) -> bool {
        match self {
            SpotFallbackPolicy::Always => true,
            SpotFallbackPolicy::MaxAge(limit) => now - fetched_at <= *limit,
        }
    }
}

/// Rate feed settings.
#[derive(Debug, Clone)]
pub struct FxSettings {
    /// Minimum interval between spot refreshes.
    pub refresh_interval: Duration,
    /// Days before today eligible for spot substitution.
    pub spot_fallback_days: i64,
    /// Spot substitution freshness rule.
    pub spot_policy: SpotFallbackPolicy,
    /// Source used when none (or an unknown one) is configured.
    pub default_source: String,
    /// Currency used when none is configured.
    pub default_currency: Currency,
    /// Capability cache file.
    pub cache_path: PathBuf,
    /// Per-request HTTP timeout.
    pub http_timeout: std::time::Duration,
    /// User-Agent sent upstream.
    pub user_agent: String,
    /// Parallel requests per fan-out fetch.
    pub fanout_concurrency: usize,
}

impl Default for FxSettings {
    fn default() -> Self {
        Self {
            refresh_interval: constants::refresh_interval(),
            spot_fallback_days: constants::SPOT_FALLBACK_DAYS,
            spot_policy: SpotFallbackPolicy::Always,
            default_source: "BitcoinAverage".to_string(),
            default_currency: Currency::eur(),
            cache_path: PathBuf::from("currencies.json"),
            http_timeout: std::time::Duration::from_secs(10),
            user_agent: format!("ratefeed/{}", env!("CARGO_PKG_VERSION")),
            fanout_concurrency: 8,
        }
    }
}

impl FxSettings {
    /// Load settings from environment variables.
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        if let Ok(secs) = std::env::var("RATEFEED_REFRESH_SECS") {
            if let Ok(secs) = secs.parse() {
                settings.refresh_interval = Duration::seconds(secs);
            }
        }

        if let Ok(path) = std::env::var("RATEFEED_CACHE_PATH") {
            settings.cache_path = PathBuf::from(path);
        }

        if let Ok(secs) = std::env::var("RATEFEED_HTTP_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse() {
                settings.http_timeout = std::time::Duration::from_secs(secs);
            }
        }

        if let Ok(secs) = std::env::var("RATEFEED_SPOT_MAX_AGE_SECS") {
            if let Ok(secs) = secs.parse() {
                settings.spot_policy = SpotFallbackPolicy::MaxAge(Duration::seconds(secs));
            }
        }

        settings
    }

    /// Validate settings.
    pub fn validate(&self) -> Result<(), String> {
        if self.refresh_interval <= Duration::zero() {
            return Err("Refresh interval must be positive".to_string());
        }

        if self.spot_fallback_days < 0 {
            return Err("Spot fallback window cannot be negative".to_string());
        }

        if let SpotFallbackPolicy::MaxAge(limit) = self.spot_policy {
            if limit < Duration::zero() {
                return Err("Spot max age cannot be negative".to_string());
            }
        }

        if self.default_source.is_empty() {
            return Err("Default source cannot be empty".to_string());
        }

        if self.http_timeout.is_zero() {
            return Err("HTTP timeout cannot be 0".to_string());
        }

        if self.fanout_concurrency == 0 {
            return Err("Fan-out concurrency cannot be 0".to_string());
        }

        Ok(())
    }
}

/// Wallet configuration the feed reads its selection from.
pub trait ConfigStore: Send + Sync {
    /// Read a raw value.
    fn get(&self, key: &str) -> Option<Value>;

    /// Write a value, saving it to backing storage when `persist` is set.
    fn set_key(&self, key: &str, value: Value, persist: bool) -> FxResult<()>;

    /// Read a bool, or `default` when missing or mistyped.
    fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    /// Read a string, or `default` when missing or mistyped.
    fn get_string(&self, key: &str, default: &str) -> String {
        self.get(key)
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| default.to_string())
    }
}

/// In-memory config store.
#[derive(Debug, Default)]
pub struct MemoryConfig {
    values: RwLock<Map<String, Value>>,
}

impl MemoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    pub fn with(self, key: &str, value: impl Into<Value>) -> Self {
        self.values.write().insert(key.to_string(), value.into());
        self
    }
}

impl ConfigStore for MemoryConfig {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    fn set_key(&self, key: &str, value: Value, _persist: bool) -> FxResult<()> {
        self.values.write().insert(key.to_string(), value);
        Ok(())
    }
}

/// Config store backed by a JSON object file.
#[derive(Debug)]
pub struct JsonFileConfig {
    path: PathBuf,
    values: RwLock<Map<String, Value>>,
}

impl JsonFileConfig {
    /// Open the file at `path`. A missing file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> FxResult<Self> {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Object(map)) => map,
                Ok(_) => {
                    return Err(FxError::Config(format!(
                        "{} does not hold a JSON object",
                        path.display()
                    )))
                }
                Err(e) => {
                    return Err(FxError::Config(format!("{}: {}", path.display(), e)));
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(io_error(&path, e)),
        };

        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, values: &Map<String, Value>) -> FxResult<()> {
        let body = serde_json::to_string_pretty(values)
            .map_err(|e| FxError::Config(format!("serialize config: {}", e)))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| io_error(&self.path, e))?;
        }
        let staging = self.path.with_extension("tmp");
        std::fs::write(&staging, body).map_err(|e| io_error(&self.path, e))?;
        std::fs::rename(&staging, &self.path).map_err(|e| io_error(&self.path, e))?;
        debug!(path = %self.path.display(), "Saved config");
        Ok(())
    }
}

impl ConfigStore for JsonFileConfig {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    fn set_key(&self, key: &str, value: Value, persist: bool) -> FxResult<()> {
        let mut values = self.values.write();
        values.insert(key.to_string(), value);
        if persist {
            self.save(&values)?;
        }
        Ok(())
    }
}

fn io_error(path: &Path, e: std::io::Error) -> FxError {
    FxError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}
