//! Source catalog and the persisted currency-capability cache.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ratefeed_common::Currency;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use crate::error::{FxError, FxResult};
use crate::provider::PriceSource;
use crate::sources::{self, HttpFetcher};

/// Builds a fresh source instance.
pub type SourceFactory = Arc<dyn Fn() -> Arc<dyn PriceSource> + Send + Sync>;

/// Source name to the sorted currencies it quotes.
pub type CapabilityMap = BTreeMap<String, Vec<Currency>>;

/// Static registration table of every known source.
#[derive(Clone, Default)]
pub struct SourceCatalog {
    factories: BTreeMap<String, SourceFactory>,
}

impl SourceCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog of every built-in adapter.
    pub fn builtin(http: HttpFetcher, concurrency: usize) -> Self {
        let mut catalog = Self::new();
        sources::register_builtin(&mut catalog, http, concurrency);
        catalog
    }

    /// Register a factory under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Arc<dyn PriceSource> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    /// Instantiate the source registered as `name`.
    pub fn create(&self, name: &str) -> FxResult<Arc<dyn PriceSource>> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| FxError::UnknownSource(name.to_string()))
    }

    /// Check if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for SourceCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceCatalog")
            .field("sources", &self.names())
            .finish()
    }
}

/// Knows which currencies every source quotes.
///
/// The capability map is loaded from disk when possible and otherwise built
/// by probing every source once. Either way it is fixed for the life of the
/// registry and the file is written at most once.
pub struct SourceRegistry {
    catalog: Arc<SourceCatalog>,
    cache_path: PathBuf,
    capabilities: OnceCell<CapabilityMap>,
}

impl SourceRegistry {
    /// Create a registry backed by the capability file at `cache_path`.
    pub fn new(catalog: Arc<SourceCatalog>, cache_path: impl Into<PathBuf>) -> Self {
        Self {
            catalog,
            cache_path: cache_path.into(),
            capabilities: OnceCell::new(),
        }
    }

    /// Get the source catalog.
    pub fn catalog(&self) -> &Arc<SourceCatalog> {
        &self.catalog
    }

    /// Path of the persisted capability file.
    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// Capability map, if already loaded or built.
    pub fn capabilities(&self) -> Option<&CapabilityMap> {
        self.capabilities.get()
    }

    /// Load the capability map, rebuilding and persisting it on any failure.
    #[instrument(skip(self), fields(path = %self.cache_path.display()))]
    pub async fn load_or_build(&self) -> &CapabilityMap {
        self.capabilities
            .get_or_init(|| async {
                match self.load() {
                    Ok(map) => {
                        debug!(sources = map.len(), "Loaded capability cache");
                        map
                    }
                    Err(e) => {
                        info!(error = %e, "Capability cache unusable, probing sources");
                        let map = self.probe_all().await;
                        if let Err(e) = self.persist(&map) {
                            warn!(error = %e, "Failed to persist capability cache");
                        }
                        map
                    }
                }
            })
            .await
    }

    /// Ask every catalog source which currencies it quotes.
    ///
    /// Sources whose probe fails are left out.
    pub async fn probe_all(&self) -> CapabilityMap {
        let mut map = CapabilityMap::new();
        for name in self.catalog.names() {
            let source = match self.catalog.create(&name) {
                Ok(source) => source,
                Err(e) => {
                    warn!(source = %name, error = %e, "Cannot instantiate source");
                    continue;
                }
            };
            match source.enumerate_currencies().await {
                Ok(currencies) => {
                    debug!(source = %name, count = currencies.len(), "Probed source");
                    map.insert(name, currencies);
                }
                Err(e) => {
                    warn!(source = %name, error = %e, "Source probe failed");
                }
            }
        }
        map
    }

    /// Names of sources quoting `currency`.
    ///
    /// With `history_required`, only sources that also serve a daily
    /// history for it. Empty until [`SourceRegistry::load_or_build`] ran.
    pub fn sources_supporting(&self, currency: &Currency, history_required: bool) -> Vec<String> {
        self.by_currency(history_required)
            .remove(currency)
            .unwrap_or_default()
    }

    /// Every currency offered by some source, sorted.
    pub fn currencies(&self, history_required: bool) -> Vec<Currency> {
        self.by_currency(history_required).into_keys().collect()
    }

    fn by_currency(&self, history_required: bool) -> BTreeMap<Currency, Vec<String>> {
        let Some(capabilities) = self.capabilities() else {
            debug!("Capability map not loaded yet");
            return BTreeMap::new();
        };

        let mut inverse: BTreeMap<Currency, Vec<String>> = BTreeMap::new();
        for (name, quoted) in capabilities {
            let currencies = if history_required {
                match self.catalog.create(name) {
                    Ok(source) => source.history_currencies(),
                    Err(_) => continue,
                }
            } else {
                quoted.clone()
            };
            for currency in currencies {
                inverse.entry(currency).or_default().push(name.clone());
            }
        }
        inverse
    }

    fn load(&self) -> FxResult<CapabilityMap> {
        let raw = std::fs::read_to_string(&self.cache_path).map_err(|e| self.io_error(e))?;
        let map: CapabilityMap = serde_json::from_str(&raw)
            .map_err(|e| FxError::Config(format!("corrupt capability cache: {}", e)))?;

        if let Some(unknown) = map.keys().find(|name| !self.catalog.contains(name)) {
            return Err(FxError::Config(format!(
                "capability cache names unknown source {}",
                unknown
            )));
        }
        Ok(map)
    }

    fn persist(&self, map: &CapabilityMap) -> FxResult<()> {
        let mut sorted = map.clone();
        for currencies in sorted.values_mut() {
            currencies.sort();
            currencies.dedup();
        }
        let body = serde_json::to_string_pretty(&sorted)
            .map_err(|e| FxError::Config(format!("serialize capability cache: {}", e)))?;

        if let Some(parent) = self.cache_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let staging = self.cache_path.with_extension("tmp");
        std::fs::write(&staging, body).map_err(|e| self.io_error(e))?;
        std::fs::rename(&staging, &self.cache_path).map_err(|e| self.io_error(e))?;

        info!(path = %self.cache_path.display(), sources = sorted.len(), "Wrote capability cache");
        Ok(())
    }

    fn io_error(&self, e: std::io::Error) -> FxError {
        FxError::Io {
            path: self.cache_path.display().to_string(),
            message: e.to_string(),
        }
    }
}
