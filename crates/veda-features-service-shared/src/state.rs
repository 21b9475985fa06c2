//! Application state for the features service.
//!
//! The state owns the feature store and a cached catalog. The catalog is read
//! on every request and replaced by refreshes; refreshes are serialized so at
//! most one catalog query runs at a time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};

use veda_features_lib::{ApiSettings, Catalog, Collection, FeatureStore, Result as LibResult};

use crate::metrics::{record_catalog_refresh, record_collections_loaded};

/// What caused a catalog refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    /// `GET /refresh`.
    Manual,
    /// The catalog outlived `catalog_ttl`.
    Ttl,
}

impl RefreshTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Ttl => "ttl",
        }
    }
}

/// How a stale catalog is refreshed around a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RefreshMode {
    /// Spawn the refresh and answer immediately.
    #[default]
    Background,
    /// Await the refresh after the response is produced. Needed where the
    /// process is frozen between invocations, such as AWS Lambda.
    Inline,
}

/// Shared application state for all axum handlers.
///
/// Cheap to clone; every clone points at the same store and catalog.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
    refresh_mode: RefreshMode,
}

struct AppStateInner {
    store: Arc<dyn FeatureStore>,
    settings: ApiSettings,
    catalog: RwLock<CachedCatalog>,
    refresh_lock: Mutex<()>,
}

struct CachedCatalog {
    catalog: Catalog,
    loaded_at: Instant,
}

impl AppState {
    /// State around an already loaded catalog.
    pub fn new(store: Arc<dyn FeatureStore>, catalog: Catalog, settings: ApiSettings) -> Self {
        record_collections_loaded(catalog.len());
        Self {
            inner: Arc::new(AppStateInner {
                store,
                settings,
                catalog: RwLock::new(CachedCatalog {
                    catalog,
                    loaded_at: Instant::now(),
                }),
                refresh_lock: Mutex::new(()),
            }),
            refresh_mode: RefreshMode::default(),
        }
    }

    /// Use `mode` for TTL refreshes.
    pub fn with_refresh_mode(mut self, mode: RefreshMode) -> Self {
        self.refresh_mode = mode;
        self
    }

    pub fn refresh_mode(&self) -> RefreshMode {
        self.refresh_mode
    }

    /// Load the catalog for the configured schemas and build the state.
    pub async fn load(store: Arc<dyn FeatureStore>, settings: ApiSettings) -> LibResult<Self> {
        tracing::info!(schemas = ?settings.schemas, "loading collection catalog");
        let catalog = store.load_catalog(&settings.schemas).await?;
        tracing::info!(collections = catalog.len(), "collection catalog loaded");
        Ok(Self::new(store, catalog, settings))
    }

    pub fn store(&self) -> &dyn FeatureStore {
        self.inner.store.as_ref()
    }

    pub fn settings(&self) -> &ApiSettings {
        &self.inner.settings
    }

    /// A copy of the current catalog.
    pub async fn catalog(&self) -> Catalog {
        self.inner.catalog.read().await.catalog.clone()
    }

    /// A copy of one collection.
    ///
    /// # Errors
    ///
    /// [`veda_features_lib::Error::UnknownCollection`] when the id is not in
    /// the current catalog.
    pub async fn collection(&self, id: &str) -> LibResult<Collection> {
        self.inner.catalog.read().await.catalog.get(id).cloned()
    }

    /// Whether the catalog is older than `catalog_ttl`. Always false when the
    /// TTL is zero.
    pub async fn catalog_is_stale(&self) -> bool {
        let ttl = self.inner.settings.catalog_ttl;
        if ttl == 0 {
            return false;
        }
        self.inner.catalog.read().await.loaded_at.elapsed() >= Duration::from_secs(ttl)
    }

    /// Reload the catalog, waiting for any refresh already in progress.
    pub async fn refresh(&self, trigger: RefreshTrigger) -> LibResult<Catalog> {
        let _guard = self.inner.refresh_lock.lock().await;
        self.reload(trigger).await
    }

    /// Reload the catalog when it is stale, unless another refresh is
    /// already running. Returns whether a reload happened.
    pub async fn refresh_if_stale(&self) -> LibResult<bool> {
        let Ok(_guard) = self.inner.refresh_lock.try_lock() else {
            tracing::debug!("catalog refresh already in progress");
            return Ok(false);
        };
        // another task may have finished a refresh while we waited on the read lock
        if !self.catalog_is_stale().await {
            return Ok(false);
        }
        self.reload(RefreshTrigger::Ttl).await?;
        Ok(true)
    }

    async fn reload(&self, trigger: RefreshTrigger) -> LibResult<Catalog> {
        let start = Instant::now();
        match self.inner.store.load_catalog(&self.inner.settings.schemas).await {
            Ok(catalog) => {
                let mut cached = self.inner.catalog.write().await;
                cached.catalog = catalog.clone();
                cached.loaded_at = Instant::now();
                record_catalog_refresh(trigger.as_str(), true);
                record_collections_loaded(catalog.len());
                tracing::info!(
                    trigger = trigger.as_str(),
                    collections = catalog.len(),
                    latency_ms = start.elapsed().as_millis() as u64,
                    "collection catalog refreshed"
                );
                Ok(catalog)
            }
            Err(e) => {
                record_catalog_refresh(trigger.as_str(), false);
                tracing::error!(trigger = trigger.as_str(), error = %e, "catalog refresh failed");
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("schemas", &self.inner.settings.schemas)
            .field("catalog_ttl", &self.inner.settings.catalog_ttl)
            .field("refresh_mode", &self.refresh_mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{collection, MemoryStore};

    fn settings(ttl: u64) -> ApiSettings {
        ApiSettings {
            catalog_ttl: ttl,
            ..ApiSettings::default()
        }
    }

    #[tokio::test]
    async fn load_reads_configured_schemas() {
        let store = Arc::new(MemoryStore::default().with_collection(collection("public", "counties")));
        let state = AppState::load(store, settings(300)).await.unwrap();

        assert!(state.collection("public.counties").await.is_ok());
        assert!(state.collection("public.missing").await.is_err());
    }

    #[tokio::test]
    async fn refresh_picks_up_new_tables() {
        let store = Arc::new(MemoryStore::default());
        let state = AppState::load(store.clone(), settings(300)).await.unwrap();
        assert!(state.catalog().await.is_empty());

        store.add_collection(collection("public", "fires"));
        let catalog = state.refresh(RefreshTrigger::Manual).await.unwrap();

        assert!(catalog.contains("public.fires"));
        assert!(state.collection("public.fires").await.is_ok());
    }

    #[tokio::test]
    async fn zero_ttl_never_goes_stale() {
        let state = AppState::load(Arc::new(MemoryStore::default()), settings(0))
            .await
            .unwrap();
        assert!(!state.catalog_is_stale().await);
        assert!(!state.refresh_if_stale().await.unwrap());
    }

    #[tokio::test]
    async fn fresh_catalog_is_not_reloaded() {
        let store = Arc::new(MemoryStore::default());
        let state = AppState::load(store.clone(), settings(3600)).await.unwrap();
        store.add_collection(collection("public", "late"));

        assert!(!state.refresh_if_stale().await.unwrap());
        assert!(!state.catalog().await.contains("public.late"));
    }

    #[test]
    fn trigger_labels() {
        assert_eq!(RefreshTrigger::Manual.as_str(), "manual");
        assert_eq!(RefreshTrigger::Ttl.as_str(), "ttl");
    }
}
