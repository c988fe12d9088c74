//! Process-boundary initialization.
//!
//! A host owns exactly one [`CacheRuntime`] (typically in its application
//! state) and calls [`CacheRuntime::init`] during startup. The first call
//! reads the master-key secret, builds the cache and launches the initial
//! reload in the background; later calls return the same cache.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::cache::BgCache;
use crate::config::CacheSettings;
use crate::envelope::Envelope;
use crate::error::BgCacheError;
use crate::index::SearchIndex;
use crate::keys::{EnvSecretProvider, MasterKeyStore, SecretProvider};
use crate::report::{ReportSink, ReportingConfig};

/// Owner of the process-wide cache instance.
#[derive(Default)]
pub struct CacheRuntime {
    cache: Mutex<Option<Arc<BgCache>>>,
}

impl CacheRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cache, if `init` has run.
    pub fn get(&self) -> Option<Arc<BgCache>> {
        self.cache.lock().clone()
    }

    /// Build the cache on first call and start its reload without waiting
    /// for it. Must be called from within a tokio runtime for the reload to
    /// be scheduled; otherwise the cache starts empty with persistence off.
    pub fn init(
        &self,
        settings: CacheSettings,
        secrets: Arc<dyn SecretProvider>,
        index: Option<Arc<dyn SearchIndex>>,
        reporting: ReportingConfig,
    ) -> Arc<BgCache> {
        let (cache, keys_loaded) = {
            let mut slot = self.cache.lock();
            if let Some(existing) = slot.as_ref() {
                debug!("cache already initialized");
                return Arc::clone(existing);
            }

            let keys = MasterKeyStore::load(secrets, settings.secret_name.clone());
            let keys_loaded = keys.is_loaded();
            let envelope = Envelope::new(Arc::new(keys));
            let cache = Arc::new(BgCache::new(settings, envelope, index, &reporting));
            *slot = Some(Arc::clone(&cache));
            (cache, keys_loaded)
        };

        // Sinks run outside the slot lock.
        if !keys_loaded {
            cache.reporter().error(
                &BgCacheError::ConfigMissing,
                &[("operation", "init"), ("secret", cache.settings().secret_name.as_str())],
            );
        }

        info!(index = %cache.settings().index_name, "break-glass cache initialized");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let reloading = Arc::clone(&cache);
                handle.spawn(async move {
                    reloading.reload().await;
                });
            }
            Err(_) => {
                warn!("no async runtime; initial reload skipped");
                cache.mark_ready();
            }
        }
        cache
    }

    /// Settings from the environment, secrets from the environment, labels
    /// from the settings plus the given sinks.
    pub fn init_from_env(
        &self,
        index: Option<Arc<dyn SearchIndex>>,
        sinks: Vec<Arc<dyn ReportSink>>,
    ) -> Result<Arc<BgCache>, BgCacheError> {
        if let Some(existing) = self.get() {
            return Ok(existing);
        }
        let settings = CacheSettings::load()?;
        let mut reporting = ReportingConfig::from_settings(&settings);
        reporting.sinks = sinks;
        Ok(self.init(settings, Arc::new(EnvSecretProvider), index, reporting))
    }
}

impl std::fmt::Debug for CacheRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRuntime")
            .field("initialized", &self.cache.lock().is_some())
            .finish()
    }
}
