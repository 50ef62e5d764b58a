//! The driver registry: named backend factories with cached capability probes.
//!
//! ```
//! use bucket_store::prelude::*;
//!
//! let registry = DriverRegistry::with_defaults();
//! let chosen = registry.select(["indexeddb", "sqlite", "sled"]);
//! assert!(chosen.is_some());
//! ```

use log::{debug, warn};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::backend::StorageBackend;
use crate::config::BucketConfig;
use crate::driver::Driver;
use crate::error::{BucketError, BucketResult};
use crate::namespace::Namespace;

/// Builds backends of one kind.
pub trait BackendFactory: Send + Sync {
    /// Whether this backend can run in the current environment.
    ///
    /// Must be cheap and free of side effects. The registry caches the answer.
    fn test(&self) -> bool;

    /// Build an unopened backend for `namespace`.
    fn build(
        &self,
        namespace: Namespace,
        config: &BucketConfig,
    ) -> BucketResult<Arc<dyn StorageBackend>>;
}

struct Entry {
    factory: Arc<dyn BackendFactory>,
    probe: OnceLock<bool>,
}

impl Entry {
    fn supported(&self, name: &str) -> bool {
        *self.probe.get_or_init(|| {
            let supported = self.factory.test();
            if !supported {
                warn!("{name}: capability probe failed, backend unavailable");
            }
            supported
        })
    }
}

#[derive(Default)]
pub struct DriverRegistry {
    entries: RwLock<BTreeMap<String, Arc<Entry>>>,
}

impl DriverRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every backend compiled into this build.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        #[cfg(feature = "redb")]
        registry.register(
            crate::databases::redb_store::NAME,
            Arc::new(crate::databases::redb_store::RedbFactory),
        );
        #[cfg(feature = "sled")]
        registry.register(
            crate::databases::sled_store::NAME,
            Arc::new(crate::databases::sled_store::SledFactory),
        );
        #[cfg(feature = "sqlite")]
        registry.register(
            crate::databases::sqlite_store::NAME,
            Arc::new(crate::databases::sqlite_store::SqliteFactory),
        );
        registry
    }

    /// The process-wide registry, built with the defaults on first use.
    pub fn global() -> &'static DriverRegistry {
        static GLOBAL: OnceLock<DriverRegistry> = OnceLock::new();
        GLOBAL.get_or_init(DriverRegistry::with_defaults)
    }

    /// Register `factory` under `name`, replacing any previous registration.
    pub fn register(&self, name: impl Into<String>, factory: Arc<dyn BackendFactory>) {
        let name = name.into();
        let entry = Arc::new(Entry {
            factory,
            probe: OnceLock::new(),
        });
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.insert(name.clone(), entry).is_some() {
            debug!("registry: replaced backend {name}");
        }
    }

    fn entry(&self, name: &str) -> Option<Arc<Entry>> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Whether `name` is registered and its probe passes.
    pub fn supports(&self, name: &str) -> bool {
        self.entry(name)
            .map(|entry| entry.supported(name))
            .unwrap_or(false)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// The first supported name in `preferences`.
    pub fn select<S: AsRef<str>>(&self, preferences: impl IntoIterator<Item = S>) -> Option<String> {
        preferences
            .into_iter()
            .find(|name| self.supports(name.as_ref()))
            .map(|name| name.as_ref().to_string())
    }

    /// Build an uninitialized driver for the backend registered as `name`.
    pub fn create(&self, name: &str, config: &BucketConfig) -> BucketResult<Driver> {
        config.validate()?;
        let entry = self
            .entry(name)
            .ok_or_else(|| BucketError::not_found(format!("no backend registered as {name:?}")))?;
        if !entry.supported(name) {
            return Err(BucketError::not_found(format!(
                "backend {name:?} is not supported in this environment"
            )));
        }
        let backend = entry.factory.build(config.namespace()?, config)?;
        Ok(Driver::new(backend, config))
    }

    /// Build a driver for the first supported backend in `preferences`.
    pub fn create_preferred<S: AsRef<str>>(
        &self,
        preferences: impl IntoIterator<Item = S>,
        config: &BucketConfig,
    ) -> BucketResult<Driver> {
        let name = self
            .select(preferences)
            .ok_or_else(|| BucketError::not_found("none of the preferred backends is supported"))?;
        self.create(&name, config)
    }

    /// Create a driver and wait for it to connect.
    pub async fn open(&self, name: &str, config: &BucketConfig) -> BucketResult<Driver> {
        let driver = self.create(name, config)?;
        driver.init().await?;
        Ok(driver)
    }
}
