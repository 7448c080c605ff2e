//! Store Registry
//!
//! Hands out one shared [`Store`] per namespace, so every part of a process
//! that names the same namespace goes through the same writer region.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::config::{validate_namespace, Config};
use crate::engine::Store;
use crate::error::Result;

/// Namespace → open store
///
/// Holds weak references: a store is closed once its last `Arc` is dropped,
/// and the next `open` recovers it from disk again.
pub struct StoreRegistry {
    base: Config,
    stores: Mutex<HashMap<String, Weak<Store>>>,
}

impl StoreRegistry {
    /// Create a registry; `base` supplies everything but the namespace
    pub fn new(base: Config) -> Self {
        Self {
            base,
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// Open a namespace, or return the store already open for it
    pub fn open(&self, namespace: &str) -> Result<Arc<Store>> {
        validate_namespace(namespace)?;

        // Held across Store::open so two callers cannot race to open the
        // same log twice
        let mut stores = self.stores.lock();
        if let Some(store) = stores.get(namespace).and_then(Weak::upgrade) {
            return Ok(store);
        }

        let mut config = self.base.clone();
        config.namespace = namespace.to_string();

        let store = Arc::new(Store::open(config)?);
        stores.insert(namespace.to_string(), Arc::downgrade(&store));
        tracing::debug!("Registered store {:?}", namespace);
        Ok(store)
    }

    /// Namespaces with a store currently open
    pub fn open_namespaces(&self) -> Vec<String> {
        let mut stores = self.stores.lock();
        stores.retain(|_, store| store.strong_count() > 0);

        let mut names: Vec<_> = stores.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn base_config(&self) -> &Config {
        &self.base
    }
}
