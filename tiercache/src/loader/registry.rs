//! Per-orchestrator loader registry.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::Loader;

/// Maps namespaces to the loaders that serve them.
///
/// Lookups take a read lock and clone an `Arc`, so the lock is never held
/// while a loader runs.
pub struct LoaderRegistry<V> {
    loaders: RwLock<HashMap<String, Arc<dyn Loader<V>>>>,
}

impl<V> LoaderRegistry<V> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            loaders: RwLock::new(HashMap::new()),
        }
    }

    /// Register `loader` under its name, replacing any previous loader.
    ///
    /// Returns the replaced loader, if any.
    pub fn register(&self, loader: Arc<dyn Loader<V>>) -> Option<Arc<dyn Loader<V>>> {
        let namespace = loader.name().to_string();
        let previous = self.loaders.write().insert(namespace.clone(), loader);
        debug!(
            namespace = %namespace,
            replaced = previous.is_some(),
            "Registered loader"
        );
        previous
    }

    /// The loader serving `namespace`.
    pub fn lookup(&self, namespace: &str) -> Option<Arc<dyn Loader<V>>> {
        self.loaders.read().get(namespace).cloned()
    }

    /// Remove the loader serving `namespace`.
    pub fn unregister(&self, namespace: &str) -> Option<Arc<dyn Loader<V>>> {
        self.loaders.write().remove(namespace)
    }

    /// Registered namespaces, sorted.
    pub fn namespaces(&self) -> Vec<String> {
        let mut namespaces: Vec<String> = self.loaders.read().keys().cloned().collect();
        namespaces.sort();
        namespaces
    }

    pub fn len(&self) -> usize {
        self.loaders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.read().is_empty()
    }
}

impl<V> Default for LoaderRegistry<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> std::fmt::Debug for LoaderRegistry<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderRegistry")
            .field("namespaces", &self.namespaces())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{FnLoader, LoadError};
    use crate::query::Query;

    fn constant(name: &str, value: u32) -> Arc<dyn Loader<u32>> {
        Arc::new(FnLoader::new(name, move |_query: Query| async move {
            Ok::<_, LoadError>(value)
        }))
    }

    #[tokio::test]
    async fn test_registry_register_and_lookup() {
        let registry = LoaderRegistry::new();
        assert!(registry.register(constant("user", 1)).is_none());

        let loader = registry.lookup("user").unwrap();
        let value = loader.load(&Query::new("user", ["1"])).await.unwrap();
        assert_eq!(value, 1);
        assert!(registry.lookup("order").is_none());
    }

    #[tokio::test]
    async fn test_registry_replaces_by_name() {
        let registry = LoaderRegistry::new();
        registry.register(constant("user", 1));
        let previous = registry.register(constant("user", 2));

        assert!(previous.is_some());
        assert_eq!(registry.len(), 1);

        let loader = registry.lookup("user").unwrap();
        let value = loader.load(&Query::new("user", ["1"])).await.unwrap();
        assert_eq!(value, 2);
    }

    #[test]
    fn test_registry_unregister_and_namespaces() {
        let registry = LoaderRegistry::new();
        registry.register(constant("user", 1));
        registry.register(constant("account", 2));

        assert_eq!(registry.namespaces(), vec!["account", "user"]);
        assert!(registry.unregister("user").is_some());
        assert!(registry.unregister("user").is_none());
        assert_eq!(registry.namespaces(), vec!["account"]);
        assert!(!registry.is_empty());
    }
}
