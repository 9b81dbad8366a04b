//! Storage adapter capability and per-type dispatch.
//!
//! Adapters perform the real persistent read/write of a value set for one
//! (configuration type, medium) pair. The dispatch layer resolves which
//! adapter serves a lookup, instantiates it through the constructor registry,
//! and caches one instance per (type, medium, direction) triple.

use crate::error::{ConfigurationError, Result};
use crate::registry::{AdapterRegistry, ConfigType, TypeRegistry};
use crate::types::{ConfigValue, LookupKey, Medium, ValueSet};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Read side of the storage adapter capability.
#[async_trait]
pub trait ValueReader: Send + Sync {
    /// Read the whole value set for a lookup.
    async fn value_set(&self, li: &LookupKey) -> Result<ValueSet>;

    /// Read a single value. Equivalent to reading the set and picking the
    /// entry, but lets adapters avoid materializing everything.
    async fn value(&self, li: &LookupKey, key: &str) -> Result<Option<ConfigValue>>;
}

/// Write side of the storage adapter capability.
#[async_trait]
pub trait ValueWriter: Send + Sync {
    /// Persist a value set's pending changes.
    async fn set_value_set(&self, li: &LookupKey, vs: &ValueSet) -> Result<()>;

    /// Persist a single value.
    async fn set_value(&self, li: &LookupKey, key: &str, value: &ConfigValue) -> Result<()>;
}

/// Resolves and caches the adapter serving each lookup.
pub struct AdapterDispatch {
    types: RwLock<TypeRegistry>,
    registry: AdapterRegistry,
    readers: Mutex<HashMap<(String, Medium), Arc<dyn ValueReader>>>,
    writers: Mutex<HashMap<(String, Medium), Arc<dyn ValueWriter>>>,
}

impl AdapterDispatch {
    /// Create a dispatch over the given type and adapter registries.
    pub fn new(types: TypeRegistry, registry: AdapterRegistry) -> Self {
        Self {
            types: RwLock::new(types),
            registry,
            readers: Mutex::new(HashMap::new()),
            writers: Mutex::new(HashMap::new()),
        }
    }

    /// Snapshot of the configuration types this dispatch serves.
    pub fn types(&self) -> TypeRegistry {
        self.types.read().clone()
    }

    /// Drop all cached adapter instances. The next lookup re-instantiates
    /// through the constructor registry.
    pub fn reset(&self) {
        self.readers.lock().clear();
        self.writers.lock().clear();
        debug!("storage adapter instances dropped");
    }

    /// Install a freshly loaded type registry, dropping every adapter
    /// instance bound under the old one.
    pub fn replace_types(&self, types: TypeRegistry) {
        info!(types = types.len(), "replacing configuration type registry");
        *self.types.write() = types;
        self.reset();
    }

    /// Resolve the config type and effective medium for a lookup: the
    /// lookup's hint when present, the type's default otherwise.
    fn resolve(&self, li: &LookupKey) -> Result<(ConfigType, Medium)> {
        let types = self.types.read();
        let ty = types
            .get(li.config_type_name())
            .ok_or_else(|| ConfigurationError::UnknownType(li.config_type_name().to_string()))?;
        let medium = match li.medium() {
            Medium::Unknown => ty.default_medium(),
            hinted => hinted,
        };
        Ok((ty.clone(), medium))
    }

    fn reader_for(&self, li: &LookupKey) -> Result<Arc<dyn ValueReader>> {
        let (ty, medium) = self.resolve(li)?;
        let cache_key = (ty.name().to_string(), medium);

        if let Some(adapter) = self.readers.lock().get(&cache_key) {
            return Ok(adapter.clone());
        }

        let id = ty.getter(medium).ok_or_else(|| {
            let err = ConfigurationError::NoAdapterBound {
                config_type: ty.name().to_string(),
                medium,
                direction: "getter",
            };
            error!("{err}");
            err
        })?;
        let adapter = self
            .registry
            .reader(id)
            .ok_or_else(|| ConfigurationError::UnknownAdapter(id.to_string()))?;

        self.readers.lock().insert(cache_key, adapter.clone());
        Ok(adapter)
    }

    fn writer_for(&self, li: &LookupKey) -> Result<Arc<dyn ValueWriter>> {
        let (ty, medium) = self.resolve(li)?;
        let cache_key = (ty.name().to_string(), medium);

        if let Some(adapter) = self.writers.lock().get(&cache_key) {
            return Ok(adapter.clone());
        }

        let id = ty.setter(medium).ok_or_else(|| {
            let err = ConfigurationError::NoAdapterBound {
                config_type: ty.name().to_string(),
                medium,
                direction: "setter",
            };
            error!("{err}");
            err
        })?;
        let adapter = self
            .registry
            .writer(id)
            .ok_or_else(|| ConfigurationError::UnknownAdapter(id.to_string()))?;

        self.writers.lock().insert(cache_key, adapter.clone());
        Ok(adapter)
    }
}

#[async_trait]
impl ValueReader for AdapterDispatch {
    async fn value_set(&self, li: &LookupKey) -> Result<ValueSet> {
        self.reader_for(li)?.value_set(li).await
    }

    async fn value(&self, li: &LookupKey, key: &str) -> Result<Option<ConfigValue>> {
        self.reader_for(li)?.value(li, key).await
    }
}

#[async_trait]
impl ValueWriter for AdapterDispatch {
    async fn set_value_set(&self, li: &LookupKey, vs: &ValueSet) -> Result<()> {
        self.writer_for(li)?.set_value_set(li, vs).await
    }

    async fn set_value(&self, li: &LookupKey, key: &str, value: &ConfigValue) -> Result<()> {
        self.writer_for(li)?.set_value(li, key, value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::registry::AdapterId;
    use crate::testing::MemoryAdapter;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MEM: AdapterId = AdapterId::from_static("mem");

    fn dispatch_with(backing: Arc<MemoryAdapter>) -> AdapterDispatch {
        let mut registry = AdapterRegistry::new();
        let reader = backing.clone();
        registry.register_reader(MEM, move || reader.clone());
        let writer = backing;
        registry.register_writer(MEM, move || writer.clone());

        let types = TypeRegistry::new([ConfigType::new("props")
            .with_getter(Medium::File, MEM)
            .with_setter(Medium::File, MEM)
            .with_getter(Medium::Db, MEM)]);
        AdapterDispatch::new(types, registry)
    }

    #[tokio::test]
    async fn test_dispatch_reads_and_writes_through_adapter() {
        let backing = Arc::new(MemoryAdapter::new());
        let dispatch = dispatch_with(backing.clone());
        let li = LookupKey::new("props");

        dispatch
            .set_value(&li, "greeting", &ConfigValue::from("hello"))
            .await
            .unwrap();
        let value = dispatch.value(&li, "greeting").await.unwrap();
        assert_eq!(value, Some(ConfigValue::from("hello")));
        assert_eq!(backing.write_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_type_is_fatal() {
        let dispatch = dispatch_with(Arc::new(MemoryAdapter::new()));
        let li = LookupKey::new("not-configured");

        let err = dispatch.value_set(&li).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::UnknownType(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_binding_is_fatal() {
        let dispatch = dispatch_with(Arc::new(MemoryAdapter::new()));
        // The Db medium has a getter but no setter bound.
        let li = LookupKey::new("props").with_medium(Medium::Db);

        let err = dispatch
            .set_value(&li, "k", &ConfigValue::from(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::NoAdapterBound {
                direction: "setter",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_medium_hint_overrides_type_default() {
        let backing = Arc::new(MemoryAdapter::new());
        let dispatch = dispatch_with(backing.clone());

        let hinted = LookupKey::new("props").with_medium(Medium::Db);
        dispatch.value_set(&hinted).await.unwrap();
        assert_eq!(backing.read_count(), 1);
    }

    #[tokio::test]
    async fn test_adapter_instances_are_cached_until_reset() {
        let constructed = Arc::new(AtomicUsize::new(0));
        let mut registry = AdapterRegistry::new();
        let counter = constructed.clone();
        registry.register_reader(MEM, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Arc::new(MemoryAdapter::new())
        });

        let types =
            TypeRegistry::new([ConfigType::new("props").with_getter(Medium::File, MEM)]);
        let dispatch = AdapterDispatch::new(types, registry);
        let li = LookupKey::new("props");

        dispatch.value_set(&li).await.unwrap();
        dispatch.value_set(&li).await.unwrap();
        assert_eq!(constructed.load(Ordering::SeqCst), 1);

        dispatch.reset();
        dispatch.value_set(&li).await.unwrap();
        assert_eq!(constructed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_replace_types_installs_new_registry() {
        let dispatch = dispatch_with(Arc::new(MemoryAdapter::new()));
        let li = LookupKey::new("props");
        dispatch.value_set(&li).await.unwrap();

        dispatch.replace_types(TypeRegistry::new([ConfigType::new("other")]));

        // "props" is gone from the new registry.
        let err = dispatch.value_set(&li).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::UnknownType(_))
        ));
        assert_eq!(dispatch.types().len(), 1);
    }
}
