//! Authority-side serving stack: caching read path, notifying write path,
//! and the client-facing API of the elected configuration server.

use crate::adapter::{AdapterDispatch, ValueReader, ValueWriter};
use crate::bus::{Notifier, UpdateEvent};
use crate::cache::{CachedValue, MonitoringCache};
use crate::config::NodeConfig;
use crate::error::{CoordinationError, Result};
use crate::finder::ConfigFinder;
use crate::registry::TypeRegistry;
use crate::types::{ConfigValue, LookupKey, ValueSet};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Read decorator that answers from a [`MonitoringCache`] and populates it on
/// miss. Stale entries leave the cache through bus notifications, not through
/// this type.
pub struct CachedReader {
    cache: MonitoringCache,
    inner: Arc<dyn ValueReader>,
}

impl CachedReader {
    /// Wrap a reader with a monitoring cache of the given capacity.
    pub fn new(inner: Arc<dyn ValueReader>, notifier: &Notifier, capacity: usize) -> Self {
        Self {
            cache: MonitoringCache::with_capacity(notifier, capacity),
            inner,
        }
    }

    /// Drop all cached values.
    pub fn reset(&self) {
        self.cache.clear();
    }
}

#[async_trait]
impl ValueReader for CachedReader {
    async fn value_set(&self, li: &LookupKey) -> Result<ValueSet> {
        let key = li.key_string();
        if let Some(CachedValue::Set(vs)) = self.cache.get(key) {
            return Ok(vs);
        }

        let vs = self.inner.value_set(li).await?;
        self.cache.put(key, CachedValue::Set(vs.clone()));
        Ok(vs)
    }

    async fn value(&self, li: &LookupKey, key: &str) -> Result<Option<ConfigValue>> {
        let cache_key = li.entry_key_string(key);
        if let Some(CachedValue::Entry(value)) = self.cache.get(&cache_key) {
            return Ok(Some(value));
        }

        let value = self.inner.value(li, key).await?;
        if let Some(value) = &value {
            self.cache.put(cache_key, CachedValue::Entry(value.clone()));
        }
        Ok(value)
    }
}

/// Write decorator that broadcasts a config-change notification after each
/// successful persist, so every monitoring cache in the group evicts the
/// stale key.
pub struct NotifyingWriter {
    inner: Arc<dyn ValueWriter>,
    notifier: Notifier,
}

impl NotifyingWriter {
    /// Wrap a writer.
    pub fn new(inner: Arc<dyn ValueWriter>, notifier: Notifier) -> Self {
        Self { inner, notifier }
    }

    /// Persist a value set's pending changes, clear its pending sets, and
    /// announce the change.
    pub async fn set_value_set(&self, li: &LookupKey, vs: &mut ValueSet) -> Result<()> {
        self.inner.set_value_set(li, vs).await?;
        vs.clear_pending();
        self.notify(li).await
    }

    /// Persist a single value and announce the change.
    pub async fn set_value(&self, li: &LookupKey, key: &str, value: &ConfigValue) -> Result<()> {
        self.inner.set_value(li, key, value).await?;
        self.notify(li).await
    }

    async fn notify(&self, li: &LookupKey) -> Result<()> {
        debug!(key = %li.key_string(), "announcing config change");
        self.notifier
            .publish(&UpdateEvent::config_change(li.key_string()))
            .await
    }
}

/// The elected configuration server's serving surface.
///
/// Composes the caching read path and the notifying write path over the
/// adapter dispatch. Every serving call first verifies this host still is the
/// elected leader; a node serving after losing an election would hand out
/// data no invalidation traffic protects.
pub struct ConfigAuthority {
    host: String,
    finder: Arc<ConfigFinder>,
    dispatch: Arc<AdapterDispatch>,
    reader: Arc<dyn ValueReader>,
    read_cache: Option<Arc<CachedReader>>,
    writer: NotifyingWriter,
}

impl ConfigAuthority {
    /// Assemble the serving stack for a node. The read cache is skipped when
    /// the node config disables it.
    pub fn new(
        config: &NodeConfig,
        finder: Arc<ConfigFinder>,
        dispatch: Arc<AdapterDispatch>,
        notifier: &Notifier,
    ) -> Self {
        let (reader, read_cache): (Arc<dyn ValueReader>, _) = if config.cache_enabled {
            let cached = Arc::new(CachedReader::new(
                dispatch.clone(),
                notifier,
                config.cache_capacity,
            ));
            (cached.clone(), Some(cached))
        } else {
            (dispatch.clone(), None)
        };

        info!(host = %config.host, cached = config.cache_enabled, "config authority ready");
        Self {
            host: config.host.clone(),
            finder,
            dispatch: dispatch.clone(),
            reader,
            read_cache,
            writer: NotifyingWriter::new(dispatch, notifier.clone()),
        }
    }

    /// This node's identity.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Read a whole value set.
    pub async fn value_set(&self, li: &LookupKey) -> Result<ValueSet> {
        self.ensure_active().await?;
        self.reader.value_set(li).await
    }

    /// Read a single value.
    pub async fn value(&self, li: &LookupKey, key: &str) -> Result<Option<ConfigValue>> {
        self.ensure_active().await?;
        self.reader.value(li, key).await
    }

    /// Persist a value set's pending changes and notify the group.
    pub async fn set_value_set(&self, li: &LookupKey, vs: &mut ValueSet) -> Result<()> {
        self.ensure_active().await?;
        self.writer.set_value_set(li, vs).await
    }

    /// Persist a single value and notify the group.
    pub async fn set_value(&self, li: &LookupKey, key: &str, value: &ConfigValue) -> Result<()> {
        self.ensure_active().await?;
        self.writer.set_value(li, key, value).await
    }

    /// The configuration types this authority serves.
    pub async fn config_types(&self) -> Result<TypeRegistry> {
        self.ensure_active().await?;
        Ok(self.dispatch.types())
    }

    /// Flush the read cache and drop cached adapter instances.
    pub fn reset(&self) {
        if let Some(cache) = &self.read_cache {
            cache.reset();
        }
        self.dispatch.reset();
    }

    /// Liveness probe for the client failover path.
    pub fn is_alive(&self) -> bool {
        true
    }

    async fn ensure_active(&self) -> Result<()> {
        let leader = self.finder.server_url().await?;
        if leader != self.host {
            return Err(CoordinationError::NotActiveServer {
                host: self.host.clone(),
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use crate::coordination::{CoordinationStore, InMemoryStore, LEADER_KEY};
    use crate::error::Error;
    use crate::registry::{AdapterId, AdapterRegistry, ConfigType};
    use crate::testing::{wait_until, MemoryAdapter, StaticFinderTransport};
    use crate::types::Medium;

    const MEM: AdapterId = AdapterId::from_static("mem");

    struct Fixture {
        authority: ConfigAuthority,
        backing: Arc<MemoryAdapter>,
        notifier: Notifier,
        store: Arc<InMemoryStore>,
    }

    async fn fixture(config: NodeConfig) -> Fixture {
        let notifier = Notifier::start(Arc::new(LocalBus::new()));
        let store = Arc::new(InMemoryStore::new());
        store.put(LEADER_KEY, &config.host).await.unwrap();

        let backing = Arc::new(MemoryAdapter::new());
        let mut registry = AdapterRegistry::new();
        let reader = backing.clone();
        registry.register_reader(MEM, move || reader.clone());
        let writer = backing.clone();
        registry.register_writer(MEM, move || writer.clone());
        let types = TypeRegistry::new([ConfigType::new("props")
            .with_getter(Medium::File, MEM)
            .with_setter(Medium::File, MEM)]);
        let dispatch = Arc::new(AdapterDispatch::new(types, registry));

        let finder = Arc::new(
            ConfigFinder::from_config(
                &config,
                store.clone(),
                &notifier,
                Arc::new(StaticFinderTransport::default()),
            )
            .await
            .unwrap(),
        );

        Fixture {
            authority: ConfigAuthority::new(&config, finder, dispatch, &notifier),
            backing,
            notifier,
            store,
        }
    }

    fn grouped_config(host: &str) -> NodeConfig {
        NodeConfig::new(host)
            .with_group("prod")
            .with_candidate(true)
            .with_election_wait(std::time::Duration::ZERO)
    }

    #[tokio::test]
    async fn test_cached_reader_populates_on_miss() {
        let f = fixture(grouped_config("node-a")).await;
        let li = LookupKey::new("props");
        f.backing.seed_value(&li, "k", "v");

        assert_eq!(
            f.authority.value(&li, "k").await.unwrap(),
            Some(ConfigValue::from("v"))
        );
        assert_eq!(
            f.authority.value(&li, "k").await.unwrap(),
            Some(ConfigValue::from("v"))
        );
        // Second read was served from the cache.
        assert_eq!(f.backing.read_count(), 1);
    }

    #[tokio::test]
    async fn test_write_invalidates_cached_read_in_same_process() {
        let f = fixture(grouped_config("node-a")).await;
        let li = LookupKey::new("props");
        f.backing.seed_value(&li, "x", "old");

        assert_eq!(
            f.authority.value(&li, "x").await.unwrap(),
            Some(ConfigValue::from("old"))
        );
        assert_eq!(f.backing.read_count(), 1);

        let before = f.notifier.dispatched();
        f.authority
            .set_value(&li, "x", &ConfigValue::from("new"))
            .await
            .unwrap();
        wait_until(|| f.notifier.dispatched() > before).await;

        // The cached entry was evicted, so the next read hits the adapter.
        assert_eq!(
            f.authority.value(&li, "x").await.unwrap(),
            Some(ConfigValue::from("new"))
        );
        assert_eq!(f.backing.read_count(), 2);
    }

    #[tokio::test]
    async fn test_set_value_set_clears_pending_and_persists() {
        let f = fixture(grouped_config("node-a")).await;
        let li = LookupKey::new("props");

        let mut vs = ValueSet::new("props");
        vs.update("a", 1);
        vs.reset_value("b");
        f.authority.set_value_set(&li, &mut vs).await.unwrap();

        assert!(vs.updated().is_empty());
        assert!(vs.reset().is_empty());
        assert_eq!(f.backing.write_count(), 1);
    }

    #[tokio::test]
    async fn test_not_active_server_refuses_to_serve() {
        let f = fixture(grouped_config("node-a")).await;
        f.store.put(LEADER_KEY, "node-b").await.unwrap();

        let err = f
            .authority
            .value(&LookupKey::new("props"), "k")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Coordination(CoordinationError::NotActiveServer { .. })
        ));
    }

    #[tokio::test]
    async fn test_uncached_reader_hits_adapter_every_time() {
        let f = fixture(grouped_config("node-a").with_cache_enabled(false)).await;
        let li = LookupKey::new("props");
        f.backing.seed_value(&li, "k", "v");

        f.authority.value(&li, "k").await.unwrap();
        f.authority.value(&li, "k").await.unwrap();
        assert_eq!(f.backing.read_count(), 2);
    }

    #[tokio::test]
    async fn test_reset_flushes_read_cache() {
        let f = fixture(grouped_config("node-a")).await;
        let li = LookupKey::new("props");
        f.backing.seed_value(&li, "k", "v");

        f.authority.value(&li, "k").await.unwrap();
        f.authority.reset();
        f.authority.value(&li, "k").await.unwrap();
        assert_eq!(f.backing.read_count(), 2);
    }
}
