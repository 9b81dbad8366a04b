//! Bounded LRU cache that evicts itself on bus notifications.

use crate::bus::{Notifier, Priority, UpdateEvent};
use crate::config::DEFAULT_CACHE_CAPACITY;
use crate::types::{ConfigValue, ValueSet};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::{Arc, Weak};
use tracing::debug;

/// A value held by a [`MonitoringCache`]: either a whole value set or one
/// entry of it.
#[derive(Debug, Clone)]
pub enum CachedValue {
    Set(ValueSet),
    Entry(ConfigValue),
}

/// A bounded LRU map keyed by canonical lookup strings that registers itself
/// on a [`Notifier`] and evicts stale entries when change notifications
/// arrive.
///
/// Eviction rules: a config-change event carrying a key evicts every entry
/// whose key starts with it (a value-set change invalidates its single-entry
/// keys too); a content event without a key, or the generic frame, clears
/// everything; leader-change events are ignored, since they say nothing about
/// content.
pub struct MonitoringCache {
    inner: Arc<Mutex<LruCache<String, CachedValue>>>,
    notifier: Notifier,
    callback_id: crate::bus::CallbackId,
}

impl MonitoringCache {
    /// Create a cache with the default capacity.
    pub fn new(notifier: &Notifier) -> Self {
        Self::with_capacity(notifier, DEFAULT_CACHE_CAPACITY)
    }

    /// Create a cache bounded to `capacity` entries.
    pub fn with_capacity(notifier: &Notifier, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        let inner = Arc::new(Mutex::new(LruCache::new(capacity)));

        let watched: Weak<Mutex<LruCache<String, CachedValue>>> = Arc::downgrade(&inner);
        let callback_id = notifier.add_callback(None, Priority::Normal, move |event| {
            if let Some(inner) = watched.upgrade() {
                apply_invalidation(&inner, event);
            }
            Ok(())
        });

        Self {
            inner,
            notifier: notifier.clone(),
            callback_id,
        }
    }

    /// Look up a key, refreshing its recency.
    pub fn get(&self, key: &str) -> Option<CachedValue> {
        self.inner.lock().get(key).cloned()
    }

    /// Insert a value, evicting the least recently used entry if full.
    pub fn put(&self, key: impl Into<String>, value: CachedValue) {
        self.inner.lock().put(key.into(), value);
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Drop for MonitoringCache {
    fn drop(&mut self) {
        self.notifier.remove_callback(self.callback_id);
    }
}

fn apply_invalidation(
    cache: &Mutex<LruCache<String, CachedValue>>,
    event: Option<&UpdateEvent>,
) {
    match event {
        None => {
            debug!("generic update, clearing monitoring cache");
            cache.lock().clear();
        }
        Some(event) if event.is_server_change() => {
            // Only the serving node changed; cached content stays valid.
        }
        Some(event) => match event.custom_str1.as_deref() {
            Some(key) => remove_prefixed(cache, key),
            None => {
                debug!("config change without key, clearing monitoring cache");
                cache.lock().clear();
            }
        },
    }
}

/// Remove every entry whose key starts with `prefix`, so a value-set change
/// also takes out its entry-qualified keys.
fn remove_prefixed(cache: &Mutex<LruCache<String, CachedValue>>, prefix: &str) {
    let mut cache = cache.lock();
    let stale: Vec<String> = cache
        .iter()
        .filter(|(k, _)| k.starts_with(prefix))
        .map(|(k, _)| k.clone())
        .collect();
    for key in &stale {
        cache.pop(key);
    }
    if !stale.is_empty() {
        debug!(prefix, evicted = stale.len(), "evicted stale cache entries");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{LocalBus, UpdateEvent};
    use crate::testing::wait_until;

    fn entry(v: &str) -> CachedValue {
        CachedValue::Entry(ConfigValue::from(v))
    }

    fn notifier() -> Notifier {
        Notifier::start(Arc::new(LocalBus::new()))
    }

    #[tokio::test]
    async fn test_lru_eviction_at_capacity() {
        let notifier = notifier();
        let cache = MonitoringCache::with_capacity(&notifier, 3);

        cache.put("a", entry("one"));
        cache.put("b", entry("two"));
        cache.put("c", entry("three"));
        assert_eq!(cache.len(), 3);

        // Touch "a" so "b" is the least recently used.
        cache.get("a");
        cache.put("d", entry("four"));

        assert_eq!(cache.len(), 3);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
    }

    #[tokio::test]
    async fn test_prefix_eviction_on_config_change() {
        let notifier = notifier();
        let cache = MonitoringCache::with_capacity(&notifier, 10);

        cache.put("T$$org#a", entry("1"));
        cache.put("T$$org#b", entry("2"));
        cache.put("T$$org", entry("3"));
        cache.put("other$", entry("4"));

        notifier
            .publish(&UpdateEvent::config_change("T$$org"))
            .await
            .unwrap();
        wait_until(|| notifier.dispatched() >= 1).await;

        assert!(cache.get("T$$org#a").is_none());
        assert!(cache.get("T$$org#b").is_none());
        assert!(cache.get("T$$org").is_none());
        assert!(cache.get("other$").is_some());
    }

    #[tokio::test]
    async fn test_config_change_without_key_clears_all() {
        let notifier = notifier();
        let cache = MonitoringCache::with_capacity(&notifier, 10);
        cache.put("a", entry("1"));
        cache.put("b", entry("2"));

        let mut event = UpdateEvent::default();
        event.custom_long1 = crate::bus::CONFIG_CHANGE_CODE;
        notifier.publish(&event).await.unwrap();
        wait_until(|| notifier.dispatched() >= 1).await;

        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_generic_frame_clears_all() {
        let notifier = notifier();
        let cache = MonitoringCache::with_capacity(&notifier, 10);
        cache.put("a", entry("1"));

        notifier.publish_generic().await.unwrap();
        wait_until(|| notifier.dispatched() >= 1).await;

        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_server_change_is_ignored() {
        let notifier = notifier();
        let cache = MonitoringCache::with_capacity(&notifier, 10);
        cache.put("T$", entry("1"));

        notifier
            .publish(&UpdateEvent::server_change("node-b"))
            .await
            .unwrap();
        wait_until(|| notifier.dispatched() >= 1).await;

        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_drop_unregisters_callback() {
        let notifier = notifier();
        {
            let cache = MonitoringCache::with_capacity(&notifier, 10);
            cache.put("a", entry("1"));
        }
        // The dropped cache's callback must not fire (or panic) on the next
        // notification.
        notifier
            .publish(&UpdateEvent::config_change("a"))
            .await
            .unwrap();
        wait_until(|| notifier.dispatched() >= 1).await;
    }
}
