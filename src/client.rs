//! Client-side access to the elected configuration server.
//!
//! A [`FailoverClient`] is a per-worker value: it is handed out by a
//! [`ClientFactory`] and passed by `&mut` through the owning worker's
//! context, never shared across threads. A failing rebind on one worker
//! therefore cannot corrupt another worker's in-flight call, at the cost of
//! one bound connection per worker.

use crate::bus::{CallbackId, Notifier, Priority, UpdatePattern};
use crate::cache::{CachedValue, MonitoringCache};
use crate::error::{Error, Result, RpcError};
use crate::finder::ConfigFinder;
use crate::registry::TypeRegistry;
use crate::types::{ConfigValue, LookupKey, ValueSet};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Remote surface of the elected configuration server. The wire protocol
/// behind it is an opaque deployment concern.
#[async_trait]
pub trait Authority: Send + Sync {
    async fn value_set(&self, li: &LookupKey) -> Result<ValueSet>;
    async fn value(&self, li: &LookupKey, key: &str) -> Result<Option<ConfigValue>>;
    async fn set_value_set(&self, li: &LookupKey, vs: &ValueSet) -> Result<()>;
    async fn set_value(&self, li: &LookupKey, key: &str, value: &ConfigValue) -> Result<()>;
    async fn config_types(&self) -> Result<TypeRegistry>;

    /// Liveness probe used when binding.
    async fn is_alive(&self) -> Result<bool>;
}

/// Capability to open an [`Authority`] handle for a server URL.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn Authority>>;
}

/// Builds per-worker [`FailoverClient`] values with shared wiring.
pub struct ClientFactory {
    finder: Arc<ConfigFinder>,
    connector: Arc<dyn Connector>,
    notifier: Notifier,
    cache_capacity: usize,
    attempts: u32,
    rebind_on_leader_change: bool,
}

impl ClientFactory {
    /// Create a factory over the process's finder, connector and notifier.
    pub fn new(
        finder: Arc<ConfigFinder>,
        connector: Arc<dyn Connector>,
        notifier: Notifier,
    ) -> Self {
        Self {
            finder,
            connector,
            notifier,
            cache_capacity: crate::config::DEFAULT_CACHE_CAPACITY,
            attempts: crate::config::DEFAULT_RETRY_ATTEMPTS,
            rebind_on_leader_change: true,
        }
    }

    /// Set the per-client content cache capacity.
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Set the total attempts per call.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    /// Disable rebinding on leader-change notifications; the client then
    /// discovers a new leader only through call failure.
    pub fn with_rebind_on_leader_change(mut self, enabled: bool) -> Self {
        self.rebind_on_leader_change = enabled;
        self
    }

    /// Create a client for one worker.
    pub fn client(&self) -> FailoverClient {
        let pending_rebind = Arc::new(Mutex::new(None));

        let rebind_callback = if self.rebind_on_leader_change {
            let pending = pending_rebind.clone();
            Some(self.notifier.add_callback(
                Some(UpdatePattern::any()),
                Priority::Normal,
                move |event| {
                    if let Some(event) = event {
                        if event.is_server_change() {
                            if let Some(url) = &event.custom_str1 {
                                debug!(url = %url, "leader change announced, scheduling rebind");
                                *pending.lock() = Some(url.clone());
                            }
                        }
                    }
                    Ok(())
                },
            ))
        } else {
            None
        };

        FailoverClient {
            finder: self.finder.clone(),
            connector: self.connector.clone(),
            notifier: self.notifier.clone(),
            cache: MonitoringCache::with_capacity(&self.notifier, self.cache_capacity),
            attempts: self.attempts,
            bound: None,
            pending_rebind,
            rebind_callback,
        }
    }
}

struct Bound {
    url: String,
    handle: Arc<dyn Authority>,
}

/// Failover proxy to the elected configuration server.
///
/// Reads answer from a content cache that bus notifications keep fresh;
/// leader changes rebind the remote handle but never touch the cache, since
/// a new server does not mean new content. Failed calls re-resolve the
/// leader through the finder and retry up to the configured attempt budget.
pub struct FailoverClient {
    finder: Arc<ConfigFinder>,
    connector: Arc<dyn Connector>,
    notifier: Notifier,
    cache: MonitoringCache,
    attempts: u32,
    bound: Option<Bound>,
    /// New leader URL announced on the bus, applied before the next call.
    pending_rebind: Arc<Mutex<Option<String>>>,
    rebind_callback: Option<CallbackId>,
}

impl FailoverClient {
    /// Read a whole value set, from cache when possible.
    pub async fn value_set(&mut self, li: &LookupKey) -> Result<ValueSet> {
        if let Some(CachedValue::Set(vs)) = self.cache.get(li.key_string()) {
            return Ok(vs);
        }

        let vs = self.execute(|a| async move { a.value_set(li).await }).await?;
        self.cache
            .put(li.key_string(), CachedValue::Set(vs.clone()));
        Ok(vs)
    }

    /// Read a single value, from cache when possible.
    pub async fn value(&mut self, li: &LookupKey, key: &str) -> Result<Option<ConfigValue>> {
        let cache_key = li.entry_key_string(key);
        if let Some(CachedValue::Entry(value)) = self.cache.get(&cache_key) {
            return Ok(Some(value));
        }

        let value = self
            .execute(|a| async move { a.value(li, key).await })
            .await?;
        if let Some(value) = &value {
            self.cache.put(cache_key, CachedValue::Entry(value.clone()));
        }
        Ok(value)
    }

    /// Persist a value set's pending changes on the server. The local copy's
    /// pending sets are cleared once the server accepts them.
    pub async fn set_value_set(&mut self, li: &LookupKey, vs: &mut ValueSet) -> Result<()> {
        let to_send: &ValueSet = vs;
        self.execute(|a| async move { a.set_value_set(li, to_send).await })
            .await?;
        vs.clear_pending();
        Ok(())
    }

    /// Persist a single value on the server.
    pub async fn set_value(
        &mut self,
        li: &LookupKey,
        key: &str,
        value: &ConfigValue,
    ) -> Result<()> {
        self.execute(|a| async move { a.set_value(li, key, value).await })
            .await
    }

    /// Fetch the server's configuration type registry.
    pub async fn config_types(&mut self) -> Result<TypeRegistry> {
        self.execute(|a| async move { a.config_types().await }).await
    }

    /// Whether the configuration server currently answers its liveness
    /// probe.
    pub async fn is_alive(&mut self) -> bool {
        self.execute(|a| async move { a.is_alive().await })
            .await
            .unwrap_or(false)
    }

    /// Clear the content cache and force a fresh bind on the next call.
    pub fn reset(&mut self) {
        self.cache.clear();
        self.bound = None;
    }

    /// Number of cached content entries. Exposed so embedders can verify
    /// cache behavior across rebinds.
    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    /// Run one call with rebinding and bounded retries.
    async fn execute<T, F, Fut>(&mut self, mut call: F) -> Result<T>
    where
        F: FnMut(Arc<dyn Authority>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_err: Option<Error> = None;

        for attempt in 1..=self.attempts {
            if let Err(e) = self.ensure_bound().await {
                warn!(attempt, error = %e, "binding to config server failed");
                last_err = Some(e);
                self.drop_bind_and_reelect().await;
                continue;
            }

            let outcome = match &self.bound {
                Some(bound) => call(bound.handle.clone()).await,
                None => continue,
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    warn!(attempt, error = %e, "config server call failed, re-resolving");
                    last_err = Some(e);
                    self.drop_bind_and_reelect().await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::RetriesExhausted {
            attempts: self.attempts,
            source: Box::new(
                last_err.unwrap_or_else(|| Error::Internal("no attempt was made".to_string())),
            ),
        })
    }

    /// Make sure a live authority handle is bound, honoring any leader
    /// change announced since the last call.
    async fn ensure_bound(&mut self) -> Result<()> {
        if let Some(next_url) = self.pending_rebind.lock().take() {
            let stale = self
                .bound
                .as_ref()
                .is_some_and(|bound| bound.url != next_url);
            if stale {
                debug!(url = %next_url, "rebinding to announced config server");
                self.bound = None;
                return self.bind(&next_url).await;
            }
        }

        if self.bound.is_some() {
            return Ok(());
        }

        let url = self.finder.server_url().await?;
        self.bind(&url).await
    }

    async fn bind(&mut self, url: &str) -> Result<()> {
        let handle = self.connector.connect(url).await?;
        match handle.is_alive().await {
            Ok(true) => {}
            Ok(false) => {
                return Err(RpcError::NotAlive {
                    url: url.to_string(),
                }
                .into())
            }
            Err(e) => return Err(e),
        }

        self.bound = Some(Bound {
            url: url.to_string(),
            handle: Arc::from(handle),
        });
        Ok(())
    }

    /// Drop the failed bind and mark the leader slot for re-election so the
    /// next attempt resolves a fresh authority.
    async fn drop_bind_and_reelect(&mut self) {
        self.bound = None;
        if let Err(e) = self.finder.reset().await {
            warn!(error = %e, "could not mark leader slot for re-election");
        }
    }
}

impl Drop for FailoverClient {
    fn drop(&mut self) {
        if let Some(id) = self.rebind_callback {
            self.notifier.remove_callback(id);
        }
    }
}
