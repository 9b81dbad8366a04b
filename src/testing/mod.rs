//! Test doubles and helpers for the configuration service.
//!
//! Everything here runs in-process: adapters over a shared map, finder
//! transports over a lookup table, and scripted authorities that fail on
//! demand. Integration scenarios wiring whole groups together live in the
//! sibling test modules.


use crate::adapter::{ValueReader, ValueWriter};
use crate::client::{Authority, Connector};
use crate::elector::FinderTransport;
use crate::error::{ConfigurationError, Result, RpcError};
use crate::finder::ConfigFinder;
use crate::registry::TypeRegistry;
use crate::server::ConfigAuthority;
use crate::types::{ConfigValue, LookupKey, ValueSet};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Poll `cond` until it holds, panicking after a generous timeout. Keeps
/// notification-delivery tests free of guessed sleeps.
pub async fn wait_until(cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        if Instant::now() > deadline {
            panic!("condition not reached within timeout");
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Storage adapter over an in-process map, counting reads and writes so
/// tests can prove cache hits and misses.
#[derive(Default)]
pub struct MemoryAdapter {
    data: DashMap<String, ValueSet>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryAdapter {
    /// Create an empty adapter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a whole value set without touching the counters.
    pub fn seed(&self, li: &LookupKey, vs: ValueSet) {
        self.data.insert(li.key_string().to_string(), vs);
    }

    /// Seed a single value without touching the counters.
    pub fn seed_value(&self, li: &LookupKey, key: &str, value: impl Into<ConfigValue>) {
        self.data
            .entry(li.key_string().to_string())
            .or_insert_with(|| ValueSet::new(li.config_type_name()))
            .put(key, value);
    }

    /// Number of adapter-level reads performed.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of adapter-level writes performed.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ValueReader for MemoryAdapter {
    async fn value_set(&self, li: &LookupKey) -> Result<ValueSet> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .data
            .get(li.key_string())
            .map(|e| e.value().clone())
            .unwrap_or_else(|| ValueSet::new(li.config_type_name())))
    }

    async fn value(&self, li: &LookupKey, key: &str) -> Result<Option<ConfigValue>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .data
            .get(li.key_string())
            .and_then(|e| e.value().get(key).cloned()))
    }
}

#[async_trait]
impl ValueWriter for MemoryAdapter {
    async fn set_value_set(&self, li: &LookupKey, vs: &ValueSet) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.data.insert(li.key_string().to_string(), vs.clone());
        Ok(())
    }

    async fn set_value(&self, li: &LookupKey, key: &str, value: &ConfigValue) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.data
            .entry(li.key_string().to_string())
            .or_insert_with(|| ValueSet::new(li.config_type_name()))
            .put(key, value.clone());
        Ok(())
    }
}

/// Finder transport answering from a fixed host-to-leader table. Hosts
/// missing from the table are unreachable.
#[derive(Default)]
pub struct StaticFinderTransport {
    table: HashMap<String, String>,
}

impl StaticFinderTransport {
    /// Build a transport from (candidate, answer) pairs.
    pub fn new<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            table: entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

#[async_trait]
impl FinderTransport for StaticFinderTransport {
    async fn fetch_server_url(&self, candidate: &str) -> Result<String> {
        self.table.get(candidate).cloned().ok_or_else(|| {
            RpcError::Unreachable {
                url: candidate.to_string(),
                reason: "not in transport table".to_string(),
            }
            .into()
        })
    }
}

/// Finder transport routing to live in-process finders, for simulated
/// multi-node groups. Unregistered hosts are unreachable, which doubles as a
/// crashed-node simulation.
#[derive(Default)]
pub struct FinderTable {
    finders: Mutex<HashMap<String, Arc<ConfigFinder>>>,
}

impl FinderTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `host` to a live finder.
    pub fn register(&self, host: &str, finder: Arc<ConfigFinder>) {
        self.finders.lock().insert(host.to_string(), finder);
    }

    /// Make `host` unreachable.
    pub fn unregister(&self, host: &str) {
        self.finders.lock().remove(host);
    }
}

#[async_trait]
impl FinderTransport for FinderTable {
    async fn fetch_server_url(&self, candidate: &str) -> Result<String> {
        let finder = self.finders.lock().get(candidate).cloned();
        match finder {
            Some(finder) => finder.server_url().await,
            None => Err(RpcError::Unreachable {
                url: candidate.to_string(),
                reason: "host down".to_string(),
            }
            .into()),
        }
    }
}

struct ScriptedInner {
    adapter: MemoryAdapter,
    fail_remaining: AtomicUsize,
    unknown_type: bool,
    calls: AtomicUsize,
}

impl ScriptedInner {
    fn gate(&self) -> Result<()> {
        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.fetch_sub(1, Ordering::SeqCst);
            return Err(RpcError::CallFailed("scripted failure".to_string()).into());
        }
        Ok(())
    }

    fn data_gate(&self, li: &LookupKey) -> Result<()> {
        self.gate()?;
        if self.unknown_type {
            return Err(ConfigurationError::UnknownType(li.config_type_name().to_string()).into());
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Authority double whose failure behavior is scripted up front.
#[derive(Clone)]
pub struct ScriptedAuthority {
    inner: Arc<ScriptedInner>,
}

impl Default for ScriptedAuthority {
    fn default() -> Self {
        Self::failing_calls(0)
    }
}

impl ScriptedAuthority {
    /// An authority whose first `n` calls (liveness probes included) fail
    /// with a transient error.
    pub fn failing_calls(n: usize) -> Self {
        Self {
            inner: Arc::new(ScriptedInner {
                adapter: MemoryAdapter::new(),
                fail_remaining: AtomicUsize::new(n),
                unknown_type: false,
                calls: AtomicUsize::new(0),
            }),
        }
    }

    /// An authority that answers every data call with an unknown-type
    /// configuration error.
    pub fn unknown_type() -> Self {
        Self {
            inner: Arc::new(ScriptedInner {
                adapter: MemoryAdapter::new(),
                fail_remaining: AtomicUsize::new(0),
                unknown_type: true,
                calls: AtomicUsize::new(0),
            }),
        }
    }

    /// Data calls served so far.
    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    /// Seed backing data.
    pub fn seed_value(&self, li: &LookupKey, key: &str, value: impl Into<ConfigValue>) {
        self.inner.adapter.seed_value(li, key, value);
    }
}

#[async_trait]
impl Authority for ScriptedAuthority {
    async fn value_set(&self, li: &LookupKey) -> Result<ValueSet> {
        self.inner.data_gate(li)?;
        self.inner.adapter.value_set(li).await
    }

    async fn value(&self, li: &LookupKey, key: &str) -> Result<Option<ConfigValue>> {
        self.inner.data_gate(li)?;
        self.inner.adapter.value(li, key).await
    }

    async fn set_value_set(&self, li: &LookupKey, vs: &ValueSet) -> Result<()> {
        self.inner.data_gate(li)?;
        self.inner.adapter.set_value_set(li, vs).await
    }

    async fn set_value(&self, li: &LookupKey, key: &str, value: &ConfigValue) -> Result<()> {
        self.inner.data_gate(li)?;
        self.inner.adapter.set_value(li, key, value).await
    }

    async fn config_types(&self) -> Result<TypeRegistry> {
        self.inner.gate()?;
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        Ok(TypeRegistry::default())
    }

    async fn is_alive(&self) -> Result<bool> {
        self.inner.gate()?;
        Ok(true)
    }
}

/// Connector over a table of scripted authorities, counting binds.
#[derive(Default)]
pub struct ScriptedConnector {
    authorities: DashMap<String, ScriptedAuthority>,
    connects_total: AtomicUsize,
    connects_by: DashMap<String, usize>,
}

impl ScriptedConnector {
    /// Serve `url` with the given scripted authority.
    pub fn add_authority(&self, url: &str, authority: ScriptedAuthority) {
        self.authorities.insert(url.to_string(), authority);
    }

    /// Seed backing data on the authority serving `url`.
    pub fn seed_value(&self, url: &str, li: &LookupKey, key: &str, value: impl Into<ConfigValue>) {
        if let Some(authority) = self.authorities.get(url) {
            authority.seed_value(li, key, value);
        }
    }

    /// Total successful binds.
    pub fn connects(&self) -> usize {
        self.connects_total.load(Ordering::SeqCst)
    }

    /// Successful binds to one URL.
    pub fn connects_to(&self, url: &str) -> usize {
        self.connects_by.get(url).map(|e| *e.value()).unwrap_or(0)
    }

    /// Data calls served by the authority at `url`.
    pub fn calls(&self, url: &str) -> usize {
        self.authorities.get(url).map(|a| a.calls()).unwrap_or(0)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Authority>> {
        let authority = self.authorities.get(url).map(|a| a.clone());
        match authority {
            Some(authority) => {
                self.connects_total.fetch_add(1, Ordering::SeqCst);
                *self.connects_by.entry(url.to_string()).or_insert(0) += 1;
                Ok(Box::new(authority))
            }
            None => Err(RpcError::Unreachable {
                url: url.to_string(),
                reason: "no authority at url".to_string(),
            }
            .into()),
        }
    }
}

/// Connector that routes to in-process [`ConfigAuthority`] instances, so a
/// whole group can run inside one test.
///
/// Handles look their server up again on every call, so unregistering a URL
/// breaks existing binds too, the way a crashed host breaks open
/// connections.
#[derive(Default)]
pub struct LoopbackConnector {
    authorities: Arc<Mutex<HashMap<String, Arc<ConfigAuthority>>>>,
}

impl LoopbackConnector {
    /// Create an empty connector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `url` with a live authority.
    pub fn register(&self, url: &str, authority: Arc<ConfigAuthority>) {
        self.authorities.lock().insert(url.to_string(), authority);
    }

    /// Make `url` unreachable, simulating a crashed server.
    pub fn unregister(&self, url: &str) {
        self.authorities.lock().remove(url);
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Authority>> {
        if !self.authorities.lock().contains_key(url) {
            return Err(RpcError::Unreachable {
                url: url.to_string(),
                reason: "server down".to_string(),
            }
            .into());
        }
        Ok(Box::new(LoopbackHandle {
            authorities: self.authorities.clone(),
            url: url.to_string(),
        }))
    }
}

struct LoopbackHandle {
    authorities: Arc<Mutex<HashMap<String, Arc<ConfigAuthority>>>>,
    url: String,
}

impl LoopbackHandle {
    fn live(&self) -> Result<Arc<ConfigAuthority>> {
        self.authorities.lock().get(&self.url).cloned().ok_or_else(|| {
            RpcError::Unreachable {
                url: self.url.clone(),
                reason: "server down".to_string(),
            }
            .into()
        })
    }

    /// A remote "not the active server" answer reaches real clients as an
    /// RPC-layer failure, which keeps it retryable; other server-side errors
    /// pass through untouched.
    fn as_remote(e: crate::error::Error) -> crate::error::Error {
        use crate::error::{CoordinationError, Error};
        match e {
            Error::Coordination(CoordinationError::NotActiveServer { host }) => {
                RpcError::CallFailed(format!("{host} is not the active config server")).into()
            }
            other => other,
        }
    }
}

#[async_trait]
impl Authority for LoopbackHandle {
    async fn value_set(&self, li: &LookupKey) -> Result<ValueSet> {
        self.live()?.value_set(li).await.map_err(Self::as_remote)
    }

    async fn value(&self, li: &LookupKey, key: &str) -> Result<Option<ConfigValue>> {
        self.live()?.value(li, key).await.map_err(Self::as_remote)
    }

    async fn set_value_set(&self, li: &LookupKey, vs: &ValueSet) -> Result<()> {
        // The server consumes and clears its own copy of the pending sets.
        let mut server_copy = vs.clone();
        self.live()?
            .set_value_set(li, &mut server_copy)
            .await
            .map_err(Self::as_remote)
    }

    async fn set_value(&self, li: &LookupKey, key: &str, value: &ConfigValue) -> Result<()> {
        self.live()?
            .set_value(li, key, value)
            .await
            .map_err(Self::as_remote)
    }

    async fn config_types(&self) -> Result<TypeRegistry> {
        self.live()?.config_types().await.map_err(Self::as_remote)
    }

    async fn is_alive(&self) -> Result<bool> {
        Ok(self.live()?.is_alive())
    }
}
