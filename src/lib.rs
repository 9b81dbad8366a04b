//! Distributed configuration store with leader election and broadcast cache
//! invalidation.
//!
//! This crate turns a group of cooperating processes into one logical
//! configuration store:
//! - **Leader election** picks a single authority per group; every other node
//!   reads and writes through it and fails over when it changes
//! - **Broadcast invalidation** keeps every node's cache coherent after writes
//! - **Monitoring caches** answer repeated reads locally and evict themselves
//!   on change notifications
//! - **Pluggable storage adapters** perform the real persistent read/write per
//!   configuration type and medium
//!
//! The cross-node transports are capabilities the deployment provides: a
//! [`CoordinationStore`] (shared key/value map holding election bookkeeping),
//! a [`BroadcastBus`] (group-wide publish/subscribe), and a [`Connector`]
//! (opaque RPC to the elected authority). In-process implementations of all
//! three ship with the crate for single-node deployments and tests.
//!
//! # Example
//!
//! ```rust,no_run
//! use confmesh::coordination::InMemoryStore;
//! use confmesh::testing::{MemoryAdapter, StaticFinderTransport};
//! use confmesh::{
//!     AdapterDispatch, AdapterId, AdapterRegistry, ConfigAuthority, ConfigFinder, ConfigType,
//!     ConfigValue, LocalBus, LookupKey, Medium, NodeConfig, Notifier, TypeRegistry,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // A single-node deployment: the node elects itself with no wait.
//!     let config = NodeConfig::new("localhost").with_candidate(true);
//!
//!     let notifier = Notifier::start(Arc::new(LocalBus::new()));
//!
//!     // Bind the storage adapters serving each configuration type.
//!     const MEMORY: AdapterId = AdapterId::from_static("memory");
//!     let backing = Arc::new(MemoryAdapter::new());
//!     let mut adapters = AdapterRegistry::new();
//!     let reader = backing.clone();
//!     adapters.register_reader(MEMORY, move || reader.clone());
//!     let writer = backing.clone();
//!     adapters.register_writer(MEMORY, move || writer.clone());
//!
//!     let types = TypeRegistry::new([ConfigType::new("app-props")
//!         .with_getter(Medium::File, MEMORY)
//!         .with_setter(Medium::File, MEMORY)]);
//!     let dispatch = Arc::new(AdapterDispatch::new(types, adapters));
//!
//!     let finder = Arc::new(
//!         ConfigFinder::from_config(
//!             &config,
//!             Arc::new(InMemoryStore::new()),
//!             &notifier,
//!             Arc::new(StaticFinderTransport::default()),
//!         )
//!         .await?,
//!     );
//!
//!     let authority = ConfigAuthority::new(&config, finder, dispatch, &notifier);
//!
//!     let li = LookupKey::new("app-props");
//!     authority
//!         .set_value(&li, "greeting", &ConfigValue::from("hello"))
//!         .await?;
//!     println!("greeting = {:?}", authority.value(&li, "greeting").await?);
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │          Calling application                │
//! └─────────────────────────────────────────────┘
//!          │ (client node)        │ (authority node)
//!          ▼                      ▼
//! ┌──────────────────┐   ┌──────────────────────┐
//! │  FailoverClient  │──▶│   ConfigAuthority    │
//! │ retry + rebind   │   │ CachedReader         │
//! │ content cache    │   │ NotifyingWriter      │
//! └──────────────────┘   │ AdapterDispatch      │
//!          │             └──────────────────────┘
//!          ▼                      │
//! ┌──────────────────┐            ▼
//! │   ConfigFinder   │   ┌──────────────────────┐
//! │ Elector variants │   │   Storage adapters   │
//! └──────────────────┘   │   (file / db / ldap) │
//!          │             └──────────────────────┘
//!          ▼
//! ┌─────────────────────────────────────────────┐
//! │  CoordinationStore        BroadcastBus      │
//! │  (election bookkeeping)   (invalidations)   │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Consistency model
//!
//! - **Election**: optimistic last-writer-wins within a stabilization window,
//!   not quorum consensus. Two candidates racing inside one window can both
//!   believe they won; convergence comes from failed calls triggering
//!   re-election
//! - **Reads**: served from monitoring caches kept coherent by best-effort
//!   broadcast; a missed invalidation heals on the next write to the same key
//! - **Leader changes**: rebind clients without touching content caches,
//!   since a new server does not mean new content

pub mod adapter;
pub mod bus;
pub mod cache;
pub mod client;
pub mod config;
pub mod coordination;
pub mod elector;
pub mod error;
pub mod finder;
pub mod registry;
pub mod server;
pub mod testing;
pub mod types;

// Re-export main types for convenience
pub use config::NodeConfig;
pub use error::{BusError, ConfigurationError, CoordinationError, Error, Result, RpcError};
pub use types::{ConfigValue, LookupKey, Medium, ValueSet};

// Re-export bus types
pub use bus::{
    BroadcastBus, BusSubscription, CallbackId, LocalBus, Notifier, Priority, UpdateEvent,
    UpdatePattern,
};

// Re-export election types
pub use coordination::{CoordinationStore, InMemoryStore};
pub use elector::{CandidateElector, Elector, FinderTransport, ProxyElector};
pub use finder::ConfigFinder;

// Re-export caching types
pub use cache::{CachedValue, MonitoringCache};

// Re-export registry and dispatch types
pub use adapter::{AdapterDispatch, ValueReader, ValueWriter};
pub use registry::{AdapterId, AdapterRegistry, ConfigType, TypeRegistry};

// Re-export the serving and client surfaces
pub use client::{Authority, ClientFactory, Connector, FailoverClient};
pub use server::{CachedReader, ConfigAuthority, NotifyingWriter};
