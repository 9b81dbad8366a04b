//! Basic example: a single-node deployment serving configuration locally.
//!
//! With the group name left at the singleton sentinel, the node substitutes an
//! in-process coordination store and elects itself with no stabilization wait.

use confmesh::coordination::InMemoryStore;
use confmesh::testing::{MemoryAdapter, StaticFinderTransport};
use confmesh::{
    AdapterDispatch, AdapterId, AdapterRegistry, ConfigAuthority, ConfigFinder, ConfigType,
    ConfigValue, LocalBus, LookupKey, Medium, NodeConfig, Notifier, TypeRegistry,
};
use std::sync::Arc;

const MEMORY: AdapterId = AdapterId::from_static("memory");

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter("confmesh=debug,info")
        .init();

    // A single-node deployment: the default group is the singleton sentinel.
    let config = NodeConfig::new("localhost").with_candidate(true);

    println!("Starting config node {}...", config.host);

    let notifier = Notifier::start(Arc::new(LocalBus::new()));

    // Bind the storage adapter serving each configuration type. A real
    // deployment registers file/db/ldap adapters here.
    let backing = Arc::new(MemoryAdapter::new());
    let mut adapters = AdapterRegistry::new();
    let reader = backing.clone();
    adapters.register_reader(MEMORY, move || reader.clone());
    let writer = backing.clone();
    adapters.register_writer(MEMORY, move || writer.clone());

    let types = TypeRegistry::new([ConfigType::new("app-props")
        .with_display_name("Application properties")
        .with_editable(true)
        .with_getter(Medium::File, MEMORY)
        .with_setter(Medium::File, MEMORY)]);
    let dispatch = Arc::new(AdapterDispatch::new(types, adapters));

    let finder = Arc::new(
        ConfigFinder::from_config(
            &config,
            Arc::new(InMemoryStore::new()),
            &notifier,
            Arc::new(StaticFinderTransport::default()),
        )
        .await?,
    );

    println!("Elected server: {}", finder.server_url().await?);

    let authority = ConfigAuthority::new(&config, finder, dispatch, &notifier);

    // Single-value writes and reads
    println!("\n--- Single values ---");
    let li = LookupKey::new("app-props");
    authority
        .set_value(&li, "greeting", &ConfigValue::from("hello"))
        .await?;
    authority
        .set_value(&li, "max-retries", &ConfigValue::from(5))
        .await?;

    println!("greeting = {:?}", authority.value(&li, "greeting").await?);
    println!(
        "max-retries = {:?}",
        authority.value(&li, "max-retries").await?
    );

    // Whole value sets: read, modify, persist.
    println!("\n--- Value sets ---");
    let mut vs = authority.value_set(&li).await?;
    vs.update("timeout-secs", 30);
    vs.update("verbose", true);
    authority.set_value_set(&li, &mut vs).await?;

    let vs = authority.value_set(&li).await?;
    for name in vs.names() {
        println!("  {} = {:?}", name, vs.get(name));
    }

    // Repeated reads are served by the monitoring cache. Let the change
    // notifications from the writes above drain first: one election
    // announcement plus three config changes.
    println!("\n--- Cache behavior ---");
    confmesh::testing::wait_until(|| notifier.dispatched() >= 4).await;
    let before = backing.read_count();
    authority.value(&li, "greeting").await?;
    authority.value(&li, "greeting").await?;
    println!(
        "two reads hit the adapter {} time(s)",
        backing.read_count() - before
    );

    println!("\nShutting down...");
    notifier.shutdown().await;

    Ok(())
}
