//! Example of a three-node configuration group simulated in one process:
//! two candidate nodes, one client node, a shared coordination store and a
//! shared broadcast bus.
//!
//! The client elects an authority lazily on its first call, keeps reading
//! from its content cache, and fails over to the surviving candidate when
//! the elected server goes down.

use confmesh::coordination::{CoordinationStore, InMemoryStore, LEADER_KEY};
use confmesh::testing::{FinderTable, LoopbackConnector, MemoryAdapter};
use confmesh::{
    AdapterDispatch, AdapterId, AdapterRegistry, BroadcastBus, ClientFactory, ConfigAuthority,
    ConfigFinder, ConfigType, ConfigValue, LocalBus, LookupKey, Medium, NodeConfig, Notifier,
    TypeRegistry,
};
use std::sync::Arc;
use std::time::Duration;

const MEMORY: AdapterId = AdapterId::from_static("memory");

/// Boot one candidate node: finder, adapter stack, serving authority.
async fn start_candidate(
    host: &str,
    store: Arc<InMemoryStore>,
    bus: Arc<dyn BroadcastBus>,
    finders: Arc<FinderTable>,
    connector: Arc<LoopbackConnector>,
) -> Result<Arc<MemoryAdapter>, Box<dyn std::error::Error>> {
    let config = NodeConfig::new(host)
        .with_group("demo-group")
        .with_candidate(true)
        .with_election_wait(Duration::from_millis(100));

    let notifier = Notifier::start(bus);
    let finder = Arc::new(
        ConfigFinder::from_config(&config, store, &notifier, finders.clone()).await?,
    );
    finders.register(host, finder.clone());

    let backing = Arc::new(MemoryAdapter::new());
    let mut adapters = AdapterRegistry::new();
    let reader = backing.clone();
    adapters.register_reader(MEMORY, move || reader.clone());
    let writer = backing.clone();
    adapters.register_writer(MEMORY, move || writer.clone());
    let types = TypeRegistry::new([ConfigType::new("app-props")
        .with_getter(Medium::File, MEMORY)
        .with_setter(Medium::File, MEMORY)]);
    let dispatch = Arc::new(AdapterDispatch::new(types, adapters));

    let authority = Arc::new(ConfigAuthority::new(&config, finder, dispatch, &notifier));
    connector.register(host, authority);

    println!("Candidate {host} started");
    Ok(backing)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter("confmesh=info")
        .init();

    // Group-wide infrastructure every node shares.
    let store = Arc::new(InMemoryStore::new());
    let bus: Arc<dyn BroadcastBus> = Arc::new(LocalBus::new());
    let finders = Arc::new(FinderTable::new());
    let connector = Arc::new(LoopbackConnector::new());

    let backing_a = start_candidate(
        "node-a",
        store.clone(),
        bus.clone(),
        finders.clone(),
        connector.clone(),
    )
    .await?;
    let backing_b = start_candidate(
        "node-b",
        store.clone(),
        bus.clone(),
        finders.clone(),
        connector.clone(),
    )
    .await?;

    // The client node is not a candidate; its finder asks the candidates
    // for a leader instead of claiming the slot itself.
    let client_config = NodeConfig::new("node-c")
        .with_group("demo-group")
        .with_candidate(false);
    let client_notifier = Notifier::start(bus.clone());
    let client_finder = Arc::new(
        ConfigFinder::from_config(&client_config, store.clone(), &client_notifier, finders.clone())
            .await?,
    );
    finders.register("node-c", client_finder.clone());
    let mut client =
        ClientFactory::new(client_finder, connector.clone(), client_notifier).client();

    // Seed both candidates so either can answer after a failover.
    let li = LookupKey::new("app-props");
    backing_a.seed_value(&li, "greeting", "hello from the group");
    backing_b.seed_value(&li, "greeting", "hello from the group");

    println!("\n--- First call elects an authority ---");
    println!("greeting = {:?}", client.value(&li, "greeting").await?);

    println!("\n--- Writes propagate invalidations group-wide ---");
    client
        .set_value(&li, "greeting", &ConfigValue::from("updated"))
        .await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    println!("greeting = {:?}", client.value(&li, "greeting").await?);

    println!("\n--- Elected server crashes; the client fails over ---");
    let leader = store.get(LEADER_KEY).await?.expect("a leader was elected");
    let survivor_backing = if leader == "node-a" {
        &backing_b
    } else {
        &backing_a
    };
    println!("Crashing elected server {leader}");
    connector.unregister(&leader);
    finders.unregister(&leader);
    survivor_backing.seed_value(&li, "fallback", "served by the survivor");

    // The dead bind burns one attempt; re-election through the surviving
    // candidate serves this uncached read with no caller-visible error.
    println!("fallback = {:?}", client.value(&li, "fallback").await?);

    println!("\nDone.");
    Ok(())
}
