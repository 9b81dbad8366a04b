//! Per-process front-end for "who is the configuration server".

use crate::bus::Notifier;
use crate::config::NodeConfig;
use crate::coordination::{CoordinationStore, InMemoryStore, LEADER_KEY, NULL_VALUE};
use crate::elector::{CandidateElector, Elector, FinderTransport, ProxyElector};
use crate::error::Result;
use std::sync::Arc;
use tracing::{debug, info};

/// Answers leader queries for one process, electing lazily.
///
/// One finder per process, explicitly constructed and shared by handle; it
/// owns the coordination store handle and the elector chosen by the node's
/// candidacy flag. Concurrent callers in the same process serialize on a
/// single election.
pub struct ConfigFinder {
    store: Arc<dyn CoordinationStore>,
    elector: Box<dyn Elector>,
    election: tokio::sync::Mutex<()>,
}

impl ConfigFinder {
    /// Build a finder from an elector and the group's store. Registers the
    /// elector's candidacy before returning.
    pub async fn new(
        store: Arc<dyn CoordinationStore>,
        elector: Box<dyn Elector>,
    ) -> Result<Self> {
        elector.register().await?;
        Ok(Self {
            store,
            elector,
            election: tokio::sync::Mutex::new(()),
        })
    }

    /// Build a finder for a node according to its boot configuration.
    ///
    /// Candidate nodes get a [`CandidateElector`], others a [`ProxyElector`].
    /// For a singleton group the shared store is replaced by a process-local
    /// map and elections run with no stabilization wait.
    pub async fn from_config(
        config: &NodeConfig,
        group_store: Arc<dyn CoordinationStore>,
        notifier: &Notifier,
        transport: Arc<dyn FinderTransport>,
    ) -> Result<Self> {
        let store: Arc<dyn CoordinationStore> = if config.is_singleton_group() {
            Arc::new(InMemoryStore::new())
        } else {
            group_store
        };

        let elector: Box<dyn Elector> = if config.is_candidate {
            info!(host = %config.host, "configured to be a config server");
            Box::new(CandidateElector::new(
                &config.host,
                store.clone(),
                config.effective_election_wait(),
                notifier.clone(),
            ))
        } else {
            info!(host = %config.host, "not configured to be a config server");
            Box::new(ProxyElector::new(&config.host, store.clone(), transport))
        };

        Self::new(store, elector).await
    }

    /// URL of the current configuration server, electing one if the leader
    /// slot is absent or holds the re-elect sentinel.
    pub async fn server_url(&self) -> Result<String> {
        if let Some(url) = self.read_leader().await? {
            return Ok(url);
        }

        let _guard = self.election.lock().await;
        // Another caller may have finished an election while we waited.
        if let Some(url) = self.read_leader().await? {
            return Ok(url);
        }

        debug!("no active config server, electing");
        self.elector.elect().await
    }

    /// Force the next [`server_url`](Self::server_url) call to re-elect.
    pub async fn reset(&self) -> Result<()> {
        self.store.put(LEADER_KEY, NULL_VALUE).await
    }

    /// Withdraw this node from candidacy.
    pub async fn unregister(&self) -> Result<()> {
        self.elector.unregister().await
    }

    async fn read_leader(&self) -> Result<Option<String>> {
        Ok(self
            .store
            .get(LEADER_KEY)
            .await?
            .filter(|url| url != NULL_VALUE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use crate::testing::StaticFinderTransport;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn notifier() -> Notifier {
        Notifier::start(Arc::new(LocalBus::new()))
    }

    /// Elector that counts elections and answers with a fixed winner.
    struct CountingElector {
        winner: String,
        elections: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Elector for CountingElector {
        async fn register(&self) -> Result<()> {
            Ok(())
        }
        async fn unregister(&self) -> Result<()> {
            Ok(())
        }
        async fn elect(&self) -> Result<String> {
            self.elections.fetch_add(1, Ordering::SeqCst);
            Ok(self.winner.clone())
        }
    }

    #[tokio::test]
    async fn test_no_election_when_leader_slot_is_live() {
        let store = Arc::new(InMemoryStore::new());
        store.put(LEADER_KEY, "node-a").await.unwrap();

        let elections = Arc::new(AtomicUsize::new(0));
        let finder = ConfigFinder::new(
            store,
            Box::new(CountingElector {
                winner: "node-b".to_string(),
                elections: elections.clone(),
            }),
        )
        .await
        .unwrap();

        assert_eq!(finder.server_url().await.unwrap(), "node-a");
        assert_eq!(elections.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_elects_when_slot_absent_or_sentinel() {
        let store = Arc::new(InMemoryStore::new());
        let elections = Arc::new(AtomicUsize::new(0));
        let finder = ConfigFinder::new(
            store.clone(),
            Box::new(CountingElector {
                winner: "node-b".to_string(),
                elections: elections.clone(),
            }),
        )
        .await
        .unwrap();

        assert_eq!(finder.server_url().await.unwrap(), "node-b");
        assert_eq!(elections.load(Ordering::SeqCst), 1);

        store.put(LEADER_KEY, NULL_VALUE).await.unwrap();
        assert_eq!(finder.server_url().await.unwrap(), "node-b");
        assert_eq!(elections.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_reset_forces_reelection() {
        let store = Arc::new(InMemoryStore::new());
        store.put(LEADER_KEY, "node-a").await.unwrap();

        let elections = Arc::new(AtomicUsize::new(0));
        let finder = ConfigFinder::new(
            store.clone(),
            Box::new(CountingElector {
                winner: "node-b".to_string(),
                elections: elections.clone(),
            }),
        )
        .await
        .unwrap();

        finder.reset().await.unwrap();
        assert_eq!(
            store.get(LEADER_KEY).await.unwrap(),
            Some(NULL_VALUE.to_string())
        );
        assert_eq!(finder.server_url().await.unwrap(), "node-b");
        assert_eq!(elections.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_singleton_group_elects_itself_without_wait() {
        let config = NodeConfig::new("solo").with_candidate(true);
        let finder = ConfigFinder::from_config(
            &config,
            // Substituted by a process-local store for the singleton group.
            Arc::new(InMemoryStore::new()),
            &notifier(),
            Arc::new(StaticFinderTransport::default()),
        )
        .await
        .unwrap();

        let started = std::time::Instant::now();
        assert_eq!(finder.server_url().await.unwrap(), "solo");
        // No stabilization window for a singleton group.
        assert!(started.elapsed() < crate::config::DEFAULT_ELECTION_WAIT);
    }

    #[tokio::test]
    async fn test_from_config_registers_candidacy() {
        let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
        let config = NodeConfig::new("node-a")
            .with_group("prod")
            .with_candidate(true)
            .with_election_wait(std::time::Duration::ZERO);

        let _finder = ConfigFinder::from_config(
            &config,
            store.clone(),
            &notifier(),
            Arc::new(StaticFinderTransport::default()),
        )
        .await
        .unwrap();

        assert_eq!(
            store.get("node-a").await.unwrap(),
            Some(crate::coordination::CANDIDATE.to_string())
        );
    }
}
