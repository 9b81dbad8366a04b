//! Leader election for the configuration group.
//!
//! Two variants share one capability set. Candidate nodes run a soft,
//! race-tolerant "power grab": claim the leader slot, wait out a
//! stabilization window, and keep the role only if the slot still names them.
//! Non-candidate nodes never write the slot; they ask each registered
//! candidate to produce a leader instead.
//!
//! The candidate algorithm is optimistic last-writer-wins, not consensus:
//! two electors racing within the same window can both believe they won.
//! Callers must tolerate a stale leader pointer and rely on RPC failure plus
//! re-election to converge.

use crate::bus::{Notifier, UpdateEvent};
use crate::coordination::{CoordinationStore, CANDIDATE, LEADER_KEY, NOT_CANDIDATE};
use crate::error::{CoordinationError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Capability to ask a candidate host's finder for the current leader URL.
///
/// The wire protocol is the deployment's concern; tests substitute an
/// in-process table.
#[async_trait]
pub trait FinderTransport: Send + Sync {
    /// Ask the finder on `candidate` to return (or compute) the leader URL.
    async fn fetch_server_url(&self, candidate: &str) -> Result<String>;
}

/// Participant in choosing a new configuration server.
#[async_trait]
pub trait Elector: Send + Sync {
    /// Record this node's candidacy state in the coordination store.
    async fn register(&self) -> Result<()>;

    /// Withdraw from candidacy.
    async fn unregister(&self) -> Result<()>;

    /// Run an election and return the winner's URL.
    async fn elect(&self) -> Result<String>;
}

/// Elector used by nodes eligible to become the authority.
pub struct CandidateElector {
    host: String,
    store: Arc<dyn CoordinationStore>,
    wait: Duration,
    notifier: Notifier,
}

impl CandidateElector {
    /// Create a candidate elector. `wait` is the stabilization window; zero
    /// for a single-node group.
    pub fn new(
        host: impl Into<String>,
        store: Arc<dyn CoordinationStore>,
        wait: Duration,
        notifier: Notifier,
    ) -> Self {
        Self {
            host: host.into(),
            store,
            wait,
            notifier,
        }
    }

    /// Announce the election result to the group. A failed publish is not
    /// fatal; late subscribers converge through call failure and re-election.
    async fn publish_election_result(&self, url: &str) {
        match self.notifier.publish(&UpdateEvent::server_change(url)).await {
            Ok(()) => info!(url, "new config server announced"),
            Err(e) => warn!(error = %e, "unable to publish election result"),
        }
    }
}

#[async_trait]
impl Elector for CandidateElector {
    async fn register(&self) -> Result<()> {
        self.store.put(&self.host, CANDIDATE).await
    }

    async fn unregister(&self) -> Result<()> {
        self.store.put(&self.host, NOT_CANDIDATE).await
    }

    async fn elect(&self) -> Result<String> {
        debug!(host = %self.host, "called for an election");
        self.store.put(LEADER_KEY, &self.host).await?;

        if !self.wait.is_zero() {
            tokio::time::sleep(self.wait).await;
        }

        // Whoever the slot names after the window is the winner, which may
        // not be us if another candidate wrote later.
        let winner = self
            .store
            .get(LEADER_KEY)
            .await?
            .unwrap_or_else(|| self.host.clone());

        if winner == self.host {
            self.publish_election_result(&winner).await;
        }
        debug!(winner = %winner, "election settled");
        Ok(winner)
    }
}

/// Elector used by nodes that cannot become the authority.
///
/// Instead of claiming the slot, it walks the registered candidates and asks
/// each one to produce the current leader.
pub struct ProxyElector {
    host: String,
    store: Arc<dyn CoordinationStore>,
    transport: Arc<dyn FinderTransport>,
}

impl ProxyElector {
    /// Create a proxy elector.
    pub fn new(
        host: impl Into<String>,
        store: Arc<dyn CoordinationStore>,
        transport: Arc<dyn FinderTransport>,
    ) -> Self {
        Self {
            host: host.into(),
            store,
            transport,
        }
    }

    async fn candidate_list(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .entries()
            .await?
            .into_iter()
            .filter(|(_, v)| v == CANDIDATE)
            .map(|(k, _)| k)
            .collect())
    }
}

#[async_trait]
impl Elector for ProxyElector {
    async fn register(&self) -> Result<()> {
        self.store.put(&self.host, NOT_CANDIDATE).await
    }

    async fn unregister(&self) -> Result<()> {
        self.store.put(&self.host, NOT_CANDIDATE).await
    }

    async fn elect(&self) -> Result<String> {
        let candidates = self.candidate_list().await?;
        if candidates.is_empty() {
            error!("could not find any registered config server candidate");
        }

        for candidate in candidates {
            match self.transport.fetch_server_url(&candidate).await {
                Ok(url) => return Ok(url),
                Err(e) => {
                    warn!(candidate = %candidate, cause = %e, "could not connect to config server candidate");
                }
            }
        }
        Err(CoordinationError::NoReachableCandidate.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use crate::coordination::InMemoryStore;
    use crate::testing::{wait_until, StaticFinderTransport};

    fn notifier() -> Notifier {
        Notifier::start(Arc::new(LocalBus::new()))
    }

    #[tokio::test]
    async fn test_candidate_registration_flags() {
        let store = Arc::new(InMemoryStore::new());
        let elector =
            CandidateElector::new("node-a", store.clone(), Duration::ZERO, notifier());

        elector.register().await.unwrap();
        assert_eq!(
            store.get("node-a").await.unwrap(),
            Some(CANDIDATE.to_string())
        );

        elector.unregister().await.unwrap();
        assert_eq!(
            store.get("node-a").await.unwrap(),
            Some(NOT_CANDIDATE.to_string())
        );
    }

    #[tokio::test]
    async fn test_candidate_wins_uncontested_election() {
        let store = Arc::new(InMemoryStore::new());
        let notifier = notifier();
        let elector = CandidateElector::new("node-a", store.clone(), Duration::ZERO, notifier.clone());

        let winner = elector.elect().await.unwrap();
        assert_eq!(winner, "node-a");
        assert_eq!(
            store.get(LEADER_KEY).await.unwrap(),
            Some("node-a".to_string())
        );

        // Winning publishes a leader-change announcement.
        wait_until(|| notifier.dispatched() >= 1).await;
    }

    #[tokio::test]
    async fn test_candidate_yields_to_later_writer() {
        let store = Arc::new(InMemoryStore::new());
        let elector = CandidateElector::new(
            "node-a",
            store.clone(),
            Duration::from_millis(50),
            notifier(),
        );

        let store2 = store.clone();
        let racer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            store2.put(LEADER_KEY, "node-b").await.unwrap();
        });

        let winner = elector.elect().await.unwrap();
        racer.await.unwrap();
        assert_eq!(winner, "node-b");
    }

    #[tokio::test]
    async fn test_proxy_elect_returns_first_reachable_candidate_answer() {
        let store = Arc::new(InMemoryStore::new());
        store.put("cand-1", CANDIDATE).await.unwrap();
        store.put("bystander", NOT_CANDIDATE).await.unwrap();

        let transport = Arc::new(StaticFinderTransport::new([("cand-1", "cand-1")]));
        let elector = ProxyElector::new("client", store, transport);

        assert_eq!(elector.elect().await.unwrap(), "cand-1");
    }

    #[tokio::test]
    async fn test_proxy_elect_fails_when_no_candidate_reachable() {
        let store = Arc::new(InMemoryStore::new());
        store.put("cand-1", CANDIDATE).await.unwrap();

        // Empty table: every fetch is unreachable.
        let transport = Arc::new(StaticFinderTransport::default());
        let elector = ProxyElector::new("client", store, transport);

        let err = elector.elect().await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Coordination(CoordinationError::NoReachableCandidate)
        ));
    }

    #[tokio::test]
    async fn test_proxy_registration_never_claims_candidacy() {
        let store = Arc::new(InMemoryStore::new());
        let elector = ProxyElector::new(
            "client",
            store.clone(),
            Arc::new(StaticFinderTransport::default()),
        );

        elector.register().await.unwrap();
        assert_eq!(
            store.get("client").await.unwrap(),
            Some(NOT_CANDIDATE.to_string())
        );
    }
}
