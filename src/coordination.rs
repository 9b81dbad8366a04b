//! Coordination store capability.
//!
//! A small, eventually-visible key/value map shared by every node in a group.
//! The election subsystem is its only consumer: it holds per-host candidacy
//! flags and the single leader-URL slot. The store gives no transactional
//! guarantees; readers may observe a stale leader pointer.

use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;

/// Key of the slot holding the current authority's URL.
pub const LEADER_KEY: &str = "cfg.server.url";

/// Candidacy flag value for hosts eligible to become the authority.
pub const CANDIDATE: &str = "SERVER CANDIDATE";

/// Candidacy flag value for hosts that must never become the authority.
pub const NOT_CANDIDATE: &str = "NOT CANDIDATE";

/// Sentinel leader-slot value meaning "unknown, re-elect".
pub const NULL_VALUE: &str = "null-value";

/// Shared key/value map visible to all nodes of a group.
///
/// Implementations back this with whatever distributed map the deployment
/// provides. Reads may be stale; correctness of the election protocol relies
/// on callers tolerating failed RPCs and re-electing.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Read a key, `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a key. Last writer wins.
    async fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Snapshot of all entries. Iteration order is unspecified.
    async fn entries(&self) -> Result<Vec<(String, String)>>;
}

/// In-process coordination store.
///
/// Used in two places: as the zero-latency substitute when the group name is
/// the singleton sentinel, and shared across simulated nodes in tests.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: DashMap<String, String>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CoordinationStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|e| e.value().clone()))
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<(String, String)>> {
        Ok(self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_store_roundtrip() {
        let store = InMemoryStore::new();
        assert_eq!(store.get(LEADER_KEY).await.unwrap(), None);

        store.put(LEADER_KEY, "node-a").await.unwrap();
        assert_eq!(
            store.get(LEADER_KEY).await.unwrap(),
            Some("node-a".to_string())
        );
    }

    #[tokio::test]
    async fn test_in_memory_store_entries() {
        let store = InMemoryStore::new();
        store.put("host-a", CANDIDATE).await.unwrap();
        store.put("host-b", NOT_CANDIDATE).await.unwrap();

        let mut entries = store.entries().await.unwrap();
        entries.sort();
        assert_eq!(
            entries,
            vec![
                ("host-a".to_string(), CANDIDATE.to_string()),
                ("host-b".to_string(), NOT_CANDIDATE.to_string()),
            ]
        );
    }
}
