//! Configuration types for a node of the configuration service.

use std::time::Duration;

/// Group name that marks a single-node deployment. With this group the node
/// substitutes an in-process coordination store and elects with no
/// stabilization wait.
pub const SINGLETON_GROUP: &str = "none";

/// Default stabilization window for multi-node elections.
pub const DEFAULT_ELECTION_WAIT: Duration = Duration::from_secs(1);

/// Default capacity of the monitoring caches.
pub const DEFAULT_CACHE_CAPACITY: usize = 20;

/// Default number of attempts on the failover client path.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Boot configuration for one node of the configuration group.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// This node's identity: the host name other nodes use to reach it.
    pub host: String,

    /// Name of the configuration group this node belongs to. All nodes in a
    /// group share one coordination store and one broadcast bus scope.
    pub group: String,

    /// Whether this node is eligible to become the configuration authority.
    pub is_candidate: bool,

    /// Stabilization window a candidate waits after claiming the leader slot.
    pub election_wait: Duration,

    /// Whether the authority's read path keeps a monitoring cache.
    pub cache_enabled: bool,

    /// Capacity of the monitoring caches (server read path and client proxy).
    pub cache_capacity: usize,

    /// Total attempts the failover client makes before giving up.
    pub retry_attempts: u32,

    /// Whether client proxies rebind on leader-change notifications. When
    /// disabled, clients discover a new leader only through call failure.
    pub rebind_on_leader_change: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            group: SINGLETON_GROUP.to_string(),
            is_candidate: false,
            election_wait: DEFAULT_ELECTION_WAIT,
            cache_enabled: true,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            rebind_on_leader_change: true,
        }
    }
}

impl NodeConfig {
    /// Create a configuration for the given host identity.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    /// Set the configuration group name.
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    /// Mark this node as a candidate for the authority role.
    pub fn with_candidate(mut self, is_candidate: bool) -> Self {
        self.is_candidate = is_candidate;
        self
    }

    /// Set the election stabilization window.
    pub fn with_election_wait(mut self, wait: Duration) -> Self {
        self.election_wait = wait;
        self
    }

    /// Enable or disable the authority's read cache.
    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    /// Set the monitoring cache capacity.
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Set the failover client attempt budget.
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    /// Enable or disable rebinding on leader-change notifications.
    pub fn with_rebind_on_leader_change(mut self, enabled: bool) -> Self {
        self.rebind_on_leader_change = enabled;
        self
    }

    /// Whether this node runs as a single-member group.
    pub fn is_singleton_group(&self) -> bool {
        self.group == SINGLETON_GROUP
    }

    /// The effective stabilization window: zero for a singleton group, the
    /// configured wait otherwise.
    pub fn effective_election_wait(&self) -> Duration {
        if self.is_singleton_group() {
            Duration::ZERO
        } else {
            self.election_wait
        }
    }
}
