//! Error types for the configuration service.

use thiserror::Error;

/// Result type alias for configuration service operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the configuration service.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration registry errors. Fatal, never retried.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Election and coordination-store errors. Fatal for the calling operation.
    #[error("coordination error: {0}")]
    Coordination(#[from] CoordinationError),

    /// Transient RPC errors. Retried by the failover client.
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),

    /// Broadcast bus errors.
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    /// Storage adapter errors, surfaced from the pluggable read/write path.
    #[error("adapter error: {0}")]
    Adapter(String),

    /// All retry attempts were consumed; wraps the last cause.
    #[error("failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    /// Generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the failover client should retry the operation that produced
    /// this error. Only transient RPC failures qualify; configuration and
    /// coordination errors are surfaced to the caller as-is.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Rpc(_))
    }
}

/// Errors from the type registry and adapter dispatch.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    /// The requested configuration type is not in the type registry.
    #[error("configuration type [{0}] is not configured")]
    UnknownType(String),

    /// No adapter implementation is bound for the (type, medium, direction)
    /// triple.
    #[error("no {direction} adapter for config type '{config_type}' and storage medium {medium}")]
    NoAdapterBound {
        config_type: String,
        medium: crate::types::Medium,
        direction: &'static str,
    },

    /// An adapter id named by a config type has no registered constructor.
    #[error("no constructor registered for adapter [{0}]")]
    UnknownAdapter(String),
}

/// Election and coordination-store errors.
#[derive(Error, Debug)]
pub enum CoordinationError {
    /// A proxy election found no candidate that could be reached.
    #[error("unable to connect to any config server candidate")]
    NoReachableCandidate,

    /// This host tried to serve a request but is not the elected leader.
    #[error("{host} is not the active config server")]
    NotActiveServer { host: String },

    /// The coordination store failed a read or write.
    #[error("coordination store unavailable: {0}")]
    StoreUnavailable(String),
}

/// Transient errors on the client-to-authority RPC path.
#[derive(Error, Debug)]
pub enum RpcError {
    /// Could not reach or bind to the authority at the given URL.
    #[error("could not access server {url}: {reason}")]
    Unreachable { url: String, reason: String },

    /// The authority answered but reported itself not alive.
    #[error("server {url} is not alive")]
    NotAlive { url: String },

    /// The bound authority failed an individual call.
    #[error("call failed: {0}")]
    CallFailed(String),
}

/// Broadcast bus errors.
#[derive(Error, Debug)]
pub enum BusError {
    /// Publishing a frame to the bus failed.
    #[error("failed to publish notification: {0}")]
    PublishFailed(String),

    /// Encoding or decoding a notification frame failed.
    #[error("notification codec error: {0}")]
    Codec(String),
}

impl From<bincode::Error> for BusError {
    fn from(e: bincode::Error) -> Self {
        BusError::Codec(e.to_string())
    }
}
