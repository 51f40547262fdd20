//! Control Plane Error Hierarchy
//!
//! Errors are grouped by the layer that raised them so callers can decide
//! between surfacing, retrying on the next tick, or skipping the entity:
//! validation and rate-limit failures are never retried, upstream failures
//! are classified by gRPC code, storage failures distinguish natural-key
//! conflicts from everything else.

use std::time::Duration;

use config::ConfigError;
use tokio::task::JoinError;

use crate::ChannelId;
use crate::NodeId;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Infrastructure-level failures (network, storage, serialization)
    #[error(transparent)]
    System(#[from] SystemError),

    /// Settings loading and validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Caller error, surfaced synchronously and never retried
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Admission policy or flap limits were violated
    #[error(transparent)]
    RateLimited(#[from] RateLimitError),

    /// Failures reported by the upstream Lightning daemon
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// Unrecoverable failures requiring the service to be recycled
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("ChannelId is 0")]
    MissingChannelId,

    #[error("NodeId is 0")]
    MissingNodeId,

    #[error("Illegal channel status {0}, only Active and Inactive are accepted")]
    IllegalChannelStatus(String),

    #[error("TimeLockDelta is < {minimum}")]
    TimeLockDeltaTooLow { minimum: u32 },

    #[error("Exactly one of incoming and outgoing channel must be set")]
    AmbiguousRebalanceFocus,

    #[error("Rebalance amount must be greater than 0")]
    MissingRebalanceAmount,

    #[error("Unknown channel {channel_id} for node {node_id}")]
    UnknownChannel { node_id: NodeId, channel_id: ChannelId },

    #[error("Unknown node {0}")]
    UnknownNode(NodeId),

    #[error("Invalid short channel id: {0}")]
    InvalidShortChannelId(String),

    #[error("Invalid channel point: {0}")]
    InvalidChannelPoint(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error(
        "Routing policy update ignored due to rate limiter: {field} changed {count} times in the last {window:?}"
    )]
    RoutingPolicy {
        field: &'static str,
        count: usize,
        window: Duration,
    },

    #[error("Channel status update ignored due to flap limiter: {flips} flips in the last {window:?}")]
    ChannelStatusFlap { flips: usize, window: Duration },

    #[error("Rebalance already running for this origin and channel")]
    RebalanceAlreadyRunning,

    #[error("Request admission cancelled")]
    AdmissionCancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// Unavailable, DeadlineExceeded, stream closed: reconnect and carry on
    #[error("Transient upstream failure: {0}")]
    Transient(#[source] Box<tonic::Status>),

    /// The daemon does not know the entity (e.g. missing edge): skip it
    #[error("Upstream entity not found: {0}")]
    NotFound(String),

    /// Anything else the daemon refused
    #[error("Upstream failure: {0}")]
    Permanent(#[source] Box<tonic::Status>),

    #[error("Upstream stream ended")]
    StreamClosed,

    #[error("Upstream call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Upstream identity mismatch: expected {expected}, daemon reports {actual}")]
    IdentityMismatch { expected: String, actual: String },

    #[error("Malformed upstream message: {0}")]
    Malformed(String),
}

impl UpstreamError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            UpstreamError::Transient(_) | UpstreamError::StreamClosed | UpstreamError::Timeout(_)
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// Peer communication timeout
    #[error("Connection timeout to node {node_id} after {duration:?}")]
    Timeout { node_id: NodeId, duration: Duration },

    /// Persistent connection failures
    #[error("Socket connect failed: {0}")]
    ConnectError(String),

    /// Malformed node addresses
    #[error("Invalid URI format: {0}")]
    InvalidURI(String),

    /// TLS material could not be loaded
    #[error("TLS configuration failed: {0}")]
    TlsConfig(String),

    /// Macaroon could not be loaded or attached
    #[error("Macaroon configuration failed: {0}")]
    Macaroon(String),

    /// gRPC transport layer errors
    #[error(transparent)]
    TonicError(#[from] Box<tonic::transport::Error>),

    /// HTTP client failures towards external services
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("Background task failed: {0}")]
    TaskFailed(#[from] JoinError),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Disk I/O failures
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// Serialization failures for persisted rows
    #[error(transparent)]
    BincodeError(#[from] bincode::Error),

    /// Embedded database errors
    #[error("Embedded database error: {0}")]
    DbError(String),

    /// Unique natural key already taken; callers fetch the existing id
    #[error("Row already exists for natural key {0}")]
    DuplicateNaturalKey(String),

    #[error("Row not found: {0}")]
    NotFound(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Storage operation failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Actor {0} is gone")]
    ActorGone(&'static str),

    #[error("Service failed to start: {0}")]
    ServiceStartFailed(String),

    #[error("Worker panicked: {0}")]
    WorkerPanicked(String),

    #[error("Shutdown signal failed: {0}")]
    SignalSenderClosed(String),
}

// ============== Conversion Implementations ============== //
impl From<NetworkError> for Error {
    fn from(e: NetworkError) -> Self {
        Error::System(SystemError::Network(e))
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Error::System(SystemError::Storage(e))
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(err: tonic::transport::Error) -> Self {
        NetworkError::TonicError(Box::new(err)).into()
    }
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        UpstreamError::from(status).into()
    }
}

impl From<tonic::Status> for UpstreamError {
    fn from(status: tonic::Status) -> Self {
        use tonic::Code;
        match status.code() {
            Code::Unavailable
            | Code::DeadlineExceeded
            | Code::Cancelled
            | Code::Aborted
            | Code::Unknown
            | Code::ResourceExhausted => UpstreamError::Transient(Box::new(status)),
            Code::NotFound => UpstreamError::NotFound(status.message().to_string()),
            _ => UpstreamError::Permanent(Box::new(status)),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        NetworkError::Http(err).into()
    }
}

impl From<sled::Error> for Error {
    fn from(err: sled::Error) -> Self {
        StorageError::DbError(err.to_string()).into()
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        StorageError::BincodeError(err).into()
    }
}

impl From<JoinError> for Error {
    fn from(err: JoinError) -> Self {
        NetworkError::TaskFailed(err).into()
    }
}

impl Error {
    /// Upstream not-found errors mean "skip this entity and continue".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Upstream(UpstreamError::NotFound(_)))
    }

    pub fn is_transient(&self) -> bool {
        match self {
            Error::Upstream(e) => e.is_transient(),
            Error::System(SystemError::Network(_)) => true,
            _ => false,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            Error::System(SystemError::Storage(StorageError::DuplicateNaturalKey(_)))
        )
    }
}
