//! Pool error types.

use thiserror::Error;

/// Result type alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors surfaced to pool callers.
///
/// Saturation is not an error: a saturated `acquire()` waits instead.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Every candidate host is deactivated.
    #[error("all {hosts} hosts are down")]
    AllHostsDown { hosts: usize },

    /// A reachable host rejected the request (unknown database, bad
    /// credentials, malformed request). Never retried on another host.
    #[error("application error on {host}: {reason}")]
    Application { host: String, reason: String },

    /// Settings were rejected before a pool could be built.
    #[error("invalid pool settings: {0}")]
    InvalidSettings(String),
}

/// Tagged outcome of a single dial attempt against one host.
///
/// The failover factory retries the next host on `Connectivity` and
/// propagates `Application` unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DialError {
    /// The host could not be reached (refused, timed out, unresolvable).
    #[error("connectivity failure: {0}")]
    Connectivity(String),

    /// The host answered but refused the session.
    #[error("{0}")]
    Application(String),
}

impl DialError {
    /// Whether another host should be tried after this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DialError::Connectivity(_))
    }
}
