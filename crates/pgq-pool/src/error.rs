//! Pool error types.

use thiserror::Error;

/// Errors that can occur during pool operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// Failed to acquire a resource within the timeout.
    #[error("resource acquisition timeout after {0:?}")]
    AcquisitionTimeout(std::time::Duration),

    /// Pool is draining or closed.
    #[error("pool is closed")]
    PoolClosed,

    /// Resource creation failed.
    #[error("failed to create resource: {0}")]
    Creation(String),

    /// Destroying a resource failed.
    #[error("failed to destroy resource: {0}")]
    Destroy(String),

    /// Pool configuration error.
    #[error("pool configuration error: {0}")]
    Configuration(String),

    /// A lease was released into a pool that did not hand it out.
    #[error("resource does not belong to this pool")]
    ForeignResource,
}

impl PoolError {
    /// Check if this error may succeed on retry.
    ///
    /// Timeouts and creation failures depend on server and capacity state
    /// that can change between attempts.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::AcquisitionTimeout(_) | Self::Creation(_))
    }
}

/// Result type for pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;
