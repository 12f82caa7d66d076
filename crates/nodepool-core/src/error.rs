//! Common error types for nodepool.

use crate::ids::PoolId;
use thiserror::Error;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors shared across the nodepool crates.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A pool with the specified ID is not configured.
    #[error("pool not found: {0}")]
    PoolNotFound(PoolId),

    /// An invalid identifier was provided.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] crate::ids::IdError),
}
