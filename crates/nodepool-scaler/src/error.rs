//! Error types for the scaler crate.

use nodepool_core::CoreError;
use nodepool_provider::ProviderError;
use thiserror::Error;

/// Errors returned to callers of the reconciler.
///
/// Per-instance provider failures during a scale operation never show up
/// here; they are logged and folded into the pool's target size.
#[derive(Error, Debug)]
pub enum ScalerError {
    /// The requested delta has the wrong sign or is zero.
    #[error("delta must be {expected}, have: {delta}")]
    InvalidDelta {
        /// The delta that was passed.
        delta: i64,
        /// What the operation expects, e.g. "positive".
        expected: &'static str,
    },

    /// Growing would exceed the pool's maximum size.
    #[error("size increase is too large. current: {current} desired: {desired} max: {max}")]
    MaxSizeExceeded {
        /// Current target size.
        current: usize,
        /// Requested target size.
        desired: usize,
        /// Pool maximum.
        max: usize,
    },

    /// Shrinking would go below the pool's minimum size.
    #[error("size decrease is too large. current: {current} removing: {removing} min: {min}")]
    BelowMinimumSize {
        /// Current target size.
        current: usize,
        /// Number of instances requested for removal.
        removing: usize,
        /// Pool minimum.
        min: usize,
    },

    /// The instance type cannot be purchased in the pool's region.
    #[error("server type {instance_type} not available in region {region}")]
    TypeUnavailableInRegion {
        /// Instance type name.
        instance_type: String,
        /// Region name.
        region: String,
    },

    /// The provider does not know the instance type.
    #[error("instance type not found: {0}")]
    TypeNotFound(String),

    /// Pool lookup or identifier error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The provider could not be reached before any instance work started.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(#[from] ProviderError),

    /// Configuration or bootstrap metadata error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ScalerError {
    /// Whether the caller can fix this error by changing the request.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidDelta { .. }
                | Self::MaxSizeExceeded { .. }
                | Self::BelowMinimumSize { .. }
                | Self::TypeUnavailableInRegion { .. }
                | Self::TypeNotFound(_)
        )
    }

    /// Check if this error is retriable.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::ProviderUnavailable(_))
    }

    /// Get the HTTP status code for this error.
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::InvalidDelta { .. } | Self::Core(CoreError::InvalidId(_)) => 400,
            Self::Core(CoreError::PoolNotFound(_)) => 404,
            Self::MaxSizeExceeded { .. } | Self::BelowMinimumSize { .. } => 409,
            Self::TypeUnavailableInRegion { .. } | Self::TypeNotFound(_) => 422,
            Self::Config(_) => 500,
            Self::ProviderUnavailable(_) => 503,
        }
    }
}

/// A specialized Result type for scaler operations.
pub type Result<T> = std::result::Result<T, ScalerError>;
