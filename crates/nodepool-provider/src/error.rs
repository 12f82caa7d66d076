//! Error types for the provider crate.

use thiserror::Error;

/// Errors returned by a cloud provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The HTTP request could not be completed.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The provider API rejected the request.
    #[error("provider API error ({status} {code}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Provider error code, e.g. `rate_limit_exceeded`.
        code: String,
        /// Human-readable message.
        message: String,
    },

    /// The requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The provider response could not be decoded.
    #[error("failed to decode provider response: {0}")]
    Decode(String),

    /// The provider cannot be reached at all.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The client is misconfigured.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    /// Check if this error is retriable.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Unavailable(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::NotFound(_) | Self::Decode(_) | Self::Config(_) => false,
        }
    }
}

/// A specialized Result type for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_classification() {
        let rate_limited = ProviderError::Api {
            status: 429,
            code: "rate_limit_exceeded".to_string(),
            message: "slow down".to_string(),
        };
        let invalid = ProviderError::Api {
            status: 422,
            code: "invalid_input".to_string(),
            message: "bad".to_string(),
        };

        assert!(rate_limited.is_retriable());
        assert!(!invalid.is_retriable());
        assert!(ProviderError::Unavailable("down".to_string()).is_retriable());
        assert!(!ProviderError::NotFound("cx99".to_string()).is_retriable());
    }
}
