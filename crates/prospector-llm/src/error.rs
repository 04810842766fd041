//! Error types for the LLM subsystem.

use thiserror::Error;

/// Errors that can occur during text generation.
#[derive(Error, Debug)]
pub enum LlmError {
    /// No provider is registered, or none is left to try
    #[error("no suitable provider available for this request")]
    NoProviderAvailable,

    /// Every key in the provider's pool is spent
    #[error("every key for {provider} is exhausted")]
    KeysExhausted {
        /// Provider name
        provider: String,
    },

    /// API error with status code
    #[error("API error ({provider}): status {status}, {message}")]
    ApiError {
        /// Provider name
        provider: String,
        /// HTTP status code
        status: u16,
        /// Error message
        message: String,
    },

    /// Rate limit exceeded
    #[error("rate limit exceeded for {provider}: {message}")]
    RateLimitExceeded {
        /// Provider name
        provider: String,
        /// Error message
        message: String,
    },

    /// Invalid API key or authentication failure
    #[error("authentication failed for {provider}: {message}")]
    AuthenticationFailed {
        /// Provider name
        provider: String,
        /// Error message
        message: String,
    },

    /// Response parsing error
    #[error("failed to parse response from {provider}: {message}")]
    ParseError {
        /// Provider name
        provider: String,
        /// Error message
        message: String,
    },

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Request abandoned because the caller cancelled it
    #[error("request cancelled")]
    Cancelled,

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl LlmError {
    /// Map a non-success HTTP status to an error.
    #[must_use]
    pub fn from_status(provider: &str, status: u16, message: String) -> Self {
        let provider = provider.to_string();
        match status {
            402 | 429 => Self::RateLimitExceeded { provider, message },
            401 | 403 => Self::AuthenticationFailed { provider, message },
            _ => Self::ApiError {
                provider,
                status,
                message,
            },
        }
    }

    /// Whether the key used for the call is to blame.
    #[must_use]
    pub fn is_key_failure(&self) -> bool {
        matches!(
            self,
            Self::RateLimitExceeded { .. } | Self::AuthenticationFailed { .. }
        )
    }

    /// Whether another provider might succeed where this one failed.
    #[must_use]
    pub fn should_fallback(&self) -> bool {
        match self {
            Self::RateLimitExceeded { .. }
            | Self::AuthenticationFailed { .. }
            | Self::KeysExhausted { .. }
            | Self::Network(_) => true,
            Self::ApiError { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Result type alias for LLM operations.
pub type Result<T> = std::result::Result<T, LlmError>;
