//! Error types for credentialed service calls.

use thiserror::Error;

/// Failure reported by one call to an external service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Rate limit or quota exceeded for the key used
    #[error("rate limit exceeded for {service}: {message}")]
    RateLimited {
        /// Service name
        service: String,
        /// Error message
        message: String,
    },

    /// Key rejected by the service
    #[error("authentication failed for {service}: {message}")]
    Unauthorized {
        /// Service name
        service: String,
        /// Error message
        message: String,
    },

    /// Service unreachable or failing server-side
    #[error("{service} unavailable: {message}")]
    Unavailable {
        /// Service name
        service: String,
        /// Error message
        message: String,
    },

    /// Call exceeded its time budget
    #[error("{service} timed out after {seconds}s")]
    Timeout {
        /// Service name
        service: String,
        /// Timeout in seconds
        seconds: u64,
    },

    /// Call aborted by run cancellation
    #[error("call cancelled")]
    Cancelled,

    /// Any other failure
    #[error("{service} error: {message}")]
    Other {
        /// Service name
        service: String,
        /// Error message
        message: String,
    },
}

impl ServiceError {
    /// Classify an HTTP status returned by `service`.
    ///
    /// 429 and 402 (quota) are rate limits, 401 and 403 are key rejections,
    /// 5xx is unavailability.
    #[must_use]
    pub fn from_status(service: &str, status: u16, message: impl Into<String>) -> Self {
        let service = service.to_string();
        let message = message.into();
        match status {
            402 | 429 => Self::RateLimited { service, message },
            401 | 403 => Self::Unauthorized { service, message },
            500..=599 => Self::Unavailable { service, message },
            _ => Self::Other { service, message },
        }
    }

    /// Whether the failure is tied to the key, so rotating may help.
    #[must_use]
    pub fn is_key_failure(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Unauthorized { .. })
    }
}

/// Errors from key selection and fallback chains.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// No pool is registered under this name
    #[error("no credential pool registered for {service}")]
    UnknownService {
        /// Service name
        service: String,
    },

    /// Every key in the pool is exhausted, reset check included
    #[error("all keys exhausted for {service}")]
    AllExhausted {
        /// Service name
        service: String,
    },

    /// Every service in a fallback chain is exhausted
    #[error("resource exhausted: every service for {chain} is out of credits")]
    HardExhausted {
        /// Chain name
        chain: String,
    },

    /// A call failed for a reason rotation cannot fix
    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl KeyError {
    /// Whether this error means the capability is out of credentials.
    #[must_use]
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, Self::AllExhausted { .. } | Self::HardExhausted { .. })
    }
}

/// Result type alias for key operations.
pub type Result<T> = std::result::Result<T, KeyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            ServiceError::from_status("finder", 429, "slow down"),
            ServiceError::RateLimited { .. }
        ));
        assert!(matches!(
            ServiceError::from_status("finder", 402, "out of credits"),
            ServiceError::RateLimited { .. }
        ));
        assert!(matches!(
            ServiceError::from_status("finder", 401, "bad key"),
            ServiceError::Unauthorized { .. }
        ));
        assert!(matches!(
            ServiceError::from_status("finder", 503, "down"),
            ServiceError::Unavailable { .. }
        ));
        assert!(matches!(
            ServiceError::from_status("finder", 404, "missing"),
            ServiceError::Other { .. }
        ));
    }

    #[test]
    fn test_key_failure() {
        assert!(ServiceError::from_status("s", 429, "").is_key_failure());
        assert!(ServiceError::from_status("s", 403, "").is_key_failure());
        assert!(!ServiceError::from_status("s", 500, "").is_key_failure());
        assert!(!ServiceError::Cancelled.is_key_failure());
    }

    #[test]
    fn test_error_display() {
        let err = KeyError::HardExhausted {
            chain: "email discovery".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "resource exhausted: every service for email discovery is out of credits"
        );
        assert!(err.is_exhaustion());

        let err: KeyError = ServiceError::Timeout {
            service: "verifier".to_string(),
            seconds: 10,
        }
        .into();
        assert_eq!(err.to_string(), "verifier timed out after 10s");
        assert!(!err.is_exhaustion());
    }
}
