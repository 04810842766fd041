//! Error types for the discovery engine.
//!
//! Only problems that prevent a run from starting are errors. Transient
//! failures, exhausted capabilities and cancellation are reported through the
//! event channel and the run summary instead.

use prospector_core::Capability;
use thiserror::Error;

/// Errors returned by the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Preferences describe a search that cannot run
    #[error("invalid preferences: {0}")]
    InvalidPreferences(#[from] prospector_core::ProspectorError),

    /// None of the requested sources has a registered adapter
    #[error("no source adapter registered for the requested sources")]
    NoSources,

    /// A requested capability has no service to call
    #[error("{capability} requested but no service is configured")]
    CapabilityUnconfigured {
        /// Capability that cannot be served
        capability: Capability,
    },

    /// A service needs credentials and none were configured
    #[error("no credentials configured for {service}")]
    MissingCredentials {
        /// Service name as used in the credential pools
        service: String,
    },

    /// Text generation could not be set up from configuration
    #[error("text generation setup failed: {0}")]
    Llm(#[from] prospector_llm::LlmError),

    /// Run history could not be written
    #[error("database error: {0}")]
    Database(#[from] prospector_db::DatabaseError),
}

impl EngineError {
    /// Whether this error means the run never started.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Database(_))
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::CapabilityUnconfigured {
            capability: Capability::EmailVerification,
        };
        assert_eq!(
            err.to_string(),
            "Email Verification requested but no service is configured"
        );

        let err = EngineError::MissingCredentials {
            service: "maps-api".to_string(),
        };
        assert_eq!(err.to_string(), "no credentials configured for maps-api");
    }

    #[test]
    fn test_fatal_classification() {
        assert!(EngineError::NoSources.is_fatal());
        assert!(!EngineError::Database(prospector_db::DatabaseError::NotFound(
            "run".to_string()
        ))
        .is_fatal());
    }
}
