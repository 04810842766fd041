//! Capability registry for outbound services.
//!
//! A run starts with every capability available. When the key rotation layer
//! reports hard exhaustion for a capability, the run disables it and stops
//! issuing calls that are guaranteed to fail, while the rest of the run keeps
//! going.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Outbound capabilities the engine depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Directory and search sources
    SourceSearch,
    /// Finding emails from a website domain
    EmailDiscovery,
    /// Checking email deliverability
    EmailVerification,
    /// Checking messaging-service registration of a phone
    MessagingPresence,
    /// Text generation (classification, nearby cities, query variations)
    TextGeneration,
}

impl Capability {
    /// Get a human-readable name for this capability.
    #[must_use]
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::SourceSearch => "Source Search",
            Self::EmailDiscovery => "Email Discovery",
            Self::EmailVerification => "Email Verification",
            Self::MessagingPresence => "Messaging Presence",
            Self::TextGeneration => "Text Generation",
        }
    }

    /// Every capability.
    #[must_use]
    pub fn all() -> &'static [Capability] {
        &[
            Self::SourceSearch,
            Self::EmailDiscovery,
            Self::EmailVerification,
            Self::MessagingPresence,
            Self::TextGeneration,
        ]
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Registry tracking which capabilities are still usable in the current run.
#[derive(Debug, Clone)]
pub struct CapabilityRegistry {
    available: HashSet<Capability>,
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityRegistry {
    /// Create a registry with every capability available.
    #[must_use]
    pub fn new() -> Self {
        Self {
            available: Capability::all().iter().copied().collect(),
        }
    }

    /// Check if a capability is still usable.
    #[must_use]
    pub fn is_available(&self, capability: Capability) -> bool {
        self.available.contains(&capability)
    }

    /// Mark a capability as exhausted for the rest of the run.
    ///
    /// Returns `true` if the capability was available before this call.
    pub fn disable(&mut self, capability: Capability) -> bool {
        let was_available = self.available.remove(&capability);
        if was_available {
            tracing::debug!("Disabling capability: {:?}", capability);
        }
        was_available
    }

    /// Capabilities that have been disabled, in a stable order.
    #[must_use]
    pub fn disabled(&self) -> Vec<Capability> {
        Capability::all()
            .iter()
            .copied()
            .filter(|c| !self.available.contains(c))
            .collect()
    }
}
