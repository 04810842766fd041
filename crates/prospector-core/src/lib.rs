//! Prospector Core - Foundation crate for the Prospector lead discovery engine.
//!
//! This crate provides shared types, error handling, configuration management,
//! and the capability registry that all other Prospector crates depend on.
//!
//! # Modules
//!
//! - [`error`] - Central error types using thiserror
//! - [`config`] - TOML-based configuration with XDG paths
//! - [`types`] - Domain types (`Lead`, `SearchTask`, `LeadSource`, `SearchPreferences`)
//! - [`capabilities`] - Per-run registry of which outbound capabilities are still usable
//!
//! # Example
//!
//! ```rust
//! use prospector_core::{AppConfig, LeadFilters, SearchPreferences};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::default();
//! assert_eq!(config.search.max_rounds, 10);
//!
//! let prefs = SearchPreferences::new("dentist", vec!["France".to_string()], 5)
//!     .with_filters(LeadFilters {
//!         exclude_with_website: true,
//!         ..LeadFilters::default()
//!     });
//! prefs.validate()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod capabilities;
pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use capabilities::{Capability, CapabilityRegistry};
pub use config::{
    AppConfig, ChainStepConfig, EnrichmentConfig, LlmConfig, SearchConfig, StorageConfig,
};
pub use error::{ConfigError, ConfigResult, ProspectorError, Result};
pub use types::{
    EnrichmentOptions, Lead, LeadFilters, LeadSource, LeadStatus, SearchPreferences, SearchTask,
    TaskStatus, Tier, Timestamp,
};
