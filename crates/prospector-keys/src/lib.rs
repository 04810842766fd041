//! Prospector Keys - Credential Rotation
//!
//! This crate manages API keys for the paid services the engine calls.
//! Each service owns a pool of keys used round-robin; keys that hit a rate
//! limit or are rejected are set aside. Services serving the same capability
//! are ordered in a [`FallbackChain`] so that work moves to the next service
//! when one runs dry.
//!
//! # Example
//!
//! ```rust
//! use prospector_keys::{ApiKey, FallbackChain, FallbackStep, KeyRotationManager};
//!
//! let manager = KeyRotationManager::new()
//!     .with_pool("finder", vec![ApiKey::new("k1"), ApiKey::new("k2")])
//!     .with_pool("backup", vec![ApiKey::new("k3")]);
//!
//! let chain = FallbackChain::new(
//!     "email discovery",
//!     vec![FallbackStep::new("finder", true), FallbackStep::new("backup", false)],
//! );
//! assert_eq!(chain.steps().len(), 2);
//! assert!(manager.has_keys("finder"));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod chain;
pub mod error;
pub mod key;
pub mod manager;
pub mod pool;

// Re-export commonly used types
pub use chain::{FallbackChain, FallbackStep};
pub use error::{KeyError, Result, ServiceError};
pub use key::ApiKey;
pub use manager::{KeyRotationManager, KeyedService};
pub use pool::{KeyLease, KeyPool, PoolStatus, Selection};
