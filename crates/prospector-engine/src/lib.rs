//! Prospector Engine - goal-driven lead discovery.
//!
//! This crate turns a niche, a set of locations and a target lead count into
//! qualified business leads. It plans search tasks, races every source
//! concurrently, runs each result batch through a filter, dedupe, score and
//! enrich pipeline, and keeps expanding the search space until the target is
//! met or nothing new can be found.
//!
//! # Features
//!
//! - **Never-stop loop** bounded by a round cap and four expansion strategies
//! - **Concurrent task racer** with broadcast cancellation and early exit
//! - **Key rotation** with per-service pools and ordered fallback chains
//! - **Typed events** for plan updates, logs, leads and the final summary
//!
//! # Example
//!
//! ```rust,ignore
//! use prospector_engine::{event_channel, LeadOrchestrator};
//! use prospector_core::SearchPreferences;
//! use std::sync::Arc;
//!
//! let orchestrator = LeadOrchestrator::builder()
//!     .with_source(Arc::new(maps_adapter))
//!     .build();
//!
//! let (events, mut rx) = event_channel();
//! let preferences = SearchPreferences::new("dentist", vec!["France".into()], 25);
//! let summary = orchestrator.run(preferences, &events).await?;
//! println!("{} leads ({})", summary.lead_count, summary.terminal);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod collaborators;
pub mod error;
pub mod events;
pub mod expansion;
pub mod fallback_cities;
pub mod generation;
pub mod orchestrator;
pub mod pipeline;
mod planner;
pub mod racer;
pub mod state;

// Re-export commonly used types
pub use collaborators::{
    EmailDiscovery, EmailVerifier, LocationResearch, PresenceChecker, ProcessedDomainStore,
    SourceAdapter, TextGenerator,
};
pub use error::{EngineError, Result};
pub use events::{event_channel, EventEmitter, LogEntry, RunEvent, Severity};
pub use expansion::Strategy;
pub use generation::{GeneratedLocationResearch, StaticLocationResearch};
pub use orchestrator::{LeadOrchestrator, LeadOrchestratorBuilder};
pub use pipeline::enrich::{DropReason, Enricher};
pub use pipeline::{BatchOutcome, LeadPipeline};
pub use racer::BatchReport;
pub use state::{RunState, RunSummary, TerminalState};
