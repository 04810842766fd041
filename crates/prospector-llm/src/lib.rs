//! Prospector LLM - text generation with provider fallback.
//!
//! This crate provides a unified interface over an OpenAI-compatible API and
//! a local Ollama server. The engine uses it to classify locations, suggest
//! nearby cities and vary search queries.
//!
//! # Features
//!
//! - **Provider Abstraction**: one streaming trait, keys leased per call
//! - **Key Rotation**: `openai` keys rotate through the shared key manager
//! - **Ordered Fallback**: a provider with a spent pool hands off to the next
//! - **Streaming**: server-sent events and line-delimited JSON
//!
//! # Example
//!
//! ```rust,no_run
//! use prospector_llm::{CompletionRequest, LlmRouter, OllamaProvider};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut router = LlmRouter::new();
//! router.add_provider(Arc::new(OllamaProvider::new()?));
//!
//! let request = CompletionRequest::new("List five cities near Lyon as a JSON array");
//! let text = router.generate(request).await?;
//! println!("{text}");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod error;
pub mod provider;
pub mod providers;
pub mod router;

// Re-export commonly used types
pub use error::{LlmError, Result};
pub use provider::{CompletionRequest, CompletionStream, LlmProvider, Message, Role, StreamChunk};
pub use providers::{OllamaProvider, OpenAiProvider, OPENAI_KEY_POOL};
pub use router::LlmRouter;
