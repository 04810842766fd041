//! Provider trait and the request shape the engine sends.

use crate::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use prospector_keys::ApiKey;
use serde::{Deserialize, Serialize};

/// A text generation backend.
///
/// Providers hold no credentials of their own. Keyed providers name the
/// pool they draw from and receive a leased key with every call.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Identifier used in logs and errors.
    fn provider_id(&self) -> &str;

    /// Key pool this provider draws from, if it needs one.
    fn credential_service(&self) -> Option<&str> {
        None
    }

    /// Open a token stream for `request`.
    async fn stream(&self, request: CompletionRequest, key: Option<&ApiKey>)
        -> Result<CompletionStream>;

    /// Cheapest authenticated call, used to tell whether a spent key works again.
    async fn probe(&self, _key: &ApiKey) -> Result<()> {
        Ok(())
    }
}

/// A prompt and its sampling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Conversation so far, oldest first
    pub messages: Vec<Message>,

    /// Token budget for the answer
    pub max_tokens: Option<u32>,

    /// Sampling temperature
    pub temperature: Option<f32>,

    /// Instructions sent ahead of the conversation
    pub system_prompt: Option<String>,
}

impl CompletionRequest {
    /// A request holding a single user message.
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(content)],
            max_tokens: None,
            temperature: None,
            system_prompt: None,
        }
    }

    /// Set the token budget.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the system prompt.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

/// One turn of a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Who wrote the turn
    pub role: Role,

    /// Text of the turn
    pub content: String,
}

impl Message {
    /// A user turn.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions
    System,
    /// Prompt
    User,
    /// Earlier model output
    Assistant,
}

impl Role {
    /// Wire name used by chat-style APIs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Token stream returned by a provider.
pub type CompletionStream = BoxStream<'static, Result<StreamChunk>>;

/// A piece of streamed output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Text added by this chunk
    pub delta: String,

    /// Set on the last chunk
    pub is_final: bool,

    /// Why generation stopped, on the last chunk
    pub stop_reason: Option<String>,
}

impl StreamChunk {
    /// A non-final chunk carrying text.
    #[must_use]
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            delta: text.into(),
            is_final: false,
            stop_reason: None,
        }
    }

    /// The closing chunk of a stream.
    #[must_use]
    pub fn done(stop_reason: Option<String>) -> Self {
        Self {
            delta: String::new(),
            is_final: true,
            stop_reason,
        }
    }
}
