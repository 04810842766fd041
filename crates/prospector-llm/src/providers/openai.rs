//! `OpenAI`-compatible chat completions provider.
//!
//! Works against any server exposing `/chat/completions`, with streaming over
//! server-sent events. Keys come from the `openai` pool, one lease per call.

use super::common::{build_http_client, check_status, ChatMessage, LineBuffer};
use crate::error::{LlmError, Result};
use crate::provider::{CompletionRequest, CompletionStream, LlmProvider, StreamChunk};
use async_trait::async_trait;
use futures::{stream, StreamExt};
use prospector_keys::ApiKey;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const PROVIDER: &str = "openai";

/// Key pool the provider draws from.
pub const OPENAI_KEY_POOL: &str = "openai";

/// `OpenAI`-compatible API provider.
pub struct OpenAiProvider {
    model: String,
    client: Client,
    base_url: String,
}

impl OpenAiProvider {
    /// Provider for `model` on the public `OpenAI` API.
    pub fn new(model: impl Into<String>) -> Result<Self> {
        Ok(Self {
            model: model.into(),
            client: build_http_client(Some(60))?,
            base_url: "https://api.openai.com/v1".to_string(),
        })
    }

    /// Point the provider at another compatible server.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Replace the HTTP client, e.g. to change the timeout.
    #[must_use]
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    fn to_api_request(&self, request: &CompletionRequest) -> ChatRequest {
        let system = request.system_prompt.iter().map(|prompt| ChatMessage {
            role: "system".to_string(),
            content: prompt.clone(),
        });
        let turns = request.messages.iter().map(|message| ChatMessage {
            role: message.role.as_str().to_string(),
            content: message.content.clone(),
        });

        ChatRequest {
            model: self.model.clone(),
            messages: system.chain(turns).collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream: true,
        }
    }
}

/// Parse one server-sent event line into a chunk.
///
/// Returns `None` for comments, keep-alives and events without text.
pub(crate) fn parse_sse_line(line: &str) -> Option<Result<StreamChunk>> {
    let payload = line.strip_prefix("data:")?.trim();
    if payload == "[DONE]" {
        return Some(Ok(StreamChunk::done(Some("stop".to_string()))));
    }

    let event: StreamEvent = match serde_json::from_str(payload) {
        Ok(event) => event,
        Err(e) => {
            return Some(Err(LlmError::ParseError {
                provider: PROVIDER.to_string(),
                message: format!("bad stream event: {e}"),
            }))
        }
    };

    let choice = event.choices.into_iter().next()?;
    match (choice.delta.content, choice.finish_reason) {
        (Some(text), _) if !text.is_empty() => Some(Ok(StreamChunk::delta(text))),
        (_, Some(reason)) => Some(Ok(StreamChunk::done(Some(reason)))),
        _ => None,
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn provider_id(&self) -> &str {
        PROVIDER
    }

    fn credential_service(&self) -> Option<&str> {
        Some(OPENAI_KEY_POOL)
    }

    async fn stream(
        &self,
        request: CompletionRequest,
        key: Option<&ApiKey>,
    ) -> Result<CompletionStream> {
        let key = key.ok_or(LlmError::KeysExhausted {
            provider: PROVIDER.to_string(),
        })?;
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(key.expose())
            .json(&self.to_api_request(&request))
            .send()
            .await?;
        let response = check_status(PROVIDER, response).await?;

        let mut buffer = LineBuffer::default();
        let chunks = response
            .bytes_stream()
            .map(move |bytes| -> Vec<Result<StreamChunk>> {
                match bytes {
                    Ok(bytes) => buffer
                        .push(&bytes)
                        .iter()
                        .filter_map(|line| parse_sse_line(line))
                        .collect(),
                    Err(e) => vec![Err(LlmError::Network(e))],
                }
            })
            .flat_map(stream::iter);

        Ok(Box::pin(chunks))
    }

    async fn probe(&self, key: &ApiKey) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(key.expose())
            .send()
            .await?;
        check_status(PROVIDER, response).await.map(|_| ())
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    content: Option<String>,
}
