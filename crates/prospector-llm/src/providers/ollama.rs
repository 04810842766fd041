//! Ollama local provider.

use super::common::{build_http_client, check_status, LineBuffer};
use crate::error::{LlmError, Result};
use crate::provider::{CompletionRequest, CompletionStream, LlmProvider, Role, StreamChunk};
use async_trait::async_trait;
use futures::{stream, StreamExt};
use prospector_keys::ApiKey;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const PROVIDER: &str = "ollama";

/// Ollama provider.
///
/// Talks to `/api/generate`; streaming responses arrive as one JSON object
/// per line. Needs no key.
pub struct OllamaProvider {
    model: String,
    client: Client,
    base_url: String,
}

impl OllamaProvider {
    /// Provider for the default model on localhost.
    pub fn new() -> Result<Self> {
        Self::with_url("http://localhost:11434", "llama3.1:8b")
    }

    /// Provider for `model` served at `base_url`.
    pub fn with_url(base_url: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        Ok(Self {
            model: model.into(),
            client: build_http_client(Some(120))?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Replace the HTTP client, e.g. to change the timeout.
    #[must_use]
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    fn to_api_request(&self, request: &CompletionRequest) -> GenerateRequest {
        let mut prompt_parts: Vec<String> = request
            .messages
            .iter()
            .map(|message| {
                let prefix = match message.role {
                    Role::User => "User:",
                    Role::Assistant => "Assistant:",
                    Role::System => "System:",
                };
                format!("{prefix} {}", message.content)
            })
            .collect();
        prompt_parts.push("Assistant:".to_string());

        GenerateRequest {
            model: self.model.clone(),
            prompt: prompt_parts.join("\n\n"),
            system: request.system_prompt.clone(),
            stream: true,
            options: GenerateOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens.and_then(|t| i32::try_from(t).ok()),
            },
        }
    }
}

/// Parse one line of streaming output.
pub(crate) fn parse_ndjson_line(line: &str) -> Result<StreamChunk> {
    let event: GenerateEvent = serde_json::from_str(line).map_err(|e| LlmError::ParseError {
        provider: PROVIDER.to_string(),
        message: format!("bad stream line: {e}"),
    })?;

    if event.done {
        let mut chunk = StreamChunk::done(event.done_reason.or_else(|| Some("stop".to_string())));
        chunk.delta = event.response;
        Ok(chunk)
    } else {
        Ok(StreamChunk::delta(event.response))
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn provider_id(&self) -> &str {
        PROVIDER
    }

    async fn stream(
        &self,
        request: CompletionRequest,
        _key: Option<&ApiKey>,
    ) -> Result<CompletionStream> {
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
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
                        .map(|line| parse_ndjson_line(line))
                        .collect(),
                    Err(e) => vec![Err(LlmError::Network(e))],
                }
            })
            .flat_map(stream::iter);

        Ok(Box::pin(chunks))
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Default, Serialize)]
struct GenerateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct GenerateEvent {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_defaults() {
        let provider = OllamaProvider::new().expect("create provider");
        assert_eq!(provider.provider_id(), "ollama");
        assert_eq!(provider.credential_service(), None);
        assert_eq!(provider.model, "llama3.1:8b");
        assert_eq!(provider.base_url, "http://localhost:11434");
    }

    #[test]
    fn test_provider_with_custom_url() {
        let provider = OllamaProvider::with_url("http://gpu-box:11434/", "qwen2.5:7b")
            .expect("create provider");
        assert_eq!(provider.base_url, "http://gpu-box:11434");
        assert_eq!(provider.model, "qwen2.5:7b");
    }

    #[test]
    fn test_api_request_conversion() {
        let provider = OllamaProvider::new().expect("create provider");
        let request = CompletionRequest::new("Is Bordeaux a city or a country?")
            .with_max_tokens(16)
            .with_temperature(0.0)
            .with_system_prompt("Answer with one word");

        let api_request = provider.to_api_request(&request);

        assert!(api_request.stream);
        assert_eq!(api_request.system.as_deref(), Some("Answer with one word"));
        assert!(api_request.prompt.contains("User: Is Bordeaux"));
        assert!(api_request.prompt.ends_with("Assistant:"));
        assert_eq!(api_request.options.num_predict, Some(16));
    }

    #[test]
    fn test_parse_ndjson_lines() {
        let chunk = parse_ndjson_line(r#"{"model":"llama3.1:8b","response":"Ly","done":false}"#)
            .expect("valid line");
        assert_eq!(chunk, StreamChunk::delta("Ly"));

        let last = parse_ndjson_line(
            r#"{"model":"llama3.1:8b","response":"","done":true,"done_reason":"length"}"#,
        )
        .expect("valid line");
        assert!(last.is_final);
        assert_eq!(last.stop_reason.as_deref(), Some("length"));
    }

    #[test]
    fn test_parse_ndjson_bad_line() {
        assert!(matches!(
            parse_ndjson_line("not json"),
            Err(LlmError::ParseError { .. })
        ));
    }
}
