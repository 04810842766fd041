//! LLM routing with ordered provider fallback.

use crate::error::{LlmError, Result};
use crate::provider::{CompletionRequest, CompletionStream, LlmProvider};
use crate::providers::common::build_http_client;
use crate::providers::{OllamaProvider, OpenAiProvider, OPENAI_KEY_POOL};
use async_trait::async_trait;
use futures::StreamExt;
use prospector_core::LlmConfig;
use prospector_keys::{ApiKey, KeyRotationManager, KeyedService, ServiceError};
use std::sync::Arc;
use tracing::{debug, warn};

/// Router that tries providers in registration order.
///
/// Keyed providers draw a key from the shared [`KeyRotationManager`] for
/// every attempt. A key that is rate limited or rejected is marked
/// exhausted and the next one is tried; once the pool is spent the router
/// moves to the next provider. Network and server errors also hand the
/// request on. Other errors are returned immediately.
pub struct LlmRouter {
    providers: Vec<Arc<dyn LlmProvider>>,
    keys: Arc<KeyRotationManager>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

impl Default for LlmRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmRouter {
    /// Create a router with no providers and an empty key manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            keys: Arc::new(KeyRotationManager::new()),
            max_tokens: None,
            temperature: None,
        }
    }

    /// Build a router from configuration.
    ///
    /// The `openai` provider is only added when `keys` holds an `openai`
    /// pool. Its keys rotate through that pool, shared with the rest of the
    /// run.
    pub fn from_config(config: &LlmConfig, keys: Arc<KeyRotationManager>) -> Result<Self> {
        let mut router = Self::new()
            .with_keys(keys)
            .with_defaults(config.max_tokens, config.temperature);

        for name in &config.providers {
            match name.as_str() {
                "openai" if router.keys.has_keys(OPENAI_KEY_POOL) => {
                    let provider = OpenAiProvider::new(config.openai_model.clone())?
                        .with_base_url(config.openai_base_url.clone())
                        .with_client(build_http_client(Some(config.timeout_secs))?);
                    router.add_provider(Arc::new(provider));
                }
                "openai" => debug!("No openai keys configured, skipping provider"),
                "ollama" => {
                    let provider = OllamaProvider::with_url(
                        config.ollama_url.clone(),
                        config.ollama_model.clone(),
                    )?
                    .with_client(build_http_client(Some(config.timeout_secs))?);
                    router.add_provider(Arc::new(provider));
                }
                other => warn!("Unknown LLM provider in config: {}", other),
            }
        }

        debug!("LLM router built with {} provider(s)", router.providers.len());
        Ok(router)
    }

    /// Share a key manager with the rest of the application.
    #[must_use]
    pub fn with_keys(mut self, keys: Arc<KeyRotationManager>) -> Self {
        self.keys = keys;
        self
    }

    /// Defaults applied to requests that leave them unset.
    #[must_use]
    pub fn with_defaults(mut self, max_tokens: u32, temperature: f32) -> Self {
        self.max_tokens = Some(max_tokens);
        self.temperature = Some(temperature);
        self
    }

    /// Add a provider to the end of the fallback order.
    pub fn add_provider(&mut self, provider: Arc<dyn LlmProvider>) {
        self.providers.push(provider);
    }

    /// Whether at least one provider is registered.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.providers.is_empty()
    }

    /// Identifiers of the registered providers, in fallback order.
    #[must_use]
    pub fn provider_ids(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.provider_id()).collect()
    }

    /// Stream a completion and collect the text.
    ///
    /// A provider whose stream breaks before producing any text is treated
    /// like a failed request and the next provider is tried.
    pub async fn generate(&self, request: CompletionRequest) -> Result<String> {
        let request = self.apply_defaults(request);
        let mut last_error = LlmError::NoProviderAvailable;

        for provider in &self.providers {
            match self.attempt(provider.as_ref(), &request).await {
                Ok(text) => return Ok(text),
                Err(e) if e.should_fallback() => {
                    warn!("{} failed, trying next provider: {}", provider.provider_id(), e);
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error)
    }

    /// One provider, rotating through its keys when it needs them.
    async fn attempt(
        &self,
        provider: &dyn LlmProvider,
        request: &CompletionRequest,
    ) -> Result<String> {
        let Some(service) = provider.credential_service() else {
            return collect_text(provider.stream(request.clone(), None).await?).await;
        };

        let prober = ProviderKeys { service, provider };
        loop {
            let lease = self.keys.next_key(service, &prober).await.map_err(|err| {
                debug!("No key for {}: {}", provider.provider_id(), err);
                LlmError::KeysExhausted {
                    provider: provider.provider_id().to_string(),
                }
            })?;

            let result = match provider.stream(request.clone(), Some(&lease.key)).await {
                Ok(stream) => collect_text(stream).await,
                Err(e) => Err(e),
            };
            match result {
                Err(err) if err.is_key_failure() => {
                    self.keys.mark_exhausted(&lease, &err.to_string());
                }
                other => return other,
            }
        }
    }

    fn apply_defaults(&self, mut request: CompletionRequest) -> CompletionRequest {
        if request.max_tokens.is_none() {
            request.max_tokens = self.max_tokens;
        }
        if request.temperature.is_none() {
            request.temperature = self.temperature;
        }
        request
    }
}

/// Lets the key manager probe a provider's spent keys.
struct ProviderKeys<'a> {
    service: &'a str,
    provider: &'a dyn LlmProvider,
}

#[async_trait]
impl<'a> KeyedService for ProviderKeys<'a> {
    fn service_id(&self) -> &str {
        self.service
    }

    async fn probe(&self, key: &ApiKey) -> std::result::Result<(), ServiceError> {
        let service = self.service.to_string();
        self.provider.probe(key).await.map_err(|err| match err {
            LlmError::RateLimitExceeded { message, .. } => {
                ServiceError::RateLimited { service, message }
            }
            LlmError::AuthenticationFailed { message, .. } => {
                ServiceError::Unauthorized { service, message }
            }
            LlmError::Cancelled => ServiceError::Cancelled,
            other => ServiceError::Unavailable {
                service,
                message: other.to_string(),
            },
        })
    }
}

async fn collect_text(mut stream: CompletionStream) -> Result<String> {
    let mut text = String::new();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => {
                text.push_str(&chunk.delta);
                if chunk.is_final {
                    break;
                }
            }
            // Partial output is kept once text has started arriving.
            Err(e) if !text.is_empty() => {
                warn!("Stream ended early: {}", e);
                break;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(text)
}
