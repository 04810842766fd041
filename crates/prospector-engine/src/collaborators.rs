//! Contracts of the services the engine drives.
//!
//! Directory scraping, email lookup, verification, messaging presence and
//! text generation all live behind these traits. The engine only decides
//! when to call them, with which key, and what to do with the answer.

use async_trait::async_trait;
use prospector_core::{Lead, LeadSource, SearchTask};
use prospector_db::{processed_domains, Database, DomainOutcome, ProcessedDomain};
use prospector_keys::{ApiKey, KeyedService, ServiceError};
use prospector_llm::{CompletionRequest, LlmError, LlmRouter};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One business directory or search provider.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Source this adapter serves.
    fn source(&self) -> LeadSource;

    /// Credential pool the adapter draws keys from, if it needs one.
    fn credential_service(&self) -> Option<&str> {
        None
    }

    /// Search for businesses matching `task.query` in `task.location`.
    ///
    /// `key` is set when [`credential_service`](Self::credential_service) is.
    /// Implementations must return promptly once `cancel` fires.
    async fn search(
        &self,
        task: &SearchTask,
        key: Option<&ApiKey>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Lead>, ServiceError>;

    /// Check whether a key works again after it was exhausted.
    async fn probe(&self, _key: &ApiKey) -> Result<(), ServiceError> {
        Ok(())
    }
}

/// Finds the most promising cities of a country for a niche.
#[async_trait]
pub trait LocationResearch: Send + Sync {
    /// Cities ranked best first.
    async fn best_cities(
        &self,
        country: &str,
        niche: &str,
        exclude_with_website: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, ServiceError>;
}

/// Text generation used for classification and expansion.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a completion, giving up when `cancel` fires.
    async fn generate(
        &self,
        request: CompletionRequest,
        cancel: &CancellationToken,
    ) -> prospector_llm::Result<String>;
}

#[async_trait]
impl TextGenerator for LlmRouter {
    async fn generate(
        &self,
        request: CompletionRequest,
        cancel: &CancellationToken,
    ) -> prospector_llm::Result<String> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(LlmError::Cancelled),
            result = LlmRouter::generate(self, request) => result,
        }
    }
}

/// Finds contact emails for a business.
#[async_trait]
pub trait EmailDiscovery: KeyedService {
    /// Look up an email for a website domain.
    async fn find_by_domain(&self, domain: &str, key: &ApiKey)
        -> Result<Option<String>, ServiceError>;

    /// Look up the email of a named person at a domain.
    async fn find_by_name(
        &self,
        _first: &str,
        _last: &str,
        _domain: &str,
        _key: &ApiKey,
    ) -> Result<Option<String>, ServiceError> {
        Ok(None)
    }
}

/// Checks whether an email address is deliverable.
#[async_trait]
pub trait EmailVerifier: KeyedService {
    /// Whether the service can be called without a configured key.
    fn requires_credentials(&self) -> bool {
        true
    }

    /// `true` when the address is deliverable.
    async fn verify(&self, email: &str, key: &ApiKey) -> Result<bool, ServiceError>;
}

/// Checks whether a phone number is registered on a messaging service.
#[async_trait]
pub trait PresenceChecker: Send + Sync {
    /// `true` when the phone has an account.
    async fn has_presence(&self, phone: &str) -> Result<bool, ServiceError>;
}

/// Domains already sent through email discovery, kept across runs.
#[async_trait]
pub trait ProcessedDomainStore: Send + Sync {
    /// Stored record for a domain.
    async fn lookup(&self, domain: &str) -> prospector_db::Result<Option<ProcessedDomain>>;

    /// Whether a domain has been processed.
    async fn is_processed(&self, domain: &str) -> prospector_db::Result<bool> {
        Ok(self.lookup(domain).await?.is_some())
    }

    /// Record the outcome of a lookup.
    async fn mark_processed(
        &self,
        domain: &str,
        outcome: DomainOutcome,
        email: Option<&str>,
    ) -> prospector_db::Result<()>;
}

#[async_trait]
impl ProcessedDomainStore for Database {
    async fn lookup(&self, domain: &str) -> prospector_db::Result<Option<ProcessedDomain>> {
        processed_domains::get_processed_domain(self.pool(), domain).await
    }

    async fn is_processed(&self, domain: &str) -> prospector_db::Result<bool> {
        processed_domains::is_domain_processed(self.pool(), domain).await
    }

    async fn mark_processed(
        &self,
        domain: &str,
        outcome: DomainOutcome,
        email: Option<&str>,
    ) -> prospector_db::Result<()> {
        processed_domains::mark_domain_processed(self.pool(), domain, outcome, email).await?;
        Ok(())
    }
}

/// Bound a service call by `limit`.
pub(crate) async fn bounded<T>(
    service: &str,
    limit: Duration,
    call: impl Future<Output = Result<T, ServiceError>>,
) -> Result<T, ServiceError> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ServiceError::Timeout {
            service: service.to_string(),
            seconds: limit.as_secs(),
        }),
    }
}

/// Bound a service call by `limit` and abandon it on cancellation.
pub(crate) async fn guarded<T>(
    service: &str,
    limit: Duration,
    cancel: &CancellationToken,
    call: impl Future<Output = Result<T, ServiceError>>,
) -> Result<T, ServiceError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(ServiceError::Cancelled),
        result = bounded(service, limit, call) => result,
    }
}

/// Lets the key manager probe a source's keys.
pub(crate) struct SourceKeys<'a> {
    pub(crate) service: &'a str,
    pub(crate) adapter: &'a dyn SourceAdapter,
}

#[async_trait]
impl KeyedService for SourceKeys<'_> {
    fn service_id(&self) -> &str {
        self.service
    }

    async fn probe(&self, key: &ApiKey) -> Result<(), ServiceError> {
        self.adapter.probe(key).await
    }
}
