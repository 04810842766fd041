//! Optional enrichment: messaging presence, email discovery and email
//! verification.
//!
//! Discovery and verification run through fallback chains. When a chain is
//! hard-exhausted the capability is disabled for the rest of the run and a
//! resource-exhausted event is emitted; later leads skip that step instead
//! of spending calls that cannot succeed.

use crate::collaborators::{
    bounded, guarded, EmailDiscovery, EmailVerifier, PresenceChecker, ProcessedDomainStore,
};
use crate::error::EngineError;
use crate::events::EventEmitter;
use prospector_core::{Capability, CapabilityRegistry, EnrichmentOptions, Lead};
use prospector_db::DomainOutcome;
use prospector_keys::{
    ApiKey, FallbackChain, KeyError, KeyLease, KeyRotationManager, KeyedService, ServiceError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Metadata key holding the contact person's full name, when a source has one.
pub const METADATA_CONTACT_NAME: &str = "contact_name";

/// Metadata key set when verification was skipped or could not complete.
pub const METADATA_VERIFICATION: &str = "email_verification";

const DOMAIN_STORE: &str = "processed-domains";

/// Why enrichment dropped a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Presence check requested and the lead has no phone
    NoPhone,
    /// Phone not registered on the messaging service
    NoPresence,
    /// Verification requested and the lead has no email
    NoEmail,
    /// Email reported undeliverable
    EmailRejected,
    /// Verification gave a hard error other than exhaustion or a transient
    /// outage
    VerificationFailed,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::NoPhone => "no phone to check",
            Self::NoPresence => "no messaging presence",
            Self::NoEmail => "no email to verify",
            Self::EmailRejected => "email undeliverable",
            Self::VerificationFailed => "verification failed",
        };
        f.write_str(text)
    }
}

/// Result of enriching one lead.
#[derive(Debug)]
pub enum Enrichment {
    /// Lead survived every requested step
    Keep(Lead),
    /// Lead was dropped
    Drop(DropReason),
    /// The run was cancelled mid-step
    Cancelled,
}

enum Step {
    Continue,
    Drop(DropReason),
    Cancelled,
}

/// Runs the enrichment steps requested by the preferences.
pub struct Enricher {
    keys: Arc<KeyRotationManager>,
    discovery_chain: FallbackChain,
    discovery: Vec<Arc<dyn EmailDiscovery>>,
    verification_chain: FallbackChain,
    verifiers: Vec<Arc<dyn EmailVerifier>>,
    presence: Option<Arc<dyn PresenceChecker>>,
    domains: Option<Arc<dyn ProcessedDomainStore>>,
    call_timeout: Duration,
}

impl Enricher {
    /// Create an enricher with no services.
    #[must_use]
    pub fn new(keys: Arc<KeyRotationManager>, call_timeout: Duration) -> Self {
        Self {
            keys,
            discovery_chain: FallbackChain::new("email discovery", Vec::new()),
            discovery: Vec::new(),
            verification_chain: FallbackChain::new("email verification", Vec::new()),
            verifiers: Vec::new(),
            presence: None,
            domains: None,
            call_timeout,
        }
    }

    /// Set the discovery chain and the services it may call.
    #[must_use]
    pub fn with_discovery(
        mut self,
        chain: FallbackChain,
        services: Vec<Arc<dyn EmailDiscovery>>,
    ) -> Self {
        self.discovery_chain = chain;
        self.discovery = services;
        self
    }

    /// Set the verification chain and the services it may call.
    ///
    /// Verifiers that need no credentials get a single anonymous key so the
    /// chain can rotate through them like any other service.
    #[must_use]
    pub fn with_verification(
        mut self,
        chain: FallbackChain,
        services: Vec<Arc<dyn EmailVerifier>>,
    ) -> Self {
        for verifier in &services {
            let id = verifier.service_id();
            if !verifier.requires_credentials() && !self.keys.has_keys(id) {
                tracing::debug!("Registering anonymous key for free verifier {}", id);
                self.keys.register(id, vec![ApiKey::anonymous()]);
            }
        }
        self.verification_chain = chain;
        self.verifiers = services;
        self
    }

    /// Set the messaging presence checker.
    #[must_use]
    pub fn with_presence(mut self, checker: Arc<dyn PresenceChecker>) -> Self {
        self.presence = Some(checker);
        self
    }

    /// Set the processed-domain store consulted before discovery.
    #[must_use]
    pub fn with_domain_store(mut self, store: Arc<dyn ProcessedDomainStore>) -> Self {
        self.domains = Some(store);
        self
    }

    /// Names of chain services that have keys or are free.
    fn usable_services(&self, chain: &FallbackChain) -> usize {
        chain
            .steps()
            .iter()
            .filter(|step| self.keys.has_keys(&step.service))
            .count()
    }

    /// Whether email discovery can be attempted at all.
    #[must_use]
    pub fn can_discover(&self) -> bool {
        !self.discovery.is_empty() && self.usable_services(&self.discovery_chain) > 0
    }

    /// Whether email verification can be attempted at all.
    #[must_use]
    pub fn can_verify(&self) -> bool {
        !self.verifiers.is_empty() && self.usable_services(&self.verification_chain) > 0
    }

    /// Whether a presence checker is configured.
    #[must_use]
    pub fn can_check_presence(&self) -> bool {
        self.presence.is_some()
    }

    /// Check that every requested step has a service it can call.
    pub fn preflight(&self, options: &EnrichmentOptions) -> crate::Result<()> {
        if options.check_messaging_presence && !self.can_check_presence() {
            return Err(EngineError::CapabilityUnconfigured {
                capability: Capability::MessagingPresence,
            });
        }
        if options.discover_emails {
            self.ensure_chain(
                Capability::EmailDiscovery,
                &self.discovery_chain,
                self.discovery.len(),
            )?;
        }
        if options.verify_emails {
            self.ensure_chain(
                Capability::EmailVerification,
                &self.verification_chain,
                self.verifiers.len(),
            )?;
        }
        Ok(())
    }

    fn ensure_chain(
        &self,
        capability: Capability,
        chain: &FallbackChain,
        services: usize,
    ) -> crate::Result<()> {
        let Some(first) = chain.steps().first() else {
            return Err(EngineError::CapabilityUnconfigured { capability });
        };
        if services == 0 {
            return Err(EngineError::CapabilityUnconfigured { capability });
        }
        if self.usable_services(chain) == 0 {
            return Err(EngineError::MissingCredentials {
                service: first.service.clone(),
            });
        }
        Ok(())
    }

    /// Apply the requested steps in order: presence, discovery, verification.
    pub async fn enrich(
        &self,
        mut lead: Lead,
        options: &EnrichmentOptions,
        capabilities: &mut CapabilityRegistry,
        events: &EventEmitter,
        cancel: &CancellationToken,
    ) -> Enrichment {
        if options.check_messaging_presence {
            match self.check_presence(&mut lead, capabilities, events, cancel).await {
                Step::Continue => {}
                Step::Drop(reason) => return Enrichment::Drop(reason),
                Step::Cancelled => return Enrichment::Cancelled,
            }
        }

        if options.discover_emails {
            if let Step::Cancelled = self.discover(&mut lead, capabilities, events, cancel).await {
                return Enrichment::Cancelled;
            }
        }

        if options.verify_emails {
            match self.verify(&mut lead, capabilities, events, cancel).await {
                Step::Continue => {}
                Step::Drop(reason) => return Enrichment::Drop(reason),
                Step::Cancelled => return Enrichment::Cancelled,
            }
        }

        Enrichment::Keep(lead)
    }

    async fn check_presence(
        &self,
        lead: &mut Lead,
        capabilities: &mut CapabilityRegistry,
        events: &EventEmitter,
        cancel: &CancellationToken,
    ) -> Step {
        let Some(phone) = lead.phone.clone().filter(|p| !p.trim().is_empty()) else {
            return Step::Drop(DropReason::NoPhone);
        };
        let Some(checker) = &self.presence else {
            return Step::Continue;
        };
        if !capabilities.is_available(Capability::MessagingPresence) {
            return Step::Continue;
        }

        let result = guarded(
            "messaging presence",
            self.call_timeout,
            cancel,
            checker.has_presence(&phone),
        )
        .await;

        match result {
            Ok(true) => {
                lead.has_whatsapp = true;
                Step::Continue
            }
            Ok(false) => Step::Drop(DropReason::NoPresence),
            Err(ServiceError::Cancelled) => Step::Cancelled,
            Err(err) if err.is_key_failure() => {
                if capabilities.disable(Capability::MessagingPresence) {
                    events.exhausted(format!(
                        "Messaging presence unavailable for the rest of the run: {err}"
                    ));
                }
                Step::Continue
            }
            Err(err) => {
                events.warn(format!("Presence check failed for {}: {err}", lead.name));
                Step::Continue
            }
        }
    }

    async fn discover(
        &self,
        lead: &mut Lead,
        capabilities: &mut CapabilityRegistry,
        events: &EventEmitter,
        cancel: &CancellationToken,
    ) -> Step {
        if lead.has_email() || !capabilities.is_available(Capability::EmailDiscovery) {
            return Step::Continue;
        }
        let Some(domain) = lead.domain() else {
            return Step::Continue;
        };

        let timeout = self.call_timeout;
        if let Some(store) = &self.domains {
            let lookup = async { store.lookup(&domain).await.map_err(store_error) };
            match guarded(DOMAIN_STORE, timeout, cancel, lookup).await {
                Ok(Some(record)) => {
                    if record.outcome == DomainOutcome::Found {
                        lead.email = record.email;
                    }
                    tracing::debug!("Domain {} already processed, skipping discovery", domain);
                    return Step::Continue;
                }
                Ok(None) => {}
                Err(ServiceError::Cancelled) => return Step::Cancelled,
                Err(e) => events.warn(format!("Processed-domain lookup failed for {domain}: {e}")),
            }
        }

        let host = domain.as_str();
        let found = tokio::select! {
            biased;
            () = cancel.cancelled() => return Step::Cancelled,
            result = self.discovery_chain.execute(
                &self.keys,
                self.discovery.as_slice(),
                move |service, lease: KeyLease| async move {
                    let id = service.service_id().to_string();
                    bounded(&id, timeout, service.find_by_domain(host, &lease.key)).await
                },
            ) => result,
        };

        let found = match (found, contact_name(lead)) {
            (Ok(None), Some((first, last))) => {
                let (first, last) = (first.as_str(), last.as_str());
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Step::Cancelled,
                    result = self.discovery_chain.execute(
                        &self.keys,
                        self.discovery.as_slice(),
                        move |service, lease: KeyLease| async move {
                            let id = service.service_id().to_string();
                            let call = service.find_by_name(first, last, host, &lease.key);
                            bounded(&id, timeout, call).await
                        },
                    ) => result,
                }
            }
            (found, _) => found,
        };

        let outcome = match found {
            Ok(Some(email)) => {
                events.info(format!("Found email for {} via {}", lead.name, domain));
                lead.email = Some(email);
                lead.email_verified = false;
                DomainOutcome::Found
            }
            Ok(None) => DomainOutcome::NotFound,
            Err(KeyError::Service(ServiceError::Cancelled)) => return Step::Cancelled,
            Err(err) if err.is_exhaustion() => {
                if capabilities.disable(Capability::EmailDiscovery) {
                    events.exhausted(format!(
                        "{err}; email discovery disabled for the rest of the run"
                    ));
                }
                return Step::Continue;
            }
            Err(err) => {
                events.warn(format!("Email discovery failed for {domain}: {err}"));
                DomainOutcome::Failed
            }
        };

        if let Some(store) = &self.domains {
            let email = lead.email.as_deref();
            let record = async {
                store
                    .mark_processed(&domain, outcome, email)
                    .await
                    .map_err(store_error)
            };
            match guarded(DOMAIN_STORE, timeout, cancel, record).await {
                Ok(()) => {}
                Err(ServiceError::Cancelled) => return Step::Cancelled,
                Err(e) => events.warn(format!("Could not record processed domain {domain}: {e}")),
            }
        }
        Step::Continue
    }

    async fn verify(
        &self,
        lead: &mut Lead,
        capabilities: &mut CapabilityRegistry,
        events: &EventEmitter,
        cancel: &CancellationToken,
    ) -> Step {
        let Some(email) = lead.email.clone().filter(|e| !e.trim().is_empty()) else {
            return Step::Drop(DropReason::NoEmail);
        };
        if !capabilities.is_available(Capability::EmailVerification) {
            lead.metadata.insert(
                METADATA_VERIFICATION.to_string(),
                serde_json::Value::from("skipped"),
            );
            return Step::Continue;
        }

        let timeout = self.call_timeout;
        let address = email.as_str();
        let verdict = tokio::select! {
            biased;
            () = cancel.cancelled() => return Step::Cancelled,
            result = self.verification_chain.execute(
                &self.keys,
                self.verifiers.as_slice(),
                move |service, lease: KeyLease| async move {
                    let id = service.service_id().to_string();
                    bounded(&id, timeout, service.verify(address, &lease.key)).await
                },
            ) => result,
        };

        match verdict {
            Ok(true) => {
                lead.email_verified = true;
                Step::Continue
            }
            Ok(false) => Step::Drop(DropReason::EmailRejected),
            Err(KeyError::Service(ServiceError::Cancelled)) => Step::Cancelled,
            Err(err) if err.is_exhaustion() => {
                if capabilities.disable(Capability::EmailVerification) {
                    events.exhausted(format!(
                        "{err}; email verification disabled for the rest of the run"
                    ));
                }
                lead.metadata.insert(
                    METADATA_VERIFICATION.to_string(),
                    serde_json::Value::from("skipped"),
                );
                Step::Continue
            }
            Err(KeyError::Service(
                err @ (ServiceError::Timeout { .. } | ServiceError::Unavailable { .. }),
            )) => {
                events.warn(format!(
                    "Email verification for {email} did not complete ({err}), keeping the lead unverified"
                ));
                lead.metadata.insert(
                    METADATA_VERIFICATION.to_string(),
                    serde_json::Value::from("skipped"),
                );
                Step::Continue
            }
            Err(err) => {
                events.warn(format!("Email verification failed for {email}: {err}"));
                Step::Drop(DropReason::VerificationFailed)
            }
        }
    }
}

fn store_error(err: prospector_db::DatabaseError) -> ServiceError {
    ServiceError::Other {
        service: DOMAIN_STORE.to_string(),
        message: err.to_string(),
    }
}

/// First and last name from the lead's contact metadata.
fn contact_name(lead: &Lead) -> Option<(String, String)> {
    let full = lead.metadata.get(METADATA_CONTACT_NAME)?.as_str()?;
    let mut parts = full.split_whitespace();
    let first = parts.next()?.to_string();
    let last = parts.last()?.to_string();
    Some((first, last))
}
