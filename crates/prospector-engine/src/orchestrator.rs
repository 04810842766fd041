//! Lead orchestrator: the never-stop loop.
//!
//! A run plans its initial tasks, races them, and keeps expanding the search
//! space until the target is reached, no strategy finds new work, the round
//! cap is hit or [`LeadOrchestrator::stop`] is called. Only one run is live
//! at a time; starting a run cancels the previous one and waits for it to
//! wind down.

use crate::collaborators::{
    EmailDiscovery, EmailVerifier, LocationResearch, PresenceChecker, ProcessedDomainStore,
    SourceAdapter, TextGenerator,
};
use crate::error::{EngineError, Result};
use crate::events::{event_channel, EventEmitter, RunEvent};
use crate::expansion::ExpansionEngine;
use crate::generation::{GeneratedLocationResearch, Generation, StaticLocationResearch};
use crate::pipeline::enrich::Enricher;
use crate::pipeline::LeadPipeline;
use crate::planner::Planner;
use crate::racer::TaskRacer;
use crate::state::{RunState, RunSummary, TerminalState};
use prospector_core::{
    AppConfig, Capability, ChainStepConfig, LeadSource, SearchConfig, SearchPreferences,
};
use prospector_db::{runs, Database, RunStatus};
use prospector_keys::{FallbackChain, FallbackStep, KeyRotationManager};
use prospector_llm::LlmRouter;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default token budget for generated lists.
const DEFAULT_MAX_TOKENS: u32 = 512;

struct ActiveRun {
    id: u64,
    cancel: CancellationToken,
}

/// Drives lead discovery runs.
pub struct LeadOrchestrator {
    sources: HashMap<LeadSource, Arc<dyn SourceAdapter>>,
    research: Arc<dyn LocationResearch>,
    generation: Generation,
    pipeline: LeadPipeline,
    keys: Arc<KeyRotationManager>,
    settings: SearchConfig,
    history: Option<Arc<Database>>,
    active: Mutex<Option<ActiveRun>>,
    run_lock: tokio::sync::Mutex<()>,
    run_ids: AtomicU64,
}

impl LeadOrchestrator {
    /// Start building an orchestrator with default settings.
    #[must_use]
    pub fn builder() -> LeadOrchestratorBuilder {
        LeadOrchestratorBuilder::new()
    }

    /// Key pools shared by sources and enrichment.
    #[must_use]
    pub fn keys(&self) -> &Arc<KeyRotationManager> {
        &self.keys
    }

    /// Whether a run is in progress.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.active_slot().is_some()
    }

    /// Cancel the current run, if any.
    ///
    /// Safe to call at any time and any number of times.
    pub fn stop(&self) {
        if let Some(run) = self.active_slot().as_ref() {
            if !run.cancel.is_cancelled() {
                tracing::info!("Stop requested for run {}", run.id);
                run.cancel.cancel();
            }
        }
    }

    /// Run on a background task and stream its events.
    #[must_use]
    pub fn spawn_run(
        self: &Arc<Self>,
        preferences: SearchPreferences,
    ) -> (JoinHandle<Result<RunSummary>>, UnboundedReceiver<RunEvent>) {
        let (events, rx) = event_channel();
        let orchestrator = Arc::clone(self);
        let handle = tokio::spawn(async move { orchestrator.run(preferences, &events).await });
        (handle, rx)
    }

    /// Run a discovery to completion.
    ///
    /// Configuration problems are returned before anything starts. Everything
    /// else, including cancellation, ends in a [`RunSummary`].
    pub async fn run(
        &self,
        preferences: SearchPreferences,
        events: &EventEmitter,
    ) -> Result<RunSummary> {
        let sources = match self.preflight(&preferences) {
            Ok(sources) => sources,
            Err(err) => {
                events.error(format!("Run not started: {err}"));
                return Err(err);
            }
        };

        let cancel = CancellationToken::new();
        let run_id = self.claim(cancel.clone());
        let _exclusive = self.run_lock.lock().await;

        self.keys.rearm_all();
        events.info(format!(
            "Starting run {run_id}: \"{}\" in {} for {} lead(s) from {}",
            preferences.niche.trim(),
            preferences.locations.join(", "),
            preferences.target_lead_count,
            sources
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ));

        let record = self.open_record(&preferences, events).await;
        let mut state = RunState::new(preferences, sources, cancel);
        let terminal = self.drive(&mut state, events).await;
        let summary = state.into_summary(terminal);
        self.close_record(record, &summary, events).await;

        events.info(format!(
            "Run {run_id} finished ({terminal}): {}/{} lead(s) after {} round(s)",
            summary.lead_count, summary.target_lead_count, summary.rounds
        ));
        events.stopped(&summary);
        self.release(run_id);
        Ok(summary)
    }

    /// The never-stop loop.
    async fn drive(&self, state: &mut RunState, events: &EventEmitter) -> TerminalState {
        let planner = Planner {
            research: self.research.as_ref(),
            generation: &self.generation,
            settings: &self.settings,
        };
        let racer = TaskRacer {
            sources: &self.sources,
            keys: &self.keys,
            settings: &self.settings,
        };
        let expansion = ExpansionEngine::new(&planner);
        let max_rounds = self.settings.max_rounds;

        let mut pending = planner.plan(state, events).await;
        loop {
            if !pending.is_empty() {
                let report = racer
                    .execute_batch(std::mem::take(&mut pending), state, &self.pipeline, events)
                    .await;
                tracing::debug!(?report, round = state.round(), "Batch settled");
            }

            if state.is_cancelled() {
                return TerminalState::Cancelled;
            }
            if state.goal_reached() {
                return TerminalState::GoalReached;
            }
            if !state.capabilities().is_available(Capability::SourceSearch) {
                events.exhausted("Every source is out of credentials");
                return TerminalState::Exhausted;
            }
            // The initial plan is the first of `max_rounds` batches.
            if state.round() + 1 >= max_rounds {
                events.warn(format!(
                    "Round limit of {max_rounds} reached with {}/{} lead(s)",
                    state.lead_count(),
                    state.target()
                ));
                return TerminalState::RoundLimitReached;
            }

            let round = state.advance_round();
            events.info(format!(
                "Round {}/{max_rounds}: {} more lead(s) needed",
                round + 1,
                state.remaining()
            ));
            match expansion.next(state, events).await {
                Some((_, tasks)) => pending = tasks,
                None if state.is_cancelled() => return TerminalState::Cancelled,
                None => return TerminalState::Exhausted,
            }
        }
    }

    /// Fatal checks. Returns the sources the run will use.
    fn preflight(&self, preferences: &SearchPreferences) -> Result<Vec<LeadSource>> {
        preferences.validate()?;

        let sources: Vec<LeadSource> = LeadSource::all()
            .iter()
            .copied()
            .filter(|s| preferences.sources.is_empty() || preferences.sources.contains(s))
            .filter(|s| self.sources.contains_key(s))
            .collect();
        if sources.is_empty() {
            return Err(EngineError::NoSources);
        }

        for source in &sources {
            let Some(service) = self
                .sources
                .get(source)
                .and_then(|adapter| adapter.credential_service())
            else {
                continue;
            };
            if !self.keys.has_keys(service) {
                return Err(EngineError::MissingCredentials {
                    service: service.to_string(),
                });
            }
        }

        self.pipeline.enricher().preflight(&preferences.enrichment)?;
        Ok(sources)
    }

    fn active_slot(&self) -> std::sync::MutexGuard<'_, Option<ActiveRun>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Become the active run, cancelling whichever run held the slot.
    fn claim(&self, cancel: CancellationToken) -> u64 {
        let id = self.run_ids.fetch_add(1, Ordering::SeqCst) + 1;
        let previous = self.active_slot().replace(ActiveRun { id, cancel });
        if let Some(previous) = previous {
            tracing::info!("Run {} superseded by run {}", previous.id, id);
            previous.cancel.cancel();
        }
        id
    }

    fn release(&self, id: u64) {
        let mut slot = self.active_slot();
        if slot.as_ref().is_some_and(|run| run.id == id) {
            *slot = None;
        }
    }

    async fn open_record(
        &self,
        preferences: &SearchPreferences,
        events: &EventEmitter,
    ) -> Option<String> {
        let db = self.history.as_ref()?;
        match runs::create_run(
            db.pool(),
            preferences.niche.trim().to_string(),
            preferences.target_lead_count,
        )
        .await
        {
            Ok(record) => Some(record.id),
            Err(err) => {
                events.warn(format!("Could not record run history: {err}"));
                None
            }
        }
    }

    async fn close_record(
        &self,
        record: Option<String>,
        summary: &RunSummary,
        events: &EventEmitter,
    ) {
        let (Some(db), Some(id)) = (self.history.as_ref(), record) else {
            return;
        };
        let status = match summary.terminal {
            TerminalState::GoalReached => RunStatus::GoalReached,
            TerminalState::Exhausted => RunStatus::Exhausted,
            TerminalState::RoundLimitReached => RunStatus::RoundLimitReached,
            TerminalState::Cancelled => RunStatus::Cancelled,
        };
        if let Err(err) =
            runs::complete_run(db.pool(), &id, status, summary.lead_count, summary.rounds).await
        {
            events.warn(format!("Could not update run history: {err}"));
        }
    }
}

/// Assembles a [`LeadOrchestrator`] from its collaborators.
pub struct LeadOrchestratorBuilder {
    settings: SearchConfig,
    keys: Arc<KeyRotationManager>,
    sources: HashMap<LeadSource, Arc<dyn SourceAdapter>>,
    research: Option<Arc<dyn LocationResearch>>,
    generator: Option<Arc<dyn TextGenerator>>,
    max_tokens: u32,
    discovery: Vec<Arc<dyn EmailDiscovery>>,
    discovery_steps: Option<Vec<FallbackStep>>,
    verifiers: Vec<Arc<dyn EmailVerifier>>,
    verification_steps: Option<Vec<FallbackStep>>,
    presence: Option<Arc<dyn PresenceChecker>>,
    domains: Option<Arc<dyn ProcessedDomainStore>>,
    history: Option<Arc<Database>>,
}

impl Default for LeadOrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LeadOrchestratorBuilder {
    /// Builder with default settings and no collaborators.
    #[must_use]
    pub fn new() -> Self {
        Self {
            settings: SearchConfig::default(),
            keys: Arc::new(KeyRotationManager::new()),
            sources: HashMap::new(),
            research: None,
            generator: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            discovery: Vec::new(),
            discovery_steps: None,
            verifiers: Vec::new(),
            verification_steps: None,
            presence: None,
            domains: None,
            history: None,
        }
    }

    /// Builder seeded from application configuration.
    ///
    /// Sets search settings, credential pools and enrichment chains, and
    /// builds the text generation router when it is enabled.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let mut builder = Self::new()
            .with_settings(config.search.clone())
            .with_keys(Arc::new(KeyRotationManager::from_credentials(
                &config.credentials,
            )));
        builder.max_tokens = config.llm.max_tokens;

        let steps = |chain: &[ChainStepConfig]| -> Vec<FallbackStep> {
            chain
                .iter()
                .map(|step| FallbackStep::new(step.service.clone(), step.probe_on_exhaustion))
                .collect()
        };
        if !config.enrichment.discovery_chain.is_empty() {
            builder = builder.with_discovery_chain(steps(&config.enrichment.discovery_chain));
        }
        if !config.enrichment.verification_chain.is_empty() {
            builder =
                builder.with_verification_chain(steps(&config.enrichment.verification_chain));
        }

        if config.llm.enabled {
            let router = LlmRouter::from_config(&config.llm, Arc::clone(&builder.keys))?;
            if router.is_configured() {
                builder = builder.with_text_generator(Arc::new(router));
            } else {
                tracing::warn!("Text generation enabled but no provider could be configured");
            }
        }
        Ok(builder)
    }

    /// Replace the search settings.
    #[must_use]
    pub fn with_settings(mut self, settings: SearchConfig) -> Self {
        self.settings = settings;
        self
    }

    /// Share an existing key manager.
    #[must_use]
    pub fn with_keys(mut self, keys: Arc<KeyRotationManager>) -> Self {
        self.keys = keys;
        self
    }

    /// Register a source adapter, replacing any adapter for the same source.
    #[must_use]
    pub fn with_source(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.sources.insert(adapter.source(), adapter);
        self
    }

    /// Set the location research collaborator.
    #[must_use]
    pub fn with_location_research(mut self, research: Arc<dyn LocationResearch>) -> Self {
        self.research = Some(research);
        self
    }

    /// Set the text generator.
    #[must_use]
    pub fn with_text_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Add an email discovery service.
    #[must_use]
    pub fn with_email_discovery(mut self, service: Arc<dyn EmailDiscovery>) -> Self {
        self.discovery.push(service);
        self
    }

    /// Order of the discovery chain. Defaults to registration order.
    #[must_use]
    pub fn with_discovery_chain(mut self, steps: Vec<FallbackStep>) -> Self {
        self.discovery_steps = Some(steps);
        self
    }

    /// Add an email verification service.
    #[must_use]
    pub fn with_email_verifier(mut self, service: Arc<dyn EmailVerifier>) -> Self {
        self.verifiers.push(service);
        self
    }

    /// Order of the verification chain. Defaults to registration order.
    #[must_use]
    pub fn with_verification_chain(mut self, steps: Vec<FallbackStep>) -> Self {
        self.verification_steps = Some(steps);
        self
    }

    /// Set the messaging presence checker.
    #[must_use]
    pub fn with_presence_checker(mut self, checker: Arc<dyn PresenceChecker>) -> Self {
        self.presence = Some(checker);
        self
    }

    /// Set the processed-domain store.
    #[must_use]
    pub fn with_domain_store(mut self, store: Arc<dyn ProcessedDomainStore>) -> Self {
        self.domains = Some(store);
        self
    }

    /// Record runs in a database.
    #[must_use]
    pub fn with_run_history(mut self, db: Arc<Database>) -> Self {
        self.history = Some(db);
        self
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> LeadOrchestrator {
        let discovery_steps = self
            .discovery_steps
            .unwrap_or_else(|| default_steps(self.discovery.iter().map(|s| s.service_id())));
        let verification_steps = self
            .verification_steps
            .unwrap_or_else(|| default_steps(self.verifiers.iter().map(|s| s.service_id())));

        let mut enricher = Enricher::new(
            Arc::clone(&self.keys),
            Duration::from_secs(self.settings.source_timeout_secs),
        )
        .with_discovery(
            FallbackChain::new("email discovery", discovery_steps),
            self.discovery,
        )
        .with_verification(
            FallbackChain::new("email verification", verification_steps),
            self.verifiers,
        );
        if let Some(presence) = self.presence {
            enricher = enricher.with_presence(presence);
        }
        if let Some(domains) = self.domains {
            enricher = enricher.with_domain_store(domains);
        }

        let research = match (self.research, &self.generator) {
            (Some(research), _) => research,
            (None, Some(generator)) => Arc::new(GeneratedLocationResearch::new(
                Arc::clone(generator),
                self.max_tokens,
                self.settings.cities_per_country,
            )),
            (None, None) => Arc::new(StaticLocationResearch),
        };

        LeadOrchestrator {
            sources: self.sources,
            research,
            generation: Generation::new(self.generator, self.max_tokens),
            pipeline: LeadPipeline::new(enricher),
            keys: self.keys,
            settings: self.settings,
            history: self.history,
            active: Mutex::new(None),
            run_lock: tokio::sync::Mutex::new(()),
            run_ids: AtomicU64::new(0),
        }
    }
}

/// Registration order, with the primary re-probed before hard exhaustion.
fn default_steps<'a>(services: impl Iterator<Item = &'a str>) -> Vec<FallbackStep> {
    services
        .enumerate()
        .map(|(index, service)| FallbackStep::new(service, index == 0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use prospector_core::{CapabilityRegistry, EnrichmentOptions, Lead, SearchTask};
    use prospector_keys::{ApiKey, ServiceError};

    struct Directory(LeadSource);

    #[async_trait]
    impl SourceAdapter for Directory {
        fn source(&self) -> LeadSource {
            self.0
        }

        async fn search(
            &self,
            _task: &SearchTask,
            _key: Option<&ApiKey>,
            _cancel: &CancellationToken,
        ) -> std::result::Result<Vec<Lead>, ServiceError> {
            Ok(Vec::new())
        }
    }

    struct KeyedDirectory;

    #[async_trait]
    impl SourceAdapter for KeyedDirectory {
        fn source(&self) -> LeadSource {
            LeadSource::ReviewSiteA
        }

        fn credential_service(&self) -> Option<&str> {
            Some("review-api")
        }

        async fn search(
            &self,
            _task: &SearchTask,
            _key: Option<&ApiKey>,
            _cancel: &CancellationToken,
        ) -> std::result::Result<Vec<Lead>, ServiceError> {
            Ok(Vec::new())
        }
    }

    fn prefs() -> SearchPreferences {
        SearchPreferences::new("dentist", vec!["Lyon".to_string()], 5)
    }

    #[tokio::test]
    async fn test_invalid_preferences_are_fatal() {
        let orchestrator = LeadOrchestrator::builder()
            .with_source(Arc::new(Directory(LeadSource::Maps)))
            .build();
        let result = orchestrator
            .run(
                SearchPreferences::new(" ", vec!["Lyon".to_string()], 5),
                &EventEmitter::silent(),
            )
            .await;
        assert!(matches!(result, Err(EngineError::InvalidPreferences(_))));
        assert!(!orchestrator.is_running());
    }

    #[tokio::test]
    async fn test_no_matching_source_is_fatal() {
        let orchestrator = LeadOrchestrator::builder()
            .with_source(Arc::new(Directory(LeadSource::Maps)))
            .build();
        let result = orchestrator
            .run(
                prefs().with_sources(vec![LeadSource::Social]),
                &EventEmitter::silent(),
            )
            .await;
        assert!(matches!(result, Err(EngineError::NoSources)));
    }

    #[tokio::test]
    async fn test_keyed_source_without_keys_is_fatal() {
        let orchestrator = LeadOrchestrator::builder()
            .with_source(Arc::new(KeyedDirectory))
            .build();
        let result = orchestrator.run(prefs(), &EventEmitter::silent()).await;
        assert!(matches!(
            result,
            Err(EngineError::MissingCredentials { service }) if service == "review-api"
        ));
    }

    #[tokio::test]
    async fn test_unconfigured_enrichment_is_fatal() {
        let orchestrator = LeadOrchestrator::builder()
            .with_source(Arc::new(Directory(LeadSource::Maps)))
            .build();
        let result = orchestrator
            .run(
                prefs().with_enrichment(EnrichmentOptions {
                    discover_emails: true,
                    ..EnrichmentOptions::default()
                }),
                &EventEmitter::silent(),
            )
            .await;
        assert!(matches!(
            result,
            Err(EngineError::CapabilityUnconfigured {
                capability: Capability::EmailDiscovery
            })
        ));
    }

    #[test]
    fn test_stop_before_any_run_is_harmless() {
        let orchestrator = LeadOrchestrator::builder().build();
        orchestrator.stop();
        orchestrator.stop();
        assert!(!orchestrator.is_running());
    }

    #[test]
    fn test_default_chain_reprobes_primary() {
        let steps = default_steps(["primary", "secondary"].into_iter());
        assert_eq!(
            steps,
            vec![
                FallbackStep::new("primary", true),
                FallbackStep::new("secondary", false)
            ]
        );
    }

    #[test]
    fn test_builder_from_config() {
        let mut config = AppConfig::default();
        config
            .credentials
            .insert("primary-finder".to_string(), vec!["k1".to_string()]);
        config
            .enrichment
            .discovery_chain
            .push(ChainStepConfig {
                service: "primary-finder".to_string(),
                probe_on_exhaustion: true,
            });

        let orchestrator = LeadOrchestratorBuilder::from_config(&config)
            .expect("builder")
            .build();
        assert!(orchestrator.keys().has_keys("primary-finder"));
        assert!(!orchestrator.generation.is_available(&CapabilityRegistry::new()));
    }
}
