//! Run state and run summary.
//!
//! A [`RunState`] is owned by the orchestrator for the lifetime of one run
//! and passed by `&mut` into the racer, the pipeline and the expansion
//! engine. Nothing else holds it, so no locking is involved.

use crate::pipeline::dedupe::DedupIndex;
use prospector_core::{
    Capability, CapabilityRegistry, Lead, LeadSource, LeadStatus, SearchPreferences, SearchTask,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use tokio_util::sync::CancellationToken;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    /// The target lead count was reached
    GoalReached,
    /// No expansion strategy produced new tasks
    Exhausted,
    /// The round cap was hit
    RoundLimitReached,
    /// Stopped on request
    Cancelled,
}

impl std::fmt::Display for TerminalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::GoalReached => "goal reached",
            Self::Exhausted => "search space exhausted",
            Self::RoundLimitReached => "round limit reached",
            Self::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Final report of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// How the run ended
    pub terminal: TerminalState,
    /// Committed leads in commit order
    pub leads: Vec<Lead>,
    /// Number of committed leads
    pub lead_count: u32,
    /// Requested number of leads
    pub target_lead_count: u32,
    /// Expansion rounds used
    pub rounds: u32,
    /// Cities searched during the run
    pub searched_cities: Vec<String>,
    /// Capabilities that ran out of credits
    pub exhausted_capabilities: Vec<Capability>,
    /// Sources whose credentials ran out
    pub exhausted_sources: Vec<LeadSource>,
}

/// Mutable context of the live run.
#[derive(Debug)]
pub struct RunState {
    preferences: SearchPreferences,
    plan: Vec<SearchTask>,
    results: Vec<Lead>,
    processed_countries: Vec<String>,
    searched_cities: Vec<String>,
    searched_keys: HashSet<String>,
    used_queries: HashSet<(String, String)>,
    dedup: DedupIndex,
    capabilities: CapabilityRegistry,
    sources: Vec<LeadSource>,
    exhausted_sources: BTreeSet<LeadSource>,
    round: u32,
    cancel: CancellationToken,
}

fn location_key(value: &str) -> String {
    value.trim().to_lowercase()
}

impl RunState {
    /// Fresh state for a run over `sources`.
    #[must_use]
    pub fn new(
        preferences: SearchPreferences,
        sources: Vec<LeadSource>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            preferences,
            plan: Vec::new(),
            results: Vec::new(),
            processed_countries: Vec::new(),
            searched_cities: Vec::new(),
            searched_keys: HashSet::new(),
            used_queries: HashSet::new(),
            dedup: DedupIndex::new(),
            capabilities: CapabilityRegistry::new(),
            sources,
            exhausted_sources: BTreeSet::new(),
            round: 0,
            cancel,
        }
    }

    /// Preferences the run was started with.
    #[must_use]
    pub fn preferences(&self) -> &SearchPreferences {
        &self.preferences
    }

    /// Initial task plan.
    #[must_use]
    pub fn plan(&self) -> &[SearchTask] {
        &self.plan
    }

    /// Store the initial task plan.
    pub fn set_plan(&mut self, plan: Vec<SearchTask>) {
        self.plan = plan;
    }

    /// Committed leads.
    #[must_use]
    pub fn results(&self) -> &[Lead] {
        &self.results
    }

    /// Number of committed leads.
    #[must_use]
    pub fn lead_count(&self) -> u32 {
        u32::try_from(self.results.len()).unwrap_or(u32::MAX)
    }

    /// Requested number of leads.
    #[must_use]
    pub fn target(&self) -> u32 {
        self.preferences.target_lead_count
    }

    /// Leads still needed.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.target().saturating_sub(self.lead_count())
    }

    /// Whether the target has been reached.
    #[must_use]
    pub fn goal_reached(&self) -> bool {
        self.lead_count() >= self.target()
    }

    /// Run-wide cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the run has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Commit a lead to the results and return it.
    pub fn commit(&mut self, mut lead: Lead) -> &Lead {
        lead.status = LeadStatus::Qualified;
        let index = self.results.len();
        self.results.push(lead);
        &self.results[index]
    }

    /// Fingerprints seen this run.
    pub fn dedup_mut(&mut self) -> &mut DedupIndex {
        &mut self.dedup
    }

    /// Capabilities still usable this run.
    #[must_use]
    pub fn capabilities(&self) -> &CapabilityRegistry {
        &self.capabilities
    }

    /// Mutable access to the capability registry.
    pub fn capabilities_mut(&mut self) -> &mut CapabilityRegistry {
        &mut self.capabilities
    }

    /// Record a researched country. Returns `false` if it was already recorded.
    pub fn record_country(&mut self, country: &str) -> bool {
        let key = location_key(country);
        if self
            .processed_countries
            .iter()
            .any(|c| location_key(c) == key)
        {
            return false;
        }
        self.processed_countries.push(country.trim().to_string());
        true
    }

    /// Countries researched this run, in research order.
    #[must_use]
    pub fn processed_countries(&self) -> &[String] {
        &self.processed_countries
    }

    /// Record a city as searched. Returns `false` if it already was.
    pub fn record_city(&mut self, city: &str) -> bool {
        if !self.searched_keys.insert(location_key(city)) {
            return false;
        }
        self.searched_cities.push(city.trim().to_string());
        true
    }

    /// Whether a city has been searched this run (case-insensitive).
    #[must_use]
    pub fn is_city_searched(&self, city: &str) -> bool {
        self.searched_keys.contains(&location_key(city))
    }

    /// Cities searched this run, in scheduling order.
    #[must_use]
    pub fn searched_cities(&self) -> &[String] {
        &self.searched_cities
    }

    /// Most recently scheduled city.
    #[must_use]
    pub fn last_searched_city(&self) -> Option<&str> {
        self.searched_cities.last().map(String::as_str)
    }

    /// Record a `(query, city)` pair. Returns `false` if it was already used.
    pub fn mark_query_used(&mut self, query: &str, city: &str) -> bool {
        self.used_queries
            .insert((location_key(query), location_key(city)))
    }

    /// Sources that can still take tasks.
    #[must_use]
    pub fn active_sources(&self) -> Vec<LeadSource> {
        self.sources
            .iter()
            .copied()
            .filter(|s| !self.exhausted_sources.contains(s))
            .collect()
    }

    /// Whether a source's credentials ran out.
    #[must_use]
    pub fn is_source_exhausted(&self, source: LeadSource) -> bool {
        self.exhausted_sources.contains(&source)
    }

    /// Stop using a source for the rest of the run.
    ///
    /// Returns `true` the first time. Disables [`Capability::SourceSearch`]
    /// once every source is exhausted.
    pub fn mark_source_exhausted(&mut self, source: LeadSource) -> bool {
        let newly = self.exhausted_sources.insert(source);
        if newly && self.active_sources().is_empty() {
            self.capabilities.disable(Capability::SourceSearch);
        }
        newly
    }

    /// Rounds started so far.
    #[must_use]
    pub fn round(&self) -> u32 {
        self.round
    }

    /// Start the next round and return its number.
    pub fn advance_round(&mut self) -> u32 {
        self.round += 1;
        self.round
    }

    /// Consume the state into a summary.
    #[must_use]
    pub fn into_summary(self, terminal: TerminalState) -> RunSummary {
        RunSummary {
            terminal,
            lead_count: u32::try_from(self.results.len()).unwrap_or(u32::MAX),
            target_lead_count: self.preferences.target_lead_count,
            rounds: self.round,
            searched_cities: self.searched_cities,
            exhausted_capabilities: self.capabilities.disabled(),
            exhausted_sources: self.exhausted_sources.into_iter().collect(),
            leads: self.results,
        }
    }
}
