//! Text generation helpers: prompts, list parsing and error handling.
//!
//! Generated answers are free text. Lists are read as a JSON string array
//! when one is present, otherwise line by line with bullets and numbering
//! stripped. Entries are trimmed, de-duplicated case-insensitively and capped.

use crate::collaborators::{LocationResearch, TextGenerator};
use crate::events::EventEmitter;
use crate::fallback_cities;
use crate::state::RunState;
use async_trait::async_trait;
use prospector_core::{Capability, CapabilityRegistry};
use prospector_keys::ServiceError;
use prospector_llm::{CompletionRequest, LlmError};
use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;

const LIST_SYSTEM_PROMPT: &str = "You are a local market research assistant. \
Answer with a JSON array of strings and nothing else.";

const CLASSIFY_SYSTEM_PROMPT: &str = "You classify place names. \
Answer with exactly one word: country or city.";

const MAX_ENTRY_CHARS: usize = 60;

/// Whether a location names a country or a city.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationKind {
    /// A country, to be expanded into cities
    Country,
    /// A city, searched directly
    City,
}

/// Parse a generated list.
#[must_use]
pub fn parse_list(text: &str, cap: usize) -> Vec<String> {
    let candidates = json_array(text).unwrap_or_else(|| line_items(text));
    let mut seen = HashSet::new();
    candidates
        .iter()
        .map(|c| clean_entry(c))
        .filter(|c| !c.is_empty() && c.chars().count() <= MAX_ENTRY_CHARS)
        .filter(|c| seen.insert(c.to_lowercase()))
        .take(cap)
        .collect()
}

fn json_array(text: &str) -> Option<Vec<String>> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end <= start {
        return None;
    }
    let values: Vec<serde_json::Value> = serde_json::from_str(&text[start..=end]).ok()?;
    Some(
        values
            .into_iter()
            .filter_map(|value| match value {
                serde_json::Value::String(s) => Some(s),
                serde_json::Value::Object(map) => ["name", "city", "query"]
                    .iter()
                    .find_map(|k| map.get(*k).and_then(|v| v.as_str()).map(ToString::to_string)),
                _ => None,
            })
            .collect(),
    )
}

fn line_items(text: &str) -> Vec<String> {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    let marker = MARKER.get_or_init(|| {
        Regex::new(r"^\s*(?:[-*•·]+|\d+\s*[.):\-])\s*").expect("valid regex")
    });

    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.ends_with(':'))
        .collect();

    if let [single] = lines.as_slice() {
        if single.contains(',') {
            return single.split(',').map(ToString::to_string).collect();
        }
    }

    lines
        .into_iter()
        .map(|line| marker.replace(line, "").into_owned())
        .collect()
}

fn clean_entry(entry: &str) -> String {
    let trimmed = entry
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | ',' | '.' | ';' | '*'))
        .trim();
    match trimmed.find(" (") {
        Some(idx) if trimmed.ends_with(')') => trimmed[..idx].trim().to_string(),
        _ => trimmed.to_string(),
    }
}

/// Read a one-word classification.
#[must_use]
pub fn parse_location_kind(text: &str) -> Option<LocationKind> {
    let answer = text.to_lowercase();
    match (answer.contains("country"), answer.contains("city")) {
        (true, false) => Some(LocationKind::Country),
        (false, true) => Some(LocationKind::City),
        _ => None,
    }
}

fn list_request(prompt: String, max_tokens: u32) -> CompletionRequest {
    CompletionRequest::new(prompt)
        .with_system_prompt(LIST_SYSTEM_PROMPT)
        .with_max_tokens(max_tokens)
        .with_temperature(0.4)
}

/// Run-scoped access to the text generator.
///
/// Failures never abort the run: a rate-limited or rejected generator
/// disables [`Capability::TextGeneration`] and every later call returns
/// nothing.
#[derive(Clone)]
pub struct Generation {
    generator: Option<Arc<dyn TextGenerator>>,
    max_tokens: u32,
}

impl Generation {
    /// Wrap an optional generator.
    #[must_use]
    pub fn new(generator: Option<Arc<dyn TextGenerator>>, max_tokens: u32) -> Self {
        Self {
            generator,
            max_tokens,
        }
    }

    /// Whether a generator is configured and still usable.
    #[must_use]
    pub fn is_available(&self, capabilities: &CapabilityRegistry) -> bool {
        self.generator.is_some() && capabilities.is_available(Capability::TextGeneration)
    }

    async fn ask(
        &self,
        request: CompletionRequest,
        purpose: &str,
        state: &mut RunState,
        events: &EventEmitter,
    ) -> Option<String> {
        if !self.is_available(state.capabilities()) {
            return None;
        }
        let generator = self.generator.as_ref()?;
        let cancel = state.cancel_token().clone();
        match generator.generate(request, &cancel).await {
            Ok(text) => Some(text),
            Err(LlmError::Cancelled) => None,
            Err(
                err @ (LlmError::RateLimitExceeded { .. }
                | LlmError::AuthenticationFailed { .. }
                | LlmError::KeysExhausted { .. }
                | LlmError::NoProviderAvailable),
            ) => {
                if state.capabilities_mut().disable(Capability::TextGeneration) {
                    events.exhausted(format!(
                        "Text generation unavailable for the rest of the run: {err}"
                    ));
                }
                None
            }
            Err(err) => {
                events.warn(format!("Text generation failed ({purpose}): {err}"));
                None
            }
        }
    }

    /// Classify a location. `None` when generation is unavailable or unsure.
    pub async fn classify(
        &self,
        location: &str,
        state: &mut RunState,
        events: &EventEmitter,
    ) -> Option<LocationKind> {
        let request = CompletionRequest::new(format!(
            "Is \"{location}\" a country or a city? Answer with one word."
        ))
        .with_system_prompt(CLASSIFY_SYSTEM_PROMPT)
        .with_max_tokens(8)
        .with_temperature(0.0);

        let answer = self.ask(request, "classification", state, events).await?;
        parse_location_kind(&answer)
    }

    /// Cities near `city` that have not been searched yet.
    pub async fn nearby_cities(
        &self,
        city: &str,
        count: usize,
        state: &mut RunState,
        events: &EventEmitter,
    ) -> Vec<String> {
        let prompt = format!(
            "List {count} cities or large towns geographically close to {city} that have \
             a healthy market for {} businesses. Do not include any of: {}.",
            state.preferences().niche,
            state.searched_cities().join(", ")
        );
        let request = list_request(prompt, self.max_tokens);
        let Some(answer) = self.ask(request, "nearby cities", state, events).await else {
            return Vec::new();
        };

        let cap = count + state.searched_cities().len();
        parse_list(&answer, cap)
            .into_iter()
            .filter(|c| !state.is_city_searched(c))
            .take(count)
            .collect()
    }

    /// Alternate search terms for the run's niche.
    pub async fn query_variations(
        &self,
        count: usize,
        state: &mut RunState,
        events: &EventEmitter,
    ) -> Vec<String> {
        let niche = state.preferences().niche.trim().to_string();
        let prompt = format!(
            "Give {count} alternative search terms a customer would type into a business \
             directory to find \"{niche}\" businesses: synonyms and specialised sub-niches."
        );
        let request = list_request(prompt, self.max_tokens);
        let Some(answer) = self.ask(request, "query variations", state, events).await else {
            return Vec::new();
        };

        let niche_key = niche.to_lowercase();
        parse_list(&answer, count + 1)
            .into_iter()
            .filter(|q| q.to_lowercase() != niche_key)
            .take(count)
            .collect()
    }
}

fn to_service_error(err: LlmError) -> ServiceError {
    let service = "text-generation".to_string();
    match err {
        LlmError::Cancelled => ServiceError::Cancelled,
        LlmError::RateLimitExceeded { message, .. } => ServiceError::RateLimited { service, message },
        LlmError::AuthenticationFailed { message, .. } => {
            ServiceError::Unauthorized { service, message }
        }
        LlmError::Network(e) => ServiceError::Unavailable {
            service,
            message: e.to_string(),
        },
        other => ServiceError::Other {
            service,
            message: other.to_string(),
        },
    }
}

/// Location research backed by text generation.
pub struct GeneratedLocationResearch {
    generator: Arc<dyn TextGenerator>,
    max_tokens: u32,
    max_cities: usize,
}

impl GeneratedLocationResearch {
    /// Create research over a generator.
    #[must_use]
    pub fn new(generator: Arc<dyn TextGenerator>, max_tokens: u32, max_cities: usize) -> Self {
        Self {
            generator,
            max_tokens,
            max_cities,
        }
    }
}

#[async_trait]
impl LocationResearch for GeneratedLocationResearch {
    async fn best_cities(
        &self,
        country: &str,
        niche: &str,
        exclude_with_website: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, ServiceError> {
        let focus = if exclude_with_website {
            " Favour places where many small businesses still have no website."
        } else {
            ""
        };
        let prompt = format!(
            "List the {} best cities in {country} to find {niche} businesses, most \
             promising first.{focus}",
            self.max_cities
        );
        let answer = self
            .generator
            .generate(list_request(prompt, self.max_tokens), cancel)
            .await
            .map_err(to_service_error)?;
        Ok(parse_list(&answer, self.max_cities))
    }
}

/// Location research from the built-in city table.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticLocationResearch;

#[async_trait]
impl LocationResearch for StaticLocationResearch {
    async fn best_cities(
        &self,
        country: &str,
        _niche: &str,
        _exclude_with_website: bool,
        _cancel: &CancellationToken,
    ) -> Result<Vec<String>, ServiceError> {
        Ok(fallback_cities::cities_for(country)
            .iter()
            .map(ToString::to_string)
            .collect())
    }
}
