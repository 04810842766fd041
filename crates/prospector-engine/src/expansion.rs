//! Search-space expansion.
//!
//! When a round ends without reaching the goal the engine tries its
//! strategies in a fixed order and returns the tasks of the first one that
//! produces any. An empty answer means the search space is exhausted.

use crate::events::EventEmitter;
use crate::fallback_cities;
use crate::planner::{schedule_cities, schedule_query, static_cities, Planner};
use crate::state::RunState;
use prospector_core::SearchTask;
use std::fmt;

/// Alternate search terms requested per query-variation attempt.
const QUERY_VARIATION_COUNT: usize = 3;

/// Ways of finding new work, in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Ask location research for more cities in researched countries
    CountryReResearch,
    /// Generate cities near the most recently searched one
    NearbyCities,
    /// Generate alternate search terms for already-searched cities
    QueryVariation,
    /// Take unsearched cities from the built-in table
    StaticFallback,
}

impl Strategy {
    /// All strategies in priority order.
    pub const ORDER: [Strategy; 4] = [
        Self::CountryReResearch,
        Self::NearbyCities,
        Self::QueryVariation,
        Self::StaticFallback,
    ];
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::CountryReResearch => "country re-research",
            Self::NearbyCities => "nearby cities",
            Self::QueryVariation => "query variation",
            Self::StaticFallback => "static fallback cities",
        };
        f.write_str(label)
    }
}

/// Produces new tasks once a round comes up short.
pub(crate) struct ExpansionEngine<'a> {
    planner: &'a Planner<'a>,
}

impl<'a> ExpansionEngine<'a> {
    pub(crate) fn new(planner: &'a Planner<'a>) -> Self {
        Self { planner }
    }

    /// Tasks from the first strategy that yields any, or `None`.
    pub(crate) async fn next(
        &self,
        state: &mut RunState,
        events: &EventEmitter,
    ) -> Option<(Strategy, Vec<SearchTask>)> {
        for strategy in Strategy::ORDER {
            if state.is_cancelled() {
                return None;
            }
            events.info(format!("Expanding search: trying {strategy}"));
            let tasks = match strategy {
                Strategy::CountryReResearch => self.re_research(state, events).await,
                Strategy::NearbyCities => self.nearby(state, events).await,
                Strategy::QueryVariation => self.variations(state, events).await,
                Strategy::StaticFallback => self.static_fallback(state),
            };
            if !tasks.is_empty() {
                events.info(format!("{strategy} produced {} new task(s)", tasks.len()));
                return Some((strategy, tasks));
            }
        }
        events.info("No expansion strategy produced new tasks");
        None
    }

    async fn re_research(&self, state: &mut RunState, events: &EventEmitter) -> Vec<SearchTask> {
        let niche = state.preferences().niche.trim().to_string();
        let limit = self.planner.settings.per_task_limit;
        let mut tasks = Vec::new();
        for country in state.processed_countries().to_vec() {
            let cities = self.planner.research_country(&country, state, events).await;
            tasks.extend(schedule_cities(state, &niche, &cities, Some(&country), limit));
        }
        tasks
    }

    async fn nearby(&self, state: &mut RunState, events: &EventEmitter) -> Vec<SearchTask> {
        let Some(anchor) = state.last_searched_city().map(ToString::to_string) else {
            return Vec::new();
        };
        let settings = self.planner.settings;
        let cities = self
            .planner
            .generation
            .nearby_cities(&anchor, settings.nearby_city_count, state, events)
            .await;
        if cities.is_empty() {
            return Vec::new();
        }

        let niche = state.preferences().niche.trim().to_string();
        let country = fallback_cities::country_of_city(&anchor);
        schedule_cities(state, &niche, &cities, country, settings.per_task_limit)
    }

    async fn variations(&self, state: &mut RunState, events: &EventEmitter) -> Vec<SearchTask> {
        let settings = self.planner.settings;
        let cities: Vec<String> = state
            .searched_cities()
            .iter()
            .take(settings.variation_city_count)
            .cloned()
            .collect();
        if cities.is_empty() {
            return Vec::new();
        }

        let queries = self
            .planner
            .generation
            .query_variations(QUERY_VARIATION_COUNT, state, events)
            .await;
        let mut tasks = Vec::new();
        for query in queries {
            tasks.extend(schedule_query(state, &query, &cities, settings.per_task_limit));
        }
        tasks
    }

    fn static_fallback(&self, state: &mut RunState) -> Vec<SearchTask> {
        let mut countries: Vec<String> = state.processed_countries().to_vec();
        if countries.is_empty() {
            for city in state.searched_cities() {
                if let Some(country) = fallback_cities::country_of_city(city) {
                    if !countries.iter().any(|c| c == country) {
                        countries.push(country.to_string());
                    }
                }
            }
        }

        let niche = state.preferences().niche.trim().to_string();
        let settings = self.planner.settings;
        let mut tasks = Vec::new();
        for country in countries {
            let cities = static_cities(&country, settings.cities_per_country, state);
            tasks.extend(schedule_cities(
                state,
                &niche,
                &cities,
                Some(&country),
                settings.per_task_limit,
            ));
        }
        tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{LocationResearch, TextGenerator};
    use crate::generation::Generation;
    use async_trait::async_trait;
    use prospector_core::{Capability, LeadSource, SearchConfig, SearchPreferences};
    use prospector_keys::ServiceError;
    use prospector_llm::{CompletionRequest, LlmError};
    use std::sync::{Arc, Mutex};
    use tokio_util::sync::CancellationToken;

    struct NoResearch;

    #[async_trait]
    impl LocationResearch for NoResearch {
        async fn best_cities(
            &self,
            _country: &str,
            _niche: &str,
            _exclude_with_website: bool,
            _cancel: &CancellationToken,
        ) -> Result<Vec<String>, ServiceError> {
            Ok(Vec::new())
        }
    }

    struct MoreCities;

    #[async_trait]
    impl LocationResearch for MoreCities {
        async fn best_cities(
            &self,
            _country: &str,
            _niche: &str,
            _exclude_with_website: bool,
            _cancel: &CancellationToken,
        ) -> Result<Vec<String>, ServiceError> {
            Ok(vec!["Paris".to_string(), "Bordeaux".to_string()])
        }
    }

    struct Scripted(Mutex<Vec<prospector_llm::Result<String>>>);

    #[async_trait]
    impl TextGenerator for Scripted {
        async fn generate(
            &self,
            _request: CompletionRequest,
            _cancel: &CancellationToken,
        ) -> prospector_llm::Result<String> {
            let mut answers = self.0.lock().expect("answers lock");
            if answers.is_empty() {
                Ok(String::new())
            } else {
                answers.remove(0)
            }
        }
    }

    fn generator(answers: Vec<prospector_llm::Result<String>>) -> Option<Arc<dyn TextGenerator>> {
        Some(Arc::new(Scripted(Mutex::new(answers))))
    }

    fn state(locations: &[&str]) -> RunState {
        RunState::new(
            SearchPreferences::new(
                "dentist",
                locations.iter().map(ToString::to_string).collect(),
                50,
            ),
            vec![LeadSource::Maps],
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_re_research_comes_first() {
        let generation = Generation::new(None, 256);
        let settings = SearchConfig::default();
        let planner = Planner {
            research: &MoreCities,
            generation: &generation,
            settings: &settings,
        };
        let mut state = state(&["France"]);
        state.record_country("France");
        state.record_city("Paris");

        let (strategy, tasks) = ExpansionEngine::new(&planner)
            .next(&mut state, &EventEmitter::silent())
            .await
            .expect("expansion");

        assert_eq!(strategy, Strategy::CountryReResearch);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].location, "Bordeaux");
        assert_eq!(tasks[0].discovered_from_country.as_deref(), Some("France"));
    }

    #[tokio::test]
    async fn test_nearby_cities_follow_last_city() {
        let generation = Generation::new(
            generator(vec![Ok(r#"["Villeurbanne", "Lyon", "Bron"]"#.to_string())]),
            256,
        );
        let settings = SearchConfig::default();
        let planner = Planner {
            research: &NoResearch,
            generation: &generation,
            settings: &settings,
        };
        let mut state = state(&["Lyon"]);
        state.record_city("Lyon");

        let (strategy, tasks) = ExpansionEngine::new(&planner)
            .next(&mut state, &EventEmitter::silent())
            .await
            .expect("expansion");

        assert_eq!(strategy, Strategy::NearbyCities);
        let cities: Vec<&str> = tasks.iter().map(|t| t.location.as_str()).collect();
        assert_eq!(cities, ["Villeurbanne", "Bron"]);
        assert!(state.is_city_searched("Bron"));
    }

    #[tokio::test]
    async fn test_query_variations_reuse_searched_cities() {
        let generation = Generation::new(
            generator(vec![
                Ok("[]".to_string()),
                Ok(r#"["orthodontist", "dental clinic"]"#.to_string()),
            ]),
            256,
        );
        let settings = SearchConfig {
            variation_city_count: 1,
            ..SearchConfig::default()
        };
        let planner = Planner {
            research: &NoResearch,
            generation: &generation,
            settings: &settings,
        };
        let mut state = state(&["Lyon"]);
        state.record_city("Lyon");
        state.record_city("Springfield");
        state.mark_query_used("dentist", "Lyon");

        let (strategy, tasks) = ExpansionEngine::new(&planner)
            .next(&mut state, &EventEmitter::silent())
            .await
            .expect("expansion");

        assert_eq!(strategy, Strategy::QueryVariation);
        let pairs: Vec<(&str, &str)> = tasks
            .iter()
            .map(|t| (t.query.as_str(), t.location.as_str()))
            .collect();
        assert_eq!(pairs, [("orthodontist", "Lyon"), ("dental clinic", "Lyon")]);
    }

    #[tokio::test]
    async fn test_static_fallback_when_generation_is_gone() {
        let generation = Generation::new(
            generator(vec![Err(LlmError::NoProviderAvailable)]),
            256,
        );
        let settings = SearchConfig {
            cities_per_country: 2,
            ..SearchConfig::default()
        };
        let planner = Planner {
            research: &NoResearch,
            generation: &generation,
            settings: &settings,
        };
        let mut state = state(&["Lyon"]);
        state.record_city("Lyon");
        let (events, mut rx) = crate::events::event_channel();

        let (strategy, tasks) = ExpansionEngine::new(&planner)
            .next(&mut state, &events)
            .await
            .expect("expansion");

        assert_eq!(strategy, Strategy::StaticFallback);
        let cities: Vec<&str> = tasks.iter().map(|t| t.location.as_str()).collect();
        assert_eq!(cities, ["Paris", "Marseille"]);
        assert!(!state.capabilities().is_available(Capability::TextGeneration));

        let mut exhausted = 0;
        while let Ok(event) = rx.try_recv() {
            if let crate::events::RunEvent::Log(entry) = event {
                if entry.severity == crate::events::Severity::Exhausted {
                    exhausted += 1;
                }
            }
        }
        assert_eq!(exhausted, 1);
    }

    #[tokio::test]
    async fn test_nothing_left_returns_none() {
        let generation = Generation::new(None, 256);
        let settings = SearchConfig::default();
        let planner = Planner {
            research: &NoResearch,
            generation: &generation,
            settings: &settings,
        };
        let mut state = state(&["Atlantis"]);
        state.record_city("Atlantis");

        let next = ExpansionEngine::new(&planner)
            .next(&mut state, &EventEmitter::silent())
            .await;
        assert!(next.is_none());
    }
}
