//! Initial plan: classify locations, research countries, fan out tasks.

use crate::collaborators::{guarded, LocationResearch};
use crate::events::EventEmitter;
use crate::fallback_cities;
use crate::generation::{Generation, LocationKind};
use crate::state::RunState;
use prospector_core::{SearchConfig, SearchTask};
use prospector_keys::ServiceError;
use std::time::Duration;

/// Builds the initial task plan of a run.
pub(crate) struct Planner<'a> {
    pub(crate) research: &'a dyn LocationResearch,
    pub(crate) generation: &'a Generation,
    pub(crate) settings: &'a SearchConfig,
}

impl Planner<'_> {
    /// Create one task per city per active source for every location.
    pub(crate) async fn plan(&self, state: &mut RunState, events: &EventEmitter) -> Vec<SearchTask> {
        let locations: Vec<String> = state
            .preferences()
            .locations
            .iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        let niche = state.preferences().niche.trim().to_string();
        let mut tasks = Vec::new();

        for location in locations {
            if state.is_cancelled() {
                break;
            }

            match self.classify(&location, state, events).await {
                LocationKind::Country => {
                    let country = fallback_cities::canonical_country(&location)
                        .map_or_else(|| location.clone(), ToString::to_string);
                    if !state.record_country(&country) {
                        continue;
                    }
                    let mut cities = self.research_country(&country, state, events).await;
                    if cities.is_empty() {
                        cities = static_cities(&country, self.settings.cities_per_country, state);
                        if !cities.is_empty() {
                            events.warn(format!(
                                "No researched cities for {country}, using major cities instead"
                            ));
                        }
                    }
                    events.info(format!("{country}: searching {}", cities.join(", ")));
                    tasks.extend(schedule_cities(
                        state,
                        &niche,
                        &cities,
                        Some(&country),
                        self.settings.per_task_limit,
                    ));
                }
                LocationKind::City => {
                    tasks.extend(schedule_cities(
                        state,
                        &niche,
                        std::slice::from_ref(&location),
                        None,
                        self.settings.per_task_limit,
                    ));
                }
            }
        }

        events.info(format!(
            "Plan ready: {} task(s) across {} city(ies)",
            tasks.len(),
            state.searched_cities().len()
        ));
        state.set_plan(tasks.clone());
        events.plan_updated(&tasks);
        tasks
    }

    /// Country or city, by text generation with the city table as fallback.
    pub(crate) async fn classify(
        &self,
        location: &str,
        state: &mut RunState,
        events: &EventEmitter,
    ) -> LocationKind {
        let kind = match self.generation.classify(location, state, events).await {
            Some(kind) => kind,
            None if fallback_cities::is_known_country(location) => LocationKind::Country,
            None => LocationKind::City,
        };
        let label = match kind {
            LocationKind::Country => "country",
            LocationKind::City => "city",
        };
        events.info(format!("Classified {location} as a {label}"));
        kind
    }

    /// Unsearched cities of a country from location research.
    pub(crate) async fn research_country(
        &self,
        country: &str,
        state: &RunState,
        events: &EventEmitter,
    ) -> Vec<String> {
        let prefs = state.preferences();
        let result = guarded(
            "location research",
            Duration::from_secs(self.settings.source_timeout_secs),
            state.cancel_token(),
            self.research.best_cities(
                country,
                &prefs.niche,
                prefs.filters.exclude_with_website,
                state.cancel_token(),
            ),
        )
        .await;

        match result {
            Ok(cities) => unsearched(cities, self.settings.cities_per_country, state),
            Err(ServiceError::Cancelled) => Vec::new(),
            Err(err) => {
                events.warn(format!("Location research failed for {country}: {err}"));
                Vec::new()
            }
        }
    }
}

/// Up to `cap` cities from the built-in table that were not searched yet.
pub(crate) fn static_cities(country: &str, cap: usize, state: &RunState) -> Vec<String> {
    unsearched(
        fallback_cities::cities_for(country)
            .iter()
            .map(ToString::to_string),
        cap,
        state,
    )
}

fn unsearched(cities: impl IntoIterator<Item = String>, cap: usize, state: &RunState) -> Vec<String> {
    let mut picked: Vec<String> = Vec::new();
    for city in cities {
        let city = city.trim().to_string();
        if city.is_empty()
            || state.is_city_searched(&city)
            || picked.iter().any(|p| p.eq_ignore_ascii_case(&city))
        {
            continue;
        }
        picked.push(city);
        if picked.len() >= cap {
            break;
        }
    }
    picked
}

/// Record cities as searched and create their tasks.
///
/// Cities already searched are skipped. The `(query, city)` pair is recorded
/// so query variations never repeat it.
pub(crate) fn schedule_cities(
    state: &mut RunState,
    query: &str,
    cities: &[String],
    country: Option<&str>,
    limit: u32,
) -> Vec<SearchTask> {
    let sources = state.active_sources();
    let mut tasks = Vec::new();
    for city in cities {
        if !state.record_city(city) {
            continue;
        }
        state.mark_query_used(query, city);
        tasks.extend(sources.iter().map(|source| {
            SearchTask::new(query, city.trim(), *source)
                .with_country(country.map(ToString::to_string))
                .with_limit(limit)
        }));
    }
    tasks
}

/// Tasks for a query on cities that were already searched.
pub(crate) fn schedule_query(
    state: &mut RunState,
    query: &str,
    cities: &[String],
    limit: u32,
) -> Vec<SearchTask> {
    let sources = state.active_sources();
    let mut tasks = Vec::new();
    for city in cities {
        if !state.mark_query_used(query, city) {
            continue;
        }
        let country = fallback_cities::country_of_city(city).map(ToString::to_string);
        tasks.extend(sources.iter().map(|source| {
            SearchTask::new(query, city.as_str(), *source)
                .with_country(country.clone())
                .with_limit(limit)
        }));
    }
    tasks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::StaticLocationResearch;
    use async_trait::async_trait;
    use prospector_core::{LeadSource, SearchPreferences};
    use tokio_util::sync::CancellationToken;

    struct FixedResearch(Vec<&'static str>);

    #[async_trait]
    impl LocationResearch for FixedResearch {
        async fn best_cities(
            &self,
            _country: &str,
            _niche: &str,
            _exclude_with_website: bool,
            _cancel: &CancellationToken,
        ) -> Result<Vec<String>, ServiceError> {
            Ok(self.0.iter().map(ToString::to_string).collect())
        }
    }

    struct FailingResearch;

    #[async_trait]
    impl LocationResearch for FailingResearch {
        async fn best_cities(
            &self,
            country: &str,
            _niche: &str,
            _exclude_with_website: bool,
            _cancel: &CancellationToken,
        ) -> Result<Vec<String>, ServiceError> {
            Err(ServiceError::Unavailable {
                service: "research".to_string(),
                message: format!("no data for {country}"),
            })
        }
    }

    fn state(locations: &[&str]) -> RunState {
        RunState::new(
            SearchPreferences::new(
                "dentist",
                locations.iter().map(ToString::to_string).collect(),
                5,
            ),
            vec![LeadSource::Maps, LeadSource::Social],
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_country_fans_out_per_city_and_source() {
        let research = FixedResearch(vec!["Paris", "Lyon", "Marseille"]);
        let generation = Generation::new(None, 256);
        let settings = SearchConfig::default();
        let planner = Planner {
            research: &research,
            generation: &generation,
            settings: &settings,
        };
        let mut state = state(&["France"]);
        let (events, mut rx) = crate::events::event_channel();

        let tasks = planner.plan(&mut state, &events).await;

        assert_eq!(tasks.len(), 6);
        assert_eq!(state.processed_countries(), ["France"]);
        assert_eq!(state.searched_cities(), ["Paris", "Lyon", "Marseille"]);
        assert!(tasks
            .iter()
            .all(|t| t.discovered_from_country.as_deref() == Some("France")));
        assert_eq!(tasks[0].location, "Paris");
        assert_eq!(tasks[0].source, LeadSource::Maps);
        assert_eq!(tasks[1].source, LeadSource::Social);
        assert_eq!(tasks[0].limit, Some(settings.per_task_limit));
        assert_eq!(state.plan().len(), 6);

        let mut plan_events = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, crate::events::RunEvent::PlanUpdated(_)) {
                plan_events += 1;
            }
        }
        assert_eq!(plan_events, 1);
    }

    #[tokio::test]
    async fn test_cities_are_searched_directly_and_once() {
        let generation = Generation::new(None, 256);
        let settings = SearchConfig::default();
        let planner = Planner {
            research: &StaticLocationResearch,
            generation: &generation,
            settings: &settings,
        };
        let mut state = state(&["Lyon", "lyon", " "]);

        let tasks = planner.plan(&mut state, &EventEmitter::silent()).await;

        assert_eq!(tasks.len(), 2);
        assert!(tasks.iter().all(|t| t.discovered_from_country.is_none()));
        assert!(state.processed_countries().is_empty());
    }

    #[tokio::test]
    async fn test_failed_research_falls_back_to_city_table() {
        let generation = Generation::new(None, 256);
        let settings = SearchConfig {
            cities_per_country: 2,
            ..SearchConfig::default()
        };
        let planner = Planner {
            research: &FailingResearch,
            generation: &generation,
            settings: &settings,
        };
        let mut state = state(&["fr"]);

        planner.plan(&mut state, &EventEmitter::silent()).await;

        assert_eq!(state.processed_countries(), ["France"]);
        assert_eq!(state.searched_cities(), ["Paris", "Marseille"]);
    }

    #[test]
    fn test_schedule_query_skips_used_pairs() {
        let mut state = state(&["Lyon"]);
        let cities = vec!["Lyon".to_string()];
        let first = schedule_cities(&mut state, "dentist", &cities, None, 20);
        assert_eq!(first.len(), 2);

        assert!(schedule_query(&mut state, "dentist", &cities, 20).is_empty());
        let variation = schedule_query(&mut state, "orthodontist", &cities, 20);
        assert_eq!(variation.len(), 2);
        assert_eq!(variation[0].query, "orthodontist");
        assert_eq!(variation[0].discovered_from_country.as_deref(), Some("France"));
    }
}
