//! Lead processing pipeline.
//!
//! Every batch a source returns goes through the same stages, one lead at a
//! time: filter, dedupe, score, enrich, re-score, commit. Processing stops as
//! soon as the run reaches its target, so no lead past the one that reached
//! it is committed.

pub mod dedupe;
pub mod enrich;
pub mod filter;
pub mod score;

use crate::events::EventEmitter;
use crate::state::RunState;
use enrich::{Enricher, Enrichment};
use prospector_core::Lead;

/// Counters for one processed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Leads committed to the results
    pub committed: usize,
    /// Leads removed by the preference filters
    pub filtered: usize,
    /// Leads already seen this run
    pub duplicates: usize,
    /// Leads dropped during enrichment
    pub dropped: usize,
    /// Leads left unprocessed because the goal was reached or the run stopped
    pub skipped: usize,
}

/// Filters, dedupes, scores, enriches and commits leads.
pub struct LeadPipeline {
    enricher: Enricher,
}

impl LeadPipeline {
    /// Create a pipeline around an enricher.
    #[must_use]
    pub fn new(enricher: Enricher) -> Self {
        Self { enricher }
    }

    /// Enrichment services used by this pipeline.
    #[must_use]
    pub fn enricher(&self) -> &Enricher {
        &self.enricher
    }

    /// Process one source batch against the run state.
    pub async fn process(
        &self,
        state: &mut RunState,
        leads: Vec<Lead>,
        events: &EventEmitter,
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        let total = leads.len();
        let filters = state.preferences().filters;
        let options = state.preferences().enrichment;
        let cancel = state.cancel_token().clone();

        for (index, mut lead) in leads.into_iter().enumerate() {
            if state.goal_reached() || cancel.is_cancelled() {
                outcome.skipped = total - index;
                break;
            }

            if let Err(reason) = filter::check(&lead, &filters) {
                tracing::trace!(lead = %lead.name, %reason, "Filtered out");
                outcome.filtered += 1;
                continue;
            }

            if !state.dedup_mut().insert(&lead) {
                tracing::trace!(lead = %lead.name, "Duplicate");
                outcome.duplicates += 1;
                continue;
            }

            score::apply(&mut lead);

            if options.any() {
                lead = match self
                    .enricher
                    .enrich(lead, &options, state.capabilities_mut(), events, &cancel)
                    .await
                {
                    Enrichment::Keep(lead) => lead,
                    Enrichment::Drop(reason) => {
                        tracing::debug!(%reason, "Lead dropped during enrichment");
                        outcome.dropped += 1;
                        continue;
                    }
                    Enrichment::Cancelled => {
                        outcome.skipped = total - index;
                        break;
                    }
                };
                score::apply(&mut lead);
            }

            let committed = state.commit(lead);
            events.lead_found(committed);
            outcome.committed += 1;
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prospector_core::{LeadFilters, LeadSource, SearchPreferences, Tier};
    use prospector_keys::KeyRotationManager;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn pipeline() -> LeadPipeline {
        LeadPipeline::new(Enricher::new(
            Arc::new(KeyRotationManager::new()),
            Duration::from_secs(5),
        ))
    }

    fn state(prefs: SearchPreferences) -> RunState {
        RunState::new(prefs, vec![LeadSource::Maps], CancellationToken::new())
    }

    fn lead(name: &str, phone: &str) -> Lead {
        let mut lead = Lead::new(name, LeadSource::Maps);
        lead.phone = Some(phone.to_string());
        lead
    }

    #[tokio::test]
    async fn test_same_phone_commits_once() {
        let mut state = state(SearchPreferences::new("dentist", vec!["Lyon".into()], 10));
        let events = EventEmitter::silent();

        let first = pipeline()
            .process(&mut state, vec![lead("A", "04 78 00 00 01")], &events)
            .await;
        let second = pipeline()
            .process(&mut state, vec![lead("A again", "+33 4 78 00 00 01")], &events)
            .await;

        assert_eq!(first.committed, 1);
        assert_eq!(second.duplicates, 1);
        assert_eq!(state.lead_count(), 1);
    }

    #[tokio::test]
    async fn test_stops_at_goal_mid_batch() {
        let mut state = state(SearchPreferences::new("dentist", vec!["Lyon".into()], 2));
        let (events, mut rx) = crate::events::event_channel();
        let batch = (0..5)
            .map(|i| lead(&format!("Lead {i}"), &format!("04780000{i:02}")))
            .collect();

        let outcome = pipeline().process(&mut state, batch, &events).await;

        assert_eq!(outcome.committed, 2);
        assert_eq!(outcome.skipped, 3);
        assert_eq!(state.lead_count(), 2);
        assert_eq!(state.results()[0].name, "Lead 0");

        let mut found = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, crate::events::RunEvent::LeadFound(_)) {
                found += 1;
            }
        }
        assert_eq!(found, 2);
    }

    #[tokio::test]
    async fn test_filters_apply_before_dedupe() {
        let prefs = SearchPreferences::new("dentist", vec!["Lyon".into()], 10).with_filters(
            LeadFilters {
                exclude_with_website: true,
                ..LeadFilters::default()
            },
        );
        let mut state = state(prefs);

        let mut with_site = lead("Has site", "0478000001");
        with_site.website = Some("https://site.fr".to_string());
        let same_phone_no_site = lead("No site", "0478000001");

        let outcome = pipeline()
            .process(
                &mut state,
                vec![with_site, same_phone_no_site],
                &EventEmitter::silent(),
            )
            .await;

        assert_eq!(outcome.filtered, 1);
        assert_eq!(outcome.committed, 1);
        assert_eq!(state.results()[0].name, "No site");
    }

    #[tokio::test]
    async fn test_committed_leads_are_scored() {
        let mut state = state(SearchPreferences::new("dentist", vec!["Lyon".into()], 10));
        let mut rich = lead("Rich", "0478000001");
        rich.email = Some("a@rich.fr".to_string());

        pipeline()
            .process(&mut state, vec![rich], &EventEmitter::silent())
            .await;

        let committed = &state.results()[0];
        assert_eq!(committed.score(), Some(6));
        assert_eq!(committed.tier(), Some(Tier::Gold));
        assert_eq!(committed.status, prospector_core::LeadStatus::Qualified);
    }

    #[tokio::test]
    async fn test_cancelled_run_commits_nothing() {
        let mut state = state(SearchPreferences::new("dentist", vec!["Lyon".into()], 10));
        state.cancel_token().cancel();

        let outcome = pipeline()
            .process(&mut state, vec![lead("A", "0478000001")], &EventEmitter::silent())
            .await;

        assert_eq!(outcome.committed, 0);
        assert_eq!(outcome.skipped, 1);
    }
}
