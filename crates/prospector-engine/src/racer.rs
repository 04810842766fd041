//! Concurrent task racer.
//!
//! Every task of a batch is spawned onto a [`JoinSet`] and its results go
//! through the pipeline as soon as it finishes, in completion order. The
//! batch resolves when nothing is left in flight, when the goal is reached or
//! when the run is cancelled. Reaching the goal cancels the batch token and
//! aborts whatever is still running.

use crate::collaborators::{guarded, SourceAdapter, SourceKeys};
use crate::events::EventEmitter;
use crate::pipeline::LeadPipeline;
use crate::state::RunState;
use prospector_core::{Lead, LeadSource, SearchConfig, SearchTask, TaskStatus};
use prospector_keys::{KeyError, KeyRotationManager, ServiceError};
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Lead metadata key holding the city a lead was found in.
pub const METADATA_SEARCH_LOCATION: &str = "search_location";

/// Counters for one executed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Tasks handed to a source
    pub dispatched: usize,
    /// Tasks whose results were processed
    pub completed: usize,
    /// Tasks that failed or timed out
    pub failed: usize,
    /// Tasks never dispatched or aborted
    pub skipped: usize,
    /// Leads committed during the batch
    pub committed: usize,
}

/// Why a task produced no results.
#[derive(Debug)]
enum TaskFailure {
    Service(ServiceError),
    Exhausted { service: String },
    Cancelled,
}

struct TaskOutcome {
    task: SearchTask,
    result: Result<Vec<Lead>, TaskFailure>,
}

enum Wake {
    Finished(Result<TaskOutcome, JoinError>),
    Heartbeat,
    Cancelled,
    Idle,
}

/// Runs search tasks against their sources concurrently.
pub(crate) struct TaskRacer<'a> {
    pub(crate) sources: &'a HashMap<LeadSource, Arc<dyn SourceAdapter>>,
    pub(crate) keys: &'a Arc<KeyRotationManager>,
    pub(crate) settings: &'a SearchConfig,
}

impl TaskRacer<'_> {
    /// Run `tasks` until they settle, the goal is reached or the run stops.
    pub(crate) async fn execute_batch(
        &self,
        tasks: Vec<SearchTask>,
        state: &mut RunState,
        pipeline: &LeadPipeline,
        events: &EventEmitter,
    ) -> BatchReport {
        let mut report = BatchReport::default();
        if tasks.is_empty() {
            return report;
        }

        let cities = {
            let mut cities: Vec<&str> = Vec::new();
            for task in &tasks {
                if !cities.contains(&task.location.as_str()) {
                    cities.push(&task.location);
                }
            }
            cities.join(", ")
        };
        events.info(format!(
            "Dispatching {} task(s) for {} ({}/{} leads)",
            tasks.len(),
            cities,
            state.lead_count(),
            state.target()
        ));

        let batch = state.cancel_token().child_token();
        let mut queue: VecDeque<SearchTask> = tasks.into();
        let mut running: JoinSet<TaskOutcome> = JoinSet::new();

        let period = Duration::from_secs(self.settings.heartbeat_secs.max(1));
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.refill(&mut queue, &mut running, state, events, &batch, &mut report);

        loop {
            let wake = tokio::select! {
                biased;
                () = batch.cancelled() => Wake::Cancelled,
                joined = running.join_next() => joined.map_or(Wake::Idle, Wake::Finished),
                _ = heartbeat.tick() => Wake::Heartbeat,
            };

            match wake {
                Wake::Idle => break,
                Wake::Cancelled => {
                    if !state.goal_reached() {
                        events.info(format!(
                            "Batch cancelled with {} task(s) in flight",
                            running.len()
                        ));
                    }
                    break;
                }
                Wake::Heartbeat => events.info(format!(
                    "Still working: {} task(s) in flight, {} queued, {}/{} leads",
                    running.len(),
                    queue.len(),
                    state.lead_count(),
                    state.target()
                )),
                Wake::Finished(Err(err)) => {
                    report.failed += 1;
                    if !err.is_cancelled() {
                        events.error(format!("Search task panicked: {err}"));
                    }
                }
                Wake::Finished(Ok(outcome)) => {
                    self.settle(outcome, state, pipeline, events, &mut report)
                        .await;
                    if state.goal_reached() {
                        events.info(format!(
                            "Goal reached with {} lead(s), cancelling {} task(s) in flight",
                            state.lead_count(),
                            running.len()
                        ));
                        batch.cancel();
                        break;
                    }
                    self.refill(&mut queue, &mut running, state, events, &batch, &mut report);
                }
            }
        }

        report.skipped += running.len() + queue.len();
        running.shutdown().await;
        report
    }

    /// Spawn queued tasks until the concurrency limit is reached.
    fn refill(
        &self,
        queue: &mut VecDeque<SearchTask>,
        running: &mut JoinSet<TaskOutcome>,
        state: &RunState,
        events: &EventEmitter,
        batch: &CancellationToken,
        report: &mut BatchReport,
    ) {
        let limit = self.settings.max_concurrent_tasks.max(1);
        let stagger = self.settings.task_stagger_ms;

        while running.len() < limit {
            let Some(mut task) = queue.pop_front() else {
                break;
            };
            if state.is_source_exhausted(task.source) {
                report.skipped += 1;
                continue;
            }
            let Some(adapter) = self.sources.get(&task.source) else {
                events.warn(format!("No adapter registered for {}", task.source));
                report.skipped += 1;
                continue;
            };

            // Stagger the first wave by dispatch order; refills only wait one step.
            let step = if report.dispatched < limit {
                report.dispatched as u64
            } else {
                1
            };
            let base = stagger.saturating_mul(step);
            let jitter = if base > 1 {
                rand::thread_rng().gen_range(0..=base / 2)
            } else {
                0
            };
            let delay = Duration::from_millis(base + jitter);

            task.status = TaskStatus::Pending;
            report.dispatched += 1;
            running.spawn(run_task(
                Arc::clone(adapter),
                Arc::clone(self.keys),
                task,
                delay,
                Duration::from_secs(self.settings.source_timeout_secs),
                batch.clone(),
            ));
        }
    }

    /// Handle one finished task.
    async fn settle(
        &self,
        outcome: TaskOutcome,
        state: &mut RunState,
        pipeline: &LeadPipeline,
        events: &EventEmitter,
        report: &mut BatchReport,
    ) {
        let TaskOutcome { mut task, result } = outcome;
        match result {
            Ok(mut leads) => {
                task.status = TaskStatus::Completed;
                report.completed += 1;
                let found = leads.len();
                for lead in &mut leads {
                    lead.metadata
                        .entry(METADATA_SEARCH_LOCATION.to_string())
                        .or_insert_with(|| serde_json::Value::String(task.location.clone()));
                }
                let batch = pipeline.process(state, leads, events).await;
                report.committed += batch.committed;
                events.info(format!(
                    "{} \"{}\" in {}: {} result(s), {} new lead(s) ({}/{})",
                    task.source,
                    task.query,
                    task.location,
                    found,
                    batch.committed,
                    state.lead_count(),
                    state.target()
                ));
            }
            Err(TaskFailure::Cancelled) => {
                task.status = TaskStatus::Failed;
                report.skipped += 1;
            }
            Err(TaskFailure::Exhausted { service }) => {
                task.status = TaskStatus::Failed;
                report.failed += 1;
                // Another task may have revived the pool since this one gave up.
                if !self.keys.is_exhausted(&service) {
                    events.warn(format!(
                        "{} search in {} ran out of {service} keys, which have since recovered",
                        task.source, task.location
                    ));
                    return;
                }
                if state.mark_source_exhausted(task.source) {
                    events.exhausted(format!(
                        "{} is out of credentials ({service}), skipping it for the rest of the run",
                        task.source
                    ));
                }
            }
            Err(TaskFailure::Service(err)) => {
                task.status = TaskStatus::Failed;
                report.failed += 1;
                events.warn(format!(
                    "{} search failed in {}: {err}",
                    task.source, task.location
                ));
            }
        }
    }
}

/// Body of one spawned task: wait for its slot, then search.
async fn run_task(
    adapter: Arc<dyn SourceAdapter>,
    keys: Arc<KeyRotationManager>,
    task: SearchTask,
    delay: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> TaskOutcome {
    if !delay.is_zero() {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return TaskOutcome { task, result: Err(TaskFailure::Cancelled) };
            }
            () = tokio::time::sleep(delay) => {}
        }
    }

    let result = search(adapter.as_ref(), &keys, &task, timeout, &cancel).await;
    TaskOutcome { task, result }
}

async fn search(
    adapter: &dyn SourceAdapter,
    keys: &KeyRotationManager,
    task: &SearchTask,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Vec<Lead>, TaskFailure> {
    let name = task.source.as_str();
    let Some(service) = adapter.credential_service() else {
        return guarded(name, timeout, cancel, adapter.search(task, None, cancel))
            .await
            .map_err(failure);
    };

    let prober = SourceKeys { service, adapter };
    loop {
        let lease = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(TaskFailure::Cancelled),
            lease = keys.next_key(service, &prober) => lease,
        };
        let lease = match lease {
            Ok(lease) => lease,
            Err(KeyError::AllExhausted { .. } | KeyError::UnknownService { .. }) => {
                return Err(TaskFailure::Exhausted {
                    service: service.to_string(),
                });
            }
            Err(KeyError::Service(err)) => return Err(failure(err)),
            Err(err @ KeyError::HardExhausted { .. }) => {
                return Err(TaskFailure::Service(ServiceError::Other {
                    service: service.to_string(),
                    message: err.to_string(),
                }));
            }
        };

        match guarded(name, timeout, cancel, adapter.search(task, Some(&lease.key), cancel)).await {
            Err(err) if err.is_key_failure() => keys.mark_exhausted(&lease, &err.to_string()),
            other => return other.map_err(failure),
        }
    }
}

fn failure(err: ServiceError) -> TaskFailure {
    match err {
        ServiceError::Cancelled => TaskFailure::Cancelled,
        other => TaskFailure::Service(other),
    }
}
