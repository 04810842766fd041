//! Typed run events.
//!
//! The engine never talks to a presentation layer directly. It pushes
//! [`RunEvent`]s into an unbounded channel and moves on; a dropped receiver
//! is not an error. Every log event is mirrored to `tracing`.

use crate::state::RunSummary;
use prospector_core::{Lead, SearchTask, Timestamp};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Severity of a log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Progress milestone
    Info,
    /// Transient failure; the run continues
    Warning,
    /// Failure of a single operation that is not retried
    Error,
    /// A capability ran out of credits for the rest of the run
    Exhausted,
}

/// A human-readable log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// When the entry was created
    pub timestamp: Timestamp,
    /// Message text
    pub message: String,
    /// Severity
    pub severity: Severity,
}

/// Events emitted during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum RunEvent {
    /// The initial task plan was created
    PlanUpdated(Vec<SearchTask>),
    /// Log line
    Log(LogEntry),
    /// A lead was committed to the results
    LeadFound(Lead),
    /// The run ended
    Stopped(RunSummary),
}

/// Create an emitter and the receiver its events arrive on.
#[must_use]
pub fn event_channel() -> (EventEmitter, mpsc::UnboundedReceiver<RunEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventEmitter { tx: Some(tx) }, rx)
}

/// Fire-and-forget sender for [`RunEvent`]s.
#[derive(Debug, Clone, Default)]
pub struct EventEmitter {
    tx: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl EventEmitter {
    /// An emitter that only logs to `tracing`.
    #[must_use]
    pub fn silent() -> Self {
        Self { tx: None }
    }

    fn send(&self, event: RunEvent) {
        if let Some(tx) = &self.tx {
            // The receiver going away does not stop the run.
            let _ = tx.send(event);
        }
    }

    /// Emit a log event.
    pub fn log(&self, severity: Severity, message: impl Into<String>) {
        let message = message.into();
        match severity {
            Severity::Info => tracing::info!("{}", message),
            Severity::Warning => tracing::warn!("{}", message),
            Severity::Error => tracing::error!("{}", message),
            Severity::Exhausted => tracing::warn!(exhausted = true, "{}", message),
        }
        self.send(RunEvent::Log(LogEntry {
            timestamp: Timestamp::now(),
            message,
            severity,
        }));
    }

    /// Emit an info-level log event.
    pub fn info(&self, message: impl Into<String>) {
        self.log(Severity::Info, message);
    }

    /// Emit a warning-level log event.
    pub fn warn(&self, message: impl Into<String>) {
        self.log(Severity::Warning, message);
    }

    /// Emit an error-level log event.
    pub fn error(&self, message: impl Into<String>) {
        self.log(Severity::Error, message);
    }

    /// Emit a resource-exhausted log event.
    pub fn exhausted(&self, message: impl Into<String>) {
        self.log(Severity::Exhausted, message);
    }

    /// Announce a new task plan.
    pub fn plan_updated(&self, plan: &[SearchTask]) {
        tracing::debug!(tasks = plan.len(), "Plan updated");
        self.send(RunEvent::PlanUpdated(plan.to_vec()));
    }

    /// Announce a committed lead.
    pub fn lead_found(&self, lead: &Lead) {
        tracing::debug!(lead = %lead.name, source = %lead.source, "Lead committed");
        self.send(RunEvent::LeadFound(lead.clone()));
    }

    /// Announce the end of the run.
    pub fn stopped(&self, summary: &RunSummary) {
        self.send(RunEvent::Stopped(summary.clone()));
    }
}
