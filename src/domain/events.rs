//! Audit events for a verification job.
//!
//! Every observable step of the research loop is recorded as an immutable
//! event, so a finished job can be audited (or replayed) after the fact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single entry in a job's append-only audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// The job this event belongs to
    pub job_id: Uuid,

    /// Phase of the research loop the job was in
    pub phase: ResearchPhase,

    /// Type of event
    pub event_type: EventType,

    /// Research iteration (0 outside the loop)
    pub iteration: u32,

    /// Human-readable summary (NO secrets)
    pub summary: String,

    /// Time taken in milliseconds (if applicable)
    pub duration_ms: Option<u64>,

    /// Error message if something failed
    pub error: Option<String>,
}

impl JobEvent {
    /// Create a new event with the current timestamp
    pub fn new(
        job_id: Uuid,
        phase: ResearchPhase,
        event_type: EventType,
        iteration: u32,
        summary: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            job_id,
            phase,
            event_type,
            iteration,
            summary,
            duration_ms: None,
            error: None,
        }
    }

    /// Attach duration information
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Attach error information
    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }
}

/// States of the research loop state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchPhase {
    Decompose,
    Research,
    Extract,
    Decide,
    Verdict,
    Aggregate,
    Done,
    /// Safe low-confidence output after zero usable evidence
    FallbackResult,
    /// Fatal termination
    Failed,
}

impl ResearchPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResearchPhase::Decompose => "decompose",
            ResearchPhase::Research => "research",
            ResearchPhase::Extract => "extract",
            ResearchPhase::Decide => "decide",
            ResearchPhase::Verdict => "verdict",
            ResearchPhase::Aggregate => "aggregate",
            ResearchPhase::Done => "done",
            ResearchPhase::FallbackResult => "fallback_result",
            ResearchPhase::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ResearchPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Types of events that can occur during a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    JobStarted,
    PhaseEntered,
    SearchIssued,
    SearchCacheHit,
    /// Search not attempted (budget, open circuit, paused system)
    SearchSkipped,
    SearchFailed,
    SourceFetched,
    FetchFailed,
    EvidenceAccepted,
    EvidenceRejected,
    /// The heuristic stood in for a failed or unaffordable reasoning call
    AnalysisFallback,
    /// Two near-duplicate contexts were merged
    ContextMerged,
    /// Verdict validation adjusted a truth percentage
    VerdictAdjusted,
    /// A budget ceiling stopped further work
    BudgetStop,
    JobCompleted,
    /// Completed with the fail-safe low-confidence result
    JobDegraded,
    JobFailed,
}
