//! Job state and the final result of a verification.
//!
//! A Job is owned exclusively by the research controller for its lifetime;
//! the JobResult is what leaves the controller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analysis::InputClassification;
use crate::core::budget::{BudgetStats, BudgetTracker};

use super::claim::{AnalysisContext, Claim};
use super::events::{EventType, JobEvent, ResearchPhase};
use super::evidence::{EvidenceItem, Source};
use super::verdict::{AggregateVerdict, ClaimVerdict, ContextVerdict};

/// Whether the input was free text or a URL to an article
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    Text,
    Url,
}

/// One verification request in progress
#[derive(Debug)]
pub struct Job {
    pub id: Uuid,

    /// Input exactly as submitted
    pub input: String,

    pub input_kind: InputKind,

    /// Text being analysed (the article body for URL input)
    pub analysis_text: String,

    pub started_at: DateTime<Utc>,

    /// Current state machine phase
    pub phase: ResearchPhase,

    /// Current research iteration (1-indexed inside the loop)
    pub iteration: u32,

    pub budget: BudgetTracker,

    pub claims: Vec<Claim>,
    pub contexts: Vec<AnalysisContext>,

    /// Search queries produced by decomposition, in priority order
    pub queries: Vec<String>,
    /// Number of queries already issued from the front of `queries`
    pub queries_run: usize,

    pub sources: Vec<Source>,
    pub evidence: Vec<EvidenceItem>,

    /// Evidence items extracted before provenance filtering (running total)
    pub extracted_count: usize,
    /// Evidence items rejected by the provenance gate (running total)
    pub rejected_count: usize,

    pub warnings: Vec<String>,
    pub events: Vec<JobEvent>,
}

impl Job {
    /// Create a new job for an input
    pub fn new(id: Uuid, input: String, input_kind: InputKind) -> Self {
        Self {
            id,
            analysis_text: input.clone(),
            input,
            input_kind,
            started_at: Utc::now(),
            phase: ResearchPhase::Decompose,
            iteration: 0,
            budget: BudgetTracker::new(),
            claims: Vec::new(),
            contexts: Vec::new(),
            queries: Vec::new(),
            queries_run: 0,
            sources: Vec::new(),
            evidence: Vec::new(),
            extracted_count: 0,
            rejected_count: 0,
            warnings: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Build an event stamped with the current phase and iteration
    pub fn event(&self, event_type: EventType, summary: impl Into<String>) -> JobEvent {
        JobEvent::new(self.id, self.phase, event_type, self.iteration, summary.into())
    }

    /// Record an event in the current phase
    pub fn record(&mut self, event_type: EventType, summary: impl Into<String>) {
        let event = self.event(event_type, summary);
        self.events.push(event);
    }

    /// Record a pre-built event
    pub fn push_event(&mut self, event: JobEvent) {
        self.events.push(event);
    }

    /// Move to a new phase, recording the transition
    pub fn enter(&mut self, phase: ResearchPhase) {
        self.phase = phase;
        self.record(EventType::PhaseEntered, format!("Entered {}", phase));
    }

    /// Add a warning (deduplicated)
    pub fn warn(&mut self, warning: impl Into<String>) {
        let warning = warning.into();
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
    }

    pub fn has_source_url(&self, url: &str) -> bool {
        self.sources.iter().any(|s| s.url == url)
    }

    pub fn next_source_id(&self) -> String {
        format!("S{}", self.sources.len() + 1)
    }

    /// Evidence ids follow the running candidate count, so ids of rejected
    /// candidates are never reused
    pub fn next_evidence_id(&self) -> String {
        format!("E{}", self.extracted_count + 1)
    }

    pub fn source(&self, id: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.id == id)
    }
}

/// Final, serialisable outcome of a verification job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: Uuid,
    pub input: String,
    pub input_kind: InputKind,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<InputClassification>,

    pub claims: Vec<Claim>,
    pub contexts: Vec<AnalysisContext>,
    pub sources: Vec<Source>,
    pub evidence: Vec<EvidenceItem>,

    pub claim_verdicts: Vec<ClaimVerdict>,
    pub context_verdicts: Vec<ContextVerdict>,

    /// Overall verdict across all claims and contexts
    pub verdict: AggregateVerdict,

    /// Human-readable one-paragraph summary
    pub summary: String,

    /// True when the fail-safe low-confidence result was returned
    pub degraded: bool,

    pub warnings: Vec<String>,
    pub budget_stats: BudgetStats,
    pub events: Vec<JobEvent>,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}
