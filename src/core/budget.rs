//! Budget limits and enforcement for verification jobs.
//!
//! Prevents runaway cost and latency through configurable ceilings on:
//! - Research iterations
//! - Search and fetch calls
//! - Reasoning tokens (per job and per call)
//! - Wall-clock time
//!
//! Checks are pure: they never mutate the tracker and never fail. What a
//! rejected check means is decided by the enforcement mode (`hard` stops,
//! `soft` logs and lets the work through).

use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// How ceilings are enforced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementMode {
    /// Reject the call / stop the loop
    #[default]
    Hard,
    /// Log the overrun and continue
    Soft,
}

/// Budget ceilings for one job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetLimits {
    /// Maximum research iterations (default: 5)
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Maximum search calls, cache hits excluded (default: 12)
    #[serde(default = "default_max_searches")]
    pub max_searches: u32,

    /// Maximum source fetches, the input article included (default: 20)
    #[serde(default = "default_max_fetches")]
    pub max_fetches: u32,

    /// Maximum reasoning tokens across the job (default: 200k)
    #[serde(default = "default_max_total_tokens")]
    pub max_total_tokens: u64,

    /// Maximum reasoning tokens for a single call (default: 20k)
    #[serde(default = "default_max_tokens_per_call")]
    pub max_tokens_per_call: u64,

    /// Wall-clock budget in seconds (default: 300 = 5 min)
    #[serde(default = "default_max_elapsed")]
    pub max_elapsed_seconds: u64,

    #[serde(default)]
    pub enforcement: EnforcementMode,
}

fn default_max_iterations() -> u32 {
    5
}
fn default_max_searches() -> u32 {
    12
}
fn default_max_fetches() -> u32 {
    20
}
fn default_max_total_tokens() -> u64 {
    200_000
}
fn default_max_tokens_per_call() -> u64 {
    20_000
}
fn default_max_elapsed() -> u64 {
    300
} // 5 min

impl Default for BudgetLimits {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_searches: default_max_searches(),
            max_fetches: default_max_fetches(),
            max_total_tokens: default_max_total_tokens(),
            max_tokens_per_call: default_max_tokens_per_call(),
            max_elapsed_seconds: default_max_elapsed(),
            enforcement: EnforcementMode::Hard,
        }
    }
}

/// Tracks resource usage during a job. Owned by exactly one job.
#[derive(Debug, Clone)]
pub struct BudgetTracker {
    pub tokens_used: u64,

    /// Research iterations started
    pub iterations: u32,

    pub searches: u32,
    pub fetches: u32,
    pub reasoning_calls: u32,

    /// When the job started
    pub started_at: Instant,

    /// Set once a hard ceiling has stopped work
    pub exceeded: bool,
    pub exceeded_reason: Option<String>,

    /// Ceilings passed while in soft mode
    pub soft_overruns: Vec<String>,
}

impl Default for BudgetTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl BudgetTracker {
    /// Create a new tracker starting now
    pub fn new() -> Self {
        Self::started_at(Instant::now())
    }

    /// Create a tracker with an explicit start instant
    pub fn started_at(started_at: Instant) -> Self {
        Self {
            tokens_used: 0,
            iterations: 0,
            searches: 0,
            fetches: 0,
            reasoning_calls: 0,
            started_at,
            exceeded: false,
            exceeded_reason: None,
            soft_overruns: Vec::new(),
        }
    }

    pub fn record_tokens(&mut self, tokens: u64) {
        self.tokens_used = self.tokens_used.saturating_add(tokens);
    }

    pub fn record_reasoning_call(&mut self) {
        self.reasoning_calls += 1;
    }

    /// Record several reasoning calls at once (retries included)
    pub fn record_reasoning_calls(&mut self, calls: u32) {
        self.reasoning_calls += calls;
    }

    pub fn record_iteration(&mut self) {
        self.iterations += 1;
    }

    pub fn record_search(&mut self) {
        self.searches += 1;
    }

    pub fn record_fetch(&mut self) {
        self.fetches += 1;
    }

    /// Mark the budget as exceeded. The first reason wins.
    pub fn mark_exceeded(&mut self, reason: impl Into<String>) {
        if !self.exceeded {
            self.exceeded = true;
            self.exceeded_reason = Some(reason.into());
        }
    }

    /// Get elapsed time in seconds
    pub fn elapsed_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// A ceiling that a check would cross
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BudgetViolation {
    #[error("Total token budget exceeded: {used} + {requested} > {limit}")]
    TotalTokens { used: u64, requested: u64, limit: u64 },

    #[error("Per-call token budget exceeded: {requested} > {limit}")]
    PerCallTokens { requested: u64, limit: u64 },

    #[error("Maximum iterations reached: {actual} >= {limit}")]
    MaxIterations { actual: u32, limit: u32 },

    #[error("Maximum searches reached: {actual} >= {limit}")]
    MaxSearches { actual: u32, limit: u32 },

    #[error("Maximum fetches reached: {actual} >= {limit}")]
    MaxFetches { actual: u32, limit: u32 },

    #[error("Wall-clock budget exhausted: {elapsed_seconds}s >= {limit_seconds}s")]
    WallClock {
        elapsed_seconds: u64,
        limit_seconds: u64,
    },
}

/// Outcome of a budget check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BudgetDecision {
    Allowed,
    Rejected(BudgetViolation),
}

impl BudgetDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, BudgetDecision::Allowed)
    }

    fn from_violation(violation: Option<BudgetViolation>) -> Self {
        match violation {
            Some(v) => BudgetDecision::Rejected(v),
            None => BudgetDecision::Allowed,
        }
    }
}

/// Applies `BudgetLimits` to a `BudgetTracker`
#[derive(Debug, Clone, Default)]
pub struct BudgetGovernor {
    limits: BudgetLimits,
}

impl BudgetGovernor {
    pub fn new(limits: BudgetLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &BudgetLimits {
        &self.limits
    }

    /// Check whether `tokens_to_add` more reasoning tokens fit the budget
    pub fn check_token_budget(&self, tracker: &BudgetTracker, tokens_to_add: u64) -> BudgetDecision {
        if tokens_to_add > self.limits.max_tokens_per_call {
            return BudgetDecision::Rejected(BudgetViolation::PerCallTokens {
                requested: tokens_to_add,
                limit: self.limits.max_tokens_per_call,
            });
        }

        if tracker.tokens_used.saturating_add(tokens_to_add) > self.limits.max_total_tokens {
            return BudgetDecision::Rejected(BudgetViolation::TotalTokens {
                used: tracker.tokens_used,
                requested: tokens_to_add,
                limit: self.limits.max_total_tokens,
            });
        }

        BudgetDecision::Allowed
    }

    /// Check whether another research iteration may start
    pub fn check_iteration(&self, tracker: &BudgetTracker) -> BudgetDecision {
        BudgetDecision::from_violation(
            (tracker.iterations >= self.limits.max_iterations).then(|| {
                BudgetViolation::MaxIterations {
                    actual: tracker.iterations,
                    limit: self.limits.max_iterations,
                }
            }),
        )
    }

    /// Check whether another search call may be issued
    pub fn check_search(&self, tracker: &BudgetTracker) -> BudgetDecision {
        BudgetDecision::from_violation((tracker.searches >= self.limits.max_searches).then(|| {
            BudgetViolation::MaxSearches {
                actual: tracker.searches,
                limit: self.limits.max_searches,
            }
        }))
    }

    /// Check whether another source fetch may be issued
    pub fn check_fetch(&self, tracker: &BudgetTracker) -> BudgetDecision {
        BudgetDecision::from_violation((tracker.fetches >= self.limits.max_fetches).then(|| {
            BudgetViolation::MaxFetches {
                actual: tracker.fetches,
                limit: self.limits.max_fetches,
            }
        }))
    }

    /// Check the wall-clock budget
    pub fn check_elapsed(&self, tracker: &BudgetTracker) -> BudgetDecision {
        let elapsed = tracker.elapsed_seconds();
        BudgetDecision::from_violation((elapsed >= self.limits.max_elapsed_seconds).then(|| {
            BudgetViolation::WallClock {
                elapsed_seconds: elapsed,
                limit_seconds: self.limits.max_elapsed_seconds,
            }
        }))
    }

    /// Apply the enforcement mode to a decision.
    ///
    /// Returns true when the work may proceed. In hard mode a rejection marks
    /// the tracker exceeded; in soft mode it is logged and recorded as an
    /// overrun, and the work proceeds.
    pub fn enforce(&self, tracker: &mut BudgetTracker, decision: BudgetDecision) -> bool {
        match decision {
            BudgetDecision::Allowed => true,
            BudgetDecision::Rejected(violation) => match self.limits.enforcement {
                EnforcementMode::Hard => {
                    tracker.mark_exceeded(violation.to_string());
                    false
                }
                EnforcementMode::Soft => {
                    let reason = violation.to_string();
                    warn!(%reason, "Budget ceiling crossed (soft enforcement, continuing)");
                    if !tracker.soft_overruns.contains(&reason) {
                        tracker.soft_overruns.push(reason);
                    }
                    true
                }
            },
        }
    }

    /// Check and enforce a token reservation
    pub fn allow_tokens(&self, tracker: &mut BudgetTracker, tokens_to_add: u64) -> bool {
        let decision = self.check_token_budget(tracker, tokens_to_add);
        self.enforce(tracker, decision)
    }

    /// Check and enforce the iteration ceiling together with the wall clock
    pub fn allow_iteration(&self, tracker: &mut BudgetTracker) -> bool {
        let decision = self.check_elapsed(tracker);
        if !self.enforce(tracker, decision) {
            return false;
        }
        let decision = self.check_iteration(tracker);
        self.enforce(tracker, decision)
    }

    /// Check and enforce the search ceiling together with the wall clock
    pub fn allow_search(&self, tracker: &mut BudgetTracker) -> bool {
        let decision = self.check_elapsed(tracker);
        if !self.enforce(tracker, decision) {
            return false;
        }
        let decision = self.check_search(tracker);
        self.enforce(tracker, decision)
    }

    /// Check and enforce the fetch ceiling together with the wall clock
    pub fn allow_fetch(&self, tracker: &mut BudgetTracker) -> bool {
        let decision = self.check_elapsed(tracker);
        if !self.enforce(tracker, decision) {
            return false;
        }
        let decision = self.check_fetch(tracker);
        self.enforce(tracker, decision)
    }

    /// Snapshot the tracker for reporting
    pub fn stats(&self, tracker: &BudgetTracker) -> BudgetStats {
        BudgetStats {
            tokens_used: tracker.tokens_used,
            max_total_tokens: self.limits.max_total_tokens,
            iterations: tracker.iterations,
            max_iterations: self.limits.max_iterations,
            searches: tracker.searches,
            fetches: tracker.fetches,
            reasoning_calls: tracker.reasoning_calls,
            elapsed_ms: tracker.started_at.elapsed().as_millis() as u64,
            enforcement: self.limits.enforcement,
            budget_exceeded: tracker.exceeded,
            exceeded_reason: tracker.exceeded_reason.clone(),
            soft_overruns: tracker.soft_overruns.clone(),
        }
    }
}

/// Read-only budget summary attached to a job result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetStats {
    pub tokens_used: u64,
    pub max_total_tokens: u64,
    pub iterations: u32,
    pub max_iterations: u32,
    pub searches: u32,
    pub fetches: u32,
    pub reasoning_calls: u32,
    pub elapsed_ms: u64,
    pub enforcement: EnforcementMode,
    pub budget_exceeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exceeded_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub soft_overruns: Vec<String>,
}
