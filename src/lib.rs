//! claimcheck - Evidence-grounded claim verification
//!
//! Takes a claim, question, or article, breaks it into verifiable claims,
//! researches them through a search provider, and produces per-claim and
//! aggregate verdicts backed only by evidence that can be traced verbatim
//! to a fetched source.
//!
//! # Architecture
//!
//! Each verification is a job driven by a bounded research loop:
//! - Every search, fetch and reasoning call is checked against a budget
//! - Provider outages trip circuit breakers and degrade to heuristics
//! - Evidence that cannot be found in its source is rejected
//! - Every step is recorded as an audit event on the job
//!
//! # Modules
//!
//! - `adapters`: Collaborator traits and HTTP implementations
//! - `analysis`: Remote, heuristic and hybrid analysis services
//! - `core`: Budget, health, cache, provenance, aggregation, controller
//! - `domain`: Data structures (Job, Claim, EvidenceItem, verdicts, events)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Verify a claim
//! claimcheck verify "The Golden Gate Bridge opened in 1937"
//!
//! # Verify an article
//! claimcheck verify https://example.org/story --json
//!
//! # Inspect a job
//! claimcheck status <job-id> --events
//! ```

pub mod adapters;
pub mod analysis;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use core::{ControllerConfig, ResearchController, ResearchError};
pub use domain::{Job, JobEvent, JobResult, VerdictLabel};
