//! Domain types for the claimcheck research engine.
//!
//! This module contains the core data structures:
//! - Claim / AnalysisContext: what is being verified, and under which framing
//! - Source / EvidenceItem: what was retrieved and what was extracted from it
//! - ClaimVerdict / AggregateVerdict: what was concluded
//! - Job / JobResult: one verification request end to end
//! - Events: the audit trail of a job

pub mod claim;
pub mod events;
pub mod evidence;
pub mod job;
pub mod verdict;

// Re-export commonly used types
pub use claim::{AnalysisContext, Centrality, Claim, ClaimRole, HarmPotential, ThesisRelevance, MAIN_CONTEXT_ID};
pub use events::{EventType, JobEvent, ResearchPhase};
pub use evidence::{EvidenceCategory, EvidenceDirection, EvidenceItem, Source};
pub use job::{InputKind, Job, JobResult};
pub use verdict::{AggregateVerdict, ClaimVerdict, ContextVerdict, FactualBasis, VerdictLabel};
