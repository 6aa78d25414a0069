//! Analysis services.
//!
//! Every model-backed step of a verification job goes through the
//! [`AnalysisService`] trait. Two variants implement it: a local heuristic
//! and a remote reasoning-backed service. [`HybridAnalysis`] wraps both,
//! choosing per analysis point and falling back to the heuristic when the
//! remote call fails.

pub mod heuristic;
pub mod metrics;
pub mod remote;
pub mod retry;
pub mod selector;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adapters::ProviderError;
use crate::domain::{AnalysisContext, Claim, ClaimVerdict, EvidenceItem, Source};

pub use heuristic::HeuristicAnalysis;
pub use metrics::{AnalysisMetrics, CallRecord, PointSummary};
pub use remote::RemoteAnalysis;
pub use retry::RetryPolicy;
pub use selector::{AnalysisSettings, HybridAnalysis, RemoteToggles};

/// A model-backed step that can run remotely or heuristically
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisPoint {
    InputClassification,
    ClaimDecomposition,
    EvidenceExtraction,
    EvidenceQuality,
    ContextSimilarity,
    VerdictGeneration,
    VerdictValidation,
}

impl AnalysisPoint {
    pub const ALL: [AnalysisPoint; 7] = [
        AnalysisPoint::InputClassification,
        AnalysisPoint::ClaimDecomposition,
        AnalysisPoint::EvidenceExtraction,
        AnalysisPoint::EvidenceQuality,
        AnalysisPoint::ContextSimilarity,
        AnalysisPoint::VerdictGeneration,
        AnalysisPoint::VerdictValidation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisPoint::InputClassification => "input_classification",
            AnalysisPoint::ClaimDecomposition => "claim_decomposition",
            AnalysisPoint::EvidenceExtraction => "evidence_extraction",
            AnalysisPoint::EvidenceQuality => "evidence_quality",
            AnalysisPoint::ContextSimilarity => "context_similarity",
            AnalysisPoint::VerdictGeneration => "verdict_generation",
            AnalysisPoint::VerdictValidation => "verdict_validation",
        }
    }
}

impl std::fmt::Display for AnalysisPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from an analysis call
#[derive(Debug, Clone, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The call completed and was billed, but its output was unusable
    #[error("{point}: malformed structured output: {message}")]
    Parse {
        point: AnalysisPoint,
        message: String,
        tokens_used: u64,
    },

    #[error("{point}: reasoning provider unavailable")]
    Unavailable { point: AnalysisPoint },

    #[error("{point}: {message}")]
    Heuristic { point: AnalysisPoint, message: String },
}

impl AnalysisError {
    /// Whether the call may be retried (timeouts and rate limits only)
    pub fn is_retriable(&self) -> bool {
        matches!(self, AnalysisError::Provider(e) if e.kind.is_retriable())
    }

    /// Tokens the provider consumed before the call failed
    pub fn tokens_spent(&self) -> u64 {
        match self {
            AnalysisError::Parse { tokens_used, .. } => *tokens_used,
            _ => 0,
        }
    }
}

/// Result of an analysis call plus accounting
#[derive(Debug, Clone)]
pub struct Analyzed<T> {
    pub value: T,

    /// Reasoning tokens consumed, failed attempts included (0 for heuristic calls)
    pub tokens_used: u64,

    /// Reasoning calls made, failed attempts included
    pub reasoning_calls: u32,

    /// Whether the heuristic stood in for a failed remote call
    pub used_fallback: bool,
}

impl<T> Analyzed<T> {
    /// A heuristic result
    pub fn local(value: T) -> Self {
        Self {
            value,
            tokens_used: 0,
            reasoning_calls: 0,
            used_fallback: false,
        }
    }

    /// A remote result
    pub fn remote(value: T, tokens_used: u64) -> Self {
        Self {
            value,
            tokens_used,
            reasoning_calls: 1,
            used_fallback: false,
        }
    }
}

// ============================================================================
// Inputs and outputs
// ============================================================================

/// Broad shape of the user input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    /// A single assertion
    Claim,
    /// A question to answer ("Did X happen?")
    Question,
    /// A longer text with several assertions
    Article,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputClassification {
    pub input_type: InputType,
    #[serde(default)]
    pub sentence_count: usize,
}

/// Claims, contexts and search queries derived from the input
#[derive(Debug, Clone, Default)]
pub struct Decomposition {
    pub claims: Vec<Claim>,
    pub contexts: Vec<AnalysisContext>,
    /// Search queries, best first
    pub queries: Vec<String>,
}

/// What evidence extraction sees in one iteration
#[derive(Debug, Clone, Copy)]
pub struct ExtractionInput<'a> {
    pub claims: &'a [Claim],
    pub contexts: &'a [AnalysisContext],
    /// Sources fetched this iteration
    pub sources: &'a [Source],
}

impl ExtractionInput<'_> {
    /// Characters of source text the call will carry
    pub fn source_chars(&self) -> usize {
        self.sources.iter().map(|s| s.text.len()).sum()
    }
}

/// Candidate evidence from one extraction call. Ids are assigned by the caller.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub items: Vec<EvidenceItem>,
    /// The extractor judges the evidence sufficient to stop researching
    pub research_complete: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceQuality {
    High,
    Medium,
    Low,
    /// Too weak to use
    Filtered,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityRating {
    pub evidence_id: String,
    pub quality: EvidenceQuality,
    #[serde(default)]
    pub reason: Option<String>,
}

/// What verdict generation and validation see for one claim
#[derive(Debug, Clone, Copy)]
pub struct VerdictInput<'a> {
    pub claim: &'a Claim,
    pub context: &'a AnalysisContext,
    /// Validated evidence in the claim's context
    pub evidence: &'a [EvidenceItem],
}

/// Outcome of checking a verdict against its evidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictCheck {
    pub consistent: bool,
    #[serde(default)]
    pub adjusted_truth: Option<u8>,
    #[serde(default)]
    pub note: String,
}

/// One implementation of every analysis point
#[async_trait]
pub trait AnalysisService: Send + Sync {
    fn name(&self) -> &str;

    async fn classify_input(&self, text: &str) -> Result<Analyzed<InputClassification>, AnalysisError>;

    async fn decompose(
        &self,
        text: &str,
        classification: &InputClassification,
    ) -> Result<Analyzed<Decomposition>, AnalysisError>;

    async fn extract_evidence(&self, input: ExtractionInput<'_>) -> Result<Analyzed<Extraction>, AnalysisError>;

    async fn assess_quality(&self, items: &[EvidenceItem]) -> Result<Analyzed<Vec<QualityRating>>, AnalysisError>;

    /// Similarity of two context descriptions in [0, 1]
    async fn compare_similarity(&self, a: &str, b: &str) -> Result<Analyzed<f64>, AnalysisError>;

    async fn generate_verdict(&self, input: VerdictInput<'_>) -> Result<Analyzed<ClaimVerdict>, AnalysisError>;

    async fn validate_verdict(
        &self,
        input: VerdictInput<'_>,
        verdict: &ClaimVerdict,
    ) -> Result<Analyzed<VerdictCheck>, AnalysisError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_provider_timeouts_and_rate_limits_retry() {
        let timeout = AnalysisError::from(ProviderError::timeout("llm", "slow"));
        assert!(timeout.is_retriable());

        let outage = AnalysisError::from(ProviderError::outage("llm", "bad key"));
        assert!(!outage.is_retriable());

        let parse = AnalysisError::Parse {
            point: AnalysisPoint::VerdictGeneration,
            message: "missing field".to_string(),
            tokens_used: 120,
        };
        assert!(!parse.is_retriable());
        assert_eq!(parse.tokens_spent(), 120);
        assert_eq!(outage.tokens_spent(), 0);
    }

    #[test]
    fn test_point_names() {
        assert_eq!(AnalysisPoint::ALL.len(), 7);
        assert_eq!(AnalysisPoint::EvidenceQuality.to_string(), "evidence_quality");
    }
}
