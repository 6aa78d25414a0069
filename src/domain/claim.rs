//! Claims and the analytical contexts they are judged in.

use serde::{Deserialize, Serialize};

/// Id of the context every claim falls back to when only one framing exists
pub const MAIN_CONTEXT_ID: &str = "main";

/// What part of the input a claim plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClaimRole {
    /// The substantive assertion itself
    #[default]
    Core,
    /// Who said it
    Attribution,
    /// Where it was published or reported
    Source,
    /// When it happened
    Timing,
}

/// How essential a claim is to the overall thesis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Centrality {
    High,
    #[default]
    Medium,
    Low,
}

impl Centrality {
    /// Aggregation weight (high=3, medium=2, low=1)
    pub fn weight(&self) -> f64 {
        match self {
            Centrality::High => 3.0,
            Centrality::Medium => 2.0,
            Centrality::Low => 1.0,
        }
    }
}

/// Risk classification of the claim's subject matter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HarmPotential {
    High,
    #[default]
    Medium,
    Low,
}

/// How directly the claim bears on the thesis of the input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ThesisRelevance {
    #[default]
    Direct,
    Tangential,
    Irrelevant,
}

/// An atomic assertion derived from decomposition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    /// Claim id, unique within a job ("C1", "C2", ...)
    pub id: String,

    /// The assertion text
    pub text: String,

    #[serde(default)]
    pub role: ClaimRole,

    #[serde(default)]
    pub centrality: Centrality,

    #[serde(default)]
    pub harm_potential: HarmPotential,

    #[serde(default)]
    pub thesis_relevance: ThesisRelevance,

    /// Analytical context this claim belongs to
    pub context_id: String,
}

impl Claim {
    /// Create a core claim in the main context with default ratings
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            role: ClaimRole::Core,
            centrality: Centrality::Medium,
            harm_potential: HarmPotential::Medium,
            thesis_relevance: ThesisRelevance::Direct,
            context_id: MAIN_CONTEXT_ID.to_string(),
        }
    }

    pub fn with_centrality(mut self, centrality: Centrality) -> Self {
        self.centrality = centrality;
        self
    }

    pub fn with_harm(mut self, harm_potential: HarmPotential) -> Self {
        self.harm_potential = harm_potential;
        self
    }

    pub fn in_context(mut self, context_id: impl Into<String>) -> Self {
        self.context_id = context_id.into();
        self
    }
}

/// A distinct analytical frame that requires its own verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisContext {
    pub id: String,
    pub name: String,
    /// What the context is about (e.g. the proceeding or event)
    #[serde(default)]
    pub subject: String,
}

impl AnalysisContext {
    pub fn new(id: impl Into<String>, name: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            subject: subject.into(),
        }
    }

    /// The default context used when the input needs only one framing
    pub fn main(subject: impl Into<String>) -> Self {
        Self::new(MAIN_CONTEXT_ID, "Main", subject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_centrality_weights() {
        assert_eq!(Centrality::High.weight(), 3.0);
        assert_eq!(Centrality::Medium.weight(), 2.0);
        assert_eq!(Centrality::Low.weight(), 1.0);
    }

    #[test]
    fn test_claim_defaults_from_json() {
        let claim: Claim =
            serde_json::from_str(r#"{"id":"C1","text":"x","context_id":"main"}"#).unwrap();
        assert_eq!(claim.role, ClaimRole::Core);
        assert_eq!(claim.centrality, Centrality::Medium);
        assert_eq!(claim.harm_potential, HarmPotential::Medium);
    }
}
