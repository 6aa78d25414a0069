//! Per-claim and aggregate verdicts.

use serde::{Deserialize, Serialize};

use super::claim::{Centrality, HarmPotential};

/// How well-founded the contestation of a claim is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FactualBasis {
    /// Counter-evidence is documented fact
    Established,
    /// Counter-evidence exists but is itself disputed
    Disputed,
    /// Contestation is opinion only
    Opinion,
    #[default]
    Unknown,
}

/// Verdict for one claim
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimVerdict {
    pub claim_id: String,
    pub context_id: String,

    /// Truth percentage, 0-100
    pub truth_percentage: u8,

    /// Confidence, 0-100
    pub confidence: u8,

    pub reasoning: String,

    #[serde(default)]
    pub supporting_evidence_ids: Vec<String>,

    /// Copied from the claim
    pub centrality: Centrality,
    /// Copied from the claim
    pub harm_potential: HarmPotential,

    #[serde(default)]
    pub is_contested: bool,
    #[serde(default)]
    pub factual_basis: FactualBasis,

    /// Set once source-reliability weighting has been applied
    #[serde(default)]
    pub reliability_adjusted: bool,
}

/// Seven-band truth scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictLabel {
    True,
    MostlyTrue,
    LeaningTrue,
    Mixed,
    Unverified,
    LeaningFalse,
    MostlyFalse,
    False,
}

/// Confidence below which a middling truth percentage reads as unverified
const MIXED_CONFIDENCE_FLOOR: u8 = 60;

impl VerdictLabel {
    /// Map a truth percentage (and confidence) onto the seven-band scale
    pub fn from_truth(truth_percentage: u8, confidence: u8) -> Self {
        match truth_percentage {
            86..=u8::MAX => VerdictLabel::True,
            72..=85 => VerdictLabel::MostlyTrue,
            58..=71 => VerdictLabel::LeaningTrue,
            43..=57 if confidence >= MIXED_CONFIDENCE_FLOOR => VerdictLabel::Mixed,
            43..=57 => VerdictLabel::Unverified,
            29..=42 => VerdictLabel::LeaningFalse,
            15..=28 => VerdictLabel::MostlyFalse,
            _ => VerdictLabel::False,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictLabel::True => "TRUE",
            VerdictLabel::MostlyTrue => "MOSTLY_TRUE",
            VerdictLabel::LeaningTrue => "LEANING_TRUE",
            VerdictLabel::Mixed => "MIXED",
            VerdictLabel::Unverified => "UNVERIFIED",
            VerdictLabel::LeaningFalse => "LEANING_FALSE",
            VerdictLabel::MostlyFalse => "MOSTLY_FALSE",
            VerdictLabel::False => "FALSE",
        }
    }
}

impl std::fmt::Display for VerdictLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Weighted combination of several claim verdicts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateVerdict {
    pub truth_percentage: u8,
    pub confidence: u8,
    pub label: VerdictLabel,

    /// Claim surfaced in the human-readable summary
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_claim_id: Option<String>,

    pub claim_count: usize,
}

/// Aggregate verdict scoped to one analytical context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextVerdict {
    pub context_id: String,
    pub context_name: String,
    pub verdict: AggregateVerdict,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_bands() {
        assert_eq!(VerdictLabel::from_truth(100, 90), VerdictLabel::True);
        assert_eq!(VerdictLabel::from_truth(86, 90), VerdictLabel::True);
        assert_eq!(VerdictLabel::from_truth(85, 90), VerdictLabel::MostlyTrue);
        assert_eq!(VerdictLabel::from_truth(65, 90), VerdictLabel::LeaningTrue);
        assert_eq!(VerdictLabel::from_truth(50, 80), VerdictLabel::Mixed);
        assert_eq!(VerdictLabel::from_truth(50, 30), VerdictLabel::Unverified);
        assert_eq!(VerdictLabel::from_truth(42, 90), VerdictLabel::LeaningFalse);
        assert_eq!(VerdictLabel::from_truth(20, 90), VerdictLabel::MostlyFalse);
        assert_eq!(VerdictLabel::from_truth(3, 90), VerdictLabel::False);
    }

    #[test]
    fn test_label_serialization() {
        let json = serde_json::to_string(&VerdictLabel::LeaningFalse).unwrap();
        assert_eq!(json, "\"LEANING_FALSE\"");
    }
}
