//! Verdict aggregation.
//!
//! Combines per-claim verdicts into one weighted answer, per context and
//! overall. Claims are weighted by centrality (high=3, medium=2, low=1);
//! high-harm claims are always weighted as high centrality. Contested
//! claims with a factual counter-basis are down-weighted, never removed.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::{
    AggregateVerdict, AnalysisContext, Centrality, ClaimVerdict, ContextVerdict, EvidenceItem,
    FactualBasis, HarmPotential, Source, VerdictLabel,
};

/// Threshold below which a claim reads as refuted when picking the primary claim
const REFUTED_BELOW: u8 = 43;

/// Aggregation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationSettings {
    /// Pull verdicts toward neutral by source reliability (default: false)
    #[serde(default = "default_reliability_weighting")]
    pub enable_reliability_weighting: bool,

    /// Reliability assumed for sources without a score (default: 0.5)
    #[serde(default = "default_reliability")]
    pub default_reliability: f64,

    /// Weight multiplier for claims contested by established fact (default: 0.3)
    #[serde(default = "default_established_weight")]
    pub established_contested_weight: f64,

    /// Weight multiplier for claims contested by disputed counter-evidence (default: 0.5)
    #[serde(default = "default_disputed_weight")]
    pub disputed_contested_weight: f64,
}

fn default_reliability_weighting() -> bool {
    false
}
fn default_reliability() -> f64 {
    0.5
}
fn default_established_weight() -> f64 {
    0.3
}
fn default_disputed_weight() -> f64 {
    0.5
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self {
            enable_reliability_weighting: default_reliability_weighting(),
            default_reliability: default_reliability(),
            established_contested_weight: default_established_weight(),
            disputed_contested_weight: default_disputed_weight(),
        }
    }
}

/// Centrality used for weighting: high harm always counts as high
pub fn effective_centrality(centrality: Centrality, harm: HarmPotential) -> Centrality {
    if harm == HarmPotential::High {
        Centrality::High
    } else {
        centrality
    }
}

fn to_percent(value: f64) -> u8 {
    value.round().clamp(0.0, 100.0) as u8
}

pub struct VerdictAggregator {
    settings: AggregationSettings,
}

impl VerdictAggregator {
    pub fn new(settings: AggregationSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &AggregationSettings {
        &self.settings
    }

    /// Weight of one claim verdict in the aggregate
    pub fn claim_weight(&self, verdict: &ClaimVerdict) -> f64 {
        let base = effective_centrality(verdict.centrality, verdict.harm_potential).weight();
        if !verdict.is_contested {
            return base;
        }
        match verdict.factual_basis {
            FactualBasis::Established => base * self.settings.established_contested_weight,
            FactualBasis::Disputed => base * self.settings.disputed_contested_weight,
            FactualBasis::Opinion | FactualBasis::Unknown => base,
        }
    }

    /// Weighted mean over a set of verdicts. `None` when the set is empty.
    pub fn aggregate(&self, verdicts: &[ClaimVerdict]) -> Option<AggregateVerdict> {
        if verdicts.is_empty() {
            return None;
        }

        let mut total_weight = 0.0;
        let mut truth_sum = 0.0;
        let mut confidence_sum = 0.0;
        for verdict in verdicts {
            let weight = self.claim_weight(verdict);
            total_weight += weight;
            truth_sum += weight * f64::from(verdict.truth_percentage);
            confidence_sum += weight * f64::from(verdict.confidence);
        }

        // Every weight is positive unless settings zero out contested claims
        let (truth, confidence) = if total_weight > 0.0 {
            (to_percent(truth_sum / total_weight), to_percent(confidence_sum / total_weight))
        } else {
            let n = verdicts.len() as f64;
            (
                to_percent(verdicts.iter().map(|v| f64::from(v.truth_percentage)).sum::<f64>() / n),
                to_percent(verdicts.iter().map(|v| f64::from(v.confidence)).sum::<f64>() / n),
            )
        };

        Some(AggregateVerdict {
            truth_percentage: truth,
            confidence,
            label: VerdictLabel::from_truth(truth, confidence),
            primary_claim_id: select_primary(verdicts).map(|v| v.claim_id.clone()),
            claim_count: verdicts.len(),
        })
    }

    /// One aggregate per context that has at least one verdict, in context order
    pub fn aggregate_by_context(
        &self,
        verdicts: &[ClaimVerdict],
        contexts: &[AnalysisContext],
    ) -> Vec<ContextVerdict> {
        let mut grouped: HashMap<&str, Vec<ClaimVerdict>> = HashMap::new();
        for verdict in verdicts {
            grouped
                .entry(verdict.context_id.as_str())
                .or_default()
                .push(verdict.clone());
        }

        contexts
            .iter()
            .filter_map(|context| {
                let group = grouped.get(context.id.as_str())?;
                let verdict = self.aggregate(group)?;
                Some(ContextVerdict {
                    context_id: context.id.clone(),
                    context_name: context.name.clone(),
                    verdict,
                })
            })
            .collect()
    }

    /// Average reliability of the sources behind a verdict's supporting evidence
    pub fn reliability_weight(
        &self,
        verdict: &ClaimVerdict,
        evidence: &[EvidenceItem],
        sources: &[Source],
    ) -> f64 {
        let weights: Vec<f64> = verdict
            .supporting_evidence_ids
            .iter()
            .filter_map(|id| evidence.iter().find(|e| &e.id == id))
            .map(|item| {
                sources
                    .iter()
                    .find(|s| s.id == item.source_id || s.url == item.source_url)
                    .and_then(|s| s.reliability)
                    .unwrap_or(self.settings.default_reliability)
            })
            .collect();

        if weights.is_empty() {
            self.settings.default_reliability
        } else {
            weights.iter().sum::<f64>() / weights.len() as f64
        }
    }

    /// Pull a verdict toward neutral in proportion to source reliability.
    ///
    /// `truth' = 50 + (truth - 50) * w`, `confidence' = confidence * (0.5 + w / 2)`.
    /// Applied at most once per verdict.
    pub fn apply_reliability(
        &self,
        verdict: &mut ClaimVerdict,
        evidence: &[EvidenceItem],
        sources: &[Source],
    ) {
        if verdict.reliability_adjusted {
            return;
        }
        let w = self.reliability_weight(verdict, evidence, sources).clamp(0.0, 1.0);
        let truth = 50.0 + (f64::from(verdict.truth_percentage) - 50.0) * w;
        let confidence = f64::from(verdict.confidence) * (0.5 + w / 2.0);

        verdict.truth_percentage = to_percent(truth);
        verdict.confidence = to_percent(confidence);
        verdict.reliability_adjusted = true;
    }
}

impl Default for VerdictAggregator {
    fn default() -> Self {
        Self::new(AggregationSettings::default())
    }
}

/// Pick the claim surfaced in the summary.
///
/// Priority: refuted high-harm central claim, then any high-harm central
/// claim, then any central claim, then the first claim.
pub fn select_primary(verdicts: &[ClaimVerdict]) -> Option<&ClaimVerdict> {
    let central = |v: &&ClaimVerdict| effective_centrality(v.centrality, v.harm_potential) == Centrality::High;
    let harmful_central = |v: &&ClaimVerdict| v.harm_potential == HarmPotential::High && central(v);

    verdicts
        .iter()
        .filter(harmful_central)
        .find(|v| v.truth_percentage < REFUTED_BELOW)
        .or_else(|| verdicts.iter().find(harmful_central))
        .or_else(|| verdicts.iter().find(central))
        .or_else(|| verdicts.first())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(id: &str, truth: u8, centrality: Centrality) -> ClaimVerdict {
        ClaimVerdict {
            claim_id: id.to_string(),
            context_id: "main".to_string(),
            truth_percentage: truth,
            confidence: 80,
            reasoning: String::new(),
            supporting_evidence_ids: Vec::new(),
            centrality,
            harm_potential: HarmPotential::Low,
            is_contested: false,
            factual_basis: FactualBasis::Unknown,
            reliability_adjusted: false,
        }
    }

    #[test]
    fn test_weighted_mean() {
        let aggregator = VerdictAggregator::default();
        let verdicts = vec![
            verdict("C1", 80, Centrality::High),
            verdict("C2", 20, Centrality::Low),
        ];
        let result = aggregator.aggregate(&verdicts).unwrap();
        assert_eq!(result.truth_percentage, 65);
        assert_eq!(result.confidence, 80);
        assert_eq!(result.claim_count, 2);
    }

    #[test]
    fn test_high_harm_forces_high_centrality() {
        assert_eq!(
            effective_centrality(Centrality::Medium, HarmPotential::High),
            Centrality::High
        );
        assert_eq!(
            effective_centrality(Centrality::Low, HarmPotential::Medium),
            Centrality::Low
        );

        let aggregator = VerdictAggregator::default();
        let mut harmful = verdict("C1", 80, Centrality::Medium);
        harmful.harm_potential = HarmPotential::High;
        assert_eq!(aggregator.claim_weight(&harmful), 3.0);
    }

    #[test]
    fn test_contested_claims_are_down_weighted() {
        let aggregator = VerdictAggregator::default();
        let mut contested = verdict("C1", 90, Centrality::High);
        contested.is_contested = true;
        contested.factual_basis = FactualBasis::Established;
        assert!((aggregator.claim_weight(&contested) - 0.9).abs() < 1e-9);

        contested.factual_basis = FactualBasis::Opinion;
        assert_eq!(aggregator.claim_weight(&contested), 3.0);
    }

    #[test]
    fn test_empty_aggregate_is_none() {
        assert!(VerdictAggregator::default().aggregate(&[]).is_none());
    }

    #[test]
    fn test_primary_prefers_refuted_harmful_claim() {
        let mut a = verdict("C1", 90, Centrality::High);
        a.harm_potential = HarmPotential::High;
        let mut b = verdict("C2", 10, Centrality::High);
        b.harm_potential = HarmPotential::High;
        let c = verdict("C3", 50, Centrality::Low);

        let verdicts = vec![c.clone(), a.clone(), b];
        assert_eq!(select_primary(&verdicts).unwrap().claim_id, "C2");

        let verdicts = vec![c.clone(), a];
        assert_eq!(select_primary(&verdicts).unwrap().claim_id, "C1");

        let verdicts = vec![c];
        assert_eq!(select_primary(&verdicts).unwrap().claim_id, "C3");
    }

    #[test]
    fn test_primary_uses_effective_centrality() {
        let central = verdict("C1", 90, Centrality::High);
        let mut refuted = verdict("C2", 20, Centrality::Medium);
        refuted.harm_potential = HarmPotential::High;

        // high harm lifts C2 to high centrality, so the refuted claim wins
        let verdicts = vec![central, refuted.clone()];
        assert_eq!(select_primary(&verdicts).unwrap().claim_id, "C2");

        // and it beats a plain central claim even when not refuted
        refuted.truth_percentage = 80;
        let verdicts = vec![verdict("C3", 50, Centrality::High), refuted];
        assert_eq!(select_primary(&verdicts).unwrap().claim_id, "C2");
    }

    #[test]
    fn test_reliability_pulls_toward_neutral() {
        let aggregator = VerdictAggregator::default();
        let mut v = verdict("C1", 90, Centrality::High);
        v.confidence = 80;

        // No supporting evidence: default reliability 0.5
        aggregator.apply_reliability(&mut v, &[], &[]);
        assert_eq!(v.truth_percentage, 70);
        assert_eq!(v.confidence, 60);
        assert!(v.reliability_adjusted);

        // Second application is a no-op
        aggregator.apply_reliability(&mut v, &[], &[]);
        assert_eq!(v.truth_percentage, 70);
    }

    #[test]
    fn test_per_context_aggregation() {
        let aggregator = VerdictAggregator::default();
        let mut a = verdict("C1", 80, Centrality::High);
        a.context_id = "ctx-a".to_string();
        let mut b = verdict("C2", 20, Centrality::High);
        b.context_id = "ctx-b".to_string();

        let contexts = vec![
            AnalysisContext::new("ctx-a", "Case A", "a"),
            AnalysisContext::new("ctx-b", "Case B", "b"),
            AnalysisContext::new("ctx-c", "Case C", "c"),
        ];
        let per_context = aggregator.aggregate_by_context(&[a, b], &contexts);
        assert_eq!(per_context.len(), 2);
        assert_eq!(per_context[0].verdict.truth_percentage, 80);
        assert_eq!(per_context[1].context_name, "Case B");
    }
}
