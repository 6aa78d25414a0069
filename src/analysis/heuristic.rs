//! Local heuristic analysis.
//!
//! Keyword and punctuation rules standing in for the reasoning provider.
//! Results are deterministic and cost no tokens; they are deliberately
//! conservative (moderate truth values, modest confidence).

use std::collections::HashSet;

use async_trait::async_trait;

use super::{
    AnalysisError, AnalysisPoint, AnalysisService, Analyzed, Decomposition, EvidenceQuality, Extraction,
    ExtractionInput, InputClassification, InputType, QualityRating, VerdictCheck, VerdictInput,
};
use crate::domain::{
    AnalysisContext, Centrality, Claim, ClaimVerdict, EvidenceCategory, EvidenceDirection, EvidenceItem,
    FactualBasis, HarmPotential,
};

const MAX_CLAIMS: usize = 5;
const MIN_CLAIM_CHARS: usize = 12;
const MIN_SENTENCE_CHARS: usize = 20;
const MAX_SENTENCE_CHARS: usize = 500;
const MAX_ITEMS_PER_CLAIM_PER_SOURCE: usize = 3;
const MIN_STATEMENT_CHARS: usize = 30;
/// Items per claim (pointing one way or the other) that end research
const ITEMS_FOR_COMPLETE: usize = 2;
const SUPPORT_OVERLAP: f64 = 0.6;

const STOPWORDS: &[&str] = &[
    "about", "after", "also", "been", "before", "being", "between", "could", "does", "from", "have", "into",
    "just", "more", "most", "only", "over", "said", "some", "such", "than", "that", "their", "them", "then",
    "there", "these", "they", "this", "those", "very", "were", "what", "when", "where", "which", "while",
    "will", "with", "would", "your",
];

const HARM_WORDS: &[&str] = &[
    "death", "deaths", "died", "dead", "kill", "killed", "kills", "injury", "injuries", "injured", "fraud",
    "scam", "danger", "dangerous", "toxic", "poison", "poisoned", "lethal", "fatal", "overdose", "suicide",
    "abuse", "weapon", "explosion",
];

const NEGATION_WORDS: &[&str] = &[
    "not", "no", "never", "false", "denied", "denies", "debunked", "myth", "incorrect", "untrue", "hoax",
    "misleading", "isn't", "wasn't", "didn't", "doesn't", "aren't", "weren't",
];

const QUESTION_WORDS: &[&str] = &[
    "did", "does", "do", "is", "are", "was", "were", "can", "could", "has", "have", "will", "who", "what",
    "when", "where", "why", "how",
];

const VAGUE_ATTRIBUTION: &[&str] = &[
    "some say", "some people", "many believe", "it is said", "people say", "sources say", "reportedly",
    "allegedly", "rumor", "rumour",
];

const LEGAL_WORDS: &[&str] = &["court", "judge", "ruling", "ruled", "lawsuit", "convicted", "verdict", "indicted"];
const OFFICIAL_WORDS: &[&str] = &["ministry", "government", "agency", "department", "official", "officials"];
const EXPERT_WORDS: &[&str] = &["according", "researchers", "scientists", "study", "professor", "expert"];

/// Split text into trimmed sentences, keeping each one a verbatim slice
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        let boundary = match ch {
            '\n' => true,
            '.' | '!' | '?' => chars.peek().map_or(true, |(_, next)| next.is_whitespace()),
            _ => false,
        };
        if boundary {
            let end = idx + ch.len_utf8();
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = end;
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
}

/// Content words used for matching
pub fn keywords(text: &str) -> HashSet<String> {
    words(text)
        .filter(|w| w.chars().count() >= 4 && !STOPWORDS.contains(&w.as_str()))
        .collect()
}

fn contains_any(text: &str, list: &[&str]) -> bool {
    words(text).any(|w| list.contains(&w.as_str()))
}

fn has_negation(text: &str) -> bool {
    contains_any(text, NEGATION_WORDS)
}

/// Jaccard overlap of the word sets of two texts
pub fn jaccard(a: &str, b: &str) -> f64 {
    let a: HashSet<String> = words(a).collect();
    let b: HashSet<String> = words(b).collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

fn categorize(sentence: &str) -> EvidenceCategory {
    let lower = sentence.to_lowercase();
    if lower.contains('%') || lower.contains("percent") {
        EvidenceCategory::Statistic
    } else if contains_any(sentence, LEGAL_WORDS) {
        EvidenceCategory::LegalRecord
    } else if contains_any(sentence, OFFICIAL_WORDS) {
        EvidenceCategory::OfficialStatement
    } else if contains_any(sentence, EXPERT_WORDS) {
        EvidenceCategory::ExpertStatement
    } else if sentence.chars().any(|c| c.is_ascii_digit()) {
        EvidenceCategory::Event
    } else {
        EvidenceCategory::Other
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Supporting and contradicting counts over a set of evidence
fn balance(evidence: &[EvidenceItem]) -> (usize, usize) {
    evidence.iter().fold((0, 0), |(s, c), item| match item.direction {
        EvidenceDirection::Supports => (s + 1, c),
        EvidenceDirection::Contradicts => (s, c + 1),
        EvidenceDirection::Neutral => (s, c),
    })
}

/// Truth percentage implied by an evidence balance; 50 when nothing points either way
fn truth_from_balance(supports: usize, contradicts: usize) -> u8 {
    let total = supports + contradicts;
    if total == 0 {
        return 50;
    }
    (15.0 + 70.0 * supports as f64 / total as f64).round() as u8
}

/// Rule-based analysis service
#[derive(Debug, Clone, Default)]
pub struct HeuristicAnalysis;

impl HeuristicAnalysis {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, text: &str) -> InputClassification {
        let trimmed = text.trim();
        let sentence_count = split_sentences(trimmed).len();
        let first_word = words(trimmed).next().unwrap_or_default();

        let input_type = if trimmed.ends_with('?') || (sentence_count <= 1 && QUESTION_WORDS.contains(&first_word.as_str())) {
            InputType::Question
        } else if sentence_count > 3 || trimmed.chars().count() > 600 {
            InputType::Article
        } else {
            InputType::Claim
        };

        InputClassification {
            input_type,
            sentence_count,
        }
    }

    pub fn decompose_text(&self, text: &str, _classification: &InputClassification) -> Result<Decomposition, AnalysisError> {
        let sentences: Vec<&str> = split_sentences(text)
            .into_iter()
            .filter(|s| s.chars().count() >= MIN_CLAIM_CHARS)
            .take(MAX_CLAIMS)
            .collect();

        if sentences.is_empty() {
            return Err(AnalysisError::Heuristic {
                point: AnalysisPoint::ClaimDecomposition,
                message: "no checkable assertion in input".to_string(),
            });
        }

        let claims: Vec<Claim> = sentences
            .iter()
            .enumerate()
            .map(|(i, sentence)| {
                let centrality = if i == 0 {
                    Centrality::High
                } else {
                    Centrality::Medium
                };
                let harm = if contains_any(sentence, HARM_WORDS) {
                    HarmPotential::High
                } else {
                    HarmPotential::Medium
                };
                Claim::new(format!("C{}", i + 1), *sentence)
                    .with_centrality(centrality)
                    .with_harm(harm)
            })
            .collect();

        let mut queries: Vec<String> = Vec::new();
        for claim in &claims {
            let query = claim.text.trim_end_matches(&['.', '!', '?'][..]).trim().to_string();
            if !queries.contains(&query) {
                queries.push(query);
            }
        }

        Ok(Decomposition {
            contexts: vec![AnalysisContext::main(truncate(&claims[0].text, 120))],
            claims,
            queries,
        })
    }

    pub fn extract(&self, input: ExtractionInput<'_>) -> Extraction {
        let mut items: Vec<EvidenceItem> = Vec::new();
        let mut per_claim = vec![0usize; input.claims.len()];

        for source in input.sources.iter().filter(|s| s.has_content()) {
            let sentences: Vec<&str> = split_sentences(&source.text)
                .into_iter()
                .filter(|s| (MIN_SENTENCE_CHARS..=MAX_SENTENCE_CHARS).contains(&s.chars().count()))
                .collect();

            for (claim_idx, claim) in input.claims.iter().enumerate() {
                let claim_keywords = keywords(&claim.text);
                if claim_keywords.is_empty() {
                    continue;
                }
                let needed = if claim_keywords.len() < 2 {
                    claim_keywords.len()
                } else {
                    ((claim_keywords.len() as f64 * 0.4).ceil() as usize).max(2)
                };
                let claim_negated = has_negation(&claim.text);

                let mut taken = 0;
                for sentence in &sentences {
                    if taken >= MAX_ITEMS_PER_CLAIM_PER_SOURCE {
                        break;
                    }
                    let overlap = keywords(sentence).intersection(&claim_keywords).count();
                    if overlap < needed {
                        continue;
                    }
                    if items.iter().any(|e| e.source_id == source.id && e.excerpt == *sentence) {
                        continue;
                    }

                    let ratio = overlap as f64 / claim_keywords.len() as f64;
                    let direction = if has_negation(sentence) != claim_negated {
                        EvidenceDirection::Contradicts
                    } else if ratio >= SUPPORT_OVERLAP {
                        EvidenceDirection::Supports
                    } else {
                        EvidenceDirection::Neutral
                    };
                    if direction != EvidenceDirection::Neutral {
                        per_claim[claim_idx] += 1;
                    }

                    items.push(EvidenceItem {
                        id: String::new(),
                        statement: sentence.to_string(),
                        source_id: source.id.clone(),
                        source_url: source.url.clone(),
                        source_title: source.title.clone(),
                        excerpt: sentence.to_string(),
                        category: categorize(sentence),
                        direction,
                        context_id: claim.context_id.clone(),
                    });
                    taken += 1;
                }
            }
        }

        let research_complete = !per_claim.is_empty() && per_claim.iter().all(|n| *n >= ITEMS_FOR_COMPLETE);
        Extraction {
            items,
            research_complete,
        }
    }

    pub fn rate(&self, items: &[EvidenceItem]) -> Vec<QualityRating> {
        items
            .iter()
            .map(|item| {
                let lower = item.statement.to_lowercase();
                let (quality, reason) = if item.statement.chars().count() < MIN_STATEMENT_CHARS {
                    (EvidenceQuality::Filtered, Some("statement too short".to_string()))
                } else if VAGUE_ATTRIBUTION.iter().any(|p| lower.contains(p)) {
                    (EvidenceQuality::Filtered, Some("vague attribution".to_string()))
                } else if item.statement.chars().any(|c| c.is_ascii_digit()) {
                    (EvidenceQuality::High, None)
                } else if item.direction == EvidenceDirection::Neutral {
                    (EvidenceQuality::Low, None)
                } else {
                    (EvidenceQuality::Medium, None)
                };
                QualityRating {
                    evidence_id: item.id.clone(),
                    quality,
                    reason,
                }
            })
            .collect()
    }

    pub fn verdict(&self, input: VerdictInput<'_>) -> ClaimVerdict {
        let (supports, contradicts) = balance(input.evidence);
        let total = supports + contradicts;
        let truth = truth_from_balance(supports, contradicts);
        let confidence = if total == 0 { 30 } else { (40 + 10 * total).min(90) as u8 };

        let is_contested = supports > 0 && contradicts > 0;
        let factual_basis = if !is_contested {
            FactualBasis::Unknown
        } else if input.evidence.iter().any(|e| {
            e.direction == EvidenceDirection::Contradicts
                && matches!(
                    e.category,
                    EvidenceCategory::Statistic | EvidenceCategory::LegalRecord | EvidenceCategory::OfficialStatement
                )
        }) {
            FactualBasis::Established
        } else {
            FactualBasis::Disputed
        };

        let reasoning = if total == 0 {
            "Insufficient evidence pointing either way".to_string()
        } else {
            format!("{supports} supporting and {contradicts} contradicting evidence items")
        };

        ClaimVerdict {
            claim_id: input.claim.id.clone(),
            context_id: input.claim.context_id.clone(),
            truth_percentage: truth,
            confidence,
            reasoning,
            supporting_evidence_ids: input
                .evidence
                .iter()
                .filter(|e| e.direction != EvidenceDirection::Neutral)
                .map(|e| e.id.clone())
                .collect(),
            centrality: input.claim.centrality,
            harm_potential: input.claim.harm_potential,
            is_contested,
            factual_basis,
            reliability_adjusted: false,
        }
    }

    pub fn check(&self, input: VerdictInput<'_>, verdict: &ClaimVerdict) -> VerdictCheck {
        let (supports, contradicts) = balance(input.evidence);
        let leans_true = verdict.truth_percentage > 57;
        let leans_false = verdict.truth_percentage < 43;

        let disagrees = (supports > contradicts && leans_false) || (contradicts > supports && leans_true);
        if disagrees {
            VerdictCheck {
                consistent: false,
                adjusted_truth: Some(truth_from_balance(supports, contradicts)),
                note: format!(
                    "verdict {} disagrees with evidence balance ({supports} for, {contradicts} against)",
                    verdict.truth_percentage
                ),
            }
        } else {
            VerdictCheck {
                consistent: true,
                adjusted_truth: None,
                note: String::new(),
            }
        }
    }
}

#[async_trait]
impl AnalysisService for HeuristicAnalysis {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn classify_input(&self, text: &str) -> Result<Analyzed<InputClassification>, AnalysisError> {
        Ok(Analyzed::local(self.classify(text)))
    }

    async fn decompose(
        &self,
        text: &str,
        classification: &InputClassification,
    ) -> Result<Analyzed<Decomposition>, AnalysisError> {
        self.decompose_text(text, classification).map(Analyzed::local)
    }

    async fn extract_evidence(&self, input: ExtractionInput<'_>) -> Result<Analyzed<Extraction>, AnalysisError> {
        Ok(Analyzed::local(self.extract(input)))
    }

    async fn assess_quality(&self, items: &[EvidenceItem]) -> Result<Analyzed<Vec<QualityRating>>, AnalysisError> {
        Ok(Analyzed::local(self.rate(items)))
    }

    async fn compare_similarity(&self, a: &str, b: &str) -> Result<Analyzed<f64>, AnalysisError> {
        Ok(Analyzed::local(jaccard(a, b)))
    }

    async fn generate_verdict(&self, input: VerdictInput<'_>) -> Result<Analyzed<ClaimVerdict>, AnalysisError> {
        Ok(Analyzed::local(self.verdict(input)))
    }

    async fn validate_verdict(
        &self,
        input: VerdictInput<'_>,
        verdict: &ClaimVerdict,
    ) -> Result<Analyzed<VerdictCheck>, AnalysisError> {
        Ok(Analyzed::local(self.check(input, verdict)))
    }
}
