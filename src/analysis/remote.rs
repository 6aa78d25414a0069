//! Reasoning-provider-backed analysis.
//!
//! One structured call per analysis point. Responses are parsed once into a
//! strict type; a single repair pass strips code fences and surrounding
//! prose before giving up with [`AnalysisError::Parse`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::selector::AnalysisSettings;
use super::{
    AnalysisError, AnalysisPoint, AnalysisService, Analyzed, Decomposition, Extraction, ExtractionInput,
    InputClassification, QualityRating, VerdictCheck, VerdictInput,
};
use crate::adapters::{Reasoner, ReasoningRequest};
use crate::domain::{
    AnalysisContext, Centrality, Claim, ClaimRole, ClaimVerdict, EvidenceCategory, EvidenceDirection,
    EvidenceItem, FactualBasis, HarmPotential, ThesisRelevance, MAIN_CONTEXT_ID,
};

/// Fixed prompt overhead (role markers, schema framing) in tokens
const PROMPT_OVERHEAD_TOKENS: u64 = 200;

const CLASSIFY_PROMPT: &str = "You classify fact-checking inputs. Decide whether the input is a single \
claim, a question, or an article containing several assertions, and count its sentences.";

const DECOMPOSE_PROMPT: &str = "You break fact-checking inputs into atomic, independently verifiable \
claims. Rate each claim's centrality to the thesis and its harm potential (high for death, injury, fraud \
or danger). If the input concerns several distinct proceedings, events or framings, define one context per \
framing and assign every claim to exactly one context. Propose web search queries, best first.";

const EXTRACT_PROMPT: &str = "You extract evidence from fetched documents. For each fact relevant to a \
claim, quote the exact supporting text from the document as `excerpt` (verbatim, no paraphrase), give the \
document's source_id, and say whether it supports or contradicts the claim. Never invent text that is not \
in a document. Set research_complete when the evidence is sufficient to judge every claim.";

const QUALITY_PROMPT: &str = "You rate evidence quality. Mark items as filtered when they are vague, \
unattributed, opinion-only or too short to be meaningful; rate specific, attributable facts high.";

const SIMILARITY_PROMPT: &str = "You compare two analytical contexts of a fact-check and return how \
similar they are, from 0 (unrelated) to 1 (the same framing).";

const VERDICT_PROMPT: &str = "You judge one claim against validated evidence only. Return a truth \
percentage (0-100), a confidence (0-100), short reasoning and the ids of the evidence you relied on. Mark \
the claim contested when credible evidence points both ways, and say whether the counter-evidence is \
established fact, itself disputed, or opinion.";

const VALIDATE_PROMPT: &str = "You audit a fact-check verdict. Decide whether the truth percentage is \
consistent with the cited evidence; if not, propose an adjusted truth percentage.";

/// Reasoning-backed analysis service
pub struct RemoteAnalysis {
    reasoner: Arc<dyn Reasoner>,
    temperature: f32,
    timeout: Duration,
    max_source_chars: usize,
}

impl RemoteAnalysis {
    pub fn new(reasoner: Arc<dyn Reasoner>, settings: &AnalysisSettings) -> Self {
        Self {
            reasoner,
            temperature: settings.temperature,
            timeout: Duration::from_secs(settings.call_timeout_seconds),
            max_source_chars: settings.max_source_chars,
        }
    }

    pub fn reasoner_name(&self) -> &str {
        self.reasoner.name()
    }

    fn max_output_tokens(point: AnalysisPoint) -> u32 {
        match point {
            AnalysisPoint::InputClassification => 200,
            AnalysisPoint::ClaimDecomposition => 1500,
            AnalysisPoint::EvidenceExtraction => 3000,
            AnalysisPoint::EvidenceQuality => 1500,
            AnalysisPoint::ContextSimilarity => 100,
            AnalysisPoint::VerdictGeneration => 800,
            AnalysisPoint::VerdictValidation => 400,
        }
    }

    /// Upper-bound token estimate for a call carrying `input_chars` of user content
    pub fn estimate_tokens(&self, point: AnalysisPoint, input_chars: usize) -> u64 {
        (input_chars as u64).div_ceil(4) + PROMPT_OVERHEAD_TOKENS + u64::from(Self::max_output_tokens(point))
    }

    async fn call<T: DeserializeOwned>(
        &self,
        point: AnalysisPoint,
        system_prompt: &str,
        user_prompt: String,
        output_schema: serde_json::Value,
    ) -> Result<(T, u64), AnalysisError> {
        let request = ReasoningRequest {
            system_prompt: system_prompt.to_string(),
            user_prompt,
            output_schema,
            temperature: self.temperature,
            max_output_tokens: Self::max_output_tokens(point),
        };

        let output = self.reasoner.complete(&request, self.timeout).await?;
        let tokens = output.tokens_used.unwrap_or_else(|| request.estimated_tokens());
        debug!(point = %point, tokens, "Reasoning call completed");

        let value = parse_structured(&output.content).map_err(|message| AnalysisError::Parse {
            point,
            message,
            tokens_used: tokens,
        })?;
        Ok((value, tokens))
    }

    fn truncate(&self, text: &str) -> String {
        text.chars().take(self.max_source_chars).collect()
    }
}

/// Parse a JSON object, with one repair pass for fenced or prose-wrapped output
pub fn parse_structured<T: DeserializeOwned>(content: &str) -> Result<T, String> {
    let first_error = match serde_json::from_str::<T>(content.trim()) {
        Ok(value) => return Ok(value),
        Err(e) => e.to_string(),
    };

    let repaired = repair_json(content).ok_or_else(|| format!("no JSON object in output ({first_error})"))?;
    serde_json::from_str::<T>(repaired).map_err(|e| e.to_string())
}

/// Slice from the first `{` to the last `}`, which also drops code fences
fn repair_json(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    (end > start).then(|| &content[start..=end])
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ClaimWire {
    text: String,
    #[serde(default)]
    role: ClaimRole,
    #[serde(default)]
    centrality: Centrality,
    #[serde(default)]
    harm_potential: HarmPotential,
    #[serde(default)]
    thesis_relevance: ThesisRelevance,
    #[serde(default)]
    context_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DecompositionWire {
    claims: Vec<ClaimWire>,
    #[serde(default)]
    contexts: Vec<AnalysisContext>,
    #[serde(default)]
    queries: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EvidenceWire {
    statement: String,
    source_id: String,
    excerpt: String,
    #[serde(default)]
    category: EvidenceCategory,
    #[serde(default)]
    direction: EvidenceDirection,
    #[serde(default)]
    context_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExtractionWire {
    items: Vec<EvidenceWire>,
    #[serde(default)]
    research_complete: bool,
}

#[derive(Debug, Deserialize)]
struct QualityWire {
    ratings: Vec<QualityRating>,
}

#[derive(Debug, Deserialize)]
struct SimilarityWire {
    similarity: f64,
}

#[derive(Debug, Deserialize)]
struct VerdictWire {
    truth_percentage: u8,
    confidence: u8,
    reasoning: String,
    #[serde(default)]
    supporting_evidence_ids: Vec<String>,
    #[serde(default)]
    is_contested: bool,
    #[serde(default)]
    factual_basis: FactualBasis,
}

fn claims_block(claims: &[Claim]) -> String {
    claims
        .iter()
        .map(|c| format!("- [{}] (context {}) {}", c.id, c.context_id, c.text))
        .collect::<Vec<_>>()
        .join("\n")
}

fn evidence_block(evidence: &[EvidenceItem]) -> String {
    evidence
        .iter()
        .map(|e| {
            format!(
                "- [{}] ({:?}, {}) {} | excerpt: \"{}\"",
                e.id, e.direction, e.source_url, e.statement, e.excerpt
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl AnalysisService for RemoteAnalysis {
    fn name(&self) -> &str {
        "remote"
    }

    async fn classify_input(&self, text: &str) -> Result<Analyzed<InputClassification>, AnalysisError> {
        let schema = json!({
            "type": "object",
            "required": ["input_type", "sentence_count"],
            "properties": {
                "input_type": { "enum": ["claim", "question", "article"] },
                "sentence_count": { "type": "integer", "minimum": 0 }
            }
        });
        let (value, tokens) = self
            .call(AnalysisPoint::InputClassification, CLASSIFY_PROMPT, self.truncate(text), schema)
            .await?;
        Ok(Analyzed::remote(value, tokens))
    }

    async fn decompose(
        &self,
        text: &str,
        classification: &InputClassification,
    ) -> Result<Analyzed<Decomposition>, AnalysisError> {
        let point = AnalysisPoint::ClaimDecomposition;
        let schema = json!({
            "type": "object",
            "required": ["claims", "contexts", "queries"],
            "properties": {
                "claims": { "type": "array", "items": {
                    "type": "object",
                    "required": ["text", "centrality", "harm_potential", "context_id"],
                    "properties": {
                        "text": { "type": "string" },
                        "role": { "enum": ["core", "attribution", "source", "timing"] },
                        "centrality": { "enum": ["high", "medium", "low"] },
                        "harm_potential": { "enum": ["high", "medium", "low"] },
                        "thesis_relevance": { "enum": ["direct", "tangential", "irrelevant"] },
                        "context_id": { "type": "string" }
                    }
                }},
                "contexts": { "type": "array", "items": {
                    "type": "object",
                    "required": ["id", "name", "subject"],
                    "properties": {
                        "id": { "type": "string" },
                        "name": { "type": "string" },
                        "subject": { "type": "string" }
                    }
                }},
                "queries": { "type": "array", "items": { "type": "string" } }
            }
        });
        let user = format!(
            "Input type: {:?}\n\nInput:\n{}",
            classification.input_type,
            self.truncate(text)
        );

        let (wire, tokens): (DecompositionWire, u64) = self.call(point, DECOMPOSE_PROMPT, user, schema).await?;
        if wire.claims.is_empty() {
            return Err(AnalysisError::Parse {
                point,
                message: "decomposition returned no claims".to_string(),
                tokens_used: tokens,
            });
        }

        let claims = wire
            .claims
            .into_iter()
            .enumerate()
            .map(|(i, c)| Claim {
                id: format!("C{}", i + 1),
                text: c.text,
                role: c.role,
                centrality: c.centrality,
                harm_potential: c.harm_potential,
                thesis_relevance: c.thesis_relevance,
                context_id: c.context_id.unwrap_or_else(|| MAIN_CONTEXT_ID.to_string()),
            })
            .collect();

        Ok(Analyzed::remote(
            Decomposition {
                claims,
                contexts: wire.contexts,
                queries: wire.queries,
            },
            tokens,
        ))
    }

    async fn extract_evidence(&self, input: ExtractionInput<'_>) -> Result<Analyzed<Extraction>, AnalysisError> {
        let schema = json!({
            "type": "object",
            "required": ["items", "research_complete"],
            "properties": {
                "items": { "type": "array", "items": {
                    "type": "object",
                    "required": ["statement", "source_id", "excerpt", "direction", "context_id"],
                    "properties": {
                        "statement": { "type": "string" },
                        "source_id": { "type": "string" },
                        "excerpt": { "type": "string" },
                        "category": { "enum": ["statistic", "event", "legal_record", "expert_statement", "official_statement", "other"] },
                        "direction": { "enum": ["supports", "contradicts", "neutral"] },
                        "context_id": { "type": "string" }
                    }
                }},
                "research_complete": { "type": "boolean" }
            }
        });

        let documents = input
            .sources
            .iter()
            .filter(|s| s.has_content())
            .map(|s| format!("=== [{}] {} ({})\n{}", s.id, s.title, s.url, self.truncate(&s.text)))
            .collect::<Vec<_>>()
            .join("\n\n");
        let user = format!("Claims:\n{}\n\nDocuments:\n{}", claims_block(input.claims), documents);

        let (wire, tokens): (ExtractionWire, u64) = self
            .call(AnalysisPoint::EvidenceExtraction, EXTRACT_PROMPT, user, schema)
            .await?;

        // Unknown source ids leave the url empty; provenance rejects those
        let items = wire
            .items
            .into_iter()
            .map(|e| {
                let source = input.sources.iter().find(|s| s.id == e.source_id);
                EvidenceItem {
                    id: String::new(),
                    statement: e.statement,
                    source_url: source.map(|s| s.url.clone()).unwrap_or_default(),
                    source_title: source.map(|s| s.title.clone()).unwrap_or_default(),
                    source_id: e.source_id,
                    excerpt: e.excerpt,
                    category: e.category,
                    direction: e.direction,
                    context_id: e.context_id.unwrap_or_else(|| MAIN_CONTEXT_ID.to_string()),
                }
            })
            .collect();

        Ok(Analyzed::remote(
            Extraction {
                items,
                research_complete: wire.research_complete,
            },
            tokens,
        ))
    }

    async fn assess_quality(&self, items: &[EvidenceItem]) -> Result<Analyzed<Vec<QualityRating>>, AnalysisError> {
        let schema = json!({
            "type": "object",
            "required": ["ratings"],
            "properties": {
                "ratings": { "type": "array", "items": {
                    "type": "object",
                    "required": ["evidence_id", "quality"],
                    "properties": {
                        "evidence_id": { "type": "string" },
                        "quality": { "enum": ["high", "medium", "low", "filtered"] },
                        "reason": { "type": "string" }
                    }
                }}
            }
        });
        let (wire, tokens): (QualityWire, u64) = self
            .call(AnalysisPoint::EvidenceQuality, QUALITY_PROMPT, evidence_block(items), schema)
            .await?;
        Ok(Analyzed::remote(wire.ratings, tokens))
    }

    async fn compare_similarity(&self, a: &str, b: &str) -> Result<Analyzed<f64>, AnalysisError> {
        let schema = json!({
            "type": "object",
            "required": ["similarity"],
            "properties": { "similarity": { "type": "number", "minimum": 0, "maximum": 1 } }
        });
        let user = format!("Context A: {a}\nContext B: {b}");
        let (wire, tokens): (SimilarityWire, u64) = self
            .call(AnalysisPoint::ContextSimilarity, SIMILARITY_PROMPT, user, schema)
            .await?;
        Ok(Analyzed::remote(wire.similarity.clamp(0.0, 1.0), tokens))
    }

    async fn generate_verdict(&self, input: VerdictInput<'_>) -> Result<Analyzed<ClaimVerdict>, AnalysisError> {
        let schema = json!({
            "type": "object",
            "required": ["truth_percentage", "confidence", "reasoning", "supporting_evidence_ids"],
            "properties": {
                "truth_percentage": { "type": "integer", "minimum": 0, "maximum": 100 },
                "confidence": { "type": "integer", "minimum": 0, "maximum": 100 },
                "reasoning": { "type": "string" },
                "supporting_evidence_ids": { "type": "array", "items": { "type": "string" } },
                "is_contested": { "type": "boolean" },
                "factual_basis": { "enum": ["established", "disputed", "opinion", "unknown"] }
            }
        });
        let user = format!(
            "Context: {} ({})\nClaim [{}]: {}\n\nEvidence:\n{}",
            input.context.name,
            input.context.subject,
            input.claim.id,
            input.claim.text,
            evidence_block(input.evidence)
        );

        let (wire, tokens): (VerdictWire, u64) = self
            .call(AnalysisPoint::VerdictGeneration, VERDICT_PROMPT, user, schema)
            .await?;

        // Cited ids must exist in the evidence the model was shown
        let supporting_evidence_ids = wire
            .supporting_evidence_ids
            .into_iter()
            .filter(|id| input.evidence.iter().any(|e| &e.id == id))
            .collect();

        Ok(Analyzed::remote(
            ClaimVerdict {
                claim_id: input.claim.id.clone(),
                context_id: input.claim.context_id.clone(),
                truth_percentage: wire.truth_percentage.min(100),
                confidence: wire.confidence.min(100),
                reasoning: wire.reasoning,
                supporting_evidence_ids,
                centrality: input.claim.centrality,
                harm_potential: input.claim.harm_potential,
                is_contested: wire.is_contested,
                factual_basis: wire.factual_basis,
                reliability_adjusted: false,
            },
            tokens,
        ))
    }

    async fn validate_verdict(
        &self,
        input: VerdictInput<'_>,
        verdict: &ClaimVerdict,
    ) -> Result<Analyzed<VerdictCheck>, AnalysisError> {
        let schema = json!({
            "type": "object",
            "required": ["consistent", "note"],
            "properties": {
                "consistent": { "type": "boolean" },
                "adjusted_truth": { "type": "integer", "minimum": 0, "maximum": 100 },
                "note": { "type": "string" }
            }
        });
        let user = format!(
            "Claim [{}]: {}\nVerdict: truth {} / confidence {}\nReasoning: {}\n\nEvidence:\n{}",
            input.claim.id,
            input.claim.text,
            verdict.truth_percentage,
            verdict.confidence,
            verdict.reasoning,
            evidence_block(input.evidence)
        );
        let (mut check, tokens): (VerdictCheck, u64) = self
            .call(AnalysisPoint::VerdictValidation, VALIDATE_PROMPT, user, schema)
            .await?;
        check.adjusted_truth = check.adjusted_truth.map(|t| t.min(100));
        Ok(Analyzed::remote(check, tokens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{ProviderError, ReasoningOutput};
    use crate::analysis::InputType;

    struct Canned(&'static str);

    #[async_trait]
    impl Reasoner for Canned {
        fn name(&self) -> &str {
            "canned"
        }

        async fn complete(&self, _: &ReasoningRequest, _: Duration) -> Result<ReasoningOutput, ProviderError> {
            Ok(ReasoningOutput {
                content: self.0.to_string(),
                tokens_used: Some(42),
            })
        }
    }

    fn remote(content: &'static str) -> RemoteAnalysis {
        RemoteAnalysis::new(Arc::new(Canned(content)), &AnalysisSettings::default())
    }

    #[test]
    fn test_repair_strips_fences_and_prose() {
        let raw = "Sure! Here you go:\n```json\n{\"similarity\": 0.9}\n```";
        let parsed: SimilarityWire = parse_structured(raw).unwrap();
        assert_eq!(parsed.similarity, 0.9);
    }

    #[test]
    fn test_unrepairable_output_is_an_error() {
        assert!(parse_structured::<SimilarityWire>("no json here").is_err());
        assert!(parse_structured::<SimilarityWire>("{\"other\": 1}").is_err());
    }

    #[tokio::test]
    async fn test_classification_parses_strictly() {
        let result = remote(r#"{"input_type": "question", "sentence_count": 1}"#)
            .classify_input("Is the sky green?")
            .await
            .unwrap();
        assert_eq!(result.value.input_type, InputType::Question);
        assert_eq!(result.tokens_used, 42);
    }

    #[tokio::test]
    async fn test_malformed_output_is_parse_error() {
        let err = remote(r#"{"input_type": "poem"}"#)
            .classify_input("Is the sky green?")
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Parse { point: AnalysisPoint::InputClassification, .. }));
        // the call was billed even though its output was unusable
        assert_eq!(err.tokens_spent(), 42);
    }

    #[tokio::test]
    async fn test_decomposition_assigns_ids() {
        let result = remote(
            r#"{"claims": [{"text": "A happened", "centrality": "high", "harm_potential": "low", "context_id": "main"},
                           {"text": "B happened", "centrality": "low", "harm_potential": "low"}],
                "contexts": [], "queries": ["A happened"]}"#,
        )
        .decompose(
            "A happened and B happened",
            &InputClassification {
                input_type: InputType::Claim,
                sentence_count: 1,
            },
        )
        .await
        .unwrap();

        let ids: Vec<&str> = result.value.claims.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["C1", "C2"]);
        assert_eq!(result.value.claims[1].context_id, MAIN_CONTEXT_ID);
    }

    #[test]
    fn test_estimate_includes_output_budget() {
        let r = remote("{}");
        let estimate = r.estimate_tokens(AnalysisPoint::ContextSimilarity, 400);
        assert_eq!(estimate, 100 + PROMPT_OVERHEAD_TOKENS + 100);
    }
}
