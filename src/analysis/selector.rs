//! Hybrid analysis: remote first, heuristic fallback.
//!
//! Each analysis point is toggled independently. With the toggle off (or no
//! remote service configured) the heuristic runs directly. With it on, the
//! remote call runs through the provider health monitor with retries on
//! retriable errors; any failure falls back to the heuristic. If the
//! heuristic fails as well, the original remote error is returned.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use super::{
    AnalysisError, AnalysisMetrics, AnalysisPoint, AnalysisService, Analyzed, Decomposition, Extraction,
    ExtractionInput, HeuristicAnalysis, InputClassification, QualityRating, RemoteAnalysis, RetryPolicy,
    VerdictCheck, VerdictInput,
};
use crate::adapters::ProviderKind;
use crate::core::health::ProviderHealthMonitor;
use crate::domain::{ClaimVerdict, EvidenceItem};

/// Which analysis points use the reasoning provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteToggles {
    #[serde(default = "enabled")]
    pub input_classification: bool,
    #[serde(default = "enabled")]
    pub claim_decomposition: bool,
    #[serde(default = "enabled")]
    pub evidence_extraction: bool,
    #[serde(default = "enabled")]
    pub evidence_quality: bool,
    #[serde(default = "enabled")]
    pub context_similarity: bool,
    #[serde(default = "enabled")]
    pub verdict_generation: bool,
    #[serde(default = "enabled")]
    pub verdict_validation: bool,
}

fn enabled() -> bool {
    true
}

impl Default for RemoteToggles {
    fn default() -> Self {
        Self::all(true)
    }
}

impl RemoteToggles {
    pub fn all(on: bool) -> Self {
        Self {
            input_classification: on,
            claim_decomposition: on,
            evidence_extraction: on,
            evidence_quality: on,
            context_similarity: on,
            verdict_generation: on,
            verdict_validation: on,
        }
    }

    pub fn is_enabled(&self, point: AnalysisPoint) -> bool {
        match point {
            AnalysisPoint::InputClassification => self.input_classification,
            AnalysisPoint::ClaimDecomposition => self.claim_decomposition,
            AnalysisPoint::EvidenceExtraction => self.evidence_extraction,
            AnalysisPoint::EvidenceQuality => self.evidence_quality,
            AnalysisPoint::ContextSimilarity => self.context_similarity,
            AnalysisPoint::VerdictGeneration => self.verdict_generation,
            AnalysisPoint::VerdictValidation => self.verdict_validation,
        }
    }
}

/// Analysis settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSettings {
    #[serde(default)]
    pub remote: RemoteToggles,

    /// Sampling temperature for reasoning calls (default: 0.2)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Timeout per reasoning call in seconds (default: 60)
    #[serde(default = "default_call_timeout")]
    pub call_timeout_seconds: u64,

    /// Characters of each source passed to a reasoning call (default: 6000)
    #[serde(default = "default_max_source_chars")]
    pub max_source_chars: usize,

    /// Retry policy for timeouts and rate limits
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Call records kept for monitoring (default: 1000)
    #[serde(default = "default_metrics_capacity")]
    pub metrics_capacity: usize,
}

fn default_temperature() -> f32 {
    0.2
}
fn default_call_timeout() -> u64 {
    60
}
fn default_max_source_chars() -> usize {
    6000
}
fn default_metrics_capacity() -> usize {
    super::metrics::DEFAULT_CAPACITY
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            remote: RemoteToggles::default(),
            temperature: default_temperature(),
            call_timeout_seconds: default_call_timeout(),
            max_source_chars: default_max_source_chars(),
            retry: RetryPolicy::default(),
            metrics_capacity: default_metrics_capacity(),
        }
    }
}

/// Remote-with-fallback analysis service
pub struct HybridAnalysis {
    remote: Option<RemoteAnalysis>,
    heuristic: HeuristicAnalysis,
    toggles: RemoteToggles,
    retry: RetryPolicy,
    max_source_chars: usize,
    health: Arc<ProviderHealthMonitor>,
    metrics: Arc<AnalysisMetrics>,
}

impl HybridAnalysis {
    pub fn new(
        remote: Option<RemoteAnalysis>,
        settings: &AnalysisSettings,
        health: Arc<ProviderHealthMonitor>,
        metrics: Arc<AnalysisMetrics>,
    ) -> Self {
        Self {
            remote,
            heuristic: HeuristicAnalysis::new(),
            toggles: settings.remote.clone(),
            retry: settings.retry.clone(),
            max_source_chars: settings.max_source_chars,
            health,
            metrics,
        }
    }

    /// Heuristic-only service (no reasoning provider configured)
    pub fn heuristic_only(health: Arc<ProviderHealthMonitor>, metrics: Arc<AnalysisMetrics>) -> Self {
        Self::new(None, &AnalysisSettings::default(), health, metrics)
    }

    pub fn heuristic(&self) -> &HeuristicAnalysis {
        &self.heuristic
    }

    pub fn metrics(&self) -> &Arc<AnalysisMetrics> {
        &self.metrics
    }

    /// Characters of any single text passed to a reasoning call
    pub fn max_source_chars(&self) -> usize {
        self.max_source_chars
    }

    /// Whether `point` would try the reasoning provider
    pub fn uses_remote(&self, point: AnalysisPoint) -> bool {
        self.remote.is_some() && self.toggles.is_enabled(point)
    }

    /// Token reservation for a remote call; 0 when the point runs locally
    pub fn estimate_tokens(&self, point: AnalysisPoint, input_chars: usize) -> u64 {
        match &self.remote {
            Some(remote) if self.toggles.is_enabled(point) => remote.estimate_tokens(point, input_chars),
            _ => 0,
        }
    }

    /// Run the heuristic directly and record it
    pub fn run_local<T>(
        &self,
        point: AnalysisPoint,
        heuristic: impl FnOnce(&HeuristicAnalysis) -> Result<T, AnalysisError>,
    ) -> Result<Analyzed<T>, AnalysisError> {
        let started = Instant::now();
        let result = heuristic(&self.heuristic).map(Analyzed::local);
        self.metrics.record(point, started.elapsed(), result.is_ok(), 0, false);
        result
    }

    async fn dispatch<'a, T, F, Fut, H>(
        &'a self,
        point: AnalysisPoint,
        mut remote_call: F,
        heuristic: H,
    ) -> Result<Analyzed<T>, AnalysisError>
    where
        F: FnMut(&'a RemoteAnalysis) -> Fut + Send,
        Fut: Future<Output = Result<Analyzed<T>, AnalysisError>> + Send,
        H: FnOnce(&HeuristicAnalysis) -> Result<T, AnalysisError> + Send,
        T: Send,
    {
        let remote = match &self.remote {
            Some(remote) if self.toggles.is_enabled(point) => remote,
            _ => return self.run_local(point, heuristic),
        };

        let started = Instant::now();
        if !self.health.can_call(ProviderKind::Reasoning) {
            debug!(point = %point, "Reasoning provider unavailable, using heuristic");
            let spent = Spent::default();
            return self.fall_back(point, started, spent, AnalysisError::Unavailable { point }, heuristic);
        }

        let mut spent = Spent::default();
        loop {
            spent.calls += 1;
            match remote_call(remote).await {
                Ok(mut result) => {
                    self.health.record_success(ProviderKind::Reasoning);
                    self.metrics.record(point, started.elapsed(), true, spent.retries(), false);
                    result.tokens_used += spent.tokens;
                    result.reasoning_calls = spent.calls;
                    return Ok(result);
                }
                Err(e) => {
                    spent.tokens += e.tokens_spent();
                    if let AnalysisError::Provider(provider_error) = &e {
                        self.health
                            .record_failure(ProviderKind::Reasoning, provider_error.kind, &provider_error.message);
                    } else {
                        self.health.release(ProviderKind::Reasoning);
                    }

                    if e.is_retriable()
                        && self.retry.should_retry(spent.calls)
                        && self.health.can_call(ProviderKind::Reasoning)
                    {
                        let delay = self.retry.delay_for_attempt(spent.calls);
                        warn!(
                            point = %point,
                            attempt = spent.calls,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Reasoning call failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    return self.fall_back(point, started, spent, e, heuristic);
                }
            }
        }
    }

    fn fall_back<T>(
        &self,
        point: AnalysisPoint,
        started: Instant,
        spent: Spent,
        remote_error: AnalysisError,
        heuristic: impl FnOnce(&HeuristicAnalysis) -> Result<T, AnalysisError>,
    ) -> Result<Analyzed<T>, AnalysisError> {
        warn!(
            point = %point,
            error = %remote_error,
            tokens = spent.tokens,
            "Remote analysis failed, falling back to heuristic"
        );

        match heuristic(&self.heuristic) {
            Ok(value) => {
                self.metrics.record(point, started.elapsed(), true, spent.retries(), true);
                Ok(Analyzed {
                    value,
                    tokens_used: spent.tokens,
                    reasoning_calls: spent.calls,
                    used_fallback: true,
                })
            }
            Err(heuristic_error) => {
                error!(
                    point = %point,
                    remote_error = %remote_error,
                    heuristic_error = %heuristic_error,
                    "Heuristic fallback failed"
                );
                self.metrics.record(point, started.elapsed(), false, spent.retries(), true);
                Err(remote_error)
            }
        }
    }
}

/// Reasoning spend across the attempts of one dispatch
#[derive(Debug, Default, Clone, Copy)]
struct Spent {
    calls: u32,
    tokens: u64,
}

impl Spent {
    fn retries(&self) -> u32 {
        self.calls.saturating_sub(1)
    }
}

#[async_trait]
impl AnalysisService for HybridAnalysis {
    fn name(&self) -> &str {
        "hybrid"
    }

    async fn classify_input(&self, text: &str) -> Result<Analyzed<InputClassification>, AnalysisError> {
        self.dispatch(
            AnalysisPoint::InputClassification,
            |r| r.classify_input(text),
            |h| Ok(h.classify(text)),
        )
        .await
    }

    async fn decompose(
        &self,
        text: &str,
        classification: &InputClassification,
    ) -> Result<Analyzed<Decomposition>, AnalysisError> {
        self.dispatch(
            AnalysisPoint::ClaimDecomposition,
            |r| r.decompose(text, classification),
            |h| h.decompose_text(text, classification),
        )
        .await
    }

    async fn extract_evidence(&self, input: ExtractionInput<'_>) -> Result<Analyzed<Extraction>, AnalysisError> {
        self.dispatch(
            AnalysisPoint::EvidenceExtraction,
            |r| r.extract_evidence(input),
            |h| Ok(h.extract(input)),
        )
        .await
    }

    async fn assess_quality(&self, items: &[EvidenceItem]) -> Result<Analyzed<Vec<QualityRating>>, AnalysisError> {
        self.dispatch(
            AnalysisPoint::EvidenceQuality,
            |r| r.assess_quality(items),
            |h| Ok(h.rate(items)),
        )
        .await
    }

    async fn compare_similarity(&self, a: &str, b: &str) -> Result<Analyzed<f64>, AnalysisError> {
        self.dispatch(
            AnalysisPoint::ContextSimilarity,
            |r| r.compare_similarity(a, b),
            |_| Ok(super::heuristic::jaccard(a, b)),
        )
        .await
    }

    async fn generate_verdict(&self, input: VerdictInput<'_>) -> Result<Analyzed<ClaimVerdict>, AnalysisError> {
        self.dispatch(
            AnalysisPoint::VerdictGeneration,
            |r| r.generate_verdict(input),
            |h| Ok(h.verdict(input)),
        )
        .await
    }

    async fn validate_verdict(
        &self,
        input: VerdictInput<'_>,
        verdict: &ClaimVerdict,
    ) -> Result<Analyzed<VerdictCheck>, AnalysisError> {
        self.dispatch(
            AnalysisPoint::VerdictValidation,
            |r| r.validate_verdict(input, verdict),
            |h| Ok(h.check(input, verdict)),
        )
        .await
    }
}
