//! Research loop controller.
//!
//! Drives one verification job through the state machine
//! `DECOMPOSE -> RESEARCH -> EXTRACT -> DECIDE (-> RESEARCH ...) -> VERDICT -> AGGREGATE -> DONE`.
//!
//! Two exits leave the happy path:
//! - zero usable evidence ends in `FALLBACK_RESULT`, a successful
//!   low-confidence result (truth 50, confidence 30);
//! - evidence that was extracted and then rejected in full by the
//!   provenance gate is fatal, since it points at fabricated content.
//!
//! Searches and fetches within an iteration run concurrently (bounded by the
//! query slice and the per-iteration source cap). Extraction and verdict
//! calls are sequential so evidence ids and budget counters stay race-free.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{
    FetchedDocument, Fetcher, ProviderError, ProviderErrorKind, ProviderKind, SearchHit, SearchProvider,
    SearchRequest, SearchResponse,
};
use crate::analysis::heuristic::jaccard;
use crate::analysis::{
    AnalysisError, AnalysisPoint, AnalysisService, Analyzed, EvidenceQuality, ExtractionInput, HybridAnalysis,
    InputClassification, VerdictInput,
};
use crate::domain::{
    AggregateVerdict, AnalysisContext, ClaimVerdict, ContextVerdict, EventType, EvidenceItem, FactualBasis, InputKind,
    Job, JobResult, ResearchPhase, Source, VerdictLabel, MAIN_CONTEXT_ID,
};

use super::aggregate::{select_primary, AggregationSettings, VerdictAggregator};
use super::budget::{BudgetGovernor, BudgetLimits};
use super::cache::SearchCache;
use super::health::{CircuitState, ProviderHealthMonitor};
use super::provenance::{ProvenanceSettings, ProvenanceValidator};

/// Neutral truth percentage of the fail-safe result
pub const FALLBACK_TRUTH: u8 = 50;
/// Confidence of the fail-safe result
pub const FALLBACK_CONFIDENCE: u8 = 30;

const INSUFFICIENT_EVIDENCE: &str = "Insufficient evidence: no usable evidence was found within the research budget";

/// Research loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchSettings {
    /// Queries run in the first iteration (default: 3)
    #[serde(default = "default_queries_first_iteration")]
    pub queries_first_iteration: usize,

    /// Queries run in each later iteration (default: 1)
    #[serde(default = "default_queries_per_iteration")]
    pub queries_per_iteration: usize,

    /// New sources fetched per iteration (default: 4)
    #[serde(default = "default_sources_per_iteration")]
    pub sources_per_iteration: usize,

    /// Accepted evidence at which research stops (default: 40)
    #[serde(default = "default_evidence_cap")]
    pub evidence_cap: usize,

    /// Longer input is truncated (default: 20000)
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,

    /// Results requested per search (default: 8)
    #[serde(default = "default_search_max_results")]
    pub search_max_results: usize,

    #[serde(default = "default_search_timeout")]
    pub search_timeout_seconds: u64,

    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_seconds: u64,

    /// Characters kept from each fetched document (default: 200000)
    #[serde(default = "default_max_fetch_length")]
    pub max_fetch_length: usize,

    /// Contexts at least this similar are merged (default: 0.85)
    #[serde(default = "default_context_merge_threshold")]
    pub context_merge_threshold: f64,

    #[serde(default)]
    pub domain_allow: Vec<String>,

    #[serde(default)]
    pub domain_deny: Vec<String>,

    /// Provider date restriction applied to every search, e.g. "y5"
    #[serde(default)]
    pub date_restrict: Option<String>,

    /// Reliability (0-1) per domain, subdomains included, e.g. `reuters.com: 0.9`
    #[serde(default)]
    pub source_reliability: HashMap<String, f64>,
}

fn default_queries_first_iteration() -> usize {
    3
}
fn default_queries_per_iteration() -> usize {
    1
}
fn default_sources_per_iteration() -> usize {
    4
}
fn default_evidence_cap() -> usize {
    40
}
fn default_max_input_chars() -> usize {
    20_000
}
fn default_search_max_results() -> usize {
    8
}
fn default_search_timeout() -> u64 {
    15
}
fn default_fetch_timeout() -> u64 {
    20
}
fn default_max_fetch_length() -> usize {
    200_000
}
fn default_context_merge_threshold() -> f64 {
    0.85
}

impl Default for ResearchSettings {
    fn default() -> Self {
        Self {
            queries_first_iteration: default_queries_first_iteration(),
            queries_per_iteration: default_queries_per_iteration(),
            sources_per_iteration: default_sources_per_iteration(),
            evidence_cap: default_evidence_cap(),
            max_input_chars: default_max_input_chars(),
            search_max_results: default_search_max_results(),
            search_timeout_seconds: default_search_timeout(),
            fetch_timeout_seconds: default_fetch_timeout(),
            max_fetch_length: default_max_fetch_length(),
            context_merge_threshold: default_context_merge_threshold(),
            domain_allow: Vec::new(),
            domain_deny: Vec::new(),
            date_restrict: None,
            source_reliability: HashMap::new(),
        }
    }
}

impl ResearchSettings {
    /// Configured reliability for a source URL; the most specific domain wins
    pub fn reliability_for(&self, url: &str) -> Option<f64> {
        if self.source_reliability.is_empty() {
            return None;
        }
        let host = Url::parse(url).ok()?.host_str()?.to_ascii_lowercase();

        self.source_reliability
            .iter()
            .filter_map(|(domain, score)| {
                let domain = domain.trim().trim_start_matches("www.").to_ascii_lowercase();
                let host = host.trim_start_matches("www.");
                let matches = host == domain || host.ends_with(&format!(".{domain}"));
                (matches && !domain.is_empty()).then_some((domain.len(), *score))
            })
            .max_by_key(|(len, _)| *len)
            .map(|(_, score)| score)
    }
}

/// Everything that parameterises a controller
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default)]
    pub budget: BudgetLimits,
    #[serde(default)]
    pub research: ResearchSettings,
    #[serde(default)]
    pub provenance: ProvenanceSettings,
    #[serde(default)]
    pub aggregation: AggregationSettings,
}

/// Job-level failures
#[derive(Debug, Error)]
pub enum ResearchError {
    /// Bad URL, empty text, unreadable article
    #[error("input error: {0}")]
    Input(String),

    #[error("all {extracted} extracted evidence items failed provenance validation")]
    ProvenanceFailure { extracted: usize, rejected: usize },

    #[error("analysis failed: {0}")]
    Analysis(#[from] AnalysisError),
}

impl ResearchError {
    pub fn kind(&self) -> &'static str {
        match self {
            ResearchError::Input(_) => "input_error",
            ResearchError::ProvenanceFailure { .. } => "provenance_failure",
            ResearchError::Analysis(_) => "analysis_error",
        }
    }
}

/// Drives verification jobs
pub struct ResearchController {
    search: Arc<dyn SearchProvider>,
    fetcher: Arc<dyn Fetcher>,
    analysis: Arc<HybridAnalysis>,
    health: Arc<ProviderHealthMonitor>,
    cache: Option<Arc<SearchCache>>,
    governor: BudgetGovernor,
    provenance: ProvenanceValidator,
    aggregator: VerdictAggregator,
    settings: ResearchSettings,
}

impl ResearchController {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        fetcher: Arc<dyn Fetcher>,
        analysis: Arc<HybridAnalysis>,
        health: Arc<ProviderHealthMonitor>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            search,
            fetcher,
            analysis,
            health,
            cache: None,
            governor: BudgetGovernor::new(config.budget),
            provenance: ProvenanceValidator::new(config.provenance),
            aggregator: VerdictAggregator::new(config.aggregation),
            settings: config.research,
        }
    }

    /// Share a search result cache with this controller
    pub fn with_cache(mut self, cache: Arc<SearchCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Create a job for an input, detecting URL input
    pub fn new_job(&self, input: &str) -> Job {
        let kind = if looks_like_url(input) {
            InputKind::Url
        } else {
            InputKind::Text
        };
        Job::new(Uuid::new_v4(), input.to_string(), kind)
    }

    /// Verify an input end to end
    pub async fn run(&self, input: &str) -> Result<JobResult, ResearchError> {
        let mut job = self.new_job(input);
        self.run_job(&mut job).await
    }

    /// Run a prepared job. On failure the job keeps its audit events.
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    pub async fn run_job(&self, job: &mut Job) -> Result<JobResult, ResearchError> {
        info!(kind = ?job.input_kind, "Starting verification job");
        let kind = match job.input_kind {
            InputKind::Text => "text",
            InputKind::Url => "url",
        };
        job.record(EventType::JobStarted, format!("Verification started ({kind} input)"));

        if self.health.is_system_paused() {
            warn!("System is paused; running on cached results and heuristics");
            job.warn("System paused after a provider outage; results rely on cache and heuristics");
        }

        match self.execute(job).await {
            Ok(result) => Ok(result),
            Err(e) => {
                job.enter(ResearchPhase::Failed);
                let event = job
                    .event(EventType::JobFailed, format!("Verification failed ({})", e.kind()))
                    .with_error(e.to_string());
                job.push_event(event);
                error!(error = %e, "Verification job failed");
                Err(e)
            }
        }
    }

    async fn execute(&self, job: &mut Job) -> Result<JobResult, ResearchError> {
        self.prepare_input(job).await?;
        let classification = self.classify(job).await?;
        self.decompose(job, &classification).await?;
        self.research(job).await?;

        if job.evidence.is_empty() {
            if job.extracted_count > 0 && job.rejected_count == job.extracted_count {
                return Err(ResearchError::ProvenanceFailure {
                    extracted: job.extracted_count,
                    rejected: job.rejected_count,
                });
            }
            return Ok(self.fallback(job, classification));
        }

        let verdicts = self.generate_verdicts(job).await?;
        Ok(self.complete(job, classification, verdicts))
    }

    // ------------------------------------------------------------------------
    // Input
    // ------------------------------------------------------------------------

    async fn prepare_input(&self, job: &mut Job) -> Result<(), ResearchError> {
        let input = job.input.trim().to_string();
        if input.is_empty() {
            return Err(ResearchError::Input("input is empty".to_string()));
        }

        let mut text = match job.input_kind {
            InputKind::Text => input,
            InputKind::Url => {
                let url = Url::parse(&input).map_err(|e| ResearchError::Input(format!("invalid URL '{input}': {e}")))?;
                if !matches!(url.scheme(), "http" | "https") {
                    return Err(ResearchError::Input(format!("unsupported URL scheme '{}'", url.scheme())));
                }

                if !self.governor.allow_fetch(&mut job.budget) {
                    self.note_budget_stop(job);
                    return Err(ResearchError::Input(format!(
                        "fetch budget exhausted before {url} could be read"
                    )));
                }
                let started = Instant::now();
                job.budget.record_fetch();
                let document = fetch_with_timeout(
                    Arc::clone(&self.fetcher),
                    url.to_string(),
                    self.fetch_timeout(),
                    self.settings.max_fetch_length,
                )
                .await
                .map_err(|e| ResearchError::Input(format!("could not fetch {url}: {e}")))?;

                if document.text.trim().is_empty() {
                    return Err(ResearchError::Input(format!("no readable text at {url}")));
                }
                let event = job
                    .event(EventType::SourceFetched, format!("Fetched input article {url}"))
                    .with_duration(started.elapsed().as_millis() as u64);
                job.push_event(event);
                document.text
            }
        };

        let chars = text.chars().count();
        if chars > self.settings.max_input_chars {
            warn!(chars, max = self.settings.max_input_chars, "Input truncated");
            text = text.chars().take(self.settings.max_input_chars).collect();
            job.warn(format!(
                "Input truncated from {chars} to {} characters",
                self.settings.max_input_chars
            ));
        }

        job.analysis_text = text;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Analysis plumbing
    // ------------------------------------------------------------------------

    fn clip(&self, chars: usize) -> usize {
        chars.min(self.analysis.max_source_chars())
    }

    /// Whether the token budget admits a reasoning call for `point`.
    /// Local points always pass.
    fn can_afford(&self, job: &mut Job, point: AnalysisPoint, input_chars: usize) -> bool {
        let estimate = self.analysis.estimate_tokens(point, input_chars);
        if estimate == 0 || self.governor.allow_tokens(&mut job.budget, estimate) {
            return true;
        }
        warn!(point = %point, estimate, "Token budget rejected reasoning call, using heuristic");
        job.record(
            EventType::AnalysisFallback,
            format!("{point} used the heuristic: token budget exhausted"),
        );
        false
    }

    fn account<T>(&self, job: &mut Job, point: AnalysisPoint, analyzed: &Analyzed<T>) {
        job.budget.record_tokens(analyzed.tokens_used);
        job.budget.record_reasoning_calls(analyzed.reasoning_calls);
        if analyzed.used_fallback {
            job.record(
                EventType::AnalysisFallback,
                format!("{point} used the heuristic after a reasoning failure"),
            );
        }
    }

    /// Charge a failed analysis call for whatever the provider billed
    fn charge_failure(&self, job: &mut Job, error: &AnalysisError) {
        let tokens = error.tokens_spent();
        if tokens > 0 {
            job.budget.record_tokens(tokens);
            job.budget.record_reasoning_calls(1);
        }
    }

    async fn classify(&self, job: &mut Job) -> Result<InputClassification, ResearchError> {
        let point = AnalysisPoint::InputClassification;
        let text = job.analysis_text.clone();

        let analyzed = if self.can_afford(job, point, self.clip(text.len())) {
            self.analysis.classify_input(&text).await
        } else {
            self.analysis.run_local(point, |h| Ok(h.classify(&text)))
        };
        let analyzed = analyzed.inspect_err(|e| self.charge_failure(job, e))?;
        self.account(job, point, &analyzed);

        debug!(input_type = ?analyzed.value.input_type, "Input classified");
        Ok(analyzed.value)
    }

    // ------------------------------------------------------------------------
    // Decomposition
    // ------------------------------------------------------------------------

    async fn decompose(&self, job: &mut Job, classification: &InputClassification) -> Result<(), ResearchError> {
        job.enter(ResearchPhase::Decompose);
        let point = AnalysisPoint::ClaimDecomposition;
        let text = job.analysis_text.clone();

        let analyzed = if self.can_afford(job, point, self.clip(text.len())) {
            self.analysis.decompose(&text, classification).await
        } else {
            self.analysis.run_local(point, |h| h.decompose_text(&text, classification))
        };
        let analyzed = analyzed.inspect_err(|e| self.charge_failure(job, e))?;
        self.account(job, point, &analyzed);

        let decomposition = analyzed.value;
        job.claims = decomposition.claims;
        job.contexts = decomposition.contexts;
        job.queries = decomposition.queries;

        normalize_contexts(job);
        self.merge_similar_contexts(job).await;
        normalize_queries(job);

        info!(
            claims = job.claims.len(),
            contexts = job.contexts.len(),
            queries = job.queries.len(),
            "Input decomposed"
        );
        Ok(())
    }

    /// Merge near-duplicate contexts into the earlier one
    async fn merge_similar_contexts(&self, job: &mut Job) {
        let point = AnalysisPoint::ContextSimilarity;
        let mut i = 0;

        while i < job.contexts.len() {
            let mut j = i + 1;
            while j < job.contexts.len() {
                let a = describe_context(&job.contexts[i]);
                let b = describe_context(&job.contexts[j]);

                let analyzed = if self.can_afford(job, point, a.len() + b.len()) {
                    self.analysis.compare_similarity(&a, &b).await
                } else {
                    self.analysis.run_local(point, |_| Ok(jaccard(&a, &b)))
                };
                let similarity = match analyzed {
                    Ok(analyzed) => {
                        self.account(job, point, &analyzed);
                        analyzed.value
                    }
                    Err(e) => {
                        self.charge_failure(job, &e);
                        warn!(error = %e, "Context similarity failed; keeping contexts separate");
                        0.0
                    }
                };

                if similarity >= self.settings.context_merge_threshold {
                    let merged = job.contexts.remove(j);
                    let survivor = job.contexts[i].clone();
                    for claim in job.claims.iter_mut().filter(|c| c.context_id == merged.id) {
                        claim.context_id = survivor.id.clone();
                    }
                    info!(merged = %merged.id, into = %survivor.id, similarity, "Merged similar contexts");
                    job.record(
                        EventType::ContextMerged,
                        format!(
                            "Merged context '{}' into '{}' (similarity {:.2})",
                            merged.name, survivor.name, similarity
                        ),
                    );
                } else {
                    j += 1;
                }
            }
            i += 1;
        }
    }

    // ------------------------------------------------------------------------
    // Research loop
    // ------------------------------------------------------------------------

    async fn research(&self, job: &mut Job) -> Result<(), ResearchError> {
        loop {
            job.enter(ResearchPhase::Research);
            if !self.governor.allow_iteration(&mut job.budget) {
                self.note_budget_stop(job);
                break;
            }
            job.budget.record_iteration();
            job.iteration += 1;

            let queries = self.next_queries(job);
            let hits = self.search(job, &queries).await;
            let new_sources = self.fetch_sources(job, hits).await;

            job.enter(ResearchPhase::Extract);
            let research_complete = self.extract(job, &new_sources).await?;

            job.enter(ResearchPhase::Decide);
            if let Some(reason) = self.stop_reason(job, research_complete) {
                info!(iteration = job.iteration, reason = %reason, "Research loop stopping");
                break;
            }
        }
        Ok(())
    }

    /// The slice of not-yet-run queries for this iteration
    fn next_queries(&self, job: &Job) -> Vec<String> {
        let take = if job.iteration <= 1 {
            self.settings.queries_first_iteration
        } else {
            self.settings.queries_per_iteration
        }
        .max(1);

        let start = job.queries_run.min(job.queries.len());
        let end = (start + take).min(job.queries.len());
        job.queries[start..end].to_vec()
    }

    fn stop_reason(&self, job: &mut Job, research_complete: bool) -> Option<String> {
        if research_complete {
            return Some("extractor reported sufficient evidence".to_string());
        }
        if job.evidence.len() >= self.settings.evidence_cap {
            return Some(format!("evidence cap of {} reached", self.settings.evidence_cap));
        }

        let decision = self.governor.check_elapsed(&job.budget);
        if !self.governor.enforce(&mut job.budget, decision) || job.budget.exceeded {
            self.note_budget_stop(job);
            return Some(job.budget.exceeded_reason.clone().unwrap_or_else(|| "budget exceeded".to_string()));
        }

        if job.queries_run >= job.queries.len() {
            return Some("no search queries remaining".to_string());
        }
        None
    }

    /// Record the first budget stop of a job
    fn note_budget_stop(&self, job: &mut Job) {
        if job.events.iter().any(|e| e.event_type == EventType::BudgetStop) {
            return;
        }
        let reason = job
            .budget
            .exceeded_reason
            .clone()
            .unwrap_or_else(|| "budget exceeded".to_string());
        warn!(reason = %reason, "Budget ceiling reached, stopping research");
        job.record(EventType::BudgetStop, reason);
    }

    fn search_request(&self, query: &str) -> SearchRequest {
        let mut request = SearchRequest::new(query, self.settings.search_max_results);
        request.domain_allow = self.settings.domain_allow.clone();
        request.domain_deny = self.settings.domain_deny.clone();
        request.date_restrict = self.settings.date_restrict.clone();
        request.timeout = Duration::from_secs(self.settings.search_timeout_seconds);
        request
    }

    async fn search(&self, job: &mut Job, queries: &[String]) -> Vec<SearchHit> {
        let mut hits = Vec::new();
        let mut pending = Vec::new();

        for query in queries {
            let request = self.search_request(query);

            if let Some(cache) = &self.cache {
                match cache.get(&request) {
                    Ok(Some(cached)) => {
                        job.queries_run += 1;
                        debug!(query = %query, results = cached.results.len(), "Search cache hit");
                        job.record(
                            EventType::SearchCacheHit,
                            format!("'{}' ({} results from {})", query, cached.results.len(), cached.provider),
                        );
                        hits.extend(cached.results);
                        continue;
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Search cache lookup failed"),
                }
            }

            if !self.governor.allow_search(&mut job.budget) {
                job.record(EventType::SearchSkipped, format!("'{query}': search budget exhausted"));
                break;
            }
            job.queries_run += 1;

            if !self.health.can_call(ProviderKind::Search) {
                let reason = if self.health.is_system_paused() {
                    "system paused"
                } else if self.health.circuit_state(ProviderKind::Search) == CircuitState::HalfOpen {
                    "search trial call in flight"
                } else {
                    "search circuit open"
                };
                job.warn(format!("Searches skipped: {reason}"));
                job.record(EventType::SearchSkipped, format!("'{query}': {reason}"));
                continue;
            }

            job.budget.record_search();
            job.record(EventType::SearchIssued, format!("'{query}'"));
            pending.push(request);
        }

        let mut set = JoinSet::new();
        for (index, request) in pending.into_iter().enumerate() {
            let provider = Arc::clone(&self.search);
            set.spawn(async move {
                let started = Instant::now();
                let result = search_with_timeout(provider.as_ref(), &request).await;
                (index, request, result, started.elapsed())
            });
        }

        let mut completed = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(done) => completed.push(done),
                Err(e) => error!(error = %e, "Search task did not complete"),
            }
        }
        completed.sort_by_key(|(index, ..)| *index);

        for (_, request, result, elapsed) in completed {
            self.record_search_result(job, &request, result, elapsed, &mut hits);
        }
        hits
    }

    fn record_search_result(
        &self,
        job: &mut Job,
        request: &SearchRequest,
        result: Result<SearchResponse, ProviderError>,
        elapsed: Duration,
        hits: &mut Vec<SearchHit>,
    ) {
        let elapsed_ms = elapsed.as_millis() as u64;
        match result {
            Ok(response) => {
                if let Some(fatal) = response.fatal_error() {
                    warn!(query = %request.query, provider = %fatal.provider, error = %fatal.message, "Search provider reported a fatal error");
                    self.health
                        .record_failure(ProviderKind::Search, ProviderErrorKind::RateLimit, &fatal.message);
                    let event = job
                        .event(EventType::SearchFailed, format!("'{}' via {}", request.query, fatal.provider))
                        .with_duration(elapsed_ms)
                        .with_error(fatal.message.clone());
                    job.push_event(event);
                } else {
                    self.health.record_success(ProviderKind::Search);
                    if let Some(cache) = &self.cache {
                        if let Err(e) = cache.put(request, &response.results, &response.provider) {
                            warn!(error = %e, "Failed to cache search results");
                        }
                    }
                }
                debug!(query = %request.query, results = response.results.len(), elapsed_ms, "Search completed");
                hits.extend(response.results);
            }
            Err(e) => {
                warn!(query = %request.query, error = %e, "Search failed");
                self.health.record_failure(ProviderKind::Search, e.kind, &e.message);
                let event = job
                    .event(EventType::SearchFailed, format!("'{}'", request.query))
                    .with_duration(elapsed_ms)
                    .with_error(e.to_string());
                job.push_event(event);
            }
        }
    }

    /// Fetch new URLs from this iteration's hits. Returns ids of sources with content.
    async fn fetch_sources(&self, job: &mut Job, hits: Vec<SearchHit>) -> Vec<String> {
        let mut selected: Vec<SearchHit> = Vec::new();
        for hit in hits {
            if selected.len() >= self.settings.sources_per_iteration {
                break;
            }
            let url = hit.url.trim().to_string();
            if url.is_empty() || job.has_source_url(&url) || selected.iter().any(|h| h.url == url) {
                continue;
            }
            if !self.governor.allow_fetch(&mut job.budget) {
                self.note_budget_stop(job);
                break;
            }
            job.budget.record_fetch();
            selected.push(SearchHit { url, ..hit });
        }

        let mut set = JoinSet::new();
        for (index, hit) in selected.into_iter().enumerate() {
            let fetcher = Arc::clone(&self.fetcher);
            let timeout = self.fetch_timeout();
            let max_length = self.settings.max_fetch_length;
            set.spawn(async move {
                let started = Instant::now();
                let result = fetch_with_timeout(fetcher, hit.url.clone(), timeout, max_length).await;
                (index, hit, result, started.elapsed())
            });
        }

        let mut completed = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(done) => completed.push(done),
                Err(e) => error!(error = %e, "Fetch task did not complete"),
            }
        }
        completed.sort_by_key(|(index, ..)| *index);

        let mut fetched = Vec::new();
        for (_, hit, result, elapsed) in completed {
            let id = job.next_source_id();
            let elapsed_ms = elapsed.as_millis() as u64;
            match result {
                Ok(document) => {
                    let title = if document.title.trim().is_empty() {
                        hit.title
                    } else {
                        document.title
                    };
                    let mut source = Source::fetched(&id, &hit.url, title, document.text);
                    if let Some(score) = self.settings.reliability_for(&hit.url) {
                        source = source.with_reliability(score);
                    }
                    let has_content = source.has_content();
                    job.sources.push(source);

                    let event = job
                        .event(EventType::SourceFetched, format!("{id} {}", hit.url))
                        .with_duration(elapsed_ms);
                    job.push_event(event);
                    if has_content {
                        fetched.push(id);
                    }
                }
                Err(e) => {
                    debug!(url = %hit.url, error = %e, "Fetch failed");
                    job.sources.push(Source::failed(&id, &hit.url, e.to_string()));
                    let event = job
                        .event(EventType::FetchFailed, format!("{id} {}", hit.url))
                        .with_duration(elapsed_ms)
                        .with_error(e.to_string());
                    job.push_event(event);
                }
            }
        }
        fetched
    }

    fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.fetch_timeout_seconds)
    }

    /// Extract, validate and accept evidence from newly fetched sources.
    /// Returns whether the extractor considers research complete.
    async fn extract(&self, job: &mut Job, new_sources: &[String]) -> Result<bool, ResearchError> {
        let sources: Vec<Source> = job
            .sources
            .iter()
            .filter(|s| new_sources.contains(&s.id) && s.has_content())
            .cloned()
            .collect();
        if sources.is_empty() {
            debug!(iteration = job.iteration, "Nothing new to extract");
            return Ok(false);
        }

        let point = AnalysisPoint::EvidenceExtraction;
        let chars = sources.iter().map(|s| self.clip(s.text.len())).sum::<usize>()
            + job.claims.iter().map(|c| c.text.len()).sum::<usize>();
        let affordable = self.can_afford(job, point, chars);

        let analyzed = {
            let input = ExtractionInput {
                claims: &job.claims,
                contexts: &job.contexts,
                sources: &sources,
            };
            if affordable {
                self.analysis.extract_evidence(input).await
            } else {
                self.analysis.run_local(point, |h| Ok(h.extract(input)))
            }
        };
        let analyzed = analyzed.inspect_err(|e| self.charge_failure(job, e))?;
        self.account(job, point, &analyzed);

        let research_complete = analyzed.value.research_complete;
        let first_context = job
            .contexts
            .first()
            .map(|c| c.id.clone())
            .unwrap_or_else(|| MAIN_CONTEXT_ID.to_string());

        let mut candidates = Vec::with_capacity(analyzed.value.items.len());
        for mut item in analyzed.value.items {
            item.id = job.next_evidence_id();
            job.extracted_count += 1;
            if !job.contexts.iter().any(|c| c.id == item.context_id) {
                job.warn(format!(
                    "Evidence referenced unknown context '{}'; assigned to '{}'",
                    item.context_id, first_context
                ));
                item.context_id = first_context.clone();
            }
            candidates.push(item);
        }
        let extracted = candidates.len();

        let report = self.provenance.validate(candidates, &job.sources);
        let rejected = report.invalid.len();
        job.rejected_count += rejected;
        for rejection in &report.invalid {
            warn!(evidence_id = %rejection.item.id, reason = %rejection.reason, "Evidence rejected by provenance gate");
            job.record(
                EventType::EvidenceRejected,
                format!("{}: {}", rejection.item.id, rejection.reason),
            );
        }
        if report.loose_matches > 0 {
            debug!(loose = report.loose_matches, "Evidence accepted on punctuation-insensitive match");
        }

        let mut fresh: Vec<EvidenceItem> = Vec::new();
        for item in report.valid {
            let duplicate = job
                .evidence
                .iter()
                .chain(fresh.iter())
                .any(|e| e.source_id == item.source_id && same_excerpt(&e.excerpt, &item.excerpt));
            if !duplicate {
                fresh.push(item);
            }
        }

        let mut accepted = if fresh.is_empty() {
            fresh
        } else {
            self.filter_quality(job, fresh).await
        };

        let room = self.settings.evidence_cap.saturating_sub(job.evidence.len());
        if accepted.len() > room {
            let dropped = accepted.len() - room;
            accepted.truncate(room);
            job.warn(format!(
                "Evidence cap of {} reached; {dropped} items dropped",
                self.settings.evidence_cap
            ));
        }

        if !accepted.is_empty() {
            let ids: Vec<&str> = accepted.iter().map(|e| e.id.as_str()).collect();
            let summary = format!("Accepted {} of {} extracted items: {}", accepted.len(), extracted, ids.join(", "));
            job.record(EventType::EvidenceAccepted, summary);
        }
        info!(
            iteration = job.iteration,
            extracted,
            rejected,
            accepted = accepted.len(),
            "Evidence extraction complete"
        );

        job.evidence.extend(accepted);
        Ok(research_complete)
    }

    /// Drop items rated too weak. A failed quality check keeps every item.
    async fn filter_quality(&self, job: &mut Job, items: Vec<EvidenceItem>) -> Vec<EvidenceItem> {
        let point = AnalysisPoint::EvidenceQuality;
        let chars = items.iter().map(|e| e.statement.len() + e.excerpt.len()).sum();

        let analyzed = if self.can_afford(job, point, chars) {
            self.analysis.assess_quality(&items).await
        } else {
            self.analysis.run_local(point, |h| Ok(h.rate(&items)))
        };
        let ratings = match analyzed {
            Ok(analyzed) => {
                self.account(job, point, &analyzed);
                analyzed.value
            }
            Err(e) => {
                self.charge_failure(job, &e);
                warn!(error = %e, "Evidence quality check failed; keeping items unrated");
                job.warn("Evidence quality check failed; items kept unrated");
                return items;
            }
        };

        let mut kept = Vec::with_capacity(items.len());
        for item in items {
            let rating = ratings.iter().find(|r| r.evidence_id == item.id);
            match rating {
                Some(r) if r.quality == EvidenceQuality::Filtered => {
                    let reason = r.reason.clone().unwrap_or_else(|| "low quality".to_string());
                    debug!(evidence_id = %item.id, reason = %reason, "Evidence filtered by quality check");
                    job.record(EventType::EvidenceRejected, format!("{}: quality: {reason}", item.id));
                }
                _ => kept.push(item),
            }
        }
        kept
    }

    // ------------------------------------------------------------------------
    // Verdicts
    // ------------------------------------------------------------------------

    async fn generate_verdicts(&self, job: &mut Job) -> Result<Vec<ClaimVerdict>, ResearchError> {
        job.enter(ResearchPhase::Verdict);
        let claims = job.claims.clone();
        let mut verdicts = Vec::with_capacity(claims.len());

        for claim in &claims {
            let context = job
                .contexts
                .iter()
                .find(|c| c.id == claim.context_id)
                .or_else(|| job.contexts.first())
                .cloned()
                .unwrap_or_else(|| AnalysisContext::main(""));
            let evidence: Vec<EvidenceItem> = job
                .evidence
                .iter()
                .filter(|e| e.context_id == claim.context_id)
                .cloned()
                .collect();
            let input = VerdictInput {
                claim,
                context: &context,
                evidence: &evidence,
            };

            let point = AnalysisPoint::VerdictGeneration;
            let chars = claim.text.len() + evidence_chars(&evidence);
            let analyzed = if self.can_afford(job, point, chars) {
                self.analysis.generate_verdict(input).await
            } else {
                self.analysis.run_local(point, |h| Ok(h.verdict(input)))
            };
            let analyzed = analyzed.inspect_err(|e| self.charge_failure(job, e))?;
            self.account(job, point, &analyzed);
            let mut verdict = analyzed.value;

            self.validate_verdict(job, input, &mut verdict).await;

            if self.aggregator.settings().enable_reliability_weighting {
                self.aggregator.apply_reliability(&mut verdict, &job.evidence, &job.sources);
            }

            debug!(
                claim_id = %verdict.claim_id,
                truth = verdict.truth_percentage,
                confidence = verdict.confidence,
                "Claim verdict"
            );
            verdicts.push(verdict);
        }

        Ok(verdicts)
    }

    async fn validate_verdict(&self, job: &mut Job, input: VerdictInput<'_>, verdict: &mut ClaimVerdict) {
        let point = AnalysisPoint::VerdictValidation;
        let chars = input.claim.text.len() + verdict.reasoning.len() + evidence_chars(input.evidence);

        let analyzed = if self.can_afford(job, point, chars) {
            self.analysis.validate_verdict(input, &*verdict).await
        } else {
            self.analysis.run_local(point, |h| Ok(h.check(input, &*verdict)))
        };

        match analyzed {
            Ok(analyzed) => {
                self.account(job, point, &analyzed);
                let check = analyzed.value;
                if let (false, Some(adjusted)) = (check.consistent, check.adjusted_truth) {
                    let adjusted = adjusted.min(100);
                    warn!(
                        claim_id = %verdict.claim_id,
                        from = verdict.truth_percentage,
                        to = adjusted,
                        "Verdict adjusted by validation"
                    );
                    job.record(
                        EventType::VerdictAdjusted,
                        format!(
                            "{}: {} -> {} ({})",
                            verdict.claim_id, verdict.truth_percentage, adjusted, check.note
                        ),
                    );
                    verdict.truth_percentage = adjusted;
                }
            }
            Err(e) => {
                self.charge_failure(job, &e);
                warn!(claim_id = %verdict.claim_id, error = %e, "Verdict validation failed");
                job.warn(format!("Verdict validation failed for {}", verdict.claim_id));
            }
        }
    }

    fn complete(&self, job: &mut Job, classification: InputClassification, verdicts: Vec<ClaimVerdict>) -> JobResult {
        job.enter(ResearchPhase::Aggregate);
        let context_verdicts = self.aggregator.aggregate_by_context(&verdicts, &job.contexts);
        let overall = self
            .aggregator
            .aggregate(&verdicts)
            .unwrap_or_else(|| neutral_verdict(&verdicts));
        let summary = summarize(job, &verdicts, &overall);

        job.enter(ResearchPhase::Done);
        job.record(
            EventType::JobCompleted,
            format!(
                "{} ({}% true, {}% confidence)",
                overall.label, overall.truth_percentage, overall.confidence
            ),
        );
        info!(
            label = %overall.label,
            truth = overall.truth_percentage,
            confidence = overall.confidence,
            evidence = job.evidence.len(),
            "Verification job completed"
        );

        self.result(job, Some(classification), verdicts, context_verdicts, overall, summary, false)
    }

    /// The fail-safe result for a job without usable evidence
    fn fallback(&self, job: &mut Job, classification: InputClassification) -> JobResult {
        job.enter(ResearchPhase::FallbackResult);
        warn!(
            extracted = job.extracted_count,
            budget_exceeded = job.budget.exceeded,
            "No usable evidence; returning low-confidence result"
        );
        job.warn(INSUFFICIENT_EVIDENCE);

        let verdicts: Vec<ClaimVerdict> = job
            .claims
            .iter()
            .map(|claim| ClaimVerdict {
                claim_id: claim.id.clone(),
                context_id: claim.context_id.clone(),
                truth_percentage: FALLBACK_TRUTH,
                confidence: FALLBACK_CONFIDENCE,
                reasoning: INSUFFICIENT_EVIDENCE.to_string(),
                supporting_evidence_ids: Vec::new(),
                centrality: claim.centrality,
                harm_potential: claim.harm_potential,
                is_contested: false,
                factual_basis: FactualBasis::Unknown,
                reliability_adjusted: false,
            })
            .collect();
        let context_verdicts = self.aggregator.aggregate_by_context(&verdicts, &job.contexts);
        let overall = neutral_verdict(&verdicts);
        let summary = summarize(job, &verdicts, &overall);

        job.record(EventType::JobDegraded, INSUFFICIENT_EVIDENCE);
        self.result(job, Some(classification), verdicts, context_verdicts, overall, summary, true)
    }

    #[allow(clippy::too_many_arguments)]
    fn result(
        &self,
        job: &Job,
        classification: Option<InputClassification>,
        claim_verdicts: Vec<ClaimVerdict>,
        context_verdicts: Vec<ContextVerdict>,
        verdict: AggregateVerdict,
        summary: String,
        degraded: bool,
    ) -> JobResult {
        JobResult {
            job_id: job.id,
            input: job.input.clone(),
            input_kind: job.input_kind,
            classification,
            claims: job.claims.clone(),
            contexts: job.contexts.clone(),
            sources: job.sources.clone(),
            evidence: job.evidence.clone(),
            claim_verdicts,
            context_verdicts,
            verdict,
            summary,
            degraded,
            warnings: job.warnings.clone(),
            budget_stats: self.governor.stats(&job.budget),
            events: job.events.clone(),
            started_at: job.started_at,
            completed_at: chrono::Utc::now(),
        }
    }
}

fn looks_like_url(input: &str) -> bool {
    let lower = input.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn describe_context(context: &AnalysisContext) -> String {
    if context.subject.is_empty() {
        context.name.clone()
    } else {
        format!("{}: {}", context.name, context.subject)
    }
}

fn same_excerpt(a: &str, b: &str) -> bool {
    let normalize = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    normalize(a) == normalize(b)
}

fn evidence_chars(evidence: &[EvidenceItem]) -> usize {
    evidence
        .iter()
        .map(|e| e.statement.len() + e.excerpt.len() + e.source_url.len())
        .sum()
}

/// Ensure at least one context, unique context ids, and that every claim
/// points at a known context. Unknown references go to the first context.
pub fn normalize_contexts(job: &mut Job) {
    let mut seen = HashSet::new();
    job.contexts.retain(|c| !c.id.trim().is_empty() && seen.insert(c.id.clone()));

    if job.contexts.is_empty() {
        let subject: String = job.analysis_text.chars().take(120).collect();
        job.contexts.push(AnalysisContext::main(subject));
    }

    let first = job.contexts[0].id.clone();
    let mut reassigned = Vec::new();
    for claim in job.claims.iter_mut() {
        if !job.contexts.iter().any(|c| c.id == claim.context_id) {
            reassigned.push(format!(
                "Claim {} referenced unknown context '{}'; assigned to '{}'",
                claim.id, claim.context_id, first
            ));
            claim.context_id = first.clone();
        }
    }
    for warning in reassigned {
        warn!("{}", warning);
        job.warn(warning);
    }
}

/// Deduplicate queries, falling back to claim texts when there are none
pub fn normalize_queries(job: &mut Job) {
    let candidates: Vec<String> = if job.queries.iter().any(|q| !q.trim().is_empty()) {
        std::mem::take(&mut job.queries)
    } else {
        job.claims.iter().map(|c| c.text.clone()).collect()
    };

    let mut queries: Vec<String> = Vec::new();
    for query in candidates {
        let query = query.trim().to_string();
        if !query.is_empty() && !queries.iter().any(|q| q.eq_ignore_ascii_case(&query)) {
            queries.push(query);
        }
    }
    job.queries = queries;
}

fn neutral_verdict(verdicts: &[ClaimVerdict]) -> AggregateVerdict {
    AggregateVerdict {
        truth_percentage: FALLBACK_TRUTH,
        confidence: FALLBACK_CONFIDENCE,
        label: VerdictLabel::from_truth(FALLBACK_TRUTH, FALLBACK_CONFIDENCE),
        primary_claim_id: select_primary(verdicts).map(|v| v.claim_id.clone()),
        claim_count: verdicts.len(),
    }
}

fn summarize(job: &Job, verdicts: &[ClaimVerdict], overall: &AggregateVerdict) -> String {
    let mut summary = format!(
        "{} ({}% true, {}% confidence) across {} claim(s)",
        overall.label, overall.truth_percentage, overall.confidence, overall.claim_count
    );

    let primary = overall
        .primary_claim_id
        .as_ref()
        .and_then(|id| job.claims.iter().find(|c| &c.id == id));
    if let Some(claim) = primary {
        if let Some(verdict) = verdicts.iter().find(|v| v.claim_id == claim.id) {
            summary.push_str(&format!(
                ". Key claim: \"{}\" rated {}% true",
                claim.text, verdict.truth_percentage
            ));
        }
    }

    let sources = job.sources.iter().filter(|s| s.fetch_success).count();
    summary.push_str(&format!(
        ". Based on {} evidence item(s) from {} source(s).",
        job.evidence.len(),
        sources
    ));
    summary
}

async fn search_with_timeout(
    provider: &dyn SearchProvider,
    request: &SearchRequest,
) -> Result<SearchResponse, ProviderError> {
    match tokio::time::timeout(request.timeout, provider.search(request)).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::timeout(
            provider.name(),
            format!("search '{}' timed out after {:?}", request.query, request.timeout),
        )),
    }
}

async fn fetch_with_timeout(
    fetcher: Arc<dyn Fetcher>,
    url: String,
    timeout: Duration,
    max_length: usize,
) -> Result<FetchedDocument, ProviderError> {
    match tokio::time::timeout(timeout, fetcher.fetch(&url, timeout, max_length)).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::timeout(
            fetcher.name(),
            format!("fetch of {url} timed out after {timeout:?}"),
        )),
    }
}
