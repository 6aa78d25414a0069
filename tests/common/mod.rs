//! Test collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use claimcheck::adapters::{
    FetchedDocument, Fetcher, ProviderError, Reasoner, ReasoningOutput, ReasoningRequest, SearchHit,
    SearchProvider, SearchRequest, SearchResponse,
};
use claimcheck::analysis::{AnalysisMetrics, AnalysisSettings, HybridAnalysis, RemoteAnalysis, RemoteToggles, RetryPolicy};
use claimcheck::core::{ControllerConfig, ProviderHealthMonitor, ResearchController};

pub const BRIDGE_CLAIM: &str = "The Golden Gate Bridge opened to traffic in 1937.";

pub const HISTORY_URL: &str = "https://history.example.org/golden-gate";
pub const NEWS_URL: &str = "https://news.example.net/bridge-anniversary";

pub const HISTORY_TEXT: &str = "The Golden Gate Bridge opened to traffic on May 28, 1937. \
It was the longest suspension bridge in the world at the time.";
pub const NEWS_TEXT: &str = "Engineers confirmed the Golden Gate Bridge opened in 1937 after four years of construction. \
Visitors still cross it every day.";

/// Returns the same hits for every query
pub struct StaticSearch {
    hits: Vec<SearchHit>,
    calls: AtomicUsize,
}

impl StaticSearch {
    pub fn new(urls: &[&str]) -> Self {
        Self {
            hits: urls
                .iter()
                .map(|url| SearchHit {
                    url: url.to_string(),
                    title: String::new(),
                    snippet: String::new(),
                })
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchProvider for StaticSearch {
    fn name(&self) -> &str {
        "static"
    }

    async fn search(&self, _request: &SearchRequest) -> Result<SearchResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(SearchResponse {
            provider: "static".to_string(),
            results: self.hits.clone(),
            provider_errors: Vec::new(),
        })
    }
}

/// Serves fixed documents by URL; unknown URLs fail
pub struct MapFetcher {
    documents: HashMap<String, String>,
}

impl MapFetcher {
    pub fn new(documents: &[(&str, &str)]) -> Self {
        Self {
            documents: documents
                .iter()
                .map(|(url, text)| (url.to_string(), text.to_string()))
                .collect(),
        }
    }

    pub fn bridge() -> Self {
        Self::new(&[(HISTORY_URL, HISTORY_TEXT), (NEWS_URL, NEWS_TEXT)])
    }
}

#[async_trait]
impl Fetcher for MapFetcher {
    fn name(&self) -> &str {
        "map"
    }

    async fn fetch(&self, url: &str, _timeout: Duration, max_length: usize) -> Result<FetchedDocument, ProviderError> {
        match self.documents.get(url) {
            Some(text) => Ok(FetchedDocument {
                text: text.chars().take(max_length).collect(),
                title: String::new(),
            }),
            None => Err(ProviderError::from_status("map", 404, format!("no document at {url}"))),
        }
    }
}

/// Replays scripted responses in order, then repeats the last one
pub struct ScriptedReasoner {
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    last: Mutex<Option<Result<String, ProviderError>>>,
    calls: AtomicUsize,
}

impl ScriptedReasoner {
    pub fn new(script: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// Always answers with the same content
    pub fn always(content: &str) -> Self {
        Self::new(vec![Ok(content.to_string())])
    }

    /// Always fails with the same error
    pub fn failing(error: ProviderError) -> Self {
        Self::new(vec![Err(error)])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _request: &ReasoningRequest, _timeout: Duration) -> Result<ReasoningOutput, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = {
            let mut script = self.script.lock().unwrap();
            let mut last = self.last.lock().unwrap();
            match script.pop_front() {
                Some(step) => {
                    *last = Some(step.clone());
                    step
                }
                None => last
                    .clone()
                    .unwrap_or_else(|| Err(ProviderError::unknown("scripted", "empty script"))),
            }
        };
        next.map(|content| ReasoningOutput {
            content,
            tokens_used: Some(500),
        })
    }
}

/// Analysis settings with instant retries
pub fn fast_settings(remote: RemoteToggles) -> AnalysisSettings {
    AnalysisSettings {
        remote,
        retry: RetryPolicy {
            max_attempts: 3,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
        },
        ..AnalysisSettings::default()
    }
}

pub struct Harness {
    pub controller: ResearchController,
    pub search: Arc<StaticSearch>,
    pub health: Arc<ProviderHealthMonitor>,
    pub metrics: Arc<AnalysisMetrics>,
}

/// Controller over the given collaborators
pub fn harness(
    search: StaticSearch,
    fetcher: MapFetcher,
    reasoner: Option<(Arc<dyn Reasoner>, RemoteToggles)>,
    config: ControllerConfig,
) -> Harness {
    let search = Arc::new(search);
    let health = Arc::new(ProviderHealthMonitor::default());
    let metrics = Arc::new(AnalysisMetrics::default());

    let analysis = match reasoner {
        Some((reasoner, toggles)) => {
            let settings = fast_settings(toggles);
            let remote = RemoteAnalysis::new(reasoner, &settings);
            HybridAnalysis::new(Some(remote), &settings, Arc::clone(&health), Arc::clone(&metrics))
        }
        None => HybridAnalysis::heuristic_only(Arc::clone(&health), Arc::clone(&metrics)),
    };

    let controller = ResearchController::new(
        Arc::clone(&search) as Arc<dyn SearchProvider>,
        Arc::new(fetcher),
        Arc::new(analysis),
        Arc::clone(&health),
        config,
    );

    Harness {
        controller,
        search,
        health,
        metrics,
    }
}
