//! Hybrid Analysis Integration Tests
//!
//! Retry, fallback and metric recording of the remote-first analysis service.

mod common;

use std::sync::Arc;

use claimcheck::adapters::{ProviderError, ProviderErrorKind, ProviderKind, Reasoner};
use claimcheck::analysis::{
    AnalysisError, AnalysisMetrics, AnalysisPoint, AnalysisService, HybridAnalysis, InputClassification, InputType,
    RemoteAnalysis, RemoteToggles,
};
use claimcheck::core::{BreakerSettings, CircuitState, ProviderHealthMonitor};

use common::{fast_settings, ScriptedReasoner};

const CLASSIFICATION: &str = r#"{"input_type": "question", "sentence_count": 1}"#;

struct Setup {
    analysis: HybridAnalysis,
    reasoner: Arc<ScriptedReasoner>,
    health: Arc<ProviderHealthMonitor>,
    metrics: Arc<AnalysisMetrics>,
}

fn setup(reasoner: ScriptedReasoner, toggles: RemoteToggles) -> Setup {
    setup_with_health(reasoner, toggles, ProviderHealthMonitor::default())
}

fn setup_with_health(reasoner: ScriptedReasoner, toggles: RemoteToggles, health: ProviderHealthMonitor) -> Setup {
    let reasoner = Arc::new(reasoner);
    let health = Arc::new(health);
    let metrics = Arc::new(AnalysisMetrics::default());
    let settings = fast_settings(toggles);
    let remote = RemoteAnalysis::new(Arc::clone(&reasoner) as Arc<dyn Reasoner>, &settings);
    let analysis = HybridAnalysis::new(Some(remote), &settings, Arc::clone(&health), Arc::clone(&metrics));

    Setup {
        analysis,
        reasoner,
        health,
        metrics,
    }
}

#[tokio::test]
async fn test_timeout_is_retried_then_succeeds() {
    let s = setup(
        ScriptedReasoner::new(vec![
            Err(ProviderError::timeout("scripted", "deadline")),
            Ok(CLASSIFICATION.to_string()),
        ]),
        RemoteToggles::default(),
    );

    let analyzed = s.analysis.classify_input("Is the bridge orange").await.unwrap();

    assert_eq!(analyzed.value.input_type, InputType::Question);
    assert!(!analyzed.used_fallback);
    assert_eq!(analyzed.tokens_used, 500);
    assert_eq!(analyzed.reasoning_calls, 2);
    assert_eq!(s.reasoner.calls(), 2);

    let records = s.metrics.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].retries, 1);
    assert!(records[0].success);
    // timeouts never count against provider health
    assert_eq!(s.health.circuit_state(ProviderKind::Reasoning), CircuitState::Closed);
}

#[tokio::test]
async fn test_exhausted_rate_limit_falls_back_to_heuristic() {
    let s = setup(
        ScriptedReasoner::failing(ProviderError::rate_limited("scripted", "429")),
        RemoteToggles::default(),
    );

    let analyzed = s.analysis.classify_input("Is the bridge orange?").await.unwrap();

    assert!(analyzed.used_fallback);
    assert_eq!(analyzed.tokens_used, 0);
    assert_eq!(analyzed.reasoning_calls, 3);
    assert_eq!(analyzed.value.input_type, InputType::Question);
    assert_eq!(s.reasoner.calls(), 3);

    let record = &s.metrics.records()[0];
    assert_eq!(record.retries, 2);
    assert!(record.used_fallback);
}

#[tokio::test]
async fn test_unparseable_output_is_not_retried() {
    let s = setup(ScriptedReasoner::always("I cannot answer that."), RemoteToggles::default());

    let analyzed = s.analysis.classify_input("The bridge opened in 1937.").await.unwrap();

    assert!(analyzed.used_fallback);
    assert_eq!(analyzed.value.input_type, InputType::Claim);
    assert_eq!(s.reasoner.calls(), 1);
    // the unusable answer was still billed
    assert_eq!(analyzed.tokens_used, 500);
    assert_eq!(analyzed.reasoning_calls, 1);
}

#[tokio::test]
async fn test_fenced_output_is_repaired() {
    let fenced = format!("Here you go:\n```json\n{}\n```", CLASSIFICATION);
    let s = setup(ScriptedReasoner::always(&fenced), RemoteToggles::default());

    let analyzed = s.analysis.classify_input("Is the bridge orange?").await.unwrap();

    assert!(!analyzed.used_fallback);
    assert_eq!(analyzed.value.input_type, InputType::Question);
}

#[tokio::test]
async fn test_disabled_point_never_calls_remote() {
    let s = setup(ScriptedReasoner::always(CLASSIFICATION), RemoteToggles::all(false));

    assert!(!s.analysis.uses_remote(AnalysisPoint::InputClassification));
    assert_eq!(s.analysis.estimate_tokens(AnalysisPoint::InputClassification, 4000), 0);

    let analyzed = s.analysis.classify_input("The bridge opened in 1937.").await.unwrap();
    assert!(!analyzed.used_fallback);
    assert_eq!(s.reasoner.calls(), 0);
    assert_eq!(s.metrics.len(), 1);
}

#[tokio::test]
async fn test_open_circuit_skips_remote() {
    let s = setup(ScriptedReasoner::always(CLASSIFICATION), RemoteToggles::default());
    for _ in 0..3 {
        s.health
            .record_failure(ProviderKind::Reasoning, ProviderErrorKind::ProviderOutage, "down");
    }

    let analyzed = s.analysis.classify_input("Is the bridge orange?").await.unwrap();

    assert!(analyzed.used_fallback);
    assert_eq!(s.reasoner.calls(), 0);
    assert_eq!(analyzed.reasoning_calls, 0);
}

#[tokio::test]
async fn test_unusable_half_open_answer_frees_the_trial_slot() {
    let health = ProviderHealthMonitor::new(BreakerSettings {
        failure_threshold: 1,
        pause_on_open: false,
        ..Default::default()
    });
    let s = setup_with_health(
        ScriptedReasoner::new(vec![Ok("not json".to_string()), Ok(CLASSIFICATION.to_string())]),
        RemoteToggles::default(),
        health,
    );
    s.health
        .record_failure(ProviderKind::Reasoning, ProviderErrorKind::ProviderOutage, "down");
    s.health.probe(ProviderKind::Reasoning);

    let first = s.analysis.classify_input("Is the bridge orange?").await.unwrap();
    assert!(first.used_fallback);
    assert_eq!(s.health.circuit_state(ProviderKind::Reasoning), CircuitState::HalfOpen);

    // the next call is admitted as the new trial and closes the circuit
    let second = s.analysis.classify_input("Is the bridge orange?").await.unwrap();
    assert!(!second.used_fallback);
    assert_eq!(s.reasoner.calls(), 2);
    assert_eq!(s.health.circuit_state(ProviderKind::Reasoning), CircuitState::Closed);
}

#[tokio::test]
async fn test_heuristic_failure_surfaces_remote_error() {
    let s = setup(
        ScriptedReasoner::failing(ProviderError::outage("scripted", "503")),
        RemoteToggles::default(),
    );
    let classification = InputClassification {
        input_type: InputType::Claim,
        sentence_count: 1,
    };

    // nothing long enough to be a claim
    let err = s.analysis.decompose("Yes.", &classification).await.unwrap_err();

    assert!(matches!(err, AnalysisError::Provider(ref e) if e.kind == ProviderErrorKind::ProviderOutage));
    let record = &s.metrics.records()[0];
    assert!(!record.success);
    assert!(record.used_fallback);
}
