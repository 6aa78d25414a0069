//! Provider Health Integration Tests
//!
//! Circuit transitions, system pause and outage notification.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use claimcheck::adapters::{Notification, Notifier, ProviderErrorKind, ProviderKind};
use claimcheck::core::{BreakerSettings, CircuitState, ProviderHealthMonitor};

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Never answers; the monitor must not wait for it
struct HangingNotifier;

#[async_trait]
impl Notifier for HangingNotifier {
    async fn notify(&self, _notification: &Notification) -> anyhow::Result<()> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

fn trip(monitor: &ProviderHealthMonitor, kind: ProviderKind) -> Vec<bool> {
    (0..3)
        .map(|_| monitor.record_failure(kind, ProviderErrorKind::ProviderOutage, "quota exhausted"))
        .collect()
}

#[tokio::test]
async fn test_outage_pauses_system_and_notifies_once() {
    let notifier = Arc::new(RecordingNotifier::default());
    let monitor = ProviderHealthMonitor::new(BreakerSettings::default()).with_notifier(notifier.clone());

    assert_eq!(trip(&monitor, ProviderKind::Search), vec![false, false, true]);
    assert!(monitor.is_system_paused());
    assert!(!monitor.can_call(ProviderKind::Search));
    // the pause blocks every provider, not only the failed one
    assert!(monitor.is_provider_healthy(ProviderKind::Reasoning));
    assert!(!monitor.can_call(ProviderKind::Reasoning));

    // further failures on an open circuit do not notify again
    monitor.record_failure(ProviderKind::Search, ProviderErrorKind::ProviderOutage, "still down");

    tokio::time::sleep(Duration::from_millis(50)).await;
    let sent = notifier.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].provider, ProviderKind::Search);
    assert_eq!(sent[0].event, "provider_circuit_open");
}

#[tokio::test]
async fn test_hanging_notifier_does_not_block_failure_recording() {
    let monitor = ProviderHealthMonitor::new(BreakerSettings {
        notify_timeout_seconds: 1,
        ..Default::default()
    })
    .with_notifier(Arc::new(HangingNotifier));

    let tripped = tokio::time::timeout(Duration::from_millis(200), async { trip(&monitor, ProviderKind::Reasoning) })
        .await
        .unwrap();
    assert_eq!(tripped, vec![false, false, true]);
}

#[tokio::test]
async fn test_probe_and_resume() {
    let monitor = ProviderHealthMonitor::default();
    trip(&monitor, ProviderKind::Reasoning);
    assert_eq!(monitor.circuit_state(ProviderKind::Reasoning), CircuitState::Open);

    monitor.probe(ProviderKind::Reasoning);
    assert_eq!(monitor.circuit_state(ProviderKind::Reasoning), CircuitState::HalfOpen);
    // still paused until an operator resumes
    assert!(monitor.is_system_paused());

    monitor.resume();
    assert!(!monitor.is_system_paused());
    assert_eq!(monitor.circuit_state(ProviderKind::Reasoning), CircuitState::Closed);
    assert!(monitor.can_call(ProviderKind::Reasoning));

    let snapshot = monitor.snapshot();
    assert!(!snapshot.paused);
    assert!(snapshot
        .providers
        .iter()
        .all(|p| p.state == CircuitState::Closed && p.consecutive_failures == 0));
}

#[tokio::test]
async fn test_concurrent_failures_count_exactly() {
    let monitor = Arc::new(ProviderHealthMonitor::new(BreakerSettings {
        failure_threshold: 50,
        pause_on_open: false,
        ..Default::default()
    }));

    let mut tasks = Vec::new();
    for _ in 0..49 {
        let monitor = Arc::clone(&monitor);
        tasks.push(tokio::spawn(async move {
            monitor.record_failure(ProviderKind::Search, ProviderErrorKind::RateLimit, "429")
        }));
    }
    for task in tasks {
        assert!(!task.await.unwrap());
    }

    let search = monitor
        .snapshot()
        .providers
        .into_iter()
        .find(|p| p.provider == ProviderKind::Search)
        .unwrap();
    assert_eq!(search.consecutive_failures, 49);
    assert_eq!(search.state, CircuitState::Closed);
    assert!(monitor.record_failure(ProviderKind::Search, ProviderErrorKind::RateLimit, "429"));
}
