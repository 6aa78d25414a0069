//! Provider health monitor.
//!
//! One circuit breaker per provider class (search, reasoning), shared by
//! every job in the process:
//!
//! ```text
//! closed --N consecutive failures--> open --cooldown / probe--> half_open
//!   ^                                                             |
//!   +----------------------- success -----------------------------+
//!                                       failure: half_open --> open
//! ```
//!
//! A half-open circuit admits a single trial call at a time. The slot is
//! freed by the next recorded outcome for that provider, or after one
//! cooldown if the caller never reports back.
//!
//! A closed -> open transition pauses the whole system and fires a
//! best-effort webhook notification. Only an explicit `resume()` clears
//! the pause and resets every circuit.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::adapters::{Notification, Notifier, ProviderErrorKind, ProviderKind};

/// Circuit breaker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSettings {
    /// Consecutive failures that open a circuit (default: 3)
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds an open circuit waits before admitting a trial call (default: 300)
    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: u64,

    /// Pause the system when a circuit opens (default: true)
    #[serde(default = "default_pause_on_open")]
    pub pause_on_open: bool,

    /// Webhook notification timeout in seconds (default: 5)
    #[serde(default = "default_notify_timeout")]
    pub notify_timeout_seconds: u64,
}

fn default_failure_threshold() -> u32 {
    3
}
fn default_cooldown() -> u64 {
    300
}
fn default_pause_on_open() -> bool {
    true
}
fn default_notify_timeout() -> u64 {
    5
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_seconds: default_cooldown(),
            pause_on_open: default_pause_on_open(),
            notify_timeout_seconds: default_notify_timeout(),
        }
    }
}

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow normally
    Closed,
    /// Calls are rejected
    Open,
    /// A single trial call is admitted until its outcome is recorded
    HalfOpen,
}

/// Breaker for a single provider class
#[derive(Debug, Clone)]
struct CircuitBreaker {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_started: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
}

impl CircuitBreaker {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            trial_started: None,
            last_failure_at: None,
            last_success_at: None,
        }
    }

    /// Record a failure. Returns the previous state when this call opened
    /// the circuit.
    fn record_failure(&mut self, threshold: u32) -> Option<CircuitState> {
        self.trial_started = None;
        self.last_failure_at = Some(Utc::now());
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= threshold {
                    self.open();
                    return Some(CircuitState::Closed);
                }
                None
            }
            CircuitState::HalfOpen => {
                // Failed trial reopens the circuit
                self.consecutive_failures += 1;
                self.open();
                Some(CircuitState::HalfOpen)
            }
            CircuitState::Open => {
                self.consecutive_failures += 1;
                None
            }
        }
    }

    /// Record a success. Returns true when it closed a half-open circuit.
    fn record_success(&mut self) -> bool {
        self.trial_started = None;
        self.last_success_at = Some(Utc::now());
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures = 0;
                false
            }
            CircuitState::HalfOpen => {
                self.close();
                true
            }
            CircuitState::Open => false,
        }
    }

    fn open(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        self.trial_started = None;
    }

    fn half_open(&mut self) {
        self.state = CircuitState::HalfOpen;
        self.trial_started = None;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.trial_started = None;
    }

    /// Move an open circuit to half-open once its cooldown has elapsed
    fn refresh(&mut self, kind: ProviderKind, cooldown: Duration) {
        if self.state == CircuitState::Open && self.cooldown_elapsed(cooldown) {
            self.half_open();
            info!(provider = %kind, "Circuit cooldown elapsed, moving to half-open");
        }
    }

    /// Half-open trial slot is free (an abandoned trial expires after `lease`)
    fn trial_free(&self, lease: Duration) -> bool {
        self.trial_started.map(|t| t.elapsed() >= lease).unwrap_or(true)
    }

    fn admits(&self, lease: Duration) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => self.trial_free(lease),
            CircuitState::Open => false,
        }
    }

    fn cooldown_elapsed(&self, cooldown: Duration) -> bool {
        self.opened_at.map(|t| t.elapsed() >= cooldown).unwrap_or(true)
    }
}

/// Shared mutable state behind one lock
#[derive(Debug)]
struct HealthState {
    circuits: HashMap<ProviderKind, CircuitBreaker>,
    paused_reason: Option<String>,
    paused_at: Option<DateTime<Utc>>,
}

/// Serializable view of one provider's circuit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub provider: ProviderKind,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
}

/// Serializable view of the whole monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub paused: bool,
    pub paused_reason: Option<String>,
    pub paused_at: Option<DateTime<Utc>>,
    pub providers: Vec<ProviderHealth>,
}

/// Process-wide circuit breakers for the external provider classes
pub struct ProviderHealthMonitor {
    settings: BreakerSettings,
    state: Mutex<HealthState>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl Default for ProviderHealthMonitor {
    fn default() -> Self {
        Self::new(BreakerSettings::default())
    }
}

impl ProviderHealthMonitor {
    pub fn new(settings: BreakerSettings) -> Self {
        let circuits = ProviderKind::ALL
            .iter()
            .map(|k| (*k, CircuitBreaker::new()))
            .collect();
        Self {
            settings,
            state: Mutex::new(HealthState {
                circuits,
                paused_reason: None,
                paused_at: None,
            }),
            notifier: None,
        }
    }

    /// Attach an outage notifier
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    fn lock(&self) -> MutexGuard<'_, HealthState> {
        // Values are plain counters; a poisoned lock still holds usable state
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn cooldown(&self) -> Duration {
        Duration::from_secs(self.settings.cooldown_seconds)
    }

    /// Whether calls to this provider class could be attempted right now.
    ///
    /// An open circuit whose cooldown has elapsed moves to half-open here.
    /// This only inspects the circuit; `can_call` is what claims the
    /// half-open trial slot.
    pub fn is_provider_healthy(&self, kind: ProviderKind) -> bool {
        let cooldown = self.cooldown();
        let mut state = self.lock();
        let circuit = state.circuits.entry(kind).or_insert_with(CircuitBreaker::new);
        circuit.refresh(kind, cooldown);
        circuit.admits(cooldown)
    }

    pub fn is_system_paused(&self) -> bool {
        self.lock().paused_reason.is_some()
    }

    /// Not paused and the provider's circuit admits a call. A caller admitted
    /// through a half-open circuit holds its trial slot and must report the
    /// outcome through `record_success`, `record_failure` or `release`.
    pub fn can_call(&self, kind: ProviderKind) -> bool {
        let cooldown = self.cooldown();
        let mut state = self.lock();
        if state.paused_reason.is_some() {
            return false;
        }
        let circuit = state.circuits.entry(kind).or_insert_with(CircuitBreaker::new);
        circuit.refresh(kind, cooldown);
        if !circuit.admits(cooldown) {
            return false;
        }
        if circuit.state == CircuitState::HalfOpen {
            circuit.trial_started = Some(Instant::now());
            debug!(provider = %kind, "Half-open trial call admitted");
        }
        true
    }

    /// Free a held half-open trial slot without judging the provider
    pub fn release(&self, kind: ProviderKind) {
        if let Some(circuit) = self.lock().circuits.get_mut(&kind) {
            circuit.trial_started = None;
        }
    }

    pub fn circuit_state(&self, kind: ProviderKind) -> CircuitState {
        self.lock()
            .circuits
            .get(&kind)
            .map(|c| c.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn record_success(&self, kind: ProviderKind) {
        let mut state = self.lock();
        let circuit = state.circuits.entry(kind).or_insert_with(CircuitBreaker::new);
        if circuit.record_success() {
            info!(provider = %kind, "Trial call succeeded, circuit closed");
        }
    }

    /// Record a failed call. Returns true when this failure opened a closed
    /// circuit (and therefore paused the system, if configured).
    pub fn record_failure(&self, kind: ProviderKind, error_kind: ProviderErrorKind, message: &str) -> bool {
        if !error_kind.counts_against_health() {
            debug!(provider = %kind, error_kind = error_kind.as_str(), "Failure not counted against health");
            self.release(kind);
            return false;
        }

        let threshold = self.settings.failure_threshold;
        let tripped = {
            let mut state = self.lock();
            let circuit = state.circuits.entry(kind).or_insert_with(CircuitBreaker::new);
            let transition = circuit.record_failure(threshold);
            let failures = circuit.consecutive_failures;

            match transition {
                Some(CircuitState::Closed) => {
                    warn!(provider = %kind, failures, %message, "Circuit opened");
                    if self.settings.pause_on_open && state.paused_reason.is_none() {
                        state.paused_reason = Some(format!("{} provider circuit opened: {}", kind, message));
                        state.paused_at = Some(Utc::now());
                    }
                    true
                }
                Some(_) => {
                    warn!(provider = %kind, %message, "Trial call failed, circuit reopened");
                    false
                }
                None => {
                    debug!(provider = %kind, failures, threshold, "Provider failure recorded");
                    false
                }
            }
        };

        if tripped {
            self.notify(kind, message);
        }
        tripped
    }

    /// Admin probe trigger: move an open circuit to half-open now
    pub fn probe(&self, kind: ProviderKind) {
        let mut state = self.lock();
        if let Some(circuit) = state.circuits.get_mut(&kind) {
            if circuit.state == CircuitState::Open {
                circuit.half_open();
                info!(provider = %kind, "Circuit moved to half-open by probe");
            }
        }
    }

    /// Admin resume: close every circuit and clear the pause
    pub fn resume(&self) {
        let mut state = self.lock();
        for circuit in state.circuits.values_mut() {
            circuit.close();
        }
        state.paused_reason = None;
        state.paused_at = None;
        info!("Provider health reset, system resumed");
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let state = self.lock();
        let providers = ProviderKind::ALL
            .iter()
            .map(|kind| {
                let circuit = state.circuits.get(kind).cloned().unwrap_or_else(CircuitBreaker::new);
                ProviderHealth {
                    provider: *kind,
                    state: circuit.state,
                    consecutive_failures: circuit.consecutive_failures,
                    last_failure_at: circuit.last_failure_at,
                    last_success_at: circuit.last_success_at,
                }
            })
            .collect();

        HealthSnapshot {
            paused: state.paused_reason.is_some(),
            paused_reason: state.paused_reason.clone(),
            paused_at: state.paused_at,
            providers,
        }
    }

    /// Fire-and-forget outage notification
    fn notify(&self, kind: ProviderKind, message: &str) {
        let Some(notifier) = self.notifier.clone() else {
            return;
        };
        let notification = Notification {
            event: "provider_circuit_open".to_string(),
            provider: kind,
            message: message.to_string(),
            timestamp: Utc::now(),
        };
        let timeout = Duration::from_secs(self.settings.notify_timeout_seconds);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match tokio::time::timeout(timeout, notifier.notify(&notification)).await {
                        Ok(Ok(())) => debug!(provider = %notification.provider, "Outage notification sent"),
                        Ok(Err(e)) => warn!(error = %e, "Outage notification failed"),
                        Err(_) => warn!("Outage notification timed out"),
                    }
                });
            }
            Err(_) => warn!(provider = %kind, "No async runtime, outage notification skipped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(threshold: u32, cooldown_seconds: u64) -> ProviderHealthMonitor {
        ProviderHealthMonitor::new(BreakerSettings {
            failure_threshold: threshold,
            cooldown_seconds,
            ..Default::default()
        })
    }

    #[test]
    fn test_opens_at_threshold() {
        let m = monitor(3, 300);
        let outage = ProviderErrorKind::ProviderOutage;

        assert!(!m.record_failure(ProviderKind::Search, outage, "401"));
        assert!(!m.record_failure(ProviderKind::Search, outage, "401"));
        assert_eq!(m.circuit_state(ProviderKind::Search), CircuitState::Closed);

        assert!(m.record_failure(ProviderKind::Search, outage, "401"));
        assert_eq!(m.circuit_state(ProviderKind::Search), CircuitState::Open);
        assert!(!m.is_provider_healthy(ProviderKind::Search));
        assert!(m.is_system_paused());
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let m = monitor(3, 300);
        m.record_failure(ProviderKind::Reasoning, ProviderErrorKind::RateLimit, "429");
        m.record_failure(ProviderKind::Reasoning, ProviderErrorKind::RateLimit, "429");
        m.record_success(ProviderKind::Reasoning);
        m.record_failure(ProviderKind::Reasoning, ProviderErrorKind::RateLimit, "429");

        assert_eq!(m.circuit_state(ProviderKind::Reasoning), CircuitState::Closed);
    }

    #[test]
    fn test_timeouts_are_not_counted() {
        let m = monitor(1, 300);
        assert!(!m.record_failure(ProviderKind::Search, ProviderErrorKind::Timeout, "slow"));
        assert!(!m.record_failure(ProviderKind::Search, ProviderErrorKind::Unknown, "?"));
        assert_eq!(m.circuit_state(ProviderKind::Search), CircuitState::Closed);
    }

    #[test]
    fn test_providers_are_independent() {
        let m = monitor(1, 300);
        m.record_failure(ProviderKind::Search, ProviderErrorKind::ProviderOutage, "down");
        assert!(!m.is_provider_healthy(ProviderKind::Search));
        assert!(m.is_provider_healthy(ProviderKind::Reasoning));
    }

    #[test]
    fn test_half_open_success_closes() {
        let m = monitor(1, 0);
        m.record_failure(ProviderKind::Search, ProviderErrorKind::ProviderOutage, "down");

        // Zero cooldown: the next health check moves to half-open
        assert!(m.is_provider_healthy(ProviderKind::Search));
        assert_eq!(m.circuit_state(ProviderKind::Search), CircuitState::HalfOpen);

        m.record_success(ProviderKind::Search);
        let snapshot = m.snapshot();
        let search = snapshot.providers.iter().find(|p| p.provider == ProviderKind::Search).unwrap();
        assert_eq!(search.state, CircuitState::Closed);
        assert_eq!(search.consecutive_failures, 0);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let m = monitor(1, 300);
        m.record_failure(ProviderKind::Search, ProviderErrorKind::ProviderOutage, "down");
        m.probe(ProviderKind::Search);
        assert_eq!(m.circuit_state(ProviderKind::Search), CircuitState::HalfOpen);

        assert!(!m.record_failure(ProviderKind::Search, ProviderErrorKind::ProviderOutage, "still down"));
        assert_eq!(m.circuit_state(ProviderKind::Search), CircuitState::Open);
    }

    #[test]
    fn test_half_open_admits_one_caller_at_a_time() {
        let m = ProviderHealthMonitor::new(BreakerSettings {
            failure_threshold: 1,
            pause_on_open: false,
            ..Default::default()
        });
        m.record_failure(ProviderKind::Search, ProviderErrorKind::ProviderOutage, "down");
        m.probe(ProviderKind::Search);

        assert!(m.is_provider_healthy(ProviderKind::Search));
        assert!(m.can_call(ProviderKind::Search));
        assert!(!m.can_call(ProviderKind::Search));
        assert!(!m.is_provider_healthy(ProviderKind::Search));
        assert!(m.can_call(ProviderKind::Reasoning));

        // an outcome that says nothing about health frees the slot
        m.record_failure(ProviderKind::Search, ProviderErrorKind::Timeout, "slow");
        assert_eq!(m.circuit_state(ProviderKind::Search), CircuitState::HalfOpen);
        assert!(m.can_call(ProviderKind::Search));

        m.release(ProviderKind::Search);
        assert!(m.can_call(ProviderKind::Search));
        m.record_success(ProviderKind::Search);
        assert_eq!(m.circuit_state(ProviderKind::Search), CircuitState::Closed);
        assert!(m.can_call(ProviderKind::Search));
        assert!(m.can_call(ProviderKind::Search));
    }

    #[test]
    fn test_abandoned_trial_expires_after_cooldown() {
        let m = ProviderHealthMonitor::new(BreakerSettings {
            failure_threshold: 1,
            cooldown_seconds: 0,
            pause_on_open: false,
            ..Default::default()
        });
        m.record_failure(ProviderKind::Reasoning, ProviderErrorKind::ProviderOutage, "down");

        // zero cooldown: the held slot is already stale for the next caller
        assert!(m.can_call(ProviderKind::Reasoning));
        assert!(m.can_call(ProviderKind::Reasoning));
        assert_eq!(m.circuit_state(ProviderKind::Reasoning), CircuitState::HalfOpen);
    }

    #[test]
    fn test_resume_resets_everything() {
        let m = monitor(1, 300);
        m.record_failure(ProviderKind::Search, ProviderErrorKind::ProviderOutage, "down");
        m.record_failure(ProviderKind::Reasoning, ProviderErrorKind::ProviderOutage, "down");
        assert!(m.is_system_paused());

        m.resume();
        assert!(!m.is_system_paused());
        assert!(m.can_call(ProviderKind::Search));
        assert!(m.can_call(ProviderKind::Reasoning));
    }

    #[test]
    fn test_pause_can_be_disabled() {
        let m = ProviderHealthMonitor::new(BreakerSettings {
            failure_threshold: 1,
            pause_on_open: false,
            ..Default::default()
        });
        m.record_failure(ProviderKind::Search, ProviderErrorKind::ProviderOutage, "down");
        assert!(!m.is_system_paused());
        assert!(m.can_call(ProviderKind::Reasoning));
    }
}
