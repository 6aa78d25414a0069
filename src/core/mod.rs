//! Core research engine.
//!
//! This module contains:
//! - Budget: per-job resource ceilings and their enforcement
//! - Health: process-wide provider circuit breakers and system pause
//! - Cache: SQLite-backed search result cache
//! - Provenance: evidence grounding checks
//! - Aggregate: weighted verdict aggregation
//! - Controller: the research loop state machine
//! - EventStore: append-only job audit log

pub mod aggregate;
pub mod budget;
pub mod cache;
pub mod controller;
pub mod event_store;
pub mod health;
pub mod provenance;

// Re-export commonly used types
pub use aggregate::{AggregationSettings, VerdictAggregator};
pub use budget::{BudgetGovernor, BudgetLimits, BudgetStats, BudgetTracker, EnforcementMode};
pub use cache::{CacheError, CacheSettings, SearchCache};
pub use controller::{ControllerConfig, ResearchController, ResearchError, ResearchSettings};
pub use event_store::EventStore;
pub use health::{BreakerSettings, CircuitState, ProviderHealthMonitor};
pub use provenance::{ProvenanceSettings, ProvenanceValidator, RejectionReason};
