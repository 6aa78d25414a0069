//! Adapter interfaces for external collaborators.
//!
//! The research engine never talks to the network directly. Search,
//! document fetching, reasoning (LLM) calls and outage notifications all go
//! through the traits defined here, so the controller can be driven by the
//! HTTP adapters in production and by in-process fakes in tests.

pub mod chat;
pub mod fetch;
pub mod search;
pub mod webhook;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use chat::{ChatConfig, ChatReasoner};
pub use fetch::HttpFetcher;
pub use search::{HttpSearchProvider, SearchGatewayConfig};
pub use webhook::WebhookNotifier;

/// The two external dependency classes tracked for health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Search,
    Reasoning,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 2] = [ProviderKind::Search, ProviderKind::Reasoning];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Search => "search",
            ProviderKind::Reasoning => "reasoning",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure taxonomy for provider calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// Auth/config/availability failure
    ProviderOutage,
    /// Quota or rate limit
    RateLimit,
    /// Slow network; says nothing about provider health
    Timeout,
    Unknown,
}

impl ProviderErrorKind {
    /// Whether this failure counts against the provider's circuit breaker
    pub fn counts_against_health(&self) -> bool {
        matches!(self, ProviderErrorKind::ProviderOutage | ProviderErrorKind::RateLimit)
    }

    /// Whether a higher layer may retry the call
    pub fn is_retriable(&self) -> bool {
        matches!(self, ProviderErrorKind::RateLimit | ProviderErrorKind::Timeout)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderErrorKind::ProviderOutage => "provider_outage",
            ProviderErrorKind::RateLimit => "rate_limit",
            ProviderErrorKind::Timeout => "timeout",
            ProviderErrorKind::Unknown => "unknown",
        }
    }
}

/// Error returned by any collaborator call
#[derive(Debug, Clone, Error)]
#[error("{provider} {}: {message}", kind.as_str())]
pub struct ProviderError {
    pub provider: String,
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(provider: impl Into<String>, kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            kind,
            message: message.into(),
        }
    }

    pub fn outage(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(provider, ProviderErrorKind::ProviderOutage, message)
    }

    pub fn rate_limited(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(provider, ProviderErrorKind::RateLimit, message)
    }

    pub fn timeout(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(provider, ProviderErrorKind::Timeout, message)
    }

    pub fn unknown(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(provider, ProviderErrorKind::Unknown, message)
    }

    /// Classify an HTTP status code
    pub fn from_status(provider: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            401 | 402 | 403 | 502 | 503 => ProviderErrorKind::ProviderOutage,
            429 => ProviderErrorKind::RateLimit,
            408 | 504 => ProviderErrorKind::Timeout,
            _ => ProviderErrorKind::Unknown,
        };
        Self::new(provider, kind, message)
    }

    /// Classify a transport-level reqwest error
    pub fn from_reqwest(provider: impl Into<String>, err: &reqwest::Error) -> Self {
        let provider = provider.into();
        if err.is_timeout() {
            Self::timeout(provider, err.to_string())
        } else if let Some(status) = err.status() {
            Self::from_status(provider, status.as_u16(), err.to_string())
        } else if err.is_connect() {
            Self::outage(provider, err.to_string())
        } else {
            Self::unknown(provider, err.to_string())
        }
    }
}

// ============================================================================
// Search
// ============================================================================

/// A search request; also the identity of a cache entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub max_results: usize,
    #[serde(default)]
    pub domain_allow: Vec<String>,
    #[serde(default)]
    pub domain_deny: Vec<String>,
    /// Provider date restriction, e.g. "y1" for the past year
    #[serde(default)]
    pub date_restrict: Option<String>,
    #[serde(skip, default = "default_search_timeout")]
    pub timeout: Duration,
}

fn default_search_timeout() -> Duration {
    Duration::from_secs(15)
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, max_results: usize) -> Self {
        Self {
            query: query.into(),
            max_results,
            domain_allow: Vec::new(),
            domain_deny: Vec::new(),
            date_restrict: None,
            timeout: default_search_timeout(),
        }
    }
}

/// One search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub snippet: String,
}

/// A per-provider error reported inside an otherwise successful response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchProviderError {
    pub provider: String,
    #[serde(default)]
    pub status: Option<u16>,
    pub message: String,
    /// Quota/rate-limit failures that should trip the health monitor
    #[serde(default)]
    pub fatal: bool,
}

/// Response from a search call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    pub provider: String,
    pub results: Vec<SearchHit>,
    #[serde(default)]
    pub provider_errors: Vec<SearchProviderError>,
}

impl SearchResponse {
    /// The first fatal provider error, if any
    pub fn fatal_error(&self) -> Option<&SearchProviderError> {
        self.provider_errors.iter().find(|e| e.fatal)
    }
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Human-readable provider name
    fn name(&self) -> &str;

    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, ProviderError>;
}

// ============================================================================
// Fetch
// ============================================================================

/// Extracted text of a fetched document
#[derive(Debug, Clone, Default)]
pub struct FetchedDocument {
    pub text: String,
    pub title: String,
}

/// Fetches and extracts documents. Implementations own SSRF protection.
#[async_trait]
pub trait Fetcher: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(
        &self,
        url: &str,
        timeout: Duration,
        max_length: usize,
    ) -> Result<FetchedDocument, ProviderError>;
}

// ============================================================================
// Reasoning
// ============================================================================

/// A structured reasoning call
#[derive(Debug, Clone)]
pub struct ReasoningRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    /// JSON schema the response must satisfy
    pub output_schema: serde_json::Value,
    pub temperature: f32,
    /// Upper bound on response tokens
    pub max_output_tokens: u32,
}

impl ReasoningRequest {
    /// Rough token estimate (4 chars per token) for budget reservation
    pub fn estimated_tokens(&self) -> u64 {
        let chars = self.system_prompt.len()
            + self.user_prompt.len()
            + self.output_schema.to_string().len();
        (chars as u64).div_ceil(4) + self.max_output_tokens as u64
    }
}

/// Output from a reasoning call
#[derive(Debug, Clone)]
pub struct ReasoningOutput {
    /// Raw response text (expected to hold JSON)
    pub content: String,

    /// Tokens used (if the provider reports it)
    pub tokens_used: Option<u64>,
}

impl ReasoningOutput {
    pub fn new(content: String) -> Self {
        Self {
            content,
            tokens_used: None,
        }
    }
}

#[async_trait]
pub trait Reasoner: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(
        &self,
        request: &ReasoningRequest,
        timeout: Duration,
    ) -> Result<ReasoningOutput, ProviderError>;
}

// ============================================================================
// Notifications
// ============================================================================

/// Outage notification sent when a provider circuit opens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub event: String,
    pub provider: ProviderKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Best-effort notification sink
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(ProviderError::from_status("p", 401, "").kind, ProviderErrorKind::ProviderOutage);
        assert_eq!(ProviderError::from_status("p", 429, "").kind, ProviderErrorKind::RateLimit);
        assert_eq!(ProviderError::from_status("p", 504, "").kind, ProviderErrorKind::Timeout);
        assert_eq!(ProviderError::from_status("p", 418, "").kind, ProviderErrorKind::Unknown);
    }

    #[test]
    fn test_timeouts_do_not_count_against_health() {
        assert!(!ProviderErrorKind::Timeout.counts_against_health());
        assert!(!ProviderErrorKind::Unknown.counts_against_health());
        assert!(ProviderErrorKind::RateLimit.counts_against_health());
        assert!(ProviderErrorKind::ProviderOutage.counts_against_health());
    }

    #[test]
    fn test_retriable_kinds() {
        assert!(ProviderErrorKind::Timeout.is_retriable());
        assert!(ProviderErrorKind::RateLimit.is_retriable());
        assert!(!ProviderErrorKind::ProviderOutage.is_retriable());
        assert!(!ProviderErrorKind::Unknown.is_retriable());
    }

    #[test]
    fn test_error_display() {
        let err = ProviderError::rate_limited("serp", "quota exhausted");
        assert_eq!(err.to_string(), "serp rate_limit: quota exhausted");
    }

    #[test]
    fn test_token_estimate_includes_output_budget() {
        let request = ReasoningRequest {
            system_prompt: "a".repeat(40),
            user_prompt: "b".repeat(40),
            output_schema: serde_json::json!({}),
            temperature: 0.0,
            max_output_tokens: 100,
        };
        // 82 chars -> 21 tokens, plus 100 output tokens
        assert_eq!(request.estimated_tokens(), 121);
    }
}
