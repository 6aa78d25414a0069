//! Fetched sources and the evidence items extracted from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::claim::MAIN_CONTEXT_ID;

/// Which way an evidence item points relative to the claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceDirection {
    Supports,
    Contradicts,
    #[default]
    Neutral,
}

/// Kind of fact an evidence item carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceCategory {
    Statistic,
    Event,
    LegalRecord,
    ExpertStatement,
    OfficialStatement,
    #[default]
    Other,
}

/// One fact candidate tied to a fetched document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceItem {
    /// Evidence id, unique within a job ("E1", "E2", ...)
    pub id: String,

    /// The fact, paraphrased
    pub statement: String,

    pub source_id: String,
    pub source_url: String,
    #[serde(default)]
    pub source_title: String,

    /// Verbatim text from the source backing the statement
    #[serde(default)]
    pub excerpt: String,

    #[serde(default)]
    pub category: EvidenceCategory,

    #[serde(default)]
    pub direction: EvidenceDirection,

    /// Analytical context this item is assigned to
    #[serde(default = "default_context")]
    pub context_id: String,
}

fn default_context() -> String {
    MAIN_CONTEXT_ID.to_string()
}

/// A fetched (or attempted) document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    /// Source id, unique within a job ("S1", "S2", ...)
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub title: String,

    /// Extracted document text (empty when the fetch failed)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,

    pub fetch_success: bool,
    pub fetched_at: DateTime<Utc>,

    /// Reliability score in [0, 1], when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reliability: Option<f64>,

    /// Fetch error message, if the fetch failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Source {
    /// A successfully fetched source
    pub fn fetched(id: impl Into<String>, url: impl Into<String>, title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            title: title.into(),
            text: text.into(),
            fetch_success: true,
            fetched_at: Utc::now(),
            reliability: None,
            error: None,
        }
    }

    /// A source whose fetch failed
    pub fn failed(id: impl Into<String>, url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            title: String::new(),
            text: String::new(),
            fetch_success: false,
            fetched_at: Utc::now(),
            reliability: None,
            error: Some(error.into()),
        }
    }

    pub fn with_reliability(mut self, reliability: f64) -> Self {
        self.reliability = Some(reliability.clamp(0.0, 1.0));
        self
    }

    /// Whether this source has text that evidence can be traced to
    pub fn has_content(&self) -> bool {
        self.fetch_success && !self.text.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_source_has_no_content() {
        let source = Source::failed("S1", "https://example.com", "timeout");
        assert!(!source.has_content());
        assert_eq!(source.error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_reliability_is_clamped() {
        let source = Source::fetched("S1", "https://example.com", "t", "body").with_reliability(1.7);
        assert_eq!(source.reliability, Some(1.0));
    }

    #[test]
    fn test_evidence_context_defaults_to_main() {
        let item: EvidenceItem = serde_json::from_str(
            r#"{"id":"E1","statement":"s","source_id":"S1","source_url":"https://a.org"}"#,
        )
        .unwrap();
        assert_eq!(item.context_id, MAIN_CONTEXT_ID);
        assert_eq!(item.direction, EvidenceDirection::Neutral);
    }
}
