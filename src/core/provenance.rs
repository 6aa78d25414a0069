//! Provenance gate for extracted evidence.
//!
//! An evidence item is usable only if its excerpt can be traced back to the
//! text of a document that was actually fetched in this job. Items are
//! rejected unless ALL of the following hold:
//!
//! - the source URL is present, http(s), and not an internal host
//! - the excerpt is present and at least `min_excerpt_chars` long
//! - the excerpt does not read like model-generated assertion
//!   ("Based on my analysis...")
//! - the excerpt occurs in the fetched text, either verbatim after
//!   case/whitespace normalisation or, as a loose match, after punctuation
//!   is stripped as well
//!
//! The validator only partitions; it never touches the job. The caller
//! decides what to do with the rejected set.

use std::net::IpAddr;

use glob::Pattern;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{EvidenceItem, Source};

/// Provenance gate settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceSettings {
    /// Minimum excerpt length in characters (default: 20)
    #[serde(default = "default_min_excerpt_chars")]
    pub min_excerpt_chars: usize,

    /// Accept punctuation-insensitive matches (default: true)
    #[serde(default = "default_allow_loose_match")]
    pub allow_loose_match: bool,

    /// Glob patterns for hostnames that are never valid evidence sources
    #[serde(default = "default_blocked_hosts")]
    pub blocked_host_patterns: Vec<String>,

    /// Lowercase openings that mark an excerpt as synthesized
    #[serde(default = "default_synthetic_prefixes")]
    pub synthetic_prefixes: Vec<String>,
}

fn default_min_excerpt_chars() -> usize {
    20
}
fn default_allow_loose_match() -> bool {
    true
}

fn default_blocked_hosts() -> Vec<String> {
    vec![
        "localhost".to_string(),
        "*.localhost".to_string(),
        "*.local".to_string(),
        "*.internal".to_string(),
        "*.lan".to_string(),
        "*.home.arpa".to_string(),
    ]
}

fn default_synthetic_prefixes() -> Vec<String> {
    [
        "based on my analysis",
        "based on the analysis",
        "based on the available",
        "based on the evidence",
        "it appears that",
        "it seems that",
        "it is likely that",
        "it can be inferred",
        "this suggests that",
        "the evidence suggests",
        "in my opinion",
        "i believe",
        "i think",
        "as an ai",
        "according to my knowledge",
        "my analysis",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for ProvenanceSettings {
    fn default() -> Self {
        Self {
            min_excerpt_chars: default_min_excerpt_chars(),
            allow_loose_match: default_allow_loose_match(),
            blocked_host_patterns: default_blocked_hosts(),
            synthetic_prefixes: default_synthetic_prefixes(),
        }
    }
}

/// Why an evidence item was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectionReason {
    #[error("missing source URL")]
    MissingSourceUrl,

    #[error("invalid source URL: {0}")]
    InvalidSourceUrl(String),

    #[error("source URL points at an internal host: {0}")]
    InternalHost(String),

    #[error("missing excerpt")]
    MissingExcerpt,

    #[error("excerpt too short: {actual} < {min} characters")]
    ExcerptTooShort { actual: usize, min: usize },

    #[error("excerpt reads as synthesized text (\"{0}...\")")]
    SyntheticPhrasing(String),

    #[error("source was not fetched: {0}")]
    SourceNotFetched(String),

    #[error("excerpt not found in fetched content")]
    ExcerptNotInSource,
}

/// How an accepted excerpt matched its source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// Found after case/whitespace normalisation
    Exact,
    /// Found only after punctuation was stripped too
    Loose,
}

/// A rejected item with its reason
#[derive(Debug, Clone)]
pub struct RejectedEvidence {
    pub item: EvidenceItem,
    pub reason: RejectionReason,
}

/// Partition of a batch into valid and invalid items
#[derive(Debug, Clone, Default)]
pub struct ProvenanceReport {
    pub valid: Vec<EvidenceItem>,
    pub invalid: Vec<RejectedEvidence>,
    /// How many of the valid items only matched loosely
    pub loose_matches: usize,
}

impl ProvenanceReport {
    pub fn total(&self) -> usize {
        self.valid.len() + self.invalid.len()
    }

    /// True when a non-empty batch lost every item
    pub fn all_rejected(&self) -> bool {
        self.valid.is_empty() && !self.invalid.is_empty()
    }
}

/// The provenance gate
#[derive(Debug, Clone)]
pub struct ProvenanceValidator {
    settings: ProvenanceSettings,
    blocked_hosts: Vec<Pattern>,
}

impl Default for ProvenanceValidator {
    fn default() -> Self {
        Self::new(ProvenanceSettings::default())
    }
}

impl ProvenanceValidator {
    pub fn new(settings: ProvenanceSettings) -> Self {
        let blocked_hosts = settings
            .blocked_host_patterns
            .iter()
            .filter_map(|p| Pattern::new(p).ok())
            .collect();
        Self {
            settings,
            blocked_hosts,
        }
    }

    /// Validate a batch against the sources fetched so far
    pub fn validate(&self, items: Vec<EvidenceItem>, sources: &[Source]) -> ProvenanceReport {
        let mut report = ProvenanceReport::default();

        for item in items {
            match self.validate_item(&item, sources) {
                Ok(MatchKind::Exact) => report.valid.push(item),
                Ok(MatchKind::Loose) => {
                    report.loose_matches += 1;
                    report.valid.push(item);
                }
                Err(reason) => report.invalid.push(RejectedEvidence { item, reason }),
            }
        }

        report
    }

    /// Validate a single item
    pub fn validate_item(&self, item: &EvidenceItem, sources: &[Source]) -> Result<MatchKind, RejectionReason> {
        self.check_url(&item.source_url)?;

        let excerpt = item.excerpt.trim();
        if excerpt.is_empty() {
            return Err(RejectionReason::MissingExcerpt);
        }
        let length = excerpt.chars().count();
        if length < self.settings.min_excerpt_chars {
            return Err(RejectionReason::ExcerptTooShort {
                actual: length,
                min: self.settings.min_excerpt_chars,
            });
        }

        if let Some(prefix) = self.synthetic_prefix(excerpt) {
            return Err(RejectionReason::SyntheticPhrasing(prefix.to_string()));
        }

        let source = sources
            .iter()
            .find(|s| s.id == item.source_id)
            .or_else(|| sources.iter().find(|s| s.url == item.source_url))
            .filter(|s| s.has_content())
            .ok_or_else(|| RejectionReason::SourceNotFetched(item.source_url.clone()))?;

        match find_excerpt(&source.text, excerpt) {
            Some(MatchKind::Exact) => Ok(MatchKind::Exact),
            Some(MatchKind::Loose) if self.settings.allow_loose_match => Ok(MatchKind::Loose),
            _ => Err(RejectionReason::ExcerptNotInSource),
        }
    }

    fn check_url(&self, url: &str) -> Result<(), RejectionReason> {
        if url.trim().is_empty() {
            return Err(RejectionReason::MissingSourceUrl);
        }

        let parsed = Url::parse(url.trim()).map_err(|_| RejectionReason::InvalidSourceUrl(url.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(RejectionReason::InvalidSourceUrl(url.to_string()));
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| RejectionReason::InvalidSourceUrl(url.to_string()))?
            .to_lowercase();

        if let Ok(ip) = host.trim_matches(|c| c == '[' || c == ']').parse::<IpAddr>() {
            if is_internal_ip(&ip) {
                return Err(RejectionReason::InternalHost(host));
            }
        } else if self.blocked_hosts.iter().any(|p| p.matches(&host)) {
            return Err(RejectionReason::InternalHost(host));
        }

        Ok(())
    }

    fn synthetic_prefix(&self, excerpt: &str) -> Option<&str> {
        let normalized = normalize(excerpt);
        self.settings
            .synthetic_prefixes
            .iter()
            .find(|p| normalized.starts_with(p.as_str()))
            .map(|p| p.as_str())
    }
}

/// Whether an address is loopback, private, link-local or otherwise internal
pub fn is_internal_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                // 100.64.0.0/10 carrier-grade NAT
                || (octets[0] == 100 && (octets[1] & 0xc0) == 64)
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_internal_ip(&IpAddr::V4(mapped));
            }
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique local
                || (first & 0xfe00) == 0xfc00
                // fe80::/10 link local
                || (first & 0xffc0) == 0xfe80
        }
    }
}

/// Locate an excerpt in document text.
///
/// Exact: case-insensitive with whitespace runs collapsed.
/// Loose: as above with punctuation replaced by spaces on both sides.
pub fn find_excerpt(text: &str, excerpt: &str) -> Option<MatchKind> {
    let needle = normalize(excerpt);
    if needle.is_empty() {
        return None;
    }
    if normalize(text).contains(&needle) {
        return Some(MatchKind::Exact);
    }

    let loose_needle = strip_punctuation(&needle);
    if !loose_needle.is_empty() && strip_punctuation(&normalize(text)).contains(&loose_needle) {
        return Some(MatchKind::Loose);
    }

    None
}

/// Lowercase and collapse runs of whitespace to single spaces
fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Replace punctuation with spaces, then collapse whitespace again
fn strip_punctuation(text: &str) -> String {
    let replaced: String = text
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT: &str = "The bridge, completed in 1932, carried   over 40,000 vehicles per day \
                        according to the city's transport department.";

    fn source() -> Source {
        Source::fetched("S1", "https://news.example.org/bridge", "Bridge", TEXT)
    }

    fn item(excerpt: &str) -> EvidenceItem {
        EvidenceItem {
            id: "E1".to_string(),
            statement: "Bridge traffic".to_string(),
            source_id: "S1".to_string(),
            source_url: "https://news.example.org/bridge".to_string(),
            source_title: "Bridge".to_string(),
            excerpt: excerpt.to_string(),
            category: Default::default(),
            direction: Default::default(),
            context_id: "main".to_string(),
        }
    }

    #[test]
    fn test_exact_match_ignores_case_and_spacing() {
        assert_eq!(
            find_excerpt(TEXT, "CARRIED over 40,000\nvehicles per day"),
            Some(MatchKind::Exact)
        );
    }

    #[test]
    fn test_loose_match_ignores_punctuation() {
        assert_eq!(
            find_excerpt(TEXT, "completed in 1932 carried over 40 000 vehicles"),
            Some(MatchKind::Loose)
        );
    }

    #[test]
    fn test_no_match() {
        assert_eq!(find_excerpt(TEXT, "the bridge collapsed in 1933"), None);
    }

    #[test]
    fn test_loose_match_can_be_disabled() {
        let validator = ProvenanceValidator::new(ProvenanceSettings {
            allow_loose_match: false,
            ..Default::default()
        });
        let result = validator.validate_item(&item("completed in 1932 carried over 40 000 vehicles"), &[source()]);
        assert_eq!(result, Err(RejectionReason::ExcerptNotInSource));
    }

    #[test]
    fn test_internal_ips() {
        for ip in ["127.0.0.1", "10.1.2.3", "192.168.0.1", "172.16.5.5", "169.254.1.1", "100.64.0.1", "::1", "fd00::1", "fe80::1", "::ffff:10.0.0.1"] {
            assert!(is_internal_ip(&ip.parse().unwrap()), "{} should be internal", ip);
        }
        for ip in ["8.8.8.8", "93.184.216.34", "2606:4700::1111"] {
            assert!(!is_internal_ip(&ip.parse().unwrap()), "{} should be public", ip);
        }
    }

    #[test]
    fn test_blocked_hostnames() {
        let validator = ProvenanceValidator::default();
        let mut evidence = item("carried over 40,000 vehicles per day");
        evidence.source_url = "http://metadata.internal/latest".to_string();
        assert!(matches!(
            validator.validate_item(&evidence, &[source()]),
            Err(RejectionReason::InternalHost(_))
        ));
    }

    #[test]
    fn test_failed_source_is_not_evidence() {
        let validator = ProvenanceValidator::default();
        let failed = Source::failed("S1", "https://news.example.org/bridge", "404");
        assert!(matches!(
            validator.validate_item(&item("carried over 40,000 vehicles per day"), &[failed]),
            Err(RejectionReason::SourceNotFetched(_))
        ));
    }

    #[test]
    fn test_excerpt_length_boundary() {
        let validator = ProvenanceValidator::default();

        // present in the source, but only 10 characters
        assert_eq!(
            validator.validate_item(&item("over 40,00"), &[source()]),
            Err(RejectionReason::ExcerptTooShort { actual: 10, min: 20 })
        );
        assert_eq!(
            validator.validate_item(&item("over 40,000 vehicles"), &[source()]),
            Ok(MatchKind::Exact)
        );
    }

    #[test]
    fn test_synthetic_phrasing_rejected_even_when_quoted() {
        let validator = ProvenanceValidator::default();
        let excerpt = "Based on my analysis, the bridge carried over 40,000 vehicles per day.";
        let echoing = Source::fetched(
            "S1",
            "https://news.example.org/bridge",
            "Bridge",
            format!("Commentary. {excerpt} End."),
        );

        assert!(excerpt.len() >= 40);
        assert_eq!(
            validator.validate_item(&item(excerpt), &[echoing]),
            Err(RejectionReason::SyntheticPhrasing("based on my analysis".to_string()))
        );
        assert!(matches!(
            validator.validate_item(&item("It appears that the bridge carried 40,000 vehicles"), &[source()]),
            Err(RejectionReason::SyntheticPhrasing(_))
        ));
    }

    #[test]
    fn test_report_partition() {
        let validator = ProvenanceValidator::default();
        let report = validator.validate(
            vec![
                item("carried over 40,000 vehicles per day"),
                item("short"),
                item("completed in 1932 carried over 40 000 vehicles"),
            ],
            &[source()],
        );
        assert_eq!(report.valid.len(), 2);
        assert_eq!(report.invalid.len(), 1);
        assert_eq!(report.loose_matches, 1);
        assert!(!report.all_rejected());
    }
}
