//! Search result cache backed by SQLite.
//!
//! Keys are a SHA256 over the normalised request (query text, result limit,
//! date restriction, sorted domain allow/deny lists), so equivalent requests
//! from different jobs share one entry. Entries expire after a TTL (default
//! 7 days); a hit requires `now < expires_at`.
//!
//! One connection behind a mutex is enough: writes are single upserts and
//! contention between jobs is low.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::adapters::{SearchHit, SearchRequest};

/// Cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Use the cache at all (default: true)
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Entry lifetime in days (default: 7)
    #[serde(default = "default_ttl_days")]
    pub ttl_days: u64,
}

fn default_enabled() -> bool {
    true
}
fn default_ttl_days() -> u64 {
    7
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            ttl_days: default_ttl_days(),
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.ttl_days * 24 * 60 * 60)
    }
}

/// Errors that can occur in the cache
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt timestamp in cache row: {0}")]
    Timestamp(i64),
}

/// A cached search response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSearch {
    pub results: Vec<SearchHit>,
    pub provider: String,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Entry counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: u64,
    pub live: u64,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS search_cache (
    cache_key   TEXT PRIMARY KEY,
    query       TEXT NOT NULL,
    provider    TEXT NOT NULL,
    results     TEXT NOT NULL,
    cached_at   INTEGER NOT NULL,
    expires_at  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_search_cache_expires ON search_cache(expires_at);
";

/// Process-wide search result cache
pub struct SearchCache {
    conn: Mutex<Connection>,
    ttl_ms: i64,
}

impl SearchCache {
    /// Open (or create) the cache database at `path`
    pub fn open(path: &Path, ttl: std::time::Duration) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn, ttl)
    }

    /// Open an in-memory cache (for testing)
    pub fn open_in_memory(ttl: std::time::Duration) -> Result<Self, CacheError> {
        Self::from_connection(Connection::open_in_memory()?, ttl)
    }

    fn from_connection(conn: Connection, ttl: std::time::Duration) -> Result<Self, CacheError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            ttl_ms: i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Look up a live entry
    pub fn get(&self, request: &SearchRequest) -> Result<Option<CachedSearch>, CacheError> {
        self.get_at(request, Utc::now())
    }

    /// Look up an entry that is live at `now`
    pub fn get_at(&self, request: &SearchRequest, now: DateTime<Utc>) -> Result<Option<CachedSearch>, CacheError> {
        let key = cache_key(request);
        let row = self
            .lock()
            .query_row(
                "SELECT results, provider, cached_at, expires_at FROM search_cache
                 WHERE cache_key = ?1 AND expires_at > ?2",
                params![key, now.timestamp_millis()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((results, provider, cached_at, expires_at)) = row else {
            return Ok(None);
        };

        Ok(Some(CachedSearch {
            results: serde_json::from_str(&results)?,
            provider,
            cached_at: from_millis(cached_at)?,
            expires_at: from_millis(expires_at)?,
        }))
    }

    /// Store (or replace) the results for a request
    pub fn put(&self, request: &SearchRequest, results: &[SearchHit], provider: &str) -> Result<(), CacheError> {
        self.put_at(request, results, provider, Utc::now())
    }

    /// Store results as if cached at `now`
    pub fn put_at(
        &self,
        request: &SearchRequest,
        results: &[SearchHit],
        provider: &str,
        now: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        let key = cache_key(request);
        let cached_at = now.timestamp_millis();
        let expires_at = cached_at.saturating_add(self.ttl_ms);
        let payload = serde_json::to_string(results)?;

        self.lock().execute(
            "INSERT INTO search_cache (cache_key, query, provider, results, cached_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(cache_key) DO UPDATE SET
                provider = excluded.provider,
                results = excluded.results,
                cached_at = excluded.cached_at,
                expires_at = excluded.expires_at",
            params![key, request.query, provider, payload, cached_at, expires_at],
        )?;

        Ok(())
    }

    /// Delete every entry with `expires_at <= now`. Returns rows removed.
    pub fn purge_expired(&self) -> Result<usize, CacheError> {
        self.purge_expired_at(Utc::now())
    }

    pub fn purge_expired_at(&self, now: DateTime<Utc>) -> Result<usize, CacheError> {
        let removed = self.lock().execute(
            "DELETE FROM search_cache WHERE expires_at <= ?1",
            params![now.timestamp_millis()],
        )?;
        Ok(removed)
    }

    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        let conn = self.lock();
        let entries: i64 = conn.query_row("SELECT COUNT(*) FROM search_cache", [], |r| r.get(0))?;
        let live: i64 = conn.query_row(
            "SELECT COUNT(*) FROM search_cache WHERE expires_at > ?1",
            params![Utc::now().timestamp_millis()],
            |r| r.get(0),
        )?;
        Ok(CacheStats {
            entries: entries.max(0) as u64,
            live: live.max(0) as u64,
        })
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, CacheError> {
    Utc.timestamp_millis_opt(ms).single().ok_or(CacheError::Timestamp(ms))
}

/// Normalised identity of a search request
#[derive(Serialize)]
struct CacheKeyInput {
    query: String,
    max_results: usize,
    date_restrict: Option<String>,
    domain_allow: Vec<String>,
    domain_deny: Vec<String>,
}

fn normalize_domains(domains: &[String]) -> Vec<String> {
    let mut out: Vec<String> = domains
        .iter()
        .map(|d| d.trim().to_lowercase())
        .filter(|d| !d.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

/// Deterministic cache key for a request (64 hex chars)
pub fn cache_key(request: &SearchRequest) -> String {
    let input = CacheKeyInput {
        query: request
            .query
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .collect::<Vec<_>>()
            .join(" "),
        max_results: request.max_results,
        date_restrict: request.date_restrict.as_ref().map(|d| d.trim().to_lowercase()),
        domain_allow: normalize_domains(&request.domain_allow),
        domain_deny: normalize_domains(&request.domain_deny),
    };

    // Serializing plain strings and integers cannot fail
    let canonical = serde_json::to_string(&input).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}
