//! Bounded ring buffer of analysis call records.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AnalysisPoint;

pub const DEFAULT_CAPACITY: usize = 1000;

/// One analysis call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub point: AnalysisPoint,
    pub latency_ms: u64,
    pub success: bool,
    pub retries: u32,
    pub used_fallback: bool,
    pub at: DateTime<Utc>,
}

/// Aggregate view of the calls for one analysis point
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointSummary {
    pub point: AnalysisPoint,
    pub calls: usize,
    pub success_rate: f64,
    pub fallback_rate: f64,
    pub p50_latency_ms: u64,
    pub p95_latency_ms: u64,
    pub avg_retries: f64,
}

/// Shared across jobs; oldest records are evicted at capacity
#[derive(Debug)]
pub struct AnalysisMetrics {
    capacity: usize,
    records: Mutex<VecDeque<CallRecord>>,
}

impl Default for AnalysisMetrics {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl AnalysisMetrics {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn record(&self, point: AnalysisPoint, latency: Duration, success: bool, retries: u32, used_fallback: bool) {
        let record = CallRecord {
            point,
            latency_ms: latency.as_millis() as u64,
            success,
            retries,
            used_fallback,
            at: Utc::now(),
        };

        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        if records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Snapshot of the buffer, oldest first
    pub fn records(&self) -> Vec<CallRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Per-point summary for every point with at least one record
    pub fn summary(&self) -> Vec<PointSummary> {
        let records = self.records();

        AnalysisPoint::ALL
            .iter()
            .filter_map(|point| {
                let calls: Vec<&CallRecord> = records.iter().filter(|r| r.point == *point).collect();
                if calls.is_empty() {
                    return None;
                }
                let n = calls.len() as f64;
                let mut latencies: Vec<u64> = calls.iter().map(|r| r.latency_ms).collect();
                latencies.sort_unstable();

                Some(PointSummary {
                    point: *point,
                    calls: calls.len(),
                    success_rate: calls.iter().filter(|r| r.success).count() as f64 / n,
                    fallback_rate: calls.iter().filter(|r| r.used_fallback).count() as f64 / n,
                    p50_latency_ms: percentile(&latencies, 0.50),
                    p95_latency_ms: percentile(&latencies, 0.95),
                    avg_retries: calls.iter().map(|r| f64::from(r.retries)).sum::<f64>() / n,
                })
            })
            .collect()
    }
}

/// Nearest-rank percentile over sorted values
fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
