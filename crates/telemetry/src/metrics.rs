//! Thread-safe request metrics: outcome counters, error-kind counts, cache
//! hit/miss counts, and a rolling response-time window.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::resources::ResourceSample;

/// Default number of response-time samples in the rolling window.
pub const DEFAULT_WINDOW: usize = 100;

/// The process-wide metrics aggregate.
///
/// Every operation takes one short lock; a poisoned lock is recovered so
/// recording never fails observably.
pub struct MetricsCollector {
    counters: Mutex<Counters>,
    window: usize,
    started_at: Instant,
}

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    successful: u64,
    failed: u64,
    error_counts: HashMap<String, u64>,
    cache_hits: u64,
    cache_misses: u64,
    response_times: VecDeque<f64>,
}

/// A consistent copy of the counters at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub error_counts: HashMap<String, u64>,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Mean of the rolling window in seconds; 0.0 with no samples.
    pub average_response_time: f64,
    pub uptime_seconds: f64,
}

impl MetricsSnapshot {
    /// Successful share of all requests in percent; 100.0 with no requests.
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 100.0;
        }
        self.successful_requests as f64 / self.total_requests as f64 * 100.0
    }

    /// Hit share of all cache lookups in percent; 0.0 with no lookups.
    pub fn cache_hit_rate(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / lookups as f64 * 100.0
    }
}

/// The grouped report served at `/metrics`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub requests: RequestSummary,
    pub performance: PerformanceSummary,
    pub cache: CacheSummary,
    pub errors: HashMap<String, u64>,
    pub uptime_seconds: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSummary {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub average_response_time: f64,
    pub memory_usage_mb: f64,
    pub cpu_usage_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSummary {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

impl MetricsCollector {
    /// Create a collector with the default rolling window.
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    /// Create a collector keeping the last `window` response times.
    pub fn with_window(window: usize) -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            window: window.max(1),
            started_at: Instant::now(),
        }
    }

    fn counters(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Recording ─────────────────────────────────────────────────────

    /// Record one finished request.
    ///
    /// `error_type` is counted only for failures.
    pub fn record_request(&self, success: bool, response_time_secs: f64, error_type: Option<&str>) {
        let mut c = self.counters();
        c.total += 1;

        if success {
            c.successful += 1;
        } else {
            c.failed += 1;
            if let Some(kind) = error_type {
                *c.error_counts.entry(kind.to_string()).or_insert(0) += 1;
            }
        }

        if c.response_times.len() == self.window {
            c.response_times.pop_front();
        }
        c.response_times.push_back(response_time_secs);
    }

    /// Record one cache lookup.
    pub fn record_cache_event(&self, hit: bool) {
        let mut c = self.counters();
        if hit {
            c.cache_hits += 1;
        } else {
            c.cache_misses += 1;
        }
    }

    // ── Reading ───────────────────────────────────────────────────────

    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = self.counters();
        let average_response_time = if c.response_times.is_empty() {
            0.0
        } else {
            c.response_times.iter().sum::<f64>() / c.response_times.len() as f64
        };

        MetricsSnapshot {
            total_requests: c.total,
            successful_requests: c.successful,
            failed_requests: c.failed,
            error_counts: c.error_counts.clone(),
            cache_hits: c.cache_hits,
            cache_misses: c.cache_misses,
            average_response_time,
            uptime_seconds: self.started_at.elapsed().as_secs_f64(),
        }
    }

    /// Build the grouped summary with the given resource sample.
    pub fn summary(&self, resources: ResourceSample) -> MetricsSummary {
        let s = self.snapshot();
        MetricsSummary {
            requests: RequestSummary {
                total: s.total_requests,
                successful: s.successful_requests,
                failed: s.failed_requests,
                success_rate: s.success_rate(),
            },
            performance: PerformanceSummary {
                average_response_time: s.average_response_time,
                memory_usage_mb: resources.memory_mb,
                cpu_usage_percent: resources.cpu_percent,
            },
            cache: CacheSummary {
                hits: s.cache_hits,
                misses: s.cache_misses,
                hit_rate: s.cache_hit_rate(),
            },
            errors: s.error_counts.clone(),
            uptime_seconds: s.uptime_seconds,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
