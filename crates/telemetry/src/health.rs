//! Health classification and snapshots.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::metrics::{MetricsCollector, MetricsSummary};
use crate::resources::ResourceSampler;

/// Success rate (percent) at or above which the service is healthy.
pub const HEALTHY_SUCCESS_RATE: f64 = 90.0;
/// Success rate (percent) below which the service is unhealthy.
pub const UNHEALTHY_SUCCESS_RATE: f64 = 70.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Classify by success rate, forcing `Unhealthy` when memory is over the limit.
    pub fn classify(success_rate: f64, memory_mb: f64, memory_limit_mb: f64) -> Self {
        if success_rate < UNHEALTHY_SUCCESS_RATE || memory_mb > memory_limit_mb {
            Self::Unhealthy
        } else if success_rate < HEALTHY_SUCCESS_RATE {
            Self::Degraded
        } else {
            Self::Healthy
        }
    }

    /// Process exit code for health checks: 0 healthy, 1 degraded, 2 unhealthy.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Healthy => 0,
            Self::Degraded => 1,
            Self::Unhealthy => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only health view computed on demand. Never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub uptime_seconds: f64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Percent
    pub success_rate: f64,
    /// Seconds, rolling window mean
    pub average_response_time: f64,
    pub memory_usage_mb: f64,
    pub cpu_usage_percent: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub error_counts: HashMap<String, u64>,
    /// RFC 3339
    pub timestamp: String,
}

/// Combines the metrics aggregate with live resource samples.
pub struct HealthMonitor {
    metrics: Arc<MetricsCollector>,
    sampler: Box<dyn ResourceSampler>,
    memory_limit_mb: f64,
}

impl HealthMonitor {
    pub fn new(metrics: Arc<MetricsCollector>, sampler: Box<dyn ResourceSampler>, memory_limit_mb: f64) -> Self {
        Self {
            metrics,
            sampler,
            memory_limit_mb,
        }
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let resources = self.sampler.sample();
        let m = self.metrics.snapshot();
        let success_rate = m.success_rate();

        HealthSnapshot {
            status: HealthStatus::classify(success_rate, resources.memory_mb, self.memory_limit_mb),
            uptime_seconds: m.uptime_seconds,
            total_requests: m.total_requests,
            successful_requests: m.successful_requests,
            failed_requests: m.failed_requests,
            success_rate,
            average_response_time: m.average_response_time,
            memory_usage_mb: resources.memory_mb,
            cpu_usage_percent: resources.cpu_percent,
            cache_hits: m.cache_hits,
            cache_misses: m.cache_misses,
            error_counts: m.error_counts,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        self.metrics.summary(self.sampler.sample())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{FixedSampler, ResourceSample};

    fn monitor(memory_mb: f64) -> HealthMonitor {
        HealthMonitor::new(
            Arc::new(MetricsCollector::new()),
            Box::new(FixedSampler(ResourceSample {
                memory_mb,
                cpu_percent: 0.0,
            })),
            1000.0,
        )
    }

    fn record(monitor: &HealthMonitor, ok: usize, failed: usize) {
        for _ in 0..ok {
            monitor.metrics().record_request(true, 1.0, None);
        }
        for _ in 0..failed {
            monitor.metrics().record_request(false, 1.0, Some("ConnectionError"));
        }
    }

    #[test]
    fn classification_boundaries() {
        assert_eq!(HealthStatus::classify(100.0, 0.0, 1000.0), HealthStatus::Healthy);
        assert_eq!(HealthStatus::classify(90.0, 0.0, 1000.0), HealthStatus::Healthy);
        assert_eq!(HealthStatus::classify(89.9, 0.0, 1000.0), HealthStatus::Degraded);
        assert_eq!(HealthStatus::classify(70.0, 0.0, 1000.0), HealthStatus::Degraded);
        assert_eq!(HealthStatus::classify(69.9, 0.0, 1000.0), HealthStatus::Unhealthy);
    }

    #[test]
    fn memory_over_limit_forces_unhealthy() {
        assert_eq!(HealthStatus::classify(100.0, 1000.5, 1000.0), HealthStatus::Unhealthy);
    }

    #[test]
    fn idle_service_is_healthy() {
        let snap = monitor(10.0).snapshot();
        assert_eq!(snap.total_requests, 0);
        assert_eq!(snap.success_rate, 100.0);
        assert_eq!(snap.status, HealthStatus::Healthy);
    }

    #[test]
    fn healthy_with_all_successes() {
        let m = monitor(10.0);
        record(&m, 10, 0);
        let snap = m.snapshot();
        assert_eq!(snap.status, HealthStatus::Healthy);
        assert_eq!(snap.success_rate, 100.0);
    }

    #[test]
    fn degraded_at_eighty_percent() {
        let m = monitor(10.0);
        record(&m, 8, 2);
        let snap = m.snapshot();
        assert_eq!(snap.status, HealthStatus::Degraded);
        assert!((snap.success_rate - 80.0).abs() < 1e-9);
        assert_eq!(snap.error_counts["ConnectionError"], 2);
    }

    #[test]
    fn unhealthy_at_thirty_percent() {
        let m = monitor(10.0);
        record(&m, 3, 7);
        let snap = m.snapshot();
        assert_eq!(snap.status, HealthStatus::Unhealthy);
        assert!((snap.success_rate - 30.0).abs() < 1e-9);
    }

    #[test]
    fn no_requests_reports_healthy() {
        let snap = monitor(10.0).snapshot();
        assert_eq!(snap.status, HealthStatus::Healthy);
        assert_eq!(snap.total_requests, 0);
    }

    #[test]
    fn snapshot_serializes_lowercase_status() {
        let json = serde_json::to_value(monitor(2000.0).snapshot()).unwrap();
        assert_eq!(json["status"], "unhealthy");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn exit_codes_follow_severity() {
        assert_eq!(HealthStatus::Healthy.exit_code(), 0);
        assert_eq!(HealthStatus::Degraded.exit_code(), 1);
        assert_eq!(HealthStatus::Unhealthy.exit_code(), 2);
    }
}
