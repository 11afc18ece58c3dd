//! Request metrics, resource sampling, and health classification for ragchat.
//!
//! [`MetricsCollector`] is the one process-wide aggregate every serving path
//! records into. [`HealthMonitor`] combines it with live process resource
//! samples into the snapshot served at `/health` and `/metrics`.

pub mod health;
pub mod metrics;
pub mod resources;

pub use health::{HealthMonitor, HealthSnapshot, HealthStatus};
pub use metrics::{MetricsCollector, MetricsSnapshot, MetricsSummary};
pub use resources::{FixedSampler, ResourceSample, ResourceSampler, SystemSampler};
