//! Process resource sampling.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use sysinfo::{Pid, System};
use tracing::warn;

/// Memory and CPU use of this process at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    /// Resident memory in MiB
    pub memory_mb: f64,
    /// CPU use since the previous sample, percent of one core
    pub cpu_percent: f64,
}

/// Source of [`ResourceSample`]s.
pub trait ResourceSampler: Send + Sync {
    fn sample(&self) -> ResourceSample;
}

/// Samples the current process through `sysinfo`.
///
/// CPU use is a delta between refreshes, so the first sample reports 0.
pub struct SystemSampler {
    pid: Option<Pid>,
    system: Mutex<System>,
}

impl SystemSampler {
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| warn!(error = %e, "Cannot determine own pid; resource samples will be zero"))
            .ok();
        Self {
            pid,
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for SystemSampler {
    fn sample(&self) -> ResourceSample {
        let Some(pid) = self.pid else {
            return ResourceSample::default();
        };

        let mut sys = self.system.lock().unwrap_or_else(|e| e.into_inner());
        sys.refresh_process(pid);

        match sys.process(pid) {
            Some(process) => ResourceSample {
                memory_mb: process.memory() as f64 / 1024.0 / 1024.0,
                cpu_percent: process.cpu_usage() as f64,
            },
            None => {
                warn!(%pid, "Process not found while sampling resources");
                ResourceSample::default()
            }
        }
    }
}

/// Always returns the same sample. Useful where live sampling is unwanted.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedSampler(pub ResourceSample);

impl ResourceSampler for FixedSampler {
    fn sample(&self) -> ResourceSample {
        self.0
    }
}
