use std::time::Duration;

use crate::Collector;
use anyhow::Result;
use metron_common::MetricRecord;
use sysinfo::{System, MINIMUM_CPU_UPDATE_INTERVAL};

/// Per-core utilisation as `CPUutilization1..N`.
///
/// Usage is a delta between two refreshes, so each call refreshes, sleeps
/// for the sampling window and refreshes again.
pub struct CpuCollector {
    system: System,
    window: Duration,
}

impl CpuCollector {
    pub fn new() -> Self {
        Self::with_window(Duration::from_millis(200))
    }

    /// The window is never shorter than sysinfo's minimum update interval.
    pub fn with_window(window: Duration) -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        Self {
            system,
            window: window.max(MINIMUM_CPU_UPDATE_INTERVAL),
        }
    }
}

impl Default for CpuCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for CpuCollector {
    fn name(&self) -> &str {
        "cpu"
    }

    fn collect(&mut self) -> Result<Vec<MetricRecord>> {
        self.system.refresh_cpu_all();
        std::thread::sleep(self.window);
        self.system.refresh_cpu_all();

        let cpus = self.system.cpus();
        if cpus.is_empty() {
            anyhow::bail!("no CPUs reported by the system");
        }
        Ok(cpus
            .iter()
            .enumerate()
            .map(|(i, cpu)| {
                MetricRecord::gauge(format!("CPUutilization{}", i + 1), cpu.cpu_usage() as f64)
            })
            .collect())
    }
}
