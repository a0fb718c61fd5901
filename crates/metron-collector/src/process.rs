use crate::Collector;
use anyhow::{anyhow, Result};
use metron_common::MetricRecord;
use sysinfo::{Pid, ProcessesToUpdate, System};

/// Resource usage of the agent process itself.
pub struct ProcessCollector {
    system: System,
    pid: Option<Pid>,
}

impl ProcessCollector {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: sysinfo::get_current_pid().ok(),
        }
    }
}

impl Default for ProcessCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for ProcessCollector {
    fn name(&self) -> &str {
        "process"
    }

    fn collect(&mut self) -> Result<Vec<MetricRecord>> {
        let pid = self
            .pid
            .ok_or_else(|| anyhow!("current process id is not available on this platform"))?;
        self.system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        let process = self
            .system
            .process(pid)
            .ok_or_else(|| anyhow!("process {pid} not found"))?;

        let disk = process.disk_usage();
        Ok(vec![
            MetricRecord::gauge("ProcessResident", process.memory() as f64),
            MetricRecord::gauge("ProcessVirtual", process.virtual_memory() as f64),
            MetricRecord::gauge("ProcessCPU", process.cpu_usage() as f64),
            MetricRecord::gauge("ProcessReadBytes", disk.total_read_bytes as f64),
            MetricRecord::gauge("ProcessWrittenBytes", disk.total_written_bytes as f64),
            MetricRecord::gauge("ProcessUptime", process.run_time() as f64),
        ])
    }
}
