use crate::Collector;
use anyhow::Result;
use metron_common::MetricRecord;
use sysinfo::System;

/// Host load averages. Reported as zero on platforms without them.
pub struct LoadCollector;

impl LoadCollector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LoadCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for LoadCollector {
    fn name(&self) -> &str {
        "load"
    }

    fn collect(&mut self) -> Result<Vec<MetricRecord>> {
        let load_avg = System::load_average();
        Ok(vec![
            MetricRecord::gauge("LoadAverage1", load_avg.one),
            MetricRecord::gauge("LoadAverage5", load_avg.five),
            MetricRecord::gauge("LoadAverage15", load_avg.fifteen),
        ])
    }
}
