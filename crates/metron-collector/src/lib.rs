//! Metric collection framework for the metron agent.
//!
//! Each [`Collector`] implementation samples one category of host or process
//! metrics (CPU, memory, load, the agent process itself) and returns them as
//! gauge [`MetricRecord`]s, ready to be written into the agent's store.
//!
//! Collectors block: CPU sampling in particular sleeps for a measurement
//! window. Callers on an async runtime should run them on the blocking pool.

pub mod cpu;
pub mod load;
pub mod memory;
pub mod process;
pub mod random;

use anyhow::Result;
use metron_common::MetricRecord;

/// A metric sampler that runs on the agent host.
///
/// Implementations are registered in the agent's poll loop and called once
/// per poll tick. The trait requires `Send + Sync` so collectors can be moved
/// onto worker threads and sampled concurrently.
pub trait Collector: Send + Sync {
    /// Returns the collector name (e.g., `"cpu"`, `"memory"`), used for
    /// logging and error reports.
    fn name(&self) -> &str;

    /// Samples current values. Every returned record is a gauge.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying system API call fails.
    fn collect(&mut self) -> Result<Vec<MetricRecord>>;
}

/// The standard collector set, in the order the agent registers them.
pub fn default_collectors() -> Vec<Box<dyn Collector>> {
    vec![
        Box::new(memory::MemoryCollector::new()),
        Box::new(cpu::CpuCollector::new()),
        Box::new(load::LoadCollector::new()),
        Box::new(process::ProcessCollector::new()),
        Box::new(random::RandomCollector),
    ]
}
