use crate::Collector;
use anyhow::Result;
use metron_common::MetricRecord;
use rand::Rng;

/// `RandomValue`: a uniform sample in `[0, 1)`, useful to see that reports
/// carry fresh data.
pub struct RandomCollector;

impl Collector for RandomCollector {
    fn name(&self) -> &str {
        "random"
    }

    fn collect(&mut self) -> Result<Vec<MetricRecord>> {
        Ok(vec![MetricRecord::gauge("RandomValue", rand::thread_rng().gen::<f64>())])
    }
}
