use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use metron_collector::Collector;
use metron_common::{MetricRecord, POLL_COUNT};
use metron_storage::MetricStore;
use tokio::task::JoinSet;

use crate::error::{AgentError, Result};

type SharedCollector = Arc<Mutex<Box<dyn Collector>>>;

/// Runs every collector and writes the samples into the store.
pub struct Poller {
    store: Arc<dyn MetricStore>,
    collectors: Vec<SharedCollector>,
    store_timeout: Duration,
}

/// Bound a store call by `limit`.
pub(crate) async fn with_deadline<T, F>(
    limit: Duration,
    op: &'static str,
    fut: F,
) -> Result<T>
where
    F: Future<Output = metron_storage::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res.map_err(AgentError::from),
        Err(_) => Err(AgentError::Timeout(op)),
    }
}

impl Poller {
    pub fn new(
        store: Arc<dyn MetricStore>,
        collectors: Vec<Box<dyn Collector>>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            collectors: collectors
                .into_iter()
                .map(|c| Arc::new(Mutex::new(c)))
                .collect(),
            store_timeout,
        }
    }

    /// Sample all collectors concurrently on the blocking pool.
    ///
    /// Returns the samples in registration order plus one message per
    /// collector that failed.
    async fn sample(&self) -> (Vec<MetricRecord>, Vec<String>) {
        let mut tasks = JoinSet::new();
        for (idx, collector) in self.collectors.iter().enumerate() {
            let collector = collector.clone();
            tasks.spawn_blocking(move || {
                let mut guard = collector.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                let name = guard.name().to_string();
                (idx, name, guard.collect())
            });
        }

        let mut results = Vec::with_capacity(self.collectors.len());
        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, _, Ok(samples))) => results.push((idx, samples)),
                Ok((_, name, Err(e))) => {
                    tracing::warn!(collector = %name, error = %e, "Collection failed");
                    failures.push(format!("{name}: {e}"));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Collector task failed");
                    failures.push(format!("collector task: {e}"));
                }
            }
        }
        results.sort_by_key(|(idx, _)| *idx);
        (results.into_iter().flat_map(|(_, s)| s).collect(), failures)
    }

    /// One poll tick: sample, write every gauge, bump `PollCount`.
    ///
    /// Returns the number of gauges written. Any collector or write failure
    /// is reported as [`AgentError::PartialSampling`] after everything else
    /// has been applied.
    pub async fn poll_once(&self) -> Result<usize> {
        let (samples, mut failures) = self.sample().await;

        let mut written = 0;
        for sample in &samples {
            let value = match sample.as_gauge() {
                Some(v) if v.is_finite() => v,
                Some(v) => {
                    failures.push(format!("{}: non-finite sample {v}", sample.id));
                    continue;
                }
                None => {
                    failures.push(format!("{}: collectors must report gauges", sample.id));
                    continue;
                }
            };
            let write = self.store.update_gauge(&sample.id, value);
            match with_deadline(self.store_timeout, "gauge update", write).await {
                Ok(_) => written += 1,
                Err(e) => failures.push(format!("{}: {e}", sample.id)),
            }
        }

        let count = self.store.update_counter(POLL_COUNT, 1);
        if let Err(e) = with_deadline(self.store_timeout, "poll count update", count).await {
            failures.push(format!("{POLL_COUNT}: {e}"));
        }

        tracing::debug!(gauges = written, failures = failures.len(), "Poll tick finished");
        if failures.is_empty() {
            Ok(written)
        } else {
            Err(AgentError::PartialSampling { failures })
        }
    }
}
