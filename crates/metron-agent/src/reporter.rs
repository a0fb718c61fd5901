use std::sync::Arc;
use std::time::Duration;

use metron_common::{EncodedBatch, MetricRecord, PayloadEncoder, POLL_COUNT};
use metron_storage::MetricStore;
use tokio::sync::Mutex as AsyncMutex;

use crate::error::{AgentError, Result};
use crate::poller::with_deadline;
use crate::transport::Transport;

/// One report tick's snapshot, encoded and ready to deliver.
#[derive(Debug, Clone)]
pub struct ReportJob {
    pub tick: u64,
    pub batch: EncodedBatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub status: u16,
    /// Whether this delivery reset `PollCount`. At most one delivery per
    /// tick does, and never one older than a tick already reset.
    pub reset: bool,
}

pub struct Reporter {
    store: Arc<dyn MetricStore>,
    encoder: PayloadEncoder,
    transport: Arc<dyn Transport>,
    store_timeout: Duration,
    /// Last tick whose delivery reset `PollCount`.
    reset_gate: AsyncMutex<u64>,
}

impl Reporter {
    pub fn new(
        store: Arc<dyn MetricStore>,
        encoder: PayloadEncoder,
        transport: Arc<dyn Transport>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            encoder,
            transport,
            store_timeout,
            reset_gate: AsyncMutex::new(0),
        }
    }

    /// Snapshot the store and encode it. `None` when the store is empty.
    pub async fn prepare(&self, tick: u64) -> Result<Option<ReportJob>> {
        let snapshot = with_deadline(self.store_timeout, "snapshot", self.store.get_all()).await?;
        if snapshot.is_empty() {
            tracing::debug!(tick, "Store empty, nothing to report");
            return Ok(None);
        }
        let records: Vec<MetricRecord> = snapshot.into_values().collect();
        let batch = self.encoder.encode(&records)?;
        Ok(Some(ReportJob { tick, batch }))
    }

    /// Send a prepared job and, on a 2xx answer, reset `PollCount` if no
    /// delivery of this or a later tick already did.
    pub async fn deliver(&self, job: &ReportJob) -> Result<Delivery> {
        let status = self.transport.send(&job.batch).await?;
        if !(200..300).contains(&status) {
            return Err(AgentError::Status(status));
        }

        let mut last_reset = self.reset_gate.lock().await;
        if job.tick <= *last_reset {
            return Ok(Delivery { status, reset: false });
        }
        let reset = self.store.reset_counter(POLL_COUNT);
        with_deadline(self.store_timeout, "poll count reset", reset).await?;
        *last_reset = job.tick;
        Ok(Delivery { status, reset: true })
    }

    /// Prepare and deliver in one step. `None` when there was nothing to send.
    pub async fn report_once(&self, tick: u64) -> Result<Option<Delivery>> {
        match self.prepare(tick).await? {
            Some(job) => {
                let delivery = self.deliver(&job).await?;
                tracing::info!(
                    tick,
                    records = job.batch.records,
                    status = delivery.status,
                    "Metrics reported"
                );
                Ok(Some(delivery))
            }
            None => Ok(None),
        }
    }
}
