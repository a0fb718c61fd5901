//! Agent lifecycle: one poll loop, one report trigger and `rate_limit`
//! report workers, all stopped by a shared cancellation token.
//!
//! The trigger takes exactly one snapshot per report tick and queues it.
//! Workers only bound how many deliveries are in flight; the reporter's
//! reset gate keeps `PollCount` resets at one per tick.
//!
//! At most one snapshot waits in the queue. A snapshot taken while another
//! is still queued is dropped, because both carry the same un-reset
//! `PollCount` and the server would sum them.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use metron_collector::Collector;
use metron_common::{crypt, PayloadEncoder};
use metron_storage::MetricStore;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::poller::Poller;
use crate::reporter::{ReportJob, Reporter};
use crate::transport::{HttpTransport, Transport};

/// Snapshots allowed to wait for a free report worker.
const PENDING_SNAPSHOTS: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Idle,
    Running,
    Draining,
    Stopped,
}

/// Scheduling knobs, separate from [`AgentConfig`] so tests can run on
/// sub-second intervals.
#[derive(Debug, Clone)]
pub struct Schedule {
    pub poll_interval: Duration,
    pub report_interval: Duration,
    pub rate_limit: usize,
}

impl From<&AgentConfig> for Schedule {
    fn from(config: &AgentConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            report_interval: config.report_interval(),
            rate_limit: config.rate_limit,
        }
    }
}

pub struct Agent {
    poller: Arc<Poller>,
    reporter: Arc<Reporter>,
    schedule: Schedule,
    state: Mutex<AgentState>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl Agent {
    pub fn new(poller: Poller, reporter: Reporter, schedule: Schedule) -> Self {
        Self {
            poller: Arc::new(poller),
            reporter: Arc::new(reporter),
            schedule,
            state: Mutex::new(AgentState::Idle),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Wire up the production poller, HTTP transport and payload encoder.
    pub fn from_config(
        config: &AgentConfig,
        store: Arc<dyn MetricStore>,
        collectors: Vec<Box<dyn Collector>>,
    ) -> Result<Self> {
        let public_key = match &config.crypto_key {
            Some(path) => Some(crypt::read_public_key(path)?),
            None => None,
        };
        let encoder = PayloadEncoder::new(config.sign_key_bytes(), public_key);
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(
            config.report_url(),
            config.request_timeout(),
        )?);

        let poller = Poller::new(store.clone(), collectors, config.store_timeout());
        let reporter = Reporter::new(store, encoder, transport, config.store_timeout());
        Ok(Self::new(poller, reporter, Schedule::from(config)))
    }

    fn lock_state(&self) -> MutexGuard<'_, AgentState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> AgentState {
        *self.lock_state()
    }

    /// Token cancelled when the agent shuts down.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Spawn the poll loop, the report trigger and the workers.
    pub fn start(&self) -> Result<()> {
        let mut state = self.lock_state();
        if *state != AgentState::Idle {
            return Err(AgentError::InvalidState(format!("cannot start from {:?}", *state)));
        }

        let workers = self.schedule.rate_limit.max(1);
        let (tx, rx) = job_queue();
        let rx = Arc::new(AsyncMutex::new(rx));

        self.tasks.spawn(poll_loop(
            self.poller.clone(),
            self.schedule.poll_interval,
            self.shutdown.clone(),
        ));
        self.tasks.spawn(report_trigger(
            self.reporter.clone(),
            tx,
            self.schedule.report_interval,
            self.shutdown.clone(),
        ));
        for worker in 0..workers {
            self.tasks.spawn(report_worker(
                worker,
                self.reporter.clone(),
                rx.clone(),
                self.shutdown.clone(),
            ));
        }
        self.tasks.close();

        *state = AgentState::Running;
        tracing::info!(
            poll_interval_ms = self.schedule.poll_interval.as_millis() as u64,
            report_interval_ms = self.schedule.report_interval.as_millis() as u64,
            workers,
            "Agent started"
        );
        Ok(())
    }

    /// Cancel every loop and wait for them to exit. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        {
            let mut state = self.lock_state();
            match *state {
                AgentState::Idle => {
                    *state = AgentState::Stopped;
                    self.shutdown.cancel();
                    return;
                }
                AgentState::Running => *state = AgentState::Draining,
                AgentState::Draining | AgentState::Stopped => {}
            }
        }

        self.shutdown.cancel();
        self.tasks.wait().await;

        let mut state = self.lock_state();
        if *state != AgentState::Stopped {
            *state = AgentState::Stopped;
            tracing::info!("Agent stopped");
        }
    }
}

fn job_queue() -> (mpsc::Sender<ReportJob>, mpsc::Receiver<ReportJob>) {
    mpsc::channel(PENDING_SNAPSHOTS)
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn poll_loop(poller: Arc<Poller>, period: Duration, shutdown: CancellationToken) {
    let mut tick = ticker(period);
    loop {
        tokio::select! {
            _ = tick.tick() => {
                if let Err(e) = poller.poll_once().await {
                    tracing::warn!(error = %e, "Poll tick incomplete");
                }
            }
            _ = shutdown.cancelled() => {
                tracing::debug!("Poll loop stopped");
                break;
            }
        }
    }
}

async fn report_trigger(
    reporter: Arc<Reporter>,
    jobs: mpsc::Sender<ReportJob>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut tick = ticker(period);
    let mut seq: u64 = 0;
    loop {
        tokio::select! {
            _ = tick.tick() => {
                seq += 1;
                match reporter.prepare(seq).await {
                    Ok(Some(job)) => match jobs.try_send(job) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(job)) => {
                            tracing::warn!(
                                tick = job.tick,
                                "Previous snapshot still queued, skipping this one"
                            );
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => break,
                    },
                    Ok(None) => {}
                    Err(e) => tracing::warn!(tick = seq, error = %e, "Report snapshot failed"),
                }
            }
            _ = shutdown.cancelled() => {
                tracing::debug!("Report trigger stopped");
                break;
            }
        }
    }
}

async fn report_worker(
    worker: usize,
    reporter: Arc<Reporter>,
    jobs: Arc<AsyncMutex<mpsc::Receiver<ReportJob>>>,
    shutdown: CancellationToken,
) {
    loop {
        let job = tokio::select! {
            job = async { jobs.lock().await.recv().await } => job,
            _ = shutdown.cancelled() => break,
        };
        let Some(job) = job else { break };

        // Cancellation is only checked between jobs; an in-flight send finishes.
        match reporter.deliver(&job).await {
            Ok(delivery) => tracing::info!(
                worker,
                tick = job.tick,
                records = job.batch.records,
                status = delivery.status,
                reset = delivery.reset,
                "Metrics reported"
            ),
            Err(e) => tracing::warn!(worker, tick = job.tick, error = %e, "Report failed"),
        }
    }
    tracing::debug!(worker, "Report worker stopped");
}
