#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use metron_agent::Transport;
use metron_collector::Collector;
use metron_common::codec::gunzip;
use metron_common::{EncodedBatch, MetricRecord, MetricWire, POLL_COUNT};
use metron_storage::memory::MemStore;
use metron_storage::{MetricStore, Snapshot};
use tokio::sync::oneshot;

/// What the mock collector saw for one request.
#[derive(Debug, Clone)]
pub struct Received {
    pub body: Vec<u8>,
    pub hash: Option<String>,
    pub content_encoding: Option<String>,
}

impl Received {
    pub fn records(&self) -> Vec<MetricWire> {
        serde_json::from_slice(&self.body).unwrap()
    }
}

/// In-process stand-in for the collector's `/updates/` endpoint.
#[derive(Clone)]
pub struct MockCollector {
    pub addr: SocketAddr,
    status: Arc<AtomicU16>,
    received: Arc<Mutex<Vec<Received>>>,
}

impl MockCollector {
    pub fn set_status(&self, status: u16) {
        self.status.store(status, Ordering::SeqCst);
    }

    pub fn requests(&self) -> usize {
        self.received.lock().unwrap().len()
    }

    pub fn received(&self) -> Vec<Received> {
        self.received.lock().unwrap().clone()
    }

    pub fn url(&self) -> String {
        format!("http://{}/updates/", self.addr)
    }

    /// Poll until at least `n` requests arrived or `limit` elapsed.
    pub async fn wait_for_requests(&self, n: usize, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        while tokio::time::Instant::now() < deadline {
            if self.requests() >= n {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.requests() >= n
    }
}

async fn updates(
    State(mock): State<MockCollector>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let content_encoding = header("content-encoding");
    let body = if content_encoding.as_deref() == Some("gzip") {
        gunzip(&body).unwrap()
    } else {
        body.to_vec()
    };
    mock.received.lock().unwrap().push(Received {
        body,
        hash: header("hashsha256"),
        content_encoding,
    });
    StatusCode::from_u16(mock.status.load(Ordering::SeqCst)).unwrap()
}

pub async fn spawn_mock_collector(status: u16) -> MockCollector {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mock = MockCollector {
        addr: listener.local_addr().unwrap(),
        status: Arc::new(AtomicU16::new(status)),
        received: Arc::new(Mutex::new(Vec::new())),
    };
    let app = Router::new()
        .route("/updates/", post(updates))
        .with_state(mock.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    mock
}

/// Transport that parks its first `hold_limit` sends until the test answers
/// them. Later sends fail with 500 straight away.
pub struct GatedTransport {
    hold_limit: usize,
    held: Mutex<Vec<(i64, oneshot::Sender<u16>)>>,
    parked: AtomicUsize,
}

impl GatedTransport {
    pub fn new(hold_limit: usize) -> Self {
        Self {
            hold_limit,
            held: Mutex::new(Vec::new()),
            parked: AtomicUsize::new(0),
        }
    }

    /// Sends currently waiting for an answer.
    pub fn held(&self) -> usize {
        self.held.lock().unwrap().len()
    }

    /// `PollCount` deltas carried by the waiting sends, in arrival order.
    pub fn held_poll_counts(&self) -> Vec<i64> {
        self.held.lock().unwrap().iter().map(|(n, _)| *n).collect()
    }

    /// Answer the waiting send with the largest `PollCount`.
    pub fn release_newest(&self, status: u16) -> Option<i64> {
        let mut held = self.held.lock().unwrap();
        let pos = (0..held.len()).max_by_key(|&i| held[i].0)?;
        let (count, tx) = held.remove(pos);
        let _ = tx.send(status);
        Some(count)
    }

    pub fn release_all(&self, status: u16) {
        for (_, tx) in self.held.lock().unwrap().drain(..) {
            let _ = tx.send(status);
        }
    }

    pub async fn wait_until_held(&self, n: usize, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        while self.held() < n {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        true
    }
}

fn poll_count_of(batch: &EncodedBatch) -> i64 {
    let body = gunzip(&batch.body).unwrap();
    let records: Vec<MetricWire> = serde_json::from_slice(&body).unwrap();
    records
        .iter()
        .find(|r| r.id == POLL_COUNT)
        .and_then(|r| r.delta)
        .unwrap_or(0)
}

#[async_trait]
impl Transport for GatedTransport {
    async fn send(&self, batch: &EncodedBatch) -> metron_agent::Result<u16> {
        if self.parked.fetch_add(1, Ordering::SeqCst) >= self.hold_limit {
            return Ok(500);
        }
        let (tx, rx) = oneshot::channel();
        self.held.lock().unwrap().push((poll_count_of(batch), tx));
        Ok(rx.await.unwrap_or(500))
    }
}

/// Collector returning one fixed gauge.
pub struct FixedCollector(pub &'static str, pub f64);

impl Collector for FixedCollector {
    fn name(&self) -> &str {
        "fixed"
    }

    fn collect(&mut self) -> anyhow::Result<Vec<MetricRecord>> {
        Ok(vec![MetricRecord::gauge(self.0, self.1)])
    }
}

/// MemStore wrapper that counts counter resets.
#[derive(Default)]
pub struct CountingStore {
    inner: MemStore,
    pub resets: AtomicUsize,
}

impl CountingStore {
    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricStore for CountingStore {
    async fn update_gauge(
        &self,
        id: &str,
        value: f64,
    ) -> metron_storage::Result<MetricRecord> {
        self.inner.update_gauge(id, value).await
    }

    async fn update_counter(
        &self,
        id: &str,
        delta: i64,
    ) -> metron_storage::Result<MetricRecord> {
        self.inner.update_counter(id, delta).await
    }

    async fn update_batch(&self, records: &[MetricRecord]) -> metron_storage::Result<()> {
        self.inner.update_batch(records).await
    }

    async fn reset_counter(&self, id: &str) -> metron_storage::Result<()> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        self.inner.reset_counter(id).await
    }

    async fn get(&self, id: &str) -> metron_storage::Result<Option<MetricRecord>> {
        self.inner.get(id).await
    }

    async fn get_all(&self) -> metron_storage::Result<Snapshot> {
        self.inner.get_all().await
    }

    async fn save_snapshot(&self, path: &Path) -> metron_storage::Result<()> {
        self.inner.save_snapshot(path).await
    }

    async fn load_snapshot(&self, path: &Path) -> metron_storage::Result<()> {
        self.inner.load_snapshot(path).await
    }

    async fn health_check(&self) -> metron_storage::Result<()> {
        Ok(())
    }

    async fn close(&self) -> metron_storage::Result<()> {
        Ok(())
    }
}
