use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metron_common::MetricRecord;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::memory::{write_atomic, MemStore};
use crate::{MetricStore, Snapshot};

/// A [`MemStore`] checkpointed to a JSON file.
///
/// With a non-zero interval a background task rewrites the snapshot every
/// period. With a zero interval the snapshot is rewritten after every
/// successful mutation instead. Either way `close()` writes a final one.
pub struct FileStore {
    inner: Arc<MemStore>,
    writer: Arc<SnapshotWriter>,
    path: PathBuf,
    sync_writes: bool,
    shutdown: CancellationToken,
    flusher: AsyncMutex<Option<JoinHandle<()>>>,
}

/// Serializes snapshot writes to one file.
///
/// The map is copied and written under one lock, so writes reach the disk in
/// the order their copies were taken and an older copy never replaces a
/// newer one. Each write goes to a temporary sibling that is renamed over the
/// target.
struct SnapshotWriter {
    store: Arc<MemStore>,
    path: PathBuf,
    lock: AsyncMutex<()>,
}

impl SnapshotWriter {
    async fn write(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        let bytes = self.store.serialize()?;
        write_atomic(&self.path, &bytes).await
    }
}

impl FileStore {
    pub async fn open(
        path: impl Into<PathBuf>,
        interval: Duration,
        restore: bool,
    ) -> Result<Self> {
        let path = path.into();
        let inner = Arc::new(MemStore::new());
        if restore {
            inner.load_snapshot(&path).await?;
        }

        let writer = Arc::new(SnapshotWriter {
            store: inner.clone(),
            path: path.clone(),
            lock: AsyncMutex::new(()),
        });
        let shutdown = CancellationToken::new();
        let sync_writes = interval.is_zero();
        let flusher = if sync_writes {
            None
        } else {
            Some(tokio::spawn(flush_loop(
                writer.clone(),
                interval,
                shutdown.clone(),
            )))
        };

        tracing::info!(
            path = %path.display(),
            interval_secs = interval.as_secs(),
            restore,
            "File store opened"
        );

        Ok(Self {
            inner,
            writer,
            path,
            sync_writes,
            shutdown,
            flusher: AsyncMutex::new(flusher),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn after_write(&self) -> Result<()> {
        if self.sync_writes {
            self.writer.write().await?;
        }
        Ok(())
    }
}

async fn flush_loop(writer: Arc<SnapshotWriter>, period: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let path = writer.path.display();
                match writer.write().await {
                    Ok(()) => {
                        tracing::debug!(%path, metrics = writer.store.len(), "Snapshot written")
                    }
                    Err(e) => tracing::warn!(%path, error = %e, "Snapshot write failed"),
                }
            }
            _ = shutdown.cancelled() => {
                tracing::debug!("Snapshot flusher stopped");
                break;
            }
        }
    }
}

#[async_trait]
impl MetricStore for FileStore {
    async fn update_gauge(&self, id: &str, value: f64) -> Result<MetricRecord> {
        let record = self.inner.update_gauge(id, value).await?;
        self.after_write().await?;
        Ok(record)
    }

    async fn update_counter(&self, id: &str, delta: i64) -> Result<MetricRecord> {
        let record = self.inner.update_counter(id, delta).await?;
        self.after_write().await?;
        Ok(record)
    }

    async fn update_batch(&self, records: &[MetricRecord]) -> Result<()> {
        self.inner.update_batch(records).await?;
        self.after_write().await
    }

    async fn reset_counter(&self, id: &str) -> Result<()> {
        self.inner.reset_counter(id).await?;
        self.after_write().await
    }

    async fn get(&self, id: &str) -> Result<Option<MetricRecord>> {
        self.inner.get(id).await
    }

    async fn get_all(&self) -> Result<Snapshot> {
        self.inner.get_all().await
    }

    async fn save_snapshot(&self, path: &Path) -> Result<()> {
        if path == self.path.as_path() {
            return self.writer.write().await;
        }
        self.inner.save_snapshot(path).await
    }

    async fn load_snapshot(&self, path: &Path) -> Result<()> {
        self.inner.load_snapshot(path).await
    }

    async fn health_check(&self) -> Result<()> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        tokio::fs::metadata(parent).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.shutdown.cancel();
        if let Some(handle) = self.flusher.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Snapshot flusher task failed");
            }
        }
        self.writer.write().await?;
        tracing::info!(path = %self.path.display(), "File store closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sync_mode_writes_after_each_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let store = FileStore::open(&path, Duration::ZERO, false).await.unwrap();

        store.update_counter("PollCount", 2).await.unwrap();
        let on_disk = crate::memory::read_snapshot(&path).await.unwrap().unwrap();
        assert_eq!(
            on_disk.get("PollCount"),
            Some(&MetricRecord::counter("PollCount", 2))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sync_writes_leave_latest_state_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let store = Arc::new(FileStore::open(&path, Duration::ZERO, false).await.unwrap());

        let mut tasks = Vec::new();
        for worker in 0..16 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..20 {
                    store.update_counter("PollCount", 1).await.unwrap();
                    store.update_gauge(&format!("g{worker}"), i as f64).await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let on_disk = crate::memory::read_snapshot(&path).await.unwrap().unwrap();
        assert_eq!(on_disk, store.get_all().await.unwrap());
        assert_eq!(
            on_disk.get("PollCount"),
            Some(&MetricRecord::counter("PollCount", 320))
        );
        assert!(!dir.path().join("metrics.json.tmp").exists());
    }

    #[tokio::test]
    async fn periodic_flush_writes_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let store = FileStore::open(&path, Duration::from_millis(50), false)
            .await
            .unwrap();
        store.update_gauge("Alloc", 3.5).await.unwrap();

        let mut flushed = None;
        for _ in 0..40 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if let Ok(Some(snapshot)) = crate::memory::read_snapshot(&path).await {
                if !snapshot.is_empty() {
                    flushed = Some(snapshot);
                    break;
                }
            }
        }
        let flushed = flushed.expect("flusher never wrote the snapshot");
        assert_eq!(flushed.get("Alloc"), Some(&MetricRecord::gauge("Alloc", 3.5)));
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn restore_of_missing_file_is_cold_start() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("absent.json"), Duration::from_secs(60), true)
            .await
            .unwrap();
        assert!(store.get_all().await.unwrap().is_empty());
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_writes_final_snapshot_and_restore_reads_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");

        let store = FileStore::open(&path, Duration::from_secs(300), false)
            .await
            .unwrap();
        store.update_counter("c", 7).await.unwrap();
        store.update_gauge("g", -1.25).await.unwrap();
        store.close().await.unwrap();

        let reopened = FileStore::open(&path, Duration::from_secs(300), true)
            .await
            .unwrap();
        let c = reopened.get("c").await.unwrap();
        assert_eq!(c, Some(MetricRecord::counter("c", 7)));
        let g = reopened.get("g").await.unwrap();
        assert_eq!(g, Some(MetricRecord::gauge("g", -1.25)));
        reopened.close().await.unwrap();
    }
}
